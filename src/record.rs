use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::gateway::filter;

/// `create`で作成したレコードをコンテナのどこに入れるか。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// 先頭に追加する
    Prepend,
    /// 末尾に追加する
    Append,
    /// コンテナは更新せず、リアルタイム通知に任せる
    Deferred,
}

/// 作成の通知を受けた時の動作。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushCreate {
    /// 通知されたレコードを末尾に追加する
    Append,
    /// コレクション全体を取得し直す
    Refetch,
}

/// 同期対象のレコード。
///
/// コレクションごとの違いは関連定数とメソッドで表現する。
pub trait Record: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// 作成時に送信するデータ
    type New: Serialize + Debug + Send + Sync;
    /// 部分更新時に送信するデータ
    type Patch: Serialize + Debug + Send + Sync;

    const COLLECTION: &'static str;
    /// 一覧取得時のソート順
    const SORT: &'static str = "-created";
    /// 一覧取得時に展開するリレーション
    const EXPAND: Option<&'static str> = None;
    const CREATE_PLACEMENT: Placement;
    const PUSH_CREATE: PushCreate = PushCreate::Append;
    /// 更新後に展開付きで読み直すかどうか
    const REREAD_ON_UPDATE: bool = false;
    /// デフォルトフラグのフィールド名。フラグを持たないコレクションは`None`。
    const DEFAULT_FIELD: Option<&'static str> = None;

    fn id(&self) -> &str;

    /// 所有者のID。複数の場合は最初の1つ。
    fn owner_id(&self) -> Option<&str>;

    /// 指定したユーザーが所有しているかどうかを返す。
    fn owned_by(&self, owner_id: &str) -> bool {
        self.owner_id() == Some(owner_id)
    }

    /// 所有者で絞り込むフィルター。`None`の場合は取得後に`owned_by`で絞り込む。
    fn owner_filter(owner_id: &str) -> Option<String> {
        Some(filter::eq("user", owner_id))
    }

    /// 送信前に作成データを補完する。
    fn prepare_new(_new: &mut Self::New) {}

    fn is_default(&self) -> bool {
        false
    }

    fn clear_default(&mut self) {}

    fn new_sets_default(_new: &Self::New) -> bool {
        false
    }

    fn patch_sets_default(_patch: &Self::Patch) -> bool {
        false
    }
}

/// 同じIDの要素があれば置き換え、なければ`placement`に従って追加する。
pub fn upsert<R: Record>(records: &mut Vec<R>, record: R, placement: Placement) {
    if let Some(existing) = records.iter_mut().find(|r| r.id() == record.id()) {
        *existing = record;
        return;
    }
    match placement {
        Placement::Prepend => records.insert(0, record),
        Placement::Append | Placement::Deferred => records.push(record),
    }
}

/// 同じIDの要素を置き換える。見つからない場合は何もしない。
pub fn replace<R: Record>(records: &mut [R], record: R) {
    if let Some(existing) = records.iter_mut().find(|r| r.id() == record.id()) {
        *existing = record;
    }
}

/// 空文字列を`None`として読み込む。
pub fn empty_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.filter(|s| !s.is_empty()))
}

/// `null`を型のデフォルト値として読み込む。
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
