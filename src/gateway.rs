use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

/// 一覧取得時の検索条件。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// `user = "abc" && startTime >= "..."`形式のフィルター
    pub filter: Option<String>,
    /// ソートするフィールド。先頭に`-`を付けると降順になる。
    pub sort: Option<String>,
    /// 展開するリレーション
    pub expand: Option<String>,
}

/// 1件取得時のオプション。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetOptions {
    pub expand: Option<String>,
}

/// 一覧取得の結果。
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub per_page: u32,
    #[serde(default)]
    pub total_items: u64,
    #[serde(default)]
    pub total_pages: u32,
    pub items: Vec<Value>,
}

impl ListResult {
    /// 1ページだけの結果を返す。
    pub fn single_page(items: Vec<Value>) -> Self {
        Self {
            page: 1,
            per_page: items.len() as u32,
            total_items: items.len() as u64,
            total_pages: 1,
            items,
        }
    }
}

/// リアルタイム通知の種類。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

/// バックエンドから届くリアルタイム通知。
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RealtimeMessage {
    pub action: Action,
    pub record: Value,
}

/// リモートのデータストアと通信するためのゲートウェイ。
///
/// コレクションごとのCRUD、一覧取得、リアルタイム購読と認証確認を提供する。
/// レコードはJSONのまま受け渡し、型への変換は呼び出し側で行う。
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Gateway: Send + Sync {
    /// 現在のセッションが有効かどうかを返す。
    async fn is_authenticated(&self) -> bool;

    /// レコードの一覧を取得する。
    ///
    /// # Arguments
    ///
    /// * `collection` - コレクション名
    /// * `page` - 1から始まるページ番号
    /// * `per_page` - 1ページあたりの件数
    /// * `options` - フィルター、ソート、展開するリレーション
    async fn list(
        &self,
        collection: &str,
        page: u32,
        per_page: u32,
        options: &ListOptions,
    ) -> Result<ListResult>;

    /// IDを指定してレコードを1件取得する。
    async fn get_one(&self, collection: &str, id: &str, options: &GetOptions) -> Result<Value>;

    /// レコードを作成し、サーバーが採番したIDと日時を含むレコードを返す。
    async fn create(&self, collection: &str, data: Value) -> Result<Value>;

    /// レコードを部分的に更新し、更新後のレコードを返す。
    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<Value>;

    /// レコードを削除する。
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// コレクションの変更通知を購読する。
    ///
    /// `filter`が`None`の場合はコレクション全体(`*`)を購読する。
    async fn subscribe(
        &self,
        collection: &str,
        filter: Option<String>,
    ) -> Result<UnboundedReceiver<RealtimeMessage>>;

    /// `subscribe`と同じ引数で購読を解除する。
    ///
    /// 呼び出し側は`subscribe`で受け取った受信側を先に破棄しておく。
    /// 受信側が閉じたチャンネルだけを外すため、同じ引数の他の購読者は残る。
    async fn unsubscribe(&self, collection: &str, filter: Option<String>) -> Result<()>;
}

/// フィルター式を組み立てる。
pub mod filter {
    /// 値を二重引用符で囲み、含まれる引用符をエスケープする。
    pub fn quote(value: &str) -> String {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }

    pub fn eq(field: &str, value: &str) -> String {
        format!("{} = {}", field, quote(value))
    }

    pub fn gte(field: &str, value: &str) -> String {
        format!("{} >= {}", field, quote(value))
    }

    pub fn lte(field: &str, value: &str) -> String {
        format!("{} <= {}", field, quote(value))
    }

    /// 条件を`&&`で結合する。空の場合は`None`を返す。
    pub fn and<I: IntoIterator<Item = String>>(clauses: I) -> Option<String> {
        let clauses: Vec<String> = clauses.into_iter().collect();
        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" && "))
        }
    }
}
