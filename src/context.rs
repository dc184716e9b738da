use std::sync::Arc;

use crate::collection::{CollectionSync, SyncOptions};
use crate::entries::EntrySync;
use crate::gateway::Gateway;
use crate::profile::ProfileSync;
use crate::project::Project;
use crate::realtime::RealtimeHandle;
use crate::tag::Tag;
use crate::task::Task;

/// 1つのセッションで利用する同期処理をまとめたもの。
///
/// 全ての同期処理は同じゲートウェイを共有する。
#[derive(Clone)]
pub struct SyncContext {
    pub entries: EntrySync,
    pub projects: CollectionSync<Project>,
    pub tasks: CollectionSync<Task>,
    pub tags: CollectionSync<Tag>,
    pub profile: ProfileSync,
}

impl SyncContext {
    /// 新しい`SyncContext`を返す。
    ///
    /// # Arguments
    ///
    /// * `gateway` - 全ての同期処理で共有するゲートウェイ
    /// * `options` - 同期処理の設定
    pub fn new(gateway: Arc<dyn Gateway>, options: SyncOptions) -> Self {
        Self {
            entries: EntrySync::new(Arc::clone(&gateway), options),
            projects: CollectionSync::new(Arc::clone(&gateway), options),
            tasks: CollectionSync::new(Arc::clone(&gateway), options),
            tags: CollectionSync::new(Arc::clone(&gateway), options),
            profile: ProfileSync::new(gateway),
        }
    }

    /// ユーザーの全てのコレクションを取得する。
    pub async fn load(&self, owner_id: &str) {
        tokio::join!(
            self.entries.fetch_all(owner_id),
            self.projects.fetch_all(owner_id),
            self.tasks.fetch_all(owner_id),
            self.tags.fetch_all(owner_id),
        );
    }

    /// 全てのコレクションの変更通知を購読する。
    ///
    /// エントリーはユーザーで絞り込み、それ以外はバックエンドの権限に任せて全体を購読する。
    pub fn subscribe_all(&self, owner_id: &str) -> Vec<RealtimeHandle> {
        vec![
            self.entries.subscribe(Some(owner_id)),
            self.projects.subscribe(None),
            self.tasks.subscribe(None),
            self.tags.subscribe(None),
        ]
    }
}
