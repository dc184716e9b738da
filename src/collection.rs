use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde_json::Value;

use crate::gateway::{filter, Gateway, GetOptions, ListOptions};
use crate::record::{replace, upsert, Placement, Record};
use crate::store::Store;

/// 同期処理の設定。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncOptions {
    /// 一覧取得時の1ページあたりの件数
    pub per_page: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self { per_page: 100 }
    }
}

/// 1つのコレクションをリモートのデータストアと同期する。
///
/// 読み書きはすべてこの型を通して行い、結果を`Store`へ反映する。
/// 失敗はログに出力し、戻り値(`None`、`false`、空のコレクション)で表す。
pub struct CollectionSync<R: Record> {
    pub(crate) gateway: Arc<dyn Gateway>,
    store: Store<Vec<R>>,
    options: SyncOptions,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> Clone for CollectionSync<R> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            store: self.store.clone(),
            options: self.options,
            _record: PhantomData,
        }
    }
}

impl<R: Record> CollectionSync<R> {
    /// 新しい`CollectionSync`を返す。
    ///
    /// # Arguments
    ///
    /// * `gateway` - リモートのデータストアと通信するためのゲートウェイ
    /// * `options` - 同期処理の設定
    pub fn new(gateway: Arc<dyn Gateway>, options: SyncOptions) -> Self {
        Self {
            gateway,
            store: Store::new(Vec::new()),
            options,
            _record: PhantomData,
        }
    }

    /// レコードを保持している`Store`を返す。
    pub fn store(&self) -> &Store<Vec<R>> {
        &self.store
    }

    /// 保持しているレコードのコピーを返す。
    pub fn records(&self) -> Vec<R> {
        self.store.get()
    }

    /// 保持しているレコードからIDで検索する。
    pub fn get(&self, id: &str) -> Option<R> {
        self.store.get().into_iter().find(|record| record.id() == id)
    }

    /// デフォルトに設定されているレコードを返す。
    pub fn default_record(&self) -> Option<R> {
        self.store.get().into_iter().find(|record| record.is_default())
    }

    /// ユーザーのレコードを全て取得し、`Store`を置き換える。
    ///
    /// 取得に失敗した場合は`Store`を空にする。
    pub async fn fetch_all(&self, owner_id: &str) {
        self.fetch_where(owner_id, Vec::new()).await;
    }

    /// 所有者の条件に`clauses`を加えて取得し、`Store`を置き換える。
    pub(crate) async fn fetch_where(&self, owner_id: &str, clauses: Vec<String>) {
        if !self.authenticated().await {
            return;
        }

        match self.try_fetch(owner_id, clauses).await {
            Ok(records) => {
                info!("Fetched {} {} for {}", records.len(), R::COLLECTION, owner_id);
                self.store.set(records);
            }
            Err(e) => {
                error!("Error fetching {}: {:?}", R::COLLECTION, e);
                self.store.set(Vec::new());
            }
        }
    }

    async fn try_fetch(&self, owner_id: &str, clauses: Vec<String>) -> Result<Vec<R>> {
        let options = ListOptions {
            filter: filter::and(R::owner_filter(owner_id).into_iter().chain(clauses)),
            sort: Some(R::SORT.to_string()),
            expand: R::EXPAND.map(str::to_string),
        };

        let mut items = Vec::new();
        let mut page = 1;
        loop {
            let result = self
                .gateway
                .list(R::COLLECTION, page, self.options.per_page, &options)
                .await
                .with_context(|| format!("Failed to list {} (page {})", R::COLLECTION, page))?;
            items.extend(result.items);
            if page >= result.total_pages {
                break;
            }
            page += 1;
        }

        let records = items
            .into_iter()
            .filter_map(|item| match decode::<R>(item) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping undecodable record: {:?}", e);
                    None
                }
            })
            .filter(|record| record.owned_by(owner_id))
            .collect();

        Ok(records)
    }

    /// レコードを作成し、作成されたレコードを返す。
    ///
    /// コレクションによっては`Store`を更新せず、リアルタイム通知による追加に任せる。
    /// デフォルトに設定した場合は、他のレコードのデフォルトを解除する。
    pub async fn create(&self, mut new: R::New) -> Option<R> {
        if !self.authenticated().await {
            return None;
        }

        R::prepare_new(&mut new);
        let record = match self.try_create(&new).await {
            Ok(record) => record,
            Err(e) => {
                error!("Error creating {} record: {:?}", R::COLLECTION, e);
                return None;
            }
        };

        if R::CREATE_PLACEMENT != Placement::Deferred {
            let inserted = record.clone();
            self.store
                .update(|records| upsert(records, inserted, R::CREATE_PLACEMENT));
        }

        if R::new_sets_default(&new) {
            self.enforce_single_default(record.owner_id(), record.id())
                .await;
        }

        Some(record)
    }

    async fn try_create(&self, new: &R::New) -> Result<R> {
        debug!("Creating {} record: {:?}", R::COLLECTION, new);
        let data = serde_json::to_value(new).context("Failed to serialize record")?;
        let created = self
            .gateway
            .create(R::COLLECTION, data)
            .await
            .with_context(|| format!("Failed to create {} record", R::COLLECTION))?;

        decode(created)
    }

    /// レコードを部分的に更新し、更新後のレコードを返す。
    pub async fn update(&self, id: &str, patch: R::Patch) -> Option<R> {
        if !self.authenticated().await {
            return None;
        }

        let record = match self.try_update(id, &patch).await {
            Ok(record) => record,
            Err(e) => {
                error!("Error updating {} record {}: {:?}", R::COLLECTION, id, e);
                return None;
            }
        };

        if R::patch_sets_default(&patch) {
            self.enforce_single_default(record.owner_id(), id).await;
        }

        let replaced = record.clone();
        self.store.update(|records| replace(records, replaced));

        Some(record)
    }

    async fn try_update(&self, id: &str, patch: &R::Patch) -> Result<R> {
        debug!("Updating {} record {}: {:?}", R::COLLECTION, id, patch);
        let data = serde_json::to_value(patch).context("Failed to serialize patch")?;
        let updated = self
            .gateway
            .update(R::COLLECTION, id, data)
            .await
            .with_context(|| format!("Failed to update {} record {}", R::COLLECTION, id))?;

        if !R::REREAD_ON_UPDATE {
            return decode(updated);
        }

        let options = GetOptions {
            expand: R::EXPAND.map(str::to_string),
        };
        let reread = self
            .gateway
            .get_one(R::COLLECTION, id, &options)
            .await
            .with_context(|| format!("Failed to re-read {} record {}", R::COLLECTION, id))?;

        decode(reread)
    }

    /// レコードを削除する。
    ///
    /// 削除に成功した場合のみ`Store`から取り除き、`true`を返す。
    pub async fn delete(&self, id: &str) -> bool {
        if !self.authenticated().await {
            return false;
        }

        match self.gateway.delete(R::COLLECTION, id).await {
            Ok(()) => {
                self.remove_local(id);
                true
            }
            Err(e) => {
                error!("Error deleting {} record {}: {:?}", R::COLLECTION, id, e);
                false
            }
        }
    }

    pub(crate) fn remove_local(&self, id: &str) {
        self.store.update(|records| records.retain(|record| record.id() != id));
    }

    pub(crate) async fn authenticated(&self) -> bool {
        let authenticated = self.gateway.is_authenticated().await;
        if !authenticated {
            debug!("Not authenticated, skipping {} operation", R::COLLECTION);
        }
        authenticated
    }
}

/// JSONのレコードを型に変換する。
pub(crate) fn decode<R: Record>(value: Value) -> Result<R> {
    serde_json::from_value(value)
        .with_context(|| format!("Failed to decode {} record", R::COLLECTION))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::anyhow;
    use mockall::predicate::eq;
    use serde_json::json;

    use super::{CollectionSync, SyncOptions};
    use crate::gateway::{ListOptions, ListResult, MockGateway};
    use crate::project::{NewProject, Project, ProjectPatch};
    use crate::tag::{NewTag, Tag};
    use crate::task::Task;
    use crate::testing::{project_json, task_json, InMemoryGateway};

    fn authenticated_mock() -> MockGateway {
        let mut gateway = MockGateway::new();
        gateway.expect_is_authenticated().returning(|| true);
        gateway
    }

    #[tokio::test]
    async fn test_fetch_all_replaces_store() {
        let mut gateway = authenticated_mock();
        gateway
            .expect_list()
            .withf(|collection, page, per_page, options| {
                collection == "tasks"
                    && *page == 1
                    && *per_page == 100
                    && *options
                        == ListOptions {
                            filter: Some("user = \"u1\"".to_string()),
                            sort: Some("-created".to_string()),
                            expand: None,
                        }
            })
            .times(1)
            .returning(|_, _, _, _| {
                Ok(ListResult::single_page(vec![
                    task_json("t1", "u1", false),
                    task_json("t2", "u1", true),
                ]))
            });
        let sync = CollectionSync::<Task>::new(Arc::new(gateway), SyncOptions::default());
        sync.store().set(vec![serde_json::from_value(task_json("old", "u1", false)).unwrap()]);

        sync.fetch_all("u1").await;

        let ids: Vec<String> = sync.records().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
        assert_eq!(sync.default_record().map(|t| t.id), Some("t2".to_string()));
    }

    /// 取得に失敗した場合は空になり、エラーは呼び出し元へ伝わらない。
    #[tokio::test]
    async fn test_fetch_all_failure_empties_store() {
        let mut gateway = authenticated_mock();
        gateway
            .expect_list()
            .returning(|_, _, _, _| Err(anyhow!("connection refused")));
        let sync = CollectionSync::<Task>::new(Arc::new(gateway), SyncOptions::default());
        sync.store().set(vec![serde_json::from_value(task_json("t1", "u1", false)).unwrap()]);

        sync.fetch_all("u1").await;

        assert!(sync.records().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_all_walks_pages() {
        let mut gateway = authenticated_mock();
        gateway
            .expect_list()
            .with(eq("tags"), eq(1), eq(1), mockall::predicate::always())
            .returning(|_, _, _, _| {
                Ok(ListResult {
                    page: 1,
                    per_page: 1,
                    total_items: 2,
                    total_pages: 2,
                    items: vec![json!({"id": "g1", "user": "u1", "tagName": "a"})],
                })
            });
        gateway
            .expect_list()
            .with(eq("tags"), eq(2), eq(1), mockall::predicate::always())
            .returning(|_, _, _, _| {
                Ok(ListResult {
                    page: 2,
                    per_page: 1,
                    total_items: 2,
                    total_pages: 2,
                    items: vec![json!({"id": "g2", "user": "u1", "tagName": "b"})],
                })
            });
        let sync = CollectionSync::<Tag>::new(Arc::new(gateway), SyncOptions { per_page: 1 });

        sync.fetch_all("u1").await;

        assert_eq!(sync.records().len(), 2);
    }

    /// プロジェクトはサーバー側で絞り込まず、所有者の配列も含めて手元で絞り込む。
    #[tokio::test]
    async fn test_fetch_projects_filters_locally() {
        let mut gateway = authenticated_mock();
        gateway
            .expect_list()
            .withf(|_, _, _, options| options.filter.is_none())
            .returning(|_, _, _, _| {
                Ok(ListResult::single_page(vec![
                    project_json("p1", json!("u1"), false),
                    project_json("p2", json!("u2"), false),
                    project_json("p3", json!(["u2", "u1"]), false),
                ]))
            });
        let sync = CollectionSync::<Project>::new(Arc::new(gateway), SyncOptions::default());

        sync.fetch_all("u1").await;

        let ids: Vec<String> = sync.records().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["p1", "p3"]);
    }

    #[tokio::test]
    async fn test_not_authenticated_is_silent() {
        let mut gateway = MockGateway::new();
        gateway.expect_is_authenticated().returning(|| false);
        gateway.expect_list().never();
        gateway.expect_create().never();
        gateway.expect_delete().never();
        let sync = CollectionSync::<Tag>::new(Arc::new(gateway), SyncOptions::default());

        sync.fetch_all("u1").await;
        let created = sync
            .create(NewTag {
                user: "u1".to_string(),
                tag_name: "x".to_string(),
                ..Default::default()
            })
            .await;
        let deleted = sync.delete("g1").await;

        assert!(created.is_none());
        assert!(!deleted);
    }

    #[tokio::test]
    async fn test_create_failure_returns_none() {
        let mut gateway = authenticated_mock();
        gateway
            .expect_create()
            .returning(|_, _| Err(anyhow!("validation failed")));
        let sync = CollectionSync::<Project>::new(Arc::new(gateway), SyncOptions::default());

        let created = sync
            .create(NewProject {
                user: "u1".to_string(),
                name: "Work".to_string(),
                ..Default::default()
            })
            .await;

        assert!(created.is_none());
        assert!(sync.records().is_empty());
    }

    /// プロジェクトは作成時にStoreへ追加するが、タグはリアルタイム通知に任せる。
    #[tokio::test]
    async fn test_create_placement_per_collection() {
        let gateway = Arc::new(InMemoryGateway::new());
        let projects = CollectionSync::<Project>::new(gateway.clone(), SyncOptions::default());
        let tags = CollectionSync::<Tag>::new(gateway.clone(), SyncOptions::default());

        let project = projects
            .create(NewProject {
                user: "u1".to_string(),
                name: "Work".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let tag = tags
            .create(NewTag {
                user: "u1".to_string(),
                tag_name: "billable".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(projects.records(), vec![project]);
        assert!(tags.records().is_empty());
        assert_eq!(gateway.records("tags").len(), 1);
        assert_eq!(gateway.records("tags")[0]["id"], tag.id.as_str());
    }

    /// 作成後に取得し直すと、送信した内容のレコードが含まれる。
    #[tokio::test]
    async fn test_create_then_fetch_round_trip() {
        let gateway = Arc::new(InMemoryGateway::new());
        let tags = CollectionSync::<Tag>::new(gateway.clone(), SyncOptions::default());

        let created = tags
            .create(NewTag {
                user: "u1".to_string(),
                tag_name: "billable".to_string(),
                description: "client work".to_string(),
                color: "green".to_string(),
                default_tag: false,
            })
            .await
            .unwrap();
        tags.fetch_all("u1").await;

        let fetched = tags.get(&created.id).unwrap();
        assert_eq!(fetched.tag_name, "billable");
        assert_eq!(fetched.description, "client work");
        assert_eq!(fetched.color, "green");
        assert_eq!(fetched.user, "u1");
    }

    #[tokio::test]
    async fn test_update_replaces_element() {
        let gateway = Arc::new(InMemoryGateway::new());
        let projects = CollectionSync::<Project>::new(gateway.clone(), SyncOptions::default());
        let created = projects
            .create(NewProject {
                user: "u1".to_string(),
                name: "Work".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let updated = projects
            .update(
                &created.id,
                ProjectPatch {
                    name: Some("Client work".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "Client work");
        assert_eq!(projects.records(), vec![updated]);
    }

    #[tokio::test]
    async fn test_update_failure_returns_none() {
        let mut gateway = authenticated_mock();
        gateway
            .expect_update()
            .returning(|_, _, _| Err(anyhow!("404 not found")));
        let sync = CollectionSync::<Project>::new(Arc::new(gateway), SyncOptions::default());

        let updated = sync.update("missing", ProjectPatch::default()).await;

        assert!(updated.is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_element() {
        let gateway = Arc::new(InMemoryGateway::new());
        let projects = CollectionSync::<Project>::new(gateway.clone(), SyncOptions::default());
        let created = projects
            .create(NewProject {
                user: "u1".to_string(),
                name: "Work".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(projects.delete(&created.id).await);
        assert!(projects.records().is_empty());
    }

    /// 既に無いIDの削除はStoreを変えず、ゲートウェイの結果に従って失敗を返す。
    #[tokio::test]
    async fn test_delete_missing_id_leaves_store_unchanged() {
        let gateway = Arc::new(InMemoryGateway::new());
        let projects = CollectionSync::<Project>::new(gateway.clone(), SyncOptions::default());
        let created = projects
            .create(NewProject {
                user: "u1".to_string(),
                name: "Work".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let before = projects.records();

        assert!(!projects.delete("missing").await);
        assert_eq!(projects.records(), before);
        assert_eq!(projects.records()[0].id, created.id);
    }
}
