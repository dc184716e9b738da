use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::datetime::optional_timestamp;
use crate::record::{null_as_default, Placement, Record};

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub user: String,
    pub task_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub color: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub default_task: bool,
    #[serde(default, with = "optional_timestamp")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, with = "optional_timestamp")]
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub user: String,
    pub task_name: String,
    pub description: String,
    pub color: String,
    pub default_task: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_task: Option<bool>,
}

impl Record for Task {
    type New = NewTask;
    type Patch = TaskPatch;

    const COLLECTION: &'static str = "tasks";
    // 作成した複数のクライアントで重複しないように、追加はリアルタイム通知に任せる
    const CREATE_PLACEMENT: Placement = Placement::Deferred;
    const DEFAULT_FIELD: Option<&'static str> = Some("defaultTask");

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> Option<&str> {
        Some(&self.user)
    }

    fn is_default(&self) -> bool {
        self.default_task
    }

    fn clear_default(&mut self) {
        self.default_task = false;
    }

    fn new_sets_default(new: &NewTask) -> bool {
        new.default_task
    }

    fn patch_sets_default(patch: &TaskPatch) -> bool {
        patch.default_task == Some(true)
    }
}
