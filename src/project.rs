use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::datetime::optional_timestamp;
use crate::record::{empty_as_none, null_as_default, Placement, Record};

/// プロジェクトの所有者。
///
/// 通常は1人だが、複数のユーザーIDを持つレコードも扱えるようにしている。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Owner {
    One(String),
    Many(Vec<String>),
}

impl Owner {
    pub fn contains(&self, user_id: &str) -> bool {
        match self {
            Owner::One(id) => id == user_id,
            Owner::Many(ids) => ids.iter().any(|id| id == user_id),
        }
    }

    pub fn first(&self) -> Option<&str> {
        match self {
            Owner::One(id) => Some(id.as_str()),
            Owner::Many(ids) => ids.first().map(String::as_str),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub user: Owner,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub default_project: bool,
    #[serde(default, with = "optional_timestamp")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, with = "optional_timestamp")]
    pub updated: Option<DateTime<Utc>>,
}

/// プロジェクトの作成データ。
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub user: String,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub default_project: bool,
}

/// プロジェクトの部分更新データ。
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_project: Option<bool>,
}

impl Record for Project {
    type New = NewProject;
    type Patch = ProjectPatch;

    const COLLECTION: &'static str = "projects";
    const CREATE_PLACEMENT: Placement = Placement::Append;
    const DEFAULT_FIELD: Option<&'static str> = Some("defaultProject");

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> Option<&str> {
        self.user.first()
    }

    fn owned_by(&self, owner_id: &str) -> bool {
        self.user.contains(owner_id)
    }

    // `user`が配列のレコードもあるため、サーバー側では絞り込まない
    fn owner_filter(_owner_id: &str) -> Option<String> {
        None
    }

    fn is_default(&self) -> bool {
        self.default_project
    }

    fn clear_default(&mut self) {
        self.default_project = false;
    }

    fn new_sets_default(new: &NewProject) -> bool {
        new.default_project
    }

    fn patch_sets_default(patch: &ProjectPatch) -> bool {
        patch.default_project == Some(true)
    }
}
