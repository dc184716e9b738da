use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::datetime::optional_timestamp;
use crate::record::{null_as_default, Placement, Record};

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub user: String,
    pub tag_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub color: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub default_tag: bool,
    #[serde(default, with = "optional_timestamp")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, with = "optional_timestamp")]
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTag {
    pub user: String,
    pub tag_name: String,
    pub description: String,
    pub color: String,
    pub default_tag: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_tag: Option<bool>,
}

impl Record for Tag {
    type New = NewTag;
    type Patch = TagPatch;

    const COLLECTION: &'static str = "tags";
    const CREATE_PLACEMENT: Placement = Placement::Deferred;
    const DEFAULT_FIELD: Option<&'static str> = Some("defaultTag");

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> Option<&str> {
        Some(&self.user)
    }

    fn is_default(&self) -> bool {
        self.default_tag
    }

    fn clear_default(&mut self) {
        self.default_tag = false;
    }

    fn new_sets_default(new: &NewTag) -> bool {
        new.default_tag
    }

    fn patch_sets_default(patch: &TagPatch) -> bool {
        patch.default_tag == Some(true)
    }
}
