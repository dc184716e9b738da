use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::datetime::optional_timestamp;
use crate::record::{empty_as_none, null_as_default};

/// ユーザーのプロフィール。
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email_visibility: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub verified: bool,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, with = "optional_timestamp")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, with = "optional_timestamp")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub theme_preference: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub language_preference: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub timezone_preference: Option<String>,
    #[serde(
        default,
        rename = "notificationPreference",
        alias = "notificationPreferences",
        deserialize_with = "lenient_preferences",
        skip_serializing_if = "Option::is_none"
    )]
    pub notification_preferences: Option<HashMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor_validated: Option<bool>,
}

/// プロフィール完成度の対象となるフィールド。
pub const PROFILE_FIELDS: [&str; 7] = [
    "name",
    "username",
    "avatar",
    "themePreference",
    "languagePreference",
    "timezonePreference",
    "notificationPreference",
];

impl User {
    /// 完成度の対象フィールドのうち、値が設定されているフィールド名を返す。
    pub fn completed_fields(&self) -> Vec<&'static str> {
        let filled = |value: &Option<String>| value.as_deref().is_some_and(|s| !s.is_empty());
        PROFILE_FIELDS
            .iter()
            .copied()
            .filter(|field| match *field {
                "name" => filled(&self.name),
                "username" => filled(&self.username),
                "avatar" => filled(&self.avatar),
                "themePreference" => filled(&self.theme_preference),
                "languagePreference" => filled(&self.language_preference),
                "timezonePreference" => filled(&self.timezone_preference),
                // 空のオブジェクトも設定済みとして数える
                "notificationPreference" => self.notification_preferences.is_some(),
                _ => false,
            })
            .collect()
    }

    /// プロフィールの完成度を0から100の整数で返す。
    pub fn completion(&self) -> u8 {
        let ratio = self.completed_fields().len() as f64 / PROFILE_FIELDS.len() as f64;
        (ratio * 100.0).round() as u8
    }
}

/// プロフィールの部分更新データ。
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_visibility: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme_preference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_preference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone_preference: Option<String>,
    #[serde(rename = "notificationPreference", skip_serializing_if = "Option::is_none")]
    pub notification_preferences: Option<HashMap<String, bool>>,
}

/// 通知設定はオブジェクト、JSON文字列、空文字列のいずれかで届く。
fn lenient_preferences<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<HashMap<String, bool>>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    let preferences = match value {
        Some(Value::Object(map)) => Some(
            map.into_iter()
                .filter_map(|(key, value)| value.as_bool().map(|flag| (key, flag)))
                .collect(),
        ),
        Some(Value::String(s)) if !s.trim().is_empty() => serde_json::from_str(&s).ok(),
        _ => None,
    };

    Ok(preferences)
}
