use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::datetime::{optional_timestamp, timestamp};
use crate::project::Project;
use crate::record::{empty_as_none, null_as_default, Placement, PushCreate, Record};

/// リレーションを展開した時に付与されるデータ。
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Expand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Project>,
}

impl Expand {
    pub fn is_empty(&self) -> bool {
        self.project.is_none()
    }
}

/// タイムエントリー。
///
/// `end_time`が`None`の場合は計測中で、`duration`は停止するまで確定しない。
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub id: String,
    pub user: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub project: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub task: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(with = "timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(default, with = "optional_timestamp")]
    pub end_time: Option<DateTime<Utc>>,
    /// 分単位の作業時間
    #[serde(default, deserialize_with = "null_as_default")]
    pub duration: i64,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, with = "optional_timestamp")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, with = "optional_timestamp")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Expand::is_empty")]
    pub expand: Expand,
}

impl TimeEntry {
    pub fn is_running(&self) -> bool {
        self.end_time.is_none()
    }

    /// 展開されたプロジェクト名を返す。
    pub fn project_name(&self) -> Option<&str> {
        self.expand.project.as_ref().map(|project| project.name.as_str())
    }
}

/// タイムエントリーの作成データ。
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTimeEntry {
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub task: String,
    pub tags: Vec<String>,
    #[serde(with = "timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "optional_timestamp")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl NewTimeEntry {
    /// 計測中のタイムエントリーの作成データを返す。
    pub fn running(user: &str, start_time: DateTime<Utc>) -> Self {
        Self {
            user: user.to_string(),
            project: None,
            task: String::new(),
            tags: Vec::new(),
            start_time,
            end_time: None,
            duration: Some(0),
            label: None,
            notes: None,
        }
    }
}

/// タイムエントリーの部分更新データ。
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntryPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", with = "optional_timestamp")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", with = "optional_timestamp")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Record for TimeEntry {
    type New = NewTimeEntry;
    type Patch = TimeEntryPatch;

    const COLLECTION: &'static str = "entries";
    const SORT: &'static str = "-startTime";
    const EXPAND: Option<&'static str> = Some("project");
    const CREATE_PLACEMENT: Placement = Placement::Prepend;
    // 展開されたプロジェクトを含めるため、作成の通知では取得し直す
    const PUSH_CREATE: PushCreate = PushCreate::Refetch;
    const REREAD_ON_UPDATE: bool = true;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> Option<&str> {
        Some(&self.user)
    }

    fn prepare_new(new: &mut NewTimeEntry) {
        if new.duration.is_none() {
            if let Some(end_time) = new.end_time {
                new.duration = Some(minutes_between(&new.start_time, &end_time));
            }
        }
    }
}

/// 2つの日時の差を分単位で返す。
///
/// 0.5分ちょうどは切り上げる。
pub fn minutes_between(start: &DateTime<Utc>, end: &DateTime<Utc>) -> i64 {
    let millis = (*end - *start).num_milliseconds() as f64;
    (millis / 60_000.0 + 0.5).floor() as i64
}

/// 分単位の時間を`HH:MM`形式にする。
pub fn format_minutes(minutes: i64) -> String {
    let minutes = minutes.max(0);
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// 1日分のタイムエントリー。
#[derive(Clone, Debug, PartialEq)]
pub struct DayGroup {
    pub date: NaiveDate,
    pub entries: Vec<TimeEntry>,
}

impl DayGroup {
    /// 終了しているエントリーの合計時間を分単位で返す。
    pub fn total_minutes(&self) -> i64 {
        self.entries
            .iter()
            .filter(|entry| !entry.is_running())
            .map(|entry| entry.duration)
            .sum()
    }
}

/// Localタイムゾーンの開始日ごとにタイムエントリーをまとめる。
///
/// 日付は新しい順に並べ、各日のエントリーは入力の順序を保つ。
pub fn group_by_day(entries: &[TimeEntry]) -> Vec<DayGroup> {
    let mut groups: Vec<DayGroup> = Vec::new();
    for entry in entries {
        let date = entry.start_time.with_timezone(&Local).date_naive();
        match groups.iter_mut().find(|group| group.date == date) {
            Some(group) => group.entries.push(entry.clone()),
            None => groups.push(DayGroup {
                date,
                entries: vec![entry.clone()],
            }),
        }
    }
    groups.sort_by(|a, b| b.date.cmp(&a.date));
    groups
}
