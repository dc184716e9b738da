//! テスト用のインメモリゲートウェイとヘルパー。

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::datetime::{format_timestamp, parse_timestamp};
use crate::gateway::{Action, Gateway, GetOptions, ListOptions, ListResult, RealtimeMessage};

struct Subscriber {
    filter: Option<String>,
    sender: UnboundedSender<RealtimeMessage>,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, Vec<Value>>,
    subscribers: HashMap<String, Vec<Subscriber>>,
    list_calls: HashMap<String, usize>,
    sequence: u64,
    failing: bool,
    unauthenticated: bool,
}

/// メモリ上にレコードを保持するゲートウェイ。
///
/// IDと日時の採番、簡単なフィルター、ソート、`project`の展開、リアルタイム通知を行う。
#[derive(Default)]
pub struct InMemoryGateway {
    state: Mutex<State>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// 通知を送らずにレコードを追加し、採番後のレコードを返す。
    pub fn insert(&self, collection: &str, data: Value) -> Value {
        let mut state = self.lock();
        let record = state.stamp(data);
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(record.clone());
        record
    }

    pub fn records(&self, collection: &str) -> Vec<Value> {
        self.lock()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn record(&self, collection: &str, id: &str) -> Option<Value> {
        self.records(collection)
            .into_iter()
            .find(|record| record["id"] == id)
    }

    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.lock()
            .subscribers
            .get(collection)
            .map_or(0, |subscribers| subscribers.len())
    }

    pub fn list_calls(&self, collection: &str) -> usize {
        self.lock()
            .list_calls
            .get(collection)
            .copied()
            .unwrap_or_default()
    }

    /// `true`にすると認証確認以外の全ての要求が失敗する。
    pub fn fail_requests(&self, failing: bool) {
        self.lock().failing = failing;
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.lock().unauthenticated = !authenticated;
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn checked(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.lock();
        if state.failing {
            bail!("simulated network error");
        }
        Ok(state)
    }
}

impl State {
    fn stamp(&mut self, data: Value) -> Value {
        self.sequence += 1;
        let timestamp = format_timestamp(
            &(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::seconds(self.sequence as i64)),
        );
        let mut record = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        record.insert("id".to_string(), json!(format!("rec{:012}", self.sequence)));
        record.insert("created".to_string(), json!(timestamp));
        record.insert("updated".to_string(), json!(timestamp));
        Value::Object(record)
    }

    fn expand(&self, mut record: Value, expand: Option<&str>) -> Value {
        if expand != Some("project") {
            return record;
        }
        let project = record["project"].as_str().and_then(|id| {
            self.collections
                .get("projects")
                .and_then(|projects| projects.iter().find(|p| p["id"] == id))
                .cloned()
        });
        if let (Some(project), Some(map)) = (project, record.as_object_mut()) {
            map.insert("expand".to_string(), json!({ "project": project }));
        }
        record
    }

    fn notify(&mut self, collection: &str, action: Action, record: &Value) {
        if let Some(subscribers) = self.subscribers.get_mut(collection) {
            subscribers.retain(|subscriber| {
                let matched = subscriber
                    .filter
                    .as_deref()
                    .map_or(true, |filter| matches(record, filter));
                !matched
                    || subscriber
                        .sender
                        .send(RealtimeMessage {
                            action,
                            record: record.clone(),
                        })
                        .is_ok()
            });
        }
    }
}

#[async_trait]
impl Gateway for InMemoryGateway {
    async fn is_authenticated(&self) -> bool {
        !self.lock().unauthenticated
    }

    async fn list(
        &self,
        collection: &str,
        page: u32,
        per_page: u32,
        options: &ListOptions,
    ) -> Result<ListResult> {
        let mut state = self.checked()?;
        *state.list_calls.entry(collection.to_string()).or_default() += 1;

        let mut items: Vec<Value> = state
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|record| {
                options
                    .filter
                    .as_deref()
                    .map_or(true, |filter| matches(record, filter))
            })
            .collect();
        if let Some(sort) = options.sort.as_deref() {
            let (field, descending) = match sort.strip_prefix('-') {
                Some(field) => (field, true),
                None => (sort, false),
            };
            items.sort_by(|a, b| {
                let ordering = compare(&a[field], &b[field]);
                if descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        let per_page = per_page.max(1);
        let total_items = items.len();
        let total_pages = ((total_items as u32) + per_page - 1) / per_page;
        let items = items
            .into_iter()
            .skip(((page.max(1) - 1) * per_page) as usize)
            .take(per_page as usize)
            .map(|record| state.expand(record, options.expand.as_deref()))
            .collect();

        Ok(ListResult {
            page,
            per_page,
            total_items: total_items as u64,
            total_pages,
            items,
        })
    }

    async fn get_one(&self, collection: &str, id: &str, options: &GetOptions) -> Result<Value> {
        let state = self.checked()?;
        let record = state
            .collections
            .get(collection)
            .and_then(|records| records.iter().find(|record| record["id"] == id))
            .cloned()
            .ok_or_else(|| anyhow!("404: {} record {} not found", collection, id))?;

        Ok(state.expand(record, options.expand.as_deref()))
    }

    async fn create(&self, collection: &str, data: Value) -> Result<Value> {
        let mut state = self.checked()?;
        let record = state.stamp(data);
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(record.clone());
        state.notify(collection, Action::Create, &record);

        Ok(record)
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<Value> {
        let mut state = self.checked()?;
        state.sequence += 1;
        let updated_at = format_timestamp(
            &(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::seconds(state.sequence as i64)),
        );
        let record = state
            .collections
            .get_mut(collection)
            .and_then(|records| records.iter_mut().find(|record| record["id"] == id))
            .ok_or_else(|| anyhow!("404: {} record {} not found", collection, id))?;
        if let (Some(target), Value::Object(patch)) = (record.as_object_mut(), patch) {
            target.extend(patch);
            target.insert("updated".to_string(), json!(updated_at));
        }
        let record = record.clone();
        state.notify(collection, Action::Update, &record);

        Ok(record)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut state = self.checked()?;
        let records = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| anyhow!("404: {} record {} not found", collection, id))?;
        let position = records
            .iter()
            .position(|record| record["id"] == id)
            .ok_or_else(|| anyhow!("404: {} record {} not found", collection, id))?;
        let record = records.remove(position);
        state.notify(collection, Action::Delete, &record);

        Ok(())
    }

    async fn subscribe(
        &self,
        collection: &str,
        filter: Option<String>,
    ) -> Result<UnboundedReceiver<RealtimeMessage>> {
        let mut state = self.checked()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        state
            .subscribers
            .entry(collection.to_string())
            .or_default()
            .push(Subscriber { filter, sender });

        Ok(receiver)
    }

    async fn unsubscribe(&self, collection: &str, filter: Option<String>) -> Result<()> {
        let mut state = self.checked()?;
        if let Some(subscribers) = state.subscribers.get_mut(collection) {
            subscribers.retain(|s| s.filter != filter || !s.sender.is_closed());
        }

        Ok(())
    }
}

/// `field op "literal" && ...`形式のフィルターを評価する。
fn matches(record: &Value, filter: &str) -> bool {
    filter.split(" && ").all(|clause| {
        for op in [" >= ", " <= ", " != ", " = "] {
            if let Some((field, literal)) = clause.split_once(op) {
                let literal = unquote(literal.trim());
                let ordering = compare(&record[field.trim()], &Value::String(literal));
                return match op.trim() {
                    ">=" => ordering != Ordering::Less,
                    "<=" => ordering != Ordering::Greater,
                    "!=" => ordering != Ordering::Equal,
                    _ => ordering == Ordering::Equal,
                };
            }
        }
        false
    })
}

fn unquote(literal: &str) -> String {
    literal
        .trim_matches('"')
        .replace("\\\"", "\"")
        .replace("\\\\", "\\")
}

/// 日時として読める値は日時として、それ以外は文字列として比較する。
fn compare(a: &Value, b: &Value) -> Ordering {
    let text = |value: &Value| match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    let (a, b) = (text(a), text(b));
    match (parse_timestamp(&a), parse_timestamp(&b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(&b),
    }
}

/// 条件を満たすまで他のタスクに実行を譲る。
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not met in time");
}

pub fn task_json(id: &str, user: &str, default_task: bool) -> Value {
    json!({
        "id": id,
        "user": user,
        "taskName": format!("task {}", id),
        "description": "",
        "color": "",
        "defaultTask": default_task,
    })
}

pub fn project_json(id: &str, user: Value, default_project: bool) -> Value {
    json!({
        "id": id,
        "user": user,
        "name": format!("project {}", id),
        "description": "",
        "defaultProject": default_project,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::matches;

    #[test]
    fn test_matches_filter() {
        let record = json!({"user": "u1", "startTime": "2024-04-07 10:00:00.000Z"});

        assert!(matches(&record, "user = \"u1\""));
        assert!(!matches(&record, "user = \"u2\""));
        assert!(matches(
            &record,
            "user = \"u1\" && startTime >= \"2024-04-07T09:00:00.000Z\""
        ));
        assert!(!matches(&record, "startTime <= \"2024-04-07T09:00:00.000Z\""));
    }
}
