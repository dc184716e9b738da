use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, info};

use crate::collection::{decode, CollectionSync};
use crate::datetime::{self, format_timestamp};
use crate::gateway::{filter, GetOptions};
use crate::project::Project;
use crate::record::Record;
use crate::time_entry::{minutes_between, NewTimeEntry, TimeEntry, TimeEntryPatch};

pub type EntrySync = CollectionSync<TimeEntry>;

impl CollectionSync<TimeEntry> {
    /// ユーザーのタイムエントリーを開始日時の範囲で取得し、`Store`を置き換える。
    ///
    /// # Arguments
    ///
    /// * `owner_id` - ユーザーID
    /// * `start_at` - この日時以降に開始したエントリーに絞り込む
    /// * `end_at` - この日時以前に開始したエントリーに絞り込む
    pub async fn fetch_range(
        &self,
        owner_id: &str,
        start_at: Option<DateTime<Utc>>,
        end_at: Option<DateTime<Utc>>,
    ) {
        let mut clauses = Vec::new();
        if let Some(start_at) = start_at {
            clauses.push(filter::gte("startTime", &format_timestamp(&start_at)));
        }
        if let Some(end_at) = end_at {
            clauses.push(filter::lte("startTime", &format_timestamp(&end_at)));
        }
        self.fetch_where(owner_id, clauses).await;
    }

    /// 計測中のタイムエントリーを作成し、作成したエントリーのIDを返す。
    ///
    /// プロジェクトを指定した場合は展開したプロジェクトを付与して`Store`の先頭に追加する。
    /// プロジェクトの取得に失敗してもエントリーの作成は成功として扱う。
    pub async fn start(
        &self,
        owner_id: &str,
        project_id: Option<&str>,
        task_id: &str,
    ) -> Option<String> {
        if !self.authenticated().await {
            return None;
        }
        info!(
            "Starting time entry: user: {}, project: {:?}, task: {}",
            owner_id, project_id, task_id
        );

        let mut new = NewTimeEntry::running(owner_id, datetime::now());
        new.project = project_id.map(str::to_string);
        new.task = task_id.to_string();

        let mut entry = match self.try_start(&new).await {
            Ok(entry) => entry,
            Err(e) => {
                error!("Error starting time entry: {:?}", e);
                return None;
            }
        };

        if let Some(project_id) = project_id {
            match self.read_project(project_id).await {
                Ok(project) => entry.expand.project = Some(project),
                Err(e) => error!("Failed to expand project data: {:?}", e),
            }
        }

        let id = entry.id.clone();
        self.store().update(|entries| entries.insert(0, entry));

        Some(id)
    }

    async fn try_start(&self, new: &NewTimeEntry) -> Result<TimeEntry> {
        let data = serde_json::to_value(new).context("Failed to serialize time entry")?;
        let created = self
            .gateway
            .create(TimeEntry::COLLECTION, data)
            .await
            .context("Failed to create time entry")?;
        debug!("Created entry: {}", created);

        decode(created)
    }

    async fn read_project(&self, project_id: &str) -> Result<Project> {
        let project = self
            .gateway
            .get_one(Project::COLLECTION, project_id, &GetOptions::default())
            .await
            .with_context(|| format!("Failed to read project {}", project_id))?;

        decode(project)
    }

    /// 計測中のタイムエントリーを停止する。
    ///
    /// 終了日時を現在時刻にし、開始日時との差から作業時間を計算して保存する。
    pub async fn stop(&self, id: &str) -> bool {
        if !self.authenticated().await {
            return false;
        }

        match self.try_stop(id).await {
            Ok((end_time, duration)) => {
                self.store().update(|entries| {
                    if let Some(entry) = entries.iter_mut().find(|entry| entry.id == id) {
                        entry.end_time = Some(end_time);
                        entry.duration = duration;
                    }
                });
                info!("Stopped time entry {} after {} minutes", id, duration);
                true
            }
            Err(e) => {
                error!("Error stopping time entry {}: {:?}", id, e);
                false
            }
        }
    }

    async fn try_stop(&self, id: &str) -> Result<(DateTime<Utc>, i64)> {
        let current = self
            .gateway
            .get_one(TimeEntry::COLLECTION, id, &GetOptions::default())
            .await
            .with_context(|| format!("Failed to read time entry {}", id))?;
        let current: TimeEntry = decode(current)?;

        let end_time = datetime::now();
        let duration = minutes_between(&current.start_time, &end_time);
        let patch = TimeEntryPatch {
            end_time: Some(end_time),
            duration: Some(duration),
            ..Default::default()
        };
        let data = serde_json::to_value(&patch).context("Failed to serialize patch")?;
        self.gateway
            .update(TimeEntry::COLLECTION, id, data)
            .await
            .with_context(|| format!("Failed to update time entry {}", id))?;

        Ok((end_time, duration))
    }

    /// 計測中のタイムエントリーを返す。
    pub fn running_entry(&self) -> Option<TimeEntry> {
        self.records().into_iter().find(TimeEntry::is_running)
    }
}
