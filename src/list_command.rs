use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone, Utc};
use log::info;

use crate::context::SyncContext;
use crate::project::Project;
use crate::tag::Tag;
use crate::task::Task;
use crate::time_entry::TimeEntry;

/// `entries`サブコマンドの引数。
#[derive(Debug, clap::Args)]
pub struct EntriesArgs {
    #[clap(
        short = 'f',
        long = "from",
        help = "Lists entries started on or after this date (YYYY-MM-DD)",
        parse(try_from_str = parse_date),
    )]
    from: Option<NaiveDate>,

    #[clap(
        short = 't',
        long = "to",
        help = "Lists entries started on or before this date (YYYY-MM-DD)",
        parse(try_from_str = parse_date),
    )]
    to: Option<NaiveDate>,
}

/// ユーザーのレコードを一覧するためのコマンド。
pub struct ListCommand<'a> {
    context: &'a SyncContext,
    owner_id: &'a str,
}

impl<'a> ListCommand<'a> {
    /// 新しい`ListCommand`を返す。
    ///
    /// # Arguments
    ///
    /// * `context` - 同期処理
    /// * `owner_id` - ログイン中のユーザーID
    pub fn new(context: &'a SyncContext, owner_id: &'a str) -> Self {
        Self { context, owner_id }
    }

    /// `entries`サブコマンドの処理を行う。
    ///
    /// 日付はLocalタイムゾーンの1日として扱い、`to`はその日の終わりまでを含む。
    pub async fn entries(&self, args: EntriesArgs) -> Result<Vec<TimeEntry>> {
        let start_at = args.from.map(start_of_day).transpose()?;
        let end_at = match args.to {
            Some(to) => Some(start_of_day(to)? + Duration::days(1) - Duration::milliseconds(1)),
            None => None,
        };
        info!("Start at: {:?}, End at: {:?}", start_at, end_at);

        self.context
            .entries
            .fetch_range(self.owner_id, start_at, end_at)
            .await;

        Ok(self.context.entries.records())
    }

    pub async fn projects(&self) -> Vec<Project> {
        self.context.projects.fetch_all(self.owner_id).await;
        self.context.projects.records()
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.context.tasks.fetch_all(self.owner_id).await;
        self.context.tasks.records()
    }

    pub async fn tags(&self) -> Vec<Tag> {
        self.context.tags.fetch_all(self.owner_id).await;
        self.context.tags.records()
    }
}

/// 日付をパースする。
fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("Failed to parse date: {}", s))
}

/// Localタイムゾーンでの日付の00:00:00をUTCで返す。
fn start_of_day(date: NaiveDate) -> Result<DateTime<Utc>> {
    let naive_datetime = date
        .and_hms_opt(0, 0, 0)
        .context("Failed to set hour, minute, and second")?;
    let datetime = Local
        .from_local_datetime(&naive_datetime)
        .earliest()
        .context("Failed to convert to DateTime<Local>")?
        .to_utc();

    Ok(datetime)
}
