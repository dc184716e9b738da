use anyhow::{bail, Context, Result};
use log::info;

use crate::context::SyncContext;
use crate::time_entry::TimeEntry;

/// `start`サブコマンドの引数。
#[derive(Debug, clap::Args)]
pub struct StartArgs {
    #[clap(short = 'p', long = "project", help = "Project ID of the new entry")]
    project: Option<String>,

    #[clap(short = 't', long = "task", help = "Task ID of the new entry", default_value = "")]
    task: String,
}

/// `stop`サブコマンドの引数。
#[derive(Debug, clap::Args)]
pub struct StopArgs {
    #[clap(help = "Entry ID to stop. Stops the running entry when omitted")]
    id: Option<String>,
}

/// タイムエントリーの計測を開始、停止するためのコマンド。
pub struct TimerCommand<'a> {
    context: &'a SyncContext,
    owner_id: &'a str,
}

impl<'a> TimerCommand<'a> {
    /// 新しい`TimerCommand`を返す。
    pub fn new(context: &'a SyncContext, owner_id: &'a str) -> Self {
        Self { context, owner_id }
    }

    /// 計測を開始し、作成したエントリーを返す。
    pub async fn start(&self, args: StartArgs) -> Result<TimeEntry> {
        let id = self
            .context
            .entries
            .start(self.owner_id, args.project.as_deref(), &args.task)
            .await
            .context("Failed to start time entry")?;

        self.context
            .entries
            .get(&id)
            .with_context(|| format!("Started entry {} is missing", id))
    }

    /// 計測を停止し、停止したエントリーを返す。
    ///
    /// IDを省略した場合は計測中のエントリーを停止する。
    pub async fn stop(&self, args: StopArgs) -> Result<TimeEntry> {
        self.context.entries.fetch_all(self.owner_id).await;
        let id = match args.id {
            Some(id) => id,
            None => {
                self.context
                    .entries
                    .running_entry()
                    .context("No running time entry")?
                    .id
            }
        };
        info!("Stopping time entry {}", id);

        if !self.context.entries.stop(&id).await {
            bail!("Failed to stop time entry {}", id);
        }

        self.context
            .entries
            .get(&id)
            .with_context(|| format!("Time entry {} does not belong to the user", id))
    }
}
