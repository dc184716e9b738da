use std::future::Future;

use anyhow::{Context, Result};
use log::{error, info};

use crate::context::SyncContext;

/// 変更通知を購読し続けるためのコマンド。
pub struct WatchCommand<'a> {
    context: &'a SyncContext,
    owner_id: &'a str,
}

impl<'a> WatchCommand<'a> {
    /// 新しい`WatchCommand`を返す。
    pub fn new(context: &'a SyncContext, owner_id: &'a str) -> Self {
        Self { context, owner_id }
    }

    /// Ctrl-Cが押されるまで変更をログに出力する。
    pub async fn run(&self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {:?}", e);
            }
        })
        .await
    }

    /// 全てのコレクションを読み込んで購読し、`shutdown`が完了したら購読を解除する。
    pub async fn run_until<F: Future<Output = ()>>(&self, shutdown: F) -> Result<()> {
        self.context.load(self.owner_id).await;

        let _subscriptions = vec![
            self.context.entries.store().subscribe(|entries| {
                let running = entries.iter().filter(|entry| entry.is_running()).count();
                info!("entries: {} ({} running)", entries.len(), running);
            }),
            self.context
                .projects
                .store()
                .subscribe(|projects| info!("projects: {}", projects.len())),
            self.context
                .tasks
                .store()
                .subscribe(|tasks| info!("tasks: {}", tasks.len())),
            self.context
                .tags
                .store()
                .subscribe(|tags| info!("tags: {}", tags.len())),
        ];
        let handles = self.context.subscribe_all(self.owner_id);
        info!("Watching changes of {}", self.owner_id);

        shutdown.await;

        info!("Shutting down");
        for handle in handles {
            handle
                .cancel()
                .await
                .context("Realtime task panicked")?;
        }

        Ok(())
    }
}
