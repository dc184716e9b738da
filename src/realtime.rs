use log::{debug, error, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::collection::{decode, CollectionSync};
use crate::gateway::{Action, RealtimeMessage};
use crate::record::{replace, upsert, Placement, PushCreate, Record};

/// 型に変換した変更通知。
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeEvent<R> {
    Created(R),
    Updated(R),
    Deleted(String),
}

impl<R: Record> ChangeEvent<R> {
    /// ゲートウェイの通知を変換する。
    ///
    /// 削除の通知はIDだけを使う。
    pub fn from_message(message: RealtimeMessage) -> anyhow::Result<Self> {
        let event = match message.action {
            Action::Create => ChangeEvent::Created(decode(message.record)?),
            Action::Update => ChangeEvent::Updated(decode(message.record)?),
            Action::Delete => {
                let id = message
                    .record
                    .get("id")
                    .and_then(|id| id.as_str())
                    .ok_or_else(|| anyhow::anyhow!("Deleted {} record has no id", R::COLLECTION))?;
                ChangeEvent::Deleted(id.to_string())
            }
        };

        Ok(event)
    }
}

/// リアルタイム購読のハンドル。
///
/// `cancel`を呼ぶか、dropすると購読を解除する。
/// 購読の開始前に解除した場合も、開始を待ってから解除する。
pub struct RealtimeHandle {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RealtimeHandle {
    /// 購読を解除する。
    ///
    /// 解除は非同期に行われる。返された`JoinHandle`を待つと解除の完了まで待てる。
    pub fn cancel(self) -> JoinHandle<()> {
        // 受信側が既に終了している場合は送信に失敗するが、解除済みなので問題ない
        let _ = self.cancel.send(());
        self.task
    }

    /// 購読処理が終了しているかどうかを返す。
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<R: Record> CollectionSync<R> {
    /// コレクションの変更通知を購読し、`Store`へ反映する。
    ///
    /// 通知は1つのタスクで受信した順に反映する。
    ///
    /// # Arguments
    ///
    /// * `scope` - 所有者のID。`None`の場合はコレクション全体を購読する。
    pub fn subscribe(&self, scope: Option<&str>) -> RealtimeHandle {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let sync = self.clone();
        let scope = scope.map(str::to_string);
        let task = tokio::spawn(async move { sync.run_subscription(scope, cancel_rx).await });

        RealtimeHandle {
            cancel: cancel_tx,
            task,
        }
    }

    async fn run_subscription(self, scope: Option<String>, mut cancel: oneshot::Receiver<()>) {
        let filter = scope.as_deref().and_then(R::owner_filter);
        let mut messages = match self.gateway.subscribe(R::COLLECTION, filter.clone()).await {
            Ok(messages) => messages,
            Err(e) => {
                error!("Error setting up {} subscription: {:?}", R::COLLECTION, e);
                return;
            }
        };
        info!("Subscribed to {}", R::COLLECTION);

        loop {
            tokio::select! {
                // 購読開始前に要求された解除もここで処理される
                biased;
                _ = &mut cancel => break,
                message = messages.recv() => match message {
                    Some(message) => self.apply_message(message, scope.as_deref()).await,
                    None => {
                        warn!("{} subscription closed by the gateway", R::COLLECTION);
                        return;
                    }
                },
            }
        }

        info!("Unsubscribing from {}", R::COLLECTION);
        // 受信側を閉じてから解除する
        drop(messages);
        if let Err(e) = self.gateway.unsubscribe(R::COLLECTION, filter).await {
            error!("Error unsubscribing from {}: {:?}", R::COLLECTION, e);
        }
    }

    async fn apply_message(&self, message: RealtimeMessage, scope: Option<&str>) {
        debug!("{} event: {:?}", R::COLLECTION, message.action);
        match ChangeEvent::<R>::from_message(message) {
            Ok(event) => self.apply(event, scope).await,
            Err(e) => warn!("Ignoring {} event: {:?}", R::COLLECTION, e),
        }
    }

    /// 変更通知を`Store`へ反映する。
    pub async fn apply(&self, event: ChangeEvent<R>, scope: Option<&str>) {
        match event {
            ChangeEvent::Created(record) => match (R::PUSH_CREATE, scope) {
                (PushCreate::Refetch, Some(owner_id)) => self.fetch_all(owner_id).await,
                _ => self
                    .store()
                    .update(|records| upsert(records, record, Placement::Append)),
            },
            ChangeEvent::Updated(record) => self.store().update(|records| replace(records, record)),
            ChangeEvent::Deleted(id) => self.remove_local(&id),
        }
    }
}
