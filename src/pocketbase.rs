use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use reqwest::{
    header::{ACCEPT, AUTHORIZATION},
    Client, Method, RequestBuilder, Response,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    oneshot,
};

use crate::datetime;
use crate::gateway::{Gateway, GetOptions, ListOptions, ListResult, RealtimeMessage};
use crate::sse::SseParser;
use crate::user::User;

/// 認証APIのレスポンスをデシリアライズするための構造体。
#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
    record: User,
}

/// PB_CONNECTイベントのデータ。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectEvent {
    client_id: String,
}

#[derive(Default)]
struct RealtimeState {
    client_id: Option<String>,
    topics: HashMap<String, Vec<UnboundedSender<RealtimeMessage>>>,
}

/// PocketBaseと通信するためのクライアント。
///
/// # Examples
///
/// ```no_run
/// # async fn run() -> anyhow::Result<()> {
/// let client = pbtrack::pocketbase::PocketBaseClient::new("http://127.0.0.1:8090");
/// let user = client.auth_with_password("ada@example.com", "secret").await?;
/// # Ok(())
/// # }
/// ```
pub struct PocketBaseClient {
    client: Client,
    api_url: String,
    token: RwLock<Option<String>>,
    realtime: Arc<Mutex<RealtimeState>>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl PocketBaseClient {
    /// 新しい`PocketBaseClient`を返す。
    ///
    /// # Arguments
    ///
    /// * `api_url` - PocketBaseのURL。末尾の`/`は取り除く。
    pub fn new(api_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            token: RwLock::new(None),
            realtime: Arc::new(Mutex::new(RealtimeState::default())),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// 認証トークンを設定する。
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// メールアドレスとパスワードで認証し、ログインしたユーザーを返す。
    ///
    /// # Arguments
    ///
    /// * `email` - メールアドレスまたはユーザー名
    /// * `password` - パスワード
    pub async fn auth_with_password(&self, email: &str, password: &str) -> Result<User> {
        let response = self
            .request(Method::POST, "/api/collections/users/auth-with-password")
            .json(&json!({ "identity": email, "password": password }))
            .send()
            .await
            .with_context(|| format!("Failed to send request to PocketBase at {}", self.api_url))?
            .error_for_status()
            .context("Authentication returned an error status")?
            .json::<AuthResponse>()
            .await
            .context("Failed to deserialize response")?;
        info!("Authenticated as {}", response.record.id);
        self.set_token(Some(response.token));

        Ok(response.record)
    }

    /// 認証トークンを更新する。
    async fn refresh(&self) -> Result<()> {
        let response = self
            .request(Method::POST, "/api/collections/users/auth-refresh")
            .send()
            .await
            .with_context(|| format!("Failed to send request to PocketBase at {}", self.api_url))?
            .error_for_status()
            .context("Token refresh returned an error status")?
            .json::<AuthResponse>()
            .await
            .context("Failed to deserialize response")?;
        self.set_token(Some(response.token));

        Ok(())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.api_url, path));
        match self.token() {
            Some(token) => builder.header(AUTHORIZATION, token),
            None => builder,
        }
    }

    fn records_path(collection: &str) -> String {
        format!("/api/collections/{}/records", collection)
    }

    async fn send_json(&self, builder: RequestBuilder) -> Result<Value> {
        builder
            .send()
            .await
            .with_context(|| format!("Failed to send request to PocketBase at {}", self.api_url))?
            .error_for_status()
            .context("Request returned an error status")?
            .json::<Value>()
            .await
            .context("Failed to deserialize response")
    }

    fn realtime_state(&self) -> MutexGuard<'_, RealtimeState> {
        lock_state(&self.realtime)
    }

    /// リアルタイムの接続を確立し、クライアントIDを返す。
    async fn ensure_connected(&self) -> Result<String> {
        let _guard = self.connect_lock.lock().await;
        if let Some(client_id) = self.realtime_state().client_id.clone() {
            return Ok(client_id);
        }

        let response = self
            .request(Method::GET, "/api/realtime")
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .with_context(|| format!("Failed to connect to {}/api/realtime", self.api_url))?
            .error_for_status()
            .context("Realtime connection returned an error status")?;

        let (connected_tx, connected_rx) = oneshot::channel();
        tokio::spawn(read_events(
            response,
            Arc::clone(&self.realtime),
            connected_tx,
        ));

        connected_rx
            .await
            .context("Realtime connection closed before PB_CONNECT")
    }

    /// 現在の購読の一覧をサーバーに送信する。
    async fn post_subscriptions(&self, client_id: &str) -> Result<()> {
        let subscriptions: Vec<String> = self.realtime_state().topics.keys().cloned().collect();
        debug!("Realtime subscriptions: {:?}", subscriptions);
        self.request(Method::POST, "/api/realtime")
            .json(&json!({ "clientId": client_id, "subscriptions": subscriptions }))
            .send()
            .await
            .with_context(|| format!("Failed to send request to PocketBase at {}", self.api_url))?
            .error_for_status()
            .context("Realtime subscription returned an error status")?;

        Ok(())
    }
}

#[async_trait]
impl Gateway for PocketBaseClient {
    async fn is_authenticated(&self) -> bool {
        let Some(token) = self.token() else {
            return false;
        };
        if let Some(expires_at) = token_expiry(&token) {
            if expires_at > datetime::now() + Duration::seconds(10) {
                return true;
            }
        }

        match self.refresh().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Session is no longer valid: {:?}", e);
                false
            }
        }
    }

    async fn list(
        &self,
        collection: &str,
        page: u32,
        per_page: u32,
        options: &ListOptions,
    ) -> Result<ListResult> {
        let mut builder = self
            .request(Method::GET, &Self::records_path(collection))
            .query(&[("page", page.to_string()), ("perPage", per_page.to_string())]);
        for (key, value) in [
            ("filter", &options.filter),
            ("sort", &options.sort),
            ("expand", &options.expand),
        ] {
            if let Some(value) = value {
                builder = builder.query(&[(key, value)]);
            }
        }

        let value = self
            .send_json(builder)
            .await
            .with_context(|| format!("Failed to list {}", collection))?;
        let result: ListResult =
            serde_json::from_value(value).context("Failed to deserialize list result")?;
        info!("length of {}: {}", collection, result.items.len());

        Ok(result)
    }

    async fn get_one(&self, collection: &str, id: &str, options: &GetOptions) -> Result<Value> {
        let mut builder = self.request(
            Method::GET,
            &format!("{}/{}", Self::records_path(collection), id),
        );
        if let Some(expand) = &options.expand {
            builder = builder.query(&[("expand", expand)]);
        }

        self.send_json(builder).await
    }

    async fn create(&self, collection: &str, data: Value) -> Result<Value> {
        let builder = self
            .request(Method::POST, &Self::records_path(collection))
            .json(&data);

        self.send_json(builder).await
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<Value> {
        let builder = self
            .request(
                Method::PATCH,
                &format!("{}/{}", Self::records_path(collection), id),
            )
            .json(&patch);

        self.send_json(builder).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.request(
            Method::DELETE,
            &format!("{}/{}", Self::records_path(collection), id),
        )
        .send()
        .await
        .with_context(|| format!("Failed to send request to PocketBase at {}", self.api_url))?
        .error_for_status()
        .context("Request returned an error status")?;

        Ok(())
    }

    async fn subscribe(
        &self,
        collection: &str,
        filter: Option<String>,
    ) -> Result<UnboundedReceiver<RealtimeMessage>> {
        let key = subscription_key(collection, filter.as_deref());
        let (sender, receiver) = mpsc::unbounded_channel();
        let registered = sender.clone();
        // 接続直後に届くイベントを取りこぼさないよう、接続前に登録する
        self.realtime_state()
            .topics
            .entry(key.clone())
            .or_default()
            .push(sender);

        let result = match self.ensure_connected().await {
            Ok(client_id) => self.post_subscriptions(&client_id).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            // 同じキーの他の購読者は残す
            let mut state = self.realtime_state();
            if let Some(senders) = state.topics.get_mut(&key) {
                senders.retain(|sender| !sender.same_channel(&registered));
                if senders.is_empty() {
                    state.topics.remove(&key);
                }
            }
            drop(state);
            return Err(e).with_context(|| format!("Failed to subscribe to {}", key));
        }
        info!("Subscribed to {}", key);

        Ok(receiver)
    }

    async fn unsubscribe(&self, collection: &str, filter: Option<String>) -> Result<()> {
        let key = subscription_key(collection, filter.as_deref());
        let client_id = {
            let mut state = self.realtime_state();
            if let Some(senders) = state.topics.get_mut(&key) {
                senders.retain(|sender| !sender.is_closed());
                if senders.is_empty() {
                    state.topics.remove(&key);
                }
            }
            state.client_id.clone()
        };

        match client_id {
            Some(client_id) => self
                .post_subscriptions(&client_id)
                .await
                .with_context(|| format!("Failed to unsubscribe from {}", key)),
            // 接続が切れている場合はサーバー側の購読も残っていない
            None => Ok(()),
        }
    }
}

/// 購読のキーを返す。
///
/// フィルターを指定した場合は`options`クエリとしてURLエンコードして付与する。
pub fn subscription_key(collection: &str, filter: Option<&str>) -> String {
    let topic = format!("{}/*", collection);
    match filter {
        Some(filter) => {
            let options = json!({ "query": { "filter": filter } }).to_string();
            let encoded: String = url::form_urlencoded::byte_serialize(options.as_bytes()).collect();
            format!("{}?options={}", topic, encoded)
        }
        None => topic,
    }
}

/// JWTのペイロードから有効期限を取り出す。
fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;

    DateTime::from_timestamp(claims.get("exp")?.as_i64()?, 0)
}

fn lock_state(state: &Mutex<RealtimeState>) -> MutexGuard<'_, RealtimeState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// SSEのストリームを読み、イベントを購読者へ転送する。
///
/// ストリームが終了したら全ての購読者のチャンネルを閉じる。
async fn read_events(
    mut response: Response,
    state: Arc<Mutex<RealtimeState>>,
    connected: oneshot::Sender<String>,
) {
    let mut connected = Some(connected);
    let mut parser = SseParser::new();

    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                error!("Error reading realtime stream: {:?}", e);
                break;
            }
        };

        for event in parser.push(&chunk) {
            if event.event == "PB_CONNECT" {
                match serde_json::from_str::<ConnectEvent>(&event.data) {
                    Ok(connect) => {
                        info!("Realtime connected: {}", connect.client_id);
                        lock_state(&state).client_id = Some(connect.client_id.clone());
                        if let Some(connected) = connected.take() {
                            let _ = connected.send(connect.client_id);
                        }
                    }
                    Err(e) => error!("Invalid PB_CONNECT event: {:?}", e),
                }
                continue;
            }

            let message = match serde_json::from_str::<RealtimeMessage>(&event.data) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Ignoring realtime event {}: {:?}", event.event, e);
                    continue;
                }
            };
            if let Some(senders) = lock_state(&state).topics.get_mut(&event.event) {
                senders.retain(|sender| sender.send(message.clone()).is_ok());
            }
        }
    }

    warn!("Realtime stream closed");
    let mut state = lock_state(&state);
    state.client_id = None;
    state.topics.clear();
}
