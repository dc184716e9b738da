use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info};
use serde_json::Value;

use crate::gateway::{Gateway, GetOptions};
use crate::store::Store;
use crate::user::{User, UserPatch};

const COLLECTION: &str = "users";

/// ログイン中のユーザーのプロフィールを同期する。
#[derive(Clone)]
pub struct ProfileSync {
    gateway: Arc<dyn Gateway>,
    store: Store<Option<User>>,
}

impl ProfileSync {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            store: Store::new(None),
        }
    }

    pub fn store(&self) -> &Store<Option<User>> {
        &self.store
    }

    pub fn user(&self) -> Option<User> {
        self.store.get()
    }

    /// ログイン時に取得したユーザーで初期化する。
    pub fn init(&self, user: Option<User>) {
        self.store.set(user);
    }

    /// プロフィールを取得し直す。
    pub async fn fetch(&self, id: &str) -> Option<User> {
        if !self.gateway.is_authenticated().await {
            return None;
        }

        match self.try_fetch(id).await {
            Ok(user) => {
                self.store.set(Some(user.clone()));
                Some(user)
            }
            Err(e) => {
                error!("Error fetching user {}: {:?}", id, e);
                None
            }
        }
    }

    async fn try_fetch(&self, id: &str) -> Result<User> {
        let value = self
            .gateway
            .get_one(COLLECTION, id, &GetOptions::default())
            .await
            .with_context(|| format!("Failed to read user {}", id))?;

        serde_json::from_value(value).context("Failed to decode user")
    }

    /// プロフィールを更新し、保持しているプロフィールにマージした結果を返す。
    ///
    /// レスポンスに含まれないフィールドは保持している値を残す。
    pub async fn update_profile(&self, id: &str, patch: UserPatch) -> Option<User> {
        if !self.gateway.is_authenticated().await {
            return None;
        }

        let updated = match self.try_update(id, &patch).await {
            Ok(updated) => updated,
            Err(e) => {
                error!("Failed to update user {}: {:?}", id, e);
                return None;
            }
        };

        let merged = match merge(self.store.get().as_ref(), updated) {
            Ok(merged) => merged,
            Err(e) => {
                error!("Failed to merge user {}: {:?}", id, e);
                return None;
            }
        };
        info!("Updated profile of {}", id);
        self.store.set(Some(merged.clone()));

        Some(merged)
    }

    async fn try_update(&self, id: &str, patch: &UserPatch) -> Result<Value> {
        let data = serde_json::to_value(patch).context("Failed to serialize patch")?;
        self.gateway
            .update(COLLECTION, id, data)
            .await
            .with_context(|| format!("Failed to update user {}", id))
    }

    /// プロフィールの完成度(0〜100)を返す。未ログインの場合は0。
    pub fn completion(&self) -> u8 {
        self.store.get().map_or(0, |user| user.completion())
    }
}

/// 保持しているユーザーにレスポンスのフィールドを上書きする。
fn merge(current: Option<&User>, updated: Value) -> Result<User> {
    let mut merged = match current {
        Some(current) => serde_json::to_value(current).context("Failed to serialize user")?,
        None => Value::Object(Default::default()),
    };
    if let (Some(target), Value::Object(mut fields)) = (merged.as_object_mut(), updated) {
        // 同じフィールドが複数の名前で残るとデシリアライズに失敗する
        if let Some(preferences) = fields.remove("notificationPreferences") {
            fields
                .entry("notificationPreference")
                .or_insert(preferences);
        }
        target.extend(fields);
    }

    serde_json::from_value(merged).context("Failed to decode merged user")
}
