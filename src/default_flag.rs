use log::{error, info};
use serde_json::{Map, Value};

use crate::collection::CollectionSync;
use crate::record::Record;

impl<R: Record> CollectionSync<R> {
    /// デフォルトのレコードが1つだけになるように、他のレコードのデフォルトを解除する。
    ///
    /// 新しいデフォルトのフラグは呼び出し側で設定済みであること。
    /// 解除は1件ずつ順番に行い、失敗してもロールバックせずに続行する。
    /// 最後に`Store`上のフラグを`new_default_id`以外すべて解除する。
    ///
    /// # Arguments
    ///
    /// * `owner_id` - 対象とする所有者。`None`の場合は保持している全レコードを対象にする。
    /// * `new_default_id` - 新しくデフォルトになったレコードのID
    pub async fn enforce_single_default(&self, owner_id: Option<&str>, new_default_id: &str) {
        let Some(field) = R::DEFAULT_FIELD else {
            return;
        };
        let is_competitor = |record: &R| {
            record.is_default()
                && record.id() != new_default_id
                && owner_id.map_or(true, |owner| record.owned_by(owner))
        };

        let competitors: Vec<String> = self
            .records()
            .into_iter()
            .filter(|record| is_competitor(record))
            .map(|record| record.id().to_string())
            .collect();

        for id in &competitors {
            let mut patch = Map::new();
            patch.insert(field.to_string(), Value::Bool(false));
            match self.gateway.update(R::COLLECTION, id, Value::Object(patch)).await {
                Ok(_) => info!("Cleared {} on {} record {}", field, R::COLLECTION, id),
                Err(e) => error!(
                    "Error clearing {} on {} record {}: {:?}",
                    field,
                    R::COLLECTION,
                    id,
                    e
                ),
            }
        }

        self.store().update(|records| {
            for record in records.iter_mut() {
                if is_competitor(record) {
                    record.clear_default();
                }
            }
        });
    }
}
