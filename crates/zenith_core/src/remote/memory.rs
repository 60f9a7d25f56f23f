use super::{Query, RemoteStore, apply_query, record_has_id};
use crate::error::AppError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{Mutex, Semaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Select,
    Insert,
    Update,
    Delete,
}

/// In-process backend. Operations can be made to fail, or held at the
/// network boundary until [`MemoryStore::release`] lets them through.
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Value>>>,
    next_id: AtomicU64,
    failing: Mutex<HashSet<StoreOperation>>,
    gated: Mutex<HashSet<StoreOperation>>,
    gate: Semaphore,
    calls: Mutex<Vec<StoreOperation>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            failing: Mutex::new(HashSet::new()),
            gated: Mutex::new(HashSet::new()),
            gate: Semaphore::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts id assignment at `next_id`.
    pub fn with_next_id(next_id: u64) -> Self {
        Self {
            next_id: AtomicU64::new(next_id),
            ..Self::default()
        }
    }

    pub async fn seed(&self, collection: &str, records: Vec<Value>) {
        self.collections
            .lock()
            .await
            .insert(collection.to_string(), records);
    }

    pub async fn records(&self, collection: &str) -> Vec<Value> {
        self.collections
            .lock()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn set_failing(&self, operation: StoreOperation, failing: bool) {
        let mut set = self.failing.lock().await;
        if failing {
            set.insert(operation);
        } else {
            set.remove(&operation);
        }
    }

    /// Holds every subsequent `operation` until released.
    pub async fn hold(&self, operation: StoreOperation) {
        self.gated.lock().await.insert(operation);
    }

    /// Lets one held operation proceed.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub async fn calls(&self) -> Vec<StoreOperation> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self, operation: StoreOperation) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| **call == operation)
            .count()
    }

    async fn enter(&self, operation: StoreOperation) -> Result<(), AppError> {
        self.calls.lock().await.push(operation);

        let held = self.gated.lock().await.contains(&operation);
        if held {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|err| AppError::remote(err.to_string()))?;
            permit.forget();
        }

        if self.failing.lock().await.contains(&operation) {
            return Err(AppError::remote(format!(
                "{operation:?} rejected by backend"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Value>, AppError> {
        self.enter(StoreOperation::Select).await?;
        let collections = self.collections.lock().await;
        let records = collections.get(collection).map(Vec::as_slice).unwrap_or(&[]);
        Ok(apply_query(records, query))
    }

    async fn insert(&self, collection: &str, record: Value) -> Result<Value, AppError> {
        self.enter(StoreOperation::Insert).await?;
        let Value::Object(mut fields) = record else {
            return Err(AppError::invalid_data("record must be a JSON object"));
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        fields.insert("id".to_string(), Value::String(id.to_string()));
        if !fields.contains_key("created_at") {
            let created_at = OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .map_err(|err| AppError::invalid_data(err.to_string()))?;
            fields.insert("created_at".to_string(), Value::String(created_at));
        }

        let stored = Value::Object(fields);
        self.collections
            .lock()
            .await
            .entry(collection.to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<(), AppError> {
        self.enter(StoreOperation::Update).await?;
        let Value::Object(patch) = fields else {
            return Err(AppError::invalid_data("fields must be a JSON object"));
        };

        let mut collections = self.collections.lock().await;
        let record = collections
            .get_mut(collection)
            .and_then(|records| records.iter_mut().find(|record| record_has_id(record, id)))
            .ok_or_else(|| AppError::remote(format!("no {collection} row with id {id}")))?;

        if let Value::Object(existing) = record {
            existing.extend(patch);
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), AppError> {
        self.enter(StoreOperation::Delete).await?;
        let mut collections = self.collections.lock().await;
        let records = collections
            .get_mut(collection)
            .ok_or_else(|| AppError::remote(format!("no {collection} row with id {id}")))?;

        let before = records.len();
        records.retain(|record| !record_has_id(record, id));
        if records.len() == before {
            return Err(AppError::remote(format!("no {collection} row with id {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryStore, StoreOperation};
    use crate::remote::{Query, RemoteStore, TASKS};
    use serde_json::json;

    #[tokio::test]
    async fn insert_assigns_id_and_created_at() {
        let store = MemoryStore::with_next_id(42);

        let stored = store
            .insert(TASKS, json!({"title": "Buy milk"}))
            .await
            .unwrap();

        assert_eq!(stored["id"], "42");
        assert!(stored["created_at"].is_string());
        assert_eq!(store.records(TASKS).await.len(), 1);
    }

    #[tokio::test]
    async fn update_and_delete_require_a_matching_row() {
        let store = MemoryStore::new();
        store.seed(TASKS, vec![json!({"id": "1", "title": "a"})]).await;

        store
            .update(TASKS, "1", json!({"title": "b"}))
            .await
            .unwrap();
        assert_eq!(store.records(TASKS).await[0]["title"], "b");

        let err = store.update(TASKS, "9", json!({})).await.unwrap_err();
        assert_eq!(err.code(), "remote_error");
        let err = store.delete(TASKS, "9").await.unwrap_err();
        assert_eq!(err.code(), "remote_error");

        store.delete(TASKS, "1").await.unwrap();
        assert!(store.records(TASKS).await.is_empty());
    }

    #[tokio::test]
    async fn failing_operations_leave_data_untouched() {
        let store = MemoryStore::new();
        store.seed(TASKS, vec![json!({"id": "1", "title": "a"})]).await;
        store.set_failing(StoreOperation::Delete, true).await;

        assert!(store.delete(TASKS, "1").await.is_err());
        assert_eq!(store.records(TASKS).await.len(), 1);
        assert_eq!(store.call_count(StoreOperation::Delete).await, 1);

        store.set_failing(StoreOperation::Delete, false).await;
        store.delete(TASKS, "1").await.unwrap();
    }

    #[tokio::test]
    async fn held_operations_wait_for_release() {
        let store = MemoryStore::new();
        store.hold(StoreOperation::Select).await;
        let query = Query::new();

        let (selected, ()) = tokio::join!(store.select(TASKS, &query), async {
            tokio::task::yield_now().await;
            assert_eq!(store.call_count(StoreOperation::Select).await, 1);
            store.release();
        });

        assert!(selected.unwrap().is_empty());
    }
}
