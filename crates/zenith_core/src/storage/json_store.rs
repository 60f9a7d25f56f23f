use crate::error::AppError;
use crate::remote::{Query, RemoteStore, apply_query, record_has_id};
use crate::storage::{path_from_env, write_private};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Mutex;
use tracing::debug;

pub const SCHEMA_VERSION: u32 = 1;
const STORE_FILE_NAME: &str = "tasks.json";
const STORE_ENV_VAR: &str = "ZENITH_STORE_PATH";

#[derive(Debug, Serialize, Deserialize)]
struct StoredCollections {
    schema_version: u32,
    next_id: u64,
    #[serde(default)]
    collections: BTreeMap<String, Vec<Value>>,
}

impl Default for StoredCollections {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            next_id: 1,
            collections: BTreeMap::new(),
        }
    }
}

pub fn store_path() -> Result<PathBuf, AppError> {
    path_from_env(STORE_ENV_VAR, STORE_FILE_NAME)
}

/// Local stand-in for the hosted backend: every call reads, edits and
/// rewrites one JSON document. Ids and creation times are assigned here the
/// way the hosted database assigns them.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<StoredCollections, AppError> {
        let path = self.path.clone();
        blocking(move || load(&path)).await
    }

    async fn write(&self, stored: StoredCollections) -> Result<(), AppError> {
        let path = self.path.clone();
        blocking(move || save(&path, &stored)).await
    }
}

/// Runs file I/O on the blocking pool so the runtime's workers stay free.
async fn blocking<T, F>(task: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| AppError::io(format!("store task failed: {err}")))?
}

fn load(path: &Path) -> Result<StoredCollections, AppError> {
    if !path.exists() {
        return Ok(StoredCollections::default());
    }

    let content = std::fs::read_to_string(path).map_err(|err| AppError::io(err.to_string()))?;
    let stored: StoredCollections =
        serde_json::from_str(&content).map_err(|err| AppError::invalid_data(err.to_string()))?;

    if stored.schema_version != SCHEMA_VERSION {
        return Err(AppError::invalid_data("schema_version mismatch"));
    }

    Ok(stored)
}

fn save(path: &Path, stored: &StoredCollections) -> Result<(), AppError> {
    let content = serde_json::to_string_pretty(stored)
        .map_err(|err| AppError::invalid_data(err.to_string()))?;
    write_private(path, &content)
}

fn missing_row(collection: &str, id: &str) -> AppError {
    AppError::remote(format!("no {collection} row with id {id}"))
}

#[async_trait]
impl RemoteStore for JsonFileStore {
    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Value>, AppError> {
        let _guard = self.lock.lock().await;
        let stored = self.read().await?;
        let records = stored
            .collections
            .get(collection)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        Ok(apply_query(records, query))
    }

    async fn insert(&self, collection: &str, record: Value) -> Result<Value, AppError> {
        let Value::Object(mut fields) = record else {
            return Err(AppError::invalid_data("record must be a JSON object"));
        };

        let _guard = self.lock.lock().await;
        let mut stored = self.read().await?;

        let id = stored.next_id;
        stored.next_id += 1;
        fields.insert("id".to_string(), Value::String(id.to_string()));
        if !fields.contains_key("created_at") {
            let created_at = OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .map_err(|err| AppError::invalid_data(err.to_string()))?;
            fields.insert("created_at".to_string(), Value::String(created_at));
        }

        let record = Value::Object(fields);
        stored
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(record.clone());
        self.write(stored).await?;
        debug!(collection, id, "inserted row");

        Ok(record)
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<(), AppError> {
        let Value::Object(patch) = fields else {
            return Err(AppError::invalid_data("fields must be a JSON object"));
        };

        let _guard = self.lock.lock().await;
        let mut stored = self.read().await?;
        let record = stored
            .collections
            .get_mut(collection)
            .and_then(|records| records.iter_mut().find(|record| record_has_id(record, id)))
            .ok_or_else(|| missing_row(collection, id))?;

        let existing: &mut Map<String, Value> = record
            .as_object_mut()
            .ok_or_else(|| AppError::invalid_data("stored record is not a JSON object"))?;
        existing.extend(patch);
        self.write(stored).await?;
        debug!(collection, id, "updated row");

        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), AppError> {
        let _guard = self.lock.lock().await;
        let mut stored = self.read().await?;
        let records = stored
            .collections
            .get_mut(collection)
            .ok_or_else(|| missing_row(collection, id))?;

        let index = records
            .iter()
            .position(|record| record_has_id(record, id))
            .ok_or_else(|| missing_row(collection, id))?;
        records.remove(index);
        self.write(stored).await?;
        debug!(collection, id, "deleted row");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{JsonFileStore, SCHEMA_VERSION};
    use crate::remote::{Query, RemoteStore, TASKS};
    use crate::storage::test_support::temp_path;
    use serde_json::json;
    use std::fs;

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let store = JsonFileStore::new(temp_path("missing-store.json"));
        let rows = store.select(TASKS, &Query::new()).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn insert_assigns_sequential_ids_and_persists() {
        let path = temp_path("insert-store.json");
        let store = JsonFileStore::new(path.clone());

        let first = store.insert(TASKS, json!({"title": "a"})).await.unwrap();
        let second = store.insert(TASKS, json!({"title": "b"})).await.unwrap();

        let reopened = JsonFileStore::new(path.clone());
        let rows = reopened
            .select(TASKS, &Query::new().order_by("id", false))
            .await
            .unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(first["id"], "1");
        assert_eq!(second["id"], "2");
        assert!(first["created_at"].is_string());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["title"], "b");
    }

    #[tokio::test]
    async fn update_merges_fields_and_delete_removes_row() {
        let path = temp_path("update-store.json");
        let store = JsonFileStore::new(path.clone());
        let inserted = store
            .insert(TASKS, json!({"title": "a", "status": "todo"}))
            .await
            .unwrap();
        let id = inserted["id"].as_str().unwrap().to_string();

        store
            .update(TASKS, &id, json!({"status": "done"}))
            .await
            .unwrap();
        let rows = store.select(TASKS, &Query::new()).await.unwrap();
        assert_eq!(rows[0]["status"], "done");
        assert_eq!(rows[0]["title"], "a");

        store.delete(TASKS, &id).await.unwrap();
        let rows = store.select(TASKS, &Query::new()).await.unwrap();
        fs::remove_file(&path).ok();

        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn overlapping_inserts_keep_every_row() {
        let path = temp_path("overlap-store.json");
        let store = JsonFileStore::new(path.clone());

        let (a, b, c) = tokio::join!(
            store.insert(TASKS, json!({"title": "a"})),
            store.insert(TASKS, json!({"title": "b"})),
            store.insert(TASKS, json!({"title": "c"})),
        );
        let rows = store.select(TASKS, &Query::new()).await.unwrap();
        fs::remove_file(&path).ok();

        let mut ids: Vec<String> = [a, b, c]
            .into_iter()
            .map(|row| row.unwrap()["id"].as_str().unwrap().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(rows.len(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn store_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let path = temp_path("perms-store.json");
        let store = JsonFileStore::new(path.clone());
        store.insert(TASKS, json!({"title": "a"})).await.unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        fs::remove_file(&path).ok();

        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn mutations_on_unknown_rows_fail() {
        let path = temp_path("unknown-store.json");
        let store = JsonFileStore::new(path.clone());
        store.insert(TASKS, json!({"title": "a"})).await.unwrap();

        let update = store.update(TASKS, "99", json!({"title": "b"})).await;
        let delete = store.delete(TASKS, "99").await;
        fs::remove_file(&path).ok();

        assert_eq!(update.unwrap_err().code(), "remote_error");
        assert_eq!(delete.unwrap_err().code(), "remote_error");
    }

    #[tokio::test]
    async fn schema_version_must_match() {
        let path = temp_path("bad-schema-store.json");
        let bad = format!(
            "{{\n  \"schema_version\": {},\n  \"next_id\": 1,\n  \"collections\": {{}}\n}}",
            SCHEMA_VERSION + 1
        );
        fs::write(&path, bad).unwrap();

        let err = JsonFileStore::new(path.clone())
            .select(TASKS, &Query::new())
            .await
            .unwrap_err();
        fs::remove_file(&path).ok();

        assert_eq!(err.code(), "invalid_data");
    }

    #[tokio::test]
    async fn corrupt_file_is_invalid_data() {
        let path = temp_path("corrupt-store.json");
        fs::write(&path, "{ not json").unwrap();

        let err = JsonFileStore::new(path.clone())
            .insert(TASKS, json!({"title": "a"}))
            .await
            .unwrap_err();
        fs::remove_file(&path).ok();

        assert_eq!(err.code(), "invalid_data");
    }
}
