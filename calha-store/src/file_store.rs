use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use calha_core::repository::{apply_patch, Record, StorageError, Store};
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

/// Flat-file store: one pretty-printed JSON array per collection.
///
/// Every call reads the whole file and writes it back through a temp file and
/// a rename, under one in-process lock.
pub struct JsonFileStore<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> JsonFileStore<T> {
    /// Store for `T::COLLECTION` under `data_dir`, e.g. `data/products.json`
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(format!("{}.json", T::COLLECTION)),
            lock: Mutex::new(()),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<T>, StorageError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(Vec::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Creating empty collection file {}", self.path.display());
                self.write_all(&[]).await?;
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, records: &[T]) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let body = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl<T: Record> Store<T> for JsonFileStore<T> {
    async fn get(&self, id: &str) -> Result<Option<T>, StorageError> {
        let _guard = self.lock.lock().await;
        let records = self.read_all().await?;
        Ok(records.into_iter().find(|r| r.id() == id))
    }

    async fn find(&self, filter: &(dyn for<'r> Fn(&'r T) -> bool + Send + Sync)) -> Result<Vec<T>, StorageError> {
        let _guard = self.lock.lock().await;
        let records = self.read_all().await?;
        Ok(records.into_iter().filter(|r| filter(r)).collect())
    }

    async fn create(&self, record: T) -> Result<T, StorageError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        if records.iter().any(|r| r.id() == record.id()) {
            return Err(StorageError::DuplicateId {
                collection: T::COLLECTION,
                id: record.id().to_string(),
            });
        }
        records.push(record.clone());
        self.write_all(&records).await?;
        Ok(record)
    }

    async fn update_fields(&self, id: &str, partial: Value) -> Result<Option<T>, StorageError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        let Some(index) = records.iter().position(|r| r.id() == id) else {
            return Ok(None);
        };

        let updated = apply_patch(&records[index], partial)?;
        records[index] = updated.clone();
        self.write_all(&records).await?;
        Ok(Some(updated))
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        let before = records.len();
        records.retain(|r| r.id() != id);
        if records.len() == before {
            return Ok(false);
        }
        self.write_all(&records).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sheet {
        id: String,
        stock: u32,
    }

    impl Record for Sheet {
        const COLLECTION: &'static str = "sheets";

        fn id(&self) -> &str {
            &self.id
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_created_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFileStore<Sheet> = JsonFileStore::new(dir.path().join("data"));

        assert_eq!(store.get("x").await.unwrap(), None);
        let on_disk = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(on_disk, "[]");
    }

    #[tokio::test]
    async fn test_changes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFileStore<Sheet> = JsonFileStore::new(dir.path());
        store.create(Sheet { id: "s1".into(), stock: 5 }).await.unwrap();
        store.create(Sheet { id: "s2".into(), stock: 1 }).await.unwrap();
        store.update_fields("s1", json!({ "stock": 2 })).await.unwrap();
        assert!(store.delete("s2").await.unwrap());

        let reopened: JsonFileStore<Sheet> = JsonFileStore::new(dir.path());
        let all = reopened.find(&|_: &Sheet| true).await.unwrap();
        assert_eq!(all, vec![Sheet { id: "s1".into(), stock: 2 }]);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sheets.json"), "{not json").unwrap();
        let store: JsonFileStore<Sheet> = JsonFileStore::new(dir.path());

        let err = store.get("s1").await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
