use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

/// A persisted entity addressed by an opaque string id
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection (table / file) name the record lives in
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Duplicate id {id} in {collection}")]
    DuplicateId { collection: &'static str, id: String },

    #[error("Invalid partial update: {0}")]
    InvalidPatch(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Persistence collaborator for one collection of records.
///
/// Implementations must make each call atomic with respect to other calls on
/// the same store; cross-call atomicity is the caller's business.
#[async_trait]
pub trait Store<T: Record>: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<T>, StorageError>;

    /// All records matching `filter`, in insertion order
    async fn find(&self, filter: &(dyn for<'r> Fn(&'r T) -> bool + Send + Sync)) -> Result<Vec<T>, StorageError>;

    async fn create(&self, record: T) -> Result<T, StorageError>;

    /// Shallow-merge the JSON object `partial` into the stored record.
    /// Returns `None` when no record has that id.
    async fn update_fields(&self, id: &str, partial: Value) -> Result<Option<T>, StorageError>;

    /// Returns whether a record was removed
    async fn delete(&self, id: &str) -> Result<bool, StorageError>;
}

/// Merge `partial` over the JSON form of `current`, keeping the id fixed.
pub fn apply_patch<T: Record>(current: &T, partial: Value) -> Result<T, StorageError> {
    let Value::Object(fields) = partial else {
        return Err(StorageError::InvalidPatch(
            "partial update must be a JSON object".to_string(),
        ));
    };

    if let Some(id) = fields.get("id") {
        if id.as_str() != Some(current.id()) {
            return Err(StorageError::InvalidPatch(format!(
                "cannot change id of {} record {}",
                T::COLLECTION,
                current.id()
            )));
        }
    }

    let mut merged = serde_json::to_value(current)?;
    if let Value::Object(target) = &mut merged {
        target.extend(fields);
    }

    Ok(serde_json::from_value(merged)?)
}

/// In-process store keeping records in insertion order
pub struct MemoryStore<T> {
    records: RwLock<Vec<T>>,
}

impl<T: Record> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn with_records(records: Vec<T>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }
}

impl<T: Record> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Record> Store<T> for MemoryStore<T> {
    async fn get(&self, id: &str) -> Result<Option<T>, StorageError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id() == id).cloned())
    }

    async fn find(&self, filter: &(dyn for<'r> Fn(&'r T) -> bool + Send + Sync)) -> Result<Vec<T>, StorageError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|&r| filter(r)).cloned().collect())
    }

    async fn create(&self, record: T) -> Result<T, StorageError> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.id() == record.id()) {
            return Err(StorageError::DuplicateId {
                collection: T::COLLECTION,
                id: record.id().to_string(),
            });
        }
        records.push(record.clone());
        Ok(record)
    }

    async fn update_fields(&self, id: &str, partial: Value) -> Result<Option<T>, StorageError> {
        let mut records = self.records.write().await;
        let Some(slot) = records.iter_mut().find(|r| r.id() == id) else {
            return Ok(None);
        };

        let updated = apply_patch(slot, partial)?;
        *slot = updated.clone();
        Ok(Some(updated))
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.id() != id);
        Ok(records.len() != before)
    }
}
