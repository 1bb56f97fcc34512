//! Document store boundary and the in-memory implementation used by tests and the CLI.
//!
//! The store deals in raw JSON documents keyed by collection and id. It offers no
//! multi-key transactions; [`DocumentStore::update_if`] is the only atomic
//! read-modify-write primitive and guards exactly one field.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_event_bus::{
    EventPublisher, EventRecord, EventSubscriber, MemoryEventBus, TopicReceiver,
};
use thiserror::Error;
use uuid::Uuid;

/// Top-level field map used for partial updates.
pub type Fields = serde_json::Map<String, Value>;

/// Named document collections.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Department tasks.
    #[serde(rename = "tasks")]
    Tasks,
    /// Queue of guest-submitted requests.
    #[serde(rename = "guestRequests")]
    GuestRequests,
    /// Offers keyed `<task>_<employee>`.
    #[serde(rename = "taskAssignments")]
    TaskAssignments,
    /// Best-effort audit trail.
    #[serde(rename = "taskStatusHistory")]
    TaskStatusHistory,
    /// Departments and their rosters.
    #[serde(rename = "departments")]
    Departments,
    /// Staff accounts.
    #[serde(rename = "users")]
    Users,
}

impl Collection {
    /// Wire name, also used as the change-notification topic.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::GuestRequests => "guestRequests",
            Self::TaskAssignments => "taskAssignments",
            Self::TaskStatusHistory => "taskStatusHistory",
            Self::Departments => "departments",
            Self::Users => "users",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures raised by a [`DocumentStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Partial update of a document that does not exist.
    #[error("{collection}/{id} does not exist")]
    Missing {
        /// Collection addressed.
        collection: Collection,
        /// Document key.
        id: String,
    },
    /// Snapshot file I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Snapshot (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Backend could not serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Condition for [`DocumentStore::update_if`]: `field` must currently equal `expected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldGuard {
    /// Top-level field inspected.
    pub field: String,
    /// Value the field must hold.
    pub expected: Value,
}

impl FieldGuard {
    /// Builds a guard.
    #[must_use]
    pub fn new(field: impl Into<String>, expected: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            expected: expected.into(),
        }
    }

    /// Evaluates the guard against a document.
    #[must_use]
    pub fn matches(&self, document: &Value) -> bool {
        document.get(&self.field) == Some(&self.expected)
    }
}

/// Change notifications for one collection.
#[derive(Debug)]
pub struct Subscription {
    collection: Collection,
    receiver: TopicReceiver,
}

impl Subscription {
    /// Wraps a topic receiver listening to `collection`.
    #[must_use]
    pub const fn new(collection: Collection, receiver: TopicReceiver) -> Self {
        Self {
            collection,
            receiver,
        }
    }

    /// Collection being watched.
    #[must_use]
    pub const fn collection(&self) -> Collection {
        self.collection
    }

    /// Waits for the next change. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<EventRecord> {
        self.receiver.recv().await
    }
}

/// Key-value document store with change notifications.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reserves a fresh key in `collection`. Nothing is written until [`Self::put`].
    async fn create(&self, collection: Collection) -> Result<String, StoreError>;

    /// Writes a whole document, replacing any previous one.
    async fn put(&self, collection: Collection, id: &str, document: Value) -> Result<(), StoreError>;

    /// Reads one document.
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError>;

    /// Reads a whole collection as `(key, document)` pairs.
    async fn get_all(&self, collection: Collection) -> Result<Vec<(String, Value)>, StoreError>;

    /// Merges `fields` into an existing document; `null` values remove fields.
    async fn update(&self, collection: Collection, id: &str, fields: Fields) -> Result<(), StoreError>;

    /// Like [`Self::update`] but only when `guard` holds. Returns whether it applied.
    /// A missing document never satisfies the guard.
    async fn update_if(
        &self,
        collection: Collection,
        id: &str,
        guard: &FieldGuard,
        fields: Fields,
    ) -> Result<bool, StoreError>;

    /// Removes a document. Removing an absent key is not an error.
    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError>;

    /// Subscribes to writes on `collection`.
    async fn subscribe(&self, collection: Collection) -> Result<Subscription, StoreError>;
}

type Collections = IndexMap<Collection, IndexMap<String, Value>>;

/// In-process store. Optionally mirrors every write to a JSON snapshot file.
#[derive(Debug)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
    bus: MemoryEventBus,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Creates an empty, purely in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(Collections::new()),
            bus: MemoryEventBus::default(),
            snapshot_path: None,
        }
    }

    /// Opens a snapshot-backed store, loading `path` when it exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let collections = if path.exists() {
            let raw = fs::read(&path)?;
            if raw.iter().all(u8::is_ascii_whitespace) {
                Collections::new()
            } else {
                serde_json::from_slice(&raw)?
            }
        } else {
            Collections::new()
        };
        Ok(Self {
            collections: RwLock::new(collections),
            bus: MemoryEventBus::default(),
            snapshot_path: Some(path),
        })
    }

    /// Replaces the notification bus (e.g. to share one with telemetry).
    #[must_use]
    pub fn with_bus(mut self, bus: MemoryEventBus) -> Self {
        self.bus = bus;
        self
    }

    /// Bus carrying change notifications.
    #[must_use]
    pub const fn bus(&self) -> &MemoryEventBus {
        &self.bus
    }

    /// Number of documents in `collection`.
    #[must_use]
    pub fn len(&self, collection: Collection) -> usize {
        self.collections
            .read()
            .get(&collection)
            .map_or(0, IndexMap::len)
    }

    fn persist(&self, collections: &Collections) -> Result<(), StoreError> {
        if let Some(path) = &self.snapshot_path {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, serde_json::to_vec_pretty(collections)?)?;
        }
        Ok(())
    }

    /// Makes `staged` live once it has reached the snapshot.
    fn commit(&self, live: &mut Collections, staged: Collections) -> Result<(), StoreError> {
        self.persist(&staged)?;
        *live = staged;
        Ok(())
    }

    async fn notify(&self, collection: Collection, kind: &str, id: &str) -> Result<(), StoreError> {
        let record = EventRecord::new("store", collection.as_str(), kind, json!({ "id": id }));
        self.bus
            .publish(record)
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn merge(target: &mut Value, fields: Fields) {
    if !target.is_object() {
        *target = Value::Object(Fields::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in fields {
            if value.is_null() {
                map.remove(&key);
            } else {
                map.insert(key, value);
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, _collection: Collection) -> Result<String, StoreError> {
        Ok(Uuid::new_v4().simple().to_string())
    }

    async fn put(&self, collection: Collection, id: &str, document: Value) -> Result<(), StoreError> {
        let existed = {
            let mut collections = self.collections.write();
            let mut staged = collections.clone();
            let existed = staged
                .entry(collection)
                .or_default()
                .insert(id.to_string(), document)
                .is_some();
            self.commit(&mut collections, staged)?;
            existed
        };
        let kind = if existed { "updated" } else { "created" };
        self.notify(collection, kind, id).await
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .collections
            .read()
            .get(&collection)
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn get_all(&self, collection: Collection) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(self
            .collections
            .read()
            .get(&collection)
            .map(|documents| {
                documents
                    .iter()
                    .map(|(id, document)| (id.clone(), document.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update(&self, collection: Collection, id: &str, fields: Fields) -> Result<(), StoreError> {
        {
            let mut collections = self.collections.write();
            let mut staged = collections.clone();
            let document = staged
                .get_mut(&collection)
                .and_then(|documents| documents.get_mut(id))
                .ok_or_else(|| StoreError::Missing {
                    collection,
                    id: id.to_string(),
                })?;
            merge(document, fields);
            self.commit(&mut collections, staged)?;
        }
        self.notify(collection, "updated", id).await
    }

    async fn update_if(
        &self,
        collection: Collection,
        id: &str,
        guard: &FieldGuard,
        fields: Fields,
    ) -> Result<bool, StoreError> {
        {
            let mut collections = self.collections.write();
            let mut staged = collections.clone();
            let Some(document) = staged
                .get_mut(&collection)
                .and_then(|documents| documents.get_mut(id))
            else {
                return Ok(false);
            };
            if !guard.matches(document) {
                return Ok(false);
            }
            merge(document, fields);
            self.commit(&mut collections, staged)?;
        }
        self.notify(collection, "updated", id).await?;
        Ok(true)
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        let removed = {
            let mut collections = self.collections.write();
            let mut staged = collections.clone();
            let removed = staged
                .get_mut(&collection)
                .and_then(|documents| documents.shift_remove(id))
                .is_some();
            if removed {
                self.commit(&mut collections, staged)?;
            }
            removed
        };
        if removed {
            self.notify(collection, "deleted", id).await?;
        }
        Ok(())
    }

    async fn subscribe(&self, collection: Collection) -> Result<Subscription, StoreError> {
        let receiver = self
            .bus
            .subscribe_topic(collection.as_str())
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Ok(Subscription::new(collection, receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn put_get_and_list_preserve_insertion_order() {
        let store = MemoryStore::new();
        store
            .put(Collection::Tasks, "b", json!({ "title": "towels" }))
            .await
            .unwrap();
        store
            .put(Collection::Tasks, "a", json!({ "title": "ice" }))
            .await
            .unwrap();
        let all = store.get_all(Collection::Tasks).await.unwrap();
        let keys: Vec<_> = all.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(keys, ["b", "a"]);
        assert_eq!(
            store.get(Collection::Tasks, "a").await.unwrap().unwrap()["title"],
            "ice"
        );
        assert!(store.get(Collection::Users, "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_merges_and_null_removes() {
        let store = MemoryStore::new();
        store
            .put(
                Collection::Tasks,
                "t",
                json!({ "status": "pending", "assignedTo": "e-1" }),
            )
            .await
            .unwrap();
        store
            .update(
                Collection::Tasks,
                "t",
                fields(json!({ "status": "assigned", "assignedTo": null })),
            )
            .await
            .unwrap();
        let task = store.get(Collection::Tasks, "t").await.unwrap().unwrap();
        assert_eq!(task, json!({ "status": "assigned" }));
    }

    #[tokio::test]
    async fn update_of_missing_document_fails() {
        let store = MemoryStore::new();
        let err = store
            .update(Collection::Tasks, "ghost", fields(json!({ "status": "assigned" })))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Missing { .. }));
    }

    #[tokio::test]
    async fn update_if_applies_only_when_guard_holds() {
        let store = MemoryStore::new();
        store
            .put(Collection::TaskAssignments, "t_e", json!({ "status": "pending" }))
            .await
            .unwrap();
        let guard = FieldGuard::new("status", "pending");
        let first = store
            .update_if(
                Collection::TaskAssignments,
                "t_e",
                &guard,
                fields(json!({ "status": "accepted" })),
            )
            .await
            .unwrap();
        let second = store
            .update_if(
                Collection::TaskAssignments,
                "t_e",
                &guard,
                fields(json!({ "status": "rejected" })),
            )
            .await
            .unwrap();
        assert!(first);
        assert!(!second);
        let offer = store
            .get(Collection::TaskAssignments, "t_e")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(offer["status"], "accepted");
        assert!(!store
            .update_if(Collection::TaskAssignments, "nope", &guard, Fields::new())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn subscribers_see_writes_to_their_collection() {
        let store = MemoryStore::new();
        let mut tasks = store.subscribe(Collection::Tasks).await.unwrap();
        store
            .put(Collection::Users, "u", json!({ "name": "Nino" }))
            .await
            .unwrap();
        store
            .put(Collection::Tasks, "t", json!({ "title": "ice" }))
            .await
            .unwrap();
        store.delete(Collection::Tasks, "t").await.unwrap();
        let created = tasks.changed().await.unwrap();
        assert_eq!(created.event_type, "created");
        assert_eq!(created.payload["id"], "t");
        let deleted = tasks.changed().await.unwrap();
        assert_eq!(deleted.event_type, "deleted");
        assert_eq!(tasks.collection(), Collection::Tasks);
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("desk.json");
        {
            let store = MemoryStore::open(&path).unwrap();
            store
                .put(Collection::Departments, "d-1", json!({ "name": "Housekeeping" }))
                .await
                .unwrap();
        }
        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.len(Collection::Departments), 1);
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"departments\""));
    }

    #[tokio::test]
    async fn failed_snapshot_write_leaves_memory_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("desk.json");
        let store = MemoryStore::open(&path).unwrap();
        store
            .put(Collection::Tasks, "t", json!({ "status": "pending" }))
            .await
            .unwrap();
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        let err = store
            .put(Collection::Tasks, "u", json!({ "status": "pending" }))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert_eq!(store.len(Collection::Tasks), 1);
        assert!(store.get(Collection::Tasks, "u").await.unwrap().is_none());

        let guard = FieldGuard::new("status", "pending");
        assert!(store
            .update_if(Collection::Tasks, "t", &guard, fields(json!({ "status": "assigned" })))
            .await
            .is_err());
        assert!(store
            .update(Collection::Tasks, "t", fields(json!({ "status": "assigned" })))
            .await
            .is_err());
        assert!(store.delete(Collection::Tasks, "t").await.is_err());
        let task = store.get(Collection::Tasks, "t").await.unwrap().unwrap();
        assert_eq!(task, json!({ "status": "pending" }));
    }

    #[tokio::test]
    async fn create_reserves_distinct_keys() {
        let store = MemoryStore::new();
        let a = store.create(Collection::Tasks).await.unwrap();
        let b = store.create(Collection::Tasks).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(Collection::Tasks), 0);
    }
}
