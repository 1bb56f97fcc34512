//! Shared fixtures for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::{
    model::{Task, TaskStatus},
    store::{Collection, DocumentStore, FieldGuard, Fields, MemoryStore, StoreError, Subscription},
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap()
}

/// Memory store whose writes to one collection fail while it is broken.
pub struct FailingStore {
    inner: MemoryStore,
    broken: Mutex<Option<Collection>>,
}

impl FailingStore {
    pub fn on(broken: Collection) -> Self {
        let store = Self::healthy();
        store.break_writes(broken);
        store
    }

    pub fn healthy() -> Self {
        Self {
            inner: MemoryStore::new(),
            broken: Mutex::new(None),
        }
    }

    pub fn break_writes(&self, collection: Collection) {
        *self.broken.lock() = Some(collection);
    }

    pub fn repair(&self) {
        *self.broken.lock() = None;
    }

    fn guard(&self, collection: Collection) -> Result<(), StoreError> {
        if *self.broken.lock() == Some(collection) {
            Err(StoreError::Unavailable(format!("{collection} is read-only")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for FailingStore {
    async fn create(&self, collection: Collection) -> Result<String, StoreError> {
        self.inner.create(collection).await
    }

    async fn put(&self, collection: Collection, id: &str, document: Value) -> Result<(), StoreError> {
        self.guard(collection)?;
        self.inner.put(collection, id, document).await
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(collection, id).await
    }

    async fn get_all(&self, collection: Collection) -> Result<Vec<(String, Value)>, StoreError> {
        self.inner.get_all(collection).await
    }

    async fn update(&self, collection: Collection, id: &str, fields: Fields) -> Result<(), StoreError> {
        self.guard(collection)?;
        self.inner.update(collection, id, fields).await
    }

    async fn update_if(
        &self,
        collection: Collection,
        id: &str,
        guard: &FieldGuard,
        fields: Fields,
    ) -> Result<bool, StoreError> {
        self.guard(collection)?;
        self.inner.update_if(collection, id, guard, fields).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        self.guard(collection)?;
        self.inner.delete(collection, id).await
    }

    async fn subscribe(&self, collection: Collection) -> Result<Subscription, StoreError> {
        self.inner.subscribe(collection).await
    }
}

/// Writes a department and a user document per member.
pub async fn staff(store: &dyn DocumentStore, department: &str, members: &[&str]) {
    store
        .put(
            Collection::Departments,
            department,
            json!({ "name": department.to_uppercase(), "employeeIds": members }),
        )
        .await
        .unwrap();
    for member in members {
        store
            .put(Collection::Users, member, json!({ "name": member.to_uppercase() }))
            .await
            .unwrap();
    }
}

/// Writes a task in `department` with the given status and assignee.
pub async fn task(
    store: &dyn DocumentStore,
    id: &str,
    department: &str,
    status: TaskStatus,
    assignee: Option<&str>,
) -> Task {
    let task = Task {
        id: id.into(),
        title: format!("job {id}"),
        room_number: "301".into(),
        department_id: department.into(),
        status,
        requester_id: "front-desk".into(),
        assigned_to: assignee.map(Into::into),
        start_time: None,
        end_time: None,
        created_at: t0(),
    };
    store
        .put(Collection::Tasks, id, serde_json::to_value(&task).unwrap())
        .await
        .unwrap();
    task
}

/// Gives `employee` `completed` finished tasks and `in_progress` open ones.
pub async fn load_up(
    store: &dyn DocumentStore,
    department: &str,
    employee: &str,
    completed: usize,
    in_progress: usize,
) {
    for n in 0..completed {
        task(store, &format!("{employee}-done-{n}"), department, TaskStatus::Completed, Some(employee)).await;
    }
    for n in 0..in_progress {
        task(store, &format!("{employee}-open-{n}"), department, TaskStatus::InProgress, Some(employee)).await;
    }
}
