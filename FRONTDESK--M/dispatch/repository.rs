//! Typed access to the document store.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    error::{DispatchError, DispatchResult},
    model::{Department, Employee, GuestRequest, OfferStatus, Task, TaskAssignment},
    store::{Collection, DocumentStore, FieldGuard, Fields},
};

/// Typed view over a shared [`DocumentStore`].
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").finish_non_exhaustive()
    }
}

/// Documents written by other clients may omit `id` or carry a stale one; the key
/// is authoritative.
fn decode<T: DeserializeOwned>(id: &str, mut document: Value) -> DispatchResult<T> {
    if let Value::Object(map) = &mut document {
        map.insert("id".into(), Value::String(id.to_string()));
    }
    Ok(serde_json::from_value(document)?)
}

impl Repository {
    /// Wraps a store handle.
    #[must_use]
    pub const fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Underlying store.
    #[must_use]
    pub const fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Reads and decodes one document.
    pub async fn load<T: DeserializeOwned>(
        &self,
        collection: Collection,
        id: &str,
    ) -> DispatchResult<Option<T>> {
        match self.store.get(collection, id).await? {
            Some(document) => decode(id, document).map(Some),
            None => Ok(None),
        }
    }

    /// Reads and decodes a whole collection.
    pub async fn load_all<T: DeserializeOwned>(&self, collection: Collection) -> DispatchResult<Vec<T>> {
        self.store
            .get_all(collection)
            .await?
            .into_iter()
            .map(|(id, document)| decode(&id, document))
            .collect()
    }

    /// Encodes and writes a whole document.
    pub async fn save<T: Serialize + Sync>(
        &self,
        collection: Collection,
        id: &str,
        value: &T,
    ) -> DispatchResult<()> {
        let document = serde_json::to_value(value)?;
        self.store.put(collection, id, document).await?;
        Ok(())
    }

    /// Reserves a key, builds the record around it and writes it.
    pub async fn insert<T, F>(&self, collection: Collection, build: F) -> DispatchResult<T>
    where
        T: Serialize + Send + Sync,
        F: FnOnce(String) -> T + Send,
    {
        let id = self.store.create(collection).await?;
        let value = build(id.clone());
        self.save(collection, &id, &value).await?;
        Ok(value)
    }

    /// Partial update of an existing document.
    pub async fn patch(&self, collection: Collection, id: &str, fields: Fields) -> DispatchResult<()> {
        self.store.update(collection, id, fields).await?;
        Ok(())
    }

    /// Guarded partial update; `false` when the guard no longer holds.
    pub async fn patch_if(
        &self,
        collection: Collection,
        id: &str,
        guard: &FieldGuard,
        fields: Fields,
    ) -> DispatchResult<bool> {
        Ok(self.store.update_if(collection, id, guard, fields).await?)
    }

    /// Loads a task, failing with `NotFound` when absent.
    pub async fn task(&self, id: &str) -> DispatchResult<Task> {
        self.load(Collection::Tasks, id)
            .await?
            .ok_or_else(|| DispatchError::not_found("task", id))
    }

    /// Every task.
    pub async fn tasks(&self) -> DispatchResult<Vec<Task>> {
        self.load_all(Collection::Tasks).await
    }

    /// Offer for the `(task, employee)` pair, if one was ever made.
    pub async fn offer(&self, task_id: &str, employee_id: &str) -> DispatchResult<Option<TaskAssignment>> {
        self.load(
            Collection::TaskAssignments,
            &TaskAssignment::key_for(task_id, employee_id),
        )
        .await
    }

    /// Every offer, answered or not.
    pub async fn offers(&self) -> DispatchResult<Vec<TaskAssignment>> {
        self.load_all(Collection::TaskAssignments).await
    }

    /// Offers for `task_id` that are still pending.
    pub async fn open_offers_for_task(&self, task_id: &str) -> DispatchResult<Vec<TaskAssignment>> {
        Ok(self
            .offers()
            .await?
            .into_iter()
            .filter(|offer| offer.task_id == task_id && offer.status == OfferStatus::Pending)
            .collect())
    }

    /// Loads a guest request, failing with `NotFound` when absent.
    pub async fn guest_request(&self, id: &str) -> DispatchResult<GuestRequest> {
        self.load(Collection::GuestRequests, id)
            .await?
            .ok_or_else(|| DispatchError::not_found("guest request", id))
    }

    /// Loads a department, failing with `NotFound` when absent.
    pub async fn department(&self, id: &str) -> DispatchResult<Department> {
        self.load(Collection::Departments, id)
            .await?
            .ok_or_else(|| DispatchError::not_found("department", id))
    }

    /// Staff account, if present.
    pub async fn employee(&self, id: &str) -> DispatchResult<Option<Employee>> {
        self.load(Collection::Users, id).await
    }
}
