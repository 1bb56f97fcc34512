use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    model::{GuestRequestStatus, OfferStatus, TaskStatus},
    store::StoreError,
};

/// Errors surfaced by dispatch operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Offer, task, guest request or department missing.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record looked up.
        entity: &'static str,
        /// Key that was looked up.
        id: String,
    },
    /// Offer accepted after its validity window.
    #[error("offer of task {task_id} to {employee_id} expired at {expired_at}")]
    Expired {
        /// Offered task.
        task_id: String,
        /// Employee holding the offer.
        employee_id: String,
        /// End of the validity window.
        expired_at: DateTime<Utc>,
    },
    /// Department has nobody to offer the task to.
    #[error("no eligible employee in department {department_id}")]
    NoEligibleEmployee {
        /// Department searched.
        department_id: String,
    },
    /// Completion attempted by someone other than the assignee.
    #[error("task {task_id} is not assigned to {employee_id}")]
    Unauthorized {
        /// Task concerned.
        task_id: String,
        /// Caller.
        employee_id: String,
    },
    /// Offer already answered (or superseded) when accept/reject arrived.
    #[error("offer of task {task_id} to {employee_id} is already {status}")]
    OfferClosed {
        /// Offered task.
        task_id: String,
        /// Employee holding the offer.
        employee_id: String,
        /// Status found in the store.
        status: OfferStatus,
    },
    /// Guest request already claimed or otherwise out of the queue.
    #[error("guest request {request_id} is already {status}")]
    RequestClosed {
        /// Request concerned.
        request_id: String,
        /// Status found in the store.
        status: GuestRequestStatus,
    },
    /// Task status does not allow the requested step.
    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Task concerned.
        task_id: String,
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },
    /// Underlying store read/write failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Document in the store does not match the expected shape.
    #[error("malformed document: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DispatchError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// Result alias for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
