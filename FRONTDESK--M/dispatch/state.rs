//! Task status transitions and the store patches that express them.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::{
    error::{DispatchError, DispatchResult},
    model::{Task, TaskStatus},
    store::Fields,
};

/// A step in a task's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskTransition {
    /// An offer went out.
    Offer,
    /// The offer (or a guest request) was taken by `assignee`.
    Start {
        /// Employee now working the task.
        assignee: String,
        /// Acceptance instant; becomes `startTime`.
        at: DateTime<Utc>,
    },
    /// The assignee finished.
    Complete {
        /// Completion instant; becomes `endTime`.
        at: DateTime<Utc>,
    },
}

impl TaskTransition {
    /// Status entered by the transition.
    #[must_use]
    pub const fn target(&self) -> TaskStatus {
        match self {
            Self::Offer => TaskStatus::Assigned,
            Self::Start { .. } => TaskStatus::InProgress,
            Self::Complete { .. } => TaskStatus::Completed,
        }
    }

    /// Whether the transition may start from `from`.
    #[must_use]
    pub fn allowed_from(&self, from: TaskStatus) -> bool {
        matches!(
            (self, from),
            (
                Self::Offer,
                TaskStatus::Pending | TaskStatus::Assigned | TaskStatus::Rejected
            ) | (Self::Start { .. }, TaskStatus::Assigned)
                | (Self::Complete { .. }, TaskStatus::InProgress)
        )
    }

    /// Fails with `InvalidTransition` unless allowed from the task's status.
    pub fn check(&self, task: &Task) -> DispatchResult<()> {
        if self.allowed_from(task.status) {
            Ok(())
        } else {
            Err(DispatchError::InvalidTransition {
                task_id: task.id.clone(),
                from: task.status,
                to: self.target(),
            })
        }
    }

    /// Partial update applying the transition in the store.
    #[must_use]
    pub fn patch(&self) -> Fields {
        let value = match self {
            Self::Offer => json!({ "status": TaskStatus::Assigned }),
            Self::Start { assignee, at } => json!({
                "status": TaskStatus::InProgress,
                "assignedTo": assignee,
                "startTime": at,
            }),
            Self::Complete { at } => json!({
                "status": TaskStatus::Completed,
                "endTime": at,
            }),
        };
        match value {
            serde_json::Value::Object(fields) => fields,
            _ => Fields::new(),
        }
    }

    /// Applies the transition to an in-memory copy, mirroring [`Self::patch`].
    pub fn apply(&self, task: &mut Task) {
        task.status = self.target();
        match self {
            Self::Offer => {}
            Self::Start { assignee, at } => {
                task.assigned_to = Some(assignee.clone());
                task.start_time = Some(*at);
            }
            Self::Complete { at } => task.end_time = Some(*at),
        }
    }
}
