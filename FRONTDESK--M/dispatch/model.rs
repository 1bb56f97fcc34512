use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet offered to anyone.
    Pending,
    /// An offer is outstanding.
    Assigned,
    /// Accepted and being worked on.
    InProgress,
    /// Finished by the assignee.
    Completed,
    /// Turned down at the task level.
    Rejected,
}

impl TaskStatus {
    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of work for one department, usually raised from a guest room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Store key.
    pub id: String,
    /// Short description shown to staff.
    pub title: String,
    /// Room the request came from.
    pub room_number: String,
    /// Owning department.
    pub department_id: String,
    /// Current status.
    pub status: TaskStatus,
    /// Whoever raised the task (a user id or a guest request id).
    pub requester_id: String,
    /// Employee who accepted the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    /// Set once, at acceptance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Set once, at completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Fields supplied by whoever submits a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    /// Short description.
    pub title: String,
    /// Room number.
    pub room_number: String,
    /// Department the task is routed to.
    pub department_id: String,
    /// Submitting user.
    pub requester_id: String,
}

/// Status of a guest request. Mirrors [`TaskStatus`] plus the terminal `accepted`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GuestRequestStatus {
    /// Waiting in the department queue.
    Pending,
    /// Offered to an employee.
    Assigned,
    /// Being worked on.
    InProgress,
    /// Done.
    Completed,
    /// Turned down.
    Rejected,
    /// Claimed by an employee and converted into a task.
    Accepted,
}

impl fmt::Display for GuestRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Accepted => "accepted",
        };
        f.write_str(label)
    }
}

/// Request submitted directly by a guest, before it becomes a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GuestRequest {
    /// Store key.
    pub id: String,
    /// Problem title.
    pub title: String,
    /// Room number.
    pub room_number: String,
    /// Department the request is queued for.
    pub department_id: String,
    /// Guest display name.
    pub guest_name: String,
    /// Queue status.
    pub status: GuestRequestStatus,
    /// Employee working the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    /// Employee who claimed the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_by: Option<String>,
    /// When the request was claimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

/// Fields a guest fills in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewGuestRequest {
    /// Problem title.
    pub title: String,
    /// Room number.
    pub room_number: String,
    /// Target department.
    pub department_id: String,
    /// Guest name; `Anonymous Guest` when omitted.
    #[serde(default)]
    pub guest_name: Option<String>,
}

/// Status of a single offer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    /// Awaiting the employee's answer.
    Pending,
    /// Taken by the employee.
    Accepted,
    /// Declined (or superseded by a newer offer).
    Rejected,
}

impl OfferStatus {
    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-boxed offer of one task to one employee.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignment {
    /// Offered task.
    pub task_id: String,
    /// Employee receiving the offer.
    pub employee_id: String,
    /// Offer status.
    pub status: OfferStatus,
    /// Accepting after this instant fails.
    pub expires_at: DateTime<Utc>,
}

impl TaskAssignment {
    /// Store key for the `(task, employee)` pair.
    #[must_use]
    pub fn key_for(task_id: &str, employee_id: &str) -> String {
        format!("{task_id}_{employee_id}")
    }

    /// Store key of this offer.
    #[must_use]
    pub fn key(&self) -> String {
        Self::key_for(&self.task_id, &self.employee_id)
    }

    /// True once `now` is past the validity window.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Staff member eligible to receive tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    /// User id.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// Department with its roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    /// Store key.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Members, in roster order.
    #[serde(default)]
    pub employee_ids: Vec<String>,
}

/// Audit record appended when a task starts or finishes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    /// Store key.
    pub id: String,
    /// Task concerned.
    pub task_id: String,
    /// Employee who triggered the change.
    pub employee_id: String,
    /// Status entered.
    pub status: TaskStatus,
    /// When the change happened.
    pub timestamp: DateTime<Utc>,
}

/// Per-employee summary computed from completed tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmployeePerformance {
    /// Employee id.
    pub employee_id: String,
    /// Employee name.
    pub name: String,
    /// Number of completed tasks.
    pub tasks_completed: usize,
    /// Sum of start-to-end durations, in minutes.
    pub total_work_time: f64,
    /// `total_work_time / tasks_completed`, 0 without completed tasks.
    pub average_completion_time: f64,
}
