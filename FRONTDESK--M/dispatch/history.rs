//! Best-effort audit trail of task status changes.

use chrono::{DateTime, Utc};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    model::{StatusHistoryEntry, TaskStatus},
    repository::Repository,
    store::Collection,
    telemetry::DispatchTelemetry,
};

/// Appends [`StatusHistoryEntry`] records. Failures never reach the caller.
#[derive(Debug, Clone)]
pub struct StatusHistory {
    records: Repository,
    telemetry: Option<DispatchTelemetry>,
}

impl StatusHistory {
    /// Recorder writing through `records`.
    #[must_use]
    pub const fn new(records: Repository, telemetry: Option<DispatchTelemetry>) -> Self {
        Self { records, telemetry }
    }

    /// Records that `employee_id` moved `task_id` into `status`. Returns the stored
    /// entry, or `None` when the write failed (the failure is logged and dropped).
    pub async fn append(
        &self,
        task_id: &str,
        employee_id: &str,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Option<StatusHistoryEntry> {
        let written = self
            .records
            .insert(Collection::TaskStatusHistory, |id| StatusHistoryEntry {
                id,
                task_id: task_id.to_string(),
                employee_id: employee_id.to_string(),
                status,
                timestamp: at,
            })
            .await;
        match written {
            Ok(entry) => Some(entry),
            Err(err) => {
                if let Some(telemetry) = &self.telemetry {
                    let metadata = json!({
                        "task_id": task_id,
                        "employee_id": employee_id,
                        "status": status,
                        "error": err.to_string(),
                    });
                    let _ = telemetry.log(
                        LogLevel::Warn,
                        "dispatch.history.append_failed",
                        metadata.clone(),
                    );
                    let _ = telemetry
                        .event("dispatch.history.append_failed", metadata)
                        .await;
                }
                None
            }
        }
    }
}
