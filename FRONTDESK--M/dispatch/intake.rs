//! New work entering the system: staff-submitted tasks and guest requests.

use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    error::{DispatchError, DispatchResult},
    lifecycle::{fields, still_pending, Dispatcher},
    model::{
        GuestRequest, GuestRequestStatus, NewGuestRequest, NewTask, Task, TaskAssignment,
        TaskStatus,
    },
    state::TaskTransition,
    store::{Collection, FieldGuard},
};

/// Name recorded when a guest leaves theirs blank.
pub const ANONYMOUS_GUEST: &str = "Anonymous Guest";

/// Result of [`Dispatcher::submit_request`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    /// Task as it stands after routing.
    pub task: Task,
    /// Offer made for it; `None` when routing failed and the task stayed `pending`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<TaskAssignment>,
}

/// Title given to the task created from a claimed guest request.
#[must_use]
pub fn claim_title(request: &GuestRequest) -> String {
    let mut title = format!("{} - room {}", request.title, request.room_number);
    if !request.guest_name.trim().is_empty() {
        title.push_str(", guest: ");
        title.push_str(&request.guest_name);
    }
    title
}

impl Dispatcher {
    /// Stores a `pending` task and tries to route it. A routing failure is logged and
    /// leaves the task `pending`; only the initial write can fail the call.
    pub async fn submit_request(&self, request: NewTask) -> DispatchResult<Submission> {
        let now = self.clock.now();
        let mut task = self
            .records
            .insert(Collection::Tasks, |id| Task {
                id,
                title: request.title,
                room_number: request.room_number,
                department_id: request.department_id,
                status: TaskStatus::Pending,
                requester_id: request.requester_id,
                assigned_to: None,
                start_time: None,
                end_time: None,
                created_at: now,
            })
            .await?;

        match self.create_offer(&task.id, &task.department_id).await {
            Ok(offer) => {
                TaskTransition::Offer.apply(&mut task);
                Ok(Submission {
                    task,
                    offer: Some(offer),
                })
            }
            Err(err) => {
                let metadata = json!({
                    "task_id": task.id,
                    "department_id": task.department_id,
                    "error": err.to_string(),
                });
                self.log(LogLevel::Warn, "dispatch.submit.assignment_failed", metadata.clone());
                self.event("dispatch.submit.assignment_failed", metadata).await;
                Ok(Submission { task, offer: None })
            }
        }
    }

    /// Queues a guest request for its department.
    pub async fn submit_guest_request(&self, request: NewGuestRequest) -> DispatchResult<GuestRequest> {
        let now = self.clock.now();
        let guest_name = request
            .guest_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| ANONYMOUS_GUEST.to_string());
        let stored = self
            .records
            .insert(Collection::GuestRequests, |id| GuestRequest {
                id,
                title: request.title,
                room_number: request.room_number,
                department_id: request.department_id,
                guest_name,
                status: GuestRequestStatus::Pending,
                assigned_to: None,
                accepted_by: None,
                accepted_at: None,
                created_at: now,
            })
            .await?;
        self.log(
            LogLevel::Info,
            "dispatch.guest_request.submitted",
            json!({ "request_id": stored.id, "department_id": stored.department_id }),
        );
        Ok(stored)
    }

    /// Employee claims a queued guest request. The request is marked `accepted` and a
    /// task is created already `in_progress` for the claimant; no offer is involved.
    pub async fn accept_guest_request(&self, request_id: &str, employee_id: &str) -> DispatchResult<Task> {
        let request = self.records.guest_request(request_id).await?;
        if request.status != GuestRequestStatus::Pending {
            return Err(DispatchError::RequestClosed {
                request_id: request_id.to_string(),
                status: request.status,
            });
        }

        let now = self.clock.now();
        let claim = fields(json!({
            "status": GuestRequestStatus::Accepted,
            "assignedTo": employee_id,
            "acceptedBy": employee_id,
            "acceptedAt": now,
        }));
        let claimed = self
            .records
            .patch_if(Collection::GuestRequests, request_id, &still_pending(), claim)
            .await?;
        if !claimed {
            let status = self
                .records
                .load::<GuestRequest>(Collection::GuestRequests, request_id)
                .await?
                .map_or(GuestRequestStatus::Accepted, |current| current.status);
            return Err(DispatchError::RequestClosed {
                request_id: request_id.to_string(),
                status,
            });
        }

        let inserted = self
            .records
            .insert(Collection::Tasks, |id| Task {
                id,
                title: claim_title(&request),
                room_number: request.room_number.clone(),
                department_id: request.department_id.clone(),
                status: TaskStatus::InProgress,
                requester_id: request.id.clone(),
                assigned_to: Some(employee_id.to_string()),
                start_time: Some(now),
                end_time: None,
                created_at: now,
            })
            .await;
        let task = match inserted {
            Ok(task) => task,
            Err(err) => {
                self.release_claim(request_id, employee_id, &err).await;
                return Err(err);
            }
        };

        let metadata = json!({
            "request_id": request_id,
            "task_id": task.id,
            "employee_id": employee_id,
        });
        self.log(LogLevel::Info, "dispatch.guest_request.claimed", metadata.clone());
        self.event("dispatch.guest_request.claimed", metadata).await;
        Ok(task)
    }

    /// Puts a claimed request back in the queue after its task could not be written.
    async fn release_claim(&self, request_id: &str, employee_id: &str, cause: &DispatchError) {
        let release = fields(json!({
            "status": GuestRequestStatus::Pending,
            "assignedTo": null,
            "acceptedBy": null,
            "acceptedAt": null,
        }));
        let claimed = FieldGuard::new("status", json!(GuestRequestStatus::Accepted));
        let mut metadata = json!({
            "request_id": request_id,
            "employee_id": employee_id,
            "error": cause.to_string(),
        });
        if let Err(err) = self
            .records
            .patch_if(Collection::GuestRequests, request_id, &claimed, release)
            .await
        {
            metadata["release_error"] = json!(err.to_string());
        }
        self.log(LogLevel::Warn, "dispatch.guest_request.claim_released", metadata.clone());
        self.event("dispatch.guest_request.claim_released", metadata).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        store::MemoryStore,
        testing::{staff, t0, FailingStore},
    };
    use shared_logging::MemoryLogSink;
    use std::sync::Arc;

    fn dispatcher(store: Arc<MemoryStore>) -> Dispatcher {
        Dispatcher::new(store)
            .with_clock(Arc::new(ManualClock::new(t0())))
            .with_rng_seed(5)
    }

    fn leak(department: &str) -> NewGuestRequest {
        NewGuestRequest {
            title: "Leaking shower".into(),
            room_number: "214".into(),
            department_id: department.into(),
            guest_name: Some("Mariam".into()),
        }
    }

    #[tokio::test]
    async fn submitted_task_is_routed() {
        let store = Arc::new(MemoryStore::new());
        staff(&*store, "hk", &["ana"]).await;
        let submission = dispatcher(store.clone())
            .submit_request(NewTask {
                title: "Extra towels".into(),
                room_number: "108".into(),
                department_id: "hk".into(),
                requester_id: "front-desk".into(),
            })
            .await
            .unwrap();
        assert_eq!(submission.task.status, TaskStatus::Assigned);
        let offer = submission.offer.unwrap();
        assert_eq!(offer.task_id, submission.task.id);
        assert_eq!(offer.employee_id, "ana");
        assert_eq!(store.len(Collection::Tasks), 1);
    }

    #[tokio::test]
    async fn routing_failure_keeps_the_task_pending() {
        let store = Arc::new(MemoryStore::new());
        staff(&*store, "spa", &[]).await;
        let sink = Arc::new(MemoryLogSink::new());
        let telemetry = crate::telemetry::DispatchTelemetry::builder("dispatch")
            .log_sink(sink.clone())
            .build()
            .unwrap();
        let submission = dispatcher(store.clone())
            .with_telemetry(telemetry)
            .submit_request(NewTask {
                title: "Massage booking".into(),
                room_number: "700".into(),
                department_id: "spa".into(),
                requester_id: "front-desk".into(),
            })
            .await
            .unwrap();
        assert!(submission.offer.is_none());
        assert_eq!(submission.task.status, TaskStatus::Pending);
        assert_eq!(sink.find("dispatch.submit.assignment_failed").len(), 1);
    }

    #[tokio::test]
    async fn blank_guest_name_becomes_anonymous() {
        let desk = dispatcher(Arc::new(MemoryStore::new()));
        let mut request = leak("maintenance");
        request.guest_name = Some("  ".into());
        let stored = desk.submit_guest_request(request).await.unwrap();
        assert_eq!(stored.guest_name, ANONYMOUS_GUEST);
        assert_eq!(stored.status, GuestRequestStatus::Pending);
    }

    #[tokio::test]
    async fn claim_creates_in_progress_task() {
        let store = Arc::new(MemoryStore::new());
        let desk = dispatcher(store.clone());
        let request = desk.submit_guest_request(leak("maintenance")).await.unwrap();

        let task = desk.accept_guest_request(&request.id, "giorgi").await.unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.assigned_to.as_deref(), Some("giorgi"));
        assert_eq!(task.start_time, Some(t0()));
        assert_eq!(task.requester_id, request.id);
        assert_eq!(task.title, "Leaking shower - room 214, guest: Mariam");
        assert_eq!(store.len(Collection::TaskAssignments), 0);

        let claimed = desk.records().guest_request(&request.id).await.unwrap();
        assert_eq!(claimed.status, GuestRequestStatus::Accepted);
        assert_eq!(claimed.accepted_by.as_deref(), Some("giorgi"));
        assert_eq!(claimed.accepted_at, Some(t0()));
    }

    #[tokio::test]
    async fn request_is_claimed_once() {
        let desk = dispatcher(Arc::new(MemoryStore::new()));
        let request = desk.submit_guest_request(leak("maintenance")).await.unwrap();
        desk.accept_guest_request(&request.id, "giorgi").await.unwrap();
        let err = desk
            .accept_guest_request(&request.id, "levan")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::RequestClosed {
                status: GuestRequestStatus::Accepted,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn failed_task_write_returns_request_to_queue() {
        let store = Arc::new(FailingStore::healthy());
        let desk = Dispatcher::new(store.clone())
            .with_clock(Arc::new(ManualClock::new(t0())))
            .with_rng_seed(5);
        let request = desk.submit_guest_request(leak("maintenance")).await.unwrap();
        store.break_writes(Collection::Tasks);

        let err = desk
            .accept_guest_request(&request.id, "giorgi")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Store(_)));
        assert!(desk.records().tasks().await.unwrap().is_empty());

        let released = desk.records().guest_request(&request.id).await.unwrap();
        assert_eq!(released.status, GuestRequestStatus::Pending);
        assert_eq!(released.assigned_to, None);
        assert_eq!(released.accepted_by, None);
        assert_eq!(released.accepted_at, None);
        let queue = desk
            .projections()
            .pending_guest_requests("maintenance")
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);

        store.repair();
        let task = desk.accept_guest_request(&request.id, "giorgi").await.unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let desk = dispatcher(Arc::new(MemoryStore::new()));
        let err = desk.accept_guest_request("nope", "giorgi").await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound { entity: "guest request", .. }));
    }
}
