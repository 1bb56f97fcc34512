//! Read-side queries consumed by the front desk and staff views.

use std::{cmp::Reverse, fmt, marker::PhantomData, sync::Arc};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    clock::Clock,
    error::DispatchResult,
    model::{
        EmployeePerformance, GuestRequest, GuestRequestStatus, OfferStatus, StatusHistoryEntry,
        Task, TaskAssignment, TaskStatus,
    },
    repository::Repository,
    roster::RosterSource,
    store::{Collection, Subscription},
};

/// A pending offer together with whether it can still be accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OpenOffer {
    /// The offer itself.
    #[serde(flatten)]
    pub offer: TaskAssignment,
    /// Past its validity window at query time.
    pub expired: bool,
}

/// Query handle sharing the dispatcher's store, roster and clock.
#[derive(Clone)]
pub struct Projections {
    records: Repository,
    roster: Arc<dyn RosterSource>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Projections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projections").finish_non_exhaustive()
    }
}

impl Projections {
    /// Builds the query handle.
    #[must_use]
    pub const fn new(records: Repository, roster: Arc<dyn RosterSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            records,
            roster,
            clock,
        }
    }

    async fn tasks_where<F>(&self, keep: F) -> DispatchResult<Vec<Task>>
    where
        F: Fn(&Task) -> bool + Send,
    {
        Ok(self
            .records
            .tasks()
            .await?
            .into_iter()
            .filter(|task| keep(task))
            .collect())
    }

    /// Tasks accepted by `employee_id`.
    pub async fn tasks_by_assignee(&self, employee_id: &str) -> DispatchResult<Vec<Task>> {
        self.tasks_where(|task| task.assigned_to.as_deref() == Some(employee_id))
            .await
    }

    /// Tasks routed to `department_id`.
    pub async fn tasks_by_department(&self, department_id: &str) -> DispatchResult<Vec<Task>> {
        self.tasks_where(|task| task.department_id == department_id)
            .await
    }

    /// Tasks raised by `requester_id`.
    pub async fn tasks_by_requester(&self, requester_id: &str) -> DispatchResult<Vec<Task>> {
        self.tasks_where(|task| task.requester_id == requester_id)
            .await
    }

    /// One task.
    pub async fn task(&self, task_id: &str) -> DispatchResult<Task> {
        self.records.task(task_id).await
    }

    /// Offers awaiting `employee_id`'s answer. Expired ones are listed and flagged.
    pub async fn pending_offers_for(&self, employee_id: &str) -> DispatchResult<Vec<OpenOffer>> {
        let now = self.clock.now();
        Ok(self
            .records
            .offers()
            .await?
            .into_iter()
            .filter(|offer| offer.employee_id == employee_id && offer.status == OfferStatus::Pending)
            .map(|offer| OpenOffer {
                expired: offer.is_expired(now),
                offer,
            })
            .collect())
    }

    /// Guest requests still waiting in `department_id`'s queue.
    pub async fn pending_guest_requests(&self, department_id: &str) -> DispatchResult<Vec<GuestRequest>> {
        let requests: Vec<GuestRequest> = self.records.load_all(Collection::GuestRequests).await?;
        Ok(requests
            .into_iter()
            .filter(|request| {
                request.department_id == department_id
                    && request.status == GuestRequestStatus::Pending
            })
            .collect())
    }

    /// Status history, newest first.
    pub async fn status_history(&self) -> DispatchResult<Vec<StatusHistoryEntry>> {
        let mut entries: Vec<StatusHistoryEntry> =
            self.records.load_all(Collection::TaskStatusHistory).await?;
        entries.sort_by_key(|entry| Reverse(entry.timestamp));
        Ok(entries)
    }

    /// Completed-work summary for every member of `department_id`, in roster order.
    /// Work time is measured in minutes from `startTime` to `endTime`.
    #[allow(clippy::cast_precision_loss)]
    pub async fn employee_performance(&self, department_id: &str) -> DispatchResult<Vec<EmployeePerformance>> {
        let employees = self.roster.employees_of(department_id).await?;
        let tasks = self.records.tasks().await?;
        Ok(employees
            .into_iter()
            .map(|employee| {
                let completed: Vec<&Task> = tasks
                    .iter()
                    .filter(|task| {
                        task.status == TaskStatus::Completed
                            && task.assigned_to.as_deref() == Some(employee.id.as_str())
                    })
                    .collect();
                let total_work_time: f64 = completed
                    .iter()
                    .filter_map(|task| Some((task.end_time? - task.start_time?).num_milliseconds()))
                    .map(|millis| millis as f64 / 60_000.0)
                    .sum();
                let average_completion_time = if completed.is_empty() {
                    0.0
                } else {
                    total_work_time / completed.len() as f64
                };
                EmployeePerformance {
                    employee_id: employee.id,
                    name: employee.name,
                    tasks_completed: completed.len(),
                    total_work_time,
                    average_completion_time,
                }
            })
            .collect())
    }

    /// Live view of `collection`.
    pub async fn watch<T: DeserializeOwned>(&self, collection: Collection) -> DispatchResult<CollectionWatch<T>> {
        let subscription = self.records.store().subscribe(collection).await?;
        Ok(CollectionWatch {
            subscription,
            records: self.records.clone(),
            marker: PhantomData,
        })
    }
}

/// Re-reads a collection whenever it changes. Notifications are hints; every
/// yield is a fresh read, so missed or duplicated notifications are harmless.
pub struct CollectionWatch<T> {
    subscription: Subscription,
    records: Repository,
    marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for CollectionWatch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionWatch")
            .field("collection", &self.subscription.collection())
            .finish_non_exhaustive()
    }
}

impl<T: DeserializeOwned> CollectionWatch<T> {
    /// Current contents.
    pub async fn current(&self) -> DispatchResult<Vec<T>> {
        self.records.load_all(self.subscription.collection()).await
    }

    /// Waits for the next change and returns the re-read collection. `None` once
    /// the store stops publishing.
    pub async fn next(&mut self) -> Option<DispatchResult<Vec<T>>> {
        self.subscription.changed().await?;
        Some(self.current().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        lifecycle::Dispatcher,
        store::{DocumentStore, MemoryStore},
        testing::{staff, t0, task},
    };
    use chrono::Duration;
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        dispatcher: Dispatcher,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let dispatcher = Dispatcher::new(store.clone())
            .with_clock(clock.clone())
            .with_rng_seed(1);
        Fixture {
            store,
            clock,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn task_filters() {
        let f = fixture();
        task(&*f.store, "a", "hk", TaskStatus::InProgress, Some("ana")).await;
        task(&*f.store, "b", "fnb", TaskStatus::Pending, None).await;
        let views = f.dispatcher.projections();
        assert_eq!(views.tasks_by_assignee("ana").await.unwrap().len(), 1);
        assert_eq!(views.tasks_by_department("fnb").await.unwrap()[0].id, "b");
        assert_eq!(views.tasks_by_requester("front-desk").await.unwrap().len(), 2);
        assert!(views.tasks_by_requester("guest").await.unwrap().is_empty());
        assert_eq!(views.task("a").await.unwrap().room_number, "301");
    }

    #[tokio::test]
    async fn pending_offers_flag_expiry() {
        let f = fixture();
        staff(&*f.store, "hk", &["ana"]).await;
        task(&*f.store, "t1", "hk", TaskStatus::Pending, None).await;
        f.dispatcher.create_offer("t1", "hk").await.unwrap();
        let views = f.dispatcher.projections();

        let open = views.pending_offers_for("ana").await.unwrap();
        assert_eq!(open.len(), 1);
        assert!(!open[0].expired);

        f.clock.advance(Duration::minutes(6));
        let open = views.pending_offers_for("ana").await.unwrap();
        assert!(open[0].expired);
        assert!(views.pending_offers_for("levan").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let f = fixture();
        staff(&*f.store, "hk", &["ana"]).await;
        task(&*f.store, "t1", "hk", TaskStatus::Pending, None).await;
        f.dispatcher.create_offer("t1", "hk").await.unwrap();
        f.dispatcher.accept("t1", "ana").await.unwrap();
        f.clock.advance(Duration::minutes(10));
        f.dispatcher.complete("t1", "ana").await.unwrap();

        let history = f.dispatcher.projections().status_history().await.unwrap();
        let statuses: Vec<_> = history.iter().map(|entry| entry.status).collect();
        assert_eq!(statuses, [TaskStatus::Completed, TaskStatus::InProgress]);
    }

    #[tokio::test]
    async fn performance_averages_completed_minutes() {
        let f = fixture();
        staff(&*f.store, "hk", &["ana", "levan"]).await;
        for (id, minutes) in [("t1", 30), ("t2", 15)] {
            f.store
                .put(
                    Collection::Tasks,
                    id,
                    json!({
                        "title": "Turn-down service",
                        "roomNumber": "402",
                        "departmentId": "hk",
                        "status": "completed",
                        "requesterId": "front-desk",
                        "assignedTo": "ana",
                        "startTime": t0(),
                        "endTime": t0() + Duration::minutes(minutes),
                        "createdAt": t0(),
                    }),
                )
                .await
                .unwrap();
        }
        task(&*f.store, "t3", "hk", TaskStatus::InProgress, Some("ana")).await;

        let report = f.dispatcher.projections().employee_performance("hk").await.unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].employee_id, "ana");
        assert_eq!(report[0].tasks_completed, 2);
        assert!((report[0].total_work_time - 45.0).abs() < 1e-9);
        assert!((report[0].average_completion_time - 22.5).abs() < 1e-9);
        assert_eq!(report[1].tasks_completed, 0);
        assert!(report[1].average_completion_time.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn guest_queue_lists_only_pending_requests() {
        let f = fixture();
        let request = crate::model::NewGuestRequest {
            title: "No hot water".into(),
            room_number: "118".into(),
            department_id: "maintenance".into(),
            guest_name: None,
        };
        let first = f.dispatcher.submit_guest_request(request.clone()).await.unwrap();
        f.dispatcher.submit_guest_request(request).await.unwrap();
        f.dispatcher.accept_guest_request(&first.id, "giorgi").await.unwrap();

        let queue = f
            .dispatcher
            .projections()
            .pending_guest_requests("maintenance")
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
        assert_ne!(queue[0].id, first.id);
    }

    #[tokio::test]
    async fn watch_yields_fresh_reads() {
        let f = fixture();
        let mut watch = f
            .dispatcher
            .projections()
            .watch::<Task>(Collection::Tasks)
            .await
            .unwrap();
        assert!(watch.current().await.unwrap().is_empty());
        task(&*f.store, "t1", "hk", TaskStatus::Pending, None).await;
        let tasks = watch.next().await.unwrap().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "t1");
    }
}
