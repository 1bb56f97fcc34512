//! Offer lifecycle: create, accept, reject and complete.
//!
//! Offers move `pending -> accepted` or `pending -> rejected` and never leave a
//! terminal state. Both answers are compare-and-swap updates guarded on the offer
//! still being `pending`, so of two racing answers only one lands. Expiry is
//! checked lazily when an accept arrives; nothing sweeps stale offers.

use std::{fmt, sync::Arc};

use anyhow::Context;
use chrono::Duration;
use parking_lot::Mutex;
use rand::{rngs::SmallRng, SeedableRng};
use serde_json::{json, Value};
use shared_event_bus::FileEventPublisher;
use shared_logging::LogLevel;

use crate::{
    clock::{Clock, SystemClock},
    config::DispatchConfig,
    error::{DispatchError, DispatchResult},
    history::StatusHistory,
    model::{OfferStatus, Task, TaskAssignment, TaskStatus},
    projections::Projections,
    repository::Repository,
    roster::{RosterSource, StoreRoster},
    selector::{select, RankedEmployee},
    state::TaskTransition,
    store::{Collection, DocumentStore, FieldGuard, Fields},
    telemetry::DispatchTelemetry,
    workload::WorkloadInspector,
};

/// Guard matching a document whose `status` is still `pending`.
pub(crate) fn still_pending() -> FieldGuard {
    FieldGuard::new("status", "pending")
}

pub(crate) fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

/// Routes tasks to department staff and drives them to completion.
pub struct Dispatcher {
    pub(crate) records: Repository,
    roster: Arc<dyn RosterSource>,
    workloads: WorkloadInspector,
    pub(crate) clock: Arc<dyn Clock>,
    rng: Mutex<SmallRng>,
    offer_ttl: Duration,
    pub(crate) history: StatusHistory,
    pub(crate) telemetry: Option<DispatchTelemetry>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("offer_ttl", &self.offer_ttl)
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher over `store` with the store-backed roster, the system clock, an
    /// entropy-seeded tie-break and five-minute offers.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let records = Repository::new(store);
        Self {
            roster: Arc::new(StoreRoster::new(records.clone())),
            workloads: WorkloadInspector::new(records.clone()),
            clock: Arc::new(SystemClock),
            rng: Mutex::new(SmallRng::from_entropy()),
            offer_ttl: DispatchConfig::default().offer_ttl(),
            history: StatusHistory::new(records.clone(), None),
            telemetry: None,
            records,
        }
    }

    /// Builds a dispatcher from loaded configuration, wiring telemetry when a log
    /// file or event log is configured.
    pub fn from_config(store: Arc<dyn DocumentStore>, config: &DispatchConfig) -> anyhow::Result<Self> {
        let mut dispatcher = Self::new(store).with_offer_ttl(config.offer_ttl());
        if let Some(seed) = config.rng_seed {
            dispatcher = dispatcher.with_rng_seed(seed);
        }
        if config.log_path.is_some() || config.event_log.is_some() {
            let mut builder = DispatchTelemetry::builder("dispatch").log_level(config.log_level);
            if let Some(path) = &config.log_path {
                builder = builder.log_path(path);
            }
            if let Some(path) = &config.event_log {
                let publisher = FileEventPublisher::new(path)
                    .with_context(|| format!("opening event log {}", path.display()))?;
                builder = builder.event_publisher(Arc::new(publisher));
            }
            dispatcher = dispatcher.with_telemetry(builder.build()?);
        }
        Ok(dispatcher)
    }

    /// Replaces the roster source.
    #[must_use]
    pub fn with_roster(mut self, roster: Arc<dyn RosterSource>) -> Self {
        self.roster = roster;
        self
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Makes the tie-break reproducible.
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(SmallRng::seed_from_u64(seed));
        self
    }

    /// Sets how long new offers stay acceptable.
    #[must_use]
    pub const fn with_offer_ttl(mut self, ttl: Duration) -> Self {
        self.offer_ttl = ttl;
        self
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: DispatchTelemetry) -> Self {
        self.history = StatusHistory::new(self.records.clone(), Some(telemetry.clone()));
        self.telemetry = Some(telemetry);
        self
    }

    /// Typed store access.
    #[must_use]
    pub const fn records(&self) -> &Repository {
        &self.records
    }

    /// Read-only queries over the same store.
    #[must_use]
    pub fn projections(&self) -> Projections {
        Projections::new(
            self.records.clone(),
            Arc::clone(&self.roster),
            Arc::clone(&self.clock),
        )
    }

    /// Offers `task_id` to the best-placed member of `department_id` and marks the
    /// task `assigned`. Once the new offer is stored, any other pending offer for the
    /// task is rejected.
    pub async fn create_offer(&self, task_id: &str, department_id: &str) -> DispatchResult<TaskAssignment> {
        let task = self.records.task(task_id).await?;
        TaskTransition::Offer.check(&task)?;

        let employees = self.roster.employees_of(department_id).await?;
        let workloads = self.workloads.roster_workloads(&employees).await?;
        let ranked: Vec<RankedEmployee> = employees
            .into_iter()
            .map(|employee| RankedEmployee {
                workload: workloads.get(&employee.id).copied().unwrap_or_default(),
                employee,
            })
            .collect();
        let selection = {
            let mut rng = self.rng.lock();
            select(&ranked, &mut *rng)
        }
        .ok_or_else(|| DispatchError::NoEligibleEmployee {
            department_id: department_id.to_string(),
        })?;

        let now = self.clock.now();
        let offer = TaskAssignment {
            task_id: task_id.to_string(),
            employee_id: selection.employee.id.clone(),
            status: OfferStatus::Pending,
            expires_at: now + self.offer_ttl,
        };
        self.records
            .save(Collection::TaskAssignments, &offer.key(), &offer)
            .await?;
        for stale in self.records.open_offers_for_task(task_id).await? {
            if stale.employee_id == offer.employee_id {
                continue;
            }
            self.records
                .patch_if(
                    Collection::TaskAssignments,
                    &stale.key(),
                    &still_pending(),
                    fields(json!({ "status": OfferStatus::Rejected })),
                )
                .await?;
        }
        self.records
            .patch(Collection::Tasks, task_id, TaskTransition::Offer.patch())
            .await?;

        let metadata = json!({
            "task_id": task_id,
            "department_id": department_id,
            "employee_id": offer.employee_id,
            "pool": selection.pool,
            "candidates": selection.candidates,
            "expires_at": offer.expires_at,
        });
        self.log(LogLevel::Info, "dispatch.offer.created", metadata.clone());
        self.event("dispatch.offer.created", metadata).await;
        Ok(offer)
    }

    /// Employee takes the offer: the task goes `in_progress` with them as assignee.
    pub async fn accept(&self, task_id: &str, employee_id: &str) -> DispatchResult<Task> {
        let offer = self.open_offer(task_id, employee_id).await?;
        let now = self.clock.now();
        if offer.is_expired(now) {
            self.log(
                LogLevel::Info,
                "dispatch.offer.expired",
                json!({ "task_id": task_id, "employee_id": employee_id, "expires_at": offer.expires_at }),
            );
            return Err(DispatchError::Expired {
                task_id: task_id.to_string(),
                employee_id: employee_id.to_string(),
                expired_at: offer.expires_at,
            });
        }
        if offer.status != OfferStatus::Pending {
            return Err(closed(&offer, offer.status));
        }

        let mut task = self.records.task(task_id).await?;
        let start = TaskTransition::Start {
            assignee: employee_id.to_string(),
            at: now,
        };
        start.check(&task)?;
        self.answer(&offer, OfferStatus::Accepted).await?;
        if let Err(err) = self
            .records
            .patch(Collection::Tasks, task_id, start.patch())
            .await
        {
            self.reopen(&offer, &err).await;
            return Err(err);
        }
        start.apply(&mut task);
        self.history
            .append(task_id, employee_id, TaskStatus::InProgress, now)
            .await;

        let metadata = json!({ "task_id": task_id, "employee_id": employee_id });
        self.log(LogLevel::Info, "dispatch.offer.accepted", metadata.clone());
        self.event("dispatch.offer.accepted", metadata).await;
        Ok(task)
    }

    /// Employee declines; the task is immediately re-offered over current workloads.
    /// Returns the replacement offer.
    pub async fn reject(&self, task_id: &str, employee_id: &str) -> DispatchResult<TaskAssignment> {
        let offer = self.open_offer(task_id, employee_id).await?;
        self.answer(&offer, OfferStatus::Rejected).await?;

        let metadata = json!({ "task_id": task_id, "employee_id": employee_id });
        self.log(LogLevel::Info, "dispatch.offer.rejected", metadata.clone());
        self.event("dispatch.offer.rejected", metadata).await;

        let task = self.records.task(task_id).await?;
        self.create_offer(task_id, &task.department_id).await
    }

    /// Assignee finishes the task.
    pub async fn complete(&self, task_id: &str, employee_id: &str) -> DispatchResult<Task> {
        let mut task = self.records.task(task_id).await?;
        if task.assigned_to.as_deref() != Some(employee_id) {
            return Err(DispatchError::Unauthorized {
                task_id: task_id.to_string(),
                employee_id: employee_id.to_string(),
            });
        }
        let now = self.clock.now();
        let finish = TaskTransition::Complete { at: now };
        finish.check(&task)?;
        let guard = FieldGuard::new("status", TaskStatus::InProgress.as_str());
        if !self
            .records
            .patch_if(Collection::Tasks, task_id, &guard, finish.patch())
            .await?
        {
            let current = self.records.task(task_id).await?;
            finish.check(&current)?;
        }
        finish.apply(&mut task);
        self.history
            .append(task_id, employee_id, TaskStatus::Completed, now)
            .await;

        let mut metadata = json!({ "task_id": task_id, "employee_id": employee_id });
        if let Some(started) = task.start_time {
            metadata["minutes"] = json!((now - started).num_seconds() / 60);
        }
        self.log(LogLevel::Info, "dispatch.task.completed", metadata.clone());
        self.event("dispatch.task.completed", metadata).await;
        Ok(task)
    }

    async fn open_offer(&self, task_id: &str, employee_id: &str) -> DispatchResult<TaskAssignment> {
        self.records
            .offer(task_id, employee_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("offer", TaskAssignment::key_for(task_id, employee_id)))
    }

    /// Moves a pending offer to `answer`, failing with `OfferClosed` if someone
    /// else answered first.
    async fn answer(&self, offer: &TaskAssignment, answer: OfferStatus) -> DispatchResult<()> {
        let applied = self
            .records
            .patch_if(
                Collection::TaskAssignments,
                &offer.key(),
                &still_pending(),
                fields(json!({ "status": answer })),
            )
            .await?;
        if applied {
            return Ok(());
        }
        let current = self
            .records
            .offer(&offer.task_id, &offer.employee_id)
            .await?
            .map_or(OfferStatus::Rejected, |found| found.status);
        Err(closed(offer, current))
    }

    /// Returns an accepted offer to `pending` after the task could not be started.
    async fn reopen(&self, offer: &TaskAssignment, cause: &DispatchError) {
        let accepted = FieldGuard::new("status", OfferStatus::Accepted.as_str());
        let mut metadata = json!({
            "task_id": offer.task_id,
            "employee_id": offer.employee_id,
            "error": cause.to_string(),
        });
        if let Err(err) = self
            .records
            .patch_if(
                Collection::TaskAssignments,
                &offer.key(),
                &accepted,
                fields(json!({ "status": OfferStatus::Pending })),
            )
            .await
        {
            metadata["reopen_error"] = json!(err.to_string());
        }
        self.log(LogLevel::Warn, "dispatch.offer.reopened", metadata.clone());
        self.event("dispatch.offer.reopened", metadata).await;
    }

    pub(crate) fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(telemetry) = self.telemetry.as_ref() {
            let _ = telemetry.log(level, message, metadata);
        }
    }

    pub(crate) async fn event(&self, event_type: &str, payload: Value) {
        if let Some(telemetry) = self.telemetry.as_ref() {
            let _ = telemetry.event(event_type, payload).await;
        }
    }
}

fn closed(offer: &TaskAssignment, status: OfferStatus) -> DispatchError {
    DispatchError::OfferClosed {
        task_id: offer.task_id.clone(),
        employee_id: offer.employee_id.clone(),
        status,
    }
}
