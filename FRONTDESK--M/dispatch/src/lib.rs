#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Guest-service dispatch: routes hotel tasks to department staff by workload,
//! tracks time-boxed offers and drives tasks to completion.

/// Injected wall-clock time.
#[path = "../clock.rs"]
pub mod clock;

/// TOML configuration.
#[path = "../config.rs"]
pub mod config;

/// Error taxonomy.
#[path = "../error.rs"]
pub mod error;

/// Best-effort status audit trail.
#[path = "../history.rs"]
pub mod history;

/// Task submission and guest-request claims.
#[path = "../intake.rs"]
pub mod intake;

/// Offer lifecycle and the dispatcher.
#[path = "../lifecycle.rs"]
pub mod lifecycle;

/// Records stored in the document store.
#[path = "../model.rs"]
pub mod model;

/// Read-side queries and live views.
#[path = "../projections.rs"]
pub mod projections;

/// Typed store access.
#[path = "../repository.rs"]
pub mod repository;

/// Department membership.
#[path = "../roster.rs"]
pub mod roster;

/// Employee selection policy.
#[path = "../selector.rs"]
pub mod selector;

/// Task status transitions.
#[path = "../state.rs"]
pub mod state;

/// Document store abstraction and the in-memory store.
#[path = "../store.rs"]
pub mod store;

/// Logging and event hooks.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Workload snapshots.
#[path = "../workload.rs"]
pub mod workload;

#[cfg(test)]
#[path = "../testing.rs"]
mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::DispatchConfig;
pub use error::{DispatchError, DispatchResult};
pub use intake::Submission;
pub use lifecycle::Dispatcher;
pub use model::{
    Department, Employee, EmployeePerformance, GuestRequest, GuestRequestStatus, NewGuestRequest,
    NewTask, OfferStatus, StatusHistoryEntry, Task, TaskAssignment, TaskStatus,
};
pub use projections::{CollectionWatch, OpenOffer, Projections};
pub use repository::Repository;
pub use roster::{RosterSource, StoreRoster};
pub use selector::{select, Pool, RankedEmployee, Selection};
pub use store::{Collection, DocumentStore, FieldGuard, MemoryStore, StoreError};
pub use telemetry::{DispatchTelemetry, DispatchTelemetryBuilder};
pub use workload::{Workload, WorkloadInspector};
