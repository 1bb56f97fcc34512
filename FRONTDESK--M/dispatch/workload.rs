use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    error::DispatchResult,
    model::{Employee, Task, TaskStatus},
    repository::Repository,
};

/// Per-employee load derived from the task collection. Never persisted.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workload {
    /// Tasks finished by the employee.
    pub completed: usize,
    /// Tasks the employee is working on now.
    pub in_progress: usize,
}

impl Workload {
    /// Counts the statuses of tasks already filtered to one assignee.
    #[must_use]
    pub fn tally<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        tasks.into_iter().fold(Self::default(), |mut workload, task| {
            workload.record(task.status);
            workload
        })
    }

    fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::InProgress => self.in_progress += 1,
            _ => {}
        }
    }

    /// Nothing in progress.
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.in_progress == 0
    }
}

/// Read-only view computing workloads from the store.
#[derive(Debug, Clone)]
pub struct WorkloadInspector {
    records: Repository,
}

impl WorkloadInspector {
    /// Creates an inspector over the given repository.
    #[must_use]
    pub const fn new(records: Repository) -> Self {
        Self { records }
    }

    /// Workload of a single employee.
    pub async fn workload_of(&self, employee_id: &str) -> DispatchResult<Workload> {
        let tasks = self.records.tasks().await?;
        Ok(Workload::tally(
            tasks
                .iter()
                .filter(|task| task.assigned_to.as_deref() == Some(employee_id)),
        ))
    }

    /// Workloads for a whole roster from a single read of the task collection.
    /// Employees without tasks map to an empty workload.
    pub async fn roster_workloads(
        &self,
        employees: &[Employee],
    ) -> DispatchResult<IndexMap<String, Workload>> {
        let mut workloads: IndexMap<String, Workload> = employees
            .iter()
            .map(|employee| (employee.id.clone(), Workload::default()))
            .collect();
        for task in self.records.tasks().await? {
            let Some(assignee) = task.assigned_to.as_deref() else {
                continue;
            };
            if let Some(workload) = workloads.get_mut(assignee) {
                workload.record(task.status);
            }
        }
        Ok(workloads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Collection, MemoryStore};
    use chrono::Utc;
    use std::sync::Arc;

    fn task(id: &str, assignee: Option<&str>, status: TaskStatus) -> Task {
        Task {
            id: id.into(),
            title: "Extra pillows".into(),
            room_number: "110".into(),
            department_id: "hk".into(),
            status,
            requester_id: "desk".into(),
            assigned_to: assignee.map(Into::into),
            start_time: None,
            end_time: None,
            created_at: Utc::now(),
        }
    }

    async fn seeded() -> Repository {
        let repo = Repository::new(Arc::new(MemoryStore::new()));
        for t in [
            task("1", Some("ana"), TaskStatus::Completed),
            task("2", Some("ana"), TaskStatus::Completed),
            task("3", Some("ana"), TaskStatus::InProgress),
            task("4", Some("levan"), TaskStatus::Assigned),
            task("5", None, TaskStatus::Pending),
        ] {
            repo.save(Collection::Tasks, &t.id, &t).await.unwrap();
        }
        repo
    }

    #[tokio::test]
    async fn counts_completed_and_in_progress() {
        let inspector = WorkloadInspector::new(seeded().await);
        let ana = inspector.workload_of("ana").await.unwrap();
        assert_eq!(ana, Workload { completed: 2, in_progress: 1 });
        assert!(!ana.is_free());
        let levan = inspector.workload_of("levan").await.unwrap();
        assert_eq!(levan, Workload::default());
    }

    #[tokio::test]
    async fn roster_includes_idle_employees() {
        let inspector = WorkloadInspector::new(seeded().await);
        let roster = [
            Employee { id: "ana".into(), name: "Ana".into() },
            Employee { id: "nika".into(), name: "Nika".into() },
        ];
        let workloads = inspector.roster_workloads(&roster).await.unwrap();
        assert_eq!(workloads.len(), 2);
        assert_eq!(workloads["ana"].completed, 2);
        assert!(workloads["nika"].is_free());
    }
}
