use async_trait::async_trait;

use crate::{error::DispatchResult, model::Employee, repository::Repository};

/// Source of department membership.
#[async_trait]
pub trait RosterSource: Send + Sync {
    /// Employees belonging to `department_id`, in roster order.
    async fn employees_of(&self, department_id: &str) -> DispatchResult<Vec<Employee>>;
}

/// Roster read from the `departments` and `users` collections.
#[derive(Debug, Clone)]
pub struct StoreRoster {
    records: Repository,
}

impl StoreRoster {
    /// Builds a roster over the given repository.
    #[must_use]
    pub const fn new(records: Repository) -> Self {
        Self { records }
    }
}

#[async_trait]
impl RosterSource for StoreRoster {
    async fn employees_of(&self, department_id: &str) -> DispatchResult<Vec<Employee>> {
        let department = self.records.department(department_id).await?;
        let mut employees = Vec::with_capacity(department.employee_ids.len());
        for employee_id in &department.employee_ids {
            // Roster entries can outlive the account they point to.
            if let Some(employee) = self.records.employee(employee_id).await? {
                employees.push(employee);
            }
        }
        Ok(employees)
    }
}
