//! Candidate and persisted employee-department links.

use crate::model::directory::{DepartmentId, EmployeeId};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// One `{employeeId, departmentId}` entry read from the feed.
///
/// Deserialization is strict: both fields are required integers and unknown
/// fields are rejected instead of ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AssociationLink {
    pub employee_id: EmployeeId,
    pub department_id: DepartmentId,
}

impl AssociationLink {
    pub fn new(employee_id: EmployeeId, department_id: DepartmentId) -> Self {
        Self {
            employee_id,
            department_id,
        }
    }
}

impl Display for AssociationLink {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "employee_id={} department_id={}",
            self.employee_id, self.department_id
        )
    }
}

/// A durable `employee_departments` row. Existence is its only state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EmployeeDepartment {
    pub employee_id: EmployeeId,
    pub department_id: DepartmentId,
}

impl From<AssociationLink> for EmployeeDepartment {
    fn from(value: AssociationLink) -> Self {
        Self {
            employee_id: value.employee_id,
            department_id: value.department_id,
        }
    }
}
