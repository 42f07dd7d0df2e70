//! Directory entities read by the reconciler.
//!
//! # Responsibility
//! - Define the employee and department records owned by the CRUD side.
//! - Provide write-path validation for the directory repository.
//!
//! # Invariants
//! - Ids are assigned by the directory store and never reused.
//! - Tenant ids are carried as-is; nothing here cross-checks them.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Integer identifier of an employee row.
pub type EmployeeId = i64;
/// Integer identifier of a department row.
pub type DepartmentId = i64;
/// Integer identifier of the owning tenant.
pub type TenantId = i64;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// Employee record as stored by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: EmployeeId,
    pub name: String,
    pub email: String,
    pub tenant_id: TenantId,
}

/// Department record as stored by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub id: DepartmentId,
    pub department_name: String,
    pub tenant_id: TenantId,
}

/// Validation failures for directory writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelValidationError {
    EmptyName,
    InvalidEmail(String),
    EmptyDepartmentName,
}

impl Display for ModelValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "employee name cannot be empty"),
            Self::InvalidEmail(value) => write!(f, "invalid employee email `{value}`"),
            Self::EmptyDepartmentName => write!(f, "department name cannot be empty"),
        }
    }
}

impl Error for ModelValidationError {}

impl Employee {
    pub fn new(
        id: EmployeeId,
        name: impl Into<String>,
        email: impl Into<String>,
        tenant_id: TenantId,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
            tenant_id,
        }
    }

    /// Checks the fields the directory refuses to persist.
    pub fn validate(&self) -> Result<(), ModelValidationError> {
        if self.name.trim().is_empty() {
            return Err(ModelValidationError::EmptyName);
        }
        if !EMAIL_RE.is_match(self.email.trim()) {
            return Err(ModelValidationError::InvalidEmail(self.email.clone()));
        }
        Ok(())
    }
}

impl Department {
    pub fn new(id: DepartmentId, department_name: impl Into<String>, tenant_id: TenantId) -> Self {
        Self {
            id,
            department_name: department_name.into(),
            tenant_id,
        }
    }

    pub fn validate(&self) -> Result<(), ModelValidationError> {
        if self.department_name.trim().is_empty() {
            return Err(ModelValidationError::EmptyDepartmentName);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Department, Employee, ModelValidationError};

    #[test]
    fn employee_validation_accepts_plain_address() {
        let employee = Employee::new(1, "Ada", "ada@example.com", 7);
        assert_eq!(employee.validate(), Ok(()));
    }

    #[test]
    fn employee_validation_rejects_blank_name_and_bad_email() {
        let blank = Employee::new(1, "  ", "ada@example.com", 7);
        assert_eq!(blank.validate(), Err(ModelValidationError::EmptyName));

        let bad_email = Employee::new(1, "Ada", "ada.example.com", 7);
        assert!(matches!(
            bad_email.validate(),
            Err(ModelValidationError::InvalidEmail(value)) if value == "ada.example.com"
        ));
    }

    #[test]
    fn department_validation_rejects_blank_name() {
        let department = Department::new(2, "", 7);
        assert_eq!(
            department.validate(),
            Err(ModelValidationError::EmptyDepartmentName)
        );
    }
}
