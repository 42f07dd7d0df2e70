//! Per-run reconciliation outcome.

use crate::model::directory::{DepartmentId, EmployeeId, TenantId};
use serde::Serialize;

/// A candidate skipped because an endpoint does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingReferenceWarning {
    pub employee_id: EmployeeId,
    pub department_id: DepartmentId,
    pub employee_missing: bool,
    pub department_missing: bool,
}

/// A candidate whose employee and department belong to different tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantMismatch {
    pub employee_id: EmployeeId,
    pub department_id: DepartmentId,
    pub employee_tenant_id: TenantId,
    pub department_tenant_id: TenantId,
}

/// Counters and warnings for one committed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    /// Candidates read from the feed, duplicates included.
    pub candidates: usize,
    pub created: usize,
    pub skipped_existing: usize,
    pub skipped_missing_reference: usize,
    /// Non-zero only under `TenantPolicy::SameTenant`.
    pub skipped_tenant_mismatch: usize,
    /// Links created across tenants under `TenantPolicy::Permit`.
    pub cross_tenant: usize,
    pub missing_references: Vec<MissingReferenceWarning>,
    pub tenant_mismatches: Vec<TenantMismatch>,
}

impl ReconciliationReport {
    /// Total candidates that did not produce a new link.
    pub fn skipped(&self) -> usize {
        self.skipped_existing + self.skipped_missing_reference + self.skipped_tenant_mismatch
    }

    /// True when nothing was written.
    pub fn is_noop(&self) -> bool {
        self.created == 0
    }
}
