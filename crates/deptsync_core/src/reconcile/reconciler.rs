//! Candidate validation and idempotent link creation.

use crate::model::association::AssociationLink;
use crate::reconcile::report::{MissingReferenceWarning, ReconciliationReport, TenantMismatch};
use crate::repo::association_store::AssociationStore;
use crate::repo::directory_repo::RepoError;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use tokio_util::sync::CancellationToken;

/// How links between different tenants are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantPolicy {
    /// Create the link and report it as cross-tenant.
    #[default]
    Permit,
    /// Skip the candidate and report it as a tenant mismatch.
    SameTenant,
}

impl TenantPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Permit => "permit",
            Self::SameTenant => "same_tenant",
        }
    }
}

#[derive(Debug)]
pub enum ReconcileError {
    /// The store rejected a lookup, a write or the commit.
    Persistence(RepoError),
    /// Cancellation was observed at a candidate boundary; nothing committed.
    Cancelled { processed: usize },
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persistence(err) => write!(f, "association store failure: {err}"),
            Self::Cancelled { processed } => {
                write!(f, "reconciliation cancelled after {processed} candidates")
            }
        }
    }
}

impl Error for ReconcileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Persistence(err) => Some(err),
            Self::Cancelled { .. } => None,
        }
    }
}

impl From<RepoError> for ReconcileError {
    fn from(value: RepoError) -> Self {
        Self::Persistence(value)
    }
}

/// Applies candidate links to an association store.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler {
    policy: TenantPolicy,
}

enum CandidateOutcome {
    Created { cross_tenant: Option<TenantMismatch> },
    Existing,
    Missing(MissingReferenceWarning),
    TenantMismatch(TenantMismatch),
}

impl Reconciler {
    pub fn new(policy: TenantPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> TenantPolicy {
        self.policy
    }

    /// Reconciles `candidates` in order and commits the store once.
    ///
    /// # Contract
    /// - Missing endpoints are skipped with a warning; the run continues.
    /// - Pairs already present (including duplicates earlier in the same
    ///   feed) are skipped without error.
    /// - `cancel` is checked before every candidate and before commit.
    ///
    /// # Errors
    /// - `ReconcileError::Persistence` for any store failure; the store is
    ///   dropped uncommitted.
    /// - `ReconcileError::Cancelled` when `cancel` fires first.
    pub fn reconcile<S: AssociationStore>(
        &self,
        candidates: &[AssociationLink],
        mut store: S,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport, ReconcileError> {
        let mut report = ReconciliationReport {
            candidates: candidates.len(),
            ..ReconciliationReport::default()
        };

        for (processed, link) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled { processed });
            }

            match self.apply_candidate(&mut store, *link)? {
                CandidateOutcome::Created { cross_tenant } => {
                    report.created += 1;
                    if let Some(mismatch) = cross_tenant {
                        report.cross_tenant += 1;
                        report.tenant_mismatches.push(mismatch);
                    }
                }
                CandidateOutcome::Existing => report.skipped_existing += 1,
                CandidateOutcome::Missing(warning) => {
                    report.skipped_missing_reference += 1;
                    report.missing_references.push(warning);
                }
                CandidateOutcome::TenantMismatch(mismatch) => {
                    report.skipped_tenant_mismatch += 1;
                    report.tenant_mismatches.push(mismatch);
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled {
                processed: candidates.len(),
            });
        }

        store.commit()?;
        Ok(report)
    }

    fn apply_candidate<S: AssociationStore>(
        &self,
        store: &mut S,
        link: AssociationLink,
    ) -> Result<CandidateOutcome, ReconcileError> {
        let employee = store.find_employee_by_id(link.employee_id)?;
        let department = store.find_department_by_id(link.department_id)?;

        let (employee, department) = match (employee, department) {
            (Some(employee), Some(department)) => (employee, department),
            (employee, department) => {
                let warning = MissingReferenceWarning {
                    employee_id: link.employee_id,
                    department_id: link.department_id,
                    employee_missing: employee.is_none(),
                    department_missing: department.is_none(),
                };
                warn!(
                    "event=association_skip module=reconcile status=skipped reason=missing_reference {} employee_missing={} department_missing={}",
                    link, warning.employee_missing, warning.department_missing
                );
                return Ok(CandidateOutcome::Missing(warning));
            }
        };

        if store.association_exists(link.employee_id, link.department_id)? {
            debug!("event=association_skip module=reconcile status=skipped reason=exists {link}");
            return Ok(CandidateOutcome::Existing);
        }

        let mismatch = (employee.tenant_id != department.tenant_id).then_some(TenantMismatch {
            employee_id: link.employee_id,
            department_id: link.department_id,
            employee_tenant_id: employee.tenant_id,
            department_tenant_id: department.tenant_id,
        });

        if let Some(mismatch) = mismatch {
            match self.policy {
                TenantPolicy::SameTenant => {
                    warn!(
                        "event=association_skip module=reconcile status=skipped reason=tenant_mismatch {} employee_tenant={} department_tenant={}",
                        link, mismatch.employee_tenant_id, mismatch.department_tenant_id
                    );
                    return Ok(CandidateOutcome::TenantMismatch(mismatch));
                }
                TenantPolicy::Permit => warn!(
                    "event=association_cross_tenant module=reconcile status=ok {} employee_tenant={} department_tenant={}",
                    link, mismatch.employee_tenant_id, mismatch.department_tenant_id
                ),
            }
        }

        match store.create_association(link.employee_id, link.department_id) {
            Ok(()) => {
                info!("event=association_create module=reconcile status=ok {link}");
                Ok(CandidateOutcome::Created {
                    cross_tenant: mismatch,
                })
            }
            Err(RepoError::AssociationExists { .. }) => Ok(CandidateOutcome::Existing),
            Err(RepoError::ReferenceMissing {
                employee_id,
                department_id,
            }) => {
                let employee_missing = store.find_employee_by_id(employee_id)?.is_none();
                let department_missing = store.find_department_by_id(department_id)?.is_none();
                warn!(
                    "event=association_skip module=reconcile status=skipped reason=reference_vanished {link}"
                );
                Ok(CandidateOutcome::Missing(MissingReferenceWarning {
                    employee_id,
                    department_id,
                    employee_missing,
                    department_missing,
                }))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ReconcileError, Reconciler, TenantPolicy};
    use crate::db::DbError;
    use crate::model::association::AssociationLink;
    use crate::model::directory::{Department, DepartmentId, Employee, EmployeeId};
    use crate::repo::association_store::AssociationStore;
    use crate::repo::directory_repo::{RepoError, RepoResult};
    use std::cell::RefCell;
    use std::collections::{BTreeMap, BTreeSet};
    use std::rc::Rc;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct Directory {
        employees: BTreeMap<EmployeeId, Employee>,
        departments: BTreeMap<DepartmentId, Department>,
        links: BTreeSet<(EmployeeId, DepartmentId)>,
    }

    /// Staging store over a shared directory; `commit` publishes staged links.
    struct FakeStore {
        directory: Rc<RefCell<Directory>>,
        staged: BTreeSet<(EmployeeId, DepartmentId)>,
        fail_commit: bool,
        vanish_on_create: bool,
    }

    impl FakeStore {
        fn new(directory: &Rc<RefCell<Directory>>) -> Self {
            Self {
                directory: Rc::clone(directory),
                staged: BTreeSet::new(),
                fail_commit: false,
                vanish_on_create: false,
            }
        }
    }

    impl AssociationStore for FakeStore {
        fn find_employee_by_id(&self, id: EmployeeId) -> RepoResult<Option<Employee>> {
            Ok(self.directory.borrow().employees.get(&id).cloned())
        }

        fn find_department_by_id(&self, id: DepartmentId) -> RepoResult<Option<Department>> {
            Ok(self.directory.borrow().departments.get(&id).cloned())
        }

        fn association_exists(
            &self,
            employee_id: EmployeeId,
            department_id: DepartmentId,
        ) -> RepoResult<bool> {
            let pair = (employee_id, department_id);
            Ok(self.staged.contains(&pair) || self.directory.borrow().links.contains(&pair))
        }

        fn create_association(
            &mut self,
            employee_id: EmployeeId,
            department_id: DepartmentId,
        ) -> RepoResult<()> {
            if self.vanish_on_create {
                self.directory.borrow_mut().employees.remove(&employee_id);
                return Err(RepoError::ReferenceMissing {
                    employee_id,
                    department_id,
                });
            }
            self.staged.insert((employee_id, department_id));
            Ok(())
        }

        fn commit(self) -> RepoResult<()> {
            if self.fail_commit {
                return Err(RepoError::Db(DbError::Sqlite(
                    rusqlite::Error::InvalidQuery,
                )));
            }
            self.directory.borrow_mut().links.extend(self.staged);
            Ok(())
        }
    }

    fn directory() -> Rc<RefCell<Directory>> {
        let mut directory = Directory::default();
        directory
            .employees
            .insert(1, Employee::new(1, "Ada", "ada@example.com", 1));
        directory
            .employees
            .insert(3, Employee::new(3, "Grace", "grace@example.com", 1));
        directory
            .employees
            .insert(5, Employee::new(5, "Linus", "linus@example.com", 2));
        directory
            .departments
            .insert(2, Department::new(2, "Research", 1));
        Rc::new(RefCell::new(directory))
    }

    fn links(pairs: &[(i64, i64)]) -> Vec<AssociationLink> {
        pairs
            .iter()
            .map(|(employee_id, department_id)| AssociationLink::new(*employee_id, *department_id))
            .collect()
    }

    #[test]
    fn duplicate_candidates_are_absorbed_and_missing_references_reported() {
        let directory = directory();
        let report = Reconciler::default()
            .reconcile(
                &links(&[(1, 2), (1, 2), (3, 4)]),
                FakeStore::new(&directory),
                &CancellationToken::new(),
            )
            .expect("run should succeed");

        assert_eq!(report.created, 1);
        assert_eq!(report.skipped(), 2);
        assert_eq!(report.skipped_existing, 1);
        assert_eq!(report.skipped_missing_reference, 1);
        let warning = report.missing_references[0];
        assert_eq!((warning.employee_id, warning.department_id), (3, 4));
        assert!(!warning.employee_missing);
        assert!(warning.department_missing);
        assert_eq!(
            directory.borrow().links.iter().copied().collect::<Vec<_>>(),
            vec![(1, 2)]
        );
    }

    #[test]
    fn commit_failure_discards_every_staged_link() {
        let directory = directory();
        let mut store = FakeStore::new(&directory);
        store.fail_commit = true;

        let err = Reconciler::default()
            .reconcile(&links(&[(1, 2), (3, 2)]), store, &CancellationToken::new())
            .expect_err("commit failure must fail the run");

        assert!(matches!(err, ReconcileError::Persistence(_)));
        assert!(directory.borrow().links.is_empty());
    }

    #[test]
    fn cancellation_stops_at_candidate_boundary_without_commit() {
        let directory = directory();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Reconciler::default()
            .reconcile(&links(&[(1, 2)]), FakeStore::new(&directory), &cancel)
            .expect_err("cancelled run");

        assert!(matches!(err, ReconcileError::Cancelled { processed: 0 }));
        assert!(directory.borrow().links.is_empty());
    }

    #[test]
    fn tenant_policy_controls_cross_tenant_links() {
        assert_eq!(Reconciler::default().policy(), TenantPolicy::Permit);
        assert_eq!(
            Reconciler::new(TenantPolicy::SameTenant).policy(),
            TenantPolicy::SameTenant
        );

        let directory = directory();
        let permissive = Reconciler::new(TenantPolicy::Permit)
            .reconcile(
                &links(&[(5, 2)]),
                FakeStore::new(&directory),
                &CancellationToken::new(),
            )
            .expect("permit run");
        assert_eq!(permissive.created, 1);
        assert_eq!(permissive.cross_tenant, 1);
        assert_eq!(permissive.tenant_mismatches[0].employee_tenant_id, 2);

        let strict_directory = self::directory();
        let strict = Reconciler::new(TenantPolicy::SameTenant)
            .reconcile(
                &links(&[(5, 2), (1, 2)]),
                FakeStore::new(&strict_directory),
                &CancellationToken::new(),
            )
            .expect("same-tenant run");
        assert_eq!(strict.created, 1);
        assert_eq!(strict.skipped_tenant_mismatch, 1);
        assert_eq!(strict.cross_tenant, 0);
        assert!(!strict_directory.borrow().links.contains(&(5, 2)));
    }

    #[test]
    fn reference_vanishing_at_write_time_is_a_warning() {
        let directory = directory();
        let mut store = FakeStore::new(&directory);
        store.vanish_on_create = true;

        let report = Reconciler::default()
            .reconcile(&links(&[(1, 2)]), store, &CancellationToken::new())
            .expect("vanished reference is not fatal");

        assert_eq!(report.created, 0);
        assert_eq!(report.skipped_missing_reference, 1);
        assert!(report.missing_references[0].employee_missing);
    }
}
