//! Association store contract and the SQLite run-scoped adapter.
//!
//! # Responsibility
//! - Expose the narrow store API the reconciler consumes.
//! - Hold one write transaction for the lifetime of a reconciliation run.
//!
//! # Invariants
//! - Nothing written through the store is visible to others before `commit`.
//! - Dropping the store without `commit` rolls back every write of the run.
//! - `create_association` re-checks both endpoints inside the transaction.

use crate::model::directory::{Department, DepartmentId, Employee, EmployeeId};
use crate::repo::directory_repo::{
    ensure_directory_connection_ready, find_department, find_employee, RepoError, RepoResult,
};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};

/// Store operations used by one reconciliation run.
///
/// Implementations are scoped handles: acquired at run start, consumed by
/// `commit`, and released on every other exit path by `Drop`.
pub trait AssociationStore {
    fn find_employee_by_id(&self, id: EmployeeId) -> RepoResult<Option<Employee>>;
    fn find_department_by_id(&self, id: DepartmentId) -> RepoResult<Option<Department>>;
    fn association_exists(
        &self,
        employee_id: EmployeeId,
        department_id: DepartmentId,
    ) -> RepoResult<bool>;
    /// Stages one new link.
    ///
    /// # Errors
    /// - `RepoError::AssociationExists` when the pair is already present.
    /// - `RepoError::ReferenceMissing` when an endpoint no longer exists.
    fn create_association(
        &mut self,
        employee_id: EmployeeId,
        department_id: DepartmentId,
    ) -> RepoResult<()>;
    /// Makes every staged link durable at once.
    fn commit(self) -> RepoResult<()>
    where
        Self: Sized;
}

/// SQLite store holding an `IMMEDIATE` transaction.
///
/// The write lock is taken when the store is opened, so CRUD writers on other
/// connections wait (up to the connection busy timeout) until the run commits
/// or rolls back. Existence checks and writes therefore see one snapshot.
pub struct SqliteAssociationStore<'conn> {
    tx: Transaction<'conn>,
    staged: usize,
}

impl<'conn> SqliteAssociationStore<'conn> {
    /// Begins the run transaction on a migrated connection.
    pub fn begin(conn: &'conn mut Connection) -> RepoResult<Self> {
        ensure_directory_connection_ready(conn)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(Self { tx, staged: 0 })
    }

    /// Number of links staged so far in this transaction.
    pub fn staged(&self) -> usize {
        self.staged
    }
}

impl AssociationStore for SqliteAssociationStore<'_> {
    fn find_employee_by_id(&self, id: EmployeeId) -> RepoResult<Option<Employee>> {
        find_employee(&self.tx, id)
    }

    fn find_department_by_id(&self, id: DepartmentId) -> RepoResult<Option<Department>> {
        find_department(&self.tx, id)
    }

    fn association_exists(
        &self,
        employee_id: EmployeeId,
        department_id: DepartmentId,
    ) -> RepoResult<bool> {
        let exists: i64 = self.tx.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM employee_departments
                WHERE employee_id = ?1 AND department_id = ?2
            );",
            params![employee_id, department_id],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn create_association(
        &mut self,
        employee_id: EmployeeId,
        department_id: DepartmentId,
    ) -> RepoResult<()> {
        let changed = self.tx.execute(
            "INSERT OR IGNORE INTO employee_departments (employee_id, department_id)
             SELECT ?1, ?2
             WHERE EXISTS (SELECT 1 FROM employees WHERE id = ?1)
               AND EXISTS (SELECT 1 FROM departments WHERE id = ?2);",
            params![employee_id, department_id],
        )?;

        if changed == 1 {
            self.staged += 1;
            return Ok(());
        }

        if self.association_exists(employee_id, department_id)? {
            Err(RepoError::AssociationExists {
                employee_id,
                department_id,
            })
        } else {
            Err(RepoError::ReferenceMissing {
                employee_id,
                department_id,
            })
        }
    }

    fn commit(self) -> RepoResult<()> {
        self.tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AssociationStore, SqliteAssociationStore};
    use crate::db::open_db_in_memory;
    use crate::model::directory::{Department, Employee};
    use crate::repo::directory_repo::{DirectoryRepository, RepoError, SqliteDirectoryRepository};

    fn seeded() -> rusqlite::Connection {
        let conn = open_db_in_memory().expect("in-memory db");
        {
            let repo = SqliteDirectoryRepository::try_new(&conn).expect("repo");
            repo.create_employee(&Employee::new(1, "Ada", "ada@example.com", 1))
                .expect("employee");
            repo.create_department(&Department::new(2, "Research", 1))
                .expect("department");
        }
        conn
    }

    #[test]
    fn dropped_store_rolls_back_staged_links() {
        let mut conn = seeded();
        {
            let mut store = SqliteAssociationStore::begin(&mut conn).expect("begin");
            store.create_association(1, 2).expect("stage");
            assert_eq!(store.staged(), 1);
            assert!(store.association_exists(1, 2).expect("exists"));
        }

        let repo = SqliteDirectoryRepository::try_new(&conn).expect("repo");
        assert_eq!(repo.count_associations().expect("count"), 0);
    }

    #[test]
    fn create_distinguishes_existing_pair_from_missing_endpoint() {
        let mut conn = seeded();
        let mut store = SqliteAssociationStore::begin(&mut conn).expect("begin");
        store.create_association(1, 2).expect("first insert");

        let duplicate = store.create_association(1, 2).expect_err("duplicate");
        assert!(matches!(
            duplicate,
            RepoError::AssociationExists {
                employee_id: 1,
                department_id: 2
            }
        ));

        let missing = store.create_association(1, 40).expect_err("missing department");
        assert!(matches!(
            missing,
            RepoError::ReferenceMissing {
                employee_id: 1,
                department_id: 40
            }
        ));

        store.commit().expect("commit");
        let repo = SqliteDirectoryRepository::try_new(&conn).expect("repo");
        assert_eq!(repo.count_associations().expect("count"), 1);
    }

    #[test]
    fn begin_rejects_unmigrated_connection() {
        let mut conn = rusqlite::Connection::open_in_memory().expect("raw connection");
        let err = SqliteAssociationStore::begin(&mut conn)
            .err()
            .expect("unmigrated connection must be rejected");
        assert!(matches!(
            err,
            RepoError::UninitializedConnection {
                actual_version: 0,
                ..
            }
        ));
    }
}
