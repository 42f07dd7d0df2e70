//! Directory repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide the CRUD-side persistence the reconciler's collaborators use:
//!   employees, departments and read access to persisted associations.
//! - Keep SQL details inside the store boundary.
//!
//! # Invariants
//! - Write paths call `validate()` before SQL mutations.
//! - Deleting an employee or department cascades to its join rows; that is
//!   the CRUD side's deletion, never the reconciler's.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::association::EmployeeDepartment;
use crate::model::directory::{
    Department, DepartmentId, Employee, EmployeeId, ModelValidationError,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub(crate) const EMPLOYEE_SELECT_SQL: &str = "SELECT
    id,
    name,
    email,
    tenant_id
FROM employees";

pub(crate) const DEPARTMENT_SELECT_SQL: &str = "SELECT
    id,
    department_name,
    tenant_id
FROM departments";

const REQUIRED_TABLES: &[&str] = &["employees", "departments", "employee_departments"];

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for directory and association persistence.
#[derive(Debug)]
pub enum RepoError {
    Validation(ModelValidationError),
    Db(DbError),
    EmployeeNotFound(EmployeeId),
    DepartmentNotFound(DepartmentId),
    /// An employee or department with this id already exists.
    Conflict(String),
    /// The exact pair is already persisted.
    AssociationExists {
        employee_id: EmployeeId,
        department_id: DepartmentId,
    },
    /// An endpoint of the link disappeared before the write landed.
    ReferenceMissing {
        employee_id: EmployeeId,
        department_id: DepartmentId,
    },
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::EmployeeNotFound(id) => write!(f, "employee not found: {id}"),
            Self::DepartmentNotFound(id) => write!(f, "department not found: {id}"),
            Self::Conflict(message) => write!(f, "conflict: {message}"),
            Self::AssociationExists {
                employee_id,
                department_id,
            } => write!(
                f,
                "association already exists: employee {employee_id} -> department {department_id}"
            ),
            Self::ReferenceMissing {
                employee_id,
                department_id,
            } => write!(
                f,
                "association endpoint missing: employee {employee_id} -> department {department_id}"
            ),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "directory store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "directory store requires table `{table}`")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ModelValidationError> for RepoError {
    fn from(value: ModelValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for the directory tables.
pub trait DirectoryRepository {
    fn create_employee(&self, employee: &Employee) -> RepoResult<EmployeeId>;
    fn get_employee(&self, id: EmployeeId) -> RepoResult<Option<Employee>>;
    fn delete_employee(&self, id: EmployeeId) -> RepoResult<()>;
    fn create_department(&self, department: &Department) -> RepoResult<DepartmentId>;
    fn get_department(&self, id: DepartmentId) -> RepoResult<Option<Department>>;
    fn delete_department(&self, id: DepartmentId) -> RepoResult<()>;
    /// Lists persisted links ordered by `(employee_id, department_id)`.
    fn list_associations(&self) -> RepoResult<Vec<EmployeeDepartment>>;
    fn count_associations(&self) -> RepoResult<u64>;
}

/// SQLite-backed directory repository.
pub struct SqliteDirectoryRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteDirectoryRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_directory_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl DirectoryRepository for SqliteDirectoryRepository<'_> {
    fn create_employee(&self, employee: &Employee) -> RepoResult<EmployeeId> {
        employee.validate()?;

        self.conn
            .execute(
                "INSERT INTO employees (id, name, email, tenant_id)
                 VALUES (?1, ?2, ?3, ?4);",
                params![
                    employee.id,
                    employee.name.trim(),
                    employee.email.trim(),
                    employee.tenant_id,
                ],
            )
            .map_err(|err| map_conflict(err, format!("employee {} exists", employee.id)))?;

        Ok(employee.id)
    }

    fn get_employee(&self, id: EmployeeId) -> RepoResult<Option<Employee>> {
        find_employee(self.conn, id)
    }

    fn delete_employee(&self, id: EmployeeId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM employees WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::EmployeeNotFound(id));
        }
        Ok(())
    }

    fn create_department(&self, department: &Department) -> RepoResult<DepartmentId> {
        department.validate()?;

        self.conn
            .execute(
                "INSERT INTO departments (id, department_name, tenant_id)
                 VALUES (?1, ?2, ?3);",
                params![
                    department.id,
                    department.department_name.trim(),
                    department.tenant_id,
                ],
            )
            .map_err(|err| map_conflict(err, format!("department {} exists", department.id)))?;

        Ok(department.id)
    }

    fn get_department(&self, id: DepartmentId) -> RepoResult<Option<Department>> {
        find_department(self.conn, id)
    }

    fn delete_department(&self, id: DepartmentId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM departments WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::DepartmentNotFound(id));
        }
        Ok(())
    }

    fn list_associations(&self) -> RepoResult<Vec<EmployeeDepartment>> {
        let mut stmt = self.conn.prepare(
            "SELECT employee_id, department_id
             FROM employee_departments
             ORDER BY employee_id ASC, department_id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut links = Vec::new();
        while let Some(row) = rows.next()? {
            links.push(EmployeeDepartment {
                employee_id: row.get("employee_id")?,
                department_id: row.get("department_id")?,
            });
        }
        Ok(links)
    }

    fn count_associations(&self) -> RepoResult<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM employee_departments;", [], |row| {
                    row.get(0)
                })?;
        Ok(count.max(0) as u64)
    }
}

pub(crate) fn find_employee(conn: &Connection, id: EmployeeId) -> RepoResult<Option<Employee>> {
    let employee = conn
        .query_row(
            &format!("{EMPLOYEE_SELECT_SQL} WHERE id = ?1;"),
            [id],
            parse_employee_row,
        )
        .optional()?;
    Ok(employee)
}

pub(crate) fn find_department(
    conn: &Connection,
    id: DepartmentId,
) -> RepoResult<Option<Department>> {
    let department = conn
        .query_row(
            &format!("{DEPARTMENT_SELECT_SQL} WHERE id = ?1;"),
            [id],
            parse_department_row,
        )
        .optional()?;
    Ok(department)
}

fn parse_employee_row(row: &Row<'_>) -> rusqlite::Result<Employee> {
    Ok(Employee {
        id: row.get("id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        tenant_id: row.get("tenant_id")?,
    })
}

fn parse_department_row(row: &Row<'_>) -> rusqlite::Result<Department> {
    Ok(Department {
        id: row.get("id")?,
        department_name: row.get("department_name")?,
        tenant_id: row.get("tenant_id")?,
    })
}

fn map_conflict(err: rusqlite::Error, message: String) -> RepoError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => RepoError::Conflict(message),
        _ => RepoError::from(err),
    }
}

/// Rejects connections that were not opened through `db::open_db*`.
pub(crate) fn ensure_directory_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in REQUIRED_TABLES {
        if !table_exists(conn, table)? {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
