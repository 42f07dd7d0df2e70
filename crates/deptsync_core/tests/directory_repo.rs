use deptsync_core::db::open_db_in_memory;
use deptsync_core::{
    AssociationStore, Department, DirectoryRepository, Employee, EmployeeDepartment,
    ModelValidationError, RepoError, SqliteAssociationStore, SqliteDirectoryRepository,
};
use tokio_util::sync::CancellationToken;

#[test]
fn create_and_get_employee_and_department() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteDirectoryRepository::try_new(&conn).unwrap();

    repo.create_employee(&Employee::new(1, "Ada", "ada@example.com", 10))
        .unwrap();
    repo.create_department(&Department::new(2, "Research", 10))
        .unwrap();

    let employee = repo.get_employee(1).unwrap().unwrap();
    assert_eq!(employee.name, "Ada");
    assert_eq!(employee.tenant_id, 10);
    let department = repo.get_department(2).unwrap().unwrap();
    assert_eq!(department.department_name, "Research");
    assert!(repo.get_employee(99).unwrap().is_none());
}

#[test]
fn create_employee_rejects_invalid_email_and_duplicate_id() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteDirectoryRepository::try_new(&conn).unwrap();

    let err = repo
        .create_employee(&Employee::new(1, "Ada", "not-an-email", 10))
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ModelValidationError::InvalidEmail(_))
    ));

    repo.create_employee(&Employee::new(1, "Ada", "ada@example.com", 10))
        .unwrap();
    let err = repo
        .create_employee(&Employee::new(1, "Other", "other@example.com", 10))
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict(_)));
}

#[test]
fn delete_missing_rows_returns_not_found() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteDirectoryRepository::try_new(&conn).unwrap();

    assert!(matches!(
        repo.delete_employee(7).unwrap_err(),
        RepoError::EmployeeNotFound(7)
    ));
    assert!(matches!(
        repo.delete_department(8).unwrap_err(),
        RepoError::DepartmentNotFound(8)
    ));
}

#[test]
fn deleting_employee_cascades_to_links() {
    let mut conn = open_db_in_memory().unwrap();
    {
        let repo = SqliteDirectoryRepository::try_new(&conn).unwrap();
        repo.create_employee(&Employee::new(1, "Ada", "ada@example.com", 10))
            .unwrap();
        repo.create_department(&Department::new(2, "Research", 10))
            .unwrap();
    }

    let report = deptsync_core::Reconciler::default()
        .reconcile(
            &[deptsync_core::AssociationLink::new(1, 2)],
            SqliteAssociationStore::begin(&mut conn).unwrap(),
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(report.created, 1);

    let repo = SqliteDirectoryRepository::try_new(&conn).unwrap();
    assert_eq!(
        repo.list_associations().unwrap(),
        vec![EmployeeDepartment {
            employee_id: 1,
            department_id: 2
        }]
    );

    repo.delete_employee(1).unwrap();
    assert_eq!(repo.count_associations().unwrap(), 0);
}

#[test]
fn association_store_reads_directory_rows_inside_transaction() {
    let mut conn = open_db_in_memory().unwrap();
    {
        let repo = SqliteDirectoryRepository::try_new(&conn).unwrap();
        repo.create_employee(&Employee::new(4, "Grace", "grace@example.com", 3))
            .unwrap();
    }

    let store = SqliteAssociationStore::begin(&mut conn).unwrap();
    assert_eq!(
        store.find_employee_by_id(4).unwrap().map(|employee| employee.tenant_id),
        Some(3)
    );
    assert!(store.find_department_by_id(4).unwrap().is_none());
    assert!(!store.association_exists(4, 4).unwrap());
}
