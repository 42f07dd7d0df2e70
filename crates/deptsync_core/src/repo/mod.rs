//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the store contract the reconciler writes through.
//! - Isolate SQLite query details from run orchestration.
//!
//! # Invariants
//! - Directory writes enforce `validate()` before persistence.
//! - Repository APIs return semantic errors (`EmployeeNotFound`,
//!   `ReferenceMissing`, ...) in addition to DB transport errors.

pub mod association_store;
pub mod directory_repo;
