//! Domain types shared by the storage layer and the HTTP handlers.
pub mod types;

pub use types::{round_cents, DepartmentSalary, Employee, EmployeeUpdate};
