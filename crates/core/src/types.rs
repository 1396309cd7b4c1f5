use serde::{Deserialize, Serialize};

/// Employee record as exchanged over the API and persisted in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub employee_id: String,
    pub name: String,
    pub department: String,
    pub salary: i64,
    /// Caller supplied; stored and compared as an opaque string.
    pub joining_date: String,
    pub skills: Vec<String>,
}

/// Partial update payload. `None` means the field was not supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joining_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
}

impl EmployeeUpdate {
    /// Returns `true` when no field was supplied.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.department.is_none()
            && self.salary.is_none()
            && self.joining_date.is_none()
            && self.skills.is_none()
    }
}

/// Average salary of one department.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentSalary {
    pub department: String,
    pub avg_salary: f64,
}

/// Rounds to two decimal places, sending exact ties to the even digit.
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}
