use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use staffdir_storage::EmployeeError;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
}

/// `application/problem+json` error body.
pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
            },
        }
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

/// Failures surfaced by the employee endpoints. The display text is the problem detail.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Employee ID already exists")]
    AlreadyExists,
    #[error("Employee not found")]
    EmployeeNotFound,
    #[error("No employees found for the specified department")]
    NoDepartmentMembers,
    #[error("No employees found with skill: {0}")]
    NoSkillMatches(String),
    #[error("No departments found")]
    NoDepartments,
    #[error("No fields provided for update")]
    EmptyUpdate,
    #[error("Employee storage is unavailable")]
    Storage(#[source] EmployeeError),
}

impl ApiError {
    /// Label used for the `result` dimension of request metrics.
    pub fn result_label(&self) -> &'static str {
        match self {
            Self::AlreadyExists => "conflict",
            Self::EmployeeNotFound
            | Self::NoDepartmentMembers
            | Self::NoSkillMatches(_)
            | Self::NoDepartments => "not_found",
            Self::EmptyUpdate => "bad_request",
            Self::Storage(_) => "error",
        }
    }

    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            // Duplicate ids surface as 400, not 409.
            Self::AlreadyExists => (StatusCode::BAD_REQUEST, "employee_exists"),
            Self::EmployeeNotFound => (StatusCode::NOT_FOUND, "employee_not_found"),
            Self::NoDepartmentMembers | Self::NoSkillMatches(_) => {
                (StatusCode::NOT_FOUND, "employees_not_found")
            }
            Self::NoDepartments => (StatusCode::NOT_FOUND, "departments_not_found"),
            Self::EmptyUpdate => (StatusCode::BAD_REQUEST, "empty_update"),
            Self::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl From<EmployeeError> for ApiError {
    fn from(err: EmployeeError) -> Self {
        match err {
            EmployeeError::AlreadyExists => Self::AlreadyExists,
            EmployeeError::EmptyUpdate => Self::EmptyUpdate,
            other => Self::Storage(other),
        }
    }
}

impl From<ApiError> for ProblemResponse {
    fn from(err: ApiError) -> Self {
        let (status, problem_type) = err.status_and_type();
        ProblemResponse::new(status, problem_type, err.to_string())
    }
}
