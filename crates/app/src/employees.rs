use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use staffdir_core::types::{DepartmentSalary, Employee, EmployeeUpdate};

use crate::problem::{ApiError, ProblemResponse};
use crate::router::AppState;
use crate::telemetry;

#[derive(Debug, Deserialize)]
pub struct DepartmentQuery {
    pub department: String,
}

#[derive(Debug, Deserialize)]
pub struct SkillQuery {
    pub skill: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

impl MessageResponse {
    fn new(message: &'static str) -> Json<Self> {
        Json(Self { message })
    }
}

pub async fn create(
    State(state): State<AppState>,
    Json(employee): Json<Employee>,
) -> Result<Json<MessageResponse>, ProblemResponse> {
    let outcome = state
        .storage()
        .employees()
        .insert(&employee)
        .await
        .map_err(ApiError::from);

    if outcome.is_ok() {
        info!(stage = "api", employee_id = %employee.employee_id, "employee created");
    }
    respond(
        "create",
        outcome.map(|()| MessageResponse::new("Employee created successfully")),
    )
}

pub async fn fetch(
    State(state): State<AppState>,
    Path(employee_id): Path<String>,
) -> Result<Json<Employee>, ProblemResponse> {
    let outcome = match state.storage().employees().fetch(&employee_id).await {
        Ok(Some(employee)) => Ok(Json(employee)),
        Ok(None) => Err(ApiError::EmployeeNotFound),
        Err(err) => Err(err.into()),
    };
    respond("fetch", outcome)
}

pub async fn list_by_department(
    State(state): State<AppState>,
    Query(query): Query<DepartmentQuery>,
) -> Result<Json<Vec<Employee>>, ProblemResponse> {
    let outcome = match state
        .storage()
        .employees()
        .list_by_department(&query.department)
        .await
    {
        Ok(employees) if employees.is_empty() => Err(ApiError::NoDepartmentMembers),
        Ok(employees) => Ok(Json(employees)),
        Err(err) => Err(err.into()),
    };
    respond("list_by_department", outcome)
}

pub async fn search_by_skill(
    State(state): State<AppState>,
    Query(query): Query<SkillQuery>,
) -> Result<Json<Vec<Employee>>, ProblemResponse> {
    let result = state.storage().employees().search_by_skill(&query.skill).await;
    let outcome = match result {
        Ok(employees) if employees.is_empty() => Err(ApiError::NoSkillMatches(query.skill)),
        Ok(employees) => Ok(Json(employees)),
        Err(err) => Err(err.into()),
    };
    respond("search_by_skill", outcome)
}

pub async fn update(
    State(state): State<AppState>,
    Path(employee_id): Path<String>,
    Json(update): Json<EmployeeUpdate>,
) -> Result<Json<MessageResponse>, ProblemResponse> {
    let outcome = if update.is_empty() {
        Err(ApiError::EmptyUpdate)
    } else {
        match state.storage().employees().update(&employee_id, &update).await {
            Ok(true) => {
                info!(stage = "api", employee_id = %employee_id, "employee updated");
                Ok(MessageResponse::new("Employee updated successfully"))
            }
            Ok(false) => Err(ApiError::EmployeeNotFound),
            Err(err) => Err(err.into()),
        }
    };
    respond("update", outcome)
}

pub async fn remove(
    State(state): State<AppState>,
    Path(employee_id): Path<String>,
) -> Result<Json<MessageResponse>, ProblemResponse> {
    let outcome = match state.storage().employees().delete(&employee_id).await {
        Ok(true) => {
            info!(stage = "api", employee_id = %employee_id, "employee deleted");
            Ok(MessageResponse::new("Employee deleted successfully"))
        }
        Ok(false) => Err(ApiError::EmployeeNotFound),
        Err(err) => Err(err.into()),
    };
    respond("delete", outcome)
}

pub async fn average_salary(
    State(state): State<AppState>,
) -> Result<Json<Vec<DepartmentSalary>>, ProblemResponse> {
    let outcome = match state
        .storage()
        .employees()
        .average_salary_by_department()
        .await
    {
        Ok(averages) if averages.is_empty() => Err(ApiError::NoDepartments),
        Ok(averages) => Ok(Json(averages)),
        Err(err) => Err(err.into()),
    };
    respond("average_salary", outcome)
}

/// Records the request metric and converts failures into problem responses.
fn respond<T>(op: &'static str, outcome: Result<T, ApiError>) -> Result<T, ProblemResponse> {
    match outcome {
        Ok(value) => {
            telemetry::record_request(op, "ok");
            Ok(value)
        }
        Err(err) => {
            telemetry::record_request(op, err.result_label());
            if let ApiError::Storage(source) = &err {
                error!(stage = "storage", op, error = %source, "employee storage operation failed");
            }
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        response::Response,
        Router,
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use staffdir_storage::Database;

    use crate::router::{app_router, AppState};
    use crate::telemetry;

    async fn setup_app() -> Router {
        let metrics = telemetry::init_metrics().expect("metrics init");
        let database = Database::connect("sqlite::memory:")
            .await
            .expect("connect");
        database.run_migrations().await.expect("migrations");
        app_router(AppState::new(metrics, database))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        app.clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("handler should respond")
    }

    async fn json_body(response: Response) -> Value {
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        serde_json::from_slice(&collected.to_bytes()).expect("json body")
    }

    fn employee(id: &str, department: &str, salary: i64, joined: &str, skills: &[&str]) -> Value {
        json!({
            "employee_id": id,
            "name": format!("Employee {id}"),
            "department": department,
            "salary": salary,
            "joining_date": joined,
            "skills": skills,
        })
    }

    async fn create(app: &Router, body: Value) {
        let response = send(app, Method::POST, "/employees", Some(body)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_then_fetch_returns_same_fields() {
        let app = setup_app().await;
        let record = employee("E1", "Engineering", 120, "2023-01-01", &["Rust", "SQL"]);

        let response = send(&app, Method::POST, "/employees", Some(record.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"message": "Employee created successfully"})
        );

        let response = send(&app, Method::GET, "/employees/E1", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, record);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let app = setup_app().await;
        create(&app, employee("E1", "Engineering", 120, "2023-01-01", &[])).await;

        let response = send(
            &app,
            Method::POST,
            "/employees",
            Some(employee("E1", "Sales", 90, "2024-01-01", &[])),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["detail"], "Employee ID already exists");
    }

    #[tokio::test]
    async fn fetch_missing_is_not_found() {
        let app = setup_app().await;
        let response = send(&app, Method::GET, "/employees/nobody", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["detail"], "Employee not found");
    }

    #[tokio::test]
    async fn partial_update_keeps_other_fields() {
        let app = setup_app().await;
        create(&app, employee("E1", "Engineering", 120, "2023-01-01", &["Rust"])).await;

        let response = send(
            &app,
            Method::PUT,
            "/employees/E1",
            Some(json!({"salary": 150, "name": null})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"message": "Employee updated successfully"})
        );

        let response = send(&app, Method::GET, "/employees/E1", None).await;
        let body = json_body(response).await;
        assert_eq!(body["salary"], 150);
        assert_eq!(body["name"], "Employee E1");
        assert_eq!(body["department"], "Engineering");
        assert_eq!(body["joining_date"], "2023-01-01");
        assert_eq!(body["skills"], json!(["Rust"]));
    }

    #[tokio::test]
    async fn empty_update_is_bad_request() {
        let app = setup_app().await;
        create(&app, employee("E1", "Engineering", 120, "2023-01-01", &[])).await;

        let response = send(&app, Method::PUT, "/employees/E1", Some(json!({}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["detail"],
            "No fields provided for update"
        );

        // Empty payload wins over a missing id.
        let response = send(
            &app,
            Method::PUT,
            "/employees/nobody",
            Some(json!({"skills": null})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let app = setup_app().await;
        let response = send(
            &app,
            Method::PUT,
            "/employees/nobody",
            Some(json!({"department": "Sales"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_then_fetch_is_not_found() {
        let app = setup_app().await;
        create(&app, employee("E1", "Engineering", 120, "2023-01-01", &[])).await;

        let response = send(&app, Method::DELETE, "/employees/E1", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"message": "Employee deleted successfully"})
        );

        let response = send(&app, Method::GET, "/employees/E1", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&app, Method::DELETE, "/employees/E1", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn department_listing_returns_latest_join_first() {
        let app = setup_app().await;
        create(&app, employee("E1", "Engineering", 100, "2023-01-01", &[])).await;
        create(&app, employee("E2", "Engineering", 100, "2023-06-01", &[])).await;
        create(&app, employee("S1", "Sales", 100, "2024-01-01", &[])).await;

        let response = send(&app, Method::GET, "/employees?department=Engineering", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let dates: Vec<_> = body
            .as_array()
            .expect("array")
            .iter()
            .map(|e| e["joining_date"].as_str().expect("date").to_string())
            .collect();
        assert_eq!(dates, vec!["2023-06-01", "2023-01-01"]);

        let response = send(&app, Method::GET, "/employees?department=Legal", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(response).await["detail"],
            "No employees found for the specified department"
        );
    }

    #[tokio::test]
    async fn department_listing_requires_query() {
        let app = setup_app().await;
        let response = send(&app, Method::GET, "/employees", None).await;
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn skill_search_matches_and_reports_missing() {
        let app = setup_app().await;
        create(&app, employee("E1", "Engineering", 100, "2023-01-01", &["C++", "Rust"])).await;
        create(&app, employee("E2", "Data", 100, "2023-01-01", &["Python"])).await;

        let query = serde_urlencoded::to_string([("skill", "C++")]).expect("encode query");
        let response = send(&app, Method::GET, &format!("/employees/search?{query}"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let matches = body.as_array().expect("array");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["employee_id"], "E1");
        assert!(matches[0].get("id").is_none());

        let response = send(&app, Method::GET, "/employees/search?skill=COBOL", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(response).await["detail"],
            "No employees found with skill: COBOL"
        );
    }

    #[tokio::test]
    async fn average_salary_by_department() {
        let app = setup_app().await;

        let response = send(&app, Method::GET, "/employees/salary/avg-salary", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["detail"], "No departments found");

        for (id, salary) in [("E1", 10), ("E2", 20), ("E3", 30)] {
            create(&app, employee(id, "Engineering", salary, "2023-01-01", &[])).await;
        }
        for (id, salary) in [("S1", 10), ("S2", 11), ("S3", 11)] {
            create(&app, employee(id, "Sales", salary, "2023-01-01", &[])).await;
        }

        let response = send(&app, Method::GET, "/employees/salary/avg-salary", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!([
                {"department": "Engineering", "avg_salary": 20.0},
                {"department": "Sales", "avg_salary": 10.67},
            ])
        );
    }
}
