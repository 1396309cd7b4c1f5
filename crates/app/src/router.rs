use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use staffdir_storage::Database;

use crate::{employees, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, storage: Database) -> Self {
        Self { metrics, storage }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route(
            "/employees",
            post(employees::create).get(employees::list_by_department),
        )
        .route("/employees/salary/avg-salary", get(employees::average_salary))
        .route("/employees/search", get(employees::search_by_skill))
        .route(
            "/employees/:employee_id",
            get(employees::fetch)
                .put(employees::update)
                .delete(employees::remove),
        )
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
