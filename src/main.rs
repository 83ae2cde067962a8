use axum::{
    Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::{IntoParams, OpenApi, ToSchema};

use trial_core::{
    CohortReport, CoreConfig, DashboardView, DocumentStore, ExportError, ExportFormat,
    InMemoryStore, PatientWithStatus, RecordView, TrialError,
};
use trial_types::{ClinicianId, PatientId};

/// Application state shared across REST API handlers
///
/// The store is the only long-lived resource; every request starts and stops its own view.
#[derive(Clone)]
struct AppState {
    store: Arc<dyn DocumentStore>,
    config: Arc<CoreConfig>,
}

#[derive(Serialize, ToSchema)]
struct HealthRes {
    status: String,
    version: String,
}

#[derive(Serialize, ToSchema)]
struct ErrorRes {
    error: String,
}

#[derive(Serialize, ToSchema)]
struct PatientSummary {
    id: String,
    patient_code: String,
    age: u32,
    gender: String,
    created_at: String,
    has_baseline: bool,
    has_follow_up: bool,
    /// `awaiting`, `in-progress` or `completed`
    status: String,
    label: String,
    action: String,
}

impl From<&PatientWithStatus> for PatientSummary {
    fn from(row: &PatientWithStatus) -> Self {
        let info = row.status();
        Self {
            id: row.patient.id.to_string(),
            patient_code: row.patient.patient_code.clone(),
            age: row.patient.age,
            gender: row.patient.gender.to_string(),
            created_at: row.patient.created_at.to_rfc3339(),
            has_baseline: row.has_baseline,
            has_follow_up: row.has_follow_up,
            status: serde_json::to_value(info.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            label: info.label.to_string(),
            action: info.action.to_string(),
        }
    }
}

#[derive(Serialize, ToSchema)]
struct StatusCountsRes {
    total: usize,
    awaiting: usize,
    in_progress: usize,
    completed: usize,
}

#[derive(Serialize, ToSchema)]
struct ListPatientsRes {
    patients: Vec<PatientSummary>,
    offset: usize,
    limit: usize,
    total: usize,
    has_more: bool,
    counts: StatusCountsRes,
    /// Assessment kinds whose existence check failed; their flags read as false.
    degraded: Vec<String>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct PageParams {
    /// Number of patients to skip
    offset: Option<usize>,
    /// Page size (defaults to TRIAL_PAGE_SIZE)
    limit: Option<usize>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ExportParams {
    /// `pdf` (default) or `csv`
    format: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorRes>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorRes {
            error: message.into(),
        }),
    )
}

#[derive(OpenApi)]
#[openapi(
    paths(health, list_patients, export_patient, cohort_report),
    components(schemas(
        HealthRes,
        ErrorRes,
        PatientSummary,
        StatusCountsRes,
        ListPatientsRes
    ))
)]
struct ApiDoc;

/// Main entry point for the trial intake REST runner
///
/// Serves the dashboard and export endpoints over an in-memory document store seeded from
/// `TRIAL_SEED_FILE`.
///
/// # Environment Variables
/// - `TRIAL_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `TRIAL_SEED_FILE`: JSON seed for the in-memory store (optional)
/// - `TRIAL_IN_FILTER_LIMIT`, `TRIAL_LOADING_TIMEOUT_MS`, `TRIAL_PAGE_SIZE`: core tuning
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("trial=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(CoreConfig::from_env_values(
        std::env::var("TRIAL_IN_FILTER_LIMIT").ok(),
        std::env::var("TRIAL_LOADING_TIMEOUT_MS").ok(),
        std::env::var("TRIAL_PAGE_SIZE").ok(),
        std::env::var("TRIAL_SEED_FILE").ok(),
    )?);

    let store = match config.seed_file() {
        Some(path) => InMemoryStore::from_seed_file(path)?,
        None => {
            tracing::warn!("TRIAL_SEED_FILE not set, starting with an empty store");
            InMemoryStore::new()
        }
    };

    let rest_addr = std::env::var("TRIAL_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    tracing::info!("++ Starting trial REST on {}", rest_addr);

    let app = router(AppState {
        store: Arc::new(store),
        config,
    });

    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/clinicians/:clinician_id/patients", get(list_patients))
        .route(
            "/clinicians/:clinician_id/patients/:patient_id/export",
            get(export_patient),
        )
        .route("/clinicians/:clinician_id/report", get(cohort_report))
        .route("/api-docs/openapi.json", get(openapi))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
async fn health() -> Json<HealthRes> {
    Json(HealthRes {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

#[utoipa::path(
    get,
    path = "/clinicians/{clinician_id}/patients",
    params(
        ("clinician_id" = String, Path, description = "Owning clinician"),
        PageParams
    ),
    responses(
        (status = 200, description = "Page of the clinician's patients with workflow status", body = ListPatientsRes),
        (status = 400, description = "Invalid clinician id", body = ErrorRes),
        (status = 503, description = "Patient subscription failed", body = ErrorRes)
    )
)]
/// List a clinician's patients with their workflow status
///
/// Starts a dashboard view, waits for its first settled snapshot and returns one page of it.
async fn list_patients(
    State(state): State<AppState>,
    Path(clinician_id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<ListPatientsRes>, ApiError> {
    let clinician = ClinicianId::new(&clinician_id)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let handle = DashboardView::start(
        Arc::clone(&state.store),
        Arc::clone(&state.config),
        clinician,
    )
    .await;
    let snapshot = handle.settled().await;
    handle.stop();

    if let Some(error) = &snapshot.error {
        tracing::error!("List patients error: {}", error);
        return Err(api_error(StatusCode::SERVICE_UNAVAILABLE, error.to_string()));
    }

    let page = snapshot.page(
        params.offset.unwrap_or(0),
        params.limit.unwrap_or(state.config.page_size()),
    );
    let counts = snapshot.counts();

    Ok(Json(ListPatientsRes {
        patients: page.patients.iter().map(PatientSummary::from).collect(),
        offset: page.offset,
        limit: page.limit,
        total: page.total,
        has_more: page.has_more,
        counts: StatusCountsRes {
            total: counts.total,
            awaiting: counts.awaiting,
            in_progress: counts.in_progress,
            completed: counts.completed,
        },
        degraded: snapshot.degraded.iter().map(|k| k.to_string()).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/clinicians/{clinician_id}/patients/{patient_id}/export",
    params(
        ("clinician_id" = String, Path, description = "Owning clinician"),
        ("patient_id" = String, Path, description = "Patient to export"),
        ExportParams
    ),
    responses(
        (status = 200, description = "Rendered case record form (PDF or CSV)"),
        (status = 400, description = "Invalid id or format", body = ErrorRes),
        (status = 404, description = "Patient not found", body = ErrorRes),
        (status = 500, description = "Rendering failed, retry", body = ErrorRes),
        (status = 503, description = "Record subscription failed or still loading", body = ErrorRes)
    )
)]
/// Export a patient's case record form
async fn export_patient(
    State(state): State<AppState>,
    Path((clinician_id, patient_id)): Path<(String, String)>,
    Query(params): Query<ExportParams>,
) -> Result<Response, ApiError> {
    let clinician = ClinicianId::new(&clinician_id)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    let patient = PatientId::new(&patient_id)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    let format: ExportFormat = match params.format.as_deref() {
        Some(raw) => raw
            .parse()
            .map_err(|e: trial_core::RenderError| api_error(StatusCode::BAD_REQUEST, e.to_string()))?,
        None => ExportFormat::default(),
    };

    let handle = RecordView::start(Arc::clone(&state.store), clinician, patient).await;
    let snapshot = handle.settled().await;
    if let Some(error) = &snapshot.error {
        tracing::error!("Export error: {}", error);
        return Err(api_error(StatusCode::SERVICE_UNAVAILABLE, error.to_string()));
    }

    let renderer = format.renderer();
    let result = handle.export(renderer.as_ref()).await;
    handle.stop();

    match result {
        Ok(rendered) => Ok((
            [
                (header::CONTENT_TYPE, rendered.content_type.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", rendered.file_name),
                ),
            ],
            rendered.bytes,
        )
            .into_response()),
        Err(ExportError::PatientNotFound) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("patient {patient_id} not found"),
        )),
        Err(e @ ExportError::MissingPatient) => {
            Err(api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

#[utoipa::path(
    get,
    path = "/clinicians/{clinician_id}/report",
    params(
        ("clinician_id" = String, Path, description = "Owning clinician")
    ),
    responses(
        (status = 200, description = "Cohort CSV of the clinician's completed patients"),
        (status = 400, description = "Invalid clinician id", body = ErrorRes),
        (status = 503, description = "Patient subscription or assessment query failed", body = ErrorRes)
    )
)]
/// Export the cohort report of a clinician's completed patients
async fn cohort_report(
    State(state): State<AppState>,
    Path(clinician_id): Path<String>,
) -> Result<Response, ApiError> {
    let clinician = ClinicianId::new(&clinician_id)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let report = CohortReport::for_clinician(
        Arc::clone(&state.store),
        Arc::clone(&state.config),
        clinician,
    )
    .await
    .map_err(|e: TrialError| {
        tracing::error!("Cohort report error: {}", e);
        api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", CohortReport::todays_file_name()),
            ),
        ],
        report.to_csv(),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn seeded_app() -> Router {
        let store = InMemoryStore::new();
        for (id, code, created) in [
            ("p1", "PT001", "2025-01-01T00:00:00Z"),
            ("p2", "PT002", "2025-02-01T00:00:00Z"),
        ] {
            store.set(
                "patients",
                id,
                json!({
                    "doctorId": "doc-1",
                    "patientCode": code,
                    "age": 60,
                    "gender": "Other",
                    "durationOfDiabetes": 10,
                    "createdAt": created
                }),
            );
        }
        store.set(
            "baselineData",
            "b1",
            json!({
                "patientId": "p1",
                "hba1c": 8.2,
                "fpg": 155,
                "weight": 77,
                "bloodPressureSystolic": 134,
                "bloodPressureDiastolic": 84,
                "createdAt": "2025-01-01T10:00:00Z"
            }),
        );

        router(AppState {
            store: Arc::new(store),
            config: Arc::new(CoreConfig::default()),
        })
    }

    async fn get(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = get(seeded_app(), "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn lists_patients_with_status() {
        let response = get(seeded_app(), "/clinicians/doc-1/patients").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["has_more"], false);
        assert_eq!(body["patients"][0]["patient_code"], "PT002");
        assert_eq!(body["patients"][0]["status"], "awaiting");
        assert_eq!(body["patients"][1]["status"], "in-progress");
        assert_eq!(body["patients"][1]["label"], "Follow-up Pending");
        assert_eq!(body["counts"]["in_progress"], 1);
    }

    #[tokio::test]
    async fn paginates_patients() {
        let response = get(seeded_app(), "/clinicians/doc-1/patients?offset=0&limit=1").await;
        let body = json_body(response).await;
        assert_eq!(body["patients"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["has_more"], true);
    }

    #[tokio::test]
    async fn rejects_blank_clinician_id() {
        let response = get(seeded_app(), "/clinicians/%20/patients").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn exports_csv() {
        let response = get(seeded_app(), "/clinicians/doc-1/patients/p1/export?format=csv").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"CRF_PT001.csv\""
        );

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let csv = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(csv.contains("FOLLOW-UP ASSESSMENT (END OF STUDY)\nNot recorded\n"));
    }

    #[tokio::test]
    async fn export_of_unknown_patient_is_not_found() {
        let response = get(seeded_app(), "/clinicians/doc-1/patients/missing/export").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn export_rejects_unknown_format() {
        let response = get(seeded_app(), "/clinicians/doc-1/patients/p1/export?format=xlsx").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cohort_report_lists_completed_patients() {
        let store = InMemoryStore::new();
        store.set(
            "patients",
            "p1",
            json!({
                "doctorId": "doc-1",
                "patientCode": "PT001",
                "age": 60,
                "gender": "Female",
                "durationOfDiabetes": 10,
                "createdAt": "2025-01-01T00:00:00Z"
            }),
        );
        for (collection, id, hba1c) in [("baselineData", "b1", 8.2), ("followUpData", "f1", 7.0)] {
            store.set(
                collection,
                id,
                json!({
                    "patientId": "p1",
                    "hba1c": hba1c,
                    "fpg": 150,
                    "weight": 77,
                    "bloodPressureSystolic": 130,
                    "bloodPressureDiastolic": 80,
                    "createdAt": "2025-01-01T10:00:00Z"
                }),
            );
        }
        let app = router(AppState {
            store: Arc::new(store),
            config: Arc::new(CoreConfig::default()),
        });

        let response = get(app, "/clinicians/doc-1/report").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let csv = String::from_utf8(bytes.to_vec()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Patient Code,Age,Gender"));
        assert!(lines[1].starts_with("PT001,60,Female,10,8.2,7,-1.2,"));
    }

    #[tokio::test]
    async fn cohort_report_without_completed_patients_is_header_only() {
        let response = get(seeded_app(), "/clinicians/doc-1/report").await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(String::from_utf8(bytes.to_vec()).unwrap().lines().count(), 1);
    }

    #[tokio::test]
    async fn serves_openapi_document() {
        let response = get(seeded_app(), "/api-docs/openapi.json").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["paths"]["/clinicians/{clinician_id}/patients"].is_object());
    }
}
