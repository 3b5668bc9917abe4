// serve.rs — `dt serve`: HTTP JSON API over the distribution engine.
//
// Exposes every engine operation as an endpoint using `axum` + `tokio`.
// All responses use Content-Type: application/json. Error mapping:
// validation -> 400, missing entities -> 404, state conflicts (illegal
// transitions, closed executions, concurrent modification) -> 409.
//
// Mutating requests may carry an `X-Actor` header naming the operator;
// without one, audit entries fall back to the configured default actor.
//
// Endpoints:
// - GET    /health
// - GET    /schedules
// - POST   /executions                         {schedule_id, notes?}
// - GET    /executions?status=&search=&from=&to=
// - GET    /executions/{id}
// - PATCH  /executions/{id}/progress           {portions?, beneficiaries?, notes?}
// - POST   /executions/{id}/complete           {notes?}
// - POST   /executions/{id}/cancel             {reason}
// - DELETE /executions/{id}
// - POST   /executions/{id}/weather
// - GET    /executions/{id}/deliveries
// - GET    /statistics?from=&to=
// - GET    /deliveries/{id}
// - POST   /deliveries/{id}/start              {latitude, longitude, speed_kmh?}
// - POST   /deliveries/{id}/track
// - POST   /deliveries/{id}/arrive
// - POST   /deliveries/{id}/complete           {portions_delivered, ...}
// - POST   /deliveries/{id}/fail               {reason}
// - POST   /deliveries/{id}/photos
// - PUT    /deliveries/{id}/signature
// - DELETE /deliveries/{id}/signature
// - GET    /deliveries/{id}/tracking
// - POST   /issues
// - POST   /issues/{id}/resolve                {notes}
// - GET    /issues?execution_id=&severity=&resolved=
// - GET    /issues/summary?execution_id=
// - GET    /audit/{entity_id}?action=&limit=&offset=
// - GET    /audit-verify

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use dt_audit::{AuditAction, AuditFilter, AuditTrail};
use dt_execution::{
    CompleteDeliveryRequest, DistConfig, DistributionService, ExecutionError, ExecutionFilter,
    ExecutionStatus, FileScheduleProvider, PhotoType, ProgressUpdate, QualityCheck, Signature,
    TrackingPoint, Weather,
};
use dt_issue::{Issue, IssueError, IssueFilter, IssueLocation, IssueSeverity, IssueTracker, IssueType};

struct AppState {
    service: DistributionService,
    tracker: IssueTracker,
    config: DistConfig,
    actor: String,
}

/// JSON error body with the given status.
fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Status code for an engine error. Shared by the direct mapping and by
/// issue errors that wrap one, so a state conflict surfacing through the
/// issue tracker is still a 409.
fn execution_status(e: &ExecutionError) -> StatusCode {
    match e {
        ExecutionError::ScheduleNotFound(_)
        | ExecutionError::ExecutionNotFound(_)
        | ExecutionError::DeliveryNotFound(_) => StatusCode::NOT_FOUND,
        ExecutionError::Validation { .. } => StatusCode::BAD_REQUEST,
        ExecutionError::ScheduleAlreadyActive(_)
        | ExecutionError::InvalidStateTransition { .. }
        | ExecutionError::ExecutionClosed { .. }
        | ExecutionError::InvalidDeliveryState { .. }
        | ExecutionError::DeliveryStateConflict { .. }
        | ExecutionError::IncompleteDeliveries { .. }
        | ExecutionError::ConcurrentModification { .. }
        | ExecutionError::StaleLocation { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Map an engine error to an HTTP response.
fn execution_error(e: ExecutionError) -> Response {
    json_error(execution_status(&e), &e.to_string())
}

fn issue_error(e: IssueError) -> Response {
    let status = match &e {
        IssueError::NotFound(_) => StatusCode::NOT_FOUND,
        IssueError::Validation { .. } => StatusCode::BAD_REQUEST,
        IssueError::AlreadyResolved(_) | IssueError::ForeignDelivery { .. } => StatusCode::CONFLICT,
        IssueError::Execution(inner) => execution_status(inner),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error(status, &e.to_string())
}

fn ok_json<T: serde::Serialize>(value: &T) -> Response {
    (StatusCode::OK, Json(serde_json::to_value(value).unwrap_or_default())).into_response()
}

/// Actor identity for a mutating request: `X-Actor` header when present
/// and non-blank, otherwise the configured default. The audit trail
/// records whatever this returns.
fn request_actor(headers: &HeaderMap, default: &str) -> String {
    headers
        .get("x-actor")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .unwrap_or_else(|| default.to_string())
}

/// Parse a range bound: an RFC 3339 instant, or a plain `YYYY-MM-DD`
/// date taken as midnight UTC.
fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    s.parse::<NaiveDate>()
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn range_param(
    params: &HashMap<String, String>,
    key: &str,
) -> Result<Option<DateTime<Utc>>, Response> {
    match params.get(key) {
        None => Ok(None),
        Some(s) => parse_instant(s).map(Some).ok_or_else(|| {
            json_error(
                StatusCode::BAD_REQUEST,
                &format!("unparseable {key}: {s} (want RFC 3339 or YYYY-MM-DD)"),
            )
        }),
    }
}

/// Start the server on the given port. Blocks until Ctrl+C.
pub fn execute(config: DistConfig, port: u16) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(config, port))
}

async fn run(config: DistConfig, port: u16) -> anyhow::Result<()> {
    let actor = config.default_actor.clone();
    let service = DistributionService::open(config.clone())?;
    let tracker = IssueTracker::attach(&service)?;
    let state = Arc::new(AppState {
        service,
        tracker,
        config,
        actor,
    });

    // Permissive CORS for local admin frontends.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/schedules", get(handle_list_schedules))
        .route("/executions", post(handle_start_execution).get(handle_list_executions))
        .route("/executions/{id}", get(handle_get_execution).delete(handle_delete_execution))
        .route("/executions/{id}/progress", patch(handle_progress))
        .route("/executions/{id}/complete", post(handle_complete_execution))
        .route("/executions/{id}/cancel", post(handle_cancel_execution))
        .route("/executions/{id}/weather", post(handle_weather))
        .route("/executions/{id}/deliveries", get(handle_list_deliveries))
        .route("/statistics", get(handle_statistics))
        .route("/deliveries/{id}", get(handle_get_delivery))
        .route("/deliveries/{id}/start", post(handle_start_delivery))
        .route("/deliveries/{id}/track", post(handle_track))
        .route("/deliveries/{id}/arrive", post(handle_arrive))
        .route("/deliveries/{id}/complete", post(handle_complete_delivery))
        .route("/deliveries/{id}/fail", post(handle_fail_delivery))
        .route("/deliveries/{id}/photos", post(handle_photo))
        .route(
            "/deliveries/{id}/signature",
            put(handle_sign).delete(handle_unsign),
        )
        .route("/deliveries/{id}/tracking", get(handle_tracking))
        .route("/issues", post(handle_report_issue).get(handle_list_issues))
        .route("/issues/summary", get(handle_issue_summary))
        .route("/issues/{id}/resolve", post(handle_resolve_issue))
        .route("/audit/{entity_id}", get(handle_audit_query))
        .route("/audit-verify", get(handle_audit_verify))
        .fallback(handle_not_found)
        .layer(cors)
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    eprintln!("DistTrack API listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    eprintln!("\nServer shut down.");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    eprintln!("\nReceived shutdown signal...");
}

async fn handle_not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "not found")
}

async fn handle_health() -> Response {
    ok_json(&serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_list_schedules(State(state): State<Arc<AppState>>) -> Response {
    let provider = match FileScheduleProvider::new(&state.config.schedules_dir) {
        Ok(p) => p,
        Err(e) => return execution_error(e),
    };
    match provider.list() {
        Ok(schedules) => ok_json(&schedules),
        Err(e) => execution_error(e),
    }
}

// ---------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct StartExecutionBody {
    schedule_id: Uuid,
    notes: Option<String>,
}

async fn handle_start_execution(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StartExecutionBody>,
) -> Response {
    match state
        .service
        .start_execution(body.schedule_id, &request_actor(&headers, &state.actor), body.notes)
    {
        Ok(execution) => (StatusCode::CREATED, Json(serde_json::to_value(&execution).unwrap_or_default())).into_response(),
        Err(e) => execution_error(e),
    }
}

async fn handle_list_executions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let status = match params.get("status") {
        Some(s) => match ExecutionStatus::parse(s) {
            Some(status) => Some(status),
            None => return json_error(StatusCode::BAD_REQUEST, &format!("unknown status: {s}")),
        },
        None => None,
    };
    let from = match range_param(&params, "from") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let to = match range_param(&params, "to") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let filter = ExecutionFilter {
        status,
        search: params.get("search").cloned(),
        schedule_id: params.get("schedule_id").and_then(|s| Uuid::parse_str(s).ok()),
        has_issues: params.get("has_issues").and_then(|s| s.parse().ok()),
        from,
        to,
    };
    match state.service.list_executions(&filter) {
        Ok(executions) => ok_json(&executions),
        Err(e) => execution_error(e),
    }
}

async fn handle_get_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.service.get_execution(id) {
        Ok(execution) => ok_json(&execution),
        Err(e) => execution_error(e),
    }
}

#[derive(Deserialize)]
struct ProgressBody {
    portions: Option<u32>,
    beneficiaries: Option<u32>,
    notes: Option<String>,
}

async fn handle_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ProgressBody>,
) -> Response {
    let update = ProgressUpdate {
        total_portions_delivered: body.portions,
        total_beneficiaries_reached: body.beneficiaries,
        notes: body.notes,
    };
    match state
        .service
        .update_progress(id, &request_actor(&headers, &state.actor), &update)
    {
        Ok(execution) => ok_json(&execution),
        Err(e) => execution_error(e),
    }
}

#[derive(Deserialize, Default)]
struct NotesBody {
    notes: Option<String>,
}

async fn handle_complete_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Option<Json<NotesBody>>,
) -> Response {
    let notes = body.and_then(|Json(b)| b.notes);
    match state
        .service
        .complete_execution(id, &request_actor(&headers, &state.actor), notes)
    {
        Ok(execution) => ok_json(&execution),
        Err(e) => execution_error(e),
    }
}

#[derive(Deserialize)]
struct ReasonBody {
    reason: String,
}

async fn handle_cancel_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ReasonBody>,
) -> Response {
    match state
        .service
        .cancel_execution(id, &request_actor(&headers, &state.actor), &body.reason)
    {
        Ok(execution) => ok_json(&execution),
        Err(e) => execution_error(e),
    }
}

async fn handle_delete_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    match state
        .service
        .delete_execution(id, &request_actor(&headers, &state.actor))
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => execution_error(e),
    }
}

#[derive(Deserialize)]
struct WeatherBody {
    condition: String,
    temperature_c: f64,
    humidity_pct: f64,
}

async fn handle_weather(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<WeatherBody>,
) -> Response {
    let weather = Weather {
        condition: body.condition,
        temperature_c: body.temperature_c,
        humidity_pct: body.humidity_pct,
        recorded_at: Utc::now(),
    };
    match state
        .service
        .set_weather(id, &request_actor(&headers, &state.actor), weather)
    {
        Ok(execution) => ok_json(&execution),
        Err(e) => execution_error(e),
    }
}

async fn handle_list_deliveries(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.service.list_deliveries(id) {
        Ok(deliveries) => ok_json(&deliveries),
        Err(e) => execution_error(e),
    }
}

async fn handle_statistics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let from = match range_param(&params, "from") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let to = match range_param(&params, "to") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state.service.statistics(from, to) {
        Ok(stats) => ok_json(&stats),
        Err(e) => execution_error(e),
    }
}

// ---------------------------------------------------------------------
// Deliveries
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct PointBody {
    latitude: f64,
    longitude: f64,
    speed_kmh: Option<f64>,
}

impl PointBody {
    fn into_point(self) -> TrackingPoint {
        TrackingPoint {
            recorded_at: Utc::now(),
            latitude: self.latitude,
            longitude: self.longitude,
            speed_kmh: self.speed_kmh,
        }
    }
}

async fn handle_get_delivery(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match state.service.get_delivery(id) {
        Ok(delivery) => ok_json(&delivery),
        Err(e) => execution_error(e),
    }
}

async fn handle_start_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<PointBody>,
) -> Response {
    match state
        .service
        .start_delivery(id, &request_actor(&headers, &state.actor), body.into_point())
    {
        Ok(delivery) => ok_json(&delivery),
        Err(e) => execution_error(e),
    }
}

async fn handle_track(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<PointBody>,
) -> Response {
    match state.service.record_location(id, body.into_point()) {
        Ok(delivery) => ok_json(&delivery),
        Err(e) => execution_error(e),
    }
}

async fn handle_arrive(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<PointBody>,
) -> Response {
    match state
        .service
        .arrive_delivery(id, &request_actor(&headers, &state.actor), body.into_point())
    {
        Ok(delivery) => ok_json(&delivery),
        Err(e) => execution_error(e),
    }
}

#[derive(Deserialize)]
struct CompleteDeliveryBody {
    portions_delivered: u32,
    beneficiaries_reached: u32,
    quality_check: Option<QualityCheck>,
    signature: Option<Signature>,
}

async fn handle_complete_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<CompleteDeliveryBody>,
) -> Response {
    let request = CompleteDeliveryRequest {
        delivery_id: id,
        portions_delivered: body.portions_delivered,
        beneficiaries_reached: body.beneficiaries_reached,
        quality_check: body.quality_check,
        signature: body.signature,
    };
    match state
        .service
        .complete_delivery(&request, &request_actor(&headers, &state.actor))
    {
        Ok(delivery) => ok_json(&delivery),
        Err(e) => execution_error(e),
    }
}

async fn handle_fail_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ReasonBody>,
) -> Response {
    match state
        .service
        .fail_delivery(id, &request_actor(&headers, &state.actor), &body.reason)
    {
        Ok(delivery) => ok_json(&delivery),
        Err(e) => execution_error(e),
    }
}

#[derive(Deserialize)]
struct PhotoBody {
    photo_type: String,
    url: String,
    caption: Option<String>,
}

async fn handle_photo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<PhotoBody>,
) -> Response {
    let photo_type = match PhotoType::parse(&body.photo_type) {
        Some(t) => t,
        None => {
            return json_error(
                StatusCode::BAD_REQUEST,
                &format!("unknown photo type: {}", body.photo_type),
            )
        }
    };
    match state.service.attach_photo(
        id,
        &request_actor(&headers, &state.actor),
        photo_type,
        &body.url,
        body.caption,
    ) {
        Ok(delivery) => ok_json(&delivery),
        Err(e) => execution_error(e),
    }
}

#[derive(Deserialize)]
struct SignatureBody {
    image_url: String,
    recipient_name: String,
    recipient_title: Option<String>,
}

async fn handle_sign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<SignatureBody>,
) -> Response {
    let signature = Signature {
        image_url: body.image_url,
        recipient_name: body.recipient_name,
        recipient_title: body.recipient_title,
        signed_at: Utc::now(),
    };
    match state
        .service
        .attach_signature(id, &request_actor(&headers, &state.actor), signature)
    {
        Ok(delivery) => ok_json(&delivery),
        Err(e) => execution_error(e),
    }
}

async fn handle_unsign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    match state
        .service
        .remove_signature(id, &request_actor(&headers, &state.actor))
    {
        Ok(delivery) => ok_json(&delivery),
        Err(e) => execution_error(e),
    }
}

async fn handle_tracking(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match state.service.tracking_history(id) {
        Ok(points) => ok_json(&points),
        Err(e) => execution_error(e),
    }
}

// ---------------------------------------------------------------------
// Issues
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct ReportIssueBody {
    execution_id: Uuid,
    issue_type: String,
    severity: String,
    description: String,
    #[serde(default)]
    delivery_ids: Vec<Uuid>,
    location: Option<IssueLocation>,
}

async fn handle_report_issue(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ReportIssueBody>,
) -> Response {
    let issue_type = match IssueType::parse(&body.issue_type) {
        Some(t) => t,
        None => {
            return json_error(
                StatusCode::BAD_REQUEST,
                &format!("unknown issue type: {}", body.issue_type),
            )
        }
    };
    let severity = match IssueSeverity::parse(&body.severity) {
        Some(s) => s,
        None => {
            return json_error(
                StatusCode::BAD_REQUEST,
                &format!("unknown severity: {}", body.severity),
            )
        }
    };

    let mut issue = Issue::new(
        body.execution_id,
        issue_type,
        severity,
        body.description,
        request_actor(&headers, &state.actor),
    )
    .with_deliveries(body.delivery_ids);
    if let Some(location) = body.location {
        issue = issue.with_location(location);
    }

    match state.tracker.report(issue) {
        Ok(issue) => (StatusCode::CREATED, Json(serde_json::to_value(&issue).unwrap_or_default())).into_response(),
        Err(e) => issue_error(e),
    }
}

#[derive(Deserialize)]
struct ResolveBody {
    notes: String,
}

async fn handle_resolve_issue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ResolveBody>,
) -> Response {
    match state
        .tracker
        .resolve(id, &body.notes, &request_actor(&headers, &state.actor))
    {
        Ok(issue) => ok_json(&issue),
        Err(e) => issue_error(e),
    }
}

async fn handle_list_issues(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let severity = match params.get("severity") {
        Some(s) => match IssueSeverity::parse(s) {
            Some(severity) => Some(severity),
            None => return json_error(StatusCode::BAD_REQUEST, &format!("unknown severity: {s}")),
        },
        None => None,
    };
    let filter = IssueFilter {
        execution_id: params.get("execution_id").and_then(|s| Uuid::parse_str(s).ok()),
        severity,
        issue_type: params.get("type").and_then(|s| IssueType::parse(s)),
        resolved: params.get("resolved").and_then(|s| s.parse().ok()),
    };
    match state.tracker.list(&filter) {
        Ok(issues) => ok_json(&issues),
        Err(e) => issue_error(e),
    }
}

async fn handle_issue_summary(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let execution_id = params.get("execution_id").and_then(|s| Uuid::parse_str(s).ok());
    match state.tracker.summary(execution_id) {
        Ok(summary) => ok_json(&summary),
        Err(e) => issue_error(e),
    }
}

// ---------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------

async fn handle_audit_query(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<Uuid>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let action = match params.get("action") {
        Some(a) => match AuditAction::parse(a) {
            Some(action) => Some(action),
            None => return json_error(StatusCode::BAD_REQUEST, &format!("unknown action: {a}")),
        },
        None => None,
    };
    let filter = AuditFilter {
        action,
        limit: params.get("limit").and_then(|s| s.parse().ok()),
        offset: params
            .get("offset")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
    };
    match AuditTrail::query(&state.config.audit_log, entity_id, &filter) {
        Ok(entries) => ok_json(&entries),
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn handle_audit_verify(State(state): State<Arc<AppState>>) -> Response {
    if !state.config.audit_log.exists() {
        return ok_json(&serde_json::json!({ "valid": true, "entries": 0 }));
    }
    match AuditTrail::verify_chain(&state.config.audit_log) {
        Ok(_) => {
            let entries = AuditTrail::read_all(&state.config.audit_log)
                .map(|e| e.len())
                .unwrap_or(0);
            ok_json(&serde_json::json!({ "valid": true, "entries": entries }))
        }
        Err(dt_audit::AuditError::IntegrityViolation { line, .. }) => ok_json(
            &serde_json::json!({ "valid": false, "violation_at_line": line }),
        ),
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}
