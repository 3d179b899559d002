use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::governance::{self, OptionTally, PollOption};
use shared::*;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub console: Arc<LabConsole>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (status, Json(ErrorResponse { error: error.to_string() }))
}

fn lab_error(e: LabError) -> ApiError {
    let status = match &e {
        LabError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LabError::Conflict { .. } => StatusCode::CONFLICT,
        LabError::Unauthorized(_) => StatusCode::FORBIDDEN,
        LabError::InvalidTransition { .. } => StatusCode::CONFLICT,
        LabError::TooEarly { .. } => StatusCode::TOO_EARLY,
        LabError::NotFound(_) => StatusCode::NOT_FOUND,
        LabError::Store(err) => {
            tracing::error!("Store failure: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    api_error(status, e)
}

/// The caller identifies itself with `x-actor-id` and `x-actor-role`.
fn actor(headers: &HeaderMap) -> Result<Actor, ApiError> {
    let member_id = headers
        .get("x-actor-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "missing or invalid x-actor-id header"))?;
    let role = headers
        .get("x-actor-role")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("member")
        .parse::<Role>()
        .map_err(|e| api_error(StatusCode::UNAUTHORIZED, e))?;
    Ok(Actor { member_id, role })
}

#[derive(Debug, Deserialize)]
pub struct RegisterMachineRequest {
    pub name: String,
    pub category: MachineCategory,
}

#[derive(Debug, Deserialize)]
pub struct WindowRequest {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ReservationQuery {
    pub machine_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CheckOutRequest {
    pub item_name: String,
    pub due_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OverdueCheckout {
    #[serde(flatten)]
    pub checkout: Checkout,
    pub minutes_overdue: i64,
}

#[derive(Debug, Deserialize)]
pub struct TallyRequest {
    pub options: Vec<PollOption>,
}

#[derive(Debug, Serialize)]
pub struct TallyResponse {
    pub tallies: Vec<OptionTally>,
    pub leaders: Vec<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/machines", get(list_machines).post(register_machine))
        .route("/machines/:id/status", post(transition_machine))
        .route("/machines/:id/availability", post(check_availability))
        .route("/reservations", get(list_reservations).post(request_reservation))
        .route("/reservations/:id/approve", post(approve_reservation))
        .route("/reservations/:id/reject", post(reject_reservation))
        .route("/reservations/:id/complete", post(complete_reservation))
        .route("/checkouts", get(list_checkouts).post(check_out))
        .route("/checkouts/overdue", get(overdue_checkouts))
        .route("/checkouts/:id/return", post(return_checkout))
        .route("/polls/tally", post(tally_poll))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn list_machines(State(state): State<AppState>) -> ApiResult<Vec<MachineView>> {
    state.console.machine_views().await.map(Json).map_err(lab_error)
}

pub async fn register_machine(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterMachineRequest>,
) -> ApiResult<Machine> {
    let actor = actor(&headers)?;
    state
        .console
        .register_machine(&actor, &request.name, request.category)
        .await
        .map(Json)
        .map_err(lab_error)
}

pub async fn transition_machine(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(target): Json<MachineTarget>,
) -> ApiResult<Machine> {
    let actor = actor(&headers)?;
    state
        .console
        .transition_machine(&actor, id, target)
        .await
        .map(Json)
        .map_err(lab_error)
}

pub async fn check_availability(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(window): Json<WindowRequest>,
) -> ApiResult<Availability> {
    state
        .console
        .check_availability(id, window.starts_at, window.ends_at)
        .await
        .map(Json)
        .map_err(lab_error)
}

pub async fn list_reservations(
    State(state): State<AppState>,
    Query(query): Query<ReservationQuery>,
) -> ApiResult<Vec<Reservation>> {
    state
        .console
        .reservations(query.machine_id)
        .await
        .map(Json)
        .map_err(lab_error)
}

pub async fn request_reservation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ReservationRequest>,
) -> ApiResult<Reservation> {
    let actor = actor(&headers)?;
    state
        .console
        .request_reservation(&actor, request)
        .await
        .map(Json)
        .map_err(lab_error)
}

pub async fn approve_reservation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Reservation> {
    let actor = actor(&headers)?;
    state.console.approve_reservation(&actor, id).await.map(Json).map_err(lab_error)
}

pub async fn reject_reservation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Reservation> {
    let actor = actor(&headers)?;
    state.console.reject_reservation(&actor, id).await.map(Json).map_err(lab_error)
}

pub async fn complete_reservation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Reservation> {
    let actor = actor(&headers)?;
    state.console.complete_reservation(&actor, id).await.map(Json).map_err(lab_error)
}

pub async fn list_checkouts(State(state): State<AppState>) -> ApiResult<Vec<Checkout>> {
    state.console.checkouts().await.map(Json).map_err(lab_error)
}

pub async fn check_out(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckOutRequest>,
) -> ApiResult<Checkout> {
    let actor = actor(&headers)?;
    state
        .console
        .check_out(&actor, &request.item_name, request.due_at)
        .await
        .map(Json)
        .map_err(lab_error)
}

pub async fn overdue_checkouts(State(state): State<AppState>) -> ApiResult<Vec<OverdueCheckout>> {
    let now = state.console.now();
    let overdue = state.console.overdue_checkouts().await.map_err(lab_error)?;
    Ok(Json(
        overdue
            .into_iter()
            .map(|checkout| OverdueCheckout {
                minutes_overdue: checkout.minutes_overdue(now),
                checkout,
            })
            .collect(),
    ))
}

pub async fn return_checkout(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Checkout> {
    let actor = actor(&headers)?;
    state.console.return_checkout(&actor, id).await.map(Json).map_err(lab_error)
}

pub async fn tally_poll(Json(request): Json<TallyRequest>) -> Json<TallyResponse> {
    let leaders = governance::leaders(&request.options)
        .into_iter()
        .map(|o| o.label.clone())
        .collect();
    Json(TallyResponse {
        tallies: governance::tally(&request.options),
        leaders,
    })
}
