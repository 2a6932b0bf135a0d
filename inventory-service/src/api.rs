use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::db::DbPool;
use shared::CoreError;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::alerts;
use crate::ledger::{InventoryLedger, MovementRequest, RegisterItem};
use crate::models::*;
use crate::reservations::{ReservationKey, ReservationManager, ReserveRequest};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub ledger: InventoryLedger,
    pub reservations: ReservationManager,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

impl ListParams {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 1000)
    }
}

fn reject(err: CoreError) -> (StatusCode, Json<ErrorResponse>) {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!("Inventory request failed: {}", err);
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/items", post(register_item))
        .route("/items/:id", get(get_item))
        .route("/items/:id/movements", get(list_movements))
        .route("/movements", post(record_movement))
        .route("/reservations", post(reserve))
        .route("/reservations/release", post(release))
        .route("/reservations/fulfill", post(fulfill))
        .route("/alerts", get(list_alerts))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

pub async fn register_item(
    State(state): State<AppState>,
    Json(request): Json<RegisterItem>,
) -> ApiResult<InventoryItem> {
    state.ledger.register_item(request).await.map(Json).map_err(reject)
}

pub async fn get_item(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<InventoryItem> {
    state.ledger.get_item(id).await.map(Json).map_err(reject)
}

pub async fn list_movements(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<ListParams>,
) -> ApiResult<Vec<InventoryMovement>> {
    state
        .ledger
        .movements(id, params.limit())
        .await
        .map(Json)
        .map_err(reject)
}

pub async fn record_movement(
    State(state): State<AppState>,
    Json(request): Json<MovementRequest>,
) -> ApiResult<InventoryMovement> {
    state.ledger.record_movement(request).await.map(Json).map_err(reject)
}

pub async fn reserve(
    State(state): State<AppState>,
    Json(request): Json<ReserveRequest>,
) -> ApiResult<StockReservation> {
    state.reservations.reserve(request).await.map(Json).map_err(reject)
}

pub async fn release(
    State(state): State<AppState>,
    Json(key): Json<ReservationKey>,
) -> ApiResult<StockReservation> {
    state.reservations.release(key).await.map(Json).map_err(reject)
}

pub async fn fulfill(
    State(state): State<AppState>,
    Json(key): Json<ReservationKey>,
) -> ApiResult<StockReservation> {
    state.reservations.fulfill(key).await.map(Json).map_err(reject)
}

pub async fn list_alerts(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Vec<StockAlert>> {
    alerts::open_alerts(&state.pool, params.limit())
        .await
        .map(Json)
        .map_err(reject)
}

pub async fn health_check() -> &'static str {
    "OK"
}
