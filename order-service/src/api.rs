use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::{Address, CoreError};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{CreateOrderRequest, OrderHandler, StatusChange};
use crate::models::OrderDetails;
use crate::pricing::ShippingMethod;

#[derive(Clone)]
pub struct AppState {
    pub orders: OrderHandler,
}

/// Checkout request; the cart itself is read from the cart store.
#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub user_id: i64,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub shipping_method: ShippingMethod,
    pub payment_method: String,
    pub coupon_code: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderRequest {
    pub reason: Option<String>,
    pub cancelled_by: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn reject(err: CoreError) -> ApiError {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!("Order request failed: {}", err);
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
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", post(update_status))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<OrderDetails>), ApiError> {
    let cart = match state.orders.carts().snapshot(request.user_id).await {
        Ok(cart) => cart,
        Err(e) => match e.downcast::<CoreError>() {
            Ok(err) => return Err(reject(err)),
            Err(e) => {
                tracing::error!(user_id = request.user_id, "Failed to load cart: {}", e);
                return Err((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: format!("Failed to load cart: {}", e),
                    }),
                ));
            }
        },
    };

    let details = state
        .orders
        .create_order(CreateOrderRequest {
            user_id: request.user_id,
            cart,
            shipping_address: request.shipping_address,
            billing_address: request.billing_address,
            shipping_method: request.shipping_method,
            payment_method: request.payment_method,
            coupon_code: request.coupon_code,
            notes: request.notes,
        })
        .await
        .map_err(reject)?;

    Ok((StatusCode::CREATED, Json(details)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<OrderDetails>, ApiError> {
    state.orders.get_order(id).await.map(Json).map_err(reject)
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(change): Json<StatusChange>,
) -> Result<Json<OrderDetails>, ApiError> {
    state.orders.update_status(id, change).await.map(Json).map_err(reject)
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<CancelOrderRequest>,
) -> Result<Json<OrderDetails>, ApiError> {
    state
        .orders
        .cancel_order(id, request.reason, request.cancelled_by)
        .await
        .map(Json)
        .map_err(reject)
}

pub async fn health_check() -> &'static str {
    "OK"
}
