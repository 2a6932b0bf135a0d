use std::fmt::Display;

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::PoolError;

use crate::status::OrderStatus;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("cannot transition order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("insufficient stock for inventory item {inventory_item_id}: requested {requested}, available {available}")]
    InsufficientStock {
        inventory_item_id: i64,
        requested: i32,
        available: i32,
    },

    #[error("insufficient inventory for product {product_id}: requested {requested}, available {available}, short by {shortfall}")]
    InsufficientInventory {
        product_id: i64,
        variant_id: Option<i64>,
        requested: i32,
        available: i32,
        shortfall: i32,
    },

    #[error("cart is empty")]
    EmptyCart,

    #[error("{entity} {id} already exists")]
    AlreadyExists { entity: &'static str, id: String },

    #[error("product {product_id} is not available for purchase")]
    ProductUnavailable { product_id: i64 },

    #[error("invalid quantity: {0}")]
    InvalidQuantity(i32),

    #[error("invalid unit price {unit_price} for product {product_id}")]
    InvalidPrice { product_id: i64, unit_price: i64 },

    #[error("order amount out of range")]
    AmountOverflow,

    #[error("unknown {kind} value: {value}")]
    UnknownValue { kind: &'static str, value: String },

    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] DieselError),

    #[error("database pool unavailable: {0}")]
    PoolUnavailable(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Display) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn insufficient_inventory(
        product_id: i64,
        variant_id: Option<i64>,
        requested: i32,
        available: i32,
    ) -> Self {
        let available = available.max(0);
        CoreError::InsufficientInventory {
            product_id,
            variant_id,
            requested,
            available,
            shortfall: requested - available,
        }
    }

    /// HTTP status code an API layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            CoreError::NotFound { .. } => 404,
            CoreError::InvalidTransition { .. }
            | CoreError::InsufficientStock { .. }
            | CoreError::InsufficientInventory { .. }
            | CoreError::AlreadyExists { .. } => 409,
            CoreError::EmptyCart
            | CoreError::ProductUnavailable { .. }
            | CoreError::InvalidQuantity(_)
            | CoreError::InvalidPrice { .. }
            | CoreError::AmountOverflow => 422,
            CoreError::UnknownValue { .. } | CoreError::PersistenceFailure(_) => 500,
            CoreError::PoolUnavailable(_) => 503,
        }
    }

    /// Turns a unique-constraint violation into `AlreadyExists`; any other
    /// database error stays a persistence failure.
    pub fn from_insert(err: DieselError, entity: &'static str, id: impl Display) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                CoreError::AlreadyExists {
                    entity,
                    id: id.to_string(),
                }
            }
            other => CoreError::PersistenceFailure(other),
        }
    }
}

impl From<bb8::RunError<PoolError>> for CoreError {
    fn from(err: bb8::RunError<PoolError>) -> Self {
        CoreError::PoolUnavailable(err.to_string())
    }
}
