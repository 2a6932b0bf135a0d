use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;
use shared::db::DbPool;
use shared::*;
use tracing::{info, warn};

use crate::alerts;
use crate::ledger::{self, apply_movement, plan_fulfilment, plan_movement, MovementSpec};
use crate::models::*;
use crate::schema::*;

pub const DEFAULT_RESERVATION_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Deserialize)]
pub struct ReserveRequest {
    pub product_id: i64,
    #[serde(default)]
    pub variant_id: Option<i64>,
    pub warehouse_id: i64,
    pub order_id: i64,
    pub order_item_id: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReservationKey {
    pub order_id: i64,
    pub order_item_id: i64,
}

impl std::fmt::Display for ReservationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "for order {} item {}", self.order_id, self.order_item_id)
    }
}

/// Holds `quantity` of the matching inventory row for one order line.
pub async fn reserve_in(
    conn: &mut AsyncPgConnection,
    request: &ReserveRequest,
    ttl: Duration,
) -> Result<StockReservation, CoreError> {
    let key = ReservationKey {
        order_id: request.order_id,
        order_item_id: request.order_item_id,
    };

    let item = ledger::lock_item(conn, request.product_id, request.variant_id, request.warehouse_id).await?;
    if item.status()? != InventoryStatus::Active {
        return Err(CoreError::InsufficientStock {
            inventory_item_id: item.id,
            requested: request.quantity,
            available: 0,
        });
    }

    let existing = stock_reservations::table
        .filter(stock_reservations::order_id.eq(key.order_id))
        .filter(stock_reservations::order_item_id.eq(key.order_item_id))
        .select(stock_reservations::id)
        .first::<i64>(conn)
        .await
        .optional()?;
    if existing.is_some() {
        return Err(CoreError::AlreadyExists {
            entity: "reservation",
            id: key.to_string(),
        });
    }

    let planned = plan_movement(item.id, item.levels(), MovementType::Reservation, request.quantity)?;
    let reference = Reference::order(request.order_id);
    apply_movement(
        conn,
        &item,
        planned,
        MovementSpec {
            movement_type: MovementType::Reservation,
            reason: MovementReason::Reservation,
            quantity: request.quantity,
            reference: Some(&reference),
            notes: None,
            created_by: None,
        },
    )
    .await?;

    let new_reservation = NewStockReservation {
        inventory_item_id: item.id,
        product_id: item.product_id,
        variant_id: item.variant_id,
        warehouse_id: item.warehouse_id,
        order_id: request.order_id,
        order_item_id: request.order_item_id,
        quantity: request.quantity,
        status: ReservationStatus::Active.as_str().to_string(),
        expires_at: Utc::now() + ttl,
    };

    diesel::insert_into(stock_reservations::table)
        .values(&new_reservation)
        .get_result::<StockReservation>(conn)
        .await
        .map_err(|e| CoreError::from_insert(e, "reservation", key))
}

async fn lock_reservation(
    conn: &mut AsyncPgConnection,
    key: ReservationKey,
    status: ReservationStatus,
) -> Result<StockReservation, CoreError> {
    stock_reservations::table
        .filter(stock_reservations::order_id.eq(key.order_id))
        .filter(stock_reservations::order_item_id.eq(key.order_item_id))
        .filter(stock_reservations::status.eq(status.as_str()))
        .for_update()
        .first::<StockReservation>(conn)
        .await
        .optional()?
        .ok_or_else(|| CoreError::not_found("active reservation", key))
}

async fn set_status(
    conn: &mut AsyncPgConnection,
    reservation_id: i64,
    status: ReservationStatus,
) -> Result<StockReservation, CoreError> {
    let reservation = diesel::update(stock_reservations::table.find(reservation_id))
        .set((
            stock_reservations::status.eq(status.as_str()),
            stock_reservations::updated_at.eq(Utc::now()),
        ))
        .get_result::<StockReservation>(conn)
        .await?;
    Ok(reservation)
}

/// Gives the held quantity back to available stock and closes the hold with
/// `closing_status`.
async fn release_locked(
    conn: &mut AsyncPgConnection,
    reservation: &StockReservation,
    closing_status: ReservationStatus,
    notes: Option<&str>,
) -> Result<StockReservation, CoreError> {
    let item = ledger::lock_item_by_id(conn, reservation.inventory_item_id).await?;
    let planned = plan_movement(item.id, item.levels(), MovementType::Release, reservation.quantity)?;
    let reference = Reference::order(reservation.order_id);
    apply_movement(
        conn,
        &item,
        planned,
        MovementSpec {
            movement_type: MovementType::Release,
            reason: MovementReason::CancelReservation,
            quantity: reservation.quantity,
            reference: Some(&reference),
            notes,
            created_by: None,
        },
    )
    .await?;

    set_status(conn, reservation.id, closing_status).await
}

pub async fn release_in(
    conn: &mut AsyncPgConnection,
    key: ReservationKey,
) -> Result<StockReservation, CoreError> {
    let reservation = lock_reservation(conn, key, ReservationStatus::Active).await?;
    release_locked(conn, &reservation, ReservationStatus::Cancelled, None).await
}

/// Ships the held stock: on-hand and held counts both drop.
pub async fn fulfill_in(
    conn: &mut AsyncPgConnection,
    key: ReservationKey,
) -> Result<StockReservation, CoreError> {
    let reservation = lock_reservation(conn, key, ReservationStatus::Active).await?;
    let item = ledger::lock_item_by_id(conn, reservation.inventory_item_id).await?;
    let planned = plan_fulfilment(item.id, item.levels(), reservation.quantity)?;
    let reference = Reference::order(reservation.order_id);
    apply_movement(
        conn,
        &item,
        planned,
        MovementSpec {
            movement_type: MovementType::Outbound,
            reason: MovementReason::Sale,
            quantity: reservation.quantity,
            reference: Some(&reference),
            notes: None,
            created_by: None,
        },
    )
    .await?;

    set_status(conn, reservation.id, ReservationStatus::Fulfilled).await
}

/// Ships a line whose hold lapsed: the stock is taken from what is currently
/// available, failing if it has since been sold.
async fn fulfill_lapsed_in(
    conn: &mut AsyncPgConnection,
    key: ReservationKey,
) -> Result<StockReservation, CoreError> {
    let reservation = lock_reservation(conn, key, ReservationStatus::Expired).await?;
    let item = ledger::lock_item_by_id(conn, reservation.inventory_item_id).await?;
    let planned = plan_movement(item.id, item.levels(), MovementType::Outbound, reservation.quantity)?;
    let reference = Reference::order(reservation.order_id);
    apply_movement(
        conn,
        &item,
        planned,
        MovementSpec {
            movement_type: MovementType::Outbound,
            reason: MovementReason::Sale,
            quantity: reservation.quantity,
            reference: Some(&reference),
            notes: Some("hold expired before shipment"),
            created_by: None,
        },
    )
    .await?;

    set_status(conn, reservation.id, ReservationStatus::Fulfilled).await
}

/// Puts shipped stock of a fulfilled hold back on hand.
async fn restock_fulfilled_in(
    conn: &mut AsyncPgConnection,
    reservation: &StockReservation,
) -> Result<(), CoreError> {
    let item = ledger::lock_item_by_id(conn, reservation.inventory_item_id).await?;
    let planned = plan_movement(item.id, item.levels(), MovementType::Inbound, reservation.quantity)?;
    let reference = Reference::order(reservation.order_id);
    apply_movement(
        conn,
        &item,
        planned,
        MovementSpec {
            movement_type: MovementType::Inbound,
            reason: MovementReason::Return,
            quantity: reservation.quantity,
            reference: Some(&reference),
            notes: Some("order cancelled after fulfilment"),
            created_by: None,
        },
    )
    .await?;
    Ok(())
}

/// Reservations of an order in (product, variant, inventory item) order,
/// the order checkout locks inventory rows in. Order-level operations walk
/// this list so they never lock rows against a concurrent checkout.
pub async fn for_order(
    conn: &mut AsyncPgConnection,
    order_id: i64,
) -> Result<Vec<StockReservation>, CoreError> {
    let reservations = stock_reservations::table
        .filter(stock_reservations::order_id.eq(order_id))
        .order((
            stock_reservations::product_id.asc(),
            stock_reservations::variant_id.asc().nulls_first(),
            stock_reservations::inventory_item_id.asc(),
            stock_reservations::id.asc(),
        ))
        .load::<StockReservation>(conn)
        .await?;
    Ok(reservations)
}

/// Takes every line of an order out of stock. Returns the inventory rows
/// touched.
pub async fn fulfill_order_in(
    conn: &mut AsyncPgConnection,
    order_id: i64,
) -> Result<Vec<i64>, CoreError> {
    let mut touched = Vec::new();
    for reservation in for_order(conn, order_id).await? {
        let key = ReservationKey {
            order_id,
            order_item_id: reservation.order_item_id,
        };
        match reservation.status()? {
            ReservationStatus::Active => {
                fulfill_in(conn, key).await?;
            }
            ReservationStatus::Expired => {
                fulfill_lapsed_in(conn, key).await?;
            }
            ReservationStatus::Fulfilled | ReservationStatus::Cancelled => continue,
        }
        touched.push(reservation.inventory_item_id);
    }
    Ok(touched)
}

/// Undoes the stock effect of an order being cancelled. Active holds are
/// released, fulfilled ones restocked; lapsed or already released holds need
/// nothing. Returns the inventory rows touched.
pub async fn restore_order_in(
    conn: &mut AsyncPgConnection,
    order_id: i64,
) -> Result<Vec<i64>, CoreError> {
    let mut touched = Vec::new();
    for reservation in for_order(conn, order_id).await? {
        match reservation.status()? {
            ReservationStatus::Active => {
                let key = ReservationKey {
                    order_id,
                    order_item_id: reservation.order_item_id,
                };
                release_in(conn, key).await?;
            }
            ReservationStatus::Fulfilled => {
                restock_fulfilled_in(conn, &reservation).await?;
            }
            ReservationStatus::Cancelled | ReservationStatus::Expired => continue,
        }
        touched.push(reservation.inventory_item_id);
    }
    Ok(touched)
}

/// Releases one lapsed hold. Returns `None` when the reservation is no longer
/// active, not yet due, or locked by another worker.
pub async fn expire_in(
    conn: &mut AsyncPgConnection,
    reservation_id: i64,
    now: DateTime<Utc>,
) -> Result<Option<StockReservation>, CoreError> {
    let reservation = stock_reservations::table
        .filter(stock_reservations::id.eq(reservation_id))
        .filter(stock_reservations::status.eq(ReservationStatus::Active.as_str()))
        .filter(stock_reservations::expires_at.le(now))
        .for_update()
        .skip_locked()
        .first::<StockReservation>(conn)
        .await
        .optional()?;

    match reservation {
        Some(reservation) => {
            let expired = release_locked(
                conn,
                &reservation,
                ReservationStatus::Expired,
                Some("reservation expired"),
            )
            .await?;
            Ok(Some(expired))
        }
        None => Ok(None),
    }
}

#[derive(Clone)]
pub struct ReservationManager {
    pool: DbPool,
    ttl: Duration,
}

impl ReservationManager {
    pub fn new(pool: DbPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn reserve(&self, request: ReserveRequest) -> Result<StockReservation, CoreError> {
        let mut conn = self.pool.get().await?;
        let ttl = self.ttl;

        let reservation = conn
            .transaction::<_, CoreError, _>(|conn| {
                async move { reserve_in(conn, &request, ttl).await }.scope_boxed()
            })
            .await?;

        info!(
            reservation_id = reservation.id,
            order_id = reservation.order_id,
            order_item_id = reservation.order_item_id,
            quantity = reservation.quantity,
            "Reserved stock"
        );
        alerts::spawn_evaluation(self.pool.clone(), vec![reservation.inventory_item_id]);

        Ok(reservation)
    }

    pub async fn release(&self, key: ReservationKey) -> Result<StockReservation, CoreError> {
        let mut conn = self.pool.get().await?;

        let reservation = conn
            .transaction::<_, CoreError, _>(|conn| {
                async move { release_in(conn, key).await }.scope_boxed()
            })
            .await?;

        info!(reservation_id = reservation.id, "Released reservation {}", key);
        alerts::spawn_evaluation(self.pool.clone(), vec![reservation.inventory_item_id]);

        Ok(reservation)
    }

    pub async fn fulfill(&self, key: ReservationKey) -> Result<StockReservation, CoreError> {
        let mut conn = self.pool.get().await?;

        let reservation = conn
            .transaction::<_, CoreError, _>(|conn| {
                async move { fulfill_in(conn, key).await }.scope_boxed()
            })
            .await?;

        info!(reservation_id = reservation.id, "Fulfilled reservation {}", key);
        alerts::spawn_evaluation(self.pool.clone(), vec![reservation.inventory_item_id]);

        Ok(reservation)
    }

    pub async fn for_order(&self, order_id: i64) -> Result<Vec<StockReservation>, CoreError> {
        let mut conn = self.pool.get().await?;
        for_order(&mut conn, order_id).await
    }

    /// Releases up to `batch_size` holds whose expiry has passed, each in its
    /// own transaction. Returns how many were released.
    pub async fn release_expired(
        &self,
        now: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<usize, CoreError> {
        let mut conn = self.pool.get().await?;

        let due = stock_reservations::table
            .filter(stock_reservations::status.eq(ReservationStatus::Active.as_str()))
            .filter(stock_reservations::expires_at.le(now))
            .order(stock_reservations::expires_at.asc())
            .select(stock_reservations::id)
            .limit(batch_size)
            .load::<i64>(&mut conn)
            .await?;

        let mut released = 0;
        let mut touched = Vec::new();
        for reservation_id in due {
            let result = conn
                .transaction::<_, CoreError, _>(|conn| {
                    async move { expire_in(conn, reservation_id, now).await }.scope_boxed()
                })
                .await;

            match result {
                Ok(Some(reservation)) => {
                    info!(
                        reservation_id = reservation.id,
                        order_id = reservation.order_id,
                        quantity = reservation.quantity,
                        "Released expired reservation"
                    );
                    touched.push(reservation.inventory_item_id);
                    released += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(reservation_id, error = %e, "Failed to release expired reservation");
                }
            }
        }

        if !touched.is_empty() {
            alerts::spawn_evaluation(self.pool.clone(), touched);
        }

        Ok(released)
    }
}
