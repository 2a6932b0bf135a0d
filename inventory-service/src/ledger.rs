use chrono::Utc;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use shared::db::DbPool;
use shared::*;
use tracing::info;

use crate::alerts;
use crate::models::*;
use crate::schema::*;

/// On-hand and held counts of one inventory row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevels {
    pub quantity: i32,
    pub reserved: i32,
}

impl StockLevels {
    pub fn available(self) -> i32 {
        self.quantity - self.reserved
    }
}

/// Counter values a movement will leave behind, computed before anything is
/// written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedMovement {
    pub before: StockLevels,
    pub after: StockLevels,
    pub previous_quantity: i32,
    pub new_quantity: i32,
    /// Available stock the row must still hold when the update executes.
    pub required_available: i32,
}

/// Computes the effect of `movement_type` on `before`.
///
/// Inbound and outbound movements change on-hand stock and record it in
/// `previous_quantity`/`new_quantity`; reservation and release change only the
/// held count and record that instead. Outbound stock may never be taken from
/// quantity already held for orders.
pub fn plan_movement(
    inventory_item_id: i64,
    before: StockLevels,
    movement_type: MovementType,
    quantity: i32,
) -> Result<PlannedMovement, CoreError> {
    if quantity <= 0 {
        return Err(CoreError::InvalidQuantity(quantity));
    }

    let insufficient = || CoreError::InsufficientStock {
        inventory_item_id,
        requested: quantity,
        available: before.available(),
    };

    let (after, required_available) = match movement_type {
        MovementType::Inbound => {
            let quantity = before
                .quantity
                .checked_add(quantity)
                .ok_or(CoreError::InvalidQuantity(quantity))?;
            (StockLevels { quantity, ..before }, 0)
        }
        MovementType::Outbound => {
            if quantity > before.available() {
                return Err(insufficient());
            }
            (
                StockLevels {
                    quantity: before.quantity - quantity,
                    ..before
                },
                quantity,
            )
        }
        MovementType::Reservation => {
            if quantity > before.available() {
                return Err(insufficient());
            }
            (
                StockLevels {
                    reserved: before.reserved + quantity,
                    ..before
                },
                quantity,
            )
        }
        MovementType::Release => (
            StockLevels {
                reserved: (before.reserved - quantity).max(0),
                ..before
            },
            0,
        ),
    };

    let (previous_quantity, new_quantity) = if movement_type.touches_reserved() {
        (before.reserved, after.reserved)
    } else {
        (before.quantity, after.quantity)
    };

    Ok(PlannedMovement {
        before,
        after,
        previous_quantity,
        new_quantity,
        required_available,
    })
}

/// Stock leaving the warehouse against an existing hold: both on-hand and held
/// counts drop by `quantity`.
pub fn plan_fulfilment(
    inventory_item_id: i64,
    before: StockLevels,
    quantity: i32,
) -> Result<PlannedMovement, CoreError> {
    if quantity <= 0 {
        return Err(CoreError::InvalidQuantity(quantity));
    }
    if quantity > before.quantity {
        return Err(CoreError::InsufficientStock {
            inventory_item_id,
            requested: quantity,
            available: before.quantity,
        });
    }

    let after = StockLevels {
        quantity: before.quantity - quantity,
        reserved: (before.reserved - quantity).max(0),
    };
    Ok(PlannedMovement {
        before,
        after,
        previous_quantity: before.quantity,
        new_quantity: after.quantity,
        required_available: 0,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct MovementRequest {
    pub product_id: i64,
    #[serde(default)]
    pub variant_id: Option<i64>,
    pub warehouse_id: i64,
    pub movement_type: MovementType,
    pub reason: MovementReason,
    pub quantity: i32,
    #[serde(default)]
    pub reference: Option<Reference>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_by: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterItem {
    pub product_id: i64,
    #[serde(default)]
    pub variant_id: Option<i64>,
    pub warehouse_id: i64,
    #[serde(default)]
    pub opening_quantity: i32,
    #[serde(default)]
    pub reorder_level: i32,
}

/// Audit details written alongside a counter change.
#[derive(Debug, Clone, Copy)]
pub struct MovementSpec<'a> {
    pub movement_type: MovementType,
    pub reason: MovementReason,
    pub quantity: i32,
    pub reference: Option<&'a Reference>,
    pub notes: Option<&'a str>,
    pub created_by: Option<i64>,
}

/// Locks the inventory row for (product, variant, warehouse).
pub async fn lock_item(
    conn: &mut AsyncPgConnection,
    product_id: i64,
    variant_id: Option<i64>,
    warehouse_id: i64,
) -> Result<InventoryItem, CoreError> {
    inventory_items::table
        .filter(inventory_items::product_id.eq(product_id))
        .filter(inventory_items::variant_id.is_not_distinct_from(variant_id))
        .filter(inventory_items::warehouse_id.eq(warehouse_id))
        .for_update()
        .first::<InventoryItem>(conn)
        .await
        .optional()?
        .ok_or_else(|| {
            CoreError::not_found(
                "inventory item",
                format!("for product {} in warehouse {}", product_id, warehouse_id),
            )
        })
}

pub async fn lock_item_by_id(
    conn: &mut AsyncPgConnection,
    inventory_item_id: i64,
) -> Result<InventoryItem, CoreError> {
    inventory_items::table
        .filter(inventory_items::id.eq(inventory_item_id))
        .for_update()
        .first::<InventoryItem>(conn)
        .await
        .optional()?
        .ok_or_else(|| CoreError::not_found("inventory item", inventory_item_id))
}

/// Locks every active row stocking (product, variant), in id order.
pub async fn lock_candidates(
    conn: &mut AsyncPgConnection,
    product_id: i64,
    variant_id: Option<i64>,
) -> Result<Vec<InventoryItem>, CoreError> {
    let items = inventory_items::table
        .filter(inventory_items::product_id.eq(product_id))
        .filter(inventory_items::variant_id.is_not_distinct_from(variant_id))
        .filter(inventory_items::status.eq(InventoryStatus::Active.as_str()))
        .order(inventory_items::id.asc())
        .for_update()
        .load::<InventoryItem>(conn)
        .await?;
    Ok(items)
}

/// Writes a planned counter change and its movement row. Must run inside a
/// transaction holding the row lock on `item`.
pub async fn apply_movement(
    conn: &mut AsyncPgConnection,
    item: &InventoryItem,
    planned: PlannedMovement,
    spec: MovementSpec<'_>,
) -> Result<(InventoryItem, InventoryMovement), CoreError> {
    let updated = diesel::update(
        inventory_items::table
            .filter(inventory_items::id.eq(item.id))
            .filter(inventory_items::available_quantity.ge(planned.required_available)),
    )
    .set((
        inventory_items::quantity.eq(planned.after.quantity),
        inventory_items::reserved_quantity.eq(planned.after.reserved),
        inventory_items::updated_at.eq(Utc::now()),
    ))
    .get_result::<InventoryItem>(conn)
    .await
    .optional()?
    .ok_or(CoreError::InsufficientStock {
        inventory_item_id: item.id,
        requested: spec.quantity,
        available: item.available_quantity,
    })?;

    let new_movement = NewInventoryMovement {
        inventory_item_id: item.id,
        product_id: item.product_id,
        variant_id: item.variant_id,
        warehouse_id: item.warehouse_id,
        movement_type: spec.movement_type.as_str().to_string(),
        reason: spec.reason.as_str().to_string(),
        quantity: spec.quantity,
        previous_quantity: planned.previous_quantity,
        new_quantity: planned.new_quantity,
        reference_type: spec.reference.map(|r| r.reference_type.clone()),
        reference_id: spec.reference.map(|r| r.reference_id),
        notes: spec.notes.map(str::to_string),
        created_by: spec.created_by,
    };

    let movement = diesel::insert_into(inventory_movements::table)
        .values(&new_movement)
        .get_result::<InventoryMovement>(conn)
        .await?;

    Ok((updated, movement))
}

pub async fn record_movement_in(
    conn: &mut AsyncPgConnection,
    request: &MovementRequest,
) -> Result<(InventoryItem, InventoryMovement), CoreError> {
    let item = lock_item(conn, request.product_id, request.variant_id, request.warehouse_id).await?;
    let planned = plan_movement(item.id, item.levels(), request.movement_type, request.quantity)?;

    apply_movement(
        conn,
        &item,
        planned,
        MovementSpec {
            movement_type: request.movement_type,
            reason: request.reason,
            quantity: request.quantity,
            reference: request.reference.as_ref(),
            notes: request.notes.as_deref(),
            created_by: request.created_by,
        },
    )
    .await
}

#[derive(Clone)]
pub struct InventoryLedger {
    pool: DbPool,
}

impl InventoryLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn record_movement(
        &self,
        request: MovementRequest,
    ) -> Result<InventoryMovement, CoreError> {
        let mut conn = self.pool.get().await?;

        let (item, movement) = conn
            .transaction::<_, CoreError, _>(|conn| {
                async move { record_movement_in(conn, &request).await }.scope_boxed()
            })
            .await?;

        info!(
            inventory_item_id = item.id,
            movement_id = movement.id,
            movement_type = %movement.movement_type,
            quantity = movement.quantity,
            "Recorded inventory movement"
        );

        alerts::spawn_evaluation(self.pool.clone(), vec![item.id]);

        Ok(movement)
    }

    /// Creates the stock row for (product, variant, warehouse). A non-zero
    /// opening quantity is booked as an inbound adjustment so the movement log
    /// accounts for all stock.
    pub async fn register_item(&self, request: RegisterItem) -> Result<InventoryItem, CoreError> {
        if request.opening_quantity < 0 {
            return Err(CoreError::InvalidQuantity(request.opening_quantity));
        }

        let mut conn = self.pool.get().await?;

        let item = conn
            .transaction::<_, CoreError, _>(|conn| {
                async move {
                    let new_item = NewInventoryItem {
                        product_id: request.product_id,
                        variant_id: request.variant_id,
                        warehouse_id: request.warehouse_id,
                        quantity: 0,
                        reserved_quantity: 0,
                        reorder_level: request.reorder_level,
                        status: InventoryStatus::Active.as_str().to_string(),
                    };

                    let item = diesel::insert_into(inventory_items::table)
                        .values(&new_item)
                        .get_result::<InventoryItem>(conn)
                        .await
                        .map_err(|e| {
                            CoreError::from_insert(
                                e,
                                "inventory item",
                                format!(
                                    "for product {} in warehouse {}",
                                    request.product_id, request.warehouse_id
                                ),
                            )
                        })?;

                    if request.opening_quantity == 0 {
                        return Ok(item);
                    }

                    let planned = plan_movement(
                        item.id,
                        item.levels(),
                        MovementType::Inbound,
                        request.opening_quantity,
                    )?;
                    let (item, _) = apply_movement(
                        conn,
                        &item,
                        planned,
                        MovementSpec {
                            movement_type: MovementType::Inbound,
                            reason: MovementReason::Adjustment,
                            quantity: request.opening_quantity,
                            reference: None,
                            notes: Some("opening balance"),
                            created_by: None,
                        },
                    )
                    .await?;
                    Ok(item)
                }
                .scope_boxed()
            })
            .await?;

        info!(
            inventory_item_id = item.id,
            product_id = item.product_id,
            warehouse_id = item.warehouse_id,
            "Registered inventory item"
        );

        Ok(item)
    }

    pub async fn get_item(&self, inventory_item_id: i64) -> Result<InventoryItem, CoreError> {
        let mut conn = self.pool.get().await?;
        inventory_items::table
            .find(inventory_item_id)
            .first::<InventoryItem>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| CoreError::not_found("inventory item", inventory_item_id))
    }

    pub async fn movements(
        &self,
        inventory_item_id: i64,
        limit: i64,
    ) -> Result<Vec<InventoryMovement>, CoreError> {
        let mut conn = self.pool.get().await?;
        let movements = inventory_movements::table
            .filter(inventory_movements::inventory_item_id.eq(inventory_item_id))
            .order(inventory_movements::id.asc())
            .limit(limit)
            .load::<InventoryMovement>(&mut conn)
            .await?;
        Ok(movements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(quantity: i32, reserved: i32) -> StockLevels {
        StockLevels { quantity, reserved }
    }

    #[test]
    fn test_inbound_adds_to_on_hand() {
        let planned = plan_movement(1, levels(5, 2), MovementType::Inbound, 10).unwrap();
        assert_eq!(planned.after, levels(15, 2));
        assert_eq!((planned.previous_quantity, planned.new_quantity), (5, 15));
        assert_eq!(planned.required_available, 0);
    }

    #[test]
    fn test_outbound_subtracts_from_on_hand() {
        let planned = plan_movement(1, levels(5, 0), MovementType::Outbound, 5).unwrap();
        assert_eq!(planned.after, levels(0, 0));
        assert_eq!((planned.previous_quantity, planned.new_quantity), (5, 0));
        assert_eq!(planned.required_available, 5);
    }

    #[test]
    fn test_outbound_beyond_stock_fails() {
        let err = plan_movement(3, levels(4, 0), MovementType::Outbound, 5).unwrap_err();
        match err {
            CoreError::InsufficientStock {
                inventory_item_id,
                requested,
                available,
            } => {
                assert_eq!(inventory_item_id, 3);
                assert_eq!(requested, 5);
                assert_eq!(available, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_outbound_cannot_consume_held_stock() {
        assert!(matches!(
            plan_movement(1, levels(5, 4), MovementType::Outbound, 2),
            Err(CoreError::InsufficientStock { available: 1, .. })
        ));
    }

    #[test]
    fn test_reservation_only_touches_reserved() {
        let planned = plan_movement(1, levels(5, 0), MovementType::Reservation, 2).unwrap();
        assert_eq!(planned.after, levels(5, 2));
        assert_eq!(planned.after.available(), 3);
        assert_eq!((planned.previous_quantity, planned.new_quantity), (0, 2));
    }

    #[test]
    fn test_reservation_beyond_available_fails() {
        assert!(matches!(
            plan_movement(1, levels(5, 4), MovementType::Reservation, 2),
            Err(CoreError::InsufficientStock { requested: 2, available: 1, .. })
        ));
    }

    #[test]
    fn test_release_clamps_at_zero() {
        let planned = plan_movement(1, levels(5, 1), MovementType::Release, 3).unwrap();
        assert_eq!(planned.after, levels(5, 0));
        assert_eq!((planned.previous_quantity, planned.new_quantity), (1, 0));
    }

    #[test]
    fn test_non_positive_quantities_rejected() {
        for movement_type in MovementType::ALL {
            assert!(matches!(
                plan_movement(1, levels(5, 0), *movement_type, 0),
                Err(CoreError::InvalidQuantity(0))
            ));
        }
        assert!(matches!(
            plan_fulfilment(1, levels(5, 2), -1),
            Err(CoreError::InvalidQuantity(-1))
        ));
    }

    #[test]
    fn test_available_invariant_holds_across_movements() {
        let mut current = levels(10, 0);
        let steps = [
            (MovementType::Reservation, 4),
            (MovementType::Outbound, 3),
            (MovementType::Inbound, 2),
            (MovementType::Release, 10),
        ];
        for (movement_type, quantity) in steps {
            let planned = plan_movement(1, current, movement_type, quantity).unwrap();
            assert!(planned.after.reserved <= planned.after.quantity);
            assert!(planned.after.available() >= 0);
            current = planned.after;
        }
        assert_eq!(current, levels(9, 0));
    }

    #[test]
    fn test_fulfilment_drops_both_counters() {
        let planned = plan_fulfilment(1, levels(5, 2), 2).unwrap();
        assert_eq!(planned.after, levels(3, 0));
        assert_eq!(planned.after.available(), 3);
        assert_eq!((planned.previous_quantity, planned.new_quantity), (5, 3));
    }
}
