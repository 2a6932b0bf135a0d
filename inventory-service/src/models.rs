use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::*;

use crate::ledger::StockLevels;

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::inventory_items)]
pub struct InventoryItem {
    pub id: i64,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub warehouse_id: i64,
    pub quantity: i32,
    pub reserved_quantity: i32,
    pub available_quantity: i32,
    pub reorder_level: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    pub fn status(&self) -> Result<InventoryStatus, CoreError> {
        self.status.parse()
    }

    pub fn levels(&self) -> StockLevels {
        StockLevels {
            quantity: self.quantity,
            reserved: self.reserved_quantity,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::inventory_items)]
pub struct NewInventoryItem {
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub warehouse_id: i64,
    pub quantity: i32,
    pub reserved_quantity: i32,
    pub reorder_level: i32,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::inventory_movements)]
pub struct InventoryMovement {
    pub id: i64,
    pub inventory_item_id: i64,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub warehouse_id: i64,
    pub movement_type: String,
    pub reason: String,
    pub quantity: i32,
    pub previous_quantity: i32,
    pub new_quantity: i32,
    pub reference_type: Option<String>,
    pub reference_id: Option<i64>,
    pub notes: Option<String>,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl InventoryMovement {
    pub fn movement_type(&self) -> Result<MovementType, CoreError> {
        self.movement_type.parse()
    }

    pub fn reason(&self) -> Result<MovementReason, CoreError> {
        self.reason.parse()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::inventory_movements)]
pub struct NewInventoryMovement {
    pub inventory_item_id: i64,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub warehouse_id: i64,
    pub movement_type: String,
    pub reason: String,
    pub quantity: i32,
    pub previous_quantity: i32,
    pub new_quantity: i32,
    pub reference_type: Option<String>,
    pub reference_id: Option<i64>,
    pub notes: Option<String>,
    pub created_by: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::stock_reservations)]
pub struct StockReservation {
    pub id: i64,
    pub inventory_item_id: i64,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub warehouse_id: i64,
    pub order_id: i64,
    pub order_item_id: i64,
    pub quantity: i32,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockReservation {
    pub fn status(&self) -> Result<ReservationStatus, CoreError> {
        self.status.parse()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::stock_reservations)]
pub struct NewStockReservation {
    pub inventory_item_id: i64,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub warehouse_id: i64,
    pub order_id: i64,
    pub order_item_id: i64,
    pub quantity: i32,
    pub status: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::stock_alerts)]
pub struct StockAlert {
    pub id: i64,
    pub inventory_item_id: i64,
    pub product_id: i64,
    pub warehouse_id: i64,
    pub alert_type: String,
    pub threshold: i32,
    pub current_quantity: i32,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::stock_alerts)]
pub struct NewStockAlert {
    pub inventory_item_id: i64,
    pub product_id: i64,
    pub warehouse_id: i64,
    pub alert_type: String,
    pub threshold: i32,
    pub current_quantity: i32,
}
