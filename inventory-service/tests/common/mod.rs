#![allow(dead_code)]

use std::sync::Once;

use inventory_service::ledger::RegisterItem;
use inventory_service::models::InventoryItem;
use inventory_service::InventoryLedger;
use shared::db::DbPool;
use uuid::Uuid;

static MIGRATE: Once = Once::new();

/// Pool against `TEST_DATABASE_URL`, or `None` when it is unset so the
/// calling test can return early.
pub async fn test_pool() -> Option<DbPool> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping database test");
        return None;
    };
    MIGRATE.call_once(|| shared::db::run_migrations(&url).expect("migrations should apply"));
    Some(shared::db::connect(&url, 4).await.expect("pool should connect"))
}

/// Positive id no other test run will pick.
pub fn unique_id() -> i64 {
    (Uuid::new_v4().as_u128() as i64) & 0x7fff_ffff_ffff
}

pub async fn stocked_item(pool: &DbPool, quantity: i32, reorder_level: i32) -> InventoryItem {
    InventoryLedger::new(pool.clone())
        .register_item(RegisterItem {
            product_id: unique_id(),
            variant_id: None,
            warehouse_id: 1,
            opening_quantity: quantity,
            reorder_level,
        })
        .await
        .expect("item should register")
}
