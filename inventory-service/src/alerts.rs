use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared::db::DbPool;
use shared::*;
use tracing::{debug, warn};

use crate::models::*;
use crate::schema::*;

/// What the current stock level of an item calls for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertDecision {
    /// Alert that should be open, with the threshold it was raised against.
    pub open: Option<(AlertType, i32)>,
    /// Alert types whose condition no longer holds.
    pub resolve: Vec<AlertType>,
}

pub fn classify(available: i32, reorder_level: i32) -> AlertDecision {
    if available <= 0 {
        AlertDecision {
            open: Some((AlertType::OutOfStock, 0)),
            resolve: Vec::new(),
        }
    } else if available <= reorder_level {
        AlertDecision {
            open: Some((AlertType::LowStock, reorder_level)),
            resolve: vec![AlertType::OutOfStock],
        }
    } else {
        AlertDecision {
            open: None,
            resolve: vec![AlertType::LowStock, AlertType::OutOfStock],
        }
    }
}

/// Opens or resolves alerts for one inventory row. At most one unresolved
/// alert per (item, type) exists; the partial unique index turns a racing
/// duplicate insert into a no-op.
pub async fn evaluate_item(
    conn: &mut AsyncPgConnection,
    inventory_item_id: i64,
) -> Result<Option<StockAlert>, CoreError> {
    let item = inventory_items::table
        .find(inventory_item_id)
        .first::<InventoryItem>(conn)
        .await
        .optional()?
        .ok_or_else(|| CoreError::not_found("inventory item", inventory_item_id))?;

    if item.status()? != InventoryStatus::Active {
        debug!(inventory_item_id, "Skipping alert evaluation for retired item");
        return Ok(None);
    }

    let decision = classify(item.available_quantity, item.reorder_level);

    if !decision.resolve.is_empty() {
        let types: Vec<&str> = decision.resolve.iter().map(|t| t.as_str()).collect();
        diesel::update(
            stock_alerts::table
                .filter(stock_alerts::inventory_item_id.eq(item.id))
                .filter(stock_alerts::resolved.eq(false))
                .filter(stock_alerts::alert_type.eq_any(types)),
        )
        .set((
            stock_alerts::resolved.eq(true),
            stock_alerts::resolved_at.eq(Some(Utc::now())),
        ))
        .execute(conn)
        .await?;
    }

    let Some((alert_type, threshold)) = decision.open else {
        return Ok(None);
    };

    let new_alert = NewStockAlert {
        inventory_item_id: item.id,
        product_id: item.product_id,
        warehouse_id: item.warehouse_id,
        alert_type: alert_type.as_str().to_string(),
        threshold,
        current_quantity: item.available_quantity,
    };

    let created = diesel::insert_into(stock_alerts::table)
        .values(&new_alert)
        .on_conflict_do_nothing()
        .get_result::<StockAlert>(conn)
        .await
        .optional()?;

    if let Some(alert) = &created {
        warn!(
            alert_id = alert.id,
            inventory_item_id = item.id,
            product_id = item.product_id,
            warehouse_id = item.warehouse_id,
            alert_type = %alert_type,
            available = item.available_quantity,
            "Stock alert raised"
        );
    }

    Ok(created)
}

/// Evaluates alerts for the given rows on a detached task. Failures are
/// logged only.
pub fn spawn_evaluation(pool: DbPool, mut inventory_item_ids: Vec<i64>) {
    inventory_item_ids.sort_unstable();
    inventory_item_ids.dedup();

    tokio::spawn(async move {
        let mut conn = match pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Skipping stock alert evaluation, no connection");
                return;
            }
        };

        for inventory_item_id in inventory_item_ids {
            if let Err(e) = evaluate_item(&mut conn, inventory_item_id).await {
                warn!(inventory_item_id, error = %e, "Stock alert evaluation failed");
            }
        }
    });
}

pub async fn open_alerts(pool: &DbPool, limit: i64) -> Result<Vec<StockAlert>, CoreError> {
    let mut conn = pool.get().await?;
    let alerts = stock_alerts::table
        .filter(stock_alerts::resolved.eq(false))
        .order(stock_alerts::created_at.desc())
        .limit(limit)
        .load::<StockAlert>(&mut conn)
        .await?;
    Ok(alerts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_stock() {
        let decision = classify(0, 5);
        assert_eq!(decision.open, Some((AlertType::OutOfStock, 0)));
        assert!(decision.resolve.is_empty());
    }

    #[test]
    fn test_low_stock_resolves_out_of_stock() {
        let decision = classify(3, 5);
        assert_eq!(decision.open, Some((AlertType::LowStock, 5)));
        assert_eq!(decision.resolve, vec![AlertType::OutOfStock]);
    }

    #[test]
    fn test_low_stock_at_reorder_level() {
        assert_eq!(classify(5, 5).open, Some((AlertType::LowStock, 5)));
    }

    #[test]
    fn test_healthy_stock_resolves_everything() {
        let decision = classify(6, 5);
        assert_eq!(decision.open, None);
        assert_eq!(decision.resolve.len(), 2);
    }

    #[test]
    fn test_zero_reorder_level_only_alerts_when_empty() {
        assert_eq!(classify(1, 0).open, None);
        assert_eq!(classify(0, 0).open, Some((AlertType::OutOfStock, 0)));
    }
}
