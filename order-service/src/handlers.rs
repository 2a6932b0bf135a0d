use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use inventory_service::alerts;
use inventory_service::ledger::lock_candidates;
use inventory_service::models::InventoryItem;
use inventory_service::reservations::{self, ReserveRequest};
use serde::Deserialize;
use shared::db::DbPool;
use shared::*;
use tracing::{error, info, warn};

use crate::cart::CartStore;
use crate::models::*;
use crate::notifier::{Notifier, OrderConfirmation};
use crate::pricing::{Pricing, ShippingMethod};
use crate::schema::*;

/// `ORD-<YYYYMMDD>-<id>`, the id zero-padded to six digits.
pub fn format_order_number(created_at: DateTime<Utc>, order_id: i64) -> String {
    format!("ORD-{}-{:06}", created_at.format("%Y%m%d"), order_id)
}

#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub user_id: i64,
    pub cart: CartSnapshot,
    pub shipping_address: Address,
    /// Defaults to the shipping address.
    pub billing_address: Option<Address>,
    pub shipping_method: ShippingMethod,
    pub payment_method: String,
    pub coupon_code: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub changed_by: Option<i64>,
}

/// A cart line that passed validation, with the stock row it will be
/// reserved against when the product tracks quantity.
struct CheckedLine<'a> {
    line: &'a CartLine,
    product: Product,
    variant: Option<ProductVariant>,
    stock: Option<InventoryItem>,
}

#[derive(Clone)]
pub struct OrderHandler {
    pool: DbPool,
    pricing: Pricing,
    carts: Arc<dyn CartStore>,
    notifier: Arc<dyn Notifier>,
    reservation_ttl: Duration,
    currency: String,
}

impl OrderHandler {
    pub fn new(
        pool: DbPool,
        pricing: Pricing,
        carts: Arc<dyn CartStore>,
        notifier: Arc<dyn Notifier>,
        reservation_ttl: Duration,
    ) -> Self {
        Self {
            pool,
            pricing,
            carts,
            notifier,
            reservation_ttl,
            currency: "USD".to_string(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn carts(&self) -> &Arc<dyn CartStore> {
        &self.carts
    }

    /// Turns a cart snapshot into a committed order with its stock reserved.
    ///
    /// Validation, pricing, the order rows and every reservation share one
    /// transaction. Clearing the cart and the confirmation happen after
    /// commit and never fail the call.
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<OrderDetails, CoreError> {
        if request.cart.is_empty() {
            return Err(CoreError::EmptyCart);
        }

        let user_id = request.user_id;
        let request = &request;
        let mut conn = self.pool.get().await?;

        let (details, reserved_items) = conn
            .transaction::<_, CoreError, _>(|conn| {
                async move { self.place_order(conn, request).await }.scope_boxed()
            })
            .await?;

        info!(
            order_id = details.order.id,
            order_number = details.order.order_number.as_deref().unwrap_or_default(),
            user_id,
            total_amount = details.order.total_amount,
            "Order created"
        );

        if let Err(e) = self.carts.clear(&request.cart).await {
            warn!(user_id, order_id = details.order.id, "Failed to clear cart after order: {}", e);
        }

        let notifier = Arc::clone(&self.notifier);
        let confirmation = OrderConfirmation::from(&details);
        tokio::spawn(async move {
            if let Err(e) = notifier.send_order_confirmation(&confirmation).await {
                error!(order_id = confirmation.order_id, "Failed to send order confirmation: {}", e);
            }
        });

        if !reserved_items.is_empty() {
            alerts::spawn_evaluation(self.pool.clone(), reserved_items);
        }

        Ok(details)
    }

    async fn place_order(
        &self,
        conn: &mut AsyncPgConnection,
        request: &CreateOrderRequest,
    ) -> Result<(OrderDetails, Vec<i64>), CoreError> {
        let subtotal = CartLine::subtotal(&request.cart.lines)?;
        let checked = check_lines(conn, &request.cart.lines).await?;

        let totals = self.pricing.quote(
            subtotal,
            &request.shipping_address,
            request.shipping_method,
            request.coupon_code.as_deref(),
        )?;

        let shipping_address = to_json(&request.shipping_address)?;
        let billing_address = match &request.billing_address {
            Some(address) => to_json(address)?,
            None => shipping_address.clone(),
        };

        let new_order = NewOrder {
            user_id: request.user_id,
            status: OrderStatus::Pending.as_str().to_string(),
            payment_status: PaymentStatus::Pending.as_str().to_string(),
            payment_method: request.payment_method.clone(),
            shipping_method: request.shipping_method.as_str().to_string(),
            coupon_code: request.coupon_code.clone(),
            currency: self.currency.clone(),
            subtotal_amount: totals.subtotal,
            tax_amount: totals.tax,
            shipping_amount: totals.shipping,
            discount_amount: totals.discount,
            total_amount: totals.total,
            shipping_address,
            billing_address,
            notes: request.notes.clone(),
        };

        let order = diesel::insert_into(orders::table)
            .values(&new_order)
            .get_result::<Order>(conn)
            .await?;

        let order_number = format_order_number(order.created_at, order.id);
        let order = diesel::update(orders::table.find(order.id))
            .set(orders::order_number.eq(Some(order_number.as_str())))
            .get_result::<Order>(conn)
            .await?;

        let mut items = Vec::with_capacity(checked.len());
        let mut reserved_items = Vec::new();

        for checked_line in &checked {
            let line = checked_line.line;
            let sku = match &checked_line.variant {
                Some(variant) => variant.sku.clone(),
                None => checked_line.product.sku.clone(),
            };

            let new_item = NewOrderItem {
                order_id: order.id,
                product_id: line.product_id,
                variant_id: line.variant_id,
                sku,
                product_name: checked_line.product.name.clone(),
                variant_title: checked_line.variant.as_ref().map(|v| v.title.clone()),
                quantity: line.quantity,
                unit_price: line.unit_price,
                total_price: line.line_total()?,
            };

            let item = diesel::insert_into(order_items::table)
                .values(&new_item)
                .get_result::<OrderItem>(conn)
                .await?;

            if let Some(stock) = &checked_line.stock {
                let reserve = ReserveRequest {
                    product_id: line.product_id,
                    variant_id: line.variant_id,
                    warehouse_id: stock.warehouse_id,
                    order_id: order.id,
                    order_item_id: item.id,
                    quantity: line.quantity,
                };
                reservations::reserve_in(conn, &reserve, self.reservation_ttl)
                    .await
                    .map_err(|e| match e {
                        CoreError::InsufficientStock { available, .. } => {
                            CoreError::insufficient_inventory(
                                line.product_id,
                                line.variant_id,
                                line.quantity,
                                available,
                            )
                        }
                        other => other,
                    })?;
                reserved_items.push(stock.id);
            }

            items.push(item);
        }

        let entry = append_history(
            conn,
            order.id,
            OrderStatus::Pending,
            Some("Order created".to_string()),
            Some(request.user_id),
        )
        .await?;

        Ok((
            OrderDetails {
                order,
                items,
                history: vec![entry],
            },
            reserved_items,
        ))
    }

    /// Moves an order along the status graph, applying the stock side effects
    /// of the target status in the same transaction.
    pub async fn update_status(&self, order_id: i64, change: StatusChange) -> Result<OrderDetails, CoreError> {
        let mut conn = self.pool.get().await?;

        let (details, touched, previous) = conn
            .transaction::<_, CoreError, _>(|conn| {
                async move { transition(conn, order_id, &change).await }.scope_boxed()
            })
            .await?;

        info!(
            order_id,
            from = %previous,
            to = %details.order.status,
            "Order status updated"
        );

        if !touched.is_empty() {
            alerts::spawn_evaluation(self.pool.clone(), touched);
        }

        Ok(details)
    }

    pub async fn cancel_order(
        &self,
        order_id: i64,
        reason: Option<String>,
        cancelled_by: Option<i64>,
    ) -> Result<OrderDetails, CoreError> {
        self.update_status(
            order_id,
            StatusChange {
                status: OrderStatus::Cancelled,
                comment: reason.or_else(|| Some("Order cancelled".to_string())),
                changed_by: cancelled_by,
            },
        )
        .await
    }

    pub async fn get_order(&self, order_id: i64) -> Result<OrderDetails, CoreError> {
        let mut conn = self.pool.get().await?;
        let order = orders::table
            .find(order_id)
            .first::<Order>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| CoreError::not_found("order", order_id))?;
        load_details(&mut conn, order).await
    }
}

fn to_json(address: &Address) -> Result<serde_json::Value, CoreError> {
    serde_json::to_value(address).map_err(|e| {
        CoreError::PersistenceFailure(diesel::result::Error::SerializationError(Box::new(e)))
    })
}

/// Validates every cart line and picks the stock row each tracked line will
/// draw from. Lines are visited in (product, variant) order so concurrent
/// checkouts lock inventory rows in the same order; the result keeps cart
/// order.
async fn check_lines<'a>(
    conn: &mut AsyncPgConnection,
    lines: &'a [CartLine],
) -> Result<Vec<CheckedLine<'a>>, CoreError> {
    let mut order: Vec<usize> = (0..lines.len()).collect();
    order.sort_by_key(|&i| (lines[i].product_id, lines[i].variant_id));

    let mut claimed: HashMap<i64, i32> = HashMap::new();
    let mut checked: Vec<(usize, CheckedLine<'a>)> = Vec::with_capacity(lines.len());

    for index in order {
        let line = &lines[index];
        if line.quantity <= 0 {
            return Err(CoreError::InvalidQuantity(line.quantity));
        }

        let product = products::table
            .find(line.product_id)
            .first::<Product>(conn)
            .await
            .optional()?
            .ok_or_else(|| CoreError::not_found("product", line.product_id))?;
        if !product.is_active() {
            return Err(CoreError::ProductUnavailable {
                product_id: product.id,
            });
        }

        let variant = match line.variant_id {
            Some(variant_id) => {
                let variant = product_variants::table
                    .filter(product_variants::id.eq(variant_id))
                    .filter(product_variants::product_id.eq(product.id))
                    .first::<ProductVariant>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| CoreError::not_found("product variant", variant_id))?;
                if !variant.is_active() {
                    return Err(CoreError::ProductUnavailable {
                        product_id: product.id,
                    });
                }
                Some(variant)
            }
            None => None,
        };

        let stock = if product.track_quantity {
            let candidates = lock_candidates(conn, line.product_id, line.variant_id).await?;
            let unclaimed = |item: &InventoryItem| {
                item.available_quantity - claimed.get(&item.id).copied().unwrap_or(0)
            };
            let best = candidates
                .into_iter()
                .max_by(|a, b| unclaimed(a).cmp(&unclaimed(b)).then(b.id.cmp(&a.id)));

            let available = best.as_ref().map(&unclaimed).unwrap_or(0);
            match best {
                Some(item) if available >= line.quantity => {
                    *claimed.entry(item.id).or_insert(0) += line.quantity;
                    Some(item)
                }
                _ => {
                    return Err(CoreError::insufficient_inventory(
                        line.product_id,
                        line.variant_id,
                        line.quantity,
                        available,
                    ))
                }
            }
        } else {
            None
        };

        checked.push((
            index,
            CheckedLine {
                line,
                product,
                variant,
                stock,
            },
        ));
    }

    checked.sort_by_key(|(index, _)| *index);
    Ok(checked.into_iter().map(|(_, line)| line).collect())
}

async fn append_history(
    conn: &mut AsyncPgConnection,
    order_id: i64,
    status: OrderStatus,
    comment: Option<String>,
    changed_by: Option<i64>,
) -> Result<OrderStatusHistory, CoreError> {
    let entry = NewOrderStatusHistory {
        order_id,
        status: status.as_str().to_string(),
        comment,
        changed_by,
    };
    let entry = diesel::insert_into(order_status_history::table)
        .values(&entry)
        .get_result::<OrderStatusHistory>(conn)
        .await?;
    Ok(entry)
}

async fn transition(
    conn: &mut AsyncPgConnection,
    order_id: i64,
    change: &StatusChange,
) -> Result<(OrderDetails, Vec<i64>, OrderStatus), CoreError> {
    let order = orders::table
        .find(order_id)
        .for_update()
        .first::<Order>(conn)
        .await
        .optional()?
        .ok_or_else(|| CoreError::not_found("order", order_id))?;

    let current = order.status()?;
    let next = current.transition_to(change.status)?;

    let touched = match next {
        OrderStatus::Cancelled => reservations::restore_order_in(conn, order.id).await?,
        OrderStatus::Shipped => reservations::fulfill_order_in(conn, order.id).await?,
        _ => Vec::new(),
    };

    let now = Utc::now();
    let stamp = |target: OrderStatus, existing: Option<DateTime<Utc>>| {
        if next == target {
            Some(now)
        } else {
            existing
        }
    };
    let payment_status = if next == OrderStatus::Refunded {
        PaymentStatus::Refunded.as_str().to_string()
    } else {
        order.payment_status.clone()
    };

    let order = diesel::update(orders::table.find(order.id))
        .set((
            orders::status.eq(next.as_str()),
            orders::payment_status.eq(payment_status),
            orders::shipped_at.eq(stamp(OrderStatus::Shipped, order.shipped_at)),
            orders::delivered_at.eq(stamp(OrderStatus::Delivered, order.delivered_at)),
            orders::cancelled_at.eq(stamp(OrderStatus::Cancelled, order.cancelled_at)),
            orders::updated_at.eq(now),
        ))
        .get_result::<Order>(conn)
        .await?;

    append_history(conn, order.id, next, change.comment.clone(), change.changed_by).await?;

    let details = load_details(conn, order).await?;
    Ok((details, touched, current))
}

async fn load_details(conn: &mut AsyncPgConnection, order: Order) -> Result<OrderDetails, CoreError> {
    let items = OrderItem::belonging_to(&order)
        .order(order_items::id.asc())
        .load::<OrderItem>(conn)
        .await?;
    let history = OrderStatusHistory::belonging_to(&order)
        .order(order_status_history::id.asc())
        .load::<OrderStatusHistory>(conn)
        .await?;
    Ok(OrderDetails {
        order,
        items,
        history,
    })
}
