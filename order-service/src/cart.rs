use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use shared::db::DbPool;
use shared::*;

use crate::models::*;
use crate::schema::*;

/// Source of cart contents at checkout, and the place checked-out lines are
/// removed once their order is committed.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn snapshot(&self, user_id: i64) -> Result<CartSnapshot>;

    /// Removes the lines of `cart` from the user's cart. Lines added after the
    /// snapshot was taken stay.
    async fn clear(&self, cart: &CartSnapshot) -> Result<()>;
}

/// Reads carts from the storefront's `carts`/`cart_items` tables.
pub struct DbCartStore {
    pool: DbPool,
}

impl DbCartStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Adds a line to the user's cart at `unit_price`, creating the cart if
    /// needed.
    pub async fn add_line(&self, user_id: i64, line: &CartLine) -> Result<()> {
        let mut conn = self.pool.get().await?;

        let cart_id = match carts::table
            .filter(carts::user_id.eq(user_id))
            .select(carts::id)
            .first::<i64>(&mut conn)
            .await
            .optional()?
        {
            Some(id) => id,
            None => {
                diesel::insert_into(carts::table)
                    .values(&NewCart { user_id })
                    .returning(carts::id)
                    .get_result::<i64>(&mut conn)
                    .await?
            }
        };

        let new_item = NewCartItem {
            cart_id,
            product_id: line.product_id,
            variant_id: line.variant_id,
            quantity: line.quantity,
            unit_price: line.unit_price,
        };
        diesel::insert_into(cart_items::table)
            .values(&new_item)
            .execute(&mut conn)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl CartStore for DbCartStore {
    async fn snapshot(&self, user_id: i64) -> Result<CartSnapshot> {
        let mut conn = self.pool.get().await?;

        let cart = carts::table
            .filter(carts::user_id.eq(user_id))
            .first::<Cart>(&mut conn)
            .await
            .optional()?;

        let Some(cart) = cart else {
            return Ok(CartSnapshot::new(user_id, Vec::new())?);
        };

        let lines = CartItem::belonging_to(&cart)
            .order(cart_items::id.asc())
            .load::<CartItem>(&mut conn)
            .await?
            .into_iter()
            .map(CartLine::from)
            .collect();

        Ok(CartSnapshot::new(user_id, lines)?)
    }

    async fn clear(&self, cart: &CartSnapshot) -> Result<()> {
        let line_ids: Vec<i64> = cart.lines.iter().filter_map(|line| line.line_id).collect();
        if line_ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.pool.get().await?;

        let cart_ids = carts::table
            .filter(carts::user_id.eq(cart.user_id))
            .select(carts::id);

        diesel::delete(
            cart_items::table
                .filter(cart_items::cart_id.eq_any(cart_ids))
                .filter(cart_items::id.eq_any(line_ids)),
        )
        .execute(&mut conn)
        .await?;

        Ok(())
    }
}
