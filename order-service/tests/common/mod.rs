#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use chrono::Duration;
use diesel_async::RunQueryDsl;
use inventory_service::ledger::RegisterItem;
use inventory_service::models::InventoryItem;
use inventory_service::InventoryLedger;
use order_service::handlers::{CreateOrderRequest, OrderHandler};
use order_service::models::{NewProduct, NewProductVariant, Product, ProductVariant};
use order_service::notifier::{Notifier, OrderConfirmation};
use order_service::pricing::{CouponBook, FlatRateTax, MethodRates, Pricing, ShippingMethod};
use order_service::schema::{product_variants, products};
use order_service::CartStore;
use shared::db::DbPool;
use shared::{Address, CartLine, CartSnapshot};
use uuid::Uuid;

static MIGRATE: Once = Once::new();

pub async fn test_pool() -> Option<DbPool> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping database test");
        return None;
    };
    MIGRATE.call_once(|| shared::db::run_migrations(&url).expect("migrations should apply"));
    Some(shared::db::connect(&url, 4).await.expect("pool should connect"))
}

pub fn unique_id() -> i64 {
    (Uuid::new_v4().as_u128() as i64) & 0x7fff_ffff_ffff
}

/// Records which carts were emptied.
#[derive(Default)]
pub struct MemoryCarts {
    pub cleared: Mutex<Vec<i64>>,
}

#[async_trait]
impl CartStore for MemoryCarts {
    async fn snapshot(&self, user_id: i64) -> anyhow::Result<CartSnapshot> {
        Ok(CartSnapshot::new(user_id, Vec::new())?)
    }

    async fn clear(&self, cart: &CartSnapshot) -> anyhow::Result<()> {
        self.cleared.lock().unwrap().push(cart.user_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<OrderConfirmation>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_order_confirmation(&self, confirmation: &OrderConfirmation) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(confirmation.clone());
        Ok(())
    }
}

/// Untaxed, free standard shipping, no coupons.
pub fn untaxed() -> Pricing {
    Pricing::new(
        FlatRateTax { rate_bps: 0 },
        MethodRates {
            standard: 0,
            express: 1500,
            overnight: 3000,
            free_standard_from: None,
        },
        CouponBook::default(),
    )
}

pub struct Harness {
    pub pool: DbPool,
    pub orders: OrderHandler,
    pub ledger: InventoryLedger,
    pub carts: Arc<MemoryCarts>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new(pool: DbPool) -> Self {
        Self::with_pricing(pool, untaxed())
    }

    pub fn with_pricing(pool: DbPool, pricing: Pricing) -> Self {
        Self::build(pool, pricing, Duration::hours(24))
    }

    /// Holds placed by this harness lapse `ttl` after checkout; a negative
    /// ttl makes them due for the sweeper at once.
    pub fn with_reservation_ttl(pool: DbPool, ttl: Duration) -> Self {
        Self::build(pool, untaxed(), ttl)
    }

    fn build(pool: DbPool, pricing: Pricing, ttl: Duration) -> Self {
        let carts = Arc::new(MemoryCarts::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let orders = OrderHandler::new(
            pool.clone(),
            pricing,
            carts.clone(),
            notifier.clone(),
            ttl,
        );
        Self {
            ledger: InventoryLedger::new(pool.clone()),
            pool,
            orders,
            carts,
            notifier,
        }
    }

    pub async fn product(&self, price: i64, track_quantity: bool) -> Product {
        let mut conn = self.pool.get().await.unwrap();
        diesel::insert_into(products::table)
            .values(&NewProduct {
                name: "Enamel Mug".to_string(),
                sku: format!("MUG-{}", unique_id()),
                price,
                status: "active".to_string(),
                track_quantity,
            })
            .get_result::<Product>(&mut conn)
            .await
            .unwrap()
    }

    pub async fn variant(&self, product: &Product, title: &str) -> ProductVariant {
        let mut conn = self.pool.get().await.unwrap();
        diesel::insert_into(product_variants::table)
            .values(&NewProductVariant {
                product_id: product.id,
                sku: format!("MUG-{}-{}", title, unique_id()),
                title: title.to_string(),
                price: product.price,
                status: "active".to_string(),
            })
            .get_result::<ProductVariant>(&mut conn)
            .await
            .unwrap()
    }

    pub async fn stock(
        &self,
        product_id: i64,
        variant_id: Option<i64>,
        warehouse_id: i64,
        quantity: i32,
    ) -> InventoryItem {
        self.ledger
            .register_item(RegisterItem {
                product_id,
                variant_id,
                warehouse_id,
                opening_quantity: quantity,
                reorder_level: 0,
            })
            .await
            .unwrap()
    }

    pub async fn item(&self, inventory_item_id: i64) -> InventoryItem {
        self.ledger.get_item(inventory_item_id).await.unwrap()
    }
}

pub fn line(product: &Product, quantity: i32) -> CartLine {
    CartLine {
        line_id: None,
        product_id: product.id,
        variant_id: None,
        quantity,
        unit_price: product.price,
    }
}

pub fn address() -> Address {
    Address {
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        company: None,
        address_line1: "12 St James's Square".to_string(),
        address_line2: None,
        city: "London".to_string(),
        state: "LND".to_string(),
        postal_code: "SW1Y 4JH".to_string(),
        country: "GB".to_string(),
        phone: None,
    }
}

pub fn checkout(user_id: i64, lines: Vec<CartLine>) -> CreateOrderRequest {
    CreateOrderRequest {
        user_id,
        cart: CartSnapshot::new(user_id, lines).unwrap(),
        shipping_address: address(),
        billing_address: None,
        shipping_method: ShippingMethod::Standard,
        payment_method: "card".to_string(),
        coupon_code: None,
        notes: None,
    }
}
