use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::*;

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::orders)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub order_number: Option<String>,
    pub status: String,
    pub payment_status: String,
    pub payment_method: String,
    pub shipping_method: String,
    pub coupon_code: Option<String>,
    pub currency: String,
    pub subtotal_amount: i64,
    pub tax_amount: i64,
    pub shipping_amount: i64,
    pub discount_amount: i64,
    pub total_amount: i64,
    pub shipping_address: serde_json::Value,
    pub billing_address: serde_json::Value,
    pub notes: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn status(&self) -> Result<OrderStatus, CoreError> {
        self.status.parse()
    }

    pub fn payment_status(&self) -> Result<PaymentStatus, CoreError> {
        self.payment_status.parse()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder {
    pub user_id: i64,
    pub status: String,
    pub payment_status: String,
    pub payment_method: String,
    pub shipping_method: String,
    pub coupon_code: Option<String>,
    pub currency: String,
    pub subtotal_amount: i64,
    pub tax_amount: i64,
    pub shipping_amount: i64,
    pub discount_amount: i64,
    pub total_amount: i64,
    pub shipping_address: serde_json::Value,
    pub billing_address: serde_json::Value,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize, Deserialize)]
#[diesel(belongs_to(Order))]
#[diesel(table_name = crate::schema::order_items)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub sku: String,
    pub product_name: String,
    pub variant_title: Option<String>,
    pub quantity: i32,
    pub unit_price: i64,
    pub total_price: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::order_items)]
pub struct NewOrderItem {
    pub order_id: i64,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub sku: String,
    pub product_name: String,
    pub variant_title: Option<String>,
    pub quantity: i32,
    pub unit_price: i64,
    pub total_price: i64,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize, Deserialize)]
#[diesel(belongs_to(Order))]
#[diesel(table_name = crate::schema::order_status_history)]
pub struct OrderStatusHistory {
    pub id: i64,
    pub order_id: i64,
    pub status: String,
    pub comment: Option<String>,
    pub changed_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::order_status_history)]
pub struct NewOrderStatusHistory {
    pub order_id: i64,
    pub status: String,
    pub comment: Option<String>,
    pub changed_by: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::products)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub sku: String,
    pub price: i64,
    pub status: String,
    pub track_quantity: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::products)]
pub struct NewProduct {
    pub name: String,
    pub sku: String,
    pub price: i64,
    pub status: String,
    pub track_quantity: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize, Deserialize)]
#[diesel(belongs_to(Product))]
#[diesel(table_name = crate::schema::product_variants)]
pub struct ProductVariant {
    pub id: i64,
    pub product_id: i64,
    pub sku: String,
    pub title: String,
    pub price: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductVariant {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::product_variants)]
pub struct NewProductVariant {
    pub product_id: i64,
    pub sku: String,
    pub title: String,
    pub price: i64,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::carts)]
pub struct Cart {
    pub id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::carts)]
pub struct NewCart {
    pub user_id: i64,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(belongs_to(Cart))]
#[diesel(table_name = crate::schema::cart_items)]
pub struct CartItem {
    pub id: i64,
    pub cart_id: i64,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub quantity: i32,
    pub unit_price: i64,
    pub created_at: DateTime<Utc>,
}

impl From<CartItem> for CartLine {
    fn from(item: CartItem) -> Self {
        Self {
            line_id: Some(item.id),
            product_id: item.product_id,
            variant_id: item.variant_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::cart_items)]
pub struct NewCartItem {
    pub cart_id: i64,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub quantity: i32,
    pub unit_price: i64,
}

/// An order together with the rows it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetails {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub history: Vec<OrderStatusHistory>,
}
