use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shared::{Address, CoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingMethod {
    Standard,
    Express,
    Overnight,
}

impl ShippingMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ShippingMethod::Standard => "standard",
            ShippingMethod::Express => "express",
            ShippingMethod::Overnight => "overnight",
        }
    }
}

pub trait TaxCalculator: Send + Sync {
    fn tax(&self, subtotal: i64, address: &Address) -> i64;
}

pub trait ShippingCalculator: Send + Sync {
    fn shipping(&self, subtotal: i64, method: ShippingMethod) -> i64;
}

pub trait DiscountCalculator: Send + Sync {
    fn discount(&self, subtotal: i64, coupon_code: Option<&str>) -> i64;
}

/// `amount * bps / 10_000`, rounded half up. Saturates at `i64::MAX` so the
/// checked total in [`Pricing::quote`] rejects it.
fn apply_basis_points(amount: i64, bps: i64) -> i64 {
    let scaled = (i128::from(amount) * i128::from(bps) + 5_000) / 10_000;
    i64::try_from(scaled).unwrap_or(if scaled < 0 { i64::MIN } else { i64::MAX })
}

/// Single rate applied to every destination.
#[derive(Debug, Clone)]
pub struct FlatRateTax {
    pub rate_bps: i64,
}

impl TaxCalculator for FlatRateTax {
    fn tax(&self, subtotal: i64, _address: &Address) -> i64 {
        apply_basis_points(subtotal, self.rate_bps)
    }
}

#[derive(Debug, Clone)]
pub struct MethodRates {
    pub standard: i64,
    pub express: i64,
    pub overnight: i64,
    /// Standard shipping is free from this subtotal on.
    pub free_standard_from: Option<i64>,
}

impl ShippingCalculator for MethodRates {
    fn shipping(&self, subtotal: i64, method: ShippingMethod) -> i64 {
        match method {
            ShippingMethod::Standard => match self.free_standard_from {
                Some(threshold) if subtotal >= threshold => 0,
                _ => self.standard,
            },
            ShippingMethod::Express => self.express,
            ShippingMethod::Overnight => self.overnight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coupon {
    /// Basis points off the subtotal.
    Percent(i64),
    /// Minor units off the subtotal.
    Fixed(i64),
}

impl FromStr for Coupon {
    type Err = String;

    /// `10%` or `500`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(percent) = s.strip_suffix('%') {
            let percent: i64 = percent
                .trim()
                .parse()
                .map_err(|_| format!("invalid coupon percentage: {s}"))?;
            if !(0..=100).contains(&percent) {
                return Err(format!("coupon percentage out of range: {s}"));
            }
            Ok(Coupon::Percent(percent * 100))
        } else {
            let amount: i64 = s.parse().map_err(|_| format!("invalid coupon amount: {s}"))?;
            if amount < 0 {
                return Err(format!("coupon amount must not be negative: {s}"));
            }
            Ok(Coupon::Fixed(amount))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CouponBook {
    coupons: HashMap<String, Coupon>,
}

impl CouponBook {
    pub fn with_coupon(mut self, code: &str, coupon: Coupon) -> Self {
        self.coupons.insert(code.to_uppercase(), coupon);
        self
    }

    pub fn get(&self, code: &str) -> Option<Coupon> {
        self.coupons.get(&code.trim().to_uppercase()).copied()
    }
}

impl FromStr for CouponBook {
    type Err = String;

    /// Comma separated `CODE=coupon` pairs, e.g. `WELCOME10=10%,FIVEOFF=500`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut book = CouponBook::default();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (code, coupon) = entry
                .split_once('=')
                .ok_or_else(|| format!("coupon entry must be CODE=value: {entry}"))?;
            book = book.with_coupon(code.trim(), coupon.parse()?);
        }
        Ok(book)
    }
}

impl DiscountCalculator for CouponBook {
    fn discount(&self, subtotal: i64, coupon_code: Option<&str>) -> i64 {
        let Some(coupon) = coupon_code.and_then(|code| self.get(code)) else {
            if let Some(code) = coupon_code {
                tracing::debug!(coupon_code = code, "Unknown coupon code ignored");
            }
            return 0;
        };

        let discount = match coupon {
            Coupon::Percent(bps) => apply_basis_points(subtotal, bps),
            Coupon::Fixed(amount) => amount,
        };
        discount.clamp(0, subtotal.max(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub subtotal: i64,
    pub tax: i64,
    pub shipping: i64,
    pub discount: i64,
    pub total: i64,
}

/// The replaceable calculators an order is priced with.
#[derive(Clone)]
pub struct Pricing {
    pub tax: Arc<dyn TaxCalculator>,
    pub shipping: Arc<dyn ShippingCalculator>,
    pub discount: Arc<dyn DiscountCalculator>,
}

impl Pricing {
    pub fn new(
        tax: impl TaxCalculator + 'static,
        shipping: impl ShippingCalculator + 'static,
        discount: impl DiscountCalculator + 'static,
    ) -> Self {
        Self {
            tax: Arc::new(tax),
            shipping: Arc::new(shipping),
            discount: Arc::new(discount),
        }
    }

    pub fn quote(
        &self,
        subtotal: i64,
        address: &Address,
        method: ShippingMethod,
        coupon_code: Option<&str>,
    ) -> Result<Totals, CoreError> {
        let tax = self.tax.tax(subtotal, address);
        let shipping = self.shipping.shipping(subtotal, method);
        let discount = self.discount.discount(subtotal, coupon_code);
        let total = subtotal
            .checked_add(tax)
            .and_then(|t| t.checked_add(shipping))
            .and_then(|t| t.checked_sub(discount))
            .ok_or(CoreError::AmountOverflow)?;
        Ok(Totals {
            subtotal,
            tax,
            shipping,
            discount,
            total,
        })
    }
}
