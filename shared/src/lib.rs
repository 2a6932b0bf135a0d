use serde::{Deserialize, Serialize};

/// Declares a closed set of values stored as lowercase strings in the
/// database and on the wire.
macro_rules! db_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident as $kind:literal {
            $($variant:ident => $value:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $value)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $value),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($value => Ok($name::$variant),)+
                    other => Err(crate::CoreError::UnknownValue {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub mod db;
pub mod error;
pub mod inventory;
pub mod status;

pub use error::CoreError;
pub use inventory::*;
pub use status::*;

pub type CoreResult<T> = Result<T, CoreError>;

/// Postal address copied onto an order at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub company: Option<String>,
    pub address_line1: String,
    #[serde(default)]
    pub address_line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Row id in the cart store, when the line came from one.
    #[serde(default)]
    pub line_id: Option<i64>,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub quantity: i32,
    /// Unit price in minor units, captured when the line was added to the cart.
    pub unit_price: i64,
}

impl CartLine {
    /// `unit_price * quantity`, rejecting negative prices and totals that do
    /// not fit in minor units.
    pub fn line_total(&self) -> Result<i64, CoreError> {
        if self.unit_price < 0 {
            return Err(CoreError::InvalidPrice {
                product_id: self.product_id,
                unit_price: self.unit_price,
            });
        }
        self.unit_price
            .checked_mul(i64::from(self.quantity))
            .ok_or(CoreError::AmountOverflow)
    }

    pub fn subtotal(lines: &[CartLine]) -> Result<i64, CoreError> {
        lines.iter().try_fold(0i64, |sum, line| {
            sum.checked_add(line.line_total()?)
                .ok_or(CoreError::AmountOverflow)
        })
    }
}

/// The cart as it stood when checkout was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub user_id: i64,
    pub lines: Vec<CartLine>,
    pub subtotal: i64,
}

impl CartSnapshot {
    pub fn new(user_id: i64, lines: Vec<CartLine>) -> Result<Self, CoreError> {
        let subtotal = CartLine::subtotal(&lines)?;
        Ok(Self {
            user_id,
            lines,
            subtotal,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Back-link from an inventory movement to whatever caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub reference_type: String,
    pub reference_id: i64,
}

impl Reference {
    pub fn order(order_id: i64) -> Self {
        Self {
            reference_type: "order".to_string(),
            reference_id: order_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product_id: i64, quantity: i32, unit_price: i64) -> CartLine {
        CartLine {
            line_id: None,
            product_id,
            variant_id: None,
            quantity,
            unit_price,
        }
    }

    #[test]
    fn test_snapshot_subtotal_uses_captured_prices() {
        let snapshot = CartSnapshot::new(7, vec![line(1, 2, 500), line(2, 1, 1250)]).unwrap();
        assert_eq!(snapshot.subtotal, 2250);
        assert!(!snapshot.is_empty());
    }

    #[test]
    fn test_line_total_overflow_is_an_error() {
        let err = CartSnapshot::new(1, vec![line(1, 3, 4_000_000_000_000_000_000)]).unwrap_err();
        assert!(matches!(err, CoreError::AmountOverflow), "got {err:?}");
    }

    #[test]
    fn test_subtotal_overflow_across_lines_is_an_error() {
        let lines = vec![line(1, 1, i64::MAX), line(2, 1, 1)];
        assert!(matches!(CartLine::subtotal(&lines), Err(CoreError::AmountOverflow)));
    }

    #[test]
    fn test_negative_price_is_rejected() {
        let err = line(4, 1, -10).line_total().unwrap_err();
        assert!(
            matches!(err, CoreError::InvalidPrice { product_id: 4, unit_price: -10 }),
            "got {err:?}"
        );
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = CartSnapshot::new(7, Vec::new()).unwrap();
        assert_eq!(snapshot.subtotal, 0);
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_address_optional_fields_default() {
        let json = serde_json::json!({
            "first_name": "Ada",
            "last_name": "Lovelace",
            "address_line1": "12 St James's Square",
            "city": "London",
            "state": "LDN",
            "postal_code": "SW1Y 4JH",
            "country": "GB"
        });
        let address: Address = serde_json::from_value(json).unwrap();
        assert_eq!(address.company, None);
        assert_eq!(address.phone, None);
    }
}
