use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stocked product. `version` is the fencing token checked on every update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub stock: i64,
    pub price: f64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values used for products created implicitly by a first stock adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDefaults {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_price")]
    pub price: f64,
}

fn default_name() -> String { "New Product".to_string() }
fn default_price() -> f64 { 1000.0 }

impl Default for ProductDefaults {
    fn default() -> Self {
        Self {
            name: default_name(),
            price: default_price(),
        }
    }
}

impl Product {
    /// Unsaved product carrying the defaults. Timestamps and version are
    /// overwritten by the store on insert; an empty `id` is filled in there too.
    pub fn draft(id: impl Into<String>, stock: i64, defaults: &ProductDefaults) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: defaults.name.clone(),
            stock,
            price: defaults.price,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
