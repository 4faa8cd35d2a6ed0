pub mod product;
pub mod repository;
pub mod stock;
pub mod memory;

pub use product::{Product, ProductDefaults};
pub use repository::ProductStore;
pub use stock::{StockEngine, StockService};
pub use memory::InMemoryProductStore;

#[derive(Debug, thiserror::Error)]
pub enum StockError {
    #[error("Product not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Store error in {operation}: {message}")]
    Store {
        operation: &'static str,
        message: String,
    },
    #[error("Optimistic lock failed: product {id} was updated by another transaction (held version {version})")]
    OptimisticLock { id: String, version: i64 },
}

impl StockError {
    pub fn store(operation: &'static str, message: impl std::fmt::Display) -> Self {
        StockError::Store {
            operation,
            message: message.to_string(),
        }
    }
}

pub type StockResult<T> = Result<T, StockError>;
