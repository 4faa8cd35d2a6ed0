use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::product::{Product, ProductDefaults};
use crate::repository::ProductStore;
use crate::{StockError, StockResult};

/// Operations exposed to the outer layers, independent of the backing store.
#[async_trait]
pub trait StockService: Send + Sync {
    /// Adjust stock by `delta`, creating the product on first use.
    /// `None` creates a product under a generated id.
    async fn process_stock(&self, id: Option<&str>, delta: i64) -> StockResult<Product>;

    async fn get_product(&self, id: &str) -> StockResult<Product>;
}

/// Read-lock-modify-write over a `ProductStore`.
///
/// Mutators of one id are serialized by the lock taken in
/// `find_by_id_for_update`; the version check in `update` only fires for
/// writers that bypassed that lock. Nothing is retried here.
pub struct StockEngine<S> {
    store: S,
    defaults: ProductDefaults,
}

impl<S: ProductStore> StockEngine<S> {
    pub fn new(store: S, defaults: ProductDefaults) -> Self {
        Self { store, defaults }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[instrument(skip(self))]
    pub async fn process_stock(&self, id: Option<&str>, delta: i64) -> StockResult<Product> {
        if matches!(id, Some(id) if id.is_empty()) {
            return Err(StockError::InvalidInput("product id must not be empty".to_string()));
        }

        let mut tx = self.store.begin().await?;

        match self.apply(&mut tx, id, delta).await {
            Ok(product) => {
                self.store.commit(tx).await?;
                Ok(product)
            }
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback(tx).await {
                    warn!(error = %rollback_err, "failed to rollback");
                }
                Err(err)
            }
        }
    }

    async fn apply(&self, tx: &mut S::Tx, id: Option<&str>, delta: i64) -> StockResult<Product> {
        let existing = match id {
            Some(id) => self.store.find_by_id_for_update(tx, id).await?,
            None => None,
        };

        match existing {
            None => {
                let mut product = Product::draft(id.unwrap_or_default(), delta, &self.defaults);
                self.store.create(tx, &mut product).await?;
                info!(product_id = %product.id, stock = product.stock, "created product");
                Ok(product)
            }
            Some(mut product) => {
                product.stock = product.stock.checked_add(delta).ok_or_else(|| {
                    StockError::InvalidInput(format!(
                        "stock change {} overflows stock {} of product {}",
                        delta, product.stock, product.id
                    ))
                })?;

                if let Err(err) = self.store.update(tx, &mut product).await {
                    if matches!(err, StockError::OptimisticLock { .. }) {
                        warn!(product_id = %product.id, "version check failed under row lock");
                    }
                    return Err(err);
                }

                info!(
                    product_id = %product.id,
                    stock = product.stock,
                    version = product.version,
                    "updated product stock"
                );
                Ok(product)
            }
        }
    }

    pub async fn get_product(&self, id: &str) -> StockResult<Product> {
        if id.is_empty() {
            return Err(StockError::InvalidInput("product id is required".to_string()));
        }

        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| StockError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl<S: ProductStore> StockService for StockEngine<S> {
    async fn process_stock(&self, id: Option<&str>, delta: i64) -> StockResult<Product> {
        StockEngine::process_stock(self, id, delta).await
    }

    async fn get_product(&self, id: &str) -> StockResult<Product> {
        StockEngine::get_product(self, id).await
    }
}
