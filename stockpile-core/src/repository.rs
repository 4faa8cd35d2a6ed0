use async_trait::async_trait;
use crate::product::Product;
use crate::StockResult;

/// Data access for products.
///
/// Transaction boundaries belong to the caller: `begin`/`commit`/`rollback`
/// are the only methods that open or close a transaction, and every write goes
/// through the transaction handle it is given.
#[async_trait]
pub trait ProductStore: Send + Sync {
    type Tx: Send;

    async fn begin(&self) -> StockResult<Self::Tx>;

    async fn commit(&self, tx: Self::Tx) -> StockResult<()>;

    async fn rollback(&self, tx: Self::Tx) -> StockResult<()>;

    /// Unlocked point read. `None` when no row matches.
    async fn find_by_id(&self, id: &str) -> StockResult<Option<Product>>;

    /// Point read that takes an exclusive lock on `id` for the rest of `tx`.
    /// Concurrent lockers of the same id block until `tx` ends, whether or not
    /// the row exists yet.
    async fn find_by_id_for_update(
        &self,
        tx: &mut Self::Tx,
        id: &str,
    ) -> StockResult<Option<Product>>;

    /// Insert with `version = 1`. An empty `id` is replaced with a fresh UUID.
    async fn create(&self, tx: &mut Self::Tx, product: &mut Product) -> StockResult<()>;

    /// Write guarded by `id` and the held `version`. Zero matching rows is
    /// `StockError::OptimisticLock`; on success `product.version` is advanced.
    async fn update(&self, tx: &mut Self::Tx, product: &mut Product) -> StockResult<()>;
}
