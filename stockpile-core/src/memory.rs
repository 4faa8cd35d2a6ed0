use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::product::Product;
use crate::repository::ProductStore;
use crate::{StockError, StockResult};

/// In-memory product store with per-id exclusive locks.
///
/// Intended for tests/dev. A lock taken by `find_by_id_for_update` is held by
/// the transaction until commit, rollback or drop. Writes are staged in the
/// transaction and only become visible on commit.
#[derive(Clone, Default)]
pub struct InMemoryProductStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    rows: RwLock<HashMap<String, Product>>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    lock_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
enum Staged {
    Insert(Product),
    Update(Product),
}

impl Staged {
    fn product(&self) -> &Product {
        match self {
            Staged::Insert(p) | Staged::Update(p) => p,
        }
    }
}

/// Transaction handle for `InMemoryProductStore`. Dropping it without commit
/// discards staged writes and releases held locks.
pub struct MemoryTx {
    inner: Arc<Inner>,
    held: HashMap<String, OwnedMutexGuard<()>>,
    staged: HashMap<String, Staged>,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let released: Vec<String> = self.held.drain().map(|(id, _guard)| id).collect();

        // Entries nobody else references are removed so the map does not grow
        // with every id ever locked. Waiters hold a clone, which keeps theirs.
        let mut locks = self.inner.locks.lock().unwrap_or_else(PoisonError::into_inner);
        for id in released {
            if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(&id);
            }
        }
    }
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose lock waits fail with `StockError::Store` after `timeout`.
    pub fn with_lock_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                lock_timeout: Some(timeout),
                ..Inner::default()
            }),
        }
    }

    /// Number of committed rows.
    pub fn len(&self) -> usize {
        self.inner
            .rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.inner.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }

    fn committed(&self, id: &str) -> StockResult<Option<Product>> {
        let rows = self
            .inner
            .rows
            .read()
            .map_err(|_| StockError::store("read", "lock poisoned"))?;
        Ok(rows.get(id).cloned())
    }

    fn visible(&self, tx: &MemoryTx, id: &str) -> StockResult<Option<Product>> {
        match tx.staged.get(id) {
            Some(staged) => Ok(Some(staged.product().clone())),
            None => self.committed(id),
        }
    }

    fn row_lock(&self, id: &str) -> StockResult<Arc<AsyncMutex<()>>> {
        let mut locks = self
            .inner
            .locks
            .lock()
            .map_err(|_| StockError::store("find_by_id_for_update", "lock poisoned"))?;
        Ok(locks.entry(id.to_string()).or_default().clone())
    }
}

#[async_trait]
impl ProductStore for InMemoryProductStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> StockResult<MemoryTx> {
        Ok(MemoryTx {
            inner: self.inner.clone(),
            held: HashMap::new(),
            staged: HashMap::new(),
        })
    }

    async fn commit(&self, mut tx: MemoryTx) -> StockResult<()> {
        let mut rows = self
            .inner
            .rows
            .write()
            .map_err(|_| StockError::store("commit", "lock poisoned"))?;

        for (id, staged) in &tx.staged {
            if let Staged::Insert(_) = staged {
                if rows.contains_key(id) {
                    return Err(StockError::store(
                        "commit",
                        format!("duplicate key value violates unique constraint: id={}", id),
                    ));
                }
            }
        }

        for (id, staged) in std::mem::take(&mut tx.staged) {
            let product = match staged {
                Staged::Insert(p) | Staged::Update(p) => p,
            };
            rows.insert(id, product);
        }
        drop(rows);

        // Locks are released only after the writes are visible.
        drop(tx);
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> StockResult<()> {
        drop(tx);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> StockResult<Option<Product>> {
        self.committed(id)
    }

    async fn find_by_id_for_update(
        &self,
        tx: &mut MemoryTx,
        id: &str,
    ) -> StockResult<Option<Product>> {
        if !tx.held.contains_key(id) {
            let lock = self.row_lock(id)?;
            let guard = match self.inner.lock_timeout {
                Some(timeout) => tokio::time::timeout(timeout, lock.lock_owned())
                    .await
                    .map_err(|_| {
                        StockError::store(
                            "find_by_id_for_update",
                            format!("lock wait timeout exceeded for product {}", id),
                        )
                    })?,
                None => lock.lock_owned().await,
            };
            tx.held.insert(id.to_string(), guard);
        }

        self.visible(tx, id)
    }

    async fn create(&self, tx: &mut MemoryTx, product: &mut Product) -> StockResult<()> {
        if product.id.is_empty() {
            product.id = Uuid::new_v4().to_string();
        }

        if self.visible(tx, &product.id)?.is_some() {
            return Err(StockError::store(
                "create",
                format!("duplicate key value violates unique constraint: id={}", product.id),
            ));
        }

        let now = Utc::now();
        product.version = 1;
        product.created_at = now;
        product.updated_at = now;

        tx.staged
            .insert(product.id.clone(), Staged::Insert(product.clone()));
        Ok(())
    }

    async fn update(&self, tx: &mut MemoryTx, product: &mut Product) -> StockResult<()> {
        let current = self.visible(tx, &product.id)?;
        let current = match current {
            Some(current) if current.version == product.version => current,
            _ => {
                return Err(StockError::OptimisticLock {
                    id: product.id.clone(),
                    version: product.version,
                })
            }
        };

        product.version += 1;
        product.created_at = current.created_at;
        product.updated_at = Utc::now();

        let staged = match tx.staged.get(&product.id) {
            Some(Staged::Insert(_)) => Staged::Insert(product.clone()),
            _ => Staged::Update(product.clone()),
        };
        tx.staged.insert(product.id.clone(), staged);
        Ok(())
    }
}
