use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use stockpile_core::{Product, ProductStore, StockError, StockResult};

pub struct PgProductStore {
    pool: PgPool,
}

impl PgProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal struct for type-safe querying
#[derive(sqlx::FromRow)]
struct ProductRow {
    id: String,
    name: String,
    stock: i64,
    price: f64,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            name: row.name,
            stock: row.stock,
            price: row.price,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const SELECT_PRODUCT: &str =
    "SELECT id, name, stock, price, version, created_at, updated_at FROM products WHERE id = $1";

#[async_trait]
impl ProductStore for PgProductStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> StockResult<Self::Tx> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    async fn commit(&self, tx: Self::Tx) -> StockResult<()> {
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(&self, tx: Self::Tx) -> StockResult<()> {
        tx.rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }

    async fn find_by_id(&self, id: &str) -> StockResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(SELECT_PRODUCT)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_id", e))?;

        Ok(row.map(Product::from))
    }

    async fn find_by_id_for_update(
        &self,
        tx: &mut Self::Tx,
        id: &str,
    ) -> StockResult<Option<Product>> {
        // FOR UPDATE locks nothing when the row is missing, so concurrent
        // first-time mutators also queue on a transaction-scoped advisory lock.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("advisory_lock", e))?;

        let row = sqlx::query_as::<_, ProductRow>(&format!("{} FOR UPDATE", SELECT_PRODUCT))
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("find_by_id_for_update", e))?;

        Ok(row.map(Product::from))
    }

    async fn create(&self, tx: &mut Self::Tx, product: &mut Product) -> StockResult<()> {
        if product.id.is_empty() {
            product.id = Uuid::new_v4().to_string();
        }

        let (created_at, updated_at): (DateTime<Utc>, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO products (id, name, stock, price, version)
            VALUES ($1, $2, $3, $4, 1)
            RETURNING created_at, updated_at
            "#,
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(product.stock)
        .bind(product.price)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("create", e))?;

        product.version = 1;
        product.created_at = created_at;
        product.updated_at = updated_at;
        Ok(())
    }

    async fn update(&self, tx: &mut Self::Tx, product: &mut Product) -> StockResult<()> {
        let updated_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET name = $1, stock = $2, price = $3, version = version + 1, updated_at = NOW()
            WHERE id = $4 AND version = $5
            RETURNING updated_at
            "#,
        )
        .bind(&product.name)
        .bind(product.stock)
        .bind(product.price)
        .bind(&product.id)
        .bind(product.version)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        match updated_at {
            Some(updated_at) => {
                product.version += 1;
                product.updated_at = updated_at;
                Ok(())
            }
            None => Err(StockError::OptimisticLock {
                id: product.id.clone(),
                version: product.version,
            }),
        }
    }
}

/// Map SQLx errors to `StockError::Store`, keeping the driver's message.
fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StockError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
            let kind = match code.as_str() {
                "23505" => "unique violation",
                "55P03" => "lock wait timeout",
                "57014" => "statement canceled",
                "40P01" => "deadlock detected",
                _ => "database error",
            };
            StockError::store(operation, format!("{} ({}): {}", kind, code, db_err.message()))
        }
        sqlx::Error::PoolTimedOut => StockError::store(operation, "timed out acquiring a connection"),
        sqlx::Error::PoolClosed => StockError::store(operation, "connection pool closed"),
        other => StockError::store(operation, other),
    }
}
