use async_trait::async_trait;
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{ClearedSyncState, ProductsRepo, RepoError};
use crate::domain::entities::{ProductRecord, ProductTaxonomy};
use crate::domain::types::{ProductStatus, StockStatus, TermKind};

use super::{PostgresRepositories, map_sqlx_error};

const PRODUCT_COLUMNS: &str = "id, sku, slug, name, description, short_description, status, \
     regular_price_cents, sale_price_cents, stock_status, stock_quantity, image_urls, metadata, \
     fingerprint, fingerprint_computed_at, feed_handled, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    sku: String,
    slug: String,
    name: String,
    description: String,
    short_description: String,
    status: ProductStatus,
    regular_price_cents: Option<i64>,
    sale_price_cents: Option<i64>,
    stock_status: StockStatus,
    stock_quantity: Option<i32>,
    image_urls: Vec<String>,
    metadata: serde_json::Value,
    fingerprint: Option<String>,
    fingerprint_computed_at: Option<OffsetDateTime>,
    feed_handled: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ProductRow> for ProductRecord {
    fn from(row: ProductRow) -> Self {
        Self {
            id: row.id,
            sku: row.sku,
            slug: row.slug,
            name: row.name,
            description: row.description,
            short_description: row.short_description,
            status: row.status,
            regular_price_cents: row.regular_price_cents,
            sale_price_cents: row.sale_price_cents,
            stock_status: row.stock_status,
            stock_quantity: row.stock_quantity,
            image_urls: row.image_urls,
            metadata: row.metadata,
            fingerprint: row.fingerprint,
            fingerprint_computed_at: row.fingerprint_computed_at,
            feed_handled: row.feed_handled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl ProductsRepo for PostgresRepositories {
    async fn find_product(&self, id: Uuid) -> Result<Option<ProductRecord>, RepoError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(ProductRecord::from))
    }

    async fn list_unfingerprinted(&self, limit: u32) -> Result<Vec<ProductRecord>, RepoError> {
        // Insertion order, fixed rather than recomputed per call, so the
        // selection stays cheap on huge catalogs.
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE fingerprint IS NULL \
             ORDER BY created_at, id \
             LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ProductRecord::from).collect())
    }

    async fn set_fingerprint(
        &self,
        id: Uuid,
        digest: &str,
        computed_at: OffsetDateTime,
    ) -> Result<(), RepoError> {
        sqlx::query(
            "UPDATE products SET fingerprint = $2, fingerprint_computed_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(digest)
        .bind(computed_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn clear_sync_state(&self, id: Uuid) -> Result<ClearedSyncState, RepoError> {
        let row = sqlx::query(
            "WITH prev AS (SELECT feed_handled FROM products WHERE id = $1) \
             UPDATE products SET fingerprint = NULL, \
                                 fingerprint_computed_at = NULL, \
                                 feed_handled = FALSE \
             WHERE id = $1 \
             RETURNING (SELECT feed_handled FROM prev) AS feed_was_handled",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(ClearedSyncState {
            feed_was_handled: row
                .map(|row| row.get::<bool, _>("feed_was_handled"))
                .unwrap_or(false),
        })
    }

    async fn set_feed_handled(&self, id: Uuid, handled: bool) -> Result<(), RepoError> {
        sqlx::query("UPDATE products SET feed_handled = $2 WHERE id = $1")
            .bind(id)
            .bind(handled)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn list_published_fingerprints(
        &self,
        after: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<(Uuid, String)>, RepoError> {
        let rows = sqlx::query(
            "SELECT id, fingerprint FROM products \
             WHERE status = $1 AND fingerprint IS NOT NULL \
               AND ($2::uuid IS NULL OR id > $2) \
             ORDER BY id \
             LIMIT $3",
        )
        .bind(ProductStatus::Published)
        .bind(after)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get::<Uuid, _>("id"), row.get::<String, _>("fingerprint")))
            .collect())
    }

    async fn count_published(&self) -> Result<u64, RepoError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE status = $1")
            .bind(ProductStatus::Published)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(count as u64)
    }

    async fn count_fingerprinted(&self) -> Result<u64, RepoError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE fingerprint IS NOT NULL")
                .fetch_one(self.pool())
                .await
                .map_err(map_sqlx_error)?;

        Ok(count as u64)
    }

    async fn taxonomy_for(&self, product_id: Uuid) -> Result<ProductTaxonomy, RepoError> {
        let rows = sqlx::query(
            "SELECT term_kind, term_id FROM product_terms WHERE product_id = $1",
        )
        .bind(product_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(ProductTaxonomy::new(rows.into_iter().map(|row| {
            (
                row.get::<TermKind, _>("term_kind"),
                row.get::<Uuid, _>("term_id"),
            )
        })))
    }

    async fn products_with_term(
        &self,
        kind: TermKind,
        term_id: Uuid,
    ) -> Result<Vec<Uuid>, RepoError> {
        let rows = sqlx::query(
            "SELECT product_id FROM product_terms WHERE term_kind = $1 AND term_id = $2",
        )
        .bind(kind)
        .bind(term_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<Uuid, _>("product_id"))
            .collect())
    }
}
