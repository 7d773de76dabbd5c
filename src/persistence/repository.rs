//! Database Repository
//!
//! SQLite implementation of [`CatalogStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashMap;
use tracing::{debug, error};

use super::models::*;
use super::{DatabaseError, DbPool};
use crate::domain::entities::change_alert::ChangeAlert;
use crate::domain::entities::price_comparison::PriceComparison;
use crate::domain::entities::product::InternalProduct;
use crate::domain::entities::provider_price::{
    DeadLetter, ExistingPrice, PricePoint, ProviderPriceRecord,
};
use crate::domain::repositories::catalog_store::{CatalogStore, StoreResult};

/// SQLite keeps the number of bound parameters per statement small
const MAX_ROWS_PER_STATEMENT: usize = 50;
const MAX_IDS_PER_STATEMENT: usize = 500;

const PRODUCT_COLUMNS: &str = "id, sku, barcode, name, brand, category, unit_price, active";
const PROVIDER_PRICE_COLUMNS: &str = "sku, product_id, name, brand, category, unit_price, \
     promo_price, stock, min_stock, barcode, source, source_url, content_hash, \
     confidence_score, match_strategy, match_confidence, observed_at";

fn query_error(what: &str, e: sqlx::Error) -> DatabaseError {
    error!("Failed to {}: {}", what, e);
    DatabaseError::QueryError(format!("Failed to {}: {}", what, e))
}

/// Catalog store backed by a SQLite pool
#[derive(Clone)]
pub struct SqliteCatalogStore {
    pool: DbPool,
}

impl SqliteCatalogStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Add a product to the internal catalog
    pub async fn create_product(
        &self,
        product: CreateProduct,
    ) -> Result<InternalProduct, DatabaseError> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, InternalProduct>(&format!(
            r#"
            INSERT INTO products (sku, barcode, name, brand, category, unit_price, active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(&product.sku)
        .bind(&product.barcode)
        .bind(&product.name)
        .bind(&product.brand)
        .bind(&product.category)
        .bind(product.unit_price)
        .bind(product.active)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_error("create product", e))?;

        debug!("Created product: {} ({})", record.id, record.sku);
        Ok(record)
    }

    /// Stored provider price for one SKU
    pub async fn provider_price(
        &self,
        sku: &str,
    ) -> Result<Option<ProviderPriceRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, ProviderPriceRow>(&format!(
            "SELECT {} FROM provider_prices WHERE sku = ?1",
            PROVIDER_PRICE_COLUMNS
        ))
        .bind(sku)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("get provider price", e))?;

        Ok(row.map(Into::into))
    }

    pub async fn count_rows(&self, table: CatalogTable) -> Result<i64, DatabaseError> {
        let (count,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table.as_str()))
                .fetch_one(&self.pool)
                .await
                .map_err(|e| query_error("count rows", e))?;
        Ok(count)
    }

    /// Flag every alert raised before `before` as handled
    pub async fn mark_alerts_processed(&self, before: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let result = sqlx::query("UPDATE change_alerts SET processed = 1 WHERE raised_at < ?1")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("mark alerts processed", e))?;
        Ok(result.rows_affected())
    }
}

/// Tables that can be counted through [`SqliteCatalogStore::count_rows`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogTable {
    Products,
    ProviderPrices,
    PriceHistory,
    PriceComparisons,
    ChangeAlerts,
    DeadLetters,
}

impl CatalogTable {
    fn as_str(&self) -> &'static str {
        match self {
            CatalogTable::Products => "products",
            CatalogTable::ProviderPrices => "provider_prices",
            CatalogTable::PriceHistory => "price_history",
            CatalogTable::PriceComparisons => "price_comparisons",
            CatalogTable::ChangeAlerts => "change_alerts",
            CatalogTable::DeadLetters => "dead_letters",
        }
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn list_active_products(&self) -> StoreResult<Vec<InternalProduct>> {
        let products = sqlx::query_as::<_, InternalProduct>(&format!(
            "SELECT {} FROM products WHERE active = 1 ORDER BY id",
            PRODUCT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("list active products", e))?;

        Ok(products)
    }

    async fn products_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<InternalProduct>> {
        let mut products = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("SELECT {} FROM products WHERE id IN (", PRODUCT_COLUMNS));
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            let rows = qb
                .build_query_as::<InternalProduct>()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| query_error("get products by id", e))?;
            products.extend(rows);
        }
        Ok(products)
    }

    async fn existing_provider_prices(
        &self,
        skus: &[String],
    ) -> StoreResult<HashMap<String, ExistingPrice>> {
        if skus.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT sku, unit_price, content_hash FROM provider_prices WHERE sku IN (",
        );
        let mut separated = qb.separated(", ");
        for sku in skus {
            separated.push_bind(sku.clone());
        }
        separated.push_unseparated(")");

        let rows = qb
            .build_query_as::<ExistingPriceRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error("check existing provider prices", e))?;

        Ok(rows
            .into_iter()
            .map(|row| (row.sku.clone(), ExistingPrice::from(row)))
            .collect())
    }

    async fn insert_provider_prices(&self, records: &[ProviderPriceRecord]) -> StoreResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "INSERT INTO provider_prices ({}, created_at, updated_at) ",
            PROVIDER_PRICE_COLUMNS
        ));
        qb.push_values(records, |mut row, r| {
            row.push_bind(r.sku.clone())
                .push_bind(r.product_id)
                .push_bind(r.name.clone())
                .push_bind(r.brand.clone())
                .push_bind(r.category.clone())
                .push_bind(r.unit_price)
                .push_bind(r.promo_price)
                .push_bind(r.stock)
                .push_bind(r.min_stock)
                .push_bind(r.barcode.clone())
                .push_bind(r.source.clone())
                .push_bind(r.source_url.clone())
                .push_bind(r.content_hash.clone())
                .push_bind(r.confidence_score as i64)
                .push_bind(r.match_strategy.clone())
                .push_bind(r.match_confidence.map(|c| c as i64))
                .push_bind(r.observed_at)
                .push_bind(now)
                .push_bind(now);
        });
        // Another category in the same batch may have inserted the SKU since
        // the existence check
        qb.push(
            " ON CONFLICT(sku) DO UPDATE SET product_id = excluded.product_id, \
             name = excluded.name, brand = excluded.brand, category = excluded.category, \
             unit_price = excluded.unit_price, promo_price = excluded.promo_price, \
             stock = excluded.stock, min_stock = excluded.min_stock, \
             barcode = excluded.barcode, source = excluded.source, \
             source_url = excluded.source_url, content_hash = excluded.content_hash, \
             confidence_score = excluded.confidence_score, \
             match_strategy = excluded.match_strategy, \
             match_confidence = excluded.match_confidence, \
             observed_at = excluded.observed_at, updated_at = excluded.updated_at \
             WHERE excluded.observed_at >= provider_prices.observed_at",
        );

        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("insert provider prices", e))?;

        debug!("Inserted {} provider prices", result.rows_affected());
        Ok(result.rows_affected())
    }

    async fn update_provider_price(&self, record: &ProviderPriceRecord) -> StoreResult<()> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE provider_prices
            SET product_id = ?1, name = ?2, brand = ?3, category = ?4, unit_price = ?5,
                promo_price = ?6, stock = ?7, min_stock = ?8, barcode = ?9, source = ?10,
                source_url = ?11, content_hash = ?12, confidence_score = ?13,
                match_strategy = ?14, match_confidence = ?15, observed_at = ?16, updated_at = ?17
            WHERE sku = ?18
            "#,
        )
        .bind(record.product_id)
        .bind(&record.name)
        .bind(&record.brand)
        .bind(&record.category)
        .bind(record.unit_price)
        .bind(record.promo_price)
        .bind(record.stock)
        .bind(record.min_stock)
        .bind(&record.barcode)
        .bind(&record.source)
        .bind(&record.source_url)
        .bind(&record.content_hash)
        .bind(record.confidence_score as i64)
        .bind(&record.match_strategy)
        .bind(record.match_confidence.map(|c| c as i64))
        .bind(record.observed_at)
        .bind(Utc::now())
        .bind(&record.sku)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("update provider price", e))?
        .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::QueryError(format!(
                "Provider price not found: {}",
                record.sku
            ))
            .into());
        }
        Ok(())
    }

    async fn matched_provider_prices(&self) -> StoreResult<Vec<ProviderPriceRecord>> {
        let rows = sqlx::query_as::<_, ProviderPriceRow>(&format!(
            "SELECT {} FROM provider_prices WHERE product_id IS NOT NULL ORDER BY product_id, sku",
            PROVIDER_PRICE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("list matched provider prices", e))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn append_price_history(&self, points: &[PricePoint]) -> StoreResult<u64> {
        let mut inserted = 0;
        for chunk in points.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO price_history (product_id, price, observed_at) ");
            qb.push_values(chunk, |mut row, p| {
                row.push_bind(p.product_id)
                    .push_bind(p.price)
                    .push_bind(p.observed_at);
            });
            inserted += qb
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| query_error("append price history", e))?
                .rows_affected();
        }
        Ok(inserted)
    }

    async fn price_history_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<PricePoint>> {
        let rows = sqlx::query_as::<_, PriceHistoryRow>(
            "SELECT product_id, price, observed_at FROM price_history \
             WHERE observed_at >= ?1 ORDER BY product_id, observed_at DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("read price history", e))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_price_comparisons(&self, comparisons: &[PriceComparison]) -> StoreResult<u64> {
        let mut inserted = 0;
        for chunk in comparisons.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO price_comparisons (product_id, current_price, provider_price, \
                 absolute_diff, percent_diff, source, compared_at, is_savings_opportunity, \
                 recommendation, confidence) ",
            );
            qb.push_values(chunk, |mut row, c| {
                row.push_bind(c.product_id)
                    .push_bind(c.current_price)
                    .push_bind(c.provider_price)
                    .push_bind(c.absolute_diff)
                    .push_bind(c.percent_diff)
                    .push_bind(c.source.clone())
                    .push_bind(c.compared_at)
                    .push_bind(c.is_savings_opportunity)
                    .push_bind(c.recommendation.as_str())
                    .push_bind(c.confidence as i64);
            });
            inserted += qb
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| query_error("insert price comparisons", e))?
                .rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_change_alerts(&self, alerts: &[ChangeAlert]) -> StoreResult<u64> {
        let mut inserted = 0;
        for chunk in alerts.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO change_alerts (product_id, change_type, previous_value, new_value, \
                 percent_change, severity, message, recommended_action, raised_at, processed, \
                 alert_key) ",
            );
            qb.push_values(chunk, |mut row, a| {
                row.push_bind(a.product_id)
                    .push_bind(a.change_type.as_str())
                    .push_bind(a.previous_value)
                    .push_bind(a.new_value)
                    .push_bind(a.percent_change)
                    .push_bind(a.severity.as_str())
                    .push_bind(a.message.clone())
                    .push_bind(a.recommended_action.clone())
                    .push_bind(a.raised_at)
                    .push_bind(a.processed)
                    .push_bind(a.dedup_key());
            });
            qb.push(" ON CONFLICT(alert_key) DO NOTHING");
            inserted += qb
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| query_error("insert change alerts", e))?
                .rows_affected();
        }
        Ok(inserted)
    }

    async fn delete_price_comparisons_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM price_comparisons WHERE compared_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("prune price comparisons", e))?;
        Ok(result.rows_affected())
    }

    async fn delete_processed_alerts_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result =
            sqlx::query("DELETE FROM change_alerts WHERE processed = 1 AND raised_at < ?1")
                .bind(cutoff)
                .execute(&self.pool)
                .await
                .map_err(|e| query_error("prune change alerts", e))?;
        Ok(result.rows_affected())
    }

    async fn insert_dead_letters(&self, letters: &[DeadLetter]) -> StoreResult<u64> {
        let mut inserted = 0;
        for chunk in letters.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO dead_letters (sku, payload_json, error, retry_count, status, created_at) ",
            );
            qb.push_values(chunk, |mut row, d| {
                row.push_bind(d.sku.clone())
                    .push_bind(d.payload.to_string())
                    .push_bind(d.error.clone())
                    .push_bind(d.retry_count as i64)
                    .push_bind(d.status.clone())
                    .push_bind(d.created_at);
            });
            inserted += qb
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| query_error("insert dead letters", e))?
                .rows_affected();
        }
        Ok(inserted)
    }

    async fn count_pending_dead_letters(&self) -> StoreResult<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM dead_letters WHERE status = ?1")
                .bind(DeadLetter::PENDING)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| query_error("count dead letters", e))?;
        Ok(count.max(0) as u64)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("ping database", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::change_alert::ChangeAlert;
    use crate::persistence::init_database;
    use chrono::Duration;

    async fn store() -> SqliteCatalogStore {
        SqliteCatalogStore::new(init_database("sqlite::memory:").await.unwrap())
    }

    fn product(sku: &str, name: &str, price: f64) -> CreateProduct {
        CreateProduct {
            sku: sku.to_string(),
            barcode: None,
            name: name.to_string(),
            brand: None,
            category: "beverages".to_string(),
            unit_price: price,
            active: true,
        }
    }

    fn record(sku: &str, product_id: Option<i64>, price: f64) -> ProviderPriceRecord {
        ProviderPriceRecord {
            sku: sku.to_string(),
            product_id,
            name: format!("Listing {}", sku),
            brand: None,
            category: "beverages".to_string(),
            unit_price: price,
            promo_price: None,
            stock: Some(3),
            min_stock: None,
            barcode: None,
            source: "catalog".to_string(),
            source_url: "https://shop.example.com".to_string(),
            content_hash: format!("hash-{}", price),
            confidence_score: 85,
            match_strategy: product_id.map(|_| "sku_exact".to_string()),
            match_confidence: product_id.map(|_| 95),
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_products_round_trip() {
        let store = store().await;
        let a = store.create_product(product("A", "Agua", 2.0)).await.unwrap();
        let mut inactive = product("B", "Suco", 5.0);
        inactive.active = false;
        let b = store.create_product(inactive).await.unwrap();

        let active = store.list_active_products().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].sku, "A");

        let by_id = store.products_by_ids(&[a.id, b.id, 999]).await.unwrap();
        assert_eq!(by_id.len(), 2);
    }

    #[tokio::test]
    async fn test_provider_price_insert_update_and_lookup() {
        let store = store().await;
        let p = store.create_product(product("A", "Agua", 2.0)).await.unwrap();

        let inserted = store
            .insert_provider_prices(&[record("X1", Some(p.id), 1.8), record("X2", None, 3.0)])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let existing = store
            .existing_provider_prices(&["X1".to_string(), "NOPE".to_string()])
            .await
            .unwrap();
        assert_eq!(existing.len(), 1);
        assert_eq!(existing["X1"].unit_price, 1.8);

        store.update_provider_price(&record("X1", Some(p.id), 1.6)).await.unwrap();
        let stored = store.provider_price("X1").await.unwrap().unwrap();
        assert_eq!(stored.unit_price, 1.6);
        assert_eq!(stored.match_confidence, Some(95));

        let matched = store.matched_provider_prices().await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(store.count_rows(CatalogTable::ProviderPrices).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_update_of_unknown_sku_fails() {
        let store = store().await;
        let err = store.update_provider_price(&record("GHOST", None, 1.0)).await.unwrap_err();
        assert_eq!(err.code(), "PERSISTENCE_ERROR");
    }

    #[tokio::test]
    async fn test_price_history_window() {
        let store = store().await;
        let now = Utc::now();
        store
            .append_price_history(&[
                PricePoint { product_id: 1, price: 10.0, observed_at: now - Duration::days(40) },
                PricePoint { product_id: 1, price: 11.0, observed_at: now - Duration::days(2) },
                PricePoint { product_id: 1, price: 12.0, observed_at: now },
            ])
            .await
            .unwrap();

        let recent = store.price_history_since(now - Duration::days(30)).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].price, 12.0);
    }

    #[tokio::test]
    async fn test_pruning_respects_processed_flag() {
        let store = store().await;
        let old = Utc::now() - Duration::days(45);
        let mut comparison = PriceComparison::new(1, 10.0, 8.0, "catalog", 90.0);
        comparison.compared_at = old;
        store.insert_price_comparisons(&[comparison]).await.unwrap();

        store
            .insert_change_alerts(&[
                ChangeAlert::price_change(1, 100.0, 130.0, 30.0, old),
                ChangeAlert::new_product(2, old),
            ])
            .await
            .unwrap();

        let cutoff = Utc::now() - Duration::days(30);
        assert_eq!(store.delete_price_comparisons_older_than(cutoff).await.unwrap(), 1);
        // Nothing processed yet
        assert_eq!(store.delete_processed_alerts_older_than(cutoff).await.unwrap(), 0);

        store.mark_alerts_processed(cutoff).await.unwrap();
        assert_eq!(store.delete_processed_alerts_older_than(cutoff).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_insert_of_same_sku_keeps_batch() {
        let store = store().await;
        store.insert_provider_prices(&[record("SHARED", None, 2.0)]).await.unwrap();

        // Second writer still believes SHARED is new
        let mut newer = record("SHARED", None, 2.5);
        newer.observed_at += Duration::seconds(1);
        store
            .insert_provider_prices(&[newer, record("ONLY-B", None, 4.0)])
            .await
            .unwrap();

        assert_eq!(store.count_rows(CatalogTable::ProviderPrices).await.unwrap(), 2);
        assert_eq!(store.provider_price("SHARED").await.unwrap().unwrap().unit_price, 2.5);
        assert!(store.provider_price("ONLY-B").await.unwrap().is_some());

        // An older observation does not overwrite a newer one
        let mut stale = record("SHARED", None, 1.0);
        stale.observed_at -= Duration::hours(1);
        store.insert_provider_prices(&[stale]).await.unwrap();
        assert_eq!(store.provider_price("SHARED").await.unwrap().unwrap().unit_price, 2.5);
    }

    #[tokio::test]
    async fn test_alerts_are_stored_once_per_event() {
        let store = store().await;
        let at = Utc::now() - Duration::hours(1);
        let alerts = vec![
            ChangeAlert::price_change(1, 100.0, 130.0, 30.0, at),
            ChangeAlert::new_product(2, at),
        ];

        assert_eq!(store.insert_change_alerts(&alerts).await.unwrap(), 2);
        assert_eq!(store.insert_change_alerts(&alerts).await.unwrap(), 0);
        // Re-detected later with a fresh timestamp
        assert_eq!(
            store
                .insert_change_alerts(&[ChangeAlert::new_product(2, Utc::now())])
                .await
                .unwrap(),
            0
        );
        assert_eq!(store.count_rows(CatalogTable::ChangeAlerts).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_dead_letters_are_pending() {
        let store = store().await;
        let letter = DeadLetter::pending(&record("", None, 1.0), "no resolvable SKU");
        store.insert_dead_letters(&[letter.clone(), letter]).await.unwrap();

        assert_eq!(store.count_pending_dead_letters().await.unwrap(), 2);
        assert!(store.ping().await.is_ok());
    }
}
