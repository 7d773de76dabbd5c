//! Batch Persistence Coordinator
//!
//! Turns a page worth of provider price records into bounded store
//! operations: existence checks in chunks, bulk inserts for new SKUs and
//! per-record updates for known ones. A failing batch is recorded and the
//! remaining batches still run.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::with_deadline;
use crate::config::PersistenceConfig;
use crate::domain::entities::provider_price::{
    DeadLetter, ExistingPrice, PricePoint, ProviderPriceRecord,
};
use crate::domain::repositories::catalog_store::CatalogStore;

/// What happened to one `persist` call
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistOutcome {
    pub attempted: usize,
    /// Inserted plus updated, including updates that changed nothing
    pub saved_count: usize,
    pub inserted: usize,
    pub updated: usize,
    pub history_points: usize,
    pub dead_lettered: usize,
    /// Older observations of a SKU superseded within the same call
    pub deduplicated: usize,
    pub errors: Vec<String>,
}

impl PersistOutcome {
    pub fn failed(&self) -> usize {
        self.attempted
            .saturating_sub(self.deduplicated)
            .saturating_sub(self.saved_count)
    }
}

pub struct BatchPersistenceCoordinator {
    store: Arc<dyn CatalogStore>,
    config: PersistenceConfig,
    store_timeout: Duration,
}

impl BatchPersistenceCoordinator {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        config: PersistenceConfig,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            config,
            store_timeout,
        }
    }

    pub async fn persist(&self, records: Vec<ProviderPriceRecord>) -> PersistOutcome {
        let mut outcome = PersistOutcome {
            attempted: records.len(),
            ..Default::default()
        };

        let (keyed, unkeyed): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|r| !r.sku.trim().is_empty());

        if !unkeyed.is_empty() {
            self.dead_letter(&unkeyed, &mut outcome).await;
        }

        let keyed_count = keyed.len();
        let records = latest_per_sku(keyed);
        outcome.deduplicated = keyed_count - records.len();
        if records.is_empty() {
            return outcome;
        }

        let existing = self.check_existing(&records, &mut outcome).await;
        let mut fresh = Vec::new();
        let mut known = Vec::new();
        for record in records {
            match existing.get(&record.sku) {
                Some(Lookup::Found(previous)) => known.push((record, previous.unit_price)),
                Some(Lookup::Missing) => fresh.push(record),
                // Existence unknown, already reported
                None => {}
            }
        }

        let mut history = Vec::new();
        self.insert_new(&fresh, &mut outcome, &mut history).await;
        self.update_known(&known, &mut outcome, &mut history).await;

        if !history.is_empty() {
            match with_deadline(
                "price history append",
                self.store_timeout,
                self.store.append_price_history(&history),
            )
            .await
            {
                Ok(n) => outcome.history_points = n as usize,
                Err(e) => {
                    warn!(error = %e, points = history.len(), "Failed to append price history");
                    outcome.errors.push(format!("price history: {}", e));
                }
            }
        }

        info!(
            attempted = outcome.attempted,
            saved = outcome.saved_count,
            inserted = outcome.inserted,
            updated = outcome.updated,
            dead_lettered = outcome.dead_lettered,
            deduplicated = outcome.deduplicated,
            errors = outcome.errors.len(),
            "Persisted provider prices"
        );
        outcome
    }

    async fn check_existing(
        &self,
        records: &[ProviderPriceRecord],
        outcome: &mut PersistOutcome,
    ) -> HashMap<String, Lookup> {
        let mut lookups = HashMap::with_capacity(records.len());

        for (index, chunk) in records
            .chunks(self.config.existence_chunk_size.max(1))
            .enumerate()
        {
            let skus: Vec<String> = chunk.iter().map(|r| r.sku.clone()).collect();
            match with_deadline(
                "existence check",
                self.store_timeout,
                self.store.existing_provider_prices(&skus),
            )
            .await
            {
                Ok(mut found) => {
                    for sku in skus {
                        let lookup = match found.remove(&sku) {
                            Some(existing) => Lookup::Found(existing),
                            None => Lookup::Missing,
                        };
                        lookups.insert(sku, lookup);
                    }
                }
                Err(e) => {
                    error!(chunk = index, skus = skus.len(), error = %e, "Existence check failed");
                    outcome
                        .errors
                        .push(format!("existence check chunk {}: {}", index, e));
                }
            }
        }

        lookups
    }

    async fn insert_new(
        &self,
        records: &[ProviderPriceRecord],
        outcome: &mut PersistOutcome,
        history: &mut Vec<PricePoint>,
    ) {
        let batches: Vec<_> = records.chunks(self.config.insert_batch_size.max(1)).collect();
        let total = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            match with_deadline(
                "provider price insert",
                self.store_timeout,
                self.store.insert_provider_prices(batch),
            )
            .await
            {
                Ok(_) => {
                    outcome.inserted += batch.len();
                    outcome.saved_count += batch.len();
                    history.extend(batch.iter().filter_map(history_point));
                    debug!(batch = index, size = batch.len(), "Inserted batch");
                }
                Err(e) => {
                    error!(batch = index, size = batch.len(), error = %e, "Insert batch failed");
                    outcome.errors.push(format!("insert batch {}: {}", index, e));
                }
            }

            if index + 1 < total {
                tokio::time::sleep(self.config.inter_batch_delay).await;
            }
        }
    }

    async fn update_known(
        &self,
        records: &[(ProviderPriceRecord, f64)],
        outcome: &mut PersistOutcome,
        history: &mut Vec<PricePoint>,
    ) {
        let batches: Vec<_> = records.chunks(self.config.update_batch_size.max(1)).collect();
        let total = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            for (record, previous_price) in batch {
                match with_deadline(
                    "provider price update",
                    self.store_timeout,
                    self.store.update_provider_price(record),
                )
                .await
                {
                    Ok(()) => {
                        outcome.updated += 1;
                        outcome.saved_count += 1;
                        if price_changed(*previous_price, record.unit_price) {
                            history.extend(history_point(record));
                        }
                    }
                    Err(e) => {
                        warn!(sku = %record.sku, error = %e, "Update failed");
                        outcome.errors.push(format!("update {}: {}", record.sku, e));
                    }
                }
            }

            if index + 1 < total {
                tokio::time::sleep(self.config.inter_batch_delay).await;
            }
        }
    }

    async fn dead_letter(&self, records: &[ProviderPriceRecord], outcome: &mut PersistOutcome) {
        warn!(count = records.len(), "Records without a resolvable SKU");
        outcome.errors.push(format!(
            "{} record(s) without a resolvable SKU sent to dead letters",
            records.len()
        ));

        let letters: Vec<DeadLetter> = records
            .iter()
            .take(self.config.dead_letter_cap)
            .map(|r| DeadLetter::pending(r, "no resolvable SKU after extraction"))
            .collect();

        match with_deadline(
            "dead letter insert",
            self.store_timeout,
            self.store.insert_dead_letters(&letters),
        )
        .await
        {
            Ok(n) => outcome.dead_lettered = n as usize,
            Err(e) => {
                error!(error = %e, "Failed to write dead letters");
                outcome.errors.push(format!("dead letters: {}", e));
            }
        }
    }
}

enum Lookup {
    Found(ExistingPrice),
    Missing,
}

/// Keep one record per SKU, the most recently observed
fn latest_per_sku(records: Vec<ProviderPriceRecord>) -> Vec<ProviderPriceRecord> {
    let mut order = Vec::new();
    let mut latest: HashMap<String, ProviderPriceRecord> = HashMap::new();

    for record in records {
        let seen_newer = latest
            .get(&record.sku)
            .map(|current| current.observed_at > record.observed_at);
        match seen_newer {
            Some(true) => {}
            Some(false) => {
                latest.insert(record.sku.clone(), record);
            }
            None => {
                order.push(record.sku.clone());
                latest.insert(record.sku.clone(), record);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|sku| latest.remove(&sku))
        .collect()
}

fn price_changed(previous: f64, current: f64) -> bool {
    (previous - current).abs() > 1e-9
}

fn history_point(record: &ProviderPriceRecord) -> Option<PricePoint> {
    record.product_id.map(|product_id| PricePoint {
        product_id,
        price: record.unit_price,
        observed_at: record.observed_at,
    })
}
