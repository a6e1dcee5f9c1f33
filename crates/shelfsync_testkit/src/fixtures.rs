//! Test fixtures and shop helpers.
//!
//! Provides a fully wired [`RetailSync`] over in-memory stores, a scripted
//! remote and a manual clock, plus builders for wire records.

use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use serde_json::json;
use shelfsync_core::{
    Clock, EntityId, EntityReconciler, FinancialSplit, LocalStore, ManualClock, MemoryStore,
    Product, RawRecord, RemoteId, RetailSync, Sale, ScriptedRemote, SyncConfig, SyncCoordinator,
    SyncMeta, SyncStatus,
};
use std::sync::Arc;
use std::time::Duration;

/// Start time of every test clock: 2024-06-03 09:00 UTC.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0)
        .single()
        .expect("valid fixed time")
}

/// A retail client over in-memory collaborators.
pub struct TestShop {
    /// The facade under test.
    pub retail: RetailSync,
    /// Product cache.
    pub products: Arc<MemoryStore<Product>>,
    /// Sale cache.
    pub sales: Arc<MemoryStore<Sale>>,
    /// Scripted remote shared by both kinds.
    pub remote: Arc<ScriptedRemote>,
    /// Manual clock starting at [`fixed_time`].
    pub clock: Arc<ManualClock>,
}

impl TestShop {
    /// Creates a shop with default configuration and no cost split.
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default(), FinancialSplit::default())
    }

    /// Creates a shop with the given configuration.
    pub fn with_config(config: SyncConfig, split: FinancialSplit) -> Self {
        let products = Arc::new(MemoryStore::new());
        let sales = Arc::new(MemoryStore::new());
        let remote = Arc::new(ScriptedRemote::new());
        let clock = Arc::new(ManualClock::new(fixed_time()));
        let retail = RetailSync::new(
            config,
            split,
            products.clone(),
            sales.clone(),
            remote.clone(),
            clock.clone(),
        );
        Self {
            retail,
            products,
            sales,
            remote,
            clock,
        }
    }

    /// Caches a product the remote already knows as `remote_id`.
    pub fn seed_product(
        &self,
        name: &str,
        price_cents: i64,
        stock: i64,
        threshold: i64,
        remote_id: &str,
    ) -> Product {
        let product = synced_product(name, price_cents, stock, threshold, remote_id, self.clock.now());
        self.products
            .upsert(product.clone())
            .expect("seed product");
        product
    }

    /// Reads a product from the cache.
    pub fn product(&self, id: EntityId) -> Product {
        self.products
            .get(id)
            .expect("store read")
            .expect("product cached")
    }

    /// Reads a sale from the cache.
    pub fn sale(&self, id: EntityId) -> Sale {
        self.sales.get(id).expect("store read").expect("sale cached")
    }
}

impl Default for TestShop {
    fn default() -> Self {
        Self::new()
    }
}

/// A product confirmed by the remote at `at`. Its barcode is derived from
/// the name.
pub fn synced_product(
    name: &str,
    price_cents: i64,
    stock: i64,
    threshold: i64,
    remote_id: &str,
    at: DateTime<Utc>,
) -> Product {
    let mut product = Product::new(name, barcode_for(name), price_cents).with_stock(stock, threshold);
    product.meta = SyncMeta::confirmed(RemoteId::new(remote_id), at);
    product
}

/// Barcode used by fixtures for `name`.
pub fn barcode_for(name: &str) -> String {
    let hash = name
        .bytes()
        .fold(7u64, |h, b| h.wrapping_mul(31).wrapping_add(u64::from(b)));
    format!("594{:010}", hash % 10_000_000_000)
}

/// Wire record for a product as the remote would send it.
pub fn product_record(
    remote_id: &str,
    name: &str,
    price_cents: i64,
    stock: i64,
    threshold: i64,
) -> RawRecord {
    RawRecord::new(
        RemoteId::new(remote_id),
        json!({
            "name": name,
            "barcode": barcode_for(name),
            "category": "grocery",
            "price_cents": price_cents,
            "quantity_current": stock,
            "quantity_threshold": threshold
        }),
    )
}

/// Waits until entity `id` of `coordinator` reaches `want`.
///
/// # Panics
///
/// Panics if the status is not reached within two minutes of (possibly
/// paused) Tokio time.
pub async fn wait_for_status<R: EntityReconciler>(
    coordinator: &SyncCoordinator<R>,
    id: EntityId,
    want: SyncStatus,
) {
    let mut statuses = Box::pin(coordinator.status_stream(id));
    let reached = tokio::time::timeout(Duration::from_secs(120), async {
        while let Some(status) = statuses.next().await {
            if status == want {
                return true;
            }
        }
        false
    })
    .await;
    assert_eq!(reached, Ok(true), "entity {id} never reached {want:?}");
}
