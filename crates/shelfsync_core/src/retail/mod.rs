//! Retail operations on top of the sync core.

mod views;

pub use views::{DerivedView, FinancialSummary, InventoryOverview, TodayStats, RECENT_SALES};

use crate::clock::Clock;
use crate::config::{FinancialSplit, SyncConfig};
use crate::coordinator::{ReadThrough, SyncCoordinator, SyncRegistry};
use crate::entity::{Entity, EntityId, EntityKind, PaymentMethod, Product, Sale};
use crate::error::{StoreError, SyncError, SyncResult};
use crate::reconcile::{ProductReconciler, SaleReconciler};
use crate::remote::{FetchQuery, MutationKind, RemoteClient};
use crate::store::{LocalStore, Query};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// One cart line at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartLine {
    /// Local id of the product.
    pub product_id: EntityId,
    /// Units sold.
    pub quantity: i64,
}

impl CartLine {
    /// Creates a cart line.
    pub fn new(product_id: EntityId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// Product and sale synchronization for a retail client.
///
/// Bundles one coordinator per synced kind. The financial summary is not a
/// synced kind: it is folded from cached sales on demand.
pub struct RetailSync {
    products: SyncCoordinator<ProductReconciler>,
    sales: SyncCoordinator<SaleReconciler>,
    registry: SyncRegistry,
    clock: Arc<dyn Clock>,
    split: FinancialSplit,
}

impl RetailSync {
    /// Wires coordinators for products and sales over the given stores.
    pub fn new(
        config: SyncConfig,
        split: FinancialSplit,
        products: Arc<dyn LocalStore<Product>>,
        sales: Arc<dyn LocalStore<Sale>>,
        remote: Arc<dyn RemoteClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sale_reconciler = SaleReconciler::new(Arc::clone(&products));
        let products = SyncCoordinator::new(
            config.clone(),
            products,
            Arc::clone(&remote),
            Arc::clone(&clock),
            ProductReconciler,
        );
        let sales = SyncCoordinator::new(config, sales, remote, Arc::clone(&clock), sale_reconciler);
        let registry = SyncRegistry::new()
            .with(Arc::new(products.clone()))
            .with(Arc::new(sales.clone()));

        Self {
            products,
            sales,
            registry,
            clock,
            split,
        }
    }

    /// Product coordinator.
    pub fn products(&self) -> &SyncCoordinator<ProductReconciler> {
        &self.products
    }

    /// Sale coordinator.
    pub fn sales(&self) -> &SyncCoordinator<SaleReconciler> {
        &self.sales
    }

    /// Registry over both kinds.
    pub fn registry(&self) -> &SyncRegistry {
        &self.registry
    }

    /// Financial split in use.
    pub fn split(&self) -> FinancialSplit {
        self.split
    }

    // Read-through queries

    /// Whole catalog. The remote answer is authoritative: synced products
    /// missing from it are pruned.
    pub fn catalog(&self) -> SyncResult<ReadThrough<Product>> {
        self.products.read_through(Query::all(catalog_query()))
    }

    /// Product with `barcode`.
    pub fn find_by_barcode(&self, barcode: &str) -> SyncResult<ReadThrough<Product>> {
        let remote = FetchQuery::new(EntityKind::Product, "by_barcode").with_param("barcode", barcode);
        let barcode = barcode.to_owned();
        self.products
            .read_through(Query::new(remote, move |p: &Product| p.barcode == barcode))
    }

    /// Products whose name or barcode contains `text`, ignoring case.
    pub fn search_products(&self, text: &str) -> SyncResult<ReadThrough<Product>> {
        let remote = FetchQuery::new(EntityKind::Product, "search").with_param("text", text);
        let text = text.to_owned();
        self.products
            .read_through(Query::new(remote, move |p: &Product| p.matches_text(&text)))
    }

    /// Products below their restock threshold.
    pub fn low_stock(&self) -> SyncResult<ReadThrough<Product>> {
        let remote = FetchQuery::new(EntityKind::Product, "low_stock");
        self.products
            .read_through(Query::new(remote, Product::is_low_stock))
    }

    /// Sales history. Remote pages only ever add sales locally.
    pub fn sales_history(&self) -> SyncResult<ReadThrough<Sale>> {
        self.sales
            .read_through(Query::all(FetchQuery::new(EntityKind::Sale, "history")))
    }

    // Writes

    /// Records a sale for `cart` and decrements local stock.
    ///
    /// The sale and all of its lines commit as one entity and are submitted
    /// as one mutation. Lines with a non-positive quantity are ignored. Stock
    /// is decremented locally only; the remote applies the sale on its side
    /// and the next catalog refresh reconciles the counters.
    pub fn checkout(&self, cart: &[CartLine], method: PaymentMethod) -> SyncResult<Sale> {
        let store = self.products.store();
        let mut lines = Vec::with_capacity(cart.len());
        for line in cart.iter().filter(|l| l.quantity > 0) {
            let product = store
                .get(line.product_id)?
                .ok_or(SyncError::EntityNotFound {
                    kind: EntityKind::Product,
                    id: line.product_id,
                })?;
            lines.push((product.id, line.quantity, product.price_cents));
        }
        if lines.is_empty() {
            return Err(SyncError::EmptyCart);
        }

        let sale = Sale::new(lines, method, self.clock.now()).ok_or(SyncError::AmountOverflow)?;
        self.sales.commit(sale.clone(), MutationKind::Create)?;

        for item in &sale.items {
            let decremented =
                store.update_field(item.product_id, &mut |p| p.quantity_current -= item.quantity);
            if let Err(error) = decremented {
                warn!(product = %item.product_id, error = %error, "stock not decremented");
            }
        }
        info!(
            sale = %sale.id,
            lines = sale.items.len(),
            total_cents = sale.total_cents,
            "checkout committed"
        );
        self.sales
            .store()
            .get(sale.id)?
            .ok_or(SyncError::Store(StoreError::NotFound(sale.id)))
    }

    /// Sets the stock of a product locally and submits the change.
    pub fn adjust_stock(&self, product_id: EntityId, quantity: i64) -> SyncResult<Product> {
        self.products
            .update_and_commit(product_id, MutationKind::Update, |p| {
                p.quantity_current = quantity
            })
    }

    /// Marks a sale refunded locally and submits the change.
    pub fn refund_sale(&self, sale_id: EntityId) -> SyncResult<Sale> {
        self.sales
            .update_and_commit(sale_id, MutationKind::Update, Sale::refund)
    }

    // Derived views

    /// Today's sales activity, in UTC.
    pub fn today_stats(&self) -> SyncResult<TodayStats> {
        let sales = self.sales.store().query(&|_| true)?;
        Ok(TodayStats::from_sales(&sales, self.clock.now().date_naive()))
    }

    /// Stock health of the cached catalog.
    pub fn inventory_overview(&self) -> SyncResult<InventoryOverview> {
        let products = self.products.store().query(&|_| true)?;
        Ok(InventoryOverview::from_products(&products))
    }

    /// Revenue split of all cached sales.
    pub fn financial_summary(&self) -> SyncResult<FinancialSummary> {
        let sales = self.sales.store().query(&|_| true)?;
        Ok(FinancialSummary::from_sales(&sales, &self.split))
    }

    /// [`today_stats`](Self::today_stats), recomputed on every sale change.
    pub fn live_today_stats(&self) -> DerivedView<Sale, TodayStats> {
        let clock = Arc::clone(&self.clock);
        DerivedView::new(all(self.sales.store()), move |sales| {
            TodayStats::from_sales(sales, clock.now().date_naive())
        })
    }

    /// [`inventory_overview`](Self::inventory_overview), recomputed on every
    /// product change.
    pub fn live_inventory_overview(&self) -> DerivedView<Product, InventoryOverview> {
        DerivedView::new(all(self.products.store()), InventoryOverview::from_products)
    }

    /// [`financial_summary`](Self::financial_summary), recomputed on every
    /// sale change.
    pub fn live_financial_summary(&self) -> DerivedView<Sale, FinancialSummary> {
        let split = self.split;
        DerivedView::new(all(self.sales.store()), move |sales| {
            FinancialSummary::from_sales(sales, &split)
        })
    }

    // Status

    /// Re-attempts retained tasks of `kind`. The financial summary maps to
    /// the sales it is derived from.
    pub fn resync(&self, kind: EntityKind) -> SyncResult<usize> {
        self.registry.resync(synced_kind(kind))
    }

    /// Entities awaiting confirmation across kinds.
    pub fn pending_count(&self) -> SyncResult<usize> {
        self.registry.pending_count()
    }

    /// Entities whose last submission failed across kinds.
    pub fn failed_count(&self) -> SyncResult<usize> {
        self.registry.failed_count()
    }

    /// Time of the last successful sync of `kind`.
    pub fn last_synced_at(&self, kind: EntityKind) -> SyncResult<Option<DateTime<Utc>>> {
        self.registry.last_synced_at(synced_kind(kind))
    }
}

/// Catalog query used by [`RetailSync::catalog`].
pub fn catalog_query() -> FetchQuery {
    FetchQuery::new(EntityKind::Product, "catalog").authoritative()
}

fn synced_kind(kind: EntityKind) -> EntityKind {
    match kind {
        EntityKind::FinancialSummary => EntityKind::Sale,
        other => other,
    }
}

fn all<T: Entity>(store: &Arc<dyn LocalStore<T>>) -> crate::store::Subscription<T> {
    store.subscribe(Arc::new(|_: &T| true))
}
