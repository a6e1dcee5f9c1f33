//! Catalog product.

use super::{Entity, EntityId, EntityKind, SyncMeta};

/// A catalog product with its stock counters.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    /// Local id.
    pub id: EntityId,
    /// Sync bookkeeping.
    pub meta: SyncMeta,
    /// Display name.
    pub name: String,
    /// Scannable barcode.
    pub barcode: String,
    /// Catalog category.
    pub category: String,
    /// Sell price in minor currency units.
    pub price_cents: i64,
    /// Units currently on the shelf.
    pub quantity_current: i64,
    /// Restock threshold.
    pub quantity_threshold: i64,
    /// Optional store-internal code.
    pub internal_code: Option<String>,
}

impl Product {
    /// Creates a local product with no stock.
    pub fn new(name: impl Into<String>, barcode: impl Into<String>, price_cents: i64) -> Self {
        Self {
            id: EntityId::new(),
            meta: SyncMeta::local(),
            name: name.into(),
            barcode: barcode.into(),
            category: String::new(),
            price_cents,
            quantity_current: 0,
            quantity_threshold: 0,
            internal_code: None,
        }
    }

    /// Sets the stock counters.
    pub fn with_stock(mut self, current: i64, threshold: i64) -> Self {
        self.quantity_current = current;
        self.quantity_threshold = threshold;
        self
    }

    /// Sets the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Below the restock threshold (includes out of stock).
    pub fn is_low_stock(&self) -> bool {
        self.quantity_current < self.quantity_threshold
    }

    /// Nothing left on the shelf.
    pub fn is_out_of_stock(&self) -> bool {
        self.quantity_current <= 0
    }

    /// Case-insensitive match on name or barcode.
    pub fn matches_text(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.name.to_lowercase().contains(&needle) || self.barcode.to_lowercase().contains(&needle)
    }
}

impl Entity for Product {
    const KIND: EntityKind = EntityKind::Product;

    fn id(&self) -> EntityId {
        self.id
    }

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_predicates() {
        let p = Product::new("Milk", "5941", 650).with_stock(3, 5);
        assert!(p.is_low_stock());
        assert!(!p.is_out_of_stock());

        let p = p.with_stock(0, 5);
        assert!(p.is_low_stock());
        assert!(p.is_out_of_stock());

        let p = p.with_stock(10, 5);
        assert!(!p.is_low_stock());
    }

    #[test]
    fn text_match() {
        let p = Product::new("Whole Milk", "5941000123", 650);
        assert!(p.matches_text("milk"));
        assert!(p.matches_text("0001"));
        assert!(!p.matches_text("bread"));
    }
}
