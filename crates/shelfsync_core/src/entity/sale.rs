//! Sales and their line items.

use super::{Entity, EntityId, EntityKind, SyncMeta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a sale was paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Cash at the till.
    Cash,
    /// Card terminal.
    Card,
    /// Bank transfer or voucher.
    Transfer,
}

/// Settlement state of a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Paid.
    Completed,
    /// Money returned to the customer.
    Refunded,
}

/// One line of a sale.
///
/// Lines reference the sale and the product by local id, never by remote id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleItem {
    /// Local id of the owning sale.
    pub sale_id: EntityId,
    /// Local id of the product sold.
    pub product_id: EntityId,
    /// Units sold.
    pub quantity: i64,
    /// Price per unit in minor currency units.
    pub unit_price_cents: i64,
    /// `quantity * unit_price_cents`.
    pub subtotal_cents: i64,
}

/// A completed checkout.
///
/// The sale embeds its items so the aggregate commits locally and submits
/// remotely as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Sale {
    /// Local id.
    pub id: EntityId,
    /// Sync bookkeeping.
    pub meta: SyncMeta,
    /// Line items.
    pub items: Vec<SaleItem>,
    /// Sum of line subtotals in minor currency units.
    pub total_cents: i64,
    /// Payment method.
    pub payment_method: PaymentMethod,
    /// Payment status.
    pub payment_status: PaymentStatus,
    /// When the sale was rung up.
    pub created_at: DateTime<Utc>,
}

impl Sale {
    /// Creates a local sale from `(product_id, quantity, unit_price_cents)`
    /// lines.
    ///
    /// Returns `None` if a line subtotal or the sale total overflows.
    pub fn new(
        lines: impl IntoIterator<Item = (EntityId, i64, i64)>,
        payment_method: PaymentMethod,
        created_at: DateTime<Utc>,
    ) -> Option<Self> {
        let id = EntityId::new();
        let items = lines
            .into_iter()
            .map(|(product_id, quantity, unit_price_cents)| {
                Some(SaleItem {
                    sale_id: id,
                    product_id,
                    quantity,
                    unit_price_cents,
                    subtotal_cents: quantity.checked_mul(unit_price_cents)?,
                })
            })
            .collect::<Option<Vec<SaleItem>>>()?;
        let total_cents = items
            .iter()
            .try_fold(0i64, |total, item| total.checked_add(item.subtotal_cents))?;

        Some(Self {
            id,
            meta: SyncMeta::local(),
            items,
            total_cents,
            payment_method,
            payment_status: PaymentStatus::Completed,
            created_at,
        })
    }

    /// Marks the sale refunded.
    pub fn refund(&mut self) {
        self.payment_status = PaymentStatus::Refunded;
    }

    /// True once refunded.
    pub fn is_refunded(&self) -> bool {
        self.payment_status == PaymentStatus::Refunded
    }
}

impl Entity for Sale {
    const KIND: EntityKind = EntityKind::Sale;

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
