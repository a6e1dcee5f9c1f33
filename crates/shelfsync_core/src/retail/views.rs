//! Views derived from cached products and sales.
//!
//! None of these are stored or synced. Each is a fold over a local query,
//! recomputed whenever the store commits a change touching that query.

use crate::config::FinancialSplit;
use crate::entity::{PaymentStatus, Product, Sale};
use crate::store::Subscription;
use chrono::NaiveDate;
use futures_util::stream::{self, Stream};
use std::sync::Arc;

/// Number of sales listed in [`TodayStats::recent`].
pub const RECENT_SALES: usize = 5;

/// Sales activity for one calendar day.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TodayStats {
    /// Completed sales.
    pub transactions: usize,
    /// Revenue of completed sales.
    pub revenue_cents: i64,
    /// Most recent sales of the day, newest first, refunds included.
    pub recent: Vec<Sale>,
}

impl TodayStats {
    /// Folds `sales` made on `day` (UTC).
    pub fn from_sales(sales: &[Sale], day: NaiveDate) -> Self {
        let mut todays: Vec<&Sale> = sales
            .iter()
            .filter(|s| s.created_at.date_naive() == day)
            .collect();
        todays.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let completed = todays
            .iter()
            .filter(|s| s.payment_status == PaymentStatus::Completed);
        Self {
            transactions: completed.clone().count(),
            revenue_cents: completed.map(|s| s.total_cents).sum(),
            recent: todays.into_iter().take(RECENT_SALES).cloned().collect(),
        }
    }
}

/// Stock health of the catalog.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InventoryOverview {
    /// Products in the catalog.
    pub product_count: usize,
    /// Products below threshold that still have stock.
    pub low_stock_count: usize,
    /// Products with no stock left.
    pub out_of_stock_count: usize,
    /// Every product below threshold, emptiest first.
    pub alerts: Vec<Product>,
}

impl InventoryOverview {
    /// Folds `products`.
    pub fn from_products(products: &[Product]) -> Self {
        let mut alerts: Vec<Product> = products
            .iter()
            .filter(|p| p.is_low_stock() || p.is_out_of_stock())
            .cloned()
            .collect();
        alerts.sort_by(|a, b| {
            a.quantity_current
                .cmp(&b.quantity_current)
                .then_with(|| a.name.cmp(&b.name))
        });

        let out_of_stock_count = alerts.iter().filter(|p| p.is_out_of_stock()).count();
        Self {
            product_count: products.len(),
            low_stock_count: alerts.len() - out_of_stock_count,
            out_of_stock_count,
            alerts,
        }
    }
}

/// Revenue split into costs and profit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FinancialSummary {
    /// Revenue of completed sales.
    pub revenue_cents: i64,
    /// Cost of goods sold.
    pub cogs_cents: i64,
    /// Operating expenses.
    pub expenses_cents: i64,
    /// Revenue minus cost of goods and expenses.
    pub net_profit_cents: i64,
}

impl FinancialSummary {
    /// Folds `sales` using `split`. Refunded sales carry no revenue.
    pub fn from_sales(sales: &[Sale], split: &FinancialSplit) -> Self {
        let revenue_cents: i64 = sales
            .iter()
            .filter(|s| s.payment_status == PaymentStatus::Completed)
            .map(|s| s.total_cents)
            .sum();
        let cogs_cents = split.cogs(revenue_cents);
        let expenses_cents = split.expenses(revenue_cents);
        Self {
            revenue_cents,
            cogs_cents,
            expenses_cents,
            net_profit_cents: revenue_cents - cogs_cents - expenses_cents,
        }
    }
}

type Fold<T, V> = Arc<dyn Fn(&[T]) -> V + Send + Sync>;

/// A derived value that follows the store.
pub struct DerivedView<T, V> {
    subscription: Subscription<T>,
    fold: Fold<T, V>,
}

impl<T, V> DerivedView<T, V>
where
    T: Clone + Send + Sync + 'static,
    V: Send + 'static,
{
    pub(crate) fn new(
        subscription: Subscription<T>,
        fold: impl Fn(&[T]) -> V + Send + Sync + 'static,
    ) -> Self {
        Self {
            subscription,
            fold: Arc::new(fold),
        }
    }

    /// Value computed from the store right now.
    pub fn current(&self) -> V {
        (self.fold)(&self.subscription.current())
    }

    /// Waits for the next relevant change and returns the recomputed value.
    pub async fn next(&mut self) -> Option<V> {
        let items = self.subscription.next().await?;
        Some((self.fold)(&items))
    }

    /// Converts the view into a [`Stream`] of recomputed values.
    pub fn into_stream(self) -> impl Stream<Item = V> + Send {
        stream::unfold(self, |mut view| async move {
            let value = view.next().await?;
            Some((value, view))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityId, PaymentMethod};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
    }

    fn sale(total: i64, created_at: DateTime<Utc>) -> Sale {
        Sale::new([(EntityId::new(), 1, total)], PaymentMethod::Cash, created_at).unwrap()
    }

    #[test]
    fn today_stats_only_counts_today() {
        let mut refunded = sale(900, at(3, 15));
        refunded.refund();
        let sales = vec![
            sale(100, at(2, 23)),
            sale(250, at(3, 9)),
            sale(400, at(3, 12)),
            refunded,
        ];
        let stats = TodayStats::from_sales(&sales, at(3, 0).date_naive());
        assert_eq!(stats.transactions, 2);
        assert_eq!(stats.revenue_cents, 650);
        assert_eq!(stats.recent.len(), 3);
        assert!(stats.recent[0].is_refunded());
        assert_eq!(stats.recent[1].total_cents, 400);
    }

    #[test]
    fn today_stats_keeps_five_recent() {
        let sales: Vec<Sale> = (0..8)
            .map(|i| sale(10, at(3, 8) + Duration::minutes(i)))
            .collect();
        let stats = TodayStats::from_sales(&sales, at(3, 0).date_naive());
        assert_eq!(stats.transactions, 8);
        assert_eq!(stats.recent.len(), RECENT_SALES);
        assert_eq!(stats.recent[0].created_at, at(3, 8) + Duration::minutes(7));
    }

    #[test]
    fn inventory_overview_splits_low_and_out() {
        let products = vec![
            Product::new("milk", "1", 1).with_stock(10, 5),
            Product::new("bread", "2", 1).with_stock(3, 5),
            Product::new("eggs", "3", 1).with_stock(0, 5),
            Product::new("salt", "4", 1).with_stock(0, 0),
        ];
        let overview = InventoryOverview::from_products(&products);
        assert_eq!(overview.product_count, 4);
        assert_eq!(overview.low_stock_count, 1);
        assert_eq!(overview.out_of_stock_count, 2);
        let names: Vec<_> = overview.alerts.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["eggs", "salt", "bread"]);
    }

    #[test]
    fn financial_summary_applies_split() {
        let mut refunded = sale(5_000, at(3, 10));
        refunded.refund();
        let sales = vec![sale(10_000, at(3, 9)), refunded];

        let summary = FinancialSummary::from_sales(&sales, &FinancialSplit::new(0.5, 0.25));
        assert_eq!(summary.revenue_cents, 10_000);
        assert_eq!(summary.cogs_cents, 5_000);
        assert_eq!(summary.expenses_cents, 2_500);
        assert_eq!(summary.net_profit_cents, 2_500);

        let all_profit = FinancialSummary::from_sales(&sales, &FinancialSplit::default());
        assert_eq!(all_profit.net_profit_cents, 10_000);
    }
}
