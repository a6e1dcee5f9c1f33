//! Property tests for merge, backoff and derived views.

use proptest::prelude::*;
use shelfsync_core::{
    EntityReconciler, InventoryOverview, Product, ProductReconciler, RemoteError, SyncError,
    SyncStatus,
};
use shelfsync_testkit::prelude::*;

proptest! {
    #[test]
    fn merge_never_moves_backwards((synced_at, taken_at) in timestamp_pair_strategy()) {
        let local = synced_product("milk", 650, 10, 5, "7", synced_at);
        let record = product_record("7", "milk", 700, 2, 5);

        let merged = ProductReconciler::new()
            .merge(Some(&local), &record, taken_at)
            .unwrap();

        if taken_at < synced_at {
            prop_assert_eq!(merged, local);
        } else {
            prop_assert_eq!(merged.id, local.id);
            prop_assert_eq!(merged.quantity_current, 2);
            prop_assert_eq!(merged.price_cents, 700);
            prop_assert_eq!(merged.meta.last_synced_at(), Some(taken_at));
            prop_assert_eq!(merged.meta.status(), SyncStatus::Synced);
        }
    }

    #[test]
    fn backoff_is_capped_and_monotone(policy in retry_policy_strategy(), attempt in 0u32..64) {
        let delay = policy.next_delay(attempt);
        prop_assert!(delay <= policy.cap_delay);
        prop_assert!(policy.next_delay(attempt + 1) >= delay);
    }

    #[test]
    fn only_transient_failures_retry(error in remote_error_strategy()) {
        let transient = matches!(error, RemoteError::Transient(_));
        prop_assert_eq!(error.is_transient(), transient);
        prop_assert_eq!(SyncError::Remote(error).is_retryable(), transient);
    }

    #[test]
    fn synced_is_only_left_for_pending(from in sync_status_strategy(), to in sync_status_strategy()) {
        if from == SyncStatus::Synced && from.can_transition_to(to) {
            prop_assert!(matches!(to, SyncStatus::Pending | SyncStatus::Synced));
        }
        prop_assert!(!from.can_transition_to(SyncStatus::Local));
    }

    #[test]
    fn inventory_overview_accounts_for_every_alert(catalog in catalog_strategy(24)) {
        let overview = InventoryOverview::from_products(&catalog);

        prop_assert_eq!(overview.product_count, catalog.len());
        prop_assert_eq!(
            overview.low_stock_count + overview.out_of_stock_count,
            overview.alerts.len()
        );
        let expected = catalog
            .iter()
            .filter(|p| p.is_low_stock() || p.is_out_of_stock())
            .count();
        prop_assert_eq!(overview.alerts.len(), expected);
        prop_assert!(overview
            .alerts
            .windows(2)
            .all(|w| w[0].quantity_current <= w[1].quantity_current));
    }

    #[test]
    fn text_search_is_case_insensitive(product in product_strategy()) {
        let upper = product.name.to_uppercase();
        prop_assert!(product.matches_text(&upper));
        prop_assert!(Product::matches_text(&product, &product.barcode));
    }
}
