//! Property-based test generators using proptest.
//!
//! Provides strategies for generating products, timestamps and remote
//! failures that respect the core's invariants.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use shelfsync_core::{Product, RemoteError, RetryPolicy, SyncStatus};

/// Strategy for timestamps between 2020 and 2030.
pub fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (1_577_836_800i64..1_893_456_000i64).prop_map(|secs| {
        Utc.timestamp_opt(secs, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    })
}

/// Strategy for a timestamp plus a signed offset in seconds.
pub fn timestamp_pair_strategy() -> impl Strategy<Value = (DateTime<Utc>, DateTime<Utc>)> {
    (timestamp_strategy(), -86_400i64..86_400i64)
        .prop_map(|(at, offset)| (at, at + Duration::seconds(offset)))
}

/// Strategy for product names.
pub fn product_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9 ]{0,23}").expect("Invalid regex")
}

/// Strategy for local products with arbitrary stock levels.
pub fn product_strategy() -> impl Strategy<Value = Product> {
    (
        product_name_strategy(),
        prop::string::string_regex("[0-9]{8,13}").expect("Invalid regex"),
        0i64..100_000,
        -5i64..200,
        0i64..50,
    )
        .prop_map(|(name, barcode, price, stock, threshold)| {
            Product::new(name, barcode, price).with_stock(stock, threshold)
        })
}

/// Strategy for catalogs of distinct products.
pub fn catalog_strategy(max: usize) -> impl Strategy<Value = Vec<Product>> {
    prop::collection::vec(product_strategy(), 0..=max)
}

/// Strategy for sync statuses.
pub fn sync_status_strategy() -> impl Strategy<Value = SyncStatus> {
    prop_oneof![
        Just(SyncStatus::Local),
        Just(SyncStatus::Pending),
        Just(SyncStatus::Synced),
        Just(SyncStatus::Failed),
    ]
}

/// Strategy for classified remote failures.
pub fn remote_error_strategy() -> impl Strategy<Value = RemoteError> {
    prop_oneof![
        "[a-z ]{0,16}".prop_map(RemoteError::Transient),
        (400u16..500, "[a-z ]{0,16}")
            .prop_map(|(code, message)| RemoteError::Rejected { code, message }),
        Just(RemoteError::Unauthenticated),
        "[a-z ]{0,16}".prop_map(RemoteError::Unknown),
    ]
}

/// Strategy for retry policies with small delays.
pub fn retry_policy_strategy() -> impl Strategy<Value = RetryPolicy> {
    (1u32..8, 1u64..500, 1u64..10_000).prop_map(|(max, initial, cap)| {
        RetryPolicy::new(max)
            .with_initial_delay(std::time::Duration::from_millis(initial))
            .with_cap_delay(std::time::Duration::from_millis(cap))
    })
}
