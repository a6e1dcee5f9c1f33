//! Product reconciliation.

use super::{EntityReconciler, ReplaceStrategy};
use crate::entity::{Entity, EntityId, EntityKind, Product, SyncMeta};
use crate::error::{ReconcileError, ReconcileResult};
use crate::remote::{MutationKind, RawMutation, RawRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct ProductWire {
    name: String,
    barcode: String,
    #[serde(default)]
    category: String,
    price_cents: i64,
    quantity_current: i64,
    quantity_threshold: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    internal_code: Option<String>,
}

/// Reconciler for the product catalog. Uses [`ReplaceStrategy::FullReplace`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ProductReconciler;

impl ProductReconciler {
    /// Creates the reconciler.
    pub fn new() -> Self {
        Self
    }
}

impl EntityReconciler for ProductReconciler {
    type Entity = Product;

    fn strategy(&self) -> ReplaceStrategy {
        ReplaceStrategy::FullReplace
    }

    fn apply(&self, local: Option<&Product>, remote: &RawRecord) -> ReconcileResult<Product> {
        let wire: ProductWire = serde_json::from_value(remote.payload.clone())
            .map_err(|e| ReconcileError::payload(EntityKind::Product, e))?;

        Ok(Product {
            id: local.map(|p| p.id).unwrap_or_else(EntityId::new),
            meta: local.map(|p| p.meta.clone()).unwrap_or_else(SyncMeta::local),
            name: wire.name,
            barcode: wire.barcode,
            category: wire.category,
            price_cents: wire.price_cents,
            quantity_current: wire.quantity_current,
            quantity_threshold: wire.quantity_threshold,
            internal_code: wire.internal_code,
        })
    }

    fn to_mutation(&self, local: &Product, kind: MutationKind) -> ReconcileResult<RawMutation> {
        let target = match kind {
            MutationKind::Create => None,
            MutationKind::Update => Some(
                local
                    .meta
                    .confirmed_remote_id()
                    .cloned()
                    .ok_or(ReconcileError::MissingRemoteId {
                        kind: EntityKind::Product,
                        id: local.id,
                    })?,
            ),
        };
        let wire = ProductWire {
            name: local.name.clone(),
            barcode: local.barcode.clone(),
            category: local.category.clone(),
            price_cents: local.price_cents,
            quantity_current: local.quantity_current,
            quantity_threshold: local.quantity_threshold,
            internal_code: local.internal_code.clone(),
        };
        let payload = serde_json::to_value(&wire)
            .map_err(|e| ReconcileError::payload(EntityKind::Product, e))?;

        Ok(RawMutation {
            kind: Product::KIND,
            operation: kind,
            local_id: local.id,
            target,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{RemoteId, SyncStatus};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn record(stock: i64) -> RawRecord {
        RawRecord::new(
            RemoteId::from(1_i64),
            json!({
                "name": "Milk",
                "barcode": "5941",
                "price_cents": 650,
                "quantity_current": stock,
                "quantity_threshold": 5
            }),
        )
    }

    #[test]
    fn merge_new_record() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let merged = ProductReconciler.merge(None, &record(10), at).unwrap();
        assert_eq!(merged.name, "Milk");
        assert_eq!(merged.quantity_current, 10);
        assert_eq!(merged.sync_status(), SyncStatus::Synced);
        assert_eq!(merged.meta.remote_id(), Some(&RemoteId::from(1_i64)));
        assert_eq!(merged.meta.last_synced_at(), Some(at));
    }

    #[test]
    fn merge_keeps_local_id() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let first = ProductReconciler.merge(None, &record(10), at).unwrap();
        let second = ProductReconciler
            .merge(Some(&first), &record(3), at + Duration::minutes(1))
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.quantity_current, 3);
    }

    #[test]
    fn older_snapshot_is_ignored() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let current = ProductReconciler.merge(None, &record(10), at).unwrap();
        let merged = ProductReconciler
            .merge(Some(&current), &record(3), at - Duration::seconds(1))
            .unwrap();
        assert_eq!(merged, current);
    }

    #[test]
    fn pending_local_edit_wins() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut local = ProductReconciler.merge(None, &record(10), at).unwrap();
        local.quantity_current = 8;
        local.meta.mark_pending().unwrap();
        let merged = ProductReconciler
            .merge(Some(&local), &record(3), at + Duration::hours(1))
            .unwrap();
        assert_eq!(merged, local);
    }

    #[test]
    fn bad_payload() {
        let bad = RawRecord::new(RemoteId::from(2_i64), json!({"name": 3}));
        let err = ProductReconciler.merge(None, &bad, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Payload {
                kind: EntityKind::Product,
                ..
            }
        ));
    }

    #[test]
    fn update_requires_remote_id() {
        let local = Product::new("Bread", "123", 420);
        assert!(matches!(
            ProductReconciler.to_mutation(&local, MutationKind::Update),
            Err(ReconcileError::MissingRemoteId { .. })
        ));

        let create = ProductReconciler
            .to_mutation(&local, MutationKind::Create)
            .unwrap();
        assert_eq!(create.target, None);
        assert_eq!(create.local_id, local.id);
        assert_eq!(create.payload["barcode"], "123");
        assert!(create.payload.get("internal_code").is_none());
    }
}
