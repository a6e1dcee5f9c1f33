//! Sale reconciliation.
//!
//! Locally, sale lines reference products by local id. On the wire they
//! reference the product's remote id, so both directions resolve through the
//! product store. A sale and all of its lines always travel as one mutation.

use super::{EntityReconciler, ReplaceStrategy};
use crate::entity::{
    Entity, EntityId, EntityKind, PaymentMethod, PaymentStatus, Product, RemoteId, Sale, SaleItem,
    SyncMeta,
};
use crate::error::{ReconcileError, ReconcileResult};
use crate::remote::{MutationKind, RawMutation, RawRecord};
use crate::store::LocalStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
struct SaleItemWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    product_id: Option<RemoteId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    product_local_id: Option<EntityId>,
    quantity: i64,
    unit_price_cents: i64,
    subtotal_cents: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SaleWire {
    items: Vec<SaleItemWire>,
    total_cents: i64,
    payment_method: PaymentMethod,
    payment_status: PaymentStatus,
    created_at: DateTime<Utc>,
}

/// Reconciler for sales. Uses [`ReplaceStrategy::AdditiveOnly`].
pub struct SaleReconciler {
    products: Arc<dyn LocalStore<Product>>,
}

impl SaleReconciler {
    /// Creates a reconciler resolving product references through `products`.
    pub fn new(products: Arc<dyn LocalStore<Product>>) -> Self {
        Self { products }
    }

    fn resolve_local_product(&self, item: &SaleItemWire) -> ReconcileResult<EntityId> {
        if let Some(remote_id) = &item.product_id {
            let found = self
                .products
                .find_by_remote_id(remote_id)
                .map_err(|e| payload_error(e.to_string()))?;
            if let Some(product) = found {
                return Ok(product.id);
            }
        }
        item.product_local_id.ok_or_else(|| {
            payload_error(format!(
                "line references unknown product {}",
                item.product_id
                    .as_ref()
                    .map(RemoteId::to_string)
                    .unwrap_or_else(|| "<none>".into())
            ))
        })
    }

    fn resolve_remote_product(&self, product_id: EntityId) -> Option<RemoteId> {
        self.products
            .get(product_id)
            .ok()
            .flatten()
            .and_then(|p| p.meta.confirmed_remote_id().cloned())
    }
}

fn payload_error(message: String) -> ReconcileError {
    ReconcileError::Payload {
        kind: EntityKind::Sale,
        message,
    }
}

impl EntityReconciler for SaleReconciler {
    type Entity = Sale;

    fn strategy(&self) -> ReplaceStrategy {
        ReplaceStrategy::AdditiveOnly
    }

    fn apply(&self, local: Option<&Sale>, remote: &RawRecord) -> ReconcileResult<Sale> {
        let wire: SaleWire = serde_json::from_value(remote.payload.clone())
            .map_err(|e| ReconcileError::payload(EntityKind::Sale, e))?;

        let id = local.map(|s| s.id).unwrap_or_else(EntityId::new);
        let items = wire
            .items
            .iter()
            .map(|item| {
                Ok(SaleItem {
                    sale_id: id,
                    product_id: self.resolve_local_product(item)?,
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price_cents,
                    subtotal_cents: item.subtotal_cents,
                })
            })
            .collect::<ReconcileResult<Vec<_>>>()?;

        Ok(Sale {
            id,
            meta: local.map(|s| s.meta.clone()).unwrap_or_else(SyncMeta::local),
            items,
            total_cents: wire.total_cents,
            payment_method: wire.payment_method,
            payment_status: wire.payment_status,
            created_at: wire.created_at,
        })
    }

    fn to_mutation(&self, local: &Sale, kind: MutationKind) -> ReconcileResult<RawMutation> {
        let target = match kind {
            MutationKind::Create => None,
            MutationKind::Update => Some(local.meta.confirmed_remote_id().cloned().ok_or(
                ReconcileError::MissingRemoteId {
                    kind: EntityKind::Sale,
                    id: local.id,
                },
            )?),
        };
        let wire = SaleWire {
            items: local
                .items
                .iter()
                .map(|item| SaleItemWire {
                    product_id: self.resolve_remote_product(item.product_id),
                    product_local_id: Some(item.product_id),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price_cents,
                    subtotal_cents: item.subtotal_cents,
                })
                .collect(),
            total_cents: local.total_cents,
            payment_method: local.payment_method,
            payment_status: local.payment_status,
            created_at: local.created_at,
        };
        let payload = serde_json::to_value(&wire)
            .map_err(|e| ReconcileError::payload(EntityKind::Sale, e))?;

        Ok(RawMutation {
            kind: Sale::KIND,
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
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use serde_json::json;

    fn products_with_milk() -> (Arc<MemoryStore<Product>>, EntityId) {
        let store = Arc::new(MemoryStore::new());
        let mut milk = Product::new("Milk", "5941", 650);
        milk.meta = SyncMeta::confirmed(RemoteId::from(11_i64), Utc::now());
        let id = milk.id;
        store.upsert(milk).unwrap();
        (store, id)
    }

    #[test]
    fn mutation_carries_whole_aggregate() {
        let (products, milk) = products_with_milk();
        let bread = EntityId::from_u128(99);
        let reconciler = SaleReconciler::new(products);

        let sale = Sale::new([(milk, 2, 650), (bread, 1, 420)], PaymentMethod::Cash, Utc::now())
            .unwrap();
        let m = reconciler.to_mutation(&sale, MutationKind::Create).unwrap();

        assert_eq!(m.kind, EntityKind::Sale);
        assert_eq!(m.local_id, sale.id);
        let items = m.payload["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["product_id"], "11");
        assert!(items[1].get("product_id").is_none());
        assert_eq!(m.payload["total_cents"], 1720);
        assert_eq!(m.payload["payment_method"], "CASH");
    }

    #[test]
    fn merge_resolves_products_by_remote_id() {
        let (products, milk) = products_with_milk();
        let reconciler = SaleReconciler::new(products);
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        let record = RawRecord::new(
            RemoteId::from(500_i64),
            json!({
                "items": [{"product_id": "11", "quantity": 3, "unit_price_cents": 650, "subtotal_cents": 1950}],
                "total_cents": 1950,
                "payment_method": "CARD",
                "payment_status": "REFUNDED",
                "created_at": "2024-06-01T10:00:00Z"
            }),
        );
        let sale = reconciler.merge(None, &record, at).unwrap();
        assert_eq!(sale.items[0].product_id, milk);
        assert_eq!(sale.items[0].sale_id, sale.id);
        assert!(sale.is_refunded());
        assert_eq!(sale.meta.remote_id(), Some(&RemoteId::from(500_i64)));
    }

    #[test]
    fn merge_rejects_unknown_product() {
        let (products, _) = products_with_milk();
        let reconciler = SaleReconciler::new(products);
        let record = RawRecord::new(
            RemoteId::from(501_i64),
            json!({
                "items": [{"product_id": "404", "quantity": 1, "unit_price_cents": 1, "subtotal_cents": 1}],
                "total_cents": 1,
                "payment_method": "CASH",
                "payment_status": "COMPLETED",
                "created_at": "2024-06-01T10:00:00Z"
            }),
        );
        assert!(reconciler.merge(None, &record, Utc::now()).is_err());
    }

    #[test]
    fn strategy_is_additive() {
        let (products, _) = products_with_milk();
        assert_eq!(
            SaleReconciler::new(products).strategy(),
            ReplaceStrategy::AdditiveOnly
        );
    }
}
