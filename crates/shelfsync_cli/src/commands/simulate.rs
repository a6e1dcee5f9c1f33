//! Simulate command implementation.
//!
//! Wires a [`RetailSync`] over in-memory stores and a [`ScriptedRemote`] and
//! walks it through one sync scenario, recording what a client would see.

use crate::config::CliConfig;
use clap::ValueEnum;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::json;
use shelfsync_core::{
    CacheSnapshot, CartLine, Clock, EntityId, EntityKind, EntityReconciler, FetchOutcome,
    FetchQuery, LocalStore, MemoryStore, PaymentMethod, Product, RawRecord, RemoteError,
    RemoteId, RetailSync, Sale, ScriptedRemote, SyncCoordinator, SyncEvent, SyncMeta,
    SyncStatus, SystemClock,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Upper bound for any single wait in a scenario.
const WAIT_LIMIT: Duration = Duration::from_secs(120);

type CmdResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Scenarios the simulator can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// A sale rung up offline exhausts its retries, then recovers on resync.
    OfflineSale,
    /// A catalog refresh pushes a product below its restock threshold.
    LowStock,
    /// The remote rejects credentials; the failure is surfaced without retry.
    Unauthenticated,
}

impl Scenario {
    fn name(self) -> &'static str {
        match self {
            Scenario::OfflineSale => "offline-sale",
            Scenario::LowStock => "low-stock",
            Scenario::Unauthenticated => "unauthenticated",
        }
    }
}

/// What a scenario observed.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Scenario name.
    pub scenario: &'static str,
    /// Observations in order.
    pub steps: Vec<String>,
    /// Submissions seen by the remote.
    pub submissions: usize,
    /// Backoff retries across both kinds.
    pub retries: u64,
    /// Entities still pending at the end.
    pub pending: usize,
    /// Entities failed at the end.
    pub failed: usize,
}

struct Simulation {
    retail: RetailSync,
    products: Arc<MemoryStore<Product>>,
    sales: Arc<MemoryStore<Sale>>,
    remote: Arc<ScriptedRemote>,
    clock: Arc<SystemClock>,
    steps: Vec<String>,
}

impl Simulation {
    fn new(config: &CliConfig) -> Self {
        let products = Arc::new(MemoryStore::new());
        let sales = Arc::new(MemoryStore::new());
        let remote = Arc::new(ScriptedRemote::new());
        let clock = Arc::new(SystemClock);
        let retail = RetailSync::new(
            config.sync.clone(),
            config.split,
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
            steps: Vec::new(),
        }
    }

    fn step(&mut self, message: String) {
        info!(step = self.steps.len() + 1, "{message}");
        self.steps.push(message);
    }

    fn seed(
        &self,
        name: &str,
        barcode: &str,
        price_cents: i64,
        stock: i64,
        remote_id: &str,
    ) -> CmdResult<Product> {
        let mut product = Product::new(name, barcode, price_cents).with_stock(stock, 5);
        product.meta = SyncMeta::confirmed(RemoteId::new(remote_id), self.clock.now());
        self.products.upsert(product.clone())?;
        Ok(product)
    }

    fn report(self, scenario: Scenario) -> CmdResult<SimulationReport> {
        let retries = self.retail.products().stats().retries + self.retail.sales().stats().retries;
        Ok(SimulationReport {
            scenario: scenario.name(),
            submissions: self.remote.submissions().len(),
            retries,
            pending: self.retail.pending_count()?,
            failed: self.retail.failed_count()?,
            steps: self.steps,
        })
    }
}

/// Runs `scenario` and returns its report.
pub async fn simulate(config: &CliConfig, scenario: Scenario) -> CmdResult<SimulationReport> {
    info!(scenario = scenario.name(), "simulation started");
    let mut sim = Simulation::new(config);
    match scenario {
        Scenario::OfflineSale => offline_sale(&mut sim).await?,
        Scenario::LowStock => low_stock(&mut sim).await?,
        Scenario::Unauthenticated => unauthenticated(&mut sim).await?,
    }
    sim.report(scenario)
}

async fn offline_sale(sim: &mut Simulation) -> CmdResult<()> {
    let milk = sim.seed("Whole Milk", "5940000000011", 650, 10, "1")?;
    let bread = sim.seed("Rye Bread", "5940000000028", 420, 8, "2")?;
    sim.remote.set_offline(true);

    let sale = sim.retail.checkout(
        &[CartLine::new(milk.id, 2), CartLine::new(bread.id, 1)],
        PaymentMethod::Cash,
    )?;
    sim.step(format!(
        "sale {} committed locally as {:?}, total {} cents",
        sale.id,
        current_status(&sim.sales, sale.id)?,
        sale.total_cents
    ));

    wait_for_status(sim.retail.sales(), sale.id, SyncStatus::Failed).await?;
    sim.step(format!(
        "offline: {} attempts made, sale is Failed with {} task retained",
        sim.remote.submissions().len(),
        sim.retail.sales().failed_tasks().len()
    ));

    sim.remote.set_offline(false);
    let requeued = sim.retail.resync(EntityKind::Sale)?;
    sim.step(format!("back online: resync requeued {requeued} task(s)"));

    wait_for_status(sim.retail.sales(), sale.id, SyncStatus::Synced).await?;
    let remote_id = sim
        .sales
        .get(sale.id)?
        .and_then(|s| s.meta.remote_id().cloned())
        .ok_or("synced sale has no remote id")?;
    sim.step(format!("sale synced as remote record {remote_id}"));
    Ok(())
}

async fn low_stock(sim: &mut Simulation) -> CmdResult<()> {
    sim.seed("Whole Milk", "5940000000011", 650, 10, "1")?;

    let query = FetchQuery::new(EntityKind::Product, "low_stock");
    let record = RawRecord::new(
        RemoteId::new("1"),
        json!({
            "name": "Whole Milk",
            "barcode": "5940000000011",
            "category": "dairy",
            "price_cents": 650,
            "quantity_current": 3,
            "quantity_threshold": 5
        }),
    );
    sim.remote
        .set_fetch(&query, Ok(CacheSnapshot::new(sim.clock.now(), vec![record])));

    let mut read = sim.retail.low_stock()?;
    sim.step(format!(
        "cached low-stock list returned immediately with {} product(s)",
        read.immediate.len()
    ));

    let alerts = tokio::time::timeout(WAIT_LIMIT, read.updates.next())
        .await?
        .ok_or("low-stock subscription closed")?;
    for product in &alerts {
        sim.step(format!(
            "subscriber notified: {} has {} left (threshold {})",
            product.name, product.quantity_current, product.quantity_threshold
        ));
    }

    match read.fetch.outcome().await {
        FetchOutcome::Refreshed(report) => {
            sim.step(format!("refresh merged {} record(s)", report.merged))
        }
        FetchOutcome::Failed(failure) => sim.step(format!("refresh failed: {}", failure.error)),
        FetchOutcome::Cancelled => sim.step("refresh cancelled".to_string()),
    }
    Ok(())
}

async fn unauthenticated(sim: &mut Simulation) -> CmdResult<()> {
    let milk = sim.seed("Whole Milk", "5940000000011", 650, 10, "1")?;
    sim.remote
        .set_submit_failure(Some(RemoteError::from_status(401, "token expired")));
    let mut events = sim.retail.sales().events();

    let sale = sim
        .retail
        .checkout(&[CartLine::new(milk.id, 1)], PaymentMethod::Card)?;
    sim.step(format!("sale {} committed locally", sale.id));

    let failure = tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            match events.recv().await {
                Ok(SyncEvent::SubmitFailed { failure, .. }) => return Ok(failure),
                Ok(_) => continue,
                Err(e) => return Err(e),
            }
        }
    })
    .await??;
    sim.step(format!(
        "submission failed after {} attempt(s): {} (sign-in required: {})",
        sim.remote.submissions().len(),
        failure.error,
        failure.needs_authentication()
    ));
    Ok(())
}

fn current_status(sales: &MemoryStore<Sale>, id: EntityId) -> CmdResult<SyncStatus> {
    let sale = sales.get(id)?.ok_or("sale missing from cache")?;
    Ok(sale.meta.status())
}

async fn wait_for_status<R: EntityReconciler>(
    coordinator: &SyncCoordinator<R>,
    id: EntityId,
    want: SyncStatus,
) -> CmdResult<()> {
    let mut statuses = Box::pin(coordinator.status_stream(id));
    tokio::time::timeout(WAIT_LIMIT, async {
        while let Some(status) = statuses.next().await {
            if status == want {
                return Ok(());
            }
        }
        Err(format!("entity {id} was removed before reaching {want:?}"))
    })
    .await??;
    Ok(())
}

/// Runs the simulate command.
pub async fn run(config: &CliConfig, scenario: Scenario, format: &str) -> CmdResult<()> {
    let report = simulate(config, scenario).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            println!("Scenario: {}", report.scenario);
            for (i, step) in report.steps.iter().enumerate() {
                println!("  {}. {}", i + 1, step);
            }
            println!();
            println!("Submissions: {}", report.submissions);
            println!("Retries:     {}", report.retries);
            println!("Pending:     {}", report.pending);
            println!("Failed:      {}", report.failed);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn offline_sale_recovers() {
        let report = simulate(&CliConfig::default(), Scenario::OfflineSale)
            .await
            .unwrap();
        assert_eq!(report.submissions, 4);
        assert_eq!(report.retries, 2);
        assert_eq!(report.pending, 0);
        assert_eq!(report.failed, 0);
        assert!(report.steps.last().unwrap().contains("r1"));
    }

    #[tokio::test(start_paused = true)]
    async fn low_stock_notifies_subscriber() {
        let report = simulate(&CliConfig::default(), Scenario::LowStock)
            .await
            .unwrap();
        assert!(report.steps[0].contains("0 product(s)"));
        assert!(report.steps[1].contains("Whole Milk has 3 left"));
        assert_eq!(report.submissions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unauthenticated_is_not_retried() {
        let report = simulate(&CliConfig::default(), Scenario::Unauthenticated)
            .await
            .unwrap();
        assert_eq!(report.submissions, 1);
        assert_eq!(report.failed, 1);
        assert!(report.steps[1].contains("sign-in required: true"));
    }
}
