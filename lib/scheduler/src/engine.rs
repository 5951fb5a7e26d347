//! Engine lifecycle: owns the four background workers, spawns their tick
//! loops, and exposes the admin surface's status/manual-trigger actions.

use crate::config::EngineConfig;
use crate::error::WorkerError;
use crate::retry::{CircuitBreakerRegistry, CircuitState};
use crate::workers::{CronGenerator, Dispatcher, Janitor, Promoter, QueueHealthSnapshot};
use chrono::Utc;
use eventide_bus::Bus;
use eventide_store::{AnalyticsStore, CStore, DStore, DelayedEventStatus, KStore};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Aggregated engine status for the admin `/stats` surface (§3/§6).
#[derive(Debug, Clone)]
pub struct EngineStatus {
    /// Active cron definitions in D.
    pub active_cron_definitions: u64,
    /// Pending rows in C.
    pub c_pending: u64,
    /// Promoted rows in C still awaiting Janitor confirmation.
    pub c_promoted: u64,
    /// Current K queue health snapshot.
    pub queue_health: QueueHealthSnapshot,
    /// State of the bus circuit breaker.
    pub bus_circuit_state: CircuitState,
}

/// Owns the spawned worker tick-loop tasks. Dropping or calling `stop`
/// aborts every loop.
pub struct EngineHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Aborts every running worker loop.
    pub fn stop(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// The running engine: four workers sharing the D/C/K/analytics stores and
/// the bus, ticking independently per §4.2-§4.6.
pub struct Engine {
    d_store: Arc<dyn DStore>,
    c_store: Arc<dyn CStore>,
    k_store: Arc<dyn KStore>,
    cron_generator: Arc<CronGenerator>,
    promoter: Arc<Promoter>,
    dispatcher: Arc<Dispatcher>,
    janitor: Arc<Janitor>,
    circuit_breakers: CircuitBreakerRegistry,
    config: EngineConfig,
}

impl Engine {
    /// Builds an engine over the given stores and bus, identified by
    /// `node_id` for claim-lock attribution.
    #[must_use]
    pub fn new(
        d_store: Arc<dyn DStore>,
        c_store: Arc<dyn CStore>,
        k_store: Arc<dyn KStore>,
        analytics_store: Arc<dyn AnalyticsStore>,
        bus: Arc<dyn Bus>,
        config: EngineConfig,
        node_id: impl Into<String>,
    ) -> Self {
        let circuit_breakers = CircuitBreakerRegistry::new(
            config.circuit_breaker_failure_threshold,
            config.circuit_breaker_cooldown_seconds,
        );
        let node_id = node_id.into();

        let cron_generator = Arc::new(CronGenerator::new(
            d_store.clone(),
            c_store.clone(),
            analytics_store.clone(),
            config.clone(),
        ));
        let promoter = Arc::new(Promoter::new(
            c_store.clone(),
            k_store.clone(),
            analytics_store.clone(),
            config.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            k_store.clone(),
            bus,
            analytics_store.clone(),
            circuit_breakers.clone(),
            config.clone(),
            node_id,
        ));
        let janitor = Arc::new(Janitor::new(
            c_store.clone(),
            k_store.clone(),
            d_store.clone(),
            analytics_store,
            config.clone(),
        ));

        Self {
            d_store,
            c_store,
            k_store,
            cron_generator,
            promoter,
            dispatcher,
            janitor,
            circuit_breakers,
            config,
        }
    }

    /// Spawns the four tick loops and returns a handle that stops them.
    #[must_use]
    pub fn start(&self) -> EngineHandle {
        let tasks = vec![
            spawn_loop(
                "cron_generator",
                self.config.cron_tick_seconds,
                self.cron_generator.clone(),
                |w, now| async move { w.tick_now(now).await.map(|_| ()) },
            ),
            spawn_loop(
                "promoter",
                self.config.promote_tick_seconds,
                self.promoter.clone(),
                |w, now| async move { w.tick_now(now).await.map(|_| ()) },
            ),
            spawn_loop(
                "dispatcher",
                self.config.dispatch_tick_seconds,
                self.dispatcher.clone(),
                |w, now| async move { w.tick_now(now).await.map(|_| ()) },
            ),
            spawn_loop(
                "janitor",
                self.config.janitor_tick_seconds,
                self.janitor.clone(),
                |w, now| async move { w.tick_now(now).await.map(|_| ()) },
            ),
        ];
        info!("engine started");
        EngineHandle { tasks }
    }

    /// Runs the promoter immediately, bypassing its timer. Admin action.
    pub async fn trigger_manual_promotion(&self) -> Result<(), WorkerError> {
        self.promoter.tick_now(Utc::now()).await.map(|_| ())
    }

    /// Runs the dispatcher immediately, bypassing its timer. Admin action.
    pub async fn trigger_manual_dispatch(&self) -> Result<(), WorkerError> {
        self.dispatcher.tick_now(Utc::now()).await.map(|_| ())
    }

    /// Runs a full janitor sweep immediately. Admin action.
    pub async fn trigger_manual_janitor_sweep(&self) -> Result<(), WorkerError> {
        self.janitor.tick_now(Utc::now()).await.map(|_| ())
    }

    /// Computes the current aggregated status for the admin surface.
    pub async fn status(&self) -> Result<EngineStatus, WorkerError> {
        let now = Utc::now();
        let active_cron_definitions = self.d_store.count_active().await?;
        let c_pending = self.c_store.count_by_status(DelayedEventStatus::Pending).await?;
        let c_promoted = self.c_store.count_by_status(DelayedEventStatus::Promoted).await?;
        let queue_health = self.janitor.queue_health(now).await?;
        let bus_circuit_state = self.circuit_breakers.get("bus").state();

        Ok(EngineStatus {
            active_cron_definitions,
            c_pending,
            c_promoted,
            queue_health,
            bus_circuit_state,
        })
    }

    /// Direct access to the K store, for callers building their own
    /// diagnostics beyond `status()`.
    #[must_use]
    pub fn k_store(&self) -> &Arc<dyn KStore> {
        &self.k_store
    }
}

fn spawn_loop<W, F, Fut>(name: &'static str, tick_seconds: u64, worker: Arc<W>, tick: F) -> JoinHandle<()>
where
    W: Send + Sync + 'static,
    F: Fn(Arc<W>, chrono::DateTime<Utc>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), WorkerError>> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(StdDuration::from_secs(tick_seconds));
        loop {
            interval.tick().await;
            if let Err(e) = tick(worker.clone(), Utc::now()).await {
                warn!(worker = name, error = %e, "worker tick failed");
            }
        }
    })
}
