//! Scheduler driving host runs on a bounded worker pool.
//!
//! Each cycle runs every registered host in parallel, at most `max_workers`
//! at a time and never two runs of the same host at once. Runs observe a
//! per-host [`Cancellation`] so removing a host or shutting down stops probes
//! in flight.

use futures_util::future::join_all;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::{HostRunReport, StrategyOrchestrator};
use crate::core::config::{EngineConfig, HostConfiguration};
use crate::core::connector::ConnectorStore;
use crate::core::extension::{ExtensionRegistry, HostContext};
use crate::core::source::SerializationLocks;
use crate::core::telemetry::TelemetryStore;

/// Read side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// A token and the sender that cancels it.
    pub fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    /// A token nobody can cancel.
    pub fn never() -> Self {
        Self::new().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled. Never resolves if the sender is gone first.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

struct HostSlot {
    config: Arc<HostConfiguration>,
    running: Arc<tokio::sync::Mutex<()>>,
    cancel_tx: watch::Sender<bool>,
    cancellation: Cancellation,
}

impl HostSlot {
    fn new(config: HostConfiguration) -> Self {
        let (cancel_tx, cancellation) = Cancellation::new();
        Self {
            config: Arc::new(config),
            running: Arc::new(tokio::sync::Mutex::new(())),
            cancel_tx,
            cancellation,
        }
    }
}

struct SchedulerInner {
    orchestrator: StrategyOrchestrator,
    engine: Arc<EngineConfig>,
    hosts: RwLock<BTreeMap<String, HostSlot>>,
    workers: Arc<Semaphore>,
    locks: SerializationLocks,
    shutdown_tx: broadcast::Sender<()>,
    shut_down: std::sync::atomic::AtomicBool,
}

/// Owns the engine state and runs cycles over the registered hosts.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(
        engine: EngineConfig,
        registry: Arc<ExtensionRegistry>,
        connectors: Arc<ConnectorStore>,
        telemetry: Arc<TelemetryStore>,
    ) -> Self {
        let engine = Arc::new(engine);
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(SchedulerInner {
                orchestrator: StrategyOrchestrator::new(registry, connectors, telemetry),
                workers: Arc::new(Semaphore::new(engine.max_workers.max(1))),
                engine,
                hosts: RwLock::new(BTreeMap::new()),
                locks: SerializationLocks::new(),
                shutdown_tx,
                shut_down: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }

    pub fn telemetry(&self) -> &Arc<TelemetryStore> {
        self.inner.orchestrator.telemetry()
    }

    /// Register a host, replacing (and cancelling) any previous entry. A
    /// replaced host keeps its run lock, so the new entry waits for the
    /// cancelled run to finish.
    pub fn add_host(&self, config: HostConfiguration) {
        let hostname = config.hostname.clone();
        let mut slot = HostSlot::new(config);

        let previous = {
            let mut hosts = self.inner.hosts.write();
            if let Some(previous) = hosts.get(&hostname) {
                slot.running = previous.running.clone();
            }
            hosts.insert(hostname.clone(), slot)
        };
        if let Some(previous) = previous {
            let _ = previous.cancel_tx.send(true);
            log::info!("Hostname {} - Replaced, previous run cancelled", hostname);
        } else {
            log::info!("Hostname {} - Registered", hostname);
        }
    }

    /// Unregister a host and cancel its run in flight.
    pub fn remove_host(&self, hostname: &str) -> bool {
        let removed = self.inner.hosts.write().remove(hostname);
        match removed {
            Some(slot) => {
                let _ = slot.cancel_tx.send(true);
                self.inner.locks.remove(hostname);
                log::info!("Hostname {} - Removed, run in flight cancelled", hostname);
                true
            }
            None => false,
        }
    }

    pub fn hostnames(&self) -> Vec<String> {
        self.inner.hosts.read().keys().cloned().collect()
    }

    /// Run every registered host once. Hosts whose previous run is still in
    /// progress are skipped.
    pub async fn run_cycle(&self) -> Vec<HostRunReport> {
        if self.is_shut_down() {
            return Vec::new();
        }

        let slots: Vec<_> = self
            .inner
            .hosts
            .read()
            .values()
            .map(|slot| {
                (
                    slot.config.clone(),
                    slot.running.clone(),
                    slot.cancellation.clone(),
                )
            })
            .collect();

        let handles: Vec<JoinHandle<Option<HostRunReport>>> = slots
            .into_iter()
            .map(|(config, running, cancellation)| {
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    let _running = match running.try_lock_owned() {
                        Ok(guard) => guard,
                        Err(_) => {
                            log::info!(
                                "Hostname {} - Previous run still in progress, skipping this cycle",
                                config.hostname
                            );
                            return None;
                        }
                    };
                    let _permit = inner.workers.clone().acquire_owned().await.ok()?;

                    let host = HostContext::new(
                        config.clone(),
                        inner.engine.clone(),
                        cancellation,
                        inner.locks.for_host(&config.hostname),
                    );
                    Some(inner.orchestrator.run_host(&host).await)
                })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(report) => report,
                Err(e) => {
                    log::error!("Host run task failed: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Run cycles every `period` until shutdown.
    pub fn spawn_periodic(&self, period: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        let mut shutdown = self.inner.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let cycle = scheduler.clone();
                        // A cycle runs detached so a slow host does not delay the next tick.
                        tokio::spawn(async move {
                            let reports = cycle.run_cycle().await;
                            log::debug!("Cycle finished for {} hosts", reports.len());
                        });
                    }
                    _ = shutdown.recv() => {
                        log::info!("Scheduler shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Spawn cycles at the configured engine interval.
    pub fn start(&self) -> JoinHandle<()> {
        self.spawn_periodic(self.inner.engine.cycle_interval())
    }

    /// Stop periodic cycles and cancel every run in flight.
    pub fn shutdown(&self) {
        self.inner
            .shut_down
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let _ = self.inner.shutdown_tx.send(());
        for slot in self.inner.hosts.read().values() {
            let _ = slot.cancel_tx.send(true);
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner
            .shut_down
            .load(std::sync::atomic::Ordering::SeqCst)
    }
}
