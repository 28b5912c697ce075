//! Watch dispatcher: keeps the device set synchronized with the store.
//!
//! One watch on the bus root, one event-loop task consuming events in
//! delivery order. Each event triggers a re-probe scoped to the changed
//! path; devices that disappear from the namespace are reported gone.

use crate::config::BusConfig;
use crate::device::DeviceModel;
use crate::diag::{self, DiagConfig};
use crate::error::{ProbeError, Result};
use crate::probe::{ProbePass, Prober};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, watch as watch_ch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use xenbus_store::{Store, StoreError, WatchEvent};

/// Token identifying this bus's watch registration; stable for the process
/// lifetime.
pub const WATCH_TOKEN: &str = "xenbus-backend";

/// How the dispatcher comes up.
pub enum Startup {
    /// Probe and watch immediately.
    Direct,
    /// Wait until the store signals readiness, then probe and watch.
    OnReady(watch_ch::Receiver<bool>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchState {
    Unregistered,
    Registered,
}

struct Core {
    store: Arc<dyn Store>,
    model: Arc<dyn DeviceModel>,
    prober: Prober,
    config: BusConfig,
    diag: DiagConfig,
    /// Nodenames with a live registration, for removal diffing.
    known: Mutex<HashSet<String>>,
}

impl Core {
    async fn full_pass(&self) {
        let pass = self.prober.probe_all().await;
        self.apply(None, pass).await;
    }

    /// Fold a pass into the known set. Known nodes under `prefix` (or
    /// anywhere, for a full pass) that were not seen again are candidates
    /// for removal; a device is only reported gone once its store node is
    /// confirmed absent, so a pass aborted by a sibling error never drops
    /// live devices.
    async fn apply(&self, prefix: Option<&str>, pass: ProbePass) {
        let candidates: Vec<String> = {
            let known = self.known.lock().await;
            known
                .iter()
                .filter(|n| {
                    prefix.is_none_or(|p| n.strip_prefix(p).is_some_and(|r| r.starts_with('/')))
                })
                .filter(|n| !pass.seen.contains(*n))
                .cloned()
                .collect()
        };
        let mut gone = Vec::new();
        for nodename in candidates {
            if !self.store.exists(&nodename).await {
                gone.push(nodename);
            }
        }
        {
            let mut known = self.known.lock().await;
            for nodename in &gone {
                known.remove(nodename);
            }
            known.extend(pass.seen.iter().cloned());
        }
        for nodename in gone {
            self.model.device_gone(&nodename).await;
        }
        diag::publish(self.store.as_ref(), &self.diag, &pass).await;
    }

    async fn handle_event(&self, event: WatchEvent) {
        if event.token != WATCH_TOKEN {
            debug!(token = %event.token, "event for foreign token");
            return;
        }
        let Some(segments) = self.config.strip_root(&event.path) else {
            debug!(path = %event.path, "event outside bus subtree");
            return;
        };
        debug!(path = %event.path, "bus subtree changed");

        match segments.len() {
            0 => self.full_pass().await,
            1 => {
                let devicetype = segments[0];
                let mut pass = ProbePass::default();
                self.prober.probe_type(devicetype, &mut pass).await;
                self.apply(Some(&self.config.type_dir(devicetype)), pass).await;
            }
            2 => {
                let (devicetype, domid) = (segments[0], segments[1]);
                let dir = format!("{}/{}", self.config.type_dir(devicetype), domid);
                let mut pass = ProbePass::default();
                match self.prober.probe_domain(devicetype, domid, &mut pass).await {
                    Ok(_) => {}
                    // The whole domain directory going away is a removal,
                    // handled by the diff below.
                    Err(ProbeError::Store(StoreError::NotFound(_))) => {
                        debug!(dir = %dir, "domain directory gone")
                    }
                    Err(e) if e.is_data_error() => {
                        debug!(dir = %dir, error = %e, "skipping inconsistent node")
                    }
                    Err(e) => warn!(dir = %dir, error = %e, "domain re-probe failed"),
                }
                self.apply(Some(&dir), pass).await;
            }
            _ => {
                // A change below the node (a child key) maps to the node.
                let nodename = format!(
                    "{}/{}/{}/{}",
                    self.config.root, segments[0], segments[1], segments[2]
                );
                self.node_changed(&nodename).await;
            }
        }
    }

    async fn node_changed(&self, nodename: &str) {
        if self.store.exists(nodename).await {
            let mut pass = ProbePass::default();
            match self.prober.probe_node(nodename, &mut pass).await {
                Ok(()) => {
                    self.known.lock().await.insert(nodename.to_string());
                }
                Err(e) if e.is_data_error() => {
                    debug!(nodename = %nodename, error = %e, "node not resolvable yet")
                }
                Err(e) => warn!(nodename = %nodename, error = %e, "node re-probe failed"),
            }
        } else {
            // Already gone by the time the event is processed: a removal,
            // not an error.
            let was_known = self.known.lock().await.remove(nodename);
            if was_known {
                self.model.device_gone(nodename).await;
            } else {
                debug!(nodename = %nodename, "removal for unknown node");
            }
        }
    }
}

/// Owns the watch registration and the event-loop task.
pub struct BusDispatcher {
    core: Arc<Core>,
    startup: Option<Startup>,
    state: DispatchState,
    shutdown: Option<watch_ch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl BusDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        model: Arc<dyn DeviceModel>,
        config: BusConfig,
        diag: DiagConfig,
        startup: Startup,
    ) -> Self {
        let prober = Prober::new(Arc::clone(&store), Arc::clone(&model), config.clone());
        BusDispatcher {
            core: Arc::new(Core {
                store,
                model,
                prober,
                config,
                diag,
                known: Mutex::new(HashSet::new()),
            }),
            startup: Some(startup),
            state: DispatchState::Unregistered,
            shutdown: None,
            task: None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.state == DispatchState::Registered
    }

    /// Register the watch, run the initial full probe pass (events only
    /// report future changes) and start the event loop.
    pub async fn start(&mut self) -> Result<()> {
        if self.state == DispatchState::Registered {
            warn!("dispatcher already started");
            return Ok(());
        }

        if let Some(Startup::OnReady(mut ready)) = self.startup.take() {
            info!("waiting for store readiness");
            while !*ready.borrow_and_update() {
                if ready.changed().await.is_err() {
                    return Err(ProbeError::Store(StoreError::Closed));
                }
            }
        }

        self.core
            .store
            .watch(&self.core.config.root, WATCH_TOKEN)
            .await?;
        info!(root = %self.core.config.root, "watching bus subtree");
        self.core.full_pass().await;

        let (shutdown_tx, mut shutdown_rx) = watch_ch::channel(false);
        let core = Arc::clone(&self.core);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    event = core.store.next_event() => match event {
                        Ok(event) => core.handle_event(event).await,
                        Err(StoreError::Closed) => {
                            info!("store event stream closed");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "watch delivery failed");
                            break;
                        }
                    },
                }
            }
        });

        self.shutdown = Some(shutdown_tx);
        self.task = Some(task);
        self.state = DispatchState::Registered;
        Ok(())
    }

    /// Deregister the watch and wind down the event loop. An in-flight
    /// probe pass completes; no new pass starts afterwards. Safe to call
    /// more than once.
    pub async fn stop(&mut self) {
        if self.state != DispatchState::Registered {
            return;
        }
        if let Err(e) = self
            .core
            .store
            .unwatch(&self.core.config.root, WATCH_TOKEN)
            .await
        {
            warn!(error = %e, "deregistering watch failed");
        }
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.state = DispatchState::Unregistered;
        info!("dispatcher stopped");
    }
}
