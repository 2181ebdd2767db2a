//! Engine facade: top-level API for the want reconciliation engine.
//!
//! Owns the want store, pub/sub bus, agent registry, want-type registry and
//! mutation queue; spawns the reconcile loop and the persistence daemon as
//! background tasks and exposes the mutation RPC surface as plain async
//! methods, the way the teacher's `Engine` owned its subsystems and exposed
//! a flat method surface rather than a trait object per subsystem.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{EngineError, MutationError};
use crate::mutation::{MutationKind, MutationQueue, MutationReply, MutationSender, WantConfig};
use crate::owner::{owner_completion_bus, OwnerCompletionEvent};
use crate::persistence::{load_snapshot, PersistenceDaemon};
use crate::pubsub::PubSub;
use crate::reconcile::{ReconcileLoop, WantTypeRegistry};
use crate::registry::{Agent, AgentError, AgentRegistry};
use crate::store::{WantFilter, WantSnapshot, WantStore};
use crate::want::{Want, WantBehavior};

/// Configuration for the want reconciliation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Where the periodic memory-file snapshot is written. `None` disables
    /// persistence entirely (in-memory only, useful for tests).
    pub memory_file: Option<PathBuf>,
    /// How often the persistence daemon writes a snapshot.
    pub persistence_interval: Duration,
    /// How often the reconcile loop ticks.
    pub tick_interval: Duration,
    /// Per-consumer pub/sub queue depth before drop-oldest kicks in.
    pub pubsub_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_file: None,
            persistence_interval: Duration::from_secs(5),
            tick_interval: crate::reconcile::DEFAULT_TICK_INTERVAL,
            pubsub_queue_capacity: crate::pubsub::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// `getWant` view options (spec §6.2).
#[derive(Debug, Clone)]
pub struct GetWantOptions {
    pub group_by: Option<String>,
    pub include_connectivity: bool,
}

impl Default for GetWantOptions {
    fn default() -> Self {
        Self { group_by: None, include_connectivity: true }
    }
}

/// `getWant` result: the want plus the group label `groupBy` resolved to,
/// if any.
#[derive(Debug, Clone)]
pub struct GetWantResult {
    pub want: Want,
    pub group: Option<String>,
}

/// The want reconciliation engine. Construct with [`Engine::start`], which
/// loads any existing memory file and spawns the reconcile loop and
/// persistence daemon; submit mutations through the returned handle.
pub struct Engine {
    config: EngineConfig,
    store: Arc<WantStore>,
    pubsub: Arc<PubSub>,
    agents: Arc<AgentRegistry>,
    want_types: Arc<WantTypeRegistry>,
    mutation_sender: MutationSender,
    owner_bus_tx: broadcast::Sender<OwnerCompletionEvent>,
    reconcile: Arc<ReconcileLoop>,
    reconcile_shutdown: tokio::sync::watch::Sender<bool>,
    reconcile_handle: JoinHandle<()>,
    persistence_handle: Option<JoinHandle<()>>,
    persistence_shutdown: Option<tokio::sync::watch::Sender<bool>>,
}

impl Engine {
    /// Loads the configured memory file (if any), then spawns the reconcile
    /// loop and, if a `memory_file` is set, the persistence daemon.
    pub async fn start(config: EngineConfig, want_types: WantTypeRegistry) -> Result<Self, EngineError> {
        let store = Arc::new(WantStore::new());

        if let Some(path) = &config.memory_file {
            let wants = load_snapshot(path).await?;
            for want in wants {
                // Loaded wants may violate the in-memory name-uniqueness
                // invariant if the file was hand-edited; a duplicate is
                // logged and skipped rather than aborting startup.
                if let Err(e) = store.insert(want) {
                    tracing::warn!(error = %e, "skipping want from memory file");
                }
            }
        }

        let pubsub = Arc::new(PubSub::with_capacity(config.pubsub_queue_capacity));
        let agents = Arc::new(AgentRegistry::new());
        let want_types = Arc::new(want_types);
        let mutation_queue = MutationQueue::new();
        let mutation_sender = mutation_queue.sender();
        let (owner_bus_tx, _owner_bus_rx) = owner_completion_bus(256);

        let reconcile = Arc::new(ReconcileLoop::new(
            Arc::clone(&store),
            Arc::clone(&pubsub),
            Arc::clone(&agents),
            Arc::clone(&want_types),
            mutation_queue,
            owner_bus_tx.clone(),
        ).with_tick_interval(config.tick_interval));

        let (reconcile_shutdown, shutdown_rx) = tokio::sync::watch::channel(false);
        let reconcile_handle = {
            let reconcile = Arc::clone(&reconcile);
            tokio::spawn(async move { reconcile.run(shutdown_rx).await })
        };

        let (persistence_handle, persistence_shutdown) = if let Some(path) = config.memory_file.clone() {
            let (tx, rx) = tokio::sync::watch::channel(false);
            let daemon = PersistenceDaemon::new(path, config.persistence_interval);
            let store_for_snapshot = Arc::clone(&store);
            let handle = tokio::spawn(async move {
                daemon
                    .run(
                        move || {
                            let store = Arc::clone(&store_for_snapshot);
                            async move { snapshot_wants(&store).await }
                        },
                        rx,
                    )
                    .await
            });
            (Some(handle), Some(tx))
        } else {
            (None, None)
        };

        Ok(Self {
            config,
            store,
            pubsub,
            agents,
            want_types,
            mutation_sender,
            owner_bus_tx,
            reconcile,
            reconcile_shutdown,
            reconcile_handle,
            persistence_handle,
            persistence_shutdown,
        })
    }

    pub fn register_want_type(&self, want_type: impl Into<String>, behavior: Arc<dyn WantBehavior>) {
        self.want_types.register(want_type, behavior);
    }

    pub fn register_agent(&self, agent: Agent) -> Result<(), AgentError> {
        self.agents.register_agent(agent)
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    pub fn pubsub(&self) -> &Arc<PubSub> {
        &self.pubsub
    }

    pub fn subscribe_to_owner_completions(&self) -> broadcast::Receiver<OwnerCompletionEvent> {
        self.owner_bus_tx.subscribe()
    }

    /// The raw mutation-queue handle (spec §6.2). The convenience methods
    /// below unwrap `MutationReply` into its payload for ergonomics; a
    /// caller that needs the correlation ID itself (e.g. to echo it in a
    /// log line or an RPC response header) submits through this handle
    /// directly and reads `MutationReply::correlation_id()`.
    pub fn mutation_sender(&self) -> &MutationSender {
        &self.mutation_sender
    }

    // --- mutation RPC surface ------------------------------------------------

    pub async fn create_wants(&self, configs: Vec<WantConfig>) -> Result<Vec<Uuid>, MutationError> {
        match self.mutation_sender.submit(MutationKind::Create(configs)).await? {
            MutationReply::Created { ids, .. } => Ok(ids),
            _ => unreachable!("Create mutation always replies with MutationReply::Created"),
        }
    }

    pub async fn update_want(&self, id: Uuid, config: WantConfig) -> Result<Uuid, MutationError> {
        match self.mutation_sender.submit(MutationKind::Update { id, config }).await? {
            MutationReply::Updated { id, .. } => Ok(id),
            _ => unreachable!("Update mutation always replies with MutationReply::Updated"),
        }
    }

    pub async fn delete_wants(&self, ids: Vec<Uuid>) -> Result<(), MutationError> {
        self.mutation_sender.submit(MutationKind::Delete(ids)).await?;
        Ok(())
    }

    pub async fn delete_want(&self, id: Uuid) -> Result<(), MutationError> {
        self.delete_wants(vec![id]).await
    }

    pub async fn suspend_wants(&self, ids: Vec<Uuid>) -> Result<(), MutationError> {
        self.mutation_sender.submit(MutationKind::Suspend(ids)).await?;
        Ok(())
    }

    pub async fn resume_wants(&self, ids: Vec<Uuid>) -> Result<(), MutationError> {
        self.mutation_sender.submit(MutationKind::Resume(ids)).await?;
        Ok(())
    }

    pub async fn stop_wants(&self, ids: Vec<Uuid>) -> Result<(), MutationError> {
        self.mutation_sender.submit(MutationKind::Stop(ids)).await?;
        Ok(())
    }

    pub async fn start_wants(&self, ids: Vec<Uuid>) -> Result<(), MutationError> {
        self.mutation_sender.submit(MutationKind::Start(ids)).await?;
        Ok(())
    }

    pub fn get_want_snapshot_sync(&self, id: Uuid) -> Option<Arc<crate::store::WantRecord>> {
        self.store.get(id)
    }

    pub async fn get_want(&self, id: Uuid) -> Option<Want> {
        let record = self.store.get(id)?;
        Some(record.want.lock().await.clone())
    }

    /// `getWant(id, opts)` (spec §6.2): `includeConnectivity` controls
    /// whether the returned `Want`'s resolved `inputs`/`outputs` are
    /// populated or cleared, and `groupBy` looks up a label on the want to
    /// report as its group, for callers presenting wants grouped by some
    /// label (e.g. a UI grouping by `team` or `environment`).
    pub async fn get_want_with_opts(&self, id: Uuid, opts: GetWantOptions) -> Option<GetWantResult> {
        let mut want = self.get_want(id).await?;
        if !opts.include_connectivity {
            want.inputs.clear();
            want.outputs.clear();
        }
        let group = opts.group_by.as_ref().and_then(|key| want.metadata.labels.get(key).cloned());
        Some(GetWantResult { want, group })
    }

    pub async fn list_wants(&self) -> Vec<WantSnapshot> {
        self.store.snapshot().await
    }

    /// `listWants(filter)` (spec §6.2): narrows by want type, a single
    /// `label k=v`, and whether system-owned wants are included.
    pub async fn list_wants_filtered(&self, filter: &WantFilter) -> Vec<WantSnapshot> {
        self.store.snapshot_filtered(filter).await
    }

    pub async fn run_tick_now(&self) {
        self.reconcile.tick().await;
    }

    /// Runs a single reconcile tick synchronously from a non-async caller,
    /// bridging via `block_on` the way the teacher's CLI bridges to its
    /// optional tokio-based server.
    pub fn run_tick_now_blocking(&self, handle: &tokio::runtime::Handle) {
        handle.block_on(self.run_tick_now());
    }

    /// Stops the reconcile loop and persistence daemon, cancelling every
    /// background agent along the way (see `ReconcileLoop::run`).
    pub async fn shutdown(self) {
        let _ = self.reconcile_shutdown.send(true);
        let _ = self.reconcile_handle.await;
        if let Some(tx) = self.persistence_shutdown {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.persistence_handle {
            let _ = handle.await;
        }
        if let Some(path) = self.config.memory_file {
            let wants = snapshot_wants(&self.store).await;
            if let Err(e) = crate::persistence::save_snapshot(&path, wants).await {
                tracing::warn!(error = %e, "final snapshot on shutdown failed");
            }
        }
    }
}

async fn snapshot_wants(store: &WantStore) -> Vec<Want> {
    let mut out = Vec::new();
    for id in store.all_ids() {
        if let Some(record) = store.get(id) {
            out.push(record.want.lock().await.clone());
        }
    }
    out
}
