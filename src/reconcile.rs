//! Reconcile Loop (C8): the single driver that dequeues mutations, applies
//! them to the store, recomputes label-resolved edges, and advances every
//! eligible want one step per tick.
//!
//! Structured like the teacher's `AgentDaemon::run` (`agent/daemon.rs`): a
//! `tokio::time::interval` drives a `tokio::select!` loop, except here
//! there is exactly one ticking branch plus a shutdown branch, since spec
//! §4.8 mandates a single driver thread rather than many independent
//! per-concern timers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use uuid::Uuid;

use crate::background::BackgroundHost;
use crate::error::ConfigError;
use crate::mutation::{Mutation, MutationKind, MutationQueue, MutationReply, MutationSender};
use crate::owner::{OwnerCompletionEvent, OwnerCompletionSubscription};
use crate::pubsub::PubSub;
use crate::registry::AgentRegistry;
use crate::resolver::{self, ResolvedEdges};
use crate::scheduler::{parse_schedule, ScheduleState};
use crate::store::WantStore;
use crate::want::{ProgressError, Status, Want, WantBehavior, WantContext};

/// Default tick interval (spec §4.8: "configurable, default 100 ms").
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);
/// Default cap on mutations drained per tick (spec §4.8 step 1).
pub const DEFAULT_MUTATION_BATCH: usize = 256;

/// Maps a want's declared `type` (or `recipe`) to its behavior
/// implementation (spec §9's "registry of wantType -> factory"). Held as a
/// plain concurrent map rather than a factory-of-factories since `locals`
/// already gives each want instance its own private state.
pub struct WantTypeRegistry {
    behaviors: DashMap<String, Arc<dyn WantBehavior>>,
}

impl WantTypeRegistry {
    pub fn new() -> Self {
        Self { behaviors: DashMap::new() }
    }

    pub fn register(&self, want_type: impl Into<String>, behavior: Arc<dyn WantBehavior>) {
        self.behaviors.insert(want_type.into(), behavior);
    }

    pub fn get(&self, want_type: &str) -> Option<Arc<dyn WantBehavior>> {
        self.behaviors.get(want_type).map(|r| Arc::clone(r.value()))
    }
}

impl Default for WantTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters named in spec.md, kept as plain `AtomicU64`s rather than wired
/// to an external metrics system (ambient, not a distributed-observability
/// feature the Non-goals exclude).
#[derive(Default)]
pub struct ReconcileCounters {
    pub agent_execution_error: AtomicU64,
    pub connectivity_warning: AtomicU64,
}

pub struct ReconcileLoop {
    store: Arc<WantStore>,
    pubsub: Arc<PubSub>,
    agents: Arc<AgentRegistry>,
    want_types: Arc<WantTypeRegistry>,
    mutation_queue: tokio::sync::Mutex<MutationQueue>,
    self_sender: MutationSender,
    backgrounds: DashMap<Uuid, Arc<BackgroundHost>>,
    owner_subscriptions: DashMap<Uuid, Arc<OwnerCompletionSubscription>>,
    schedules: DashMap<Uuid, Vec<ScheduleState>>,
    previous_edges: tokio::sync::Mutex<HashMap<Uuid, ResolvedEdges>>,
    owner_bus_tx: tokio::sync::broadcast::Sender<OwnerCompletionEvent>,
    tick_interval: Duration,
    mutation_batch: usize,
    pub counters: ReconcileCounters,
}

impl ReconcileLoop {
    pub fn new(
        store: Arc<WantStore>,
        pubsub: Arc<PubSub>,
        agents: Arc<AgentRegistry>,
        want_types: Arc<WantTypeRegistry>,
        mutation_queue: MutationQueue,
        owner_bus_tx: tokio::sync::broadcast::Sender<OwnerCompletionEvent>,
    ) -> Self {
        let self_sender = mutation_queue.sender();
        Self {
            store,
            pubsub,
            agents,
            want_types,
            mutation_queue: tokio::sync::Mutex::new(mutation_queue),
            self_sender,
            backgrounds: DashMap::new(),
            owner_subscriptions: DashMap::new(),
            schedules: DashMap::new(),
            previous_edges: tokio::sync::Mutex::new(HashMap::new()),
            owner_bus_tx,
            tick_interval: DEFAULT_TICK_INTERVAL,
            mutation_batch: DEFAULT_MUTATION_BATCH,
            counters: ReconcileCounters::default(),
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    pub fn pubsub(&self) -> &Arc<PubSub> {
        &self.pubsub
    }

    pub fn store(&self) -> &Arc<WantStore> {
        &self.store
    }

    /// Runs until `shutdown` reports `true`. Engine shutdown is a
    /// cancellation edge for every background agent, handled here by
    /// draining and cancelling every `BackgroundHost` before returning.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let span = tracing::info_span!("reconcile_tick");
                    let _enter = span.enter();
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        for entry in self.backgrounds.iter() {
            entry.value().stop_all_background_agents().await;
        }
    }

    /// One full reconcile iteration (spec §4.8 steps 1-5). Exposed so tests
    /// and the CLI's `--once` mode can drive it without a background task.
    pub async fn tick(&self) {
        let mut structural_change = false;

        let mut queue = self.mutation_queue.lock().await;
        let batch = queue.try_drain_batch(self.mutation_batch);
        drop(queue);

        for mutation in batch {
            let changed = self.apply_mutation(mutation).await;
            structural_change |= changed;
        }

        if structural_change {
            self.recompute_edges().await;
        }

        self.progress_eligible_wants().await;
        self.evaluate_achievement_and_failure().await;
    }

    async fn apply_mutation(&self, mutation: Mutation) -> bool {
        let correlation_id = mutation.correlation_id;
        let mut structural = false;
        let reply = match mutation.kind {
            MutationKind::Create(configs) => {
                let mut ids = Vec::with_capacity(configs.len());
                let mut error = None;
                for config in configs {
                    match config.into_want() {
                        Ok(want) => match self.store.insert(want) {
                            Ok(id) => {
                                structural = true;
                                ids.push(id);
                                self.initialize_want(id).await;
                                self.install_schedules(id).await;
                            }
                            Err(e) => {
                                error = Some(crate::error::MutationError::Store(e));
                                break;
                            }
                        },
                        Err(e) => {
                            error = Some(crate::error::MutationError::Config(e));
                            break;
                        }
                    }
                }
                match error {
                    Some(e) => Err(e),
                    None => Ok(MutationReply::Created { correlation_id, ids }),
                }
            }
            MutationKind::Update { id, config } => match self.store.get(id) {
                Some(record) => {
                    let mut guard = record.want.lock().await;
                    guard.spec = config.spec;
                    guard.metadata.labels = config.labels;
                    guard.metadata.updated_at = chrono::Utc::now();
                    structural = true;
                    Ok(MutationReply::Updated { correlation_id, id })
                }
                None => Err(crate::error::MutationError::Store(crate::error::StoreError::NotFound { id: id.to_string() })),
            },
            MutationKind::Delete(ids) => {
                for id in ids {
                    self.delete_want(id).await;
                    structural = true;
                }
                Ok(MutationReply::Accepted { correlation_id })
            }
            MutationKind::Suspend(ids) => {
                self.transition_many(&ids, Status::Suspended).await;
                Ok(MutationReply::Accepted { correlation_id })
            }
            MutationKind::Resume(ids) => {
                self.transition_many(&ids, Status::Reaching).await;
                Ok(MutationReply::Accepted { correlation_id })
            }
            MutationKind::Stop(ids) => {
                self.transition_many(&ids, Status::Stopped).await;
                Ok(MutationReply::Accepted { correlation_id })
            }
            MutationKind::Start(ids) => {
                self.transition_many(&ids, Status::Reaching).await;
                Ok(MutationReply::Accepted { correlation_id })
            }
        };
        let _ = mutation.reply.send(reply);
        structural
    }

    async fn initialize_want(&self, id: Uuid) {
        let Some(record) = self.store.get(id) else { return };
        let mut guard = record.want.lock().await;
        let behavior = self.want_types.get(&guard.metadata.want_type);
        match behavior {
            Some(behavior) => {
                let mut ctx = WantContext::new(&mut guard).with_agents(&self.agents).with_store(&self.store);
                match behavior.initialize(&mut ctx) {
                    Ok(()) => guard.status = Status::Idle,
                    Err(message) => {
                        guard.status = Status::Failed;
                        guard.store_state("error", serde_json::Value::from(message));
                    }
                }
            }
            None => {
                let err = ConfigError::UnknownType { want_type: guard.metadata.want_type.clone() };
                guard.status = Status::Failed;
                guard.store_state("error", serde_json::Value::from(err.to_string()));
            }
        }
    }

    async fn install_schedules(&self, id: Uuid) {
        let Some(record) = self.store.get(id) else { return };
        let guard = record.want.lock().await;
        if guard.spec.when.is_empty() {
            return;
        }
        let mut states = Vec::with_capacity(guard.spec.when.len());
        for entry in &guard.spec.when {
            if let Ok(schedule) = parse_schedule(entry, guard.metadata.created_at) {
                states.push(ScheduleState::new(schedule));
            }
        }
        drop(guard);
        self.schedules.insert(id, states);
    }

    async fn transition_many(&self, ids: &[Uuid], target: Status) {
        for id in ids {
            if let Some(record) = self.store.get(*id) {
                let mut guard = record.want.lock().await;
                if guard.status.can_transition_to(target) {
                    guard.status = target;
                }
            }
        }
    }

    async fn delete_want(&self, id: Uuid) {
        let Some(record) = self.store.get(id) else { return };
        {
            let mut guard = record.want.lock().await;
            guard.status = Status::Deleting;
            if let Some(behavior) = self.want_types.get(&guard.metadata.want_type) {
                let mut ctx = WantContext::new(&mut guard).with_store(&self.store);
                behavior.on_delete(&mut ctx);
            }
        }
        if let Some((_, host)) = self.backgrounds.remove(&id) {
            host.stop_all_background_agents().await;
        }
        self.owner_subscriptions.remove(&id);
        let mut previous = self.previous_edges.lock().await;
        if let Some(edges) = previous.remove(&id) {
            for producer in edges.inputs {
                let _ = self.pubsub.unsubscribe(&producer.to_string(), &id.to_string());
            }
        }
        drop(previous);
        self.schedules.remove(&id);
        self.store.remove(id);
    }

    async fn recompute_edges(&self) {
        let snapshot = self.store.snapshot().await;
        let current = resolver::resolve(&snapshot);

        let mut previous = self.previous_edges.lock().await;
        let diff = resolver::diff_inputs(&previous, &current);

        for (producer, consumer) in diff.to_subscribe {
            self.pubsub.subscribe(&producer.to_string(), &consumer.to_string());
        }
        for (producer, consumer) in diff.to_unsubscribe {
            let _ = self.pubsub.unsubscribe(&producer.to_string(), &consumer.to_string());
        }

        for snap in &snapshot {
            if snap.using.iter().any(|s| !s.is_empty()) && current[&snap.id].inputs.is_empty() {
                self.counters.connectivity_warning.fetch_add(1, Ordering::Relaxed);
            }
        }

        for (id, edges) in &current {
            if let Some(record) = self.store.get(*id) {
                let mut guard = record.want.lock().await;
                guard.inputs = edges.inputs.clone();
                guard.outputs = edges.outputs.clone();
            }
        }

        *previous = current;
    }

    async fn progress_eligible_wants(&self) {
        let snapshot = self.store.snapshot().await;
        let now = chrono::Utc::now();

        for snap in snapshot {
            if !snap.status.is_progressable() {
                continue;
            }
            let due = match self.schedules.get_mut(&snap.id) {
                Some(mut states) => states.iter_mut().any(|s| s.is_due(now)),
                None => true,
            };
            if !due {
                continue;
            }

            let Some(record) = self.store.get(snap.id) else { continue };
            let mut guard = record.want.lock().await;
            let Some(behavior) = self.want_types.get(&guard.metadata.want_type) else { continue };

            if guard.status == Status::Idle {
                guard.status = Status::Reaching;
            }

            let background = Arc::clone(self.backgrounds.entry(snap.id).or_insert_with(|| Arc::new(BackgroundHost::new(snap.id))).value());
            let owner_completions = Arc::clone(
                self.owner_subscriptions
                    .entry(snap.id)
                    .or_insert_with(|| Arc::new(OwnerCompletionSubscription::new(self.owner_bus_tx.subscribe())))
                    .value(),
            );
            let mut ctx = WantContext::new(&mut guard)
                .with_agents(&self.agents)
                .with_background(&background)
                .with_pubsub(&self.pubsub)
                .with_mutations(&self.self_sender)
                .with_store(&self.store)
                .with_owner_completions(&owner_completions);
            match behavior.progress(&mut ctx) {
                Ok(()) => {}
                Err(ProgressError::Transient(message)) => {
                    guard.store_log(format!("progress error: {message}"));
                    self.counters.agent_execution_error.fetch_add(1, Ordering::Relaxed);
                }
                Err(ProgressError::Fatal(module_error)) => {
                    guard.store_log(format!("progress error: {module_error}"));
                    guard.store_state("error", serde_json::Value::from(module_error.to_string()));
                    guard.status = Status::Failed;
                }
            }
        }
    }

    async fn evaluate_achievement_and_failure(&self) {
        let ids = self.store.all_ids();
        for id in ids {
            let Some(record) = self.store.get(id) else { continue };
            let mut guard = record.want.lock().await;
            if guard.status.is_terminal() {
                continue;
            }
            let Some(behavior) = self.want_types.get(&guard.metadata.want_type) else { continue };

            let pct = {
                let ctx = WantContext::new(&mut guard).with_store(&self.store);
                behavior.calculate_achieving_percentage(&ctx)
            };
            guard.set_achieving_percentage(pct);

            let achieved = {
                let ctx = WantContext::new(&mut guard).with_store(&self.store);
                behavior.is_achieved(&ctx)
            };
            if achieved {
                guard.status = Status::Achieved;
                guard.set_achieving_percentage(100.0);
                self.pubsub.publish(&id.to_string(), serde_json::Value::Null, true);
                for owner in &guard.metadata.owner_references {
                    let _ = self.owner_bus_tx.send(OwnerCompletionEvent {
                        owner_id: owner.id,
                        child_name: guard.metadata.name.clone(),
                        achieved: true,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{MutationSender, WantConfig};
    use crate::want::Spec;

    struct AlwaysAchieves;
    impl WantBehavior for AlwaysAchieves {
        fn initialize(&self, _ctx: &mut WantContext) -> Result<(), String> {
            Ok(())
        }
        fn progress(&self, ctx: &mut WantContext) -> Result<(), ProgressError> {
            ctx.want.store_state("touched", serde_json::Value::Bool(true));
            Ok(())
        }
        fn is_achieved(&self, _ctx: &WantContext) -> bool {
            true
        }
    }

    fn build_loop() -> (Arc<ReconcileLoop>, MutationSender) {
        let store = Arc::new(WantStore::new());
        let pubsub = Arc::new(PubSub::new());
        let agents = Arc::new(AgentRegistry::new());
        let types = Arc::new(WantTypeRegistry::new());
        types.register("probe", Arc::new(AlwaysAchieves));
        let queue = MutationQueue::new();
        let sender = queue.sender();
        let (owner_tx, _owner_rx) = crate::owner::owner_completion_bus(16);
        let reconcile = Arc::new(
            ReconcileLoop::new(store, pubsub, agents, types, queue, owner_tx)
                .with_tick_interval(Duration::from_millis(10)),
        );
        (reconcile, sender)
    }

    #[tokio::test]
    async fn create_then_tick_initializes_and_achieves() {
        let (reconcile, sender) = build_loop();
        let config = WantConfig {
            name: "g".into(),
            want_type: Some("probe".into()),
            id: None,
            labels: Default::default(),
            owner_references: Vec::new(),
            spec: Spec::default(),
        };
        let reply_fut = tokio::spawn({
            let sender = sender.clone();
            async move { sender.submit(MutationKind::Create(vec![config])).await }
        });
        reconcile.tick().await;
        let reply = reply_fut.await.unwrap().unwrap();
        let MutationReply::Created { ids, .. } = reply else { panic!("expected Created") };
        let id = ids[0];

        reconcile.tick().await;

        let record = reconcile.store().get(id).unwrap();
        let guard = record.want.lock().await;
        assert_eq!(guard.status, Status::Achieved);
        assert_eq!(guard.achieving_percentage(), 100.0);
    }

    #[tokio::test]
    async fn unknown_type_fails_fast() {
        let (reconcile, sender) = build_loop();
        let config = WantConfig {
            name: "g".into(),
            want_type: Some("nonexistent".into()),
            id: None,
            labels: Default::default(),
            owner_references: Vec::new(),
            spec: Spec::default(),
        };
        let reply_fut = tokio::spawn({
            let sender = sender.clone();
            async move { sender.submit(MutationKind::Create(vec![config])).await }
        });
        reconcile.tick().await;
        let reply = reply_fut.await.unwrap().unwrap();
        let MutationReply::Created { ids, .. } = reply else { panic!("expected Created") };
        let record = reconcile.store().get(ids[0]).unwrap();
        let guard = record.want.lock().await;
        assert_eq!(guard.status, Status::Failed);
    }
}
