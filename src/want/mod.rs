//! The `Want` data model (spec §3) and the `Want` behavior trait (spec §9).
//!
//! A want is a plain data record — metadata, spec, status, state, history —
//! plus an opaque `locals` blob owned by its type implementation. The core
//! never interprets `locals`; it is a capability set, not an inheritance
//! hierarchy, so `dyn WantBehavior` is the only place type-specific code runs.

pub mod status;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use status::Status;

/// A label selector: matches a want `W` iff every `(k, v)` pair is present
/// in `W.metadata.labels`. An empty selector matches nothing (spec §4.4).
pub type Selector = HashMap<String, String>;

pub fn selector_matches(selector: &Selector, labels: &HashMap<String, String>) -> bool {
    if selector.is_empty() {
        return false;
    }
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub want_type: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default)]
    pub is_system_want: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A schedule entry as written in `spec.when` (spec §4.10, §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub at: Option<String>,
    pub every: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Spec {
    #[serde(default)]
    pub params: HashMap<String, Value>,
    #[serde(default)]
    pub using: Vec<Selector>,
    #[serde(default)]
    pub when: Vec<ScheduleSpec>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub recipe: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry<T> {
    pub timestamp: DateTime<Utc>,
    pub value: T,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    pub parameter_history: Vec<HistoryEntry<HashMap<String, Value>>>,
    pub state_history: Vec<HistoryEntry<HashMap<String, Value>>>,
    pub log_history: Vec<HistoryEntry<String>>,
    pub agent_history: Vec<HistoryEntry<AgentHistoryEntry>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHistoryEntry {
    pub agent_name: String,
    pub success: bool,
    pub detail: String,
}

/// The unit of desired state (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Want {
    pub metadata: Metadata,
    pub spec: Spec,
    pub status: Status,
    pub state: HashMap<String, Value>,
    pub hidden_state: HashMap<String, Value>,
    pub history: History,
    /// Opaque per-type record. Only the type's own `WantBehavior` impl reads it.
    pub locals: Value,

    /// Resolved input/output peers, recomputed by the label resolver (C4).
    /// Not part of the wire schema in §6.1 — derived, not submitted.
    #[serde(skip)]
    pub inputs: Vec<Uuid>,
    #[serde(skip)]
    pub outputs: Vec<Uuid>,
}

impl Want {
    pub fn new(name: impl Into<String>, want_type: impl Into<String>, spec: Spec) -> Self {
        let now = Utc::now();
        Want {
            metadata: Metadata {
                id: Uuid::new_v4(),
                name: name.into(),
                want_type: want_type.into(),
                labels: HashMap::new(),
                owner_references: Vec::new(),
                is_system_want: false,
                created_at: now,
                updated_at: now,
            },
            spec,
            status: Status::Created,
            state: HashMap::new(),
            hidden_state: HashMap::new(),
            history: History::default(),
            locals: Value::Null,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Content-addressable digest over (metadata, spec, status, state), used
    /// by the API layer to detect drift (spec §4.3). The core never
    /// interprets the hash itself.
    pub fn content_hash(&self) -> [u8; 32] {
        #[derive(Serialize)]
        struct Hashed<'a> {
            metadata: &'a Metadata,
            spec: &'a Spec,
            status: &'a Status,
            state: &'a HashMap<String, Value>,
        }
        let hashed = Hashed {
            metadata: &self.metadata,
            spec: &self.spec,
            status: &self.status,
            state: &self.state,
        };
        let encoded = bincode::serialize(&hashed).expect("want fields are always serializable");
        *blake3::hash(&encoded).as_bytes()
    }

    pub fn achieving_percentage(&self) -> f64 {
        self.state
            .get("achieving_percentage")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    pub fn set_achieving_percentage(&mut self, pct: f64) {
        self.state
            .insert("achieving_percentage".to_string(), Value::from(pct.clamp(0.0, 100.0)));
    }

    // --- typed state accessors (spec §4.5) ---------------------------------

    pub fn get_state(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    pub fn get_state_string(&self, key: &str) -> Option<&str> {
        self.state.get(key).and_then(Value::as_str)
    }

    pub fn get_state_int(&self, key: &str) -> Option<i64> {
        self.state.get(key).and_then(Value::as_i64)
    }

    pub fn get_state_bool(&self, key: &str) -> Option<bool> {
        self.state.get(key).and_then(Value::as_bool)
    }

    pub fn get_state_float64(&self, key: &str) -> Option<f64> {
        self.state.get(key).and_then(Value::as_f64)
    }

    pub fn get_state_multi(&self, keys: &[&str]) -> HashMap<String, Value> {
        keys.iter()
            .filter_map(|k| self.state.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect()
    }

    /// Store a single state value, appending a `stateHistory` entry only if
    /// the post-state hash differs from the pre-state hash (no-op write
    /// suppression, spec §4.5 and the idempotence law in spec §8).
    pub fn store_state(&mut self, key: impl Into<String>, value: Value) {
        let before = self.state_fingerprint();
        self.state.insert(key.into(), value);
        self.record_state_history_if_changed(before);
    }

    pub fn store_state_multi(&mut self, values: HashMap<String, Value>) {
        let before = self.state_fingerprint();
        self.state.extend(values);
        self.record_state_history_if_changed(before);
    }

    fn state_fingerprint(&self) -> [u8; 32] {
        let encoded = bincode::serialize(&self.state).expect("state map is always serializable");
        *blake3::hash(&encoded).as_bytes()
    }

    fn record_state_history_if_changed(&mut self, before: [u8; 32]) {
        if self.state_fingerprint() != before {
            self.history.state_history.push(HistoryEntry {
                timestamp: Utc::now(),
                value: self.state.clone(),
            });
        }
    }

    pub fn store_log(&mut self, message: impl Into<String>) {
        self.history.log_history.push(HistoryEntry {
            timestamp: Utc::now(),
            value: message.into(),
        });
    }

    pub fn record_agent_history(&mut self, entry: AgentHistoryEntry) {
        self.history.agent_history.push(HistoryEntry {
            timestamp: Utc::now(),
            value: entry,
        });
    }
}

/// The outcome of a failed `Progress()` call (spec §7). `Transient` is an
/// `AgentExecutionError`-style hiccup — logged, counted, retried next tick,
/// the want stays in `reaching`. `Fatal` is a `ModuleError`: the want type
/// itself has decided it can never make progress, and the reconcile loop
/// transitions the want straight to `failed`.
///
/// `?` on any `Result<_, String>` or `Result<_, &str>` (e.g.
/// `ctx.pubsub.ok_or("...")?`) converts into `Transient` automatically, so
/// existing progress bodies only need a signature change unless they want
/// to raise `Fatal` explicitly via [`ProgressError::fatal`].
#[derive(Debug, Clone)]
pub enum ProgressError {
    Transient(String),
    Fatal(crate::error::ModuleError),
}

impl ProgressError {
    pub fn fatal(message: impl Into<String>) -> Self {
        ProgressError::Fatal(crate::error::ModuleError::Fatal { message: message.into() })
    }
}

impl std::fmt::Display for ProgressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressError::Transient(message) => write!(f, "{message}"),
            ProgressError::Fatal(err) => write!(f, "{err}"),
        }
    }
}

impl From<String> for ProgressError {
    fn from(message: String) -> Self {
        ProgressError::Transient(message)
    }
}

impl From<&str> for ProgressError {
    fn from(message: &str) -> Self {
        ProgressError::Transient(message.to_string())
    }
}

/// The behavior a concrete want type implements. The core depends only on
/// this trait, never on any concrete type — domain want types (flights,
/// hotels, recipes, …) are out of scope and live entirely behind factories
/// registered with the engine.
pub trait WantBehavior: Send + Sync {
    /// Called once after a want is inserted into the store, before it can
    /// transition to `idle`. Returning an error sets `status=failed`.
    fn initialize(&self, ctx: &mut WantContext) -> Result<(), String>;

    /// Called once per eligible reconcile tick. Must be idempotent-safe,
    /// make bounded progress, and never block indefinitely (spec §4.8, §5).
    /// Return [`ProgressError::Fatal`] (or use [`ProgressError::fatal`])
    /// when the want can never achieve — anything else is treated as
    /// transient and retried next tick.
    fn progress(&self, ctx: &mut WantContext) -> Result<(), ProgressError>;

    fn is_achieved(&self, ctx: &WantContext) -> bool;

    fn calculate_achieving_percentage(&self, ctx: &WantContext) -> f64 {
        if self.is_achieved(ctx) { 100.0 } else { ctx.want.achieving_percentage() }
    }

    /// Called when a want transitions to `deleting`, before background
    /// agents are stopped and subscriptions torn down.
    fn on_delete(&self, _ctx: &mut WantContext) {}
}

/// The mutable view a `WantBehavior` implementation receives during
/// `Initialize`/`Progress`. Kept separate from `Want` itself so the engine
/// can thread in resolved peers and handles without widening the trait.
/// `agents`/`background` are populated only during `Progress()`, when a
/// want may dispatch a Do-agent synchronously or start/stop a background
/// agent of its own.
pub struct WantContext<'a> {
    pub want: &'a mut Want,
    pub agents: Option<&'a crate::registry::AgentRegistry>,
    pub background: Option<&'a std::sync::Arc<crate::background::BackgroundHost>>,
    /// Handle to the pub/sub bus (spec §4.1): a want reads its inputs by
    /// re-subscribing (idempotent) to each producer in `want.inputs` and
    /// polling, and publishes on its own topic (its own want ID).
    pub pubsub: Option<&'a crate::pubsub::PubSub>,
    /// Handle to enqueue further mutations (spec §4.9): a composite want
    /// uses this during `Progress()` to submit child-creation mutations
    /// without blocking on the reconcile loop it is itself running inside.
    pub mutations: Option<&'a crate::mutation::MutationSender>,
    /// Handle to the store (spec §4.5: `getParentState`/`mergeParentState`),
    /// used to reach into the first ancestor named in `ownerReferences`.
    pub store: Option<&'a crate::store::WantStore>,
    /// This want's standing subscription to the owner completion bus (spec
    /// §4.9), opened once by the reconcile loop and handed to every
    /// `Progress()` call so a composite want can poll for its children's
    /// completion without re-subscribing (and losing events) each tick.
    pub owner_completions: Option<&'a crate::owner::OwnerCompletionSubscription>,
}

impl<'a> WantContext<'a> {
    pub fn new(want: &'a mut Want) -> Self {
        Self { want, agents: None, background: None, pubsub: None, mutations: None, store: None, owner_completions: None }
    }

    pub fn with_agents(mut self, agents: &'a crate::registry::AgentRegistry) -> Self {
        self.agents = Some(agents);
        self
    }

    pub fn with_background(mut self, background: &'a std::sync::Arc<crate::background::BackgroundHost>) -> Self {
        self.background = Some(background);
        self
    }

    pub fn with_pubsub(mut self, pubsub: &'a crate::pubsub::PubSub) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    pub fn with_mutations(mut self, mutations: &'a crate::mutation::MutationSender) -> Self {
        self.mutations = Some(mutations);
        self
    }

    pub fn with_store(mut self, store: &'a crate::store::WantStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_owner_completions(mut self, owner_completions: &'a crate::owner::OwnerCompletionSubscription) -> Self {
        self.owner_completions = Some(owner_completions);
        self
    }

    /// Drains events addressed to this want's own `metadata.id` from the
    /// owner completion bus (spec §4.9). Returns an empty vec if no
    /// subscription is attached — e.g. when calling from outside
    /// `Progress()`.
    pub fn poll_owner_completions(&self) -> Vec<crate::owner::OwnerCompletionEvent> {
        match self.owner_completions {
            Some(subscription) => subscription.poll_for(self.want.metadata.id),
            None => Vec::new(),
        }
    }

    /// Reads `key` from the state of the first ancestor in `ownerReferences`
    /// that has a value for it (spec §4.5). Ancestors are tried in
    /// declaration order; an ancestor the store has no record for (already
    /// deleted, or a dangling reference) is skipped rather than treated as
    /// an error. Uses `try_lock` rather than an async wait: the reconcile
    /// loop progresses one want at a time, so a lock held on another want's
    /// record here would indicate a bug, not legitimate contention.
    pub fn get_parent_state(&self, key: &str) -> Option<Value> {
        let store = self.store?;
        for owner in &self.want.metadata.owner_references {
            let Some(record) = store.get(owner.id) else { continue };
            let Ok(parent) = record.want.try_lock() else { continue };
            if let Some(value) = parent.get_state(key) {
                return Some(value.clone());
            }
        }
        None
    }

    /// Deep-merges `mapping` into the state of the first ancestor in
    /// `ownerReferences` that the store still holds a record for (spec
    /// §4.5). Each merged key goes through the normal hash-gated
    /// `store_state` write path on the parent, so the parent's own state
    /// history only grows when a value actually changes.
    pub fn merge_parent_state(&mut self, mapping: HashMap<String, Value>) -> Result<(), String> {
        let store = self.store.ok_or("parent state access requires a store handle")?;
        for owner in &self.want.metadata.owner_references {
            let Some(record) = store.get(owner.id) else { continue };
            let Ok(mut parent) = record.want.try_lock() else { continue };
            for (key, value) in mapping {
                parent.store_state(key, value);
            }
            return Ok(());
        }
        Err("no ancestor in ownerReferences has a store record to merge into".to_string())
    }

    /// Synchronously invokes the first registered Do-agent providing
    /// `capability` (spec §4.2: "DoAgent ... invoked synchronously during a
    /// want's `Progress()` via `ExecuteAgents`"), placing the outcome into
    /// `state.agent_result` and appending an `agentHistory` entry. A
    /// failed invocation is an `AgentExecutionError` (spec §7): it is
    /// recorded in `state.agent_execution_error` rather than propagated,
    /// so the want stays in `reaching` and the caller retries next tick.
    pub fn execute_agent(
        &mut self,
        capability: &str,
        params: HashMap<String, Value>,
    ) -> Result<crate::registry::AgentOutcome, String> {
        let agents = self.agents.ok_or("agent execution requires an agent registry")?;
        let candidate = agents
            .find_do_agents_by_capability_name(capability)
            .into_iter()
            .next()
            .ok_or_else(|| format!("no Do agent provides capability '{capability}'"))?;

        let invocation = crate::registry::AgentInvocationContext { want_id: self.want.metadata.id, params };
        let result = candidate.exec.invoke(&invocation);

        self.want.record_agent_history(AgentHistoryEntry {
            agent_name: candidate.name.clone(),
            success: result.outcome.success,
            detail: result.outcome.message.clone(),
        });

        if result.outcome.success {
            self.want.store_state("agent_result", result.outcome.value.clone());
        } else {
            self.want.store_state("agent_execution_error", Value::from(result.outcome.message.clone()));
        }

        Ok(result.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selector_matches_nothing() {
        let selector = Selector::new();
        let labels = HashMap::new();
        assert!(!selector_matches(&selector, &labels));
    }

    #[test]
    fn selector_matches_exact_labels() {
        let mut selector = Selector::new();
        selector.insert("role".into(), "gen".into());
        let mut labels = HashMap::new();
        labels.insert("role".into(), "gen".into());
        labels.insert("extra".into(), "ignored".into());
        assert!(selector_matches(&selector, &labels));
    }

    #[test]
    fn selector_requires_all_keys() {
        let mut selector = Selector::new();
        selector.insert("role".into(), "gen".into());
        selector.insert("env".into(), "prod".into());
        let mut labels = HashMap::new();
        labels.insert("role".into(), "gen".into());
        assert!(!selector_matches(&selector, &labels));
    }

    #[test]
    fn store_state_suppresses_noop_write() {
        let mut want = Want::new("g", "prime numbers", Spec::default());
        want.store_state("x", Value::from(1));
        let len_after_first = want.history.state_history.len();
        want.store_state("x", Value::from(1));
        assert_eq!(want.history.state_history.len(), len_after_first);
    }

    #[test]
    fn store_state_records_on_change() {
        let mut want = Want::new("g", "prime numbers", Spec::default());
        want.store_state("x", Value::from(1));
        want.store_state("x", Value::from(2));
        assert_eq!(want.history.state_history.len(), 2);
    }

    #[test]
    fn content_hash_stable_across_clones() {
        let want = Want::new("g", "prime numbers", Spec::default());
        assert_eq!(want.content_hash(), want.clone().content_hash());
    }
}
