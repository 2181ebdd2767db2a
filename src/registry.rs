//! Agent Registry (C2): capability matching for Do/Monitor/Think agents.
//!
//! Generalizes the teacher's bid-based `ReasonerRegistry` (name→agent plus
//! a capability index, agents tried in registration order) and its
//! bidirectional `SymbolRegistry` lookup shape (one `DashMap` keyed by
//! name, a parallel `Vec` preserving insertion order for stable tie-break).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    /// Invoked synchronously during a want's `Progress()`.
    Do,
    /// Invoked on a fixed interval; returns a terminal `done` signal.
    Monitor,
    /// Invoked on a fixed interval; runs until deleted or stopped.
    Think,
}

#[derive(Debug, Clone)]
pub struct Capability {
    pub name: String,
    pub gives: Vec<String>,
}

impl Capability {
    pub fn new(name: impl Into<String>, gives: Vec<String>) -> Self {
        Self { name: name.into(), gives }
    }

    /// A capability "provides" `s` iff `s ∈ gives ∪ {name}` (spec §3).
    pub fn provides(&self, s: &str) -> bool {
        self.name == s || self.gives.iter().any(|g| g == s)
    }
}

/// Result of a Do-agent invocation, placed into the want's state under
/// `agent_result` (spec §4.2).
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub success: bool,
    pub value: Value,
    pub message: String,
}

/// The callable body of an agent. Do-agents return once; Monitor agents
/// return `done` to signal the background host to stop rescheduling them;
/// Think agents ignore `done` and run until cancelled.
pub trait AgentExec: Send + Sync {
    fn invoke(&self, ctx: &AgentInvocationContext) -> AgentInvocationResult;
}

pub struct AgentInvocationContext {
    pub want_id: uuid::Uuid,
    pub params: HashMap<String, Value>,
}

pub struct AgentInvocationResult {
    pub outcome: AgentOutcome,
    /// Only meaningful for `Monitor` agents: `true` stops rescheduling.
    pub done: bool,
}

pub struct Agent {
    pub name: String,
    pub kind: AgentKind,
    pub capabilities: Vec<Capability>,
    pub uses: Vec<String>,
    pub exec: Arc<dyn AgentExec>,
}

impl Agent {
    pub fn provides(&self, capability_name: &str) -> bool {
        self.capabilities.iter().any(|c| c.provides(capability_name))
    }
}

/// Name-keyed registry with insertion order preserved for deterministic
/// tie-break in `find_agents_by_gives` (spec §4.2: "agents registered first
/// are returned first").
pub struct AgentRegistry {
    by_name: DashMap<String, Arc<Agent>>,
    insertion_order: std::sync::Mutex<Vec<String>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            insertion_order: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn register_agent(&self, agent: Agent) -> Result<(), AgentError> {
        if self.by_name.contains_key(&agent.name) {
            return Err(AgentError::DuplicateName { name: agent.name });
        }
        let name = agent.name.clone();
        self.by_name.insert(name.clone(), Arc::new(agent));
        self.insertion_order.lock().expect("registry order mutex poisoned").push(name);
        Ok(())
    }

    pub fn get_agent(&self, name: &str) -> Result<Arc<Agent>, AgentError> {
        self.by_name
            .get(name)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| AgentError::NotFound { name: name.to_string() })
    }

    pub fn unregister_agent(&self, name: &str) -> Result<(), AgentError> {
        self.by_name
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| AgentError::NotFound { name: name.to_string() })?;
        self.insertion_order.lock().expect("registry order mutex poisoned").retain(|n| n != name);
        Ok(())
    }

    fn ordered_agents(&self) -> Vec<Arc<Agent>> {
        let order = self.insertion_order.lock().expect("registry order mutex poisoned");
        order
            .iter()
            .filter_map(|name| self.by_name.get(name).map(|r| Arc::clone(r.value())))
            .collect()
    }

    pub fn find_agents_by_gives(&self, capability_name: &str) -> Vec<Arc<Agent>> {
        self.ordered_agents()
            .into_iter()
            .filter(|a| a.provides(capability_name))
            .collect()
    }

    pub fn find_agents_by_kind_and_gives(&self, kind: AgentKind, capability_name: &str) -> Vec<Arc<Agent>> {
        self.ordered_agents()
            .into_iter()
            .filter(|a| a.kind == kind && a.provides(capability_name))
            .collect()
    }

    pub fn find_monitor_agents_by_capability_name(&self, capability_name: &str) -> Vec<Arc<Agent>> {
        self.find_agents_by_kind_and_gives(AgentKind::Monitor, capability_name)
    }

    pub fn find_do_agents_by_capability_name(&self, capability_name: &str) -> Vec<Arc<Agent>> {
        self.find_agents_by_kind_and_gives(AgentKind::Do, capability_name)
    }

    pub fn find_think_agents_by_capability_name(&self, capability_name: &str) -> Vec<Arc<Agent>> {
        self.find_agents_by_kind_and_gives(AgentKind::Think, capability_name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
