//! Owner/Target (C9): composite wants that create and aggregate child
//! wants. A `CompositeState` helper is embedded by any `WantBehavior`
//! implementation that wants this bookkeeping (recipes, coordinators),
//! rather than forcing composite-ness into the core `Want` struct.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `{childName, status}` events broadcast on the process-wide owner
/// completion bus (spec §4.9). Every composite want subscribes and filters
/// for its own children.
#[derive(Debug, Clone)]
pub struct OwnerCompletionEvent {
    pub owner_id: Uuid,
    pub child_name: String,
    pub achieved: bool,
}

pub fn owner_completion_bus(capacity: usize) -> (tokio::sync::broadcast::Sender<OwnerCompletionEvent>, tokio::sync::broadcast::Receiver<OwnerCompletionEvent>) {
    tokio::sync::broadcast::channel(capacity)
}

/// A single want's standing subscription to the owner completion bus (spec
/// §4.9: "owner subscribes to ownerCompletionBus"). The reconcile loop opens
/// one of these per want the first time it progresses it and hands it to
/// every later `Progress()` call through [`crate::want::WantContext`], so a
/// composite want's `WantBehavior` can poll for its own children's
/// completion events without missing any raised between ticks.
pub struct OwnerCompletionSubscription {
    receiver: std::sync::Mutex<tokio::sync::broadcast::Receiver<OwnerCompletionEvent>>,
}

impl OwnerCompletionSubscription {
    pub fn new(receiver: tokio::sync::broadcast::Receiver<OwnerCompletionEvent>) -> Self {
        Self { receiver: std::sync::Mutex::new(receiver) }
    }

    /// Drains every event queued for this subscription so far, keeping only
    /// the ones addressed to `owner_id` (the bus is process-wide, shared by
    /// every want). A lagged receiver skips the events it missed rather than
    /// erroring — a composite want should keep reconciling from whatever
    /// state its children currently report, not get stuck on a gap.
    pub fn poll_for(&self, owner_id: Uuid) -> Vec<OwnerCompletionEvent> {
        use tokio::sync::broadcast::error::TryRecvError;

        let mut receiver = self.receiver.lock().expect("owner completion receiver mutex poisoned");
        let mut events = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(event) => {
                    if event.owner_id == owner_id {
                        events.push(event);
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
        events
    }
}

/// Per-composite-want bookkeeping, stored in `Want::locals` by the owning
/// type's `WantBehavior` implementation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompositeState {
    pub children_created: bool,
    pub completed_children: HashMap<String, bool>,
}

impl CompositeState {
    /// Call once during the owner's first `Progress()`, after the child
    /// creation mutations have been enqueued (spec §4.9).
    pub fn mark_children_created(&mut self, child_names: impl IntoIterator<Item = String>) {
        self.completed_children = child_names.into_iter().map(|n| (n, false)).collect();
        self.children_created = true;
    }

    pub fn on_child_completed(&mut self, child_name: &str) {
        if let Some(completed) = self.completed_children.get_mut(child_name) {
            *completed = true;
        }
    }

    /// `100 × (completed / total)`, with `total=0 ⇒ 100` (spec §4.9).
    pub fn achieving_percentage(&self) -> f64 {
        let total = self.completed_children.len();
        if total == 0 {
            return 100.0;
        }
        let completed = self.completed_children.values().filter(|v| **v).count();
        100.0 * completed as f64 / total as f64
    }

    pub fn all_completed(&self) -> bool {
        self.children_created && self.completed_children.values().all(|v| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_children_is_fully_achieved() {
        let state = CompositeState::default();
        assert_eq!(state.achieving_percentage(), 100.0);
        assert!(!state.all_completed()); // children_created still false
    }

    #[test]
    fn percentage_tracks_completed_fraction() {
        let mut state = CompositeState::default();
        state.mark_children_created(["e1".to_string(), "e2".to_string(), "e3".to_string()]);
        assert_eq!(state.achieving_percentage(), 0.0);

        state.on_child_completed("e1");
        assert_eq!(state.achieving_percentage().round() as i64, 33);

        state.on_child_completed("e2");
        assert_eq!(state.achieving_percentage().round() as i64, 67);

        state.on_child_completed("e3");
        assert_eq!(state.achieving_percentage(), 100.0);
        assert!(state.all_completed());
    }

    #[test]
    fn unknown_child_name_is_ignored() {
        let mut state = CompositeState::default();
        state.mark_children_created(["e1".to_string()]);
        state.on_child_completed("ghost");
        assert_eq!(state.achieving_percentage(), 0.0);
    }

    #[test]
    fn subscription_filters_to_its_own_owner_and_ignores_others() {
        let (tx, rx) = owner_completion_bus(8);
        let subscription = OwnerCompletionSubscription::new(rx);
        let owner_id = Uuid::new_v4();
        let other_id = Uuid::new_v4();

        tx.send(OwnerCompletionEvent { owner_id, child_name: "e1".into(), achieved: true }).unwrap();
        tx.send(OwnerCompletionEvent { owner_id: other_id, child_name: "e1".into(), achieved: true }).unwrap();
        tx.send(OwnerCompletionEvent { owner_id, child_name: "e2".into(), achieved: true }).unwrap();

        let events = subscription.poll_for(owner_id);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].child_name, "e1");
        assert_eq!(events[1].child_name, "e2");

        assert!(subscription.poll_for(owner_id).is_empty());
    }
}
