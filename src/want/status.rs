//! Lifecycle state machine for a want.
//!
//! `created -> idle -> reaching -> (achieved | failed | suspended)`;
//! `suspended -> reaching`; any state can move to `deleting`. `stopped` is
//! entered only on an explicit stop and is restarted via `start`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Created,
    Idle,
    Reaching,
    Suspended,
    Stopped,
    Achieved,
    Failed,
    WaitingUserAction,
    Deleting,
}

impl Status {
    /// Whether the reconcile loop should call `Progress()` on a want in this status.
    pub fn is_progressable(self) -> bool {
        matches!(self, Status::Idle | Status::Reaching | Status::WaitingUserAction)
    }

    /// Whether this is a terminal status a want cannot leave except via deletion.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Achieved | Status::Failed | Status::Deleting)
    }

    /// Validate a requested transition against the lifecycle FSM in spec §4.8.
    pub fn can_transition_to(self, next: Status) -> bool {
        use Status::*;
        match (self, next) {
            // Self-transitions are always legal (idempotent reconcile ticks).
            (a, b) if a == b => true,
            (Created, Idle) => true,
            (Idle, Reaching) => true,
            (Reaching, Achieved | Failed | WaitingUserAction) => true,
            (WaitingUserAction, Reaching | Achieved | Failed) => true,
            (Suspended, Reaching) => true,
            // Spec §4.8: a suspend mutation can land on a want in any non-terminal
            // status, not just `reaching` (e.g. suspending something still `idle`).
            (_, Suspended) => !matches!(self, Deleting),
            (_, Stopped) => !matches!(self, Deleting),
            (Stopped, Reaching) => true,
            (_, Deleting) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Created => "created",
            Status::Idle => "idle",
            Status::Reaching => "reaching",
            Status::Suspended => "suspended",
            Status::Stopped => "stopped",
            Status::Achieved => "achieved",
            Status::Failed => "failed",
            Status::WaitingUserAction => "waiting_user_action",
            Status::Deleting => "deleting",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_to_idle_allowed() {
        assert!(Status::Created.can_transition_to(Status::Idle));
    }

    #[test]
    fn achieved_is_terminal_but_self_transition_allowed() {
        assert!(Status::Achieved.is_terminal());
        assert!(Status::Achieved.can_transition_to(Status::Achieved));
        assert!(!Status::Achieved.can_transition_to(Status::Reaching));
    }

    #[test]
    fn suspend_then_resume_round_trips() {
        assert!(Status::Reaching.can_transition_to(Status::Suspended));
        assert!(Status::Suspended.can_transition_to(Status::Reaching));
    }

    #[test]
    fn suspend_reachable_from_any_non_terminal_non_deleting_status() {
        assert!(Status::Idle.can_transition_to(Status::Suspended));
        assert!(Status::Created.can_transition_to(Status::Suspended));
        assert!(Status::Stopped.can_transition_to(Status::Suspended));
        assert!(Status::WaitingUserAction.can_transition_to(Status::Suspended));
        assert!(!Status::Deleting.can_transition_to(Status::Suspended));
    }

    #[test]
    fn deleting_reachable_from_any_non_terminal() {
        assert!(Status::Idle.can_transition_to(Status::Deleting));
        assert!(Status::Reaching.can_transition_to(Status::Deleting));
        assert!(Status::Suspended.can_transition_to(Status::Deleting));
    }

    #[test]
    fn progressable_statuses() {
        assert!(Status::Idle.is_progressable());
        assert!(Status::Reaching.is_progressable());
        assert!(!Status::Suspended.is_progressable());
        assert!(!Status::Achieved.is_progressable());
    }
}
