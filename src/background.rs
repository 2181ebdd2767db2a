//! Background Agent Host (C6): a per-want dynamic set of background tasks
//! keyed by a stable agent ID string, each polling at its own interval
//! until cancelled.
//!
//! Grounded in the teacher's `WorkspaceDaemon` (`bin/akhomed.rs`): a task
//! handle plus a `watch::Sender<bool>` shutdown flag owned alongside it,
//! so cancelling is a plain field write rather than an external registry
//! walk.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::registry::{Agent, AgentInvocationContext, AgentKind};

/// A single running background agent invocation loop.
struct BackgroundTask {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Per-want collection of background tasks. One `BackgroundHost` is owned
/// by each want record; `stop_all` is called on delete, stop, and engine
/// shutdown (the four cancellation sources in spec §4.6).
///
/// Bookkeeping uses a plain `std::sync::Mutex` rather than a `tokio::sync`
/// one: `WantBehavior::progress` is synchronous (spec §4.8), so starting or
/// querying a background agent from inside it must never `.await`. Only
/// the host-wide teardown (`stop_all_background_agents`, used on delete and
/// engine shutdown, both already async contexts) joins task handles.
pub struct BackgroundHost {
    want_id: Uuid,
    tasks: Mutex<HashMap<String, BackgroundTask>>,
}

impl BackgroundHost {
    pub fn new(want_id: Uuid) -> Self {
        Self { want_id, tasks: Mutex::new(HashMap::new()) }
    }

    /// Starts a cooperative task that invokes `agent` on `interval` until
    /// cancelled or, for monitor-kind agents, until the invocation reports
    /// `done=true` (in which case the task removes its own entry before
    /// exiting, so `active_count` reflects completion without a separate
    /// stop call). Replaces any existing task registered under `id`,
    /// signalling it to shut down without waiting for it to finish.
    pub fn add_background_agent(
        self: &Arc<Self>,
        id: impl Into<String>,
        interval: Duration,
        agent: Arc<Agent>,
        on_result: Arc<dyn Fn(Uuid, &str, crate::registry::AgentInvocationResult) + Send + Sync>,
    ) {
        let id = id.into();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let want_id = self.want_id;
        let task_id = id.clone();
        let host = Arc::clone(self);
        let cleanup_id = id.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let ctx = AgentInvocationContext { want_id, params: Default::default() };
                        let result = agent.exec.invoke(&ctx);
                        let is_done = result.done;
                        on_result(want_id, &task_id, result);
                        if agent.kind == AgentKind::Monitor && is_done {
                            host.tasks.lock().expect("background task map poisoned").remove(&cleanup_id);
                            break;
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        let mut tasks = self.tasks.lock().expect("background task map poisoned");
        if let Some(old) = tasks.insert(id, BackgroundTask { handle, shutdown_tx }) {
            let _ = old.shutdown_tx.send(true);
        }
    }

    pub fn get_background_agent(&self, id: &str) -> bool {
        self.tasks.lock().expect("background task map poisoned").contains_key(id)
    }

    /// Signals the task to stop on its next `select!` poll without waiting
    /// for it to finish (synchronous, callable from `Progress()`).
    pub fn stop_background_agent(&self, id: &str) {
        if let Some(task) = self.tasks.lock().expect("background task map poisoned").remove(id) {
            let _ = task.shutdown_tx.send(true);
        }
    }

    pub async fn stop_all_background_agents(&self) {
        let tasks: Vec<BackgroundTask> = {
            let mut guard = self.tasks.lock().expect("background task map poisoned");
            guard.drain().map(|(_, t)| t).collect()
        };
        for task in tasks {
            let _ = task.shutdown_tx.send(true);
            let _ = task.handle.await;
        }
    }

    pub fn active_count(&self) -> usize {
        self.tasks.lock().expect("background task map poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AgentExec, AgentInvocationResult, AgentOutcome};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExec {
        calls: Arc<AtomicUsize>,
        done_after: usize,
    }

    impl AgentExec for CountingExec {
        fn invoke(&self, _ctx: &AgentInvocationContext) -> AgentInvocationResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            AgentInvocationResult {
                outcome: AgentOutcome { success: true, value: serde_json::Value::Null, message: String::new() },
                done: n >= self.done_after,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_agent_stops_itself_when_done() {
        let calls = Arc::new(AtomicUsize::new(0));
        let agent = Arc::new(Agent {
            name: "poller".into(),
            kind: AgentKind::Monitor,
            capabilities: vec![],
            uses: vec![],
            exec: Arc::new(CountingExec { calls: calls.clone(), done_after: 2 }),
        });
        let host = Arc::new(BackgroundHost::new(Uuid::new_v4()));
        host.add_background_agent("poll", Duration::from_millis(10), agent, Arc::new(|_, _, _| {}));

        tokio::time::advance(Duration::from_millis(35)).await;
        tokio::task::yield_now().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(host.active_count(), 0);
    }

    #[tokio::test]
    async fn stop_all_cancels_every_task() {
        let host = Arc::new(BackgroundHost::new(Uuid::new_v4()));
        let agent = Arc::new(Agent {
            name: "thinker".into(),
            kind: AgentKind::Think,
            capabilities: vec![],
            uses: vec![],
            exec: Arc::new(CountingExec { calls: Arc::new(AtomicUsize::new(0)), done_after: usize::MAX }),
        });
        host.add_background_agent("think", Duration::from_millis(5), agent, Arc::new(|_, _, _| {}));
        assert_eq!(host.active_count(), 1);
        host.stop_all_background_agents().await;
        assert_eq!(host.active_count(), 0);
    }
}
