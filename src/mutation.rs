//! Mutation Queue (C7): a single FIFO of create/update/delete/suspend/
//! resume/stop/start intents. Producers are non-blocking if capacity
//! remains, blocking otherwise; each mutation carries a correlation ID
//! echoed back to the submitter via a `oneshot` reply.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MutationError;
use crate::want::{Spec, Want};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WantConfig {
    pub name: String,
    pub want_type: Option<String>,
    pub id: Option<Uuid>,
    pub labels: std::collections::HashMap<String, String>,
    pub owner_references: Vec<crate::want::OwnerReference>,
    pub spec: Spec,
}

impl WantConfig {
    pub fn into_want(self) -> Result<Want, crate::error::ConfigError> {
        let want_type = match (self.want_type, &self.spec.recipe) {
            (Some(t), _) => t,
            (None, Some(recipe)) => recipe.clone(),
            (None, None) => {
                return Err(crate::error::ConfigError::MissingField {
                    field: "metadata.type (or spec.recipe)".to_string(),
                })
            }
        };
        let mut want = Want::new(self.name, want_type, self.spec);
        if let Some(id) = self.id {
            want.metadata.id = id;
        }
        want.metadata.labels = self.labels;
        want.metadata.owner_references = self.owner_references;
        Ok(want)
    }
}

#[derive(Debug, Clone)]
pub enum MutationKind {
    Create(Vec<WantConfig>),
    Update { id: Uuid, config: WantConfig },
    Delete(Vec<Uuid>),
    Suspend(Vec<Uuid>),
    Resume(Vec<Uuid>),
    Stop(Vec<Uuid>),
    Start(Vec<Uuid>),
}

/// A mutation's reply, always tagged with the `correlation_id` of the
/// `Mutation` it answers (spec §6.2: every mutation RPC carries the
/// correlation ID back to the submitter).
#[derive(Debug, Clone)]
pub enum MutationReply {
    /// IDs assigned to newly created wants, in request order.
    Created { correlation_id: Uuid, ids: Vec<Uuid> },
    Updated { correlation_id: Uuid, id: Uuid },
    Accepted { correlation_id: Uuid },
}

impl MutationReply {
    pub fn correlation_id(&self) -> Uuid {
        match self {
            MutationReply::Created { correlation_id, .. } => *correlation_id,
            MutationReply::Updated { correlation_id, .. } => *correlation_id,
            MutationReply::Accepted { correlation_id } => *correlation_id,
        }
    }
}

pub struct Mutation {
    pub correlation_id: Uuid,
    pub kind: MutationKind,
    pub reply: tokio::sync::oneshot::Sender<Result<MutationReply, MutationError>>,
}

/// Handle used by submitters (mutation RPC surface, §6.2) to enqueue work
/// for the reconcile loop and await its correlated reply.
#[derive(Clone)]
pub struct MutationSender {
    tx: tokio::sync::mpsc::Sender<Mutation>,
}

impl MutationSender {
    pub async fn submit(&self, kind: MutationKind) -> Result<MutationReply, MutationError> {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        let mutation = Mutation {
            correlation_id: Uuid::new_v4(),
            kind,
            reply: reply_tx,
        };
        self.tx.send(mutation).await.map_err(|_| MutationError::QueueClosed)?;
        reply_rx.await.map_err(|_| MutationError::ReplyDropped)?
    }

    /// Non-blocking enqueue with no reply wait, for use from inside a
    /// synchronous `WantBehavior::progress` (a composite want creating its
    /// children, spec §4.9). The reply is discarded — the caller observes
    /// the effect on the next tick via the store rather than via a reply.
    pub fn try_enqueue(&self, kind: MutationKind) -> Result<(), MutationError> {
        let (reply_tx, _reply_rx) = tokio::sync::oneshot::channel();
        let mutation = Mutation { correlation_id: Uuid::new_v4(), kind, reply: reply_tx };
        self.tx.try_send(mutation).map_err(|e| match e {
            tokio::sync::mpsc::error::TrySendError::Full(_) => MutationError::QueueFull,
            tokio::sync::mpsc::error::TrySendError::Closed(_) => MutationError::QueueClosed,
        })
    }
}

pub struct MutationQueue {
    tx: tokio::sync::mpsc::Sender<Mutation>,
    rx: tokio::sync::mpsc::Receiver<Mutation>,
}

/// Default bound on in-flight, undrained mutations (spec §4.7: blocking
/// once capacity is exhausted, non-blocking otherwise).
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

impl MutationQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel(capacity);
        Self { tx, rx }
    }

    pub fn sender(&self) -> MutationSender {
        MutationSender { tx: self.tx.clone() }
    }

    /// Drains up to `max_batch` pending mutations without blocking,
    /// returning as soon as either the cap or an empty queue is hit
    /// (spec §4.8 step 1: "drain a bounded batch of mutations").
    pub fn try_drain_batch(&mut self, max_batch: usize) -> Vec<Mutation> {
        let mut batch = Vec::with_capacity(max_batch);
        while batch.len() < max_batch {
            match self.rx.try_recv() {
                Ok(m) => batch.push(m),
                Err(_) => break,
            }
        }
        batch
    }

    /// Blocks until at least one mutation is available or the queue is
    /// closed, then drains up to `max_batch` total.
    pub async fn recv_batch(&mut self, max_batch: usize) -> Vec<Mutation> {
        let Some(first) = self.rx.recv().await else {
            return Vec::new();
        };
        let mut batch = vec![first];
        while batch.len() < max_batch {
            match self.rx.try_recv() {
                Ok(m) => batch.push(m),
                Err(_) => break,
            }
        }
        batch
    }
}

impl Default for MutationQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> WantConfig {
        WantConfig {
            name: name.to_string(),
            want_type: Some("prime numbers".to_string()),
            id: None,
            labels: Default::default(),
            owner_references: Vec::new(),
            spec: Spec::default(),
        }
    }

    #[test]
    fn config_without_type_or_recipe_rejected() {
        let mut cfg = config("g");
        cfg.want_type = None;
        let err = cfg.into_want().unwrap_err();
        assert!(matches!(err, crate::error::ConfigError::MissingField { .. }));
    }

    #[test]
    fn config_with_recipe_uses_recipe_as_type() {
        let mut cfg = config("g");
        cfg.want_type = None;
        cfg.spec.recipe = Some("level 1 approval".to_string());
        let want = cfg.into_want().unwrap();
        assert_eq!(want.metadata.want_type, "level 1 approval");
    }

    #[tokio::test]
    async fn submit_and_drain_roundtrip() {
        let mut queue = MutationQueue::new();
        let sender = queue.sender();

        let handle = tokio::spawn(async move {
            sender.submit(MutationKind::Create(vec![config("g")])).await
        });

        let batch = queue.recv_batch(10).await;
        assert_eq!(batch.len(), 1);
        let mutation = batch.into_iter().next().unwrap();
        assert!(matches!(mutation.kind, MutationKind::Create(_)));
        let correlation_id = mutation.correlation_id;
        mutation.reply.send(Ok(MutationReply::Created { correlation_id, ids: vec![Uuid::new_v4()] })).unwrap();

        let result = handle.await.unwrap().unwrap();
        assert!(matches!(result, MutationReply::Created { .. }));
        assert_eq!(result.correlation_id(), correlation_id);
    }

    #[test]
    fn mutation_reply_correlation_id_matches_every_variant() {
        let id = Uuid::new_v4();
        assert_eq!(MutationReply::Created { correlation_id: id, ids: vec![] }.correlation_id(), id);
        assert_eq!(MutationReply::Updated { correlation_id: id, id: Uuid::new_v4() }.correlation_id(), id);
        assert_eq!(MutationReply::Accepted { correlation_id: id }.correlation_id(), id);
    }

    #[test]
    fn try_drain_batch_returns_empty_when_nothing_queued() {
        let mut queue = MutationQueue::new();
        assert!(queue.try_drain_batch(10).is_empty());
    }
}
