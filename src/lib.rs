// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # wantengine
//!
//! A declarative want-oriented reconciliation engine. Callers submit
//! desired-state records ("wants"); a single reconcile loop drives each one
//! toward achievement by invoking pluggable agents and a user-supplied
//! [`want::WantBehavior`] implementation per want type. Wants are wired
//! together not by explicit edges but by label selectors, recomputed into a
//! live dependency graph every time the store changes structurally.
//!
//! ## Architecture
//!
//! - **Want Store** (`store`): an indexed, concurrently-readable set of
//!   wants, each behind its own async mutex.
//! - **Pub/Sub bus** (`pubsub`): per-producer topics with per-consumer
//!   bounded queues and drop-oldest delivery.
//! - **Agent Registry** (`registry`): capability-matched Do/Monitor/Think
//!   agents, found in registration order.
//! - **Label Resolver** (`resolver`): matches `spec.using` selectors against
//!   `metadata.labels` to produce input/output edges.
//! - **Mutation Queue** (`mutation`): the single FIFO through which every
//!   create/update/delete/suspend/resume/stop/start intent passes.
//! - **Background Agent Host** (`background`): per-want cancellable polling
//!   tasks.
//! - **Scheduler** (`scheduler`): parses `spec.when` into fire schedules.
//! - **Owner/Target** (`owner`): composite-want child aggregation.
//! - **Reconcile Loop** (`reconcile`): the single driver tying all of the
//!   above together on a fixed tick.
//! - **Engine** (`engine`): the public facade — start it, register agents
//!   and want types, submit mutations.
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use wantengine::engine::{Engine, EngineConfig};
//! use wantengine::reconcile::WantTypeRegistry;
//! use wantengine::want::{ProgressError, WantBehavior, WantContext};
//!
//! struct AlwaysDone;
//! impl WantBehavior for AlwaysDone {
//!     fn initialize(&self, _ctx: &mut WantContext) -> Result<(), String> { Ok(()) }
//!     fn progress(&self, _ctx: &mut WantContext) -> Result<(), ProgressError> { Ok(()) }
//!     fn is_achieved(&self, _ctx: &WantContext) -> bool { true }
//! }
//!
//! # async fn run() -> Result<(), wantengine::error::EngineError> {
//! let mut types = WantTypeRegistry::new();
//! types.register("probe", Arc::new(AlwaysDone));
//! let engine = Engine::start(EngineConfig::default(), types).await?;
//! # Ok(())
//! # }
//! ```

pub mod background;
pub mod config;
pub mod engine;
pub mod error;
pub mod mutation;
pub mod owner;
pub mod persistence;
pub mod pubsub;
pub mod reconcile;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod want;
pub mod webhook;

#[cfg(feature = "server")]
pub mod server;
