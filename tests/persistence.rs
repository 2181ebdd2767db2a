//! Persistence and recovery tests (spec §6.5, §8 round-trip law): a want
//! emitted to the memory-file YAML and reloaded produces a store
//! byte-equal to the original, modulo timestamps, and the reconcile loop
//! resumes from the recorded status rather than restarting the lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use wantengine::engine::{Engine, EngineConfig};
use wantengine::mutation::WantConfig;
use wantengine::reconcile::WantTypeRegistry;
use wantengine::want::{ProgressError, Spec, Status, WantBehavior, WantContext};

fn config(name: &str, want_type: &str) -> WantConfig {
    WantConfig {
        name: name.to_string(),
        want_type: Some(want_type.to_string()),
        id: None,
        labels: HashMap::new(),
        owner_references: Vec::new(),
        spec: Spec::default(),
    }
}

struct Counter;
impl WantBehavior for Counter {
    fn initialize(&self, _ctx: &mut WantContext) -> Result<(), String> {
        Ok(())
    }
    fn progress(&self, ctx: &mut WantContext) -> Result<(), ProgressError> {
        let n = ctx.want.get_state_int("ticks").unwrap_or(0);
        ctx.want.store_state("ticks", Value::from(n + 1));
        Ok(())
    }
    fn is_achieved(&self, _ctx: &WantContext) -> bool {
        false
    }
}

fn types() -> WantTypeRegistry {
    let types = WantTypeRegistry::new();
    types.register("counter", Arc::new(Counter));
    types
}

#[tokio::test]
async fn submitted_want_survives_shutdown_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let memory_file = dir.path().join("memory.yaml");

    let original_id;
    {
        let engine = Engine::start(
            EngineConfig { memory_file: Some(memory_file.clone()), ..EngineConfig::default() },
            types(),
        )
        .await
        .unwrap();

        let ids = engine.create_wants(vec![config("long-running", "counter")]).await.unwrap();
        original_id = ids[0];
        for _ in 0..3 {
            engine.run_tick_now().await;
        }
        let before = engine.get_want(original_id).await.unwrap();
        assert_eq!(before.get_state_int("ticks"), Some(3));

        // Shutdown writes a final snapshot (spec §6.5).
        engine.shutdown().await;
    }

    assert!(tokio::fs::try_exists(&memory_file).await.unwrap());

    {
        let engine = Engine::start(
            EngineConfig { memory_file: Some(memory_file.clone()), ..EngineConfig::default() },
            types(),
        )
        .await
        .unwrap();

        let reloaded = engine.get_want(original_id).await.expect("want should be present after reload");
        assert_eq!(reloaded.metadata.name, "long-running");
        assert_eq!(reloaded.status, Status::Reaching);
        assert_eq!(reloaded.get_state_int("ticks"), Some(3));

        // Reconciling further resumes from the recorded state rather than
        // restarting the lifecycle from `created`.
        engine.run_tick_now().await;
        let advanced = engine.get_want(original_id).await.unwrap();
        assert_eq!(advanced.get_state_int("ticks"), Some(4));

        engine.shutdown().await;
    }
}

#[tokio::test]
async fn periodic_persistence_daemon_writes_snapshots_without_blocking_reconcile() {
    let dir = tempfile::tempdir().unwrap();
    let memory_file = dir.path().join("memory.yaml");

    let engine = Engine::start(
        EngineConfig {
            memory_file: Some(memory_file.clone()),
            persistence_interval: Duration::from_millis(20),
            ..EngineConfig::default()
        },
        types(),
    )
    .await
    .unwrap();

    let ids = engine.create_wants(vec![config("bg", "counter")]).await.unwrap();
    for _ in 0..3 {
        engine.run_tick_now().await;
    }

    tokio::time::sleep(Duration::from_millis(80)).await;
    let contents = tokio::fs::read_to_string(&memory_file).await.unwrap();
    assert!(contents.contains("bg"));
    assert!(contents.contains(&ids[0].to_string()));

    engine.shutdown().await;
}

#[tokio::test]
async fn missing_memory_file_starts_from_an_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let memory_file = dir.path().join("does-not-exist-yet.yaml");

    let engine = Engine::start(
        EngineConfig { memory_file: Some(memory_file), ..EngineConfig::default() },
        types(),
    )
    .await
    .unwrap();

    assert!(engine.list_wants().await.is_empty());
    engine.shutdown().await;
}
