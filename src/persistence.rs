//! Persistence (spec §6.5): periodic YAML memory-file snapshots.
//!
//! The teacher persists its own domain via `redb`/`bincode` tiers
//! (`store/durable.rs`); here the spec is explicit that the durable tier is
//! a flat advisory YAML file, not a KV store, so this module writes
//! `{wants: [Want]}` directly rather than adapting the tiered store.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::want::Want;

#[derive(Debug, Serialize, Deserialize, Default)]
struct Snapshot {
    #[serde(default)]
    wants: Vec<Want>,
}

/// Serializes the given wants to `path` as `{wants: [Want]}` YAML.
pub async fn save_snapshot(path: &Path, wants: Vec<Want>) -> Result<(), PersistenceError> {
    let snapshot = Snapshot { wants };
    let yaml = serde_yaml::to_string(&snapshot).map_err(|e| PersistenceError::Serialize { message: e.to_string() })?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| PersistenceError::Io { path: path.display().to_string(), source })?;
    }
    let tmp_path = path.with_extension("yaml.tmp");
    tokio::fs::write(&tmp_path, yaml)
        .await
        .map_err(|source| PersistenceError::Io { path: tmp_path.display().to_string(), source })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|source| PersistenceError::Io { path: path.display().to_string(), source })?;
    Ok(())
}

/// Loads wants from a memory file. Missing file is not an error — the
/// engine starts from an empty store (the file is advisory per spec §6.5).
pub async fn load_snapshot(path: &Path) -> Result<Vec<Want>, PersistenceError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let snapshot: Snapshot = serde_yaml::from_str(&contents).map_err(|e| PersistenceError::Deserialize {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            Ok(snapshot.wants)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(source) => Err(PersistenceError::Io { path: path.display().to_string(), source }),
    }
}

/// Drives periodic snapshot writes on a `tokio::time::interval`, stopping
/// when `shutdown` fires. Owned by the engine, not the reconcile loop,
/// since persistence is advisory and must never block reconciliation.
pub struct PersistenceDaemon {
    path: PathBuf,
    interval: std::time::Duration,
}

impl PersistenceDaemon {
    pub fn new(path: impl Into<PathBuf>, interval: std::time::Duration) -> Self {
        Self { path: path.into(), interval }
    }

    pub async fn run<F, Fut>(&self, mut snapshot_source: F, mut shutdown: tokio::sync::watch::Receiver<bool>)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Vec<Want>>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let wants = snapshot_source().await;
                    if let Err(e) = save_snapshot(&self.path, wants).await {
                        tracing::warn!(error = %e, path = %self.path.display(), "periodic snapshot failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::want::Spec;

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.yaml");
        let wants = load_snapshot(&path).await.unwrap();
        assert!(wants.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.yaml");
        let want = Want::new("g", "prime numbers", Spec::default());
        let id = want.metadata.id;
        save_snapshot(&path, vec![want]).await.unwrap();

        let loaded = load_snapshot(&path).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].metadata.id, id);
    }

    #[tokio::test]
    async fn corrupt_file_surfaces_deserialize_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.yaml");
        tokio::fs::write(&path, "not: [valid, want, schema: broken").await.unwrap();
        let err = load_snapshot(&path).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Deserialize { .. }));
    }
}
