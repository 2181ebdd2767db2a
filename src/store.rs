//! Want Store (C3): an in-memory indexed set of wants keyed by ID, with a
//! secondary name index and per-want locks. Modeled on the teacher's
//! bidirectional `SymbolRegistry` (two `DashMap`s, one per direction).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::want::Want;

/// A want plus the mutex that serialises `Progress()` with background-agent
/// bodies on the same want (spec §4.6, §5).
pub struct WantRecord {
    pub want: Mutex<Want>,
}

/// In-memory indexed set of wants. Readers may enumerate concurrently;
/// structural writes (insert/remove) serialise through the `DashMap`'s own
/// per-shard locks, matching the "global store mutex protects
/// insertion/deletion" note in spec §4.3 closely enough for a single-process
/// engine with no distributed concerns.
pub struct WantStore {
    by_id: DashMap<Uuid, Arc<WantRecord>>,
    name_to_id: DashMap<String, Uuid>,
}

impl WantStore {
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            name_to_id: DashMap::new(),
        }
    }

    pub fn insert(&self, want: Want) -> Result<Uuid, StoreError> {
        let id = want.metadata.id;
        let name = want.metadata.name.clone();

        if let Some(existing) = self.name_to_id.get(&name) {
            if *existing.value() != id {
                return Err(StoreError::DuplicateName {
                    name,
                    id: existing.value().to_string(),
                });
            }
        }

        self.name_to_id.insert(name, id);
        self.by_id.insert(id, Arc::new(WantRecord { want: Mutex::new(want) }));
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<WantRecord>> {
        self.by_id.get(&id).map(|r| Arc::clone(r.value()))
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<WantRecord>> {
        let id = *self.name_to_id.get(name)?.value();
        self.get(id)
    }

    pub fn remove(&self, id: Uuid) -> Option<Arc<WantRecord>> {
        let removed = self.by_id.remove(&id).map(|(_, v)| v);
        if removed.is_some() {
            self.name_to_id.retain(|_, v| *v != id);
        }
        removed
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn all_ids(&self) -> Vec<Uuid> {
        self.by_id.iter().map(|e| *e.key()).collect()
    }

    /// A point-in-time snapshot of (id, labels, using-selectors) used by the
    /// label resolver (C4) and by reconcile-loop iteration ordering. Takes
    /// the async lock on every want, so it is only called from contexts
    /// already on the engine's single reconcile task.
    pub async fn snapshot(&self) -> Vec<WantSnapshot> {
        let mut out = Vec::with_capacity(self.by_id.len());
        for entry in self.by_id.iter() {
            let id = *entry.key();
            let record = Arc::clone(entry.value());
            let guard = record.want.lock().await;
            out.push(WantSnapshot {
                id,
                name: guard.metadata.name.clone(),
                want_type: guard.metadata.want_type.clone(),
                created_at: guard.metadata.created_at,
                labels: guard.metadata.labels.clone(),
                using: guard.spec.using.clone(),
                status: guard.status,
                is_system_want: guard.metadata.is_system_want,
            });
        }
        out.sort_by_key(|s| s.created_at);
        out
    }

    /// `snapshot()` narrowed by a `WantFilter` (spec §6.2 `listWants`).
    pub async fn snapshot_filtered(&self, filter: &WantFilter) -> Vec<WantSnapshot> {
        self.snapshot().await.into_iter().filter(|s| filter.matches(s)).collect()
    }
}

impl Default for WantStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WantSnapshot {
    pub id: Uuid,
    pub name: String,
    pub want_type: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub labels: HashMap<String, String>,
    pub using: Vec<crate::want::Selector>,
    pub status: crate::want::Status,
    pub is_system_want: bool,
}

/// `listWants(filter)` criteria (spec §6.2): `type`, a single `label k=v`,
/// and whether to include wants the engine marks as system-owned. All
/// three are optional and AND together; an absent filter matches anything.
#[derive(Debug, Clone, Default)]
pub struct WantFilter {
    pub want_type: Option<String>,
    pub label: Option<(String, String)>,
    pub include_system_wants: bool,
}

impl WantFilter {
    fn matches(&self, snap: &WantSnapshot) -> bool {
        if !self.include_system_wants && snap.is_system_want {
            return false;
        }
        if let Some(want_type) = &self.want_type {
            if &snap.want_type != want_type {
                return false;
            }
        }
        if let Some((key, value)) = &self.label {
            if snap.labels.get(key) != Some(value) {
                return false;
            }
        }
        true
    }
}
