//! Label Resolver (C4): matches `spec.using` selectors against
//! `metadata.labels` across a store snapshot to produce the live
//! dependency graph. Runs synchronously inside the reconcile loop after
//! any structural mutation — never as a background task, so `Progress()`
//! stays non-blocking (spec §5).

use std::collections::HashMap;

use uuid::Uuid;

use crate::store::WantSnapshot;
use crate::want::selector_matches;

/// Resolved input/output edges for one want.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedEdges {
    /// Ordered by selector index, then by producer creation time. Duplicate
    /// matches across selectors yield duplicate entries (spec §4.4).
    pub inputs: Vec<Uuid>,
    pub outputs: Vec<Uuid>,
}

/// Recomputes `inputs`/`outputs` for every want in the snapshot.
///
/// Complexity is O(|wants| × |selectors|) as required by spec §4.4; no
/// inverted index is built since typical selector counts are small and the
/// snapshot itself is already a full copy.
pub fn resolve(snapshot: &[WantSnapshot]) -> HashMap<Uuid, ResolvedEdges> {
    let mut edges: HashMap<Uuid, ResolvedEdges> = snapshot.iter().map(|w| (w.id, ResolvedEdges::default())).collect();

    for consumer in snapshot {
        for selector in &consumer.using {
            for producer in snapshot {
                if producer.id == consumer.id {
                    // A want never matches itself (spec §4.4).
                    continue;
                }
                if selector_matches(selector, &producer.labels) {
                    edges.get_mut(&consumer.id).unwrap().inputs.push(producer.id);
                    edges.get_mut(&producer.id).unwrap().outputs.push(consumer.id);
                }
            }
        }
    }

    edges
}

/// The subscribe/unsubscribe actions the reconcile loop must apply to the
/// pub/sub bus after an edge recomputation (spec §4.4: "a new input peer
/// triggers a subscribe on the producer's output topic; a removed peer
/// triggers unsubscribe").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeDiff {
    /// (producer topic, consumer id) pairs to subscribe.
    pub to_subscribe: Vec<(Uuid, Uuid)>,
    /// (producer topic, consumer id) pairs to unsubscribe.
    pub to_unsubscribe: Vec<(Uuid, Uuid)>,
}

pub fn diff_inputs(
    previous: &HashMap<Uuid, ResolvedEdges>,
    current: &HashMap<Uuid, ResolvedEdges>,
) -> EdgeDiff {
    let mut to_subscribe = Vec::new();
    let mut to_unsubscribe = Vec::new();

    for (consumer, edges) in current {
        let before: std::collections::HashSet<&Uuid> =
            previous.get(consumer).map(|e| e.inputs.iter().collect()).unwrap_or_default();
        let after: std::collections::HashSet<&Uuid> = edges.inputs.iter().collect();

        for producer in after.difference(&before) {
            to_subscribe.push((**producer, *consumer));
        }
        for producer in before.difference(&after) {
            to_unsubscribe.push((**producer, *consumer));
        }
    }

    EdgeDiff { to_subscribe, to_unsubscribe }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap as Map;

    fn snap(id: Uuid, labels: &[(&str, &str)], using: Vec<Map<String, String>>) -> WantSnapshot {
        WantSnapshot {
            id,
            name: id.to_string(),
            want_type: "test".to_string(),
            created_at: Utc::now(),
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            using,
            status: crate::want::Status::Idle,
            is_system_want: false,
        }
    }

    fn selector(pairs: &[(&str, &str)]) -> Map<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn matching_selector_produces_input_and_output_edge() {
        let producer = Uuid::new_v4();
        let consumer = Uuid::new_v4();
        let snapshot = vec![
            snap(producer, &[("role", "gen")], vec![]),
            snap(consumer, &[], vec![selector(&[("role", "gen")])]),
        ];
        let edges = resolve(&snapshot);
        assert_eq!(edges[&consumer].inputs, vec![producer]);
        assert_eq!(edges[&producer].outputs, vec![consumer]);
    }

    #[test]
    fn empty_selector_matches_nothing() {
        let producer = Uuid::new_v4();
        let consumer = Uuid::new_v4();
        let snapshot = vec![
            snap(producer, &[("role", "gen")], vec![]),
            snap(consumer, &[], vec![Map::new()]),
        ];
        let edges = resolve(&snapshot);
        assert!(edges[&consumer].inputs.is_empty());
    }

    #[test]
    fn want_never_matches_itself() {
        let id = Uuid::new_v4();
        let snapshot = vec![snap(id, &[("role", "gen")], vec![selector(&[("role", "gen")])])];
        let edges = resolve(&snapshot);
        assert!(edges[&id].inputs.is_empty());
    }

    #[test]
    fn duplicate_selectors_yield_duplicate_inputs() {
        let producer = Uuid::new_v4();
        let consumer = Uuid::new_v4();
        let snapshot = vec![
            snap(producer, &[("role", "gen")], vec![]),
            snap(
                consumer,
                &[],
                vec![selector(&[("role", "gen")]), selector(&[("role", "gen")])],
            ),
        ];
        let edges = resolve(&snapshot);
        assert_eq!(edges[&consumer].inputs, vec![producer, producer]);
    }

    #[test]
    fn diff_detects_relabeled_producer_as_unsubscribe_and_subscribe() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let before = vec![
            snap(a, &[("k", "v1")], vec![]),
            snap(b, &[], vec![selector(&[("k", "v1")])]),
        ];
        let before_edges = resolve(&before);

        let after = vec![snap(a, &[("k", "v2")], vec![]), snap(b, &[], vec![selector(&[("k", "v1")])])];
        let after_edges = resolve(&after);

        let diff = diff_inputs(&before_edges, &after_edges);
        assert_eq!(diff.to_unsubscribe, vec![(a, b)]);
        assert!(diff.to_subscribe.is_empty());
        assert!(after_edges[&b].inputs.is_empty());
    }
}
