//! Persisted tier layout.
//!
//! Every tier holds the same shape, keyed by node id:
//!
//! ```json
//! { "order-mgmt-agent": {
//!     "traces": { "<trace id>": { "traceGroup": {..}, "lastUpdated": .., "isComplete": .. } },
//!     "lastUpdated": ..,
//!     "sessionId": ".."
//! } }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use traceflow_types::TraceGroup;

use crate::eviction::EvictionPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    pub trace_group: TraceGroup,
    pub last_updated: DateTime<Utc>,
    pub is_complete: bool,
}

impl TraceRecord {
    pub fn new(group: &TraceGroup) -> Self {
        Self {
            trace_group: group.clone(),
            last_updated: group.last_update_time,
            is_complete: group.is_complete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    #[serde(default)]
    pub traces: BTreeMap<String, TraceRecord>,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl NodeRecord {
    fn empty(now: DateTime<Utc>) -> Self {
        Self {
            traces: BTreeMap::new(),
            last_updated: now,
            session_id: None,
        }
    }

    /// Records newest first. Ties break on trace id so the order is total.
    pub fn newest_first(&self) -> Vec<&TraceRecord> {
        let mut records: Vec<&TraceRecord> = self.traces.values().collect();
        records.sort_by(|a, b| {
            b.last_updated
                .cmp(&a.last_updated)
                .then_with(|| b.trace_group.id.cmp(&a.trace_group.id))
        });
        records
    }

    /// The node's dominant trace: the most recently updated one.
    pub fn latest(&self) -> Option<&TraceRecord> {
        self.newest_first().into_iter().next()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}

/// Node-keyed trace records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeMap(pub BTreeMap<String, NodeRecord>);

impl NodeMap {
    pub fn node(&self, node_id: &str) -> Option<&NodeRecord> {
        self.0.get(node_id)
    }

    pub fn trace_count(&self, node_id: &str) -> usize {
        self.node(node_id).map_or(0, |n| n.traces.len())
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(NodeRecord::is_empty)
    }

    /// Insert or replace `group` under `node_id`.
    ///
    /// Without `preserve` the node's previous traces are dropped first.
    pub fn upsert(
        &mut self,
        node_id: &str,
        group: &TraceGroup,
        session_id: Option<&str>,
        preserve: bool,
    ) {
        let record = self
            .0
            .entry(node_id.to_string())
            .or_insert_with(|| NodeRecord::empty(group.last_update_time));
        if !preserve {
            record.traces.clear();
        }
        record
            .traces
            .insert(group.id.clone(), TraceRecord::new(group));
        record.last_updated = record.last_updated.max(group.last_update_time);
        if let Some(session) = session_id.or(group.session_id.as_deref()) {
            record.session_id = Some(session.to_string());
        }
    }

    /// Apply `policy` to one node. Returns the number of traces dropped.
    pub fn evict(
        &mut self,
        node_id: &str,
        policy: &dyn EvictionPolicy,
        now: DateTime<Utc>,
    ) -> usize {
        let Some(record) = self.0.get_mut(node_id) else {
            return 0;
        };
        let victims = policy.victims(record, now);
        for id in &victims {
            record.traces.remove(id);
        }
        victims.len()
    }

    /// Apply `policy` to every node, dropping nodes left empty.
    pub fn evict_all(&mut self, policy: &dyn EvictionPolicy, now: DateTime<Utc>) -> usize {
        let nodes: Vec<String> = self.0.keys().cloned().collect();
        let dropped: usize = nodes
            .iter()
            .map(|node| self.evict(node, policy, now))
            .sum();
        self.0.retain(|_, record| !record.is_empty());
        dropped
    }

    /// Keep only the node's most recent trace.
    pub fn prune_to_latest(&mut self, node_id: &str) {
        let Some(record) = self.0.get_mut(node_id) else {
            return;
        };
        let Some(keep) = record.latest().map(|r| r.trace_group.id.clone()) else {
            return;
        };
        record.traces.retain(|id, _| *id == keep);
    }

    /// Drop every trace not belonging to `session_id`.
    pub fn retain_session(&mut self, session_id: &str) {
        for record in self.0.values_mut() {
            let node_session = record.session_id.clone();
            record.traces.retain(|_, trace| {
                trace
                    .trace_group
                    .session_id
                    .as_deref()
                    .or(node_session.as_deref())
                    == Some(session_id)
            });
        }
        self.0.retain(|_, record| !record.is_empty());
    }

    /// Drop every trace belonging to `session_id`.
    pub fn remove_session(&mut self, session_id: &str) {
        for record in self.0.values_mut() {
            record
                .traces
                .retain(|_, trace| trace.trace_group.session_id.as_deref() != Some(session_id));
        }
        self.0.retain(|_, record| !record.is_empty());
    }

    pub fn remove_node(&mut self, node_id: &str) -> bool {
        self.0.remove(node_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use traceflow_types::AgentId;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 2, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn group(id: &str, session: &str, secs: i64) -> TraceGroup {
        let mut group = TraceGroup::new(id, AgentId::OrderManagement, "OrderManagement", at(0));
        group.last_update_time = at(secs);
        group.session_id = Some(session.to_string());
        group
    }

    #[test]
    fn test_upsert_without_preserve_replaces() {
        let mut map = NodeMap::default();
        map.upsert("order-mgmt-agent", &group("t1", "s", 1), None, true);
        map.upsert("order-mgmt-agent", &group("t2", "s", 2), None, true);
        assert_eq!(map.trace_count("order-mgmt-agent"), 2);

        map.upsert("order-mgmt-agent", &group("t3", "s", 3), None, false);
        assert_eq!(map.trace_count("order-mgmt-agent"), 1);
        let node = map.node("order-mgmt-agent").unwrap();
        assert_eq!(node.latest().unwrap().trace_group.id, "t3");
        assert_eq!(node.session_id.as_deref(), Some("s"));
    }

    #[test]
    fn test_prune_to_latest() {
        let mut map = NodeMap::default();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            map.upsert("n", &group(id, "s", i as i64), None, true);
        }
        map.prune_to_latest("n");
        let node = map.node("n").unwrap();
        assert_eq!(node.traces.keys().collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn test_retain_and_remove_session() {
        let mut map = NodeMap::default();
        map.upsert("n", &group("old", "s1", 1), None, true);
        map.upsert("n", &group("new", "s2", 2), None, true);
        map.upsert("m", &group("other", "s1", 3), None, true);

        let mut kept = map.clone();
        kept.retain_session("s2");
        assert_eq!(kept.trace_count("n"), 1);
        assert!(kept.node("m").is_none());

        map.remove_session("s2");
        assert_eq!(map.trace_count("n"), 1);
        assert_eq!(map.trace_count("m"), 1);
    }

    #[test]
    fn test_persisted_layout_is_camel_case() {
        let mut map = NodeMap::default();
        map.upsert("n", &group("t1", "s", 1), Some("s"), true);
        let value = serde_json::to_value(&map).unwrap();
        let record = &value["n"];
        assert!(record["lastUpdated"].is_string());
        assert_eq!(record["sessionId"], "s");
        assert_eq!(record["traces"]["t1"]["isComplete"], false);
        assert_eq!(record["traces"]["t1"]["traceGroup"]["id"], "t1");
    }
}
