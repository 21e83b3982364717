use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use traceflow_types::{AgentId, TraceGroup, trace_hash};

use crate::breaker::{BreakerState, CircuitBreaker, DEFAULT_FAILURE_THRESHOLD};
use crate::eviction::{MaxAge, MaxCount};
use crate::kv::{KvBackend, MemoryKv};
use crate::ownership::OwnershipPolicy;
use crate::tier::NodeMap;
use crate::Result;

/// Backend key of the tier that survives a reload: `{ node_id: NodeRecord }`.
pub const RELOAD_TIER_KEY: &str = "agent-trace-cache";
/// Backend key of the per-session tier: `{ session_id: { node_id: NodeRecord } }`.
pub const SESSION_TIER_KEY: &str = "current-session-traces";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Per-node cap; the oldest traces are evicted first
    pub max_traces_per_node: usize,
    /// Traces not updated for this long are dropped by the sweep
    pub max_age_secs: i64,
    /// Consecutive durable write failures before recovery kicks in
    pub failure_threshold: u32,
    /// Wipe durable tiers when a process context starts
    pub clear_on_init: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_traces_per_node: 10,
            max_age_secs: 30 * 60,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            clear_on_init: true,
        }
    }
}

/// A change of a node's dominant trace, reported once per logical update.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceChange {
    pub node: AgentId,
    pub trace_group: TraceGroup,
    pub trace_hash: String,
}

/// Memory and session-tier contents captured before a reset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub memory: NodeMap,
    pub sessions: BTreeMap<String, NodeMap>,
    pub floor: Option<DateTime<Utc>>,
}

impl StoreSnapshot {
    pub fn is_empty(&self) -> bool {
        self.memory.is_empty() && self.sessions.values().all(NodeMap::is_empty)
    }
}

/// One best-effort durable tier behind a circuit breaker.
struct DurableTier {
    name: &'static str,
    key: &'static str,
    backend: Box<dyn KvBackend>,
    breaker: CircuitBreaker,
}

impl DurableTier {
    fn new(
        name: &'static str,
        key: &'static str,
        backend: Box<dyn KvBackend>,
        threshold: u32,
    ) -> Self {
        Self {
            name,
            key,
            backend,
            breaker: CircuitBreaker::new(threshold),
        }
    }

    /// Current contents; unreadable tiers load as empty.
    fn load<T: DeserializeOwned + Default>(&self) -> T {
        let raw = match self.backend.read(self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return T::default(),
            Err(err) => {
                tracing::warn!(tier = self.name, error = %err, "failed to read durable tier");
                return T::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|err| {
            tracing::warn!(tier = self.name, error = %err, "discarding unreadable durable tier");
            T::default()
        })
    }

    fn write<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.backend.write(self.key, &raw)
    }

    /// Write `value`. Once the breaker opens, shrink it with `prune` and
    /// retry once; if that fails too the whole tier is cleared.
    fn persist<T: Serialize>(&mut self, value: &mut T, prune: impl FnOnce(&mut T)) {
        let Err(err) = self.write(value) else {
            self.breaker.record_success();
            return;
        };
        let state = self.breaker.record_failure();
        tracing::warn!(
            tier = self.name,
            error = %err,
            failures = self.breaker.failures(),
            "durable write failed"
        );
        if state == BreakerState::Closed {
            return;
        }

        prune(value);
        match self.write(value) {
            Ok(()) => {
                self.breaker.record_success();
                tracing::info!(tier = self.name, "durable write recovered after pruning");
            }
            Err(err) => {
                tracing::warn!(tier = self.name, error = %err, "clearing durable tier");
                self.clear();
            }
        }
    }

    fn clear(&mut self) {
        if let Err(err) = self.backend.remove(self.key) {
            tracing::warn!(tier = self.name, error = %err, "failed to clear durable tier");
        }
        self.breaker.reset();
    }

    fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

/// Three-tier trace cache keyed by node.
///
/// The memory tier is the source of truth while a session runs. The session
/// tier mirrors it per session id; the reload tier keeps the latest traces
/// per node so a restarted host can show them again. Durable writes are
/// best-effort and never fail a `put`.
pub struct TraceStore {
    config: StoreConfig,
    ownership: OwnershipPolicy,
    memory: NodeMap,
    session: DurableTier,
    reload: DurableTier,
    /// Reload-tier traces older than this belong to a previous session.
    floor: Option<DateTime<Utc>>,
    last_notified: HashMap<String, String>,
    revision: u64,
}

impl TraceStore {
    pub fn new(
        config: StoreConfig,
        ownership: OwnershipPolicy,
        session_backend: Box<dyn KvBackend>,
        reload_backend: Box<dyn KvBackend>,
    ) -> Self {
        let threshold = config.failure_threshold;
        Self {
            config,
            ownership,
            memory: NodeMap::default(),
            session: DurableTier::new("session", SESSION_TIER_KEY, session_backend, threshold),
            reload: DurableTier::new("reload", RELOAD_TIER_KEY, reload_backend, threshold),
            floor: None,
            last_notified: HashMap::new(),
            revision: 0,
        }
    }

    /// Store with both durable tiers held in process memory.
    pub fn in_memory(config: StoreConfig, ownership: OwnershipPolicy) -> Self {
        Self::new(
            config,
            ownership,
            Box::new(MemoryKv::new()),
            Box::new(MemoryKv::new()),
        )
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn ownership(&self) -> &OwnershipPolicy {
        &self.ownership
    }

    pub fn belongs_to(&self, node: AgentId, group: &TraceGroup) -> bool {
        self.ownership.belongs_to(node, group)
    }

    fn cap(&self) -> MaxCount {
        MaxCount(self.config.max_traces_per_node)
    }

    /// Record `group` for `node`.
    ///
    /// `preserve` defaults to true only for the customer node; otherwise the
    /// node's previous traces are replaced. Returns a change when the write
    /// moved the node's dominant trace and that change was not reported yet.
    pub fn put(
        &mut self,
        node: AgentId,
        group: &TraceGroup,
        session_id: Option<&str>,
        preserve: Option<bool>,
    ) -> Option<TraceChange> {
        let preserve = preserve.unwrap_or(node == AgentId::Customer);
        let node_id = node.node_id();
        let session_id = session_id.or(group.session_id.as_deref());
        let cap = self.cap();
        let now = group.last_update_time;

        self.memory.upsert(node_id, group, session_id, preserve);
        self.memory.evict(node_id, &cap, now);
        self.revision += 1;

        let mut reload: NodeMap = self.reload.load();
        reload.upsert(node_id, group, session_id, preserve);
        reload.evict(node_id, &cap, now);
        self.reload
            .persist(&mut reload, |map| map.prune_to_latest(node_id));

        if let Some(session) = session_id {
            let mut sessions: BTreeMap<String, NodeMap> = self.session.load();
            let map = sessions.entry(session.to_string()).or_default();
            map.upsert(node_id, group, Some(session), preserve);
            map.evict(node_id, &cap, now);
            self.session.persist(&mut sessions, |all| {
                if let Some(map) = all.get_mut(session) {
                    map.prune_to_latest(node_id);
                }
            });
        }

        self.notify(node, &group.id)
    }

    fn notify(&mut self, node: AgentId, written_id: &str) -> Option<TraceChange> {
        let node_id = node.node_id();
        let dominant = self.memory.node(node_id)?.latest()?;
        if dominant.trace_group.id != written_id {
            return None;
        }
        let trace_group = dominant.trace_group.clone();
        let hash = trace_hash(node_id, &trace_group.id, trace_group.last_update_time);
        if self.last_notified.get(node_id) == Some(&hash) {
            tracing::debug!(
                node = node_id,
                trace = %trace_group.id,
                "unchanged trace, no notification"
            );
            return None;
        }
        self.last_notified.insert(node_id.to_string(), hash.clone());
        Some(TraceChange {
            node,
            trace_group,
            trace_hash: hash,
        })
    }

    /// Trace group to show on `node`.
    ///
    /// With a `trace_id` that exact group is returned (subject to ownership
    /// when `strict`). Without one, the most recent group the node owns.
    /// When nothing passes in strict mode, the customer and supervisor nodes
    /// fall back to their most recent group; specialists get `None`.
    pub fn get(
        &mut self,
        node: AgentId,
        trace_id: Option<&str>,
        strict: bool,
    ) -> Option<TraceGroup> {
        self.backfill(node);
        let record = self.memory.node(node.node_id())?;

        if let Some(id) = trace_id {
            let group = &record.traces.get(id)?.trace_group;
            return (!strict || self.ownership.belongs_to(node, group)).then(|| group.clone());
        }

        let candidates = record.newest_first();
        if node == AgentId::Customer
            && let Some(message) = candidates.iter().find(|r| r.trace_group.is_user_message())
        {
            return Some(message.trace_group.clone());
        }
        if !strict {
            return candidates.first().map(|r| r.trace_group.clone());
        }
        if let Some(owned) = candidates
            .iter()
            .find(|r| self.ownership.belongs_to(node, &r.trace_group))
        {
            return Some(owned.trace_group.clone());
        }
        if matches!(node, AgentId::Customer | AgentId::Supervisor) {
            tracing::debug!(node = node.node_id(), "no owned trace, using most recent");
            return candidates.first().map(|r| r.trace_group.clone());
        }
        None
    }

    /// Load the node from the reload tier when memory has nothing for it.
    fn backfill(&mut self, node: AgentId) {
        let node_id = node.node_id();
        if self.memory.trace_count(node_id) > 0 {
            return;
        }
        let reload: NodeMap = self.reload.load();
        let Some(mut record) = reload.node(node_id).cloned() else {
            return;
        };
        if let Some(floor) = self.floor {
            record.traces.retain(|_, r| r.last_updated >= floor);
        }
        if record.is_empty() {
            return;
        }
        tracing::debug!(
            node = node_id,
            traces = record.traces.len(),
            "backfilled from reload tier"
        );
        self.memory.0.insert(node_id.to_string(), record);
    }

    /// Every trace recorded for `node`, newest first.
    pub fn all_traces(&mut self, node: AgentId) -> Vec<TraceGroup> {
        self.backfill(node);
        self.memory
            .node(node.node_id())
            .map(|record| {
                record
                    .newest_first()
                    .into_iter()
                    .map(|r| r.trace_group.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Traces of every node that has any.
    pub fn all_agent_traces(&mut self) -> BTreeMap<AgentId, Vec<TraceGroup>> {
        AgentId::ALL
            .iter()
            .map(|&node| (node, self.all_traces(node)))
            .filter(|(_, traces)| !traces.is_empty())
            .collect()
    }

    pub fn clear_node(&mut self, node: AgentId) {
        let node_id = node.node_id();
        self.memory.remove_node(node_id);
        self.last_notified.remove(node_id);
        self.revision += 1;

        let mut reload: NodeMap = self.reload.load();
        if reload.remove_node(node_id) {
            self.reload.persist(&mut reload, |_| {});
        }
        let mut sessions: BTreeMap<String, NodeMap> = self.session.load();
        let mut touched = false;
        for map in sessions.values_mut() {
            touched |= map.remove_node(node_id);
        }
        if touched {
            self.session.persist(&mut sessions, |_| {});
        }
    }

    /// Clear every tier, or only the traces of one session.
    pub fn clear_all(&mut self, session_id: Option<&str>) {
        self.revision += 1;
        let Some(session) = session_id else {
            self.memory = NodeMap::default();
            self.last_notified.clear();
            self.reload.clear();
            self.session.clear();
            tracing::info!("cleared all trace tiers");
            return;
        };

        self.memory.remove_session(session);
        let mut reload: NodeMap = self.reload.load();
        reload.remove_session(session);
        self.reload.persist(&mut reload, |_| {});

        let mut sessions: BTreeMap<String, NodeMap> = self.session.load();
        if sessions.remove(session).is_some() {
            self.session.persist(&mut sessions, |_| {});
        }
        tracing::info!(session, "cleared session traces");
    }

    /// Drop traces older than the configured max age from every tier.
    /// Returns how many were dropped from memory and the reload tier.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> usize {
        let policy = MaxAge(Duration::seconds(self.config.max_age_secs));

        let mut dropped = self.memory.evict_all(&policy, now);
        if dropped > 0 {
            self.revision += 1;
        }

        let mut reload: NodeMap = self.reload.load();
        let from_reload = reload.evict_all(&policy, now);
        if from_reload > 0 {
            self.reload.persist(&mut reload, |_| {});
        }
        dropped += from_reload;

        let mut sessions: BTreeMap<String, NodeMap> = self.session.load();
        let from_sessions: usize = sessions
            .values_mut()
            .map(|map| map.evict_all(&policy, now))
            .sum();
        if from_sessions > 0 {
            sessions.retain(|_, map| !map.is_empty());
            self.session.persist(&mut sessions, |_| {});
        }

        if dropped > 0 {
            tracing::debug!(dropped, "swept expired traces");
        }
        dropped
    }

    /// Shrink the durable tiers to the traces of `current_session`.
    pub fn collapse_idle(&mut self, current_session: &str) {
        let mut reload: NodeMap = self.reload.load();
        reload.retain_session(current_session);
        self.reload.persist(&mut reload, |_| {});

        let mut sessions: BTreeMap<String, NodeMap> = self.session.load();
        sessions.retain(|session, _| session == current_session);
        self.session.persist(&mut sessions, |_| {});
        tracing::debug!(session = current_session, "collapsed durable tiers to current session");
    }

    pub fn clear_reload_tier(&mut self) {
        self.reload.clear();
    }

    /// Capture memory and the session tier.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            memory: self.memory.clone(),
            sessions: self.session.load(),
            floor: self.floor,
        }
    }

    /// Start a fresh session at `now`.
    ///
    /// Memory and the session tier are cleared; reload-tier traces last
    /// updated before `now` are no longer backfilled. Returns what was
    /// cleared so it can be restored.
    pub fn reset_session(&mut self, now: DateTime<Utc>) -> StoreSnapshot {
        let snapshot = self.snapshot();
        self.memory = NodeMap::default();
        self.session.clear();
        self.floor = Some(now);
        self.last_notified.clear();
        self.revision += 1;
        tracing::info!(at = %now, "trace store reset for new session");
        snapshot
    }

    pub fn restore(&mut self, snapshot: StoreSnapshot) {
        let StoreSnapshot {
            memory,
            mut sessions,
            floor,
        } = snapshot;
        self.memory = memory;
        self.floor = floor;
        self.last_notified.clear();
        self.revision += 1;
        self.session.persist(&mut sessions, |_| {});
    }

    /// Bumped on every change to the memory tier.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Digest of every node's dominant trace. Equal digests mean nothing a
    /// presentation adapter would render has changed.
    pub fn change_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (node_id, record) in &self.memory.0 {
            if let Some(latest) = record.latest() {
                hasher.update(trace_hash(
                    node_id,
                    &latest.trace_group.id,
                    latest.last_updated,
                ));
                hasher.update([u8::from(latest.is_complete)]);
            }
        }
        format!("{:x}", hasher.finalize())
    }

    /// Consecutive failures of the (session, reload) tier breakers.
    pub fn breaker_failures(&self) -> (u32, u32) {
        (self.session.breaker().failures(), self.reload.breaker().failures())
    }
}

impl Default for TraceStore {
    fn default() -> Self {
        Self::in_memory(StoreConfig::default(), OwnershipPolicy::default())
    }
}
