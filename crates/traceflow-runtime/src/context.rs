use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::Receiver;
use traceflow_engine::{TraceReducer, classify, group_id_for, normalize_for_display, resolve};
use traceflow_store::{KvBackend, MemoryKv, SqliteKv, StoreSnapshot, TraceChange, TraceStore};
use traceflow_types::{AgentId, RawTrace, TraceGroup};
use uuid::Uuid;

use crate::bus::{EventBus, FlowEvent, SubscriberId};
use crate::config::TraceflowConfig;
use crate::lifecycle::{KillSwitch, LifecycleState};
use crate::timers::{TimerAction, TimerRegistry};
use crate::transport::{MessageRouter, MessageType, is_response_complete, parse_trace_envelope};
use crate::Result;

/// Everything one host process needs to turn inbound payloads into trace
/// groups: reducer working set, store, kill switch, timers and the bus.
///
/// Single-threaded. Each payload runs resolve → reduce → store → notify to
/// completion before the next; time only advances through the `now`
/// arguments and `tick`.
pub struct ProcessContext {
    config: TraceflowConfig,
    reducer: TraceReducer,
    store: TraceStore,
    groups: HashMap<String, TraceGroup>,
    kill_switch: KillSwitch,
    timers: TimerRegistry,
    bus: EventBus,
    router: MessageRouter,
    current_session: Option<String>,
    last_seen_hash: String,
    last_change: DateTime<Utc>,
    last_snapshot: Option<StoreSnapshot>,
    disposed: bool,
}

impl ProcessContext {
    pub fn init(config: TraceflowConfig, now: DateTime<Utc>) -> Result<Self> {
        let session = open_backend(config.cache_path.as_deref())?;
        let reload = open_backend(config.cache_path.as_deref())?;
        let mut store = TraceStore::new(
            config.store.clone(),
            config.ownership.clone(),
            session,
            reload,
        );
        if config.store.clear_on_init {
            store.clear_all(None);
        }

        let mut context = Self {
            reducer: TraceReducer::new(config.reducer),
            timers: TimerRegistry::new(config.lifecycle.max_timers),
            last_seen_hash: store.change_hash(),
            store,
            groups: HashMap::new(),
            kill_switch: KillSwitch::default(),
            bus: EventBus::new(),
            router: MessageRouter::new(),
            current_session: None,
            last_change: now,
            last_snapshot: None,
            disposed: false,
            config,
        };
        context.arm_timers(now);
        tracing::info!(cache = ?context.config.cache_path, "process context initialized");
        Ok(context)
    }

    fn arm_timers(&mut self, now: DateTime<Utc>) {
        let lifecycle = &self.config.lifecycle;
        self.timers.cancel_all();
        self.timers
            .schedule_once(TimerAction::IdleStop, now, lifecycle.idle_timeout());
        self.timers
            .schedule_every(TimerAction::Sweep, now, lifecycle.sweep_interval());
        self.timers
            .schedule_every(TimerAction::PollChanges, now, lifecycle.poll_interval());
    }

    /// Record activity: restart the idle timeout and resume polling.
    fn touch(&mut self, now: DateTime<Utc>) {
        if !self.kill_switch.is_armed() {
            return;
        }
        let lifecycle = &self.config.lifecycle;
        self.timers.cancel_action(TimerAction::IdleStop);
        self.timers
            .schedule_once(TimerAction::IdleStop, now, lifecycle.idle_timeout());
        if !self.timers.is_scheduled(TimerAction::PollChanges) {
            self.timers
                .schedule_every(TimerAction::PollChanges, now, lifecycle.poll_interval());
        }
    }

    /// Fold one trace payload into its session group, store the group on
    /// every node that contributed to it and notify.
    ///
    /// `fallback_id` names the group when the payload carries neither a
    /// session nor a trace id. Payloads are dropped once processing is
    /// complete; a final response starts the freeze.
    pub fn ingest(
        &mut self,
        trace: &RawTrace,
        fallback_id: &str,
        now: DateTime<Utc>,
    ) -> Option<TraceChange> {
        if self.disposed {
            return None;
        }
        if self.kill_switch.is_processing_complete() {
            tracing::debug!("processing complete, dropping payload");
            return None;
        }

        let agent = resolve(trace);
        let group_id = group_id_for(trace, fallback_id);
        let next = self
            .reducer
            .reduce(self.groups.get(&group_id), trace, &group_id, now);
        if let Some(session) = trace.session_id() {
            self.current_session = Some(session.to_string());
        }

        self.bus.publish(FlowEvent::NodeActivated {
            node: agent,
            trace_group: next.clone(),
            no_animation: !self.kill_switch.is_armed(),
        });
        let mut changes = Vec::new();
        for node in contributors(&next) {
            let change = self.store.put(node, &next, trace.session_id(), None);
            self.bus.publish(FlowEvent::NodeProcessingStateChanged {
                node,
                is_processing: !next.is_complete,
                processing_complete: next.is_complete,
            });
            if let Some(change) = change {
                self.bus.publish(FlowEvent::TraceUpdated {
                    node: change.node,
                    trace_group: change.trace_group.clone(),
                    trace_hash: change.trace_hash.clone(),
                });
                changes.push(change);
            }
        }
        let change = match changes.iter().position(|c| c.node == agent) {
            Some(index) => Some(changes.swap_remove(index)),
            None => changes.into_iter().next(),
        };
        self.groups.insert(group_id, next);
        self.touch(now);

        if classify(trace).is_final_response() {
            self.freeze(now);
        }
        change
    }

    /// Entry point for raw transport messages.
    pub fn handle_message(
        &mut self,
        connection_id: &str,
        raw: &Value,
        now: DateTime<Utc>,
    ) -> Option<TraceChange> {
        if self.disposed {
            return None;
        }
        self.router.dispatch(connection_id, raw);
        let change =
            parse_trace_envelope(raw).and_then(|trace| self.ingest(&trace, connection_id, now));
        if is_response_complete(raw) {
            self.freeze(now);
        }
        change
    }

    /// Record a message typed by the user. A previous turn is reset first.
    pub fn ingest_user_message(
        &mut self,
        text: &str,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<TraceChange> {
        if self.disposed {
            return None;
        }
        if !self.kill_switch.is_armed() || !self.groups.is_empty() {
            self.reset(now);
        }

        let id = format!("user-message-{}", Uuid::new_v4());
        let mut group = self.reducer.user_message(&id, text, now);
        group.session_id = session_id.map(str::to_string);
        if let Some(session) = session_id {
            self.current_session = Some(session.to_string());
        }

        let change = self.store.put(AgentId::Customer, &group, session_id, None);
        self.bus.publish(FlowEvent::NodeActivated {
            node: AgentId::Customer,
            trace_group: group,
            no_animation: false,
        });
        if let Some(change) = &change {
            self.bus.publish(FlowEvent::TraceUpdated {
                node: change.node,
                trace_group: change.trace_group.clone(),
                trace_hash: change.trace_hash.clone(),
            });
        }
        self.touch(now);
        change
    }

    /// The host finished rendering the final message: stop after the grace
    /// period. Returns false when already stopped or a stop is pending.
    pub fn notify_final_rendered(&mut self, now: DateTime<Utc>) -> bool {
        if self.kill_switch.is_processing_complete()
            || self.timers.is_scheduled(TimerAction::StopAfterGrace)
        {
            return false;
        }
        self.freeze(now);
        let grace = self.config.lifecycle.grace_period();
        if self
            .timers
            .schedule_once(TimerAction::StopAfterGrace, now, grace)
            .is_none()
        {
            self.stop(now);
        }
        true
    }

    /// Phase one: cancel one-shot timers, keep trace data, arm the hard
    /// ceiling. Returns whether the switch moved.
    pub fn freeze(&mut self, now: DateTime<Utc>) -> bool {
        if !self.kill_switch.freeze(now) {
            return false;
        }
        let cancelled = self.timers.cancel_once();
        let ceiling = self.config.lifecycle.freeze_ceiling();
        self.timers
            .schedule_once(TimerAction::HardStop, now, ceiling);
        tracing::info!(cancelled, "final response detected, preserving trace data");
        self.bus.publish(FlowEvent::FinalMessageDetected {
            preserve_trace_data: true,
        });
        true
    }

    /// Phase two: cancel everything, refuse new timers, drop the reload
    /// tier. Returns whether the switch moved.
    pub fn stop(&mut self, now: DateTime<Utc>) -> bool {
        if !self.kill_switch.stop(now) {
            tracing::debug!("processing already stopped");
            return false;
        }
        let cancelled = self.timers.cancel_all();
        self.timers.lock();
        self.store.clear_reload_tier();
        tracing::info!(cancelled, "all processing stopped");
        self.bus.publish(FlowEvent::FlowAnimationsFrozen(true));
        self.bus.publish(FlowEvent::AllProcessingKilled);
        true
    }

    /// Begin a new turn: re-arm the switch and timers and clear the
    /// session's traces. What was cleared stays recoverable until the next
    /// reset.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        let was_stopped = self.kill_switch.reset();
        self.timers.unlock();
        let snapshot = self.store.reset_session(now);
        if !snapshot.is_empty() {
            self.last_snapshot = Some(snapshot);
        }
        self.groups.clear();
        self.last_seen_hash = self.store.change_hash();
        self.last_change = now;
        self.arm_timers(now);
        tracing::info!(was_stopped, "session reset");
        self.bus.publish(FlowEvent::FlowAnimationsFrozen(false));
        self.bus.publish(FlowEvent::SessionReset);
    }

    /// Put back what the last reset cleared.
    pub fn recover_previous_session(&mut self) -> bool {
        let Some(snapshot) = self.last_snapshot.take() else {
            return false;
        };
        self.store.restore(snapshot);
        tracing::info!("restored previous session traces");
        true
    }

    /// Run every timer due at `now`. Returns the actions that fired.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<TimerAction> {
        if self.disposed {
            return Vec::new();
        }
        let fired = self.timers.due(now);
        for action in &fired {
            match action {
                TimerAction::StopAfterGrace | TimerAction::HardStop => {
                    self.stop(now);
                }
                TimerAction::IdleStop => {
                    if let Some(session) = self.current_session.clone() {
                        self.store.collapse_idle(&session);
                    }
                    self.stop(now);
                }
                TimerAction::PollChanges => self.poll_changes(now),
                TimerAction::Sweep => {
                    self.store.sweep_expired(now);
                }
            }
        }
        fired
    }

    fn poll_changes(&mut self, now: DateTime<Utc>) {
        if !self.kill_switch.is_armed() {
            return;
        }
        let hash = self.store.change_hash();
        if hash != self.last_seen_hash {
            self.last_seen_hash = hash;
            self.last_change = now;
            for (node, traces) in self.store.all_agent_traces() {
                if let Some(latest) = traces.first() {
                    self.bus.publish(FlowEvent::NodeProcessingStateChanged {
                        node,
                        is_processing: !latest.is_complete,
                        processing_complete: latest.is_complete,
                    });
                }
            }
            return;
        }
        if now - self.last_change >= self.config.lifecycle.poll_ceiling() {
            self.timers.cancel_action(TimerAction::PollChanges);
            tracing::debug!("no trace changes within the polling ceiling, polling stopped");
        }
    }

    /// Tear down: cancel timers, drop subscribers and handlers. Every later
    /// call is a no-op.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.timers.cancel_all();
        self.timers.lock();
        self.bus.clear();
        self.router.clear();
        self.groups.clear();
        self.disposed = true;
        tracing::info!("process context disposed");
    }

    pub fn state(&self) -> LifecycleState {
        self.kill_switch.state()
    }

    pub fn config(&self) -> &TraceflowConfig {
        &self.config
    }

    pub fn store(&self) -> &TraceStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut TraceStore {
        &mut self.store
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    pub fn current_session(&self) -> Option<&str> {
        self.current_session.as_deref()
    }

    /// Working copy of a group in the current turn.
    pub fn group(&self, group_id: &str) -> Option<&TraceGroup> {
        self.groups.get(group_id)
    }

    /// Group to show on `node`, as stored.
    pub fn trace_for(&mut self, node: AgentId, strict: bool) -> Option<TraceGroup> {
        self.store.get(node, None, strict)
    }

    /// Group to show on `node`, ordered for rendering.
    pub fn display_trace(&mut self, node: AgentId) -> Option<TraceGroup> {
        self.trace_for(node, true).map(|group| normalize_for_display(&group))
    }

    pub fn subscribe(&mut self, handler: impl FnMut(&FlowEvent) + 'static) -> SubscriberId {
        self.bus.subscribe(handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.bus.unsubscribe(id)
    }

    pub fn subscribe_channel(&mut self) -> Receiver<FlowEvent> {
        self.bus.subscribe_channel()
    }

    pub fn register(
        &mut self,
        connection_id: &str,
        message_type: MessageType,
        handler: impl FnMut(&Value) + 'static,
    ) {
        self.router.register(connection_id, message_type, handler);
    }

    pub fn unregister(&mut self, connection_id: &str, message_type: MessageType) -> usize {
        self.router.unregister(connection_id, message_type)
    }
}

/// Nodes that show a session group: its owner first, then every agent that
/// opened a task in it.
fn contributors(group: &TraceGroup) -> Vec<AgentId> {
    let mut nodes = vec![group.agent_id];
    for task in &group.tasks {
        if !nodes.contains(&task.agent_id) {
            nodes.push(task.agent_id);
        }
    }
    nodes
}

/// SQLite at `path` when given, process memory otherwise. Both tiers may
/// share one file; they use distinct keys.
fn open_backend(path: Option<&Path>) -> Result<Box<dyn KvBackend>> {
    let backend: Box<dyn KvBackend> = match path {
        Some(path) => Box::new(SqliteKv::open(path)?),
        None => Box::new(MemoryKv::new()),
    };
    Ok(backend)
}
