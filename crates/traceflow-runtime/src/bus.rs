use std::sync::mpsc::{Receiver, Sender, channel};
use traceflow_types::{AgentId, TraceGroup};

/// Notifications published to presentation adapters.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    /// A node received a payload and should show `trace_group`.
    NodeActivated {
        node: AgentId,
        trace_group: TraceGroup,
        no_animation: bool,
    },
    /// Animation-only update.
    NodeProcessingStateChanged {
        node: AgentId,
        is_processing: bool,
        processing_complete: bool,
    },
    /// De-duplicated change of a node's dominant trace.
    TraceUpdated {
        node: AgentId,
        trace_group: TraceGroup,
        trace_hash: String,
    },
    /// A final response arrived; in-flight rendering may finish.
    FinalMessageDetected { preserve_trace_data: bool },
    SessionReset,
    AllProcessingKilled,
    FlowAnimationsFrozen(bool),
}

impl FlowEvent {
    pub fn node(&self) -> Option<AgentId> {
        match self {
            FlowEvent::NodeActivated { node, .. }
            | FlowEvent::NodeProcessingStateChanged { node, .. }
            | FlowEvent::TraceUpdated { node, .. } => Some(*node),
            _ => None,
        }
    }
}

pub type SubscriberId = u64;

type Handler = Box<dyn FnMut(&FlowEvent)>;

/// Synchronous typed pub/sub.
///
/// Handlers run in subscription order on the publishing thread. Channel
/// subscribers are dropped once their receiver is gone.
#[derive(Default)]
pub struct EventBus {
    handlers: Vec<(SubscriberId, Handler)>,
    channels: Vec<Sender<FlowEvent>>,
    next_id: SubscriberId,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, handler: impl FnMut(&FlowEvent) + 'static) -> SubscriberId {
        self.next_id += 1;
        self.handlers.push((self.next_id, Box::new(handler)));
        self.next_id
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(sub, _)| *sub != id);
        before != self.handlers.len()
    }

    pub fn subscribe_channel(&mut self) -> Receiver<FlowEvent> {
        let (tx, rx) = channel();
        self.channels.push(tx);
        rx
    }

    /// Deliver `event` to every subscriber. Returns the number of deliveries.
    pub fn publish(&mut self, event: FlowEvent) -> usize {
        for (_, handler) in &mut self.handlers {
            handler(&event);
        }
        self.channels.retain(|tx| tx.send(event.clone()).is_ok());
        self.handlers.len() + self.channels.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.len() + self.channels.len()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
        self.channels.clear();
    }
}
