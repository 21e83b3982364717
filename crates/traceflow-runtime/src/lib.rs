// Process runtime
// Wires transport, reducer, store and kill switch into one context per host process

pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod timers;
pub mod transport;

pub use bus::{EventBus, FlowEvent, SubscriberId};
pub use config::{TraceflowConfig, resolve_data_path};
pub use context::ProcessContext;
pub use error::{Error, Result};
pub use lifecycle::{KillSwitch, LifecycleConfig, LifecycleState};
pub use timers::{TimerAction, TimerId, TimerRegistry};
pub use transport::{
    MessageRouter, MessageType, connection_id, is_response_complete, parse_trace_envelope,
    parse_trace_json,
};
