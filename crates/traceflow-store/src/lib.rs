// Tiered trace storage
// Memory is authoritative; durable tiers are best-effort mirrors

pub mod breaker;
pub mod error;
pub mod eviction;
pub mod kv;
pub mod ownership;
pub mod sqlite;
pub mod store;
pub mod tier;

pub use breaker::{BreakerState, CircuitBreaker};
pub use error::{Error, Result};
pub use eviction::{EvictionPolicy, MaxAge, MaxCount};
pub use kv::{KvBackend, MemoryKv};
pub use ownership::{AgentOwnership, OwnershipPolicy, Sniffing};
pub use sqlite::SqliteKv;
pub use store::{
    RELOAD_TIER_KEY, SESSION_TIER_KEY, StoreConfig, StoreSnapshot, TraceChange, TraceStore,
};
pub use tier::{NodeMap, NodeRecord, TraceRecord};
