pub mod agent;
pub mod error;
pub mod group;
pub mod trace;
mod util;

pub use agent::AgentId;
pub use error::{Error, Result};
pub use group::{Content, SubTask, Task, TraceGroup};
pub use trace::{RawTrace, TraceFamily};
pub use util::*;
