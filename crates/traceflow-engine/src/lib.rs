// Engine - pure trace reconciliation logic
// Sits between raw transport payloads (types) and the trace store

pub mod classifier;
pub mod content;
pub mod display;
pub mod identity;
pub mod reducer;
pub mod subtask;

pub use classifier::{Classification, StepFamily, StepKind, classify};
pub use content::extract_content;
pub use display::normalize_for_display;
pub use identity::{collaborator_to_agent, is_inferred, resolve, resolve_with_rule};
pub use reducer::{ReducerConfig, TraceReducer, group_id_for};
pub use subtask::{add_subtask, normalize_title};
