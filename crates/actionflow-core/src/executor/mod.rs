//! Action executor: consumes tasks of one action type and runs its handler.

pub mod dedup;
pub mod handler;
pub mod runtime;
pub mod stats;

pub use dedup::DedupCache;
pub use handler::{
    ActionError, ActionHandler, ActionOutcome, DeliveryState, decode_content,
};
pub use runtime::{ExecutorRuntime, ExecutorSettings};
pub use stats::{ExecutorStats, StatsSnapshot};
