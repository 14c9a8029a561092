//! Core orchestration logic.
//!
//! This module contains:
//! - Engine: Admission, settlement, timer and cancellation shared by all combinators
//! - Parallel / ParallelObject: Required and optional fan-out
//! - Race / Fallback: First success wins
//! - Sequence: Ordered chaining
//! - Task: Async adapters for requestors
//! - Plan: Declarative combinator trees loaded from YAML

pub mod engine;
pub mod parallel;
pub mod parallel_object;
pub mod plan;
pub mod race;
pub mod sequence;
pub mod task;

// Re-export commonly used types
pub use engine::time_limit_from_millis;
pub use parallel::{parallel, Parallel, TimeOption};
pub use parallel_object::{parallel_object, ParallelObject, RequestorMap};
pub use plan::{Defaults, Node, Plan, Step};
pub use race::{fallback, race, Race};
pub use sequence::sequence;
pub use task::{from_fn, request, Task, TaskRequestor};
