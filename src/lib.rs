//! parseq - Asynchronous requestor orchestration
//!
//! A small set of composable combinators that run independent units of
//! asynchronous work ("requestors") under four policies:
//!
//! - `parallel`: all required requestors must succeed, optionals are best effort
//! - `race`: the first success wins, the rest are cancelled
//! - `fallback`: try one at a time, in order, until one succeeds
//! - `sequence`: run in order, feeding each output into the next requestor
//!
//! Every combinator supports cooperative cancellation, a whole-batch time
//! limit and throttled admission, and is itself a requestor, so they nest.
//!
//! # Modules
//!
//! - `domain`: Data structures (Reason, Requestor, Completion, Cancel)
//! - `core`: Execution engine, combinators, async adapters and plans
//! - `config`: Configuration loading
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```no_run
//! use parseq::{fallback, parallel, request, requestor_fn, sequence, TimeOption};
//! use serde_json::Value;
//!
//! # async fn demo() -> Result<(), parseq::Reason> {
//! let step = |name: &'static str| {
//!     requestor_fn(move |completion, _input| {
//!         completion.succeed(Value::from(name));
//!         None
//!     })
//! };
//!
//! let plan = parallel(
//!     vec![step("A"), sequence(vec![step("C0"), step("C1")], None)?],
//!     vec![fallback(vec![step("F0"), step("F1")], None)?],
//!     None,
//!     TimeOption::Required,
//!     0,
//! )?;
//!
//! let value = request(&*plan, Value::Null).await?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{
    fallback, from_fn, parallel, parallel_object, race, request, sequence, Plan, RequestorMap,
    Task, TaskRequestor, TimeOption,
};
pub use domain::{requestor_fn, Cancel, Completion, Evidence, Outcome, Reason, Requestor, RequestorRef};
