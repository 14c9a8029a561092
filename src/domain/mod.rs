//! Domain types shared by every combinator.
//!
//! This module contains:
//! - Reason: Structured failure and cancellation values
//! - Requestor: The unit-of-work contract with its completion and cancel capabilities

pub mod reason;
pub mod requestor;

// Re-export commonly used types
pub use reason::{Evidence, Reason};
pub use requestor::{requestor_fn, Cancel, Completion, Outcome, Requestor, RequestorRef};
