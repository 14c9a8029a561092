//! Structured failure values.
//!
//! A [`Reason`] is used uniformly for requestor failures, cancellations,
//! timeouts and configuration errors. It names the combinator that produced
//! it, a short excuse, and an evidence payload describing what went wrong.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A failure, cancellation or configuration error.
///
/// Renders as `parseq.<factory>: <excuse>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("parseq.{factory}: {excuse}")]
pub struct Reason {
    /// Name of the combinator (or requestor) that produced this reason
    pub factory: String,

    /// Short human-readable excuse, e.g. "Timeout."
    pub excuse: String,

    /// The originating value
    #[serde(default)]
    pub evidence: Evidence,
}

impl Reason {
    /// Create a reason without evidence
    pub fn new(factory: impl Into<String>, excuse: impl Into<String>) -> Self {
        Self {
            factory: factory.into(),
            excuse: excuse.into(),
            evidence: Evidence::None,
        }
    }

    /// Attach evidence to this reason
    pub fn with_evidence(mut self, evidence: impl Into<Evidence>) -> Self {
        self.evidence = evidence.into();
        self
    }

    /// The default reason used when a batch is cancelled without one
    pub fn cancel(factory: impl Into<String>) -> Self {
        Self::new(factory, "Cancel.")
    }

    /// Reason synthesized when a batch's time limit expires
    pub fn timeout(factory: impl Into<String>, limit: Duration) -> Self {
        let millis = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
        Self::new(factory, "Timeout.").with_evidence(Evidence::Millis(millis))
    }

    /// Full human-readable message
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn is_timeout(&self) -> bool {
        self.excuse == "Timeout."
    }
}

/// Evidence payload carried by a [`Reason`]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Evidence {
    /// Nothing beyond the excuse
    #[default]
    None,

    /// A requestor position within a batch
    Index(usize),

    /// A time limit in milliseconds
    Millis(u64),

    /// An offending key or name
    Name(String),

    /// Free-form message, e.g. a caught panic
    Message(String),

    /// An arbitrary value supplied by a requestor
    Value(Value),

    /// A nested reason
    Reason(Box<Reason>),
}

impl From<usize> for Evidence {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<Value> for Evidence {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Reason> for Evidence {
    fn from(reason: Reason) -> Self {
        Self::Reason(Box::new(reason))
    }
}
