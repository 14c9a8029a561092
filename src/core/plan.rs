//! Plan definitions and loading.
//!
//! A plan is a YAML description of a combinator tree whose leaves are
//! simulated steps. Building a plan turns it into a single requestor;
//! configuration errors surface at build time, before anything runs.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::engine::time_limit_from_millis;
use super::parallel::{parallel, TimeOption};
use super::parallel_object::{parallel_object, RequestorMap};
use super::race::{fallback, race};
use super::sequence::sequence;
use super::task::{Task, TaskRequestor};
use crate::domain::{Evidence, Outcome, Reason, RequestorRef};

/// Fallbacks applied to nodes that leave a setting out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Defaults {
    /// Time limit for the root node
    pub time_limit: Option<Duration>,

    /// Throttle for parallel and race nodes (0 = unbounded)
    pub throttle: usize,
}

/// A complete plan definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Plan name (used in logs)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Root of the combinator tree
    pub root: Node,
}

impl Plan {
    /// Load a plan from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a plan from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse plan YAML")
    }

    /// Validate the plan by building it without running anything
    pub fn validate(&self, defaults: &Defaults) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Plan name cannot be empty");
        }

        self.build(defaults)
            .map(|_| ())
            .with_context(|| format!("Plan '{}' is invalid", self.name))
    }

    /// Turn the plan into a requestor
    pub fn build(&self, defaults: &Defaults) -> Result<RequestorRef, Reason> {
        self.root.build(defaults, defaults.time_limit)
    }
}

/// One node of a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Parallel {
        #[serde(default)]
        required: Vec<Node>,
        #[serde(default)]
        optional: Vec<Node>,
        time_limit_ms: Option<i64>,
        /// Absent, `false` or `true`; see [`TimeOption`]
        time_option: Option<bool>,
        throttle: Option<usize>,
    },

    ParallelObject {
        #[serde(default)]
        required: IndexMap<String, Node>,
        #[serde(default)]
        optional: IndexMap<String, Node>,
        time_limit_ms: Option<i64>,
        time_option: Option<bool>,
        throttle: Option<usize>,
    },

    Race {
        requestors: Vec<Node>,
        time_limit_ms: Option<i64>,
        throttle: Option<usize>,
    },

    Fallback {
        requestors: Vec<Node>,
        time_limit_ms: Option<i64>,
    },

    Sequence {
        requestors: Vec<Node>,
        time_limit_ms: Option<i64>,
    },

    Step(Step),
}

impl Node {
    fn build(&self, defaults: &Defaults, inherited: Option<Duration>) -> Result<RequestorRef, Reason> {
        match self {
            Node::Parallel {
                required,
                optional,
                time_limit_ms,
                time_option,
                throttle,
            } => parallel(
                build_all(required, defaults)?,
                build_all(optional, defaults)?,
                time_limit(*time_limit_ms, inherited)?,
                TimeOption::from(*time_option),
                throttle.unwrap_or(defaults.throttle),
            ),

            Node::ParallelObject {
                required,
                optional,
                time_limit_ms,
                time_option,
                throttle,
            } => parallel_object(
                build_named(required, defaults)?,
                build_named(optional, defaults)?,
                time_limit(*time_limit_ms, inherited)?,
                TimeOption::from(*time_option),
                throttle.unwrap_or(defaults.throttle),
            ),

            Node::Race {
                requestors,
                time_limit_ms,
                throttle,
            } => race(
                build_all(requestors, defaults)?,
                time_limit(*time_limit_ms, inherited)?,
                throttle.unwrap_or(defaults.throttle),
            ),

            Node::Fallback {
                requestors,
                time_limit_ms,
            } => fallback(
                build_all(requestors, defaults)?,
                time_limit(*time_limit_ms, inherited)?,
            ),

            Node::Sequence {
                requestors,
                time_limit_ms,
            } => sequence(
                build_all(requestors, defaults)?,
                time_limit(*time_limit_ms, inherited)?,
            ),

            Node::Step(step) => {
                if step.name.is_empty() {
                    return Err(Reason::new("step", "Missing name."));
                }
                Ok(TaskRequestor::new(step.clone()).into_ref())
            }
        }
    }
}

fn build_all(nodes: &[Node], defaults: &Defaults) -> Result<Vec<RequestorRef>, Reason> {
    nodes.iter().map(|node| node.build(defaults, None)).collect()
}

fn build_named(nodes: &IndexMap<String, Node>, defaults: &Defaults) -> Result<RequestorMap, Reason> {
    nodes
        .iter()
        .map(|(name, node)| Ok((name.clone(), node.build(defaults, None)?)))
        .collect()
}

fn time_limit(millis: Option<i64>, inherited: Option<Duration>) -> Result<Option<Duration>, Reason> {
    match millis {
        Some(millis) => time_limit_from_millis(millis),
        None => Ok(inherited),
    }
}

/// A simulated unit of work.
///
/// After `delay_ms` it succeeds with `value`, or with `"<input>><name>"` when
/// the input is a string, or with its name otherwise. With `fail` set it
/// fails instead, carrying that same value as evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,

    #[serde(default)]
    pub delay_ms: u64,

    #[serde(default)]
    pub fail: bool,

    #[serde(default)]
    pub value: Option<Value>,
}

impl Step {
    fn result(&self, input: &Value) -> Value {
        if let Some(value) = &self.value {
            return value.clone();
        }
        match input {
            Value::String(prior) => Value::String(format!("{}>{}", prior, self.name)),
            _ => Value::String(self.name.clone()),
        }
    }
}

#[async_trait]
impl Task for Step {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: Value) -> Outcome {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }

        let result = self.result(&input);
        if self.fail {
            Err(Reason::new(self.name.as_str(), "Failed.").with_evidence(Evidence::Value(result)))
        } else {
            Ok(result)
        }
    }
}
