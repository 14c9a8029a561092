//! Named variant of the parallel combinator.
//!
//! Flattens ordered name→requestor maps into positional required/optional
//! sequences, lets [`Parallel`] do the work, and maps the positional result
//! back onto the names.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::engine::Flow;
use super::parallel::{Parallel, Shape, TimeOption};
use crate::domain::{Cancel, Completion, Evidence, Reason, Requestor, RequestorRef};

/// Ordered mapping from result field name to requestor
pub type RequestorMap = IndexMap<String, RequestorRef>;

/// Requestor produced by [`parallel_object`]
#[derive(Clone)]
pub struct ParallelObject {
    names: Arc<[String]>,
    parallel: Parallel,
}

impl Requestor for ParallelObject {
    fn start(&self, completion: Completion, input: Value) -> Option<Cancel> {
        let names = Arc::clone(&self.names);
        let keyed = Completion::new(move |outcome| {
            completion.complete(outcome.map(|value| by_name(&names, value)))
        });
        self.parallel.start(keyed, input)
    }
}

/// Build a requestor that succeeds with an object keyed like the input maps.
///
/// Names are visited in map order, required first. The same name in both maps
/// is a configuration error, as is supplying no requestors at all.
pub fn parallel_object(
    required: RequestorMap,
    optional: RequestorMap,
    time_limit: Option<Duration>,
    time_option: TimeOption,
    throttle: usize,
) -> Result<RequestorRef, Reason> {
    if let Some(name) = optional.keys().find(|name| required.contains_key(*name)) {
        return Err(Reason::new("parallel_object", "Duplicate name.")
            .with_evidence(Evidence::Name(name.clone())));
    }

    if required.is_empty() && optional.is_empty() {
        return Err(Reason::new("parallel_object", "No requestors."));
    }

    let mut names = Vec::with_capacity(required.len() + optional.len());
    let required = flatten(required, &mut names);
    let optional = flatten(optional, &mut names);

    let parallel = Parallel::build(
        "parallel_object",
        required,
        optional,
        time_limit,
        time_option,
        throttle,
        Flow::Fanout,
        Shape::Array,
    )?;

    Ok(Arc::new(ParallelObject {
        names: Arc::from(names),
        parallel,
    }))
}

fn flatten(map: RequestorMap, names: &mut Vec<String>) -> Vec<RequestorRef> {
    map.into_iter()
        .map(|(name, requestor)| {
            names.push(name);
            requestor
        })
        .collect()
}

fn by_name(names: &[String], value: Value) -> Value {
    match value {
        Value::Array(values) => {
            let object: Map<String, Value> = names.iter().cloned().zip(values).collect();
            Value::Object(object)
        }
        other => other,
    }
}
