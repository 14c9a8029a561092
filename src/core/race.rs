//! Race and fallback combinators.
//!
//! The first requestor to succeed wins and every other requestor still in
//! flight is cancelled. A fallback is a race throttled to one requestor at a
//! time, which turns it into an ordered retry-until-success.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::engine::{Batch, Flow, Policy, Verdict};
use crate::domain::{Cancel, Completion, Evidence, Outcome, Reason, Requestor, RequestorRef};

/// Requestor produced by [`race`] and [`fallback`]
#[derive(Clone)]
pub struct Race {
    batch: Batch,
}

impl Race {
    pub(crate) fn build(
        requestors: Vec<RequestorRef>,
        time_limit: Option<Duration>,
        throttle: usize,
    ) -> Result<Self, Reason> {
        let factory = if throttle == 1 { "fallback" } else { "race" };
        let batch = Batch::new(factory, requestors, time_limit, throttle, Flow::Fanout)?;
        Ok(Self { batch })
    }
}

impl Requestor for Race {
    fn start(&self, completion: Completion, input: Value) -> Option<Cancel> {
        let policy = RacePolicy {
            factory: self.batch.factory(),
            time_limit: self.batch.time_limit().unwrap_or_default(),
            pending: self.batch.len(),
        };
        Some(self.batch.launch(input, policy, completion))
    }
}

/// Build a requestor that succeeds with the first success among `requestors`.
///
/// If every requestor fails, the race fails with the last failure. An empty
/// sequence is a configuration error.
pub fn race(
    requestors: Vec<RequestorRef>,
    time_limit: Option<Duration>,
    throttle: usize,
) -> Result<RequestorRef, Reason> {
    Ok(Arc::new(Race::build(requestors, time_limit, throttle)?))
}

/// Build a requestor that tries each of `requestors` in order until one succeeds
pub fn fallback(
    requestors: Vec<RequestorRef>,
    time_limit: Option<Duration>,
) -> Result<RequestorRef, Reason> {
    race(requestors, time_limit, 1)
}

struct RacePolicy {
    factory: &'static str,
    time_limit: Duration,
    pending: usize,
}

impl Policy for RacePolicy {
    fn on_settle(&mut self, slot: usize, outcome: Outcome) -> Verdict {
        self.pending = self.pending.saturating_sub(1);

        match outcome {
            Ok(value) => Verdict::Conclude {
                outcome: Ok(value),
                cancel: Reason::new(self.factory, "Loser.").with_evidence(Evidence::Index(slot)),
            },
            Err(reason) if self.pending == 0 => Verdict::Conclude {
                outcome: Err(reason.clone()),
                cancel: reason,
            },
            Err(_) => Verdict::Pending,
        }
    }

    fn on_timeout(&mut self) -> Verdict {
        let reason = Reason::timeout(self.factory, self.time_limit);
        Verdict::Conclude {
            outcome: Err(reason.clone()),
            cancel: reason,
        }
    }
}
