//! Shared test requestors.
//!
//! A [`Tracker`] hands out timer-driven requestors and records what the
//! combinators did to each of them: when it started, with which input, how
//! often it was cancelled and how many requestors were running at once.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use parseq::{Cancel, Completion, Outcome, Reason, Requestor, RequestorRef};
use serde_json::Value;
use tokio::time::Instant;

#[derive(Default)]
struct Record {
    started_at: Option<Instant>,
    input: Option<Value>,
    cancels: Vec<Reason>,
    finished: bool,
}

#[derive(Default)]
struct State {
    records: Vec<Record>,
    running: usize,
    peak: usize,
}

#[derive(Default)]
pub struct Tracker {
    state: Mutex<State>,
}

impl Tracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Requestor that settles with `outcome` after `delay_ms`
    pub fn requestor(self: &Arc<Self>, delay_ms: u64, outcome: Outcome) -> RequestorRef {
        let index = {
            let mut state = self.state.lock().unwrap();
            state.records.push(Record::default());
            state.records.len() - 1
        };

        Arc::new(Delayed {
            tracker: Arc::clone(self),
            index,
            delay: Duration::from_millis(delay_ms),
            outcome,
        })
    }

    pub fn ok(self: &Arc<Self>, delay_ms: u64, value: &str) -> RequestorRef {
        self.requestor(delay_ms, Ok(Value::from(value)))
    }

    pub fn fail(self: &Arc<Self>, delay_ms: u64, excuse: &str) -> RequestorRef {
        self.requestor(delay_ms, Err(Reason::new("tracker", excuse)))
    }

    pub fn started(&self, index: usize) -> bool {
        self.started_at(index).is_some()
    }

    pub fn started_at(&self, index: usize) -> Option<Instant> {
        self.state.lock().unwrap().records[index].started_at
    }

    pub fn input(&self, index: usize) -> Option<Value> {
        self.state.lock().unwrap().records[index].input.clone()
    }

    pub fn cancels(&self, index: usize) -> Vec<Reason> {
        self.state.lock().unwrap().records[index].cancels.clone()
    }

    pub fn peak(&self) -> usize {
        self.state.lock().unwrap().peak
    }

    fn start(&self, index: usize, input: Value) {
        let mut state = self.state.lock().unwrap();
        let record = &mut state.records[index];
        record.started_at = Some(Instant::now());
        record.input = Some(input);
        state.running += 1;
        state.peak = state.peak.max(state.running);
    }

    /// Returns false if the requestor had already finished
    fn finish(&self, index: usize) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.records[index].finished {
            return false;
        }
        state.records[index].finished = true;
        state.running -= 1;
        true
    }

    fn cancelled(&self, index: usize, reason: Reason) {
        self.finish(index);
        self.state.lock().unwrap().records[index].cancels.push(reason);
    }
}

struct Delayed {
    tracker: Arc<Tracker>,
    index: usize,
    delay: Duration,
    outcome: Outcome,
}

impl Requestor for Delayed {
    fn start(&self, completion: Completion, input: Value) -> Option<Cancel> {
        self.tracker.start(self.index, input);

        let tracker = Arc::clone(&self.tracker);
        let index = self.index;
        let delay = self.delay;
        let outcome = self.outcome.clone();
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tracker.finish(index) {
                completion.complete(outcome);
            }
        });

        let tracker = Arc::clone(&self.tracker);
        Some(Cancel::new(move |reason| {
            join.abort();
            tracker.cancelled(index, reason);
        }))
    }
}

/// Run `requestor` and also return how long it took on the (paused) clock
pub async fn timed(requestor: &RequestorRef, input: Value) -> (Outcome, Duration) {
    let began = Instant::now();
    let outcome = parseq::request(&**requestor, input).await;
    (outcome, began.elapsed())
}
