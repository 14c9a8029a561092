//! Execution engine shared by every combinator.
//!
//! Each activation of a combinator launches one [`Run`]: an actor task that
//! exclusively owns the per-batch state (slots, cursor, timer). Completion
//! wrappers and the batch cancel capability only ever send messages to the
//! actor, so requestors never observe sibling completions inline and the
//! admission loop never recurses through a requestor's call stack.
//!
//! Combinator semantics live in a [`Policy`]; the engine handles admission
//! under the throttle, exactly-once settlement, the whole-batch timer and
//! cancellation of everything still in flight.

use std::any::Any;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{self, Sleep};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::domain::{Cancel, Completion, Evidence, Outcome, Reason, RequestorRef};

/// Validate a time limit given in (possibly negative) milliseconds.
///
/// Zero means no time limit.
pub fn time_limit_from_millis(millis: i64) -> Result<Option<Duration>, Reason> {
    match u64::try_from(millis) {
        Ok(0) => Ok(None),
        Ok(ms) => Ok(Some(Duration::from_millis(ms))),
        Err(_) => Err(Reason::new("run", "Bad milliseconds.").with_evidence(Value::from(millis))),
    }
}

/// How admitted requestors receive their input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Every requestor receives the batch's initial input
    Fanout,

    /// Each requestor receives the previous requestor's output
    Chain,
}

/// What a policy decided after observing an event
pub(crate) enum Verdict {
    /// Keep going
    Pending,

    /// Deliver `outcome` and cancel everything still running with `cancel`
    Conclude { outcome: Outcome, cancel: Reason },
}

/// Combinator-specific reaction to settlements and to the timer
pub(crate) trait Policy: Send + 'static {
    fn on_settle(&mut self, slot: usize, outcome: Outcome) -> Verdict;

    fn on_timeout(&mut self) -> Verdict;
}

/// A validated batch description, reusable across activations
#[derive(Clone)]
pub(crate) struct Batch {
    factory: &'static str,
    requestors: Arc<[RequestorRef]>,
    time_limit: Option<Duration>,
    throttle: usize,
    flow: Flow,
}

impl Batch {
    /// Validate the batch configuration.
    ///
    /// A throttle of zero admits every requestor at once.
    pub(crate) fn new(
        factory: &'static str,
        requestors: Vec<RequestorRef>,
        time_limit: Option<Duration>,
        throttle: usize,
        flow: Flow,
    ) -> Result<Self, Reason> {
        if requestors.is_empty() {
            return Err(Reason::new(factory, "Bad requestors array.").with_evidence(Evidence::Index(0)));
        }

        Ok(Self {
            factory,
            requestors: Arc::from(requestors),
            time_limit: time_limit.filter(|limit| !limit.is_zero()),
            throttle,
            flow,
        })
    }

    pub(crate) fn factory(&self) -> &'static str {
        self.factory
    }

    pub(crate) fn len(&self) -> usize {
        self.requestors.len()
    }

    pub(crate) fn time_limit(&self) -> Option<Duration> {
        self.time_limit
    }

    /// Start one activation of the batch.
    ///
    /// The returned capability cancels the whole batch; after it is used the
    /// batch completion is never called.
    pub(crate) fn launch<P: Policy>(&self, input: Value, policy: P, completion: Completion) -> Cancel {
        let (tx, rx) = mpsc::unbounded_channel();

        // Raised before the message is queued so pending admissions see it.
        let halted = Arc::new(AtomicBool::new(false));
        let cancel_tx = tx.clone();
        let cancel_flag = Arc::clone(&halted);
        let cancel = Cancel::with_default(move |reason| {
            cancel_flag.store(true, Ordering::SeqCst);
            // The run may already be over; nothing left to stop then.
            let _ = cancel_tx.send(Signal::Cancel(reason));
        });

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                completion.fail(Reason::new(self.factory, "No runtime."));
                return cancel;
            }
        };

        let run_id = Uuid::new_v4();
        let span = info_span!("batch", factory = self.factory, %run_id);
        let run = Run {
            factory: self.factory,
            requestors: Arc::clone(&self.requestors),
            slots: (0..self.requestors.len()).map(|_| Slot::Waiting).collect(),
            cursor: 0,
            active: true,
            halted,
            flow: self.flow,
            initial: input,
            throttle: self.throttle,
            time_limit: self.time_limit,
            timer: None,
            tx,
        };

        handle.spawn(run.drive(rx, policy, completion).instrument(span));
        cancel
    }
}

/// Messages sent to a running batch
enum Signal {
    /// A requestor reported its outcome
    Settled { slot: usize, outcome: Outcome },

    /// The batch was cancelled from outside
    Cancel(Option<Reason>),
}

enum Event {
    Expired,
    Signal(Option<Signal>),
}

/// Per-requestor state, index-aligned with the requestor sequence
enum Slot {
    /// Not admitted yet
    Waiting,

    /// Admitted and unsettled, with its cancel capability if it gave one
    Running(Option<Cancel>),

    /// Settled or discarded
    Settled,
}

/// State owned by one batch activation
struct Run {
    factory: &'static str,
    requestors: Arc<[RequestorRef]>,
    slots: Vec<Slot>,
    cursor: usize,
    active: bool,
    halted: Arc<AtomicBool>,
    flow: Flow,
    initial: Value,
    throttle: usize,
    time_limit: Option<Duration>,
    timer: Option<Pin<Box<Sleep>>>,
    tx: mpsc::UnboundedSender<Signal>,
}

impl Run {
    async fn drive<P: Policy>(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Signal>,
        mut policy: P,
        completion: Completion,
    ) {
        if let Some(limit) = self.time_limit {
            self.timer = Some(Box::pin(time::sleep(limit)));
        }

        let window = match self.throttle {
            0 => self.requestors.len(),
            throttle => throttle.min(self.requestors.len()),
        };
        debug!(requestors = self.requestors.len(), window, "starting batch");

        let mut verdict = Verdict::Pending;
        for _ in 0..window {
            verdict = self.admit(self.initial.clone(), &mut policy);
            if matches!(verdict, Verdict::Conclude { .. }) {
                break;
            }
        }

        loop {
            if let Verdict::Conclude { outcome, cancel } = verdict {
                self.cancel(cancel);
                info!(success = outcome.is_ok(), "batch concluded");
                completion.complete(outcome);
                return;
            }

            let event = match self.timer.as_mut() {
                Some(deadline) => tokio::select! {
                    () = deadline.as_mut() => Event::Expired,
                    signal = rx.recv() => Event::Signal(signal),
                },
                None => Event::Signal(rx.recv().await),
            };

            verdict = match event {
                Event::Expired => {
                    self.timer = None;
                    if self.is_halted() {
                        Verdict::Pending
                    } else {
                        warn!(limit_ms = self.time_limit.map(millis), "batch time limit expired");
                        policy.on_timeout()
                    }
                }
                // A queued cancel is on its way; nothing settles before it.
                Event::Signal(Some(Signal::Settled { .. })) if self.is_halted() => Verdict::Pending,
                Event::Signal(Some(Signal::Settled { slot, outcome })) => {
                    self.settle(slot, outcome, &mut policy)
                }
                Event::Signal(Some(Signal::Cancel(reason))) => {
                    let reason = reason.unwrap_or_else(|| Reason::cancel(self.factory));
                    info!(%reason, "batch cancelled");
                    self.cancel(reason);
                    return;
                }
                Event::Signal(None) => return,
            };
        }
    }

    /// True once the batch cancel capability has been used
    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Admit the next waiting requestor, if any.
    ///
    /// A requestor that panics while starting is settled as a failure and the
    /// next one is admitted with the same input.
    fn admit<P: Policy>(&mut self, input: Value, policy: &mut P) -> Verdict {
        while self.active && !self.is_halted() && self.cursor < self.requestors.len() {
            let slot = self.cursor;
            self.cursor += 1;

            let tx = self.tx.clone();
            let completion = Completion::new(move |outcome| {
                let _ = tx.send(Signal::Settled { slot, outcome });
            });

            debug!(slot, "admitting requestor");
            self.slots[slot] = Slot::Running(None);

            let requestor = Arc::clone(&self.requestors[slot]);
            let started = panic::catch_unwind(AssertUnwindSafe(|| {
                requestor.start(completion, input.clone())
            }));

            match started {
                Ok(cancel) => {
                    self.slots[slot] = Slot::Running(cancel);
                    return Verdict::Pending;
                }
                Err(payload) => {
                    let reason = Reason::new(self.factory, "Requestor panicked.")
                        .with_evidence(Evidence::Message(panic_message(&*payload)));
                    warn!(slot, %reason, "requestor panicked while starting");
                    self.slots[slot] = Slot::Settled;

                    match policy.on_settle(slot, Err(reason)) {
                        Verdict::Pending => continue,
                        conclude => return conclude,
                    }
                }
            }
        }

        Verdict::Pending
    }

    /// Record a settlement, ignoring any that are not the slot's first
    fn settle<P: Policy>(&mut self, slot: usize, outcome: Outcome, policy: &mut P) -> Verdict {
        if !matches!(self.slots.get(slot), Some(Slot::Running(_))) {
            debug!(slot, "ignoring settlement of an inactive slot");
            return Verdict::Pending;
        }

        // Clear the slot first so its cancel can never run after settlement.
        self.slots[slot] = Slot::Settled;
        debug!(slot, success = outcome.is_ok(), "requestor settled");

        let next_input = match (self.flow, &outcome) {
            (Flow::Chain, Ok(value)) => value.clone(),
            (Flow::Chain, Err(_)) => Value::Null,
            (Flow::Fanout, _) => self.initial.clone(),
        };

        match policy.on_settle(slot, outcome) {
            Verdict::Pending => self.admit(next_input, policy),
            conclude => conclude,
        }
    }

    /// Stop the timer, cancel every running slot and disable admission
    fn cancel(&mut self, reason: Reason) {
        if !self.active {
            return;
        }
        self.active = false;
        self.timer = None;

        for (slot, state) in mem::take(&mut self.slots).into_iter().enumerate() {
            if let Slot::Running(Some(cancel)) = state {
                debug!(slot, "cancelling requestor");
                let reason = reason.clone();
                if panic::catch_unwind(AssertUnwindSafe(move || cancel.cancel(reason))).is_err() {
                    warn!(slot, "cancel capability panicked");
                }
            }
        }
    }
}

fn millis(limit: Duration) -> u64 {
    u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
