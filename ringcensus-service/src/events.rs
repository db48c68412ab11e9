//! Subscription dispatch (Section 6, Section 9): a mapping from `Event` to
//! an ordered list of callbacks, owned and invoked only by the protocol
//! loop, so no locking is required around it.

use ringcensus_core::{ConfigurationId, Endpoint, MembershipView, Proposal};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

/// The four subscribable events of Section 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    ViewChangeProposal,
    ViewChange,
    ViewChangeOneStepFailed,
    Kicked,
}

/// The payload handed to a subscriber callback. Not every event carries
/// every field: `ViewChangeProposal` carries only `proposal`, `ViewChange`
/// carries only `view`, and `ViewChangeOneStepFailed`/`Kicked` carry
/// neither.
#[derive(Debug, Clone)]
pub struct EventPayload {
    pub config_id: ConfigurationId,
    pub proposal: Option<Proposal>,
    pub view: Option<MembershipView>,
    pub local: Endpoint,
}

pub type Callback = Box<dyn Fn(&EventPayload) + Send + Sync>;

#[derive(Default)]
pub struct Subscribers {
    callbacks: HashMap<Event, Vec<Callback>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, event: Event, callback: Callback) {
        self.callbacks.entry(event).or_default().push(callback);
    }

    /// Fires every callback registered for `event`. A callback that panics
    /// is caught, logged, and isolated from the rest of the dispatch list
    /// and from the protocol loop (Section 7: "subscribe callbacks
    /// throwing must not crash the loop").
    pub fn fire(&self, event: Event, payload: &EventPayload) {
        let Some(callbacks) = self.callbacks.get(&event) else {
            return;
        };
        for callback in callbacks {
            let result = catch_unwind(AssertUnwindSafe(|| callback(payload)));
            if result.is_err() {
                error!(?event, "subscriber callback panicked, isolating from the protocol loop");
            }
        }
    }
}
