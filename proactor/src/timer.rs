// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::proactor::Proactor;
use crate::{EventId, HandlerId};

/// Allocate the next handle identifier. Monotonic for the lifetime of the
/// process, saturating one below the type maximum. A separate namespace
/// from event tokens.
pub(crate) fn next_handler_id() -> HandlerId {
    static NEXT: AtomicU64 = AtomicU64::new(0);

    let prev = NEXT
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
            Some(id.saturating_add(1).min(HandlerId::MAX - 1))
        })
        .unwrap_or(HandlerId::MAX - 1);

    prev.saturating_add(1).min(HandlerId::MAX - 1)
}

/// Bookkeeping embedded in every periodic-timer handler: its immutable
/// name, its current period, its handle identifier, and the token of the
/// in-flight timer expiry while armed.
pub struct TimerState {
    id: HandlerId,
    name: String,
    period: Duration,
    token: Option<EventId>,
}

impl TimerState {
    pub fn new(name: impl Into<String>, period: Duration) -> Self {
        Self {
            id: next_handler_id(),
            name: name.into(),
            period,
            token: None,
        }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Token of the armed multishot timeout, if any. There is at most one
    /// in-flight expiry per handler; this field gates re-arming.
    pub(crate) fn token(&self) -> Option<EventId> {
        self.token
    }

    pub(crate) fn set_token(&mut self, token: Option<EventId>) {
        self.token = token;
    }

    pub(crate) fn set_period(&mut self, period: Duration) {
        self.period = period;
    }
}

/// A periodic timer driven by the proactor.
///
/// Implementors embed a [`TimerState`] and hand themselves to
/// [`Proactor::add_timer_handler`] behind an `Rc<RefCell<_>>`; the
/// proactor keeps that reference alive until the handler's cancellation
/// is acknowledged by the kernel.
pub trait TimerHandler {
    fn timer(&self) -> &TimerState;

    fn timer_mut(&mut self) -> &mut TimerState;

    /// Invoked on every expiry of the armed timeout. Runs on the dispatch
    /// thread and must not block; the proactor warns when a callback
    /// overruns its 20 ms budget.
    fn on_expire(&mut self, proactor: &mut Proactor);
}
