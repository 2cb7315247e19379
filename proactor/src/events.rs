// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};

use nix::sys::socket::SockaddrStorage;

use crate::{EventId, HandlerId};

/// Size of the buffer owned by every in-flight receive.
pub const RECV_BUFFER_SIZE: usize = 1024;

/// One outstanding kernel submission, keyed in the pending-event registry
/// by the token that was attached to it as `user_data`.
///
/// The record owns every buffer the kernel writes into or reads from, so
/// the memory stays valid for as long as the submission is in flight no
/// matter where the record itself moves. All buffers are heap allocated
/// for that reason.
pub enum Event {
    /// A multishot timeout for a periodic timer. The only kind that stays
    /// pending across its completions; it is erased when its cancellation
    /// is acknowledged with `-ECANCELED`.
    TimerExpired { handler: HandlerId },

    /// An in-place period update targeting an armed timeout.
    TimerUpdate { handler: HandlerId },

    /// A cancellation targeting an armed timeout.
    TimerCancel { handler: HandlerId },

    /// A read of one `signalfd_siginfo` from a signalfd.
    Signal {
        signal: i32,
        fd: RawFd,
        info: Box<libc::signalfd_siginfo>,
    },

    /// An async connect. Owns the socket until the completion assigns it
    /// to the client, and the resolved address for the kernel to read.
    TcpConnect {
        handler: HandlerId,
        fd: RawFd,
        addr: Box<SockaddrStorage>,
    },

    /// An async send. Owns the outbound bytes until completion.
    TcpSend {
        handler: HandlerId,
        fd: RawFd,
        data: Vec<u8>,
    },

    /// An async receive. Owns the buffer the kernel fills.
    TcpRecv {
        handler: HandlerId,
        fd: RawFd,
        buffer: Box<[u8; RECV_BUFFER_SIZE]>,
    },
}

impl Event {
    /// Whether the completion consumes the submission. False only for the
    /// multishot timer expiry, which keeps firing until removed.
    pub fn retire_on_complete(&self) -> bool {
        !matches!(self, Event::TimerExpired { .. })
    }

    /// Short tag for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::TimerExpired { .. } => "timer-expired",
            Event::TimerUpdate { .. } => "timer-update",
            Event::TimerCancel { .. } => "timer-cancel",
            Event::Signal { .. } => "signal",
            Event::TcpConnect { .. } => "tcp-connect",
            Event::TcpSend { .. } => "tcp-send",
            Event::TcpRecv { .. } => "tcp-recv",
        }
    }
}

/// Allocate the next submission token. Monotonic, starts at 1 so that a
/// zero `user_data` can never resolve to a pending event, and saturates
/// one below the type maximum.
pub(crate) fn next_token() -> EventId {
    static NEXT: AtomicU64 = AtomicU64::new(0);

    let prev = NEXT
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |t| {
            Some(t.saturating_add(1).min(EventId::MAX - 1))
        })
        .unwrap_or(EventId::MAX - 1);

    prev.saturating_add(1).min(EventId::MAX - 1)
}
