// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! A single-threaded proactor event loop built on io_uring.
//!
//! The [`Proactor`] owns one submission/completion ring and dispatches
//! completions of previously submitted operations to three families of
//! handlers: periodic timers, signal handlers, and TCP client sockets.
//! Every outstanding kernel submission is tracked by an integer token in
//! the pending-event registry, and is reclaimed by its completion.

pub mod events;
pub mod proactor;
pub mod ring;
pub mod signals;
pub mod tcp;
pub mod timer;
pub mod timing;

use std::fmt;

pub use proactor::Proactor;
pub use tcp::{ConnState, TcpClient, TcpDelegate};
pub use timer::{TimerHandler, TimerState};

/// Identifies a handler (timer or TCP client) for the lifetime of the process.
///
/// Allocated from a monotonically increasing counter that saturates one
/// below the type maximum. A separate namespace from [`EventId`].
pub type HandlerId = u64;

/// Identifies one in-flight kernel submission.
///
/// Travels as the `user_data` field of the submission and comes back
/// verbatim in the completion, where it keys the pending-event registry.
pub type EventId = u64;

/// The errors that can arise while setting up the proactor or attaching
/// its exit signal handlers. Completion-side failures never surface here;
/// they are logged and the offending event is retired (the dispatch loop
/// must keep running).
#[derive(Debug)]
pub enum Error {
    /// Ring setup failed.
    Io(std::io::Error),

    /// A signal could not be blocked, or its signalfd could not be created.
    Signal {
        signal: nix::sys::signal::Signal,
        source: nix::Error,
    },

    /// The same signal was attached twice.
    SignalAlreadyAttached(nix::sys::signal::Signal),

    /// The ring rejected a submission that is required for startup.
    Submit(&'static str),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Signal { signal, source } => {
                write!(f, "signal setup failed for {signal}: {source}")
            }
            Self::SignalAlreadyAttached(signal) => {
                write!(f, "signal {signal} already attached")
            }
            Self::Submit(what) => write!(f, "startup submission failed: {what}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
