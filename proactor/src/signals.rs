// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::rc::Rc;

use nix::sys::signal::{sigprocmask, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};

use crate::proactor::Proactor;
use crate::Error;

/// Invoked with the raw siginfo record read from the signalfd. Gets the
/// proactor so the default handler can stop the dispatch loop.
pub type SignalCallback = Rc<dyn Fn(&mut Proactor, &libc::signalfd_siginfo)>;

/// The signals that trigger a graceful shutdown of the dispatch loop.
pub(crate) const EXIT_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGQUIT, Signal::SIGTERM];

/// One attached signal: its number, the signalfd it is delivered on, and
/// the callback run for each delivery.
pub(crate) struct SignalHandler {
    pub(crate) signal: Signal,
    pub(crate) fd: SignalFd,
    pub(crate) callback: SignalCallback,
}

impl SignalHandler {
    /// Block `signal` so normal delivery never sees it, then open a
    /// signalfd for it. The proactor pumps fixed-size reads on the fd
    /// through the ring.
    pub(crate) fn attach(signal: Signal, callback: SignalCallback) -> Result<Self, Error> {
        let mut mask = SigSet::empty();
        mask.add(signal);

        sigprocmask(SigmaskHow::SIG_BLOCK, Some(&mask), None)
            .map_err(|source| Error::Signal { signal, source })?;

        let fd = SignalFd::with_flags(&mask, SfdFlags::empty())
            .map_err(|source| Error::Signal { signal, source })?;

        Ok(Self {
            signal,
            fd,
            callback,
        })
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd.as_fd().as_raw_fd()
    }
}

/// Ignore SIGPIPE so a send on a closed connection surfaces as an error
/// completion instead of killing the process.
pub(crate) fn ignore_sigpipe() {
    // SAFETY: SIG_IGN installs no handler code, so none of the
    // signal-handler safety requirements apply.
    let _ = unsafe { nix::sys::signal::signal(Signal::SIGPIPE, SigHandler::SigIgn) };
}

/// Render a raw signal number the way the logs spell signals.
pub(crate) fn describe(signal: i32) -> String {
    match Signal::try_from(signal) {
        Ok(signal) => format!("{signal}({})", signal as i32),
        Err(_) => format!("unknown-signal({signal})"),
    }
}
