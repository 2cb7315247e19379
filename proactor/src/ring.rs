// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::{IntoRawFd, RawFd};
use std::time::Duration;

use io_uring::{cqueue, opcode, squeue, types, IoUring};
use log::*;
use nix::errno::Errno;
use nix::sys::socket::{socket, AddressFamily, SockFlag, SockType, SockaddrLike, SockaddrStorage};

use crate::EventId;

/// Queue depth of the one ring owned by the proactor.
pub const QUEUE_DEPTH: u32 = 10_000;

/// Wrapper around a single io_uring instance. Exposes one typed
/// prepare-and-submit primitive per operation the proactor needs, plus a
/// blocking wait for one completion.
///
/// Submission failures (full queue, rejected submit) are soft errors:
/// they are logged and surfaced as `false` / `None` so the caller can
/// leave its own state untouched. The ring is not thread-safe; neither is
/// anything else in this crate.
pub struct Ring {
    ring: IoUring,
}

/// A freshly submitted connect: the socket, and the resolved address the
/// kernel reads while the connect is in flight. The caller must keep both
/// alive until the completion for the submission's token is reaped.
pub struct ConnectSubmission {
    pub fd: RawFd,
    pub addr: Box<SockaddrStorage>,
}

impl Ring {
    pub fn new(depth: u32) -> io::Result<Self> {
        let ring = IoUring::builder().setup_single_issuer().build(depth)?;
        Ok(Self { ring })
    }

    /// Block until one completion is available and pop it.
    ///
    /// Returns `None` when the wait was interrupted (`EINTR`); any other
    /// wait failure is logged and also yields `None` so the dispatch loop
    /// just comes back around.
    pub fn wait_one(&mut self) -> Option<cqueue::Entry> {
        trace!("waiting for a completion");

        if let Err(e) = self.ring.submit_and_wait(1) {
            match Errno::from_raw(e.raw_os_error().unwrap_or(0)) {
                Errno::EINTR => {}
                other => error!("waiting for a completion failed: {other}"),
            }
            return None;
        }

        self.ring.completion().next()
    }

    /// Arm a multishot timeout that completes with `-ETIME` every
    /// `period`, anchored in the boot-time clock so it keeps firing
    /// across wall-clock adjustments. Stays armed until removed.
    pub fn submit_timeout(&mut self, token: EventId, period: Duration) -> bool {
        let ts = timespec(period);
        let entry = opcode::Timeout::new(&ts)
            .flags(types::TimeoutFlags::MULTISHOT | types::TimeoutFlags::BOOTTIME)
            .build()
            .user_data(token);

        self.push_and_submit(&entry)
    }

    /// Update the period of the armed timeout identified by
    /// `target_token` in place. The acknowledgment completes with `0` on
    /// `token`.
    pub fn submit_timeout_update(
        &mut self,
        token: EventId,
        target_token: EventId,
        period: Duration,
    ) -> bool {
        let ts = timespec(period);
        let entry = opcode::TimeoutUpdate::new(target_token, &ts)
            .build()
            .user_data(token);

        self.push_and_submit(&entry)
    }

    /// Cancel the armed timeout identified by `target_token`. The
    /// acknowledgment completes with `0` on `token`; the cancelled
    /// timeout itself completes with `-ECANCELED` on its own token.
    pub fn submit_timeout_remove(&mut self, token: EventId, target_token: EventId) -> bool {
        let entry = opcode::TimeoutRemove::new(target_token)
            .build()
            .user_data(token);

        self.push_and_submit(&entry)
    }

    /// Read exactly `len` bytes from `fd` into `buf` (used for the
    /// fixed-size signalfd records).
    ///
    /// # Safety
    ///
    /// `buf` must stay valid for writes of `len` bytes until the
    /// completion for `token` is reaped.
    pub unsafe fn submit_read(&mut self, token: EventId, fd: RawFd, buf: *mut u8, len: u32) -> bool {
        let entry = opcode::Read::new(types::Fd(fd), buf, len)
            .build()
            .user_data(token);

        self.push_and_submit(&entry)
    }

    /// Resolve `host:port`, open a socket for the first usable candidate,
    /// and submit an async connect on it.
    ///
    /// Resolution happens synchronously in the submit path, like the
    /// libc address database lookup it wraps. Returns `None` on
    /// resolution, socket, or submission failure (the socket is closed
    /// again in the last case).
    // TODO: attempt connect per candidate with fallback instead of
    // committing to the first socket that opens.
    pub fn submit_connect(&mut self, token: EventId, host: &str, port: u16) -> Option<ConnectSubmission> {
        let addrs = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                error!("could not resolve {host}:{port}: {e}");
                return None;
            }
        };

        let mut candidate = None;
        for addr in addrs {
            let family = if addr.is_ipv4() {
                AddressFamily::Inet
            } else {
                AddressFamily::Inet6
            };

            match socket(family, SockType::Stream, SockFlag::empty(), None) {
                Ok(fd) => {
                    candidate = Some((fd.into_raw_fd(), addr));
                    break;
                }
                Err(e) => warn!("socket for candidate {addr} failed: {e}"),
            }
        }

        let Some((fd, addr)) = candidate else {
            error!("no usable address for {host}:{port}");
            return None;
        };

        let addr = Box::new(match addr {
            SocketAddr::V4(v4) => SockaddrStorage::from(v4),
            SocketAddr::V6(v6) => SockaddrStorage::from(v6),
        });
        let entry = opcode::Connect::new(types::Fd(fd), addr.as_ptr(), addr.len())
            .build()
            .user_data(token);

        // The sockaddr is heap allocated and handed back to the caller,
        // which keeps it alive until the completion is reaped.
        if !self.push_and_submit(&entry) {
            // SAFETY: fd was just opened above and nothing else owns it.
            let _ = unsafe { libc::close(fd) };
            return None;
        }

        Some(ConnectSubmission { fd, addr })
    }

    /// Send `data` on `fd`.
    ///
    /// # Safety
    ///
    /// `data` must stay valid for reads until the completion for `token`
    /// is reaped.
    pub unsafe fn submit_send(&mut self, token: EventId, fd: RawFd, data: &[u8]) -> bool {
        let entry = opcode::Send::new(types::Fd(fd), data.as_ptr(), data.len() as u32)
            .build()
            .user_data(token);

        self.push_and_submit(&entry)
    }

    /// Receive up to `len` bytes from `fd` into `buf`.
    ///
    /// # Safety
    ///
    /// `buf` must stay valid for writes of `len` bytes until the
    /// completion for `token` is reaped.
    pub unsafe fn submit_recv(&mut self, token: EventId, fd: RawFd, buf: *mut u8, len: u32) -> bool {
        let entry = opcode::Recv::new(types::Fd(fd), buf, len)
            .build()
            .user_data(token);

        self.push_and_submit(&entry)
    }

    fn push_and_submit(&mut self, entry: &squeue::Entry) -> bool {
        // SAFETY: every buffer referenced by `entry` is owned by an event
        // record (or handed back to the caller) that outlives the
        // submission; the per-operation contracts above state this.
        if unsafe { self.ring.submission().push(entry) }.is_err() {
            error!("submission queue is full");
            return false;
        }

        match self.ring.submit() {
            Ok(submitted) => {
                trace!("submitted {submitted} entries");
                true
            }
            Err(e) => {
                error!("submit failed: {e}");
                false
            }
        }
    }
}

fn timespec(period: Duration) -> types::Timespec {
    types::Timespec::new()
        .sec(period.as_secs())
        .nsec(period.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait_blocking(ring: &mut Ring) -> cqueue::Entry {
        loop {
            if let Some(cqe) = ring.wait_one() {
                return cqe;
            }
        }
    }

    #[test]
    fn timeout_fires_with_etime() {
        let mut ring = Ring::new(8).unwrap();
        assert!(ring.submit_timeout(7, Duration::from_millis(5)));

        let cqe = wait_blocking(&mut ring);
        assert_eq!(cqe.user_data(), 7);
        assert_eq!(cqe.result(), -libc::ETIME);
    }

    #[test]
    fn timeout_remove_acknowledges_and_cancels() {
        let mut ring = Ring::new(8).unwrap();
        assert!(ring.submit_timeout(1, Duration::from_secs(60)));
        assert!(ring.submit_timeout_remove(2, 1));

        let mut results = std::collections::HashMap::new();
        for _ in 0..2 {
            let cqe = wait_blocking(&mut ring);
            results.insert(cqe.user_data(), cqe.result());
        }

        assert_eq!(results.get(&2), Some(&0));
        assert_eq!(results.get(&1), Some(&-libc::ECANCELED));
    }

    #[test]
    fn connect_to_unresolvable_host_fails() {
        let mut ring = Ring::new(8).unwrap();
        assert!(ring
            .submit_connect(3, "host.invalid.example.nowhere", 1)
            .is_none());
    }
}
