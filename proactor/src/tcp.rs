// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::time::Duration;

use log::*;
use nix::errno::Errno;
use nix::sys::socket::{recv, MsgFlags};

use crate::proactor::Proactor;
use crate::timer::{TimerHandler, TimerState};
use crate::timing;

/// Connection state of a TCP client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    Unknown,
    Broken,
    Connecting,
    Connected,
}

// Tick periods per connection state.
const PROBE_PERIOD: Duration = Duration::from_secs(1);
const CONNECTING_PERIOD: Duration = Duration::from_millis(50);
const CONNECTED_PERIOD: Duration = Duration::from_secs(5);
const BROKEN_PERIOD: Duration = Duration::from_millis(20);

/// User hooks for a TCP client's connection lifecycle. Both run on the
/// dispatch thread and must not block.
pub trait TcpDelegate {
    /// The async connect completed and the socket is usable.
    fn on_connect(&mut self);

    /// A receive completed; `data` is the bytes that arrived.
    fn on_receive(&mut self, data: &[u8]);
}

/// A TCP client driven by its own one-second timer: the tick reconnects
/// when the connection is down, probes peer health when it is up, drains
/// the outbound queue, and keeps exactly one receive outstanding.
///
/// Register with [`Proactor::add_tcp_client`]; the proactor owns the
/// reconnect state machine and invokes the [`TcpDelegate`] hooks.
pub struct TcpClient {
    timer: TimerState,
    host: String,
    port: u16,
    pub(crate) fd: RawFd,
    pub(crate) state: ConnState,
    pub(crate) tx_queue: VecDeque<Vec<u8>>,
    pub(crate) rx_pending: bool,
    pub(crate) delegate: Box<dyn TcpDelegate>,
}

impl TcpClient {
    pub fn new(host: impl Into<String>, port: u16, delegate: Box<dyn TcpDelegate>) -> Self {
        let host = host.into();
        let name = format!("{host}@{port}");

        Self {
            timer: TimerState::new(name, PROBE_PERIOD),
            host,
            port,
            fd: -1,
            state: ConnState::Unknown,
            tx_queue: VecDeque::new(),
            rx_pending: false,
            delegate,
        }
    }

    pub fn id(&self) -> crate::HandlerId {
        self.timer.id()
    }

    pub fn name(&self) -> &str {
        self.timer.name()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Queue bytes for transmission. The queue is drained front to back
    /// on every connected tick, one send submission per element.
    pub fn queue_send(&mut self, data: Vec<u8>) {
        self.tx_queue.push_back(data);
    }

    /// Drop the socket and fall back to the broken state. In-flight send
    /// or receive completions for the old fd become benign strays.
    pub(crate) fn close_socket(&mut self) {
        if self.fd >= 0 {
            debug!("[{}] closing fd({})", self.name(), self.fd);
            // SAFETY: fd is a socket owned by this client and is not used
            // after this point.
            let _ = unsafe { libc::close(self.fd) };
        }

        self.fd = -1;
        self.rx_pending = false;
        self.state = ConnState::Broken;
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        if self.fd >= 0 {
            // SAFETY: last owner of the socket.
            let _ = unsafe { libc::close(self.fd) };
        }
    }
}

impl TimerHandler for TcpClient {
    fn timer(&self) -> &TimerState {
        &self.timer
    }

    fn timer_mut(&mut self) -> &mut TimerState {
        &mut self.timer
    }

    fn on_expire(&mut self, proactor: &mut Proactor) {
        let next_period = match self.state {
            ConnState::Unknown | ConnState::Broken => {
                proactor.start_tcp_connect(self);
                PROBE_PERIOD
            }

            // Connect already in flight; check back quickly.
            ConnState::Connecting => CONNECTING_PERIOD,

            ConnState::Connected => {
                if peer_alive(self.fd, self.name()) {
                    let greeting = format!("client saying hi at {}\n", timing::timestamp());
                    self.tx_queue.push_back(greeting.into_bytes());

                    proactor.drain_tcp_tx(self);
                    proactor.ensure_tcp_rx(self);
                    CONNECTED_PERIOD
                } else {
                    info!("[{}] peer unreachable", self.name());
                    self.close_socket();
                    BROKEN_PERIOD
                }
            }
        };

        proactor.request_timer_update(&mut self.timer, next_period);
    }
}

/// Non-blocking peek of a single byte to see whether the peer is still
/// there: zero bytes means the peer shut down, data (or nothing to read
/// yet) means it is alive.
fn peer_alive(fd: RawFd, name: &str) -> bool {
    let mut probe = [0u8; 1];

    match recv(fd, &mut probe, MsgFlags::MSG_PEEK | MsgFlags::MSG_DONTWAIT) {
        Ok(0) => {
            debug!("[{name}] peek saw an orderly shutdown");
            false
        }
        Ok(_) => true,
        Err(Errno::EINTR) | Err(Errno::EWOULDBLOCK) => true,
        Err(e) => {
            warn!("[{name}] peek probe failed: {e}");
            false
        }
    }
}
