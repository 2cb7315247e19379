// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

use io_uring::cqueue;
use log::*;
use nix::errno::Errno;
use nix::sys::signal::Signal;

use crate::events::{self, Event, RECV_BUFFER_SIZE};
use crate::ring::{Ring, QUEUE_DEPTH};
use crate::signals::{self, SignalCallback, SignalHandler, EXIT_SIGNALS};
use crate::tcp::{ConnState, TcpClient};
use crate::timer::{TimerHandler, TimerState};
use crate::timing::ScopedDeadline;
use crate::{Error, EventId, HandlerId};

/// Budget for a single handler callback on the dispatch thread.
const CALLBACK_DEADLINE: Duration = Duration::from_millis(20);

/// The single-threaded dispatch core.
///
/// Owns the ring, the pending-event registry, and the handler
/// registries. [`run`](Proactor::run) blocks on the ring, resolves each
/// completion to its pending event by token, runs the kind-specific
/// completion routine, and retires the event unless it is multishot.
///
/// Handlers are registered behind `Rc<RefCell<_>>`; the proactor keeps
/// its clone alive until the handler's cancellation handshake finishes,
/// so an in-flight completion can never reach freed handler state.
///
/// The identifier-keyed operations (`start_timer_handler`,
/// `update_timer_interval`, ...) borrow the target handler and therefore
/// must not be called from inside that same handler's callback; a
/// callback adjusts its own timer through
/// [`request_timer_update`](Proactor::request_timer_update) with the
/// state it already holds. Removal is safe from anywhere, including the
/// handler's own callback.
pub struct Proactor {
    ring: Ring,
    running: bool,
    pending_events: HashMap<EventId, Event>,
    timer_handlers: HashMap<HandlerId, Rc<RefCell<dyn TimerHandler>>>,
    tcp_clients: HashMap<HandlerId, Rc<RefCell<TcpClient>>>,
    signal_handlers: HashMap<i32, SignalHandler>,
}

impl Proactor {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            ring: Ring::new(QUEUE_DEPTH)?,
            running: false,
            pending_events: HashMap::new(),
            timer_handlers: HashMap::new(),
            tcp_clients: HashMap::new(),
            signal_handlers: HashMap::new(),
        })
    }

    /// Attach the exit signal handlers, arm every registered timer, and
    /// dispatch completions until a shutdown signal (or [`stop`]) flips
    /// the running flag.
    ///
    /// Completion-side failures never escape this loop; only signal
    /// attachment at entry can fail.
    ///
    /// [`stop`]: Proactor::stop
    pub fn run(&mut self) -> Result<(), Error> {
        self.attach_exit_handlers()?;
        self.running = true;
        self.start_all_handlers();

        while self.running {
            let Some(cqe) = self.ring.wait_one() else {
                continue;
            };
            self.dispatch(&cqe);
        }

        Ok(())
    }

    /// End the dispatch loop after the completion currently being
    /// processed. This is what the default shutdown signal callback does.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn pending_event_count(&self) -> usize {
        self.pending_events.len()
    }

    pub fn timer_handler_count(&self) -> usize {
        self.timer_handlers.len()
    }

    pub fn tcp_client_count(&self) -> usize {
        self.tcp_clients.len()
    }

    // ---- registration ------------------------------------------------

    /// Register a periodic timer. Armed immediately when the loop is
    /// already running, otherwise en masse at loop entry.
    pub fn add_timer_handler(&mut self, handler: Rc<RefCell<dyn TimerHandler>>) {
        let (id, name) = {
            let h = handler.borrow();
            (h.timer().id(), h.timer().name().to_string())
        };

        if self.timer_handlers.contains_key(&id) {
            error!("[{name}] handler already registered");
            return;
        }

        self.timer_handlers.insert(id, handler);
        debug!("[{name}] handler registered id({id})");

        if self.running {
            self.start_timer_handler(id);
        }
    }

    /// Arm a registered timer. A no-op (aside from logging) when the
    /// timer is already armed.
    pub fn start_timer_handler(&mut self, id: HandlerId) {
        let Some(handler) = self.timer_handlers.get(&id).cloned() else {
            error!("cannot start handler({id}), not registered");
            return;
        };

        let mut h = handler.borrow_mut();
        self.arm_timer(h.timer_mut());
    }

    /// Change a timer's period. No submission when the period is
    /// unchanged, or while the timer is not armed (the new period is
    /// picked up on arming).
    pub fn update_timer_interval(&mut self, id: HandlerId, period: Duration) {
        let Some(handler) = self.timer_handlers.get(&id).cloned() else {
            error!("cannot update handler({id}), not registered");
            return;
        };

        let mut h = handler.borrow_mut();
        self.request_timer_update(h.timer_mut(), period);
    }

    /// Request removal of a timer. The armed timeout is cancelled
    /// asynchronously; the handler leaves the registry only when the
    /// kernel acknowledges with the `-ECANCELED` completion of the
    /// original expiry event.
    pub fn remove_timer_handler(&mut self, id: HandlerId) {
        if !self.timer_handlers.contains_key(&id) {
            error!("cannot remove handler({id}), not registered");
            return;
        }

        info!("handler({id}) removal requested");

        // Find the armed expiry for this handler among the pending
        // events. Scanning here (rather than borrowing the handler for
        // its token) keeps removal callable from the handler's own
        // callback.
        let target = self.pending_events.iter().find_map(|(token, event)| match event {
            Event::TimerExpired { handler } if *handler == id => Some(*token),
            _ => None,
        });

        match target {
            Some(target) => self.request_timeout_cancel(id, target),
            None => {
                // Nothing armed; drop the registration right away.
                self.timer_handlers.remove(&id);
                self.tcp_clients.remove(&id);
            }
        }
    }

    /// Register a TCP client. The client lands in both registries: its
    /// embedded timer drives the reconnect state machine, and the TCP
    /// registry resolves connect/send/recv completions back to it.
    pub fn add_tcp_client(&mut self, client: Rc<RefCell<TcpClient>>) {
        let (id, name) = {
            let c = client.borrow();
            (c.id(), c.name().to_string())
        };

        if self.tcp_clients.contains_key(&id) {
            error!("[{name}] client already registered");
            return;
        }

        self.tcp_clients.insert(id, Rc::clone(&client));
        self.add_timer_handler(client);
    }

    /// Request removal of a TCP client: closes its socket, drops it from
    /// the TCP registry right away, and cancels its timer. Completions of
    /// in-flight connect/send/recv submissions arriving after removal
    /// fail the registry lookup benignly.
    pub fn remove_tcp_client(&mut self, id: HandlerId) {
        // Leave the TCP registry immediately; only the timer registration
        // waits for the cancellation ack. A deferred drop here would let
        // an in-flight connect completion resurrect the client.
        let Some(client) = self.tcp_clients.remove(&id) else {
            error!("cannot remove client({id}), not registered");
            return;
        };

        {
            let mut c = client.borrow_mut();
            info!("[{}] client removal requested", c.name());
            c.close_socket();
        }

        self.remove_timer_handler(id);
    }

    // ---- timer submissions -------------------------------------------

    /// Arm the multishot timeout for a timer that is not already armed.
    pub(crate) fn arm_timer(&mut self, state: &mut TimerState) {
        if let Some(token) = state.token() {
            info!("[{}] timer already armed token({token})", state.name());
            return;
        }

        let token = events::next_token();
        if !self.ring.submit_timeout(token, state.period()) {
            error!("[{}] timeout submission failed", state.name());
            return;
        }

        self.pending_events
            .insert(token, Event::TimerExpired { handler: state.id() });
        state.set_token(Some(token));
        debug!("[{}] timer armed token({token})", state.name());
    }

    /// Update a timer's period in place. Usable from within the owning
    /// handler's callback, which already holds its state.
    pub fn request_timer_update(&mut self, state: &mut TimerState, period: Duration) {
        if state.period() == period {
            return;
        }

        // Not armed: nothing in the kernel to diverge from, so just store
        // the new period for the next arming.
        let Some(target) = state.token() else {
            state.set_period(period);
            return;
        };

        let token = events::next_token();
        if !self.ring.submit_timeout_update(token, target, period) {
            // The armed timeout still runs at the old period; keep the
            // state matching it so a retry is not short-circuited.
            error!("[{}] timer update submission failed", state.name());
            return;
        }

        state.set_period(period);
        self.pending_events
            .insert(token, Event::TimerUpdate { handler: state.id() });
        debug!(
            "[{}] timer update requested token({token}) target({target}) period({period:?})",
            state.name()
        );
    }

    fn request_timeout_cancel(&mut self, id: HandlerId, target: EventId) {
        let token = events::next_token();
        if !self.ring.submit_timeout_remove(token, target) {
            error!("timer cancel submission failed for handler({id})");
            return;
        }

        self.pending_events
            .insert(token, Event::TimerCancel { handler: id });
        debug!("handler({id}) timer cancel requested token({token}) target({target})");
    }

    fn start_all_handlers(&mut self) {
        let handlers: Vec<_> = self.timer_handlers.values().cloned().collect();
        for handler in handlers {
            let mut h = handler.borrow_mut();
            self.arm_timer(h.timer_mut());
        }
    }

    // ---- signal subsystem --------------------------------------------

    /// Block SIGINT/SIGQUIT/SIGTERM, route them through signalfds, and
    /// ignore SIGPIPE. Any of the three shuts the loop down; an
    /// unexpected signal reaching the callback aborts the process.
    fn attach_exit_handlers(&mut self) -> Result<(), Error> {
        signals::ignore_sigpipe();

        let callback: SignalCallback = Rc::new(|proactor, info| {
            let signal = info.ssi_signo as i32;
            match signal {
                libc::SIGINT | libc::SIGQUIT | libc::SIGTERM => {
                    info!("received shutdown signal {}", signals::describe(signal));
                    proactor.stop();
                }
                _ => {
                    error!(
                        "critical: received unexpected signal {}, aborting",
                        signals::describe(signal)
                    );
                    std::process::abort();
                }
            }
        });

        for signal in EXIT_SIGNALS {
            self.add_signal_handler(signal, Rc::clone(&callback))?;
        }

        Ok(())
    }

    fn add_signal_handler(&mut self, signal: Signal, callback: SignalCallback) -> Result<(), Error> {
        let raw = signal as i32;

        if self.signal_handlers.contains_key(&raw) {
            error!("signal {signal} already attached");
            return Err(Error::SignalAlreadyAttached(signal));
        }

        let handler = SignalHandler::attach(signal, callback)?;
        let fd = handler.raw_fd();
        self.signal_handlers.insert(raw, handler);

        if !self.request_signal_read(raw, fd) {
            return Err(Error::Submit("signal read"));
        }

        debug!("signal {signal} attached fd({fd})");
        Ok(())
    }

    /// Queue one fixed-size read on a signalfd. Each delivery consumes
    /// its event; the completion routine re-arms with a fresh one.
    fn request_signal_read(&mut self, signal: i32, fd: RawFd) -> bool {
        let token = events::next_token();

        // SAFETY: signalfd_siginfo is a plain C struct; all-zero is a
        // valid value for the kernel to overwrite.
        let mut info: Box<libc::signalfd_siginfo> = Box::new(unsafe { std::mem::zeroed() });
        let buf = (&mut *info as *mut libc::signalfd_siginfo).cast::<u8>();
        let len = std::mem::size_of::<libc::signalfd_siginfo>() as u32;

        // SAFETY: the buffer is heap allocated and owned by the event
        // record, which stays in the registry until this read completes.
        if !unsafe { self.ring.submit_read(token, fd, buf, len) } {
            error!(
                "signal read submission failed for {}",
                signals::describe(signal)
            );
            return false;
        }

        self.pending_events
            .insert(token, Event::Signal { signal, fd, info });
        trace!("{} read queued token({token})", signals::describe(signal));
        true
    }

    // ---- tcp submissions ---------------------------------------------

    /// Resolve and submit an async connect for a client that is down.
    /// On submission failure the state is left as is, so the next tick
    /// retries.
    pub(crate) fn start_tcp_connect(&mut self, client: &mut TcpClient) {
        let token = events::next_token();

        let Some(sub) = self.ring.submit_connect(token, client.host(), client.port()) else {
            error!("[{}] connect submission failed", client.name());
            return;
        };

        debug!(
            "[{}] connect submitted token({token}) fd({})",
            client.name(),
            sub.fd
        );
        self.pending_events.insert(
            token,
            Event::TcpConnect {
                handler: client.id(),
                fd: sub.fd,
                addr: sub.addr,
            },
        );
        client.state = ConnState::Connecting;
    }

    /// Drain the client's outbound queue, one send submission per
    /// element. On a full queue the element goes back to the front and
    /// draining stops; the next tick picks it up again.
    pub(crate) fn drain_tcp_tx(&mut self, client: &mut TcpClient) {
        while let Some(data) = client.tx_queue.pop_front() {
            let token = events::next_token();

            // SAFETY: the bytes are heap allocated and move into the
            // event record, which owns them until the send completes.
            if !unsafe { self.ring.submit_send(token, client.fd, &data) } {
                error!(
                    "[{}] send submission failed, requeueing {} bytes",
                    client.name(),
                    data.len()
                );
                client.tx_queue.push_front(data);
                return;
            }

            trace!(
                "[{}] send submitted token({token}) {} bytes",
                client.name(),
                data.len()
            );
            self.pending_events.insert(
                token,
                Event::TcpSend {
                    handler: client.id(),
                    fd: client.fd,
                    data,
                },
            );
        }
    }

    /// Keep exactly one receive outstanding for a connected client.
    pub(crate) fn ensure_tcp_rx(&mut self, client: &mut TcpClient) {
        if client.rx_pending {
            return;
        }

        let mut buffer: Box<[u8; RECV_BUFFER_SIZE]> = Box::new([0; RECV_BUFFER_SIZE]);

        let token = events::next_token();
        // SAFETY: the buffer is heap allocated and owned by the event
        // record, which stays in the registry until the recv completes.
        if !unsafe {
            self.ring
                .submit_recv(token, client.fd, buffer.as_mut_ptr(), RECV_BUFFER_SIZE as u32)
        } {
            error!("[{}] recv submission failed", client.name());
            return;
        }

        trace!("[{}] recv submitted token({token})", client.name());
        self.pending_events.insert(
            token,
            Event::TcpRecv {
                handler: client.id(),
                fd: client.fd,
                buffer,
            },
        );
        client.rx_pending = true;
    }

    // ---- dispatch ----------------------------------------------------

    fn dispatch(&mut self, cqe: &cqueue::Entry) {
        let token = cqe.user_data();
        let res = cqe.result();

        let Some(event) = self.pending_events.remove(&token) else {
            error!("no pending event for user-data({token}), dropping completion res({res})");
            return;
        };

        debug!(
            "completion {}(token({token})) res({res}) retire({})",
            event.kind(),
            event.retire_on_complete()
        );

        // An event retires by simply not being reinserted. The multishot
        // timer expiry is the one kind that survives its completion;
        // handle_timer_expired puts it back while the timeout stays
        // armed in the kernel.
        match event {
            Event::TimerExpired { handler } => self.handle_timer_expired(token, handler, res),
            Event::TimerUpdate { handler } => self.handle_timer_update(handler, res),
            Event::TimerCancel { handler } => self.handle_timer_cancel(handler, res),
            Event::Signal { signal, fd, info } => self.handle_signal(signal, fd, &info, res),
            Event::TcpConnect { handler, fd, .. } => self.handle_tcp_connect(handler, fd, res),
            Event::TcpSend { handler, .. } => self.handle_tcp_send(handler, res),
            Event::TcpRecv {
                handler,
                fd,
                buffer,
            } => self.handle_tcp_recv(handler, fd, buffer, res),
        }
    }

    fn handle_timer_expired(&mut self, token: EventId, id: HandlerId, res: i32) {
        match -res {
            // Timer fired; the multishot timeout stays armed.
            libc::ETIME => {
                let Some(handler) = self.timer_handlers.get(&id).cloned() else {
                    error!("no timer handler({id}) for token({token})");
                    self.pending_events
                        .insert(token, Event::TimerExpired { handler: id });
                    return;
                };

                // Reinsert before the callback so the registry reflects
                // the armed timeout while user code runs (removal from
                // inside the callback scans for it).
                self.pending_events
                    .insert(token, Event::TimerExpired { handler: id });

                let mut h = handler.borrow_mut();
                debug!("[{}] triggering handler token({token})", h.timer().name());

                let _probe = ScopedDeadline::new(
                    format!("timer-handler:{}", h.timer().name()),
                    CALLBACK_DEADLINE,
                );
                h.on_expire(self);
            }

            // Cancellation acknowledged end to end; the handler goes now
            // and the expiry event stays retired.
            libc::ECANCELED => {
                let Some(handler) = self.timer_handlers.remove(&id) else {
                    error!("no timer handler({id}) for cancelled token({token})");
                    return;
                };

                let mut h = handler.borrow_mut();
                h.timer_mut().set_token(None);
                info!("[{}] timer retired token({token})", h.timer().name());
                drop(h);

                self.tcp_clients.remove(&id);
            }

            err => {
                error!(
                    "timer expiry failed token({token}) res({res}) {}",
                    Errno::from_raw(err)
                );
                if let Some(handler) = self.timer_handlers.get(&id) {
                    handler.borrow_mut().timer_mut().set_token(None);
                }
            }
        }
    }

    fn handle_timer_update(&mut self, id: HandlerId, res: i32) {
        match res {
            0 => debug!("timer update acknowledged for handler({id})"),
            _ => error!(
                "timer update failed for handler({id}) res({res}) {}",
                Errno::from_raw(-res)
            ),
        }
    }

    fn handle_timer_cancel(&mut self, id: HandlerId, res: i32) {
        match res {
            0 => debug!("timer cancellation acknowledged for handler({id})"),
            _ => error!(
                "timer cancellation failed for handler({id}) res({res}) {}",
                Errno::from_raw(-res)
            ),
        }
    }

    fn handle_signal(&mut self, signal: i32, fd: RawFd, info: &libc::signalfd_siginfo, res: i32) {
        if res < 0 {
            error!(
                "read failed for {}: {}",
                signals::describe(signal),
                Errno::from_raw(-res)
            );
            return;
        }

        let expected = std::mem::size_of::<libc::signalfd_siginfo>();
        if res as usize != expected {
            error!(
                "short read for {}: expected({expected}) actual({res})",
                signals::describe(signal)
            );
            return;
        }

        let Some(handler) = self.signal_handlers.get(&signal) else {
            error!(
                "no handler attached for {}, dropping delivery",
                signals::describe(signal)
            );
            return;
        };

        info!("invoking handler for {}({signal})", handler.signal);
        let callback = Rc::clone(&handler.callback);
        (*callback)(self, info);

        if !self.request_signal_read(signal, fd) {
            error!(
                "critical: failed to re-arm {} read, deliveries stop",
                signals::describe(signal)
            );
        }
    }

    fn handle_tcp_connect(&mut self, id: HandlerId, fd: RawFd, res: i32) {
        let Some(client) = self.tcp_clients.get(&id).cloned() else {
            warn!("no tcp client({id}) for connect completion, closing fd({fd})");
            if fd >= 0 {
                // SAFETY: the event owned this socket and nothing else
                // will use it.
                let _ = unsafe { libc::close(fd) };
            }
            return;
        };

        let mut c = client.borrow_mut();

        if res < 0 {
            warn!("[{}] connect failed: {}", c.name(), Errno::from_raw(-res));
            if fd >= 0 {
                // SAFETY: as above, the socket never reached the client.
                let _ = unsafe { libc::close(fd) };
            }
            c.state = ConnState::Broken;
            return;
        }

        c.fd = fd;
        c.state = ConnState::Connected;
        info!("[{}] connected fd({fd})", c.name());
        c.delegate.on_connect();
    }

    fn handle_tcp_send(&mut self, id: HandlerId, res: i32) {
        if res < 0 {
            warn!(
                "tcp send failed for client({id}): {}",
                Errno::from_raw(-res)
            );
        } else {
            trace!("tcp send completed for client({id}): {res} bytes");
        }
    }

    fn handle_tcp_recv(
        &mut self,
        id: HandlerId,
        fd: RawFd,
        buffer: Box<[u8; RECV_BUFFER_SIZE]>,
        res: i32,
    ) {
        let Some(client) = self.tcp_clients.get(&id).cloned() else {
            warn!("no tcp client({id}) for recv completion, dropping");
            return;
        };

        let mut c = client.borrow_mut();
        c.rx_pending = false;

        if res < 0 {
            warn!("[{}] recv failed: {}", c.name(), Errno::from_raw(-res));
            return;
        }

        if res == 0 {
            // Peer sent a FIN; the next tick's probe moves the state
            // machine on.
            info!("[{}] connection received 0 bytes", c.name());
            return;
        }

        c.delegate.on_receive(&buffer[..res as usize]);

        // Go straight back to listening while the connection holds.
        if c.state == ConnState::Connected && c.fd == fd {
            self.resubmit_tcp_recv(&mut c, buffer);
        }
    }

    fn resubmit_tcp_recv(&mut self, client: &mut TcpClient, mut buffer: Box<[u8; RECV_BUFFER_SIZE]>) {
        let token = events::next_token();

        // SAFETY: the buffer moves back into the new event record, which
        // owns it until the recv completes.
        if !unsafe {
            self.ring
                .submit_recv(token, client.fd, buffer.as_mut_ptr(), RECV_BUFFER_SIZE as u32)
        } {
            error!("[{}] recv resubmission failed", client.name());
            return;
        }

        self.pending_events.insert(
            token,
            Event::TcpRecv {
                handler: client.id(),
                fd: client.fd,
                buffer,
            },
        );
        client.rx_pending = true;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    struct Tick {
        timer: TimerState,
        fired: Rc<Cell<u32>>,
    }

    impl Tick {
        fn new(period: Duration) -> (Rc<RefCell<Self>>, Rc<Cell<u32>>) {
            let fired = Rc::new(Cell::new(0));
            let tick = Rc::new(RefCell::new(Self {
                timer: TimerState::new("tick", period),
                fired: Rc::clone(&fired),
            }));
            (tick, fired)
        }
    }

    impl TimerHandler for Tick {
        fn timer(&self) -> &TimerState {
            &self.timer
        }

        fn timer_mut(&mut self) -> &mut TimerState {
            &mut self.timer
        }

        fn on_expire(&mut self, _proactor: &mut Proactor) {
            self.fired.set(self.fired.get() + 1);
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut proactor = Proactor::new().unwrap();
        let (tick, _fired) = Tick::new(Duration::from_secs(1));

        proactor.add_timer_handler(tick.clone());
        proactor.add_timer_handler(tick);

        assert_eq!(proactor.timer_handler_count(), 1);
    }

    #[test]
    fn equal_period_update_submits_nothing() {
        let mut proactor = Proactor::new().unwrap();
        let (tick, _fired) = Tick::new(Duration::from_millis(100));
        let id = tick.borrow().timer().id();

        proactor.add_timer_handler(tick.clone());
        let before = proactor.pending_event_count();

        proactor.update_timer_interval(id, Duration::from_millis(100));
        assert_eq!(proactor.pending_event_count(), before);

        // A disarmed timer stores the new period without submitting.
        proactor.update_timer_interval(id, Duration::from_millis(250));
        assert_eq!(proactor.pending_event_count(), before);
        assert_eq!(tick.borrow().timer().period(), Duration::from_millis(250));
    }

    #[test]
    fn removing_an_unarmed_handler_empties_the_registry() {
        let mut proactor = Proactor::new().unwrap();
        let (tick, _fired) = Tick::new(Duration::from_secs(1));
        let id = tick.borrow().timer().id();

        proactor.add_timer_handler(tick);
        assert_eq!(proactor.timer_handler_count(), 1);

        proactor.remove_timer_handler(id);
        assert_eq!(proactor.timer_handler_count(), 0);
        assert_eq!(proactor.pending_event_count(), 0);
    }

    #[test]
    fn tcp_client_registers_in_both_registries() {
        struct Quiet;
        impl crate::TcpDelegate for Quiet {
            fn on_connect(&mut self) {}
            fn on_receive(&mut self, _data: &[u8]) {}
        }

        let mut proactor = Proactor::new().unwrap();
        let client = Rc::new(RefCell::new(TcpClient::new(
            "127.0.0.1",
            8080,
            Box::new(Quiet),
        )));
        let id = client.borrow().id();

        proactor.add_tcp_client(client);
        assert_eq!(proactor.tcp_client_count(), 1);
        assert_eq!(proactor.timer_handler_count(), 1);

        proactor.remove_tcp_client(id);
        assert_eq!(proactor.tcp_client_count(), 0);
        assert_eq!(proactor.timer_handler_count(), 0);
    }

    #[test]
    fn removing_an_armed_tcp_client_leaves_the_tcp_registry_at_once() {
        struct Quiet;
        impl crate::TcpDelegate for Quiet {
            fn on_connect(&mut self) {}
            fn on_receive(&mut self, _data: &[u8]) {}
        }

        let mut proactor = Proactor::new().unwrap();
        let client = Rc::new(RefCell::new(TcpClient::new(
            "127.0.0.1",
            8080,
            Box::new(Quiet),
        )));
        let id = client.borrow().id();

        proactor.add_tcp_client(client);
        proactor.start_timer_handler(id);
        assert_eq!(proactor.pending_event_count(), 1);

        // With the timer armed, the timer registration must survive until
        // the cancellation ack, but the TCP registry empties right away so
        // in-flight completions cannot find the client any more.
        proactor.remove_tcp_client(id);
        assert_eq!(proactor.tcp_client_count(), 0);
        assert_eq!(proactor.timer_handler_count(), 1);
    }
}
