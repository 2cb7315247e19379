// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::cell::{Cell, RefCell};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::rc::Rc;
use std::time::Duration;

use proactor::{ConnState, Proactor, TcpClient, TcpDelegate, TimerHandler, TimerState};

/// Records everything the client under test observes.
struct Recorder {
    connects: Rc<Cell<u32>>,
    received: Rc<RefCell<Vec<String>>>,
}

impl Recorder {
    #[allow(clippy::type_complexity)]
    fn new() -> (Box<Self>, Rc<Cell<u32>>, Rc<RefCell<Vec<String>>>) {
        let connects = Rc::new(Cell::new(0));
        let received = Rc::new(RefCell::new(Vec::new()));
        let recorder = Box::new(Self {
            connects: Rc::clone(&connects),
            received: Rc::clone(&received),
        });
        (recorder, connects, received)
    }
}

impl TcpDelegate for Recorder {
    fn on_connect(&mut self) {
        self.connects.set(self.connects.get() + 1);
    }

    fn on_receive(&mut self, data: &[u8]) {
        let text = String::from_utf8_lossy(data);
        let text = text.strip_suffix('\n').unwrap_or(&text);
        self.received.borrow_mut().push(text.to_string());
    }
}

/// Stops the dispatch loop once the deadline passes.
struct StopTimer {
    timer: TimerState,
}

impl StopTimer {
    fn after(deadline: Duration) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            timer: TimerState::new("stop", deadline),
        }))
    }
}

impl TimerHandler for StopTimer {
    fn timer(&self) -> &TimerState {
        &self.timer
    }

    fn timer_mut(&mut self) -> &mut TimerState {
        &mut self.timer
    }

    fn on_expire(&mut self, proactor: &mut Proactor) {
        proactor.stop();
    }
}

/// Echo every line back to the one client this server accepts.
fn echo_one_connection(listener: TcpListener) {
    let Ok((mut stream, _)) = listener.accept() else {
        return;
    };

    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if stream.write_all(&buf[..n]).is_err() {
                    return;
                }
            }
        }
    }
}

#[test]
fn client_connects_and_hears_its_greeting_echoed() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    std::thread::spawn(move || echo_one_connection(listener));

    let mut proactor = Proactor::new().unwrap();

    let (recorder, connects, received) = Recorder::new();
    let client = Rc::new(RefCell::new(TcpClient::new("127.0.0.1", port, recorder)));
    let client_ref = Rc::clone(&client);
    proactor.add_tcp_client(client);

    // The 1s tick connects, the next connected tick greets; the echo
    // arrives shortly after.
    proactor.add_timer_handler(StopTimer::after(Duration::from_millis(3500)));
    proactor.run().unwrap();

    assert_eq!(connects.get(), 1, "expected exactly one on_connect");
    assert_eq!(client_ref.borrow().state(), ConnState::Connected);

    let received = received.borrow();
    assert!(
        !received.is_empty(),
        "expected the echoed greeting within the run window"
    );
    for line in received.iter() {
        assert!(
            line.starts_with("client saying hi at "),
            "unexpected payload: {line}"
        );
    }
}

#[test]
fn client_reconnects_once_the_server_shows_up() {
    // Pick a port that is free right now, then leave it closed until
    // partway through the run.
    let placeholder = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = placeholder.local_addr().unwrap().port();
    drop(placeholder);

    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(1500));
        let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
        echo_one_connection(listener);
    });

    let mut proactor = Proactor::new().unwrap();

    let (recorder, connects, _received) = Recorder::new();
    let client = Rc::new(RefCell::new(TcpClient::new("127.0.0.1", port, recorder)));
    let client_ref = Rc::clone(&client);
    proactor.add_tcp_client(client);

    proactor.add_timer_handler(StopTimer::after(Duration::from_millis(4500)));
    proactor.run().unwrap();

    assert_eq!(
        connects.get(),
        1,
        "on_connect must fire exactly once, after the server is up"
    );
    assert_eq!(client_ref.borrow().state(), ConnState::Connected);
}

#[test]
fn queued_sends_drain_on_the_connected_tick() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let (tx, rx) = std::sync::mpsc::channel::<Vec<u8>>();
    std::thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let mut buf = [0u8; 1024];
        let mut seen = Vec::new();
        while seen.len() < b"hello from the queue\n".len() {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => seen.extend_from_slice(&buf[..n]),
            }
        }
        let _ = tx.send(seen);
    });

    let mut proactor = Proactor::new().unwrap();

    let (recorder, _connects, _received) = Recorder::new();
    let client = Rc::new(RefCell::new(TcpClient::new("127.0.0.1", port, recorder)));
    client
        .borrow_mut()
        .queue_send(b"hello from the queue\n".to_vec());
    proactor.add_tcp_client(client);

    proactor.add_timer_handler(StopTimer::after(Duration::from_millis(3500)));
    proactor.run().unwrap();

    let seen = rx
        .recv_timeout(Duration::from_secs(1))
        .expect("server saw no data");
    let seen = String::from_utf8_lossy(&seen);
    assert!(
        seen.contains("hello from the queue"),
        "queued bytes did not arrive: {seen:?}"
    );
}
