// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use proactor::{Proactor, TimerHandler, TimerState};

/// Counts its own expirations.
struct CountingTimer {
    timer: TimerState,
    fired: Rc<Cell<u32>>,
}

impl CountingTimer {
    fn new(name: &str, period: Duration) -> (Rc<RefCell<Self>>, Rc<Cell<u32>>) {
        let fired = Rc::new(Cell::new(0));
        let timer = Rc::new(RefCell::new(Self {
            timer: TimerState::new(name, period),
            fired: Rc::clone(&fired),
        }));
        (timer, fired)
    }
}

impl TimerHandler for CountingTimer {
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

/// Stops the dispatch loop on its first expiration.
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

/// Runs a side effect on every expiration.
struct ActionTimer<F: FnMut(&mut Proactor)> {
    timer: TimerState,
    action: F,
}

impl<F: FnMut(&mut Proactor) + 'static> ActionTimer<F> {
    fn every(period: Duration, action: F) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            timer: TimerState::new("action", period),
            action,
        }))
    }
}

impl<F: FnMut(&mut Proactor)> TimerHandler for ActionTimer<F> {
    fn timer(&self) -> &TimerState {
        &self.timer
    }

    fn timer_mut(&mut self) -> &mut TimerState {
        &mut self.timer
    }

    fn on_expire(&mut self, proactor: &mut Proactor) {
        (self.action)(proactor);
    }
}

#[test]
fn periodic_timer_fires_repeatedly() {
    let mut proactor = Proactor::new().unwrap();

    let (timer, fired) = CountingTimer::new("tick", Duration::from_millis(100));
    proactor.add_timer_handler(timer);
    proactor.add_timer_handler(StopTimer::after(Duration::from_millis(550)));

    proactor.run().unwrap();

    let fired = fired.get();
    assert!(
        (4..=6).contains(&fired),
        "expected about 5 expirations in 550ms, got {fired}"
    );
}

#[test]
fn interval_update_speeds_up_a_running_timer() {
    let mut proactor = Proactor::new().unwrap();

    let (timer, fired) = CountingTimer::new("tick", Duration::from_millis(100));
    let target = timer.borrow().timer().id();
    proactor.add_timer_handler(timer);

    // Repeated updates to the same value are no-ops, so only the first
    // tick of this one actually changes the target's period.
    let updater = ActionTimer::every(Duration::from_millis(250), move |proactor| {
        proactor.update_timer_interval(target, Duration::from_millis(25));
    });
    proactor.add_timer_handler(updater);
    proactor.add_timer_handler(StopTimer::after(Duration::from_millis(1000)));

    proactor.run().unwrap();

    let fired = fired.get();
    assert!(
        fired >= 10,
        "expected the updated 25ms cadence to push past 10 expirations, got {fired}"
    );
}

#[test]
fn removed_timer_never_fires() {
    let mut proactor = Proactor::new().unwrap();

    let (timer, fired) = CountingTimer::new("doomed", Duration::from_millis(500));
    let target = timer.borrow().timer().id();
    proactor.add_timer_handler(timer);

    let removed = Rc::new(Cell::new(false));
    let removed_flag = Rc::clone(&removed);
    let remover = ActionTimer::every(Duration::from_millis(100), move |proactor| {
        if !removed_flag.get() {
            proactor.remove_timer_handler(target);
            removed_flag.set(true);
        }
    });
    proactor.add_timer_handler(remover);
    proactor.add_timer_handler(StopTimer::after(Duration::from_millis(700)));

    proactor.run().unwrap();

    assert_eq!(fired.get(), 0, "cancelled timer must not fire");
    // The doomed timer is gone; the remover and stopper remain.
    assert_eq!(proactor.timer_handler_count(), 2);
}

#[test]
fn register_then_remove_before_running_leaves_nothing_behind() {
    let mut proactor = Proactor::new().unwrap();

    let (timer, fired) = CountingTimer::new("transient", Duration::from_millis(50));
    let id = timer.borrow().timer().id();

    proactor.add_timer_handler(timer);
    proactor.remove_timer_handler(id);

    assert_eq!(proactor.timer_handler_count(), 0);
    assert_eq!(proactor.pending_event_count(), 0);
    assert_eq!(fired.get(), 0);
}
