// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::*;

/// Wall-clock timestamp formatted as `DD-MM-YYYY HH:MM:SS:NNNNNNNNN` in
/// local time. Used for log prefixes and the TCP greeting payload.
pub fn timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    let secs = now.as_secs() as libc::time_t;
    // SAFETY: localtime_r fills `tm` from a valid time_t; an all-zero tm
    // is a valid value for it to start from.
    let mut tm: libc::tm = unsafe { std::mem::zeroed() };
    unsafe { libc::localtime_r(&secs, &mut tm) };

    format!(
        "{:02}-{:02}-{:04} {:02}:{:02}:{:02}:{:09}",
        tm.tm_mday,
        tm.tm_mon + 1,
        tm.tm_year + 1900,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec,
        now.subsec_nanos(),
    )
}

/// Scoped timing probe. On drop, warns when the wall clock exceeded the
/// budget, otherwise traces the elapsed time.
pub struct ScopedDeadline {
    tag: String,
    deadline: Duration,
    start: Instant,
}

impl ScopedDeadline {
    pub fn new(tag: impl Into<String>, deadline: Duration) -> Self {
        Self {
            tag: tag.into(),
            deadline,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopedDeadline {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        if elapsed <= self.deadline {
            trace!("deadline '{}' took {elapsed:?}", self.tag);
        } else {
            warn!(
                "deadline '{}' took {elapsed:?}, over its {:?} budget",
                self.tag, self.deadline
            );
        }
    }
}
