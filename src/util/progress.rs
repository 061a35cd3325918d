//! Terminal progress reporting.
//!
//! A single-line ticker that overwrites itself instead of scrolling, with
//! throttled redraws and a synchronized `inc` so worker threads can feed
//! it directly. Verbosity 0 gets the silent variant.

use parking_lot::Mutex;
use std::io::Write;
use std::time::{Duration, Instant};

struct ProgressState {
    current: u64,
    message: String,
    last_draw: Instant,
}

pub struct ProgressBar {
    total: u64,
    state: Mutex<ProgressState>,
    start: Instant,
    enabled: bool,
    update_interval: Duration,
}

impl ProgressBar {
    pub fn new(total: u64, message: impl Into<String>) -> Self {
        Self::with_enabled(total, message, true)
    }

    /// A bar that swallows every update; used at verbosity 0.
    pub fn silent() -> Self {
        Self::with_enabled(0, "", false)
    }

    fn with_enabled(total: u64, message: impl Into<String>, enabled: bool) -> Self {
        let now = Instant::now();
        Self {
            total: total.max(1),
            state: Mutex::new(ProgressState {
                current: 0,
                message: message.into(),
                last_draw: now,
            }),
            start: now,
            enabled,
            update_interval: Duration::from_millis(200),
        }
    }

    pub fn set_message(&self, message: impl Into<String>) {
        let mut state = self.state.lock();
        state.message = message.into();
        if self.enabled {
            self.draw(&state.message, state.current);
        }
    }

    pub fn inc(&self, amount: u64) {
        let mut state = self.state.lock();
        state.current += amount;
        if self.enabled && state.last_draw.elapsed() >= self.update_interval {
            state.last_draw = Instant::now();
            self.draw(&state.message, state.current);
        }
    }

    pub fn finish(&self) {
        if !self.enabled {
            return;
        }
        let state = self.state.lock();
        self.draw(&state.message, state.current.max(self.total));
        eprintln!();
    }

    fn draw(&self, message: &str, current: u64) {
        let percent = (current.min(self.total) * 100) / self.total;
        let elapsed = self.start.elapsed().as_secs_f64();
        eprint!("\r{message}  {percent:>3}%  [{elapsed:.0}s]");
        let _ = std::io::stderr().flush();
    }
}
