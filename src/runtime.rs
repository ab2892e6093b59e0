use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

use crate::dispatcher::{Dispatcher, Outbox};
use crate::stats::WorkoutStore;
use crate::transport::SerialTransport;

/// Unified event type consumed by the dispatch loop
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchEvent {
    Line(String),
    Tick,
}

/// Source of received lines
pub trait LineSource {
    /// Oldest pending line, without blocking.
    fn poll_line(&self) -> Option<String>;
}

impl LineSource for SerialTransport {
    fn poll_line(&self) -> Option<String> {
        self.poll_received()
    }
}

impl<T: LineSource + ?Sized> LineSource for &T {
    fn poll_line(&self) -> Option<String> {
        (**self).poll_line()
    }
}

/// Test line source fed through a channel
pub struct TestLineSource {
    rx: Receiver<String>,
}

impl TestLineSource {
    pub fn new(rx: Receiver<String>) -> Self {
        Self { rx }
    }
}

impl LineSource for TestLineSource {
    fn poll_line(&self) -> Option<String> {
        match self.rx.try_recv() {
            Ok(line) => Some(line),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

/// Configurable ticker interface
pub trait Ticker: Send + Sync + 'static {
    fn interval(&self) -> Duration;
}

/// Fixed interval ticker
#[derive(Clone, Copy, Debug)]
pub struct FixedTicker {
    interval: Duration,
}

impl FixedTicker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Ticker for FixedTicker {
    fn interval(&self) -> Duration {
        self.interval
    }
}

/// Runner that advances the dispatch loop one line/tick at a time
pub struct Runner<L: LineSource, T: Ticker> {
    source: L,
    ticker: T,
}

impl<L: LineSource, T: Ticker> Runner<L, T> {
    pub fn new(source: L, ticker: T) -> Self {
        Self { source, ticker }
    }

    /// Returns the next pending line, or sleeps one tick interval and returns Tick
    pub fn step(&self) -> DispatchEvent {
        match self.source.poll_line() {
            Some(line) => DispatchEvent::Line(line),
            None => {
                thread::sleep(self.ticker.interval());
                DispatchEvent::Tick
            }
        }
    }

    /// Feeds lines to the dispatcher until `running` is cleared. Returns the
    /// number of lines handled.
    pub fn run<S: WorkoutStore, O: Outbox>(
        &self,
        dispatcher: &mut Dispatcher<S, O>,
        running: &AtomicBool,
    ) -> usize {
        let mut handled = 0;
        while running.load(Ordering::SeqCst) {
            if let DispatchEvent::Line(line) = self.step() {
                let _ = dispatcher.handle_line(&line);
                handled += 1;
            }
        }
        handled
    }
}
