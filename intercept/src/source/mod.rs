//! Capture backends
//!
//! A backend owns the operating system's tracing facility and turns it into a
//! stream of `RawEvent`s pushed into a channel. Exactly one backend exists per
//! platform: kernel probes on Linux, ETW on Windows.

use crate::error::Result;
use crate::types::RawEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[cfg(target_os = "linux")]
pub mod kprobe;

#[cfg(windows)]
pub mod etw;

#[cfg(target_os = "linux")]
pub use kprobe::KprobeSource;

#[cfg(windows)]
pub use etw::EtwSource;

/// How long a backend blocks before looking at the stop signal again
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A source of raw capture events.
///
/// `run` blocks until the source is stopped, closed, or its sink goes away, and
/// returns `Err` only when the source could not be set up at all. Dropping the
/// sink on return is what ends the event stream for the consumer. Sources are
/// single-use.
pub trait EventSource: Send {
    fn name(&self) -> &'static str;

    fn run(self: Box<Self>, sink: kanal::Sender<RawEvent>, stop: StopSignal) -> Result<()>;
}

/// Cooperative cancellation flag shared by the capture and pipeline threads
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_visible_to_clones() {
        let stop = StopSignal::new();
        let other = stop.clone();
        assert!(!other.is_stopped());

        stop.stop();
        assert!(other.is_stopped());
    }
}
