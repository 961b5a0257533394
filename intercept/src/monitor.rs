//! Wires a capture backend to the correlation pipeline

use crate::emit::Emitter;
use crate::error::{Error, Result};
use crate::filter::FilterConfig;
use crate::pipeline::{Pipeline, PipelineStats};
use crate::process::ProcessResolver;
use crate::source::{EventSource, StopSignal};
use std::any::Any;
use std::io::Write;
use std::thread;

/// Raw events buffered between the capture thread and the pipeline
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

/// Runs one capture backend on its own thread and the pipeline on the caller's
pub struct DnsMonitor {
    source: Box<dyn EventSource>,
    stop: StopSignal,
    channel_capacity: usize,
}

impl DnsMonitor {
    pub fn new(source: Box<dyn EventSource>) -> Self {
        Self {
            source,
            stop: StopSignal::new(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Signal that stops the backend, and with it the whole monitor
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Block until the backend stops or closes.
    ///
    /// Returns the backend's error when it could not be set up; that is the
    /// only failure that ends monitoring early.
    pub fn run<R, W>(self, config: &FilterConfig, resolver: R, emitter: Emitter<W>) -> Result<PipelineStats>
    where
        R: ProcessResolver,
        W: Write,
    {
        let (tx, rx) = kanal::bounded(self.channel_capacity);

        let source = self.source;
        let source_name = source.name();
        let stop = self.stop.clone();
        let capture = thread::Builder::new()
            .name("dns-capture".to_string())
            .spawn(move || source.run(tx, stop))?;

        log::info!("capture backend {} started", source_name);

        let stats = Pipeline::new(config, resolver, emitter).run(rx);

        // The receiver is gone by now; make sure a backend still polling notices
        self.stop.stop();

        match capture.join() {
            Ok(result) => result.map(|()| stats),
            Err(panic) => Err(Error::CaptureThread(panic_message(panic))),
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "capture thread panicked".to_string()
    }
}
