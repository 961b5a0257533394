//! Correlation pipeline: decode, filter, resolve, emit
//!
//! One event at a time, in arrival order. Any per-event failure drops that
//! event and moves on to the next one; only the end of the channel stops the
//! loop.

use crate::decode::{decode_packet_event, decode_structured};
use crate::emit::Emitter;
use crate::filter::{FilterConfig, FilterVerdict};
use crate::process::ProcessResolver;
use crate::record::{DnsQueryRecord, EnrichedEvent};
use crate::types::RawEvent;
use chrono::Utc;
use std::io::Write;

/// What happened to a single raw event
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Not a usable DNS query
    Malformed,
    Filtered(FilterVerdict),
    Emitted(EnrichedEvent),
    /// Rendered, but writing it out failed
    EmitFailed(EnrichedEvent),
}

/// Counters for one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub received: u64,
    pub malformed: u64,
    pub filtered: u64,
    pub emitted: u64,
    pub emit_errors: u64,
}

impl PipelineStats {
    fn record(&mut self, outcome: &Outcome) {
        self.received += 1;
        match outcome {
            Outcome::Malformed => self.malformed += 1,
            Outcome::Filtered(_) => self.filtered += 1,
            Outcome::Emitted(_) => self.emitted += 1,
            Outcome::EmitFailed(_) => self.emit_errors += 1,
        }
    }
}

pub struct Pipeline<'a, R: ProcessResolver, W: Write> {
    config: &'a FilterConfig,
    resolver: R,
    emitter: Emitter<W>,
    stats: PipelineStats,
}

impl<'a, R: ProcessResolver, W: Write> Pipeline<'a, R, W> {
    pub fn new(config: &'a FilterConfig, resolver: R, emitter: Emitter<W>) -> Self {
        Self {
            config,
            resolver,
            emitter,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Run one event through decode, filter, resolve and emit
    pub fn process(&mut self, raw: RawEvent) -> Outcome {
        if let RawEvent::Structured(event) = &raw {
            log::trace!("event {} from provider {}", event.event_id, event.provider);
        }
        let outcome = self.enrich(&raw);
        self.stats.record(&outcome);
        outcome
    }

    fn enrich(&mut self, raw: &RawEvent) -> Outcome {
        let Some(record) = decode(raw) else {
            return Outcome::Malformed;
        };

        // Filtering happens before resolution, which costs system calls
        if let Err(verdict) = self.config.permits(&record) {
            log::trace!("dropped {} ({:?})", record.query_name, verdict);
            return Outcome::Filtered(verdict);
        }

        let process = self.resolver.resolve(record.process_id);
        let event = EnrichedEvent { record, process };

        match self.emitter.emit(&event) {
            Ok(()) => Outcome::Emitted(event),
            Err(err) => {
                log::warn!("failed to write query for {}: {}", event.record.query_name, err);
                Outcome::EmitFailed(event)
            }
        }
    }

    /// Consume events until every sender is gone
    pub fn run(mut self, events: kanal::Receiver<RawEvent>) -> PipelineStats {
        if let Err(err) = self.emitter.write_header() {
            log::warn!("failed to write output header: {}", err);
        }

        while let Ok(raw) = events.recv() {
            self.process(raw);
        }

        let stats = self.stats;
        log::info!(
            "pipeline finished: {} events, {} emitted, {} filtered, {} malformed, {} write errors",
            stats.received,
            stats.emitted,
            stats.filtered,
            stats.malformed,
            stats.emit_errors
        );
        stats
    }
}

fn decode(raw: &RawEvent) -> Option<DnsQueryRecord> {
    match raw {
        RawEvent::Packet(packet) => decode_packet_event(packet, Utc::now()),
        RawEvent::Structured(event) => decode_structured(event),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{DisplayZone, OutputStyle};
    use crate::record::{ProcessInfo, QueryType};
    use crate::types::{FieldValue, PacketEvent, StructuredEvent};
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    /// Answers from a fixed table and records which pids were asked for
    #[derive(Default)]
    struct FakeResolver {
        asked: Mutex<Vec<u32>>,
    }

    impl ProcessResolver for FakeResolver {
        fn resolve(&self, pid: u32) -> ProcessInfo {
            self.asked.lock().unwrap().push(pid);
            match pid {
                812 => ProcessInfo {
                    pid,
                    name: "chrome.exe".to_string(),
                    path: r"C:\Program Files\Google\Chrome\chrome.exe".to_string(),
                },
                _ => ProcessInfo::placeholder(pid),
            }
        }
    }

    impl ProcessResolver for &FakeResolver {
        fn resolve(&self, pid: u32) -> ProcessInfo {
            (**self).resolve(pid)
        }
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn structured(event_id: u16, name: &str, qtype: u64) -> RawEvent {
        let mut fields = HashMap::new();
        fields.insert("QueryName".to_string(), FieldValue::Text(name.to_string()));
        fields.insert("QueryType".to_string(), FieldValue::Number(qtype));
        RawEvent::Structured(StructuredEvent {
            provider: "{1C95126E-7EEA-49A9-A3FE-A378B03DDB4D}".to_string(),
            event_id,
            process_id: 812,
            thread_id: 1,
            timestamp: Utc::now(),
            fields,
        })
    }

    fn packet(payload: Vec<u8>) -> RawEvent {
        RawEvent::Packet(PacketEvent {
            ktime_ns: 0,
            pid: 999_999,
            thread_id: 999_999,
            uid: 0,
            gid: 0,
            ifindex: 1,
            comm: "dig".to_string(),
            source_port: 40000,
            destination_port: 53,
            source_addr: Ipv4Addr::LOCALHOST,
            destination_addr: Ipv4Addr::new(8, 8, 8, 8),
            protocol: 17,
            payload,
        })
    }

    fn emitter() -> Emitter<Vec<u8>> {
        Emitter::new(Vec::new(), OutputStyle::Compact, DisplayZone::Named(chrono_tz::UTC))
    }

    #[test]
    fn allow_listed_aaaa_query_is_emitted() {
        let config = FilterConfig::structured_trace_defaults();
        let resolver = FakeResolver::default();
        let mut pipeline = Pipeline::new(&config, &resolver, emitter());

        match pipeline.process(structured(3008, "ads.example.net", 28)) {
            Outcome::Emitted(event) => {
                assert_eq!(event.record.query_type.to_string(), "AAAA");
                assert_eq!(event.process.name, "chrome.exe");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn filtered_events_skip_resolution() {
        let config = FilterConfig::structured_trace_defaults();
        let resolver = FakeResolver::default();
        let mut pipeline = Pipeline::new(&config, &resolver, emitter());

        assert_eq!(
            pipeline.process(structured(3011, "example.com", 1)),
            Outcome::Filtered(FilterVerdict::EventNotAllowed)
        );
        assert_eq!(
            pipeline.process(structured(3008, "Localhost.lan", 1)),
            Outcome::Filtered(FilterVerdict::DomainDenied)
        );
        assert!(resolver.asked.lock().unwrap().is_empty());
    }

    #[test]
    fn malformed_packets_are_dropped_quietly() {
        let config = FilterConfig::kernel_probe_defaults();
        let resolver = FakeResolver::default();
        let mut pipeline = Pipeline::new(&config, &resolver, emitter());

        assert_eq!(pipeline.process(packet(vec![0u8; 5])), Outcome::Malformed);
        assert!(resolver.asked.lock().unwrap().is_empty());
        assert_eq!(pipeline.stats().malformed, 1);
    }

    #[test]
    fn packet_from_exited_process_still_emitted_with_placeholder() {
        let config = FilterConfig::kernel_probe_defaults();
        let resolver = FakeResolver::default();
        let mut pipeline = Pipeline::new(&config, &resolver, emitter());

        let mut payload = vec![0u8; 12];
        payload.extend_from_slice(b"\x07example\x03com\x00\x00\x01");
        match pipeline.process(packet(payload)) {
            Outcome::Emitted(event) => {
                assert_eq!(event.record.query_type, QueryType::A);
                assert_eq!(event.process.name, "PID: 999999");
                assert!(event.process.path.is_empty());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn write_errors_do_not_stop_the_loop() {
        let config = FilterConfig::structured_trace_defaults();
        let resolver = FakeResolver::default();
        let emitter = Emitter::new(FailingWriter, OutputStyle::Verbose, DisplayZone::Named(chrono_tz::UTC));
        let pipeline = Pipeline::new(&config, &resolver, emitter);

        let (tx, rx) = kanal::bounded(8);
        tx.send(structured(3008, "a.example", 1)).unwrap();
        tx.send(structured(3018, "b.example", 1)).unwrap();
        drop(tx);

        let stats = pipeline.run(rx);
        assert_eq!(stats.received, 2);
        assert_eq!(stats.emit_errors, 2);
    }

    #[test]
    fn run_preserves_arrival_order() {
        let config = FilterConfig::structured_trace_defaults();
        let resolver = FakeResolver::default();
        let (tx, rx) = kanal::bounded(8);
        for name in ["one.example", "localhost", "two.example", "three.example"] {
            tx.send(structured(3008, name, 1)).unwrap();
        }
        drop(tx);

        let mut pipeline = Pipeline::new(&config, &resolver, emitter());
        let mut names = Vec::new();
        while let Ok(raw) = rx.recv() {
            if let Outcome::Emitted(event) = pipeline.process(raw) {
                names.push(event.record.query_name);
            }
        }
        assert_eq!(names, ["one.example", "two.example", "three.example"]);
        assert_eq!(
            pipeline.stats(),
            PipelineStats {
                received: 4,
                malformed: 0,
                filtered: 1,
                emitted: 3,
                emit_errors: 0
            }
        );
    }
}
