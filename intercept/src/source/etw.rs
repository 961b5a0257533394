//! ETW capture backend
//!
//! Runs a real-time user trace subscribed to the Microsoft-Windows-DNS-Client
//! provider. Events arrive already decoded; the callback copies the fields we
//! care about into a `StructuredEvent` and hands it over.

use super::{EventSource, POLL_INTERVAL, StopSignal};
use crate::error::{Error, Result};
use crate::types::{InType, RawEvent, StructuredEvent, field_from_in_type};
use chrono::{DateTime, Utc};
use ferrisetw::EventRecord;
use ferrisetw::native::tdh_types::{PropertyInfo, TdhInType};
use ferrisetw::parser::Parser;
use ferrisetw::provider::Provider;
use ferrisetw::schema_locator::SchemaLocator;
use ferrisetw::trace::{TraceTrait, UserTrace};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Microsoft-Windows-DNS-Client
pub const DNS_CLIENT_PROVIDER: &str = "{1C95126E-7EEA-49A9-A3FE-A378B03DDB4D}";

const SESSION_NAME: &str = "FafDnsMonitor";

const FIELDS: [&str; 5] = ["QueryName", "QueryType", "QueryStatus", "Status", "QueryResults"];

/// Captures DNS client events through ETW
#[derive(Debug, Default)]
pub struct EtwSource;

impl EtwSource {
    pub fn new() -> Self {
        Self
    }
}

impl EventSource for EtwSource {
    fn name(&self) -> &'static str {
        "etw"
    }

    fn run(self: Box<Self>, sink: kanal::Sender<RawEvent>, stop: StopSignal) -> Result<()> {
        let sink_closed = Arc::new(AtomicBool::new(false));

        let callback = {
            let sink_closed = sink_closed.clone();
            move |record: &EventRecord, schema_locator: &SchemaLocator| {
                if sink_closed.load(Ordering::Relaxed) {
                    return;
                }
                let event = match structured_event(record, schema_locator) {
                    Some(event) => event,
                    None => return,
                };
                if sink.send(RawEvent::Structured(event)).is_err() {
                    sink_closed.store(true, Ordering::Relaxed);
                }
            }
        };

        let provider = Provider::by_guid(DNS_CLIENT_PROVIDER.trim_matches(|c| c == '{' || c == '}'))
            .add_callback(callback)
            .build();

        let trace = UserTrace::new()
            .named(SESSION_NAME.to_string())
            .enable(provider)
            .start_and_process()
            .map_err(|err| Error::Trace(format!("could not start session {}: {:?}", SESSION_NAME, err)))?;

        log::info!("ETW session {} enabled for provider {}", SESSION_NAME, DNS_CLIENT_PROVIDER);

        while !stop.is_stopped() && !sink_closed.load(Ordering::Relaxed) {
            std::thread::sleep(POLL_INTERVAL);
        }

        log::info!("closing ETW session {}", SESSION_NAME);
        // Stopping the trace drops the provider callback, and the sink with it
        if let Err(err) = trace.stop() {
            log::warn!("ETW session {} did not stop cleanly: {:?}", SESSION_NAME, err);
        }
        Ok(())
    }
}

fn structured_event(record: &EventRecord, schema_locator: &SchemaLocator) -> Option<StructuredEvent> {
    let schema = match schema_locator.event_schema(record) {
        Ok(schema) => schema,
        Err(err) => {
            log::debug!("no schema for event {}: {:?}", record.event_id(), err);
            return None;
        }
    };
    let parser = Parser::create(record, &schema);

    let fields = schema
        .properties()
        .iter()
        .filter(|property| FIELDS.contains(&property.name.as_str()))
        .filter_map(|property| {
            let bytes = parser.try_parse::<Vec<u8>>(&property.name).ok()?;
            let value = field_from_in_type(declared_in_type(&property.info), &bytes)?;
            Some((property.name.clone(), value))
        })
        .collect::<HashMap<_, _>>();

    Some(StructuredEvent {
        provider: DNS_CLIENT_PROVIDER.to_string(),
        event_id: record.event_id(),
        process_id: record.process_id(),
        thread_id: record.thread_id(),
        timestamp: filetime_to_utc(record.timestamp()),
        fields,
    })
}

// Parse by the schema's declared type, never by buffer size
fn declared_in_type(info: &PropertyInfo) -> InType {
    let in_type = match info {
        PropertyInfo::Value { in_type, .. } => in_type,
        PropertyInfo::Array { .. } => return InType::Other,
    };
    match in_type {
        TdhInType::InTypeUnicodeString => InType::UnicodeString,
        TdhInType::InTypeAnsiString => InType::AnsiString,
        TdhInType::InTypeUInt8
        | TdhInType::InTypeUInt16
        | TdhInType::InTypeUInt32
        | TdhInType::InTypeUInt64
        | TdhInType::InTypeHexInt32
        | TdhInType::InTypeHexInt64
        | TdhInType::InTypeBoolean => InType::Unsigned,
        TdhInType::InTypeInt8 | TdhInType::InTypeInt16 | TdhInType::InTypeInt32 | TdhInType::InTypeInt64 => {
            InType::Signed
        }
        _ => InType::Other,
    }
}

/// FILETIME (100ns ticks since 1601-01-01) to UTC, falling back to now when out of range
fn filetime_to_utc(filetime: i64) -> DateTime<Utc> {
    const UNIX_EPOCH_AS_FILETIME: i64 = 116_444_736_000_000_000;
    const TICKS_PER_SEC: i64 = 10_000_000;

    let ticks = filetime - UNIX_EPOCH_AS_FILETIME;
    let secs = ticks.div_euclid(TICKS_PER_SEC);
    let nanos = (ticks.rem_euclid(TICKS_PER_SEC) * 100) as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn filetime_converts_to_unix_time() {
        // 2024-03-01T16:30:05Z
        let filetime = 116_444_736_000_000_000 + 1_709_310_605 * 10_000_000;
        assert_eq!(filetime_to_utc(filetime), Utc.with_ymd_and_hms(2024, 3, 1, 16, 30, 5).unwrap());
    }
}
