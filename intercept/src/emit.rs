//! Text rendering of enriched events
//!
//! Each event becomes either one fixed-width line (compact) or a labelled block
//! (verbose). Timestamps are shown in a fixed civil timezone regardless of the
//! host locale.

use crate::record::EnrichedEvent;
use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use std::fmt::Display;
use std::io::{self, Write};

pub const DEFAULT_TIMEZONE: &str = "Asia/Shanghai";

const COMPACT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const VERBOSE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const VERBOSE_SEPARATOR: &str = "------------------------";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStyle {
    /// One fixed-width line per query
    Compact,
    /// Multi-line block including status, result, thread and event id
    Verbose,
}

/// Timezone timestamps are rendered in
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DisplayZone {
    Named(Tz),
    /// Host local time, used when the configured zone is not available
    Local,
}

impl DisplayZone {
    pub fn from_name(name: &str) -> Self {
        match name.parse::<Tz>() {
            Ok(tz) => DisplayZone::Named(tz),
            Err(err) => {
                log::warn!("timezone {} not available ({}), using local time", name, err);
                DisplayZone::Local
            }
        }
    }

    pub fn format(&self, timestamp: &DateTime<Utc>, fmt: &str) -> String {
        match self {
            DisplayZone::Named(tz) => timestamp.with_timezone(tz).format(fmt).to_string(),
            DisplayZone::Local => timestamp.with_timezone(&Local).format(fmt).to_string(),
        }
    }
}

impl Default for DisplayZone {
    fn default() -> Self {
        DisplayZone::from_name(DEFAULT_TIMEZONE)
    }
}

/// Writes enriched events to `out` in arrival order
pub struct Emitter<W: Write> {
    out: W,
    style: OutputStyle,
    zone: DisplayZone,
}

impl<W: Write> Emitter<W> {
    pub fn new(out: W, style: OutputStyle, zone: DisplayZone) -> Self {
        Self { out, style, zone }
    }

    /// Column titles for the compact style, nothing for verbose
    pub fn write_header(&mut self) -> io::Result<()> {
        if self.style == OutputStyle::Verbose {
            return Ok(());
        }
        let header = format!(
            "{:<19}  {:<6}  {:<15}  {:<40}  {:<4}  {:<6}  {}",
            "TIME", "PID", "PROCESS", "PATH", "PROT", "TYPE", "QUERY"
        );
        writeln!(self.out, "{}", header)?;
        writeln!(self.out, "{}", "=".repeat(header.len()))?;
        self.out.flush()
    }

    pub fn emit(&mut self, event: &EnrichedEvent) -> io::Result<()> {
        let text = match self.style {
            OutputStyle::Compact => format_compact(event, &self.zone),
            OutputStyle::Verbose => format_verbose(event, &self.zone),
        };
        self.out.write_all(text.as_bytes())?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// `timestamp(19) pid(6) name(15) path(40) protocol(4) type(6) name`, newline terminated
pub fn format_compact(event: &EnrichedEvent, zone: &DisplayZone) -> String {
    let record = &event.record;
    format!(
        "{:<19}  {:<6}  {:<15}  {:<40}  {:<4}  {:<6}  {}\n",
        zone.format(&record.timestamp, COMPACT_TIME_FORMAT),
        record.process_id,
        event.process.name,
        event.process.path,
        or_dash(record.protocol.as_ref()),
        record.query_type.to_string(),
        record.query_name,
    )
}

pub fn format_verbose(event: &EnrichedEvent, zone: &DisplayZone) -> String {
    let record = &event.record;
    let mut text = String::new();
    text.push_str("\nDNS query detected:\n");
    text.push_str(&format!("Time: {}\n", zone.format(&record.timestamp, VERBOSE_TIME_FORMAT)));
    text.push_str(&format!("Query name: {}\n", record.query_name));
    text.push_str(&format!("Query type: {}\n", record.query_type));
    text.push_str(&format!("Query status: {}\n", or_dash(record.status.as_ref())));
    text.push_str(&format!("Query result: {}\n", or_dash(record.result.as_ref())));
    text.push_str(&format!("Process ID: {}\n", record.process_id));
    text.push_str(&format!("Thread ID: {}\n", or_dash(record.thread_id.as_ref())));
    text.push_str(&format!("Process name: {}\n", event.process.name));
    text.push_str(&format!("Process path: {}\n", event.process.path));
    text.push_str(&format!("Event ID: {}\n", or_dash(record.source_event_id.as_ref())));
    text.push_str(VERBOSE_SEPARATOR);
    text.push('\n');
    text
}

fn or_dash<T: Display>(value: Option<&T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
