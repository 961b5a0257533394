//! DNS query capture and process attribution
//!
//! Captures outbound DNS queries from the host's tracing facility (eBPF kprobes
//! on Linux, ETW on Windows), decodes them into one record type, filters them,
//! attaches the identity of the querying process and renders them as text.

pub mod decode;
pub mod emit;
pub mod error;
pub mod filter;
pub mod monitor;
pub mod pipeline;
pub mod process;
pub mod record;
pub mod source;
pub mod types;

// Re-export main public types
pub use emit::{DisplayZone, Emitter, OutputStyle};
pub use error::{Error, Result};
pub use filter::FilterConfig;
pub use monitor::DnsMonitor;
pub use pipeline::{Outcome, Pipeline, PipelineStats};
pub use process::ProcessResolver;
pub use record::{DnsQueryRecord, EnrichedEvent, ProcessInfo, Protocol, QueryStatus, QueryType};
pub use source::{EventSource, StopSignal};
pub use types::{FieldValue, PacketEvent, RawEvent, StructuredEvent};
