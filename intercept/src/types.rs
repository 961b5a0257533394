//! Raw event shapes produced by the capture backends

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

/// One event as delivered by a capture backend, before decoding
#[derive(Debug, Clone)]
pub enum RawEvent {
    /// A packet observed on the kernel send path
    Packet(PacketEvent),
    /// An already-structured event from the tracing subsystem
    Structured(StructuredEvent),
}

/// Outbound packet captured by the kernel probes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketEvent {
    /// Kernel monotonic timestamp (nanoseconds since boot)
    pub ktime_ns: u64,
    /// Process id of the sender
    pub pid: u32,
    /// Id of the sending thread
    pub thread_id: u32,
    pub uid: u32,
    pub gid: u32,
    pub ifindex: u32,
    /// Kernel short name of the sending task
    pub comm: String,
    pub source_port: u16,
    pub destination_port: u16,
    pub source_addr: Ipv4Addr,
    pub destination_addr: Ipv4Addr,
    /// IP protocol number (6 = TCP, 17 = UDP)
    pub protocol: u16,
    /// DNS message bytes, already cut to the captured length
    pub payload: Vec<u8>,
}

/// Event delivered by a structured tracing provider
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredEvent {
    /// Provider GUID in registry form, `{xxxxxxxx-...}`
    pub provider: String,
    pub event_id: u16,
    pub process_id: u32,
    pub thread_id: u32,
    pub timestamp: DateTime<Utc>,
    pub fields: HashMap<String, FieldValue>,
}

impl StructuredEvent {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// A loosely-typed event property, tagged by how the provider represented it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Number(u64),
    Text(String),
    /// Any other representation, already rendered as text
    Other(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) | FieldValue::Other(s) => f.write_str(s),
        }
    }
}

/// Declared type of a structured event property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InType {
    /// Little-endian unsigned integer of 1, 2, 4 or 8 bytes
    Unsigned,
    /// Little-endian signed integer of 1, 2, 4 or 8 bytes
    Signed,
    /// NUL-terminated UTF-16LE text
    UnicodeString,
    /// NUL-terminated single-byte text
    AnsiString,
    Other,
}

/// Convert a property's raw bytes according to its declared type.
///
/// Exactly one interpretation per type: integers become `Number`, strings
/// become `Text`, everything else (and integers of an unexpected width)
/// becomes `Other` as lowercase hex. Returns `None` only for an empty
/// non-string property.
pub fn field_from_in_type(in_type: InType, bytes: &[u8]) -> Option<FieldValue> {
    match in_type {
        InType::UnicodeString => {
            let units = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .take_while(|&unit| unit != 0)
                .collect::<Vec<u16>>();
            Some(FieldValue::Text(String::from_utf16_lossy(&units)))
        }
        InType::AnsiString => {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            Some(FieldValue::Text(String::from_utf8_lossy(&bytes[..end]).into_owned()))
        }
        InType::Unsigned => match unsigned_le(bytes) {
            Some(n) => Some(FieldValue::Number(n)),
            None => hex_field(bytes),
        },
        InType::Signed => match signed_le(bytes) {
            Some(n) => match u64::try_from(n) {
                Ok(n) => Some(FieldValue::Number(n)),
                Err(_) => Some(FieldValue::Other(n.to_string())),
            },
            None => hex_field(bytes),
        },
        InType::Other => hex_field(bytes),
    }
}

fn unsigned_le(bytes: &[u8]) -> Option<u64> {
    match *bytes {
        [a] => Some(u64::from(a)),
        [a, b] => Some(u64::from(u16::from_le_bytes([a, b]))),
        [a, b, c, d] => Some(u64::from(u32::from_le_bytes([a, b, c, d]))),
        [a, b, c, d, e, f, g, h] => Some(u64::from_le_bytes([a, b, c, d, e, f, g, h])),
        _ => None,
    }
}

fn signed_le(bytes: &[u8]) -> Option<i64> {
    match *bytes {
        [a] => Some(i64::from(a as i8)),
        [a, b] => Some(i64::from(i16::from_le_bytes([a, b]))),
        [a, b, c, d] => Some(i64::from(i32::from_le_bytes([a, b, c, d]))),
        [a, b, c, d, e, f, g, h] => Some(i64::from_le_bytes([a, b, c, d, e, f, g, h])),
        _ => None,
    }
}

fn hex_field(bytes: &[u8]) -> Option<FieldValue> {
    if bytes.is_empty() {
        return None;
    }
    Some(FieldValue::Other(bytes.iter().map(|b| format!("{:02x}", b)).collect()))
}

/// Size of the packet buffer inside a kernel record
pub const MAX_PACKET_LEN: usize = 512;

/// Length of the task name buffer inside a kernel record
pub const COMM_LEN: usize = 64;

// Layout shared with src/bpf/dns_capture.bpf.c, read in native (little-endian) order.
// Ports are converted to host order by the probe, addresses stay in network order.
#[cfg(target_os = "linux")]
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct KernelRecord {
    pub timestamp: u64,
    pub pid: u32,
    // low half of bpf_get_current_pid_tgid(), the kernel's per-thread pid
    pub tgid: u32,
    pub uid: u32,
    pub gid: u32,
    pub ifindex: u32,
    pub comm: [u8; COMM_LEN],
    pub sport: u16,
    pub dport: u16,
    pub saddr: u32,
    pub daddr: u32,
    pub protocol: u16,
    pub pkt_len: u16,
    pub pkt_data: [u8; MAX_PACKET_LEN],
}

#[cfg(target_os = "linux")]
unsafe impl plain::Plain for KernelRecord {}

#[cfg(target_os = "linux")]
impl KernelRecord {
    /// Reinterpret a ring buffer sample. Samples shorter than the record are rejected.
    pub fn from_sample(data: &[u8]) -> Option<Self> {
        plain::from_bytes::<KernelRecord>(data).ok().copied()
    }

    /// Convert raw eBPF data to the backend-independent event
    pub fn to_packet_event(&self) -> PacketEvent {
        let comm = String::from_utf8_lossy(&self.comm)
            .trim_end_matches('\0')
            .to_string();

        let pkt_len = usize::from(self.pkt_len).min(MAX_PACKET_LEN);
        let payload = self.pkt_data[..pkt_len].to_vec();

        PacketEvent {
            ktime_ns: self.timestamp,
            pid: self.pid,
            thread_id: self.tgid,
            uid: self.uid,
            gid: self.gid,
            ifindex: self.ifindex,
            comm,
            source_port: self.sport,
            destination_port: self.dport,
            source_addr: Ipv4Addr::from(u32::from_be(self.saddr)),
            destination_addr: Ipv4Addr::from(u32::from_be(self.daddr)),
            protocol: self.protocol,
            payload,
        }
    }
}
