//! Canonical, backend-independent DNS query model

use crate::types::FieldValue;
use chrono::{DateTime, Utc};
use std::fmt;

/// One observed DNS query attempt
#[derive(Debug, Clone, PartialEq)]
pub struct DnsQueryRecord {
    pub timestamp: DateTime<Utc>,
    pub process_id: u32,
    pub thread_id: Option<u32>,
    /// Dotted query name, never empty
    pub query_name: String,
    pub query_type: QueryType,
    pub status: Option<QueryStatus>,
    pub protocol: Option<Protocol>,
    /// Raw result text as reported by the provider
    pub result: Option<String>,
    /// Provider event id, used by the allow-list
    pub source_event_id: Option<u16>,
}

impl DnsQueryRecord {
    /// A record observed now, with every optional field unset
    pub fn new(query_name: impl Into<String>, query_type: QueryType) -> Self {
        Self {
            timestamp: Utc::now(),
            process_id: 0,
            thread_id: None,
            query_name: query_name.into(),
            query_type,
            status: None,
            protocol: None,
            result: None,
            source_event_id: None,
        }
    }
}

/// DNS question type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    SRV,
    /// Numeric code outside the table
    Unknown(u64),
    /// Text that is not an integer
    Unparsed(String),
    /// Any other representation, rendered verbatim
    Opaque(String),
}

impl QueryType {
    pub fn from_code(code: u64) -> Self {
        match code {
            1 => QueryType::A,
            2 => QueryType::NS,
            5 => QueryType::CNAME,
            6 => QueryType::SOA,
            12 => QueryType::PTR,
            15 => QueryType::MX,
            16 => QueryType::TXT,
            28 => QueryType::AAAA,
            33 => QueryType::SRV,
            other => QueryType::Unknown(other),
        }
    }

    pub fn from_field(value: &FieldValue) -> Self {
        match value {
            FieldValue::Number(code) => Self::from_code(*code),
            FieldValue::Text(text) => match text.trim().parse::<u64>() {
                Ok(code) => Self::from_code(code),
                Err(_) => QueryType::Unparsed(text.clone()),
            },
            FieldValue::Other(text) => QueryType::Opaque(text.clone()),
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryType::A => f.write_str("A"),
            QueryType::NS => f.write_str("NS"),
            QueryType::CNAME => f.write_str("CNAME"),
            QueryType::SOA => f.write_str("SOA"),
            QueryType::PTR => f.write_str("PTR"),
            QueryType::MX => f.write_str("MX"),
            QueryType::TXT => f.write_str("TXT"),
            QueryType::AAAA => f.write_str("AAAA"),
            QueryType::SRV => f.write_str("SRV"),
            QueryType::Unknown(code) => write!(f, "UNKNOWN({})", code),
            QueryType::Unparsed(text) => write!(f, "UNKNOWN({})", text),
            QueryType::Opaque(text) if text.is_empty() => f.write_str("UNKNOWN()"),
            QueryType::Opaque(text) => f.write_str(text),
        }
    }
}

/// Outcome reported by the resolver for a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    Succeeded,
    NameError,
    Timeout,
    NameDoesNotExist,
    RecordNotFound,
    /// Numeric code outside the table
    Error(u64),
    /// Text that is not an integer
    Unparsed(String),
    /// Any other representation, rendered verbatim
    Opaque(String),
}

impl QueryStatus {
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => QueryStatus::Succeeded,
            123 => QueryStatus::NameError,
            1460 => QueryStatus::Timeout,
            9003 => QueryStatus::NameDoesNotExist,
            9501 => QueryStatus::RecordNotFound,
            other => QueryStatus::Error(other),
        }
    }

    pub fn from_field(value: &FieldValue) -> Self {
        match value {
            FieldValue::Number(code) => Self::from_code(*code),
            FieldValue::Text(text) => match text.trim().parse::<u64>() {
                Ok(code) => Self::from_code(code),
                Err(_) => QueryStatus::Unparsed(text.clone()),
            },
            FieldValue::Other(text) => QueryStatus::Opaque(text.clone()),
        }
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryStatus::Succeeded => f.write_str("succeeded"),
            QueryStatus::NameError => f.write_str("query name error"),
            QueryStatus::Timeout => f.write_str("query timeout"),
            QueryStatus::NameDoesNotExist => f.write_str("DNS name does not exist"),
            QueryStatus::RecordNotFound => f.write_str("query record not found"),
            QueryStatus::Error(code) => write!(f, "ERROR({})", code),
            QueryStatus::Unparsed(text) => write!(f, "UNKNOWN({})", text),
            QueryStatus::Opaque(text) if text.is_empty() => f.write_str("UNKNOWN()"),
            QueryStatus::Opaque(text) => f.write_str(text),
        }
    }
}

/// Transport the query was sent over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
    Unknown(u16),
}

impl Protocol {
    /// Map an IP protocol number
    pub fn from_ip_proto(proto: u16) -> Self {
        match proto {
            6 => Protocol::Tcp,
            17 => Protocol::Udp,
            other => Protocol::Unknown(other),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("TCP"),
            Protocol::Udp => f.write_str("UDP"),
            Protocol::Unknown(_) => f.write_str("UNK"),
        }
    }
}

/// Best-effort identity of the process that sent a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub path: String,
}

impl ProcessInfo {
    /// Stand-in used when the process cannot be inspected (usually because it already exited)
    pub fn placeholder(pid: u32) -> Self {
        Self {
            pid,
            name: format!("PID: {}", pid),
            path: String::new(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.path.is_empty() && self.name == format!("PID: {}", self.pid)
    }
}

/// A decoded query with its process attached, ready for output
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedEvent {
    pub record: DnsQueryRecord,
    pub process: ProcessInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_type_table_matches_wire_codes() {
        let table = [
            (1, "A"),
            (2, "NS"),
            (5, "CNAME"),
            (6, "SOA"),
            (12, "PTR"),
            (15, "MX"),
            (16, "TXT"),
            (28, "AAAA"),
            (33, "SRV"),
        ];
        for (code, label) in table {
            assert_eq!(QueryType::from_code(code).to_string(), label);
        }
        assert_eq!(QueryType::from_code(65).to_string(), "UNKNOWN(65)");
    }

    #[test]
    fn status_table_matches_codes() {
        assert_eq!(QueryStatus::from_code(0).to_string(), "succeeded");
        assert_eq!(QueryStatus::from_code(123).to_string(), "query name error");
        assert_eq!(QueryStatus::from_code(1460).to_string(), "query timeout");
        assert_eq!(QueryStatus::from_code(9003).to_string(), "DNS name does not exist");
        assert_eq!(QueryStatus::from_code(9501).to_string(), "query record not found");
        assert_eq!(QueryStatus::from_code(87).to_string(), "ERROR(87)");
    }

    #[test]
    fn lookups_are_total() {
        for _ in 0..2_000 {
            let code = fastrand::u64(..);
            assert!(!QueryType::from_code(code).to_string().is_empty());
            assert!(!QueryStatus::from_code(code).to_string().is_empty());
        }
        for code in 0..=u64::from(u16::MAX) {
            assert!(!QueryType::from_code(code).to_string().is_empty());
        }
    }

    #[test]
    fn field_tags_follow_one_rule_each() {
        assert_eq!(QueryType::from_field(&FieldValue::Number(28)), QueryType::AAAA);
        assert_eq!(QueryType::from_field(&FieldValue::Text("16".into())), QueryType::TXT);
        assert_eq!(QueryType::from_field(&FieldValue::Text("99999".into())).to_string(), "UNKNOWN(99999)");
        assert_eq!(QueryType::from_field(&FieldValue::Text("weird".into())).to_string(), "UNKNOWN(weird)");
        assert_eq!(QueryType::from_field(&FieldValue::Other("[1, 2]".into())).to_string(), "[1, 2]");

        assert_eq!(QueryStatus::from_field(&FieldValue::Number(9003)), QueryStatus::NameDoesNotExist);
        assert_eq!(QueryStatus::from_field(&FieldValue::Text("1460".into())), QueryStatus::Timeout);
        assert_eq!(QueryStatus::from_field(&FieldValue::Text("7".into())).to_string(), "ERROR(7)");
        assert_eq!(QueryStatus::from_field(&FieldValue::Text("n/a".into())).to_string(), "UNKNOWN(n/a)");
        assert_eq!(QueryStatus::from_field(&FieldValue::Other("0x0".into())).to_string(), "0x0");
    }

    #[test]
    fn empty_other_values_still_render() {
        assert_eq!(QueryType::from_field(&FieldValue::Other(String::new())).to_string(), "UNKNOWN()");
        assert_eq!(QueryStatus::from_field(&FieldValue::Other(String::new())).to_string(), "UNKNOWN()");
        assert_eq!(QueryType::from_field(&FieldValue::Text(String::new())).to_string(), "UNKNOWN()");
    }

    #[test]
    fn protocol_table() {
        assert_eq!(Protocol::from_ip_proto(6).to_string(), "TCP");
        assert_eq!(Protocol::from_ip_proto(17).to_string(), "UDP");
        assert_eq!(Protocol::from_ip_proto(132).to_string(), "UNK");
    }

    #[test]
    fn placeholder_mentions_pid() {
        let info = ProcessInfo::placeholder(4242);
        assert_eq!(info.name, "PID: 4242");
        assert!(info.path.is_empty());
        assert!(info.is_placeholder());
    }
}
