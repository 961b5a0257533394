//! Turning raw events into `DnsQueryRecord`s
//!
//! Two paths feed the same record type: the wire-format path walks the question
//! section of a captured DNS message, the structured path maps the named fields
//! of a tracing event. Both return `None` for anything that is not a usable
//! query; callers drop those events without logging.

// DNS packet structure reference: https://mislove.org/teaching/cs4700/spring11/handouts/project1-primer.pdf

use crate::record::{DnsQueryRecord, Protocol, QueryStatus, QueryType};
use crate::types::{FieldValue, PacketEvent, StructuredEvent};
use chrono::{DateTime, Utc};

const HEADER_LEN: usize = 12;
const MAX_LABEL_LEN: usize = 63;
const QNAME_TERMINATOR: u8 = 0;
const QR_BIT: u16 = 0x8000;

/// Question extracted from a DNS query message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireQuery {
    pub name: String,
    pub qtype: u16,
}

/// Decode the first question of a DNS query message.
///
/// Responses, truncated messages and names with out-of-range labels are rejected.
pub fn decode_packet(dns_buf: &[u8]) -> Option<WireQuery> {
    if dns_buf.len() < HEADER_LEN {
        return None;
    }

    let flags = u16::from_be_bytes([dns_buf[2], dns_buf[3]]);
    if flags & QR_BIT != 0 {
        return None;
    }

    let mut offset = HEADER_LEN;
    let mut name = String::new();
    loop {
        let segment_len = *dns_buf.get(offset)? as usize;
        if segment_len == QNAME_TERMINATOR as usize {
            break;
        }
        if segment_len > MAX_LABEL_LEN || offset + 1 + segment_len > dns_buf.len() {
            return None;
        }
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(&String::from_utf8_lossy(&dns_buf[offset + 1..offset + 1 + segment_len]));
        offset += 1 + segment_len;
    }

    // Skip the terminator, QTYPE follows
    offset += 1;
    let qtype_bytes = dns_buf.get(offset..offset + 2)?;
    let qtype = u16::from_be_bytes([qtype_bytes[0], qtype_bytes[1]]);

    if name.is_empty() {
        return None;
    }

    Some(WireQuery { name, qtype })
}

/// Build a record from a packet captured on the kernel send path
pub fn decode_packet_event(event: &PacketEvent, now: DateTime<Utc>) -> Option<DnsQueryRecord> {
    let query = decode_packet(&event.payload)?;

    Some(DnsQueryRecord {
        timestamp: now,
        process_id: event.pid,
        thread_id: Some(event.thread_id),
        query_name: query.name,
        query_type: QueryType::from_code(u64::from(query.qtype)),
        status: None,
        protocol: Some(Protocol::from_ip_proto(event.protocol)),
        result: None,
        source_event_id: None,
    })
}

/// Build a record from a structured tracing event.
///
/// `QueryName` is required. A missing `QueryType` keeps the event with type
/// `-`. When both `QueryStatus` and `Status` are present, `Status` wins.
pub fn decode_structured(event: &StructuredEvent) -> Option<DnsQueryRecord> {
    let query_name = field_text(event.field("QueryName")?);
    if query_name.is_empty() {
        return None;
    }

    let query_type = event
        .field("QueryType")
        .map_or_else(|| QueryType::Opaque("-".to_string()), QueryType::from_field);

    let status = event
        .field("Status")
        .or_else(|| event.field("QueryStatus"))
        .map(QueryStatus::from_field);

    let result = event.field("QueryResults").map(field_text).filter(|text| !text.is_empty());

    Some(DnsQueryRecord {
        timestamp: event.timestamp,
        process_id: event.process_id,
        thread_id: Some(event.thread_id),
        query_name,
        query_type,
        status,
        protocol: None,
        result,
        source_event_id: Some(event.event_id),
    })
}

fn field_text(value: &FieldValue) -> String {
    value.to_string().trim_end_matches('\0').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;

    fn query_packet(labels: &[&str], qtype: u16) -> Vec<u8> {
        let mut buf = vec![0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        for label in labels {
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
        buf.push(0);
        buf.extend_from_slice(&qtype.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf
    }

    fn structured(fields: &[(&str, FieldValue)]) -> StructuredEvent {
        StructuredEvent {
            provider: "{1C95126E-7EEA-49A9-A3FE-A378B03DDB4D}".to_string(),
            event_id: 3008,
            process_id: 812,
            thread_id: 900,
            timestamp: Utc::now(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn decodes_example_com_a_query() {
        let mut buf = vec![0u8; 12];
        buf.extend_from_slice(b"\x07example\x03com\x00\x00\x01");

        let query = decode_packet(&buf).unwrap();
        assert_eq!(query.name, "example.com");
        assert_eq!(QueryType::from_code(u64::from(query.qtype)), QueryType::A);
    }

    #[test]
    fn rejects_short_buffers() {
        for len in 0..12 {
            assert!(decode_packet(&vec![0u8; len]).is_none());
        }
    }

    #[test]
    fn rejects_responses() {
        let mut buf = query_packet(&["example", "com"], 1);
        buf[2] |= 0b1000_0000;
        assert!(decode_packet(&buf).is_none());
    }

    #[test]
    fn rejects_oversized_labels() {
        let mut buf = vec![0u8; 12];
        buf.push(64);
        buf.extend_from_slice(&[b'a'; 64]);
        buf.extend_from_slice(&[0, 0, 1]);
        assert!(decode_packet(&buf).is_none());
    }

    #[test]
    fn rejects_labels_past_the_end() {
        let mut buf = vec![0u8; 12];
        buf.extend_from_slice(b"\x0aexample");
        assert!(decode_packet(&buf).is_none());
    }

    #[test]
    fn rejects_missing_terminator() {
        let mut buf = vec![0u8; 12];
        buf.extend_from_slice(b"\x07example");
        assert!(decode_packet(&buf).is_none());
    }

    #[test]
    fn rejects_truncated_qtype() {
        let mut buf = vec![0u8; 12];
        buf.extend_from_slice(b"\x07example\x03com\x00\x00");
        assert!(decode_packet(&buf).is_none());
    }

    #[test]
    fn rejects_empty_name() {
        let mut buf = vec![0u8; 12];
        buf.extend_from_slice(&[0, 0, 1]);
        assert!(decode_packet(&buf).is_none());
    }

    #[test]
    fn random_buffers_never_panic() {
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        for _ in 0..20_000 {
            let len = rng.usize(0..96);
            let mut buf: Vec<u8> = (0..len).map(|_| rng.u8(..)).collect();
            if buf.len() > 2 && rng.bool() {
                buf[2] &= 0x7f;
            }
            if let Some(query) = decode_packet(&buf) {
                assert!(!query.name.is_empty());
            }
        }
    }

    #[test]
    fn packet_event_carries_protocol_and_pid() {
        let event = PacketEvent {
            ktime_ns: 0,
            pid: 4321,
            thread_id: 4330,
            uid: 0,
            gid: 0,
            ifindex: 1,
            comm: "dig".to_string(),
            source_port: 51000,
            destination_port: 53,
            source_addr: Ipv4Addr::LOCALHOST,
            destination_addr: Ipv4Addr::new(127, 0, 0, 53),
            protocol: 6,
            payload: query_packet(&["ads", "example", "net"], 28),
        };

        let record = decode_packet_event(&event, Utc::now()).unwrap();
        assert_eq!(record.process_id, 4321);
        assert_eq!(record.thread_id, Some(4330));
        assert_eq!(record.query_name, "ads.example.net");
        assert_eq!(record.query_type, QueryType::AAAA);
        assert_eq!(record.protocol, Some(Protocol::Tcp));
        assert_eq!(record.source_event_id, None);
    }

    #[test]
    fn structured_event_maps_all_fields() {
        let event = structured(&[
            ("QueryName", FieldValue::Text("ads.example.net".into())),
            ("QueryType", FieldValue::Number(28)),
            ("QueryStatus", FieldValue::Text("0".into())),
            ("QueryResults", FieldValue::Text("::1;".into())),
        ]);

        let record = decode_structured(&event).unwrap();
        assert_eq!(record.query_name, "ads.example.net");
        assert_eq!(record.query_type.to_string(), "AAAA");
        assert_eq!(record.status, Some(QueryStatus::Succeeded));
        assert_eq!(record.result.as_deref(), Some("::1;"));
        assert_eq!(record.thread_id, Some(900));
        assert_eq!(record.source_event_id, Some(3008));
        assert_eq!(record.protocol, None);
    }

    #[test]
    fn status_field_overrides_query_status() {
        let event = structured(&[
            ("QueryName", FieldValue::Text("example.org".into())),
            ("QueryType", FieldValue::Number(1)),
            ("QueryStatus", FieldValue::Number(0)),
            ("Status", FieldValue::Number(9003)),
        ]);

        let record = decode_structured(&event).unwrap();
        assert_eq!(record.status, Some(QueryStatus::NameDoesNotExist));
    }

    #[test]
    fn structured_event_without_name_is_dropped() {
        let no_name = structured(&[("QueryType", FieldValue::Number(1))]);
        assert!(decode_structured(&no_name).is_none());

        let blank_name = structured(&[
            ("QueryName", FieldValue::Text("\0".into())),
            ("QueryType", FieldValue::Number(1)),
        ]);
        assert!(decode_structured(&blank_name).is_none());
    }

    #[test]
    fn missing_type_keeps_the_event() {
        let no_type = structured(&[("QueryName", FieldValue::Text("example.org".into()))]);

        let record = decode_structured(&no_type).unwrap();
        assert_eq!(record.query_name, "example.org");
        assert_eq!(record.query_type.to_string(), "-");
    }

    #[test]
    fn empty_results_render_as_missing() {
        let event = structured(&[
            ("QueryName", FieldValue::Text("nas".into())),
            ("QueryType", FieldValue::Number(1)),
            ("Status", FieldValue::Number(9003)),
            ("QueryResults", FieldValue::Text(String::new())),
        ]);

        let record = decode_structured(&event).unwrap();
        assert_eq!(record.query_name, "nas");
        assert_eq!(record.result, None);
    }

    #[test]
    fn unmapped_codes_keep_the_event() {
        let event = structured(&[
            ("QueryName", FieldValue::Text("example.org".into())),
            ("QueryType", FieldValue::Number(65)),
            ("Status", FieldValue::Number(1168)),
        ]);

        let record = decode_structured(&event).unwrap();
        assert_eq!(record.query_type.to_string(), "UNKNOWN(65)");
        assert_eq!(record.status.unwrap().to_string(), "ERROR(1168)");
    }
}
