//! Event-id allow-list and domain deny-list
//!
//! The configuration is built once at startup and only read afterwards, so it
//! can be shared between threads by reference.

use crate::record::DnsQueryRecord;
use std::collections::BTreeSet;

/// Structured-trace events kept by default: 3008 (query completed),
/// 3018 (cache response), 3020 (index response). 3011 (server response) is left out.
pub const DEFAULT_STRUCTURED_EVENT_IDS: [u16; 3] = [3008, 3018, 3020];

/// Domains dropped by default on the structured-trace path
pub const DEFAULT_DENIED_DOMAINS: [&str; 1] = ["localhost"];

/// Why an event did not pass the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    EventNotAllowed,
    DomainDenied,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
    event_id_allow_list: BTreeSet<u16>,
    // lower-cased at construction
    domain_deny_list: Vec<String>,
}

impl FilterConfig {
    pub fn builder() -> FilterConfigBuilder {
        FilterConfigBuilder::default()
    }

    /// Wire-format events have no event id, so nothing is allow-listed and nothing denied
    pub fn kernel_probe_defaults() -> Self {
        Self::default()
    }

    pub fn structured_trace_defaults() -> Self {
        Self::builder()
            .allow_events(DEFAULT_STRUCTURED_EVENT_IDS)
            .deny_domains(DEFAULT_DENIED_DOMAINS)
            .build()
    }

    pub fn event_id_allow_list(&self) -> &BTreeSet<u16> {
        &self.event_id_allow_list
    }

    pub fn domain_deny_list(&self) -> &[String] {
        &self.domain_deny_list
    }

    /// An empty allow-list passes everything, including events without an id
    pub fn allows_event(&self, event_id: Option<u16>) -> bool {
        if self.event_id_allow_list.is_empty() {
            return true;
        }
        event_id.is_some_and(|id| self.event_id_allow_list.contains(&id))
    }

    /// Case-insensitive substring match against the deny-list
    pub fn denies_domain(&self, domain: &str) -> bool {
        if self.domain_deny_list.is_empty() {
            return false;
        }
        let domain = domain.to_lowercase();
        self.domain_deny_list.iter().any(|denied| domain.contains(denied.as_str()))
    }

    /// Allow-list first, then deny-list
    pub fn permits(&self, record: &DnsQueryRecord) -> Result<(), FilterVerdict> {
        if !self.allows_event(record.source_event_id) {
            return Err(FilterVerdict::EventNotAllowed);
        }
        if self.denies_domain(&record.query_name) {
            return Err(FilterVerdict::DomainDenied);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FilterConfigBuilder {
    event_id_allow_list: BTreeSet<u16>,
    domain_deny_list: Vec<String>,
}

impl FilterConfigBuilder {
    pub fn allow_event(mut self, event_id: u16) -> Self {
        self.event_id_allow_list.insert(event_id);
        self
    }

    pub fn allow_events(mut self, event_ids: impl IntoIterator<Item = u16>) -> Self {
        self.event_id_allow_list.extend(event_ids);
        self
    }

    /// Blank entries are ignored, they would match every domain
    pub fn deny_domain(mut self, substring: impl AsRef<str>) -> Self {
        let substring = substring.as_ref().trim().to_lowercase();
        if !substring.is_empty() && !self.domain_deny_list.contains(&substring) {
            self.domain_deny_list.push(substring);
        }
        self
    }

    pub fn deny_domains<S: AsRef<str>>(self, substrings: impl IntoIterator<Item = S>) -> Self {
        substrings.into_iter().fold(self, |builder, s| builder.deny_domain(s))
    }

    pub fn build(self) -> FilterConfig {
        FilterConfig {
            event_id_allow_list: self.event_id_allow_list,
            domain_deny_list: self.domain_deny_list,
        }
    }
}
