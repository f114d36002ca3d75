use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use hickory_proto::{
    op::{Message, ResponseCode},
    rr::{
        DNSClass, RData, Record, RecordType,
        rdata::{A, AAAA},
    },
};

use crate::config::RecordConfig;
use crate::domain::normalize_domain;

use super::response_for;

/// Addresses answered locally for one domain
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideRecord {
    pub domain: String,
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Addr>,
    pub ttl_seconds: u32,
}

/// Immutable domain -> addresses map built once at startup
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    records: HashMap<String, OverrideRecord>,
}

impl OverrideTable {
    pub fn from_config(records: &[RecordConfig]) -> Self {
        let records = records
            .iter()
            .map(|r| {
                let domain = normalize_domain(&r.domain);
                let record = OverrideRecord {
                    domain: domain.clone(),
                    ipv4: r.ipv4.clone(),
                    ipv6: r.ipv6.clone(),
                    ttl_seconds: r.ttl_seconds,
                };
                (domain, record)
            })
            .collect();
        Self { records }
    }

    pub fn lookup(&self, name: &str) -> Option<&OverrideRecord> {
        self.records.get(&normalize_domain(name))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sorted list of overridden domains, for the startup summary.
    pub fn domains(&self) -> Vec<&str> {
        let mut domains: Vec<&str> = self.records.keys().map(String::as_str).collect();
        domains.sort_unstable();
        domains
    }

    /// Build a local answer when `request` asks for an overridden name.
    ///
    /// Returns `None` when the query must be forwarded instead: the name is
    /// not overridden, or the type is something other than A, AAAA or ANY.
    pub fn answer(&self, request: &Message) -> Option<Message> {
        let query = request.queries().first()?;
        let qtype = query.query_type();
        if !matches!(qtype, RecordType::A | RecordType::AAAA | RecordType::ANY) {
            return None;
        }
        if !matches!(query.query_class(), DNSClass::IN | DNSClass::ANY) {
            return None;
        }
        let record = self.lookup(&query.name().to_ascii())?;

        let mut response = response_for(request);
        response.set_authoritative(true);
        response.set_response_code(ResponseCode::NoError);

        let name = query.name().clone();
        if matches!(qtype, RecordType::A | RecordType::ANY) {
            for v4 in &record.ipv4 {
                response.add_answer(Record::from_rdata(
                    name.clone(),
                    record.ttl_seconds,
                    RData::A(A(*v4)),
                ));
            }
        }
        if matches!(qtype, RecordType::AAAA | RecordType::ANY) {
            for v6 in &record.ipv6 {
                response.add_answer(Record::from_rdata(
                    name.clone(),
                    record.ttl_seconds,
                    RData::AAAA(AAAA(*v6)),
                ));
            }
        }

        tracing::debug!(
            name = %record.domain,
            qtype = %qtype,
            answers = response.answers().len(),
            "answered from override table"
        );
        Some(response)
    }
}
