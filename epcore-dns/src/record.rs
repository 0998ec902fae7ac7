//! Resource records and cache keys.

use std::net::{Ipv4Addr, Ipv6Addr};

/// DNS record types the resolver understands. The numeric values are the
/// standard `ns_type` codes and are what the query file persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Ns,
    Cname,
    Soa,
    Aaaa,
    Srv,
    Naptr,
    /// Anything else, kept by its wire code.
    Other(u16),
}

impl RecordType {
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => Self::A,
            2 => Self::Ns,
            5 => Self::Cname,
            6 => Self::Soa,
            28 => Self::Aaaa,
            33 => Self::Srv,
            35 => Self::Naptr,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::A => 1,
            Self::Ns => 2,
            Self::Cname => 5,
            Self::Soa => 6,
            Self::Aaaa => 28,
            Self::Srv => 33,
            Self::Naptr => 35,
            Self::Other(code) => code,
        }
    }
}

/// Cache key: `(record type, domain)`. Domains compare case-insensitively,
/// so the key stores the lowercased form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    rtype: RecordType,
    domain: String,
}

impl QueryKey {
    pub fn new(rtype: RecordType, domain: &str) -> Self {
        Self {
            rtype,
            domain: domain.to_ascii_lowercase(),
        }
    }

    pub fn rtype(&self) -> RecordType {
        self.rtype
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

/// NAPTR rdata (RFC 3403).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaptrRecord {
    pub order: u16,
    pub preference: u16,
    pub flags: String,
    pub service: String,
    pub regexp: String,
    pub replacement: String,
}

/// SRV rdata (RFC 2782).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

/// Decoded rdata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ns(String),
    Cname(String),
    Srv(SrvRecord),
    Naptr(NaptrRecord),
    Raw(Vec<u8>),
}

/// One resource record from an answer or additional section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: String,
    pub rtype: RecordType,
    pub ttl: u32,
    pub data: RecordData,
}

impl ResourceRecord {
    /// The A address as text, if this is an A record.
    pub fn ipv4_string(&self) -> Option<String> {
        match &self.data {
            RecordData::A(a) => Some(a.to_string()),
            _ => None,
        }
    }

    /// The AAAA address as text, if this is an AAAA record.
    pub fn ipv6_string(&self) -> Option<String> {
        match &self.data {
            RecordData::Aaaa(a) => Some(a.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_codes_round_trip() {
        for code in [1u16, 2, 5, 6, 28, 33, 35, 257] {
            assert_eq!(RecordType::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_query_key_case_insensitive() {
        let a = QueryKey::new(RecordType::Naptr, "Apn1.Example.ORG");
        let b = QueryKey::new(RecordType::Naptr, "apn1.example.org");
        assert_eq!(a, b);
    }
}
