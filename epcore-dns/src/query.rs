//! Query objects: the unit stored in the cache and handed to callers.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::record::{QueryKey, RecordType, ResourceRecord};

/// Callback invoked when an asynchronous query completes. The boolean is the
/// cache-hit indicator.
pub type QueryCallback = Box<dyn FnOnce(Arc<Query>, bool) + Send>;

/// A completed DNS query: answers, additional records and TTL bookkeeping.
///
/// Queries are immutable once built; a refresh produces a new object that
/// replaces the old one under the same cache key.
#[derive(Debug)]
pub struct Query {
    key: QueryKey,
    answers: Vec<ResourceRecord>,
    additional: Vec<ResourceRecord>,
    ttl: u32,
    expires_at: SystemTime,
    error: bool,
    error_msg: String,
}

impl Query {
    /// Builds a successful query result. The TTL is the minimum TTL over
    /// every returned record.
    pub fn completed(
        key: QueryKey,
        answers: Vec<ResourceRecord>,
        additional: Vec<ResourceRecord>,
    ) -> Self {
        let ttl = answers
            .iter()
            .chain(additional.iter())
            .map(|rr| rr.ttl)
            .min()
            .unwrap_or(0);
        Self {
            key,
            answers,
            additional,
            ttl,
            expires_at: SystemTime::now() + Duration::from_secs(u64::from(ttl)),
            error: false,
            error_msg: String::new(),
        }
    }

    /// Builds a failed query result; failed queries never enter the cache.
    pub fn failed(key: QueryKey, error_msg: impl Into<String>) -> Self {
        Self {
            key,
            answers: Vec::new(),
            additional: Vec::new(),
            ttl: 0,
            expires_at: SystemTime::now(),
            error: true,
            error_msg: error_msg.into(),
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn rtype(&self) -> RecordType {
        self.key.rtype()
    }

    pub fn domain(&self) -> &str {
        self.key.domain()
    }

    pub fn answers(&self) -> &[ResourceRecord] {
        &self.answers
    }

    pub fn additional(&self) -> &[ResourceRecord] {
        &self.additional
    }

    /// Minimum TTL over the returned records, in seconds.
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }

    /// Percentage of the TTL already consumed, saturating at 100.
    pub fn percent_consumed(&self) -> u32 {
        if self.ttl == 0 {
            return 100;
        }
        let remaining = self
            .expires_at
            .duration_since(SystemTime::now())
            .unwrap_or_default()
            .as_secs();
        let consumed = u64::from(self.ttl).saturating_sub(remaining);
        (consumed * 100 / u64::from(self.ttl)).min(100) as u32
    }

    pub fn error(&self) -> bool {
        self.error
    }

    pub fn error_msg(&self) -> &str {
        &self.error_msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordData, RecordType};

    fn rr(ttl: u32) -> ResourceRecord {
        ResourceRecord {
            name: "host.example.org".into(),
            rtype: RecordType::A,
            ttl,
            data: RecordData::A("192.0.2.1".parse().unwrap()),
        }
    }

    #[test]
    fn test_ttl_is_minimum_over_records() {
        let q = Query::completed(
            QueryKey::new(RecordType::A, "host.example.org"),
            vec![rr(300), rr(60)],
            vec![rr(120)],
        );
        assert_eq!(q.ttl(), 60);
        assert!(!q.is_expired());
        assert!(!q.error());
    }

    #[test]
    fn test_empty_answers_expire_immediately() {
        let q = Query::completed(
            QueryKey::new(RecordType::A, "host.example.org"),
            vec![],
            vec![],
        );
        assert_eq!(q.ttl(), 0);
        assert!(q.is_expired());
    }

    #[test]
    fn test_failed_query_flags_error() {
        let q = Query::failed(QueryKey::new(RecordType::A, "nope.example.org"), "timeout");
        assert!(q.error());
        assert_eq!(q.error_msg(), "timeout");
    }
}
