//! S-NAPTR node selection (TS 23.003 §19.4.3, RFC 3958).
//!
//! NAPTR service fields look like
//! `x-3gpp-upf:x-sxb+ue-1.2+nc-lbo:x-sxa`: a service tag followed by
//! app-protocol entries, each optionally qualified with supported UE usage
//! types (`ue-…`) and network capabilities (`nc-…`).

use rand::seq::SliceRandom;

use crate::cache::Cache;
use crate::error::Result;
use crate::fqdn;
use crate::query::Query;
use crate::record::{RecordData, RecordType};

/// Service tags from TS 23.003 table 19.4.3.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppServiceId {
    Unknown,
    Any,
    Pgw,
    Sgw,
    Ggsn,
    Sgsn,
    Mme,
    Msc,
    Upf,
    Amf,
}

impl AppServiceId {
    pub fn parse(s: &str) -> Self {
        match s {
            "x-3gpp-pgw" => Self::Pgw,
            "x-3gpp-sgw" => Self::Sgw,
            "x-3gpp-ggsn" => Self::Ggsn,
            "x-3gpp-sgsn" => Self::Sgsn,
            "x-3gpp-mme" => Self::Mme,
            "x-3gpp-msc" => Self::Msc,
            "x-3gpp-upf" => Self::Upf,
            "x-3gpp-amf" => Self::Amf,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "x-3gpp-unknown",
            Self::Any => "x-3gpp-any",
            Self::Pgw => "x-3gpp-pgw",
            Self::Sgw => "x-3gpp-sgw",
            Self::Ggsn => "x-3gpp-ggsn",
            Self::Sgsn => "x-3gpp-sgsn",
            Self::Mme => "x-3gpp-mme",
            Self::Msc => "x-3gpp-msc",
            Self::Upf => "x-3gpp-upf",
            Self::Amf => "x-3gpp-amf",
        }
    }
}

/// App protocols from TS 23.003 table 19.4.3.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppProtocolId {
    Unknown,
    Gn,
    Gp,
    N2,
    Nq,
    NqPrime,
    S1Mme,
    S1U,
    S10,
    S11,
    S12,
    S16,
    S2aGtp,
    S2aMipv4,
    S2aPmip,
    S2bGtp,
    S2bPmip,
    S2cDsmip,
    S3,
    S4,
    S5Gtp,
    S5Pmip,
    S6a,
    S8Gtp,
    S8Pmip,
    Sv,
    Sxa,
    Sxb,
    Sxc,
}

impl AppProtocolId {
    pub fn parse(p: &str) -> Self {
        match p {
            "x-gn" => Self::Gn,
            "x-gp" => Self::Gp,
            "x-n2" => Self::N2,
            "x-nq" => Self::Nq,
            "x-nqprime" => Self::NqPrime,
            "x-s1-mme" => Self::S1Mme,
            "x-s1-u" => Self::S1U,
            "x-s10" => Self::S10,
            "x-s11" => Self::S11,
            "x-s12" => Self::S12,
            "x-s16" => Self::S16,
            "x-s2a-gtp" => Self::S2aGtp,
            "x-s2a-mipv4" => Self::S2aMipv4,
            "x-s2a-pmip" => Self::S2aPmip,
            "x-s2b-gtp" => Self::S2bGtp,
            "x-s2b-pmip" => Self::S2bPmip,
            "x-s2c-dsmip" => Self::S2cDsmip,
            "x-s3" => Self::S3,
            "x-s4" => Self::S4,
            "x-s5-gtp" => Self::S5Gtp,
            "x-s5-pmip" => Self::S5Pmip,
            "x-s6a" => Self::S6a,
            "x-s8-gtp" => Self::S8Gtp,
            "x-s8-pmip" => Self::S8Pmip,
            "x-sv" => Self::Sv,
            "x-sxa" => Self::Sxa,
            "x-sxb" => Self::Sxb,
            "x-sxc" => Self::Sxc,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "x-unknown",
            Self::Gn => "x-gn",
            Self::Gp => "x-gp",
            Self::N2 => "x-n2",
            Self::Nq => "x-nq",
            Self::NqPrime => "x-nqprime",
            Self::S1Mme => "x-s1-mme",
            Self::S1U => "x-s1-u",
            Self::S10 => "x-s10",
            Self::S11 => "x-s11",
            Self::S12 => "x-s12",
            Self::S16 => "x-s16",
            Self::S2aGtp => "x-s2a-gtp",
            Self::S2aMipv4 => "x-s2a-mipv4",
            Self::S2aPmip => "x-s2a-pmip",
            Self::S2bGtp => "x-s2b-gtp",
            Self::S2bPmip => "x-s2b-pmip",
            Self::S2cDsmip => "x-s2c-dsmip",
            Self::S3 => "x-s3",
            Self::S4 => "x-s4",
            Self::S5Gtp => "x-s5-gtp",
            Self::S5Pmip => "x-s5-pmip",
            Self::S6a => "x-s6a",
            Self::S8Gtp => "x-s8-gtp",
            Self::S8Pmip => "x-s8-pmip",
            Self::Sv => "x-sv",
            Self::Sxa => "x-sxa",
            Self::Sxb => "x-sxb",
            Self::Sxc => "x-sxc",
        }
    }
}

/// One app-protocol entry from a NAPTR service field, with any `ue-` /
/// `nc-` qualifiers it carried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppProtocol {
    raw: String,
    id: Option<AppProtocolId>,
    usage_types: Vec<i32>,
    network_capabilities: Vec<String>,
}

impl AppProtocol {
    /// Parses one `:`-separated protocol entry, e.g. `x-sxb+ue-1.2+nc-lbo`.
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split('+');
        let first = parts.next().unwrap_or("");
        let mut protocol = Self {
            raw: raw.to_owned(),
            id: match AppProtocolId::parse(first) {
                AppProtocolId::Unknown => None,
                id => Some(id),
            },
            usage_types: Vec::new(),
            network_capabilities: Vec::new(),
        };

        for token in std::iter::once(first).chain(parts) {
            if let Some(rest) = token.strip_prefix("ue-") {
                protocol
                    .usage_types
                    .extend(rest.split('.').map(|s| s.parse::<i32>().unwrap_or(0)));
            } else if let Some(rest) = token.strip_prefix("nc-") {
                protocol
                    .network_capabilities
                    .extend(rest.split('.').map(str::to_owned));
            }
        }
        protocol
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn id(&self) -> Option<AppProtocolId> {
        self.id
    }

    pub fn usage_types(&self) -> &[i32] {
        &self.usage_types
    }

    pub fn network_capabilities(&self) -> &[String] {
        &self.network_capabilities
    }

    pub fn supports_usage_type(&self, ut: i32) -> bool {
        self.usage_types.contains(&ut)
    }

    pub fn supports_network_capability(&self, nc: &str) -> bool {
        self.network_capabilities.iter().any(|c| c == nc)
    }
}

/// A parsed NAPTR service field: the service tag and its protocol entries.
#[derive(Debug, Clone)]
pub struct AppService {
    raw: String,
    service: AppServiceId,
    protocols: Vec<AppProtocol>,
}

impl AppService {
    /// Parses a full service field, e.g. `x-3gpp-upf:x-sxb+nc-lbo:x-sxa`.
    pub fn parse(raw: &str) -> Self {
        let mut pieces = raw.split(':');
        let service = pieces
            .next()
            .map_or(AppServiceId::Unknown, AppServiceId::parse);
        Self {
            raw: raw.to_owned(),
            service,
            protocols: pieces.map(AppProtocol::parse).collect(),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn service(&self) -> AppServiceId {
        self.service
    }

    pub fn protocols(&self) -> &[AppProtocol] {
        &self.protocols
    }

    pub fn find_protocol(&self, id: AppProtocolId) -> Option<&AppProtocol> {
        self.protocols.iter().find(|p| p.id == Some(id))
    }
}

/// One selected node: hostname, NAPTR ordering fields, the desired
/// protocols it supports, and its addresses from the additional section.
#[derive(Debug, Clone, Default)]
pub struct NodeSelectorResult {
    pub hostname: String,
    pub order: u16,
    pub preference: u16,
    pub port: u16,
    pub supported_protocols: Vec<AppProtocol>,
    pub ipv4_hosts: Vec<String>,
    pub ipv6_hosts: Vec<String>,
}

/// Selects nodes for a 3GPP service from NAPTR answers.
#[derive(Debug)]
pub struct NodeSelector {
    nsid: i32,
    domain: String,
    desired_service: AppServiceId,
    desired_protocols: Vec<AppProtocolId>,
    desired_usage_types: Vec<i32>,
    desired_network_capabilities: Vec<String>,
    results: Vec<NodeSelectorResult>,
}

impl NodeSelector {
    pub fn new(domain: impl Into<String>, desired_service: AppServiceId) -> Self {
        Self {
            nsid: crate::cache::NS_DEFAULT,
            domain: domain.into(),
            desired_service,
            desired_protocols: Vec::new(),
            desired_usage_types: Vec::new(),
            desired_network_capabilities: Vec::new(),
            results: Vec::new(),
        }
    }

    /// Selector for an MME by code and group id.
    pub fn mme(mmec: &str, mmegi: &str, mnc: &str, mcc: &str) -> Self {
        Self::new(fqdn::mme_fqdn(mmec, mmegi, mnc, mcc), AppServiceId::Mme)
    }

    /// Selector for a PGW serving an APN.
    pub fn pgw(apn: &str, mnc: &str, mcc: &str) -> Self {
        Self::new(fqdn::apn_fqdn(apn, mnc, mcc), AppServiceId::Pgw)
    }

    /// Selector for the UPFs colocated with a PGW for an APN.
    pub fn pgw_upf(apn: &str, mnc: &str, mcc: &str) -> Self {
        Self::new(fqdn::apn_fqdn(apn, mnc, mcc), AppServiceId::Upf)
    }

    /// Selector for an SGW by tracking area.
    pub fn sgw(lb: &str, hb: &str, mnc: &str, mcc: &str) -> Self {
        Self::new(fqdn::tai_fqdn(lb, hb, mnc, mcc), AppServiceId::Sgw)
    }

    /// Selector for the UPFs serving a tracking area.
    pub fn sgw_upf(lb: &str, hb: &str, mnc: &str, mcc: &str) -> Self {
        Self::new(fqdn::tai_fqdn(lb, hb, mnc, mcc), AppServiceId::Upf)
    }

    /// Selector for the UPFs serving an eNodeB.
    pub fn enodeb_upf(enb: &str, mnc: &str, mcc: &str) -> Self {
        Self::new(fqdn::global_enodeb_id_fqdn(enb, mnc, mcc), AppServiceId::Upf)
    }

    /// Selector for an arbitrary EPC node by name, matching any service.
    pub fn epc_node(node: &str, mnc: &str, mcc: &str) -> Self {
        Self::new(fqdn::epc_node_fqdn(node, mnc, mcc), AppServiceId::Any)
    }

    pub fn set_named_server_id(&mut self, nsid: i32) -> &mut Self {
        self.nsid = nsid;
        self
    }

    pub fn add_desired_protocol(&mut self, protocol: AppProtocolId) -> &mut Self {
        self.desired_protocols.push(protocol);
        self
    }

    pub fn add_desired_usage_type(&mut self, ut: i32) -> &mut Self {
        self.desired_usage_types.push(ut);
        self
    }

    pub fn add_desired_network_capability(&mut self, nc: impl Into<String>) -> &mut Self {
        self.desired_network_capabilities.push(nc.into());
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn desired_service(&self) -> AppServiceId {
        self.desired_service
    }

    pub fn results(&self) -> &[NodeSelectorResult] {
        &self.results
    }

    /// Runs the selection synchronously: NAPTR query via the cache for this
    /// selector's named server, then filtering and ordering.
    pub fn process(&mut self) -> Result<&[NodeSelectorResult]> {
        let cache = Cache::instance(self.nsid)?;
        let (query, _cache_hit) = cache.query(RecordType::Naptr, &self.domain, false)?;
        Ok(self.process_query(&query))
    }

    /// Filters and orders the answers of an already-completed NAPTR query.
    pub fn process_query(&mut self, query: &Query) -> &[NodeSelectorResult] {
        self.results.clear();

        for rr in query.answers() {
            let RecordData::Naptr(naptr) = &rr.data else {
                continue;
            };

            let service = AppService::parse(&naptr.service);
            if self.desired_service != AppServiceId::Any
                && service.service() != self.desired_service
            {
                continue;
            }

            let mut result = NodeSelectorResult {
                hostname: naptr.replacement.clone(),
                order: naptr.order,
                preference: naptr.preference,
                ..NodeSelectorResult::default()
            };

            for desired in &self.desired_protocols {
                let Some(supported) = service.find_protocol(*desired) else {
                    continue;
                };

                let mut matched = AppProtocol {
                    raw: supported.raw.clone(),
                    id: supported.id,
                    ..AppProtocol::default()
                };

                // a protocol restricted to usage types must overlap ours
                if !supported.usage_types.is_empty() {
                    matched.usage_types = self
                        .desired_usage_types
                        .iter()
                        .copied()
                        .filter(|ut| supported.supports_usage_type(*ut))
                        .collect();
                    if matched.usage_types.is_empty() {
                        continue;
                    }
                }

                // every requested capability must be supported
                let all_capabilities = self
                    .desired_network_capabilities
                    .iter()
                    .all(|nc| supported.supports_network_capability(nc));
                if !all_capabilities {
                    continue;
                }
                matched
                    .network_capabilities
                    .clone_from(&self.desired_network_capabilities);

                result.supported_protocols.push(matched);
            }

            if result.supported_protocols.is_empty() {
                continue;
            }

            for additional in query.additional() {
                if additional.name != result.hostname {
                    continue;
                }
                match &additional.data {
                    RecordData::A(a) => result.ipv4_hosts.push(a.to_string()),
                    RecordData::Aaaa(a) => result.ipv6_hosts.push(a.to_string()),
                    _ => {}
                }
            }

            let mut rng = rand::thread_rng();
            result.ipv4_hosts.shuffle(&mut rng);
            result.ipv6_hosts.shuffle(&mut rng);

            self.results.push(result);
        }

        self.results
            .sort_by_key(|r| (r.order, r.preference));
        &self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{NaptrRecord, QueryKey, ResourceRecord};

    fn naptr_answer(order: u16, preference: u16, service: &str, replacement: &str) -> ResourceRecord {
        ResourceRecord {
            name: "apn1.apn.epc.mnc120.mcc310.3gppnetwork.org".into(),
            rtype: RecordType::Naptr,
            ttl: 300,
            data: RecordData::Naptr(NaptrRecord {
                order,
                preference,
                flags: "a".into(),
                service: service.into(),
                regexp: String::new(),
                replacement: replacement.into(),
            }),
        }
    }

    fn a_record(name: &str, addr: &str) -> ResourceRecord {
        ResourceRecord {
            name: name.into(),
            rtype: RecordType::A,
            ttl: 300,
            data: RecordData::A(addr.parse().unwrap()),
        }
    }

    fn test_query(answers: Vec<ResourceRecord>, additional: Vec<ResourceRecord>) -> Query {
        Query::completed(
            QueryKey::new(
                RecordType::Naptr,
                "apn1.apn.epc.mnc120.mcc310.3gppnetwork.org",
            ),
            answers,
            additional,
        )
    }

    #[test]
    fn test_service_field_parsing() {
        let service = AppService::parse("x-3gpp-upf:x-sxb+ue-1.2+nc-lbo:x-sxa");
        assert_eq!(service.service(), AppServiceId::Upf);
        assert_eq!(service.protocols().len(), 2);

        let sxb = service.find_protocol(AppProtocolId::Sxb).unwrap();
        assert_eq!(sxb.usage_types(), &[1, 2]);
        assert!(sxb.supports_network_capability("lbo"));

        let sxa = service.find_protocol(AppProtocolId::Sxa).unwrap();
        assert!(sxa.usage_types().is_empty());
    }

    #[test]
    fn test_network_capability_filtering() {
        // one UPF advertising lbo, one without; only the first survives a
        // selection that requires lbo
        let query = test_query(
            vec![
                naptr_answer(10, 1, "x-3gpp-upf:x-sxb+nc-lbo", "upf1.example.org"),
                naptr_answer(10, 2, "x-3gpp-upf:x-sxb", "upf2.example.org"),
            ],
            vec![a_record("upf1.example.org", "192.0.2.1")],
        );

        let mut selector = NodeSelector::new(query.domain().to_owned(), AppServiceId::Upf);
        selector
            .add_desired_protocol(AppProtocolId::Sxb)
            .add_desired_network_capability("lbo");

        let results = selector.process_query(&query);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].hostname, "upf1.example.org");
        assert_eq!(results[0].ipv4_hosts, vec!["192.0.2.1"]);
    }

    #[test]
    fn test_usage_type_overlap_required() {
        let query = test_query(
            vec![naptr_answer(
                10,
                1,
                "x-3gpp-pgw:x-s5-gtp+ue-3.4",
                "pgw1.example.org",
            )],
            vec![],
        );

        let mut selector = NodeSelector::new(query.domain().to_owned(), AppServiceId::Pgw);
        selector
            .add_desired_protocol(AppProtocolId::S5Gtp)
            .add_desired_usage_type(7);
        assert!(selector.process_query(&query).is_empty());

        let mut selector = NodeSelector::new(query.domain().to_owned(), AppServiceId::Pgw);
        selector
            .add_desired_protocol(AppProtocolId::S5Gtp)
            .add_desired_usage_type(3);
        let results = selector.process_query(&query);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].supported_protocols[0].usage_types(), &[3]);
    }

    #[test]
    fn test_results_sorted_by_order_then_preference() {
        let query = test_query(
            vec![
                naptr_answer(20, 1, "x-3gpp-sgw:x-s11", "sgw-c.example.org"),
                naptr_answer(10, 9, "x-3gpp-sgw:x-s11", "sgw-b.example.org"),
                naptr_answer(10, 2, "x-3gpp-sgw:x-s11", "sgw-a.example.org"),
            ],
            vec![],
        );

        let mut selector = NodeSelector::new(query.domain().to_owned(), AppServiceId::Sgw);
        selector.add_desired_protocol(AppProtocolId::S11);
        let hostnames: Vec<&str> = selector
            .process_query(&query)
            .iter()
            .map(|r| r.hostname.as_str())
            .collect();
        assert_eq!(
            hostnames,
            vec!["sgw-a.example.org", "sgw-b.example.org", "sgw-c.example.org"]
        );
    }

    #[test]
    fn test_any_service_matches_everything() {
        let query = test_query(
            vec![
                naptr_answer(10, 1, "x-3gpp-mme:x-s10", "mme1.example.org"),
                naptr_answer(10, 2, "x-3gpp-sgw:x-s11", "sgw1.example.org"),
            ],
            vec![],
        );

        let mut selector = NodeSelector::new(query.domain().to_owned(), AppServiceId::Any);
        selector
            .add_desired_protocol(AppProtocolId::S10)
            .add_desired_protocol(AppProtocolId::S11);
        assert_eq!(selector.process_query(&query).len(), 2);
    }
}
