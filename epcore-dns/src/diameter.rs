//! Diameter peer discovery via S-NAPTR (RFC 6408 / RFC 3588 §5.2).
//!
//! A realm's NAPTR answers advertise `aaa+ap<application>:<protocol>`
//! service fields. An `a`-flag record names a host directly; an `s`-flag
//! record points at SRV records, which are ordered per RFC 2782 (priority
//! ascending, weighted random within a priority).

use rand::seq::SliceRandom;
use rand::Rng;

use crate::cache::Cache;
use crate::error::Result;
use crate::fqdn;
use crate::query::Query;
use crate::record::{RecordData, RecordType};

/// Diameter applications with registered S-NAPTR tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiameterApplication {
    Unknown,
    NasReq,
    MobileIpv4,
    BaseAccounting,
    CreditControl,
    Eap,
    Sip6,
    MobileIpv6Ike,
    MobileIpv6Auth,
    Qos,
    Relay,
    ThreeGppSta,
    ThreeGppS6a,
    ThreeGppSwm,
    ThreeGppS9,
    WimaxWnaaada,
    WimaxWnada,
    WimaxWm4da,
    WimaxWm6da,
    WimaxWdda,
    WimaxWlaada,
    WimaxPccR3P,
    WimaxPccR3Ofc,
    WimaxPccR3OfcPrime,
    WimaxPccR3Oc,
}

impl DiameterApplication {
    /// The IANA application id carried in the `aaa+ap<id>` tag.
    pub fn id(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::NasReq => 1,
            Self::MobileIpv4 => 2,
            Self::BaseAccounting => 3,
            Self::CreditControl => 4,
            Self::Eap => 5,
            Self::Sip6 => 6,
            Self::MobileIpv6Ike => 7,
            Self::MobileIpv6Auth => 8,
            Self::Qos => 9,
            Self::Relay => 4_294_967_295,
            Self::ThreeGppSta => 16_777_250,
            Self::ThreeGppS6a => 16_777_251,
            Self::ThreeGppSwm => 16_777_264,
            Self::ThreeGppS9 => 16_777_267,
            Self::WimaxWnaaada => 16_777_281,
            Self::WimaxWnada => 16_777_282,
            Self::WimaxWm4da => 16_777_283,
            Self::WimaxWm6da => 16_777_284,
            Self::WimaxWdda => 16_777_285,
            Self::WimaxWlaada => 16_777_286,
            Self::WimaxPccR3P => 16_777_287,
            Self::WimaxPccR3Ofc => 16_777_288,
            Self::WimaxPccR3OfcPrime => 16_777_289,
            Self::WimaxPccR3Oc => 16_777_290,
        }
    }
}

/// Diameter transport protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiameterProtocol {
    Unknown,
    Tcp,
    Sctp,
    TlsTcp,
}

impl DiameterProtocol {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Tcp => "diameter.tcp",
            Self::Sctp => "diameter.sctp",
            Self::TlsTcp => "diameter.tls.tcp",
        }
    }
}

/// The NAPTR service string for an application/protocol pair, e.g.
/// `aaa+ap16777251:diameter.sctp`.
pub fn diameter_service(app: DiameterApplication, protocol: DiameterProtocol) -> String {
    format!("aaa+ap{}:{}", app.id(), protocol.tag())
}

/// A resolved Diameter host with its addresses.
#[derive(Debug, Clone, Default)]
pub struct DiameterHost {
    pub name: String,
    pub ipv4_addresses: Vec<String>,
    pub ipv6_addresses: Vec<String>,
}

/// One SRV record resolved for an `s`-flag NAPTR.
#[derive(Debug, Clone, Default)]
pub struct DiameterSrv {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub host: DiameterHost,
}

/// What a Diameter NAPTR resolves to.
#[derive(Debug, Clone)]
pub enum DiameterTarget {
    /// `a` flag: the replacement names the host directly.
    Host(DiameterHost),
    /// `s` flag: the replacement names SRV records, already ordered.
    Service(Vec<DiameterSrv>),
}

/// One matching NAPTR answer.
#[derive(Debug, Clone)]
pub struct DiameterNaptr {
    pub order: u16,
    pub preference: u16,
    pub service: String,
    pub replacement: String,
    pub target: DiameterTarget,
}

/// Orders SRV records per RFC 2782: ascending priority, then a weighted
/// random selection within each priority group.
fn order_srvs(srvs: &mut [DiameterSrv]) {
    srvs.sort_by_key(|s| (s.priority, s.weight));

    let mut rng = rand::thread_rng();
    let mut start = 0;
    while start < srvs.len() {
        let priority = srvs[start].priority;
        let mut end = start;
        while end < srvs.len() && srvs[end].priority == priority {
            end += 1;
        }

        let group = &mut srvs[start..end];
        for i in 0..group.len() {
            let total: u32 = group[i..].iter().map(|s| u32::from(s.weight)).sum();
            let mut val = if total == 0 {
                0
            } else {
                rng.gen_range(0..=total)
            };
            let mut chosen = i;
            for (j, srv) in group.iter().enumerate().skip(i) {
                let w = u32::from(srv.weight);
                if w >= val {
                    chosen = j;
                    break;
                }
                val -= w;
            }
            group.swap(i, chosen);
        }

        start = end;
    }
}

fn collect_host(query: &Query, name: &str) -> DiameterHost {
    let mut host = DiameterHost {
        name: name.to_owned(),
        ..DiameterHost::default()
    };
    for rr in query.additional() {
        if rr.name != name {
            continue;
        }
        match &rr.data {
            RecordData::A(a) => host.ipv4_addresses.push(a.to_string()),
            RecordData::Aaaa(a) => host.ipv6_addresses.push(a.to_string()),
            _ => {}
        }
    }
    let mut rng = rand::thread_rng();
    host.ipv4_addresses.shuffle(&mut rng);
    host.ipv6_addresses.shuffle(&mut rng);
    host
}

/// Discovers the Diameter peers of a realm for one application and
/// transport.
#[derive(Debug)]
pub struct DiameterSelector {
    nsid: i32,
    realm: String,
    application: DiameterApplication,
    protocol: DiameterProtocol,
    results: Vec<DiameterNaptr>,
}

impl DiameterSelector {
    pub fn new() -> Self {
        Self {
            nsid: crate::cache::NS_DEFAULT,
            realm: String::new(),
            application: DiameterApplication::Unknown,
            protocol: DiameterProtocol::Unknown,
            results: Vec::new(),
        }
    }

    pub fn set_named_server_id(&mut self, nsid: i32) -> &mut Self {
        self.nsid = nsid;
        self
    }

    pub fn set_realm(&mut self, realm: impl Into<String>) -> &mut Self {
        self.realm = realm.into();
        self
    }

    /// Sets the realm from the operator identifiers
    /// (`diameter.epc.mnc….mcc….3gppnetwork.org`).
    pub fn set_realm_from_plmn(&mut self, mnc: &str, mcc: &str) -> &mut Self {
        self.realm = fqdn::diameter_fqdn(mnc, mcc);
        self
    }

    pub fn set_application(&mut self, app: DiameterApplication) -> &mut Self {
        self.application = app;
        self
    }

    pub fn set_protocol(&mut self, protocol: DiameterProtocol) -> &mut Self {
        self.protocol = protocol;
        self
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn results(&self) -> &[DiameterNaptr] {
        &self.results
    }

    /// Runs the lookup synchronously through the cache.
    pub fn process(&mut self) -> Result<&[DiameterNaptr]> {
        if self.application == DiameterApplication::Unknown
            || self.protocol == DiameterProtocol::Unknown
            || self.realm.is_empty()
        {
            self.results.clear();
            return Ok(&self.results);
        }

        let cache = Cache::instance(self.nsid)?;
        let realm = self.realm.clone();
        let (query, _cache_hit) = cache.query(RecordType::Naptr, &realm, false)?;
        Ok(self.process_query(&query))
    }

    /// Evaluates an already-completed NAPTR query against the configured
    /// application/protocol.
    pub fn process_query(&mut self, query: &Query) -> &[DiameterNaptr] {
        self.results.clear();
        let service = diameter_service(self.application, self.protocol);

        for rr in query.answers() {
            let RecordData::Naptr(naptr) = &rr.data else {
                continue;
            };
            if naptr.service != service {
                continue;
            }

            let target = match naptr.flags.as_str() {
                "a" => DiameterTarget::Host(collect_host(query, &naptr.replacement)),
                "s" => {
                    let mut srvs = Vec::new();
                    for add in query.additional() {
                        let RecordData::Srv(srv) = &add.data else {
                            continue;
                        };
                        if add.name != naptr.replacement {
                            continue;
                        }
                        srvs.push(DiameterSrv {
                            priority: srv.priority,
                            weight: srv.weight,
                            port: srv.port,
                            host: collect_host(query, &srv.target),
                        });
                    }
                    order_srvs(&mut srvs);
                    DiameterTarget::Service(srvs)
                }
                _ => continue,
            };

            self.results.push(DiameterNaptr {
                order: naptr.order,
                preference: naptr.preference,
                service: naptr.service.clone(),
                replacement: naptr.replacement.clone(),
                target,
            });
        }

        self.results.sort_by_key(|n| (n.order, n.preference));
        &self.results
    }
}

impl Default for DiameterSelector {
    fn default() -> Self {
        Self::new()
    }
}
