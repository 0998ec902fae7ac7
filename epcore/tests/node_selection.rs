//! S-NAPTR node selection against a loopback DNS server: the UPF scenario
//! with a network-capability constraint, end to end through the cache.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use epcore::dns::wire;
use epcore::dns::{
    AppProtocolId, AppServiceId, Cache, NaptrRecord, NodeSelector, RecordData, RecordType,
    ResourceRecord,
};

fn naptr(qname: &str, order: u16, preference: u16, service: &str, host: &str) -> ResourceRecord {
    ResourceRecord {
        name: qname.to_owned(),
        rtype: RecordType::Naptr,
        ttl: 600,
        data: RecordData::Naptr(NaptrRecord {
            order,
            preference,
            flags: "a".into(),
            service: service.into(),
            regexp: String::new(),
            replacement: host.into(),
        }),
    }
}

/// Serves NAPTR answers for the APN domain: one UPF advertising
/// `x-sxb+nc-lbo`, one with plain `x-sxb`.
fn spawn_server(stop: Arc<AtomicBool>) -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = socket.local_addr().unwrap().port();
    socket
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();

    std::thread::spawn(move || {
        let mut buf = [0u8; 2048];
        while !stop.load(Ordering::SeqCst) {
            let Ok((len, peer)) = socket.recv_from(&mut buf) else {
                continue;
            };
            // qname ends at the zero label; question runs 4 bytes further
            let name_end = 12 + buf[12..len].iter().position(|b| *b == 0).unwrap();
            let question = &buf[12..name_end + 5];
            let wire_id = u16::from_be_bytes([buf[0], buf[1]]);

            let qname = "apn1.apn.epc.mnc120.mcc310.3gppnetwork.org";
            let answers = vec![
                naptr(qname, 10, 1, "x-3gpp-upf:x-sxb+nc-lbo", "upf-lbo.node.epc.test"),
                naptr(qname, 10, 2, "x-3gpp-upf:x-sxb", "upf-plain.node.epc.test"),
            ];
            let additional = vec![
                ResourceRecord {
                    name: "upf-lbo.node.epc.test".into(),
                    rtype: RecordType::A,
                    ttl: 600,
                    data: RecordData::A("203.0.113.1".parse().unwrap()),
                },
                ResourceRecord {
                    name: "upf-plain.node.epc.test".into(),
                    rtype: RecordType::A,
                    ttl: 600,
                    data: RecordData::A("203.0.113.2".parse().unwrap()),
                },
            ];
            let reply = wire::build::response(wire_id, question, &answers, &additional);
            let _ = socket.send_to(&reply, peer);
        }
    });

    port
}

#[test]
fn test_upf_selection_with_network_capability() {
    let stop = Arc::new(AtomicBool::new(false));
    let port = spawn_server(Arc::clone(&stop));

    let cache = Cache::instance(77).unwrap();
    cache.add_named_server("127.0.0.1", port, port).unwrap();
    cache.apply_named_servers().unwrap();

    let mut selector = NodeSelector::pgw_upf("apn1", "120", "310");
    selector.set_named_server_id(77);
    assert_eq!(
        selector.domain(),
        "apn1.apn.epc.mnc120.mcc310.3gppnetwork.org"
    );
    assert_eq!(selector.desired_service(), AppServiceId::Upf);

    selector
        .add_desired_protocol(AppProtocolId::Sxb)
        .add_desired_network_capability("lbo");

    let results = selector.process().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].hostname, "upf-lbo.node.epc.test");
    assert_eq!(results[0].ipv4_hosts, vec!["203.0.113.1"]);

    // without the capability constraint both UPFs survive, ordered by
    // preference
    let mut selector = NodeSelector::pgw_upf("apn1", "120", "310");
    selector.set_named_server_id(77);
    selector.add_desired_protocol(AppProtocolId::Sxb);
    let results = selector.process().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].hostname, "upf-lbo.node.epc.test");
    assert_eq!(results[1].hostname, "upf-plain.node.epc.test");

    stop.store(true, Ordering::SeqCst);
    cache.shutdown();
}
