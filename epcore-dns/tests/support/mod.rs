//! A loopback DNS server for exercising the resolver end to end.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use epcore_dns::wire;
use epcore_dns::{NaptrRecord, RecordData, RecordType, ResourceRecord};

/// Parses the question section of a request: (qname, qtype, raw question).
fn parse_question(buf: &[u8]) -> Option<(String, u16, &[u8])> {
    let mut pos = 12;
    let mut name = String::new();
    loop {
        let len = *buf.get(pos)? as usize;
        pos += 1;
        if len == 0 {
            break;
        }
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(&String::from_utf8_lossy(buf.get(pos..pos + len)?));
        pos += len;
    }
    let qtype = u16::from_be_bytes([*buf.get(pos)?, *buf.get(pos + 1)?]);
    Some((name, qtype, buf.get(12..pos + 4)?))
}

/// Answers A queries with `192.0.2.7` and NAPTR queries with a pair of UPF
/// records (one advertising `nc-lbo`), counting every request it serves.
pub struct MockDnsServer {
    pub port: u16,
    requests: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl MockDnsServer {
    pub fn start(ttl: u32) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind mock server");
        let port = socket.local_addr().expect("local addr").port();
        socket
            .set_read_timeout(Some(Duration::from_millis(50)))
            .expect("read timeout");

        let requests = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let requests2 = Arc::clone(&requests);
        let stop2 = Arc::clone(&stop);
        let join = std::thread::spawn(move || {
            let mut buf = [0u8; 2048];
            while !stop2.load(Ordering::SeqCst) {
                let Ok((len, peer)) = socket.recv_from(&mut buf) else {
                    continue;
                };
                let Some((qname, qtype, question)) = parse_question(&buf[..len]) else {
                    continue;
                };
                let wire_id = u16::from_be_bytes([buf[0], buf[1]]);
                requests2.fetch_add(1, Ordering::SeqCst);

                let (answers, additional) = respond(&qname, qtype, ttl);
                let reply = wire::build::response(wire_id, question, &answers, &additional);
                let _ = socket.send_to(&reply, peer);
            }
        });

        Self {
            port,
            requests,
            stop,
            join: Some(join),
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for MockDnsServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn respond(qname: &str, qtype: u16, ttl: u32) -> (Vec<ResourceRecord>, Vec<ResourceRecord>) {
    match RecordType::from_code(qtype) {
        RecordType::A => (
            vec![ResourceRecord {
                name: qname.to_owned(),
                rtype: RecordType::A,
                ttl,
                data: RecordData::A("192.0.2.7".parse().expect("literal")),
            }],
            vec![],
        ),
        RecordType::Naptr => {
            let answers = vec![
                ResourceRecord {
                    name: qname.to_owned(),
                    rtype: RecordType::Naptr,
                    ttl,
                    data: RecordData::Naptr(NaptrRecord {
                        order: 10,
                        preference: 1,
                        flags: "a".into(),
                        service: "x-3gpp-upf:x-sxb+nc-lbo".into(),
                        regexp: String::new(),
                        replacement: "upf1.node.epc.test".into(),
                    }),
                },
                ResourceRecord {
                    name: qname.to_owned(),
                    rtype: RecordType::Naptr,
                    ttl,
                    data: RecordData::Naptr(NaptrRecord {
                        order: 10,
                        preference: 2,
                        flags: "a".into(),
                        service: "x-3gpp-upf:x-sxb".into(),
                        regexp: String::new(),
                        replacement: "upf2.node.epc.test".into(),
                    }),
                },
            ];
            let additional = vec![ResourceRecord {
                name: "upf1.node.epc.test".into(),
                rtype: RecordType::A,
                ttl,
                data: RecordData::A("198.51.100.4".parse().expect("literal")),
            }];
            (answers, additional)
        }
        _ => (vec![], vec![]),
    }
}
