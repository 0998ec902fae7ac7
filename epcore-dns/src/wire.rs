//! DNS wire codec: query encoding, response parsing, name decompression.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::{DnsError, Result};
use crate::record::{NaptrRecord, RecordData, RecordType, ResourceRecord, SrvRecord};

const FLAG_RD: u16 = 0x0100;
const CLASS_IN: u16 = 1;
const MAX_NAME_LEN: usize = 255;

/// Encodes one question with recursion desired.
pub fn encode_query(wire_id: u16, domain: &str, rtype: RecordType) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(17 + domain.len());
    buf.extend_from_slice(&wire_id.to_be_bytes());
    buf.extend_from_slice(&FLAG_RD.to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    buf.extend_from_slice(&0u16.to_be_bytes()); // ancount
    buf.extend_from_slice(&0u16.to_be_bytes()); // nscount
    buf.extend_from_slice(&0u16.to_be_bytes()); // arcount

    for label in domain.trim_end_matches('.').split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(DnsError::Parse("invalid label in query name"));
        }
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
    buf.extend_from_slice(&rtype.code().to_be_bytes());
    buf.extend_from_slice(&CLASS_IN.to_be_bytes());
    Ok(buf)
}

/// A parsed response message.
#[derive(Debug)]
pub struct ParsedResponse {
    pub wire_id: u16,
    pub rcode: u8,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self) -> Result<u8> {
        let v = *self
            .buf
            .get(self.pos)
            .ok_or(DnsError::Parse("truncated message"))?;
        self.pos += 1;
        Ok(v)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes([self.u8()?, self.u8()?]))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes([
            self.u8()?,
            self.u8()?,
            self.u8()?,
            self.u8()?,
        ]))
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(DnsError::Parse("length overflow"))?;
        let s = self
            .buf
            .get(self.pos..end)
            .ok_or(DnsError::Parse("truncated rdata"))?;
        self.pos = end;
        Ok(s)
    }

    /// A length-prefixed character-string.
    fn char_string(&mut self) -> Result<String> {
        let len = self.u8()? as usize;
        Ok(String::from_utf8_lossy(self.bytes(len)?).into_owned())
    }

    /// A possibly-compressed domain name starting at the current position.
    fn name(&mut self) -> Result<String> {
        let (name, next) = read_name_at(self.buf, self.pos)?;
        self.pos = next;
        Ok(name)
    }
}

/// Reads a name at `pos`, following compression pointers; returns the name
/// and the position after the name's in-line portion.
fn read_name_at(buf: &[u8], mut pos: usize) -> Result<(String, usize)> {
    let mut name = String::new();
    let mut jumped = false;
    let mut after = pos;
    let mut hops = 0usize;

    loop {
        let len = *buf.get(pos).ok_or(DnsError::Parse("truncated name"))?;
        if len & 0xC0 == 0xC0 {
            let lo = *buf.get(pos + 1).ok_or(DnsError::Parse("truncated pointer"))?;
            if !jumped {
                after = pos + 2;
                jumped = true;
            }
            pos = usize::from(u16::from_be_bytes([len & 0x3F, lo]));
            hops += 1;
            if hops > 64 {
                return Err(DnsError::Parse("compression pointer loop"));
            }
            continue;
        }
        if len == 0 {
            if !jumped {
                after = pos + 1;
            }
            return Ok((name, after));
        }
        let len = usize::from(len);
        let label = buf
            .get(pos + 1..pos + 1 + len)
            .ok_or(DnsError::Parse("truncated label"))?;
        if !name.is_empty() {
            name.push('.');
        }
        if name.len() + len > MAX_NAME_LEN {
            return Err(DnsError::Parse("name too long"));
        }
        name.push_str(&String::from_utf8_lossy(label));
        pos += 1 + len;
    }
}

fn parse_record(r: &mut Reader<'_>) -> Result<ResourceRecord> {
    let name = r.name()?;
    let rtype = RecordType::from_code(r.u16()?);
    let _class = r.u16()?;
    let ttl = r.u32()?;
    let rdlen = r.u16()? as usize;
    let rdata_start = r.pos;
    let rdata_end = rdata_start
        .checked_add(rdlen)
        .ok_or(DnsError::Parse("rdata length overflow"))?;
    if rdata_end > r.buf.len() {
        return Err(DnsError::Parse("truncated rdata"));
    }

    let data = match rtype {
        RecordType::A => {
            let b = r.bytes(4)?;
            RecordData::A(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
        }
        RecordType::Aaaa => {
            let b: [u8; 16] = r.bytes(16)?.try_into().expect("sixteen bytes");
            RecordData::Aaaa(Ipv6Addr::from(b))
        }
        RecordType::Cname => RecordData::Cname(r.name()?),
        RecordType::Ns => RecordData::Ns(r.name()?),
        RecordType::Srv => RecordData::Srv(SrvRecord {
            priority: r.u16()?,
            weight: r.u16()?,
            port: r.u16()?,
            target: r.name()?,
        }),
        RecordType::Naptr => RecordData::Naptr(NaptrRecord {
            order: r.u16()?,
            preference: r.u16()?,
            flags: r.char_string()?,
            service: r.char_string()?,
            regexp: r.char_string()?,
            replacement: r.name()?,
        }),
        RecordType::Soa | RecordType::Other(_) => RecordData::Raw(r.bytes(rdlen)?.to_vec()),
    };

    // tolerate parsers that stop short of the declared rdata length
    r.pos = rdata_end;

    Ok(ResourceRecord {
        name,
        rtype,
        ttl,
        data,
    })
}

/// Parses a full response message.
pub fn parse_response(buf: &[u8]) -> Result<ParsedResponse> {
    let mut r = Reader::new(buf);

    let wire_id = r.u16()?;
    let flags = r.u16()?;
    let rcode = (flags & 0x000F) as u8;
    let qdcount = r.u16()?;
    let ancount = r.u16()?;
    let nscount = r.u16()?;
    let arcount = r.u16()?;

    for _ in 0..qdcount {
        let _ = r.name()?;
        let _ = r.u16()?;
        let _ = r.u16()?;
    }

    let mut parse_section = |count: u16| -> Result<Vec<ResourceRecord>> {
        let mut records = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            records.push(parse_record(&mut r)?);
        }
        Ok(records)
    };

    let answers = parse_section(ancount)?;
    let authority = parse_section(nscount)?;
    let additional = parse_section(arcount)?;

    Ok(ParsedResponse {
        wire_id,
        rcode,
        answers,
        authority,
        additional,
    })
}

/// Response-building helpers, enough for tests and loopback servers.
pub mod build {
    use super::{RecordData, ResourceRecord, CLASS_IN};

    fn push_name(buf: &mut Vec<u8>, name: &str) {
        for label in name.trim_end_matches('.').split('.') {
            if label.is_empty() {
                continue;
            }
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
        buf.push(0);
    }

    fn push_char_string(buf: &mut Vec<u8>, s: &str) {
        buf.push(s.len() as u8);
        buf.extend_from_slice(s.as_bytes());
    }

    fn push_record(buf: &mut Vec<u8>, rr: &ResourceRecord) {
        push_name(buf, &rr.name);
        buf.extend_from_slice(&rr.rtype.code().to_be_bytes());
        buf.extend_from_slice(&CLASS_IN.to_be_bytes());
        buf.extend_from_slice(&rr.ttl.to_be_bytes());

        let mut rdata = Vec::new();
        match &rr.data {
            RecordData::A(a) => rdata.extend_from_slice(&a.octets()),
            RecordData::Aaaa(a) => rdata.extend_from_slice(&a.octets()),
            RecordData::Cname(n) | RecordData::Ns(n) => push_name(&mut rdata, n),
            RecordData::Srv(srv) => {
                rdata.extend_from_slice(&srv.priority.to_be_bytes());
                rdata.extend_from_slice(&srv.weight.to_be_bytes());
                rdata.extend_from_slice(&srv.port.to_be_bytes());
                push_name(&mut rdata, &srv.target);
            }
            RecordData::Naptr(naptr) => {
                rdata.extend_from_slice(&naptr.order.to_be_bytes());
                rdata.extend_from_slice(&naptr.preference.to_be_bytes());
                push_char_string(&mut rdata, &naptr.flags);
                push_char_string(&mut rdata, &naptr.service);
                push_char_string(&mut rdata, &naptr.regexp);
                push_name(&mut rdata, &naptr.replacement);
            }
            RecordData::Raw(raw) => rdata.extend_from_slice(raw),
        }
        buf.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        buf.extend_from_slice(&rdata);
    }

    /// Builds a response to `question` (raw question bytes from a request)
    /// with the given sections.
    pub fn response(
        wire_id: u16,
        question: &[u8],
        answers: &[ResourceRecord],
        additional: &[ResourceRecord],
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&wire_id.to_be_bytes());
        buf.extend_from_slice(&0x8180u16.to_be_bytes()); // QR RD RA
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&(answers.len() as u16).to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&(additional.len() as u16).to_be_bytes());
        buf.extend_from_slice(question);
        for rr in answers {
            push_record(&mut buf, rr);
        }
        for rr in additional {
            push_record(&mut buf, rr);
        }
        buf
    }

    /// Builds an error response (`rcode`) to a raw question.
    pub fn error_response(wire_id: u16, question: &[u8], rcode: u8) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&wire_id.to_be_bytes());
        buf.extend_from_slice(&(0x8180u16 | u16::from(rcode)).to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(question);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_round_trip_header() {
        let q = encode_query(0x1234, "example.org", RecordType::A).unwrap();
        assert_eq!(&q[0..2], &[0x12, 0x34]);
        // qdcount == 1
        assert_eq!(&q[4..6], &[0, 1]);
        // trailing qtype/qclass
        assert_eq!(&q[q.len() - 4..], &[0, 1, 0, 1]);
    }

    #[test]
    fn test_parse_built_response() {
        let q = encode_query(7, "apn1.apn.epc.example.org", RecordType::Naptr).unwrap();
        let question = &q[12..];

        let answers = vec![ResourceRecord {
            name: "apn1.apn.epc.example.org".into(),
            rtype: RecordType::Naptr,
            ttl: 300,
            data: RecordData::Naptr(NaptrRecord {
                order: 10,
                preference: 20,
                flags: "a".into(),
                service: "x-3gpp-pgw:x-s5-gtp".into(),
                regexp: String::new(),
                replacement: "pgw1.node.epc.example.org".into(),
            }),
        }];
        let additional = vec![ResourceRecord {
            name: "pgw1.node.epc.example.org".into(),
            rtype: RecordType::A,
            ttl: 300,
            data: RecordData::A("192.0.2.10".parse().unwrap()),
        }];

        let wire = build::response(7, question, &answers, &additional);
        let parsed = parse_response(&wire).unwrap();

        assert_eq!(parsed.wire_id, 7);
        assert_eq!(parsed.rcode, 0);
        assert_eq!(parsed.answers, answers);
        assert_eq!(parsed.additional, additional);
    }

    #[test]
    fn test_compression_pointer() {
        // two answers; the second's name is a pointer to the first's
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0, 1, 0x81, 0x80, 0, 0, 0, 2, 0, 0, 0, 0]);
        let name_offset = buf.len() as u16;
        buf.push(3);
        buf.extend_from_slice(b"foo");
        buf.push(3);
        buf.extend_from_slice(b"org");
        buf.push(0);
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&60u32.to_be_bytes());
        buf.extend_from_slice(&4u16.to_be_bytes());
        buf.extend_from_slice(&[192, 0, 2, 1]);

        buf.extend_from_slice(&(0xC000u16 | name_offset).to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&60u32.to_be_bytes());
        buf.extend_from_slice(&4u16.to_be_bytes());
        buf.extend_from_slice(&[192, 0, 2, 2]);

        let parsed = parse_response(&buf).unwrap();
        assert_eq!(parsed.answers.len(), 2);
        assert_eq!(parsed.answers[0].name, "foo.org");
        assert_eq!(parsed.answers[1].name, "foo.org");
        assert_eq!(
            parsed.answers[1].data,
            RecordData::A("192.0.2.2".parse().unwrap())
        );
    }

    #[test]
    fn test_pointer_loop_detected() {
        // a name that points at itself
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0, 1, 0x81, 0x80, 0, 0, 0, 1, 0, 0, 0, 0]);
        buf.extend_from_slice(&0xC00Cu16.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&60u32.to_be_bytes());
        buf.extend_from_slice(&4u16.to_be_bytes());
        buf.extend_from_slice(&[192, 0, 2, 1]);

        assert!(parse_response(&buf).is_err());
    }
}
