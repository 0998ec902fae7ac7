//! PFCP message header (TS 29.244 §7.2.2).
//!
//! Layout: one flags/version octet (version, MP, S), message type, 16-bit
//! length counting everything after it, then — when S is set — an 8-byte
//! SEID, and finally a 24-bit sequence number and a spare octet.

use crate::{ProtoError, Result};

/// The PFCP version this crate understands.
pub const PFCP_VERSION: u8 = 1;

/// Message types the control plane routes on.
pub mod msg_type {
    pub const HEARTBEAT_REQ: u8 = 1;
    pub const HEARTBEAT_RSP: u8 = 2;
    pub const PFD_MGMT_REQ: u8 = 3;
    pub const PFD_MGMT_RSP: u8 = 4;
    pub const ASSN_SETUP_REQ: u8 = 5;
    pub const ASSN_SETUP_RSP: u8 = 6;
    pub const ASSN_UPDATE_REQ: u8 = 7;
    pub const ASSN_UPDATE_RSP: u8 = 8;
    pub const ASSN_RELEASE_REQ: u8 = 9;
    pub const ASSN_RELEASE_RSP: u8 = 10;
    pub const VERSION_NOT_SUPPORTED: u8 = 11;
    pub const NODE_REPORT_REQ: u8 = 12;
    pub const NODE_REPORT_RSP: u8 = 13;
    pub const SESSION_SET_DELETION_REQ: u8 = 14;
    pub const SESSION_SET_DELETION_RSP: u8 = 15;
    pub const SESSION_ESTABLISHMENT_REQ: u8 = 50;
    pub const SESSION_ESTABLISHMENT_RSP: u8 = 51;
    pub const SESSION_MODIFICATION_REQ: u8 = 52;
    pub const SESSION_MODIFICATION_RSP: u8 = 53;
    pub const SESSION_DELETION_REQ: u8 = 54;
    pub const SESSION_DELETION_RSP: u8 = 55;
    pub const SESSION_REPORT_REQ: u8 = 56;
    pub const SESSION_REPORT_RSP: u8 = 57;
}

const FLAG_SEID: u8 = 0x01;
const FLAG_MP: u8 = 0x02;

/// The decoded leading bytes of a PFCP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PfcpHeader {
    pub version: u8,
    pub message_type: u8,
    /// Length of everything after the length field, per the spec.
    pub length: u16,
    /// Present when the S flag is set; scopes the message to a session.
    pub seid: Option<u64>,
    /// 24-bit transaction sequence.
    pub sequence: u32,
    /// Message priority nibble, meaningful only when the MP flag is set.
    pub priority: Option<u8>,
}

impl PfcpHeader {
    /// Builds a node-scoped header (no SEID).
    pub fn node(message_type: u8, sequence: u32) -> Self {
        Self {
            version: PFCP_VERSION,
            message_type,
            length: 0,
            seid: None,
            sequence: sequence & 0x00FF_FFFF,
            priority: None,
        }
    }

    /// Builds a session-scoped header.
    pub fn session(message_type: u8, seid: u64, sequence: u32) -> Self {
        Self {
            version: PFCP_VERSION,
            message_type,
            length: 0,
            seid: Some(seid),
            sequence: sequence & 0x00FF_FFFF,
            priority: None,
        }
    }

    /// Size of the encoded header in bytes.
    pub fn encoded_len(&self) -> usize {
        if self.seid.is_some() {
            16
        } else {
            8
        }
    }

    /// Decodes the leading bytes of a message. Only the fields needed for
    /// routing are interpreted; the body is left to the IE codec.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(ProtoError::Truncated(buf.len()));
        }

        let flags = buf[0];
        let version = flags >> 5;
        if version != PFCP_VERSION {
            return Err(ProtoError::UnsupportedVersion(version));
        }

        let message_type = buf[1];
        let length = u16::from_be_bytes([buf[2], buf[3]]);
        let has_seid = flags & FLAG_SEID != 0;

        let (seid, rest) = if has_seid {
            if buf.len() < 16 {
                return Err(ProtoError::Truncated(buf.len()));
            }
            let seid = u64::from_be_bytes(buf[4..12].try_into().expect("eight bytes"));
            (Some(seid), &buf[12..16])
        } else {
            (None, &buf[4..8])
        };

        let sequence = u32::from_be_bytes([0, rest[0], rest[1], rest[2]]);
        let priority = (flags & FLAG_MP != 0).then(|| rest[3] >> 4);

        Ok(Self {
            version,
            message_type,
            length,
            seid,
            sequence,
            priority,
        })
    }

    /// Encodes the header into the first [`PfcpHeader::encoded_len`] bytes
    /// of `buf`.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let len = self.encoded_len();
        if buf.len() < len {
            return Err(ProtoError::Truncated(buf.len()));
        }

        let mut flags = self.version << 5;
        if self.seid.is_some() {
            flags |= FLAG_SEID;
        }
        if self.priority.is_some() {
            flags |= FLAG_MP;
        }
        buf[0] = flags;
        buf[1] = self.message_type;
        buf[2..4].copy_from_slice(&self.length.to_be_bytes());

        let rest = if let Some(seid) = self.seid {
            buf[4..12].copy_from_slice(&seid.to_be_bytes());
            &mut buf[12..16]
        } else {
            &mut buf[4..8]
        };
        let seq = self.sequence.to_be_bytes();
        rest[0] = seq[1];
        rest[1] = seq[2];
        rest[2] = seq[3];
        rest[3] = self.priority.map_or(0, |p| p << 4);

        Ok(len)
    }

    /// Whether this message type is a request (odd types in both the node
    /// and session ranges, heartbeat included).
    pub fn is_request(&self) -> bool {
        self.message_type % 2 == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_header_round_trip() {
        let header = PfcpHeader::node(msg_type::HEARTBEAT_REQ, 0x00AB_CDEF);
        let mut buf = [0u8; 16];
        let len = header.encode(&mut buf).unwrap();
        assert_eq!(len, 8);

        let decoded = PfcpHeader::decode(&buf[..len]).unwrap();
        assert_eq!(decoded.message_type, msg_type::HEARTBEAT_REQ);
        assert_eq!(decoded.sequence, 0x00AB_CDEF);
        assert_eq!(decoded.seid, None);
        assert!(decoded.is_request());
    }

    #[test]
    fn test_session_header_round_trip() {
        let header = PfcpHeader::session(
            msg_type::SESSION_ESTABLISHMENT_RSP,
            0x1122_3344_5566_7788,
            0x42,
        );
        let mut buf = [0u8; 16];
        let len = header.encode(&mut buf).unwrap();
        assert_eq!(len, 16);

        let decoded = PfcpHeader::decode(&buf).unwrap();
        assert_eq!(decoded.seid, Some(0x1122_3344_5566_7788));
        assert_eq!(decoded.sequence, 0x42);
        assert!(!decoded.is_request());
    }

    #[test]
    fn test_truncated_and_bad_version() {
        assert_eq!(
            PfcpHeader::decode(&[0x20, 1, 0]),
            Err(ProtoError::Truncated(3))
        );

        // version 2 in the top three bits
        let buf = [0x40, 1, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            PfcpHeader::decode(&buf),
            Err(ProtoError::UnsupportedVersion(2))
        );

        // S flag set but only 8 bytes present
        let buf = [0x21, 50, 0, 0, 0, 0, 0, 0];
        assert_eq!(PfcpHeader::decode(&buf), Err(ProtoError::Truncated(8)));
    }

    #[test]
    fn test_sequence_is_24_bits() {
        let header = PfcpHeader::node(msg_type::NODE_REPORT_REQ, 0xFFFF_FFFF);
        assert_eq!(header.sequence, 0x00FF_FFFF);
    }
}
