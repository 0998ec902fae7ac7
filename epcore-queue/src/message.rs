//! Event messages and their 8-byte payload.

use std::time::{SystemTime, UNIX_EPOCH};

/// Thread initialisation event, delivered before the first user message.
pub const MSG_INIT: u32 = 1;
/// Thread quit event; the dispatch loop exits after handling it.
pub const MSG_QUIT: u32 = 2;
/// Thread suspend event.
pub const MSG_SUSPEND: u32 = 3;
/// Timer expiration event; the payload carries the timer id.
pub const MSG_TIMER: u32 = 4;
/// Socket readable event (socket threads).
pub const MSG_SOCKET_READ: u32 = 5;
/// Socket writable event (socket threads).
pub const MSG_SOCKET_WRITE: u32 = 6;
/// Socket error event (socket threads).
pub const MSG_SOCKET_ERROR: u32 = 7;
/// Socket exception event (socket threads).
pub const MSG_SOCKET_EXCEPTION: u32 = 8;
/// First user-defined message id; everything below is reserved.
pub const MSG_USER: u32 = 10000;

/// Eight bytes of payload, interpretable as one 64-bit value, two 32-bit
/// values, four 16-bit values or eight bytes. Stored native-endian; the
/// aliasing views mirror a C union.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageData([u8; 8]);

impl MessageData {
    pub fn from_u64(v: u64) -> Self {
        Self(v.to_ne_bytes())
    }

    pub fn from_i64(v: i64) -> Self {
        Self(v.to_ne_bytes())
    }

    pub fn from_u32s(v1: u32, v2: u32) -> Self {
        let mut b = [0u8; 8];
        b[..4].copy_from_slice(&v1.to_ne_bytes());
        b[4..].copy_from_slice(&v2.to_ne_bytes());
        Self(b)
    }

    pub fn from_u16s(v1: u16, v2: u16, v3: u16, v4: u16) -> Self {
        let mut b = [0u8; 8];
        b[..2].copy_from_slice(&v1.to_ne_bytes());
        b[2..4].copy_from_slice(&v2.to_ne_bytes());
        b[4..6].copy_from_slice(&v3.to_ne_bytes());
        b[6..].copy_from_slice(&v4.to_ne_bytes());
        Self(b)
    }

    pub fn from_u8s(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_u64(self) -> u64 {
        u64::from_ne_bytes(self.0)
    }

    pub fn as_i64(self) -> i64 {
        i64::from_ne_bytes(self.0)
    }

    pub fn as_u32s(self) -> (u32, u32) {
        (
            u32::from_ne_bytes(self.0[..4].try_into().unwrap()),
            u32::from_ne_bytes(self.0[4..].try_into().unwrap()),
        )
    }

    pub fn as_u16s(self) -> (u16, u16, u16, u16) {
        (
            u16::from_ne_bytes(self.0[..2].try_into().unwrap()),
            u16::from_ne_bytes(self.0[2..4].try_into().unwrap()),
            u16::from_ne_bytes(self.0[4..6].try_into().unwrap()),
            u16::from_ne_bytes(self.0[6..].try_into().unwrap()),
        )
    }

    pub fn as_u8s(self) -> [u8; 8] {
        self.0
    }
}

impl std::fmt::Debug for MessageData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageData({:#018x})", self.as_u64())
    }
}

/// The contract a message type must satisfy to travel through queues and the
/// event-thread runtime. Messages are plain copyable data so they can live in
/// shared-memory rings and in timer registrations shared with the signal
/// handler.
pub trait ThreadMessage: Copy + Send + Sync + 'static {
    /// Builds a message from an id and payload (used by the runtime to
    /// construct system events).
    fn from_parts(id: u32, data: MessageData) -> Self;

    /// The message id; ids below [`MSG_USER`] are system events.
    fn message_id(&self) -> u32;

    /// The payload.
    fn data(&self) -> MessageData;

    /// Called by the queue as the message is enqueued.
    fn mark_queued(&mut self) {}
}

/// The stock event message: id, 8-byte payload, and the enqueue timestamp
/// stamped by the producer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct EventMessage {
    id: u32,
    data: MessageData,
    queued_at_us: u64,
}

impl EventMessage {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            data: MessageData::default(),
            queued_at_us: 0,
        }
    }

    pub fn with_data(id: u32, data: MessageData) -> Self {
        Self {
            id,
            data,
            queued_at_us: 0,
        }
    }

    /// Microseconds since the epoch at which the producer enqueued this
    /// message; zero if never queued.
    pub fn queued_at_us(&self) -> u64 {
        self.queued_at_us
    }
}

impl ThreadMessage for EventMessage {
    fn from_parts(id: u32, data: MessageData) -> Self {
        Self::with_data(id, data)
    }

    fn message_id(&self) -> u32 {
        self.id
    }

    fn data(&self) -> MessageData {
        self.data
    }

    fn mark_queued(&mut self) {
        self.queued_at_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or_default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_views() {
        let d = MessageData::from_u32s(7, 9);
        assert_eq!(d.as_u32s(), (7, 9));

        let d = MessageData::from_u64(0x0102_0304_0506_0708);
        assert_eq!(d.as_u64(), 0x0102_0304_0506_0708);

        let d = MessageData::from_u16s(1, 2, 3, 4);
        assert_eq!(d.as_u16s(), (1, 2, 3, 4));

        let d = MessageData::from_i64(-5);
        assert_eq!(d.as_i64(), -5);
    }

    #[test]
    fn test_mark_queued_stamps_time() {
        let mut m = EventMessage::new(MSG_USER);
        assert_eq!(m.queued_at_us(), 0);
        m.mark_queued();
        assert!(m.queued_at_us() > 0);
    }
}
