//! Shared-memory queue behaviour, exercised through two handles the way two
//! processes would attach.

use epcore_queue::{EventMessage, MessageData, PublicQueue, QueueError, QueueMode, ThreadMessage};
use epcore_sync::{PublicQueueDef, SyncObjects, SyncObjectsConfig};

fn msg(n: u64) -> EventMessage {
    EventMessage::with_data(epcore_queue::MSG_USER, MessageData::from_u64(n))
}

#[test]
fn test_public_queue_end_to_end() {
    SyncObjects::init(&SyncObjectsConfig::default()).unwrap();

    let reader = PublicQueue::init(9001, 4, true, false, QueueMode::ReadOnly).unwrap();
    let writer = PublicQueue::init(9001, 4, true, false, QueueMode::WriteOnly).unwrap();

    // a second reader on a single-reader queue is refused
    assert!(matches!(
        PublicQueue::init(9001, 4, true, false, QueueMode::ReadOnly),
        Err(QueueError::MultipleReadersNotAllowed)
    ));

    for n in 1..=4 {
        assert!(writer.push(msg(n), false).unwrap());
    }
    assert!(!writer.push(msg(5), false).unwrap());

    for n in 1..=4 {
        let m = reader.pop(false).unwrap().unwrap();
        assert_eq!(m.data().as_u64(), n);
        assert!(m.queued_at_us() > 0);
    }
    assert!(reader.pop(false).unwrap().is_none());

    // wrong-direction use fails loudly
    assert!(matches!(
        writer.pop(false),
        Err(QueueError::NotOpenForReading)
    ));
    assert!(matches!(
        reader.push(msg(1), false),
        Err(QueueError::NotOpenForWriting)
    ));

    drop(writer);
    drop(reader);

    // registration via the pool definition table
    let def = PublicQueueDef {
        queue_id: 9002,
        msg_size: std::mem::size_of::<EventMessage>() as i32,
        msg_cnt: 8,
        multiple_readers: false,
        multiple_writers: true,
    };
    SyncObjects::instance().unwrap().set_public_queue(&def).unwrap();

    let q = PublicQueue::attach_by_id(9002, QueueMode::ReadWrite).unwrap();
    assert_eq!(q.capacity(), 8);
    assert!(q.push(msg(7), false).unwrap());
    assert_eq!(q.pop(false).unwrap().unwrap().data().as_u64(), 7);

    assert!(matches!(
        PublicQueue::attach_by_id(9999, QueueMode::ReadOnly),
        Err(QueueError::UnknownPublicQueue(9999))
    ));

    drop(q);
    SyncObjects::uninit();
}
