//! Toolkit initialisation round trip: options tree, public objects, timer
//! pool, teardown.

use epcore::queue::{EventMessage, MessageData, PublicQueue, QueueMode, ThreadMessage, MSG_USER};
use epcore::Config;

#[test]
fn test_initialize_registers_public_queues() {
    let config = Config::parse(
        r#"{
          "EpcTools": {
            "EnablePublicObjects": true,
            "SynchronizationObjects": {
              "NumberSemaphores": 16,
              "NumberMutexes": 16
            },
            "PublicQueue": [
              {
                "QueueID": 7100,
                "QueueSize": 32,
                "AllowMultipleReaders": false,
                "AllowMultipleWriters": true
              }
            ],
            "TimerPool": { "ResolutionMilliseconds": 20, "Rounding": "down" }
          }
        }"#,
    )
    .unwrap();

    epcore::initialize(&config).unwrap();
    assert!(matches!(
        epcore::initialize(&config),
        Err(epcore::EpcError::AlreadyInitialized)
    ));

    // the registered queue is reachable by id alone
    let reader = PublicQueue::attach_by_id(7100, QueueMode::ReadOnly).unwrap();
    let writer = PublicQueue::attach_by_id(7100, QueueMode::WriteOnly).unwrap();
    assert_eq!(reader.capacity(), 32);

    writer
        .push(
            EventMessage::with_data(MSG_USER, MessageData::from_u64(99)),
            true,
        )
        .unwrap();
    let msg = reader.pop(true).unwrap().unwrap();
    assert_eq!(msg.data().as_u64(), 99);

    // the timer pool singleton is live
    let pool = epcore::timerpool::instance().unwrap();
    assert_eq!(pool.resolution_ms(), 20);

    drop(reader);
    drop(writer);
    epcore::uninitialize();

    assert!(epcore::timerpool::instance().is_err());
    // a second uninitialize is a no-op
    epcore::uninitialize();
}
