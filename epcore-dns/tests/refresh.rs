//! Background refresh and query persistence.

mod support;

use std::time::Duration;

use epcore_dns::{Cache, RecordType};
use support::MockDnsServer;

#[test]
fn test_refresh_and_persistence() {
    // fast knobs so the scenario completes quickly: scan every 500ms,
    // refresh entries past 50% of a 4s TTL, at most 2 in flight
    Cache::set_refresh_interval_ms(500);
    Cache::set_refresh_percent(50);
    Cache::set_refresh_concurrent(2);

    let server = MockDnsServer::start(4);
    let cache = Cache::instance(201).unwrap();
    cache.add_named_server("127.0.0.1", server.port, server.port).unwrap();
    cache.apply_named_servers().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let qfile = dir.path().join("queries.json");
    cache
        .init_save_queries(qfile.to_str().unwrap(), 400)
        .unwrap();

    let (query, _) = cache.query(RecordType::A, "refresh.epc.test", false).unwrap();
    assert!(!query.error());
    let first_expiry = query.expires_at();
    assert_eq!(server.requests(), 1);

    // within ~2.5s the entry crosses 50% TTL consumption and the refresher
    // re-queries it, advancing the expiry
    let mut waited = 0;
    loop {
        std::thread::sleep(Duration::from_millis(250));
        waited += 250;
        let entry = cache.lookup(RecordType::A, "refresh.epc.test").unwrap();
        if entry.expires_at() > first_expiry {
            break;
        }
        assert!(waited < 5000, "refresher never refreshed the entry");
    }
    assert!(server.requests() >= 2);

    // the save timer persisted the key set
    let mut waited = 0;
    while !qfile.exists() && waited < 3000 {
        std::thread::sleep(Duration::from_millis(100));
        waited += 100;
    }
    let body = std::fs::read_to_string(&qfile).unwrap();
    let saved: serde_json::Value = serde_json::from_str(&body).unwrap();
    let entries = saved.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["type"], 1);
    assert_eq!(entries[0]["domain"], "refresh.epc.test");

    cache.shutdown();

    // a fresh cache warms itself from the persisted file
    let requests_before = server.requests();
    let cache2 = Cache::instance(202).unwrap();
    cache2.add_named_server("127.0.0.1", server.port, server.port).unwrap();
    cache2.apply_named_servers().unwrap();
    cache2.load_queries(qfile.to_str().unwrap()).unwrap();

    let mut waited = 0;
    while cache2.len() == 0 && waited < 3000 {
        std::thread::sleep(Duration::from_millis(50));
        waited += 50;
    }
    assert_eq!(cache2.len(), 1);
    assert!(cache2.lookup(RecordType::A, "refresh.epc.test").is_some());
    assert!(server.requests() > requests_before);

    cache2.shutdown();
}
