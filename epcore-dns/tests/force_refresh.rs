//! Forced refresh re-queries every cached key.

mod support;

use std::time::Duration;

use epcore_dns::{Cache, RecordType};
use support::MockDnsServer;

#[test]
fn test_force_refresh_requeries_everything() {
    Cache::set_refresh_interval_ms(60_000); // keep the periodic scan out of the way
    Cache::set_refresh_percent(80);
    Cache::set_refresh_concurrent(4);

    let server = MockDnsServer::start(3600);
    let cache = Cache::instance(203).unwrap();
    cache.add_named_server("127.0.0.1", server.port, server.port).unwrap();
    cache.apply_named_servers().unwrap();

    cache.query(RecordType::A, "a.epc.test", false).unwrap();
    cache.query(RecordType::A, "b.epc.test", false).unwrap();
    let baseline = server.requests();
    assert_eq!(baseline, 2);

    cache.force_refresh().unwrap();
    let mut waited = 0;
    while server.requests() < baseline + 2 && waited < 3000 {
        std::thread::sleep(Duration::from_millis(50));
        waited += 50;
    }
    assert_eq!(server.requests(), baseline + 2);

    cache.shutdown();
}
