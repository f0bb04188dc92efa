//! End-to-end coverage for master-driven server discovery and removal,
//! exercising `store` and `handlers` together the way the engine does
//! when it processes a master's list reply.

use teerank_common::db;
use teerank_update::handlers;
use teerank_update::netclient::NetClientRegistry;
use teerank_update::scheduler::Scheduler;
use teerank_update::store;

#[test]
fn master_reply_creates_and_schedules_unknown_servers() {
    let dir = tempfile::tempdir().unwrap();
    let conn = db::open(&dir.path().join("t.db")).unwrap();
    let mut scheduler = Scheduler::new();
    let mut registry = NetClientRegistry::new();

    let reported = [("10.0.0.1", 8303u16), ("10.0.0.2", 8303u16), ("10.0.0.3", 8303u16)];
    for (ip, port) in reported {
        handlers::reference_server(&conn, &mut scheduler, &mut registry, 1000, ip, port, "master1.example.com", "8300")
            .unwrap();
    }

    for (ip, port) in reported {
        let server = store::read_server(&conn, ip, port).unwrap().unwrap();
        assert_eq!(server.master_node.as_deref(), Some("master1.example.com"));
    }
    assert_eq!(registry.len(), 3);
    // every new server gets an immediate poll scheduled
    for _ in reported {
        assert!(scheduler.next_schedule(1000).is_some());
    }
}

#[test]
fn servers_dropped_from_a_masters_list_become_orphaned() {
    let dir = tempfile::tempdir().unwrap();
    let conn = db::open(&dir.path().join("t.db")).unwrap();
    let mut scheduler = Scheduler::new();
    let mut registry = NetClientRegistry::new();

    // first poll: master reports two servers
    handlers::reference_server(&conn, &mut scheduler, &mut registry, 1000, "10.0.0.1", 8303, "m", "8300").unwrap();
    handlers::reference_server(&conn, &mut scheduler, &mut registry, 1000, "10.0.0.2", 8303, "m", "8300").unwrap();

    // before resending the request, the engine clears ownership of everything
    // this master currently owns
    store::unreference_servers(&conn, "m", "8300").unwrap();

    // second poll only reports one of the two servers back
    handlers::reference_server(&conn, &mut scheduler, &mut registry, 2000, "10.0.0.1", 8303, "m", "8300").unwrap();

    let still_owned = store::read_server(&conn, "10.0.0.1", 8303).unwrap().unwrap();
    assert_eq!(still_owned.master_node.as_deref(), Some("m"));

    let orphaned = store::read_server(&conn, "10.0.0.2", 8303).unwrap().unwrap();
    assert!(orphaned.master_node.is_none());
    assert!(orphaned.master_service.is_none());
}

#[test]
fn unresponsive_master_backs_off_while_a_reachable_one_gets_normal_interval() {
    use teerank_common::model::Master;
    use teerank_update::pool::PoolEntry;

    let dir = tempfile::tempdir().unwrap();
    let conn = db::open(&dir.path().join("t.db")).unwrap();
    let mut scheduler = Scheduler::new();

    store::write_master(
        &conn,
        &Master {
            node: "silent.example.com".into(),
            service: "8300".into(),
            lastseen: 1000,
            expire: 2000,
        },
    )
    .unwrap();
    store::write_master(
        &conn,
        &Master {
            node: "flaky.example.com".into(),
            service: "8300".into(),
            lastseen: 1000,
            expire: 2000,
        },
    )
    .unwrap();

    let now = 2300;
    let silent_failure = PoolEntry {
        netclient_id: 0,
        addr: "127.0.0.1:8300".parse().unwrap(),
        payload: vec![],
        retries: 2,
        polled: false,
    };
    let flaky_failure = PoolEntry {
        netclient_id: 1,
        addr: "127.0.0.1:8301".parse().unwrap(),
        payload: vec![],
        retries: 2,
        polled: true,
    };

    handlers::handle_master_timeout(&conn, &mut scheduler, now, "silent.example.com", "8300", &silent_failure)
        .unwrap();
    handlers::handle_master_timeout(&conn, &mut scheduler, now, "flaky.example.com", "8300", &flaky_failure)
        .unwrap();

    let silent = store::read_master(&conn, "silent.example.com", "8300").unwrap().unwrap();
    let flaky = store::read_master(&conn, "flaky.example.com", "8300").unwrap().unwrap();

    // total silence doubles the previous interval well past the normal ~5 minute one
    assert!(silent.expire - now > 400);
    // a master that answered at least once before failing gets the normal jittered interval instead
    assert!(flaky.expire - now <= 360);
}
