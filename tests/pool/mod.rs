use bson::{bson, doc};
use mongodb_core::apm::PoolEvent;
use mongodb_core::pool::{
    Bucket, CommandResult, ConnectionEvent, ConnectionId, ConnectionPool, Message, PoolOptions, PoolState, WriteOptions,
};
use mongodb_core::Error;

use std::time::Duration;

use crate::mock::{credentials, Harness, MockFactory};

const C0: ConnectionId = ConnectionId(0);
const C1: ConnectionId = ConnectionId(1);
const C2: ConnectionId = ConnectionId(2);

fn options(size: usize) -> PoolOptions {
    PoolOptions {
        size,
        reconnect_interval_ms: 10,
        ..PoolOptions::new("localhost", 27017)
    }
}

/// A pool with one established, idle connection.
fn connected(size: usize) -> Harness {
    let mut h = Harness::new(options(size));
    h.pool.connect(None).expect("disconnected pool");
    h.connected(C0);
    assert!(h.pool.is_connected());
    h
}

fn assert_partition(pool: &ConnectionPool<MockFactory>, ids: &[ConnectionId]) {
    let bucketed = pool.available_count()
        + pool.in_use_count()
        + pool.connecting_count()
        + pool.non_authenticated_count();
    let located = ids.iter().filter(|&&id| pool.bucket_of(id).is_some()).count();

    assert_eq!(bucketed, located);
    assert!(pool.socket_count() <= pool.options().size);
}

#[test]
fn single_socket_pool_opens_one_connection() {
    let mut h = Harness::new(options(1));

    h.pool.write(b"w1".to_vec(), WriteOptions::command(), h.record("w1")).unwrap();
    h.pool.write(b"w2".to_vec(), WriteOptions::command(), h.record("w2")).unwrap();

    assert_eq!(vec![C0], h.wire.borrow().created);
    assert_eq!(PoolState::Connecting, h.pool.state());
    assert_eq!(2, h.pool.queue_len());

    h.connected(C0);
    assert_eq!(vec!["w1".to_owned()], h.wire.borrow().payloads());

    h.ok(C0);
    h.ok(C0);

    assert_eq!(vec!["w1 ok".to_owned(), "w2 ok".to_owned()], h.completions());
    assert_eq!(vec!["w1".to_owned(), "w2".to_owned()], h.wire.borrow().payloads());
    assert_eq!(1, h.wire.borrow().created.len());
    assert_eq!(1, h.pool.available_count());
}

#[test]
fn monitoring_jumps_the_queue() {
    let mut h = Harness::new(options(1));
    h.pool.connect(None).unwrap();

    h.pool.write(b"w1".to_vec(), WriteOptions::command(), h.record("w1")).unwrap();
    h.pool.write(b"w2".to_vec(), WriteOptions::monitoring(), h.record("w2")).unwrap();
    h.pool.write(b"w3".to_vec(), WriteOptions::command(), h.record("w3")).unwrap();

    h.connected(C0);
    assert_eq!(vec!["w2".to_owned()], h.wire.borrow().payloads());

    h.ok(C0);
    h.ok(C0);
    h.ok(C0);

    assert_eq!(
        vec!["w2 ok".to_owned(), "w1 ok".to_owned(), "w3 ok".to_owned()],
        h.completions()
    );
}

#[test]
fn monitoring_fails_fast_when_every_socket_is_busy() {
    let mut h = connected(1);

    h.pool.write(b"w".to_vec(), WriteOptions::command(), h.record("w")).unwrap();
    h.pool.write(b"m".to_vec(), WriteOptions::monitoring(), h.record("m")).unwrap();

    assert_eq!(
        vec![format!("m err: {}", Error::NoConnectionAvailable)],
        h.completions()
    );
    assert_eq!(0, h.pool.queue_len());

    h.ok(C0);
    assert_eq!(2, h.completions().len());
}

#[test]
fn monitoring_socket_timeout_is_restored_after_reply() {
    let mut h = connected(1);

    h.pool.write(b"m".to_vec(), WriteOptions::monitoring(), h.record("m")).unwrap();
    h.ok(C0);

    let timeout = h.pool.options().monitoring_socket_timeout();
    assert_eq!(vec![(C0, Some(timeout)), (C0, None)], h.wire.borrow().timeouts);
}

#[test]
fn explicit_socket_timeout_is_applied() {
    let mut h = connected(1);

    let options = WriteOptions::command().with_socket_timeout(Duration::from_millis(250));
    h.pool.write(b"w".to_vec(), options, h.record("w")).unwrap();

    assert_eq!(
        vec![(C0, Some(Duration::from_millis(250)))],
        h.wire.borrow().timeouts
    );
}

#[test]
fn connections_never_share_a_bucket() {
    let mut h = connected(3);
    let ids = [C0, C1, C2];

    h.pool.write(b"w1".to_vec(), WriteOptions::command(), h.record("w1")).unwrap();
    assert_partition(&h.pool, &ids);

    h.pool.write(b"w2".to_vec(), WriteOptions::command(), h.record("w2")).unwrap();
    assert_eq!(1, h.pool.connecting_count());
    assert_eq!(Some(Bucket::Connecting), h.pool.bucket_of(C1));
    assert_partition(&h.pool, &ids);

    h.connected(C1);
    h.pool.write(b"w3".to_vec(), WriteOptions::command(), h.record("w3")).unwrap();
    h.pool.write(b"w4".to_vec(), WriteOptions::command(), h.record("w4")).unwrap();
    assert_partition(&h.pool, &ids);

    h.connected(C2);
    assert_eq!(3, h.pool.in_use_count());
    assert_eq!(1, h.pool.queue_len());
    assert_eq!(3, h.pool.socket_count());
    assert_partition(&h.pool, &ids);

    h.ok(C0);
    assert_eq!(vec!["w1".to_owned(), "w4".to_owned()], h.wire.borrow().writes_on(C0));
    assert_eq!(3, h.wire.borrow().created.len());
    assert_partition(&h.pool, &ids);
}

#[test]
fn immediate_release_completes_on_write() {
    let mut h = connected(1);

    let options = WriteOptions::command().with_immediate_release();
    h.pool.write(b"w".to_vec(), options, h.record("w")).unwrap();

    assert_eq!(vec!["w ok".to_owned()], h.completions());
    assert_eq!(Some(Bucket::Available), h.pool.bucket_of(C0));
}

#[test]
fn callback_is_required_unless_no_response() {
    let mut h = connected(1);

    match h.pool.write(b"w".to_vec(), WriteOptions::command(), None) {
        Err(Error::ArgumentError(_)) => (),
        other => panic!("expected an argument error, got {:?}", other),
    }

    h.pool
        .write(b"fire".to_vec(), WriteOptions::new().with_no_response(), None)
        .unwrap();
    assert_eq!(vec!["fire".to_owned()], h.wire.borrow().payloads());
    assert_eq!(1, h.pool.available_count());
}

#[test]
fn server_errors_reach_the_callback() {
    let mut h = connected(1);

    h.pool.write(b"w".to_vec(), WriteOptions::command(), h.record("w")).unwrap();
    h.reply(C0, doc! { "ok": 0, "errmsg": "not master", "code": 10107 });

    assert_eq!(vec!["w err: server error (10107): not master".to_owned()], h.completions());
    assert!(h.pool.is_connected());
    assert_eq!(1, h.pool.available_count());
}

#[test]
fn connect_is_rejected_unless_disconnected() {
    let mut h = connected(1);

    match h.pool.connect(None) {
        Err(Error::InvalidState { state, .. }) => assert_eq!(PoolState::Connected, state),
        other => panic!("expected an invalid state error, got {:?}", other),
    }
}

#[test]
fn failed_write_is_requeued_until_reconnect() {
    let mut h = connected(1);

    h.wire.borrow_mut().fail_writes = true;
    h.pool.write(b"w".to_vec(), WriteOptions::command(), h.record("w")).unwrap();

    assert!(h.completions().is_empty());
    assert_eq!(1, h.pool.queue_len());
    assert!(h.pool.is_disconnected());
    assert_eq!(1, h.count_events(|e| match *e {
        PoolEvent::Close(Some(_)) => true,
        _ => false,
    }));

    h.wire.borrow_mut().fail_writes = false;
    let deadline = h.pool.next_timeout().expect("reconnect scheduled");
    h.pool.handle_timeout(deadline);
    h.connected(C1);

    assert_eq!(vec!["w".to_owned()], h.wire.borrow().writes_on(C1));
    h.ok(C1);
    assert_eq!(vec!["w ok".to_owned()], h.completions());
    assert_eq!(1, h.count_events(|e| match *e {
        PoolEvent::Reconnect => true,
        _ => false,
    }));
}

#[test]
fn reconnect_gives_up_after_the_budget() {
    let mut h = Harness::new(PoolOptions {
        reconnect_tries: 3,
        ..options(1)
    });
    h.pool.connect(None).unwrap();
    h.connected(C0);

    h.pool.handle_event(C0, ConnectionEvent::Close);
    assert!(h.pool.is_disconnected());

    for _ in 0..3 {
        let deadline = h.pool.next_timeout().expect("reconnect scheduled");
        h.pool.handle_timeout(deadline);
        let attempt = h.last_created();
        h.pool.handle_event(attempt, ConnectionEvent::Close);
    }

    assert_eq!(3, h.count_events(|e| match *e {
        PoolEvent::AttemptReconnect => true,
        _ => false,
    }));
    assert_eq!(1, h.count_events(|e| match *e {
        PoolEvent::ReconnectFailed(Error::ReconnectFailed { attempts: 3, .. }) => true,
        _ => false,
    }));
    assert_eq!(4, h.wire.borrow().created.len());
    assert_eq!(PoolState::Destroyed, h.pool.state());
    assert!(h.pool.next_timeout().is_none());
}

#[test]
fn reconnect_replays_credentials() {
    let mut h = Harness::new(options(1));
    h.pool.connect(Some(credentials("admin"))).unwrap();
    h.connected(C0);
    h.ok(C0);
    assert!(h.pool.is_connected());

    h.pool.handle_event(C0, ConnectionEvent::Timeout);
    assert_eq!(1, h.count_events(|e| match *e {
        PoolEvent::Timeout(Some(Error::ConnectionTimeout(_))) => true,
        _ => false,
    }));

    let deadline = h.pool.next_timeout().expect("reconnect scheduled");
    h.pool.handle_timeout(deadline);
    h.connected(C1);

    assert_eq!(vec!["auth:admin".to_owned()], h.wire.borrow().writes_on(C1));
    assert!(!h.pool.is_connected());

    h.ok(C1);
    assert!(h.pool.is_connected());
    assert_eq!(vec!["admin".to_owned(), "admin".to_owned()], *h.auth_log.borrow());
}

#[test]
fn lost_socket_without_reconnect_stays_disconnected() {
    let mut h = Harness::new(PoolOptions {
        reconnect: false,
        ..options(1)
    });
    h.pool.connect(None).unwrap();
    h.connected(C0);

    h.pool.handle_event(C0, ConnectionEvent::ParseError("bad header".to_owned()));

    assert!(h.pool.is_disconnected());
    assert!(h.pool.next_timeout().is_none());
    assert_eq!(1, h.count_events(|e| match *e {
        PoolEvent::ParseError(Some(_)) => true,
        _ => false,
    }));
}

#[test]
fn in_flight_write_completes_before_its_socket_closes() {
    let mut h = connected(1);

    let wire = h.wire.clone();
    let completions = h.completions.clone();
    h.pool
        .write(
            b"w".to_vec(),
            WriteOptions::command(),
            Some(Box::new(move |result: mongodb_core::Result<CommandResult>| {
                let closed = wire.borrow().destroyed.len();
                completions
                    .borrow_mut()
                    .push(format!("w ok={} closed={}", result.is_ok(), closed));
            })),
        )
        .unwrap();

    h.pool.destroy();
    assert_eq!(PoolState::Destroying, h.pool.state());
    assert!(h.wire.borrow().destroyed.is_empty());

    h.pool.write(b"late".to_vec(), WriteOptions::command(), h.record("late")).unwrap();

    h.ok(C0);
    assert_eq!(
        vec![
            format!("late err: {}", Error::PoolDestroyed),
            "w ok=true closed=0".to_owned(),
        ],
        h.completions()
    );
    assert_eq!(vec![C0], h.wire.borrow().destroyed);
    assert_eq!(PoolState::Destroyed, h.pool.state());
    assert_eq!(1, h.count_events(|e| match *e {
        PoolEvent::Destroyed => true,
        _ => false,
    }));
}

#[test]
fn destroy_fails_queued_work() {
    let mut h = Harness::new(options(1));
    h.pool.connect(None).unwrap();
    h.pool.write(b"w".to_vec(), WriteOptions::command(), h.record("w")).unwrap();

    h.pool.destroy();
    h.pool.destroy();

    assert_eq!(vec![format!("w err: {}", Error::PoolDestroyed)], h.completions());
    assert!(h.pool.is_destroyed());
    assert_eq!(vec![C0], h.wire.borrow().destroyed);
    assert_eq!(1, h.count_events(|e| match *e {
        PoolEvent::Destroyed => true,
        _ => false,
    }));
}

#[test]
fn connect_authenticates_before_reporting_connected() {
    let mut h = Harness::new(options(1));
    h.pool.connect(Some(credentials("admin"))).unwrap();
    h.connected(C0);

    assert_eq!(vec!["auth:admin".to_owned()], h.wire.borrow().writes_on(C0));
    assert_eq!(PoolState::Connecting, h.pool.state());

    h.ok(C0);
    assert!(h.pool.is_connected());
    assert_eq!(1, h.pool.credentials().len());
    assert_eq!(1, h.count_events(|e| match *e {
        PoolEvent::Connect => true,
        _ => false,
    }));
}

#[test]
fn failed_connect_authentication_destroys_the_pool() {
    let mut h = Harness::new(options(1));
    h.pool.connect(Some(credentials("admin"))).unwrap();
    h.connected(C0);

    h.reply(C0, doc! { "ok": 0, "errmsg": "auth failed", "code": 18 });

    assert!(h.pool.is_destroyed());
    assert_eq!(vec![C0], h.wire.borrow().destroyed);
    assert_eq!(1, h.count_events(|e| match *e {
        PoolEvent::Error(Error::ServerError { code: 18, .. }) => true,
        _ => false,
    }));
    assert_eq!(0, h.count_events(|e| match *e {
        PoolEvent::Connect => true,
        _ => false,
    }));
}

#[test]
fn auth_calls_run_one_at_a_time() {
    let mut h = connected(1);

    h.pool.auth(credentials("db1"), h.record_auth("a1")).unwrap();
    h.pool.auth(credentials("db2"), h.record_auth("a2")).unwrap();
    h.pool.write(b"w".to_vec(), WriteOptions::command(), h.record("w")).unwrap();

    assert_eq!(vec!["db1".to_owned()], *h.auth_log.borrow());
    assert_eq!(vec!["auth:db1".to_owned()], h.wire.borrow().writes_on(C0));
    assert_eq!(1, h.pool.queue_len());

    h.ok(C0);
    assert_eq!(vec!["db1".to_owned(), "db2".to_owned()], *h.auth_log.borrow());
    assert_eq!(vec!["a1 ok".to_owned()], h.completions());
    assert!(h.pool.is_authenticating());

    h.ok(C0);
    assert!(!h.pool.is_authenticating());
    assert_eq!(2, h.pool.credentials().len());
    assert_eq!(
        vec!["auth:db1".to_owned(), "auth:db2".to_owned(), "w".to_owned()],
        h.wire.borrow().writes_on(C0)
    );

    h.ok(C0);
    assert_eq!(
        vec!["a1 ok".to_owned(), "a2 ok".to_owned(), "w ok".to_owned()],
        h.completions()
    );
}

#[test]
fn busy_connection_is_reauthenticated_after_its_reply() {
    let mut h = connected(1);

    h.pool.write(b"w".to_vec(), WriteOptions::command(), h.record("w")).unwrap();
    h.pool.auth(credentials("db1"), h.record_auth("a1")).unwrap();
    assert_eq!(vec!["a1 ok".to_owned()], h.completions());

    h.ok(C0);
    assert_eq!(vec!["w".to_owned(), "auth:db1".to_owned()], h.wire.borrow().writes_on(C0));
    assert_eq!(None, h.pool.bucket_of(C0));
    assert_eq!(vec!["a1 ok".to_owned(), "w ok".to_owned()], h.completions());

    h.ok(C0);
    assert_eq!(Some(Bucket::Available), h.pool.bucket_of(C0));
}

#[test]
fn auth_requires_a_connected_pool() {
    let mut h = Harness::new(options(1));

    match h.pool.auth(credentials("db1"), h.record_auth("a1")) {
        Err(Error::InvalidState { operation, .. }) => assert_eq!("auth", operation),
        other => panic!("expected an invalid state error, got {:?}", other),
    }
}

#[test]
fn logout_forgets_the_database_credentials() {
    let mut h = Harness::new(options(1));
    h.pool.connect(Some(credentials("admin"))).unwrap();
    h.connected(C0);
    h.ok(C0);

    h.pool.logout("admin", h.record_auth("out")).unwrap();
    let last = h.wire.borrow().writes_on(C0).pop().expect("logout written");
    assert!(last.starts_with("admin:"));

    h.ok(C0);
    assert!(h.pool.credentials().is_empty());
    assert_eq!(vec!["out ok".to_owned()], h.completions());
    assert_eq!(Some(Bucket::Available), h.pool.bucket_of(C0));
}

#[test]
fn empty_authentication_reply_fails_the_connect() {
    let mut h = Harness::new(options(1));
    h.pool.connect(Some(credentials("admin"))).unwrap();
    h.connected(C0);

    h.pool.handle_event(C0, ConnectionEvent::Message(Message::new(Vec::new())));

    assert!(h.pool.is_destroyed());
    assert_eq!(1, h.count_events(|e| match *e {
        PoolEvent::Error(Error::AuthenticationError(_)) => true,
        _ => false,
    }));
}

#[test]
fn unref_applies_to_current_and_future_sockets() {
    let mut h = connected(2);
    h.pool.unref();

    h.pool.write(b"w1".to_vec(), WriteOptions::command(), h.record("w1")).unwrap();
    h.pool.write(b"w2".to_vec(), WriteOptions::command(), h.record("w2")).unwrap();

    assert_eq!(vec![C0, C1], h.wire.borrow().unrefed);
}

#[test]
fn dead_available_socket_is_replaced() {
    let mut h = connected(1);
    h.wire.borrow_mut().dropped.push(C0);

    h.pool.write(b"w".to_vec(), WriteOptions::command(), h.record("w")).unwrap();

    assert_eq!(vec![C0], h.wire.borrow().destroyed);
    assert!(h.pool.is_disconnected());
    assert_eq!(1, h.pool.queue_len());

    let deadline = h.pool.next_timeout().expect("reconnect scheduled");
    h.pool.handle_timeout(deadline);
    h.connected(C1);
    assert_eq!(vec!["w".to_owned()], h.wire.borrow().writes_on(C1));
}

/// A pool connected with `admin` credentials.
fn connected_as_admin(options: PoolOptions) -> Harness {
    let mut h = Harness::new(options);
    h.pool.connect(Some(credentials("admin"))).unwrap();
    h.connected(C0);
    h.ok(C0);
    assert!(h.pool.is_connected());
    h
}

#[test]
fn logout_holds_growth_until_it_finishes() {
    let mut h = connected_as_admin(options(2));

    h.pool.logout("admin", h.record_auth("out")).unwrap();
    h.pool.write(b"w".to_vec(), WriteOptions::command(), h.record("w")).unwrap();

    assert_eq!(vec![C0], h.wire.borrow().created);
    assert_eq!(1, h.pool.queue_len());

    h.ok(C0);
    let writes = h.wire.borrow().writes_on(C0);
    assert_eq!(3, writes.len());
    assert!(writes[1].starts_with("admin:"));
    assert_eq!("w", writes[2]);
    assert_eq!(vec!["out ok".to_owned()], h.completions());
    assert!(h.pool.credentials().is_empty());

    h.ok(C0);
    assert_eq!(vec!["out ok".to_owned(), "w ok".to_owned()], h.completions());
    assert_eq!(vec![C0], h.wire.borrow().created);
    assert_eq!(vec!["admin".to_owned()], *h.auth_log.borrow());
}

#[test]
fn logout_waits_for_in_use_connections() {
    let mut h = connected_as_admin(options(2));
    h.pool.auth(credentials("app"), h.record_auth("a")).unwrap();
    h.ok(C0);
    assert_eq!(2, h.pool.credentials().len());

    h.pool.write(b"w1".to_vec(), WriteOptions::command(), h.record("w1")).unwrap();
    h.pool.write(b"w2".to_vec(), WriteOptions::command(), h.record("w2")).unwrap();
    assert_eq!(Some(Bucket::Connecting), h.pool.bucket_of(C1));

    h.pool.logout("admin", h.record_auth("out")).unwrap();
    assert_eq!(Some(Bucket::InUse), h.pool.bucket_of(C0));

    // Opened before the logout, established during it.
    h.connected(C1);
    assert_eq!(Some(Bucket::NonAuthenticated), h.pool.bucket_of(C1));
    assert!(h.wire.borrow().writes_on(C1).is_empty());

    h.ok(C0);
    assert_eq!(None, h.pool.bucket_of(C0));
    assert!(h.wire.borrow().writes_on(C0)[3].starts_with("admin:"));
    assert_eq!(vec!["a ok".to_owned(), "w1 ok".to_owned()], h.completions());

    h.ok(C0);
    assert_eq!(Some(Bucket::InUse), h.pool.bucket_of(C0));
    assert_eq!("w2", h.wire.borrow().writes_on(C0)[4]);
    assert_eq!(vec!["auth:app".to_owned()], h.wire.borrow().writes_on(C1));
    assert_eq!(1, h.pool.credentials().len());
    assert_eq!("app", h.pool.credentials()[0].source);
    assert_eq!(
        vec!["a ok".to_owned(), "w1 ok".to_owned(), "out ok".to_owned()],
        h.completions()
    );

    h.ok(C1);
    assert_eq!(Some(Bucket::Available), h.pool.bucket_of(C1));
    h.ok(C0);
    assert_eq!(Some(Bucket::Available), h.pool.bucket_of(C0));
}

#[test]
fn connection_established_during_rotation_is_authenticated_afterwards() {
    let mut h = Harness::new(PoolOptions {
        min_size: 2,
        ..options(2)
    });
    h.pool.connect(None).unwrap();
    h.connected(C0);
    assert_eq!(Some(Bucket::Connecting), h.pool.bucket_of(C1));

    h.pool.auth(credentials("db1"), h.record_auth("a1")).unwrap();
    assert_eq!(vec!["auth:db1".to_owned()], h.wire.borrow().writes_on(C0));

    h.connected(C1);
    assert_eq!(Some(Bucket::NonAuthenticated), h.pool.bucket_of(C1));
    assert!(h.wire.borrow().writes_on(C1).is_empty());

    h.ok(C0);
    assert_eq!(vec!["a1 ok".to_owned()], h.completions());
    assert_eq!(Some(Bucket::Available), h.pool.bucket_of(C0));
    assert_eq!(None, h.pool.bucket_of(C1));
    assert_eq!(vec!["auth:db1".to_owned()], h.wire.borrow().writes_on(C1));

    h.ok(C1);
    assert_eq!(Some(Bucket::Available), h.pool.bucket_of(C1));
    assert_eq!(vec!["db1".to_owned(), "db1".to_owned()], *h.auth_log.borrow());
}

#[test]
fn min_size_is_opened_on_connect_and_kept() {
    let mut h = Harness::new(PoolOptions {
        min_size: 2,
        ..options(3)
    });
    h.pool.connect(None).unwrap();
    h.connected(C0);
    assert_eq!(vec![C0, C1], h.wire.borrow().created);

    h.connected(C1);
    assert_eq!(2, h.pool.available_count());

    h.pool.handle_event(C1, ConnectionEvent::Close);
    assert!(h.pool.is_connected());
    assert_eq!(vec![C0, C1, C2], h.wire.borrow().created);
    assert_eq!(Some(Bucket::Connecting), h.pool.bucket_of(C2));
}

#[test]
fn forced_destroy_fails_in_flight_work() {
    let mut h = connected(1);

    h.pool.write(b"w1".to_vec(), WriteOptions::command(), h.record("w1")).unwrap();
    h.pool.write(b"w2".to_vec(), WriteOptions::command(), h.record("w2")).unwrap();

    h.pool.destroy_with(true);

    assert_eq!(
        vec![
            format!("w2 err: {}", Error::PoolDestroyed),
            format!("w1 err: {}", Error::PoolDestroyed),
        ],
        h.completions()
    );
    assert_eq!(vec![C0], h.wire.borrow().destroyed);
    assert_eq!(PoolState::Destroyed, h.pool.state());

    h.ok(C0);
    assert_eq!(2, h.completions().len());
    assert_eq!(1, h.count_events(|e| match *e {
        PoolEvent::Destroyed => true,
        _ => false,
    }));
}

#[test]
fn reset_replaces_every_socket() {
    let mut h = connected(2);

    h.pool.write(b"w1".to_vec(), WriteOptions::command(), h.record("w1")).unwrap();
    h.pool.reset().unwrap();

    assert_eq!(vec![C0], h.wire.borrow().destroyed);
    assert_eq!(
        vec![format!("w1 err: {}", Error::ConnectionClosed("localhost:27017".to_owned()))],
        h.completions()
    );
    assert_eq!(Some(Bucket::Connecting), h.pool.bucket_of(C1));

    h.pool.write(b"w2".to_vec(), WriteOptions::command(), h.record("w2")).unwrap();
    assert_eq!(2, h.wire.borrow().created.len());

    h.connected(C1);
    assert_eq!(vec!["w2".to_owned()], h.wire.borrow().writes_on(C1));
    assert!(h.pool.is_connected());
}

#[test]
fn reset_requires_a_connected_pool() {
    let mut h = Harness::new(options(1));

    match h.pool.reset() {
        Err(Error::InvalidState { operation, .. }) => assert_eq!("reset", operation),
        other => panic!("expected an invalid state error, got {:?}", other),
    }
}
