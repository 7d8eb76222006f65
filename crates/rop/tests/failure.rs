// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![cfg(unix)]
#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::cast_sign_loss)] // Test data conversions

//! Faults and fatal errors: servant panics, foreign objects, protocol
//! violations from a hand-driven peer and peers that go away mid-call.

mod common;

use common::*;
use rop::{AbortReason, Connection, FaultCode, ObjectRef, RopError, Value};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A connection whose peer is a plain socket driven by the test.
fn raw_peer(builder: rop::ConnectionBuilder) -> (Connection, UnixStream) {
    init_logging();
    let (ours, theirs) = UnixStream::pair().expect("socket pair");
    ours.set_nonblocking(true).expect("nonblocking");
    let conn = builder
        .over_stream(Box::new(mio::net::UnixStream::from_std(ours)))
        .expect("connection");
    theirs
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    (conn, theirs)
}

#[test]
fn test_servant_panic_is_a_fault() {
    init_logging();
    let (_server, client) = Connection::pair(
        Connection::builder().export("calc", Arc::new(Calc::default())),
        Connection::builder(),
    )
    .expect("pair");
    let calc = client.resolve_stub("calc", &CALC).expect("resolve");

    match calc.call(EXPLODE, vec![]) {
        Err(RopError::Fault { code, message }) => {
            assert_eq!(code, FaultCode::ServantPanicked);
            assert!(message.contains("explode"), "message: {}", message);
        }
        other => panic!("expected fault, got {:?}", other),
    }
    // The connection survives.
    assert_eq!(
        calc.call(ADD, vec![Value::I32(1), Value::I32(1)]).expect("add"),
        Value::I32(2)
    );
}

#[test]
fn test_foreign_stub_rejected_before_sending() {
    init_logging();
    let (_s1, c1) = Connection::pair(
        Connection::builder().export("factory", Arc::new(Factory::new())),
        Connection::builder(),
    )
    .expect("pair 1");
    let (_s2, c2) = Connection::pair(
        Connection::builder().export("bouncer", Bouncer::new()),
        Connection::builder(),
    )
    .expect("pair 2");

    let factory = c1.resolve_stub("factory", &FACTORY).expect("resolve factory");
    let bouncer = c2.resolve_stub("bouncer", &BOUNCER).expect("resolve bouncer");
    let stranger = ObjectRef::Remote(factory.rebind(&BOUNCER));

    assert!(matches!(
        bouncer.call(BOUNCE, vec![Value::Object(Some(stranger)), Value::I32(1)]),
        Err(RopError::ForeignObject)
    ));
    assert!(!c2.is_closed());
}

#[test]
fn test_unknown_target_gets_fault_then_close() {
    let (conn, mut raw) = raw_peer(Connection::builder());

    // Port 1, request, target -99 in our numbering (99 on theirs), method 0.
    let mut msg = Vec::new();
    msg.extend_from_slice(&1i32.to_be_bytes());
    msg.push(0x00);
    msg.extend_from_slice(&(-99i32).to_be_bytes());
    msg.extend_from_slice(&0u16.to_be_bytes());
    raw.write_all(&msg).expect("write");

    let mut reply = Vec::new();
    raw.read_to_end(&mut reply).expect("read until close");

    assert!(reply.len() >= 13, "short reply {:?}", reply);
    assert_eq!(&reply[0..4], &(-1i32).to_be_bytes());
    assert_eq!(reply[4], 0xC0);
    let variant = i32::from_be_bytes([reply[5], reply[6], reply[7], reply[8]]);
    assert_eq!(variant, FaultCode::UnknownObject.discriminant());
    let len = u32::from_be_bytes([reply[9], reply[10], reply[11], reply[12]]) as usize;
    assert_eq!(reply.len(), 13 + len);
    assert!(std::str::from_utf8(&reply[13..]).is_ok());

    assert!(wait_until(|| conn.is_closed()));
    assert!(matches!(
        conn.failure(),
        Some(RopError::Malformed {
            reason: AbortReason::UnknownObject,
            ..
        })
    ));
    assert_eq!(conn.metrics().malformed_frames, 1);
}

#[test]
fn test_garbage_head_closes_without_reply() {
    let (conn, mut raw) = raw_peer(Connection::builder());

    let mut msg = Vec::new();
    msg.extend_from_slice(&3i32.to_be_bytes());
    msg.push(0x42);
    raw.write_all(&msg).expect("write");

    let mut reply = Vec::new();
    raw.read_to_end(&mut reply).expect("read until close");
    assert!(reply.is_empty());
    assert!(wait_until(|| conn.is_closed()));
}

#[test]
fn test_peer_vanishes_mid_call() {
    let (conn, mut raw) = raw_peer(Connection::builder());

    let caller = thread::spawn(move || {
        let outcome = conn.resolve("calc", &CALC);
        (conn, outcome)
    });

    // Wait for the lookup request to arrive, then hang up without answering.
    let mut first = [0u8; 4];
    raw.read_exact(&mut first).expect("lookup request");
    assert_eq!(first, 1i32.to_be_bytes());
    drop(raw);

    let (conn, outcome) = caller.join().expect("caller");
    match outcome {
        Err(e) => assert!(e.is_connection_failure(), "unexpected error {:?}", e),
        Ok(obj) => panic!("lookup answered by nobody: {:?}", obj),
    }
    assert!(conn.is_closed());
}

#[test]
fn test_shutdown_fails_pending_and_later_calls() {
    let (conn, _raw) = raw_peer(Connection::builder());
    let conn = Arc::new(conn);

    let caller = {
        let conn = Arc::clone(&conn);
        thread::spawn(move || conn.resolve("calc", &CALC))
    };
    thread::sleep(Duration::from_millis(50));
    conn.shutdown();

    assert!(caller.join().expect("caller").is_err());
    assert!(wait_until(|| conn.is_closed()));
    assert!(matches!(
        conn.resolve("calc", &CALC),
        Err(RopError::ConnectionClosed(_))
    ));
}
