// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![cfg(unix)]
#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure

//! Calls that come back: a servant calling an object of its caller runs on
//! the caller's own thread, however deep the chain goes, whichever runtime
//! serves the peer.

mod common;

use common::*;
use rop::{Connection, Runtime, Value};
use std::sync::Arc;
use std::thread;

#[test]
fn test_callback_runs_on_calling_thread() {
    callback_runs_on_calling_thread(Runtime::Driver);
}

#[test]
fn test_callback_runs_on_calling_thread_thread_per_port() {
    callback_runs_on_calling_thread(Runtime::ThreadPerPort);
}

#[test]
fn test_chains_from_parallel_threads() {
    chains_from_parallel_threads(Runtime::Driver);
}

#[test]
fn test_chains_from_parallel_threads_thread_per_port() {
    chains_from_parallel_threads(Runtime::ThreadPerPort);
}

#[test]
fn test_local_object_exported_once() {
    local_object_exported_once(Runtime::Driver);
}

#[test]
fn test_local_object_exported_once_thread_per_port() {
    local_object_exported_once(Runtime::ThreadPerPort);
}

fn bouncer_pair(runtime: Runtime) -> (Connection, Connection) {
    init_logging();
    Connection::pair(
        Connection::builder()
            .runtime(runtime)
            .export("bouncer", Bouncer::new()),
        Connection::builder().runtime(runtime),
    )
    .expect("pair")
}

fn callback_runs_on_calling_thread(runtime: Runtime) {
    let (_server, client) = bouncer_pair(runtime);
    let remote = client.resolve_stub("bouncer", &BOUNCER).expect("resolve");
    let local = Bouncer::new();

    let depth = remote
        .call(BOUNCE, vec![Value::object(local.clone()), Value::I32(6)])
        .expect("bounce");
    assert_eq!(depth, Value::I32(6));

    // Odd depths run on the client; depth 0 is answered by the server.
    let threads = local.threads.lock().clone();
    assert_eq!(threads.len(), 3);
    let me = thread::current().id();
    assert!(threads.iter().all(|t| *t == me));
}

fn chains_from_parallel_threads(runtime: Runtime) {
    let (_server, client) = bouncer_pair(runtime);
    let client = Arc::new(client);

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                let remote = client.resolve_stub("bouncer", &BOUNCER).expect("resolve");
                let local = Bouncer::new();
                for depth in [1, 4, 9] {
                    let got = remote
                        .call(BOUNCE, vec![Value::object(local.clone()), Value::I32(depth)])
                        .expect("bounce");
                    assert_eq!(got, Value::I32(depth));
                }
                let me = thread::current().id();
                assert!(local.threads.lock().iter().all(|t| *t == me));
            })
        })
        .collect();
    for w in workers {
        w.join().expect("worker");
    }
}

fn local_object_exported_once(runtime: Runtime) {
    let (server, client) = bouncer_pair(runtime);
    let remote = client.resolve_stub("bouncer", &BOUNCER).expect("resolve");
    let local = Bouncer::new();

    remote
        .call(BOUNCE, vec![Value::object(local.clone()), Value::I32(2)])
        .expect("bounce");

    // The client bouncer was exported once; the server holds one handle to it.
    assert_eq!(client.stats().skeletons, 1);
    assert!(server.stats().remotes <= 1);
}
