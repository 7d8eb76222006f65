// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! rop-calc - Remote calculator over ROP
//!
//! `serve` exports a `calc` object on a TCP listener; `call` connects to it
//! and hammers `add` from several threads.

use clap::{Parser, Subcommand};
use rop::{
    Connection, ConnectionConfig, Interface, Method, Reply, RopError, Runtime, Servant, Shape,
    Value,
};
use std::io;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const ADD: u16 = 0;
const DIV: u16 = 1;
const DESCRIBE: u16 = 2;

static CALC: Interface = Interface {
    name: "calc",
    methods: &[
        Method {
            name: "add",
            args: &[Shape::I32, Shape::I32],
            results: &[Shape::I32],
            oneway: false,
        },
        Method {
            name: "div",
            args: &[Shape::I32, Shape::I32],
            results: &[Shape::I32, Shape::Str],
            oneway: false,
        },
        Method {
            name: "describe",
            args: &[],
            results: &[Shape::Str],
            oneway: false,
        },
    ],
};

/// ROP calculator server and load generator
#[derive(Parser, Debug)]
#[command(name = "rop-calc")]
#[command(version = "0.1.0")]
#[command(about = "Serve or exercise a remote calculator object")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Read buffer sizes and limits from ROP_* environment variables
    #[arg(long, global = true)]
    env_config: bool,

    /// Run each busy port's requests on its own thread instead of the driver
    #[arg(long, global = true)]
    thread_per_port: bool,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Export `calc` and accept connections until Ctrl+C
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:7400")]
        listen: String,
    },

    /// Call `add(a, b)` repeatedly from several threads
    Call {
        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:7400")]
        connect: String,

        /// Calling threads
        #[arg(short, long, default_value = "4")]
        threads: usize,

        /// Calls per thread
        #[arg(short = 'n', long, default_value = "1000")]
        calls: usize,

        a: i32,
        b: i32,
    },
}

#[derive(Default)]
struct Calc {
    served: AtomicU64,
}

impl Servant for Calc {
    fn interface(&self) -> &'static Interface {
        &CALC
    }

    fn dispatch(&self, method: u16, args: Vec<Value>) -> Reply {
        self.served.fetch_add(1, Ordering::Relaxed);
        let a = args.first().and_then(Value::as_i32).unwrap_or_default();
        let b = args.get(1).and_then(Value::as_i32).unwrap_or_default();
        match method {
            ADD => Reply::Value(Value::I32(a.wrapping_add(b))),
            DIV => match a.checked_div(b) {
                Some(q) => Reply::Value(Value::I32(q)),
                None => Reply::Raise {
                    variant: 1,
                    payload: Value::from(format!("cannot divide {} by {}", a, b)),
                },
            },
            DESCRIBE => Reply::Value(Value::from(format!(
                "rop-calc {} ({} calls served)",
                env!("CARGO_PKG_VERSION"),
                self.served.load(Ordering::Relaxed)
            ))),
            _ => Reply::Fault(format!("no calc method {}", method)),
        }
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = if args.env_config {
        ConnectionConfig::from_env()
    } else {
        ConnectionConfig::default()
    };
    if args.thread_per_port {
        config = config.with_runtime(Runtime::ThreadPerPort);
    }
    match &args.mode {
        Mode::Serve { listen } => run_serve(listen, config),
        Mode::Call {
            connect,
            threads,
            calls,
            a,
            b,
        } => run_call(connect, config, *threads, *calls, *a, *b),
    }
}

fn run_serve(listen: &str, config: ConnectionConfig) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(listen)?;
    listener.set_nonblocking(true)?;
    println!("rop-calc listening on {}", listener.local_addr()?);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let calc = Arc::new(Calc::default());
    let mut clients: Vec<Connection> = Vec::new();

    while running.load(Ordering::SeqCst) {
        match Connection::builder()
            .config(config.clone())
            .export("calc", calc.clone())
            .accept(&listener)
        {
            Ok(conn) => {
                println!("  client connected: {}", conn.peer());
                clients.push(conn);
            }
            Err(RopError::Io { kind, .. }) if kind == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => log::warn!("rop-calc: accept failed: {}", e),
        }

        clients.retain(|conn| {
            if conn.is_closed() {
                let m = conn.metrics();
                println!(
                    "  client gone: {} ({} requests, {} bytes in)",
                    conn.peer(),
                    m.requests_dispatched,
                    m.bytes_received
                );
                false
            } else {
                true
            }
        });
    }

    println!(
        "\nShutting down: {} calls served, {} clients still connected",
        calc.served.load(Ordering::Relaxed),
        clients.len()
    );
    Ok(())
}

fn run_call(
    addr: &str,
    config: ConnectionConfig,
    threads: usize,
    calls: usize,
    a: i32,
    b: i32,
) -> Result<(), Box<dyn std::error::Error>> {
    let conn = Connection::builder().config(config).connect(addr)?;
    let calc = conn.resolve_stub("calc", &CALC)?;
    println!("{}", calc.call(DESCRIBE, vec![])?.as_str().unwrap_or("?"));

    let expected = Value::I32(a.wrapping_add(b));
    let failures = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let calc = calc.clone();
            let expected = expected.clone();
            let failures = failures.clone();
            thread::spawn(move || {
                for _ in 0..calls {
                    match calc.call(ADD, vec![Value::I32(a), Value::I32(b)]) {
                        Ok(v) if v == expected => {}
                        Ok(v) => {
                            log::error!("rop-calc: add returned {:?}", v);
                            failures.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            log::error!("rop-calc: add failed: {}", e);
                            failures.fetch_add(1, Ordering::Relaxed);
                            if e.is_connection_failure() {
                                return;
                            }
                        }
                    }
                }
            })
        })
        .collect();
    for w in workers {
        if w.join().is_err() {
            failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    let elapsed = start.elapsed();
    let total = threads * calls;
    let m = conn.metrics();
    println!("=== rop-calc: {} x {} calls of add({}, {}) ===", threads, calls, a, b);
    println!("  Elapsed:      {:?}", elapsed);
    println!(
        "  Rate:         {:.0} calls/s",
        total as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("  Failures:     {}", failures.load(Ordering::Relaxed));
    println!("  Bytes out/in: {} / {}", m.bytes_sent, m.bytes_received);
    println!("  Send blocked: {}", m.send_blocked);

    match calc.call(DIV, vec![Value::I32(a), Value::I32(0)]) {
        Err(RopError::Remote { variant, payload }) => {
            println!("  div by zero:  variant {} ({:?})", variant, payload.as_str());
        }
        other => println!("  div by zero:  unexpected {:?}", other),
    }

    if failures.load(Ordering::Relaxed) > 0 {
        return Err("some calls failed".into());
    }
    Ok(())
}
