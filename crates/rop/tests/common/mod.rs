// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Interfaces and servants shared by the integration tests.

#![allow(dead_code)]

use parking_lot::{Condvar, Mutex};
use rop::{Interface, Method, ObjectRef, Reply, Servant, Shape, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

// ============================================================================
// calc
// ============================================================================

pub const ADD: u16 = 0;
pub const DIV: u16 = 1;
pub const DESCRIBE: u16 = 2;
pub const EXPLODE: u16 = 3;
pub const NOTE: u16 = 4;
pub const REPEAT: u16 = 5;

pub static CALC: Interface = Interface {
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
        Method {
            name: "explode",
            args: &[],
            results: &[Shape::Unit],
            oneway: false,
        },
        Method {
            name: "note",
            args: &[Shape::I32],
            results: &[Shape::Unit],
            oneway: true,
        },
        Method {
            name: "repeat",
            args: &[Shape::Str, Shape::I32],
            results: &[Shape::Str],
            oneway: false,
        },
    ],
};

#[derive(Default)]
pub struct Calc {
    pub noted: AtomicI64,
}

impl Servant for Calc {
    fn interface(&self) -> &'static Interface {
        &CALC
    }

    fn dispatch(&self, method: u16, args: Vec<Value>) -> Reply {
        let a = args.first().and_then(Value::as_i32).unwrap_or_default();
        let b = args.get(1).and_then(Value::as_i32).unwrap_or_default();
        match method {
            ADD => Reply::Value(Value::I32(a.wrapping_add(b))),
            DIV if b == 0 => Reply::Raise {
                variant: 1,
                payload: Value::from("division by zero"),
            },
            DIV => Reply::Value(Value::I32(a / b)),
            DESCRIBE => Reply::Value(Value::from("calc v1")),
            EXPLODE => panic!("explode called"),
            NOTE => {
                self.noted.fetch_add(i64::from(a), Ordering::SeqCst);
                Reply::unit()
            }
            REPEAT => {
                let text = args.first().and_then(Value::as_str).unwrap_or_default();
                Reply::Value(Value::from(text.repeat(usize::try_from(b).unwrap_or(0))))
            }
            _ => Reply::Fault(format!("no method {}", method)),
        }
    }
}

// ============================================================================
// factory / counter
// ============================================================================

pub const MAKE: u16 = 0;
pub const SAME: u16 = 1;

pub static COUNTER: Interface = Interface {
    name: "counter",
    methods: &[Method {
        name: "get",
        args: &[],
        results: &[Shape::I32],
        oneway: false,
    }],
};

static COUNTER_RESULT: [Shape; 1] = [Shape::Object(&COUNTER)];

pub static FACTORY: Interface = Interface {
    name: "factory",
    methods: &[
        Method {
            name: "make",
            args: &[Shape::I32],
            results: &COUNTER_RESULT,
            oneway: false,
        },
        Method {
            name: "same",
            args: &[],
            results: &COUNTER_RESULT,
            oneway: false,
        },
    ],
};

pub struct Counter(pub i32);

impl Servant for Counter {
    fn interface(&self) -> &'static Interface {
        &COUNTER
    }

    fn dispatch(&self, _method: u16, _args: Vec<Value>) -> Reply {
        Reply::Value(Value::I32(self.0))
    }
}

pub struct Factory {
    shared: Arc<dyn Servant>,
}

impl Factory {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Counter(-1)),
        }
    }
}

impl Servant for Factory {
    fn interface(&self) -> &'static Interface {
        &FACTORY
    }

    fn dispatch(&self, method: u16, args: Vec<Value>) -> Reply {
        match method {
            MAKE => {
                let n = args.first().and_then(Value::as_i32).unwrap_or_default();
                Reply::Value(Value::object(Arc::new(Counter(n))))
            }
            SAME => Reply::Value(Value::object(Arc::clone(&self.shared))),
            _ => Reply::Fault(format!("no method {}", method)),
        }
    }
}

// ============================================================================
// bouncer: calls back into whoever called it
// ============================================================================

pub const BOUNCE: u16 = 0;

pub static BOUNCER: Interface = Interface {
    name: "bouncer",
    methods: &[Method {
        name: "bounce",
        args: &BOUNCE_ARGS,
        results: &[Shape::I32],
        oneway: false,
    }],
};

static BOUNCE_ARGS: [Shape; 2] = [Shape::Object(&BOUNCER), Shape::I32];

/// `bounce(other, n)` returns `other.bounce(self, n - 1) + 1`, or 0 at 0.
pub struct Bouncer {
    me: Weak<Bouncer>,
    pub threads: Mutex<Vec<ThreadId>>,
}

impl Bouncer {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            threads: Mutex::new(Vec::new()),
        })
    }
}

impl Servant for Bouncer {
    fn interface(&self) -> &'static Interface {
        &BOUNCER
    }

    fn dispatch(&self, _method: u16, args: Vec<Value>) -> Reply {
        self.threads.lock().push(thread::current().id());
        let n = args.get(1).and_then(Value::as_i32).unwrap_or_default();
        if n == 0 {
            return Reply::Value(Value::I32(0));
        }
        let other: Option<ObjectRef> = args.into_iter().next().and_then(Value::into_object);
        let (other, me) = match (other, self.me.upgrade()) {
            (Some(other), Some(me)) => (other, me),
            _ => return Reply::Fault("bounce without a partner".into()),
        };
        let me: Arc<dyn Servant> = me;
        match other.call(BOUNCE, vec![Value::object(me), Value::I32(n - 1)]) {
            Ok(Value::I32(depth)) => Reply::Value(Value::I32(depth + 1)),
            Ok(other) => Reply::Fault(format!("unexpected {:?}", other)),
            Err(e) => Reply::Fault(e.to_string()),
        }
    }
}

// ============================================================================
// latch: blocks callers until opened
// ============================================================================

pub const WAIT: u16 = 0;

pub static LATCH: Interface = Interface {
    name: "latch",
    methods: &[Method {
        name: "wait",
        args: &[],
        results: &[Shape::Unit],
        oneway: false,
    }],
};

#[derive(Default)]
pub struct Latch {
    open: Mutex<bool>,
    opened: Condvar,
    pub waiting: AtomicI64,
}

impl Latch {
    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }
}

impl Servant for Latch {
    fn interface(&self) -> &'static Interface {
        &LATCH
    }

    fn dispatch(&self, _method: u16, _args: Vec<Value>) -> Reply {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait_for(&mut open, Duration::from_millis(50));
        }
        Reply::unit()
    }
}

// ============================================================================
// helpers
// ============================================================================

/// Poll `cond` until it holds or five seconds pass.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
