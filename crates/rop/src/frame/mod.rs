// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resumable frames.
//!
//! A frame decodes or encodes one wire value incrementally. Each call to
//! [`Frame::resume`] consumes (or produces) as many bytes as the buffer
//! allows and reports how far it got. Composite frames never recurse:
//! they hand a child frame back as [`Step::Push`] and the [`Continuation`]
//! that drives them keeps the child on an explicit stack. When the child
//! completes, its value is passed to the parent through [`Frame::accept`]
//! and the parent is resumed.
//!
//! ```text
//!   Continuation stack           Buffer
//!   +----------------+           +-----------------------------+
//!   | ObjectReader   | <- top    | .. bytes read so far ..     |
//!   | ListReader     |           +-----------------------------+
//!   +----------------+
//!   root: MessageReader   (owned by the port, not on the stack)
//! ```
//!
//! Running out of bytes at any depth leaves every frame on the stack with
//! its partial state, so the next `drive` call continues exactly there.

pub mod codec;
pub mod message;
pub mod object;

use crate::error::{RopError, RopResult};
use crate::port::ReturnQueue;
use crate::registry::Registry;
use crate::value::Value;
use crate::wire::Buffer;
use std::fmt;

// ============================================================================
// Frame contract
// ============================================================================

/// Outcome of one `resume` call.
pub enum Step {
    /// Buffer exhausted (decode) or full (encode)
    NeedMore,
    /// Frame finished
    Complete,
    /// Data violates the frame's shape
    Aborted(AbortReason),
    /// Run this child to completion, then resume the caller
    Push(Box<dyn Frame>),
}

/// Outcome of driving a frame tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    NeedMore,
    Complete,
    Aborted(AbortReason),
}

/// Why a frame aborted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortReason {
    /// Head byte is neither a Request nor a Return
    InvalidHead,
    /// Request targets an id with no skeleton
    UnknownObject,
    /// Request method index is out of range
    UnknownMethod,
    /// Return arrived with no outstanding expectation on its port
    UnexpectedReturn,
    /// Return discriminant selects no declared result
    BadVariant,
    /// Presence byte is neither 0 nor 1
    BadPresence,
    /// Bool byte is neither 0 nor 1
    BadBool,
    /// Blob or list longer than the configured limit
    TooLong { len: u32, max: u32 },
    /// String bytes are not UTF-8
    InvalidUtf8,
    /// Stub from another connection used as an argument
    ForeignObject,
    /// Object reference to id 0
    BadObjectId,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHead => write!(f, "invalid message head"),
            Self::UnknownObject => write!(f, "unknown target object"),
            Self::UnknownMethod => write!(f, "unknown method index"),
            Self::UnexpectedReturn => write!(f, "return without outstanding call"),
            Self::BadVariant => write!(f, "undeclared result variant"),
            Self::BadPresence => write!(f, "invalid presence byte"),
            Self::BadBool => write!(f, "invalid bool byte"),
            Self::TooLong { len, max } => write!(f, "length {} exceeds limit {}", len, max),
            Self::InvalidUtf8 => write!(f, "string is not UTF-8"),
            Self::ForeignObject => write!(f, "object reference from another connection"),
            Self::BadObjectId => write!(f, "object reference to reserved id"),
        }
    }
}

/// Decoder limits.
#[derive(Clone, Copy, Debug)]
pub struct Limits {
    pub max_blob_len: u32,
    pub max_list_len: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_blob_len: 16 * 1024 * 1024,
            max_list_len: 1 << 20,
        }
    }
}

impl Limits {
    /// Refuse a value the peer's decoder would reject as too long.
    pub fn check(&self, value: &Value) -> RopResult<()> {
        let exceeded = |len: usize, max: u32| {
            if u32::try_from(len).map_or(true, |n| n > max) {
                Err(RopError::LimitExceeded { len, max })
            } else {
                Ok(())
            }
        };
        match value {
            Value::Str(s) => exceeded(s.len(), self.max_blob_len),
            Value::Bytes(b) => exceeded(b.len(), self.max_blob_len),
            Value::List(items) => {
                exceeded(items.len(), self.max_list_len)?;
                items.iter().try_for_each(|item| self.check(item))
            }
            Value::Optional(Some(inner)) => self.check(inner),
            _ => Ok(()),
        }
    }
}

/// Cut `text` to at most `max` bytes on a char boundary.
pub fn clip(mut text: String, max: u32) -> String {
    let max = usize::try_from(max).unwrap_or(usize::MAX);
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

/// Everything a frame may touch while resuming.
pub struct FrameIo<'a> {
    /// Bytes to decode from, or room to encode into
    pub buf: &'a mut Buffer,
    /// Object tables, for object-reference fields
    pub registry: &'a mut Registry,
    pub limits: Limits,
    /// Outstanding expectations of the port being decoded
    pub returns: Option<&'a mut ReturnQueue>,
}

/// Incremental decode or encode unit.
pub trait Frame: Send {
    /// Advance as far as the buffer allows.
    fn resume(&mut self, io: &mut FrameIo<'_>) -> Step;

    /// Receive the value of the child most recently pushed.
    fn accept(&mut self, _value: Value) {}

    /// Decoded value, taken once the frame reported `Complete`.
    fn finish(&mut self) -> Value {
        Value::Unit
    }
}

// ============================================================================
// Continuation stack
// ============================================================================

/// Explicit stack of in-flight child frames.
#[derive(Default)]
pub struct Continuation {
    stack: Vec<Box<dyn Frame>>,
}

impl Continuation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of suspended child frames.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Drive `root` and its children until the tree completes, aborts, or
    /// the buffer runs dry.
    pub fn drive(&mut self, root: &mut dyn Frame, io: &mut FrameIo<'_>) -> FrameState {
        loop {
            let step = match self.stack.last_mut() {
                Some(top) => top.resume(io),
                None => root.resume(io),
            };
            match step {
                Step::NeedMore => return FrameState::NeedMore,
                Step::Aborted(reason) => {
                    self.stack.clear();
                    return FrameState::Aborted(reason);
                }
                Step::Push(child) => self.stack.push(child),
                Step::Complete => match self.stack.pop() {
                    Some(mut child) => {
                        let value = child.finish();
                        match self.stack.last_mut() {
                            Some(parent) => parent.accept(value),
                            None => root.accept(value),
                        }
                    }
                    None => return FrameState::Complete,
                },
            }
        }
    }
}

// ============================================================================
// Fixed-width field helpers
// ============================================================================

/// Accumulates a fixed-width big-endian field across `NeedMore` boundaries.
#[derive(Default)]
pub struct Fixed {
    bytes: [u8; 8],
    have: usize,
}

impl Fixed {
    fn read_array<const N: usize>(&mut self, buf: &mut Buffer) -> Option<[u8; N]> {
        while self.have < N {
            let got = buf.take(&mut self.bytes[self.have..N]);
            if got == 0 {
                return None;
            }
            self.have += got;
        }
        self.have = 0;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[..N]);
        Some(out)
    }

    pub fn read_u8(&mut self, buf: &mut Buffer) -> Option<u8> {
        self.read_array::<1>(buf).map(|b| b[0])
    }

    pub fn read_i8(&mut self, buf: &mut Buffer) -> Option<i8> {
        self.read_array::<1>(buf).map(i8::from_be_bytes)
    }

    pub fn read_i16(&mut self, buf: &mut Buffer) -> Option<i16> {
        self.read_array::<2>(buf).map(i16::from_be_bytes)
    }

    pub fn read_u16(&mut self, buf: &mut Buffer) -> Option<u16> {
        self.read_array::<2>(buf).map(u16::from_be_bytes)
    }

    pub fn read_i32(&mut self, buf: &mut Buffer) -> Option<i32> {
        self.read_array::<4>(buf).map(i32::from_be_bytes)
    }

    pub fn read_u32(&mut self, buf: &mut Buffer) -> Option<u32> {
        self.read_array::<4>(buf).map(u32::from_be_bytes)
    }

    pub fn read_i64(&mut self, buf: &mut Buffer) -> Option<i64> {
        self.read_array::<8>(buf).map(i64::from_be_bytes)
    }

    pub fn read_f64(&mut self, buf: &mut Buffer) -> Option<f64> {
        self.read_array::<8>(buf).map(f64::from_be_bytes)
    }
}

/// Writes a byte run across `NeedMore` boundaries.
///
/// The caller must pass the same `src` on every call until `put` returns true.
#[derive(Default)]
pub struct Emit {
    written: usize,
}

impl Emit {
    pub fn put(&mut self, buf: &mut Buffer, src: &[u8]) -> bool {
        self.written += buf.put(&src[self.written..]);
        if self.written == src.len() {
            self.written = 0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_check_nested_values() {
        let limits = Limits {
            max_blob_len: 3,
            max_list_len: 2,
        };
        assert!(limits.check(&Value::Str("abc".into())).is_ok());
        assert!(limits.check(&Value::I64(i64::MAX)).is_ok());
        assert!(matches!(
            limits.check(&Value::Bytes(vec![0; 4])),
            Err(RopError::LimitExceeded { len: 4, max: 3 })
        ));
        assert!(matches!(
            limits.check(&Value::List(vec![Value::Unit; 3])),
            Err(RopError::LimitExceeded { len: 3, max: 2 })
        ));
        let nested = Value::List(vec![Value::Optional(Some(Box::new(Value::Str(
            "long".into(),
        ))))]);
        assert!(matches!(
            limits.check(&nested),
            Err(RopError::LimitExceeded { len: 4, max: 3 })
        ));
    }

    #[test]
    fn test_clip_keeps_char_boundary() {
        assert_eq!(clip("short".into(), 16), "short");
        assert_eq!(clip("abcdef".into(), 4), "abcd");
        assert_eq!(clip("h\u{e9}llo".into(), 2), "h");
    }

    #[test]
    fn test_fixed_resumes_mid_field() {
        let mut fixed = Fixed::default();
        let mut buf = Buffer::new();
        buf.extend(&[0x12, 0x34]);
        assert_eq!(fixed.read_i32(&mut buf), None);
        buf.extend(&[0x56]);
        assert_eq!(fixed.read_i32(&mut buf), None);
        buf.extend(&[0x78, 0xFF]);
        assert_eq!(fixed.read_i32(&mut buf), Some(0x1234_5678));
        assert_eq!(fixed.read_u8(&mut buf), Some(0xFF));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_fixed_big_endian_signed() {
        let mut fixed = Fixed::default();
        let mut buf = Buffer::new();
        buf.extend(&(-7i32).to_be_bytes());
        buf.extend(&(-2i16).to_be_bytes());
        assert_eq!(fixed.read_i32(&mut buf), Some(-7));
        assert_eq!(fixed.read_i16(&mut buf), Some(-2));
    }

    #[test]
    fn test_emit_resumes() {
        let mut emit = Emit::default();
        let mut buf = Buffer::with_limit(3);
        let src = [1u8, 2, 3, 4, 5];
        assert!(!emit.put(&mut buf, &src));
        assert_eq!(buf.chunk(), &[1, 2, 3]);
        buf.consume(3);
        assert!(emit.put(&mut buf, &src));
        assert_eq!(buf.chunk(), &[4, 5]);
    }

    /// Reads `count` u8 children and sums them.
    struct Sum {
        count: usize,
        seen: usize,
        total: i64,
    }

    struct Byte(Fixed, u8);

    impl Frame for Byte {
        fn resume(&mut self, io: &mut FrameIo<'_>) -> Step {
            match self.0.read_u8(io.buf) {
                Some(b) => {
                    self.1 = b;
                    Step::Complete
                }
                None => Step::NeedMore,
            }
        }

        fn finish(&mut self) -> Value {
            Value::I8(self.1 as i8)
        }
    }

    impl Frame for Sum {
        fn resume(&mut self, _io: &mut FrameIo<'_>) -> Step {
            if self.seen < self.count {
                Step::Push(Box::new(Byte(Fixed::default(), 0)))
            } else {
                Step::Complete
            }
        }

        fn accept(&mut self, value: Value) {
            if let Value::I8(b) = value {
                self.total += i64::from(b);
            }
            self.seen += 1;
        }
    }

    #[test]
    fn test_continuation_suspends_child() {
        let mut registry = Registry::detached();
        let mut buf = Buffer::new();
        let mut root = Sum {
            count: 3,
            seen: 0,
            total: 0,
        };
        let mut cont = Continuation::new();

        buf.extend(&[1]);
        let mut io = FrameIo {
            buf: &mut buf,
            registry: &mut registry,
            limits: Limits::default(),
            returns: None,
        };
        assert_eq!(cont.drive(&mut root, &mut io), FrameState::NeedMore);
        assert_eq!(cont.depth(), 1);

        io.buf.extend(&[2, 3]);
        assert_eq!(cont.drive(&mut root, &mut io), FrameState::Complete);
        assert_eq!(cont.depth(), 0);
        assert_eq!(root.total, 6);
    }
}
