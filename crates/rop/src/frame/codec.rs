// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frames for scalar, blob, list and optional values.

use super::object::{ObjectReader, ObjectWriter};
use super::{AbortReason, Emit, Fixed, Frame, FrameIo, Limits, Step};
use crate::value::{Shape, Value};

/// Decoder for one value of `shape`.
pub fn reader_for(shape: &'static Shape, limits: Limits) -> Box<dyn Frame> {
    match shape {
        Shape::Str | Shape::Bytes => Box::new(BlobReader::new(matches!(shape, Shape::Str))),
        Shape::List(elem) => Box::new(ListReader::new(*elem, limits)),
        Shape::Optional(inner) => Box::new(OptionalReader::new(*inner, limits)),
        Shape::Object(iface) => Box::new(ObjectReader::new(*iface)),
        scalar => Box::new(ScalarReader::new(*scalar)),
    }
}

/// Encoder for `value`.
pub fn writer_for(value: Value) -> Box<dyn Frame> {
    match value {
        Value::Str(s) => Box::new(BlobWriter::new(s.into_bytes())),
        Value::Bytes(b) => Box::new(BlobWriter::new(b)),
        Value::List(items) => Box::new(ListWriter::new(items)),
        Value::Optional(inner) => Box::new(OptionalWriter::new(inner.map(|v| *v))),
        Value::Object(obj) => Box::new(ObjectWriter::new(obj)),
        scalar => Box::new(ScalarWriter::new(&scalar)),
    }
}

// ============================================================================
// Scalars
// ============================================================================

struct ScalarReader {
    shape: Shape,
    fixed: Fixed,
    value: Value,
}

impl ScalarReader {
    fn new(shape: Shape) -> Self {
        Self {
            shape,
            fixed: Fixed::default(),
            value: Value::Unit,
        }
    }
}

impl Frame for ScalarReader {
    fn resume(&mut self, io: &mut FrameIo<'_>) -> Step {
        let buf = &mut *io.buf;
        let value = match self.shape {
            Shape::Unit => Some(Value::Unit),
            Shape::Bool => match self.fixed.read_u8(buf) {
                Some(0) => Some(Value::Bool(false)),
                Some(1) => Some(Value::Bool(true)),
                Some(_) => return Step::Aborted(AbortReason::BadBool),
                None => None,
            },
            Shape::I8 => self.fixed.read_i8(buf).map(Value::I8),
            Shape::I16 => self.fixed.read_i16(buf).map(Value::I16),
            Shape::I32 => self.fixed.read_i32(buf).map(Value::I32),
            Shape::I64 => self.fixed.read_i64(buf).map(Value::I64),
            Shape::F64 => self.fixed.read_f64(buf).map(Value::F64),
            // composite shapes are routed elsewhere by reader_for
            _ => return Step::Aborted(AbortReason::InvalidHead),
        };
        match value {
            Some(v) => {
                self.value = v;
                Step::Complete
            }
            None => Step::NeedMore,
        }
    }

    fn finish(&mut self) -> Value {
        std::mem::replace(&mut self.value, Value::Unit)
    }
}

struct ScalarWriter {
    bytes: [u8; 8],
    len: usize,
    emit: Emit,
}

impl ScalarWriter {
    fn new(value: &Value) -> Self {
        let mut bytes = [0u8; 8];
        let len = match value {
            Value::Bool(v) => {
                bytes[0] = u8::from(*v);
                1
            }
            Value::I8(v) => {
                bytes[..1].copy_from_slice(&v.to_be_bytes());
                1
            }
            Value::I16(v) => {
                bytes[..2].copy_from_slice(&v.to_be_bytes());
                2
            }
            Value::I32(v) => {
                bytes[..4].copy_from_slice(&v.to_be_bytes());
                4
            }
            Value::I64(v) => {
                bytes.copy_from_slice(&v.to_be_bytes());
                8
            }
            Value::F64(v) => {
                bytes.copy_from_slice(&v.to_be_bytes());
                8
            }
            _ => 0,
        };
        Self {
            bytes,
            len,
            emit: Emit::default(),
        }
    }
}

impl Frame for ScalarWriter {
    fn resume(&mut self, io: &mut FrameIo<'_>) -> Step {
        if self.emit.put(io.buf, &self.bytes[..self.len]) {
            Step::Complete
        } else {
            Step::NeedMore
        }
    }
}

// ============================================================================
// Strings and byte blobs
// ============================================================================

struct BlobReader {
    text: bool,
    fixed: Fixed,
    len: Option<u32>,
    data: Vec<u8>,
    value: Value,
}

impl BlobReader {
    fn new(text: bool) -> Self {
        Self {
            text,
            fixed: Fixed::default(),
            len: None,
            data: Vec::new(),
            value: Value::Unit,
        }
    }
}

impl Frame for BlobReader {
    fn resume(&mut self, io: &mut FrameIo<'_>) -> Step {
        let len = match self.len {
            Some(len) => len,
            None => match self.fixed.read_u32(io.buf) {
                Some(len) if len > io.limits.max_blob_len => {
                    return Step::Aborted(AbortReason::TooLong {
                        len,
                        max: io.limits.max_blob_len,
                    })
                }
                Some(len) => {
                    self.data.reserve(len.min(64 * 1024) as usize);
                    self.len = Some(len);
                    len
                }
                None => return Step::NeedMore,
            },
        };

        let want = len as usize - self.data.len();
        let avail = want.min(io.buf.len());
        self.data.extend_from_slice(&io.buf.chunk()[..avail]);
        io.buf.consume(avail);
        if self.data.len() < len as usize {
            return Step::NeedMore;
        }

        let data = std::mem::take(&mut self.data);
        self.value = if self.text {
            match String::from_utf8(data) {
                Ok(s) => Value::Str(s),
                Err(_) => return Step::Aborted(AbortReason::InvalidUtf8),
            }
        } else {
            Value::Bytes(data)
        };
        Step::Complete
    }

    fn finish(&mut self) -> Value {
        std::mem::replace(&mut self.value, Value::Unit)
    }
}

/// Big-endian length prefix, refused when `len` does not fit `max`.
fn length_header(len: usize, max: u32) -> Result<[u8; 4], AbortReason> {
    match u32::try_from(len) {
        Ok(n) if n <= max => Ok(n.to_be_bytes()),
        Ok(n) => Err(AbortReason::TooLong { len: n, max }),
        Err(_) => Err(AbortReason::TooLong { len: u32::MAX, max }),
    }
}

struct BlobWriter {
    header: Option<[u8; 4]>,
    data: Vec<u8>,
    header_done: bool,
    emit: Emit,
}

impl BlobWriter {
    fn new(data: Vec<u8>) -> Self {
        Self {
            header: None,
            data,
            header_done: false,
            emit: Emit::default(),
        }
    }
}

impl Frame for BlobWriter {
    fn resume(&mut self, io: &mut FrameIo<'_>) -> Step {
        if !self.header_done {
            let header = match self.header {
                Some(header) => header,
                None => match length_header(self.data.len(), io.limits.max_blob_len) {
                    Ok(header) => *self.header.insert(header),
                    Err(reason) => return Step::Aborted(reason),
                },
            };
            if !self.emit.put(io.buf, &header) {
                return Step::NeedMore;
            }
            self.header_done = true;
        }
        if self.emit.put(io.buf, &self.data) {
            Step::Complete
        } else {
            Step::NeedMore
        }
    }
}

// ============================================================================
// Lists
// ============================================================================

struct ListReader {
    elem: &'static Shape,
    limits: Limits,
    fixed: Fixed,
    count: Option<u32>,
    items: Vec<Value>,
}

impl ListReader {
    fn new(elem: &'static Shape, limits: Limits) -> Self {
        Self {
            elem,
            limits,
            fixed: Fixed::default(),
            count: None,
            items: Vec::new(),
        }
    }
}

impl Frame for ListReader {
    fn resume(&mut self, io: &mut FrameIo<'_>) -> Step {
        let count = match self.count {
            Some(count) => count,
            None => match self.fixed.read_u32(io.buf) {
                Some(count) if count > self.limits.max_list_len => {
                    return Step::Aborted(AbortReason::TooLong {
                        len: count,
                        max: self.limits.max_list_len,
                    })
                }
                Some(count) => {
                    self.items.reserve(count.min(1024) as usize);
                    self.count = Some(count);
                    count
                }
                None => return Step::NeedMore,
            },
        };
        if self.items.len() < count as usize {
            Step::Push(reader_for(self.elem, self.limits))
        } else {
            Step::Complete
        }
    }

    fn accept(&mut self, value: Value) {
        self.items.push(value);
    }

    fn finish(&mut self) -> Value {
        Value::List(std::mem::take(&mut self.items))
    }
}

struct ListWriter {
    count: usize,
    header: Option<[u8; 4]>,
    header_done: bool,
    items: std::vec::IntoIter<Value>,
    emit: Emit,
}

impl ListWriter {
    fn new(items: Vec<Value>) -> Self {
        Self {
            count: items.len(),
            header: None,
            header_done: false,
            items: items.into_iter(),
            emit: Emit::default(),
        }
    }
}

impl Frame for ListWriter {
    fn resume(&mut self, io: &mut FrameIo<'_>) -> Step {
        if !self.header_done {
            let header = match self.header {
                Some(header) => header,
                None => match length_header(self.count, io.limits.max_list_len) {
                    Ok(header) => *self.header.insert(header),
                    Err(reason) => return Step::Aborted(reason),
                },
            };
            if !self.emit.put(io.buf, &header) {
                return Step::NeedMore;
            }
            self.header_done = true;
        }
        match self.items.next() {
            Some(item) => Step::Push(writer_for(item)),
            None => Step::Complete,
        }
    }
}

// ============================================================================
// Optional values
// ============================================================================

struct OptionalReader {
    inner: &'static Shape,
    limits: Limits,
    fixed: Fixed,
    present: Option<bool>,
    pushed: bool,
    value: Option<Value>,
}

impl OptionalReader {
    fn new(inner: &'static Shape, limits: Limits) -> Self {
        Self {
            inner,
            limits,
            fixed: Fixed::default(),
            present: None,
            pushed: false,
            value: None,
        }
    }
}

impl Frame for OptionalReader {
    fn resume(&mut self, io: &mut FrameIo<'_>) -> Step {
        let present = match self.present {
            Some(p) => p,
            None => match self.fixed.read_u8(io.buf) {
                Some(0) => false,
                Some(1) => true,
                Some(_) => return Step::Aborted(AbortReason::BadPresence),
                None => return Step::NeedMore,
            },
        };
        self.present = Some(present);
        if present && !self.pushed {
            self.pushed = true;
            return Step::Push(reader_for(self.inner, self.limits));
        }
        Step::Complete
    }

    fn accept(&mut self, value: Value) {
        self.value = Some(value);
    }

    fn finish(&mut self) -> Value {
        Value::Optional(self.value.take().map(Box::new))
    }
}

struct OptionalWriter {
    presence: [u8; 1],
    inner: Option<Value>,
    presence_done: bool,
    emit: Emit,
}

impl OptionalWriter {
    fn new(inner: Option<Value>) -> Self {
        Self {
            presence: [u8::from(inner.is_some())],
            inner,
            presence_done: false,
            emit: Emit::default(),
        }
    }
}

impl Frame for OptionalWriter {
    fn resume(&mut self, io: &mut FrameIo<'_>) -> Step {
        if !self.presence_done {
            if !self.emit.put(io.buf, &self.presence) {
                return Step::NeedMore;
            }
            self.presence_done = true;
        }
        match self.inner.take() {
            Some(value) => Step::Push(writer_for(value)),
            None => Step::Complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Continuation, FrameState};
    use crate::registry::Registry;
    use crate::wire::Buffer;

    static STR: Shape = Shape::Str;
    static I16: Shape = Shape::I16;
    static LIST_OF_STR: Shape = Shape::List(&STR);
    static OPT_I16: Shape = Shape::Optional(&I16);
    static NESTED: Shape = Shape::List(&OPT_I16);

    fn encode(value: Value, limit: usize) -> Vec<u8> {
        match encode_within(value, limit, Limits::default()) {
            Ok(bytes) => bytes,
            Err(reason) => panic!("encode aborted: {}", reason),
        }
    }

    fn encode_within(value: Value, limit: usize, limits: Limits) -> Result<Vec<u8>, AbortReason> {
        let mut registry = Registry::detached();
        let mut buf = Buffer::with_limit(limit);
        let mut out = Vec::new();
        let mut root = writer_for(value);
        let mut cont = Continuation::new();
        loop {
            let mut io = FrameIo {
                buf: &mut buf,
                registry: &mut registry,
                limits,
                returns: None,
            };
            let state = cont.drive(root.as_mut(), &mut io);
            out.extend_from_slice(buf.chunk());
            buf.clear();
            match state {
                FrameState::Complete => return Ok(out),
                FrameState::NeedMore => continue,
                FrameState::Aborted(reason) => return Err(reason),
            }
        }
    }

    fn decode(shape: &'static Shape, bytes: &[u8], limits: Limits) -> Result<Value, AbortReason> {
        let mut registry = Registry::detached();
        let mut buf = Buffer::new();
        let mut root = reader_for(shape, limits);
        let mut cont = Continuation::new();
        for byte in bytes {
            buf.extend(std::slice::from_ref(byte));
            let mut io = FrameIo {
                buf: &mut buf,
                registry: &mut registry,
                limits,
                returns: None,
            };
            match cont.drive(root.as_mut(), &mut io) {
                FrameState::Complete => return Ok(root.finish()),
                FrameState::NeedMore => {}
                FrameState::Aborted(reason) => return Err(reason),
            }
        }
        panic!("ran out of bytes");
    }

    #[test]
    fn test_scalar_layout_is_big_endian() {
        assert_eq!(encode(Value::I32(0x0102_0304), 64), vec![1, 2, 3, 4]);
        assert_eq!(encode(Value::I16(-2), 64), vec![0xFF, 0xFE]);
        assert_eq!(encode(Value::Bool(true), 64), vec![1]);
        assert!(encode(Value::Unit, 64).is_empty());
    }

    #[test]
    fn test_string_layout() {
        assert_eq!(
            encode(Value::Str("hi".into()), 64),
            vec![0, 0, 0, 2, b'h', b'i']
        );
    }

    #[test]
    fn test_nested_list_byte_at_a_time() {
        let value = Value::List(vec![
            Value::Optional(Some(Box::new(Value::I16(7)))),
            Value::Optional(None),
            Value::Optional(Some(Box::new(Value::I16(-300)))),
        ]);
        let bytes = encode(value.clone(), 3);
        assert_eq!(bytes, encode(value.clone(), 1024));
        assert_eq!(decode(&NESTED, &bytes, Limits::default()), Ok(value));
    }

    #[test]
    fn test_list_of_strings() {
        let value = Value::List(vec![Value::Str("alpha".into()), Value::Str(String::new())]);
        let bytes = encode(value.clone(), 5);
        assert_eq!(decode(&LIST_OF_STR, &bytes, Limits::default()), Ok(value));
    }

    #[test]
    fn test_blob_limit() {
        let bytes = encode(Value::Str("too long".into()), 64);
        let limits = Limits {
            max_blob_len: 4,
            ..Limits::default()
        };
        assert_eq!(
            decode(&STR, &bytes, limits),
            Err(AbortReason::TooLong { len: 8, max: 4 })
        );
    }

    #[test]
    fn test_writer_refuses_oversized_lengths() {
        let limits = Limits {
            max_blob_len: 4,
            max_list_len: 2,
        };
        assert_eq!(
            encode_within(Value::Bytes(vec![0; 5]), 64, limits),
            Err(AbortReason::TooLong { len: 5, max: 4 })
        );
        assert_eq!(
            encode_within(Value::List(vec![Value::Unit; 3]), 64, limits),
            Err(AbortReason::TooLong { len: 3, max: 2 })
        );
        assert_eq!(
            encode_within(Value::Str("four".into()), 64, limits),
            Ok(vec![0, 0, 0, 4, b'f', b'o', b'u', b'r'])
        );
        if usize::BITS > 32 {
            assert_eq!(
                length_header(usize::MAX, u32::MAX),
                Err(AbortReason::TooLong {
                    len: u32::MAX,
                    max: u32::MAX
                })
            );
        }
    }

    #[test]
    fn test_invalid_utf8_aborts() {
        let bytes = [0, 0, 0, 2, 0xC3, 0x28];
        assert_eq!(
            decode(&STR, &bytes, Limits::default()),
            Err(AbortReason::InvalidUtf8)
        );
    }

    #[test]
    fn test_bad_presence_and_bool() {
        assert_eq!(
            decode(&OPT_I16, &[2], Limits::default()),
            Err(AbortReason::BadPresence)
        );
        static BOOL: Shape = Shape::Bool;
        assert_eq!(decode(&BOOL, &[9], Limits::default()), Err(AbortReason::BadBool));
    }
}
