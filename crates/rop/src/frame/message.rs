// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request and Return frames.
//!
//! A [`MessageReader`] is the root frame of every inbound message on a port;
//! the 4-byte port id in front of it is consumed by the connection before
//! the reader is selected. A [`MessageWriter`] emits the port id itself.

use super::codec::{reader_for, writer_for};
use super::{AbortReason, Emit, Fixed, Frame, FrameIo, Step};
use crate::error::{FaultCode, RopError, RopResult};
use crate::object::{Method, Servant};
use crate::port::Expected;
use crate::value::{Shape, Value};
use crate::wire::{flip, is_oneway, is_request, is_return, HEAD_RETURN, PORT_ID_LEN};
use std::sync::Arc;

static FAULT_MESSAGE: Shape = Shape::Str;

/// A request decoded and resolved against the local skeleton table.
pub struct InboundRequest {
    pub head: u8,
    /// Local skeleton id
    pub target: i32,
    pub method_index: u16,
    pub method: &'static Method,
    pub servant: Arc<dyn Servant>,
    pub args: Vec<Value>,
}

impl InboundRequest {
    pub fn is_oneway(&self) -> bool {
        is_oneway(self.head)
    }
}

/// A fully decoded inbound message.
pub enum Inbound {
    Request(InboundRequest),
    Return {
        ticket: u64,
        outcome: RopResult<Value>,
    },
}

enum ReadStage {
    Head,
    Target,
    Method,
    Args,
    Variant,
    Payload,
}

/// Root decoder for one inbound message.
pub struct MessageReader {
    stage: ReadStage,
    fixed: Fixed,
    head: u8,
    target: i32,
    method_index: u16,
    resolved: Option<(Arc<dyn Servant>, &'static Method)>,
    args: Vec<Value>,
    expected: Option<Expected>,
    variant: i32,
    payload: Option<Value>,
}

impl MessageReader {
    pub fn new() -> Self {
        Self {
            stage: ReadStage::Head,
            fixed: Fixed::default(),
            head: 0,
            target: 0,
            method_index: 0,
            resolved: None,
            args: Vec::new(),
            expected: None,
            variant: 0,
            payload: None,
        }
    }

    /// True once a request head that expects a Return has been read.
    pub fn awaits_reply(&self) -> bool {
        !matches!(self.stage, ReadStage::Head) && is_request(self.head) && !is_oneway(self.head)
    }

    /// Decoded message; `None` unless the frame completed.
    pub fn into_inbound(self) -> Option<Inbound> {
        if let Some(expected) = self.expected {
            let payload = self.payload?;
            let outcome = match self.variant {
                0 => Ok(payload),
                v if v > 0 => Err(RopError::Remote {
                    variant: v as u32,
                    payload,
                }),
                v => Err(RopError::Fault {
                    code: FaultCode::from_discriminant(v),
                    message: payload.as_str().unwrap_or_default().to_string(),
                }),
            };
            return Some(Inbound::Return {
                ticket: expected.ticket,
                outcome,
            });
        }
        let (servant, method) = self.resolved?;
        if self.args.len() != method.args.len() {
            return None;
        }
        Some(Inbound::Request(InboundRequest {
            head: self.head,
            target: self.target,
            method_index: self.method_index,
            method,
            servant,
            args: self.args,
        }))
    }
}

impl Default for MessageReader {
    fn default() -> Self {
        Self::new()
    }
}

impl Frame for MessageReader {
    fn resume(&mut self, io: &mut FrameIo<'_>) -> Step {
        loop {
            match self.stage {
                ReadStage::Head => {
                    let head = match self.fixed.read_u8(io.buf) {
                        Some(h) => h,
                        None => return Step::NeedMore,
                    };
                    self.head = head;
                    if is_return(head) {
                        // Matched on arrival: the oldest expectation of the
                        // innermost level is the one this Return answers.
                        match io.returns.as_mut().and_then(|q| q.claim()) {
                            Some(expected) => self.expected = Some(expected),
                            None => return Step::Aborted(AbortReason::UnexpectedReturn),
                        }
                        self.stage = ReadStage::Variant;
                    } else if is_request(head) {
                        self.stage = ReadStage::Target;
                    } else {
                        return Step::Aborted(AbortReason::InvalidHead);
                    }
                }
                ReadStage::Target => {
                    let wire_id = match self.fixed.read_i32(io.buf) {
                        Some(id) => id,
                        None => return Step::NeedMore,
                    };
                    self.target = flip(wire_id);
                    self.stage = ReadStage::Method;
                }
                ReadStage::Method => {
                    let index = match self.fixed.read_u16(io.buf) {
                        Some(i) => i,
                        None => return Step::NeedMore,
                    };
                    self.method_index = index;
                    let servant = match io.registry.skeleton(self.target) {
                        Some(s) => s,
                        None => return Step::Aborted(AbortReason::UnknownObject),
                    };
                    let method = match servant.interface().method(index) {
                        Some(m) => m,
                        None => return Step::Aborted(AbortReason::UnknownMethod),
                    };
                    self.args.reserve(method.args.len());
                    self.resolved = Some((servant, method));
                    self.stage = ReadStage::Args;
                }
                ReadStage::Args => {
                    let method = match &self.resolved {
                        Some((_, m)) => *m,
                        None => return Step::Aborted(AbortReason::UnknownMethod),
                    };
                    return match method.args.get(self.args.len()) {
                        Some(shape) => Step::Push(reader_for(shape, io.limits)),
                        None => Step::Complete,
                    };
                }
                ReadStage::Variant => {
                    let variant = match self.fixed.read_i32(io.buf) {
                        Some(v) => v,
                        None => return Step::NeedMore,
                    };
                    self.variant = variant;
                    let shape = if variant < 0 {
                        &FAULT_MESSAGE
                    } else {
                        let results = self.expected.as_ref().map(|e| e.results).unwrap_or(&[]);
                        match results.get(variant as usize) {
                            Some(shape) => shape,
                            None => return Step::Aborted(AbortReason::BadVariant),
                        }
                    };
                    self.stage = ReadStage::Payload;
                    return Step::Push(reader_for(shape, io.limits));
                }
                ReadStage::Payload => return Step::Complete,
            }
        }
    }

    fn accept(&mut self, value: Value) {
        match self.stage {
            ReadStage::Args => self.args.push(value),
            _ => self.payload = Some(value),
        }
    }
}

/// Message to be encoded.
pub enum Outbound {
    Request {
        head: u8,
        /// Target in the sender's numbering (remote handle id or 0)
        target: i32,
        method: u16,
        args: Vec<Value>,
    },
    Return {
        variant: i32,
        payload: Value,
    },
}

/// Root encoder for one outbound message, port id prefix included.
pub struct MessageWriter {
    header: [u8; 11],
    header_len: usize,
    header_done: bool,
    values: std::vec::IntoIter<Value>,
    emit: Emit,
}

impl MessageWriter {
    /// `port` is the sender's local port id.
    pub fn new(port: i32, message: Outbound) -> Self {
        let mut header = [0u8; 11];
        header[..PORT_ID_LEN].copy_from_slice(&port.to_be_bytes());
        let (header_len, values) = match message {
            Outbound::Request {
                head,
                target,
                method,
                args,
            } => {
                header[4] = head;
                header[5..9].copy_from_slice(&target.to_be_bytes());
                header[9..11].copy_from_slice(&method.to_be_bytes());
                (11, args)
            }
            Outbound::Return { variant, payload } => {
                header[4] = HEAD_RETURN;
                header[5..9].copy_from_slice(&variant.to_be_bytes());
                (9, vec![payload])
            }
        };
        Self {
            header,
            header_len,
            header_done: false,
            values: values.into_iter(),
            emit: Emit::default(),
        }
    }
}

impl Frame for MessageWriter {
    fn resume(&mut self, io: &mut FrameIo<'_>) -> Step {
        if !self.header_done {
            if !self.emit.put(io.buf, &self.header[..self.header_len]) {
                return Step::NeedMore;
            }
            self.header_done = true;
        }
        match self.values.next() {
            Some(value) => Step::Push(writer_for(value)),
            None => Step::Complete,
        }
    }
}
