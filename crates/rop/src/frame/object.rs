// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Object-reference frames.
//!
//! `[present: u8][id: i32 if present]`. The id is written in the sender's
//! numbering. After negation by the receiver a positive id names one of the
//! receiver's skeletons and a negative id names an object the sender owns.

use super::{AbortReason, Emit, Fixed, Frame, FrameIo, Step};
use crate::object::{Interface, ObjectRef};
use crate::value::Value;
use crate::wire::flip;

pub struct ObjectReader {
    interface: &'static Interface,
    fixed: Fixed,
    present: Option<bool>,
    value: Option<ObjectRef>,
}

impl ObjectReader {
    pub fn new(interface: &'static Interface) -> Self {
        Self {
            interface,
            fixed: Fixed::default(),
            present: None,
            value: None,
        }
    }
}

impl Frame for ObjectReader {
    fn resume(&mut self, io: &mut FrameIo<'_>) -> Step {
        if self.present.is_none() {
            match self.fixed.read_u8(io.buf) {
                Some(0) => {
                    self.present = Some(false);
                    return Step::Complete;
                }
                Some(1) => self.present = Some(true),
                Some(_) => return Step::Aborted(AbortReason::BadPresence),
                None => return Step::NeedMore,
            }
        }
        if self.present == Some(false) {
            return Step::Complete;
        }

        let wire_id = match self.fixed.read_i32(io.buf) {
            Some(id) => id,
            None => return Step::NeedMore,
        };
        let id = flip(wire_id);
        if id > 0 {
            match io.registry.skeleton(id) {
                Some(servant) => self.value = Some(ObjectRef::Local(servant)),
                None => return Step::Aborted(AbortReason::UnknownObject),
            }
        } else if id < 0 {
            let stub = io.registry.remote_for(id, self.interface);
            self.value = Some(ObjectRef::Remote(stub));
        } else {
            return Step::Aborted(AbortReason::BadObjectId);
        }
        Step::Complete
    }

    fn finish(&mut self) -> Value {
        Value::Object(self.value.take())
    }
}

pub struct ObjectWriter {
    target: Option<ObjectRef>,
    bytes: [u8; 5],
    len: usize,
    resolved: bool,
    emit: Emit,
}

impl ObjectWriter {
    pub fn new(target: Option<ObjectRef>) -> Self {
        Self {
            target,
            bytes: [0u8; 5],
            len: 0,
            resolved: false,
            emit: Emit::default(),
        }
    }
}

impl Frame for ObjectWriter {
    fn resume(&mut self, io: &mut FrameIo<'_>) -> Step {
        if !self.resolved {
            // Resolved once: exporting bumps the skeleton's export count.
            let id = match self.target.take() {
                None => None,
                Some(ObjectRef::Local(servant)) => Some(io.registry.export(&servant)),
                Some(ObjectRef::Remote(stub)) => {
                    if !io.registry.owns(stub.handle()) {
                        return Step::Aborted(AbortReason::ForeignObject);
                    }
                    Some(stub.id())
                }
            };
            match id {
                Some(id) => {
                    self.bytes[0] = 1;
                    self.bytes[1..].copy_from_slice(&id.to_be_bytes());
                    self.len = 5;
                }
                None => self.len = 1,
            }
            self.resolved = true;
        }
        if self.emit.put(io.buf, &self.bytes[..self.len]) {
            Step::Complete
        } else {
            Step::NeedMore
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Continuation, FrameState, Limits};
    use crate::object::{Reply, Servant};
    use crate::registry::Registry;
    use crate::value::Value;
    use crate::wire::Buffer;
    use std::sync::Arc;

    static THING: Interface = Interface {
        name: "thing",
        methods: &[],
    };

    struct Thing;

    impl Servant for Thing {
        fn interface(&self) -> &'static Interface {
            &THING
        }

        fn dispatch(&self, _method: u16, _args: Vec<Value>) -> Reply {
            Reply::unit()
        }
    }

    fn run(frame: &mut dyn Frame, registry: &mut Registry, buf: &mut Buffer) -> FrameState {
        let mut io = FrameIo {
            buf,
            registry,
            limits: Limits::default(),
            returns: None,
        };
        Continuation::new().drive(frame, &mut io)
    }

    /// Encode on `from`, decode on `to`.
    fn pass(value: Option<ObjectRef>, from: &mut Registry, to: &mut Registry) -> Option<ObjectRef> {
        let mut buf = Buffer::new();
        let mut writer = ObjectWriter::new(value);
        assert_eq!(run(&mut writer, from, &mut buf), FrameState::Complete);
        let mut reader = ObjectReader::new(&THING);
        assert_eq!(run(&mut reader, to, &mut buf), FrameState::Complete);
        assert!(buf.is_empty());
        reader.finish().into_object()
    }

    #[test]
    fn test_sign_round_trip() {
        let mut a = Registry::detached();
        let mut b = Registry::detached();
        let servant: Arc<dyn Servant> = Arc::new(Thing);

        // A exports skeleton 1; B sees remote -1.
        let on_b = pass(Some(ObjectRef::Local(Arc::clone(&servant))), &mut a, &mut b);
        let stub = match on_b {
            Some(ObjectRef::Remote(stub)) => stub,
            other => panic!("expected stub, got {:?}", other),
        };
        assert_eq!(stub.id(), -1);

        // B hands it back; A resolves its own servant.
        let back = pass(Some(ObjectRef::Remote(stub)), &mut b, &mut a);
        assert_eq!(back, Some(ObjectRef::Local(servant)));
    }

    #[test]
    fn test_null_reads_no_id() {
        let mut a = Registry::detached();
        let mut buf = Buffer::new();
        buf.extend(&[0, 0xAA]);
        let mut reader = ObjectReader::new(&THING);
        assert_eq!(run(&mut reader, &mut a, &mut buf), FrameState::Complete);
        assert_eq!(reader.finish(), Value::Object(None));
        assert_eq!(buf.chunk(), &[0xAA]);

        let mut b = Registry::detached();
        assert_eq!(pass(None, &mut a, &mut b), None);
    }

    #[test]
    fn test_unknown_skeleton_aborts() {
        let mut a = Registry::detached();
        let mut buf = Buffer::new();
        buf.extend(&[1]);
        buf.extend(&(-9i32).to_be_bytes());
        let mut reader = ObjectReader::new(&THING);
        assert_eq!(
            run(&mut reader, &mut a, &mut buf),
            FrameState::Aborted(AbortReason::UnknownObject)
        );
    }

    #[test]
    fn test_foreign_stub_rejected() {
        let mut a = Registry::detached();
        let mut b = Registry::detached();
        let mut c = Registry::detached();
        let on_b = pass(Some(ObjectRef::Local(Arc::new(Thing))), &mut a, &mut b);

        let mut buf = Buffer::new();
        let mut writer = ObjectWriter::new(on_b);
        assert_eq!(
            run(&mut writer, &mut c, &mut buf),
            FrameState::Aborted(AbortReason::ForeignObject)
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_repeated_import_shares_handle() {
        let mut a = Registry::detached();
        let mut b = Registry::detached();
        let servant: Arc<dyn Servant> = Arc::new(Thing);
        let first = pass(Some(ObjectRef::Local(Arc::clone(&servant))), &mut a, &mut b);
        let second = pass(Some(ObjectRef::Local(servant)), &mut a, &mut b);
        assert_eq!(first, second);
        assert_eq!(a.stats().skeletons, 1);
        assert_eq!(b.stats().remotes, 1);
    }
}
