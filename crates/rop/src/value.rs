// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire shapes and the dynamic values they carry.

use crate::object::{Interface, ObjectRef, Servant, OPAQUE};
use std::sync::Arc;

/// Layout of one argument or result on the wire.
#[derive(Debug, Clone, Copy)]
pub enum Shape {
    /// Zero bytes
    Unit,
    /// One byte, 0 or 1
    Bool,
    I8,
    I16,
    I32,
    I64,
    F64,
    /// u32 length then UTF-8 bytes
    Str,
    /// u32 length then raw bytes
    Bytes,
    /// Object reference field (presence byte, then id)
    Object(&'static Interface),
    /// u32 count then elements
    List(&'static Shape),
    /// Presence byte, then the value when present
    Optional(&'static Shape),
}

impl Shape {
    /// Check whether `value` can be encoded with this shape.
    pub fn admits(&self, value: &Value) -> bool {
        match (self, value) {
            (Shape::Unit, Value::Unit)
            | (Shape::Bool, Value::Bool(_))
            | (Shape::I8, Value::I8(_))
            | (Shape::I16, Value::I16(_))
            | (Shape::I32, Value::I32(_))
            | (Shape::I64, Value::I64(_))
            | (Shape::F64, Value::F64(_))
            | (Shape::Str, Value::Str(_))
            | (Shape::Bytes, Value::Bytes(_)) => true,
            (Shape::Object(_), Value::Object(None)) => true,
            (Shape::Object(iface), Value::Object(Some(obj))) => {
                std::ptr::eq(*iface, &OPAQUE)
                    || std::ptr::eq(obj.interface(), &OPAQUE)
                    || obj.interface().name == iface.name
            }
            (Shape::List(elem), Value::List(items)) => items.iter().all(|v| elem.admits(v)),
            (Shape::Optional(_), Value::Optional(None)) => true,
            (Shape::Optional(inner), Value::Optional(Some(v))) => inner.admits(v),
            _ => false,
        }
    }

    /// Short human-readable name, used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Shape::Unit => "unit".into(),
            Shape::Bool => "bool".into(),
            Shape::I8 => "i8".into(),
            Shape::I16 => "i16".into(),
            Shape::I32 => "i32".into(),
            Shape::I64 => "i64".into(),
            Shape::F64 => "f64".into(),
            Shape::Str => "str".into(),
            Shape::Bytes => "bytes".into(),
            Shape::Object(iface) => format!("object<{}>", iface.name),
            Shape::List(elem) => format!("list<{}>", elem.describe()),
            Shape::Optional(inner) => format!("optional<{}>", inner.describe()),
        }
    }
}

/// A dynamically typed argument or result.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unit,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    Object(Option<ObjectRef>),
    List(Vec<Value>),
    Optional(Option<Box<Value>>),
}

impl Value {
    /// Wrap a local servant as an object value.
    pub fn object(servant: Arc<dyn Servant>) -> Self {
        Value::Object(Some(ObjectRef::Local(servant)))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Object reference, `None` for null or non-object values.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => obj.as_ref(),
            _ => None,
        }
    }

    /// Take the object reference out of the value.
    pub fn into_object(self) -> Option<ObjectRef> {
        match self {
            Value::Object(obj) => obj,
            _ => None,
        }
    }

    /// Visit every object reference nested in this value.
    pub fn for_each_object(&self, f: &mut dyn FnMut(&ObjectRef)) {
        match self {
            Value::Object(Some(obj)) => f(obj),
            Value::List(items) => {
                for item in items {
                    item.for_each_object(f);
                }
            }
            Value::Optional(Some(inner)) => inner.for_each_object(f),
            _ => {}
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static POINT: Interface = Interface {
        name: "point",
        methods: &[],
    };

    #[test]
    fn test_admits_scalars() {
        assert!(Shape::I32.admits(&Value::I32(1)));
        assert!(!Shape::I32.admits(&Value::I64(1)));
        assert!(Shape::Unit.admits(&Value::Unit));
        assert!(!Shape::Str.admits(&Value::Bytes(vec![])));
    }

    #[test]
    fn test_admits_composites() {
        static INTS: Shape = Shape::I32;
        let list = Shape::List(&INTS);
        assert!(list.admits(&Value::List(vec![Value::I32(1), Value::I32(2)])));
        assert!(!list.admits(&Value::List(vec![Value::I32(1), Value::Bool(true)])));

        let opt = Shape::Optional(&INTS);
        assert!(opt.admits(&Value::Optional(None)));
        assert!(opt.admits(&Value::Optional(Some(Box::new(Value::I32(3))))));
        assert!(!opt.admits(&Value::I32(3)));

        assert!(Shape::Object(&POINT).admits(&Value::Object(None)));
    }

    #[test]
    fn test_describe() {
        static STRS: Shape = Shape::Str;
        assert_eq!(Shape::List(&STRS).describe(), "list<str>");
        assert_eq!(Shape::Object(&POINT).describe(), "object<point>");
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::from(5).as_i32(), Some(5));
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::I32(5).as_str(), None);
        assert!(Value::Object(None).into_object().is_none());
    }
}
