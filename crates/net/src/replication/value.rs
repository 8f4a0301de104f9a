use std::borrow::Cow;
use std::fmt;

use crate::error::{DecodeError, NetError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    Bool = 0,
    Float = 1,
    Double = 2,
    String = 3,
    Int32 = 4,
    Uint32 = 5,
    Uint8 = 6,
}

impl ValueType {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ValueType {
    type Error = DecodeError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0 => ValueType::Bool,
            1 => ValueType::Float,
            2 => ValueType::Double,
            3 => ValueType::String,
            4 => ValueType::Int32,
            5 => ValueType::Uint32,
            6 => ValueType::Uint8,
            other => return Err(DecodeError::UnknownTypeTag(other)),
        })
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Bool => "bool",
            ValueType::Float => "float",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::Int32 => "int32",
            ValueType::Uint32 => "uint32",
            ValueType::Uint8 => "uint8",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Float(f32),
    Double(f64),
    String(String),
    Int32(i32),
    Uint32(u32),
    Uint8(u8),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Float(_) => ValueType::Float,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::Int32(_) => ValueType::Int32,
            Value::Uint32(_) => ValueType::Uint32,
            Value::Uint8(_) => ValueType::Uint8,
        }
    }

    pub fn assign(&mut self, other: &Value) -> Result<(), NetError> {
        let (expected, found) = (self.value_type(), other.value_type());
        if expected != found {
            return Err(NetError::TypeMismatch { expected, found });
        }
        self.clone_from(other);
        Ok(())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int32(&self) -> Option<i32> {
        match self {
            Value::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uint32(&self) -> Option<u32> {
        match self {
            Value::Uint32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uint8(&self) -> Option<u8> {
        match self {
            Value::Uint8(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Uint32(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Uint8(v)
    }
}

/// A field value tagged with its per-object field id.
///
/// Values emitted from a live object borrow its storage; values produced by
/// decoding own theirs. Writing to a borrowed value detaches it first, so the
/// object it was read from never changes through this handle.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedValue<'a> {
    id: u8,
    value: Cow<'a, Value>,
}

impl<'a> TypedValue<'a> {
    pub fn borrowed(id: u8, value: &'a Value) -> Self {
        Self {
            id,
            value: Cow::Borrowed(value),
        }
    }

    pub fn owned(id: u8, value: Value) -> Self {
        Self {
            id,
            value: Cow::Owned(value),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn value_type(&self) -> ValueType {
        self.value.value_type()
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.value, Cow::Owned(_))
    }

    pub fn into_owned(self) -> TypedValue<'static> {
        TypedValue {
            id: self.id,
            value: Cow::Owned(self.value.into_owned()),
        }
    }

    pub fn override_with(&mut self, other: &TypedValue<'_>) -> Result<(), NetError> {
        let (expected, found) = (self.value_type(), other.value_type());
        if expected != found {
            return Err(NetError::TypeMismatch { expected, found });
        }
        self.value.to_mut().clone_from(other.value());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_match_wire_order() {
        for tag in 0..=6u8 {
            assert_eq!(ValueType::try_from(tag).unwrap().tag(), tag);
        }
        assert!(matches!(
            ValueType::try_from(7),
            Err(DecodeError::UnknownTypeTag(7))
        ));
    }

    #[test]
    fn test_override_same_type() {
        let mut target = TypedValue::owned(0, Value::Int32(1));
        target
            .override_with(&TypedValue::owned(5, Value::Int32(9)))
            .unwrap();
        assert_eq!(target.value(), &Value::Int32(9));
        assert_eq!(target.id(), 0);
    }

    #[test]
    fn test_override_type_mismatch() {
        let mut target = TypedValue::owned(0, Value::Float(1.0));
        let err = target
            .override_with(&TypedValue::owned(0, Value::Uint8(2)))
            .unwrap_err();
        assert!(matches!(
            err,
            NetError::TypeMismatch {
                expected: ValueType::Float,
                found: ValueType::Uint8
            }
        ));
        assert_eq!(target.value(), &Value::Float(1.0));
    }

    #[test]
    fn test_override_detaches_borrowed_value() {
        let source = Value::String("live".into());
        let mut view = TypedValue::borrowed(1, &source);
        assert!(!view.is_owned());

        view.override_with(&TypedValue::owned(1, Value::from("copy")))
            .unwrap();

        assert!(view.is_owned());
        assert_eq!(view.value().as_str(), Some("copy"));
        assert_eq!(source.as_str(), Some("live"));
    }

    #[test]
    fn test_assign_rejects_other_type() {
        let mut value = Value::Bool(false);
        assert!(value.assign(&Value::Bool(true)).is_ok());
        assert_eq!(value.as_bool(), Some(true));
        assert!(value.assign(&Value::Double(1.0)).is_err());
    }
}
