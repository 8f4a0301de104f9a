use std::fmt;

use super::object::MAX_FIELDS;
use super::value::{TypedValue, Value};
use crate::error::NetError;

/// Network-wide object id. Assigned by the server, never zero for a live
/// object, never reused while that object exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ObjectId(u16);

impl ObjectId {
    pub const UNASSIGNED: ObjectId = ObjectId(0);

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReplicatedState<'a> {
    object_id: ObjectId,
    values: Vec<TypedValue<'a>>,
}

impl<'a> ReplicatedState<'a> {
    pub fn new(object_id: ObjectId) -> Self {
        Self {
            object_id,
            values: Vec::new(),
        }
    }

    /// Callers guarantee at most [`MAX_FIELDS`] values.
    pub(crate) fn from_values(object_id: ObjectId, values: Vec<TypedValue<'a>>) -> Self {
        debug_assert!(values.len() <= MAX_FIELDS);
        Self { object_id, values }
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn set_object_id(&mut self, object_id: ObjectId) {
        self.object_id = object_id;
    }

    pub fn with(mut self, value: impl Into<Value>) -> Result<Self, NetError> {
        let id = self.values.len() as u8;
        self.push(TypedValue::owned(id, value.into()))?;
        Ok(self)
    }

    pub fn push(&mut self, value: TypedValue<'a>) -> Result<(), NetError> {
        if self.values.len() >= MAX_FIELDS {
            return Err(NetError::TooManyFields(MAX_FIELDS));
        }
        self.values.push(value);
        Ok(())
    }

    pub fn values(&self) -> &[TypedValue<'a>] {
        &self.values
    }

    pub fn get(&self, id: u8) -> Option<&TypedValue<'a>> {
        self.values.iter().find(|v| v.id() == id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_owned(self) -> ReplicatedState<'static> {
        ReplicatedState {
            object_id: self.object_id,
            values: self.values.into_iter().map(TypedValue::into_owned).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_count_capped_at_wire_limit() {
        let mut state = ReplicatedState::new(ObjectId::new(1));
        for _ in 0..MAX_FIELDS {
            state = state.with(7u32).unwrap();
        }
        assert_eq!(state.values().last().map(TypedValue::id), Some(254));

        assert!(matches!(
            state.clone().with(8u32),
            Err(NetError::TooManyFields(MAX_FIELDS))
        ));
        assert!(matches!(
            state.push(TypedValue::owned(0, Value::Bool(true))),
            Err(NetError::TooManyFields(_))
        ));
        assert_eq!(state.len(), MAX_FIELDS);
    }
}
