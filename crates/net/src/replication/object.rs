use std::any::Any;

use super::command::Command;
use super::registry::Spawner;
use super::state::{ObjectId, ReplicatedState};
use super::value::{TypedValue, Value};
use crate::error::NetError;

/// Objects cannot declare more fields than the wire's `u8` field count allows.
pub const MAX_FIELDS: usize = u8::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    VeryLow,
    Low,
    #[default]
    Normal,
    High,
    VeryHigh,
}

#[derive(Debug, Clone, Default)]
pub struct FieldTable {
    values: Vec<Value>,
    synced: Option<Vec<Value>>,
    structures: Vec<FieldTable>,
}

impl FieldTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, value: impl Into<Value>) -> Result<u8, NetError> {
        if self.values.len() >= MAX_FIELDS {
            return Err(NetError::TooManyFields(MAX_FIELDS));
        }
        self.values.push(value.into());
        Ok((self.values.len() - 1) as u8)
    }

    pub fn get(&self, id: u8) -> Option<&Value> {
        self.values.get(id as usize)
    }

    pub fn set(&mut self, id: u8, value: impl Into<Value>) -> Result<(), NetError> {
        let slot = self
            .values
            .get_mut(id as usize)
            .ok_or(NetError::UnknownField(id))?;
        slot.assign(&value.into())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn state(&self, object_id: ObjectId) -> ReplicatedState<'_> {
        let values = self
            .values
            .iter()
            .enumerate()
            .map(|(id, value)| TypedValue::borrowed(id as u8, value))
            .collect();
        ReplicatedState::from_values(object_id, values)
    }

    /// Overrides every field whose id appears in `state`. Ids with no local
    /// counterpart are ignored. A type mismatch rejects the whole update
    /// before anything is written. Returns the number of fields written.
    pub fn apply(&mut self, state: &ReplicatedState<'_>) -> Result<usize, NetError> {
        for incoming in state.values() {
            if let Some(local) = self.values.get(incoming.id() as usize) {
                let (expected, found) = (local.value_type(), incoming.value_type());
                if expected != found {
                    return Err(NetError::TypeMismatch { expected, found });
                }
            }
        }

        let mut written = 0;
        for incoming in state.values() {
            if let Some(local) = self.values.get_mut(incoming.id() as usize) {
                local.clone_from(incoming.value());
                written += 1;
            }
        }
        Ok(written)
    }

    pub fn add_structure(&mut self, structure: FieldTable) -> usize {
        self.structures.push(structure);
        self.structures.len() - 1
    }

    pub fn structure(&self, index: usize) -> Option<&FieldTable> {
        self.structures.get(index)
    }

    pub fn structure_mut(&mut self, index: usize) -> Option<&mut FieldTable> {
        self.structures.get_mut(index)
    }

    pub fn consider_up_to_date(&mut self) {
        self.synced = Some(self.values.clone());
        for structure in &mut self.structures {
            structure.consider_up_to_date();
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.synced.as_ref() != Some(&self.values)
            || self.structures.iter().any(FieldTable::is_dirty)
    }
}

/// Replication bookkeeping embedded in every network object. Only the object
/// registry can create one, so a network object can only come to exist
/// through the registry.
#[derive(Debug)]
pub struct ObjectCore {
    id: ObjectId,
    priority: Priority,
    fields: FieldTable,
}

impl ObjectCore {
    pub(crate) fn new(id: ObjectId) -> Self {
        Self {
            id,
            priority: Priority::default(),
            fields: FieldTable::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    pub fn register(&mut self, value: impl Into<Value>) -> Result<u8, NetError> {
        self.fields.register(value)
    }

    pub fn fields(&self) -> &FieldTable {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut FieldTable {
        &mut self.fields
    }

    pub fn state(&self) -> ReplicatedState<'_> {
        self.fields.state(self.id)
    }

    pub fn consider_up_to_date(&mut self) {
        self.fields.consider_up_to_date();
    }

    pub fn is_dirty(&self) -> bool {
        self.fields.is_dirty()
    }
}

pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub trait NetworkObject: AsAny + Send {
    fn core(&self) -> &ObjectCore;

    fn core_mut(&mut self) -> &mut ObjectCore;

    fn receive_command(&mut self, command: &mut Command, spawner: &mut Spawner<'_>);

    fn was_updated(&mut self) {}
}
