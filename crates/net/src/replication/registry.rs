use std::collections::{BTreeMap, HashMap};

use super::command::Command;
use super::object::{NetworkObject, ObjectCore};
use super::state::{ObjectId, ReplicatedState};
use crate::error::NetError;

type Factory = Box<dyn Fn(ObjectCore) -> Result<Box<dyn NetworkObject>, NetError> + Send>;

struct Entry {
    type_name: String,
    object: Box<dyn NetworkObject>,
}

fn downcast_ref<T: NetworkObject>(object: &dyn NetworkObject) -> Option<&T> {
    object.as_any().downcast_ref()
}

fn downcast_mut<T: NetworkObject>(object: &mut dyn NetworkObject) -> Option<&mut T> {
    object.as_any_mut().downcast_mut()
}

#[derive(Default)]
pub struct ObjectRegistry {
    factories: HashMap<String, Factory>,
    objects: BTreeMap<ObjectId, Entry>,
    last_id: u16,
    is_server: bool,
    pending_new: Vec<ObjectId>,
    pending_deleted: Vec<ObjectId>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }

    pub(crate) fn set_server_role(&mut self, is_server: bool) {
        self.is_server = is_server;
    }

    pub fn register_factory<T, F>(&mut self, type_name: &str, factory: F)
    where
        T: NetworkObject,
        F: Fn(ObjectCore) -> Result<T, NetError> + Send + 'static,
    {
        let factory: Factory =
            Box::new(move |core| factory(core).map(|o| Box::new(o) as Box<dyn NetworkObject>));
        if self.factories.insert(type_name.to_owned(), factory).is_some() {
            log::debug!("Replaced factory for {type_name:?}");
        }
    }

    pub fn has_factory(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    fn allocate_id(&mut self, reserved: Option<ObjectId>) -> Result<ObjectId, NetError> {
        for _ in 0..=u16::MAX as u32 {
            self.last_id = self.last_id.wrapping_add(1);
            let id = ObjectId::new(self.last_id);
            if id != ObjectId::UNASSIGNED && !self.objects.contains_key(&id) && Some(id) != reserved
            {
                return Ok(id);
            }
        }
        Err(NetError::IdsExhausted)
    }

    fn spawn_with<T, F>(
        &mut self,
        type_name: &str,
        build: F,
        reserved: Option<ObjectId>,
    ) -> Result<ObjectId, NetError>
    where
        T: NetworkObject,
        F: FnOnce(ObjectCore) -> Result<T, NetError>,
    {
        let id = self.allocate_id(reserved)?;
        let object = build(ObjectCore::new(id))?;
        self.objects.insert(
            id,
            Entry {
                type_name: type_name.to_owned(),
                object: Box::new(object),
            },
        );
        self.pending_new.push(id);
        log::debug!("Spawned {type_name} {id}");
        Ok(id)
    }

    pub fn spawn_on_server<T, F>(
        &mut self,
        type_name: &str,
        build: F,
    ) -> Result<Option<&mut T>, NetError>
    where
        T: NetworkObject,
        F: FnOnce(ObjectCore) -> Result<T, NetError>,
    {
        if !self.is_server {
            return Ok(None);
        }
        let id = self.spawn_with(type_name, build, None)?;
        Ok(self.get_mut::<T>(id))
    }

    pub fn instantiate_remote(
        &mut self,
        type_name: &str,
        state: &ReplicatedState<'_>,
    ) -> Result<ObjectId, NetError> {
        if !self.factories.contains_key(type_name) {
            return Err(NetError::UnknownType(type_name.to_owned()));
        }
        let provisional = self.allocate_id(None)?;
        let factory = self
            .factories
            .get(type_name)
            .ok_or_else(|| NetError::UnknownType(type_name.to_owned()))?;
        let object = factory(ObjectCore::new(provisional))?;
        self.objects.insert(
            provisional,
            Entry {
                type_name: type_name.to_owned(),
                object,
            },
        );
        self.apply_update(provisional, state, true).inspect_err(|_| {
            self.objects.remove(&provisional);
        })
    }

    pub fn apply_update(
        &mut self,
        target: ObjectId,
        state: &ReplicatedState<'_>,
        force_id: bool,
    ) -> Result<ObjectId, NetError> {
        let entry = self
            .objects
            .get_mut(&target)
            .ok_or(NetError::UnknownObject(target))?;
        let core = entry.object.core_mut();
        core.fields_mut().apply(state)?;
        core.consider_up_to_date();

        let mut id = target;
        if force_id && state.object_id() != target {
            if let Some(mut entry) = self.objects.remove(&target) {
                id = state.object_id();
                entry.object.core_mut().set_id(id);
                if let Some(replaced) = self.objects.insert(id, entry) {
                    log::warn!("Object {id} replaced an existing {}", replaced.type_name);
                }
            }
        }

        if let Some(entry) = self.objects.get_mut(&id) {
            entry.object.was_updated();
        }
        Ok(id)
    }

    pub fn dispatch_command(&mut self, command: &mut Command) -> Result<(), NetError> {
        let id = command.target();
        let mut entry = self
            .objects
            .remove(&id)
            .ok_or(NetError::UnknownObject(id))?;
        let mut spawner = Spawner {
            registry: self,
            reserved: id,
        };
        entry.object.receive_command(command, &mut spawner);
        self.objects.insert(id, entry);
        Ok(())
    }

    /// Destroys an object. On the server, clients are told about it unless it
    /// was never announced.
    pub fn despawn(&mut self, id: ObjectId) -> Option<Box<dyn NetworkObject>> {
        let entry = self.objects.remove(&id)?;
        if self.is_server {
            if let Some(pos) = self.pending_new.iter().position(|p| *p == id) {
                self.pending_new.remove(pos);
            } else {
                self.pending_deleted.push(id);
            }
        }
        Some(entry.object)
    }

    pub fn get<T: NetworkObject>(&self, id: ObjectId) -> Option<&T> {
        downcast_ref(self.objects.get(&id)?.object.as_ref())
    }

    pub fn get_mut<T: NetworkObject>(&mut self, id: ObjectId) -> Option<&mut T> {
        downcast_mut(self.objects.get_mut(&id)?.object.as_mut())
    }

    pub fn object(&self, id: ObjectId) -> Option<&dyn NetworkObject> {
        self.objects.get(&id).map(|e| e.object.as_ref())
    }

    pub fn type_name(&self, id: ObjectId) -> Option<&str> {
        self.objects.get(&id).map(|e| e.type_name.as_str())
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.objects.keys().copied().collect()
    }

    pub fn iter_of<T: NetworkObject>(&self) -> impl Iterator<Item = &T> {
        self.objects
            .values()
            .filter_map(|e| downcast_ref::<T>(e.object.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn snapshot(&self) -> Vec<(&str, ReplicatedState<'_>)> {
        self.objects
            .values()
            .map(|e| (e.type_name.as_str(), e.object.core().state()))
            .collect()
    }

    pub fn drain_new_objects(&mut self) -> Vec<ObjectId> {
        let ids = std::mem::take(&mut self.pending_new);
        ids.into_iter().filter(|id| self.contains(*id)).collect()
    }

    pub fn drain_deleted(&mut self) -> Vec<ObjectId> {
        std::mem::take(&mut self.pending_deleted)
    }

    pub fn announcement(&self, ids: &[ObjectId]) -> Vec<(&str, ReplicatedState<'_>)> {
        ids.iter()
            .filter_map(|id| self.objects.get(id))
            .map(|e| (e.type_name.as_str(), e.object.core().state()))
            .collect()
    }

    pub fn dirty_ids(&self) -> Vec<ObjectId> {
        self.objects
            .iter()
            .filter(|(_, e)| e.object.core().is_dirty())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn states(&self, ids: &[ObjectId]) -> Vec<ReplicatedState<'_>> {
        ids.iter()
            .filter_map(|id| self.objects.get(id))
            .map(|e| e.object.core().state())
            .collect()
    }

    pub fn mark_flushed(&mut self, ids: &[ObjectId]) {
        for id in ids {
            if let Some(entry) = self.objects.get_mut(id) {
                entry.object.core_mut().consider_up_to_date();
            }
        }
    }
}

/// Lets a command handler create objects while its own object is checked
/// out of the registry.
pub struct Spawner<'r> {
    registry: &'r mut ObjectRegistry,
    reserved: ObjectId,
}

impl Spawner<'_> {
    pub fn is_server(&self) -> bool {
        self.registry.is_server
    }

    pub fn spawn<T, F>(&mut self, type_name: &str, build: F) -> Result<Option<ObjectId>, NetError>
    where
        T: NetworkObject,
        F: FnOnce(ObjectCore) -> Result<T, NetError>,
    {
        if !self.registry.is_server {
            return Ok(None);
        }
        self.registry
            .spawn_with(type_name, build, Some(self.reserved))
            .map(Some)
    }

    pub fn registry(&self) -> &ObjectRegistry {
        self.registry
    }
}
