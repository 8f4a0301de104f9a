//! A small replicated object used by the bundled binaries and the socket
//! tests: a labelled, coloured point that moves around a square arena.

use crate::error::NetError;
use crate::replication::{
    Command, NetworkObject, ObjectCore, ObjectId, ObjectRegistry, ReplicatedState, Spawner, Value,
};

pub const MARKER_TYPE: &str = "marker";

/// Markers live in `[-ARENA_HALF_EXTENT, ARENA_HALF_EXTENT]` on both axes.
pub const ARENA_HALF_EXTENT: f32 = 100.0;

const COMPANION_OFFSET: f32 = 2.0;

pub struct Marker {
    core: ObjectCore,
    label: u8,
    x: u8,
    y: u8,
    color: u8,
}

impl Marker {
    pub const MOVE_TO: u16 = 1;
    pub const SPAWN_COMPANION: u16 = 2;

    pub fn build(core: ObjectCore) -> Result<Self, NetError> {
        Self::with("", 0.0, 0.0, 0)(core)
    }

    pub fn with(
        label: impl Into<String>,
        x: f32,
        y: f32,
        color: u8,
    ) -> impl FnOnce(ObjectCore) -> Result<Self, NetError> {
        let label = label.into();
        move |mut core| {
            Ok(Self {
                label: core.register(label)?,
                x: core.register(x)?,
                y: core.register(y)?,
                color: core.register(color)?,
                core,
            })
        }
    }

    pub fn register(registry: &mut ObjectRegistry) {
        registry.register_factory(MARKER_TYPE, Self::build);
    }

    pub fn label(&self) -> &str {
        self.core
            .fields()
            .get(self.label)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn position(&self) -> (f32, f32) {
        let read = |id| {
            self.core
                .fields()
                .get(id)
                .and_then(Value::as_float)
                .unwrap_or_default()
        };
        (read(self.x), read(self.y))
    }

    pub fn color(&self) -> u8 {
        self.core
            .fields()
            .get(self.color)
            .and_then(Value::as_uint8)
            .unwrap_or_default()
    }

    pub fn set_position(&mut self, x: f32, y: f32) -> Result<(), NetError> {
        let fields = self.core.fields_mut();
        fields.set(self.x, x)?;
        fields.set(self.y, y)
    }

    pub fn move_command(
        target: ObjectId,
        x: f32,
        y: f32,
    ) -> Result<ReplicatedState<'static>, NetError> {
        ReplicatedState::new(target).with(x)?.with(y)
    }

    pub fn spawn_companion_command(target: ObjectId) -> ReplicatedState<'static> {
        ReplicatedState::new(target)
    }

    fn requested_position(command: &Command) -> Option<(f32, f32)> {
        let state = command.state();
        let x = state.get(0)?.value().as_float()?;
        let y = state.get(1)?.value().as_float()?;
        Some((x, y))
    }

    fn move_to(&mut self, command: &mut Command, authoritative: bool) {
        let Some((x, y)) = Self::requested_position(command) else {
            command.reject();
            return;
        };
        if authoritative && (x.abs() > ARENA_HALF_EXTENT || y.abs() > ARENA_HALF_EXTENT) {
            log::debug!("{} refused move to ({x}, {y})", self.core.id());
            command.reject();
            return;
        }
        match self.set_position(x, y) {
            Ok(()) => command.accept(),
            Err(e) => {
                log::warn!("{} cannot move: {e}", self.core.id());
                command.reject();
            }
        }
    }

    fn spawn_companion(&mut self, command: &mut Command, spawner: &mut Spawner<'_>) {
        let (x, y) = self.position();
        let x = (x + COMPANION_OFFSET).clamp(-ARENA_HALF_EXTENT, ARENA_HALF_EXTENT);
        let label = format!("{}+", self.label());
        match spawner.spawn(MARKER_TYPE, Self::with(label, x, y, self.color())) {
            Ok(Some(id)) => {
                log::info!("{} spawned companion {id}", self.core.id());
                command.accept();
            }
            Ok(None) => command.accept(),
            Err(e) => {
                log::warn!("Companion of {} not spawned: {e}", self.core.id());
                command.reject();
            }
        }
    }
}

impl NetworkObject for Marker {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ObjectCore {
        &mut self.core
    }

    fn receive_command(&mut self, command: &mut Command, spawner: &mut Spawner<'_>) {
        match command.code() {
            Self::MOVE_TO => self.move_to(command, spawner.is_server()),
            Self::SPAWN_COMPANION => self.spawn_companion(command, spawner),
            other => {
                log::debug!("{} ignores command {other}", self.core.id());
                command.reject();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::Decision;

    fn server_registry() -> (ObjectRegistry, ObjectId) {
        let mut registry = ObjectRegistry::new();
        registry.set_server_role(true);
        Marker::register(&mut registry);
        let id = registry
            .spawn_on_server(MARKER_TYPE, Marker::with("alpha", 1.0, 2.0, 7))
            .unwrap()
            .unwrap()
            .core()
            .id();
        (registry, id)
    }

    #[test]
    fn test_move_within_arena_accepted() {
        let (mut registry, id) = server_registry();
        let mut command =
            Command::new(Marker::MOVE_TO, Marker::move_command(id, 10.0, -4.5).unwrap());
        registry.dispatch_command(&mut command).unwrap();

        assert_eq!(command.decision(), Decision::Accepted);
        let marker = registry.get::<Marker>(id).unwrap();
        assert_eq!(marker.position(), (10.0, -4.5));
        assert!(marker.core().is_dirty());
    }

    #[test]
    fn test_move_outside_arena_rejected() {
        let (mut registry, id) = server_registry();
        let mut command =
            Command::new(Marker::MOVE_TO, Marker::move_command(id, 500.0, 0.0).unwrap());
        registry.dispatch_command(&mut command).unwrap();

        assert_eq!(command.decision(), Decision::Rejected);
        assert_eq!(registry.get::<Marker>(id).unwrap().position(), (1.0, 2.0));
    }

    #[test]
    fn test_malformed_move_rejected() {
        let (mut registry, id) = server_registry();
        let state = ReplicatedState::new(id).with("left").unwrap();
        let mut command = Command::new(Marker::MOVE_TO, state);
        registry.dispatch_command(&mut command).unwrap();
        assert_eq!(command.decision(), Decision::Rejected);
    }

    #[test]
    fn test_companion_spawned_on_server() {
        let (mut registry, id) = server_registry();
        let mut command = Command::new(Marker::SPAWN_COMPANION, Marker::spawn_companion_command(id));
        registry.dispatch_command(&mut command).unwrap();

        assert_eq!(command.decision(), Decision::Accepted);
        assert_eq!(registry.len(), 2);
        let companion = registry
            .iter_of::<Marker>()
            .find(|m| m.core().id() != id)
            .unwrap();
        assert_eq!(companion.label(), "alpha+");
        assert_eq!(companion.position(), (3.0, 2.0));
        assert_eq!(companion.color(), 7);
    }

    #[test]
    fn test_client_applies_relayed_move() {
        let mut registry = ObjectRegistry::new();
        Marker::register(&mut registry);
        let announced = ReplicatedState::new(ObjectId::new(4))
            .with("beta")
            .unwrap()
            .with(0.0f32)
            .unwrap()
            .with(0.0f32)
            .unwrap()
            .with(1u8)
            .unwrap();
        let id = registry.instantiate_remote(MARKER_TYPE, &announced).unwrap();
        assert_eq!(id, ObjectId::new(4));

        let mut command =
            Command::new(Marker::MOVE_TO, Marker::move_command(id, 300.0, 1.0).unwrap());
        registry.dispatch_command(&mut command).unwrap();
        assert_eq!(registry.get::<Marker>(id).unwrap().position(), (300.0, 1.0));
        assert_eq!(registry.get::<Marker>(id).unwrap().label(), "beta");
    }
}
