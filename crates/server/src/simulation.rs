use lanplay::{ARENA_HALF_EXTENT, Marker, ObjectRegistry};

const ORBIT_SPEED: f32 = 0.5;

/// Moves every marker along its own circle around the arena centre. The
/// changed fields go out with the next replication tick.
pub fn wander(registry: &mut ObjectRegistry, elapsed_secs: f32) {
    for (index, id) in registry.ids().into_iter().enumerate() {
        let Some(marker) = registry.get_mut::<Marker>(id) else {
            continue;
        };
        let radius = (10.0 + 7.5 * index as f32).min(ARENA_HALF_EXTENT);
        let angle = elapsed_secs * ORBIT_SPEED + index as f32;
        let (sin, cos) = angle.sin_cos();
        if let Err(e) = marker.set_position(radius * cos, radius * sin) {
            log::warn!("Cannot move marker {id}: {e}");
        }
    }
}
