use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{
    DEATH_EPSILON, DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_MASS, DEFAULT_TEMPERATURE, TILE_SIZE,
};
use crate::interaction::{Capability, InteractionScheduler};
use crate::level::actions::Action;
use crate::level::volition::Behavior;
use crate::perception::{InternalState, Salience};
use crate::protocol::EntityRecord;
use crate::tick::TickScheduler;
use crate::types::{Direction, MotionState, PortalLink};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Construction parameters shared by every class constructor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntitySeed {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub health: f32,
    pub tile_name: Option<String>,
    pub portal: Option<PortalLink>,
}

impl EntitySeed {
    pub fn new(name: impl Into<String>, x: i32, y: i32, health: f32) -> Self {
        Self {
            name: name.into(),
            x,
            y,
            health,
            ..Self::default()
        }
    }

    pub fn with_tile(mut self, tile_name: impl Into<String>) -> Self {
        self.tile_name = Some(tile_name.into());
        self
    }

    pub fn with_portal(mut self, link: PortalLink) -> Self {
        self.portal = Some(link);
        self
    }
}

/// Rendering parameters carried for the external renderer. The core never reads them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Appearance {
    pub sprite_set: String,
    pub tile_name: Option<String>,
    pub sprite_size_x: i32,
    pub sprite_size_y: i32,
}

impl Default for Appearance {
    fn default() -> Self {
        Self {
            sprite_set: String::new(),
            tile_name: None,
            sprite_size_x: TILE_SIZE,
            sprite_size_y: TILE_SIZE,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Entity {
    pub id: EntityId,
    pub class_name: String,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub prev_x: i32,
    pub prev_y: i32,
    pub direction: Direction,
    pub inertia: f32,
    pub mass: f32,
    pub temperature: f32,
    pub health: f32,
    pub friction_coefficient: f32,
    pub z_level: f32,
    pub parent: Option<EntityId>,
    pub children: Vec<EntityId>,
    pub follows_parent: bool,
    pub is_grabbable: bool,
    pub is_encumbrant: bool,
    pub ignore_walkable: bool,
    /// Terrain only: an encumbrant entity stands on this tile this step.
    pub occupied: bool,
    pub motion: MotionState,
    pub speech: Option<String>,
    pub capabilities: Vec<Capability>,
    pub behavior: Behavior,
    pub salience: Salience,
    /// Sensing state of animate entities, filled on each decide pass.
    pub perception: Option<InternalState>,
    pub tick: TickScheduler,
    pub interactions: InteractionScheduler,
    pub staged: Option<Action>,
    pub appearance: Appearance,
    pub portal: Option<PortalLink>,
}

impl Entity {
    pub fn new(class_name: impl Into<String>, seed: EntitySeed) -> Self {
        let class_name = class_name.into();
        Self {
            id: EntityId::new(),
            appearance: Appearance {
                sprite_set: class_name.to_lowercase(),
                tile_name: seed.tile_name,
                ..Appearance::default()
            },
            class_name,
            name: seed.name,
            x: seed.x,
            y: seed.y,
            prev_x: seed.x,
            prev_y: seed.y,
            direction: Direction::Down,
            inertia: 0.0,
            mass: DEFAULT_MASS,
            temperature: DEFAULT_TEMPERATURE,
            health: seed.health,
            friction_coefficient: 1.0,
            z_level: 0.0,
            parent: None,
            children: Vec::new(),
            follows_parent: false,
            is_grabbable: false,
            is_encumbrant: true,
            ignore_walkable: false,
            occupied: false,
            motion: MotionState::Standing,
            speech: None,
            capabilities: Vec::new(),
            behavior: Behavior::Inert,
            salience: Salience::default(),
            perception: None,
            tick: TickScheduler::new(1.0),
            interactions: InteractionScheduler::new(DEFAULT_FLUSH_INTERVAL_MS),
            staged: None,
            portal: seed.portal,
        }
    }

    pub fn distance(&self, other: &Entity) -> f32 {
        let dx = (self.x - other.x) as f32;
        let dy = (self.y - other.y) as f32;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_dead(&self) -> bool {
        self.health < DEATH_EPSILON
    }

    pub fn declares(&self, predicate: impl Fn(&Capability) -> bool) -> bool {
        self.capabilities.iter().any(predicate)
    }

    pub fn is_terrain(&self) -> bool {
        self.declares(|cap| matches!(cap, Capability::Terrain))
    }

    pub fn has_contact(&self) -> bool {
        self.declares(|cap| matches!(cap, Capability::Contact))
    }

    pub fn exchanges_heat(&self) -> bool {
        self.declares(|cap| matches!(cap, Capability::HeatExchange(_)))
    }

    /// Entities that a walking creature shoves instead of bumping into.
    pub fn is_pushable(&self) -> bool {
        !self.is_terrain()
            && self.declares(|cap| matches!(cap, Capability::Contact | Capability::Friction))
    }

    pub fn at(&self, x: i32, y: i32) -> bool {
        self.x == x && self.y == y
    }

    pub fn to_record(&self) -> EntityRecord {
        EntityRecord {
            id: self.id,
            class_name: self.class_name.clone(),
            name: self.name.clone(),
            x: self.x,
            y: self.y,
            prev_x: self.prev_x,
            prev_y: self.prev_y,
            direction: self.direction,
            inertia: self.inertia,
            mass: self.mass,
            temperature: self.temperature,
            health: self.health,
            motion: self.motion,
            parent: self.parent,
            follows_parent: self.follows_parent,
            is_grabbable: self.is_grabbable,
            is_encumbrant: self.is_encumbrant,
            z_level: self.z_level,
            actions_per_second: self.tick.actions_per_second,
            speech: self.speech.clone(),
            appearance: self.appearance.clone(),
            portal: self.portal.clone(),
        }
    }

    /// Overwrites replicated state. Children are rebuilt by the caller.
    pub fn apply_record(&mut self, record: &EntityRecord) {
        self.name.clone_from(&record.name);
        self.x = record.x;
        self.y = record.y;
        self.prev_x = record.prev_x;
        self.prev_y = record.prev_y;
        self.direction = record.direction;
        self.inertia = record.inertia;
        self.mass = record.mass;
        self.temperature = record.temperature;
        self.health = record.health;
        self.motion = record.motion;
        self.parent = record.parent;
        self.follows_parent = record.follows_parent;
        self.is_grabbable = record.is_grabbable;
        self.is_encumbrant = record.is_encumbrant;
        self.z_level = record.z_level;
        self.tick.actions_per_second = record.actions_per_second;
        self.speech.clone_from(&record.speech);
        self.appearance.clone_from(&record.appearance);
        self.portal.clone_from(&record.portal);
    }

    pub fn seed_from_record(record: &EntityRecord) -> EntitySeed {
        EntitySeed {
            name: record.name.clone(),
            x: record.x,
            y: record.y,
            health: record.health,
            tile_name: record.appearance.tile_name.clone(),
            portal: record.portal.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = Entity::new("Stone", EntitySeed::new("a", 0, 0, 10.0));
        let b = Entity::new("Stone", EntitySeed::new("b", 0, 0, 10.0));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn new_entity_starts_with_prev_equal_to_position() {
        let entity = Entity::new("Stone", EntitySeed::new("s", 3, 4, 10.0));
        assert_eq!((entity.prev_x, entity.prev_y), (3, 4));
        assert_eq!(entity.motion, MotionState::Standing);
        assert_eq!(entity.appearance.sprite_set, "stone");
    }

    #[test]
    fn record_keeps_identity_and_transform() {
        let mut entity = Entity::new("Portal", EntitySeed::new("gate", 2, 3, 200.0));
        entity.portal = Some(PortalLink {
            level_key: "level_1".to_string(),
            exit_name: "gate_west".to_string(),
        });
        entity.z_level = 2.0;

        let record = entity.to_record();
        let mut copy = Entity::new("Portal", Entity::seed_from_record(&record));
        copy.apply_record(&record);

        assert_eq!(record.id, entity.id);
        assert_eq!((copy.x, copy.y), (2, 3));
        assert_eq!(copy.z_level, 2.0);
        assert_eq!(copy.portal, entity.portal);
    }

    #[test]
    fn death_threshold_is_strict() {
        let mut entity = Entity::new("Stone", EntitySeed::new("s", 0, 0, 0.001));
        assert!(!entity.is_dead());
        entity.health = 0.000_5;
        assert!(entity.is_dead());
        entity.health = -4.0;
        assert!(entity.is_dead());
    }
}
