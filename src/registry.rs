use std::collections::HashMap;

use crate::constants::{
    ATTACHMENT_FLUSH_INTERVAL_MS, BODY_TEMPERATURE, DEFAULT_DEATH_GRACE_MS,
    DEFAULT_HEARING_RANGE, DEFAULT_TEMPERATURE, DEFAULT_VISION_RANGE,
};
use crate::entity::{Entity, EntitySeed};
use crate::error::{SimError, SimResult};
use crate::interaction::{Capability, HeatPolicy};
use crate::level::volition::{Behavior, Controller, Wanderer};
use crate::perception::{InternalState, Salience, Senses};
use crate::rng::Rng;

pub type Constructor = fn(EntitySeed) -> Entity;

/// Maps class names to constructors. Used both to build levels on the
/// server and to materialise replicated records on the client.
#[derive(Clone, Default)]
pub struct ClassRegistry {
    constructors: HashMap<String, Constructor>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_classes() -> Self {
        let mut registry = Self::new();
        registry.register("Player", player);
        registry.register("Cow", cow);
        registry.register("CowShadow", cow_shadow);
        registry.register("Goblin", goblin);
        registry.register("Stone", stone);
        registry.register("FireBall", fireball);
        registry.register("Ground", ground);
        registry.register("RobeTorso", |seed| worn_item("RobeTorso", seed));
        registry.register("Hood", |seed| worn_item("Hood", seed));
        registry.register("Shoes", |seed| worn_item("Shoes", seed));
        registry.register("Skirt", |seed| worn_item("Skirt", seed));
        registry.register("Portal", portal);
        registry
    }

    pub fn register(&mut self, class_name: impl Into<String>, constructor: Constructor) {
        self.constructors.insert(class_name.into(), constructor);
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.constructors.contains_key(class_name)
    }

    pub fn class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn create(&self, class_name: &str, seed: EntitySeed) -> SimResult<Entity> {
        let constructor = self
            .constructors
            .get(class_name)
            .ok_or_else(|| SimError::UnknownEntityClass(class_name.to_string()))?;
        Ok(constructor(seed))
    }
}

fn seed_rng(seed: &EntitySeed) -> Rng {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in seed.name.bytes() {
        hash = (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3);
    }
    Rng::new(hash ^ ((seed.x as u64) << 32) ^ seed.y as u64)
}

fn player(seed: EntitySeed) -> Entity {
    let mut entity = Entity::new("Player", seed);
    entity.z_level = 10.0;
    entity.tick.actions_per_second = 3.0;
    entity.temperature = BODY_TEMPERATURE;
    entity.appearance.sprite_set = "man".to_string();
    entity.behavior = Behavior::Controlled(Controller::default());
    entity.salience = Salience::new(1.1, 2.1, 2.0);
    entity.perception = Some(InternalState::new(Senses::new(
        DEFAULT_VISION_RANGE,
        DEFAULT_HEARING_RANGE,
    )));
    entity.capabilities = vec![
        Capability::HeatExchange(HeatPolicy::MassWeighted),
        Capability::TemperatureDamage {
            lower: 30.0,
            upper: 42.0,
            equilibrium: BODY_TEMPERATURE,
        },
        Capability::Mortal {
            grace_ms: DEFAULT_DEATH_GRACE_MS,
        },
    ];
    entity
}

fn cow(seed: EntitySeed) -> Entity {
    let rng = seed_rng(&seed);
    let mut entity = Entity::new("Cow", seed);
    entity.z_level = 2.0;
    entity.appearance.sprite_set = "cow_move".to_string();
    entity.appearance.sprite_size_x = 128;
    entity.appearance.sprite_size_y = 128;
    entity.behavior = Behavior::Wander(Wanderer::new(rng, &["mooo"]));
    entity.salience = Salience::new(3.1, 0.1, 4.0);
    entity.perception = Some(InternalState::new(Senses::new(DEFAULT_VISION_RANGE, 3)));
    entity.capabilities = vec![
        Capability::Contact,
        Capability::Friction,
        Capability::HeatExchange(HeatPolicy::MassWeighted),
        Capability::HeatDissipation {
            equilibrium: DEFAULT_TEMPERATURE,
        },
    ];
    entity
}

fn cow_shadow(seed: EntitySeed) -> Entity {
    let mut entity = Entity::new("CowShadow", seed);
    entity.z_level = 1.0;
    entity.is_encumbrant = false;
    entity.follows_parent = true;
    entity.appearance.sprite_set = "cow_shadow".to_string();
    entity.appearance.sprite_size_x = 128;
    entity.appearance.sprite_size_y = 128;
    entity.interactions.interval_ms = ATTACHMENT_FLUSH_INTERVAL_MS;
    entity.capabilities = vec![
        Capability::AttachedToParent { on_top: false },
        Capability::ParentBound {
            grace_ms: DEFAULT_DEATH_GRACE_MS,
        },
    ];
    entity
}

fn goblin(seed: EntitySeed) -> Entity {
    let rng = seed_rng(&seed);
    let mut entity = Entity::new("Goblin", seed);
    entity.z_level = 3.0;
    entity.behavior = Behavior::Wander(Wanderer::new(rng, &["hello", "grr"]));
    entity.salience = Salience::new(0.3, 0.1, 2.3);
    entity.perception = Some(InternalState::new(Senses::new(
        DEFAULT_VISION_RANGE,
        DEFAULT_HEARING_RANGE,
    )));
    entity.capabilities = vec![
        Capability::Contact,
        Capability::InertiaDamage {
            lower: 0.0,
            upper: 5.0,
        },
        Capability::Mortal {
            grace_ms: DEFAULT_DEATH_GRACE_MS,
        },
    ];
    entity
}

fn stone(seed: EntitySeed) -> Entity {
    let mut entity = Entity::new("Stone", seed);
    entity.z_level = 1.0;
    entity.appearance.sprite_set = "boulder".to_string();
    entity.salience = Salience::new(0.1, 0.1, 0.5);
    entity.capabilities = vec![
        Capability::Contact,
        Capability::Friction,
        Capability::InertiaDamage {
            lower: 0.0,
            upper: 5.0,
        },
        Capability::Mortal {
            grace_ms: DEFAULT_DEATH_GRACE_MS,
        },
    ];
    entity
}

fn fireball(seed: EntitySeed) -> Entity {
    let mut entity = Entity::new("FireBall", seed);
    entity.z_level = 1.0;
    entity.friction_coefficient = 0.0;
    entity.inertia = 2.0;
    entity.temperature = 300.0;
    entity.mass = 0.5;
    entity.salience = Salience::new(0.1, 0.1, 0.5);
    entity.is_encumbrant = false;
    entity.ignore_walkable = true;
    entity.capabilities = vec![
        Capability::Friction,
        Capability::HeatExchange(HeatPolicy::Halfway),
        Capability::ExplodeAtTouch,
        Capability::HealthDecay,
        Capability::Mortal { grace_ms: 0 },
    ];
    entity
}

fn ground(seed: EntitySeed) -> Entity {
    let mut entity = Entity::new("Ground", seed);
    entity.z_level = 0.0;
    entity.is_encumbrant = false;
    entity.capabilities = vec![Capability::Terrain, Capability::Encumbrance];
    entity
}

fn worn_item(class_name: &str, seed: EntitySeed) -> Entity {
    let mut entity = Entity::new(class_name, seed);
    entity.z_level = 1.0;
    entity.is_grabbable = true;
    entity.is_encumbrant = false;
    entity.appearance.sprite_set = to_snake_case(class_name);
    entity.salience = Salience::new(0.1, 1.1, 0.5);
    entity.interactions.interval_ms = ATTACHMENT_FLUSH_INTERVAL_MS;
    entity.capabilities = vec![
        Capability::AttachedToParent { on_top: true },
        Capability::ParentBound {
            grace_ms: DEFAULT_DEATH_GRACE_MS,
        },
    ];
    entity
}

fn portal(seed: EntitySeed) -> Entity {
    let mut entity = Entity::new("Portal", seed);
    entity.z_level = 2.0;
    entity.mass = 4.0;
    entity.health = 200.0;
    entity.is_encumbrant = false;
    entity.appearance.sprite_set = "portal_1".to_string();
    entity.appearance.sprite_size_x = 80;
    entity.appearance.sprite_size_y = 60;
    entity.salience = Salience::new(0.8, 1.1, 1.5);
    entity
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (idx, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if idx > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
