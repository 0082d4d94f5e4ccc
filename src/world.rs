use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::constants::{PLAYER_SPAWN, WORLD_HEIGHT, WORLD_WIDTH};
use crate::entity::{Entity, EntityId, EntitySeed};
use crate::error::{SimError, SimResult};
use crate::level::Level;
use crate::registry::ClassRegistry;
use crate::rng::Rng;
use crate::terrain::{build_tile_map, builtin_tile_set};
use crate::types::PortalLink;

fn default_width() -> i32 {
    WORLD_WIDTH
}

fn default_height() -> i32 {
    WORLD_HEIGHT
}

fn default_health() -> f32 {
    10.0
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectDefinition {
    pub class_name: String,
    pub name: String,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    #[serde(default = "default_health")]
    pub health: f32,
    #[serde(default)]
    pub tile_name: Option<String>,
    #[serde(default)]
    pub portal: Option<PortalLink>,
    #[serde(default)]
    pub parent: Option<String>,
}

impl ObjectDefinition {
    pub fn new(class_name: &str, name: &str, x: i32, y: i32) -> Self {
        Self {
            class_name: class_name.to_string(),
            name: name.to_string(),
            x,
            y,
            health: default_health(),
            tile_name: None,
            portal: None,
            parent: None,
        }
    }

    fn child_of(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }

    fn leading_to(mut self, level_key: &str, exit_name: &str) -> Self {
        self.portal = Some(PortalLink {
            level_key: level_key.to_string(),
            exit_name: exit_name.to_string(),
        });
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelDefinition {
    pub level_key: String,
    #[serde(default = "default_width")]
    pub width: i32,
    #[serde(default = "default_height")]
    pub height: i32,
    #[serde(default = "default_true")]
    pub generate_terrain: bool,
    #[serde(default)]
    pub objects: Vec<ObjectDefinition>,
}

impl LevelDefinition {
    /// Creates and registers every object, then wires parents by name.
    pub fn build(&self, registry: &ClassRegistry, rng: &mut Rng) -> SimResult<Level> {
        let mut level = Level::new(self.level_key.clone(), self.width, self.height);

        if self.generate_terrain {
            let map = build_tile_map(
                &builtin_tile_set(),
                self.width.max(1) as usize,
                self.height.max(1) as usize,
                rng,
            )?;
            for (y, row) in map.iter().enumerate() {
                for (x, tile) in row.iter().enumerate() {
                    let seed = EntitySeed::new(format!("ground_{x}_{y}"), x as i32, y as i32, 10.0)
                        .with_tile(tile.name.clone());
                    level.register(registry.create("Ground", seed)?);
                }
            }
        }

        let mut by_name: HashMap<&str, EntityId> = HashMap::new();
        for object in &self.objects {
            let mut seed = EntitySeed::new(object.name.clone(), object.x, object.y, object.health);
            seed.tile_name = object.tile_name.clone();
            seed.portal = object.portal.clone();
            let entity = registry.create(&object.class_name, seed)?;
            by_name.insert(object.name.as_str(), entity.id);
            level.register(entity);
        }

        for object in &self.objects {
            let Some(parent_name) = object.parent.as_deref() else {
                continue;
            };
            let parent = by_name
                .get(parent_name)
                .copied()
                .ok_or_else(|| SimError::UnknownParent {
                    child: object.name.clone(),
                    parent: parent_name.to_string(),
                })?;
            if let Some(&child) = by_name.get(object.name.as_str()) {
                level.attach(parent, child);
            }
        }
        Ok(level)
    }
}

pub fn builtin_definitions() -> Vec<LevelDefinition> {
    vec![
        LevelDefinition {
            level_key: "level_0".to_string(),
            width: WORLD_WIDTH,
            height: WORLD_HEIGHT,
            generate_terrain: true,
            objects: vec![
                ObjectDefinition::new("Stone", "boulder", 3, 3),
                ObjectDefinition::new("Cow", "daisy", 8, 2),
                ObjectDefinition::new("CowShadow", "daisy_shadow", 8, 2).child_of("daisy"),
                ObjectDefinition::new("Goblin", "grub", 2, 7),
                ObjectDefinition::new("Hood", "hood", 6, 7),
                ObjectDefinition::new("Shoes", "shoes", 7, 7),
                ObjectDefinition::new("Skirt", "skirt", 9, 6),
                ObjectDefinition::new("Portal", "gate_east", 10, 4).leading_to("level_1", "gate_west"),
            ],
        },
        LevelDefinition {
            level_key: "level_1".to_string(),
            width: WORLD_WIDTH,
            height: WORLD_HEIGHT,
            generate_terrain: true,
            objects: vec![
                ObjectDefinition::new("Stone", "pebble", 4, 5),
                ObjectDefinition::new("Goblin", "snag", 9, 2),
                ObjectDefinition::new("Portal", "gate_west", 1, 4).leading_to("level_0", "gate_east"),
            ],
        },
    ]
}

/// All levels of one simulation, keyed by level key.
#[derive(Clone, Debug, Default)]
pub struct World {
    levels: BTreeMap<String, Level>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definitions(
        definitions: &[LevelDefinition],
        registry: &ClassRegistry,
        seed: u64,
    ) -> SimResult<Self> {
        let mut rng = Rng::new(seed);
        let mut world = Self::new();
        for definition in definitions {
            world.insert(definition.build(registry, &mut rng)?);
        }
        Ok(world)
    }

    pub fn builtin(registry: &ClassRegistry, seed: u64) -> SimResult<Self> {
        Self::from_definitions(&builtin_definitions(), registry, seed)
    }

    pub fn load(path: &Path, registry: &ClassRegistry, seed: u64) -> SimResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| SimError::LevelFile(format!("{}: {err}", path.display())))?;
        let definitions: Vec<LevelDefinition> = serde_json::from_str(&raw)
            .map_err(|err| SimError::LevelFile(format!("{}: {err}", path.display())))?;
        Self::from_definitions(&definitions, registry, seed)
    }

    pub fn insert(&mut self, level: Level) {
        self.levels.insert(level.key().to_string(), level);
    }

    pub fn level(&self, key: &str) -> Option<&Level> {
        self.levels.get(key)
    }

    pub fn level_mut(&mut self, key: &str) -> Option<&mut Level> {
        self.levels.get_mut(key)
    }

    pub fn level_keys(&self) -> impl Iterator<Item = &str> {
        self.levels.keys().map(String::as_str)
    }

    pub fn locate(&self, id: EntityId) -> Option<&str> {
        self.levels
            .values()
            .find(|level| level.contains(id))
            .map(Level::key)
    }

    /// Registers a new player wearing a robe at the spawn point of `level_key`.
    pub fn spawn_player(
        &mut self,
        registry: &ClassRegistry,
        level_key: &str,
        name: &str,
    ) -> SimResult<EntityId> {
        let level = self
            .levels
            .get_mut(level_key)
            .ok_or_else(|| SimError::UnknownLevel(level_key.to_string()))?;
        let (x, y) = PLAYER_SPAWN;
        let player = registry.create("Player", EntitySeed::new(name, x, y, 10.0))?;
        let mut robe = registry.create("RobeTorso", EntitySeed::new(format!("{name}_robe"), x, y, 10.0))?;
        robe.follows_parent = true;
        robe.z_level = player.z_level + 1.0;

        let (player_id, robe_id) = (player.id, robe.id);
        level.register(player);
        level.register(robe);
        level.attach(player_id, robe_id);
        info!(level = level_key, player = %player_id, name, "player spawned");
        Ok(player_id)
    }

    /// Moves a player and its children to the exit named `exit_name` in
    /// `to`. Nothing changes when any lookup fails.
    pub fn transfer(
        &mut self,
        player: EntityId,
        from: &str,
        to: &str,
        exit_name: &str,
    ) -> SimResult<()> {
        let (exit_x, exit_y) = {
            let destination = self
                .levels
                .get(to)
                .ok_or_else(|| SimError::UnknownLevel(to.to_string()))?;
            let exit = destination
                .find_by_name(exit_name)
                .ok_or_else(|| SimError::UnknownExit {
                    level: to.to_string(),
                    exit: exit_name.to_string(),
                })?;
            (exit.x, exit.y)
        };
        let source = self
            .levels
            .get_mut(from)
            .ok_or_else(|| SimError::UnknownLevel(from.to_string()))?;
        if !source.contains(player) {
            return Err(SimError::EntityNotFound(player));
        }

        let moving = take_with_children(source, player);
        let destination = self
            .levels
            .get_mut(to)
            .ok_or_else(|| SimError::UnknownLevel(to.to_string()))?;
        for mut entity in moving {
            entity.x = exit_x;
            entity.y = exit_y;
            entity.prev_x = exit_x;
            entity.prev_y = exit_y;
            destination.register(entity);
        }
        info!(player = %player, from, to, exit = exit_name, "level transfer");
        Ok(())
    }

    /// Unregisters a player and its children from every level.
    pub fn remove_player_everywhere(&mut self, player: EntityId) -> usize {
        self.levels
            .values_mut()
            .filter(|level| level.contains(player))
            .map(|level| take_with_children(level, player).len())
            .sum()
    }
}

/// Removes `id` then its children, returning them in that order.
fn take_with_children(level: &mut Level, id: EntityId) -> Vec<Entity> {
    let Some(root) = level.unregister(id) else {
        return Vec::new();
    };
    let children = root.children.clone();
    let mut taken = vec![root];
    taken.extend(children.into_iter().filter_map(|child| level.unregister(child)));
    taken
}
