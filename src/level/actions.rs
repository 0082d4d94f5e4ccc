use tracing::{debug, warn};

use crate::constants::{FIREBALL_INERTIA, MOVE_THRESHOLD, PUSH_INERTIA};
use crate::entity::{EntityId, EntitySeed};
use crate::interaction::physics::friction_after_step;
use crate::level::{Level, StepContext};
use crate::types::{Direction, MotionState};

/// What an entity chose to do during its decide phase.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Move(Direction),
    Push { target: EntityId, direction: Direction },
    Grab { target: EntityId },
    Cast,
    Speak(String),
    /// Blocked movement: face the way and stop.
    Halt(Direction),
}

impl Level {
    pub(crate) fn perform(&mut self, actor: EntityId, action: Action, ctx: &StepContext<'_>) {
        match action {
            Action::Move(direction) => {
                let Some(entity) = self.get_mut(actor) else {
                    return;
                };
                entity.direction = direction;
                entity.inertia = 1.0;
                if !self.move_in(actor, direction) {
                    if let Some(entity) = self.get_mut(actor) {
                        entity.inertia = 0.0;
                    }
                }
            }
            Action::Push { target, direction } => self.push(actor, target, direction),
            Action::Grab { target } => {
                self.grab(actor, target);
            }
            Action::Cast => self.cast(actor, ctx),
            Action::Speak(message) => {
                if let Some(entity) = self.get_mut(actor) {
                    entity.inertia = 0.0;
                    entity.speech = Some(message);
                }
            }
            Action::Halt(direction) => {
                if let Some(entity) = self.get_mut(actor) {
                    entity.direction = direction;
                    entity.inertia = 0.0;
                }
            }
        }
    }

    /// Steps `id` one cell in `direction` if ground there can be walked on,
    /// dragging children that follow it. Missing ground zeroes inertia.
    pub fn move_in(&mut self, id: EntityId, direction: Direction) -> bool {
        let Some(entity) = self.get(id) else {
            return false;
        };
        let (dx, dy) = direction.delta();
        let (x, y) = self.wrap_cell(entity.x + dx, entity.y + dy);
        let ignore_walkable = entity.ignore_walkable;

        let walkable = match self.terrain_at(x, y) {
            None => {
                debug!(name = %entity.name, x, y, "cannot move outside ground");
                if let Some(entity) = self.get_mut(id) {
                    entity.inertia = 0.0;
                }
                return false;
            }
            Some(ground) => !ground.occupied,
        };
        if !walkable && !ignore_walkable {
            debug!(name = %entity.name, x, y, "cannot walk onto occupied ground");
            return false;
        }

        let Some(entity) = self.get_mut(id) else {
            return false;
        };
        entity.x = x;
        entity.y = y;
        let (prev_x, prev_y, heading) = (entity.prev_x, entity.prev_y, entity.direction);
        let children = entity.children.clone();
        for child in children {
            let Some(child) = self.get_mut(child) else {
                continue;
            };
            if child.follows_parent {
                child.x = x;
                child.y = y;
                child.prev_x = prev_x;
                child.prev_y = prev_y;
                child.direction = heading;
                child.motion = MotionState::Moving;
            }
        }
        true
    }

    /// Friction evolution: keep sliding while inertia lasts.
    pub fn keep_on_moving(&mut self, id: EntityId) {
        let Some(entity) = self.get(id) else {
            return;
        };
        if entity.inertia <= MOVE_THRESHOLD {
            return;
        }
        let direction = entity.direction;
        let moved = self.move_in(id, direction);
        if let Some(entity) = self.get_mut(id) {
            entity.inertia = if moved {
                friction_after_step(entity.inertia, entity.friction_coefficient)
            } else {
                (entity.inertia - 1.0).max(0.0)
            };
        }
    }

    pub fn push(&mut self, actor: EntityId, target: EntityId, direction: Direction) {
        let Some(pusher) = self.get_mut(actor) else {
            return;
        };
        pusher.direction = direction;
        pusher.inertia = 0.0;
        let Some(other) = self.get_mut(target) else {
            return;
        };
        other.inertia = PUSH_INERTIA;
        other.direction = direction;
    }

    /// Picks up `target`: it takes the holder's transform and cadence and
    /// draws above it.
    pub fn grab(&mut self, actor: EntityId, target: EntityId) -> bool {
        let Some(holder) = self.get(actor) else {
            return false;
        };
        let grabbable = self
            .get(target)
            .map(|other| other.is_grabbable && other.parent.is_none())
            .unwrap_or(false);
        if !grabbable {
            return false;
        }
        let (x, y, direction, z_level) = (holder.x, holder.y, holder.direction, holder.z_level);
        let actions_per_second = holder.tick.actions_per_second;
        let interval_ms = holder.interactions.interval_ms;

        if !self.attach(actor, target) {
            return false;
        }
        if let Some(other) = self.get_mut(target) {
            other.x = x;
            other.y = y;
            other.direction = direction;
            other.tick.actions_per_second = actions_per_second;
            other.interactions.interval_ms = interval_ms;
            other.z_level = z_level + 1.0;
            other.follows_parent = true;
            debug!(name = %other.name, "grabbed");
        }
        true
    }

    fn cast(&mut self, actor: EntityId, ctx: &StepContext<'_>) {
        let Some(caster) = self.get(actor) else {
            return;
        };
        let direction = caster.direction;
        let (dx, dy) = direction.delta();
        let (x, y) = self.wrap_cell(caster.x + dx, caster.y + dy);
        let name = format!("{}-fireball-{}", caster.name, caster.tick.last_tick);

        match ctx
            .registry
            .create("FireBall", EntitySeed::new(name, x, y, 5.0))
        {
            Ok(mut fireball) => {
                fireball.direction = direction;
                fireball.inertia = FIREBALL_INERTIA;
                self.register(fireball);
            }
            Err(err) => warn!(error = %err, "cannot cast"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::interaction::Capability;
    use crate::registry::ClassRegistry;

    fn ground_level(width: i32, height: i32) -> Level {
        let mut level = Level::new("test", width, height);
        for y in 0..height {
            for x in 0..width {
                let mut ground = Entity::new("Ground", EntitySeed::new("g", x, y, 10.0));
                ground.capabilities = vec![Capability::Terrain, Capability::Encumbrance];
                ground.is_encumbrant = false;
                level.register(ground);
            }
        }
        level
    }

    fn add(level: &mut Level, class: &str, x: i32, y: i32) -> EntityId {
        let entity = Entity::new(class, EntitySeed::new(class, x, y, 10.0));
        let id = entity.id;
        level.register(entity);
        id
    }

    #[test]
    fn push_sets_inertia_and_heading() {
        let mut level = ground_level(4, 4);
        let player = add(&mut level, "Player", 1, 1);
        let stone = add(&mut level, "Stone", 2, 1);
        level.push(player, stone, Direction::Right);

        let stone = level.get(stone).expect("stone");
        assert_eq!(stone.inertia, 2.0);
        assert_eq!(stone.direction, Direction::Right);
    }

    #[test]
    fn grab_adopts_holder_transform() {
        let mut level = ground_level(4, 4);
        let player = add(&mut level, "Player", 1, 2);
        let hood = add(&mut level, "Hood", 1, 3);
        {
            let holder = level.get_mut(player).expect("player");
            holder.direction = Direction::Up;
            holder.z_level = 0.5;
            holder.tick.actions_per_second = 2.0;
            holder.interactions.interval_ms = 250;
        }
        level.get_mut(hood).expect("hood").is_grabbable = true;

        assert!(level.grab(player, hood));
        let holder = level.get(player).expect("player");
        let item = level.get(hood).expect("hood");
        assert_eq!(holder.children, vec![hood]);
        assert_eq!(item.parent, Some(player));
        assert_eq!((item.x, item.y), (1, 2));
        assert_eq!(item.direction, Direction::Up);
        assert_eq!(item.tick.actions_per_second, 2.0);
        assert_eq!(item.interactions.interval_ms, 250);
        assert_eq!(item.z_level, 1.5);
    }

    #[test]
    fn grab_refuses_non_grabbable() {
        let mut level = ground_level(4, 4);
        let player = add(&mut level, "Player", 1, 1);
        let stone = add(&mut level, "Stone", 1, 1);
        assert!(!level.grab(player, stone));
        assert!(level.get(player).expect("player").children.is_empty());
    }

    #[test]
    fn move_in_drags_following_children() {
        let mut level = ground_level(4, 4);
        let player = add(&mut level, "Player", 1, 1);
        let robe = add(&mut level, "RobeTorso", 1, 1);
        level.attach(player, robe);
        level.get_mut(robe).expect("robe").follows_parent = true;

        assert!(level.move_in(player, Direction::Down));
        let robe = level.get(robe).expect("robe");
        assert_eq!((robe.x, robe.y), (1, 2));
        assert_eq!(robe.motion, MotionState::Moving);
    }

    #[test]
    fn move_in_without_ground_stops_entity() {
        let mut level = Level::new("void", 4, 4);
        let stone = add(&mut level, "Stone", 0, 0);
        level.get_mut(stone).expect("stone").inertia = 3.0;
        assert!(!level.move_in(stone, Direction::Right));
        assert_eq!(level.get(stone).expect("stone").inertia, 0.0);
    }

    #[test]
    fn move_in_wraps_around_edges() {
        let mut level = ground_level(3, 3);
        let stone = add(&mut level, "Stone", 2, 0);
        assert!(level.move_in(stone, Direction::Right));
        assert!(level.move_in(stone, Direction::Up));
        let stone = level.get(stone).expect("stone");
        assert_eq!((stone.x, stone.y), (0, 2));
    }

    #[test]
    fn occupied_ground_blocks_unless_ignored() {
        let mut level = ground_level(3, 1);
        let stone = add(&mut level, "Stone", 0, 0);
        let ground = level.terrain_at(1, 0).expect("ground").id;
        level.get_mut(ground).expect("ground").occupied = true;
        assert!(!level.move_in(stone, Direction::Right));

        level.get_mut(stone).expect("stone").ignore_walkable = true;
        assert!(level.move_in(stone, Direction::Right));
    }

    #[test]
    fn cast_spawns_fireball_ahead() {
        let registry = ClassRegistry::with_builtin_classes();
        let mut level = ground_level(5, 5);
        let player = add(&mut level, "Player", 2, 2);
        level.get_mut(player).expect("player").direction = Direction::Left;
        let ctx = StepContext {
            now_ms: 0,
            registry: &registry,
        };
        level.perform(player, Action::Cast, &ctx);

        let fireball = level
            .iter()
            .find(|entity| entity.class_name == "FireBall")
            .expect("fireball registered");
        assert_eq!((fireball.x, fireball.y), (1, 2));
        assert_eq!(fireball.direction, Direction::Left);
        assert_eq!(fireball.inertia, FIREBALL_INERTIA);
    }

    #[test]
    fn halt_faces_and_stops() {
        let registry = ClassRegistry::new();
        let mut level = ground_level(2, 2);
        let cow = add(&mut level, "Cow", 0, 0);
        level.get_mut(cow).expect("cow").inertia = 1.0;
        let ctx = StepContext {
            now_ms: 0,
            registry: &registry,
        };
        level.perform(cow, Action::Halt(Direction::Left), &ctx);
        let cow = level.get(cow).expect("cow");
        assert_eq!(cow.direction, Direction::Left);
        assert_eq!(cow.inertia, 0.0);
    }
}
