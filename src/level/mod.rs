use std::collections::HashMap;

use tracing::{debug, info, trace};

use crate::entity::{Entity, EntityId};
use crate::interaction::physics::{
    contact_exchange, halfway_temperatures, mass_weighted_temperature, relax_toward, Body,
};
use crate::interaction::{Effect, HeatPolicy, InteractionCommand};
use crate::protocol::EntityRecord;
use crate::registry::ClassRegistry;
use crate::types::MotionState;

pub mod actions;
pub mod volition;

/// Per-pass inputs shared by the decide and act phases.
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    pub now_ms: u64,
    pub registry: &'a ClassRegistry,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduledRemoval {
    pub id: EntityId,
    pub delay_ms: u64,
    pub scheduled_at_ms: u64,
}

/// The live entity set of one region, in registration order.
#[derive(Clone, Debug)]
pub struct Level {
    key: String,
    width: i32,
    height: i32,
    entities: Vec<Entity>,
    index: HashMap<EntityId, usize>,
    scheduled: Vec<ScheduledRemoval>,
}

impl Level {
    pub fn new(key: impl Into<String>, width: i32, height: i32) -> Self {
        Self {
            key: key.into(),
            width: width.max(1),
            height: height.max(1),
            entities: Vec::new(),
            index: HashMap::new(),
            scheduled: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.index.get(&id).map(|&idx| &self.entities[idx])
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        let idx = *self.index.get(&id)?;
        Some(&mut self.entities[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.iter_mut()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.iter().map(|entity| entity.id).collect()
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|entity| entity.name == name)
    }

    pub fn terrain_at(&self, x: i32, y: i32) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|entity| entity.is_terrain() && entity.at(x, y))
    }

    pub fn wrap_cell(&self, x: i32, y: i32) -> (i32, i32) {
        (x.rem_euclid(self.width), y.rem_euclid(self.height))
    }

    /// Appends `entity` unless its id is already registered.
    pub fn register(&mut self, entity: Entity) -> bool {
        if self.index.contains_key(&entity.id) {
            return false;
        }
        debug!(level = %self.key, id = %entity.id, class = %entity.class_name, "register");
        self.index.insert(entity.id, self.entities.len());
        self.entities.push(entity);
        true
    }

    /// Removes `id` immediately. The removed entity keeps its own
    /// `children` list; its children keep their (now dangling) parent id.
    pub fn unregister(&mut self, id: EntityId) -> Option<Entity> {
        let idx = self.index.remove(&id)?;
        let entity = self.entities.remove(idx);
        for (offset, moved) in self.entities[idx..].iter().enumerate() {
            self.index.insert(moved.id, idx + offset);
        }
        if let Some(parent) = entity.parent.and_then(|pid| self.get_mut(pid)) {
            parent.children.retain(|child| *child != id);
        }
        self.scheduled.retain(|entry| entry.id != id);
        debug!(level = %self.key, id = %id, class = %entity.class_name, "unregister");
        Some(entity)
    }

    /// Links both directions, detaching `child` from any previous parent.
    pub fn attach(&mut self, parent: EntityId, child: EntityId) -> bool {
        if parent == child || !self.contains(parent) || !self.contains(child) {
            return false;
        }
        self.detach(child);
        if let Some(entity) = self.get_mut(child) {
            entity.parent = Some(parent);
        }
        if let Some(entity) = self.get_mut(parent) {
            if !entity.children.contains(&child) {
                entity.children.push(child);
            }
        }
        true
    }

    pub fn detach(&mut self, child: EntityId) {
        let Some(previous) = self.get_mut(child).and_then(|entity| entity.parent.take()) else {
            return;
        };
        if let Some(parent) = self.get_mut(previous) {
            parent.children.retain(|id| *id != child);
        }
    }

    pub fn reset_frame_flags(&mut self) {
        for entity in &mut self.entities {
            if entity.is_terrain() {
                entity.occupied = false;
            }
        }
    }

    /// Lets every entity whose cadence elapsed perceive its surroundings,
    /// stage interactions against the whole level (itself included) and
    /// choose an action. Decisions read
    /// the level as it was at the start of the phase.
    pub fn run_decide_phase(&mut self, ctx: &StepContext<'_>) {
        let ids = self.ids();
        for idx in 0..self.entities.len() {
            if !self.entities[idx].tick.begin_decide(ctx.now_ms) {
                continue;
            }
            let mut perception = self.entities[idx].perception.take();
            if let Some(state) = perception.as_mut() {
                state.update(&self.entities[idx], self);
            }
            let mut behavior = std::mem::take(&mut self.entities[idx].behavior);
            let action = behavior.decide(&self.entities[idx], self);

            let entity = &mut self.entities[idx];
            entity.prev_x = entity.x;
            entity.prev_y = entity.y;
            entity.behavior = behavior;
            entity.perception = perception;
            entity.staged = action;
            let initiator = entity.id;
            for target in &ids {
                entity.interactions.push(InteractionCommand {
                    initiator,
                    target: *target,
                });
            }
        }
    }

    /// Executes staged actions, flushes due interaction queues and derives
    /// motion state for every entity that decided in the previous pass.
    pub fn run_act_phase(&mut self, ctx: &StepContext<'_>) {
        for id in self.ids() {
            let Some(entity) = self.get_mut(id) else {
                continue;
            };
            if !entity.tick.begin_act() {
                continue;
            }
            let action = entity.staged.take();
            let pushing = matches!(action, Some(actions::Action::Push { .. }));
            if let Some(action) = action {
                self.perform(id, action, ctx);
            }

            let due = self
                .get_mut(id)
                .and_then(|entity| entity.interactions.take_due(ctx.now_ms));
            for command in due.into_iter().flatten() {
                self.execute_command(command, ctx.now_ms);
            }

            if let Some(entity) = self.get_mut(id) {
                entity.motion = if pushing {
                    MotionState::Pushing
                } else if (entity.x, entity.y) != (entity.prev_x, entity.prev_y) {
                    MotionState::Moving
                } else {
                    MotionState::Standing
                };
            }
        }
    }

    /// Asks each capability of the initiator, in declaration order, for
    /// effects against the target and applies them before asking the next.
    pub fn execute_command(&mut self, command: InteractionCommand, now_ms: u64) {
        let Some(capability_count) = self
            .get(command.initiator)
            .map(|entity| entity.capabilities.len())
        else {
            return;
        };
        for position in 0..capability_count {
            let (Some(me), Some(other)) = (self.get(command.initiator), self.get(command.target))
            else {
                return;
            };
            let Some(capability) = me.capabilities.get(position) else {
                return;
            };
            let effects = capability.effects(me, other, self);
            for effect in effects {
                self.apply_effect(effect, now_ms);
            }
        }
    }

    pub fn apply_effect(&mut self, effect: Effect, now_ms: u64) {
        match effect {
            Effect::Occupy { ground } => {
                if let Some(entity) = self.get_mut(ground) {
                    entity.occupied = true;
                }
            }
            Effect::Contact { initiator, target } => {
                let Some((a, b)) = self.pair_mut(initiator, target) else {
                    return;
                };
                let (left, right) = contact_exchange(body(a), body(b));
                trace!(a = %a.name, b = %b.name, inertia = left.inertia, "contact");
                a.inertia = left.inertia;
                a.direction = left.direction;
                b.inertia = right.inertia;
                b.direction = right.direction;
            }
            Effect::HeatExchange {
                initiator,
                target,
                policy,
            } => {
                let Some((a, b)) = self.pair_mut(initiator, target) else {
                    return;
                };
                match policy {
                    HeatPolicy::MassWeighted => {
                        let shared =
                            mass_weighted_temperature(a.temperature, a.mass, b.temperature, b.mass);
                        a.temperature = shared;
                        b.temperature = shared;
                    }
                    HeatPolicy::Halfway => {
                        let (ta, tb) = halfway_temperatures(a.temperature, b.temperature);
                        a.temperature = ta;
                        b.temperature = tb;
                    }
                }
            }
            Effect::Explode { id } => {
                if let Some(entity) = self.get_mut(id) {
                    entity.health = 0.0;
                    entity.inertia = 0.0;
                }
            }
            Effect::KeepMoving { id } => self.keep_on_moving(id),
            Effect::Damage { id, amount } => {
                if let Some(entity) = self.get_mut(id) {
                    entity.health -= amount;
                }
            }
            Effect::RelaxTemperature { id, equilibrium } => {
                if let Some(entity) = self.get_mut(id) {
                    entity.temperature = relax_toward(entity.temperature, equilibrium);
                }
            }
            Effect::DecayHealth { id } => {
                if let Some(entity) = self.get_mut(id) {
                    if entity.health > 0.0 {
                        entity.health -= 1.0;
                    }
                }
            }
            Effect::ScheduleRemoval { id, grace_ms } => {
                self.schedule_to_unregister(id, grace_ms, now_ms);
            }
            Effect::FollowParent { child, on_top } => self.follow_parent(child, on_top),
        }
    }

    /// Marks `id` for removal after `delay_ms`. Already scheduled entities
    /// are left alone.
    pub fn schedule_to_unregister(&mut self, id: EntityId, delay_ms: u64, now_ms: u64) -> bool {
        if !self.contains(id) || self.is_scheduled(id) {
            return false;
        }
        if let Some(entity) = self.get(id) {
            info!(level = %self.key, name = %entity.name, delay_ms, "scheduled to die");
        }
        self.scheduled.push(ScheduledRemoval {
            id,
            delay_ms,
            scheduled_at_ms: now_ms,
        });
        true
    }

    pub fn is_scheduled(&self, id: EntityId) -> bool {
        self.scheduled.iter().any(|entry| entry.id == id)
    }

    pub fn scheduled(&self) -> &[ScheduledRemoval] {
        &self.scheduled
    }

    /// Unregisters every entity whose grace period has elapsed.
    pub fn expire_deferred_deaths(&mut self, now_ms: u64) -> Vec<EntityId> {
        let (expired, pending): (Vec<ScheduledRemoval>, Vec<ScheduledRemoval>) = self
            .scheduled
            .drain(..)
            .partition(|entry| now_ms.saturating_sub(entry.scheduled_at_ms) >= entry.delay_ms);
        self.scheduled = pending;
        expired
            .into_iter()
            .filter_map(|entry| self.unregister(entry.id).map(|entity| entity.id))
            .collect()
    }

    pub fn wrap_positions(&mut self, width: i32, height: i32) {
        let width = width.max(1);
        let height = height.max(1);
        for entity in &mut self.entities {
            entity.x = entity.x.rem_euclid(width);
            entity.y = entity.y.rem_euclid(height);
        }
    }

    /// Entities sorted by ascending z-level; ties keep registration order.
    pub fn iter_by_draw_order(&self) -> Vec<&Entity> {
        let mut ordered: Vec<&Entity> = self.entities.iter().collect();
        ordered.sort_by(|a, b| a.z_level.total_cmp(&b.z_level));
        ordered
    }

    pub fn snapshot(&self) -> Vec<EntityRecord> {
        self.entities.iter().map(Entity::to_record).collect()
    }

    /// One full local step: the server splits this up to broadcast between
    /// the decide and act phases.
    pub fn step(&mut self, ctx: &StepContext<'_>) -> Vec<EntityId> {
        self.reset_frame_flags();
        self.run_decide_phase(ctx);
        self.run_act_phase(ctx);
        self.wrap_positions(self.width, self.height);
        self.expire_deferred_deaths(ctx.now_ms)
    }

    fn pair_mut(&mut self, a: EntityId, b: EntityId) -> Option<(&mut Entity, &mut Entity)> {
        let ia = *self.index.get(&a)?;
        let ib = *self.index.get(&b)?;
        if ia == ib {
            return None;
        }
        if ia < ib {
            let (head, tail) = self.entities.split_at_mut(ib);
            Some((&mut head[ia], &mut tail[0]))
        } else {
            let (head, tail) = self.entities.split_at_mut(ia);
            Some((&mut tail[0], &mut head[ib]))
        }
    }

    fn follow_parent(&mut self, child: EntityId, on_top: bool) {
        let Some(parent) = self
            .get(child)
            .and_then(|entity| entity.parent)
            .and_then(|pid| self.get(pid))
        else {
            return;
        };
        let (x, y, prev_x, prev_y, direction, motion, z) = (
            parent.x,
            parent.y,
            parent.prev_x,
            parent.prev_y,
            parent.direction,
            parent.motion,
            parent.z_level,
        );
        if let Some(entity) = self.get_mut(child) {
            entity.x = x;
            entity.y = y;
            entity.prev_x = prev_x;
            entity.prev_y = prev_y;
            entity.direction = direction;
            entity.motion = motion;
            if on_top && entity.z_level <= z {
                entity.z_level = z + 1.0;
            }
        }
    }
}

fn body(entity: &Entity) -> Body {
    Body {
        mass: entity.mass,
        inertia: entity.inertia,
        direction: entity.direction,
    }
}
