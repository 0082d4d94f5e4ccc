//! Sight and hearing for animate entities, with a short memory of what
//! each decision pass noticed.

use std::collections::VecDeque;

use crate::constants::PERCEPTION_HISTORY_LEN;
use crate::entity::{Entity, EntityId};
use crate::level::Level;

/// How noticeable an entity is to others.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Salience {
    pub noise_intensity: f32,
    pub attractiveness: f32,
    pub visible_size: f32,
}

impl Salience {
    pub const fn new(noise_intensity: f32, attractiveness: f32, visible_size: f32) -> Self {
        Self {
            noise_intensity,
            attractiveness,
            visible_size,
        }
    }
}

/// Which senses an observer has and how far each reaches, in cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Senses {
    pub sight: Option<i32>,
    pub hearing: Option<i32>,
}

impl Senses {
    pub fn new(vision_range: i32, hearing_range: i32) -> Self {
        Self {
            sight: Some(vision_range),
            hearing: Some(hearing_range),
        }
    }
}

/// One perceived entity, relative to the observer. Fields a sense did not
/// reach stay `None`.
#[derive(Clone, Debug, PartialEq)]
pub struct Representation {
    pub id: EntityId,
    pub class_name: String,
    pub dx: i32,
    pub dy: i32,
    pub visible_size: Option<f32>,
    pub attractiveness: Option<f32>,
    pub noise_intensity: Option<f32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InternalState {
    pub senses: Senses,
    history: VecDeque<Vec<Representation>>,
    capacity: usize,
}

impl InternalState {
    pub fn new(senses: Senses) -> Self {
        Self::with_capacity(senses, PERCEPTION_HISTORY_LEN)
    }

    pub fn with_capacity(senses: Senses, capacity: usize) -> Self {
        Self {
            senses,
            history: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Records one frame of perception for `me`, dropping the oldest frame
    /// once the history is full.
    pub fn update(&mut self, me: &Entity, level: &Level) {
        let frame: Vec<Representation> = level
            .iter()
            .filter(|other| other.id != me.id && !other.is_terrain())
            .filter_map(|other| self.sense(me, other))
            .collect();
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(frame);
    }

    pub fn latest_perception(&self) -> &[Representation] {
        self.history.back().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn history(&self) -> impl Iterator<Item = &[Representation]> {
        self.history.iter().map(Vec::as_slice)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn sense(&self, me: &Entity, other: &Entity) -> Option<Representation> {
        let distance = me.distance(other);
        let within = |range: Option<i32>| range.is_some_and(|r| distance <= r as f32);
        let seen = within(self.senses.sight);
        let heard = within(self.senses.hearing);
        if !seen && !heard {
            return None;
        }
        Some(Representation {
            id: other.id,
            class_name: other.class_name.clone(),
            dx: other.x - me.x,
            dy: other.y - me.y,
            visible_size: seen.then_some(other.salience.visible_size),
            attractiveness: seen.then_some(other.salience.attractiveness),
            noise_intensity: heard.then_some(other.salience.noise_intensity),
        })
    }
}
