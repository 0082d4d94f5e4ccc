use crate::entity::{Entity, EntityId};
use crate::level::actions::Action;
use crate::level::Level;
use crate::rng::Rng;
use crate::types::{Direction, InputState};

/// Accept-latch over the whole key state. A pressed state fires once, then
/// every further non-idle state is dropped until a release has been observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyLatch {
    accepting: bool,
}

impl Default for KeyLatch {
    fn default() -> Self {
        Self { accepting: true }
    }
}

impl KeyLatch {
    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub fn release(&mut self) {
        self.accepting = true;
    }

    pub fn filter(&mut self, input: InputState) -> InputState {
        if input.is_idle() {
            self.release();
            return input;
        }
        if self.accepting {
            self.accepting = false;
            return input;
        }
        InputState::default()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Controller {
    pub latch: KeyLatch,
    pending: InputState,
}

impl Controller {
    /// Replaces the pending input slot with the latest key state. An idle
    /// state re-arms the latch even if it is overwritten before the next tick.
    pub fn offer(&mut self, input: InputState) {
        if input.is_idle() {
            self.latch.release();
        }
        self.pending = input;
    }

    pub fn pending(&self) -> InputState {
        self.pending
    }
}

#[derive(Clone, Debug)]
pub struct Wanderer {
    pub rng: Rng,
    pub phrases: Vec<String>,
    pub speak_chance: f32,
    pub move_chance: f32,
}

impl Wanderer {
    pub fn new(rng: Rng, phrases: &[&str]) -> Self {
        Self {
            rng,
            phrases: phrases.iter().map(|phrase| phrase.to_string()).collect(),
            speak_chance: 0.5,
            move_chance: 0.5,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub enum Behavior {
    #[default]
    Inert,
    Controlled(Controller),
    Wander(Wanderer),
}

impl Behavior {
    pub fn controller_mut(&mut self) -> Option<&mut Controller> {
        match self {
            Behavior::Controlled(controller) => Some(controller),
            _ => None,
        }
    }

    /// Chooses at most one action from a read-only view of the level.
    pub fn decide(&mut self, me: &Entity, level: &Level) -> Option<Action> {
        match self {
            Behavior::Inert => None,
            Behavior::Controlled(controller) => {
                let input = controller.latch.filter(controller.pending);
                decide_from_input(me, level, input)
            }
            Behavior::Wander(wanderer) => {
                if !wanderer.phrases.is_empty() && wanderer.rng.bool(wanderer.speak_chance) {
                    let idx = wanderer.rng.pick_index(wanderer.phrases.len());
                    return Some(Action::Speak(wanderer.phrases[idx].clone()));
                }
                if wanderer.rng.bool(wanderer.move_chance) {
                    let direction = wanderer.rng.direction();
                    return Some(plan_step(me, level, direction, false));
                }
                None
            }
        }
    }
}

fn decide_from_input(me: &Entity, level: &Level, input: InputState) -> Option<Action> {
    if input.cast {
        return Some(Action::Cast);
    }
    if input.grab {
        if let Some(target) = grab_target(me, level) {
            return Some(Action::Grab { target });
        }
    }
    input
        .direction()
        .map(|direction| plan_step(me, level, direction, true))
}

/// Move, push or halt toward `direction`, judged against the current level.
pub fn plan_step(me: &Entity, level: &Level, direction: Direction, may_push: bool) -> Action {
    let (dx, dy) = direction.delta();
    let (x, y) = level.wrap_cell(me.x + dx, me.y + dy);

    if let Some(target) = level
        .iter()
        .find(|other| other.at(x, y) && other.is_pushable() && !is_own(me, other))
    {
        return if may_push {
            Action::Push {
                target: target.id,
                direction,
            }
        } else {
            Action::Halt(direction)
        };
    }
    if cell_blocked(level, x, y, me) {
        Action::Halt(direction)
    } else {
        Action::Move(direction)
    }
}

/// A cell is blocked without ground or with an encumbrant occupant.
pub fn cell_blocked(level: &Level, x: i32, y: i32, mover: &Entity) -> bool {
    if level.terrain_at(x, y).is_none() {
        return true;
    }
    level.iter().any(|other| {
        other.at(x, y)
            && !other.is_terrain()
            && other.is_encumbrant
            && other.id != mover.id
            && !is_own(mover, other)
    })
}

fn grab_target(me: &Entity, level: &Level) -> Option<EntityId> {
    let (dx, dy) = me.direction.delta();
    let ahead = level.wrap_cell(me.x + dx, me.y + dy);
    let candidates = |x: i32, y: i32| {
        level.iter().find(|other| {
            other.at(x, y) && other.is_grabbable && other.parent.is_none() && other.id != me.id
        })
    };
    candidates(me.x, me.y)
        .or_else(|| candidates(ahead.0, ahead.1))
        .map(|other| other.id)
}

fn is_own(me: &Entity, other: &Entity) -> bool {
    other.parent == Some(me.id)
}
