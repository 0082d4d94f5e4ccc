//! Batched pairwise interactions.
//!
//! During its decide phase an entity queues one [`InteractionCommand`] per
//! registered entity, itself included. The queue is flushed on the
//! scheduler's own interval; each command asks every capability the
//! initiator declares for effects against the target and applies them in
//! declaration order.

mod capability;
pub mod physics;

pub use capability::{Capability, Effect, HeatPolicy};

use crate::entity::EntityId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InteractionCommand {
    pub initiator: EntityId,
    pub target: EntityId,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InteractionScheduler {
    queue: Vec<InteractionCommand>,
    pub interval_ms: u64,
    pub last_flush_ms: u64,
}

impl InteractionScheduler {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            queue: Vec::new(),
            interval_ms,
            last_flush_ms: 0,
        }
    }

    pub fn push(&mut self, command: InteractionCommand) {
        self.queue.push(command);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_flush_ms) >= self.interval_ms
    }

    /// Drains the queue in enqueue order if the interval has elapsed.
    pub fn take_due(&mut self, now_ms: u64) -> Option<Vec<InteractionCommand>> {
        if !self.is_due(now_ms) {
            return None;
        }
        self.last_flush_ms = now_ms;
        Some(std::mem::take(&mut self.queue))
    }
}
