use serde::{Deserialize, Serialize};

use crate::constants::tick_period_ms;

/// Per-entity cadence. Decides when the owner thinks (decide phase) and
/// arms the following act phase.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickScheduler {
    pub actions_per_second: f32,
    pub last_tick: u64,
    pub has_just_decided: bool,
}

impl Default for TickScheduler {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl TickScheduler {
    pub fn new(actions_per_second: f32) -> Self {
        Self {
            actions_per_second,
            last_tick: 0,
            has_just_decided: false,
        }
    }

    pub fn tick_index(&self, now_ms: u64) -> u64 {
        (now_ms as f64 / tick_period_ms(self.actions_per_second)).floor() as u64
    }

    /// Returns true when a new tick index has been reached since the last
    /// decision. Skipped indices are not replayed.
    pub fn begin_decide(&mut self, now_ms: u64) -> bool {
        let index = self.tick_index(now_ms);
        if index <= self.last_tick {
            return false;
        }
        self.last_tick = index;
        self.has_just_decided = true;
        true
    }

    pub fn begin_act(&mut self) -> bool {
        if !self.has_just_decided {
            return false;
        }
        self.has_just_decided = false;
        true
    }
}
