pub const TICK_RATE: u32 = 10;
pub const TICK_MS: u64 = 1000 / TICK_RATE as u64;
pub const INPUT_SEND_MS: u64 = 50;
pub const RENDER_MS: u64 = 100;

pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 1_000;
pub const OUTBOUND_QUEUE_LEN: usize = 64;
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;
pub const SCHEMA_VERSION: u32 = 1;

pub const TILE_SIZE: i32 = 64;
pub const WORLD_WIDTH: i32 = 800 / TILE_SIZE;
pub const WORLD_HEIGHT: i32 = 600 / TILE_SIZE;

pub const START_LEVEL: &str = "level_0";
pub const PLAYER_SPAWN: (i32, i32) = (5, 5);

pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1_000;
pub const ATTACHMENT_FLUSH_INTERVAL_MS: u64 = 100;
pub const DEFAULT_DEATH_GRACE_MS: u64 = 1_000;

pub const DEATH_EPSILON: f32 = 0.001;
pub const CONTACT_DISTANCE: f32 = 0.1;
pub const ENCUMBRANCE_DISTANCE: f32 = 1.0;
pub const MOVE_THRESHOLD: f32 = 0.1;
pub const PUSH_INERTIA: f32 = 2.0;
pub const FIREBALL_INERTIA: f32 = 2.0;

pub const DEFAULT_MASS: f32 = 2.2;
pub const DEFAULT_TEMPERATURE: f32 = 36.5;
pub const BODY_TEMPERATURE: f32 = 36.3;

pub const PERCEPTION_HISTORY_LEN: usize = 10;
pub const DEFAULT_VISION_RANGE: i32 = 5;
pub const DEFAULT_HEARING_RANGE: i32 = 5;

/// Hold duration applied to a key tapped on a line-based terminal.
pub const KEY_HOLD_MS: u64 = 400;

pub fn tick_period_ms(actions_per_second: f32) -> f64 {
    let aps = if actions_per_second > 0.0 && actions_per_second.is_finite() {
        actions_per_second as f64
    } else {
        f64::from(f32::MIN_POSITIVE)
    };
    1000.0 / aps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_grid_matches_window_in_tiles() {
        assert_eq!(WORLD_WIDTH, 12);
        assert_eq!(WORLD_HEIGHT, 9);
    }

    #[test]
    fn zero_cadence_gives_huge_but_finite_period() {
        let period = tick_period_ms(0.0);
        assert!(period.is_finite());
        assert!(period > 1.0e30);
        assert_eq!(tick_period_ms(4.0), 250.0);
    }
}
