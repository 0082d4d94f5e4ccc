use crate::types::Direction;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Body {
    pub mass: f32,
    pub inertia: f32,
    pub direction: Direction,
}

/// Inelastic-looking collision along one axis. Both bodies leave with the
/// same speed; directions flip when both were moving, otherwise the resting
/// body takes the moving body's heading.
pub fn contact_exchange(a: Body, b: Body) -> (Body, Body) {
    let total_mass = a.mass + b.mass;
    if total_mass <= 0.0 {
        return (a, b);
    }
    let shared = ((a.mass * a.inertia + b.mass * b.inertia) / total_mass).abs();

    let (dir_a, dir_b) = if a.inertia > 0.0 && b.inertia > 0.0 {
        (a.direction.reverse(), b.direction.reverse())
    } else if a.inertia == 0.0 && b.inertia > 0.0 {
        (b.direction, b.direction)
    } else if b.inertia == 0.0 && a.inertia > 0.0 {
        (a.direction, a.direction)
    } else {
        (a.direction, b.direction)
    };

    (
        Body {
            inertia: shared,
            direction: dir_a,
            ..a
        },
        Body {
            inertia: shared,
            direction: dir_b,
            ..b
        },
    )
}

pub fn mass_weighted_temperature(t1: f32, m1: f32, t2: f32, m2: f32) -> f32 {
    let total_mass = m1 + m2;
    if total_mass <= 0.0 {
        return (t1 + t2) / 2.0;
    }
    (t1 * m1 + t2 * m2) / total_mass
}

/// Each side moves half of the way toward the common average.
pub fn halfway_temperatures(t1: f32, t2: f32) -> (f32, f32) {
    let average = (t1 + t2) / 2.0;
    (t1 + (average - t1) / 2.0, t2 + (average - t2) / 2.0)
}

pub fn relax_toward(value: f32, equilibrium: f32) -> f32 {
    value - (value - equilibrium) / 2.0
}

pub fn bound_violations(value: f32, lower: f32, upper: f32) -> u32 {
    u32::from(value > upper) + u32::from(value < lower)
}

pub fn friction_after_step(inertia: f32, friction_coefficient: f32) -> f32 {
    (inertia - friction_coefficient).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn moving_body_drags_resting_body() {
        let (a, b) = contact_exchange(
            Body {
                mass: 2.0,
                inertia: 4.0,
                direction: Direction::Right,
            },
            Body {
                mass: 2.0,
                inertia: 0.0,
                direction: Direction::Up,
            },
        );
        assert!(approx_eq(a.inertia, 2.0));
        assert!(approx_eq(b.inertia, 2.0));
        assert_eq!(a.direction, Direction::Right);
        assert_eq!(b.direction, Direction::Right);
    }

    #[test]
    fn resting_initiator_adopts_target_heading() {
        let (a, b) = contact_exchange(
            Body {
                mass: 1.0,
                inertia: 0.0,
                direction: Direction::Down,
            },
            Body {
                mass: 3.0,
                inertia: 4.0,
                direction: Direction::Left,
            },
        );
        assert!(approx_eq(a.inertia, 3.0));
        assert_eq!(a.direction, Direction::Left);
        assert_eq!(b.direction, Direction::Left);
    }

    #[test]
    fn head_on_collision_reverses_both() {
        let (a, b) = contact_exchange(
            Body {
                mass: 1.0,
                inertia: 1.0,
                direction: Direction::Right,
            },
            Body {
                mass: 1.0,
                inertia: 3.0,
                direction: Direction::Left,
            },
        );
        assert!(approx_eq(a.inertia, 2.0));
        assert_eq!(a.direction, Direction::Left);
        assert_eq!(b.direction, Direction::Right);
    }

    #[test]
    fn massless_pair_is_left_untouched() {
        let body = Body {
            mass: 0.0,
            inertia: 1.0,
            direction: Direction::Up,
        };
        assert_eq!(contact_exchange(body, body), (body, body));
    }

    #[test]
    fn heat_policies() {
        assert!(approx_eq(mass_weighted_temperature(10.0, 1.0, 40.0, 2.0), 30.0));
        let (a, b) = halfway_temperatures(10.0, 30.0);
        assert!(approx_eq(a, 15.0));
        assert!(approx_eq(b, 25.0));
        assert!(approx_eq(relax_toward(50.0, 30.0), 40.0));
    }

    #[test]
    fn violations_count_each_bound() {
        assert_eq!(bound_violations(5.0, 0.0, 10.0), 0);
        assert_eq!(bound_violations(11.0, 0.0, 10.0), 1);
        assert_eq!(bound_violations(-1.0, 0.0, 10.0), 1);
        assert_eq!(bound_violations(0.0, 1.0, -1.0), 2);
    }

    #[test]
    fn friction_floors_at_zero() {
        assert!(approx_eq(friction_after_step(2.0, 0.5), 1.5));
        assert!(approx_eq(friction_after_step(0.3, 1.0), 0.0));
    }
}
