use crate::constants::{CONTACT_DISTANCE, ENCUMBRANCE_DISTANCE};
use crate::entity::{Entity, EntityId};
use crate::interaction::physics::bound_violations;
use crate::level::Level;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeatPolicy {
    MassWeighted,
    Halfway,
}

/// One pluggable interaction behaviour. An entity declares an ordered list
/// of these; adding a new interaction means adding a variant and its arm in
/// [`Capability::effects`].
#[derive(Clone, Debug, PartialEq)]
pub enum Capability {
    /// Walkable ground tile.
    Terrain,
    /// Ground that becomes occupied when an encumbrant entity stands on it.
    Encumbrance,
    Contact,
    HeatExchange(HeatPolicy),
    ExplodeAtTouch,
    Friction,
    TemperatureDamage {
        lower: f32,
        upper: f32,
        equilibrium: f32,
    },
    InertiaDamage {
        lower: f32,
        upper: f32,
    },
    HealthDecay,
    HeatDissipation {
        equilibrium: f32,
    },
    Mortal {
        grace_ms: u64,
    },
    ParentBound {
        grace_ms: u64,
    },
    AttachedToParent {
        on_top: bool,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    Occupy {
        ground: EntityId,
    },
    Contact {
        initiator: EntityId,
        target: EntityId,
    },
    HeatExchange {
        initiator: EntityId,
        target: EntityId,
        policy: HeatPolicy,
    },
    Explode {
        id: EntityId,
    },
    KeepMoving {
        id: EntityId,
    },
    Damage {
        id: EntityId,
        amount: f32,
    },
    RelaxTemperature {
        id: EntityId,
        equilibrium: f32,
    },
    DecayHealth {
        id: EntityId,
    },
    ScheduleRemoval {
        id: EntityId,
        grace_ms: u64,
    },
    FollowParent {
        child: EntityId,
        on_top: bool,
    },
}

fn touching(me: &Entity, other: &Entity) -> bool {
    me.id != other.id && me.distance(other) < CONTACT_DISTANCE
}

impl Capability {
    /// Runs this capability's self-check for the pair and returns the
    /// effects to apply, if any.
    pub fn effects(&self, me: &Entity, other: &Entity, level: &Level) -> Vec<Effect> {
        let is_self = me.id == other.id;
        match self {
            Capability::Terrain => Vec::new(),
            Capability::Encumbrance => {
                if !other.is_terrain()
                    && other.is_encumbrant
                    && me.distance(other) < ENCUMBRANCE_DISTANCE
                {
                    vec![Effect::Occupy { ground: me.id }]
                } else {
                    Vec::new()
                }
            }
            Capability::Contact => {
                if other.has_contact() && touching(me, other) {
                    vec![Effect::Contact {
                        initiator: me.id,
                        target: other.id,
                    }]
                } else {
                    Vec::new()
                }
            }
            Capability::HeatExchange(policy) => {
                if other.exchanges_heat() && touching(me, other) {
                    vec![Effect::HeatExchange {
                        initiator: me.id,
                        target: other.id,
                        policy: *policy,
                    }]
                } else {
                    Vec::new()
                }
            }
            Capability::ExplodeAtTouch => {
                if other.exchanges_heat() && touching(me, other) {
                    vec![Effect::Explode { id: me.id }]
                } else {
                    Vec::new()
                }
            }
            Capability::Friction if is_self => vec![Effect::KeepMoving { id: me.id }],
            Capability::TemperatureDamage {
                lower,
                upper,
                equilibrium,
            } if is_self => {
                let mut out = Vec::new();
                let violations = bound_violations(me.temperature, *lower, *upper);
                if violations > 0 {
                    out.push(Effect::Damage {
                        id: me.id,
                        amount: violations as f32,
                    });
                }
                out.push(Effect::RelaxTemperature {
                    id: me.id,
                    equilibrium: *equilibrium,
                });
                out
            }
            Capability::InertiaDamage { lower, upper } if is_self => {
                match bound_violations(me.inertia, *lower, *upper) {
                    0 => Vec::new(),
                    violations => vec![Effect::Damage {
                        id: me.id,
                        amount: violations as f32,
                    }],
                }
            }
            Capability::HealthDecay if is_self && me.health > 0.0 => {
                vec![Effect::DecayHealth { id: me.id }]
            }
            Capability::HeatDissipation { equilibrium } if is_self => {
                vec![Effect::RelaxTemperature {
                    id: me.id,
                    equilibrium: *equilibrium,
                }]
            }
            Capability::Mortal { grace_ms } if is_self && me.is_dead() => {
                vec![Effect::ScheduleRemoval {
                    id: me.id,
                    grace_ms: *grace_ms,
                }]
            }
            Capability::ParentBound { grace_ms } if is_self => {
                let Some(parent_id) = me.parent else {
                    return Vec::new();
                };
                let parent_gone = level
                    .get(parent_id)
                    .map(|parent| parent.is_dead())
                    .unwrap_or(true);
                if parent_gone {
                    vec![Effect::ScheduleRemoval {
                        id: me.id,
                        grace_ms: *grace_ms,
                    }]
                } else {
                    Vec::new()
                }
            }
            Capability::AttachedToParent { on_top } if is_self && me.parent.is_some() => {
                vec![Effect::FollowParent {
                    child: me.id,
                    on_top: *on_top,
                }]
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntitySeed;

    fn entity(class: &str, x: i32, y: i32, capabilities: Vec<Capability>) -> Entity {
        let mut entity = Entity::new(class, EntitySeed::new(class, x, y, 10.0));
        entity.capabilities = capabilities;
        entity
    }

    #[test]
    fn contact_requires_both_sides_and_same_cell() {
        let level = Level::new("test", 12, 9);
        let a = entity("Stone", 1, 1, vec![Capability::Contact]);
        let b = entity("Stone", 1, 1, vec![Capability::Contact]);
        let far = entity("Stone", 2, 1, vec![Capability::Contact]);
        let inert = entity("Portal", 1, 1, Vec::new());

        assert_eq!(Capability::Contact.effects(&a, &b, &level).len(), 1);
        assert!(Capability::Contact.effects(&a, &far, &level).is_empty());
        assert!(Capability::Contact.effects(&a, &inert, &level).is_empty());
        assert!(Capability::Contact.effects(&a, &a, &level).is_empty());
    }

    #[test]
    fn self_directed_capabilities_ignore_other_targets() {
        let level = Level::new("test", 12, 9);
        let me = entity("Stone", 0, 0, vec![Capability::Friction]);
        let other = entity("Stone", 0, 0, vec![Capability::Friction]);
        assert!(Capability::Friction.effects(&me, &other, &level).is_empty());
        assert_eq!(
            Capability::Friction.effects(&me, &me, &level),
            vec![Effect::KeepMoving { id: me.id }]
        );
    }

    #[test]
    fn temperature_damage_counts_violations_then_relaxes() {
        let level = Level::new("test", 12, 9);
        let mut me = entity("Player", 0, 0, Vec::new());
        me.temperature = 80.0;
        let cap = Capability::TemperatureDamage {
            lower: 30.0,
            upper: 42.0,
            equilibrium: 36.0,
        };
        let effects = cap.effects(&me, &me, &level);
        assert_eq!(
            effects,
            vec![
                Effect::Damage {
                    id: me.id,
                    amount: 1.0
                },
                Effect::RelaxTemperature {
                    id: me.id,
                    equilibrium: 36.0
                },
            ]
        );
    }

    #[test]
    fn encumbrance_ignores_other_ground() {
        let level = Level::new("test", 12, 9);
        let ground = entity("Ground", 3, 3, vec![Capability::Terrain, Capability::Encumbrance]);
        let other_ground = entity("Ground", 3, 3, vec![Capability::Terrain]);
        let stone = entity("Stone", 3, 3, vec![Capability::Contact]);
        assert!(Capability::Encumbrance
            .effects(&ground, &other_ground, &level)
            .is_empty());
        assert_eq!(
            Capability::Encumbrance.effects(&ground, &stone, &level),
            vec![Effect::Occupy { ground: ground.id }]
        );
    }

    #[test]
    fn parent_bound_dies_with_missing_parent() {
        let level = Level::new("test", 12, 9);
        let mut child = entity("RobeTorso", 0, 0, Vec::new());
        let cap = Capability::ParentBound { grace_ms: 500 };
        assert!(cap.effects(&child, &child, &level).is_empty());

        child.parent = Some(EntityId::new());
        assert_eq!(
            cap.effects(&child, &child, &level),
            vec![Effect::ScheduleRemoval {
                id: child.id,
                grace_ms: 500
            }]
        );
    }
}
