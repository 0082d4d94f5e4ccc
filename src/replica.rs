//! Client-side mirror of one server level, rebuilt from each snapshot.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::constants::{WORLD_HEIGHT, WORLD_WIDTH};
use crate::entity::{Entity, EntityId};
use crate::error::SimResult;
use crate::level::Level;
use crate::protocol::EntityRecord;
use crate::registry::ClassRegistry;
use crate::types::PortalLink;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub switched_level: bool,
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub dangling_parents: usize,
}

pub struct Replica {
    level: Level,
    registry: ClassRegistry,
    player_id: EntityId,
}

impl Replica {
    pub fn new(registry: ClassRegistry, level_key: &str, player_id: EntityId) -> Self {
        Self {
            level: Level::new(level_key, WORLD_WIDTH, WORLD_HEIGHT),
            registry,
            player_id,
        }
    }

    pub fn level(&self) -> &Level {
        &self.level
    }

    pub fn level_key(&self) -> &str {
        self.level.key()
    }

    pub fn player_id(&self) -> EntityId {
        self.player_id
    }

    pub fn player(&self) -> Option<&Entity> {
        self.level.get(self.player_id)
    }

    /// The link of a portal sharing the local player's cell, if any.
    pub fn portal_underfoot(&self) -> Option<PortalLink> {
        let player = self.player()?;
        self.level
            .iter()
            .filter(|entity| entity.id != player.id && entity.at(player.x, player.y))
            .find_map(|entity| entity.portal.clone())
    }

    /// Makes the local level mirror `records`. An unknown class name aborts
    /// the pass; a parent id missing from `records` is tolerated.
    pub fn reconcile(
        &mut self,
        level_key: &str,
        records: &[EntityRecord],
    ) -> SimResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        if level_key != self.level.key() {
            info!(from = %self.level.key(), to = level_key, "switching displayed level");
            self.level = Level::new(level_key, WORLD_WIDTH, WORLD_HEIGHT);
            report.switched_level = true;
        }

        for record in records {
            if let Some(entity) = self.level.get_mut(record.id) {
                entity.apply_record(record);
                report.updated += 1;
                continue;
            }
            let mut entity = self
                .registry
                .create(&record.class_name, Entity::seed_from_record(record))?;
            entity.id = record.id;
            entity.apply_record(record);
            self.level.register(entity);
            report.created += 1;
        }

        let incoming: HashSet<EntityId> = records.iter().map(|record| record.id).collect();
        report.dangling_parents = self.rebuild_children(&incoming);

        for id in self.level.ids() {
            if !incoming.contains(&id) {
                self.level.unregister(id);
                report.removed += 1;
            }
        }

        self.snap_followers_to_parents();
        debug!(level = %self.level.key(), ?report, "reconciled snapshot");
        Ok(report)
    }

    fn rebuild_children(&mut self, incoming: &HashSet<EntityId>) -> usize {
        for entity in self.level.iter_mut() {
            entity.children.clear();
        }
        let links: Vec<(EntityId, EntityId)> = self
            .level
            .iter()
            .filter_map(|entity| entity.parent.map(|parent| (parent, entity.id)))
            .collect();

        let mut orphans = Vec::new();
        for (parent, child) in links {
            match self.level.get_mut(parent) {
                Some(entity) if incoming.contains(&parent) => entity.children.push(child),
                _ => orphans.push(child),
            }
        }
        // Parentless for this frame; the next snapshot restores the link.
        for child in &orphans {
            if let Some(entity) = self.level.get_mut(*child) {
                entity.parent = None;
            }
        }
        orphans.len()
    }

    fn snap_followers_to_parents(&mut self) {
        let moves: Vec<(EntityId, i32, i32)> = self
            .level
            .iter()
            .filter(|entity| entity.follows_parent)
            .filter_map(|entity| {
                let parent = self.level.get(entity.parent?)?;
                Some((entity.id, parent.x, parent.y))
            })
            .collect();
        for (id, x, y) in moves {
            if let Some(entity) = self.level.get_mut(id) {
                entity.x = x;
                entity.y = y;
            }
        }
    }
}
