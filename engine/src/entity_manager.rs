//! Entity lifecycle: the generational arena that owns every stat block,
//! the creature prototype cache, map (re)population, power-spawn
//! handling, and the nearest/focus queries.

use std::path::{Path, PathBuf};

use emberfall_core::geometry::{calc_dist, FPoint, Point};
use emberfall_core::stats::Stat;

use crate::collision::{CollideType, MovementType};
use crate::entity::Entity;
use crate::ids::{EntityId, POWER_NONE};
use crate::session::GameSession;
use crate::stat_block::{EntityFlags, EntityState, SpawnLevelMode, StatBlock};

struct Slot {
    generation: u32,
    entity: Option<Entity>,
}

/// Generational arena. Slots are recycled; their generation bumps on
/// removal so stale ids resolve to nothing.
#[derive(Default)]
pub struct EntityArena {
    slots: Vec<Slot>,
}

impl EntityArena {
    pub fn insert(&mut self, entity: Entity) -> EntityId {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.entity.is_none() {
                slot.entity = Some(entity);
                return EntityId::new(i as u32, slot.generation);
            }
        }
        self.slots.push(Slot {
            generation: 0,
            entity: Some(entity),
        });
        EntityId::new(self.slots.len() as u32 - 1, 0)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entity.as_ref()
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entity.as_mut()
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entity = slot.entity.take();
        if entity.is_some() {
            slot.generation = slot.generation.wrapping_add(1);
        }
        entity
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    /// Live handles in slot order. Collected up front so callers can
    /// mutate the arena while walking.
    pub fn ids(&self) -> Vec<EntityId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.entity.is_some())
            .map(|(i, s)| EntityId::new(i as u32, s.generation))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entity.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One creature definition known to the current game: its file, the
/// categories it spawns under, and its base level.
#[derive(Clone, Debug)]
pub struct CreatureEntry {
    pub filename: PathBuf,
    pub categories: Vec<String>,
    pub level: i32,
}

/// Index of every creature file under `<data>/enemies/`, used to resolve
/// spawn categories. Files are scanned in name order so category picks
/// stay deterministic.
#[derive(Default)]
pub struct CreatureCatalog {
    pub entries: Vec<CreatureEntry>,
}

impl CreatureCatalog {
    pub fn load(dir: &Path, settings: &emberfall_core::settings::EngineSettings) -> Self {
        let mut entries = Vec::new();
        let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(rd) => rd
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().map(|x| x == "txt").unwrap_or(false))
                .collect(),
            Err(_) => {
                log::info!("CreatureCatalog: no enemies directory at '{}'", dir.display());
                Vec::new()
            }
        };
        files.sort();

        for file in files {
            match StatBlock::load(&file, settings) {
                Ok(stats) => entries.push(CreatureEntry {
                    filename: file,
                    categories: stats.categories.clone(),
                    level: stats.level,
                }),
                Err(e) => log::error!("CreatureCatalog: {:#}", e),
            }
        }
        Self { entries }
    }

    /// All creatures matching a category (or exact file stem).
    pub fn in_category(&self, category: &str, level_min: i32, level_max: i32) -> Vec<&CreatureEntry> {
        self.entries
            .iter()
            .filter(|e| {
                (e.categories.iter().any(|c| c == category)
                    || e.filename
                        .file_stem()
                        .map(|s| s == category)
                        .unwrap_or(false))
                    && (level_max == 0 || (e.level >= level_min && e.level <= level_max))
            })
            .collect()
    }
}

impl GameSession {
    /// Spawn a creature entity from its definition file, via the per-map
    /// prototype cache: each unique creature type is deep-loaded once and
    /// cloned on subsequent spawns. Returns None when the type cannot be
    /// resolved.
    pub fn spawn_creature(&mut self, filename: &Path, pos: FPoint, direction: u8) -> Option<EntityId> {
        let key = filename.to_string_lossy().to_string();
        let stats = match self.prototypes.get(&key) {
            Some(proto) => proto.clone(),
            None => match StatBlock::load(filename, &self.settings) {
                Ok(s) => {
                    self.prototypes.insert(key, s.clone());
                    s
                }
                Err(e) => {
                    log::error!("EntityManager: {:#}", e);
                    return None;
                }
            },
        };
        let mut entity = Entity::new(stats);
        entity.stats.pos = pos;
        entity.stats.direction = direction;
        entity.load_animations(&mut self.animations);
        entity.load_sounds(&mut self.sounds);
        Some(self.entities.insert(entity))
    }

    /// Tear down for a map change, carrying over live hero-ally summons
    /// that can walk; they are re-placed beside the hero.
    pub fn entities_handle_new_map(&mut self) {
        let hero = self.hero;
        let mut carried: Vec<EntityId> = Vec::new();
        self.prototypes.clear();

        for id in self.entities.ids() {
            if id == hero {
                continue;
            }
            let Some(e) = self.entities.get(id) else {
                continue;
            };
            if e.stats.flags.contains(EntityFlags::EVENT_SOURCE) {
                // event stat blocks are rebuilt with the new map
                self.entities.remove(id);
                continue;
            }
            let keep = e.stats.is_hero_ally()
                && !e.stats.corpse
                && e.stats.cur_state != EntityState::Dead
                && e.stats.cur_state != EntityState::CritDead
                && e.stats.speed_default > 0.0;
            if keep {
                carried.push(id);
            } else {
                if let Some(gone) = self.entities.remove(id) {
                    gone.unload_sounds(&mut self.sounds);
                }
            }
        }

        // sever summon links that point at removed entities
        for id in self.entities.ids() {
            let live: Vec<EntityId> = self
                .entities
                .get(id)
                .map(|e| {
                    e.stats
                        .summons
                        .iter()
                        .copied()
                        .filter(|s| self.entities.contains(*s))
                        .collect()
                })
                .unwrap_or_default();
            if let Some(e) = self.entities.get_mut(id) {
                e.stats.summons = live;
            }
        }
        for id in self.entities.ids() {
            let summoner_gone = self
                .entities
                .get(id)
                .and_then(|e| e.stats.summoner)
                .map(|s| !self.entities.contains(s))
                .unwrap_or(false);
            if summoner_gone {
                if let Some(e) = self.entities.get_mut(id) {
                    e.stats.summoner = None;
                }
            }
        }

        // drain the map's spawn descriptors
        while let Some(spawn) = self.map.enemy_spawns.pop_front() {
            if spawn.category.is_empty() {
                log::error!(
                    "EntityManager: spawn at ({:.1}, {:.1}) has no type, skipping",
                    spawn.pos.x,
                    spawn.pos.y
                );
                continue;
            }
            let ok_status = spawn
                .requires_status
                .iter()
                .all(|s| self.campaign.check_status(s))
                && spawn
                    .requires_not_status
                    .iter()
                    .all(|s| !self.campaign.check_status(s));
            if !ok_status {
                continue;
            }

            let file = {
                let candidates =
                    self.creatures
                        .in_category(&spawn.category, spawn.level_min, spawn.level_max);
                if candidates.is_empty() {
                    log::error!(
                        "EntityManager: no creature in category '{}'",
                        spawn.category
                    );
                    continue;
                }
                candidates[self.rng.rand_index(candidates.len())]
                    .filename
                    .clone()
            };

            let Some(id) = self.spawn_creature(&file, spawn.pos, spawn.direction) else {
                continue;
            };
            if let Some(e) = self.entities.get_mut(id) {
                e.stats.waypoints = spawn.waypoints.clone();
                e.stats.wander = spawn.wander_radius > 0;
                if e.stats.wander {
                    e.stats.set_wander_area(spawn.wander_radius);
                }
                e.stats.invincible_requires_status = spawn.invincible_requires_status.clone();
                e.stats.invincible_requires_not_status =
                    spawn.invincible_requires_not_status.clone();
            }
            self.apply_spawn_level(id, &spawn.spawn_level, None);
            self.collision.block(spawn.pos.x, spawn.pos.y, false);
        }

        // carried allies re-enter at a free neighbor of the hero
        if !carried.is_empty() {
            let hero_pos = self
                .entities
                .get(hero)
                .map(|e| e.stats.pos)
                .unwrap_or_default();
            let hero_dir = self
                .entities
                .get(hero)
                .map(|e| e.stats.direction)
                .unwrap_or(0);
            let spawn_pos = self.collision.get_random_neighbor(
                Point::from(hero_pos),
                1,
                MovementType::Normal,
                CollideType::Normal,
                &mut self.rng,
            );
            for id in carried {
                if let Some(e) = self.entities.get_mut(id) {
                    e.stats.pos = spawn_pos;
                    e.stats.direction = hero_dir;
                    e.stats.in_combat = false;
                }
                self.collision.block(spawn_pos.x, spawn_pos.y, true);
            }
        }
    }

    /// Drain the power dispatcher's spawn queue into live entities.
    pub fn handle_spawn(&mut self) {
        while let Some(spawn) = self.powers.spawn_queue.pop_front() {
            self.collision.unblock(spawn.pos.x, spawn.pos.y);

            let file = {
                let candidates = self.creatures.in_category(&spawn.category, 0, 0);
                if candidates.is_empty() {
                    log::error!(
                        "EntityManager: could not spawn creature type '{}'",
                        spawn.category
                    );
                    continue;
                }
                candidates[self.rng.rand_index(candidates.len())]
                    .filename
                    .clone()
            };

            let Some(id) = self.spawn_creature(&file, spawn.pos, spawn.direction) else {
                continue;
            };

            {
                let Some(e) = self.entities.get_mut(id) else {
                    continue;
                };
                e.stats
                    .flags
                    .set(EntityFlags::HERO_ALLY, spawn.hero_ally);
                e.stats
                    .flags
                    .set(EntityFlags::ENEMY_ALLY, spawn.enemy_ally);
                e.stats.flags.insert(EntityFlags::SUMMONED);
                e.stats.summoned_power_index = spawn.summon_power_index;
                e.stats.summoner = spawn.summoner;
                e.stats.cur_state = EntityState::Spawn;
            }
            if let Some(summoner) = spawn.summoner {
                if let Some(s) = self.entities.get_mut(summoner) {
                    s.stats.summons.push(id);
                }
            }

            // level scaling per the summoning power
            let spawn_level = self.powers.get(spawn.summon_power_index).spawn_level;
            self.apply_spawn_level(id, &spawn_level, spawn.summoner);

            // a blocked target tile sends allies back beside the hero
            let (mt, hero_ally) = self
                .entities
                .get(id)
                .map(|e| (e.stats.movement_type, e.stats.is_hero_ally()))
                .unwrap_or((MovementType::Normal, false));
            let valid = self
                .collision
                .is_valid_position(spawn.pos.x, spawn.pos.y, mt, CollideType::NoEntity);
            if !valid && hero_ally {
                let hero_pos = self
                    .entities
                    .get(self.hero)
                    .map(|e| e.stats.pos)
                    .unwrap_or_default();
                let fallback = self.collision.get_random_neighbor(
                    Point::from(hero_pos),
                    1,
                    mt,
                    CollideType::NoEntity,
                    &mut self.rng,
                );
                if let Some(e) = self.entities.get_mut(id) {
                    e.stats.pos = fallback;
                }
            }

            // summoner's post effects land on the fresh summon
            let caster = spawn.summoner.unwrap_or(id);
            let source_type = if spawn.hero_ally {
                crate::effects::SourceType::Hero
            } else {
                crate::effects::SourceType::Enemy
            };
            self.apply_post_effects(id, caster, spawn.summon_power_index, source_type);

            // party-buff passives known to the hero transfer to the summon
            let hero_passives: Vec<usize> = self
                .entities
                .get(self.hero)
                .map(|e| {
                    e.stats
                        .powers_passive
                        .iter()
                        .chain(e.stats.powers_list_items.iter())
                        .copied()
                        .collect()
                })
                .unwrap_or_default();
            let summoned_power = spawn.summon_power_index;
            for pwr in hero_passives {
                if !self.powers.is_valid(pwr) {
                    continue;
                }
                let def = self.powers.get(pwr);
                if def.passive
                    && def.buff_party
                    && (def.buff_party_power_id == POWER_NONE
                        || def.buff_party_power_id == summoned_power)
                {
                    if let Some(e) = self.entities.get_mut(id) {
                        if e.stats.is_hero_ally() || e.stats.is_enemy_ally() {
                            e.stats.powers_passive.push(pwr);
                        }
                    }
                }
            }

            let (pos, hero_ally) = self
                .entities
                .get(id)
                .map(|e| (e.stats.pos, e.stats.is_hero_ally()))
                .unwrap_or_default();
            self.collision.block(pos.x, pos.y, hero_ally);
        }
    }

    fn apply_spawn_level(
        &mut self,
        id: EntityId,
        spawn_level: &crate::stat_block::SpawnLevel,
        summoner: Option<EntityId>,
    ) {
        if spawn_level.mode == SpawnLevelMode::Default {
            return;
        }
        let ratio_source = summoner.unwrap_or(self.hero);
        let new_level = match spawn_level.mode {
            SpawnLevelMode::Default => return,
            SpawnLevelMode::Fixed => spawn_level.count as i32,
            SpawnLevelMode::Level => {
                if spawn_level.ratio == 0.0 {
                    return;
                }
                let lvl = self
                    .entities
                    .get(ratio_source)
                    .map(|e| e.stats.level)
                    .unwrap_or(1);
                (spawn_level.count * (lvl as f32 / spawn_level.ratio)) as i32
            }
            SpawnLevelMode::Stat => {
                if spawn_level.ratio == 0.0 {
                    return;
                }
                let stat_val = self
                    .entities
                    .get(ratio_source)
                    .map(|e| e.stats.get_primary(spawn_level.stat))
                    .unwrap_or(0);
                (spawn_level.count * (stat_val as f32 / spawn_level.ratio)) as i32
            }
        };
        let settings = &self.settings;
        if let Some(e) = self.entities.get_mut(id) {
            e.stats.level = new_level.max(1);
            // refresh to the new level's max HP
            e.stats.apply_effects(settings);
            e.stats.hp = e.stats.get(Stat::HpMax);
            e.stats.mp = e.stats.get(Stat::MpMax);
        }
    }

    /// Kill every summon bound to this entity, recursively, and sever
    /// the links both ways.
    pub fn remove_summons(&mut self, id: EntityId) {
        let summons = self
            .entities
            .get(id)
            .map(|e| e.stats.summons.clone())
            .unwrap_or_default();
        for summon in summons {
            let corpse_timeout = self.settings.misc.corpse_timeout;
            if let Some(e) = self.entities.get_mut(summon) {
                e.stats.hp = 0;
                e.stats.effects.triggered_death = true;
                e.stats.effects.clear_effects();
                if !e.stats.is_hero() && !e.stats.corpse {
                    e.stats.cur_state = EntityState::Dead;
                    e.stats.corpse_timer.restart_with(corpse_timeout);
                }
                e.stats.summoner = None;
            }
            self.remove_summons(summon);
        }
        if let Some(e) = self.entities.get_mut(id) {
            e.stats.summons.clear();
        }
    }

    /// Destroy an entity slot, unlinking it from its summoner first so
    /// no dangling handle remains anywhere in the graph.
    pub fn destroy_entity(&mut self, id: EntityId) {
        let summoner = self.entities.get(id).and_then(|e| e.stats.summoner);
        if let Some(summoner) = summoner {
            if let Some(s) = self.entities.get_mut(summoner) {
                s.stats.summons.retain(|x| *x != id);
            }
        }
        self.remove_summons(id);
        if let Some(e) = self.entities.remove(id) {
            e.unload_sounds(&mut self.sounds);
            self.collision.unblock(e.stats.pos.x, e.stats.pos.y);
        }
    }

    /// Any living hero ally counts as a party member.
    pub fn check_party_members(&self) -> bool {
        self.entities.ids().iter().any(|id| {
            self.entities
                .get(*id)
                .map(|e| e.stats.is_hero_ally() && e.stats.hp > 0)
                .unwrap_or(false)
        })
    }

    /// Nearest live (or corpse) entity within `max_range` of `pos`.
    pub fn get_nearest_entity(
        &self,
        pos: FPoint,
        get_corpse: bool,
        max_range: f32,
    ) -> Option<EntityId> {
        let mut best: Option<(f32, EntityId)> = None;
        for id in self.entities.ids() {
            if id == self.hero {
                continue;
            }
            let Some(e) = self.entities.get(id) else {
                continue;
            };
            if e.stats.flags.contains(EntityFlags::EVENT_SOURCE) {
                continue;
            }
            if get_corpse != e.stats.corpse {
                continue;
            }
            let dist = calc_dist(pos, e.stats.pos);
            if dist <= max_range && best.map(|(d, _)| dist < d).unwrap_or(true) {
                best = Some((dist, id));
            }
        }
        best.map(|(_, id)| id)
    }

    /// True when no hostile creature remains alive (OnClear events).
    pub fn entities_cleared(&self) -> bool {
        !self.entities.ids().iter().any(|id| {
            self.entities
                .get(*id)
                .map(|e| {
                    !e.stats.is_hero()
                        && !e.stats.is_hero_ally()
                        && !e.stats.flags.contains(EntityFlags::EVENT_SOURCE)
                        && e.stats.alive
                        && !e.stats.corpse
                })
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberfall_core::settings::EngineSettings;

    fn dummy(settings: &EngineSettings) -> Entity {
        Entity::new(StatBlock::new(settings))
    }

    #[test]
    fn arena_recycles_slots_with_new_generation() {
        let settings = EngineSettings::default();
        let mut arena = EntityArena::default();
        let a = arena.insert(dummy(&settings));
        let b = arena.insert(dummy(&settings));
        assert_ne!(a, b);

        arena.remove(a);
        assert!(!arena.contains(a));
        let c = arena.insert(dummy(&settings));
        // slot reused, generation bumped, stale handle stays dead
        assert_eq!(c.index, a.index);
        assert_ne!(c.generation, a.generation);
        assert!(!arena.contains(a));
        assert!(arena.contains(c));
    }

    #[test]
    fn ids_lists_only_live_entities() {
        let settings = EngineSettings::default();
        let mut arena = EntityArena::default();
        let a = arena.insert(dummy(&settings));
        let b = arena.insert(dummy(&settings));
        arena.remove(a);
        let ids = arena.ids();
        assert_eq!(ids, vec![b]);
        assert_eq!(arena.len(), 1);
    }
}
