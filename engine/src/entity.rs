//! An entity pairs a stat block with its animation layer, loaded sound
//! handles, and the per-entity AI scratch state. The damage pipeline and
//! AI tick run at the session level and address entities by handle; the
//! helpers here are the ones that only need the entity and the grid.

use emberfall_core::geometry::{
    calc_dist, FPoint, Point, DIRECTION_DELTA_X, DIRECTION_DELTA_Y, SPEED_MULTIPLIER,
};

use crate::animation::Animation;
use crate::assets::{AnimationLibrary, AudioMixer, SoundCatalog, SoundId, SOUND_NONE};
use crate::behavior::BehaviorState;
use crate::collision::{CollideType, CollisionGrid, MovementType};
use crate::stat_block::StatBlock;

/// Sound slots loaded from the stat block's sfx entries.
#[derive(Default)]
pub struct EntitySounds {
    pub attack: Vec<(String, Vec<SoundId>)>,
    pub hit: Vec<SoundId>,
    pub die: Vec<SoundId>,
    pub critdie: Vec<SoundId>,
    pub block: Vec<SoundId>,
    pub levelup: SoundId,
    pub lowhp: SoundId,
    /// Round-robin cursor per slot so variant picks stay deterministic
    /// without touching the combat RNG.
    variant_cursor: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntitySoundKind {
    Hit,
    Die,
    CritDie,
    Block,
}

impl EntitySounds {
    fn next_variant(&mut self, len: usize) -> usize {
        self.variant_cursor = self.variant_cursor.wrapping_add(1);
        self.variant_cursor % len
    }
}

pub struct Entity {
    pub stats: StatBlock,
    pub animation: Option<Animation>,
    pub animation_set: Option<usize>,
    pub sounds: EntitySounds,
    pub behavior: BehaviorState,
}

impl Entity {
    pub fn new(stats: StatBlock) -> Self {
        Self {
            stats,
            animation: None,
            animation_set: None,
            sounds: EntitySounds::default(),
            behavior: BehaviorState::new(),
        }
    }

    /// Resolve the stat block's animation file and start on the default
    /// animation.
    pub fn load_animations(&mut self, library: &mut AnimationLibrary) {
        if self.stats.animations.is_empty() {
            log::error!("Entity: no animation file specified for '{}'", self.stats.name);
            return;
        }
        let Some(set_idx) = library.load_set(&self.stats.animations.clone()) else {
            return;
        };
        library.increase_count(&self.stats.animations.clone());
        self.animation_set = Some(set_idx);
        if let Some(def) = library.get_set(set_idx).and_then(|s| s.default_animation()) {
            self.animation = Some(Animation::new(def));
        }
    }

    pub fn load_sounds(&mut self, catalog: &mut SoundCatalog) {
        let stats = &self.stats;
        let mut sounds = EntitySounds::default();
        for (anim, files) in &stats.sfx_attack {
            let ids: Vec<SoundId> = files.iter().map(|f| catalog.load(f)).collect();
            sounds.attack.push((anim.clone(), ids));
        }
        sounds.hit = stats.sfx_hit.iter().map(|f| catalog.load(f)).collect();
        sounds.die = stats.sfx_die.iter().map(|f| catalog.load(f)).collect();
        sounds.critdie = stats.sfx_critdie.iter().map(|f| catalog.load(f)).collect();
        sounds.block = stats.sfx_block.iter().map(|f| catalog.load(f)).collect();
        sounds.levelup = catalog.load(&stats.sfx_levelup);
        sounds.lowhp = catalog.load(&stats.sfx_lowhp);
        self.sounds = sounds;
    }

    pub fn unload_sounds(&self, catalog: &mut SoundCatalog) {
        for (_, ids) in &self.sounds.attack {
            for id in ids {
                catalog.unload(*id);
            }
        }
        for id in self
            .sounds
            .hit
            .iter()
            .chain(&self.sounds.die)
            .chain(&self.sounds.critdie)
            .chain(&self.sounds.block)
        {
            catalog.unload(*id);
        }
        catalog.unload(self.sounds.levelup);
        catalog.unload(self.sounds.lowhp);
    }

    /// Switch to the named animation; keeps the current one when the
    /// name already matches so advancing stays idempotent per tick.
    pub fn set_animation(&mut self, name: &str, library: &AnimationLibrary) -> bool {
        if let Some(anim) = &self.animation {
            if anim.name() == name {
                return true;
            }
        }
        let def = self
            .animation_set
            .and_then(|i| library.get_set(i))
            .and_then(|s| s.get(name));
        match def {
            Some(def) => {
                self.animation = Some(Animation::new(def));
                true
            }
            None => {
                log::error!("Entity: animation '{}' not found for '{}'", name, self.stats.name);
                false
            }
        }
    }

    pub fn animation_name(&self) -> &str {
        self.animation.as_ref().map(|a| a.name()).unwrap_or("")
    }

    pub fn play_sound(&mut self, kind: EntitySoundKind, mixer: &mut dyn AudioMixer) {
        let (len, channel) = match kind {
            EntitySoundKind::Hit => (self.sounds.hit.len(), "entity_hit"),
            EntitySoundKind::Die => (self.sounds.die.len(), "entity_die"),
            EntitySoundKind::CritDie => (self.sounds.critdie.len(), "entity_critdie"),
            EntitySoundKind::Block => (self.sounds.block.len(), "entity_block"),
        };
        if len == 0 {
            return;
        }
        let idx = self.sounds.next_variant(len);
        let id = match kind {
            EntitySoundKind::Hit => self.sounds.hit[idx],
            EntitySoundKind::Die => self.sounds.die[idx],
            EntitySoundKind::CritDie => self.sounds.critdie[idx],
            EntitySoundKind::Block => self.sounds.block[idx],
        };
        mixer.play(id, channel, Some(self.stats.pos), false);
    }

    pub fn play_attack_sound(&mut self, attack_name: &str, mixer: &mut dyn AudioMixer) {
        let Some(pos) = self
            .sounds
            .attack
            .iter()
            .position(|(name, ids)| name == attack_name && !ids.is_empty())
        else {
            return;
        };
        let len = self.sounds.attack[pos].1.len();
        let idx = self.sounds.next_variant(len);
        let id = self.sounds.attack[pos].1[idx];
        if id != SOUND_NONE {
            mixer.play(id, "entity_attack", Some(self.stats.pos), false);
        }
    }

    pub fn collide_type(&self) -> CollideType {
        if self.stats.is_hero() {
            CollideType::Hero
        } else {
            CollideType::Normal
        }
    }

    /// Apply speed in the faced direction. Returns false when the full
    /// step was blocked by a wall or another entity.
    pub fn try_move(&mut self, grid: &CollisionGrid) -> bool {
        self.nudge_from_invalid_tile(grid);

        if self.stats.effects.knockback_speed != 0.0 {
            return false;
        }
        if self.stats.effects.stun || self.stats.effects.speed == 0.0 {
            return false;
        }
        if self.stats.charge_speed != 0.0 {
            return false;
        }

        let dir = (self.stats.direction % 8) as usize;
        let speed = self.stats.speed * SPEED_MULTIPLIER[dir] * self.stats.effects.speed / 100.0;
        let dx = speed * DIRECTION_DELTA_X[dir] as f32;
        let dy = speed * DIRECTION_DELTA_Y[dir] as f32;

        let movement_type = self.stats.movement_type;
        let collide_type = self.collide_type();
        grid.try_move(
            &mut self.stats.pos.x,
            &mut self.stats.pos.y,
            dx,
            dy,
            movement_type,
            collide_type,
        )
    }

    /// Defensive recovery for entities stranded on an invalid tile:
    /// small pushes along each open axis, then an outward spiral to the
    /// nearest valid tile. Logs the displacement when it fires.
    pub fn nudge_from_invalid_tile(&mut self, grid: &CollisionGrid) {
        let collide = self.collide_type();
        let mt = self.stats.movement_type;

        if grid.is_valid_position(self.stats.pos.x, self.stats.pos.y, mt, collide) {
            return;
        }

        let original = self.stats.pos;
        let mut guard = 0;
        while !grid.is_valid_position(self.stats.pos.x, self.stats.pos.y, mt, collide) {
            let x = self.stats.pos.x;
            let y = self.stats.pos.y;
            let mut push_x = 0.0;
            let mut push_y = 0.0;

            if grid.is_valid_position(x + 1.0, y, mt, collide) {
                push_x += 0.1 * (2.0 - ((x + 1.0).floor() + 0.5 - x));
            }
            if grid.is_valid_position(x - 1.0, y, mt, collide) {
                push_x -= 0.1 * (2.0 - (x - ((x - 1.0).floor() + 0.5)));
            }
            if grid.is_valid_position(x, y + 1.0, mt, collide) {
                push_y += 0.1 * (2.0 - ((y + 1.0).floor() + 0.5 - y));
            }
            if grid.is_valid_position(x, y - 1.0, mt, collide) {
                push_y -= 0.1 * (2.0 - (y - ((y - 1.0).floor() + 0.5)));
            }

            self.stats.pos.x += push_x;
            self.stats.pos.y += push_y;

            if push_x == 0.0 && push_y == 0.0 {
                // boxed in: spiral outward for the nearest valid tile
                if let Some(target) = Self::nearest_valid_tile(grid, self.stats.pos, mt, collide) {
                    self.stats.pos = target;
                }
                break;
            }

            guard += 1;
            if guard > 64 {
                break;
            }
        }

        log::info!(
            "Entity: '{}' was stuck and has been moved: ({:.2}, {:.2}) -> ({:.2}, {:.2})",
            self.stats.name,
            original.x,
            original.y,
            self.stats.pos.x,
            self.stats.pos.y
        );
    }

    fn nearest_valid_tile(
        grid: &CollisionGrid,
        pos: FPoint,
        mt: MovementType,
        collide: CollideType,
    ) -> Option<FPoint> {
        let src = Point::from(pos);
        let max_radius = grid.width().max(grid.height());
        for radius in 1..=max_radius {
            let mut best: Option<(f32, FPoint)> = None;
            for j in src.y - radius..=src.y + radius {
                for i in src.x - radius..=src.x + radius {
                    let candidate = FPoint::tile_center(Point::new(i, j));
                    if grid.is_valid_position(candidate.x, candidate.y, mt, collide) {
                        let dist = calc_dist(pos, candidate);
                        if best.map(|(d, _)| dist < d).unwrap_or(true) {
                            best = Some((dist, candidate));
                        }
                    }
                }
            }
            if let Some((_, p)) = best {
                return Some(p);
            }
        }
        None
    }

    pub fn reset_active_animation(&mut self) {
        if let Some(anim) = &mut self.animation {
            anim.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::TileCollision;
    use emberfall_core::settings::EngineSettings;

    fn entity_at(x: f32, y: f32) -> Entity {
        let settings = EngineSettings::default();
        let mut stats = StatBlock::new(&settings);
        stats.pos = FPoint::new(x, y);
        stats.speed_default = 0.2;
        stats.speed = 0.2;
        Entity::new(stats)
    }

    #[test]
    fn move_lands_on_valid_position() {
        let grid = CollisionGrid::new(8, 8);
        let mut e = entity_at(4.5, 4.5);
        e.stats.direction = 5; // east
        assert!(e.try_move(&grid));
        assert!(grid.is_valid_position(
            e.stats.pos.x,
            e.stats.pos.y,
            MovementType::Normal,
            CollideType::Normal
        ));
        assert!(e.stats.pos.x > 4.5);
    }

    #[test]
    fn stun_prevents_movement() {
        let grid = CollisionGrid::new(8, 8);
        let mut e = entity_at(4.5, 4.5);
        e.stats.effects.stun = true;
        assert!(!e.try_move(&grid));
        assert_eq!(e.stats.pos, FPoint::new(4.5, 4.5));
    }

    #[test]
    fn stuck_entity_is_relocated() {
        let mut grid = CollisionGrid::new(8, 8);
        grid.set_cell(4, 4, TileCollision::WallAll);
        let mut e = entity_at(4.5, 4.5);
        e.nudge_from_invalid_tile(&grid);
        assert!(grid.is_valid_position(
            e.stats.pos.x,
            e.stats.pos.y,
            MovementType::Normal,
            CollideType::Normal
        ));
    }
}
