//! In-flight hazards: the only objects that deal damage to entities.
//!
//! Hazards are owned by the [`HazardManager`]. Repeater volleys share a
//! hit registry through the registry pool, so an entity is hit at most
//! once per volley unless the power is declared `multihit`. The per-tick
//! order is fixed: expire, drain, logic, wall effects, entity sweep.

use emberfall_core::geometry::{calc_direction, is_within_radius, FPoint};

use crate::animation::Animation;
use crate::assets::{SoundId, SOUND_NONE};
use crate::collision::{CollideType, MovementType};
use crate::effects::SourceType;
use crate::ids::{EntityId, PowerId};
use crate::powers::{ChainKind, ChainPower, ScriptTrigger};
use crate::session::GameSession;

pub struct Hazard {
    pub power_index: PowerId,
    pub src: EntityId,
    pub source_type: SourceType,
    pub target_party: bool,

    pub pos: FPoint,
    pub speed: FPoint,
    pub pos_offset: FPoint,
    pub relative_pos: bool,
    pub base_speed: f32,
    pub angle: f32,
    pub base_lifespan: u32,
    pub lifespan: u32,
    pub radius: f32,
    pub movement_type: MovementType,

    pub dmg_min: i32,
    pub dmg_max: i32,
    pub crit_chance: i32,
    pub accuracy: i32,
    pub hp_steal: i32,
    pub mp_steal: i32,

    pub animation: Option<Animation>,
    pub animation_kind: u16,
    pub directional: bool,
    pub on_floor: bool,
    pub delay_frames: u32,
    pub complete_animation: bool,

    pub multitarget: bool,
    pub multihit: bool,
    pub active: bool,
    pub expire_with_caster: bool,
    pub remove_now: bool,
    pub hit_wall: bool,

    pub trait_armor_penetration: bool,
    pub trait_crits_impaired: i32,
    pub trait_elemental: Option<usize>,
    pub beacon: bool,
    pub missile: bool,
    pub wall_reflect: bool,
    /// Reflection cap: a hazard may reflect at most once per tick.
    pub reflected_this_tick: bool,
    pub walls_block_aoe: bool,

    pub sfx_hit: SoundId,
    pub sfx_hit_enable: bool,
    pub sfx_hit_played: bool,

    /// Index into the manager's registry pool; volleys share one entry.
    pub registry: usize,
}

impl Hazard {
    pub fn new(power_index: PowerId, src: EntityId) -> Self {
        Self {
            power_index,
            src,
            source_type: SourceType::Hero,
            target_party: false,
            pos: FPoint::default(),
            speed: FPoint::default(),
            pos_offset: FPoint::default(),
            relative_pos: false,
            base_speed: 0.0,
            angle: 0.0,
            base_lifespan: 1,
            lifespan: 1,
            radius: 0.0,
            movement_type: MovementType::Flying,
            dmg_min: 0,
            dmg_max: 0,
            crit_chance: 0,
            accuracy: 0,
            hp_steal: 0,
            mp_steal: 0,
            animation: None,
            animation_kind: 0,
            directional: false,
            on_floor: false,
            delay_frames: 0,
            complete_animation: false,
            multitarget: false,
            multihit: false,
            active: true,
            expire_with_caster: false,
            remove_now: false,
            hit_wall: false,
            trait_armor_penetration: false,
            trait_crits_impaired: 0,
            trait_elemental: None,
            beacon: false,
            missile: false,
            wall_reflect: false,
            reflected_this_tick: false,
            walls_block_aoe: false,
            sfx_hit: SOUND_NONE,
            sfx_hit_enable: false,
            sfx_hit_played: false,
            registry: 0,
        }
    }

    /// Normalise the angle and derive the velocity vector from it.
    pub fn set_angle(&mut self, angle: f32) {
        let mut a = angle % std::f32::consts::TAU;
        if a < 0.0 {
            a += std::f32::consts::TAU;
        }
        self.angle = a;
        self.speed.x = self.base_speed * a.cos();
        self.speed.y = self.base_speed * a.sin();
        if self.directional {
            self.animation_kind = calc_direction(
                self.pos.x,
                self.pos.y,
                self.pos.x + self.speed.x,
                self.pos.y + self.speed.y,
            ) as u16;
        }
    }

    /// A hazard can hit while it's active, off delay, and on an active
    /// animation frame (or has no animation at all).
    pub fn is_dangerous_now(&self) -> bool {
        self.active
            && self.delay_frames == 0
            && self
                .animation
                .as_ref()
                .map(|a| a.is_active_frame())
                .unwrap_or(true)
    }
}

struct Registry {
    refs: u32,
    hits: Vec<EntityId>,
}

#[derive(Default)]
pub struct HazardManager {
    pub hazards: Vec<Hazard>,
    registries: Vec<Registry>,
    free_registries: Vec<usize>,
    /// The last enemy hit by a hero hazard, used for targeting UI.
    pub last_enemy: Option<EntityId>,
}

impl HazardManager {
    /// Allocate a fresh hit registry with one owner.
    pub fn new_registry(&mut self) -> usize {
        if let Some(idx) = self.free_registries.pop() {
            self.registries[idx].refs = 1;
            self.registries[idx].hits.clear();
            idx
        } else {
            self.registries.push(Registry {
                refs: 1,
                hits: Vec::new(),
            });
            self.registries.len() - 1
        }
    }

    /// Add another owner to an existing registry (repeater volleys).
    pub fn share_registry(&mut self, idx: usize) -> usize {
        self.registries[idx].refs += 1;
        idx
    }

    fn release_registry(&mut self, idx: usize) {
        let reg = &mut self.registries[idx];
        reg.refs = reg.refs.saturating_sub(1);
        if reg.refs == 0 {
            reg.hits.clear();
            self.free_registries.push(idx);
        }
    }

    /// Whether the registry already recorded this entity. Multihit
    /// hazards never remember anyone.
    pub fn has_entity(&self, haz_index: usize, id: EntityId) -> bool {
        let haz = &self.hazards[haz_index];
        if haz.multihit {
            return false;
        }
        self.registries[haz.registry].hits.contains(&id)
    }

    pub fn add_entity(&mut self, haz_index: usize, id: EntityId) {
        let registry = self.hazards[haz_index].registry;
        self.registries[registry].hits.push(id);
    }

    fn remove_hazard(&mut self, index: usize) {
        let registry = self.hazards[index].registry;
        self.hazards.remove(index);
        self.release_registry(registry);
    }

    /// Reset on map change.
    pub fn handle_new_map(&mut self) {
        self.hazards.clear();
        self.registries.clear();
        self.free_registries.clear();
        self.last_enemy = None;
    }
}

impl GameSession {
    /// The hazard manager's tick, in the §4.4 order.
    pub fn hazards_logic(&mut self) {
        self.expire_hazards();
        self.drain_hazard_queue();

        let mut i = 0;
        while i < self.hazards.hazards.len() {
            self.hazard_motion(i);

            if self.hazards.hazards[i].remove_now {
                self.hazards.remove_hazard(i);
                continue;
            }

            if self.hazards.hazards[i].hit_wall {
                self.hazard_wall_effects(i);
                self.hazards.hazards[i].hit_wall = false;
            }

            if self.hazards.hazards[i].is_dangerous_now() {
                self.hazard_entity_sweep(i);
            }

            i += 1;
        }
    }

    /// Remove hazards whose lifespan ran out last tick, firing their
    /// expire chain powers at the final position.
    fn expire_hazards(&mut self) {
        let mut i = self.hazards.hazards.len();
        while i > 0 {
            i -= 1;
            if self.hazards.hazards[i].lifespan != 0 {
                continue;
            }
            let pos = self.hazards.hazards[i].pos;
            let src = self.hazards.hazards[i].src;
            let power_index = self.hazards.hazards[i].power_index;
            let chains: Vec<ChainPower> = self
                .powers
                .get(power_index)
                .chain(ChainKind::Expire)
                .copied()
                .collect();

            self.hazards.remove_hazard(i);

            for chain in chains {
                if chain.id != crate::ids::POWER_NONE && self.rng.percent_chance(chain.chance) {
                    self.activate_power(chain.id, src, pos);
                }
            }
        }
    }

    fn drain_hazard_queue(&mut self) {
        while let Some(haz) = self.powers.hazard_queue.pop_front() {
            self.hazards.hazards.push(haz);
        }
    }

    /// Lifespan, animation, and movement integration for one hazard.
    fn hazard_motion(&mut self, index: usize) {
        let src_alive = {
            let haz = &self.hazards.hazards[index];
            self.entities
                .get(haz.src)
                .map(|e| e.stats.alive)
                .unwrap_or(false)
        };
        let src_pos = {
            let haz = &self.hazards.hazards[index];
            self.entities.get(haz.src).map(|e| e.stats.pos)
        };

        let haz = &mut self.hazards.hazards[index];
        haz.reflected_this_tick = false;

        // a delayed hazard takes no action at all
        if haz.delay_frames > 0 {
            haz.delay_frames -= 1;
            return;
        }

        if haz.lifespan > 0 {
            haz.lifespan -= 1;
        }
        if haz.expire_with_caster && !src_alive {
            haz.lifespan = 0;
        }

        if let Some(anim) = &mut haz.animation {
            anim.advance_frame();
        }

        let mut check_collide = false;
        if haz.speed.x != 0.0 || haz.speed.y != 0.0 {
            haz.pos.x += haz.speed.x;
            haz.pos.y += haz.speed.y;
            check_collide = true;
        } else if haz.pos_offset.x != 0.0 || haz.pos_offset.y != 0.0 {
            if let Some(sp) = src_pos {
                haz.pos.x = sp.x - haz.pos_offset.x;
                haz.pos.y = sp.y - haz.pos_offset.y;
            }
            check_collide = true;
        } else if haz.relative_pos {
            if let Some(sp) = src_pos {
                haz.pos = sp;
            }
        }

        if check_collide
            && !self.collision.is_valid_position(
                haz.pos.x,
                haz.pos.y,
                haz.movement_type,
                CollideType::NoEntity,
            )
        {
            haz.hit_wall = true;

            if haz.wall_reflect && !haz.reflected_this_tick {
                let (px, py) = (haz.pos.x, haz.pos.y);
                let (sx, sy) = (haz.speed.x, haz.speed.y);
                if !self.collision.is_wall(px - sx, py) {
                    haz.speed.x = -sx;
                    haz.pos.x += haz.speed.x;
                } else if !self.collision.is_wall(px, py - sy) {
                    haz.speed.y = -sy;
                    haz.pos.y += haz.speed.y;
                } else {
                    haz.speed.x = -sx;
                    haz.speed.y = -sy;
                    haz.pos.x += haz.speed.x;
                    haz.pos.y += haz.speed.y;
                }
                haz.reflected_this_tick = true;
                if haz.directional {
                    haz.animation_kind = calc_direction(
                        haz.pos.x,
                        haz.pos.y,
                        haz.pos.x + haz.speed.x,
                        haz.pos.y + haz.speed.y,
                    ) as u16;
                }
            } else {
                haz.lifespan = 0;
                if self
                    .collision
                    .is_outside_map(haz.pos.x as i32, haz.pos.y as i32)
                {
                    haz.remove_now = true;
                }
            }
        }
    }

    /// Script and chained powers on wall impact.
    fn hazard_wall_effects(&mut self, index: usize) {
        let (pos, src, power_index) = {
            let haz = &self.hazards.hazards[index];
            (haz.pos, haz.src, haz.power_index)
        };
        let power = self.powers.get(power_index);
        if power.script_trigger == Some(ScriptTrigger::Wall) {
            let script = power.script.clone();
            self.execute_script(&script, pos.x, pos.y);
        }
        let chains: Vec<ChainPower> = self
            .powers
            .get(power_index)
            .chain(ChainKind::Wall)
            .copied()
            .collect();
        for chain in chains {
            if chain.id != crate::ids::POWER_NONE && self.rng.percent_chance(chain.chance) {
                self.activate_power(chain.id, src, pos);
            }
        }
    }

    /// Test the hazard against every eligible entity and apply hits.
    fn hazard_entity_sweep(&mut self, index: usize) {
        for id in self.entities.ids() {
            let (haz_active, source_type, target_party, radius, pos) = {
                let haz = &self.hazards.hazards[index];
                (
                    haz.active,
                    haz.source_type,
                    haz.target_party,
                    haz.radius,
                    haz.pos,
                )
            };
            if !haz_active {
                break;
            }

            let Some(entity) = self.entities.get(id) else {
                continue;
            };
            let stats = &entity.stats;
            if stats
                .flags
                .contains(crate::stat_block::EntityFlags::EVENT_SOURCE)
            {
                continue;
            }

            // hero/ally hazards only hit allies when target_party is set;
            // enemy hazards never hit other enemies
            let friendly_src =
                matches!(source_type, SourceType::Hero | SourceType::Ally);
            if friendly_src && stats.is_hero_ally() && !target_party {
                continue;
            }
            if friendly_src && stats.is_hero() {
                continue;
            }
            if source_type == SourceType::Enemy
                && !(stats.is_hero() || stats.is_hero_ally())
            {
                continue;
            }

            if stats.hp <= 0 {
                continue;
            }
            if !is_within_radius(pos, radius, stats.pos) {
                continue;
            }
            if self.hazards.has_entity(index, id) {
                continue;
            }

            self.hazards.add_entity(index, id);
            let hit = self.take_hit(id, index);
            self.post_hit(index, id, hit);
        }
    }

    /// Bookkeeping after a landed hit: deactivation, the hit sound
    /// latch, and the hit-triggered script.
    fn post_hit(&mut self, index: usize, target: EntityId, hit: bool) {
        {
            let haz = &self.hazards.hazards[index];
            let is_enemy_target = self
                .entities
                .get(target)
                .map(|e| !e.stats.is_hero() && !e.stats.is_hero_ally())
                .unwrap_or(false);
            if !haz.beacon && is_enemy_target {
                self.hazards.last_enemy = Some(target);
            }
        }

        if !hit {
            return;
        }

        let (multitarget, complete_animation, sfx_hit_enable, sfx_hit_played, sfx_hit, pos) = {
            let haz = &self.hazards.hazards[index];
            (
                haz.multitarget,
                haz.complete_animation,
                haz.sfx_hit_enable,
                haz.sfx_hit_played,
                haz.sfx_hit,
                haz.pos,
            )
        };

        if !multitarget {
            let haz = &mut self.hazards.hazards[index];
            haz.active = false;
            if !complete_animation {
                haz.lifespan = 0;
            }
        }

        if sfx_hit_enable && !sfx_hit_played {
            self.mixer.play(sfx_hit, "hazard_hit", Some(pos), false);
            self.hazards.hazards[index].sfx_hit_played = true;
        }

        let power_index = self.hazards.hazards[index].power_index;
        let power = self.powers.get(power_index);
        if power.script_trigger == Some(ScriptTrigger::Hit) {
            let script = power.script.clone();
            self.execute_script(&script, pos.x, pos.y);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_sharing_and_release() {
        let mut hm = HazardManager::default();
        let r = hm.new_registry();
        assert_eq!(hm.share_registry(r), r);

        let mut a = Hazard::new(1, EntityId::new(0, 0));
        a.registry = r;
        let mut b = Hazard::new(1, EntityId::new(0, 0));
        b.registry = r;
        hm.hazards.push(a);
        hm.hazards.push(b);

        let target = EntityId::new(3, 1);
        hm.add_entity(0, target);
        // both volley members see the shared record
        assert!(hm.has_entity(0, target));
        assert!(hm.has_entity(1, target));

        hm.remove_hazard(0);
        // registry still alive through the second member
        assert!(hm.has_entity(0, target));
        hm.remove_hazard(0);
        // fully released registries are recycled clean
        let r2 = hm.new_registry();
        assert_eq!(r2, r);
        let mut c = Hazard::new(1, EntityId::new(0, 0));
        c.registry = r2;
        hm.hazards.push(c);
        assert!(!hm.has_entity(0, target));
    }

    #[test]
    fn multihit_ignores_registry() {
        let mut hm = HazardManager::default();
        let r = hm.new_registry();
        let mut h = Hazard::new(1, EntityId::new(0, 0));
        h.registry = r;
        h.multihit = true;
        hm.hazards.push(h);
        let target = EntityId::new(2, 1);
        hm.add_entity(0, target);
        assert!(!hm.has_entity(0, target));
    }

    #[test]
    fn set_angle_derives_velocity() {
        let mut h = Hazard::new(1, EntityId::new(0, 0));
        h.base_speed = 2.0;
        h.set_angle(0.0);
        assert!((h.speed.x - 2.0).abs() < 1e-5);
        assert!(h.speed.y.abs() < 1e-5);

        h.set_angle(-std::f32::consts::FRAC_PI_2);
        // angles normalise into [0, 2pi)
        assert!(h.angle > 0.0);
        assert!((h.speed.y + 2.0).abs() < 1e-4);
    }

    #[test]
    fn dangerous_needs_active_and_no_delay() {
        let mut h = Hazard::new(1, EntityId::new(0, 0));
        assert!(h.is_dangerous_now());
        h.delay_frames = 2;
        assert!(!h.is_dangerous_now());
        h.delay_frames = 0;
        h.active = false;
        assert!(!h.is_dangerous_now());
    }
}
