//! The per-creature AI tick: targeting, combat entry and exit, flee
//! wedges, power selection, pathfinding with recalculation throttling,
//! and the state machine that binds animations to side effects.

use emberfall_core::geometry::{
    calc_dist, calc_direction, calc_vector, rotate_direction, FPoint, Point,
};
use emberfall_core::timer::{Timer, TimerReset};

use crate::collision::{CollideType, MovementType};
use crate::entity::EntitySoundKind;
use crate::ids::EntityId;
use crate::path_finding;
use crate::powers::{ChainKind, ChainPower, PowerState};
use crate::session::GameSession;
use crate::stat_block::{AiPowerKind, CombatStyle, EntityFlags, EntityState};

pub const ALLY_FLEE_DISTANCE: f32 = 2.0;
pub const ALLY_FOLLOW_DISTANCE_WALK: f32 = 5.5;
pub const ALLY_FOLLOW_DISTANCE_STOP: f32 = 5.0;
pub const ALLY_TELEPORT_DISTANCE: f32 = 40.0;

const PATH_FOUND_FAIL_THRESHOLD: i32 = 1;
const PATH_FOUND_FAIL_WAIT_SECONDS: u32 = 2;

/// Per-entity AI scratch state, persisted between ticks.
pub struct BehaviorState {
    pub path: Vec<FPoint>,
    pub prev_target: FPoint,
    pub collided: bool,
    pub path_found: bool,
    /// Accumulating recalc chance; adds 5% per tick of being blocked.
    pub chance_calc_path: i32,
    pub path_found_fails: i32,
    pub path_found_fail_timer: Timer,
    pub target_dist: f32,
    pub hero_dist: f32,
    pub pursue_pos: FPoint,
    pub los: bool,
    pub fleeing: bool,
    pub move_to_safe_dist: bool,
    pub turn_timer: Timer,
    pub instant_power: bool,
}

impl BehaviorState {
    pub fn new() -> Self {
        Self {
            path: Vec::new(),
            prev_target: FPoint::default(),
            collided: false,
            path_found: false,
            chance_calc_path: 0,
            path_found_fails: 0,
            path_found_fail_timer: Timer::new(0),
            target_dist: 0.0,
            hero_dist: 0.0,
            pursue_pos: FPoint::new(-1.0, -1.0),
            los: false,
            fleeing: false,
            move_to_safe_dist: false,
            turn_timer: Timer::new(0),
            instant_power: false,
        }
    }
}

impl Default for BehaviorState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameSession {
    /// One AI tick for a creature entity.
    pub fn creature_logic(&mut self, id: EntityId) {
        // a finished corpse only counts down to removal
        let corpse = self
            .entities
            .get(id)
            .map(|e| e.stats.corpse)
            .unwrap_or(true);
        if corpse {
            if let Some(e) = self.entities.get_mut(id) {
                e.stats.corpse_timer.tick();
            }
            return;
        }

        // distant enemies sleep until first encountered
        let hero_pos = self
            .entities
            .get(self.hero)
            .map(|e| e.stats.pos)
            .unwrap_or_default();
        {
            let encounter_dist = self.settings.misc.encounter_dist;
            let Some(e) = self.entities.get_mut(id) else {
                return;
            };
            if !e.stats.is_hero_ally() {
                if calc_dist(e.stats.pos, hero_pos) <= encounter_dist {
                    e.stats.encountered = true;
                }
                if !e.stats.encountered {
                    return;
                }
            }
        }

        self.behavior_upkeep(id);
        self.behavior_find_target(id);
        self.behavior_check_power(id);
        self.behavior_check_move(id);
        self.behavior_update_state(id);

        if let Some(e) = self.entities.get_mut(id) {
            e.behavior.fleeing = false;
        }
    }

    /// Passives, stat upkeep, party buffs, teleports.
    pub fn behavior_upkeep(&mut self, id: EntityId) {
        let should_activate = self
            .entities
            .get(id)
            .map(|e| e.stats.hp > 0 || e.stats.effects.triggered_death)
            .unwrap_or(false);
        if should_activate {
            self.activate_passives(id);
        }

        self.drain_party_buffs(id);

        {
            let settings = &self.settings;
            let collision = &mut self.collision;
            let combat_text = &mut self.combat_text;
            if let Some(e) = self.entities.get_mut(id) {
                let mut ctx = crate::stat_block::StatTickCtx {
                    settings,
                    collision,
                    combat_text,
                };
                e.stats.logic(&mut ctx);
            }
        }

        // summons die with their master
        let hp_zero = self.entities.get(id).map(|e| e.stats.hp == 0).unwrap_or(false);
        if hp_zero {
            self.remove_summons(id);
        }

        self.handle_teleport(id);
    }

    /// Target selection, combat entry/exit, wander waypoints, fleeing.
    fn behavior_find_target(&mut self, id: EntityId) {
        let hero = self.hero;
        {
            let Some(e) = self.entities.get(id) else { return };
            if matches!(
                e.stats.cur_state,
                EntityState::Dead | EntityState::CritDead
            ) || e.stats.effects.stun
            {
                return;
            }
        }

        let (hero_alive, hero_pos, hero_dir) = self
            .entities
            .get(hero)
            .map(|e| (e.stats.alive, e.stats.pos, e.stats.direction))
            .unwrap_or((false, FPoint::default(), 0));

        let (own_pos, is_ally, threat_range, threat_range_far, combat_style) = {
            let Some(e) = self.entities.get(id) else { return };
            (
                e.stats.pos,
                e.stats.is_hero_ally(),
                e.stats.threat_range,
                e.stats.threat_range_far,
                e.stats.combat_style,
            )
        };

        // default pursuit target is the hero
        let mut target_pos = hero_pos;
        let mut target_dist = if hero_alive {
            calc_dist(own_pos, hero_pos)
        } else {
            0.0
        };
        let mut target_is_hero = hero_alive;
        let mut hero_dist = target_dist;

        // a far-strayed ally teleports back to the hero
        if is_ally && hero_dist > ALLY_TELEPORT_DISTANCE {
            let in_combat = self.entities.get(id).map(|e| e.stats.in_combat).unwrap_or(false);
            if !in_combat {
                self.collision.unblock(own_pos.x, own_pos.y);
                if let Some(e) = self.entities.get_mut(id) {
                    e.stats.pos = hero_pos;
                }
                self.collision.block(hero_pos.x, hero_pos.y, true);
                hero_dist = 0.0;
                target_dist = 0.0;
            }
        }

        let own_pos = self.entities.get(id).map(|e| e.stats.pos).unwrap_or(own_pos);

        // scan the other entities for hostile candidates
        let mut enemies_in_combat = false;
        for other in self.entities.ids() {
            if other == id || other == hero {
                continue;
            }
            let Some(oe) = self.entities.get(other) else {
                continue;
            };
            if !oe.stats.alive || oe.stats.flags.contains(EntityFlags::EVENT_SOURCE) {
                continue;
            }
            let hostile = if is_ally {
                !oe.stats.is_hero_ally() && oe.stats.in_combat
            } else {
                oe.stats.is_hero_ally()
            };
            if !hostile {
                continue;
            }
            let dist = calc_dist(own_pos, oe.stats.pos);
            if target_is_hero || dist < target_dist {
                target_pos = oe.stats.pos;
                target_dist = dist;
                target_is_hero = false;
                enemies_in_combat = true;
                if is_ally {
                    if let Some(e) = self.entities.get_mut(id) {
                        e.stats.in_combat = true;
                    }
                }
            }
        }
        if is_ally && !enemies_in_combat {
            if let Some(e) = self.entities.get_mut(id) {
                e.stats.in_combat = false;
            }
        }

        // line of sight toward the target
        let los = if target_dist < threat_range && hero_alive {
            self.collision
                .line_of_sight(own_pos.x, own_pos.y, target_pos.x, target_pos.y)
        } else {
            false
        };

        // aggressive creatures fight on sight; the rest need proximity
        {
            let Some(e) = self.entities.get_mut(id) else { return };
            if !e.stats.in_combat && e.stats.combat_style == CombatStyle::Aggressive {
                e.stats.join_combat = true;
            }
        }
        let stealth = self
            .entities
            .get(hero)
            .map(|e| e.stats.get(emberfall_core::stats::Stat::Stealth))
            .unwrap_or(0);
        let stealth_threat_range = (threat_range * (100 - stealth) as f32) / 100.0;
        let close_to_target = if !is_ally && target_is_hero {
            target_dist < stealth_threat_range
        } else {
            !target_is_hero && target_dist < threat_range
        };
        {
            let Some(e) = self.entities.get_mut(id) else { return };
            if e.stats.alive
                && !e.stats.in_combat
                && los
                && close_to_target
                && e.stats.combat_style != CombatStyle::Passive
            {
                e.stats.join_combat = true;
            }
        }

        // entering combat fires the beacon and the join-combat power
        let join = self.entities.get(id).map(|e| e.stats.join_combat).unwrap_or(false);
        if join {
            if let Some(e) = self.entities.get_mut(id) {
                e.stats.in_combat = true;
            }
            if !is_ally {
                let beacon = self
                    .entities
                    .get(id)
                    .and_then(|e| e.stats.get_ai_power(AiPowerKind::Beacon, &mut self.rng));
                if let Some(slot) = beacon {
                    let power_id = self.entities.get(id).map(|e| e.stats.powers_ai[slot].id);
                    if let Some(power_id) = power_id {
                        let pos = self.entities.get(id).map(|e| e.stats.pos).unwrap_or(own_pos);
                        self.activate_power(power_id, id, pos);
                    }
                }
            }
            let join_power = self
                .entities
                .get(id)
                .and_then(|e| e.stats.get_ai_power(AiPowerKind::JoinCombat, &mut self.rng));
            if let Some(slot) = join_power {
                if let Some(e) = self.entities.get_mut(id) {
                    e.stats.cur_state = EntityState::Power;
                    e.stats.activated_power = Some(slot);
                }
            }
            if let Some(e) = self.entities.get_mut(id) {
                e.stats.join_combat = false;
            }
        }

        // leaving combat: target too far, or someone died
        {
            let Some(e) = self.entities.get_mut(id) else { return };
            if e.stats.combat_style != CombatStyle::Aggressive {
                if target_dist > threat_range_far && !e.stats.join_combat {
                    e.stats.in_combat = false;
                }
                if !e.stats.alive || !hero_alive {
                    e.stats.in_combat = false;
                }
            }
            e.behavior.target_dist = target_dist;
            e.behavior.hero_dist = hero_dist;
            e.behavior.los = los;
            e.behavior.pursue_pos = target_pos;
        }

        // wandering picks its first waypoint lazily
        let needs_wander_point = self
            .entities
            .get(id)
            .map(|e| e.stats.wander && e.stats.waypoints.is_empty())
            .unwrap_or(false);
        if needs_wander_point {
            let waypoint = self.wander_point(id);
            if let Some(e) = self.entities.get_mut(id) {
                e.stats.waypoints.push_back(waypoint);
                e.stats.waypoint_timer.reset(TimerReset::Begin);
            }
        }

        // outside combat, pursue the waypoint queue
        {
            let Some(e) = self.entities.get_mut(id) else { return };
            if !e.stats.in_combat {
                if let Some(wp) = e.stats.waypoints.front().copied() {
                    e.behavior.pursue_pos = wp;
                }
            }
        }

        // allies scatter out of the hero's way when blocking them
        if is_ally && self.settings.misc.enable_ally_collision_ai {
            let facing_me = self.collision.is_facing(
                hero_pos.x,
                hero_pos.y,
                hero_dir,
                own_pos.x,
                own_pos.y,
            );
            if !self.player_blocked && hero_dist < ALLY_FLEE_DISTANCE && facing_me {
                self.player_blocked = true;
                self.player_blocked_timer.reset(TimerReset::Begin);
            }
            let (pursue, in_combat) = self
                .entities
                .get(id)
                .map(|e| (e.behavior.pursue_pos, e.stats.in_combat))
                .unwrap_or((own_pos, false));
            let player_closer =
                calc_dist(own_pos, pursue) > calc_dist(own_pos, hero_pos);
            if self.player_blocked && (!in_combat || player_closer) && facing_me {
                if let Some(e) = self.entities.get_mut(id) {
                    e.behavior.fleeing = true;
                    e.behavior.pursue_pos = hero_pos;
                }
            }
        }

        {
            let Some(e) = self.entities.get_mut(id) else { return };
            if e.stats.effects.fear {
                e.behavior.fleeing = true;
            }
        }

        // chance to back off to a safe distance
        let should_roll_flee = {
            let Some(e) = self.entities.get(id) else { return };
            e.stats.in_combat
                && e.stats.cur_state == EntityState::Stance
                && !e.behavior.move_to_safe_dist
                && target_dist < e.stats.flee_range
                && target_dist >= e.stats.melee_range
                && e.stats.flee_cooldown_timer.is_end()
        };
        if should_roll_flee {
            let chance = self.entities.get(id).map(|e| e.stats.chance_flee).unwrap_or(0);
            if self.rng.percent_chance(chance) {
                if let Some(e) = self.entities.get_mut(id) {
                    e.behavior.move_to_safe_dist = true;
                }
            }
        }
        {
            let Some(e) = self.entities.get_mut(id) else { return };
            if e.behavior.move_to_safe_dist {
                e.behavior.fleeing = true;
            }
        }

        // pick a flee direction out of the five wedges opposite the
        // threat, favoring the current heading
        let fleeing = self.entities.get(id).map(|e| e.behavior.fleeing).unwrap_or(false);
        if fleeing {
            let (own_pos, own_dir, mt, pursue) = {
                let Some(e) = self.entities.get(id) else { return };
                (
                    e.stats.pos,
                    e.stats.direction,
                    e.stats.movement_type,
                    e.behavior.pursue_pos,
                )
            };
            let middle_dir = calc_direction(pursue.x, pursue.y, own_pos.x, own_pos.y);
            let mut flee_dirs: Vec<u8> = Vec::new();
            for i in -2..=2 {
                let test_dir = rotate_direction(middle_dir, i);
                let test_pos = calc_vector(own_pos, test_dir, 1.0);
                if self.collision.is_valid_position(
                    test_pos.x,
                    test_pos.y,
                    mt,
                    CollideType::Normal,
                ) {
                    if test_dir == own_dir {
                        flee_dirs.clear();
                        flee_dirs.push(test_dir);
                        break;
                    }
                    flee_dirs.push(test_dir);
                }
            }

            if flee_dirs.is_empty() {
                // trapped; stand and fight
                if let Some(e) = self.entities.get_mut(id) {
                    e.behavior.move_to_safe_dist = false;
                    e.behavior.fleeing = false;
                }
            } else {
                let dir = flee_dirs[self.rng.rand_index(flee_dirs.len())];
                let pursue = calc_vector(own_pos, dir, 1.0);
                if let Some(e) = self.entities.get_mut(id) {
                    e.behavior.pursue_pos = pursue;
                    if e.stats.flee_timer.is_end() {
                        e.stats.flee_timer.reset(TimerReset::Begin);
                    }
                }
            }
        }
    }

    /// Choose an AI power slot when idle: HalfDead first, then Ranged
    /// beyond melee range, then Melee.
    fn behavior_check_power(&mut self, id: EntityId) {
        {
            let Some(e) = self.entities.get(id) else { return };
            if e.stats.effects.stun || e.stats.effects.fear || e.behavior.fleeing {
                return;
            }
            if !e.stats.in_combat {
                return;
            }
            if !e.stats.cooldown.is_end() {
                return;
            }
            if !matches!(
                e.stats.cur_state,
                EntityState::Stance | EntityState::Move
            ) {
                return;
            }
        }

        let (half_dead, beyond_melee) = {
            let Some(e) = self.entities.get(id) else { return };
            (
                e.stats.half_dead_power
                    && e.stats.hp <= e.stats.get(emberfall_core::stats::Stat::HpMax) / 2,
                e.behavior.target_dist > e.stats.melee_range,
            )
        };

        let slot = {
            let Some(e) = self.entities.get(id) else { return };
            if half_dead {
                e.stats.get_ai_power(AiPowerKind::HalfDead, &mut self.rng)
            } else if beyond_melee {
                e.stats.get_ai_power(AiPowerKind::Ranged, &mut self.rng)
            } else {
                e.stats.get_ai_power(AiPowerKind::Melee, &mut self.rng)
            }
        };

        let Some(slot) = slot else {
            // no viable slot this tick; drop any stale activation
            if let Some(e) = self.entities.get_mut(id) {
                if e.stats.cur_state != EntityState::Power {
                    e.stats.activated_power = None;
                }
            }
            return;
        };

        // the chosen power may demand line of sight
        let power_id = self
            .entities
            .get(id)
            .map(|e| e.stats.powers_ai[slot].id)
            .unwrap_or(0);
        let requires_los = self.powers.get(power_id).requires_los;
        let los = self.entities.get(id).map(|e| e.behavior.los).unwrap_or(false);
        if requires_los && !los {
            return;
        }

        if let Some(e) = self.entities.get_mut(id) {
            e.stats.cur_state = EntityState::Power;
            e.stats.activated_power = Some(slot);
        }
    }

    /// Facing, pathfinding, and the stance/move state pair.
    fn behavior_check_move(&mut self, id: EntityId) {
        {
            let Some(e) = self.entities.get(id) else { return };
            if matches!(
                e.stats.cur_state,
                EntityState::Dead | EntityState::CritDead
            ) || e.stats.effects.stun
            {
                return;
            }
        }

        // idle creatures without patrol duties stand down
        {
            let Some(e) = self.entities.get_mut(id) else { return };
            let idle = !e.stats.is_hero_ally()
                && !e.stats.in_combat
                && (e.stats.waypoints.is_empty() || !e.stats.waypoint_timer.is_end());
            if idle {
                if e.stats.cur_state == EntityState::Move {
                    e.stats.cur_state = EntityState::Stance;
                }
                e.stats.waypoint_timer.tick();
                return;
            }
        }

        let (own_pos, real_speed, turn_delay, facing, mt) = {
            let Some(e) = self.entities.get(id) else { return };
            let dir = (e.stats.direction % 8) as usize;
            (
                e.stats.pos,
                e.stats.speed
                    * emberfall_core::geometry::SPEED_MULTIPLIER[dir]
                    * e.stats.effects.speed
                    / 100.0,
                e.stats.turn_delay,
                e.stats.facing,
                e.stats.movement_type,
            )
        };

        // slow turners still need to track a path tile-by-tile
        {
            let Some(e) = self.entities.get_mut(id) else { return };
            let ticks = e.behavior.turn_timer.current();
            let mut capped = turn_delay;
            if real_speed > 0.0 {
                let max_turn_ticks = (1.0 / real_speed) as u32;
                if turn_delay > max_turn_ticks {
                    capped = max_turn_ticks;
                }
            }
            e.behavior.turn_timer.set_duration(capped);
            e.behavior.turn_timer.set_current(ticks.min(capped));
        }

        // clear our own tile so collision tests see the grid without us
        self.collision.unblock(own_pos.x, own_pos.y);

        if let Some(e) = self.entities.get_mut(id) {
            e.behavior.path_found_fail_timer.tick();
        }

        if facing {
            let turn_ready = {
                let Some(e) = self.entities.get_mut(id) else { return };
                e.behavior.turn_timer.tick();
                e.behavior.turn_timer.is_end()
            };
            if turn_ready {
                self.behavior_face_or_path(id, mt);
                if let Some(e) = self.entities.get_mut(id) {
                    e.behavior.turn_timer.reset(TimerReset::Begin);
                }
            }
        }

        if let Some(e) = self.entities.get_mut(id) {
            e.stats.flee_timer.tick();
            e.stats.flee_cooldown_timer.tick();
        }

        let state = self.entities.get(id).map(|e| e.stats.cur_state);
        match state {
            Some(EntityState::Stance) => self.behavior_move_from_stance(id),
            Some(EntityState::Move) => self.behavior_keep_moving(id),
            _ => {}
        }

        // waypoint arrival: snap, pause, cycle
        let has_waypoints = self
            .entities
            .get(id)
            .map(|e| !e.stats.waypoints.is_empty())
            .unwrap_or(false);
        if has_waypoints {
            let (waypoint, pos) = match self.entities.get(id) {
                Some(e) => (
                    e.stats.waypoints.front().copied().unwrap_or(e.stats.pos),
                    e.stats.pos,
                ),
                None => (own_pos, own_pos),
            };
            let waypoint_dist = calc_dist(waypoint, pos);
            if waypoint_dist <= real_speed.max(0.01) {
                let wander = self.entities.get(id).map(|e| e.stats.wander).unwrap_or(false);
                let next = if wander {
                    self.wander_point(id)
                } else {
                    waypoint
                };
                if let Some(e) = self.entities.get_mut(id) {
                    e.stats.pos = waypoint;
                    e.behavior.turn_timer.reset(TimerReset::End);
                    e.stats.waypoints.pop_front();
                    e.stats.waypoints.push_back(next);
                    e.stats.waypoint_timer.reset(TimerReset::Begin);
                }
            }
        }

        // reclaim our tile
        let (pos, is_ally) = self
            .entities
            .get(id)
            .map(|e| (e.stats.pos, e.stats.is_hero_ally()))
            .unwrap_or((own_pos, false));
        self.collision.block(pos.x, pos.y, is_ally);
    }

    /// Face the pursuit point directly when reachable; otherwise lean on
    /// the pathfinder, with recalculation throttled to avoid bursts.
    fn behavior_face_or_path(&mut self, id: EntityId, mt: MovementType) {
        let (own_pos, pursue) = {
            let Some(e) = self.entities.get(id) else { return };
            (e.stats.pos, e.behavior.pursue_pos)
        };

        let direct = self
            .collision
            .line_of_movement(own_pos.x, own_pos.y, pursue.x, pursue.y, mt);

        let mut new_pursue = pursue;
        if !direct {
            let recalculate = {
                let Some(e) = self.entities.get_mut(id) else { return };
                // spread recalculation over frames: +5% chance per tick
                e.behavior.chance_calc_path += 5;
                let success = {
                    let c = e.behavior.chance_calc_path;
                    c > 0 && self.rng.percent_chance(c)
                };
                let mut recalc = success;
                if e.behavior.collided {
                    recalc = true;
                }
                if !recalc && e.behavior.path.is_empty() {
                    recalc = true;
                }
                if !recalc
                    && calc_dist(
                        FPoint::from(Point::from(e.behavior.prev_target)),
                        FPoint::from(Point::from(pursue)),
                    ) > 1.0
                {
                    recalc = true;
                }
                // when the target is unreachable, don't spam the search
                if !e.behavior.path_found && e.behavior.collided && !success {
                    recalc = false;
                } else {
                    e.behavior.collided = false;
                }
                if !e.behavior.path_found_fail_timer.is_end() {
                    recalc = false;
                    e.behavior.chance_calc_path = -100;
                }
                e.behavior.prev_target = pursue;
                recalc
            };

            if recalculate {
                let limit = self.settings.misc.path_limit;
                let mut path = Vec::new();
                let found =
                    path_finding::compute_path(&self.collision, own_pos, pursue, &mut path, mt, limit);
                let fps = self.settings.misc.max_frames_per_sec;
                if let Some(e) = self.entities.get_mut(id) {
                    e.behavior.chance_calc_path = -100;
                    e.behavior.path = path;
                    e.behavior.path_found = found;
                    if !found {
                        e.behavior.path_found_fails += 1;
                        if e.behavior.path_found_fails >= PATH_FOUND_FAIL_THRESHOLD {
                            // cool off before trying again
                            e.behavior
                                .path_found_fail_timer
                                .restart_with(fps * PATH_FOUND_FAIL_WAIT_SECONDS);
                        }
                    } else {
                        e.behavior.path_found_fails = 0;
                        e.behavior.path_found_fail_timer.reset(TimerReset::End);
                    }
                }
            }

            if let Some(e) = self.entities.get_mut(id) {
                if let Some(next) = e.behavior.path.last().copied() {
                    new_pursue = next;
                    // waypoints within a tile are considered passed
                    if calc_dist(e.stats.pos, next) <= 1.0 {
                        e.behavior.path.pop();
                    }
                }
                e.behavior.pursue_pos = new_pursue;
            }
        } else if let Some(e) = self.entities.get_mut(id) {
            e.behavior.path.clear();
        }

        if let Some(e) = self.entities.get_mut(id) {
            if e.stats.charge_speed == 0.0 {
                e.stats.direction = calc_direction(
                    e.stats.pos.x,
                    e.stats.pos.y,
                    e.behavior.pursue_pos.x,
                    e.behavior.pursue_pos.y,
                );
            }
        }
    }

    fn behavior_move_from_stance(&mut self, id: EntityId) {
        let should_move = {
            let Some(e) = self.entities.get(id) else { return };
            // flee-capable creatures at safe distance hold position
            if e.behavior.target_dist >= e.stats.flee_range
                && e.stats.chance_flee > 0
                && e.stats.waypoints.is_empty()
            {
                return;
            }
            let ally_following = e.stats.is_hero_ally()
                && !e.stats.in_combat
                && e.behavior.hero_dist > ALLY_FOLLOW_DISTANCE_WALK;
            let pursuing = e.stats.in_combat
                && ((e.behavior.target_dist > e.stats.melee_range)
                    || (e.behavior.target_dist <= e.stats.melee_range && !e.behavior.los));
            (pursuing, ally_following, e.behavior.fleeing)
        };

        let (pursuing, ally_following, fleeing) = should_move;
        let mut go = fleeing || ally_following;
        if pursuing && !go {
            let (beyond_melee, chance) = {
                let Some(e) = self.entities.get(id) else { return };
                (
                    e.behavior.target_dist > e.stats.melee_range,
                    e.stats.chance_pursue,
                )
            };
            go = if beyond_melee {
                self.rng.percent_chance(chance)
            } else {
                true
            };
        }
        if !go {
            return;
        }

        let moved = self.entity_step(id);
        if moved {
            if let Some(e) = self.entities.get_mut(id) {
                e.stats.cur_state = EntityState::Move;
            }
        } else {
            // blocked: try the next best direction once
            let (prev_dir, pursue, pos) = {
                let Some(e) = self.entities.get(id) else { return };
                (e.stats.direction, e.behavior.pursue_pos, e.stats.pos)
            };
            if let Some(e) = self.entities.get_mut(id) {
                e.behavior.collided = true;
                e.stats.direction = next_best_direction(pos, pursue, prev_dir);
            }
            if self.entity_step(id) {
                if let Some(e) = self.entities.get_mut(id) {
                    e.stats.cur_state = EntityState::Move;
                }
            } else if let Some(e) = self.entities.get_mut(id) {
                e.stats.direction = prev_dir;
            }
        }
    }

    fn behavior_keep_moving(&mut self, id: EntityId) {
        let can_attack = {
            let Some(e) = self.entities.get(id) else { return };
            e.stats.cooldown.is_end()
                && e.stats.powers_ai.iter().any(|s| s.cooldown.is_end())
        };

        // periodically re-roll the decision to keep fleeing
        let (fleeing, flee_timer_end, chance_flee) = {
            let Some(e) = self.entities.get(id) else { return };
            (
                e.behavior.fleeing,
                e.stats.flee_timer.is_end(),
                e.stats.chance_flee,
            )
        };
        let stop_fleeing = can_attack
            && fleeing
            && flee_timer_end
            && !self.rng.percent_chance(chance_flee);
        if !stop_fleeing && flee_timer_end {
            // passed the re-roll: schedule the next one next frame
            if let Some(e) = self.entities.get_mut(id) {
                e.stats.flee_timer.set_current(1);
            }
        }

        let hero_alive = self
            .entities
            .get(self.hero)
            .map(|e| e.stats.alive)
            .unwrap_or(false);

        let arrived = {
            let Some(e) = self.entities.get(id) else { return };
            let ally_close = e.stats.is_hero_ally()
                && !e.stats.in_combat
                && !e.behavior.fleeing
                && e.behavior.hero_dist < ALLY_FOLLOW_DISTANCE_STOP;
            hero_alive
                && ((e.behavior.target_dist < e.stats.melee_range && !e.behavior.fleeing)
                    || (e.behavior.move_to_safe_dist
                        && e.behavior.target_dist >= e.stats.flee_range)
                    || stop_fleeing
                    || ally_close)
        };

        if arrived {
            if stop_fleeing {
                if let Some(e) = self.entities.get_mut(id) {
                    e.stats.flee_cooldown_timer.reset(TimerReset::Begin);
                }
            }
            if let Some(e) = self.entities.get_mut(id) {
                e.stats.cur_state = EntityState::Stance;
                e.behavior.move_to_safe_dist = false;
                e.behavior.fleeing = false;
            }
            return;
        }

        if self.entity_step(id) {
            return;
        }

        // obstacle: rotate to the next best direction and retry
        let (prev_dir, pursue, pos) = {
            let Some(e) = self.entities.get(id) else { return };
            (e.stats.direction, e.behavior.pursue_pos, e.stats.pos)
        };
        if let Some(e) = self.entities.get_mut(id) {
            e.behavior.collided = true;
            e.stats.direction = next_best_direction(pos, pursue, prev_dir);
        }
        if self.entity_step(id) {
            return;
        }

        // a blocked ally tries sliding in the hero's direction before
        // giving up, to clear narrow passages
        let try_hero_dir = {
            let Some(e) = self.entities.get(id) else { return };
            e.stats.is_hero_ally() && self.player_blocked && !e.stats.in_combat
        };
        if try_hero_dir {
            let hero_dir = self
                .entities
                .get(self.hero)
                .map(|e| e.stats.direction)
                .unwrap_or(0);
            if let Some(e) = self.entities.get_mut(id) {
                e.stats.direction = hero_dir;
            }
            if self.entity_step(id) {
                return;
            }
        }

        if let Some(e) = self.entities.get_mut(id) {
            e.stats.cur_state = EntityState::Stance;
            e.stats.direction = prev_dir;
        }
    }

    /// Advance animation and run state side effects on marker frames.
    fn behavior_update_state(&mut self, id: EntityId) {
        {
            let Some(e) = self.entities.get(id) else { return };
            if e.stats.effects.stun {
                return;
            }
        }

        if let Some(e) = self.entities.get_mut(id) {
            if let Some(anim) = &mut e.animation {
                anim.advance_frame();
            }
        }

        let state = self.entities.get(id).map(|e| e.stats.cur_state);
        match state {
            Some(EntityState::Stance) => {
                let lib = &self.animations;
                if let Some(e) = self.entities.get_mut(id) {
                    e.set_animation("stance", lib);
                }
            }
            Some(EntityState::Move) => {
                let lib = &self.animations;
                if let Some(e) = self.entities.get_mut(id) {
                    e.set_animation("run", lib);
                }
            }
            Some(EntityState::Power) => self.behavior_state_power(id),
            Some(EntityState::Spawn) => {
                let lib = &self.animations;
                let done = {
                    let Some(e) = self.entities.get_mut(id) else { return };
                    e.set_animation("spawn", lib);
                    let anim = e.animation.as_ref();
                    anim.map(|a| a.is_last_frame()).unwrap_or(true)
                        || e.animation_name() != "spawn"
                };
                if done {
                    if let Some(e) = self.entities.get_mut(id) {
                        e.stats.cur_state = EntityState::Stance;
                    }
                }
            }
            Some(EntityState::Block) => {
                let lib = &self.animations;
                if let Some(e) = self.entities.get_mut(id) {
                    e.set_animation("block", lib);
                }
            }
            Some(EntityState::Hit) => {
                let lib = &self.animations;
                let done = {
                    let Some(e) = self.entities.get_mut(id) else { return };
                    e.set_animation("hit", lib);
                    if e.animation.as_ref().map(|a| a.is_first_frame()).unwrap_or(false) {
                        e.stats.effects.triggered_hit = true;
                    }
                    e.animation.as_ref().map(|a| a.is_last_frame()).unwrap_or(true)
                        || e.animation_name() != "hit"
                };
                if done {
                    if let Some(e) = self.entities.get_mut(id) {
                        e.stats.cur_state = EntityState::Stance;
                    }
                }
            }
            Some(EntityState::Dead) => self.behavior_state_dead(id, false),
            Some(EntityState::CritDead) => self.behavior_state_dead(id, true),
            _ => {}
        }

        if let Some(e) = self.entities.get_mut(id) {
            if e.stats.state_timer.is_end() && e.stats.hold_state {
                e.stats.hold_state = false;
            }
            if e.stats.cur_state != EntityState::Power && e.stats.charge_speed != 0.0 {
                e.stats.charge_speed = 0.0;
            }
        }
    }

    /// Power state: pre-chain and sound on first frame, activation on
    /// the active frame, transition out on the last.
    fn behavior_state_power(&mut self, id: EntityId) {
        let slot = match self.entities.get(id).and_then(|e| e.stats.activated_power) {
            Some(s) => s,
            None => {
                if let Some(e) = self.entities.get_mut(id) {
                    e.stats.cur_state = EntityState::Stance;
                }
                return;
            }
        };

        let slot_power = self
            .entities
            .get(id)
            .map(|e| e.stats.powers_ai[slot].id)
            .unwrap_or(0);
        let power_id = self.check_replace_by_effect(slot_power, id);
        let power = self.powers.get(power_id).clone();

        if let Some(e) = self.entities.get_mut(id) {
            e.stats.prevent_interrupt = power.prevent_interrupt;
        }

        if power.new_state == PowerState::Instant {
            if let Some(e) = self.entities.get_mut(id) {
                e.behavior.instant_power = true;
            }
        } else {
            let lib = &self.animations;
            if let Some(e) = self.entities.get_mut(id) {
                e.set_animation(&power.attack_anim, lib);
            }
        }

        let first_frame = self
            .entities
            .get(id)
            .and_then(|e| e.animation.as_ref())
            .map(|a| a.is_first_frame())
            .unwrap_or(false);
        if first_frame {
            let pursue = self.entities.get(id).map(|e| e.behavior.pursue_pos).unwrap_or_default();
            let chains: Vec<ChainPower> = power.chain(ChainKind::Pre).copied().collect();
            for chain in chains {
                if chain.id != crate::ids::POWER_NONE && self.rng.percent_chance(chain.chance) {
                    self.activate_power(chain.id, id, pursue);
                }
            }

            let attack_speed = self
                .entities
                .get(id)
                .map(|e| {
                    (e.stats.effects.get_attack_speed(&power.attack_anim) * power.attack_speed)
                        / 100.0
                })
                .unwrap_or(100.0);
            let mixer = self.mixer.as_mut();
            if let Some(e) = self.entities.get_mut(id) {
                if let Some(anim) = &mut e.animation {
                    anim.set_speed(attack_speed);
                }
                e.play_attack_sound(&power.attack_anim, mixer);
                if power.state_duration > 0 {
                    e.stats.state_timer.restart_with(power.state_duration);
                }
                if power.charge_speed != 0.0 {
                    e.stats.charge_speed = power.charge_speed;
                }
            }
        }

        let (active_frame, instant) = {
            let Some(e) = self.entities.get(id) else { return };
            (
                e.animation
                    .as_ref()
                    .map(|a| a.is_active_frame())
                    .unwrap_or(true),
                e.behavior.instant_power,
            )
        };
        let hold_state = self.entities.get(id).map(|e| e.stats.hold_state).unwrap_or(false);
        if (active_frame || instant) && !hold_state {
            let pursue = self.entities.get(id).map(|e| e.behavior.pursue_pos).unwrap_or_default();
            self.activate_power(power_id, id, pursue);

            let cooldown = power.cooldown;
            if let Some(e) = self.entities.get_mut(id) {
                let activated_id = e.stats.powers_ai[slot].id;
                e.stats.set_power_cooldown(activated_id, cooldown);
                if e.stats.powers_ai[slot].kind == AiPowerKind::HalfDead {
                    e.stats.half_dead_power = false;
                }
                if !e.stats.state_timer.is_end() {
                    e.stats.hold_state = true;
                }
            }
        }

        // leave the power state once the animation has played out
        let finished = {
            let Some(e) = self.entities.get(id) else { return };
            let anim_done = e
                .animation
                .as_ref()
                .map(|a| a.is_last_frame())
                .unwrap_or(true)
                && e.stats.state_timer.is_end();
            let wrong_anim = power.new_state == PowerState::Attack
                && e.animation_name() != power.attack_anim;
            anim_done || wrong_anim || e.behavior.instant_power
        };
        if finished {
            if let Some(e) = self.entities.get_mut(id) {
                if !e.behavior.instant_power {
                    e.stats.cooldown.reset(TimerReset::Begin);
                } else {
                    e.behavior.instant_power = false;
                }
                e.stats.activated_power = None;
                e.stats.cur_state = EntityState::Stance;
                e.stats.prevent_interrupt = false;
            }
        }
    }

    /// Death animation: sound on the first frame, the on-death power on
    /// the second-to-last, corpse bookkeeping on the last.
    fn behavior_state_dead(&mut self, id: EntityId, crit: bool) {
        {
            let Some(e) = self.entities.get(id) else { return };
            // the damage pipeline owns the first post-kill tick
            if e.stats.effects.triggered_death {
                return;
            }
        }

        let anim_name = if crit { "critdie" } else { "die" };
        let lib = &self.animations;
        if let Some(e) = self.entities.get_mut(id) {
            e.set_animation(anim_name, lib);
        }

        let first = self
            .entities
            .get(id)
            .and_then(|e| e.animation.as_ref())
            .map(|a| a.is_first_frame())
            .unwrap_or(false);
        if first {
            let corpse_timeout = self.settings.misc.corpse_timeout;
            let mixer = self.mixer.as_mut();
            if let Some(e) = self.entities.get_mut(id) {
                e.play_sound(
                    if crit {
                        EntitySoundKind::CritDie
                    } else {
                        EntitySoundKind::Die
                    },
                    mixer,
                );
                e.stats.corpse_timer.restart_with(corpse_timeout);
            }
        }

        let second_last = self
            .entities
            .get(id)
            .and_then(|e| e.animation.as_ref())
            .map(|a| a.is_second_last_frame())
            .unwrap_or(false);
        if second_last {
            let death_power = self
                .entities
                .get(id)
                .and_then(|e| e.stats.get_ai_power(AiPowerKind::Death, &mut self.rng));
            if let Some(slot) = death_power {
                let power_id = self.entities.get(id).map(|e| e.stats.powers_ai[slot].id);
                let pos = self.entities.get(id).map(|e| e.stats.pos).unwrap_or_default();
                if let Some(power_id) = power_id {
                    self.activate_power(power_id, id, pos);
                }
            }
            if let Some(e) = self.entities.get_mut(id) {
                e.stats.effects.clear_effects();
            }
        }

        let last = {
            let e = match self.entities.get(id) {
                Some(e) => e,
                None => return,
            };
            e.animation
                .as_ref()
                .map(|a| a.is_last_frame())
                .unwrap_or(true)
                || e.animation_name() != anim_name
        };
        if last {
            let (pos, mt) = self
                .entities
                .get(id)
                .map(|e| (e.stats.pos, e.stats.movement_type))
                .unwrap_or_default();
            let _ = mt;
            self.collision.unblock(pos.x, pos.y);
            let invalid_rest = !self.collision.is_valid_position(
                pos.x,
                pos.y,
                MovementType::Normal,
                CollideType::Normal,
            );
            if let Some(e) = self.entities.get_mut(id) {
                e.stats.corpse = true;
                // corpses on blocked tiles (water, pits) vanish at once
                if invalid_rest {
                    e.stats.corpse_timer.reset(TimerReset::End);
                }
                e.stats.pos.align();
            }
        }
    }

    /// Wrapper around the entity's movement that keeps the block/unblock
    /// pairing; callers have already unblocked.
    fn entity_step(&mut self, id: EntityId) -> bool {
        let collision = &self.collision;
        match self.entities.get_mut(id) {
            Some(e) => e.try_move(collision),
            None => false,
        }
    }

    /// Pick a random point inside the wander area; keep the current
    /// position when the roll lands somewhere unusable.
    fn wander_point(&mut self, id: EntityId) -> FPoint {
        let (area, own_pos, mt, collide) = {
            let Some(e) = self.entities.get(id) else {
                return FPoint::default();
            };
            (
                e.stats.wander_area,
                e.stats.pos,
                e.stats.movement_type,
                e.collide_type(),
            )
        };
        let waypoint = FPoint::new(
            area.x as f32 + self.rng.rand_index(area.w.max(1) as usize) as f32 + 0.5,
            area.y as f32 + self.rng.rand_index(area.h.max(1) as usize) as f32 + 0.5,
        );
        let valid = self
            .collision
            .is_valid_position(waypoint.x, waypoint.y, mt, collide)
            && self
                .collision
                .line_of_movement(own_pos.x, own_pos.y, waypoint.x, waypoint.y, mt);
        if valid {
            waypoint
        } else {
            own_pos
        }
    }
}

/// Rotate toward the pursued point by one step, clockwise or counter-
/// clockwise depending on which neighbor is closer to the ideal heading.
pub fn next_best_direction(pos: FPoint, pursue: FPoint, current: u8) -> u8 {
    let ideal = calc_direction(pos.x, pos.y, pursue.x, pursue.y);
    let cw = rotate_direction(current, 1);
    let ccw = rotate_direction(current, -1);
    let diff = |a: u8, b: u8| {
        let d = (a as i32 - b as i32).abs() % 8;
        d.min(8 - d)
    };
    if diff(cw, ideal) < diff(ccw, ideal) {
        cw
    } else {
        ccw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_best_direction_rotates_one_step() {
        let pos = FPoint::new(5.0, 5.0);
        // pursue east (direction 5) while facing north (3): rotate toward it
        let pursue = FPoint::new(9.0, 5.0);
        let next = next_best_direction(pos, pursue, 3);
        assert!(next == 4 || next == 2);
        assert_eq!(next, 4);
    }
}
