//! The player-controlled entity. Shares the creature state machine but
//! is driven by abstract input: 8-way keyboard movement, click-to-move
//! pathfinding with a deadzone, queued action-bar powers, plus the
//! hero-only concerns (level-up, low-HP warning, transform round-trip).

use emberfall_core::geometry::{calc_direction, calc_dist, FPoint};
use emberfall_core::message::LogKind;
use emberfall_core::stats::Stat;
use emberfall_core::timer::TimerReset;

use crate::assets::Action;
use crate::collision::{CollideType, MovementType};
use crate::entity::EntitySoundKind;
use crate::ids::PowerId;
use crate::path_finding;
use crate::powers::{ChainKind, ChainPower, PowerKind, PowerState};
use crate::session::GameSession;
use crate::stat_block::{EntityState, StatBlock};

/// An action-bar request for this frame, supplied by the host UI.
#[derive(Clone, Copy, Debug)]
pub struct QueuedAction {
    pub power: PowerId,
    pub target: FPoint,
}

/// Hero-only driver state.
pub struct AvatarDriver {
    pub queued_action: Option<QueuedAction>,
    pub mouse_target: FPoint,
    pub mouse_move: bool,
    lowhp_warned: bool,
    /// Pre-transform stat block, restored on untransform.
    hero_stats: Option<Box<StatBlock>>,
    /// Last tile the transformed hero stood on that is valid for a
    /// normal mover, used to relocate on untransform.
    pub transform_pos: FPoint,
    pub transform_map: String,
    pub time_played: u64,
}

impl AvatarDriver {
    pub fn new() -> Self {
        Self {
            queued_action: None,
            mouse_target: FPoint::default(),
            mouse_move: false,
            lowhp_warned: false,
            hero_stats: None,
            transform_pos: FPoint::default(),
            transform_map: String::new(),
            time_played: 0,
        }
    }

    pub fn is_transformed(&self) -> bool {
        self.hero_stats.is_some()
    }
}

impl Default for AvatarDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl GameSession {
    /// One avatar tick: upkeep, input, movement, state advance.
    pub fn avatar_logic(&mut self) {
        let hero = self.hero;

        // upkeep mirrors the creature path
        self.behavior_upkeep(hero);

        self.avatar_check_level_up();
        self.avatar_check_low_hp();
        self.avatar_check_transform();

        let alive = self.entities.get(hero).map(|e| e.stats.alive).unwrap_or(false);
        if !alive {
            self.avatar_state_advance();
            return;
        }

        // remember the last safe tile while transformed
        if self.avatar.is_transformed() {
            let pos = self.entities.get(hero).map(|e| e.stats.pos).unwrap_or_default();
            if self.collision.is_valid_position(
                pos.x,
                pos.y,
                MovementType::Normal,
                CollideType::Hero,
            ) {
                self.avatar.transform_pos = pos;
                self.avatar.transform_map = self.map.filename.clone();
            }
        }

        self.avatar_handle_input();
        self.avatar_movement();
        self.avatar_state_advance();
    }

    fn avatar_check_level_up(&mut self) {
        let hero = self.hero;
        let (xp, level) = match self.entities.get(hero) {
            Some(e) => (e.stats.xp, e.stats.level),
            None => return,
        };
        let next_threshold = self.settings.xp_table.get(level as usize).copied();
        let Some(threshold) = next_threshold else {
            return;
        };
        if xp < threshold {
            return;
        }

        let settings = &self.settings;
        if let Some(e) = self.entities.get_mut(hero) {
            e.stats.recalc(settings);
            e.stats.level_up = true;
        }
        self.msgs.log(
            &format!(
                "Congratulations, you have reached level {}!",
                self.entities.get(hero).map(|e| e.stats.level).unwrap_or(0)
            ),
            LogKind::Normal,
        );
        let levelup = self.entities.get(hero).map(|e| e.sounds.levelup).unwrap_or(0);
        self.mixer.play(levelup, "level_up", None, false);
    }

    fn avatar_check_low_hp(&mut self) {
        let hero = self.hero;
        let (hp, hp_max) = match self.entities.get(hero) {
            Some(e) => (e.stats.hp, e.stats.get(Stat::HpMax)),
            None => return,
        };
        let threshold = self.settings.misc.low_hp_threshold;
        let low = hp > 0 && hp_max > 0 && hp * 100 / hp_max < threshold;
        if low && !self.avatar.lowhp_warned {
            self.msgs.log("Your health is low!", LogKind::Normal);
            let lowhp = self.entities.get(hero).map(|e| e.sounds.lowhp).unwrap_or(0);
            self.mixer.play(lowhp, "lowhp", None, false);
            self.avatar.lowhp_warned = true;
        } else if !low {
            self.avatar.lowhp_warned = false;
        }
    }

    /// Apply pending transform/untransform work queued by the power
    /// dispatcher or by the transform timer hitting zero.
    fn avatar_check_transform(&mut self) {
        let hero = self.hero;
        let (transform_type, transformed, duration) = match self.entities.get(hero) {
            Some(e) => (
                e.stats.transform_type.clone(),
                e.stats.transformed,
                e.stats.transform_duration,
            ),
            None => return,
        };

        if !transformed && !transform_type.is_empty() && transform_type != "untransform" {
            self.avatar_transform(&transform_type);
            return;
        }

        // timer ran out, or an untransform power fired
        if transformed && (duration == 0 || transform_type == "untransform") {
            self.avatar_untransform();
        }
    }

    fn avatar_transform(&mut self, creature: &str) {
        let hero = self.hero;
        let file = {
            let candidates = self.creatures.in_category(creature, 0, 0);
            if candidates.is_empty() {
                log::error!("Avatar: cannot transform into unknown creature '{}'", creature);
                if let Some(e) = self.entities.get_mut(hero) {
                    e.stats.transform_type.clear();
                }
                return;
            }
            candidates[0].filename.clone()
        };

        let new_stats = match StatBlock::load(&file, &self.settings) {
            Ok(s) => s,
            Err(e) => {
                log::error!("Avatar: {:#}", e);
                return;
            }
        };

        let Some(entity) = self.entities.get_mut(hero) else {
            return;
        };
        let old = std::mem::replace(&mut entity.stats, new_stats);

        // the creature shell inherits the hero's identity and position
        let s = &mut entity.stats;
        s.flags = old.flags;
        s.pos = old.pos;
        s.direction = old.direction;
        s.level = old.level;
        s.xp = old.xp;
        s.name = old.name.clone();
        s.transformed = true;
        s.transform_type = old.transform_type.clone();
        s.transform_duration = old.transform_duration;
        s.transform_duration_total = old.transform_duration_total;
        s.manual_untransform = old.manual_untransform;
        s.transform_with_equipment = old.transform_with_equipment;
        s.untransform_on_hit = old.untransform_on_hit;
        s.summons = old.summons.clone();
        s.summoner = old.summoner;
        if old.transform_with_equipment {
            s.equip_flags = old.equip_flags.clone();
        }
        s.hp = s.get(Stat::HpMax).min(old.hp.max(1));
        s.mp = s.get(Stat::MpMax).min(old.mp);

        self.avatar.hero_stats = Some(Box::new(old));
        self.avatar.transform_pos = self
            .entities
            .get(hero)
            .map(|e| e.stats.pos)
            .unwrap_or_default();
        self.avatar.transform_map = self.map.filename.clone();

        self.rebind_hero_visuals();
    }

    /// Re-resolve the hero's animation set and sound handles in place,
    /// keeping the hero's handle (and every reference to it) stable.
    pub(crate) fn rebind_hero_visuals(&mut self) {
        let hero = self.hero;
        let anim_path = match self.entities.get(hero) {
            Some(e) => e.stats.animations.clone(),
            None => return,
        };

        let def = if anim_path.is_empty() {
            None
        } else {
            self.animations.load_set(&anim_path).and_then(|set| {
                self.animations.increase_count(&anim_path);
                self.animations
                    .get_set(set)
                    .and_then(|s| s.default_animation())
                    .map(|d| (set, crate::animation::Animation::new(d)))
            })
        };

        let sounds = &mut self.sounds;
        if let Some(e) = self.entities.get_mut(hero) {
            match def {
                Some((set, anim)) => {
                    e.animation_set = Some(set);
                    e.animation = Some(anim);
                }
                None => {
                    e.animation_set = None;
                    e.animation = None;
                }
            }
            e.load_sounds(sounds);
        }
    }

    fn avatar_untransform(&mut self) {
        let hero = self.hero;
        let Some(saved) = self.avatar.hero_stats.take() else {
            if let Some(e) = self.entities.get_mut(hero) {
                e.stats.transformed = false;
                e.stats.transform_type.clear();
            }
            return;
        };

        // if the hero ended up somewhere a normal mover can't stand,
        // fall back to the last valid transformed position
        let pos = self.entities.get(hero).map(|e| e.stats.pos).unwrap_or_default();
        self.collision.unblock(pos.x, pos.y);
        let mut restore_pos = pos;
        if !self
            .collision
            .is_valid_position(pos.x, pos.y, MovementType::Normal, CollideType::Hero)
        {
            restore_pos = self.avatar.transform_pos;
            if self.avatar.transform_map != self.map.filename
                && !self.avatar.transform_map.is_empty()
            {
                self.request_teleport(Some(self.avatar.transform_map.clone()), Some(restore_pos));
            }
            self.msgs.log(
                "Transformation expired. You have been moved back to a safe place.",
                LogKind::Unique,
            );
        }

        let Some(entity) = self.entities.get_mut(hero) else {
            return;
        };
        let shell = std::mem::replace(&mut entity.stats, *saved);
        let s = &mut entity.stats;
        s.pos = restore_pos;
        s.direction = shell.direction;
        s.level = shell.level;
        s.xp = shell.xp;
        s.summons = shell.summons.clone();
        s.summoner = shell.summoner;
        s.hp = s.get(Stat::HpMax).min(shell.hp.max(1));
        s.mp = s.get(Stat::MpMax).min(shell.mp);
        s.transformed = false;
        s.transform_type.clear();
        s.transform_duration = 0;

        self.collision.block(restore_pos.x, restore_pos.y, false);

        self.rebind_hero_visuals();
    }

    /// Translate the frame's input into direction, movement intent, and
    /// queued power activation.
    fn avatar_handle_input(&mut self) {
        let hero = self.hero;
        let stunned = self
            .entities
            .get(hero)
            .map(|e| e.stats.effects.stun)
            .unwrap_or(true);
        if stunned {
            return;
        }

        // keyboard 8-way movement
        let mut dx = 0;
        let mut dy = 0;
        if self.input.pressing(Action::Up) {
            dy -= 1;
        }
        if self.input.pressing(Action::Down) {
            dy += 1;
        }
        if self.input.pressing(Action::Left) {
            dx -= 1;
        }
        if self.input.pressing(Action::Right) {
            dx += 1;
        }

        let keyboard_move = dx != 0 || dy != 0;
        if keyboard_move {
            let pos = self.entities.get(hero).map(|e| e.stats.pos).unwrap_or_default();
            let target = FPoint::new(pos.x + dx as f32, pos.y + dy as f32);
            if let Some(e) = self.entities.get_mut(hero) {
                e.stats.direction = calc_direction(pos.x, pos.y, target.x, target.y);
                e.behavior.pursue_pos = target;
                e.behavior.path.clear();
            }
            self.avatar.mouse_move = false;
        }

        // click-to-move: hold MAIN1 on open ground
        if self.input.pressing(Action::Main1) && self.input.mouse_in_world && !keyboard_move {
            let target = self.screen_to_map(self.input.mouse);
            let pos = self.entities.get(hero).map(|e| e.stats.pos).unwrap_or_default();
            if calc_dist(pos, target) > self.settings.misc.mouse_move_deadzone {
                self.avatar.mouse_move = true;
                self.avatar.mouse_target = target;
            }
        }

        if self.avatar.mouse_move {
            self.avatar_mouse_pursue();
        }

        // interaction: the tile ahead, then floor loot as a fallback
        if self.input.pressed_unlocked(Action::Accept) {
            self.input.lock(Action::Accept);
            let (pos, dir) = self
                .entities
                .get(hero)
                .map(|e| (e.stats.pos, e.stats.direction))
                .unwrap_or_default();
            let ahead = emberfall_core::geometry::calc_vector(pos, dir, 1.0);
            if !self.interact_at(ahead) && !self.interact_at(pos) {
                self.pickup_nearest_loot();
            }
        }

        // action bar
        if let Some(action) = self.avatar.queued_action.take() {
            self.avatar_begin_power(action);
        }
    }

    /// Follow the stored mouse target, pathfinding around obstacles the
    /// same way creatures do.
    fn avatar_mouse_pursue(&mut self) {
        let hero = self.hero;
        let (pos, mt) = match self.entities.get(hero) {
            Some(e) => (e.stats.pos, e.stats.movement_type),
            None => return,
        };
        let target = self.avatar.mouse_target;

        if calc_dist(pos, target) <= self.settings.misc.mouse_move_deadzone {
            self.avatar.mouse_move = false;
            if let Some(e) = self.entities.get_mut(hero) {
                e.behavior.path.clear();
            }
            return;
        }

        self.collision.unblock(pos.x, pos.y);
        let direct = self
            .collision
            .line_of_movement(pos.x, pos.y, target.x, target.y, mt);

        let mut pursue = target;
        if direct {
            if let Some(e) = self.entities.get_mut(hero) {
                e.behavior.path.clear();
            }
        } else {
            let need_path = self
                .entities
                .get(hero)
                .map(|e| e.behavior.path.is_empty())
                .unwrap_or(true);
            if need_path {
                let limit = self.settings.misc.path_limit;
                let mut path = Vec::new();
                let found =
                    path_finding::compute_path(&self.collision, pos, target, &mut path, mt, limit);
                if let Some(e) = self.entities.get_mut(hero) {
                    e.behavior.path = path;
                    e.behavior.path_found = found;
                }
                if !found {
                    self.avatar.mouse_move = false;
                }
            }
            if let Some(e) = self.entities.get_mut(hero) {
                if let Some(next) = e.behavior.path.last().copied() {
                    pursue = next;
                    if calc_dist(e.stats.pos, next) <= 1.0 {
                        e.behavior.path.pop();
                    }
                }
            }
        }
        self.collision.block(pos.x, pos.y, false);

        if let Some(e) = self.entities.get_mut(hero) {
            e.behavior.pursue_pos = pursue;
            e.stats.direction = calc_direction(e.stats.pos.x, e.stats.pos.y, pursue.x, pursue.y);
        }
    }

    /// Enter the Power (or Block) state for a queued action-bar power.
    fn avatar_begin_power(&mut self, action: QueuedAction) {
        let hero = self.hero;
        let power_id = self.check_replace_by_effect(action.power, hero);
        if !self.powers.is_valid(power_id) {
            return;
        }
        let power = self.powers.get(power_id).clone();

        let ok_state = self
            .entities
            .get(hero)
            .map(|e| {
                matches!(
                    e.stats.cur_state,
                    EntityState::Stance | EntityState::Move | EntityState::Block
                ) && e.stats.cooldown.is_end()
            })
            .unwrap_or(false);
        if !ok_state {
            return;
        }

        if power.requires_empty_target
            && !self.collision.is_empty(action.target.x, action.target.y)
        {
            return;
        }

        if power.kind == PowerKind::Block {
            self.activate_power(power_id, hero, action.target);
            return;
        }

        // face the target when the power asks for it
        if power.face {
            if let Some(e) = self.entities.get_mut(hero) {
                e.stats.direction = calc_direction(
                    e.stats.pos.x,
                    e.stats.pos.y,
                    action.target.x,
                    action.target.y,
                );
            }
        }

        if power.new_state == PowerState::Instant {
            self.activate_power(power_id, hero, action.target);
            let cooldown = power.cooldown;
            if let Some(e) = self.entities.get_mut(hero) {
                e.stats.cooldown.restart_with(cooldown);
            }
            return;
        }

        if let Some(e) = self.entities.get_mut(hero) {
            e.stats.cur_state = EntityState::Power;
            e.behavior.pursue_pos = action.target;
            // slot index is not meaningful for the hero; the power id is
            // carried through the pursue position and replay below
            e.stats.activated_power = None;
        }
        self.avatar_power_pending = Some((power_id, action.target));
        self.avatar.mouse_move = false;
    }

    /// Movement for Stance/Move with the hero's collide type.
    fn avatar_movement(&mut self) {
        let hero = self.hero;
        let state = match self.entities.get(hero) {
            Some(e) => e.stats.cur_state,
            None => return,
        };
        if !matches!(state, EntityState::Stance | EntityState::Move) {
            return;
        }

        let wants_move = {
            let Some(e) = self.entities.get(hero) else { return };
            let keyboard = e.behavior.pursue_pos != FPoint::default()
                && calc_dist(e.stats.pos, e.behavior.pursue_pos) > 0.1;
            keyboard
                && (self.input.pressing(Action::Up)
                    || self.input.pressing(Action::Down)
                    || self.input.pressing(Action::Left)
                    || self.input.pressing(Action::Right)
                    || self.avatar.mouse_move)
        };

        let pos = self.entities.get(hero).map(|e| e.stats.pos).unwrap_or_default();
        self.collision.unblock(pos.x, pos.y);

        if wants_move {
            let moved = {
                let collision = &self.collision;
                self.entities
                    .get_mut(hero)
                    .map(|e| e.try_move(collision))
                    .unwrap_or(false)
            };
            if let Some(e) = self.entities.get_mut(hero) {
                e.stats.cur_state = if moved || self.avatar.mouse_move {
                    EntityState::Move
                } else {
                    EntityState::Stance
                };
                if !moved && !self.avatar.mouse_move {
                    e.behavior.collided = true;
                }
            }
        } else if state == EntityState::Move {
            if let Some(e) = self.entities.get_mut(hero) {
                e.stats.cur_state = EntityState::Stance;
            }
        }

        let pos = self.entities.get(hero).map(|e| e.stats.pos).unwrap_or(pos);
        self.collision.block(pos.x, pos.y, false);
    }

    /// Advance the hero animation and run per-state side effects.
    fn avatar_state_advance(&mut self) {
        let hero = self.hero;

        if let Some(e) = self.entities.get_mut(hero) {
            if let Some(anim) = &mut e.animation {
                anim.advance_frame();
            }
        }

        let state = match self.entities.get(hero) {
            Some(e) => e.stats.cur_state,
            None => return,
        };

        match state {
            EntityState::Stance => {
                let lib = &self.animations;
                if let Some(e) = self.entities.get_mut(hero) {
                    e.set_animation("stance", lib);
                }
            }
            EntityState::Move => {
                let lib = &self.animations;
                let step = {
                    let Some(e) = self.entities.get_mut(hero) else { return };
                    e.set_animation("run", lib);
                    e.animation
                        .as_ref()
                        .map(|a| a.is_active_frame())
                        .unwrap_or(false)
                };
                if step {
                    // footsteps fire on the run animation's active frames
                    let sound = self
                        .entities
                        .get(hero)
                        .map(|e| e.stats.sfx_step.clone())
                        .unwrap_or_default();
                    if !sound.is_empty() {
                        let id = self.sounds.load(&sound);
                        let pos = self.entities.get(hero).map(|e| e.stats.pos);
                        self.mixer.play(id, "hero_step", pos, false);
                    }
                }
            }
            EntityState::Power => self.avatar_state_power(),
            EntityState::Block => {
                let lib = &self.animations;
                if let Some(e) = self.entities.get_mut(hero) {
                    e.set_animation("block", lib);
                }
                // releasing the block action ends the stance
                if !self.input.pressing(Action::Main2) {
                    if let Some(e) = self.entities.get_mut(hero) {
                        e.stats.effects.triggered_block = false;
                        e.stats
                            .effects
                            .clear_trigger_effects(crate::effects::PassiveTrigger::Block);
                        e.stats.cur_state = EntityState::Stance;
                    }
                }
            }
            EntityState::Hit => {
                let lib = &self.animations;
                let done = {
                    let Some(e) = self.entities.get_mut(hero) else { return };
                    e.set_animation("hit", lib);
                    if e.animation
                        .as_ref()
                        .map(|a| a.is_first_frame())
                        .unwrap_or(false)
                    {
                        e.stats.effects.triggered_hit = true;
                    }
                    e.animation
                        .as_ref()
                        .map(|a| a.is_last_frame())
                        .unwrap_or(true)
                        || e.animation_name() != "hit"
                };
                if done {
                    if let Some(e) = self.entities.get_mut(hero) {
                        e.stats.cur_state = EntityState::Stance;
                    }
                }
            }
            EntityState::Dead => {
                let lib = &self.animations;
                let first = {
                    let Some(e) = self.entities.get_mut(hero) else { return };
                    e.set_animation("die", lib);
                    e.animation
                        .as_ref()
                        .map(|a| a.is_first_frame())
                        .unwrap_or(false)
                };
                if first {
                    let mixer = self.mixer.as_mut();
                    if let Some(e) = self.entities.get_mut(hero) {
                        e.play_sound(EntitySoundKind::Die, mixer);
                        e.stats.effects.clear_effects();
                    }
                    self.msgs.log("You are defeated.", LogKind::Normal);
                }
            }
            _ => {}
        }
    }

    /// Hero power state: the pending power fires on the attack
    /// animation's active frame.
    fn avatar_state_power(&mut self) {
        let hero = self.hero;
        let Some((power_id, target)) = self.avatar_power_pending else {
            if let Some(e) = self.entities.get_mut(hero) {
                e.stats.cur_state = EntityState::Stance;
            }
            return;
        };
        let power = self.powers.get(power_id).clone();

        let lib = &self.animations;
        if let Some(e) = self.entities.get_mut(hero) {
            e.set_animation(&power.attack_anim, lib);
            e.stats.prevent_interrupt = power.prevent_interrupt;
        }

        let first = self
            .entities
            .get(hero)
            .and_then(|e| e.animation.as_ref())
            .map(|a| a.is_first_frame())
            .unwrap_or(false);
        if first {
            let chains: Vec<ChainPower> = power.chain(ChainKind::Pre).copied().collect();
            for chain in chains {
                if chain.id != crate::ids::POWER_NONE && self.rng.percent_chance(chain.chance) {
                    self.activate_power(chain.id, hero, target);
                }
            }
            let attack_speed = self
                .entities
                .get(hero)
                .map(|e| {
                    (e.stats.effects.get_attack_speed(&power.attack_anim) * power.attack_speed)
                        / 100.0
                })
                .unwrap_or(100.0);
            let mixer = self.mixer.as_mut();
            if let Some(e) = self.entities.get_mut(hero) {
                if let Some(anim) = &mut e.animation {
                    anim.set_speed(attack_speed);
                }
                e.play_attack_sound(&power.attack_anim, mixer);
            }
        }

        let active = self
            .entities
            .get(hero)
            .and_then(|e| e.animation.as_ref())
            .map(|a| a.is_active_frame())
            .unwrap_or(true);
        if active && self.avatar_power_pending.is_some() {
            self.activate_power(power_id, hero, target);
            let cooldown = power.cooldown;
            if let Some(e) = self.entities.get_mut(hero) {
                e.stats.cooldown.restart_with(cooldown);
            }
            self.avatar_power_pending = None;
        }

        let finished = {
            let Some(e) = self.entities.get(hero) else { return };
            e.animation
                .as_ref()
                .map(|a| a.is_last_frame())
                .unwrap_or(true)
                || (power.new_state == PowerState::Attack
                    && e.animation_name() != power.attack_anim)
        };
        if finished {
            self.avatar_power_pending = None;
            if let Some(e) = self.entities.get_mut(hero) {
                e.stats.cur_state = EntityState::Stance;
                e.stats.prevent_interrupt = false;
            }
        }
    }

    /// Respawn bookkeeping when the hero accepts defeat.
    pub fn avatar_respawn(&mut self, pos: FPoint) {
        let hero = self.hero;
        let settings = &self.settings;
        if let Some(e) = self.entities.get_mut(hero) {
            e.stats.effects.clear_effects();
            e.stats.recalc(settings);
            e.stats.alive = true;
            e.stats.corpse = false;
            e.stats.cur_state = EntityState::Stance;
            e.stats.pos = pos;
            e.stats.effects.triggered_death = false;
            e.stats.cooldown.reset(TimerReset::End);
        }
    }
}
