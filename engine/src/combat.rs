//! The damage pipeline: everything that happens between a hazard
//! overlapping an entity and that entity losing HP, reflecting the
//! missile, or dying. Runs on the session with handles so the defender,
//! the attacker, and the hazard can all be touched without aliasing.

use emberfall_core::geometry::FPoint;
use emberfall_core::message::CombatTextKind;
use emberfall_core::stats::Stat;
use emberfall_core::timer::TimerReset;

use crate::collision::MovementType;
use crate::effects::{EffectKind, SourceType};
use crate::entity::EntitySoundKind;
use crate::hazards::Hazard;
use crate::ids::{EntityId, POWER_NONE};
use crate::powers::{ChainKind, ChainPower, PowerKind};
use crate::session::GameSession;
use crate::stat_block::{AiPowerKind, EntityFlags, EntityState};

impl GameSession {
    /// Resolve one hazard-vs-entity hit on the defender. Returns whether
    /// the hit landed; a false return leaves the defender untouched
    /// (though the hazard may have been reflected).
    pub fn take_hit(&mut self, defender: EntityId, haz_index: usize) -> bool {
        let power_index = self.hazards.hazards[haz_index].power_index;
        let power = self.powers.get(power_index).clone();

        // -- target filters -------------------------------------------------
        {
            let Some(entity) = self.entities.get(defender) else {
                return false;
            };
            let stats = &entity.stats;

            if !power.target_categories.is_empty() && !stats.is_hero() {
                let matched = stats
                    .categories
                    .iter()
                    .any(|c| power.target_categories.contains(c));
                if !matched {
                    return false;
                }
            }

            if !stats.power_filter.is_empty() && !stats.power_filter.contains(&power_index) {
                return false;
            }

            // the dead cannot be hit again
            if matches!(stats.cur_state, EntityState::Dead | EntityState::CritDead) {
                return false;
            }

            match stats.movement_type {
                MovementType::Normal if !power.target_movement_normal => return false,
                MovementType::Flying if !power.target_movement_flying => return false,
                MovementType::Intangible if !power.target_movement_intangible => return false,
                _ => {}
            }
        }

        // AoE behind walls: line of movement from the hazard's position,
        // checked against the grid as it is right now
        if power.walls_block_aoe {
            let haz_pos = self.hazards.hazards[haz_index].pos;
            let Some(def_pos) = self.entities.get(defender).map(|e| e.stats.pos) else {
                return false;
            };
            if !self.collision.line_of_movement(
                def_pos.x,
                def_pos.y,
                haz_pos.x,
                haz_pos.y,
                MovementType::Normal,
            ) {
                return false;
            }
        }

        // campaign-status invincibility
        {
            let haz_source_type = self.hazards.hazards[haz_index].source_type;
            let Some(entity) = self.entities.get(defender) else {
                return false;
            };
            let stats = &entity.stats;
            if !stats.is_hero() && !stats.is_hero_ally() && haz_source_type != SourceType::Enemy {
                let req = &stats.invincible_requires_status;
                let req_not = &stats.invincible_requires_not_status;
                let invincible = (!req.is_empty()
                    && req.iter().all(|s| self.campaign.check_status(s)))
                    || (!req_not.is_empty()
                        && req_not.iter().all(|s| !self.campaign.check_status(s)));
                if invincible {
                    return false;
                }
            }
        }

        // an un-aggroed enemy joins combat when struck
        {
            let no_aggro = power.no_aggro;
            if let Some(entity) = self.entities.get_mut(defender) {
                let stats = &mut entity.stats;
                if !stats.in_combat && !stats.is_hero() && !stats.is_hero_ally() && !no_aggro {
                    stats.join_combat = true;
                }
            }
        }

        // beacons never damage; they only draw allies into the fight
        if power.beacon {
            return false;
        }

        // -- missile reflection --------------------------------------------
        let reflect_chance = self
            .entities
            .get(defender)
            .map(|e| e.stats.get(Stat::Reflect))
            .unwrap_or(0);
        if power.kind == PowerKind::Missile
            && !self.hazards.hazards[haz_index].reflected_this_tick
            && self.rng.percent_chance(reflect_chance)
        {
            let defender_is_hero = self
                .entities
                .get(defender)
                .map(|e| e.stats.is_hero())
                .unwrap_or(false);
            let haz = &mut self.hazards.hazards[haz_index];
            let new_angle = haz.angle + std::f32::consts::PI;
            haz.set_angle(new_angle);
            haz.source_type = match haz.source_type {
                SourceType::Hero | SourceType::Ally => SourceType::Enemy,
                SourceType::Enemy => {
                    if defender_is_hero {
                        SourceType::Hero
                    } else {
                        SourceType::Ally
                    }
                }
                SourceType::Neutral => SourceType::Neutral,
            };
            haz.lifespan = power.lifespan;
            haz.reflected_this_tick = true;

            if let Some(entity) = self.entities.get_mut(defender) {
                if entity.animation_name() == "block" {
                    entity.play_sound(EntitySoundKind::Block, self.mixer.as_mut());
                }
            }
            return false;
        }

        // -- accuracy vs avoidance ------------------------------------------
        let src = self.hazards.hazards[haz_index].src;
        let src_perfect_accuracy = self
            .entities
            .get(src)
            .map(|e| e.stats.perfect_accuracy)
            .unwrap_or(false);

        let accuracy = power
            .mod_accuracy
            .apply(self.hazards.hazards[haz_index].accuracy);
        let avoidance = if power.trait_avoidance_ignore {
            0
        } else {
            self.entities
                .get(defender)
                .map(|e| e.stats.get(Stat::Avoidance))
                .unwrap_or(0)
        };

        let raw_avoidance = 100 - (accuracy - avoidance);
        let is_overhit = if raw_avoidance < 0 && !src_perfect_accuracy {
            self.rng.percent_chance(raw_avoidance.abs())
        } else {
            false
        };
        let true_avoidance = raw_avoidance
            .max(self.settings.combat.min_avoidance)
            .min(self.settings.combat.max_avoidance);
        let missed = !src_perfect_accuracy && self.rng.percent_chance(true_avoidance);

        // -- damage roll ----------------------------------------------------
        let (dmg_min, dmg_max) = {
            let haz = &self.hazards.hazards[haz_index];
            (haz.dmg_min, haz.dmg_max)
        };
        let mut dmg = self.rng.rand_between(dmg_min, dmg_max);
        dmg = match power.mod_damage.mode {
            crate::powers::ModifierMode::Multiply => dmg * power.mod_damage.min / 100,
            crate::powers::ModifierMode::Add => dmg + power.mod_damage.min,
            crate::powers::ModifierMode::Absolute => self
                .rng
                .rand_between(power.mod_damage.min, power.mod_damage.max),
        };

        // elemental scaling against the defender's vulnerability
        if let Some(element) = power.trait_elemental {
            if let Some(entity) = self.entities.get(defender) {
                if let Some(vuln) = entity.stats.vulnerable.get(element).copied() {
                    let mut v = vuln.max(self.settings.combat.min_resist);
                    if vuln < 100 {
                        v = v.min(self.settings.combat.max_resist);
                    }
                    dmg = (dmg * v) / 100;
                }
            }
        }

        // -- absorption -----------------------------------------------------
        let triggered_block = self
            .entities
            .get(defender)
            .map(|e| e.stats.effects.triggered_block)
            .unwrap_or(false);
        if !power.trait_armor_penetration {
            let (abs_min, abs_max) = self
                .entities
                .get(defender)
                .map(|e| (e.stats.get(Stat::AbsorbMin), e.stats.get(Stat::AbsorbMax)))
                .unwrap_or((0, 0));
            let mut absorption = self.rng.rand_between(abs_min, abs_max);

            if absorption > 0 && dmg > 0 {
                let (min_pct, max_pct) = if triggered_block {
                    (self.settings.combat.min_block, self.settings.combat.max_block)
                } else {
                    (
                        self.settings.combat.min_absorb,
                        self.settings.combat.max_absorb,
                    )
                };
                if (absorption * 100) / dmg < min_pct {
                    absorption = (dmg * min_pct) / 100;
                }
                if (absorption * 100) / dmg > max_pct {
                    absorption = (dmg * max_pct) / 100;
                }
                // a capped absorb of 0 would read as "my armor did
                // nothing", so it rounds up to 1
                if absorption == 0 {
                    absorption = 1;
                }
            }

            dmg -= absorption;
            if dmg <= 0 {
                dmg = 0;
                if !power.ignore_zero_damage {
                    if power.trait_elemental.is_none() {
                        if triggered_block && self.settings.combat.max_block < 100 {
                            dmg = 1;
                        } else if !triggered_block && self.settings.combat.max_absorb < 100 {
                            dmg = 1;
                        }
                    } else if self.settings.combat.max_resist < 100 {
                        dmg = 1;
                    }
                    if let Some(entity) = self.entities.get_mut(defender) {
                        if entity.animation_name() == "block" {
                            entity.play_sound(EntitySoundKind::Block, self.mixer.as_mut());
                            entity.reset_active_animation();
                        }
                    }
                }
            }
        }

        // -- critical, overhit, miss bands ----------------------------------
        let mut crit_chance = power
            .mod_crit
            .apply(self.hazards.hazards[haz_index].crit_chance);
        let (def_stunned, def_slowed) = self
            .entities
            .get(defender)
            .map(|e| (e.stats.effects.stun, e.stats.effects.speed < 100.0))
            .unwrap_or((false, false));
        if def_stunned || def_slowed {
            crit_chance += self.hazards.hazards[haz_index].trait_crits_impaired;
        }

        let crit = self.rng.percent_chance(crit_chance);
        if crit {
            let band = self.rng.rand_between(
                self.settings.combat.min_crit_damage,
                self.settings.combat.max_crit_damage,
            );
            dmg = (dmg * band) / 100;
            let is_hero_defender = self
                .entities
                .get(defender)
                .map(|e| e.stats.is_hero())
                .unwrap_or(false);
            if !is_hero_defender {
                let fps = self.settings.misc.max_frames_per_sec;
                self.camera.shake(fps / 2);
            }
        } else if is_overhit {
            let band = self.rng.rand_between(
                self.settings.combat.min_overhit_damage,
                self.settings.combat.max_overhit_damage,
            );
            dmg = (dmg * band) / 100;
        }

        if missed {
            let band = self.rng.rand_between(
                self.settings.combat.min_miss_damage,
                self.settings.combat.max_miss_damage,
            );
            dmg = (dmg * band) / 100;
        }

        // -- combat text ----------------------------------------------------
        let def_pos = self
            .entities
            .get(defender)
            .map(|e| e.stats.pos)
            .unwrap_or_default();
        if !power.ignore_zero_damage {
            if dmg == 0 {
                self.combat_text
                    .add_string("miss", def_pos, CombatTextKind::Miss);
                return false;
            }
            let is_hero_defender = self
                .entities
                .get(defender)
                .map(|e| e.stats.is_hero())
                .unwrap_or(false);
            if is_hero_defender {
                self.combat_text
                    .add_int(dmg, def_pos, CombatTextKind::TakeDamage);
            } else if crit || is_overhit {
                self.combat_text.add_int(dmg, def_pos, CombatTextKind::Crit);
            } else if missed {
                self.combat_text.add_int(dmg, def_pos, CombatTextKind::Miss);
            } else {
                self.combat_text
                    .add_int(dmg, def_pos, CombatTextKind::GiveDamage);
            }
        }

        // -- apply ----------------------------------------------------------
        let (prev_hp, was_debuffed) = {
            let Some(entity) = self.entities.get_mut(defender) else {
                return false;
            };
            let prev = entity.stats.hp;
            let was = entity.stats.effects.is_debuffed();
            entity.stats.take_damage(dmg);
            (prev, was)
        };

        let haz_source_type = self.hazards.hazards[haz_index].source_type;

        if dmg > 0 || power.ignore_zero_damage {
            // damage always breaks stun
            if let Some(entity) = self.entities.get_mut(defender) {
                entity.stats.effects.remove_effect_type(EffectKind::Stun);
            }

            self.apply_post_effects(defender, src, power_index, haz_source_type);

            self.apply_steals(defender, src, haz_index, dmg, prev_hp);

            // return damage back to the attacker
            let return_damage = self
                .entities
                .get(defender)
                .map(|e| e.stats.get(Stat::ReturnDamage))
                .unwrap_or(0);
            let src_reflect_immune = self
                .entities
                .get(src)
                .map(|e| e.stats.effects.immunity_damage_reflect)
                .unwrap_or(true);
            if return_damage > 0 && !src_reflect_immune {
                let mut dmg_return = (dmg * return_damage) / 100;
                if dmg_return == 0 {
                    dmg_return = 1;
                }
                if let Some(attacker) = self.entities.get_mut(src) {
                    attacker.stats.take_damage(dmg_return);
                    let pos = attacker.stats.pos;
                    self.combat_text
                        .add_int(dmg_return, pos, CombatTextKind::GiveDamage);
                }
            }

            if let Some(entity) = self.entities.get_mut(defender) {
                entity.stats.effects.remove_effect_id(&power.remove_effects);
            }

            let chains: Vec<ChainPower> = power.chain(ChainKind::Post).copied().collect();
            for chain in chains {
                if chain.id != POWER_NONE && self.rng.percent_chance(chain.chance) {
                    self.activate_power(chain.id, src, def_pos);
                }
            }
        }

        // -- reactions ------------------------------------------------------
        if dmg > 0 {
            self.hit_reactions(defender, haz_index, crit, was_debuffed);
        }

        true
    }

    fn apply_steals(
        &mut self,
        defender: EntityId,
        src: EntityId,
        haz_index: usize,
        dmg: i32,
        prev_hp: i32,
    ) {
        let haz = &self.hazards.hazards[haz_index];
        let (haz_hp_steal, haz_mp_steal) = (haz.hp_steal, haz.mp_steal);

        let (immune_hp, immune_mp) = self
            .entities
            .get(defender)
            .map(|e| {
                (
                    e.stats.effects.immunity_hp_steal,
                    e.stats.effects.immunity_mp_steal,
                )
            })
            .unwrap_or((true, true));

        let (src_hp_steal, src_mp_steal) = self
            .entities
            .get(src)
            .map(|e| (e.stats.get(Stat::HpSteal), e.stats.get(Stat::MpSteal)))
            .unwrap_or((0, 0));

        // steal percentages from the power and the attacker stack
        let hp_steal = haz_hp_steal + src_hp_steal;
        if !immune_hp && hp_steal != 0 {
            let mut amt = (dmg.min(prev_hp) * hp_steal) / 100;
            if amt == 0 {
                amt = 1;
            }
            if let Some(attacker) = self.entities.get_mut(src) {
                let max = attacker.stats.get(Stat::HpMax);
                attacker.stats.hp = (attacker.stats.hp + amt).min(max);
                let pos = attacker.stats.pos;
                self.combat_text
                    .add_string(&format!("+{} HP", amt), pos, CombatTextKind::Buff);
            }
        }
        let mp_steal = haz_mp_steal + src_mp_steal;
        if !immune_mp && mp_steal != 0 {
            let mut amt = (dmg.min(prev_hp) * mp_steal) / 100;
            if amt == 0 {
                amt = 1;
            }
            if let Some(attacker) = self.entities.get_mut(src) {
                let max = attacker.stats.get(Stat::MpMax);
                attacker.stats.mp = (attacker.stats.mp + amt).min(max);
                let pos = attacker.stats.pos;
                self.combat_text
                    .add_string(&format!("+{} MP", amt), pos, CombatTextKind::Buff);
            }
        }
    }

    /// Death, poise, on-hit/on-debuff powers, and the hit interrupt.
    fn hit_reactions(&mut self, defender: EntityId, haz_index: usize, crit: bool, was_debuffed: bool) {
        let source_type = self.hazards.hazards[haz_index].source_type;

        let died = {
            let Some(entity) = self.entities.get_mut(defender) else {
                return;
            };
            entity.stats.hp <= 0
        };

        if died {
            let (is_hero, pos, is_ally) = {
                let Some(entity) = self.entities.get_mut(defender) else {
                    return;
                };
                entity.stats.effects.triggered_death = true;
                (
                    entity.stats.is_hero(),
                    entity.stats.pos,
                    entity.stats.is_hero_ally(),
                )
            };
            if is_hero {
                if let Some(entity) = self.entities.get_mut(defender) {
                    entity.stats.cur_state = EntityState::Dead;
                }
            } else {
                self.give_rewards(defender, source_type);
                if let Some(entity) = self.entities.get_mut(defender) {
                    entity.stats.cur_state = if crit {
                        EntityState::CritDead
                    } else {
                        EntityState::Dead
                    };
                }
                self.collision.unblock(pos.x, pos.y);
                let _ = is_ally;
            }
            return;
        }

        let poised = {
            let poise = self
                .entities
                .get(defender)
                .map(|e| e.stats.get(Stat::Poise))
                .unwrap_or(0);
            self.rng.percent_chance(poise)
        };

        // hit sound respects the per-entity hit cooldown
        let cooldown_hit_end = self
            .entities
            .get(defender)
            .map(|e| e.stats.cooldown_hit.is_end())
            .unwrap_or(false);
        if cooldown_hit_end {
            if let Some(entity) = self.entities.get_mut(defender) {
                entity.play_sound(EntitySoundKind::Hit, self.mixer.as_mut());
            }
        }

        // a fresh debuff can trigger the on-debuff power, ignoring the
        // global cooldown
        let now_debuffed = self
            .entities
            .get(defender)
            .map(|e| e.stats.effects.is_debuffed())
            .unwrap_or(false);
        if !was_debuffed && now_debuffed {
            if self.arm_reaction_power(defender, AiPowerKind::Debuff) {
                return;
            }
        }

        if self.arm_reaction_power(defender, AiPowerKind::Hit) {
            return;
        }

        if cooldown_hit_end {
            let Some(entity) = self.entities.get_mut(defender) else {
                return;
            };
            entity.stats.cooldown_hit.reset(TimerReset::Begin);

            let stunned = entity.stats.effects.stun;
            let prevent = entity.stats.prevent_interrupt;
            // critical hits punch through poise
            if !stunned && (!poised || crit) && !prevent {
                if entity.stats.cur_state == EntityState::Power {
                    entity.stats.cooldown.reset(TimerReset::Begin);
                    entity.stats.activated_power = None;
                }
                entity.stats.cur_state = EntityState::Hit;

                if entity.stats.untransform_on_hit {
                    entity.stats.transform_duration = 0;
                }
            }
        }
    }

    /// Install an AI reaction power (on-hit / on-debuff), bypassing the
    /// global cooldown. Returns true when a slot fired.
    fn arm_reaction_power(&mut self, defender: EntityId, kind: AiPowerKind) -> bool {
        let slot = {
            let Some(entity) = self.entities.get(defender) else {
                return false;
            };
            if entity.stats.flags.contains(EntityFlags::HERO) {
                return false;
            }
            entity.stats.get_ai_power(kind, &mut self.rng)
        };
        let Some(slot) = slot else {
            return false;
        };
        if let Some(entity) = self.entities.get_mut(defender) {
            entity.stats.cur_state = EntityState::Power;
            entity.stats.activated_power = Some(slot);
            entity.stats.cooldown.reset(TimerReset::End);
            return true;
        }
        false
    }

    /// XP to the killer's party and a loot drop for the fallen.
    pub fn give_rewards(&mut self, defender: EntityId, source_type: SourceType) {
        let (xp_reward, defeat_status) = {
            let Some(entity) = self.entities.get(defender) else {
                return;
            };
            (
                entity.stats.xp_reward,
                entity.stats.defeat_status.clone(),
            )
        };

        if !defeat_status.is_empty() {
            self.campaign.set_status(&defeat_status);
        }

        // hero kills award full XP; ally kills award the party share
        if matches!(source_type, SourceType::Hero | SourceType::Ally) && xp_reward > 0 {
            let amount = if source_type == SourceType::Ally {
                (xp_reward * self.settings.misc.party_exp_percentage.max(0) as u64) / 100
            } else {
                xp_reward
            };
            self.reward_xp(amount, true);
        }

        self.loot.enqueue_entity_drop(defender);
    }

}

/// Convenience for building directly-aimed hazards (event powers, tests).
pub fn aimed_hazard(
    power_index: usize,
    src: EntityId,
    from: FPoint,
    to: FPoint,
    speed: f32,
    lifespan: u32,
    radius: f32,
) -> Hazard {
    let mut haz = Hazard::new(power_index, src);
    haz.pos = from;
    haz.base_speed = speed;
    haz.base_lifespan = lifespan;
    haz.lifespan = lifespan;
    haz.radius = radius;
    haz.set_angle(emberfall_core::geometry::calc_theta(from.x, from.y, to.x, to.y));
    haz
}
