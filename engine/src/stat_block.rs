//! Per-entity mutable state: the stat vector, AI tuning, state machine
//! bookkeeping, effect set, summon links, and the per-tick upkeep that
//! keeps them consistent.

use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};
use bitflags::bitflags;

use emberfall_core::file_parser::FileParser;
use emberfall_core::geometry::{
    calc_theta, FPoint, Point, Rect, DIRECTION_DELTA_X, DIRECTION_DELTA_Y, SPEED_MULTIPLIER,
};
use emberfall_core::message::{CombatTextKind, CombatTextQueue};
use emberfall_core::parse;
use emberfall_core::rng::GameRng;
use emberfall_core::settings::EngineSettings;
use emberfall_core::stats::{Stat, STAT_COUNT};
use emberfall_core::timer::{Timer, TimerReset};

use crate::collision::{CollideType, CollisionGrid, MovementType};
use crate::effects::EffectSet;
use crate::ids::{EntityId, PowerId};

bitflags! {
    /// Identity and allegiance bits. These are set at spawn and stay
    /// fixed for the entity's lifetime; mutable state lives in fields.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct EntityFlags: u32 {
        const HERO         = 1 << 0;
        const HERO_ALLY    = 1 << 1;
        const ENEMY_ALLY   = 1 << 2;
        const HUMANOID     = 1 << 3;
        const LIFEFORM     = 1 << 4;
        const SUMMONED     = 1 << 5;
        const PERMADEATH   = 1 << 6;
        const NPC          = 1 << 7;
        const SUPPRESS_HP  = 1 << 8;
        /// Stat blocks that exist only to fire event powers. They are
        /// skipped by AI, hazards, and the render walk.
        const EVENT_SOURCE = 1 << 9;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EntityState {
    #[default]
    Stance,
    Move,
    Power,
    Spawn,
    Block,
    Hit,
    Dead,
    CritDead,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CombatStyle {
    #[default]
    Default,
    Aggressive,
    Passive,
}

/// Slot categories for AI-selected powers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AiPowerKind {
    Melee,
    Ranged,
    Beacon,
    Hit,
    Death,
    HalfDead,
    JoinCombat,
    Debuff,
    PassivePost,
}

impl AiPowerKind {
    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "melee" => AiPowerKind::Melee,
            "ranged" => AiPowerKind::Ranged,
            "beacon" => AiPowerKind::Beacon,
            "on_hit" => AiPowerKind::Hit,
            "on_death" => AiPowerKind::Death,
            "on_half_dead" => AiPowerKind::HalfDead,
            "on_join_combat" => AiPowerKind::JoinCombat,
            "on_debuff" => AiPowerKind::Debuff,
            "passive_post" => AiPowerKind::PassivePost,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug)]
pub struct AiPower {
    pub kind: AiPowerKind,
    pub id: PowerId,
    pub chance: i32,
    pub cooldown: Timer,
}

/// How an enemy group or summon resolves its spawn level.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum SpawnLevelMode {
    #[default]
    Default,
    Fixed,
    /// count per `ratio` levels of the summoner.
    Level,
    /// count per `ratio` points of the named primary stat.
    Stat,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SpawnLevel {
    pub mode: SpawnLevelMode,
    pub count: f32,
    pub ratio: f32,
    pub stat: usize,
}

/// One entry in a creature's drop table. `chance == 0` marks a fixed
/// drop; anything else competes in the weighted roll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LootEntry {
    pub item: usize,
    pub chance: i32,
    pub quantity_min: i32,
    pub quantity_max: i32,
}

#[derive(Clone)]
pub struct StatBlock {
    pub flags: EntityFlags,
    pub name: String,
    pub categories: Vec<String>,
    pub type_filename: String,

    pub alive: bool,
    pub corpse: bool,
    pub corpse_timer: Timer,
    pub encountered: bool,
    pub converted: bool,

    pub level: i32,
    pub xp: u64,
    /// XP awarded to the killer (creatures only).
    pub xp_reward: u64,
    pub level_up: bool,
    pub stat_points_per_level: i32,
    pub power_points_per_level: i32,

    // stat vector: engine stats + damage-type min/max pairs
    pub starting: Vec<i32>,
    pub base: Vec<i32>,
    pub current: Vec<i32>,
    pub per_level: Vec<i32>,
    pub per_primary: Vec<Vec<i32>>,

    pub primary: Vec<i32>,
    pub primary_additional: Vec<i32>,

    pub vulnerable: Vec<i32>,
    pub vulnerable_base: Vec<i32>,

    pub hp: i32,
    pub mp: i32,
    hp_ticker: i32,
    mp_ticker: i32,

    pub speed_default: f32,
    pub speed: f32,
    pub charge_speed: f32,

    pub movement_type: MovementType,
    pub flying: bool,
    pub intangible: bool,
    pub facing: bool,

    pub pos: FPoint,
    pub direction: u8,
    pub knockback_srcpos: FPoint,
    pub knockback_destpos: FPoint,

    pub cur_state: EntityState,
    pub state_timer: Timer,
    pub hold_state: bool,
    pub prevent_interrupt: bool,

    pub cooldown: Timer,
    pub cooldown_hit: Timer,
    pub cooldown_hit_enabled: bool,

    pub effects: EffectSet,
    pub equip_flags: Vec<String>,

    pub powers_list: Vec<PowerId>,
    pub powers_list_items: Vec<PowerId>,
    pub powers_passive: Vec<PowerId>,
    pub powers_ai: Vec<AiPower>,
    pub power_filter: Vec<PowerId>,
    pub activated_power: Option<usize>,
    pub half_dead_power: bool,

    pub melee_range: f32,
    pub threat_range: f32,
    pub threat_range_far: f32,
    pub flee_range: f32,
    pub combat_style: CombatStyle,
    pub chance_pursue: i32,
    pub chance_flee: i32,
    pub turn_delay: u32,
    pub in_combat: bool,
    pub join_combat: bool,
    pub flee_timer: Timer,
    pub flee_cooldown_timer: Timer,
    pub perfect_accuracy: bool,

    pub waypoints: VecDeque<FPoint>,
    pub waypoint_timer: Timer,
    pub wander: bool,
    pub wander_area: Rect,

    pub transformed: bool,
    pub transform_type: String,
    pub transform_duration: i32,
    pub transform_duration_total: i32,
    pub manual_untransform: bool,
    pub transform_with_equipment: bool,
    pub untransform_on_hit: bool,

    pub teleportation: bool,
    pub teleport_destination: FPoint,

    pub summons: Vec<EntityId>,
    pub summoner: Option<EntityId>,
    pub summoned_power_index: PowerId,
    pub party_buffs: VecDeque<PowerId>,

    pub loot_table: Vec<LootEntry>,
    pub loot_count: Point,
    pub quest_loot_id: usize,
    pub quest_loot_requires_status: String,
    pub quest_loot_requires_not_status: String,
    pub defeat_status: String,
    pub convert_status: String,
    pub invincible_requires_status: Vec<String>,
    pub invincible_requires_not_status: Vec<String>,

    pub animations: String,
    pub sfx_attack: Vec<(String, Vec<String>)>,
    pub sfx_hit: Vec<String>,
    pub sfx_die: Vec<String>,
    pub sfx_critdie: Vec<String>,
    pub sfx_block: Vec<String>,
    pub sfx_step: String,
    pub sfx_levelup: String,
    pub sfx_lowhp: String,

    pub refresh_stats: bool,

    prev_maxhp: i32,
    prev_maxmp: i32,
    pres_hp: i32,
    pres_mp: i32,
}

/// Borrowed surroundings for [`StatBlock::logic`].
pub struct StatTickCtx<'a> {
    pub settings: &'a EngineSettings,
    pub collision: &'a mut CollisionGrid,
    pub combat_text: &'a mut CombatTextQueue,
}

impl StatBlock {
    pub fn new(settings: &EngineSettings) -> Self {
        let layout = settings.layout();
        let len = layout.vector_len();
        Self {
            flags: EntityFlags::empty(),
            name: String::new(),
            categories: Vec::new(),
            type_filename: String::new(),
            alive: true,
            corpse: false,
            corpse_timer: Timer::new(0),
            encountered: false,
            converted: false,
            level: 1,
            xp: 0,
            xp_reward: 0,
            level_up: false,
            stat_points_per_level: 1,
            power_points_per_level: 1,
            starting: vec![0; len],
            base: vec![0; len],
            current: vec![0; len],
            per_level: vec![0; len],
            per_primary: vec![vec![0; len]; layout.primary_count],
            primary: vec![1; layout.primary_count],
            primary_additional: vec![0; layout.primary_count],
            vulnerable: vec![100; layout.element_count],
            vulnerable_base: vec![100; layout.element_count],
            hp: 0,
            mp: 0,
            hp_ticker: 0,
            mp_ticker: 0,
            speed_default: 0.1,
            speed: 0.1,
            charge_speed: 0.0,
            movement_type: MovementType::Normal,
            flying: false,
            intangible: false,
            facing: true,
            pos: FPoint::default(),
            direction: 0,
            knockback_srcpos: FPoint::default(),
            knockback_destpos: FPoint::default(),
            cur_state: EntityState::Stance,
            state_timer: Timer::new(0),
            hold_state: false,
            prevent_interrupt: false,
            cooldown: Timer::new(0),
            cooldown_hit: Timer::new(0),
            cooldown_hit_enabled: false,
            effects: EffectSet::new(layout),
            equip_flags: Vec::new(),
            powers_list: Vec::new(),
            powers_list_items: Vec::new(),
            powers_passive: Vec::new(),
            powers_ai: Vec::new(),
            power_filter: Vec::new(),
            activated_power: None,
            half_dead_power: false,
            melee_range: 1.0,
            threat_range: 4.0,
            threat_range_far: 8.0,
            flee_range: 2.0,
            combat_style: CombatStyle::Default,
            chance_pursue: 100,
            chance_flee: 0,
            turn_delay: 0,
            in_combat: false,
            join_combat: false,
            flee_timer: Timer::new(0),
            flee_cooldown_timer: Timer::new(0),
            perfect_accuracy: false,
            waypoints: VecDeque::new(),
            waypoint_timer: Timer::new(0),
            wander: false,
            wander_area: Rect::default(),
            transformed: false,
            transform_type: String::new(),
            transform_duration: 0,
            transform_duration_total: 0,
            manual_untransform: false,
            transform_with_equipment: false,
            untransform_on_hit: false,
            teleportation: false,
            teleport_destination: FPoint::default(),
            summons: Vec::new(),
            summoner: None,
            summoned_power_index: 0,
            party_buffs: VecDeque::new(),
            loot_table: Vec::new(),
            loot_count: Point::default(),
            quest_loot_id: 0,
            quest_loot_requires_status: String::new(),
            quest_loot_requires_not_status: String::new(),
            defeat_status: String::new(),
            convert_status: String::new(),
            invincible_requires_status: Vec::new(),
            invincible_requires_not_status: Vec::new(),
            animations: String::new(),
            sfx_attack: Vec::new(),
            sfx_hit: Vec::new(),
            sfx_die: Vec::new(),
            sfx_critdie: Vec::new(),
            sfx_block: Vec::new(),
            sfx_step: String::new(),
            sfx_levelup: String::new(),
            sfx_lowhp: String::new(),
            refresh_stats: true,
            prev_maxhp: 0,
            prev_maxmp: 0,
            pres_hp: 0,
            pres_mp: 0,
        }
    }

    pub fn is_hero(&self) -> bool {
        self.flags.contains(EntityFlags::HERO)
    }

    pub fn is_hero_ally(&self) -> bool {
        self.flags.contains(EntityFlags::HERO_ALLY)
    }

    pub fn is_enemy_ally(&self) -> bool {
        self.flags.contains(EntityFlags::ENEMY_ALLY)
    }

    pub fn get(&self, stat: Stat) -> i32 {
        self.current[stat as usize]
    }

    pub fn damage_min(&self, damage_type: usize) -> i32 {
        self.current[STAT_COUNT + damage_type * 2]
    }

    pub fn damage_max(&self, damage_type: usize) -> i32 {
        self.current[STAT_COUNT + damage_type * 2 + 1]
    }

    pub fn get_primary(&self, index: usize) -> i32 {
        self.primary[index] + self.primary_additional[index]
    }

    /// Route damage through shields, then HP; HP never goes negative.
    pub fn take_damage(&mut self, dmg: i32) {
        self.hp -= self.effects.damage_shields(dmg);
        if self.hp <= 0 {
            self.hp = 0;
        }
    }

    /// Recompute level from the XP table, re-apply effects, and refill.
    pub fn recalc(&mut self, settings: &EngineSettings) {
        self.refresh_stats = true;

        let table = &settings.xp_table;
        self.level = 0;
        for (i, threshold) in table.iter().enumerate() {
            if self.xp >= *threshold {
                self.level = i as i32 + 1;
            }
        }
        if let Some(last) = table.last() {
            if self.xp >= *last {
                self.xp = *last;
            }
        }

        self.apply_effects(settings);
        self.hp = self.get(Stat::HpMax);
        self.mp = self.get(Stat::MpMax);
    }

    /// Base stats from starting values, level gains, and primary gains.
    fn calc_base(&mut self, settings: &EngineSettings) {
        let lev0 = (self.level - 1).max(0);

        for i in 0..self.base.len() {
            self.base[i] = self.starting[i] + lev0 * self.per_level[i];
        }
        for (p, table) in self.per_primary.iter().enumerate() {
            let p0 = (self.get_primary(p) - 1).max(0);
            for i in 0..self.base.len() {
                self.base[i] += p0 * table[i];
            }
        }

        // damage and absorb floors: max never sinks below min
        for dt in 0..settings.damage_types.len() {
            let min_i = STAT_COUNT + dt * 2;
            let max_i = min_i + 1;
            self.base[min_i] = self.base[min_i].max(0);
            self.base[max_i] = self.base[max_i].max(self.base[min_i]);
        }
        let abs_min = Stat::AbsorbMin as usize;
        let abs_max = Stat::AbsorbMax as usize;
        self.base[abs_min] = self.base[abs_min].max(0);
        self.base[abs_max] = self.base[abs_max].max(self.base[abs_min]);
    }

    /// Derived stats from base values plus effect bonuses.
    pub fn apply_effects(&mut self, settings: &EngineSettings) {
        self.prev_maxhp = self.get(Stat::HpMax);
        self.prev_maxmp = self.get(Stat::MpMax);
        self.pres_hp = self.hp;
        self.pres_mp = self.mp;

        for (i, bonus) in self.effects.bonus_primary.iter().enumerate() {
            self.primary_additional[i] = *bonus;
        }

        self.calc_base(settings);

        for i in 0..self.current.len() {
            self.current[i] = self.base[i] + self.effects.bonus[i];
        }
        for i in 0..self.vulnerable.len() {
            self.vulnerable[i] = self.vulnerable_base[i] - self.effects.bonus_resist[i];
        }

        let hp_pct = self.get(Stat::HpPercent);
        let mp_pct = self.get(Stat::MpPercent);
        self.current[Stat::HpMax as usize] += (self.get(Stat::HpMax) * hp_pct) / 100;
        self.current[Stat::MpMax as usize] += (self.get(Stat::MpMax) * mp_pct) / 100;

        self.hp = self.hp.min(self.get(Stat::HpMax));
        self.mp = self.mp.min(self.get(Stat::MpMax));

        self.speed = self.speed_default;
    }

    /// Per-tick upkeep: effect timers, regen, cooldowns, bleed/heal
    /// application, knockback and charge movement.
    pub fn logic(&mut self, ctx: &mut StatTickCtx) {
        self.alive = !(self.hp <= 0 && !self.effects.triggered_death && !self.effects.revive);

        let fps = ctx.settings.misc.max_frames_per_sec;
        self.effects.logic(fps);
        self.apply_effects(ctx.settings);

        // keep the HP/MP ratio stable when the max changes under us
        if self.prev_maxhp != self.get(Stat::HpMax) && self.prev_maxhp > 0 {
            let ratio = self.pres_hp as f32 / self.prev_maxhp as f32;
            self.hp = (ratio * self.get(Stat::HpMax) as f32) as i32;
        }
        if self.prev_maxmp != self.get(Stat::MpMax) && self.prev_maxmp > 0 {
            let ratio = self.pres_mp as f32 / self.prev_maxmp as f32;
            self.mp = (ratio * self.get(Stat::MpMax) as f32) as i32;
        }

        self.cooldown.tick();
        for slot in &mut self.powers_ai {
            slot.cooldown.tick();
        }

        // regen: N points per minute
        let hp_regen = self.get(Stat::HpRegen);
        if hp_regen > 0 && self.hp < self.get(Stat::HpMax) && self.hp > 0 {
            self.hp_ticker += 1;
            if self.hp_ticker >= (60 * fps as i32) / hp_regen {
                self.hp += 1;
                self.hp_ticker = 0;
            }
        }
        let mp_regen = self.get(Stat::MpRegen);
        if mp_regen > 0 && self.mp < self.get(Stat::MpMax) && self.hp > 0 {
            self.mp_ticker += 1;
            if self.mp_ticker >= (60 * fps as i32) / mp_regen {
                self.mp += 1;
                self.mp_ticker = 0;
            }
        }

        if self.transform_duration > 0 {
            self.transform_duration -= 1;
        }

        // damage over time
        if self.effects.damage > 0 && self.hp > 0 {
            let dmg = self.effects.damage;
            self.take_damage(dmg);
            ctx.combat_text
                .add_int(dmg, self.pos, CombatTextKind::TakeDamage);
        }
        if self.effects.damage_percent > 0 && self.hp > 0 {
            let dmg = (self.get(Stat::HpMax) * self.effects.damage_percent) / 100;
            self.take_damage(dmg);
            ctx.combat_text
                .add_int(dmg, self.pos, CombatTextKind::TakeDamage);
        }

        if self.effects.death_sentence {
            self.hp = 0;
        }

        self.cooldown_hit.tick();

        if self.effects.stun {
            // stun stops charge attacks and held states
            self.state_timer.reset(TimerReset::End);
            self.charge_speed = 0.0;
        } else {
            self.state_timer.tick();
        }

        // healing over time
        if self.effects.hpot > 0 {
            let heal = self.effects.hpot;
            ctx.combat_text
                .add_string(&format!("+{} HP", heal), self.pos, CombatTextKind::Buff);
            self.hp = (self.hp + heal).min(self.get(Stat::HpMax));
        }
        if self.effects.hpot_percent > 0 {
            let heal = (self.get(Stat::HpMax) * self.effects.hpot_percent) / 100;
            ctx.combat_text
                .add_string(&format!("+{} HP", heal), self.pos, CombatTextKind::Buff);
            self.hp = (self.hp + heal).min(self.get(Stat::HpMax));
        }
        if self.effects.mpot > 0 {
            let heal = self.effects.mpot;
            ctx.combat_text
                .add_string(&format!("+{} MP", heal), self.pos, CombatTextKind::Buff);
            self.mp = (self.mp + heal).min(self.get(Stat::MpMax));
        }
        if self.effects.mpot_percent > 0 {
            let heal = (self.get(Stat::MpMax) * self.effects.mpot_percent) / 100;
            ctx.combat_text
                .add_string(&format!("+{} MP", heal), self.pos, CombatTextKind::Buff);
            self.mp = (self.mp + heal).min(self.get(Stat::MpMax));
        }

        // some creatures shift between movement classes at runtime
        self.movement_type = if self.intangible {
            MovementType::Intangible
        } else if self.flying {
            MovementType::Flying
        } else {
            MovementType::Normal
        };

        if self.effects.knockback_speed != 0.0 {
            let theta = calc_theta(
                self.knockback_srcpos.x,
                self.knockback_srcpos.y,
                self.knockback_destpos.x,
                self.knockback_destpos.y,
            );
            let kx = self.effects.knockback_speed * theta.cos();
            let ky = self.effects.knockback_speed * theta.sin();

            ctx.collision.unblock(self.pos.x, self.pos.y);
            ctx.collision.try_move(
                &mut self.pos.x,
                &mut self.pos.y,
                kx,
                ky,
                self.movement_type,
                CollideType::Normal,
            );
            ctx.collision
                .block(self.pos.x, self.pos.y, self.is_hero_ally());
        } else if self.charge_speed != 0.0 {
            let dir = (self.direction % 8) as usize;
            let speed = self.charge_speed * SPEED_MULTIPLIER[dir];
            let dx = speed * DIRECTION_DELTA_X[dir] as f32;
            let dy = speed * DIRECTION_DELTA_Y[dir] as f32;

            ctx.collision.unblock(self.pos.x, self.pos.y);
            ctx.collision.try_move(
                &mut self.pos.x,
                &mut self.pos.y,
                dx,
                dy,
                self.movement_type,
                CollideType::Normal,
            );
            ctx.collision
                .block(self.pos.x, self.pos.y, self.is_hero_ally());
        }
    }

    /// Pick an off-cooldown AI power slot of the given kind. One chance
    /// roll covers the whole selection; ties pick uniformly. Returns an
    /// index into `powers_ai`.
    pub fn get_ai_power(&self, kind: AiPowerKind, rng: &mut GameRng) -> Option<usize> {
        let roll = rng.rand_between(0, 99);
        let candidates: Vec<usize> = self
            .powers_ai
            .iter()
            .enumerate()
            .filter(|(_, p)| p.kind == kind && roll < p.chance && p.cooldown.is_end())
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            None
        } else {
            Some(candidates[rng.rand_index(candidates.len())])
        }
    }

    /// Set the cooldown on every AI slot sharing the given power id.
    pub fn set_power_cooldown(&mut self, power_id: PowerId, cooldown: u32) {
        for slot in &mut self.powers_ai {
            if slot.id == power_id {
                slot.cooldown.restart_with(cooldown);
            }
        }
    }

    pub fn power_cooldown(&self, power_id: PowerId) -> u32 {
        self.powers_ai
            .iter()
            .find(|s| s.id == power_id)
            .map(|s| s.cooldown.current())
            .unwrap_or(0)
    }

    pub fn add_xp(&mut self, amount: u64) {
        self.xp += amount;
    }

    pub fn set_wander_area(&mut self, radius: i32) {
        self.wander_area.x = self.pos.x.floor() as i32 - radius;
        self.wander_area.y = self.pos.y.floor() as i32 - radius;
        self.wander_area.w = radius * 2 + 1;
        self.wander_area.h = radius * 2 + 1;
    }

    pub fn has_equip_flags(&self, required: &[String]) -> bool {
        required.iter().all(|f| self.equip_flags.contains(f))
    }

    /// Load a creature definition file into a fresh stat block.
    pub fn load(path: &Path, settings: &EngineSettings) -> Result<StatBlock> {
        let mut infile = FileParser::open(path)
            .with_context(|| format!("StatBlock: cannot load '{}'", path.display()))?;
        let mut stats = StatBlock::new(settings);
        stats.type_filename = path.to_string_lossy().to_string();
        let fps = settings.misc.max_frames_per_sec;

        while infile.next() {
            if stats.parse_core_stat(&infile.key, &infile.val, settings) {
                continue;
            }
            if stats.parse_sfx_stat(&infile.key, &infile.val) {
                continue;
            }
            match infile.key.as_str() {
                "name" => stats.name = infile.val.clone(),
                "categories" => {
                    let mut val = infile.val.clone();
                    loop {
                        let s = parse::pop_first_string(&mut val);
                        if s.is_empty() {
                            break;
                        }
                        stats.categories.push(s);
                    }
                }
                "level" => stats.level = parse::to_int(&infile.val, 1),
                "xp" => stats.xp_reward = parse::to_int(&infile.val, 0).max(0) as u64,
                "speed" => {
                    // authored in tiles per second
                    stats.speed_default = parse::to_float(&infile.val, 3.5) / fps as f32;
                    stats.speed = stats.speed_default;
                }
                "flying" => stats.flying = parse::to_bool(&infile.val),
                "intangible" => stats.intangible = parse::to_bool(&infile.val),
                "facing" => stats.facing = parse::to_bool(&infile.val),
                "humanoid" => stats.flags.set(EntityFlags::HUMANOID, parse::to_bool(&infile.val)),
                "lifeform" => stats.flags.set(EntityFlags::LIFEFORM, parse::to_bool(&infile.val)),
                "melee_range" => stats.melee_range = parse::to_float(&infile.val, 1.0),
                "threat_range" => {
                    let mut val = infile.val.clone();
                    stats.threat_range = parse::pop_first_float(&mut val);
                    stats.threat_range_far = if val.is_empty() {
                        stats.threat_range * 2.0
                    } else {
                        parse::pop_first_float(&mut val).max(stats.threat_range)
                    };
                }
                "flee_range" => stats.flee_range = parse::to_float(&infile.val, 2.0),
                "combat_style" => {
                    stats.combat_style = match infile.val.as_str() {
                        "aggressive" => CombatStyle::Aggressive,
                        "passive" => CombatStyle::Passive,
                        "default" => CombatStyle::Default,
                        _ => {
                            infile.error("StatBlock: unknown combat style");
                            CombatStyle::Default
                        }
                    }
                }
                "chance_pursue" => stats.chance_pursue = parse::to_int(&infile.val, 100),
                "chance_flee" => stats.chance_flee = parse::to_int(&infile.val, 0),
                "cooldown" => stats
                    .cooldown
                    .set_duration(parse::to_duration(&infile.val, fps)),
                "cooldown_hit" => {
                    stats
                        .cooldown_hit
                        .set_duration(parse::to_duration(&infile.val, fps));
                    stats.cooldown_hit_enabled = true;
                }
                "turn_delay" => stats.turn_delay = parse::to_duration(&infile.val, fps),
                "waypoint_pause" => stats
                    .waypoint_timer
                    .set_duration(parse::to_duration(&infile.val, fps)),
                "flee_duration" => stats
                    .flee_timer
                    .set_duration(parse::to_duration(&infile.val, fps)),
                "flee_cooldown" => stats
                    .flee_cooldown_timer
                    .set_duration(parse::to_duration(&infile.val, fps)),
                "power" => {
                    // power=<slot type>,<power id>,<chance>
                    let mut val = infile.val.clone();
                    let kind_key = parse::pop_first_string(&mut val);
                    let id = parse::pop_first_int(&mut val).max(0) as usize;
                    let chance = if val.is_empty() {
                        100
                    } else {
                        parse::pop_first_int(&mut val)
                    };
                    match AiPowerKind::from_key(&kind_key) {
                        Some(kind) => {
                            if kind == AiPowerKind::HalfDead {
                                stats.half_dead_power = true;
                            }
                            stats.powers_ai.push(AiPower {
                                kind,
                                id,
                                chance,
                                cooldown: Timer::new(0),
                            });
                        }
                        None => infile.error("StatBlock: unknown AI power slot type"),
                    }
                }
                "passive_powers" => {
                    let mut val = infile.val.clone();
                    loop {
                        let s = parse::pop_first_string(&mut val);
                        if s.is_empty() {
                            break;
                        }
                        stats.powers_passive.push(parse::to_int(&s, 0).max(0) as usize);
                    }
                }
                "power_filter" => {
                    let mut val = infile.val.clone();
                    loop {
                        let s = parse::pop_first_string(&mut val);
                        if s.is_empty() {
                            break;
                        }
                        stats.power_filter.push(parse::to_int(&s, 0).max(0) as usize);
                    }
                }
                "loot" => {
                    // loot=<item id>,<chance>,<min>,<max>
                    let mut val = infile.val.clone();
                    let item = parse::pop_first_int(&mut val).max(0) as usize;
                    let chance_str = parse::pop_first_string(&mut val);
                    let chance = if chance_str == "fixed" {
                        0
                    } else {
                        parse::to_int(&chance_str, 100)
                    };
                    let qmin = if val.is_empty() { 1 } else { parse::pop_first_int(&mut val).max(1) };
                    let qmax = if val.is_empty() { qmin } else { parse::pop_first_int(&mut val).max(qmin) };
                    stats.loot_table.push(LootEntry {
                        item,
                        chance,
                        quantity_min: qmin,
                        quantity_max: qmax,
                    });
                }
                "loot_count" => {
                    let mut val = infile.val.clone();
                    let (min, max) = parse::to_range(&mut val);
                    stats.loot_count = Point::new(min, max);
                }
                "defeat_status" => stats.defeat_status = infile.val.clone(),
                "convert_status" => stats.convert_status = infile.val.clone(),
                "quest_loot" => {
                    // quest_loot=<requires status>,<requires not status>,<item id>
                    let mut val = infile.val.clone();
                    stats.quest_loot_requires_status = parse::pop_first_string(&mut val);
                    stats.quest_loot_requires_not_status = parse::pop_first_string(&mut val);
                    stats.quest_loot_id = parse::pop_first_int(&mut val).max(0) as usize;
                }
                "animations" => stats.animations = infile.val.clone(),
                "suppress_hp" => stats
                    .flags
                    .set(EntityFlags::SUPPRESS_HP, parse::to_bool(&infile.val)),
                "stat_points_per_level" => {
                    stats.stat_points_per_level = parse::to_int(&infile.val, 1)
                }
                "power_points_per_level" => {
                    stats.power_points_per_level = parse::to_int(&infile.val, 1)
                }
                _ => infile.error("StatBlock: unknown key"),
            }
        }

        let starting = stats.starting.clone();
        stats.base = starting.clone();
        stats.current = starting;
        stats.hp = stats.get(Stat::HpMax);
        stats.mp = stats.get(Stat::MpMax);

        Ok(stats)
    }

    /// Stat-vector keys: engine stats, damage pairs, per-level and
    /// per-primary gain tables, vulnerabilities, primaries.
    fn parse_core_stat(&mut self, key: &str, val: &str, settings: &EngineSettings) -> bool {
        let value = parse::to_int(val, 0);

        if let Some(stat) = Stat::from_key(key) {
            self.starting[stat as usize] = value;
            return true;
        }
        for (i, dt) in settings.damage_types.iter().enumerate() {
            if key == dt.min_key {
                self.starting[STAT_COUNT + i * 2] = value;
                return true;
            }
            if key == dt.max_key {
                self.starting[STAT_COUNT + i * 2 + 1] = value;
                return true;
            }
        }
        if let Some(stripped) = key.strip_suffix("_per_level") {
            if let Some(stat) = Stat::from_key(stripped) {
                self.per_level[stat as usize] = value;
                return true;
            }
        }
        for (p, ps) in settings.primary_stats.iter().enumerate() {
            if let Some(stripped) = key.strip_suffix(&format!("_per_{}", ps.id)) {
                if let Some(stat) = Stat::from_key(stripped) {
                    self.per_primary[p][stat as usize] = value;
                    return true;
                }
            }
            if key == ps.id {
                self.primary[p] = value.max(1);
                return true;
            }
        }
        if let Some(stripped) = key.strip_suffix("_resist") {
            if let Some(i) = settings.element_index(stripped) {
                // stored as vulnerability: 100 - resist
                self.vulnerable_base[i] = 100 - value;
                self.vulnerable[i] = self.vulnerable_base[i];
                return true;
            }
        }
        false
    }

    fn parse_sfx_stat(&mut self, key: &str, val: &str) -> bool {
        match key {
            "sfx_attack" => {
                // sfx_attack=<animation>,<file>[,<file>...]
                let mut v = val.to_string();
                let anim = parse::pop_first_string(&mut v);
                let mut files = Vec::new();
                loop {
                    let f = parse::pop_first_string(&mut v);
                    if f.is_empty() {
                        break;
                    }
                    files.push(f);
                }
                if let Some(entry) = self.sfx_attack.iter_mut().find(|(a, _)| *a == anim) {
                    entry.1.extend(files);
                } else {
                    self.sfx_attack.push((anim, files));
                }
                true
            }
            "sfx_hit" => {
                self.sfx_hit.push(val.to_string());
                true
            }
            "sfx_die" => {
                self.sfx_die.push(val.to_string());
                true
            }
            "sfx_critdie" => {
                self.sfx_critdie.push(val.to_string());
                true
            }
            "sfx_block" => {
                self.sfx_block.push(val.to_string());
                true
            }
            "sfx_step" => {
                self.sfx_step = val.to_string();
                true
            }
            "sfx_levelup" => {
                self.sfx_levelup = val.to_string();
                true
            }
            "sfx_lowhp" => {
                self.sfx_lowhp = val.to_string();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberfall_core::settings::{ElementDef, PrimaryStatDef};

    fn settings() -> EngineSettings {
        let mut s = EngineSettings::default();
        s.elements.push(ElementDef {
            id: "fire".into(),
            name: "Fire".into(),
        });
        s.primary_stats.push(PrimaryStatDef {
            id: "physical".into(),
            name: "Physical".into(),
        });
        s.xp_table = vec![0, 100, 300];
        s
    }

    fn block(settings: &EngineSettings) -> StatBlock {
        let mut sb = StatBlock::new(settings);
        sb.starting[Stat::HpMax as usize] = 100;
        sb.starting[Stat::MpMax as usize] = 20;
        sb.recalc(settings);
        sb
    }

    fn ctx_parts() -> (CollisionGrid, CombatTextQueue) {
        (CollisionGrid::new(8, 8), CombatTextQueue::default())
    }

    #[test]
    fn hp_clamps_at_zero_through_shields() {
        let s = settings();
        let mut sb = block(&s);
        sb.take_damage(40);
        assert_eq!(sb.hp, 60);
        sb.take_damage(500);
        assert_eq!(sb.hp, 0);
    }

    #[test]
    fn level_follows_xp_table() {
        let s = settings();
        let mut sb = block(&s);
        sb.xp = 150;
        sb.recalc(&s);
        assert_eq!(sb.level, 2);
        sb.xp = 10_000;
        sb.recalc(&s);
        assert_eq!(sb.level, 3);
        // xp is capped at the table's last entry
        assert_eq!(sb.xp, 300);
    }

    #[test]
    fn per_level_gains_apply() {
        let s = settings();
        let mut sb = StatBlock::new(&s);
        sb.starting[Stat::HpMax as usize] = 50;
        sb.per_level[Stat::HpMax as usize] = 10;
        sb.xp = 100; // level 2
        sb.recalc(&s);
        assert_eq!(sb.get(Stat::HpMax), 60);
        assert_eq!(sb.hp, 60);
    }

    #[test]
    fn hp_ratio_preserved_when_max_changes() {
        let s = settings();
        let mut sb = block(&s);
        sb.hp = 50; // half

        use crate::effects::{AddEffectParams, EffectDef, EffectKind, SourceType};
        let def = EffectDef::new("vigor", EffectKind::Stat(Stat::HpMax as usize));
        sb.effects.add_effect(
            &def,
            AddEffectParams {
                duration: 100,
                magnitude: 100,
                from_item: false,
                trigger: None,
                passive_id: 0,
                source_type: SourceType::Hero,
            },
            None,
        );

        let (mut grid, mut text) = ctx_parts();
        let mut ctx = StatTickCtx {
            settings: &s,
            collision: &mut grid,
            combat_text: &mut text,
        };
        sb.logic(&mut ctx);
        assert_eq!(sb.get(Stat::HpMax), 200);
        assert_eq!(sb.hp, 100);
    }

    #[test]
    fn death_sentence_zeroes_hp_in_logic() {
        let s = settings();
        let mut sb = block(&s);
        use crate::effects::{AddEffectParams, EffectDef, EffectKind, SourceType};
        let def = EffectDef::new("doom", EffectKind::DeathSentence);
        sb.effects.add_effect(
            &def,
            AddEffectParams {
                duration: 1,
                magnitude: 0,
                from_item: false,
                trigger: None,
                passive_id: 0,
                source_type: SourceType::Enemy,
            },
            None,
        );
        let (mut grid, mut text) = ctx_parts();
        let mut ctx = StatTickCtx {
            settings: &s,
            collision: &mut grid,
            combat_text: &mut text,
        };
        sb.logic(&mut ctx);
        assert_eq!(sb.hp, 0);
    }

    #[test]
    fn ai_power_selection_respects_kind_and_cooldown(){
        let s = settings();
        let mut sb = block(&s);
        sb.powers_ai.push(AiPower {
            kind: AiPowerKind::Melee,
            id: 3,
            chance: 100,
            cooldown: Timer::new(30),
        });
        sb.powers_ai.push(AiPower {
            kind: AiPowerKind::Ranged,
            id: 4,
            chance: 100,
            cooldown: Timer::new(30),
        });
        let mut rng = GameRng::new(5);
        let idx = sb.get_ai_power(AiPowerKind::Melee, &mut rng).unwrap();
        assert_eq!(sb.powers_ai[idx].id, 3);

        sb.set_power_cooldown(3, 30);
        assert!(sb.get_ai_power(AiPowerKind::Melee, &mut rng).is_none());
        assert_eq!(sb.power_cooldown(3), 30);
    }

    #[test]
    fn load_creature_from_text() {
        use std::io::Write;
        let dir = std::env::temp_dir().join("emberfall_statblock_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("zombie.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            "name=Zombie\nlevel=2\nxp=12\nspeed=2.4\nhp=40\naccuracy=72\n\
             dmg_melee_min=2\ndmg_melee_max=6\nfire_resist=25\n\
             threat_range=5,9\npower=melee,7,65\nloot=3,20,1,2\nloot=2,fixed\n\
             combat_style=aggressive\nanimations=animations/zombie.txt\n"
        )
        .unwrap();

        let s = settings();
        let sb = StatBlock::load(&path, &s).unwrap();
        assert_eq!(sb.name, "Zombie");
        assert_eq!(sb.level, 2);
        assert_eq!(sb.xp_reward, 12);
        assert_eq!(sb.get(Stat::HpMax), 40);
        assert_eq!(sb.hp, 40);
        assert_eq!(sb.damage_min(0), 2);
        assert_eq!(sb.damage_max(0), 6);
        assert_eq!(sb.vulnerable_base[0], 75);
        assert_eq!(sb.threat_range, 5.0);
        assert_eq!(sb.threat_range_far, 9.0);
        assert_eq!(sb.powers_ai.len(), 1);
        assert_eq!(sb.powers_ai[0].id, 7);
        assert_eq!(sb.combat_style, CombatStyle::Aggressive);
        assert_eq!(sb.loot_table.len(), 2);
        assert_eq!(sb.loot_table[1].chance, 0);
    }
}
