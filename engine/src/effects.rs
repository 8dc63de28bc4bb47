//! Timed status effects and the per-entity set that owns them.
//!
//! Effects are a closed tagged sum: the aggregator below matches over the
//! tag and rebuilds the stat block's transient totals from scratch every
//! tick. Stat, resist, and primary bonuses are routed by index using the
//! configured stat layout.

use emberfall_core::geometry::FPoint;
use emberfall_core::settings::EngineSettings;
use emberfall_core::stats::StatLayout;

use crate::animation::Animation;

/// Who emitted the thing that applied this effect. Decides which party a
/// hazard may hit and how reflection flips ownership.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SourceType {
    #[default]
    Hero,
    Neutral,
    Enemy,
    Ally,
}

/// Edge conditions that arm trigger-bound passive powers and effects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassiveTrigger {
    Block,
    Hit,
    HalfDead,
    JoinCombat,
    Death,
}

/// The closed set of effect type tags plus the open stat-keyed tail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EffectKind {
    Damage,
    DamagePercent,
    HpOverTime,
    HpOverTimePercent,
    MpOverTime,
    MpOverTimePercent,
    Speed,
    AttackSpeed,
    Immunity,
    ImmunityDamage,
    ImmunitySlow,
    ImmunityStun,
    ImmunityHpSteal,
    ImmunityMpSteal,
    ImmunityKnockback,
    ImmunityDamageReflect,
    ImmunityStatDebuff,
    Stun,
    Revive,
    Convert,
    Fear,
    DeathSentence,
    Shield,
    Heal,
    Knockback,
    /// Index into the stat vector (engine stats and damage-type pairs).
    Stat(usize),
    /// Index into the element list.
    Resist(usize),
    /// Index into the primary-stat list.
    Primary(usize),
}

impl EffectKind {
    /// Resolve a config `type=` value. Unknown tags return None; the
    /// caller logs and ignores the effect.
    pub fn from_type_str(s: &str, settings: &EngineSettings) -> Option<EffectKind> {
        let kind = match s {
            "damage" => EffectKind::Damage,
            "damage_percent" => EffectKind::DamagePercent,
            "hpot" => EffectKind::HpOverTime,
            "hpot_percent" => EffectKind::HpOverTimePercent,
            "mpot" => EffectKind::MpOverTime,
            "mpot_percent" => EffectKind::MpOverTimePercent,
            "speed" => EffectKind::Speed,
            "attack_speed" => EffectKind::AttackSpeed,
            "immunity" => EffectKind::Immunity,
            "immunity_damage" => EffectKind::ImmunityDamage,
            "immunity_slow" => EffectKind::ImmunitySlow,
            "immunity_stun" => EffectKind::ImmunityStun,
            "immunity_hp_steal" => EffectKind::ImmunityHpSteal,
            "immunity_mp_steal" => EffectKind::ImmunityMpSteal,
            "immunity_knockback" => EffectKind::ImmunityKnockback,
            "immunity_damage_reflect" => EffectKind::ImmunityDamageReflect,
            "immunity_stat_debuff" => EffectKind::ImmunityStatDebuff,
            "stun" => EffectKind::Stun,
            "revive" => EffectKind::Revive,
            "convert" => EffectKind::Convert,
            "fear" => EffectKind::Fear,
            "death_sentence" => EffectKind::DeathSentence,
            "shield" => EffectKind::Shield,
            "heal" => EffectKind::Heal,
            "knockback" => EffectKind::Knockback,
            other => {
                use emberfall_core::stats::{Stat, STAT_COUNT};
                if let Some(stat) = Stat::from_key(other) {
                    return Some(EffectKind::Stat(stat as usize));
                }
                for (i, dt) in settings.damage_types.iter().enumerate() {
                    if other == dt.min_key {
                        return Some(EffectKind::Stat(STAT_COUNT + i * 2));
                    }
                    if other == dt.max_key {
                        return Some(EffectKind::Stat(STAT_COUNT + i * 2 + 1));
                    }
                }
                if let Some(stripped) = other.strip_suffix("_resist") {
                    if let Some(i) = settings.element_index(stripped) {
                        return Some(EffectKind::Resist(i));
                    }
                }
                if let Some(i) = settings.primary_index(other) {
                    return Some(EffectKind::Primary(i));
                }
                return None;
            }
        };
        Some(kind)
    }
}

/// An effect as authored in the effects file.
#[derive(Clone, Debug)]
pub struct EffectDef {
    pub id: String,
    pub kind: EffectKind,
    pub icon: i32,
    pub animation: String,
    pub can_stack: bool,
    pub max_stacks: i32,
    pub group_stack: bool,
    pub render_above: bool,
    pub color_mod: (u8, u8, u8),
    pub alpha_mod: u8,
    pub attack_speed_anim: String,
}

impl EffectDef {
    pub fn new(id: &str, kind: EffectKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            icon: -1,
            animation: String::new(),
            can_stack: true,
            max_stacks: -1,
            group_stack: false,
            render_above: false,
            color_mod: (255, 255, 255),
            alpha_mod: 255,
            attack_speed_anim: String::new(),
        }
    }
}

/// A live instance on a stat block.
#[derive(Clone, Debug)]
pub struct Effect {
    pub id: String,
    pub icon: i32,
    pub kind: EffectKind,
    /// Remaining ticks; counts down only while `duration > 0`.
    pub ticks: u32,
    /// 0 means the effect lasts until explicitly removed.
    pub duration: u32,
    pub magnitude: i32,
    pub magnitude_max: i32,
    pub from_item: bool,
    pub trigger: Option<PassiveTrigger>,
    pub render_above: bool,
    /// The passive power that installed this effect, if any.
    pub passive_id: usize,
    pub source_type: SourceType,
    pub group_stack: bool,
    pub color_mod: (u8, u8, u8),
    pub alpha_mod: u8,
    pub attack_speed_anim: String,
    pub animation: Option<Animation>,
}

/// Parameters for a single `add_effect` call.
#[derive(Clone, Copy, Debug)]
pub struct AddEffectParams {
    pub duration: u32,
    pub magnitude: i32,
    pub from_item: bool,
    pub trigger: Option<PassiveTrigger>,
    pub passive_id: usize,
    pub source_type: SourceType,
}

/// The effect set and its per-tick aggregates. Aggregates are transient;
/// `logic()` rebuilds them from the live effects every tick.
#[derive(Clone)]
pub struct EffectSet {
    pub effects: Vec<Effect>,

    pub damage: i32,
    pub damage_percent: i32,
    pub hpot: i32,
    pub hpot_percent: i32,
    pub mpot: i32,
    pub mpot_percent: i32,
    pub speed: f32,
    pub immunity_damage: bool,
    pub immunity_slow: bool,
    pub immunity_stun: bool,
    pub immunity_hp_steal: bool,
    pub immunity_mp_steal: bool,
    pub immunity_knockback: bool,
    pub immunity_damage_reflect: bool,
    pub immunity_stat_debuff: bool,
    pub stun: bool,
    pub revive: bool,
    pub convert: bool,
    pub fear: bool,
    pub death_sentence: bool,
    pub knockback_speed: f32,

    pub bonus: Vec<i32>,
    pub bonus_resist: Vec<i32>,
    pub bonus_primary: Vec<i32>,

    pub triggered_others: bool,
    pub triggered_block: bool,
    pub triggered_hit: bool,
    pub triggered_halfdead: bool,
    pub triggered_joincombat: bool,
    pub triggered_death: bool,

    pub refresh_stats: bool,
}

impl EffectSet {
    pub fn new(layout: StatLayout) -> Self {
        let mut set = Self {
            effects: Vec::new(),
            damage: 0,
            damage_percent: 0,
            hpot: 0,
            hpot_percent: 0,
            mpot: 0,
            mpot_percent: 0,
            speed: 100.0,
            immunity_damage: false,
            immunity_slow: false,
            immunity_stun: false,
            immunity_hp_steal: false,
            immunity_mp_steal: false,
            immunity_knockback: false,
            immunity_damage_reflect: false,
            immunity_stat_debuff: false,
            stun: false,
            revive: false,
            convert: false,
            fear: false,
            death_sentence: false,
            knockback_speed: 0.0,
            bonus: vec![0; layout.vector_len()],
            bonus_resist: vec![0; layout.element_count],
            bonus_primary: vec![0; layout.primary_count],
            triggered_others: false,
            triggered_block: false,
            triggered_hit: false,
            triggered_halfdead: false,
            triggered_joincombat: false,
            triggered_death: false,
            refresh_stats: false,
        };
        set.clear_status();
        set
    }

    fn clear_status(&mut self) {
        self.damage = 0;
        self.damage_percent = 0;
        self.hpot = 0;
        self.hpot_percent = 0;
        self.mpot = 0;
        self.mpot_percent = 0;
        self.speed = 100.0;
        self.immunity_damage = false;
        self.immunity_slow = false;
        self.immunity_stun = false;
        self.immunity_hp_steal = false;
        self.immunity_mp_steal = false;
        self.immunity_knockback = false;
        self.immunity_damage_reflect = false;
        self.immunity_stat_debuff = false;
        self.stun = false;
        self.revive = false;
        self.convert = false;
        self.fear = false;
        self.death_sentence = false;
        self.knockback_speed = 0.0;
        self.bonus.iter_mut().for_each(|b| *b = 0);
        self.bonus_resist.iter_mut().for_each(|b| *b = 0);
        self.bonus_primary.iter_mut().for_each(|b| *b = 0);
    }

    fn set_all_immunities(&mut self) {
        self.immunity_damage = true;
        self.immunity_slow = true;
        self.immunity_stun = true;
        self.immunity_hp_steal = true;
        self.immunity_mp_steal = true;
        self.immunity_knockback = true;
        self.immunity_damage_reflect = true;
        self.immunity_stat_debuff = true;
    }

    /// One tick: expire timers, rebuild aggregates, advance effect
    /// animations. Periodic over-time magnitudes land once per second of
    /// simulation (`ticks % fps == 1`).
    pub fn logic(&mut self, fps: u32) {
        self.clear_status();

        let mut i = 0;
        while i < self.effects.len() {
            if self.effects[i].duration > 0 {
                if self.effects[i].ticks > 0 {
                    self.effects[i].ticks -= 1;
                }
                if self.effects[i].ticks == 0 {
                    // death sentence lands only when its timer runs out
                    if self.effects[i].kind == EffectKind::DeathSentence {
                        self.death_sentence = true;
                    }
                    self.remove_at(i);
                    continue;
                }
            }

            let e = &self.effects[i];
            let periodic = e.ticks % fps == 1;
            match e.kind {
                EffectKind::Damage if periodic => self.damage += e.magnitude,
                EffectKind::DamagePercent if periodic => self.damage_percent += e.magnitude,
                EffectKind::HpOverTime if periodic => self.hpot += e.magnitude,
                EffectKind::HpOverTimePercent if periodic => self.hpot_percent += e.magnitude,
                EffectKind::MpOverTime if periodic => self.mpot += e.magnitude,
                EffectKind::MpOverTimePercent if periodic => self.mpot_percent += e.magnitude,
                EffectKind::Speed => {
                    self.speed = (e.magnitude as f32 * self.speed) / 100.0;
                }
                // attack speed is computed on demand via get_attack_speed()
                EffectKind::Immunity => self.set_all_immunities(),
                EffectKind::ImmunityDamage => self.immunity_damage = true,
                EffectKind::ImmunitySlow => self.immunity_slow = true,
                EffectKind::ImmunityStun => self.immunity_stun = true,
                EffectKind::ImmunityHpSteal => self.immunity_hp_steal = true,
                EffectKind::ImmunityMpSteal => self.immunity_mp_steal = true,
                EffectKind::ImmunityKnockback => self.immunity_knockback = true,
                EffectKind::ImmunityDamageReflect => self.immunity_damage_reflect = true,
                EffectKind::ImmunityStatDebuff => self.immunity_stat_debuff = true,
                EffectKind::Stun => self.stun = true,
                EffectKind::Revive => self.revive = true,
                EffectKind::Convert => self.convert = true,
                EffectKind::Fear => self.fear = true,
                EffectKind::Knockback => {
                    self.knockback_speed = e.magnitude as f32 / fps.max(1) as f32;
                }
                EffectKind::Stat(idx) => {
                    if let Some(slot) = self.bonus.get_mut(idx) {
                        *slot += e.magnitude;
                    }
                }
                EffectKind::Resist(idx) => {
                    if let Some(slot) = self.bonus_resist.get_mut(idx) {
                        *slot += e.magnitude;
                    }
                }
                EffectKind::Primary(idx) => {
                    if let Some(slot) = self.bonus_primary.get_mut(idx) {
                        *slot += e.magnitude;
                    }
                }
                _ => {}
            }

            // a drained shield is gone next pass
            let e = &self.effects[i];
            if e.kind == EffectKind::Shield && e.magnitude_max > 0 && e.magnitude == 0 {
                self.remove_at(i);
                continue;
            }

            // heals live for exactly one animation; without one, one tick
            let e = &self.effects[i];
            if e.kind == EffectKind::Heal {
                let done = match &e.animation {
                    Some(anim) => anim.is_last_frame(),
                    None => true,
                };
                if done {
                    self.remove_at(i);
                    continue;
                }
            }

            if let Some(anim) = &mut self.effects[i].animation {
                if !anim.is_completed() {
                    anim.advance_frame();
                }
            }

            i += 1;
        }
    }

    /// Apply a new effect instance. Returns false when the effect was
    /// rejected (immunity, exclusivity, or trigger replay) and nothing
    /// was mutated.
    pub fn add_effect(
        &mut self,
        def: &EffectDef,
        params: AddEffectParams,
        animation: Option<Animation>,
    ) -> bool {
        let kind = def.kind;
        let magnitude = params.magnitude;

        // active immunities reject incoming negatives outright
        if self.immunity_damage
            && matches!(kind, EffectKind::Damage | EffectKind::DamagePercent)
        {
            return false;
        }
        if self.immunity_slow && kind == EffectKind::Speed && magnitude < 100 {
            return false;
        }
        if self.immunity_stun && kind == EffectKind::Stun {
            return false;
        }
        if self.immunity_knockback && kind == EffectKind::Knockback {
            return false;
        }
        if self.immunity_stat_debuff && matches!(kind, EffectKind::Stat(_)) && magnitude < 0 {
            return false;
        }

        // only one knockback at a time
        if kind == EffectKind::Knockback && self.knockback_speed != 0.0 {
            return false;
        }

        if kind == EffectKind::AttackSpeed && magnitude < 100 {
            log::info!("EffectSet: attack speeds under 100 are unsupported");
            return false;
        }

        self.refresh_stats = true;

        let mut insert_pos: Option<usize> = None;
        let mut stacks_applied = 0;

        let mut i = self.effects.len();
        while i > 0 {
            i -= 1;
            if self.effects[i].id != def.id {
                continue;
            }

            // trigger-bound effects apply once per trigger activation
            if params.trigger.is_some() && self.effects[i].trigger == params.trigger {
                return false;
            }

            if !def.can_stack {
                self.remove_at(i);
                continue;
            }

            if kind == EffectKind::Shield && def.group_stack {
                // merge into the existing stack instead of a new instance
                self.effects[i].magnitude += magnitude;
                let can_grow = def.max_stacks == -1
                    || (magnitude != 0
                        && self.effects[i].magnitude_max / magnitude < def.max_stacks);
                if can_grow {
                    self.effects[i].magnitude_max += magnitude;
                }
                if self.effects[i].magnitude > self.effects[i].magnitude_max {
                    self.effects[i].magnitude = self.effects[i].magnitude_max;
                }
                return true;
            }

            if insert_pos.is_none() {
                // keep matching effects adjacent: insert after the most
                // recent instance with the same id
                insert_pos = Some(i + 1);
            }
            stacks_applied += 1;
        }

        // a fresh immunity scrubs the matching negatives
        match kind {
            EffectKind::Immunity => self.clear_negative_effects(None),
            EffectKind::ImmunityDamage
            | EffectKind::ImmunitySlow
            | EffectKind::ImmunityStun
            | EffectKind::ImmunityKnockback
            | EffectKind::ImmunityStatDebuff => self.clear_negative_effects(Some(kind)),
            _ => {}
        }

        let effect = Effect {
            id: def.id.clone(),
            icon: def.icon,
            kind,
            ticks: params.duration,
            duration: params.duration,
            magnitude,
            magnitude_max: magnitude,
            from_item: params.from_item,
            trigger: params.trigger,
            render_above: def.render_above,
            passive_id: params.passive_id,
            source_type: params.source_type,
            group_stack: def.group_stack,
            color_mod: def.color_mod,
            alpha_mod: def.alpha_mod,
            attack_speed_anim: def.attack_speed_anim.clone(),
            animation,
        };

        let mut insert_pos = insert_pos;
        if def.max_stacks >= 0 && stacks_applied >= def.max_stacks {
            if let Some(pos) = insert_pos {
                let oldest = pos - stacks_applied as usize;
                self.remove_at(oldest);
                insert_pos = Some(pos - 1);
            }
        }

        match insert_pos {
            Some(pos) => self.effects.insert(pos.min(self.effects.len()), effect),
            None => self.effects.push(effect),
        }
        true
    }

    fn remove_at(&mut self, index: usize) {
        self.effects.remove(index);
        self.refresh_stats = true;
    }

    pub fn remove_effect_type(&mut self, kind: EffectKind) {
        let mut i = self.effects.len();
        while i > 0 {
            i -= 1;
            if self.effects[i].kind == kind {
                self.remove_at(i);
            }
        }
    }

    pub fn remove_effect_passive(&mut self, passive_id: usize) {
        let mut i = self.effects.len();
        while i > 0 {
            i -= 1;
            if self.effects[i].passive_id == passive_id && passive_id != 0 {
                self.remove_at(i);
            }
        }
    }

    /// Remove up to `count` instances per listed id; a count of 0 removes
    /// every instance.
    pub fn remove_effect_id(&mut self, remove_list: &[(String, i32)]) {
        for (id, count) in remove_list {
            let remove_all = *count == 0;
            let mut remaining = *count;
            let mut i = self.effects.len();
            while i > 0 {
                i -= 1;
                if !remove_all && remaining <= 0 {
                    break;
                }
                if &self.effects[i].id == id {
                    self.remove_at(i);
                    remaining -= 1;
                }
            }
        }
    }

    pub fn clear_effects(&mut self) {
        self.effects.clear();
        self.clear_status();
        self.triggered_others = false;
        self.triggered_block = false;
        self.triggered_hit = false;
        self.triggered_halfdead = false;
        self.triggered_joincombat = false;
        self.triggered_death = false;
        self.refresh_stats = true;
    }

    pub fn clear_item_effects(&mut self) {
        let mut i = self.effects.len();
        while i > 0 {
            i -= 1;
            if self.effects[i].from_item {
                self.remove_at(i);
            }
        }
    }

    /// Remove effects that were attached with a given trigger, e.g. the
    /// block buffs when the block state ends.
    pub fn clear_trigger_effects(&mut self, trigger: PassiveTrigger) {
        let mut i = self.effects.len();
        while i > 0 {
            i -= 1;
            if self.effects[i].trigger == Some(trigger) {
                self.remove_at(i);
            }
        }
    }

    /// Scrub negative effects covered by the given immunity, or all of
    /// them for the blanket immunity (None).
    fn clear_negative_effects(&mut self, scope: Option<EffectKind>) {
        let covers = |k: EffectKind| scope.is_none() || scope == Some(k);
        let mut i = self.effects.len();
        while i > 0 {
            i -= 1;
            let e = &self.effects[i];
            let doomed = (covers(EffectKind::ImmunityDamage)
                && matches!(e.kind, EffectKind::Damage | EffectKind::DamagePercent))
                || (covers(EffectKind::ImmunitySlow)
                    && e.kind == EffectKind::Speed
                    && e.magnitude_max < 100)
                || (covers(EffectKind::ImmunityStun) && e.kind == EffectKind::Stun)
                || (covers(EffectKind::ImmunityKnockback) && e.kind == EffectKind::Knockback)
                || (covers(EffectKind::ImmunityStatDebuff)
                    && matches!(e.kind, EffectKind::Stat(_))
                    && e.magnitude_max < 0);
            if doomed {
                self.remove_at(i);
            }
        }
    }

    /// Soak `dmg` through shield effects in list order, returning the
    /// unabsorbed remainder. Drained shields are reaped on the next
    /// logic pass.
    pub fn damage_shields(&mut self, dmg: i32) -> i32 {
        let mut over = dmg;
        for e in &mut self.effects {
            if e.kind == EffectKind::Shield && e.magnitude_max > 0 {
                e.magnitude -= over;
                if e.magnitude < 0 {
                    over = e.magnitude.abs();
                    e.magnitude = 0;
                } else {
                    return 0;
                }
            }
        }
        over
    }

    pub fn is_debuffed(&self) -> bool {
        self.effects.iter().any(|e| match e.kind {
            EffectKind::Damage | EffectKind::DamagePercent => true,
            EffectKind::Speed => e.magnitude_max < 100,
            EffectKind::Stun | EffectKind::Knockback => true,
            EffectKind::Stat(_) => e.magnitude_max < 0,
            _ => false,
        })
    }

    pub fn has_effect(&self, id: &str, req_count: i32) -> bool {
        if req_count <= 0 {
            return false;
        }
        let count = self.effects.iter().filter(|e| e.id == id).count() as i32;
        count >= req_count
    }

    /// Attack-speed multiplier for the named animation. Instances with an
    /// animation filter only apply when the names match.
    pub fn get_attack_speed(&self, anim_name: &str) -> f32 {
        let mut attack_speed = 100.0f32;
        for e in &self.effects {
            if e.kind != EffectKind::AttackSpeed {
                continue;
            }
            if e.attack_speed_anim.is_empty() || e.attack_speed_anim == anim_name {
                attack_speed = (e.magnitude as f32 * attack_speed) / 100.0;
            }
        }
        attack_speed
    }

    /// Strongest color/alpha override among active effects, for tinted
    /// rendering. The most recent non-neutral effect wins.
    pub fn current_color_mod(&self) -> Option<(u8, u8, u8)> {
        self.effects
            .iter()
            .rev()
            .map(|e| e.color_mod)
            .find(|c| *c != (255, 255, 255))
    }

    pub fn current_alpha_mod(&self) -> Option<u8> {
        self.effects
            .iter()
            .rev()
            .map(|e| e.alpha_mod)
            .find(|a| *a != 255)
    }

    /// Renderables for visible effect animations at `pos`.
    pub fn add_renders(&self, pos: FPoint, out: &mut Vec<crate::assets::Renderable>) {
        for e in &self.effects {
            if let Some(anim) = &e.animation {
                let prio = if e.render_above { 2 } else { 0 };
                out.push(anim.current_frame_renderable(0, pos, prio));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> StatLayout {
        StatLayout {
            damage_type_count: 3,
            element_count: 2,
            primary_count: 2,
        }
    }

    fn params(duration: u32, magnitude: i32) -> AddEffectParams {
        AddEffectParams {
            duration,
            magnitude,
            from_item: false,
            trigger: None,
            passive_id: 0,
            source_type: SourceType::Enemy,
        }
    }

    #[test]
    fn effect_expires_after_duration_ticks() {
        let mut set = EffectSet::new(layout());
        let def = EffectDef::new("chill", EffectKind::Speed);
        assert!(set.add_effect(&def, params(3, 50), None));

        for _ in 0..2 {
            set.logic(60);
            assert_eq!(set.effects.len(), 1);
            assert!((set.speed - 50.0).abs() < f32::EPSILON);
        }
        set.logic(60);
        assert!(set.effects.is_empty());
        // aggregates are rebuilt, so speed is back to normal
        assert!((set.speed - 100.0).abs() < f32::EPSILON);
    }

    #[test]
    fn speed_composes_multiplicatively() {
        let mut set = EffectSet::new(layout());
        let a = EffectDef::new("chill", EffectKind::Speed);
        let b = EffectDef::new("haste_down", EffectKind::Speed);
        set.add_effect(&a, params(10, 50), None);
        set.add_effect(&b, params(10, 50), None);
        set.logic(60);
        assert!((set.speed - 25.0).abs() < f32::EPSILON);
    }

    #[test]
    fn shield_absorbs_and_reports_overflow() {
        let mut set = EffectSet::new(layout());
        let def = EffectDef::new("barrier", EffectKind::Shield);
        set.add_effect(&def, params(0, 50), None);

        assert_eq!(set.damage_shields(30), 0);
        assert_eq!(set.effects[0].magnitude, 20);
        assert_eq!(set.damage_shields(30), 10);
        assert_eq!(set.effects[0].magnitude, 0);

        // drained shield disappears on the next logic pass
        set.logic(60);
        assert!(set.effects.is_empty());
    }

    #[test]
    fn shield_overflow_conserves_total() {
        let mut set = EffectSet::new(layout());
        let def = EffectDef::new("barrier", EffectKind::Shield);
        set.add_effect(&def, params(0, 15), None);
        set.add_effect(&def, params(0, 25), None);

        let before: i32 = set.effects.iter().map(|e| e.magnitude).sum();
        let over = set.damage_shields(50);
        let after: i32 = set.effects.iter().map(|e| e.magnitude).sum();
        assert_eq!(before - after, 50 - over);
        assert!(set.effects.iter().all(|e| e.magnitude >= 0));
    }

    #[test]
    fn second_knockback_is_rejected() {
        let mut set = EffectSet::new(layout());
        let def = EffectDef::new("shove", EffectKind::Knockback);
        assert!(set.add_effect(&def, params(10, 120), None));
        set.logic(60);
        assert!(set.knockback_speed > 0.0);
        assert!(!set.add_effect(&def, params(10, 120), None));
        assert_eq!(set.effects.len(), 1);
    }

    #[test]
    fn immunity_purges_and_rejects_negatives() {
        let mut set = EffectSet::new(layout());
        let dot = EffectDef::new("poison", EffectKind::Damage);
        set.add_effect(&dot, params(100, 5), None);

        let imm = EffectDef::new("ward", EffectKind::ImmunityDamage);
        set.add_effect(&imm, params(100, 0), None);
        assert!(!set.effects.iter().any(|e| e.kind == EffectKind::Damage));

        set.logic(60);
        assert!(set.immunity_damage);
        assert!(!set.add_effect(&dot, params(100, 5), None));
    }

    #[test]
    fn non_stacking_effect_replaces_itself() {
        let mut set = EffectSet::new(layout());
        let mut def = EffectDef::new("brand", EffectKind::Stat(0));
        def.can_stack = false;
        set.add_effect(&def, params(10, 5), None);
        set.add_effect(&def, params(10, 9), None);
        assert_eq!(set.effects.len(), 1);
        assert_eq!(set.effects[0].magnitude, 9);
    }

    #[test]
    fn max_stacks_evicts_oldest() {
        let mut set = EffectSet::new(layout());
        let mut def = EffectDef::new("stack", EffectKind::Stat(0));
        def.max_stacks = 2;
        set.add_effect(&def, params(10, 1), None);
        set.add_effect(&def, params(10, 2), None);
        set.add_effect(&def, params(10, 3), None);
        assert_eq!(set.effects.len(), 2);
        let mags: Vec<i32> = set.effects.iter().map(|e| e.magnitude).collect();
        assert_eq!(mags, vec![2, 3]);
    }

    #[test]
    fn group_stack_shield_merges() {
        let mut set = EffectSet::new(layout());
        let mut def = EffectDef::new("bulwark", EffectKind::Shield);
        def.group_stack = true;
        def.max_stacks = 3;
        set.add_effect(&def, params(0, 20), None);
        set.add_effect(&def, params(0, 20), None);
        assert_eq!(set.effects.len(), 1);
        assert_eq!(set.effects[0].magnitude, 40);
        assert_eq!(set.effects[0].magnitude_max, 40);
    }

    #[test]
    fn periodic_damage_lands_once_per_second() {
        let mut set = EffectSet::new(layout());
        let def = EffectDef::new("burn", EffectKind::Damage);
        set.add_effect(&def, params(120, 7), None);

        let mut total = 0;
        for _ in 0..120 {
            set.logic(60);
            total += set.damage;
        }
        assert_eq!(total, 14);
    }

    #[test]
    fn stat_bonus_routes_by_index() {
        let mut set = EffectSet::new(layout());
        let stat = EffectDef::new("sharp", EffectKind::Stat(3));
        let resist = EffectDef::new("fire_ward", EffectKind::Resist(1));
        let primary = EffectDef::new("might", EffectKind::Primary(0));
        set.add_effect(&stat, params(10, 4), None);
        set.add_effect(&resist, params(10, 25), None);
        set.add_effect(&primary, params(10, 2), None);
        set.logic(60);
        assert_eq!(set.bonus[3], 4);
        assert_eq!(set.bonus_resist[1], 25);
        assert_eq!(set.bonus_primary[0], 2);
    }

    #[test]
    fn debuff_query_sees_negative_stats() {
        let mut set = EffectSet::new(layout());
        assert!(!set.is_debuffed());
        let def = EffectDef::new("weaken", EffectKind::Stat(0));
        set.add_effect(&def, params(10, -3), None);
        assert!(set.is_debuffed());
    }

    #[test]
    fn attack_speed_filters_by_animation() {
        let mut set = EffectSet::new(layout());
        let mut def = EffectDef::new("frenzy", EffectKind::AttackSpeed);
        def.attack_speed_anim = "swing".to_string();
        set.add_effect(&def, params(10, 150), None);
        assert!((set.get_attack_speed("swing") - 150.0).abs() < f32::EPSILON);
        assert!((set.get_attack_speed("shoot") - 100.0).abs() < f32::EPSILON);
    }

    #[test]
    fn trigger_effects_apply_once_per_activation() {
        let mut set = EffectSet::new(layout());
        let def = EffectDef::new("guard", EffectKind::Stat(0));
        let p = AddEffectParams {
            trigger: Some(PassiveTrigger::Block),
            ..params(0, 10)
        };
        assert!(set.add_effect(&def, p, None));
        assert!(!set.add_effect(&def, p, None));
        assert_eq!(set.effects.len(), 1);
    }

    #[test]
    fn death_sentence_flags_on_expiry_only() {
        let mut set = EffectSet::new(layout());
        let def = EffectDef::new("doom", EffectKind::DeathSentence);
        set.add_effect(&def, params(2, 0), None);
        set.logic(60);
        assert!(!set.death_sentence);
        set.logic(60);
        assert!(set.death_sentence);
        assert!(set.effects.is_empty());
    }
}
