//! Power definitions, loading, and activation.
//!
//! Powers are static data loaded once; `GameSession::activate_power`
//! dispatches them at runtime, emitting hazards into the hazard queue,
//! spawn descriptors into the spawn queue, and effects onto stat blocks.
//! Power ids referenced by other data are verified at load; anything
//! unresolved collapses to the no-op id 0 so runtime lookups never fail.

use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};

use emberfall_core::file_parser::FileParser;
use emberfall_core::geometry::{
    calc_direction, calc_theta, calc_vector, clamp_distance, FPoint, Point,
};
use emberfall_core::message::{CombatTextKind, LogKind};
use emberfall_core::parse;
use emberfall_core::settings::EngineSettings;

use crate::animation::Animation;
use crate::assets::{SoundCatalog, SoundId, SOUND_NONE};
use crate::collision::{CollideType, MovementType};
use crate::effects::{AddEffectParams, EffectDef, EffectKind, PassiveTrigger, SourceType};
use crate::hazards::Hazard;
use crate::ids::{EntityId, ItemId, PowerId, POWER_NONE};
use crate::session::GameSession;
use crate::stat_block::{EntityState, SpawnLevel, SpawnLevelMode};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PowerKind {
    #[default]
    Fixed,
    Missile,
    Repeater,
    Spawn,
    Transform,
    Effect,
    Block,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PowerState {
    #[default]
    Instant,
    Attack,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StartingPos {
    #[default]
    Source,
    Target,
    Melee,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ModifierMode {
    #[default]
    Multiply,
    Add,
    Absolute,
}

/// A damage/accuracy/crit modifier triple.
#[derive(Clone, Copy, Debug)]
pub struct StatModifier {
    pub mode: ModifierMode,
    pub min: i32,
    pub max: i32,
}

impl StatModifier {
    /// Identity: multiply by 100%.
    pub fn none() -> Self {
        Self {
            mode: ModifierMode::Multiply,
            min: 100,
            max: 100,
        }
    }

    pub fn apply(&self, value: i32) -> i32 {
        match self.mode {
            ModifierMode::Multiply => (value * self.min) / 100,
            ModifierMode::Add => value + self.min,
            ModifierMode::Absolute => self.min,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainKind {
    Pre,
    Post,
    Wall,
    Expire,
}

#[derive(Clone, Copy, Debug)]
pub struct ChainPower {
    pub kind: ChainKind,
    pub id: PowerId,
    pub chance: i32,
}

#[derive(Clone, Debug)]
pub struct PostEffect {
    pub id: String,
    pub magnitude: i32,
    pub duration: u32,
    pub chance: i32,
}

#[derive(Clone, Debug)]
pub struct PowerReplaceByEffect {
    pub power_id: PowerId,
    pub effect_id: String,
    pub count: i32,
}

#[derive(Clone, Copy, Debug)]
pub struct PowerRequiredItem {
    pub id: ItemId,
    pub quantity: i32,
    pub equipped: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpawnLimitMode {
    #[default]
    Unlimited,
    Fixed,
    Stat,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SpawnLimit {
    pub mode: SpawnLimitMode,
    pub qty: i32,
    pub every: i32,
    pub stat: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptTrigger {
    Cast,
    Hit,
    Wall,
}

#[derive(Clone, Debug)]
pub struct PowerDef {
    pub id: PowerId,
    pub is_empty: bool,
    pub kind: PowerKind,
    pub name: String,
    pub description: String,
    pub icon: i32,
    pub new_state: PowerState,
    pub state_duration: u32,
    pub prevent_interrupt: bool,
    pub attack_anim: String,
    pub face: bool,
    pub source_type: Option<SourceType>,
    pub beacon: bool,
    pub count: i32,
    pub passive: bool,
    pub passive_trigger: Option<PassiveTrigger>,
    pub meta_power: bool,

    pub requires_flags: Vec<String>,
    pub requires_mp: i32,
    pub requires_hp: i32,
    pub sacrifice: bool,
    pub requires_los: bool,
    pub requires_empty_target: bool,
    pub required_items: Vec<PowerRequiredItem>,
    pub requires_targeting: bool,
    pub requires_spawns: i32,
    pub cooldown: u32,

    pub animation_name: String,
    pub sfx_index: SoundId,
    pub sfx_hit: SoundId,
    pub sfx_hit_enable: bool,
    pub directional: bool,
    pub visual_random: u16,
    pub visual_option: u16,
    pub aim_assist: bool,
    pub speed: f32,
    pub lifespan: u32,
    pub on_floor: bool,
    pub complete_animation: bool,
    pub charge_speed: f32,
    pub attack_speed: f32,

    pub use_hazard: bool,
    pub no_attack: bool,
    pub no_aggro: bool,
    pub radius: f32,
    pub base_damage: Option<usize>,
    pub starting_pos: StartingPos,
    pub relative_pos: bool,
    pub multitarget: bool,
    pub multihit: bool,
    pub expire_with_caster: bool,
    pub ignore_zero_damage: bool,
    pub target_range: f32,
    pub target_party: bool,
    pub target_categories: Vec<String>,

    pub mod_accuracy: StatModifier,
    pub mod_crit: StatModifier,
    pub mod_damage: StatModifier,

    pub hp_steal: i32,
    pub mp_steal: i32,

    pub missile_angle: i32,
    pub angle_variance: i32,
    pub speed_variance: f32,
    pub delay: u32,

    pub trait_elemental: Option<usize>,
    pub trait_armor_penetration: bool,
    pub trait_crits_impaired: i32,
    pub trait_avoidance_ignore: bool,

    pub transform_duration: i32,
    pub manual_untransform: bool,
    pub keep_equipment: bool,
    pub untransform_on_hit: bool,

    pub buff: bool,
    pub buff_teleport: bool,
    pub buff_party: bool,
    pub buff_party_power_id: PowerId,

    pub post_effects: Vec<PostEffect>,
    pub chain_powers: Vec<ChainPower>,
    pub wall_reflect: bool,

    pub spawn_type: String,
    pub target_neighbor: i32,
    pub spawn_limit: SpawnLimit,
    pub spawn_level: SpawnLevel,

    pub target_movement_normal: bool,
    pub target_movement_flying: bool,
    pub target_movement_intangible: bool,
    pub walls_block_aoe: bool,

    pub script_trigger: Option<ScriptTrigger>,
    pub script: String,

    pub remove_effects: Vec<(String, i32)>,
    pub replace_by_effect: Vec<PowerReplaceByEffect>,
}

impl PowerDef {
    pub fn empty(id: PowerId) -> Self {
        Self {
            id,
            is_empty: true,
            kind: PowerKind::Fixed,
            name: String::new(),
            description: String::new(),
            icon: -1,
            new_state: PowerState::Instant,
            state_duration: 0,
            prevent_interrupt: false,
            attack_anim: String::new(),
            face: false,
            source_type: None,
            beacon: false,
            count: 1,
            passive: false,
            passive_trigger: None,
            meta_power: false,
            requires_flags: Vec::new(),
            requires_mp: 0,
            requires_hp: 0,
            sacrifice: false,
            requires_los: false,
            requires_empty_target: false,
            required_items: Vec::new(),
            requires_targeting: false,
            requires_spawns: 0,
            cooldown: 0,
            animation_name: String::new(),
            sfx_index: SOUND_NONE,
            sfx_hit: SOUND_NONE,
            sfx_hit_enable: false,
            directional: false,
            visual_random: 0,
            visual_option: 0,
            aim_assist: false,
            speed: 0.0,
            lifespan: 0,
            on_floor: false,
            complete_animation: false,
            charge_speed: 0.0,
            attack_speed: 100.0,
            use_hazard: false,
            no_attack: false,
            no_aggro: false,
            radius: 0.0,
            base_damage: None,
            starting_pos: StartingPos::Source,
            relative_pos: false,
            multitarget: false,
            multihit: false,
            expire_with_caster: false,
            ignore_zero_damage: false,
            target_range: 0.0,
            target_party: false,
            target_categories: Vec::new(),
            mod_accuracy: StatModifier::none(),
            mod_crit: StatModifier::none(),
            mod_damage: StatModifier::none(),
            hp_steal: 0,
            mp_steal: 0,
            missile_angle: 0,
            angle_variance: 0,
            speed_variance: 0.0,
            delay: 0,
            trait_elemental: None,
            trait_armor_penetration: false,
            trait_crits_impaired: 0,
            trait_avoidance_ignore: false,
            transform_duration: 0,
            manual_untransform: false,
            keep_equipment: false,
            untransform_on_hit: false,
            buff: false,
            buff_teleport: false,
            buff_party: false,
            buff_party_power_id: POWER_NONE,
            post_effects: Vec::new(),
            chain_powers: Vec::new(),
            wall_reflect: false,
            spawn_type: String::new(),
            target_neighbor: 0,
            spawn_limit: SpawnLimit::default(),
            spawn_level: SpawnLevel::default(),
            target_movement_normal: true,
            target_movement_flying: true,
            target_movement_intangible: true,
            walls_block_aoe: false,
            script_trigger: None,
            script: String::new(),
            remove_effects: Vec::new(),
            replace_by_effect: Vec::new(),
        }
    }

    pub fn chain(&self, kind: ChainKind) -> impl Iterator<Item = &ChainPower> {
        self.chain_powers.iter().filter(move |c| c.kind == kind)
    }
}

/// A queued creature spawn, drained by the entity manager.
#[derive(Clone, Debug)]
pub struct SpawnDescriptor {
    pub category: String,
    pub pos: FPoint,
    pub direction: u8,
    pub summoner: Option<EntityId>,
    pub summon_power_index: PowerId,
    pub hero_ally: bool,
    pub enemy_ally: bool,
}

pub struct PowerManager {
    pub powers: Vec<PowerDef>,
    pub effects: Vec<EffectDef>,
    /// Hazards emitted this tick, drained by the hazard manager.
    pub hazard_queue: VecDeque<Hazard>,
    /// Creature spawns emitted this tick, drained by the entity manager.
    pub spawn_queue: VecDeque<SpawnDescriptor>,
    /// Consumable item charges owed by the hero, drained by the session.
    pub used_items: Vec<ItemId>,
    pub used_equipped_items: Vec<ItemId>,
}

impl Default for PowerManager {
    fn default() -> Self {
        Self {
            powers: vec![PowerDef::empty(POWER_NONE)],
            effects: Vec::new(),
            hazard_queue: VecDeque::new(),
            spawn_queue: VecDeque::new(),
            used_items: Vec::new(),
            used_equipped_items: Vec::new(),
        }
    }
}

impl PowerManager {
    pub fn is_valid(&self, id: PowerId) -> bool {
        id != POWER_NONE && id < self.powers.len()
    }

    pub fn get(&self, id: PowerId) -> &PowerDef {
        &self.powers[id.min(self.powers.len() - 1)]
    }

    /// Validate a data-referenced power id, substituting the no-op id 0
    /// on failure.
    pub fn verify_id(&self, id: i32, source: &str) -> PowerId {
        if id < 0 || id as usize >= self.powers.len() {
            log::error!("PowerManager: {} is not a valid power id ({})", id, source);
            return POWER_NONE;
        }
        id as usize
    }

    pub fn effect_def(&self, id: &str) -> Option<&EffectDef> {
        self.effects.iter().find(|e| e.id == id)
    }

    /// Load effect definitions. Unknown type tags are logged and the
    /// definition is dropped.
    pub fn load_effects(&mut self, path: &Path, settings: &EngineSettings) -> Result<()> {
        let mut infile =
            FileParser::open(path).with_context(|| "PowerManager: cannot open effects file")?;
        let mut pending: Option<EffectDef> = None;

        while infile.next() {
            if infile.new_section && infile.section == "effect" {
                if let Some(def) = pending.take() {
                    self.effects.push(def);
                }
                pending = Some(EffectDef::new("", EffectKind::Damage));
            }
            let Some(def) = pending.as_mut() else {
                infile.error("PowerManager: effect key outside an [effect] section");
                continue;
            };
            match infile.key.as_str() {
                "id" => def.id = infile.val.clone(),
                "type" => match EffectKind::from_type_str(&infile.val, settings) {
                    Some(kind) => def.kind = kind,
                    None => {
                        infile.error("PowerManager: not a valid effect type");
                    }
                },
                "icon" => def.icon = parse::to_int(&infile.val, -1),
                "animation" => def.animation = infile.val.clone(),
                "can_stack" => def.can_stack = parse::to_bool(&infile.val),
                "max_stacks" => def.max_stacks = parse::to_int(&infile.val, -1),
                "group_stack" => def.group_stack = parse::to_bool(&infile.val),
                "render_above" => def.render_above = parse::to_bool(&infile.val),
                "color_mod" => {
                    let mut val = infile.val.clone();
                    def.color_mod = (
                        parse::pop_first_int(&mut val) as u8,
                        parse::pop_first_int(&mut val) as u8,
                        parse::pop_first_int(&mut val) as u8,
                    );
                }
                "alpha_mod" => def.alpha_mod = parse::to_int(&infile.val, 255) as u8,
                "attack_speed_anim" => def.attack_speed_anim = infile.val.clone(),
                _ => infile.error("PowerManager: unknown effect key"),
            }
        }
        if let Some(def) = pending.take() {
            self.effects.push(def);
        }
        Ok(())
    }

    /// Load power definitions. Index 0 stays the no-op power.
    pub fn load_powers(
        &mut self,
        path: &Path,
        settings: &EngineSettings,
        sounds: &mut SoundCatalog,
    ) -> Result<()> {
        let mut infile =
            FileParser::open(path).with_context(|| "PowerManager: cannot open powers file")?;
        let fps = settings.misc.max_frames_per_sec;
        let mut cur: Option<PowerDef> = None;

        while infile.next() {
            if infile.new_section && infile.section == "power" {
                if let Some(def) = cur.take() {
                    self.install_power(def);
                }
                cur = Some(PowerDef::empty(0));
            }
            let Some(def) = cur.as_mut() else {
                infile.error("PowerManager: power key outside a [power] section");
                continue;
            };
            def.is_empty = false;

            match infile.key.as_str() {
                "id" => def.id = parse::to_int(&infile.val, 0).max(0) as usize,
                "type" => {
                    def.kind = match infile.val.as_str() {
                        "fixed" => PowerKind::Fixed,
                        "missile" => PowerKind::Missile,
                        "repeater" => PowerKind::Repeater,
                        "spawn" => PowerKind::Spawn,
                        "transform" => PowerKind::Transform,
                        "effect" => PowerKind::Effect,
                        "block" => PowerKind::Block,
                        _ => {
                            infile.error("PowerManager: unknown power type");
                            PowerKind::Fixed
                        }
                    }
                }
                "name" => def.name = infile.val.clone(),
                "description" => def.description = infile.val.clone(),
                "icon" => def.icon = parse::to_int(&infile.val, -1),
                "new_state" => {
                    def.new_state = match infile.val.as_str() {
                        "instant" => PowerState::Instant,
                        "attack" => PowerState::Attack,
                        _ => {
                            infile.error("PowerManager: unknown new_state");
                            PowerState::Instant
                        }
                    }
                }
                "state_duration" => def.state_duration = parse::to_duration(&infile.val, fps),
                "prevent_interrupt" => def.prevent_interrupt = parse::to_bool(&infile.val),
                "animation" => def.attack_anim = infile.val.clone(),
                "face" => def.face = parse::to_bool(&infile.val),
                "source_type" => {
                    def.source_type = match infile.val.as_str() {
                        "hero" => Some(SourceType::Hero),
                        "neutral" => Some(SourceType::Neutral),
                        "enemy" => Some(SourceType::Enemy),
                        "ally" => Some(SourceType::Ally),
                        _ => {
                            infile.error("PowerManager: unknown source_type");
                            None
                        }
                    }
                }
                "beacon" => def.beacon = parse::to_bool(&infile.val),
                "count" => def.count = parse::to_int(&infile.val, 1).max(1),
                "passive" => def.passive = parse::to_bool(&infile.val),
                "passive_trigger" => {
                    def.passive_trigger = match infile.val.as_str() {
                        "on_block" => Some(PassiveTrigger::Block),
                        "on_hit" => Some(PassiveTrigger::Hit),
                        "on_halfdeath" => Some(PassiveTrigger::HalfDead),
                        "on_joincombat" => Some(PassiveTrigger::JoinCombat),
                        "on_death" => Some(PassiveTrigger::Death),
                        _ => {
                            infile.error("PowerManager: unknown passive trigger");
                            None
                        }
                    }
                }
                "meta_power" => def.meta_power = parse::to_bool(&infile.val),
                "requires_flags" => {
                    let mut val = infile.val.clone();
                    loop {
                        let flag = parse::pop_first_string(&mut val);
                        if flag.is_empty() {
                            break;
                        }
                        def.requires_flags.push(flag);
                    }
                }
                "requires_mp" => def.requires_mp = parse::to_int(&infile.val, 0),
                "requires_hp" => def.requires_hp = parse::to_int(&infile.val, 0),
                "sacrifice" => def.sacrifice = parse::to_bool(&infile.val),
                "requires_los" => def.requires_los = parse::to_bool(&infile.val),
                "requires_empty_target" => {
                    def.requires_empty_target = parse::to_bool(&infile.val)
                }
                "requires_item" | "requires_equipped_item" => {
                    let mut val = infile.val.clone();
                    let id = parse::pop_first_int(&mut val).max(0) as usize;
                    let quantity = if val.is_empty() {
                        1
                    } else {
                        parse::pop_first_int(&mut val).max(1)
                    };
                    def.required_items.push(PowerRequiredItem {
                        id,
                        quantity,
                        equipped: infile.key == "requires_equipped_item",
                    });
                }
                "requires_targeting" => def.requires_targeting = parse::to_bool(&infile.val),
                "requires_spawns" => def.requires_spawns = parse::to_int(&infile.val, 0),
                "cooldown" => def.cooldown = parse::to_duration(&infile.val, fps),
                "soundfx" => def.sfx_index = sounds.load(&infile.val),
                "soundfx_hit" => {
                    def.sfx_hit = sounds.load(&infile.val);
                    def.sfx_hit_enable = def.sfx_hit != SOUND_NONE;
                }
                "directional" => def.directional = parse::to_bool(&infile.val),
                "visual_random" => def.visual_random = parse::to_int(&infile.val, 0).max(0) as u16,
                "visual_option" => def.visual_option = parse::to_int(&infile.val, 0).max(0) as u16,
                "aim_assist" => def.aim_assist = parse::to_bool(&infile.val),
                "speed" => def.speed = parse::to_float(&infile.val, 0.0) / fps as f32,
                "lifespan" => def.lifespan = parse::to_duration(&infile.val, fps),
                "floor" => def.on_floor = parse::to_bool(&infile.val),
                "complete_animation" => def.complete_animation = parse::to_bool(&infile.val),
                "charge_speed" => def.charge_speed = parse::to_float(&infile.val, 0.0) / fps as f32,
                "attack_speed" => {
                    def.attack_speed = parse::to_float(&infile.val, 100.0).max(100.0);
                }
                "use_hazard" => def.use_hazard = parse::to_bool(&infile.val),
                "no_attack" => def.no_attack = parse::to_bool(&infile.val),
                "no_aggro" => def.no_aggro = parse::to_bool(&infile.val),
                "radius" => def.radius = parse::to_float(&infile.val, 0.0),
                "base_damage" => {
                    if infile.val == "none" {
                        def.base_damage = None;
                    } else {
                        def.base_damage = settings.damage_type_index(&infile.val);
                        if def.base_damage.is_none() {
                            infile.error("PowerManager: unknown damage type");
                        }
                    }
                }
                "starting_pos" => {
                    def.starting_pos = match infile.val.as_str() {
                        "source" => StartingPos::Source,
                        "target" => StartingPos::Target,
                        "melee" => StartingPos::Melee,
                        _ => {
                            infile.error("PowerManager: unknown starting_pos");
                            StartingPos::Source
                        }
                    }
                }
                "relative_pos" => def.relative_pos = parse::to_bool(&infile.val),
                "multitarget" => def.multitarget = parse::to_bool(&infile.val),
                "multihit" => def.multihit = parse::to_bool(&infile.val),
                "expire_with_caster" => def.expire_with_caster = parse::to_bool(&infile.val),
                "ignore_zero_damage" => def.ignore_zero_damage = parse::to_bool(&infile.val),
                "target_range" => def.target_range = parse::to_float(&infile.val, 0.0),
                "target_party" => def.target_party = parse::to_bool(&infile.val),
                "target_categories" => {
                    let mut val = infile.val.clone();
                    loop {
                        let c = parse::pop_first_string(&mut val);
                        if c.is_empty() {
                            break;
                        }
                        def.target_categories.push(c);
                    }
                }
                "modifier_accuracy" => def.mod_accuracy = Self::parse_modifier(&infile),
                "modifier_critical" => def.mod_crit = Self::parse_modifier(&infile),
                "modifier_damage" => def.mod_damage = Self::parse_modifier(&infile),
                "hp_steal" => def.hp_steal = parse::to_int(&infile.val, 0),
                "mp_steal" => def.mp_steal = parse::to_int(&infile.val, 0),
                "missile_angle" => def.missile_angle = parse::to_int(&infile.val, 0),
                "angle_variance" => def.angle_variance = parse::to_int(&infile.val, 0),
                "speed_variance" => def.speed_variance = parse::to_float(&infile.val, 0.0),
                "delay" => def.delay = parse::to_duration(&infile.val, fps),
                "trait_elemental" => {
                    def.trait_elemental = settings.element_index(&infile.val);
                    if def.trait_elemental.is_none() {
                        infile.error("PowerManager: unknown element");
                    }
                }
                "trait_armor_penetration" => {
                    def.trait_armor_penetration = parse::to_bool(&infile.val)
                }
                "trait_crits_impaired" => {
                    def.trait_crits_impaired = parse::to_int(&infile.val, 0)
                }
                "trait_avoidance_ignore" => {
                    def.trait_avoidance_ignore = parse::to_bool(&infile.val)
                }
                "transform_duration" => {
                    def.transform_duration = parse::to_duration(&infile.val, fps) as i32
                }
                "manual_untransform" => def.manual_untransform = parse::to_bool(&infile.val),
                "keep_equipment" => def.keep_equipment = parse::to_bool(&infile.val),
                "untransform_on_hit" => def.untransform_on_hit = parse::to_bool(&infile.val),
                "buff" => def.buff = parse::to_bool(&infile.val),
                "buff_teleport" => def.buff_teleport = parse::to_bool(&infile.val),
                "buff_party" => def.buff_party = parse::to_bool(&infile.val),
                "buff_party_power_id" => {
                    def.buff_party_power_id = parse::to_int(&infile.val, 0).max(0) as usize
                }
                "post_effect" => {
                    // post_effect=<effect id>,<magnitude>,<duration>[,<chance>]
                    let mut val = infile.val.clone();
                    let id = parse::pop_first_string(&mut val);
                    let magnitude = parse::pop_first_int(&mut val);
                    let duration = parse::to_duration(&parse::pop_first_string(&mut val), fps);
                    let chance = if val.is_empty() {
                        100
                    } else {
                        parse::pop_first_int(&mut val)
                    };
                    def.post_effects.push(PostEffect {
                        id,
                        magnitude,
                        duration,
                        chance,
                    });
                }
                "pre_power" | "post_power" | "wall_power" | "expire_power" => {
                    let mut val = infile.val.clone();
                    let id = parse::pop_first_int(&mut val).max(0) as usize;
                    let chance = if val.is_empty() {
                        100
                    } else {
                        parse::pop_first_int(&mut val)
                    };
                    let kind = match infile.key.as_str() {
                        "pre_power" => ChainKind::Pre,
                        "post_power" => ChainKind::Post,
                        "wall_power" => ChainKind::Wall,
                        _ => ChainKind::Expire,
                    };
                    def.chain_powers.push(ChainPower { kind, id, chance });
                }
                "wall_reflect" => def.wall_reflect = parse::to_bool(&infile.val),
                "spawn_type" => def.spawn_type = infile.val.clone(),
                "target_neighbor" => def.target_neighbor = parse::to_int(&infile.val, 0),
                "spawn_limit" => {
                    // spawn_limit=fixed,<qty> | stat,<qty>,<every>,<primary> | unlimited
                    let mut val = infile.val.clone();
                    let mode = parse::pop_first_string(&mut val);
                    match mode.as_str() {
                        "fixed" => {
                            def.spawn_limit.mode = SpawnLimitMode::Fixed;
                            def.spawn_limit.qty = parse::pop_first_int(&mut val).max(1);
                        }
                        "stat" => {
                            def.spawn_limit.mode = SpawnLimitMode::Stat;
                            def.spawn_limit.qty = parse::pop_first_int(&mut val).max(1);
                            def.spawn_limit.every = parse::pop_first_int(&mut val).max(1);
                            let stat_id = parse::pop_first_string(&mut val);
                            match settings.primary_index(&stat_id) {
                                Some(i) => def.spawn_limit.stat = i,
                                None => infile.error("PowerManager: unknown primary stat"),
                            }
                        }
                        "unlimited" => def.spawn_limit.mode = SpawnLimitMode::Unlimited,
                        _ => infile.error("PowerManager: unknown spawn_limit mode"),
                    }
                }
                "spawn_level" => {
                    // spawn_level=fixed,<count> | level,<count>,<ratio> | stat,<count>,<ratio>,<primary>
                    let mut val = infile.val.clone();
                    let mode = parse::pop_first_string(&mut val);
                    match mode.as_str() {
                        "default" => def.spawn_level.mode = SpawnLevelMode::Default,
                        "fixed" => {
                            def.spawn_level.mode = SpawnLevelMode::Fixed;
                            def.spawn_level.count = parse::pop_first_float(&mut val);
                        }
                        "level" => {
                            def.spawn_level.mode = SpawnLevelMode::Level;
                            def.spawn_level.count = parse::pop_first_float(&mut val);
                            def.spawn_level.ratio = parse::pop_first_float(&mut val);
                        }
                        "stat" => {
                            def.spawn_level.mode = SpawnLevelMode::Stat;
                            def.spawn_level.count = parse::pop_first_float(&mut val);
                            def.spawn_level.ratio = parse::pop_first_float(&mut val);
                            let stat_id = parse::pop_first_string(&mut val);
                            match settings.primary_index(&stat_id) {
                                Some(i) => def.spawn_level.stat = i,
                                None => infile.error("PowerManager: unknown primary stat"),
                            }
                        }
                        _ => infile.error("PowerManager: unknown spawn_level mode"),
                    }
                }
                "target_movement_normal" => {
                    def.target_movement_normal = parse::to_bool(&infile.val)
                }
                "target_movement_flying" => {
                    def.target_movement_flying = parse::to_bool(&infile.val)
                }
                "target_movement_intangible" => {
                    def.target_movement_intangible = parse::to_bool(&infile.val)
                }
                "walls_block_aoe" => def.walls_block_aoe = parse::to_bool(&infile.val),
                "script" => {
                    // script=<trigger>,<filename>
                    let mut val = infile.val.clone();
                    let trigger = parse::pop_first_string(&mut val);
                    def.script_trigger = match trigger.as_str() {
                        "on_cast" => Some(ScriptTrigger::Cast),
                        "on_hit" => Some(ScriptTrigger::Hit),
                        "on_wall" => Some(ScriptTrigger::Wall),
                        _ => {
                            infile.error("PowerManager: unknown script trigger");
                            None
                        }
                    };
                    def.script = parse::pop_first_string(&mut val);
                }
                "remove_effects" => {
                    // remove_effects=<effect id>,<count>
                    let mut val = infile.val.clone();
                    let id = parse::pop_first_string(&mut val);
                    let count = parse::pop_first_int(&mut val);
                    def.remove_effects.push((id, count));
                }
                "replace_by_effect" => {
                    // replace_by_effect=<power id>,<effect id>,<count>
                    let mut val = infile.val.clone();
                    let power_id = parse::pop_first_int(&mut val).max(0) as usize;
                    let effect_id = parse::pop_first_string(&mut val);
                    let count = parse::pop_first_int(&mut val).max(1);
                    def.replace_by_effect.push(PowerReplaceByEffect {
                        power_id,
                        effect_id,
                        count,
                    });
                }
                _ => infile.error("PowerManager: unknown power key"),
            }
        }
        if let Some(def) = cur.take() {
            self.install_power(def);
        }

        // resolve data-referenced power ids now so runtime lookups can't miss
        let count = self.powers.len();
        for p in &mut self.powers {
            for chain in &mut p.chain_powers {
                if chain.id >= count {
                    log::error!(
                        "PowerManager: {} is not a valid power id (chain of {})",
                        chain.id,
                        p.id
                    );
                    chain.id = POWER_NONE;
                }
            }
            for rep in &mut p.replace_by_effect {
                if rep.power_id >= count {
                    log::error!(
                        "PowerManager: {} is not a valid power id (replace_by_effect of {})",
                        rep.power_id,
                        p.id
                    );
                    rep.power_id = POWER_NONE;
                }
            }
            if p.buff_party_power_id >= count {
                log::error!(
                    "PowerManager: {} is not a valid power id (buff_party_power_id of {})",
                    p.buff_party_power_id,
                    p.id
                );
                p.buff_party_power_id = POWER_NONE;
            }
        }
        Ok(())
    }

    fn install_power(&mut self, def: PowerDef) {
        let id = def.id;
        if id == POWER_NONE {
            log::error!("PowerManager: power id 0 is reserved, definition skipped");
            return;
        }
        if id >= self.powers.len() {
            let next = self.powers.len();
            for fill in next..=id {
                self.powers.push(PowerDef::empty(fill));
            }
        }
        self.powers[id] = def;
    }

    fn parse_modifier(infile: &FileParser) -> StatModifier {
        let mut val = infile.val.clone();
        let mode = match parse::pop_first_string(&mut val).as_str() {
            "multiply" => ModifierMode::Multiply,
            "add" => ModifierMode::Add,
            "absolute" => ModifierMode::Absolute,
            _ => {
                infile.error("PowerManager: unknown modifier mode");
                ModifierMode::Multiply
            }
        };
        let min = parse::pop_first_int(&mut val);
        let max = if val.is_empty() {
            min
        } else {
            parse::pop_first_int(&mut val)
        };
        StatModifier { mode, min, max }
    }
}

impl GameSession {
    /// Substitute the dispatched power when the caster carries enough
    /// stacks of a listed effect. First matching entry wins.
    pub fn check_replace_by_effect(&self, power_id: PowerId, src: EntityId) -> PowerId {
        let Some(entity) = self.entities.get(src) else {
            return power_id;
        };
        for rep in &self.powers.get(power_id).replace_by_effect {
            if entity.stats.effects.has_effect(&rep.effect_id, rep.count) {
                return rep.power_id;
            }
        }
        power_id
    }

    /// Count live summons bound to `power_id` against the power's limit.
    pub fn summon_limit_reached(&self, src: EntityId, power_id: PowerId) -> bool {
        let power = self.powers.get(power_id);
        let Some(entity) = self.entities.get(src) else {
            return true;
        };

        let max_summons = match power.spawn_limit.mode {
            SpawnLimitMode::Fixed => power.spawn_limit.qty,
            SpawnLimitMode::Stat => {
                let stat_val = entity.stats.get_primary(power.spawn_limit.stat);
                (stat_val / power.spawn_limit.every.max(1)) * power.spawn_limit.qty
            }
            SpawnLimitMode::Unlimited => return false,
        }
        .max(1);

        let mut live = 0;
        for id in &entity.stats.summons {
            if let Some(summon) = self.entities.get(*id) {
                let s = &summon.stats;
                if !s.corpse
                    && s.summoned_power_index == power_id
                    && s.cur_state != EntityState::Spawn
                    && s.cur_state != EntityState::Dead
                    && s.cur_state != EntityState::CritDead
                {
                    live += 1;
                }
            }
        }
        live >= max_summons
    }

    /// The §4.3 refusal ladder followed by kind dispatch. Returns false
    /// when the power could not be activated; the caller retries later.
    pub fn activate_power(&mut self, power_id: PowerId, src: EntityId, target: FPoint) -> bool {
        if power_id == POWER_NONE || power_id >= self.powers.powers.len() {
            return false;
        }

        // the caster's active effects may substitute the dispatched id
        let power_id = self.check_replace_by_effect(power_id, src);

        let refused = {
            let Some(entity) = self.entities.get(src) else {
                return false;
            };
            let stats = &entity.stats;
            let power = self.powers.get(power_id);

            !stats.alive
                // enemies are assumed to meet their own mana requirements
                || (stats.is_hero() && power.requires_mp > stats.mp)
                || (stats.hp > 0 && !power.sacrifice && power.requires_hp >= stats.hp)
                || power.meta_power
                || stats.effects.stun
                || (power.spawn_type == "untransform" && !stats.transformed)
                || (!power.requires_flags.is_empty()
                    && !stats.has_equip_flags(&power.requires_flags))
                || (stats.is_hero() && !self.check_required_items(power_id))
        };
        if refused {
            return false;
        }

        let power_kind = self.powers.get(power_id).kind;
        if power_kind == PowerKind::Spawn && self.summon_limit_reached(src, power_id) {
            return false;
        }
        if self.powers.get(power_id).buff_party && !self.check_party_members() {
            return false;
        }

        if power_kind == PowerKind::Block {
            return self.block_power(power_id, src);
        }

        if self.powers.get(power_id).script_trigger == Some(ScriptTrigger::Cast) {
            let pos = self.entities.get(src).map(|e| e.stats.pos).unwrap_or(target);
            let script = self.powers.get(power_id).script.clone();
            self.execute_script(&script, pos.x, pos.y);
        }

        match power_kind {
            PowerKind::Fixed | PowerKind::Effect => self.power_fixed(power_id, src, target),
            PowerKind::Missile => self.power_missile(power_id, src, target),
            PowerKind::Repeater => self.power_repeater(power_id, src, target),
            PowerKind::Spawn => self.power_spawn(power_id, src, target),
            PowerKind::Transform => self.power_transform(power_id, src, target),
            PowerKind::Block => unreachable!(),
        }
    }

    fn check_required_items(&self, power_id: PowerId) -> bool {
        for req in &self.powers.get(power_id).required_items {
            if req.equipped {
                if !self.inventory.equipped_has(req.id) {
                    return false;
                }
            } else if self.inventory.count(req.id) < req.quantity {
                return false;
            }
        }
        true
    }

    /// Remove mana, HP, and item charges. Equipped consumables queue at
    /// most one charge per item id per activation, first-registered wins.
    fn pay_power_cost(&mut self, power_id: PowerId, src: EntityId) {
        let power = self.powers.get(power_id).clone();
        let Some(entity) = self.entities.get_mut(src) else {
            return;
        };
        if entity.stats.is_hero() {
            entity.stats.mp -= power.requires_mp;
            for req in &power.required_items {
                if req.equipped {
                    if !self.powers.used_equipped_items.contains(&req.id) {
                        self.powers.used_equipped_items.push(req.id);
                    }
                } else {
                    for _ in 0..req.quantity {
                        self.powers.used_items.push(req.id);
                    }
                }
            }
        }
        entity.stats.hp = (entity.stats.hp - power.requires_hp).max(0);
    }

    fn play_power_sound(&mut self, power_id: PowerId) {
        let sfx = self.powers.get(power_id).sfx_index;
        if sfx != SOUND_NONE {
            self.mixer.play(sfx, "powers", None, false);
        }
    }

    /// Copy power and source attributes onto a fresh hazard.
    fn init_hazard(&mut self, power_id: PowerId, src: EntityId, target: FPoint) -> Hazard {
        let power = self.powers.get(power_id).clone();
        let (src_pos, src_dir, src_accuracy, src_crit, melee_range, flags_hero, flags_ally) = self
            .entities
            .get(src)
            .map(|e| {
                (
                    e.stats.pos,
                    e.stats.direction,
                    e.stats.get(emberfall_core::stats::Stat::Accuracy),
                    e.stats.get(emberfall_core::stats::Stat::Crit),
                    e.stats.melee_range,
                    e.stats.is_hero(),
                    e.stats.is_hero_ally(),
                )
            })
            .unwrap_or((target, 0, 0, 0, 1.0, false, false));

        let mut haz = Hazard::new(power_id, src);

        haz.source_type = power.source_type.unwrap_or(if flags_hero {
            SourceType::Hero
        } else if flags_ally {
            SourceType::Ally
        } else {
            SourceType::Enemy
        });
        haz.target_party = power.target_party;

        haz.crit_chance = src_crit;
        haz.accuracy = src_accuracy;

        if let Some(dt) = power.base_damage {
            let (min, max) = self
                .entities
                .get(src)
                .map(|e| (e.stats.damage_min(dt), e.stats.damage_max(dt)))
                .unwrap_or((0, 0));
            haz.dmg_min = min;
            haz.dmg_max = max;
        } else if power.mod_damage.mode == ModifierMode::Absolute {
            haz.dmg_min = power.mod_damage.min;
            haz.dmg_max = power.mod_damage.max;
        }

        if !power.animation_name.is_empty() {
            if let Some(set) = self.animations.load_set(&power.animation_name) {
                if let Some(def) = self
                    .animations
                    .get_set(set)
                    .and_then(|s| s.default_animation())
                {
                    haz.animation = Some(Animation::new(def));
                }
            }
        }

        if power.directional {
            haz.directional = true;
            haz.animation_kind = calc_direction(src_pos.x, src_pos.y, target.x, target.y) as u16;
        } else if power.visual_random > 0 {
            haz.animation_kind = self.rng.rand_index(power.visual_random as usize) as u16;
        } else if power.visual_option > 0 {
            haz.animation_kind = power.visual_option;
        }

        haz.base_lifespan = power.lifespan;
        haz.lifespan = power.lifespan;
        haz.on_floor = power.on_floor;
        haz.base_speed = power.speed;
        haz.complete_animation = power.complete_animation;

        haz.radius = power.radius;
        haz.trait_elemental = power.trait_elemental;
        haz.active = !power.no_attack;
        haz.multitarget = power.multitarget;
        haz.multihit = power.multihit;
        haz.expire_with_caster = power.expire_with_caster;
        haz.trait_armor_penetration = power.trait_armor_penetration;
        haz.trait_crits_impaired = power.trait_crits_impaired;
        haz.beacon = power.beacon;
        haz.hp_steal = power.hp_steal;
        haz.mp_steal = power.mp_steal;

        haz.pos = match power.starting_pos {
            StartingPos::Source => src_pos,
            StartingPos::Target => clamp_distance(power.target_range, src_pos, target),
            StartingPos::Melee => calc_vector(src_pos, src_dir, melee_range),
        };
        if power.target_neighbor > 0 {
            haz.pos = self.collision.get_random_neighbor(
                Point::from(src_pos),
                power.target_neighbor,
                MovementType::Normal,
                CollideType::NoEntity,
                &mut self.rng,
            );
        }
        if power.relative_pos {
            haz.relative_pos = true;
            haz.pos_offset = FPoint::new(src_pos.x - haz.pos.x, src_pos.y - haz.pos.y);
        }

        haz.missile = power.kind == PowerKind::Missile;
        haz.wall_reflect = power.wall_reflect;
        haz.walls_block_aoe = power.walls_block_aoe;

        haz.sfx_hit = power.sfx_hit;
        haz.sfx_hit_enable = power.sfx_hit_enable;

        haz
    }

    /// Self-targeted portion of a power: teleports, self effects, party
    /// buff queueing, and hazardless post chains.
    fn power_buff(&mut self, power_id: PowerId, src: EntityId, target: FPoint) {
        let power = self.powers.get(power_id).clone();

        if power.buff_teleport {
            let (src_pos, mt) = self
                .entities
                .get(src)
                .map(|e| (e.stats.pos, e.stats.movement_type))
                .unwrap_or((target, MovementType::Normal));
            let limit_target = clamp_distance(power.target_range, src_pos, target);
            let destination = if power.target_neighbor > 0 {
                let p = self.collision.get_random_neighbor(
                    Point::from(limit_target),
                    power.target_neighbor,
                    MovementType::Normal,
                    CollideType::Normal,
                    &mut self.rng,
                );
                if Point::from(p) == Point::from(limit_target) {
                    None
                } else {
                    Some(p)
                }
            } else {
                Some(limit_target)
            };
            // never teleport into a wall or off the map
            let destination = destination.filter(|d| {
                self.collision
                    .is_valid_position(d.x, d.y, mt, CollideType::NoEntity)
            });
            if let Some(dest) = destination {
                if let Some(e) = self.entities.get_mut(src) {
                    e.stats.teleportation = true;
                    e.stats.teleport_destination = dest;
                }
            }
        }

        let (is_hero, is_hero_ally, is_enemy_ally) = match self.entities.get(src) {
            Some(e) => (
                e.stats.is_hero(),
                e.stats.is_hero_ally(),
                e.stats.is_enemy_ally(),
            ),
            None => return,
        };

        if power.buff || (power.buff_party && (is_hero_ally || is_enemy_ally)) {
            let source_type = if is_hero {
                SourceType::Hero
            } else if is_hero_ally {
                SourceType::Ally
            } else {
                SourceType::Enemy
            };
            self.apply_post_effects(src, src, power_id, source_type);
        }

        if power.buff_party && !power.passive {
            if let Some(e) = self.entities.get_mut(src) {
                e.stats.party_buffs.push_back(power_id);
            }
        }

        // hazardless powers chain their post powers immediately;
        // otherwise the hazard chains them on hit
        if !power.use_hazard {
            let pos = self.entities.get(src).map(|e| e.stats.pos).unwrap_or(target);
            let chains: Vec<ChainPower> = power.chain(ChainKind::Post).copied().collect();
            for chain in chains {
                if chain.id != POWER_NONE && self.rng.percent_chance(chain.chance) {
                    self.activate_power(chain.id, src, pos);
                }
            }
        }
    }

    fn power_fixed(&mut self, power_id: PowerId, src: EntityId, target: FPoint) -> bool {
        let power = self.powers.get(power_id).clone();

        if power.use_hazard {
            let mut delay = 0;
            for _ in 0..power.count {
                let mut haz = self.init_hazard(power_id, src, target);
                haz.delay_frames = delay;
                delay += power.delay;
                haz.registry = self.hazards.new_registry();
                self.powers.hazard_queue.push_back(haz);
            }
        }

        self.power_buff(power_id, src, target);
        self.play_power_sound(power_id);
        self.pay_power_cost(power_id, src);
        true
    }

    fn power_missile(&mut self, power_id: PowerId, src: EntityId, target: FPoint) -> bool {
        let power = self.powers.get(power_id).clone();
        let src_pos = match self.entities.get(src) {
            Some(e) => e.stats.pos,
            None => return false,
        };
        let origin = if power.starting_pos == StartingPos::Target {
            target
        } else {
            src_pos
        };
        let theta = calc_theta(origin.x, origin.y, target.x, target.y);

        let mut delay = 0;
        for i in 0..power.count {
            let mut haz = self.init_hazard(power_id, src, target);

            let offset_angle = ((1.0 - power.count as f32) / 2.0 + i as f32)
                * (power.missile_angle as f32).to_radians();
            let variance = if power.angle_variance != 0 {
                let v = power.angle_variance as f32;
                self.rng.rand_float(-v, v).to_radians()
            } else {
                0.0
            };

            let speed_scale = if power.speed_variance != 0.0 {
                1.0 + self
                    .rng
                    .rand_float(-power.speed_variance, power.speed_variance)
            } else {
                1.0
            };
            haz.base_speed *= speed_scale;
            haz.set_angle(theta + offset_angle + variance);

            haz.delay_frames = delay;
            delay += power.delay;

            haz.registry = self.hazards.new_registry();
            self.powers.hazard_queue.push_back(haz);
        }

        self.pay_power_cost(power_id, src);
        self.play_power_sound(power_id);
        true
    }

    /// Hazards spaced along the line to the target, stopping at (and
    /// including) the first movement-blocking tile. The volley shares one
    /// hit registry through the first hazard.
    fn power_repeater(&mut self, power_id: PowerId, src: EntityId, target: FPoint) -> bool {
        let power = self.powers.get(power_id).clone();
        let src_pos = match self.entities.get(src) {
            Some(e) => e.stats.pos,
            None => return false,
        };

        self.pay_power_cost(power_id, src);

        let theta = calc_theta(src_pos.x, src_pos.y, target.x, target.y);
        let step = FPoint::new(power.speed * theta.cos(), power.speed * theta.sin());
        let mut cursor = src_pos;

        self.play_power_sound(power_id);

        let mut registry: Option<usize> = None;
        let mut delay = 0;
        for _ in 0..power.count {
            cursor.x += step.x;
            cursor.y += step.y;

            let mut haz = self.init_hazard(power_id, src, target);
            haz.pos = cursor;
            haz.delay_frames = delay;
            delay += power.delay;

            haz.registry = match registry {
                Some(r) => self.hazards.share_registry(r),
                None => {
                    let r = self.hazards.new_registry();
                    registry = Some(r);
                    r
                }
            };
            self.powers.hazard_queue.push_back(haz);

            // the volley travels only until it overlaps a wall
            if !self.collision.is_valid_position(
                cursor.x,
                cursor.y,
                MovementType::Normal,
                CollideType::NoEntity,
            ) {
                break;
            }
        }

        true
    }

    fn power_spawn(&mut self, power_id: PowerId, src: EntityId, target: FPoint) -> bool {
        let power = self.powers.get(power_id).clone();
        let (src_pos, src_dir, melee_range, is_hero, is_hero_ally) = match self.entities.get(src) {
            Some(e) => (
                e.stats.pos,
                e.stats.direction,
                e.stats.melee_range,
                e.stats.is_hero(),
                e.stats.is_hero_ally(),
            ),
            None => return false,
        };

        let mut pos = match power.starting_pos {
            StartingPos::Source => src_pos,
            StartingPos::Target => target,
            StartingPos::Melee => calc_vector(src_pos, src_dir, melee_range),
        };

        // fall back to a neighbor tile when the chosen tile is blocked
        let mut target_neighbor = power.target_neighbor;
        if !self.collision.is_empty(pos.x, pos.y) && target_neighbor < 1 {
            target_neighbor = 1;
        }
        if target_neighbor > 0 {
            pos = self.collision.get_random_neighbor(
                Point::from(src_pos),
                target_neighbor,
                MovementType::Normal,
                CollideType::Normal,
                &mut self.rng,
            );
        }
        if !self.collision.is_empty(pos.x, pos.y) {
            log::info!(
                "PowerManager: no free tile for spawn power {}, dropping spawn",
                power_id
            );
            return false;
        }

        let descriptor = SpawnDescriptor {
            category: power.spawn_type.clone(),
            pos,
            direction: calc_direction(src_pos.x, src_pos.y, target.x, target.y),
            summoner: Some(src),
            summon_power_index: power_id,
            hero_ally: is_hero || is_hero_ally,
            enemy_ally: !is_hero,
        };
        for _ in 0..power.count {
            self.powers.spawn_queue.push_back(descriptor.clone());
        }

        self.pay_power_cost(power_id, src);
        self.power_buff(power_id, src, target);
        self.play_power_sound(power_id);
        true
    }

    fn power_transform(&mut self, power_id: PowerId, src: EntityId, target: FPoint) -> bool {
        let power = self.powers.get(power_id).clone();
        let Some(entity) = self.entities.get(src) else {
            return false;
        };

        if entity.stats.transformed && power.spawn_type != "untransform" {
            self.msgs.log(
                "You are already transformed, untransform first.",
                LogKind::Unique,
            );
            return false;
        }

        if power.spawn_type == "untransform" && entity.stats.transformed {
            let pos = entity.stats.pos;
            self.collision.unblock(pos.x, pos.y);
            let valid = self.collision.is_valid_position(
                pos.x,
                pos.y,
                MovementType::Normal,
                CollideType::Hero,
            );
            if valid {
                if let Some(e) = self.entities.get_mut(src) {
                    e.stats.transform_duration = 0;
                    // untransform is applied on the next avatar tick
                    e.stats.transform_type = "untransform".to_string();
                }
            } else {
                self.msgs
                    .log("Could not untransform at this position.", LogKind::Unique);
                self.collision.block(pos.x, pos.y, false);
                return false;
            }
            self.collision.block(pos.x, pos.y, false);
        } else {
            if let Some(e) = self.entities.get_mut(src) {
                e.stats.transform_duration = if power.transform_duration == 0 {
                    // permanent transformation
                    -1
                } else {
                    power.transform_duration
                };
                e.stats.transform_duration_total = power.transform_duration;
                e.stats.transform_type = power.spawn_type.clone();
            }
        }

        self.power_buff(power_id, src, target);

        if let Some(e) = self.entities.get_mut(src) {
            e.stats.manual_untransform = power.manual_untransform;
            e.stats.transform_with_equipment = power.keep_equipment;
            e.stats.untransform_on_hit = power.untransform_on_hit;
        }

        self.play_power_sound(power_id);
        self.pay_power_cost(power_id, src);
        true
    }

    /// Stationary blocking. The attached effects carry the Block trigger
    /// so they can be cleared together when the stance ends.
    fn block_power(&mut self, power_id: PowerId, src: EntityId) -> bool {
        {
            let Some(entity) = self.entities.get_mut(src) else {
                return false;
            };
            if entity.stats.effects.triggered_block {
                return false;
            }
            entity.stats.effects.triggered_block = true;
            entity.stats.cur_state = EntityState::Block;
        }

        self.apply_post_effects_with_trigger(
            src,
            src,
            power_id,
            SourceType::Hero,
            Some(PassiveTrigger::Block),
        );
        self.play_power_sound(power_id);
        self.pay_power_cost(power_id, src);
        true
    }

    /// Apply a power's post-effect list to `target`, with magnitudes for
    /// shield/heal derived from the caster's mental damage.
    pub fn apply_post_effects(
        &mut self,
        target: EntityId,
        caster: EntityId,
        power_id: PowerId,
        source_type: SourceType,
    ) -> bool {
        let trigger = self.powers.get(power_id).passive_trigger;
        self.apply_post_effects_with_trigger(target, caster, power_id, source_type, trigger)
    }

    fn apply_post_effects_with_trigger(
        &mut self,
        target: EntityId,
        caster: EntityId,
        power_id: PowerId,
        source_type: SourceType,
        trigger: Option<PassiveTrigger>,
    ) -> bool {
        let power = self.powers.get(power_id).clone();
        let ment_index = self
            .settings
            .damage_type_index("ment")
            .unwrap_or(self.settings.damage_types.len().saturating_sub(1));

        for post in &power.post_effects {
            if !self.rng.percent_chance(post.chance) {
                continue;
            }

            let def = match self.powers.effect_def(&post.id) {
                Some(d) => d.clone(),
                None => {
                    // bare tags apply directly: post_effect=stun,... works
                    // without an [effect] section
                    match EffectKind::from_type_str(&post.id, &self.settings) {
                        Some(kind) => EffectDef::new(&post.id, kind),
                        None => {
                            log::error!("PowerManager: '{}' is not a valid effect", post.id);
                            continue;
                        }
                    }
                }
            };

            let mut magnitude = post.magnitude;
            match def.kind {
                EffectKind::Shield => {
                    // charge the shield from mental weapon damage
                    let ment_max = self
                        .entities
                        .get(caster)
                        .map(|e| e.stats.damage_max(ment_index))
                        .unwrap_or(0);
                    magnitude = match power.mod_damage.mode {
                        ModifierMode::Multiply => ment_max * power.mod_damage.min / 100,
                        ModifierMode::Add => ment_max + power.mod_damage.min,
                        ModifierMode::Absolute => self
                            .rng
                            .rand_between(power.mod_damage.min, power.mod_damage.max),
                    };
                    if let Some(e) = self.entities.get(target) {
                        self.combat_text.add_string(
                            &format!("+{} Shield", magnitude),
                            e.stats.pos,
                            CombatTextKind::Buff,
                        );
                    }
                }
                EffectKind::Heal => {
                    let (ment_min, ment_max) = self
                        .entities
                        .get(caster)
                        .map(|e| {
                            (
                                e.stats.damage_min(ment_index),
                                e.stats.damage_max(ment_index),
                            )
                        })
                        .unwrap_or((0, 0));
                    magnitude = self.rng.rand_between(ment_min, ment_max);
                    magnitude = match power.mod_damage.mode {
                        ModifierMode::Multiply => magnitude * power.mod_damage.min / 100,
                        ModifierMode::Add => magnitude + power.mod_damage.min,
                        ModifierMode::Absolute => self
                            .rng
                            .rand_between(power.mod_damage.min, power.mod_damage.max),
                    };
                    if let Some(e) = self.entities.get_mut(target) {
                        let max = e.stats.get(emberfall_core::stats::Stat::HpMax);
                        e.stats.hp = (e.stats.hp + magnitude).min(max);
                        self.combat_text.add_string(
                            &format!("+{} HP", magnitude),
                            e.stats.pos,
                            CombatTextKind::Buff,
                        );
                    }
                }
                EffectKind::Knockback => {
                    let caster_pos = self.entities.get(caster).map(|e| e.stats.pos);
                    if let (Some(cp), Some(e)) = (caster_pos, self.entities.get_mut(target)) {
                        if e.stats.speed_default == 0.0 {
                            // immobile creatures can't be pushed
                            continue;
                        }
                        e.stats.knockback_srcpos = cp;
                        e.stats.knockback_destpos = e.stats.pos;
                    }
                }
                _ => {}
            }

            let animation = if def.animation.is_empty() {
                None
            } else {
                let name = def.animation.clone();
                self.animations.load_set(&name).and_then(|set| {
                    self.animations
                        .get_set(set)
                        .and_then(|s| s.default_animation())
                        .map(Animation::new)
                })
            };

            let passive_id = if power.passive { power_id } else { 0 };
            if let Some(e) = self.entities.get_mut(target) {
                e.stats.effects.add_effect(
                    &def,
                    AddEffectParams {
                        duration: post.duration,
                        magnitude,
                        from_item: false,
                        trigger,
                        passive_id,
                        source_type,
                    },
                    animation,
                );
            }
        }
        true
    }

    /// Arm and fire the entity's passive powers whose trigger condition
    /// currently holds.
    pub fn activate_passives(&mut self, src: EntityId) {
        let Some(entity) = self.entities.get(src) else {
            return;
        };
        let candidates: Vec<PowerId> = entity
            .stats
            .powers_passive
            .iter()
            .chain(entity.stats.powers_list_items.iter())
            .copied()
            .collect();

        let mut triggered_others = false;
        for power_id in candidates {
            if !self.powers.is_valid(power_id) || !self.powers.get(power_id).passive {
                continue;
            }
            let trigger = self.powers.get(power_id).passive_trigger;
            let Some(entity) = self.entities.get_mut(src) else {
                return;
            };
            let hp = entity.stats.hp;
            let hp_max = entity.stats.get(emberfall_core::stats::Stat::HpMax);
            let in_combat = entity.stats.in_combat;
            let fx = &mut entity.stats.effects;

            match trigger {
                None => {
                    if fx.triggered_others {
                        continue;
                    }
                    triggered_others = true;
                }
                Some(PassiveTrigger::Block) => {
                    if !fx.triggered_block {
                        continue;
                    }
                }
                Some(PassiveTrigger::Hit) => {
                    if !fx.triggered_hit {
                        continue;
                    }
                }
                Some(PassiveTrigger::HalfDead) => {
                    if !fx.triggered_halfdead {
                        if hp > hp_max / 2 {
                            continue;
                        }
                        fx.triggered_halfdead = true;
                    }
                }
                Some(PassiveTrigger::JoinCombat) => {
                    if !fx.triggered_joincombat {
                        if !in_combat {
                            continue;
                        }
                        fx.triggered_joincombat = true;
                    }
                }
                Some(PassiveTrigger::Death) => {
                    if !fx.triggered_death {
                        continue;
                    }
                }
            }

            let pos = self.entities.get(src).map(|e| e.stats.pos).unwrap_or_default();
            self.activate_power(power_id, src, pos);
            if let Some(e) = self.entities.get_mut(src) {
                e.stats.refresh_stats = true;
            }
        }

        if let Some(e) = self.entities.get_mut(src) {
            if triggered_others {
                e.stats.effects.triggered_others = true;
            }
            // hit and death triggers re-arm; block clears on unblock
            e.stats.effects.triggered_hit = false;
            e.stats.effects.triggered_death = false;
        }
    }

    /// Used when a power is unlocked outside combat flow.
    pub fn activate_single_passive(&mut self, src: EntityId, power_id: PowerId) {
        if !self.powers.is_valid(power_id) {
            return;
        }
        let power = self.powers.get(power_id);
        if !power.passive || power.passive_trigger.is_some() {
            return;
        }
        let pos = self.entities.get(src).map(|e| e.stats.pos).unwrap_or_default();
        self.activate_power(power_id, src, pos);
        if let Some(e) = self.entities.get_mut(src) {
            e.stats.refresh_stats = true;
            e.stats.effects.triggered_others = true;
        }
    }

    /// Drain one entity's queued party buffs onto qualifying allies.
    pub fn drain_party_buffs(&mut self, src: EntityId) {
        loop {
            let power_id = match self.entities.get_mut(src) {
                Some(e) => match e.stats.party_buffs.pop_front() {
                    Some(p) => p,
                    None => return,
                },
                None => return,
            };
            let (src_is_hero, source_type) = match self.entities.get(src) {
                Some(e) => (
                    e.stats.is_hero(),
                    if e.stats.is_hero() {
                        SourceType::Hero
                    } else {
                        SourceType::Enemy
                    },
                ),
                None => return,
            };
            let buff_power_filter = self.powers.get(power_id).buff_party_power_id;

            for id in self.entities.ids() {
                if id == src {
                    continue;
                }
                let Some(e) = self.entities.get(id) else {
                    continue;
                };
                let s = &e.stats;
                if s.hp <= 0 {
                    continue;
                }
                let qualifies = (s.is_hero_ally() && src_is_hero)
                    || (s.is_enemy_ally() && s.summoner == Some(src));
                if !qualifies {
                    continue;
                }
                if buff_power_filter != POWER_NONE && buff_power_filter != s.summoned_power_index {
                    continue;
                }
                self.apply_post_effects(id, src, power_id, source_type);
            }
        }
    }

    /// Queued teleport handling for any entity (upkeep step).
    pub fn handle_teleport(&mut self, src: EntityId) {
        let Some(e) = self.entities.get_mut(src) else {
            return;
        };
        if !e.stats.teleportation {
            return;
        }
        let old = e.stats.pos;
        let dest = e.stats.teleport_destination;
        let is_ally = e.stats.is_hero_ally();
        e.stats.pos = dest;
        e.stats.teleportation = false;
        self.collision.unblock(old.x, old.y);
        self.collision.block(dest.x, dest.y, is_ally);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_modifier_modes() {
        let mult = StatModifier {
            mode: ModifierMode::Multiply,
            min: 150,
            max: 150,
        };
        assert_eq!(mult.apply(10), 15);
        let add = StatModifier {
            mode: ModifierMode::Add,
            min: 5,
            max: 5,
        };
        assert_eq!(add.apply(10), 15);
        let abs = StatModifier {
            mode: ModifierMode::Absolute,
            min: 7,
            max: 9,
        };
        assert_eq!(abs.apply(10), 7);
    }

    #[test]
    fn verify_id_substitutes_zero() {
        let pm = PowerManager::default();
        assert_eq!(pm.verify_id(5, "test"), POWER_NONE);
        assert_eq!(pm.verify_id(-1, "test"), POWER_NONE);
        assert_eq!(pm.verify_id(0, "test"), POWER_NONE);
    }

    #[test]
    fn load_powers_from_text() {
        use std::io::Write;
        let dir = std::env::temp_dir().join("emberfall_powers_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("powers.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            "[power]\nid=1\ntype=missile\nname=Firebolt\ncount=3\nspeed=12\n\
             lifespan=40\nradius=0.5\nbase_damage=ranged\nmissile_angle=15\n\
             use_hazard=true\nrequires_mp=2\ncooldown=500ms\npost_power=2,50\n\
             trait_elemental=fire\n\
             [power]\nid=2\ntype=fixed\nname=Burn\nuse_hazard=true\nlifespan=2s\n"
        )
        .unwrap();

        let mut settings = EngineSettings::default();
        settings.elements.push(emberfall_core::settings::ElementDef {
            id: "fire".into(),
            name: "Fire".into(),
        });
        let mut sounds = SoundCatalog::new();
        let mut pm = PowerManager::default();
        pm.load_powers(&path, &settings, &mut sounds).unwrap();

        assert_eq!(pm.powers.len(), 3);
        let p = pm.get(1);
        assert_eq!(p.kind, PowerKind::Missile);
        assert_eq!(p.count, 3);
        assert_eq!(p.base_damage, Some(1));
        assert_eq!(p.lifespan, 40);
        assert_eq!(p.cooldown, 30);
        assert_eq!(p.trait_elemental, Some(0));
        // speed is authored in tiles/second, stored per tick
        assert!((p.speed - 0.2).abs() < 1e-5);
        let chain: Vec<_> = p.chain(ChainKind::Post).collect();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].id, 2);
        assert_eq!(chain[0].chance, 50);
        assert_eq!(pm.get(2).lifespan, 120);
    }

    #[test]
    fn chain_ids_out_of_range_collapse_to_zero() {
        use std::io::Write;
        let dir = std::env::temp_dir().join("emberfall_powers_verify");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("powers.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "[power]\nid=1\ntype=fixed\npost_power=99\n").unwrap();

        let settings = EngineSettings::default();
        let mut sounds = SoundCatalog::new();
        let mut pm = PowerManager::default();
        pm.load_powers(&path, &settings, &mut sounds).unwrap();
        assert_eq!(pm.get(1).chain_powers[0].id, POWER_NONE);
    }

    #[test]
    fn load_effects_from_text() {
        use std::io::Write;
        let dir = std::env::temp_dir().join("emberfall_effects_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("effects.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            "[effect]\nid=burning\ntype=damage\ncan_stack=false\n\
             [effect]\nid=barrier\ntype=shield\ngroup_stack=true\nmax_stacks=3\n\
             [effect]\nid=bogus\ntype=not_a_type\n"
        )
        .unwrap();

        let settings = EngineSettings::default();
        let mut pm = PowerManager::default();
        pm.load_effects(&path, &settings).unwrap();
        assert_eq!(pm.effects.len(), 3);
        assert_eq!(pm.effect_def("burning").unwrap().kind, EffectKind::Damage);
        assert!(pm.effect_def("barrier").unwrap().group_stack);
    }
}
