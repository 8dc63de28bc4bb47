//! Power dispatch flows: blocking, post effects, chains, steals,
//! passives, party buffs, spawns, and wall behavior.

use emberfall_core::geometry::FPoint;
use emberfall_core::settings::EngineSettings;
use emberfall_core::stats::{Stat, STAT_COUNT};

use emberfall_engine::collision::TileCollision;
use emberfall_engine::effects::{EffectDef, EffectKind, PassiveTrigger, SourceType};
use emberfall_engine::entity::Entity;
use emberfall_engine::hazards::Hazard;
use emberfall_engine::ids::EntityId;
use emberfall_engine::powers::{
    ChainKind, ChainPower, ModifierMode, PostEffect, PowerDef, PowerKind, StatModifier,
};
use emberfall_engine::session::GameSession;
use emberfall_engine::stat_block::{EntityFlags, EntityState, StatBlock};

fn session() -> GameSession {
    let mut s = GameSession::new_headless(EngineSettings::default(), 11, 20, 20);
    let hero = s.hero;
    if let Some(e) = s.entities.get_mut(hero) {
        e.stats.starting[Stat::HpMax as usize] = 100;
        e.stats.starting[Stat::MpMax as usize] = 30;
        e.stats.starting[Stat::Accuracy as usize] = 100;
        // mental damage pair feeds shields and heals
        e.stats.starting[STAT_COUNT + 4] = 12;
        e.stats.starting[STAT_COUNT + 5] = 12;
        let settings = EngineSettings::default();
        e.stats.recalc(&settings);
        e.stats.pos = FPoint::new(10.5, 10.5);
    }
    s
}

fn add_enemy(s: &mut GameSession, pos: FPoint) -> EntityId {
    let mut stats = StatBlock::new(&s.settings);
    stats.starting[Stat::HpMax as usize] = 60;
    stats.recalc(&s.settings);
    stats.pos = pos;
    s.entities.insert(Entity::new(stats))
}

#[test]
fn block_power_applies_trigger_effects_and_clears_on_unblock() {
    let mut s = session();
    let hero = s.hero;

    let mut p = PowerDef::empty(1);
    p.is_empty = false;
    p.kind = PowerKind::Block;
    p.post_effects.push(PostEffect {
        id: "absorb_min".to_string(),
        magnitude: 5,
        duration: 0,
        chance: 100,
    });
    s.powers.powers.push(p);

    assert!(s.activate_power(1, hero, FPoint::new(10.5, 10.5)));
    {
        let stats = &s.entities.get(hero).unwrap().stats;
        assert!(stats.effects.triggered_block);
        assert_eq!(stats.cur_state, EntityState::Block);
        assert!(stats
            .effects
            .effects
            .iter()
            .any(|e| e.trigger == Some(PassiveTrigger::Block)));
    }

    // a second block while already blocking is refused
    assert!(!s.activate_power(1, hero, FPoint::new(10.5, 10.5)));

    // ending the block clears the trigger-bound effects together
    if let Some(e) = s.entities.get_mut(hero) {
        e.stats.effects.triggered_block = false;
        e.stats
            .effects
            .clear_trigger_effects(PassiveTrigger::Block);
        e.stats.cur_state = EntityState::Stance;
    }
    assert!(s.entities.get(hero).unwrap().stats.effects.effects.is_empty());
}

#[test]
fn shield_post_effect_charges_from_mental_damage() {
    let mut s = session();
    let hero = s.hero;

    s.powers.effects.push(EffectDef::new("barrier", EffectKind::Shield));

    let mut p = PowerDef::empty(1);
    p.is_empty = false;
    p.kind = PowerKind::Effect;
    p.buff = true;
    p.mod_damage = StatModifier {
        mode: ModifierMode::Multiply,
        min: 150,
        max: 150,
    };
    p.post_effects.push(PostEffect {
        id: "barrier".to_string(),
        magnitude: 0,
        duration: 0,
        chance: 100,
    });
    s.powers.powers.push(p);

    assert!(s.activate_power(1, hero, FPoint::new(10.5, 10.5)));
    let stats = &s.entities.get(hero).unwrap().stats;
    // 12 mental max * 150% = 18
    assert_eq!(stats.effects.effects[0].magnitude, 18);
    assert!(s
        .combat_text
        .entries()
        .iter()
        .any(|t| t.text.contains("Shield")));
}

#[test]
fn mp_cost_is_charged_and_refused_when_short() {
    let mut s = session();
    let hero = s.hero;

    let mut p = PowerDef::empty(1);
    p.is_empty = false;
    p.kind = PowerKind::Fixed;
    p.requires_mp = 20;
    s.powers.powers.push(p);

    assert!(s.activate_power(1, hero, FPoint::new(10.5, 10.5)));
    assert_eq!(s.entities.get(hero).unwrap().stats.mp, 10);
    // 10 left, 20 required
    assert!(!s.activate_power(1, hero, FPoint::new(10.5, 10.5)));
}

#[test]
fn stunned_caster_cannot_activate() {
    let mut s = session();
    let hero = s.hero;
    let mut p = PowerDef::empty(1);
    p.is_empty = false;
    p.kind = PowerKind::Fixed;
    s.powers.powers.push(p);

    s.entities.get_mut(hero).unwrap().stats.effects.stun = true;
    assert!(!s.activate_power(1, hero, FPoint::new(10.5, 10.5)));
}

#[test]
fn replace_by_effect_substitutes_on_enough_stacks() {
    let mut s = session();
    let hero = s.hero;

    let mut base = PowerDef::empty(1);
    base.is_empty = false;
    base.kind = PowerKind::Fixed;
    base.replace_by_effect
        .push(emberfall_engine::powers::PowerReplaceByEffect {
            power_id: 2,
            effect_id: "charged".to_string(),
            count: 2,
        });
    s.powers.powers.push(base);

    let mut upgraded = PowerDef::empty(2);
    upgraded.is_empty = false;
    upgraded.kind = PowerKind::Fixed;
    s.powers.powers.push(upgraded);

    assert_eq!(s.check_replace_by_effect(1, hero), 1);

    let def = EffectDef::new("charged", EffectKind::Stat(0));
    let params = emberfall_engine::effects::AddEffectParams {
        duration: 100,
        magnitude: 1,
        from_item: false,
        trigger: None,
        passive_id: 0,
        source_type: SourceType::Hero,
    };
    let fx = &mut s.entities.get_mut(hero).unwrap().stats.effects;
    fx.add_effect(&def, params, None);
    fx.add_effect(&def, params, None);

    assert_eq!(s.check_replace_by_effect(1, hero), 2);
}

#[test]
fn hp_steal_feeds_the_attacker() {
    let mut s = session();
    let hero = s.hero;
    let enemy = add_enemy(&mut s, FPoint::new(12.5, 10.5));

    // wound the hero so the steal is visible
    s.entities.get_mut(hero).unwrap().stats.hp = 50;

    let mut p = PowerDef::empty(1);
    p.is_empty = false;
    p.kind = PowerKind::Fixed;
    p.use_hazard = true;
    p.hp_steal = 50;
    p.mod_damage = StatModifier {
        mode: ModifierMode::Absolute,
        min: 20,
        max: 20,
    };
    s.powers.powers.push(p);

    let mut haz = Hazard::new(1, hero);
    haz.pos = FPoint::new(12.5, 10.5);
    haz.accuracy = 100;
    haz.hp_steal = 50;
    haz.registry = s.hazards.new_registry();
    s.hazards.hazards.push(haz);

    assert!(s.take_hit(enemy, 0));
    assert_eq!(s.entities.get(enemy).unwrap().stats.hp, 40);
    // stole 50% of 20 damage
    assert_eq!(s.entities.get(hero).unwrap().stats.hp, 60);
}

#[test]
fn return_damage_strikes_the_attacker_back() {
    let mut s = session();
    let hero = s.hero;
    let enemy = add_enemy(&mut s, FPoint::new(12.5, 10.5));
    if let Some(e) = s.entities.get_mut(enemy) {
        e.stats.starting[Stat::ReturnDamage as usize] = 50;
        let settings = EngineSettings::default();
        e.stats.recalc(&settings);
    }

    let mut p = PowerDef::empty(1);
    p.is_empty = false;
    p.kind = PowerKind::Fixed;
    p.use_hazard = true;
    p.mod_damage = StatModifier {
        mode: ModifierMode::Absolute,
        min: 20,
        max: 20,
    };
    s.powers.powers.push(p);

    let mut haz = Hazard::new(1, hero);
    haz.pos = FPoint::new(12.5, 10.5);
    haz.accuracy = 100;
    haz.registry = s.hazards.new_registry();
    s.hazards.hazards.push(haz);

    assert!(s.take_hit(enemy, 0));
    assert_eq!(s.entities.get(enemy).unwrap().stats.hp, 40);
    assert_eq!(s.entities.get(hero).unwrap().stats.hp, 90);
}

#[test]
fn passive_powers_fire_once_until_rearmed() {
    let mut s = session();
    let hero = s.hero;

    s.powers.effects.push(EffectDef::new("tough", EffectKind::Stat(0)));
    let mut p = PowerDef::empty(1);
    p.is_empty = false;
    p.kind = PowerKind::Effect;
    p.passive = true;
    p.buff = true;
    p.post_effects.push(PostEffect {
        id: "tough".to_string(),
        magnitude: 3,
        duration: 0,
        chance: 100,
    });
    s.powers.powers.push(p);

    s.entities.get_mut(hero).unwrap().stats.powers_passive.push(1);

    s.activate_passives(hero);
    s.activate_passives(hero);
    // one instance despite two passes
    let stats = &s.entities.get(hero).unwrap().stats;
    assert_eq!(
        stats
            .effects
            .effects
            .iter()
            .filter(|e| e.id == "tough")
            .count(),
        1
    );
    assert!(stats.effects.triggered_others);
}

#[test]
fn half_dead_passive_waits_for_the_threshold() {
    let mut s = session();
    let hero = s.hero;

    s.powers.effects.push(EffectDef::new("rage", EffectKind::Stat(0)));
    let mut p = PowerDef::empty(1);
    p.is_empty = false;
    p.kind = PowerKind::Effect;
    p.passive = true;
    p.buff = true;
    p.passive_trigger = Some(PassiveTrigger::HalfDead);
    p.post_effects.push(PostEffect {
        id: "rage".to_string(),
        magnitude: 10,
        duration: 0,
        chance: 100,
    });
    s.powers.powers.push(p);
    s.entities.get_mut(hero).unwrap().stats.powers_passive.push(1);

    s.activate_passives(hero);
    assert!(s.entities.get(hero).unwrap().stats.effects.effects.is_empty());

    s.entities.get_mut(hero).unwrap().stats.hp = 40;
    s.activate_passives(hero);
    let stats = &s.entities.get(hero).unwrap().stats;
    assert_eq!(stats.effects.effects.len(), 1);
    assert!(stats.effects.triggered_halfdead);
}

#[test]
fn spawn_power_queues_and_links_summons() {
    let dir = std::env::temp_dir().join("emberfall_power_spawn");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("wolf.txt"),
        "name=Wolf\nlevel=1\ncategories=wolf\nhp=20\nspeed=3\nanimations=\n",
    )
    .unwrap();

    let mut s = session();
    s.creatures =
        emberfall_engine::entity_manager::CreatureCatalog::load(&dir, &s.settings);
    let hero = s.hero;

    let mut p = PowerDef::empty(1);
    p.is_empty = false;
    p.kind = PowerKind::Spawn;
    p.spawn_type = "wolf".to_string();
    p.count = 2;
    s.powers.powers.push(p);

    assert!(s.activate_power(1, hero, FPoint::new(11.5, 10.5)));
    assert_eq!(s.powers.spawn_queue.len(), 2);

    s.handle_spawn();
    let hero_summons = s.entities.get(hero).unwrap().stats.summons.clone();
    assert_eq!(hero_summons.len(), 2);
    for id in hero_summons {
        let e = s.entities.get(id).unwrap();
        assert!(e.stats.flags.contains(EntityFlags::SUMMONED));
        assert!(e.stats.is_hero_ally());
        assert_eq!(e.stats.summoner, Some(hero));
        assert_eq!(e.stats.cur_state, EntityState::Spawn);
    }
}

#[test]
fn spawn_limit_counts_live_summons() {
    let dir = std::env::temp_dir().join("emberfall_power_spawn_limit");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("imp.txt"),
        "name=Imp\nlevel=1\ncategories=imp\nhp=10\nspeed=3\nanimations=\n",
    )
    .unwrap();

    let mut s = session();
    s.creatures =
        emberfall_engine::entity_manager::CreatureCatalog::load(&dir, &s.settings);
    let hero = s.hero;

    let mut p = PowerDef::empty(1);
    p.is_empty = false;
    p.kind = PowerKind::Spawn;
    p.spawn_type = "imp".to_string();
    p.count = 1;
    p.spawn_limit = emberfall_engine::powers::SpawnLimit {
        mode: emberfall_engine::powers::SpawnLimitMode::Fixed,
        qty: 1,
        every: 1,
        stat: 0,
    };
    s.powers.powers.push(p);

    assert!(s.activate_power(1, hero, FPoint::new(11.5, 10.5)));
    s.handle_spawn();
    // leave the spawn animation so the summon counts as live
    let summon = s.entities.get(hero).unwrap().stats.summons[0];
    s.entities.get_mut(summon).unwrap().stats.cur_state = EntityState::Stance;

    assert!(s.summon_limit_reached(hero, 1));
    assert!(!s.activate_power(1, hero, FPoint::new(11.5, 10.5)));
}

#[test]
fn wall_chain_power_fires_on_impact() {
    let mut s = session();
    let hero = s.hero;
    // wall to the east
    for y in 0..20 {
        s.collision.set_cell(14, y, TileCollision::WallAll);
    }

    // the chained burst just charges the caster's shield so we can
    // observe that it fired
    s.powers.effects.push(EffectDef::new("mark", EffectKind::Stat(0)));
    let mut burst = PowerDef::empty(2);
    burst.is_empty = false;
    burst.kind = PowerKind::Effect;
    burst.buff = true;
    burst.post_effects.push(PostEffect {
        id: "mark".to_string(),
        magnitude: 1,
        duration: 0,
        chance: 100,
    });

    let mut bolt = PowerDef::empty(1);
    bolt.is_empty = false;
    bolt.kind = PowerKind::Missile;
    bolt.use_hazard = true;
    bolt.count = 1;
    bolt.speed = 1.0;
    bolt.lifespan = 60;
    bolt.radius = 0.5;
    bolt.chain_powers.push(ChainPower {
        kind: ChainKind::Wall,
        id: 2,
        chance: 100,
    });

    s.powers.powers.push(bolt);
    s.powers.powers.push(burst);

    assert!(s.activate_power(1, hero, FPoint::new(18.5, 10.5)));
    for _ in 0..10 {
        s.hazards_logic();
    }

    let stats = &s.entities.get(hero).unwrap().stats;
    assert!(stats.effects.effects.iter().any(|e| e.id == "mark"));
}

#[test]
fn expire_chain_fires_when_lifespan_runs_out() {
    let mut s = session();
    let hero = s.hero;

    s.powers.effects.push(EffectDef::new("echo", EffectKind::Stat(0)));
    let mut echo = PowerDef::empty(2);
    echo.is_empty = false;
    echo.kind = PowerKind::Effect;
    echo.buff = true;
    echo.post_effects.push(PostEffect {
        id: "echo".to_string(),
        magnitude: 1,
        duration: 0,
        chance: 100,
    });

    let mut field = PowerDef::empty(1);
    field.is_empty = false;
    field.kind = PowerKind::Fixed;
    field.use_hazard = true;
    field.lifespan = 3;
    field.no_attack = true;
    field.chain_powers.push(ChainPower {
        kind: ChainKind::Expire,
        id: 2,
        chance: 100,
    });

    s.powers.powers.push(field);
    s.powers.powers.push(echo);

    assert!(s.activate_power(1, hero, FPoint::new(10.5, 10.5)));
    for _ in 0..6 {
        s.hazards_logic();
    }

    assert!(s.hazards.hazards.is_empty());
    let stats = &s.entities.get(hero).unwrap().stats;
    assert!(stats.effects.effects.iter().any(|e| e.id == "echo"));
}

#[test]
fn wall_reflect_bounces_instead_of_dying() {
    let mut s = session();
    let hero = s.hero;
    for y in 0..20 {
        s.collision.set_cell(13, y, TileCollision::WallAll);
    }

    let mut p = PowerDef::empty(1);
    p.is_empty = false;
    p.kind = PowerKind::Missile;
    p.use_hazard = true;
    p.count = 1;
    p.speed = 1.0;
    p.lifespan = 30;
    p.radius = 0.5;
    p.wall_reflect = true;
    s.powers.powers.push(p);

    assert!(s.activate_power(1, hero, FPoint::new(18.5, 10.5)));
    for _ in 0..6 {
        s.hazards_logic();
    }

    assert_eq!(s.hazards.hazards.len(), 1);
    // bounced: now heading back west
    assert!(s.hazards.hazards[0].speed.x < 0.0);
    assert!(s.hazards.hazards[0].lifespan > 0);
}

#[test]
fn party_buffs_reach_living_summons() {
    let dir = std::env::temp_dir().join("emberfall_party_buff");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("sprite.txt"),
        "name=Sprite\nlevel=1\ncategories=sprite\nhp=15\nspeed=3\nanimations=\n",
    )
    .unwrap();

    let mut s = session();
    s.creatures =
        emberfall_engine::entity_manager::CreatureCatalog::load(&dir, &s.settings);
    let hero = s.hero;

    let mut summon = PowerDef::empty(1);
    summon.is_empty = false;
    summon.kind = PowerKind::Spawn;
    summon.spawn_type = "sprite".to_string();
    summon.count = 1;
    s.powers.powers.push(summon);

    s.powers.effects.push(EffectDef::new("warded", EffectKind::Stat(0)));
    let mut banner = PowerDef::empty(2);
    banner.is_empty = false;
    banner.kind = PowerKind::Effect;
    banner.buff_party = true;
    banner.post_effects.push(PostEffect {
        id: "warded".to_string(),
        magnitude: 2,
        duration: 0,
        chance: 100,
    });
    s.powers.powers.push(banner);

    assert!(s.activate_power(1, hero, FPoint::new(11.5, 10.5)));
    s.handle_spawn();
    let summon_id = s.entities.get(hero).unwrap().stats.summons[0];

    // party buff requires a living party member and lands on them
    assert!(s.activate_power(2, hero, FPoint::new(10.5, 10.5)));
    s.drain_party_buffs(hero);

    let buffed = s
        .entities
        .get(summon_id)
        .unwrap()
        .stats
        .effects
        .effects
        .iter()
        .any(|e| e.id == "warded");
    assert!(buffed);
}
