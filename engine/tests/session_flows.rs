//! Session-level flows: map loading with events, teleports, the
//! transform round trip, and save emission.

use std::io::Write;
use std::path::PathBuf;

use emberfall_core::geometry::FPoint;
use emberfall_core::settings::EngineSettings;
use emberfall_core::stats::Stat;

use emberfall_engine::collision::TileCollision;
use emberfall_engine::events::EventActivate;
use emberfall_engine::powers::{PowerDef, PowerKind};
use emberfall_engine::session::GameSession;

fn data_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("emberfall_flows").join(name);
    std::fs::create_dir_all(dir.join("maps")).unwrap();
    std::fs::create_dir_all(dir.join("enemies")).unwrap();
    dir
}

fn write_file(dir: &PathBuf, rel: &str, content: &str) {
    let path = dir.join(rel);
    let mut f = std::fs::File::create(path).unwrap();
    f.write_all(content.as_bytes()).unwrap();
}

#[test]
fn map_load_fires_onload_events_and_spawns_enemies() {
    let dir = data_dir("onload");
    write_file(
        &dir,
        "enemies/rat.txt",
        "name=Rat\nlevel=1\ncategories=vermin\nhp=8\nspeed=2\nanimations=\n",
    );
    write_file(
        &dir,
        "maps/cellar.txt",
        "[header]\nwidth=10\nheight=10\nhero_pos=1,1\n\
         [layer]\ntype=collision\nformat=dec\ndata=\n\
         0,0,0,0,0,0,0,0,0,0,\n0,0,0,0,0,0,0,0,0,0,\n0,0,0,0,0,0,0,0,0,0,\n\
         0,0,0,0,0,0,0,0,0,0,\n0,0,0,0,0,0,0,0,0,0,\n0,0,0,0,0,0,0,0,0,0,\n\
         0,0,0,0,0,0,0,0,0,0,\n0,0,0,0,0,0,0,0,0,0,\n0,0,0,0,0,0,0,0,0,0,\n\
         0,0,0,0,0,0,0,0,0,0,\n\
         [enemy]\ncategory=vermin\nnumber=3\nlocation=5,5,4,4\nchance=100\n\
         [event]\nactivate=on_load\nlocation=0,0,1,1\nset_status=entered_cellar\nrepeat=false\n",
    );

    let mut s = GameSession::new_headless(EngineSettings::default(), 5, 4, 4);
    s.data_dir = dir.clone();
    s.creatures = emberfall_engine::entity_manager::CreatureCatalog::load(
        &dir.join("enemies"),
        &s.settings,
    );

    s.load_map(&dir.join("maps/cellar.txt"), None).unwrap();

    assert!(s.campaign.check_status("entered_cellar"));
    // one-shot on_load event is discarded
    assert!(s
        .events
        .events
        .iter()
        .all(|e| e.activate != EventActivate::OnLoad));
    // the three rats spawned as live entities (hero + 3)
    assert_eq!(s.entities.len(), 4);
    assert_eq!(
        s.entities.get(s.hero).unwrap().stats.pos,
        FPoint::new(1.5, 1.5)
    );
}

#[test]
fn trigger_event_modifies_collision_and_teleports() {
    let dir = data_dir("trigger");
    write_file(
        &dir,
        "maps/hall.txt",
        "[header]\nwidth=6\nheight=6\nhero_pos=1,1\n\
         [layer]\ntype=collision\nformat=dec\ndata=\n\
         0,0,0,0,0,0,\n0,0,0,0,0,0,\n0,0,0,0,0,0,\n\
         0,0,0,0,1,0,\n0,0,0,0,0,0,\n0,0,0,0,0,0,\n\
         [event]\nactivate=on_trigger\nlocation=2,1,1,1\nmapmod=collision,4,3,0\nrepeat=false\n",
    );

    let mut s = GameSession::new_headless(EngineSettings::default(), 5, 4, 4);
    s.data_dir = dir.clone();
    s.load_map(&dir.join("maps/hall.txt"), None).unwrap();

    assert_eq!(s.collision.cell_at(4, 3), TileCollision::WallAll);

    // walk the hero onto the trigger tile
    let hero = s.hero;
    if let Some(e) = s.entities.get_mut(hero) {
        e.stats.pos = FPoint::new(2.5, 1.5);
    }
    s.check_events_at_hero();

    assert_eq!(s.collision.cell_at(4, 3), TileCollision::Empty);
    // one-shot event removed
    assert!(s.events.events.is_empty());
}

#[test]
fn transform_swaps_stats_and_restores_exactly() {
    let dir = data_dir("transform");
    write_file(
        &dir,
        "enemies/bear.txt",
        "name=Bear\nlevel=1\ncategories=bear\nhp=200\nspeed=3\n\
         dmg_melee_min=8\ndmg_melee_max=12\nanimations=\n",
    );

    let mut s = GameSession::new_headless(EngineSettings::default(), 5, 16, 16);
    s.creatures = emberfall_engine::entity_manager::CreatureCatalog::load(
        &dir.join("enemies"),
        &s.settings,
    );
    let hero = s.hero;
    if let Some(e) = s.entities.get_mut(hero) {
        e.stats.starting[Stat::HpMax as usize] = 100;
        e.stats.starting[Stat::Accuracy as usize] = 77;
        let settings = EngineSettings::default();
        e.stats.recalc(&settings);
    }
    let before_accuracy = s.entities.get(hero).unwrap().stats.get(Stat::Accuracy);
    let before_hp_max = s.entities.get(hero).unwrap().stats.get(Stat::HpMax);

    // transform power: 300 ticks as a bear
    let mut p = PowerDef::empty(1);
    p.is_empty = false;
    p.kind = PowerKind::Transform;
    p.spawn_type = "bear".to_string();
    p.transform_duration = 300;
    s.powers.powers.push(p);

    let target = s.entities.get(hero).unwrap().stats.pos;
    assert!(s.activate_power(1, hero, target));
    // the avatar tick applies the queued transform
    s.avatar_logic();

    {
        let stats = &s.entities.get(hero).unwrap().stats;
        assert!(stats.transformed);
        assert_eq!(stats.get(Stat::HpMax), 200);
        assert_eq!(stats.damage_max(0), 12);
        assert!(stats.is_hero());
    }

    // ride out the duration; the timer decrements in the stat upkeep
    for _ in 0..400 {
        s.avatar_logic();
    }

    let stats = &s.entities.get(hero).unwrap().stats;
    assert!(!stats.transformed);
    assert_eq!(stats.get(Stat::Accuracy), before_accuracy);
    assert_eq!(stats.get(Stat::HpMax), before_hp_max);
}

#[test]
fn untransform_on_invalid_tile_moves_to_saved_position() {
    let dir = data_dir("transform_water");
    write_file(
        &dir,
        "enemies/fish.txt",
        "name=Fish\nlevel=1\ncategories=fish\nhp=30\nspeed=3\nflying=true\nanimations=\n",
    );

    let mut s = GameSession::new_headless(EngineSettings::default(), 5, 16, 16);
    s.creatures = emberfall_engine::entity_manager::CreatureCatalog::load(
        &dir.join("enemies"),
        &s.settings,
    );
    // water everywhere east of x=8
    for y in 0..16 {
        for x in 8..16 {
            s.collision.set_cell(x, y, TileCollision::WallMovement);
        }
    }

    let hero = s.hero;
    if let Some(e) = s.entities.get_mut(hero) {
        e.stats.pos = FPoint::new(5.5, 5.5);
        e.stats.hp = 50;
    }

    let mut p = PowerDef::empty(1);
    p.is_empty = false;
    p.kind = PowerKind::Transform;
    p.spawn_type = "fish".to_string();
    p.transform_duration = 60;
    s.powers.powers.push(p);

    assert!(s.activate_power(1, hero, FPoint::new(5.5, 5.5)));
    s.avatar_logic();
    assert!(s.entities.get(hero).unwrap().stats.transformed);

    // swim out over the water, then let the transform expire
    for tick in 0..120 {
        if tick == 5 {
            if let Some(e) = s.entities.get_mut(hero) {
                e.stats.pos = FPoint::new(12.5, 5.5);
            }
        }
        s.avatar_logic();
    }

    let stats = &s.entities.get(hero).unwrap().stats;
    assert!(!stats.transformed);
    // moved back to the last valid position rather than stranded
    assert!(stats.pos.x < 8.0);
    // and the player was told about it
    assert!(s
        .msgs
        .entries()
        .iter()
        .any(|m| m.text.contains("moved back to a safe place")));
}

#[test]
fn intermap_teleport_loads_the_destination_map() {
    let dir = data_dir("teleport");
    write_file(
        &dir,
        "maps/a.txt",
        "[header]\nwidth=6\nheight=6\nhero_pos=1,1\n\
         [event]\nactivate=on_trigger\nlocation=2,1,1,1\nintermap=maps/b.txt,3,3\n",
    );
    write_file(
        &dir,
        "maps/b.txt",
        "[header]\nwidth=8\nheight=8\nhero_pos=2,2\n",
    );

    let mut s = GameSession::new_headless(EngineSettings::default(), 5, 4, 4);
    s.data_dir = dir.clone();
    s.load_map(&dir.join("maps/a.txt"), None).unwrap();

    let hero = s.hero;
    if let Some(e) = s.entities.get_mut(hero) {
        e.stats.pos = FPoint::new(2.5, 1.5);
    }
    s.check_events_at_hero();
    assert!(s.teleport.is_some());

    // the next tick performs the swap and pauses the simulation
    s.logic();
    assert!(s.map.filename.ends_with("b.txt"));
    assert_eq!(
        s.entities.get(hero).unwrap().stats.pos,
        FPoint::new(3.5, 3.5)
    );
}

#[test]
fn save_state_reflects_the_session() {
    let mut s = GameSession::new_headless(EngineSettings::default(), 5, 8, 8);
    s.campaign.set_status("chapter_1");
    s.inventory.add(0, 77);
    let hero = s.hero;
    if let Some(e) = s.entities.get_mut(hero) {
        e.stats.name = "Tester".to_string();
        e.stats.xp = 40;
    }
    for _ in 0..10 {
        s.logic();
    }

    let state = s.save_state();
    assert_eq!(state.name, "Tester");
    assert_eq!(state.xp, 40);
    assert_eq!(state.inventory.currency, 77);
    assert_eq!(state.statuses, vec!["chapter_1".to_string()]);
    assert_eq!(state.time_played, 10);
}
