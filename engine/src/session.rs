//! The session: owner of every manager and the fixed per-frame ordering
//! that keeps power activation, hazard resolution, damage, and AI
//! reaction consistent within one tick.
//!
//! One call to [`GameSession::logic`] is one tick. The order is fixed:
//! camera, map tile animation, event stat blocks, event cooldowns,
//! avatar, creatures, power-queue drains, spawns, hazards, loot, and
//! finally render collection. A pending teleport swaps the map in and
//! pauses the simulation steps for that frame.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use emberfall_core::geometry::{calc_dist, FPoint, Point};
use emberfall_core::message::{CombatTextQueue, MessageQueue};
use emberfall_core::rng::GameRng;
use emberfall_core::settings::EngineSettings;
use emberfall_core::timer::{Timer, TimerReset};

use crate::assets::{
    AnimationLibrary, AudioMixer, InputState, NullMixer, Renderable, SoundCatalog,
};
use crate::avatar::AvatarDriver;
use crate::camera::Camera;
use crate::campaign::CampaignManager;
use crate::collision::CollisionGrid;
use crate::entity::Entity;
use crate::entity_manager::{CreatureCatalog, EntityArena};
use crate::events::{EventActivate, EventManager};
use crate::hazards::HazardManager;
use crate::ids::{EntityId, PowerId};
use crate::items::{Inventory, ItemCatalog};
use crate::loot::LootManager;
use crate::map::Map;
use crate::powers::PowerManager;
use crate::stat_block::{EntityFlags, StatBlock};

/// Screen-space tile footprint used for mouse mapping and focus tests.
pub const TILE_W: i32 = 64;
pub const TILE_H: i32 = 32;

#[derive(Clone, Debug)]
pub struct TeleportRequest {
    /// None teleports within the current map.
    pub map: Option<String>,
    /// None lands on the destination map's hero_pos.
    pub destination: Option<FPoint>,
}

pub struct GameSession {
    pub settings: EngineSettings,
    pub rng: GameRng,
    pub data_dir: PathBuf,

    pub campaign: CampaignManager,
    pub powers: PowerManager,
    pub collision: CollisionGrid,
    pub map: Map,
    pub events: EventManager,
    pub entities: EntityArena,
    pub creatures: CreatureCatalog,
    /// Per-map creature templates: deep-loaded once, cloned on spawn.
    pub prototypes: std::collections::HashMap<String, crate::stat_block::StatBlock>,
    pub hazards: HazardManager,
    pub loot: LootManager,
    pub items: ItemCatalog,
    pub inventory: Inventory,
    pub camera: Camera,

    pub hero: EntityId,
    pub hero_class: String,
    pub avatar: AvatarDriver,
    pub avatar_power_pending: Option<(PowerId, FPoint)>,

    pub combat_text: CombatTextQueue,
    pub msgs: MessageQueue,
    pub animations: AnimationLibrary,
    pub sounds: SoundCatalog,
    pub mixer: Box<dyn AudioMixer>,
    pub input: InputState,

    pub render_list: Vec<Renderable>,
    pub render_dead: Vec<Renderable>,
    pub view_size: Point,

    pub teleport: Option<TeleportRequest>,
    pub ticks: u64,
    pub map_anim_tick: u32,
    pub player_blocked: bool,
    pub player_blocked_timer: Timer,
    on_clear_fired: bool,
}

impl GameSession {
    /// An in-memory session with no data directory: the test harness and
    /// embedding entry point. The hero starts as a bare stat block on an
    /// open grid.
    pub fn new_headless(settings: EngineSettings, seed: u64, width: usize, height: usize) -> Self {
        let camera_speed = settings.misc.camera_speed;
        let ally_collision = settings.misc.enable_ally_collision;
        let mut collision = CollisionGrid::new(width, height);
        collision.ally_collision = ally_collision;

        let mut entities = EntityArena::default();
        let mut hero_stats = StatBlock::new(&settings);
        hero_stats.flags.insert(EntityFlags::HERO);
        hero_stats.name = "hero".to_string();
        hero_stats.pos = FPoint::new(width as f32 / 2.0, height as f32 / 2.0);
        hero_stats.hp = 1;
        let hero = entities.insert(Entity::new(hero_stats));

        let mut player_blocked_timer = Timer::new(settings.misc.max_frames_per_sec / 2);
        player_blocked_timer.reset(TimerReset::End);

        Self {
            rng: GameRng::new(seed),
            data_dir: PathBuf::new(),
            campaign: CampaignManager::default(),
            powers: PowerManager::default(),
            collision,
            map: Map::empty(width, height),
            events: EventManager::default(),
            entities,
            creatures: CreatureCatalog::default(),
            prototypes: std::collections::HashMap::new(),
            hazards: HazardManager::default(),
            loot: LootManager::default(),
            items: ItemCatalog::default(),
            inventory: Inventory::default(),
            camera: Camera::new(camera_speed),
            hero,
            hero_class: "Adventurer".to_string(),
            avatar: AvatarDriver::new(),
            avatar_power_pending: None,
            combat_text: CombatTextQueue::default(),
            msgs: MessageQueue::default(),
            animations: AnimationLibrary::default(),
            sounds: SoundCatalog::new(),
            mixer: Box::new(NullMixer::default()),
            input: InputState::default(),
            render_list: Vec::new(),
            render_dead: Vec::new(),
            view_size: Point::new(640, 480),
            teleport: None,
            ticks: 0,
            map_anim_tick: 0,
            player_blocked: false,
            player_blocked_timer,
            on_clear_fired: false,
            settings,
        }
    }

    /// Load a full game from a data directory: engine settings, effects,
    /// powers, items, creatures, and the starting map.
    pub fn load(data_dir: &Path, seed: u64) -> Result<Self> {
        let settings = EngineSettings::load(data_dir)
            .with_context(|| "GameSession: cannot load engine settings")?;

        let mut session = Self::new_headless(settings, seed, 1, 1);
        session.data_dir = data_dir.to_path_buf();
        session.animations = AnimationLibrary::new(data_dir);

        let effects_path = data_dir.join("powers/effects.txt");
        if effects_path.exists() {
            session
                .powers
                .load_effects(&effects_path, &session.settings)?;
        }
        let powers_path = data_dir.join("powers/powers.txt");
        if powers_path.exists() {
            let settings = session.settings.clone();
            session
                .powers
                .load_powers(&powers_path, &settings, &mut session.sounds)?;
        }
        session.items = ItemCatalog::load(&data_dir.join("items/items.txt"), &mut session.sounds);
        session.creatures = CreatureCatalog::load(&data_dir.join("enemies"), &session.settings);

        // hero stats from the avatar definition, when present
        let hero_path = data_dir.join("engine/avatar.txt");
        if hero_path.exists() {
            let mut stats = StatBlock::load(&hero_path, &session.settings)?;
            stats.flags.insert(EntityFlags::HERO);
            stats.recalc(&session.settings);
            let hero = session.hero;
            if let Some(e) = session.entities.get_mut(hero) {
                let pos = e.stats.pos;
                let name = e.stats.name.clone();
                e.stats = stats;
                e.stats.pos = pos;
                if e.stats.name.is_empty() {
                    e.stats.name = name;
                }
            }
            session.rebind_hero_visuals();
        }

        let starting_map = data_dir.join("maps/start.txt");
        if starting_map.exists() {
            session.load_map(&starting_map, None)?;
        }

        Ok(session)
    }

    /// Swap in a new map: rebuild the grid, reset per-map managers,
    /// spawn the map's population, and place the hero.
    pub fn load_map(&mut self, path: &Path, hero_dest: Option<FPoint>) -> Result<()> {
        let map = Map::load(path, &self.settings, &mut self.rng)?;

        let mut collision =
            CollisionGrid::from_layer(map.collision_tiles(), map.w, map.h);
        collision.ally_collision = self.settings.misc.enable_ally_collision;
        self.collision = collision;

        let events = map.events.clone();
        self.map = map;
        self.events.handle_new_map(events);
        self.hazards.handle_new_map();
        self.loot.handle_new_map();
        self.on_clear_fired = false;

        // hero first so allies re-place around the final position
        let hero_pos = hero_dest.unwrap_or(self.map.hero_pos);
        let hero = self.hero;
        if let Some(e) = self.entities.get_mut(hero) {
            e.stats.pos = hero_pos;
            e.behavior.path.clear();
        }

        self.entities_handle_new_map();
        self.create_event_stat_blocks();

        self.collision.block(hero_pos.x, hero_pos.y, false);
        self.camera.warp_to(hero_pos);

        // NPCs stand on the map as passive entities
        let npcs = self.map.npcs.clone();
        for npc in npcs {
            if npc.filename.is_empty() {
                continue;
            }
            let file = self.data_dir.join(&npc.filename);
            if let Some(id) = self.spawn_creature(&file, npc.pos, 0) {
                if let Some(e) = self.entities.get_mut(id) {
                    e.stats.flags.insert(EntityFlags::NPC);
                    e.stats.combat_style = crate::stat_block::CombatStyle::Passive;
                }
                self.collision.block(npc.pos.x, npc.pos.y, true);
            }
        }

        if !self.map.music.is_empty() {
            let music = self.sounds.load(&self.map.music.clone());
            self.mixer.play(music, "music", None, true);
        }

        self.trigger_events(EventActivate::OnLoad);
        Ok(())
    }

    pub fn request_teleport(&mut self, map: Option<String>, destination: Option<FPoint>) {
        self.teleport = Some(TeleportRequest { map, destination });
    }

    /// One tick. Steps follow the fixed frame ordering; a pending
    /// teleport swaps the map and skips the simulation for this frame.
    pub fn logic(&mut self) {
        self.ticks += 1;
        self.avatar.time_played += 1;

        // 1. camera follows the hero
        let hero_pos = self
            .entities
            .get(self.hero)
            .map(|e| e.stats.pos)
            .unwrap_or_default();
        self.camera.set_target(hero_pos);
        self.camera.logic();

        // 2. map tile animations
        self.map_anim_tick = self.map_anim_tick.wrapping_add(1);

        // 3. event stat blocks, 4. event cooldowns
        self.events_logic();

        // a teleport pauses the world for one frame while the map swaps
        if let Some(request) = self.teleport.take() {
            self.perform_teleport(request);
            self.collect_renders();
            return;
        }

        // 5. avatar
        self.avatar_logic();

        // 6. creatures
        if self.player_blocked {
            self.player_blocked_timer.tick();
            if self.player_blocked_timer.is_end() {
                self.player_blocked = false;
            }
        }
        let hero = self.hero;
        for id in self.entities.ids() {
            if id == hero {
                continue;
            }
            let skip = self
                .entities
                .get(id)
                .map(|e| e.stats.flags.contains(EntityFlags::EVENT_SOURCE))
                .unwrap_or(true);
            if skip {
                continue;
            }
            self.creature_logic(id);

            // corpses past their timer leave the world
            let expired = self
                .entities
                .get(id)
                .map(|e| e.stats.corpse && e.stats.corpse_timer.is_end())
                .unwrap_or(false);
            if expired {
                self.destroy_entity(id);
            }
        }

        // 7. drain power side queues (item charges owed by the hero)
        self.drain_used_items();

        // 8. spawn queue into live entities
        self.handle_spawn();

        // 9. hazards (drains the hazard queue internally, then sweeps)
        self.hazards_logic();

        // 10. loot
        self.loot_logic();

        // map events react to the post-movement world
        self.check_events_at_hero();
        if !self.on_clear_fired && self.entities_cleared() {
            self.on_clear_fired = true;
            self.trigger_events(EventActivate::OnClear);
        }

        // 11. render list
        self.collect_renders();
    }

    fn perform_teleport(&mut self, request: TeleportRequest) {
        match request.map {
            Some(ref mapname) if !mapname.is_empty() => {
                // leaving the map fires its exit events first
                self.trigger_events(EventActivate::OnMapExit);
                let path = if Path::new(mapname).is_absolute() {
                    PathBuf::from(mapname)
                } else {
                    self.data_dir.join(mapname)
                };
                if let Err(e) = self.load_map(&path, request.destination) {
                    log::error!("GameSession: teleport failed: {:#}", e);
                    self.msgs.log(
                        "Unknown destination",
                        emberfall_core::message::LogKind::Normal,
                    );
                }
            }
            _ => {
                // intramap: move the hero directly
                if let Some(dest) = request.destination {
                    let hero = self.hero;
                    let old = self
                        .entities
                        .get(hero)
                        .map(|e| e.stats.pos)
                        .unwrap_or_default();
                    self.collision.unblock(old.x, old.y);
                    if let Some(e) = self.entities.get_mut(hero) {
                        e.stats.pos = dest;
                        e.behavior.path.clear();
                    }
                    self.collision.block(dest.x, dest.y, false);
                    self.camera.warp_to(dest);
                }
            }
        }
    }

    fn drain_used_items(&mut self) {
        let used: Vec<_> = self.powers.used_items.drain(..).collect();
        for item in used {
            if !self.inventory.remove(item, 1) {
                log::error!("GameSession: consumable {} owed but not held", item);
            }
        }
        let used_equipped: Vec<_> = self.powers.used_equipped_items.drain(..).collect();
        for item in used_equipped {
            if !self.inventory.remove_equipped(item) {
                log::error!("GameSession: equipped consumable {} owed but not worn", item);
            }
        }
    }

    /// Translate a screen point to map coordinates through the camera.
    pub fn screen_to_map(&self, screen: Point) -> FPoint {
        FPoint::new(
            self.camera.pos.x + (screen.x - self.view_size.x / 2) as f32 / TILE_W as f32,
            self.camera.pos.y + (screen.y - self.view_size.y / 2) as f32 / TILE_H as f32,
        )
    }

    /// The entity whose tile footprint contains the mouse point.
    pub fn entity_focus(&self, mouse: Point, alive_only: bool) -> Option<EntityId> {
        let map_pos = self.screen_to_map(mouse);
        let mut best: Option<(f32, EntityId)> = None;
        for id in self.entities.ids() {
            if id == self.hero {
                continue;
            }
            let Some(e) = self.entities.get(id) else {
                continue;
            };
            if e.stats.flags.contains(EntityFlags::EVENT_SOURCE) {
                continue;
            }
            if alive_only && (!e.stats.alive || e.stats.corpse) {
                continue;
            }
            let dist = calc_dist(map_pos, e.stats.pos);
            if dist <= 1.0 && best.map(|(d, _)| dist < d).unwrap_or(true) {
                best = Some((dist, id));
            }
        }
        best.map(|(_, id)| id)
    }

    /// Gather every renderable for this frame and sort in screen Z:
    /// floor-level records first, then by map depth. No randomness is
    /// consumed here.
    pub fn collect_renders(&mut self) {
        self.render_list.clear();
        self.render_dead.clear();

        for id in self.entities.ids() {
            let Some(e) = self.entities.get(id) else {
                continue;
            };
            if e.stats.flags.contains(EntityFlags::EVENT_SOURCE) {
                continue;
            }
            if let Some(anim) = &e.animation {
                let prio = if e.stats.corpse { 1 } else { 2 };
                let mut r =
                    anim.current_frame_renderable(e.stats.direction as u16, e.stats.pos, prio);
                if let Some(color) = e.stats.effects.current_color_mod() {
                    r.color_mod = color;
                }
                if let Some(alpha) = e.stats.effects.current_alpha_mod() {
                    r.alpha_mod = alpha;
                }
                if e.stats.corpse {
                    self.render_dead.push(r);
                } else {
                    self.render_list.push(r);
                }
            }
            e.stats.effects.add_renders(e.stats.pos, &mut self.render_list);
        }

        for haz in &self.hazards.hazards {
            if haz.delay_frames > 0 {
                continue;
            }
            if let Some(anim) = &haz.animation {
                let prio = if haz.on_floor { 0 } else { 2 };
                let r = anim.current_frame_renderable(haz.animation_kind, haz.pos, prio);
                if haz.on_floor {
                    self.render_dead.push(r);
                } else {
                    self.render_list.push(r);
                }
            }
        }

        let depth = |r: &Renderable| (r.map_pos.x + r.map_pos.y, r.prio);
        self.render_list.sort_by(|a, b| {
            depth(a)
                .partial_cmp(&depth(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.render_dead.sort_by(|a, b| {
            depth(a)
                .partial_cmp(&depth(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberfall_core::stats::Stat;

    fn basic_session() -> GameSession {
        let mut s = GameSession::new_headless(EngineSettings::default(), 42, 16, 16);
        let hero = s.hero;
        if let Some(e) = s.entities.get_mut(hero) {
            e.stats.starting[Stat::HpMax as usize] = 100;
            e.stats.starting[Stat::Accuracy as usize] = 100;
            let settings = EngineSettings::default();
            e.stats.recalc(&settings);
        }
        s
    }

    #[test]
    fn ticks_advance_without_panic() {
        let mut s = basic_session();
        for _ in 0..120 {
            s.logic();
        }
        assert_eq!(s.ticks, 120);
    }

    #[test]
    fn teleport_pauses_simulation_for_one_frame() {
        let mut s = basic_session();
        s.request_teleport(None, Some(FPoint::new(3.5, 3.5)));
        s.logic();
        let hero = s.hero;
        assert_eq!(
            s.entities.get(hero).unwrap().stats.pos,
            FPoint::new(3.5, 3.5)
        );
        assert_eq!(s.camera.pos, FPoint::new(3.5, 3.5));
    }

    #[test]
    fn screen_to_map_round_trip_center() {
        let s = basic_session();
        let center = Point::new(s.view_size.x / 2, s.view_size.y / 2);
        let mapped = s.screen_to_map(center);
        assert!((mapped.x - s.camera.pos.x).abs() < 1e-5);
        assert!((mapped.y - s.camera.pos.y).abs() < 1e-5);
    }
}
