//! Map events: hotspots, triggers, and their ordered component lists.
//! Components mutate layers, fire powers from cached event stat blocks,
//! queue teleports, feed the loot manager, and flip campaign statuses.

use emberfall_core::file_parser::FileParser;
use emberfall_core::geometry::{FPoint, Point, Rect};
use emberfall_core::message::LogKind;
use emberfall_core::parse;
use emberfall_core::settings::EngineSettings;
use emberfall_core::timer::Timer;

use crate::collision::TileCollision;
use crate::ids::{EntityId, ItemId, PowerId};
use crate::session::GameSession;
use crate::stat_block::{EntityFlags, EntityState, LootEntry, StatBlock};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventActivate {
    #[default]
    OnTrigger,
    OnInteract,
    OnMapExit,
    OnLeave,
    OnLoad,
    OnClear,
    Static,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EventComponent {
    Tooltip(String),
    Power {
        power: PowerId,
    },
    PowerPath {
        target_hero: bool,
        path: Point,
    },
    InterMap {
        map: String,
        pos: Option<Point>,
    },
    IntraMap {
        pos: Point,
    },
    MapMod {
        layer: String,
        x: i32,
        y: i32,
        value: u16,
    },
    SoundFx {
        file: String,
        pos: Option<Point>,
        looped: bool,
    },
    Loot(LootEntry),
    LootCount {
        min: i32,
        max: i32,
    },
    Msg(String),
    ShakyCam {
        ticks: u32,
    },
    RequiresStatus(Vec<String>),
    RequiresNotStatus(Vec<String>),
    RequiresLevel(i32),
    RequiresCurrency(i32),
    RequiresItem(Vec<ItemId>),
    RequiresNotItem(Vec<ItemId>),
    RequiresClass(String),
    SetStatus(Vec<String>),
    UnsetStatus(Vec<String>),
    RemoveCurrency(i32),
    RemoveItem(ItemId),
    RewardXp(u64),
    RewardCurrency(i32),
    RewardItem {
        item: ItemId,
        quantity: i32,
    },
    Restore(String),
    Spawn {
        category: String,
        pos: Point,
    },
    Npc(String),
    Music(String),
    Script(String),
    Repeat(bool),
    ChanceExec(i32),
}

#[derive(Clone, Debug)]
pub struct MapEvent {
    pub activate: EventActivate,
    pub location: Rect,
    pub hotspot: Rect,
    pub cooldown: Timer,
    pub keep_after_trigger: bool,
    pub center: FPoint,
    pub reachable_from: Rect,
    pub components: Vec<EventComponent>,
    /// Stat block that fires this event's POWER components, created at
    /// map load for events that need one.
    pub stat_block: Option<EntityId>,
    /// Edge detection for OnLeave: was the hero inside last frame.
    pub hero_inside: bool,
}

impl Default for MapEvent {
    fn default() -> Self {
        Self {
            activate: EventActivate::OnTrigger,
            location: Rect::default(),
            hotspot: Rect::default(),
            cooldown: Timer::new(0),
            keep_after_trigger: true,
            center: FPoint::new(-1.0, -1.0),
            reachable_from: Rect::default(),
            components: Vec::new(),
            stat_block: None,
            hero_inside: false,
        }
    }
}

impl MapEvent {
    pub fn component<F: Fn(&EventComponent) -> bool>(&self, pred: F) -> Option<&EventComponent> {
        self.components.iter().find(|&c| pred(c))
    }
}

/// Parse one `key=value` line of an `[event]` section into the event.
/// Shared between the map loader and script files.
pub fn load_event_key(infile: &mut FileParser, event: &mut MapEvent, settings: &EngineSettings) {
    let fps = settings.misc.max_frames_per_sec;
    match infile.key.as_str() {
        "type" => {}
        "activate" => {
            event.activate = match infile.val.as_str() {
                "on_trigger" => EventActivate::OnTrigger,
                "on_interact" => EventActivate::OnInteract,
                "on_mapexit" => EventActivate::OnMapExit,
                "on_leave" => EventActivate::OnLeave,
                "on_load" => EventActivate::OnLoad,
                "on_clear" => EventActivate::OnClear,
                "static" => EventActivate::Static,
                _ => {
                    infile.error("EventManager: unknown activate mode");
                    EventActivate::OnTrigger
                }
            }
        }
        "location" => {
            let mut val = infile.val.clone();
            event.location.x = parse::pop_first_int(&mut val);
            event.location.y = parse::pop_first_int(&mut val);
            event.location.w = parse::pop_first_int(&mut val).max(1);
            event.location.h = parse::pop_first_int(&mut val).max(1);
            if event.hotspot == Rect::default() {
                event.hotspot = event.location;
            }
            event.center = FPoint::new(
                event.location.x as f32 + event.location.w as f32 / 2.0,
                event.location.y as f32 + event.location.h as f32 / 2.0,
            );
        }
        "hotspot" => {
            if infile.val == "location" {
                event.hotspot = event.location;
            } else {
                let mut val = infile.val.clone();
                event.hotspot.x = parse::pop_first_int(&mut val);
                event.hotspot.y = parse::pop_first_int(&mut val);
                event.hotspot.w = parse::pop_first_int(&mut val).max(1);
                event.hotspot.h = parse::pop_first_int(&mut val).max(1);
            }
        }
        "cooldown" => event.cooldown.set_duration(parse::to_duration(&infile.val, fps)),
        "reachable_from" => {
            let mut val = infile.val.clone();
            event.reachable_from.x = parse::pop_first_int(&mut val);
            event.reachable_from.y = parse::pop_first_int(&mut val);
            event.reachable_from.w = parse::pop_first_int(&mut val).max(1);
            event.reachable_from.h = parse::pop_first_int(&mut val).max(1);
        }
        "repeat" => {
            event.keep_after_trigger = parse::to_bool(&infile.val);
            event
                .components
                .push(EventComponent::Repeat(event.keep_after_trigger));
        }
        "tooltip" => event.components.push(EventComponent::Tooltip(infile.val.clone())),
        "power" => event.components.push(EventComponent::Power {
            power: parse::to_int(&infile.val, 0).max(0) as usize,
        }),
        "power_path" => {
            // power_path=hero | power_path=<x>,<y>
            if infile.val == "hero" {
                event.components.push(EventComponent::PowerPath {
                    target_hero: true,
                    path: Point::default(),
                });
            } else {
                let mut val = infile.val.clone();
                event.components.push(EventComponent::PowerPath {
                    target_hero: false,
                    path: Point::new(
                        parse::pop_first_int(&mut val),
                        parse::pop_first_int(&mut val),
                    ),
                });
            }
        }
        "intermap" => {
            let mut val = infile.val.clone();
            let map = parse::pop_first_string(&mut val);
            let pos = if val.is_empty() {
                None
            } else {
                Some(Point::new(
                    parse::pop_first_int(&mut val),
                    parse::pop_first_int(&mut val),
                ))
            };
            event.components.push(EventComponent::InterMap { map, pos });
        }
        "intramap" => {
            let mut val = infile.val.clone();
            event.components.push(EventComponent::IntraMap {
                pos: Point::new(
                    parse::pop_first_int(&mut val),
                    parse::pop_first_int(&mut val),
                ),
            });
        }
        "mapmod" => {
            // mapmod=<layer>,<x>,<y>,<tile id>; repeated keys append
            let mut val = infile.val.clone();
            loop {
                let layer = parse::pop_first_string(&mut val);
                if layer.is_empty() {
                    break;
                }
                event.components.push(EventComponent::MapMod {
                    layer,
                    x: parse::pop_first_int(&mut val),
                    y: parse::pop_first_int(&mut val),
                    value: parse::pop_first_int(&mut val).max(0) as u16,
                });
            }
        }
        "soundfx" => {
            let mut val = infile.val.clone();
            let file = parse::pop_first_string(&mut val);
            let pos = if val.is_empty() {
                None
            } else {
                Some(Point::new(
                    parse::pop_first_int(&mut val),
                    parse::pop_first_int(&mut val),
                ))
            };
            let looped = !val.is_empty() && parse::pop_first_int(&mut val) != 0;
            event
                .components
                .push(EventComponent::SoundFx { file, pos, looped });
        }
        "loot" => {
            // loot=<item id>,<chance|fixed>,<min>,<max>
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
            event.components.push(EventComponent::Loot(LootEntry {
                item,
                chance,
                quantity_min: qmin,
                quantity_max: qmax,
            }));
        }
        "loot_count" => {
            let mut val = infile.val.clone();
            let (min, max) = parse::to_range(&mut val);
            event.components.push(EventComponent::LootCount { min, max });
        }
        "msg" => event.components.push(EventComponent::Msg(infile.val.clone())),
        "shakycam" => event.components.push(EventComponent::ShakyCam {
            ticks: parse::to_duration(&infile.val, fps),
        }),
        "requires_status" => {
            event
                .components
                .push(EventComponent::RequiresStatus(split_list(&infile.val)));
        }
        "requires_not_status" => {
            event
                .components
                .push(EventComponent::RequiresNotStatus(split_list(&infile.val)));
        }
        "requires_level" => event
            .components
            .push(EventComponent::RequiresLevel(parse::to_int(&infile.val, 0))),
        "requires_currency" => event
            .components
            .push(EventComponent::RequiresCurrency(parse::to_int(&infile.val, 0))),
        "requires_item" => {
            let items = split_list(&infile.val)
                .iter()
                .map(|s| parse::to_int(s, 0).max(0) as usize)
                .collect();
            event.components.push(EventComponent::RequiresItem(items));
        }
        "requires_not_item" => {
            let items = split_list(&infile.val)
                .iter()
                .map(|s| parse::to_int(s, 0).max(0) as usize)
                .collect();
            event.components.push(EventComponent::RequiresNotItem(items));
        }
        "requires_class" => event
            .components
            .push(EventComponent::RequiresClass(infile.val.clone())),
        "set_status" => event
            .components
            .push(EventComponent::SetStatus(split_list(&infile.val))),
        "unset_status" => event
            .components
            .push(EventComponent::UnsetStatus(split_list(&infile.val))),
        "remove_currency" => event.components.push(EventComponent::RemoveCurrency(
            parse::to_int(&infile.val, 0).max(0),
        )),
        "remove_item" => event.components.push(EventComponent::RemoveItem(
            parse::to_int(&infile.val, 0).max(0) as usize,
        )),
        "reward_xp" => event.components.push(EventComponent::RewardXp(
            parse::to_int(&infile.val, 0).max(0) as u64,
        )),
        "reward_currency" => event.components.push(EventComponent::RewardCurrency(
            parse::to_int(&infile.val, 0).max(0),
        )),
        "reward_item" => {
            let mut val = infile.val.clone();
            let item = parse::pop_first_int(&mut val).max(0) as usize;
            let quantity = if val.is_empty() { 1 } else { parse::pop_first_int(&mut val).max(1) };
            event
                .components
                .push(EventComponent::RewardItem { item, quantity });
        }
        "restore" => event.components.push(EventComponent::Restore(infile.val.clone())),
        "spawn" => {
            // spawn=<category>,<x>,<y>; repeated keys append
            let mut val = infile.val.clone();
            loop {
                let category = parse::pop_first_string(&mut val);
                if category.is_empty() {
                    break;
                }
                event.components.push(EventComponent::Spawn {
                    category,
                    pos: Point::new(
                        parse::pop_first_int(&mut val),
                        parse::pop_first_int(&mut val),
                    ),
                });
            }
        }
        "npc" => event.components.push(EventComponent::Npc(infile.val.clone())),
        "music" => event.components.push(EventComponent::Music(infile.val.clone())),
        "script" => event.components.push(EventComponent::Script(infile.val.clone())),
        "chance_exec" => event.components.push(EventComponent::ChanceExec(
            parse::to_int(&infile.val, 100).clamp(0, 100),
        )),
        _ => infile.error("EventManager: unknown event key"),
    }
}

fn split_list(val: &str) -> Vec<String> {
    let mut v = val.to_string();
    let mut out = Vec::new();
    loop {
        let s = parse::pop_first_string(&mut v);
        if s.is_empty() {
            break;
        }
        out.push(s);
    }
    out
}

/// Runtime state of the current map's events.
#[derive(Default)]
pub struct EventManager {
    pub events: Vec<MapEvent>,
    /// Guard against scripts calling themselves.
    script_stack: Vec<String>,
}

impl EventManager {
    pub fn handle_new_map(&mut self, events: Vec<MapEvent>) {
        self.events = events;
        self.script_stack.clear();
    }
}

impl GameSession {
    /// Create stat blocks for events that fire powers, so each POWER
    /// event has a caster positioned at the event location.
    pub fn create_event_stat_blocks(&mut self) {
        for i in 0..self.events.events.len() {
            let needs_power = self.events.events[i]
                .component(|c| matches!(c, EventComponent::Power { .. }))
                .is_some();
            if !needs_power || self.events.events[i].stat_block.is_some() {
                continue;
            }
            let center = self.events.events[i].center;
            let mut stats = StatBlock::new(&self.settings);
            stats.flags.insert(EntityFlags::EVENT_SOURCE);
            stats.name = "event".to_string();
            stats.pos = center;
            // events are dangerous out of the box
            stats.perfect_accuracy = true;
            stats.alive = true;
            stats.hp = 1;
            let id = self.entities.insert(crate::entity::Entity::new(stats));
            self.events.events[i].stat_block = Some(id);
        }
    }

    /// Per-tick upkeep for the event stat blocks (step 3 of the frame)
    /// and the event cooldowns (step 4).
    pub fn events_logic(&mut self) {
        for i in 0..self.events.events.len() {
            if let Some(id) = self.events.events[i].stat_block {
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
                    // event sources never die or act on their own
                    e.stats.hp = 1;
                    e.stats.alive = true;
                    e.stats.cur_state = EntityState::Stance;
                }
            }
            self.events.events[i].cooldown.tick();
        }
    }

    /// All requirement components of an event hold.
    pub fn event_is_active(&self, index: usize) -> bool {
        self.events.events[index]
            .components
            .iter()
            .all(|c| self.check_event_requirement(c))
    }

    pub fn check_event_requirement(&self, ec: &EventComponent) -> bool {
        let hero_level = self
            .entities
            .get(self.hero)
            .map(|e| e.stats.level)
            .unwrap_or(0);
        match ec {
            EventComponent::RequiresStatus(list) => {
                list.iter().all(|s| self.campaign.check_status(s))
            }
            EventComponent::RequiresNotStatus(list) => {
                list.iter().all(|s| !self.campaign.check_status(s))
            }
            EventComponent::RequiresLevel(level) => hero_level >= *level,
            EventComponent::RequiresCurrency(amount) => self.inventory.currency >= *amount as i64,
            EventComponent::RequiresItem(items) => {
                items.iter().all(|i| self.inventory.count(*i) > 0)
            }
            EventComponent::RequiresNotItem(items) => {
                items.iter().all(|i| self.inventory.count(*i) == 0)
            }
            EventComponent::RequiresClass(class) => self.hero_class == *class,
            _ => true,
        }
    }

    /// Hotspot/trigger walk, called once per frame after movement. Fires
    /// OnTrigger events the hero stepped into and OnLeave events the
    /// hero left; OnInteract events respond to the interaction check.
    pub fn check_events_at_hero(&mut self) {
        let hero_tile = match self.entities.get(self.hero) {
            Some(e) => Point::from(e.stats.pos),
            None => return,
        };

        let mut i = 0;
        while i < self.events.events.len() {
            let inside = self.events.events[i].location.contains(hero_tile);
            let was_inside = self.events.events[i].hero_inside;
            self.events.events[i].hero_inside = inside;
            let activate = self.events.events[i].activate;

            let fire = match activate {
                EventActivate::OnTrigger => inside,
                EventActivate::OnLeave => !inside && was_inside,
                _ => false,
            };

            if fire && self.event_is_active(i) {
                if self.execute_event(i) {
                    self.events.events.remove(i);
                    continue;
                }
            }
            i += 1;
        }
    }

    /// Interaction check (ACCEPT or a click on a hotspot): fire the
    /// OnInteract events whose hotspot holds the target tile, provided
    /// the hero can reach them. Returns whether anything fired.
    pub fn interact_at(&mut self, target: FPoint) -> bool {
        let hero_pos = match self.entities.get(self.hero) {
            Some(e) => e.stats.pos,
            None => return false,
        };
        let tile = Point::from(target);
        let mut fired = false;

        let mut i = 0;
        while i < self.events.events.len() {
            let ev = &self.events.events[i];
            let wants = ev.activate == EventActivate::OnInteract && ev.hotspot.contains(tile);
            if wants {
                let reachable = if ev.reachable_from != Rect::default() {
                    ev.reachable_from.contains(Point::from(hero_pos))
                } else {
                    emberfall_core::geometry::calc_dist(hero_pos, ev.center)
                        <= self.settings.misc.interact_range
                };
                if reachable && self.event_is_active(i) {
                    fired = true;
                    if self.execute_event(i) {
                        self.events.events.remove(i);
                        continue;
                    }
                }
            }
            i += 1;
        }
        fired
    }

    /// Fire every eligible OnLoad (or OnClear/OnMapExit) event.
    pub fn trigger_events(&mut self, mode: EventActivate) {
        let mut i = 0;
        while i < self.events.events.len() {
            if self.events.events[i].activate == mode && self.event_is_active(i) {
                if self.execute_event(i) {
                    self.events.events.remove(i);
                    continue;
                }
            }
            i += 1;
        }
    }

    /// Execute an event's component list in order. Returns true when the
    /// event should be discarded (`keep_after_trigger == false`).
    pub fn execute_event(&mut self, index: usize) -> bool {
        if !self.events.events[index].cooldown.is_end() {
            return false;
        }
        let cooldown = self.events.events[index].cooldown.duration();
        self.events.events[index].cooldown.restart_with(cooldown);

        // chance_exec gates the whole component list but honours repeat
        let chance = self.events.events[index]
            .component(|c| matches!(c, EventComponent::ChanceExec(_)))
            .cloned();
        if let Some(EventComponent::ChanceExec(chance)) = chance {
            if !self.rng.percent_chance(chance) {
                return !self.events.events[index].keep_after_trigger;
            }
        }

        let event = self.events.events[index].clone();
        let mut loot_count = (0, 0);

        for ec in &event.components {
            match ec {
                EventComponent::SetStatus(list) => {
                    for s in list {
                        self.campaign.set_status(s);
                    }
                }
                EventComponent::UnsetStatus(list) => {
                    for s in list {
                        self.campaign.unset_status(s);
                    }
                }
                EventComponent::InterMap { map, pos } => {
                    let dest = pos.map(FPoint::tile_center);
                    self.request_teleport(Some(map.clone()), dest);
                }
                EventComponent::IntraMap { pos } => {
                    self.request_teleport(None, Some(FPoint::tile_center(*pos)));
                }
                EventComponent::MapMod { layer, x, y, value } => {
                    self.apply_mapmod(layer, *x, *y, *value);
                }
                EventComponent::SoundFx { file, pos, looped } => {
                    let id = self.sounds.load(file);
                    let at = pos
                        .map(FPoint::tile_center)
                        .or(if event.location != Rect::default() {
                            Some(event.center)
                        } else {
                            None
                        });
                    let looped = *looped || event.activate == EventActivate::OnLoad;
                    self.mixer.play(id, "event_sfx", at, looped);
                }
                EventComponent::Loot(entry) => {
                    let pos = FPoint::new(
                        event.hotspot.x as f32 + 0.5,
                        event.hotspot.y as f32 + 0.5,
                    );
                    self.loot.queue_table_drop(entry.clone(), pos, loot_count);
                }
                EventComponent::LootCount { min, max } => {
                    loot_count = (*min, *max);
                }
                EventComponent::Msg(text) => self.msgs.log(text, LogKind::Normal),
                EventComponent::ShakyCam { ticks } => self.camera.shake(*ticks),
                EventComponent::RemoveCurrency(amount) => {
                    self.inventory.remove_currency(*amount as i64);
                }
                EventComponent::RemoveItem(item) => {
                    self.inventory.remove(*item, 1);
                }
                EventComponent::RewardXp(amount) => self.reward_xp(*amount, true),
                EventComponent::RewardCurrency(amount) => self.reward_currency(*amount),
                EventComponent::RewardItem { item, quantity } => {
                    self.reward_item(*item, *quantity);
                }
                EventComponent::Restore(what) => self.restore_hpmp(what),
                EventComponent::Spawn { category, pos } => {
                    self.powers
                        .spawn_queue
                        .push_back(crate::powers::SpawnDescriptor {
                            category: category.clone(),
                            pos: FPoint::tile_center(*pos),
                            direction: 0,
                            summoner: None,
                            summon_power_index: 0,
                            hero_ally: false,
                            enemy_ally: false,
                        });
                }
                EventComponent::Power { power } => {
                    self.fire_event_power(&event, *power);
                }
                EventComponent::Music(file) => {
                    self.map.music = file.clone();
                }
                EventComponent::Npc(_) | EventComponent::Tooltip(_) => {
                    // presentation concerns; the host reads them off the event
                }
                EventComponent::Script(file) => {
                    let (x, y) = if event.center.x >= 0.0 {
                        (event.center.x, event.center.y)
                    } else {
                        let p = self
                            .entities
                            .get(self.hero)
                            .map(|e| e.stats.pos)
                            .unwrap_or_default();
                        (p.x, p.y)
                    };
                    self.execute_script(file, x, y);
                }
                EventComponent::Repeat(keep) => {
                    // mirrored onto the stored event, since we executed a clone
                    self.events.events[index].keep_after_trigger = *keep;
                }
                EventComponent::PowerPath { .. }
                | EventComponent::ChanceExec(_)
                | EventComponent::RequiresStatus(_)
                | EventComponent::RequiresNotStatus(_)
                | EventComponent::RequiresLevel(_)
                | EventComponent::RequiresCurrency(_)
                | EventComponent::RequiresItem(_)
                | EventComponent::RequiresNotItem(_)
                | EventComponent::RequiresClass(_) => {}
            }
        }

        !self.events.events[index].keep_after_trigger
    }

    fn apply_mapmod(&mut self, layer: &str, x: i32, y: i32, value: u16) {
        if x < 0 || y < 0 || x as usize >= self.map.w || y as usize >= self.map.h {
            log::error!("EventManager: mapmod at ({}, {}) is out of bounds", x, y);
            return;
        }
        if layer == "collision" {
            self.collision
                .set_cell(x, y, TileCollision::from_raw(value));
            if let Some(ci) = self.map.collision_layer {
                self.map.layers[ci].tiles[y as usize * self.map.w + x as usize] = value;
            }
            return;
        }
        match self.map.layer_index(layer) {
            Some(li) => {
                self.map.layers[li].tiles[y as usize * self.map.w + x as usize] = value;
            }
            None => log::error!("EventManager: mapmod on unknown layer '{}'", layer),
        }
    }

    /// Fire an event POWER from the event's cached stat block, aimed per
    /// its POWER_PATH component.
    fn fire_event_power(&mut self, event: &MapEvent, power: PowerId) {
        let Some(src) = event.stat_block else {
            log::error!("EventManager: POWER event without a stat block");
            return;
        };

        let target = match event.component(|c| matches!(c, EventComponent::PowerPath { .. })) {
            Some(EventComponent::PowerPath { target_hero: true, .. }) => self
                .entities
                .get(self.hero)
                .map(|e| e.stats.pos)
                .unwrap_or(event.center),
            Some(EventComponent::PowerPath { target_hero: false, path }) => {
                FPoint::tile_center(*path)
            }
            _ => event.center,
        };

        self.activate_power(power, src, target);
    }

    /// Load a script file as an ephemeral batch of events and execute
    /// them at (x, y). Scripts cannot recurse into themselves.
    pub fn execute_script(&mut self, filename: &str, x: f32, y: f32) {
        if filename.is_empty() {
            return;
        }
        if self.events.script_stack.iter().any(|s| s == filename) {
            log::error!("EventManager: script '{}' calling itself is not allowed", filename);
            return;
        }

        let path = self.data_dir.join(filename);
        let mut infile = match FileParser::open(&path) {
            Ok(f) => f,
            Err(e) => {
                log::error!("EventManager: {:#}", e);
                return;
            }
        };

        let mut script_events: Vec<MapEvent> = Vec::new();
        while infile.next() {
            if infile.new_section && infile.section == "event" {
                let mut ev = MapEvent::default();
                ev.location = Rect::new(x as i32, y as i32, 1, 1);
                ev.hotspot = ev.location;
                ev.center = FPoint::new(x.floor() + 0.5, y.floor() + 0.5);
                script_events.push(ev);
            }
            let Some(ev) = script_events.last_mut() else {
                continue;
            };
            load_event_key(&mut infile, ev, &self.settings);
        }

        self.events.script_stack.push(filename.to_string());
        for mut ev in script_events {
            // script events that fire powers need a caster on the spot
            let needs_power = ev
                .component(|c| matches!(c, EventComponent::Power { .. }))
                .is_some();
            if needs_power {
                let mut stats = StatBlock::new(&self.settings);
                stats.flags.insert(EntityFlags::EVENT_SOURCE);
                stats.pos = ev.center;
                stats.perfect_accuracy = true;
                stats.hp = 1;
                let id = self.entities.insert(crate::entity::Entity::new(stats));
                ev.stat_block = Some(id);
            }

            let active = ev
                .components
                .iter()
                .all(|c| self.check_event_requirement(c));
            if active {
                self.events.events.push(ev);
                let idx = self.events.events.len() - 1;
                self.execute_event(idx);
                let ev = self.events.events.remove(idx);
                if let Some(id) = ev.stat_block {
                    self.entities.remove(id);
                }
            } else if let Some(id) = ev.stat_block {
                self.entities.remove(id);
            }
        }
        self.events.script_stack.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_keys_parse_into_components() {
        let mut infile = FileParser::from_string(
            "[event]\nactivate=on_trigger\nlocation=3,4,2,2\ncooldown=1s\n\
             set_status=opened_gate\nmapmod=collision,5,5,0\nreward_xp=25\nrepeat=false\n",
        );
        let settings = EngineSettings::default();
        let mut event = MapEvent::default();
        while infile.next() {
            load_event_key(&mut infile, &mut event, &settings);
        }
        assert_eq!(event.activate, EventActivate::OnTrigger);
        assert_eq!(event.location, Rect::new(3, 4, 2, 2));
        assert_eq!(event.cooldown.duration(), 60);
        assert!(!event.keep_after_trigger);
        assert!(event
            .components
            .iter()
            .any(|c| matches!(c, EventComponent::SetStatus(s) if s == &vec!["opened_gate".to_string()])));
        assert!(event
            .components
            .iter()
            .any(|c| matches!(c, EventComponent::MapMod { layer, .. } if layer == "collision")));
        assert!(event
            .components
            .iter()
            .any(|c| matches!(c, EventComponent::RewardXp(25))));
    }

    #[test]
    fn hotspot_defaults_to_location() {
        let mut infile = FileParser::from_string("[event]\nlocation=1,1,1,1\n");
        let settings = EngineSettings::default();
        let mut event = MapEvent::default();
        while infile.next() {
            load_event_key(&mut infile, &mut event, &settings);
        }
        assert_eq!(event.hotspot, event.location);
        assert_eq!(event.center, FPoint::new(1.5, 1.5));
    }
}
