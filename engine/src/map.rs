//! Map data and the map-file loader: header, tile layers (with the
//! width-checked `data=` rows), enemy group expansion, NPC placement,
//! and events. Structural problems abort the load; directive-level
//! problems are logged and skipped.

use std::collections::VecDeque;
use std::path::Path;

use anyhow::{bail, Context, Result};

use emberfall_core::file_parser::FileParser;
use emberfall_core::geometry::{FPoint, Point, Rect};
use emberfall_core::parse;
use emberfall_core::rng::GameRng;
use emberfall_core::settings::EngineSettings;

use crate::events::{load_event_key, MapEvent};
use crate::stat_block::SpawnLevel;

/// A creature placement produced by expanding an `[enemy]` group.
#[derive(Clone, Debug)]
pub struct MapSpawn {
    pub category: String,
    pub pos: FPoint,
    pub direction: u8,
    pub waypoints: VecDeque<FPoint>,
    pub wander_radius: i32,
    pub level_min: i32,
    pub level_max: i32,
    pub requires_status: Vec<String>,
    pub requires_not_status: Vec<String>,
    pub invincible_requires_status: Vec<String>,
    pub invincible_requires_not_status: Vec<String>,
    pub spawn_level: SpawnLevel,
}

/// An authored enemy group, expanded into concrete spawns at load.
#[derive(Clone, Debug, Default)]
struct EnemyGroup {
    category: String,
    level_min: i32,
    level_max: i32,
    area: Rect,
    number_min: i32,
    number_max: i32,
    chance: i32,
    direction: u8,
    waypoints: VecDeque<FPoint>,
    wander_radius: i32,
    requires_status: Vec<String>,
    requires_not_status: Vec<String>,
    invincible_requires_status: Vec<String>,
    invincible_requires_not_status: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct MapNpc {
    pub filename: String,
    pub pos: FPoint,
}

pub struct MapLayer {
    pub name: String,
    pub tiles: Vec<u16>,
}

pub struct Map {
    pub filename: String,
    pub title: String,
    pub w: usize,
    pub h: usize,
    pub tileset: String,
    pub music: String,
    pub hero_pos: FPoint,
    pub hero_pos_enabled: bool,
    pub layers: Vec<MapLayer>,
    pub collision_layer: Option<usize>,
    pub enemy_spawns: VecDeque<MapSpawn>,
    pub npcs: Vec<MapNpc>,
    pub events: Vec<MapEvent>,
}

impl Default for Map {
    fn default() -> Self {
        Self::empty(1, 1)
    }
}

impl Map {
    pub fn empty(w: usize, h: usize) -> Self {
        Self {
            filename: String::new(),
            title: String::new(),
            w,
            h,
            tileset: String::new(),
            music: String::new(),
            hero_pos: FPoint::new(0.5, 0.5),
            hero_pos_enabled: false,
            layers: vec![MapLayer {
                name: "collision".to_string(),
                tiles: vec![0; w * h],
            }],
            collision_layer: Some(0),
            enemy_spawns: VecDeque::new(),
            npcs: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn layer_index(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.name == name)
    }

    pub fn collision_tiles(&self) -> Vec<u16> {
        match self.collision_layer {
            Some(i) => self.layers[i].tiles.clone(),
            None => vec![0; self.w * self.h],
        }
    }

    /// Load a map file. Enemy groups are expanded into concrete spawn
    /// points here, consuming the session RNG in document order.
    pub fn load(
        path: &Path,
        settings: &EngineSettings,
        rng: &mut GameRng,
    ) -> Result<Map> {
        let mut infile = FileParser::open(path)
            .with_context(|| format!("Map: cannot open '{}'", path.display()))?;
        log::info!("Map: loading '{}'", path.display());

        let mut map = Map {
            filename: path.to_string_lossy().to_string(),
            title: String::new(),
            w: 1,
            h: 1,
            tileset: String::new(),
            music: String::new(),
            hero_pos: FPoint::new(0.5, 0.5),
            hero_pos_enabled: false,
            layers: Vec::new(),
            collision_layer: None,
            enemy_spawns: VecDeque::new(),
            npcs: Vec::new(),
            events: Vec::new(),
        };
        let mut groups: Vec<EnemyGroup> = Vec::new();

        while infile.next() {
            if infile.new_section {
                match infile.section.as_str() {
                    "enemy" => groups.push(EnemyGroup {
                        chance: 100,
                        number_min: 1,
                        number_max: 1,
                        level_min: 0,
                        level_max: 0,
                        ..EnemyGroup::default()
                    }),
                    "npc" => map.npcs.push(MapNpc::default()),
                    "event" => map.events.push(MapEvent::default()),
                    _ => {}
                }
            }
            match infile.section.as_str() {
                "header" => map.load_header(&mut infile),
                "layer" => map.load_layer(&mut infile)?,
                "enemy" => {
                    let Some(group) = groups.last_mut() else {
                        continue;
                    };
                    Self::load_enemy_group(&mut infile, group);
                }
                "npc" => {
                    let Some(npc) = map.npcs.last_mut() else {
                        continue;
                    };
                    match infile.key.as_str() {
                        "filename" => npc.filename = infile.val.clone(),
                        "location" => {
                            let mut val = infile.val.clone();
                            npc.pos.x = parse::pop_first_int(&mut val) as f32 + 0.5;
                            npc.pos.y = parse::pop_first_int(&mut val) as f32 + 0.5;
                        }
                        "type" => {}
                        _ => infile.error("Map: unknown npc key"),
                    }
                }
                "event" => {
                    let Some(event) = map.events.last_mut() else {
                        continue;
                    };
                    load_event_key(&mut infile, event, settings);
                }
                _ => infile.error("Map: unknown section"),
            }
        }

        // a map without a collision layer gets an empty one
        if map.collision_layer.is_none() {
            map.layers.push(MapLayer {
                name: "collision".to_string(),
                tiles: vec![0; map.w * map.h],
            });
            map.collision_layer = Some(map.layers.len() - 1);
        }

        if !map.hero_pos_enabled {
            log::error!("Map: hero_pos not defined in '{}', defaulting to (0,0)", map.filename);
        }

        map.expand_enemy_groups(&groups, rng);

        Ok(map)
    }

    fn load_header(&mut self, infile: &mut FileParser) {
        match infile.key.as_str() {
            "title" => self.title = infile.val.clone(),
            "width" => self.w = parse::to_int(&infile.val, 1).max(1) as usize,
            "height" => self.h = parse::to_int(&infile.val, 1).max(1) as usize,
            "tileset" => self.tileset = infile.val.clone(),
            "music" => self.music = infile.val.clone(),
            "hero_pos" => {
                let mut val = infile.val.clone();
                self.hero_pos.x = parse::pop_first_int(&mut val) as f32 + 0.5;
                self.hero_pos.y = parse::pop_first_int(&mut val) as f32 + 0.5;
                self.hero_pos_enabled = true;
            }
            "tilewidth" | "tileheight" | "orientation" => {}
            _ => infile.error("Map: unknown header key"),
        }
    }

    fn load_layer(&mut self, infile: &mut FileParser) -> Result<()> {
        match infile.key.as_str() {
            "type" => {
                self.layers.push(MapLayer {
                    name: infile.val.clone(),
                    tiles: vec![0; self.w * self.h],
                });
                if infile.val == "collision" {
                    self.collision_layer = Some(self.layers.len() - 1);
                }
            }
            "format" => {
                if infile.val != "dec" {
                    bail!("Map: layer format must be 'dec' in '{}'", self.filename);
                }
            }
            "data" => {
                // the next h raw lines are rows of comma-separated ids;
                // a row of the wrong width is a structural error
                let layer = match self.layers.last_mut() {
                    Some(l) => l,
                    None => bail!("Map: data before a layer type in '{}'", self.filename),
                };
                for j in 0..self.h {
                    let mut row = infile
                        .raw_line()
                        .with_context(|| format!("Map: truncated layer data in '{}'", self.filename))?;
                    if !row.trim_end().ends_with(',') {
                        row.push(',');
                    }
                    let comma_count = row.matches(',').count();
                    if comma_count != self.w {
                        bail!(
                            "Map: layer row {} has width {} (expected {}) in '{}'",
                            j,
                            comma_count,
                            self.w,
                            self.filename
                        );
                    }
                    let mut val = row;
                    for i in 0..self.w {
                        layer.tiles[j * self.w + i] =
                            parse::pop_first_int(&mut val).max(0) as u16;
                    }
                }
            }
            _ => infile.error("Map: unknown layer key"),
        }
        Ok(())
    }

    fn load_enemy_group(infile: &mut FileParser, group: &mut EnemyGroup) {
        match infile.key.as_str() {
            "type" => {}
            "category" => group.category = infile.val.clone(),
            "level" => {
                let mut val = infile.val.clone();
                let (min, max) = parse::to_range(&mut val);
                group.level_min = min;
                group.level_max = max;
            }
            "location" => {
                let mut val = infile.val.clone();
                group.area.x = parse::pop_first_int(&mut val);
                group.area.y = parse::pop_first_int(&mut val);
                group.area.w = parse::pop_first_int(&mut val).max(1);
                group.area.h = parse::pop_first_int(&mut val).max(1);
            }
            "number" => {
                let mut val = infile.val.clone();
                let (min, max) = parse::to_range(&mut val);
                group.number_min = min;
                group.number_max = max;
            }
            "chance" => group.chance = parse::to_int(&infile.val, 100).clamp(0, 100),
            "direction" => group.direction = parse::to_direction(&infile.val),
            "waypoints" => {
                let mut val = infile.val.clone();
                loop {
                    let x = parse::pop_first_string(&mut val);
                    if x.is_empty() {
                        break;
                    }
                    let y = parse::pop_first_string(&mut val);
                    group.waypoints.push_back(FPoint::new(
                        parse::to_int(&x, 0) as f32 + 0.5,
                        parse::to_int(&y, 0) as f32 + 0.5,
                    ));
                }
                // waypoints and wandering are mutually exclusive
                group.wander_radius = 0;
            }
            "wander_radius" => {
                group.wander_radius = parse::to_int(&infile.val, 4).max(0);
                group.waypoints.clear();
            }
            "requires_status" => {
                let mut val = infile.val.clone();
                loop {
                    let s = parse::pop_first_string(&mut val);
                    if s.is_empty() {
                        break;
                    }
                    group.requires_status.push(s);
                }
            }
            "requires_not_status" => {
                let mut val = infile.val.clone();
                loop {
                    let s = parse::pop_first_string(&mut val);
                    if s.is_empty() {
                        break;
                    }
                    group.requires_not_status.push(s);
                }
            }
            "invincible_requires_status" => {
                let mut val = infile.val.clone();
                loop {
                    let s = parse::pop_first_string(&mut val);
                    if s.is_empty() {
                        break;
                    }
                    group.invincible_requires_status.push(s);
                }
            }
            "invincible_requires_not_status" => {
                let mut val = infile.val.clone();
                loop {
                    let s = parse::pop_first_string(&mut val);
                    if s.is_empty() {
                        break;
                    }
                    group.invincible_requires_not_status.push(s);
                }
            }
            _ => infile.error("Map: unknown enemy key"),
        }
    }

    /// Roll each group's chance and count, then scatter spawns over open
    /// tiles of the group's area.
    fn expand_enemy_groups(&mut self, groups: &[EnemyGroup], rng: &mut GameRng) {
        let collision = self.collision_tiles();
        let (w, h) = (self.w, self.h);
        let blocked = move |p: Point| -> bool {
            if p.x < 0 || p.y < 0 || p.x as usize >= w || p.y as usize >= h {
                return true;
            }
            collision[p.y as usize * w + p.x as usize] != 0
        };

        for group in groups {
            if group.category.is_empty() {
                log::error!("Map: enemy group without a category in '{}'", self.filename);
                continue;
            }
            if !rng.percent_chance(group.chance) {
                continue;
            }
            let number = rng.rand_between(group.number_min, group.number_max).max(0);

            for _ in 0..number {
                // sample the area for an open tile; give up quietly on
                // crowded areas after a bounded number of tries
                let mut placed = false;
                for _ in 0..(group.area.w * group.area.h).max(8) {
                    let p = Point::new(
                        group.area.x + rng.rand_index(group.area.w.max(1) as usize) as i32,
                        group.area.y + rng.rand_index(group.area.h.max(1) as usize) as i32,
                    );
                    if blocked(p) {
                        continue;
                    }
                    self.enemy_spawns.push_back(MapSpawn {
                        category: group.category.clone(),
                        pos: FPoint::tile_center(p),
                        direction: group.direction,
                        waypoints: group.waypoints.clone(),
                        wander_radius: group.wander_radius,
                        level_min: group.level_min,
                        level_max: group.level_max,
                        requires_status: group.requires_status.clone(),
                        requires_not_status: group.requires_not_status.clone(),
                        invincible_requires_status: group.invincible_requires_status.clone(),
                        invincible_requires_not_status: group
                            .invincible_requires_not_status
                            .clone(),
                        spawn_level: SpawnLevel::default(),
                    });
                    placed = true;
                    break;
                }
                if !placed {
                    log::info!(
                        "Map: could not place an enemy of '{}' in '{}'",
                        group.category,
                        self.filename
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_map(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("emberfall_map_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_header_layers_and_enemies() {
        let path = write_map(
            "basic.txt",
            "[header]\nwidth=4\nheight=2\ntileset=tilesets/cave.txt\nhero_pos=1,1\n\
             [layer]\ntype=collision\nformat=dec\ndata=\n0,1,0,0,\n0,0,0,0,\n\
             [enemy]\ncategory=zombie\nnumber=2\nlocation=0,0,4,2\nchance=100\n",
        );
        let settings = EngineSettings::default();
        let mut rng = GameRng::new(11);
        let map = Map::load(&path, &settings, &mut rng).unwrap();

        assert_eq!((map.w, map.h), (4, 2));
        assert!(map.hero_pos_enabled);
        assert_eq!(map.hero_pos, FPoint::new(1.5, 1.5));
        let col = map.collision_tiles();
        assert_eq!(col[1], 1);
        assert_eq!(map.enemy_spawns.len(), 2);
        // spawns avoid the blocked tile
        for spawn in &map.enemy_spawns {
            let p = Point::from(spawn.pos);
            assert_ne!((p.x, p.y), (1, 0));
        }
    }

    #[test]
    fn bad_layer_width_is_structural() {
        let path = write_map(
            "broken.txt",
            "[header]\nwidth=4\nheight=2\n[layer]\ntype=collision\ndata=\n0,1,\n0,0,0,0,\n",
        );
        let settings = EngineSettings::default();
        let mut rng = GameRng::new(11);
        assert!(Map::load(&path, &settings, &mut rng).is_err());
    }

    #[test]
    fn deterministic_expansion_with_same_seed() {
        let path = write_map(
            "rand.txt",
            "[header]\nwidth=8\nheight=8\nhero_pos=0,0\n\
             [enemy]\ncategory=bat\nnumber=1,4\nlocation=0,0,8,8\nchance=75\n",
        );
        let settings = EngineSettings::default();
        let mut rng_a = GameRng::new(99);
        let mut rng_b = GameRng::new(99);
        let a = Map::load(&path, &settings, &mut rng_a).unwrap();
        let b = Map::load(&path, &settings, &mut rng_b).unwrap();
        let pos_a: Vec<_> = a.enemy_spawns.iter().map(|s| (s.pos.x, s.pos.y)).collect();
        let pos_b: Vec<_> = b.enemy_spawns.iter().map(|s| (s.pos.x, s.pos.y)).collect();
        assert_eq!(pos_a, pos_b);
    }
}
