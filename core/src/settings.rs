//! Engine settings: the tuning values, combat clamps, and configured
//! tables (damage types, elements, primary stats, XP thresholds) that
//! the simulation reads but never writes.
//!
//! Files live under `<data>/engine/`. A missing file leaves the defaults
//! in place; a malformed directive is logged and skipped.

use std::path::Path;

use anyhow::Result;

use crate::file_parser::FileParser;
use crate::parse;
use crate::stats::{DamageType, StatLayout};

#[derive(Clone, Debug)]
pub struct CombatSettings {
    pub min_absorb: i32,
    pub max_absorb: i32,
    pub min_resist: i32,
    pub max_resist: i32,
    pub min_block: i32,
    pub max_block: i32,
    pub min_avoidance: i32,
    pub max_avoidance: i32,
    pub min_crit_damage: i32,
    pub max_crit_damage: i32,
    pub min_overhit_damage: i32,
    pub max_overhit_damage: i32,
    pub min_miss_damage: i32,
    pub max_miss_damage: i32,
}

impl Default for CombatSettings {
    fn default() -> Self {
        Self {
            min_absorb: 0,
            max_absorb: 100,
            min_resist: 0,
            max_resist: 100,
            min_block: 0,
            max_block: 100,
            min_avoidance: 0,
            max_avoidance: 99,
            min_crit_damage: 200,
            max_crit_damage: 200,
            min_overhit_damage: 100,
            max_overhit_damage: 100,
            min_miss_damage: 0,
            max_miss_damage: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MiscSettings {
    pub max_frames_per_sec: u32,
    pub camera_speed: f32,
    pub encounter_dist: f32,
    pub interact_range: f32,
    pub autopickup_range: f32,
    pub corpse_timeout: u32,
    pub low_hp_threshold: i32,
    pub party_exp_percentage: i32,
    pub drop_radius: i32,
    pub drop_max: i32,
    pub enable_ally_collision: bool,
    pub enable_ally_collision_ai: bool,
    pub mouse_move_deadzone: f32,
    pub path_limit: u32,
    pub save_onload: bool,
}

impl Default for MiscSettings {
    fn default() -> Self {
        Self {
            max_frames_per_sec: 60,
            camera_speed: 10.0,
            encounter_dist: 9.0,
            interact_range: 3.0,
            autopickup_range: 1.5,
            corpse_timeout: 60 * 60,
            low_hp_threshold: 20,
            party_exp_percentage: 100,
            drop_radius: 1,
            drop_max: 1,
            enable_ally_collision: true,
            enable_ally_collision_ai: true,
            mouse_move_deadzone: 0.5,
            path_limit: 256,
            save_onload: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ElementDef {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct PrimaryStatDef {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub combat: CombatSettings,
    pub misc: MiscSettings,
    pub damage_types: Vec<DamageType>,
    pub elements: Vec<ElementDef>,
    pub primary_stats: Vec<PrimaryStatDef>,
    pub xp_table: Vec<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            combat: CombatSettings::default(),
            misc: MiscSettings::default(),
            damage_types: vec![
                DamageType::new("melee"),
                DamageType::new("ranged"),
                DamageType::new("ment"),
            ],
            elements: Vec::new(),
            primary_stats: Vec::new(),
            xp_table: vec![0],
        }
    }
}

impl EngineSettings {
    pub fn layout(&self) -> StatLayout {
        StatLayout {
            damage_type_count: self.damage_types.len(),
            element_count: self.elements.len(),
            primary_count: self.primary_stats.len(),
        }
    }

    pub fn element_index(&self, id: &str) -> Option<usize> {
        self.elements.iter().position(|e| e.id == id)
    }

    pub fn primary_index(&self, id: &str) -> Option<usize> {
        self.primary_stats.iter().position(|p| p.id == id)
    }

    pub fn damage_type_index(&self, id: &str) -> Option<usize> {
        self.damage_types.iter().position(|d| d.id == id)
    }

    pub fn load(data_dir: &Path) -> Result<Self> {
        let mut settings = EngineSettings::default();
        let engine = data_dir.join("engine");

        settings.load_misc(&engine.join("misc.txt"));
        settings.load_combat(&engine.join("combat.txt"));
        settings.load_damage_types(&engine.join("damage_types.txt"));
        settings.load_elements(&engine.join("elements.txt"));
        settings.load_primary_stats(&engine.join("primary_stats.txt"));
        settings.load_xp_table(&engine.join("xp_table.txt"));

        Ok(settings)
    }

    fn load_misc(&mut self, path: &Path) {
        let Ok(mut infile) = FileParser::open(path) else {
            return;
        };
        let fps = self.misc.max_frames_per_sec;
        while infile.next() {
            let m = &mut self.misc;
            match infile.key.as_str() {
                "max_frames_per_sec" => m.max_frames_per_sec = parse::to_int(&infile.val, 60).max(1) as u32,
                "camera_speed" => m.camera_speed = parse::to_float(&infile.val, 10.0).max(1.0),
                "encounter_dist" => m.encounter_dist = parse::to_float(&infile.val, 9.0),
                "interact_range" => m.interact_range = parse::to_float(&infile.val, 3.0),
                "autopickup_range" => m.autopickup_range = parse::to_float(&infile.val, 1.5),
                "corpse_timeout" => m.corpse_timeout = parse::to_duration(&infile.val, fps),
                "low_hp_threshold" => m.low_hp_threshold = parse::to_int(&infile.val, 20),
                "party_exp_percentage" => m.party_exp_percentage = parse::to_int(&infile.val, 100),
                "drop_radius" => m.drop_radius = parse::to_int(&infile.val, 1),
                "drop_max" => m.drop_max = parse::to_int(&infile.val, 1).max(1),
                "enable_ally_collision" => m.enable_ally_collision = parse::to_bool(&infile.val),
                "enable_ally_collision_ai" => m.enable_ally_collision_ai = parse::to_bool(&infile.val),
                "mouse_move_deadzone" => m.mouse_move_deadzone = parse::to_float(&infile.val, 0.5),
                "path_limit" => m.path_limit = parse::to_int(&infile.val, 256).max(0) as u32,
                "save_onload" => m.save_onload = parse::to_bool(&infile.val),
                _ => infile.error("misc: unknown key"),
            }
        }
    }

    fn load_combat(&mut self, path: &Path) {
        let Ok(mut infile) = FileParser::open(path) else {
            return;
        };
        while infile.next() {
            let c = &mut self.combat;
            match infile.key.as_str() {
                "absorb_percent" => {
                    let mut val = infile.val.clone();
                    c.min_absorb = parse::pop_first_int(&mut val);
                    c.max_absorb = parse::pop_first_int(&mut val).max(c.min_absorb);
                }
                "resist_percent" => {
                    let mut val = infile.val.clone();
                    c.min_resist = parse::pop_first_int(&mut val);
                    c.max_resist = parse::pop_first_int(&mut val).max(c.min_resist);
                }
                "block_percent" => {
                    let mut val = infile.val.clone();
                    c.min_block = parse::pop_first_int(&mut val);
                    c.max_block = parse::pop_first_int(&mut val).max(c.min_block);
                }
                "avoidance_percent" => {
                    let mut val = infile.val.clone();
                    c.min_avoidance = parse::pop_first_int(&mut val);
                    c.max_avoidance = parse::pop_first_int(&mut val).max(c.min_avoidance);
                }
                "crit_damage_percent" => {
                    let mut val = infile.val.clone();
                    c.min_crit_damage = parse::pop_first_int(&mut val);
                    c.max_crit_damage = parse::pop_first_int(&mut val).max(c.min_crit_damage);
                }
                "overhit_damage_percent" => {
                    let mut val = infile.val.clone();
                    c.min_overhit_damage = parse::pop_first_int(&mut val);
                    c.max_overhit_damage = parse::pop_first_int(&mut val).max(c.min_overhit_damage);
                }
                "miss_damage_percent" => {
                    let mut val = infile.val.clone();
                    c.min_miss_damage = parse::pop_first_int(&mut val);
                    c.max_miss_damage = parse::pop_first_int(&mut val).max(c.min_miss_damage);
                }
                _ => infile.error("combat: unknown key"),
            }
        }
    }

    fn load_damage_types(&mut self, path: &Path) {
        let Ok(mut infile) = FileParser::open(path) else {
            return;
        };
        let mut types = Vec::new();
        while infile.next() {
            if infile.new_section && infile.section == "damage_type" {
                types.push(DamageType::new(""));
            }
            let Some(dt) = types.last_mut() else {
                infile.error("damage_types: key outside a [damage_type] section");
                continue;
            };
            match infile.key.as_str() {
                "id" => {
                    *dt = DamageType::new(&infile.val);
                }
                "min" => dt.min_key = infile.val.clone(),
                "max" => dt.max_key = infile.val.clone(),
                "name" | "description" => {}
                _ => infile.error("damage_types: unknown key"),
            }
        }
        if !types.is_empty() {
            self.damage_types = types;
        }
    }

    fn load_elements(&mut self, path: &Path) {
        let Ok(mut infile) = FileParser::open(path) else {
            return;
        };
        while infile.next() {
            if infile.new_section && infile.section == "element" {
                self.elements.push(ElementDef {
                    id: String::new(),
                    name: String::new(),
                });
            }
            let Some(el) = self.elements.last_mut() else {
                infile.error("elements: key outside an [element] section");
                continue;
            };
            match infile.key.as_str() {
                "id" => el.id = infile.val.clone(),
                "name" => el.name = infile.val.clone(),
                _ => infile.error("elements: unknown key"),
            }
        }
    }

    fn load_primary_stats(&mut self, path: &Path) {
        let Ok(mut infile) = FileParser::open(path) else {
            return;
        };
        while infile.next() {
            if infile.new_section && infile.section == "stat" {
                self.primary_stats.push(PrimaryStatDef {
                    id: String::new(),
                    name: String::new(),
                });
            }
            let Some(ps) = self.primary_stats.last_mut() else {
                infile.error("primary_stats: key outside a [stat] section");
                continue;
            };
            match infile.key.as_str() {
                "id" => ps.id = infile.val.clone(),
                "name" => ps.name = infile.val.clone(),
                _ => infile.error("primary_stats: unknown key"),
            }
        }
    }

    fn load_xp_table(&mut self, path: &Path) {
        let Ok(mut infile) = FileParser::open(path) else {
            return;
        };
        let mut table: Vec<u64> = Vec::new();
        while infile.next() {
            if infile.key == "level" {
                let mut val = infile.val.clone();
                let lvl = parse::pop_first_int(&mut val).max(1) as usize;
                let xp = parse::pop_first_string(&mut val).parse::<u64>().unwrap_or(0);
                if lvl > table.len() {
                    table.resize(lvl, 0);
                }
                table[lvl - 1] = xp;
            } else {
                infile.error("xp_table: unknown key");
            }
        }
        if table.is_empty() {
            log::error!("EngineSettings: no XP table defined, using a single level");
            table.push(0);
        }
        self.xp_table = table;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let s = EngineSettings::default();
        assert_eq!(s.damage_types.len(), 3);
        assert_eq!(s.damage_type_index("ranged"), Some(1));
        assert_eq!(s.layout().vector_len(), crate::stats::STAT_COUNT + 6);
        assert_eq!(s.xp_table.len(), 1);
    }
}
