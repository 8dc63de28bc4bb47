//! Save-state emission: the player-facing state the core promises to
//! persist, encoded with bincode and gzip-compressed. The structure is
//! the contract; the bytes are not.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use emberfall_core::geometry::FPoint;
use emberfall_core::stats::Stat;

use crate::items::Inventory;
use crate::session::GameSession;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SaveState {
    /// Written-at timestamp, RFC 3339.
    pub saved_at: String,
    pub class: String,
    pub name: String,
    pub level: i32,
    pub xp: u64,
    pub primary: Vec<i32>,
    pub unlocked_powers: Vec<usize>,
    pub inventory: Inventory,
    pub current_map: String,
    pub hero_pos: FPoint,
    pub statuses: Vec<String>,
    pub time_played: u64,
}

impl GameSession {
    /// Snapshot the persistent player state.
    pub fn save_state(&self) -> SaveState {
        let hero = self.entities.get(self.hero);
        SaveState {
            saved_at: chrono::Utc::now().to_rfc3339(),
            class: self.hero_class.clone(),
            name: hero.map(|e| e.stats.name.clone()).unwrap_or_default(),
            level: hero.map(|e| e.stats.level).unwrap_or(1),
            xp: hero.map(|e| e.stats.xp).unwrap_or(0),
            primary: hero.map(|e| e.stats.primary.clone()).unwrap_or_default(),
            unlocked_powers: hero
                .map(|e| e.stats.powers_list.clone())
                .unwrap_or_default(),
            inventory: self.inventory.clone(),
            current_map: self.map.filename.clone(),
            hero_pos: hero.map(|e| e.stats.pos).unwrap_or_default(),
            statuses: self.campaign.set_statuses(),
            time_played: self.avatar.time_played,
        }
    }

    pub fn write_save(&self, path: &Path) -> Result<()> {
        let state = self.save_state();
        let bytes = bincode::serde::encode_to_vec(&state, bincode::config::standard())
            .context("save: encode failed")?;

        let file =
            File::create(path).with_context(|| format!("save: cannot create '{}'", path.display()))?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder
            .write_all(&bytes)
            .context("save: write failed")?;
        encoder.finish().context("save: flush failed")?;
        log::info!("save: wrote '{}'", path.display());
        Ok(())
    }

    /// Restore a save into the current session: hero identity and
    /// position, inventory, statuses. The map itself is loaded by the
    /// caller from `SaveState::current_map`.
    pub fn apply_save(&mut self, state: &SaveState) {
        let hero = self.hero;
        self.hero_class = state.class.clone();
        let settings = &self.settings;
        if let Some(e) = self.entities.get_mut(hero) {
            e.stats.name = state.name.clone();
            e.stats.xp = state.xp;
            if state.primary.len() == e.stats.primary.len() {
                e.stats.primary = state.primary.clone();
            }
            e.stats.powers_list = state.unlocked_powers.clone();
            e.stats.recalc(settings);
            e.stats.pos = state.hero_pos;
            // recalc refills; a save keeps the refill (spawn-fresh rule)
            debug_assert!(e.stats.hp == e.stats.get(Stat::HpMax));
        }
        self.inventory = state.inventory.clone();
        self.campaign.reset_all();
        for s in &state.statuses {
            self.campaign.set_status(s);
        }
        self.avatar.time_played = state.time_played;
    }
}

pub fn read_save(path: &Path) -> Result<SaveState> {
    let file =
        File::open(path).with_context(|| format!("save: cannot open '{}'", path.display()))?;
    let mut decoder = GzDecoder::new(file);
    let mut bytes = Vec::new();
    decoder
        .read_to_end(&mut bytes)
        .context("save: read failed")?;
    let (state, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
        .context("save: decode failed")?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberfall_core::settings::EngineSettings;

    #[test]
    fn save_round_trip() {
        let mut session =
            crate::session::GameSession::new_headless(EngineSettings::default(), 1, 8, 8);
        session.inventory.add(0, 120);
        session.campaign.set_status("met_the_guide");
        let hero = session.hero;
        if let Some(e) = session.entities.get_mut(hero) {
            e.stats.name = "Ember".to_string();
            e.stats.xp = 250;
        }

        let dir = std::env::temp_dir().join("emberfall_save_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("slot1.sav");
        session.write_save(&path).unwrap();

        let restored = read_save(&path).unwrap();
        assert_eq!(restored.name, "Ember");
        assert_eq!(restored.xp, 250);
        assert_eq!(restored.inventory.currency, 120);
        assert_eq!(restored.statuses, vec!["met_the_guide".to_string()]);
    }
}
