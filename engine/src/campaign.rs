//! Campaign status flags and the reward plumbing quest logic uses.
//! Statuses are interned strings mapped to booleans; set/unset events
//! are also queued so outside observers (quest log) can react.

use std::collections::HashMap;

use emberfall_core::message::LogKind;
use emberfall_core::stats::Stat;

use crate::ids::ItemId;
use crate::session::GameSession;

pub type StatusId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusEvent {
    Set(StatusId),
    Unset(StatusId),
}

#[derive(Default)]
pub struct CampaignManager {
    names: Vec<String>,
    by_name: HashMap<String, StatusId>,
    values: Vec<bool>,
    /// Observable set/unset history since the last drain.
    pub status_events: Vec<StatusEvent>,
}

impl CampaignManager {
    pub fn register_status(&mut self, name: &str) -> StatusId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = self.names.len();
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), id);
        self.values.push(false);
        id
    }

    pub fn status_name(&self, id: StatusId) -> Option<&str> {
        self.names.get(id).map(|s| s.as_str())
    }

    pub fn check_status(&self, name: &str) -> bool {
        self.by_name
            .get(name)
            .map(|&id| self.values[id])
            .unwrap_or(false)
    }

    pub fn set_status(&mut self, name: &str) {
        let id = self.register_status(name);
        if !self.values[id] {
            self.values[id] = true;
            self.status_events.push(StatusEvent::Set(id));
        }
    }

    pub fn unset_status(&mut self, name: &str) {
        let id = self.register_status(name);
        if self.values[id] {
            self.values[id] = false;
            self.status_events.push(StatusEvent::Unset(id));
        }
    }

    pub fn reset_all(&mut self) {
        for v in &mut self.values {
            *v = false;
        }
        self.status_events.clear();
    }

    /// Names of every set status, for the save file.
    pub fn set_statuses(&self) -> Vec<String> {
        self.names
            .iter()
            .zip(&self.values)
            .filter(|(_, v)| **v)
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn drain_events(&mut self) -> Vec<StatusEvent> {
        std::mem::take(&mut self.status_events)
    }
}

impl GameSession {
    /// Award XP to the hero, scaled by the XP-gain stat, with the party
    /// share copied to living allies' effective growth via the same pool
    /// (allies level with the hero, so one pool suffices).
    pub fn reward_xp(&mut self, amount: u64, show_message: bool) {
        let hero = self.hero;
        let scaled = {
            let gain = self
                .entities
                .get(hero)
                .map(|e| e.stats.get(Stat::XpGain))
                .unwrap_or(0)
                .max(0) as u64;
            (amount * (100 + gain)) / 100
        };
        if let Some(e) = self.entities.get_mut(hero) {
            e.stats.add_xp(scaled);
        }
        if show_message {
            self.msgs
                .log(&format!("You receive {} XP.", scaled), LogKind::Normal);
        }
    }

    pub fn reward_currency(&mut self, amount: i32) {
        if amount <= 0 {
            return;
        }
        self.inventory.add_currency(amount as i64);
        self.msgs.log(
            &format!("You receive {} currency.", amount),
            LogKind::Normal,
        );
        self.play_currency_sound();
    }

    pub fn reward_item(&mut self, item: ItemId, quantity: i32) {
        if !self.items.is_valid(item) {
            log::error!("CampaignManager: reward of unknown item {}", item);
            return;
        }
        self.inventory.add(item, quantity);
        let name = self.items.name(item).to_string();
        self.msgs
            .log(&format!("You receive {}.", name), LogKind::Normal);
    }

    /// `restore=hp|mp|hpmp|status|all`
    pub fn restore_hpmp(&mut self, what: &str) {
        let hero = self.hero;
        let Some(e) = self.entities.get_mut(hero) else {
            return;
        };
        let s = &mut e.stats;
        match what {
            "hp" => s.hp = s.get(Stat::HpMax),
            "mp" => s.mp = s.get(Stat::MpMax),
            "hpmp" => {
                s.hp = s.get(Stat::HpMax);
                s.mp = s.get(Stat::MpMax);
            }
            "status" => s.effects.clear_effects(),
            "all" => {
                s.hp = s.get(Stat::HpMax);
                s.mp = s.get(Stat::MpMax);
                s.effects.clear_effects();
            }
            other => log::error!("CampaignManager: unknown restore target '{}'", other),
        }
    }

    pub fn play_currency_sound(&mut self) {
        let id = self.items.currency_sound;
        if id != crate::assets::SOUND_NONE {
            self.mixer.play(id, "currency", None, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_intern_and_toggle() {
        let mut camp = CampaignManager::default();
        assert!(!camp.check_status("gate_open"));
        camp.set_status("gate_open");
        assert!(camp.check_status("gate_open"));
        camp.unset_status("gate_open");
        assert!(!camp.check_status("gate_open"));

        // same name resolves to the same id
        let a = camp.register_status("gate_open");
        let b = camp.register_status("gate_open");
        assert_eq!(a, b);
    }

    #[test]
    fn set_unset_events_are_observable() {
        let mut camp = CampaignManager::default();
        camp.set_status("a");
        camp.set_status("a"); // no duplicate event for a no-op set
        camp.unset_status("a");
        let events = camp.drain_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StatusEvent::Set(_)));
        assert!(matches!(events[1], StatusEvent::Unset(_)));
        assert!(camp.drain_events().is_empty());
    }

    #[test]
    fn save_lists_only_set_statuses() {
        let mut camp = CampaignManager::default();
        camp.set_status("one");
        camp.set_status("two");
        camp.unset_status("one");
        assert_eq!(camp.set_statuses(), vec!["two".to_string()]);
    }
}
