//! The minimal item surface the combat core needs: a catalog for
//! validity, names and pickup sounds, and the hero's carried/equipped/
//! stash storage that powers, loot, and events interact with.

use std::path::Path;

use serde::{Deserialize, Serialize};

use emberfall_core::file_parser::FileParser;
use emberfall_core::parse;

use crate::assets::{SoundCatalog, SoundId, SOUND_NONE};
use crate::ids::{ItemId, CURRENCY_ID};

#[derive(Clone, Debug)]
pub struct ItemDef {
    pub name: String,
    pub max_quantity: i32,
    pub pickup_sound: SoundId,
    /// Equip flags granted while the item is worn.
    pub equip_flags: Vec<String>,
}

pub struct ItemCatalog {
    items: Vec<ItemDef>,
    pub currency_sound: SoundId,
}

impl Default for ItemCatalog {
    fn default() -> Self {
        Self {
            // id 0 is currency
            items: vec![ItemDef {
                name: "Gold".to_string(),
                max_quantity: i32::MAX,
                pickup_sound: SOUND_NONE,
                equip_flags: Vec::new(),
            }],
            currency_sound: SOUND_NONE,
        }
    }
}

impl ItemCatalog {
    pub fn is_valid(&self, id: ItemId) -> bool {
        id < self.items.len()
    }

    pub fn name(&self, id: ItemId) -> &str {
        self.items
            .get(id)
            .map(|i| i.name.as_str())
            .unwrap_or("unknown item")
    }

    pub fn get(&self, id: ItemId) -> Option<&ItemDef> {
        self.items.get(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn load(path: &Path, sounds: &mut SoundCatalog) -> Self {
        let mut catalog = ItemCatalog::default();
        let Ok(mut infile) = FileParser::open(path) else {
            log::info!("ItemCatalog: no items file at '{}'", path.display());
            return catalog;
        };

        let mut current: Option<(ItemId, ItemDef)> = None;
        while infile.next() {
            if infile.new_section && infile.section == "item" {
                if let Some((id, def)) = current.take() {
                    catalog.install(id, def);
                }
                current = Some((
                    0,
                    ItemDef {
                        name: String::new(),
                        max_quantity: 1,
                        pickup_sound: SOUND_NONE,
                        equip_flags: Vec::new(),
                    },
                ));
            }
            let Some((id, def)) = current.as_mut() else {
                infile.error("ItemCatalog: key outside an [item] section");
                continue;
            };
            match infile.key.as_str() {
                "id" => *id = parse::to_int(&infile.val, 0).max(0) as usize,
                "name" => def.name = infile.val.clone(),
                "max_quantity" => def.max_quantity = parse::to_int(&infile.val, 1).max(1),
                "soundfx" => def.pickup_sound = sounds.load(&infile.val),
                "equip_flags" => {
                    let mut val = infile.val.clone();
                    loop {
                        let f = parse::pop_first_string(&mut val);
                        if f.is_empty() {
                            break;
                        }
                        def.equip_flags.push(f);
                    }
                }
                _ => infile.error("ItemCatalog: unknown key"),
            }
        }
        if let Some((id, def)) = current.take() {
            catalog.install(id, def);
        }
        catalog
    }

    fn install(&mut self, id: ItemId, def: ItemDef) {
        if id == CURRENCY_ID {
            self.currency_sound = def.pickup_sound;
            self.items[CURRENCY_ID] = def;
            return;
        }
        if id >= self.items.len() {
            self.items.resize(
                id + 1,
                ItemDef {
                    name: String::new(),
                    max_quantity: 1,
                    pickup_sound: SOUND_NONE,
                    equip_flags: Vec::new(),
                },
            );
        }
        self.items[id] = def;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub item: ItemId,
    pub quantity: i32,
}

impl ItemStack {
    pub fn new(item: ItemId, quantity: i32) -> Self {
        Self { item, quantity }
    }

    pub fn is_empty(&self) -> bool {
        self.quantity <= 0
    }
}

/// The hero's storage. Equipment is a flat slot list; the combat core
/// only cares about which ids are worn and which equip flags they grant.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Inventory {
    pub carried: Vec<ItemStack>,
    pub stash: Vec<ItemStack>,
    pub equipped: Vec<ItemId>,
    pub currency: i64,
}

impl Inventory {
    pub fn add(&mut self, item: ItemId, quantity: i32) {
        if quantity <= 0 {
            return;
        }
        if item == CURRENCY_ID {
            self.currency += quantity as i64;
            return;
        }
        if let Some(stack) = self.carried.iter_mut().find(|s| s.item == item) {
            stack.quantity += quantity;
        } else {
            self.carried.push(ItemStack::new(item, quantity));
        }
    }

    /// Remove up to `quantity`; returns false when not enough was held.
    pub fn remove(&mut self, item: ItemId, quantity: i32) -> bool {
        let Some(idx) = self.carried.iter().position(|s| s.item == item) else {
            return false;
        };
        if self.carried[idx].quantity < quantity {
            return false;
        }
        self.carried[idx].quantity -= quantity;
        if self.carried[idx].quantity == 0 {
            self.carried.remove(idx);
        }
        true
    }

    pub fn count(&self, item: ItemId) -> i32 {
        self.carried
            .iter()
            .filter(|s| s.item == item)
            .map(|s| s.quantity)
            .sum()
    }

    pub fn add_currency(&mut self, amount: i64) {
        self.currency += amount.max(0);
    }

    pub fn remove_currency(&mut self, amount: i64) -> bool {
        if self.currency < amount {
            return false;
        }
        self.currency -= amount;
        true
    }

    pub fn equipped_has(&self, item: ItemId) -> bool {
        self.equipped.contains(&item)
    }

    /// Unequip one instance in slot order: the first-registered slot of
    /// the id is the one consumed.
    pub fn remove_equipped(&mut self, item: ItemId) -> bool {
        if let Some(idx) = self.equipped.iter().position(|e| *e == item) {
            self.equipped.remove(idx);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_goes_to_the_purse() {
        let mut inv = Inventory::default();
        inv.add(CURRENCY_ID, 25);
        assert_eq!(inv.currency, 25);
        assert!(inv.carried.is_empty());
    }

    #[test]
    fn stacks_merge_and_deplete() {
        let mut inv = Inventory::default();
        inv.add(3, 2);
        inv.add(3, 3);
        assert_eq!(inv.count(3), 5);
        assert!(inv.remove(3, 5));
        assert_eq!(inv.count(3), 0);
        assert!(!inv.remove(3, 1));
    }

    #[test]
    fn first_registered_equipped_instance_is_consumed() {
        let mut inv = Inventory::default();
        inv.equipped = vec![7, 9, 7];
        assert!(inv.remove_equipped(7));
        assert_eq!(inv.equipped, vec![9, 7]);
    }
}
