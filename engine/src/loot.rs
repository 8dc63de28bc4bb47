//! Floor loot: drop-table resolution, the flying-loot animation, pickup
//! hit-testing, and currency autopickup.
//!
//! Weighted tables roll one chance number per drop call. Fixed entries
//! (chance 0) always drop. Among the weighted entries that beat the
//! roll, the lowest effective chance wins; equal chances tie-break by a
//! uniform pick.

use std::collections::VecDeque;

use emberfall_core::geometry::{calc_dist, FPoint, Point, Rect};
use emberfall_core::message::LogKind;
use emberfall_core::stats::Stat;
use emberfall_core::timer::Timer;

use crate::collision::{CollideType, MovementType};
use crate::ids::{EntityId, CURRENCY_ID};
use crate::items::ItemStack;
use crate::session::GameSession;
use crate::stat_block::LootEntry;

/// Ticks a fresh drop spends airborne before it can be picked up.
const FLYING_TICKS: u32 = 16;

pub struct LootDrop {
    pub stack: ItemStack,
    pub pos: FPoint,
    pub flying_timer: Timer,
    pub on_ground: bool,
    pub sound_played: bool,
    pub dropped_by_hero: bool,
}

/// A pending drop roll queued by a death or an event.
struct PendingDrop {
    table: Vec<LootEntry>,
    pos: FPoint,
    count_min: i32,
    count_max: i32,
}

#[derive(Default)]
pub struct LootManager {
    pub drops: Vec<LootDrop>,
    pending: VecDeque<PendingDrop>,
    /// Entities whose drop tables should be rolled this tick.
    dead_queue: VecDeque<EntityId>,
    tiles_to_unblock: Vec<Point>,
}

impl LootManager {
    pub fn handle_new_map(&mut self) {
        self.drops.clear();
        self.pending.clear();
        self.dead_queue.clear();
        self.tiles_to_unblock.clear();
    }

    /// Called by the damage pipeline when a creature dies.
    pub fn enqueue_entity_drop(&mut self, id: EntityId) {
        self.dead_queue.push_back(id);
    }

    /// Queue a one-entry table (event loot).
    pub fn queue_table_drop(&mut self, entry: LootEntry, pos: FPoint, count: (i32, i32)) {
        self.pending.push_back(PendingDrop {
            table: vec![entry],
            pos,
            count_min: count.0,
            count_max: count.1,
        });
    }
}

impl GameSession {
    /// Per-tick loot logic: animate flying drops, play landing sounds,
    /// resolve queued tables, release temporary tile blocks.
    pub fn loot_logic(&mut self) {
        for i in 0..self.loot.drops.len() {
            let drop = &mut self.loot.drops[i];
            if !drop.on_ground {
                if drop.flying_timer.tick() {
                    drop.on_ground = true;
                }
            }
            if drop.on_ground && !drop.sound_played && !drop.stack.is_empty() {
                let sound = self
                    .items
                    .get(drop.stack.item)
                    .map(|d| d.pickup_sound)
                    .unwrap_or(crate::assets::SOUND_NONE);
                let pos = drop.pos;
                self.loot.drops[i].sound_played = true;
                self.mixer.play(sound, "loot_land", Some(pos), false);
            }
        }

        self.resolve_dead_queue();
        while let Some(pending) = self.loot.pending.pop_front() {
            self.roll_pending(pending);
        }

        // clear tiles that were blocked to space out dropped loot
        let tiles = std::mem::take(&mut self.loot.tiles_to_unblock);
        for t in tiles {
            self.collision.unblock(t.x as f32 + 0.5, t.y as f32 + 0.5);
        }

        self.autopickup();
    }

    fn resolve_dead_queue(&mut self) {
        while let Some(id) = self.loot.dead_queue.pop_front() {
            let (mut table, pos, count, quest_loot) = match self.entities.get(id) {
                Some(e) => (
                    e.stats.loot_table.clone(),
                    e.stats.pos,
                    e.stats.loot_count,
                    (
                        e.stats.quest_loot_id,
                        e.stats.quest_loot_requires_status.clone(),
                        e.stats.quest_loot_requires_not_status.clone(),
                    ),
                ),
                None => continue,
            };

            // quest loot rides along as a guaranteed drop when its
            // status gates pass
            let (quest_id, req, req_not) = quest_loot;
            if quest_id != 0
                && (req.is_empty() || self.campaign.check_status(&req))
                && (req_not.is_empty() || !self.campaign.check_status(&req_not))
            {
                table.push(LootEntry {
                    item: quest_id,
                    chance: 0,
                    quantity_min: 1,
                    quantity_max: 1,
                });
            }

            if table.is_empty() {
                continue;
            }

            let drops = if count.y != 0 {
                self.rng.rand_between(count.x, count.y)
            } else {
                self.rng.rand_between(1, self.settings.misc.drop_max)
            };
            // one pending entry carries all the rolls so fixed entries,
            // removed from the table as they land, drop only once
            if drops > 0 {
                self.roll_pending(PendingDrop {
                    table,
                    pos,
                    count_min: drops,
                    count_max: drops,
                });
            }

            if let Some(e) = self.entities.get_mut(id) {
                e.stats.loot_table.clear();
            }
        }
    }

    /// One drop call against a table: fixed entries always land, then at
    /// most one weighted entry per the fairness rule.
    fn roll_pending(&mut self, pending: PendingDrop) {
        let PendingDrop {
            mut table,
            pos,
            count_min,
            count_max,
        } = pending;

        let rolls = if count_max != 0 {
            self.rng.rand_between(count_min, count_max).max(1)
        } else {
            1
        };

        for _ in 0..rolls {
            let chance_roll = self.rng.rand_between(0, 99);

            // fixed drops first (chance == 0), removed from the table
            let mut i = table.len();
            while i > 0 {
                i -= 1;
                if table[i].chance == 0 {
                    let entry = table.remove(i);
                    self.place_drop(&entry, pos, false);
                }
            }

            // the weighted roll prefers the lowest qualifying chance
            let item_find = self
                .entities
                .get(self.hero)
                .map(|e| e.stats.get(Stat::ItemFind))
                .unwrap_or(0);
            let mut threshold = item_find + 100;
            let mut candidates: Vec<usize> = Vec::new();
            for (idx, entry) in table.iter().enumerate() {
                let real_chance = if entry.item != CURRENCY_ID {
                    ((entry.chance as f32) * (item_find + 100) as f32 / 100.0) as i32
                } else {
                    entry.chance
                };
                if real_chance >= chance_roll {
                    if real_chance <= threshold {
                        if real_chance != threshold {
                            candidates.clear();
                        }
                        threshold = real_chance;
                    }
                    if chance_roll <= threshold {
                        candidates.push(idx);
                    }
                }
            }
            if !candidates.is_empty() {
                let chosen = candidates[self.rng.rand_index(candidates.len())];
                let entry = table[chosen].clone();
                self.place_drop(&entry, pos, false);
            }
        }
    }

    /// Materialise one table entry on the floor near `pos`.
    fn place_drop(&mut self, entry: &LootEntry, pos: FPoint, dropped_by_hero: bool) {
        let src = Point::from(pos);
        let mut p = self.collision.get_random_neighbor(
            src,
            self.settings.misc.drop_radius,
            MovementType::Normal,
            CollideType::Normal,
            &mut self.rng,
        );

        let hero_pos = self
            .entities
            .get(self.hero)
            .map(|e| e.stats.pos)
            .unwrap_or(pos);
        if !self
            .collision
            .is_valid_position(p.x, p.y, MovementType::Normal, CollideType::NoEntity)
        {
            p = hero_pos;
        } else if Point::from(p) == src {
            // the roll failed to scatter; pile at the hero instead of
            // stacking invisible drops on one tile
            p = hero_pos;
        } else {
            self.collision.block(p.x, p.y, false);
            self.loot.tiles_to_unblock.push(Point::from(p));
        }

        let mut quantity = self.rng.rand_between(entry.quantity_min, entry.quantity_max);
        let item = if entry.item == CURRENCY_ID {
            let find = self
                .entities
                .get(self.hero)
                .map(|e| e.stats.get(Stat::CurrencyFind))
                .unwrap_or(0);
            quantity = quantity * (100 + find) / 100;
            CURRENCY_ID
        } else {
            entry.item
        };

        self.add_loot(ItemStack::new(item, quantity), p, dropped_by_hero);
    }

    pub fn add_loot(&mut self, stack: ItemStack, pos: FPoint, dropped_by_hero: bool) {
        if !self.items.is_valid(stack.item) {
            log::error!("LootManager: item id {} is not valid", stack.item);
            return;
        }
        let mut flying_timer = Timer::new(FLYING_TICKS);
        flying_timer.reset(emberfall_core::timer::TimerReset::Begin);
        self.loot.drops.push(LootDrop {
            stack,
            pos,
            flying_timer,
            on_ground: false,
            sound_played: false,
            dropped_by_hero,
        });
    }

    /// Currency near the hero (not dropped by them) is vacuumed up.
    fn autopickup(&mut self) {
        let hero_pos = match self.entities.get(self.hero) {
            Some(e) => e.stats.pos,
            None => return,
        };
        let range = self.settings.misc.autopickup_range;

        let mut i = 0;
        while i < self.loot.drops.len() {
            let d = &self.loot.drops[i];
            let eligible = d.on_ground
                && !d.dropped_by_hero
                && d.stack.item == CURRENCY_ID
                && calc_dist(d.pos, hero_pos) < range;
            if eligible {
                let drop = self.loot.drops.remove(i);
                self.inventory.add_currency(drop.stack.quantity as i64);
                self.play_currency_sound();
                continue;
            }
            i += 1;
        }
    }

    /// Mouse pickup: the grounded drop whose tile rectangle contains the
    /// click. Returns the claimed stack.
    pub fn pickup_loot_at(&mut self, map_pos: FPoint) -> Option<ItemStack> {
        let tile = Point::from(map_pos);
        let idx = self.loot.drops.iter().position(|d| {
            d.on_ground && Rect::new(tile.x, tile.y, 1, 1).contains(Point::from(d.pos))
        })?;
        Some(self.claim_drop(idx))
    }

    /// Keyboard pickup: the nearest grounded drop within interact range.
    pub fn pickup_nearest_loot(&mut self) -> Option<ItemStack> {
        let hero_pos = self.entities.get(self.hero).map(|e| e.stats.pos)?;
        let range = self.settings.misc.interact_range;
        let mut best: Option<(f32, usize)> = None;
        for (i, d) in self.loot.drops.iter().enumerate() {
            if !d.on_ground {
                continue;
            }
            let dist = calc_dist(hero_pos, d.pos);
            if dist <= range && best.map(|(bd, _)| dist < bd).unwrap_or(true) {
                best = Some((dist, i));
            }
        }
        best.map(|(_, i)| self.claim_drop(i))
    }

    fn claim_drop(&mut self, index: usize) -> ItemStack {
        let drop = self.loot.drops.remove(index);
        if drop.stack.item == CURRENCY_ID {
            self.inventory.add_currency(drop.stack.quantity as i64);
            self.play_currency_sound();
            self.msgs.log(
                &format!("You receive {} currency.", drop.stack.quantity),
                LogKind::Normal,
            );
        } else {
            self.inventory.add(drop.stack.item, drop.stack.quantity);
            let name = self.items.name(drop.stack.item).to_string();
            self.msgs
                .log(&format!("You receive {}.", name), LogKind::Normal);
        }
        drop.stack
    }
}
