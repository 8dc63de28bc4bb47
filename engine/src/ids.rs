//! Handle types shared across the simulation.
//!
//! Entities refer to one another (summoner links, hazard sources, AI
//! targets) through `EntityId` handles into the entity arena. A slot's
//! generation is bumped when it is vacated, so stale handles resolve to
//! nothing instead of to a recycled entity.

use serde::{Deserialize, Serialize};

pub type PowerId = usize;
pub type ItemId = usize;

/// The no-op power every unresolved reference collapses to.
pub const POWER_NONE: PowerId = 0;

/// Item id 0 is currency.
pub const CURRENCY_ID: ItemId = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId {
    pub index: u32,
    pub generation: u32,
}

impl EntityId {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}
