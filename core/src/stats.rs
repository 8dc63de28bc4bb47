//! The fixed stat-vector layout shared by every entity.
//!
//! A stat block's numeric vector holds the engine stats below, followed by
//! one min/max pair per configured damage type. Elemental vulnerabilities
//! and primary attributes live in their own vectors; the effect engine
//! routes bonuses between the three using the offsets computed here.

/// Engine stats, in vector order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum Stat {
    HpMax = 0,
    HpRegen,
    HpPercent,
    MpMax,
    MpRegen,
    MpPercent,
    AbsorbMin,
    AbsorbMax,
    Accuracy,
    Avoidance,
    Crit,
    HpSteal,
    MpSteal,
    ReturnDamage,
    Reflect,
    Poise,
    Stealth,
    ItemFind,
    CurrencyFind,
    XpGain,
}

pub const STAT_COUNT: usize = 20;

/// Config-file keys, in the same order as the [`Stat`] enum.
pub const STAT_KEY: [&str; STAT_COUNT] = [
    "hp",
    "hp_regen",
    "hp_percent",
    "mp",
    "mp_regen",
    "mp_percent",
    "absorb_min",
    "absorb_max",
    "accuracy",
    "avoidance",
    "crit",
    "hp_steal",
    "mp_steal",
    "return_damage",
    "reflect_chance",
    "poise",
    "stealth",
    "item_find",
    "currency_find",
    "xp_gain",
];

impl Stat {
    pub fn from_key(key: &str) -> Option<Stat> {
        STAT_KEY
            .iter()
            .position(|k| *k == key)
            .map(|i| ALL_STATS[i])
    }
}

const ALL_STATS: [Stat; STAT_COUNT] = [
    Stat::HpMax,
    Stat::HpRegen,
    Stat::HpPercent,
    Stat::MpMax,
    Stat::MpRegen,
    Stat::MpPercent,
    Stat::AbsorbMin,
    Stat::AbsorbMax,
    Stat::Accuracy,
    Stat::Avoidance,
    Stat::Crit,
    Stat::HpSteal,
    Stat::MpSteal,
    Stat::ReturnDamage,
    Stat::Reflect,
    Stat::Poise,
    Stat::Stealth,
    Stat::ItemFind,
    Stat::CurrencyFind,
    Stat::XpGain,
];

/// One configured damage type: its id plus the min/max stat keys it
/// contributes to the stat vector (e.g. `dmg_melee_min` / `dmg_melee_max`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DamageType {
    pub id: String,
    pub min_key: String,
    pub max_key: String,
}

impl DamageType {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            min_key: format!("dmg_{}_min", id),
            max_key: format!("dmg_{}_max", id),
        }
    }
}

/// Which damage pair a power draws its base damage from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BaseDamage {
    /// The power declares absolute damage instead.
    #[default]
    None,
    /// Index into the damage-type table.
    Type(usize),
}

/// Offsets into the full stat/bonus layout for a given configuration.
#[derive(Clone, Copy, Debug)]
pub struct StatLayout {
    pub damage_type_count: usize,
    pub element_count: usize,
    pub primary_count: usize,
}

impl StatLayout {
    /// Length of a stat vector: engine stats plus a min/max pair per
    /// damage type.
    pub fn vector_len(&self) -> usize {
        STAT_COUNT + self.damage_type_count * 2
    }

    pub fn damage_min_index(&self, damage_type: usize) -> usize {
        STAT_COUNT + damage_type * 2
    }

    pub fn damage_max_index(&self, damage_type: usize) -> usize {
        STAT_COUNT + damage_type * 2 + 1
    }

    /// First index past the stat vector; elemental resists are addressed
    /// from here, primaries after those.
    pub fn resist_base(&self) -> usize {
        self.vector_len()
    }

    pub fn primary_base(&self) -> usize {
        self.vector_len() + self.element_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_keys_round_trip() {
        for (i, key) in STAT_KEY.iter().enumerate() {
            let stat = Stat::from_key(key).unwrap();
            assert_eq!(stat as usize, i);
        }
        assert!(Stat::from_key("not_a_stat").is_none());
    }

    #[test]
    fn layout_offsets() {
        let layout = StatLayout {
            damage_type_count: 3,
            element_count: 2,
            primary_count: 4,
        };
        assert_eq!(layout.vector_len(), STAT_COUNT + 6);
        assert_eq!(layout.damage_min_index(0), STAT_COUNT);
        assert_eq!(layout.damage_max_index(2), STAT_COUNT + 5);
        assert_eq!(layout.resist_base(), STAT_COUNT + 6);
        assert_eq!(layout.primary_base(), STAT_COUNT + 8);
    }
}
