/******************************************************************************
 *                                                                            *
 * Shared gameplay enums used across zone, device, and battery tables.        *
 * These are persisted as column types, so every variant addition is a        *
 * schema change for connected clients.                                       *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::SpacetimeType;

/// Categorical tag driving spawn tables and danger modifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, SpacetimeType)]
pub enum Biome {
    Forest,
    Mountain,
    Industrial,
    Urban,
    Water,
    Radioactive,
    Chemical,
}

impl Biome {
    /// Minimum player/zone tier at which this biome exists at all.
    pub fn min_tier(&self) -> u32 {
        match self {
            Biome::Forest => 0,
            Biome::Mountain | Biome::Urban | Biome::Water => 1,
            Biome::Industrial => 2,
            Biome::Radioactive => 3,
            Biome::Chemical => 4,
        }
    }

    /// Biomes a player of the given tier can access. Availability is
    /// monotone in tier: everything unlocked earlier stays unlocked.
    pub fn available_for_tier(tier: u32) -> Vec<Biome> {
        let mut biomes = vec![Biome::Forest];
        if tier >= 1 {
            biomes.extend([Biome::Mountain, Biome::Urban, Biome::Water]);
        }
        if tier >= 2 {
            biomes.push(Biome::Industrial);
        }
        if tier >= 3 {
            biomes.push(Biome::Radioactive);
        }
        if tier >= 4 {
            biomes.push(Biome::Chemical);
        }
        biomes
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Biome::Forest => "forest",
            Biome::Mountain => "mountain",
            Biome::Industrial => "industrial",
            Biome::Urban => "urban",
            Biome::Water => "water",
            Biome::Radioactive => "radioactive",
            Biome::Chemical => "chemical",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, SpacetimeType)]
pub enum DangerLevel {
    Low,
    Medium,
    High,
    Extreme,
    Deadly,
}

impl DangerLevel {
    /// Danger scales directly with the zone tier.
    pub fn for_tier(tier: u32) -> DangerLevel {
        match tier {
            0 => DangerLevel::Low,
            1 => DangerLevel::Medium,
            2 => DangerLevel::High,
            3 => DangerLevel::Extreme,
            _ => DangerLevel::Deadly,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, SpacetimeType)]
pub enum ZoneType {
    Dynamic,
    Static,
    Event,
}

/// Artifact rarity. Gear uses a numeric level instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, SpacetimeType)]
pub enum Rarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    /// Integer rank used for detector/scanner comparisons.
    pub fn rank(&self) -> u8 {
        match self {
            Rarity::Common => 0,
            Rarity::Rare => 1,
            Rarity::Epic => 2,
            Rarity::Legendary => 3,
        }
    }

    /// Highest rarity a player of the given tier may collect.
    pub fn max_for_tier(tier: u32) -> Rarity {
        match tier {
            0 => Rarity::Common,
            1 => Rarity::Rare,
            2 => Rarity::Epic,
            _ => Rarity::Legendary,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rarity::Common => "common",
            Rarity::Rare => "rare",
            Rarity::Epic => "epic",
            Rarity::Legendary => "legendary",
        }
    }

    pub fn parse(s: &str) -> Option<Rarity> {
        match s {
            "common" => Some(Rarity::Common),
            "rare" => Some(Rarity::Rare),
            "epic" => Some(Rarity::Epic),
            "legendary" => Some(Rarity::Legendary),
            _ => None,
        }
    }
}

/// Highest gear level a player of the given tier may collect.
pub fn max_gear_level_for_tier(tier: u32) -> u32 {
    match tier {
        0 => 2,
        1 => 4,
        2 => 6,
        3 => 8,
        _ => 10,
    }
}

/// What kind of thing an inventory row is a stack of.
#[derive(Clone, Copy, Debug, PartialEq, SpacetimeType)]
pub enum GameItemType {
    Artifact,
    Gear,
    DeployableScanner,
    ScannerBattery,
    HackTool,
}

/// Deployed device lifecycle. Background transitions come from the
/// periodic scheduler only; see the state machine in device.rs.
#[derive(Clone, Copy, Debug, PartialEq, SpacetimeType)]
pub enum DeviceStatus {
    Active,
    Depleted,
    Abandoned,
    Destroyed,
}

#[derive(Clone, Copy, Debug, PartialEq, SpacetimeType)]
pub enum BatteryStatus {
    Installed,
    Removed,
    Depleted,
}

#[derive(Clone, Copy, Debug, PartialEq, SpacetimeType)]
pub enum AccessLevel {
    Owner,
    Permanent,
    Temporary,
}

#[derive(Clone, Copy, Debug, PartialEq, SpacetimeType)]
pub enum ChargingStatus {
    Active,
    Completed,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, SpacetimeType)]
pub enum ClaimStatus {
    Pending,
    Approved,
    Paid,
    Rejected,
}

/// Which of the four marker queries produced a map marker. First query to
/// see a device wins; later queries never overwrite it.
#[derive(Clone, Copy, Debug, PartialEq, SpacetimeType)]
pub enum MarkerVisibility {
    Owner,
    Public,
    Hacker,
    ScanData,
}

#[derive(Clone, Copy, Debug, PartialEq, SpacetimeType)]
pub enum MarkerIcon {
    Red,
    Blue,
    Gray,
    DarkGray,
    Green,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn biome_availability_is_monotone_in_tier() {
        for tier in 0..4u32 {
            let lower = Biome::available_for_tier(tier);
            let upper = Biome::available_for_tier(tier + 1);
            for biome in &lower {
                assert!(upper.contains(biome), "{:?} lost at tier {}", biome, tier + 1);
            }
        }
        assert_eq!(Biome::available_for_tier(0), vec![Biome::Forest]);
        assert_eq!(Biome::available_for_tier(4).len(), 7);
    }

    #[test]
    fn biome_min_tier_matches_unlock_tier() {
        for tier in 0..=4u32 {
            for biome in Biome::available_for_tier(tier) {
                assert!(biome.min_tier() <= tier);
            }
        }
        assert!(!Biome::available_for_tier(2).contains(&Biome::Radioactive));
    }

    #[test]
    fn rarity_rank_orders_variants() {
        assert!(Rarity::Common.rank() < Rarity::Rare.rank());
        assert!(Rarity::Rare.rank() < Rarity::Epic.rank());
        assert!(Rarity::Epic.rank() < Rarity::Legendary.rank());
    }

    #[test]
    fn rarity_round_trips_through_strings() {
        for rarity in [Rarity::Common, Rarity::Rare, Rarity::Epic, Rarity::Legendary] {
            assert_eq!(Rarity::parse(rarity.as_str()), Some(rarity));
        }
        assert_eq!(Rarity::parse("mythic"), None);
    }
}
