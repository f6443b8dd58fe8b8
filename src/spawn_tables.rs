use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::models::{Biome, Rarity};

// --- Spawn Table System ---
//
// Each biome carries independent artifact and gear spawn tables. A table
// entry is one candidate item type; the zone spawner rolls every entry
// once per new zone, scaled by the zone tier.

#[derive(Clone, Debug)]
pub struct ArtifactSpawnEntry {
    pub name: &'static str,
    pub artifact_type: &'static str,
    pub rarity: Rarity,
    /// Base probability (0..1) that this entry spawns in a new zone.
    pub spawn_rate: f64,
}

#[derive(Clone, Debug)]
pub struct GearSpawnEntry {
    pub name: &'static str,
    pub gear_type: &'static str,
    /// Gear level 1..10.
    pub level: u32,
    pub spawn_rate: f64,
}

#[derive(Clone, Debug)]
pub struct BiomeSpawnTable {
    pub artifacts: Vec<ArtifactSpawnEntry>,
    /// Rolled independently of the regular table, with its own probability.
    pub exclusive_artifact: Option<(ArtifactSpawnEntry, f64)>,
    pub gear: Vec<GearSpawnEntry>,
}

// Per-zone population bounds shared by every biome.
pub const MAX_ARTIFACTS_PER_ZONE: usize = 5;
pub const MIN_ARTIFACTS_PER_ZONE: usize = 1;
pub const MAX_GEAR_PER_ZONE: usize = 3;
pub const MIN_GEAR_PER_ZONE: usize = 1;

lazy_static! {
    pub static ref BIOME_SPAWN_TABLES: HashMap<Biome, BiomeSpawnTable> = {
        let mut tables = HashMap::new();

        tables.insert(Biome::Forest, BiomeSpawnTable {
            artifacts: vec![
                ArtifactSpawnEntry { name: "Mossy Shard", artifact_type: "shard", rarity: Rarity::Common, spawn_rate: 0.65 },
                ArtifactSpawnEntry { name: "Resin Node", artifact_type: "node", rarity: Rarity::Common, spawn_rate: 0.55 },
                ArtifactSpawnEntry { name: "Verdant Prism", artifact_type: "prism", rarity: Rarity::Rare, spawn_rate: 0.30 },
                ArtifactSpawnEntry { name: "Heartwood Core", artifact_type: "core", rarity: Rarity::Epic, spawn_rate: 0.10 },
            ],
            exclusive_artifact: Some((
                ArtifactSpawnEntry { name: "Elder Seed", artifact_type: "relic", rarity: Rarity::Legendary, spawn_rate: 1.0 },
                0.02,
            )),
            gear: vec![
                GearSpawnEntry { name: "Canvas Satchel", gear_type: "carry", level: 1, spawn_rate: 0.45 },
                GearSpawnEntry { name: "Trail Boots", gear_type: "mobility", level: 2, spawn_rate: 0.30 },
            ],
        });

        tables.insert(Biome::Mountain, BiomeSpawnTable {
            artifacts: vec![
                ArtifactSpawnEntry { name: "Granite Splinter", artifact_type: "shard", rarity: Rarity::Common, spawn_rate: 0.60 },
                ArtifactSpawnEntry { name: "Echo Crystal", artifact_type: "crystal", rarity: Rarity::Rare, spawn_rate: 0.35 },
                ArtifactSpawnEntry { name: "Summit Lens", artifact_type: "lens", rarity: Rarity::Epic, spawn_rate: 0.12 },
            ],
            exclusive_artifact: Some((
                ArtifactSpawnEntry { name: "Hollow Peak Heart", artifact_type: "relic", rarity: Rarity::Legendary, spawn_rate: 1.0 },
                0.025,
            )),
            gear: vec![
                GearSpawnEntry { name: "Climbing Rig", gear_type: "mobility", level: 3, spawn_rate: 0.35 },
                GearSpawnEntry { name: "Thermal Cloak", gear_type: "protection", level: 4, spawn_rate: 0.20 },
            ],
        });

        tables.insert(Biome::Urban, BiomeSpawnTable {
            artifacts: vec![
                ArtifactSpawnEntry { name: "Copper Coil", artifact_type: "salvage", rarity: Rarity::Common, spawn_rate: 0.70 },
                ArtifactSpawnEntry { name: "Signal Fragment", artifact_type: "fragment", rarity: Rarity::Rare, spawn_rate: 0.35 },
                ArtifactSpawnEntry { name: "Archive Chip", artifact_type: "chip", rarity: Rarity::Epic, spawn_rate: 0.12 },
            ],
            exclusive_artifact: None,
            gear: vec![
                GearSpawnEntry { name: "Utility Harness", gear_type: "carry", level: 3, spawn_rate: 0.40 },
                GearSpawnEntry { name: "Rebreather Mask", gear_type: "protection", level: 4, spawn_rate: 0.22 },
            ],
        });

        tables.insert(Biome::Water, BiomeSpawnTable {
            artifacts: vec![
                ArtifactSpawnEntry { name: "Brine Pearl", artifact_type: "pearl", rarity: Rarity::Common, spawn_rate: 0.55 },
                ArtifactSpawnEntry { name: "Tidal Glass", artifact_type: "glass", rarity: Rarity::Rare, spawn_rate: 0.30 },
                ArtifactSpawnEntry { name: "Abyssal Bloom", artifact_type: "bloom", rarity: Rarity::Epic, spawn_rate: 0.10 },
            ],
            exclusive_artifact: Some((
                ArtifactSpawnEntry { name: "Drowned Beacon", artifact_type: "relic", rarity: Rarity::Legendary, spawn_rate: 1.0 },
                0.02,
            )),
            gear: vec![
                GearSpawnEntry { name: "Dry Suit", gear_type: "protection", level: 3, spawn_rate: 0.30 },
            ],
        });

        tables.insert(Biome::Industrial, BiomeSpawnTable {
            artifacts: vec![
                ArtifactSpawnEntry { name: "Slag Ingot", artifact_type: "salvage", rarity: Rarity::Common, spawn_rate: 0.60 },
                ArtifactSpawnEntry { name: "Turbine Blade", artifact_type: "salvage", rarity: Rarity::Rare, spawn_rate: 0.40 },
                ArtifactSpawnEntry { name: "Reactor Fragment", artifact_type: "fragment", rarity: Rarity::Epic, spawn_rate: 0.15 },
            ],
            exclusive_artifact: Some((
                ArtifactSpawnEntry { name: "Foundry Core", artifact_type: "relic", rarity: Rarity::Legendary, spawn_rate: 1.0 },
                0.03,
            )),
            gear: vec![
                GearSpawnEntry { name: "Insulated Gloves", gear_type: "protection", level: 5, spawn_rate: 0.35 },
                GearSpawnEntry { name: "Loader Frame", gear_type: "carry", level: 6, spawn_rate: 0.18 },
            ],
        });

        tables.insert(Biome::Radioactive, BiomeSpawnTable {
            artifacts: vec![
                ArtifactSpawnEntry { name: "Glow Pebble", artifact_type: "shard", rarity: Rarity::Rare, spawn_rate: 0.50 },
                ArtifactSpawnEntry { name: "Isotope Cell", artifact_type: "cell", rarity: Rarity::Epic, spawn_rate: 0.25 },
                ArtifactSpawnEntry { name: "Cherenkov Tear", artifact_type: "crystal", rarity: Rarity::Legendary, spawn_rate: 0.06 },
            ],
            exclusive_artifact: Some((
                ArtifactSpawnEntry { name: "Pile Zero Ember", artifact_type: "relic", rarity: Rarity::Legendary, spawn_rate: 1.0 },
                0.04,
            )),
            gear: vec![
                GearSpawnEntry { name: "Lead Vest", gear_type: "protection", level: 7, spawn_rate: 0.30 },
                GearSpawnEntry { name: "Dosimeter Array", gear_type: "sensor", level: 8, spawn_rate: 0.15 },
            ],
        });

        tables.insert(Biome::Chemical, BiomeSpawnTable {
            artifacts: vec![
                ArtifactSpawnEntry { name: "Caustic Bead", artifact_type: "bead", rarity: Rarity::Rare, spawn_rate: 0.50 },
                ArtifactSpawnEntry { name: "Polymer Bloom", artifact_type: "bloom", rarity: Rarity::Epic, spawn_rate: 0.28 },
                ArtifactSpawnEntry { name: "Catalyst Heart", artifact_type: "core", rarity: Rarity::Legendary, spawn_rate: 0.08 },
            ],
            exclusive_artifact: Some((
                ArtifactSpawnEntry { name: "Prime Reagent", artifact_type: "relic", rarity: Rarity::Legendary, spawn_rate: 1.0 },
                0.05,
            )),
            gear: vec![
                GearSpawnEntry { name: "Hazmat Shell", gear_type: "protection", level: 9, spawn_rate: 0.28 },
                GearSpawnEntry { name: "Filtration Pack", gear_type: "sensor", level: 10, spawn_rate: 0.12 },
            ],
        });

        tables
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_biome_has_a_spawn_table() {
        for biome in Biome::available_for_tier(4) {
            let table = BIOME_SPAWN_TABLES.get(&biome);
            assert!(table.is_some(), "missing table for {:?}", biome);
            assert!(!table.unwrap().artifacts.is_empty());
        }
    }

    #[test]
    fn spawn_rates_are_probabilities() {
        for (biome, table) in BIOME_SPAWN_TABLES.iter() {
            for entry in &table.artifacts {
                assert!(
                    entry.spawn_rate > 0.0 && entry.spawn_rate <= 1.0,
                    "{:?}/{} rate {}",
                    biome,
                    entry.name,
                    entry.spawn_rate
                );
            }
            for entry in &table.gear {
                assert!(entry.spawn_rate > 0.0 && entry.spawn_rate <= 1.0);
                assert!(entry.level >= 1 && entry.level <= 10);
            }
            if let Some((_, chance)) = &table.exclusive_artifact {
                assert!(*chance > 0.0 && *chance < 0.5);
            }
        }
    }
}
