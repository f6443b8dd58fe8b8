/******************************************************************************
 *                                                                            *
 * The Zone table and the tier-driven rule tables governing zone geometry:    *
 * spawn distance bands, radii, minimum spacing, and lifetimes. A zone is a   *
 * disk on the Earth's surface with access rules; items inside it reference   *
 * it by id and die with it.                                                  *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{ReducerContext, Table, Timestamp};

use crate::geo;
use crate::models::{Biome, DangerLevel, ZoneType};
use crate::zone::zone as ZoneTableTrait;

#[spacetimedb::table(name = zone, public)]
#[derive(Clone, Debug)]
pub struct Zone {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub name: String,
    pub center_lat: f64,
    pub center_lng: f64,
    pub radius_m: u32,
    pub tier_required: u32,
    pub biome: Biome,
    pub danger_level: DangerLevel,
    pub zone_type: ZoneType,
    pub is_active: bool,
    /// Zones with auto_cleanup are harvested by the scheduler once expired.
    pub auto_cleanup: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// None means permanent (static/event zones).
    pub expires_at: Option<Timestamp>,
    pub last_activity: Timestamp,
    /// Written by the cleanup sweep when the zone is deactivated.
    pub cleanup_reason: Option<String>,
}

impl Zone {
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        geo::haversine_distance_m(self.center_lat, self.center_lng, lat, lng)
            <= self.radius_m as f64
    }
}

/******************************************************************************
 *                           TIER RULE TABLES                                 *
 ******************************************************************************/

/// Maximum dynamic zones an area scan will maintain around a player.
pub fn max_zones_for_tier(tier: u32) -> usize {
    match tier {
        0 => 1,
        1 => 2,
        2 => 3,
        3 => 5,
        _ => 7,
    }
}

/// Radial band (meters from the scanning player) a new zone of the given
/// tier spawns in. Higher-tier zones sit further out.
pub fn spawn_band_m(tier: u32) -> (f64, f64) {
    let t = tier.min(4) as f64;
    (100.0 + 50.0 * t, 800.0 + 300.0 * t)
}

/// Minimum center-to-center spacing to every other zone.
pub fn min_zone_distance_m(tier: u32) -> f64 {
    250.0 + 50.0 * tier.min(4) as f64
}

/// Base radius and variance (meters) for a zone of the given tier.
pub fn radius_spec_m(tier: u32) -> (u32, u32) {
    let t = tier.min(4);
    (200 + 50 * t, 40)
}

/// Zone lifetime bounds in seconds. Tier 0 zones are short-lived (minutes);
/// everything above lives hours.
pub fn ttl_bounds_secs(tier: u32) -> (u64, u64) {
    if tier == 0 {
        (15 * 60, 45 * 60)
    } else {
        (6 * 3600, 24 * 3600)
    }
}

/******************************************************************************
 *                               QUERIES                                      *
 ******************************************************************************/

/// Active zones whose center lies within `radius_m` of the given point,
/// ordered nearest first.
pub fn active_zones_within(
    ctx: &ReducerContext,
    lat: f64,
    lng: f64,
    radius_m: f64,
) -> Vec<(Zone, f64)> {
    let mut zones: Vec<(Zone, f64)> = ctx
        .db
        .zone()
        .iter()
        .filter(|z| z.is_active)
        .map(|z| {
            let d = geo::haversine_distance_m(lat, lng, z.center_lat, z.center_lng);
            (z, d)
        })
        .filter(|(_, d)| *d <= radius_m)
        .collect();
    zones.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    zones
}

/// Human-readable zone name, e.g. "Forest Anomaly T2".
pub fn zone_display_name(biome: Biome, tier: u32) -> String {
    let biome_name = match biome {
        Biome::Forest => "Forest",
        Biome::Mountain => "Mountain",
        Biome::Industrial => "Industrial",
        Biome::Urban => "Urban",
        Biome::Water => "Water",
        Biome::Radioactive => "Radioactive",
        Biome::Chemical => "Chemical",
    };
    format!("{} Anomaly T{}", biome_name, tier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_zones_table_matches_the_tier_ladder() {
        assert_eq!(max_zones_for_tier(0), 1);
        assert_eq!(max_zones_for_tier(1), 2);
        assert_eq!(max_zones_for_tier(2), 3);
        assert_eq!(max_zones_for_tier(3), 5);
        assert_eq!(max_zones_for_tier(4), 7);
        assert_eq!(max_zones_for_tier(99), 7);
    }

    #[test]
    fn spacing_grows_with_tier() {
        assert_eq!(min_zone_distance_m(0), 250.0);
        assert_eq!(min_zone_distance_m(4), 450.0);
        for tier in 0..4 {
            assert!(min_zone_distance_m(tier) < min_zone_distance_m(tier + 1));
        }
    }

    #[test]
    fn spawn_band_is_well_formed_for_every_tier() {
        for tier in 0..=4 {
            let (min, max) = spawn_band_m(tier);
            assert!(min < max, "tier {} band inverted", tier);
            assert!(max <= 2_000.0, "tier {} band exceeds the spawn radius", tier);
        }
    }

    #[test]
    fn tier_zero_zones_are_short_lived() {
        let (min0, max0) = ttl_bounds_secs(0);
        let (min1, max1) = ttl_bounds_secs(1);
        assert!(max0 < min1);
        assert!(min0 >= 60);
        assert_eq!(max1, 24 * 3600);
        assert!(min1 <= max1);
    }

    #[test]
    fn radius_rises_with_tier() {
        let (base0, _) = radius_spec_m(0);
        let (base4, _) = radius_spec_m(4);
        assert_eq!(base0, 200);
        assert_eq!(base4, 400);
    }
}
