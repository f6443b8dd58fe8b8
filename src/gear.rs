/******************************************************************************
 *                                                                            *
 * Gear: leveled equipment spawned into zones alongside artifacts. Shares    *
 * the artifact lifecycle (spawned once, deactivated once) but is gated by   *
 * numeric level instead of rarity.                                          *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{ReducerContext, Table, Timestamp};

use crate::gear::gear as GearTableTrait;
use crate::models::Biome;

#[spacetimedb::table(name = gear, public)]
#[derive(Clone, Debug)]
pub struct Gear {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    #[index(btree)]
    pub zone_id: u64,
    pub name: String,
    pub gear_type: String,
    /// 1..10.
    pub level: u32,
    pub biome: Biome,
    pub lat: f64,
    pub lng: f64,
    pub is_active: bool,
    pub is_claimed: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Active, unclaimed gear of one zone.
pub fn active_gear_in_zone(ctx: &ReducerContext, zone_id: u64) -> Vec<Gear> {
    ctx.db
        .gear()
        .zone_id()
        .filter(zone_id)
        .filter(|g| g.is_active && !g.is_claimed)
        .collect()
}

/// Marks a gear piece as collected inside the caller's transaction.
pub fn claim_gear(ctx: &ReducerContext, mut gear: Gear) -> Gear {
    gear.is_active = false;
    gear.is_claimed = true;
    gear.updated_at = ctx.timestamp;
    ctx.db.gear().id().update(gear.clone());
    gear
}
