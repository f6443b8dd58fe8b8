/******************************************************************************
 *                                                                            *
 * Zone TTL sweep, run from the periodic scheduler. Expired auto-cleanup     *
 * zones lose their active items, evict any player still inside, and are     *
 * marked inactive with a recorded reason. A second pass logs zones that     *
 * will expire soon, for operators watching churn.                           *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{ReducerContext, Table, TimeDuration};

use crate::artifact::artifact as ArtifactTableTrait;
use crate::gear::gear as GearTableTrait;
use crate::player as PlayerTableTrait;
use crate::zone::{zone as ZoneTableTrait, Zone};

const EXPIRY_WARNING_WINDOW_SECS: i64 = 30 * 60;

/// Deactivates every zone whose TTL has run out. Each zone is settled
/// independently so a bad row cannot stall the sweep.
pub fn cleanup_expired_zones(ctx: &ReducerContext) -> Result<(), String> {
    let now = ctx.timestamp;
    let expired: Vec<Zone> = ctx
        .db
        .zone()
        .iter()
        .filter(|z| z.is_active && z.auto_cleanup)
        .filter(|z| z.expires_at.map(|exp| exp < now).unwrap_or(false))
        .collect();

    for zone in expired {
        let artifacts_deactivated = deactivate_zone_artifacts(ctx, zone.id);
        let gear_deactivated = deactivate_zone_gear(ctx, zone.id);
        let players_evicted = evict_players_from_zone(ctx, zone.id);

        let mut updated = zone.clone();
        updated.is_active = false;
        updated.cleanup_reason = Some("ttl_expired".to_string());
        updated.updated_at = now;
        ctx.db.zone().id().update(updated);

        log::info!(
            "[ZoneCleanup] Zone {} ({}) expired: {} artifacts deactivated, {} gear deactivated, {} players evicted",
            zone.id,
            zone.name,
            artifacts_deactivated,
            gear_deactivated,
            players_evicted
        );
    }
    Ok(())
}

/// Logs zones that will expire inside the warning window.
pub fn warn_expiring_zones(ctx: &ReducerContext) -> Result<(), String> {
    let now = ctx.timestamp;
    let horizon = now + TimeDuration::from_micros(EXPIRY_WARNING_WINDOW_SECS * 1_000_000);

    for zone in ctx.db.zone().iter().filter(|z| z.is_active && z.auto_cleanup) {
        if let Some(expires_at) = zone.expires_at {
            if expires_at >= now && expires_at <= horizon {
                let remaining_secs = (expires_at.to_micros_since_unix_epoch()
                    - now.to_micros_since_unix_epoch())
                    / 1_000_000;
                log::info!(
                    "[ZoneCleanup] Zone {} ({}) expires in {} s",
                    zone.id,
                    zone.name,
                    remaining_secs
                );
            }
        }
    }
    Ok(())
}

/// Deactivates the zone's active artifacts, one log line each so the sweep
/// is traceable per item.
pub fn deactivate_zone_artifacts(ctx: &ReducerContext, zone_id: u64) -> usize {
    let artifacts = ctx.db.artifact();
    let mut count = 0;
    let rows: Vec<_> = artifacts
        .zone_id()
        .filter(zone_id)
        .filter(|a| a.is_active)
        .collect();
    for mut row in rows {
        row.is_active = false;
        row.updated_at = ctx.timestamp;
        log::info!(
            "[ZoneCleanup] Deactivating artifact {} ('{}') in zone {}",
            row.id,
            row.name,
            zone_id
        );
        artifacts.id().update(row);
        count += 1;
    }
    count
}

pub fn deactivate_zone_gear(ctx: &ReducerContext, zone_id: u64) -> usize {
    let gear = ctx.db.gear();
    let mut count = 0;
    let rows: Vec<_> = gear
        .zone_id()
        .filter(zone_id)
        .filter(|g| g.is_active)
        .collect();
    for mut row in rows {
        row.is_active = false;
        row.updated_at = ctx.timestamp;
        gear.id().update(row);
        count += 1;
    }
    count
}

/// Clears `current_zone` on every player session still referencing the
/// zone.
pub fn evict_players_from_zone(ctx: &ReducerContext, zone_id: u64) -> usize {
    let players = ctx.db.player();
    let inside: Vec<_> = players
        .iter()
        .filter(|p| p.current_zone == Some(zone_id))
        .collect();
    let mut count = 0;
    for mut player in inside {
        player.current_zone = None;
        players.identity().update(player);
        count += 1;
    }
    count
}
