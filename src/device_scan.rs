/******************************************************************************
 *                                                                            *
 * Scanning through a deployed device. A scan sweeps the zones inside the    *
 * device's detection radius, filters artifacts by the device's rarity      *
 * ceiling, and publishes result rows with distance, bearing, and a noisy   *
 * signal strength. Each (device, user) pair carries an upserted cooldown   *
 * row; scanning does not touch the battery (drain is passive).             *
 *                                                                            *
 ******************************************************************************/

use rand::Rng;
use spacetimedb::{Identity, ReducerContext, Table, TimeDuration, Timestamp};

use crate::artifact;
use crate::config::get_game_config;
use crate::device::deployed_device as DeployedDeviceTableTrait;
use crate::device_access;
use crate::device_scan::device_scan_result as DeviceScanResultTableTrait;
use crate::device_scan::scan_cooldown as ScanCooldownTableTrait;
use crate::errors::{GameError, GameResult};
use crate::geo;
use crate::models::{BatteryStatus, DeviceStatus, Rarity};
use crate::player as PlayerTableTrait;
use crate::rate_limiter::{self, remaining_secs, OperationKind};
use crate::zone;

/// Per-user anti-spam floor across all devices; the per-device cooldown
/// below is the real gameplay limiter.
const USER_SCAN_COOLDOWN_SECS: u32 = 10;

/// Per-(device, user) scan cooldown. Logically unique on that pair; the
/// upsert below maintains at most one row inside its transaction.
#[spacetimedb::table(name = scan_cooldown, public)]
#[derive(Clone, Debug)]
pub struct ScanCooldown {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    #[index(btree)]
    pub device_id: u64,
    pub user_id: Identity,
    pub cooldown_until: Timestamp,
    pub cooldown_secs: u32,
    pub created_at: Timestamp,
}

/// One detected artifact from the latest scan. Rows for a (device, user)
/// pair are replaced wholesale on every scan.
#[spacetimedb::table(name = device_scan_result, public)]
#[derive(Clone, Debug)]
pub struct DeviceScanResult {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    #[index(btree)]
    pub device_id: u64,
    pub user_id: Identity,
    pub artifact_id: u64,
    pub artifact_name: String,
    pub rarity: Rarity,
    pub distance_m: f64,
    pub bearing_deg: f64,
    pub signal_strength: f64,
    pub scanned_at: Timestamp,
}

/// Synthetic signal strength: linear falloff over the detection range plus
/// a small noise term, clamped into [0, 1].
pub fn signal_strength(distance_m: f64, max_range_m: f64, noise: f64) -> f64 {
    if max_range_m <= 0.0 {
        return 0.0;
    }
    (1.0 - distance_m / max_range_m + noise).clamp(0.0, 1.0)
}

/// --- Scan With Device ---
#[spacetimedb::reducer]
pub fn scan_with_device(
    ctx: &ReducerContext,
    device_id: u64,
    lat: f64,
    lng: f64,
) -> Result<(), String> {
    scan_with_device_inner(ctx, device_id, lat, lng).map_err(String::from)
}

fn scan_with_device_inner(
    ctx: &ReducerContext,
    device_id: u64,
    lat: f64,
    lng: f64,
) -> GameResult<()> {
    geo::validate_coordinates(lat, lng)?;
    let players = ctx.db.player();
    let mut player = players
        .identity()
        .find(ctx.sender)
        .ok_or_else(|| GameError::NotFound("player not registered".to_string()))?;

    let devices = ctx.db.deployed_device();
    let mut device = devices
        .id()
        .find(device_id)
        .ok_or_else(|| GameError::NotFound(format!("device {} not found", device_id)))?;

    if device.status != DeviceStatus::Active || !device.is_active {
        return Err(GameError::Conflict("device is not operational".to_string()));
    }
    let battery_ok = device.battery_status == BatteryStatus::Installed
        && device.battery_level.unwrap_or(0.0) > 0.0;
    if !battery_ok {
        return Err(GameError::InsufficientCharge(
            "device battery is depleted".to_string(),
        ));
    }

    if device.owner_id != ctx.sender && !device_access::has_valid_access(ctx, device_id, ctx.sender)
    {
        return Err(GameError::Forbidden(
            "no access grant for this device".to_string(),
        ));
    }

    let config = get_game_config(ctx)?;
    rate_limiter::check_and_stamp(ctx, ctx.sender, OperationKind::DeviceScan, USER_SCAN_COOLDOWN_SECS)?;

    let caller_distance = geo::haversine_distance_m(lat, lng, device.lat, device.lng);
    if caller_distance > config.device_scan_max_distance_m {
        return Err(GameError::TooFar {
            actual_m: caller_distance,
            max_m: config.device_scan_max_distance_m,
        });
    }

    // Per-(device, user) cooldown.
    let cooldowns = ctx.db.scan_cooldown();
    let now = ctx.timestamp;
    let existing = cooldowns
        .device_id()
        .filter(device_id)
        .find(|c| c.user_id == ctx.sender);
    if let Some(ref row) = existing {
        if row.cooldown_until > now {
            return Err(GameError::Cooldown {
                remaining_secs: remaining_secs(
                    now.to_micros_since_unix_epoch(),
                    row.cooldown_until.to_micros_since_unix_epoch(),
                ),
            });
        }
    }

    // Sweep: zones inside the detection radius, then their artifacts.
    let max_range_m = device.scan_radius_km * 1_000.0;
    let zones_in_range = zone::active_zones_within(ctx, device.lat, device.lng, max_range_m);

    let results = ctx.db.device_scan_result();
    let stale: Vec<_> = results
        .device_id()
        .filter(device_id)
        .filter(|r| r.user_id == ctx.sender)
        .collect();
    for row in stale {
        results.id().delete(row.id);
    }

    let mut rng = ctx.rng();
    let mut detected = 0;
    for (zone_row, _) in &zones_in_range {
        for item in artifact::active_artifacts_in_zone(ctx, zone_row.id) {
            if item.rarity.rank() > device.max_rarity_detected.rank() {
                continue;
            }
            let distance_m = geo::haversine_distance_m(device.lat, device.lng, item.lat, item.lng);
            if distance_m > max_range_m {
                continue;
            }
            let noise = rng.gen_range(-0.05..=0.05);
            results.insert(DeviceScanResult {
                id: 0, // auto_inc
                device_id,
                user_id: ctx.sender,
                artifact_id: item.id,
                artifact_name: item.name.clone(),
                rarity: item.rarity,
                distance_m,
                bearing_deg: geo::bearing_deg(device.lat, device.lng, item.lat, item.lng),
                signal_strength: signal_strength(distance_m, max_range_m, noise),
                scanned_at: now,
            });
            detected += 1;
        }
    }

    // Upsert the cooldown row.
    let cooldown_until =
        now + TimeDuration::from_micros(config.device_scan_cooldown_secs as i64 * 1_000_000);
    match existing {
        Some(mut row) => {
            row.cooldown_until = cooldown_until;
            row.cooldown_secs = config.device_scan_cooldown_secs;
            cooldowns.id().update(row);
        }
        None => {
            cooldowns.insert(ScanCooldown {
                id: 0, // auto_inc
                device_id,
                user_id: ctx.sender,
                cooldown_until,
                cooldown_secs: config.device_scan_cooldown_secs,
                created_at: now,
            });
        }
    }

    device.last_scan_at = Some(now);
    device.updated_at = now;
    devices.id().update(device);

    player.last_lat = lat;
    player.last_lng = lng;
    player.last_activity = now;
    players.identity().update(player);

    log::info!(
        "[DeviceScan] Player {:?} scanned with device {}: {} artifacts detected",
        ctx.sender,
        device_id,
        detected
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_fades_linearly_with_distance() {
        assert!((signal_strength(0.0, 1_000.0, 0.0) - 1.0).abs() < 1e-9);
        assert!((signal_strength(500.0, 1_000.0, 0.0) - 0.5).abs() < 1e-9);
        assert!(signal_strength(1_000.0, 1_000.0, 0.0).abs() < 1e-9);
    }

    #[test]
    fn signal_is_clamped_into_the_unit_interval() {
        assert_eq!(signal_strength(0.0, 1_000.0, 0.2), 1.0);
        assert_eq!(signal_strength(2_000.0, 1_000.0, -0.05), 0.0);
        assert_eq!(signal_strength(100.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn noise_shifts_the_signal_within_its_band() {
        let base = signal_strength(400.0, 1_000.0, 0.0);
        let high = signal_strength(400.0, 1_000.0, 0.05);
        let low = signal_strength(400.0, 1_000.0, -0.05);
        assert!((high - base - 0.05).abs() < 1e-9);
        assert!((base - low - 0.05).abs() < 1e-9);
    }
}
