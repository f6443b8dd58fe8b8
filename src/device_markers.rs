/******************************************************************************
 *                                                                            *
 * Map markers: the union of four visibility queries over deployed          *
 * devices, de-duplicated by device id with first-seen-wins semantics,      *
 * published as per-user rows. Icon choice is a fixed precedence ladder     *
 * with a special affordance rewrite for foreign close-range scanners.      *
 *                                                                            *
 ******************************************************************************/

use std::collections::HashSet;

use spacetimedb::{Identity, ReducerContext, Table, Timestamp};

use crate::device::{deployed_device as DeployedDeviceTableTrait, DeployedDevice};
use crate::device_access::device_access as DeviceAccessTableTrait;
use crate::device_markers::map_marker as MapMarkerTableTrait;
use crate::device_scan::scan_cooldown as ScanCooldownTableTrait;
use crate::errors::{GameError, GameResult};
use crate::geo;
use crate::models::{AccessLevel, DeviceStatus, MarkerIcon, MarkerVisibility};
use crate::player as PlayerTableTrait;

// Query ranges, in meters. The scan_data range is deliberately short: a
// foreign active device only shows up when the viewer is almost on top of
// it.
const OWNER_RANGE_M: f64 = 50_000.0;
const PUBLIC_RANGE_M: f64 = 50.0;
const HACKER_RANGE_M: f64 = 20_000.0;
const SCAN_DATA_RANGE_M: f64 = 200.0;

const DISABLED_RECENTLY_SECS: i64 = 24 * 3600;

#[spacetimedb::table(name = map_marker, public)]
#[derive(Clone, Debug)]
pub struct MapMarker {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    #[index(btree)]
    pub user_id: Identity,
    pub device_id: u64,
    pub lat: f64,
    pub lng: f64,
    pub status: DeviceStatus,
    pub visibility_type: MarkerVisibility,
    pub icon: MarkerIcon,
    pub distance_m: f64,
    pub computed_at: Timestamp,
}

/// Icon precedence: dead battery, recent disable, abandonment, then the
/// healthy default. Foreign scan_data markers never show plain green.
pub fn marker_icon(
    battery_level: Option<f32>,
    last_disabled_at_micros: Option<i64>,
    status: DeviceStatus,
    visibility: MarkerVisibility,
    now_micros: i64,
) -> MarkerIcon {
    let icon = if battery_level.unwrap_or(0.0) <= 0.0 {
        MarkerIcon::Red
    } else if last_disabled_at_micros
        .map(|t| now_micros - t < DISABLED_RECENTLY_SECS * 1_000_000)
        .unwrap_or(false)
    {
        MarkerIcon::Blue
    } else if status == DeviceStatus::Abandoned {
        MarkerIcon::Gray
    } else {
        MarkerIcon::Green
    };

    if visibility == MarkerVisibility::ScanData && icon == MarkerIcon::Green {
        MarkerIcon::DarkGray
    } else {
        icon
    }
}

/// --- Map Markers ---
/// Recomputes the caller's marker rows for their current position.
#[spacetimedb::reducer]
pub fn map_markers(ctx: &ReducerContext, lat: f64, lng: f64) -> Result<(), String> {
    map_markers_inner(ctx, lat, lng).map_err(String::from)
}

fn map_markers_inner(ctx: &ReducerContext, lat: f64, lng: f64) -> GameResult<()> {
    geo::validate_coordinates(lat, lng)?;
    let players = ctx.db.player();
    let mut player = players
        .identity()
        .find(ctx.sender)
        .ok_or_else(|| GameError::NotFound("player not registered".to_string()))?;

    let markers = ctx.db.map_marker();
    let stale: Vec<_> = markers.user_id().filter(ctx.sender).collect();
    for row in stale {
        markers.id().delete(row.id);
    }

    let now = ctx.timestamp;
    let now_micros = now.to_micros_since_unix_epoch();
    let mut seen: HashSet<u64> = HashSet::new();
    let mut emitted = 0usize;

    // The four queries, in precedence order. First query to surface a
    // device decides its visibility_type.
    let devices: Vec<DeployedDevice> = ctx.db.deployed_device().iter().collect();
    let passes: [(MarkerVisibility, f64); 4] = [
        (MarkerVisibility::Owner, OWNER_RANGE_M),
        (MarkerVisibility::Public, PUBLIC_RANGE_M),
        (MarkerVisibility::Hacker, HACKER_RANGE_M),
        (MarkerVisibility::ScanData, SCAN_DATA_RANGE_M),
    ];

    for (visibility, range_m) in passes {
        for device in &devices {
            if seen.contains(&device.id) {
                continue;
            }
            let distance = geo::haversine_distance_m(lat, lng, device.lat, device.lng);
            if distance > range_m {
                continue;
            }
            let eligible = match visibility {
                MarkerVisibility::Owner => {
                    device.owner_id == ctx.sender && device.is_active
                }
                MarkerVisibility::Public => device.status == DeviceStatus::Abandoned,
                MarkerVisibility::Hacker => {
                    device.owner_id != ctx.sender
                        && has_unexpired_grant(ctx, device.id, ctx.sender, now)
                }
                MarkerVisibility::ScanData => {
                    device.owner_id != ctx.sender
                        && device.is_active
                        && device.status == DeviceStatus::Active
                        && !has_active_cooldown(ctx, device.id, ctx.sender, now)
                }
            };
            if !eligible {
                continue;
            }

            let icon = marker_icon(
                device.battery_level,
                device
                    .last_disabled_at
                    .map(|t| t.to_micros_since_unix_epoch()),
                device.status,
                visibility,
                now_micros,
            );
            markers.insert(MapMarker {
                id: 0, // auto_inc
                user_id: ctx.sender,
                device_id: device.id,
                lat: device.lat,
                lng: device.lng,
                status: device.status,
                visibility_type: visibility,
                icon,
                distance_m: distance,
                computed_at: now,
            });
            seen.insert(device.id);
            emitted += 1;
        }
    }

    player.last_lat = lat;
    player.last_lng = lng;
    player.last_activity = now;
    players.identity().update(player);

    log::debug!(
        "[MapMarkers] Player {:?}: {} markers computed",
        ctx.sender,
        emitted
    );
    Ok(())
}

/// A grant that has not expired yet, regardless of the disable window:
/// hackers keep seeing a device they disabled.
fn has_unexpired_grant(
    ctx: &ReducerContext,
    device_id: u64,
    user_id: Identity,
    now: Timestamp,
) -> bool {
    ctx.db
        .device_access()
        .device_id()
        .filter(device_id)
        .any(|a| {
            a.user_id == user_id
                && match a.access_level {
                    AccessLevel::Owner | AccessLevel::Permanent => true,
                    AccessLevel::Temporary => a.expires_at.map(|e| e > now).unwrap_or(false),
                }
        })
}

fn has_active_cooldown(
    ctx: &ReducerContext,
    device_id: u64,
    user_id: Identity,
    now: Timestamp,
) -> bool {
    ctx.db
        .scan_cooldown()
        .device_id()
        .filter(device_id)
        .any(|c| c.user_id == user_id && c.cooldown_until > now)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MICROS: i64 = 24 * 3600 * 1_000_000;

    #[test]
    fn dead_battery_wins_over_everything() {
        let icon = marker_icon(
            Some(0.0),
            Some(0),
            DeviceStatus::Abandoned,
            MarkerVisibility::Owner,
            1,
        );
        assert_eq!(icon, MarkerIcon::Red);
        // No battery at all reads as dead.
        assert_eq!(
            marker_icon(None, None, DeviceStatus::Active, MarkerVisibility::Owner, 0),
            MarkerIcon::Red
        );
    }

    #[test]
    fn recent_disable_beats_abandonment() {
        let now = 10 * DAY_MICROS;
        let icon = marker_icon(
            Some(50.0),
            Some(now - DAY_MICROS / 2),
            DeviceStatus::Abandoned,
            MarkerVisibility::Public,
            now,
        );
        assert_eq!(icon, MarkerIcon::Blue);

        // A disable older than a day no longer paints blue.
        let icon = marker_icon(
            Some(50.0),
            Some(now - 2 * DAY_MICROS),
            DeviceStatus::Abandoned,
            MarkerVisibility::Public,
            now,
        );
        assert_eq!(icon, MarkerIcon::Gray);
    }

    #[test]
    fn healthy_devices_are_green_except_for_scan_data() {
        let icon = marker_icon(Some(80.0), None, DeviceStatus::Active, MarkerVisibility::Owner, 0);
        assert_eq!(icon, MarkerIcon::Green);

        // The affordance rewrite: foreign close-range scanners go dark gray.
        let icon = marker_icon(
            Some(80.0),
            None,
            DeviceStatus::Active,
            MarkerVisibility::ScanData,
            0,
        );
        assert_eq!(icon, MarkerIcon::DarkGray);
    }

    #[test]
    fn scan_data_rewrite_leaves_non_green_icons_alone() {
        let icon = marker_icon(
            Some(0.0),
            None,
            DeviceStatus::Active,
            MarkerVisibility::ScanData,
            0,
        );
        assert_eq!(icon, MarkerIcon::Red);
    }
}
