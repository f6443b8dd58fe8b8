/******************************************************************************
 *                                                                            *
 * Deployed scanner devices: the table, the deploy/delete flows, and the     *
 * owner battery operations. A deployed device takes exclusive ownership    *
 * of its scanner and battery inventory rows by tombstoning them; deleting  *
 * the device is the only flow that returns them. Status demotions          *
 * (depleted/abandoned/destroyed) come from the scheduler, never from       *
 * request handlers.                                                         *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{Identity, ReducerContext, Table, Timestamp};

use crate::config::get_game_config;
use crate::device::deployed_device as DeployedDeviceTableTrait;
use crate::device_access::device_access as DeviceAccessTableTrait;
use crate::device_scan::device_scan_result as DeviceScanResultTableTrait;
use crate::device_scan::scan_cooldown as ScanCooldownTableTrait;
use crate::errors::{GameError, GameResult};
use crate::geo;
use crate::inventory::{self, inventory_item as InventoryItemTableTrait};
use crate::models::{BatteryStatus, DeviceStatus, GameItemType, Rarity};
use crate::player as PlayerTableTrait;

// State machine timing. Depleted devices sit for two weeks before becoming
// claimable, then one more week before they rust away.
pub const DEPLETED_TO_ABANDONED_SECS: i64 = 14 * 24 * 3600;
pub const ABANDONED_TO_DESTROYED_SECS: i64 = 7 * 24 * 3600;

// Defaults for devices whose scanner row carries no stat overrides.
pub const DEFAULT_SCAN_RADIUS_KM: f64 = 1.0;
pub const DEFAULT_HACK_RESISTANCE: u32 = 1;

#[spacetimedb::table(name = deployed_device, public)]
#[derive(Clone, Debug)]
pub struct DeployedDevice {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    #[index(btree)]
    pub owner_id: Identity,
    pub name: String,
    /// Tombstoned inventory row holding the physical scanner.
    pub device_inventory_id: u64,
    /// Tombstoned inventory row of the installed battery, if any.
    pub battery_inventory_id: Option<u64>,
    pub battery_status: BatteryStatus,
    pub lat: f64,
    pub lng: f64,
    /// 0..100, None exactly when no battery is linked.
    pub battery_level: Option<f32>,
    pub scan_radius_km: f64,
    pub max_rarity_detected: Rarity,
    /// 1..10.
    pub hack_resistance: u32,
    pub status: DeviceStatus,
    pub is_active: bool,
    pub deployed_at: Timestamp,
    pub last_scan_at: Option<Timestamp>,
    pub battery_depleted_at: Option<Timestamp>,
    pub abandoned_at: Option<Timestamp>,
    pub last_disabled_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

/******************************************************************************
 *                        STATE MACHINE HELPERS                               *
 ******************************************************************************/

/// Per-tick passive drain in percentage points. The floor guarantees
/// visible progress even for very slow catalogs.
pub fn drain_step_pct(drain_rate_per_hour: f64, ticks_per_hour: f64) -> f64 {
    (drain_rate_per_hour / ticks_per_hour).max(0.1)
}

/// Depleted → abandoned once the battery has been flat for two weeks.
pub fn ready_to_abandon(depleted_at_micros: i64, now_micros: i64) -> bool {
    now_micros - depleted_at_micros >= DEPLETED_TO_ABANDONED_SECS * 1_000_000
}

/// Abandoned → destroyed one week later.
pub fn ready_to_destroy(abandoned_at_micros: i64, now_micros: i64) -> bool {
    now_micros - abandoned_at_micros >= ABANDONED_TO_DESTROYED_SECS * 1_000_000
}

/// Loads a device owned by the caller.
pub fn get_owned_device(
    ctx: &ReducerContext,
    owner: Identity,
    device_id: u64,
) -> GameResult<DeployedDevice> {
    let device = ctx
        .db
        .deployed_device()
        .id()
        .find(device_id)
        .ok_or_else(|| GameError::NotFound(format!("device {} not found", device_id)))?;
    if device.owner_id != owner {
        return Err(GameError::Forbidden("you do not own this device".to_string()));
    }
    Ok(device)
}

/******************************************************************************
 *                                REDUCERS                                    *
 ******************************************************************************/

/// --- Deploy Device ---
/// Places a scanner from inventory onto the map with a fully charged
/// battery. Both inventory rows are tombstoned in the same transaction;
/// any validation failure rolls everything back.
#[spacetimedb::reducer]
pub fn deploy_device(
    ctx: &ReducerContext,
    device_inventory_id: u64,
    battery_inventory_id: u64,
    name: String,
    lat: f64,
    lng: f64,
) -> Result<(), String> {
    deploy_device_inner(ctx, device_inventory_id, battery_inventory_id, name, lat, lng)
        .map_err(String::from)
}

fn deploy_device_inner(
    ctx: &ReducerContext,
    device_inventory_id: u64,
    battery_inventory_id: u64,
    name: String,
    lat: f64,
    lng: f64,
) -> GameResult<()> {
    geo::validate_coordinates(lat, lng)?;
    if name.trim().is_empty() {
        return Err(GameError::Validation("device name must not be empty".to_string()));
    }

    let players = ctx.db.player();
    let mut player = players
        .identity()
        .find(ctx.sender)
        .ok_or_else(|| GameError::NotFound("player not registered".to_string()))?;

    let config = get_game_config(ctx)?;
    let distance = geo::haversine_distance_m(player.last_lat, player.last_lng, lat, lng);
    if distance > config.max_deploy_distance_m {
        return Err(GameError::TooFar {
            actual_m: distance,
            max_m: config.max_deploy_distance_m,
        });
    }

    // Scanner row: owned, live, and not already standing on the map.
    let scanner = inventory::get_owned_item(ctx, ctx.sender, device_inventory_id)?;
    if scanner.item_type != GameItemType::DeployableScanner {
        return Err(GameError::Validation("item is not a deployable scanner".to_string()));
    }
    if inventory::referenced_by_active_device(ctx, device_inventory_id) {
        return Err(GameError::Conflict("scanner is already deployed".to_string()));
    }

    // Battery row: owned, live, exclusive, and fully charged.
    let battery = inventory::get_owned_item(ctx, ctx.sender, battery_inventory_id)?;
    if battery.item_type != GameItemType::ScannerBattery {
        return Err(GameError::Validation("item is not a scanner battery".to_string()));
    }
    inventory::ensure_battery_unused(ctx, battery_inventory_id)?;
    let charge = inventory::read_f64_property(&battery.properties, inventory::PROP_CHARGE_PCT)
        .unwrap_or(0.0);
    if charge < 100.0 {
        return Err(GameError::InsufficientCharge(
            "battery must be fully charged to deploy".to_string(),
        ));
    }

    // Device stats come from the scanner item's properties.
    let scan_radius_km =
        inventory::read_f64_property(&scanner.properties, inventory::PROP_SCAN_RADIUS_KM)
            .unwrap_or(DEFAULT_SCAN_RADIUS_KM);
    let max_rarity =
        inventory::read_string_property(&scanner.properties, inventory::PROP_MAX_RARITY)
            .and_then(|s| Rarity::parse(&s))
            .unwrap_or(Rarity::Common);
    let hack_resistance =
        inventory::read_u32_property(&scanner.properties, inventory::PROP_HACK_RESISTANCE)
            .unwrap_or(DEFAULT_HACK_RESISTANCE)
            .clamp(1, 10);

    let device = ctx.db.deployed_device().insert(DeployedDevice {
        id: 0, // auto_inc
        owner_id: ctx.sender,
        name,
        device_inventory_id,
        battery_inventory_id: Some(battery_inventory_id),
        battery_status: BatteryStatus::Installed,
        lat,
        lng,
        battery_level: Some(100.0),
        scan_radius_km,
        max_rarity_detected: max_rarity,
        hack_resistance,
        status: DeviceStatus::Active,
        is_active: true,
        deployed_at: ctx.timestamp,
        last_scan_at: None,
        battery_depleted_at: None,
        abandoned_at: None,
        last_disabled_at: None,
        updated_at: ctx.timestamp,
    });

    inventory::soft_delete_item(ctx, scanner);
    inventory::soft_delete_item(ctx, battery);

    // A deployed scanner is no longer a handheld detector.
    if player.equipped_scanner_id == Some(device_inventory_id) {
        player.equipped_scanner_id = None;
        players.identity().update(player);
    }

    log::info!(
        "[Deploy] Player {:?} deployed device {} at ({:.5}, {:.5})",
        ctx.sender,
        device.id,
        lat,
        lng
    );
    Ok(())
}

/// --- Delete Device ---
/// Owner-only teardown. Restores the scanner row, restores the battery row
/// with its remaining charge, removes cascading access/cooldown/scan rows,
/// and hard-deletes the device, all in one transaction.
#[spacetimedb::reducer]
pub fn delete_device(ctx: &ReducerContext, device_id: u64) -> Result<(), String> {
    delete_device_inner(ctx, device_id).map_err(String::from)
}

fn delete_device_inner(ctx: &ReducerContext, device_id: u64) -> GameResult<()> {
    let device = get_owned_device(ctx, ctx.sender, device_id)?;

    // Scanner returns to inventory.
    if let Some(scanner) = ctx.db.inventory_item().id().find(device.device_inventory_id) {
        inventory::restore_item(ctx, scanner);
    } else {
        log::warn!(
            "[DeleteDevice] Device {} scanner row {} is missing",
            device_id,
            device.device_inventory_id
        );
    }

    // Battery returns with whatever charge the device had left.
    if let Some(battery_inventory_id) = device.battery_inventory_id {
        if let Some(battery) = ctx.db.inventory_item().id().find(battery_inventory_id) {
            let battery = inventory::restore_item(ctx, battery);
            let charge = device.battery_level.unwrap_or(0.0).clamp(0.0, 100.0);
            inventory::set_item_property(
                ctx,
                battery,
                inventory::PROP_CHARGE_PCT,
                serde_json::json!(charge),
            );
        }
    }

    cascade_delete_device_rows(ctx, device_id);
    ctx.db.deployed_device().id().delete(device_id);

    log::info!("[DeleteDevice] Player {:?} deleted device {}", ctx.sender, device_id);
    Ok(())
}

/// Removes the access grants, cooldowns, and scan results tied to a
/// device. Hack audit rows are retained.
pub fn cascade_delete_device_rows(ctx: &ReducerContext, device_id: u64) {
    let access = ctx.db.device_access();
    let grants: Vec<_> = access.device_id().filter(device_id).collect();
    for grant in grants {
        access.id().delete(grant.id);
    }

    let cooldowns = ctx.db.scan_cooldown();
    let rows: Vec<_> = cooldowns.device_id().filter(device_id).collect();
    for row in rows {
        cooldowns.id().delete(row.id);
    }

    let results = ctx.db.device_scan_result();
    let rows: Vec<_> = results.device_id().filter(device_id).collect();
    for row in rows {
        results.id().delete(row.id);
    }
}

/// --- Remove Battery ---
/// Owners may pull a battery only once it is flat; the row returns to
/// inventory at 0% charge.
#[spacetimedb::reducer]
pub fn remove_battery(ctx: &ReducerContext, device_id: u64) -> Result<(), String> {
    remove_battery_inner(ctx, device_id).map_err(String::from)
}

fn remove_battery_inner(ctx: &ReducerContext, device_id: u64) -> GameResult<()> {
    let devices = ctx.db.deployed_device();
    let mut device = get_owned_device(ctx, ctx.sender, device_id)?;

    if device.status != DeviceStatus::Active && device.status != DeviceStatus::Depleted {
        return Err(GameError::Conflict(format!(
            "cannot service a device in {:?} state",
            device.status
        )));
    }
    // Claimed devices carry their inherited battery in Depleted state; it
    // is removable the same way a drained installed battery is.
    let battery_inventory_id = match (device.battery_inventory_id, device.battery_status) {
        (Some(id), BatteryStatus::Installed) | (Some(id), BatteryStatus::Depleted) => id,
        _ => return Err(GameError::Conflict("no battery installed".to_string())),
    };
    if device.battery_level.unwrap_or(0.0) > 0.0 {
        return Err(GameError::Conflict(
            "battery still holds charge; it can only be removed once flat".to_string(),
        ));
    }

    if let Some(battery) = ctx.db.inventory_item().id().find(battery_inventory_id) {
        let battery = inventory::restore_item(ctx, battery);
        inventory::set_item_property(
            ctx,
            battery,
            inventory::PROP_CHARGE_PCT,
            serde_json::json!(0.0),
        );
    }

    device.battery_inventory_id = None;
    device.battery_status = BatteryStatus::Removed;
    device.battery_level = None;
    device.updated_at = ctx.timestamp;
    devices.id().update(device);

    log::info!(
        "[RemoveBattery] Player {:?} removed the battery from device {}",
        ctx.sender,
        device_id
    );
    Ok(())
}

/// --- Attach Battery ---
/// Installs a fully charged battery from inventory. Reviving a depleted
/// device returns it to active duty.
#[spacetimedb::reducer]
pub fn attach_battery(
    ctx: &ReducerContext,
    device_id: u64,
    battery_inventory_id: u64,
) -> Result<(), String> {
    attach_battery_inner(ctx, device_id, battery_inventory_id).map_err(String::from)
}

fn attach_battery_inner(
    ctx: &ReducerContext,
    device_id: u64,
    battery_inventory_id: u64,
) -> GameResult<()> {
    let devices = ctx.db.deployed_device();
    let mut device = get_owned_device(ctx, ctx.sender, device_id)?;

    if device.status != DeviceStatus::Active && device.status != DeviceStatus::Depleted {
        return Err(GameError::Conflict(format!(
            "cannot service a device in {:?} state",
            device.status
        )));
    }
    if device.battery_inventory_id.is_some() {
        return Err(GameError::Conflict("device already has a battery".to_string()));
    }

    let battery = inventory::get_owned_item(ctx, ctx.sender, battery_inventory_id)?;
    if battery.item_type != GameItemType::ScannerBattery {
        return Err(GameError::Validation("item is not a scanner battery".to_string()));
    }
    inventory::ensure_battery_unused(ctx, battery_inventory_id)?;
    let charge = inventory::read_f64_property(&battery.properties, inventory::PROP_CHARGE_PCT)
        .unwrap_or(0.0);
    if charge < 100.0 {
        return Err(GameError::InsufficientCharge(
            "battery must be fully charged to install".to_string(),
        ));
    }

    inventory::soft_delete_item(ctx, battery);

    device.battery_inventory_id = Some(battery_inventory_id);
    device.battery_status = BatteryStatus::Installed;
    device.battery_level = Some(100.0);
    if device.status == DeviceStatus::Depleted {
        device.status = DeviceStatus::Active;
        device.battery_depleted_at = None;
    }
    device.updated_at = ctx.timestamp;
    devices.id().update(device);

    log::info!(
        "[AttachBattery] Player {:?} installed battery {} into device {}",
        ctx.sender,
        battery_inventory_id,
        device_id
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MICROS_PER_DAY: i64 = 24 * 3600 * 1_000_000;

    #[test]
    fn drain_step_uses_the_floor_under_slow_rates() {
        // 1 %/h over 12 ticks/h rounds up to the 0.1 floor.
        let step = drain_step_pct(1.0, 12.0);
        assert!((step - 0.1).abs() < 1e-9);
        // Slower catalogs still make visible progress.
        assert!((drain_step_pct(0.2, 12.0) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn drain_step_scales_for_fast_catalogs() {
        let step = drain_step_pct(6.0, 12.0);
        assert!((step - 0.5).abs() < 1e-9);
    }

    #[test]
    fn abandonment_requires_fourteen_days() {
        let depleted_at = 0;
        assert!(!ready_to_abandon(depleted_at, 13 * MICROS_PER_DAY));
        assert!(ready_to_abandon(depleted_at, 14 * MICROS_PER_DAY));
        assert!(ready_to_abandon(depleted_at, 30 * MICROS_PER_DAY));
    }

    #[test]
    fn destruction_requires_seven_more_days() {
        let abandoned_at = 14 * MICROS_PER_DAY;
        assert!(!ready_to_destroy(abandoned_at, 20 * MICROS_PER_DAY));
        assert!(ready_to_destroy(abandoned_at, 21 * MICROS_PER_DAY));
    }
}
