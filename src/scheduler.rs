/******************************************************************************
 *                                                                            *
 * The periodic world tick. One scheduled row fires every five minutes and   *
 * runs the background phases in a fixed order: zone cleanup, expiry         *
 * warnings, battery drain, the three status demotions, and charging        *
 * progress. Each phase recovers independently so one bad row never stalls  *
 * the rest of the tick. An initial pass runs at module init.               *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{ReducerContext, ScheduleAt, Table, TimeDuration};

use crate::battery::battery_instance as BatteryInstanceTableTrait;
use crate::battery::battery_type as BatteryTypeTableTrait;
use crate::charging;
use crate::device::{
    deployed_device as DeployedDeviceTableTrait, drain_step_pct, ready_to_abandon,
    ready_to_destroy, DeployedDevice,
};
use crate::inventory::inventory_item as InventoryItemTableTrait;
use crate::models::{BatteryStatus, DeviceStatus};
use crate::scheduler::world_tick_schedule as WorldTickScheduleTableTrait;
use crate::zone_cleanup;

pub const TICK_PERIOD_SECS: u64 = 300;
const TICKS_PER_HOUR: f64 = 3_600.0 / TICK_PERIOD_SECS as f64;

/// Fallback when a device's battery catalog entry cannot be resolved.
const DEFAULT_DRAIN_RATE_PER_HOUR: f64 = 1.0;

#[spacetimedb::table(name = world_tick_schedule, scheduled(run_world_tick))]
#[derive(Clone)]
pub struct WorldTickSchedule {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub scheduled_at: ScheduleAt,
}

/// Registers the periodic tick (idempotent) and runs the first pass
/// immediately. Called from module init.
pub fn init_scheduler(ctx: &ReducerContext) -> Result<(), String> {
    let schedules = ctx.db.world_tick_schedule();
    if schedules.count() == 0 {
        let interval = TimeDuration::from_micros(TICK_PERIOD_SECS as i64 * 1_000_000);
        schedules.try_insert(WorldTickSchedule {
            id: 0, // auto_inc
            scheduled_at: interval.into(),
        })?;
        log::info!("World tick scheduled every {} s.", TICK_PERIOD_SECS);
    }
    // Initial pass so a freshly published module settles stale state at
    // once instead of five minutes later.
    run_tick_phases(ctx);
    Ok(())
}

/// Scheduled reducer driving the world tick.
#[spacetimedb::reducer]
pub fn run_world_tick(ctx: &ReducerContext, _args: WorldTickSchedule) -> Result<(), String> {
    if ctx.sender != ctx.identity() {
        return Err("run_world_tick may only be invoked by the scheduler".to_string());
    }
    run_tick_phases(ctx);
    Ok(())
}

/// The seven phases, in order. A failing phase logs and the next one still
/// runs.
fn run_tick_phases(ctx: &ReducerContext) {
    if let Err(e) = zone_cleanup::cleanup_expired_zones(ctx) {
        log::error!("[WorldTick] Zone cleanup failed: {}", e);
    }
    if let Err(e) = zone_cleanup::warn_expiring_zones(ctx) {
        log::error!("[WorldTick] Expiry warning sweep failed: {}", e);
    }
    if let Err(e) = drain_device_batteries(ctx) {
        log::error!("[WorldTick] Battery drain failed: {}", e);
    }
    if let Err(e) = demote_to_depleted(ctx) {
        log::error!("[WorldTick] Depleted demotion failed: {}", e);
    }
    if let Err(e) = demote_to_abandoned(ctx) {
        log::error!("[WorldTick] Abandoned demotion failed: {}", e);
    }
    if let Err(e) = demote_to_destroyed(ctx) {
        log::error!("[WorldTick] Destroyed demotion failed: {}", e);
    }
    if let Err(e) = charging::advance_charging_sessions(ctx) {
        log::error!("[WorldTick] Charging progress failed: {}", e);
    }
}

/******************************************************************************
 *                            DEVICE PHASES                                   *
 ******************************************************************************/

/// Catalog drain rate for the battery installed in a device, resolved
/// through inventory row → battery instance → battery type.
fn drain_rate_for_device(ctx: &ReducerContext, device: &DeployedDevice) -> f64 {
    let battery_inventory_id = match device.battery_inventory_id {
        Some(id) => id,
        None => return DEFAULT_DRAIN_RATE_PER_HOUR,
    };
    ctx.db
        .inventory_item()
        .id()
        .find(battery_inventory_id)
        .and_then(|row| ctx.db.battery_instance().id().find(row.item_id))
        .and_then(|instance| ctx.db.battery_type().id().find(instance.battery_type_id))
        .map(|battery_type| battery_type.drain_rate_per_hour)
        .unwrap_or(DEFAULT_DRAIN_RATE_PER_HOUR)
}

/// Phase 3: passive drain on every active device with an installed,
/// non-flat battery. The per-tick floor keeps progress visible even for
/// slow catalogs.
fn drain_device_batteries(ctx: &ReducerContext) -> Result<(), String> {
    let devices = ctx.db.deployed_device();
    let draining: Vec<DeployedDevice> = devices
        .iter()
        .filter(|d| {
            d.is_active
                && d.status == DeviceStatus::Active
                && d.battery_status == BatteryStatus::Installed
                && d.battery_level.unwrap_or(0.0) > 0.0
        })
        .collect();

    let mut drained = 0;
    for mut device in draining {
        let rate = drain_rate_for_device(ctx, &device);
        let step = drain_step_pct(rate, TICKS_PER_HOUR) as f32;
        let level = device.battery_level.unwrap_or(0.0);
        device.battery_level = Some((level - step).max(0.0));
        device.updated_at = ctx.timestamp;
        devices.id().update(device);
        drained += 1;
    }
    if drained > 0 {
        log::debug!("[WorldTick] Drained {} device batteries", drained);
    }
    Ok(())
}

/// Phase 4: active devices with a flat battery become depleted.
fn demote_to_depleted(ctx: &ReducerContext) -> Result<(), String> {
    let devices = ctx.db.deployed_device();
    let flat: Vec<DeployedDevice> = devices
        .iter()
        .filter(|d| {
            d.status == DeviceStatus::Active
                && d.battery_level.map(|l| l <= 0.0).unwrap_or(false)
        })
        .collect();

    for mut device in flat {
        device.status = DeviceStatus::Depleted;
        device.battery_depleted_at = Some(ctx.timestamp);
        if device.battery_status == BatteryStatus::Installed {
            device.battery_status = BatteryStatus::Depleted;
        }
        device.updated_at = ctx.timestamp;
        log::info!("[WorldTick] Device {} depleted its battery", device.id);
        devices.id().update(device);
    }
    Ok(())
}

/// Phase 5: depleted devices left alone for two weeks become abandoned
/// and claimable.
fn demote_to_abandoned(ctx: &ReducerContext) -> Result<(), String> {
    let devices = ctx.db.deployed_device();
    let now_micros = ctx.timestamp.to_micros_since_unix_epoch();
    let stale: Vec<DeployedDevice> = devices
        .iter()
        .filter(|d| d.status == DeviceStatus::Depleted)
        .filter(|d| {
            d.battery_depleted_at
                .map(|t| ready_to_abandon(t.to_micros_since_unix_epoch(), now_micros))
                .unwrap_or(false)
        })
        .collect();

    for mut device in stale {
        device.status = DeviceStatus::Abandoned;
        device.abandoned_at = Some(ctx.timestamp);
        device.updated_at = ctx.timestamp;
        log::info!(
            "[WorldTick] Device {} abandoned (owner {:?} never recharged it)",
            device.id,
            device.owner_id
        );
        devices.id().update(device);
    }
    Ok(())
}

/// Phase 6: abandoned devices rust away after one more week.
fn demote_to_destroyed(ctx: &ReducerContext) -> Result<(), String> {
    let devices = ctx.db.deployed_device();
    let now_micros = ctx.timestamp.to_micros_since_unix_epoch();
    let doomed: Vec<DeployedDevice> = devices
        .iter()
        .filter(|d| d.status == DeviceStatus::Abandoned)
        .filter(|d| {
            d.abandoned_at
                .map(|t| ready_to_destroy(t.to_micros_since_unix_epoch(), now_micros))
                .unwrap_or(false)
        })
        .collect();

    for mut device in doomed {
        device.status = DeviceStatus::Destroyed;
        device.is_active = false;
        device.updated_at = ctx.timestamp;
        log::info!("[WorldTick] Device {} destroyed after abandonment", device.id);
        devices.id().update(device);
    }
    Ok(())
}
