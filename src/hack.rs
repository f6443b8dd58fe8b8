/******************************************************************************
 *                                                                            *
 * Hacking and claiming deployed devices. The minigame itself runs on the    *
 * client; the server audits the reported verdict with duration bounds and   *
 * charges exactly one hack tool use per attempt, win or lose. A claim on    *
 * an abandoned device transfers ownership inside the reducer transaction;   *
 * two racing claims serialize and the loser's re-check reports the          *
 * conflict through its outcome row (the tool charge and the audit row       *
 * must survive, so the loser does not roll back).                           *
 *                                                                            *
 ******************************************************************************/

use rand::Rng;
use spacetimedb::{Identity, ReducerContext, Table, TimeDuration, Timestamp};

use crate::config::get_game_config;
use crate::device::{deployed_device as DeployedDeviceTableTrait, DeployedDevice};
use crate::device_access::{
    self, device_access as DeviceAccessTableTrait, DeviceAccess,
};
use crate::errors::{GameError, GameResult};
use crate::geo;
use crate::hack::device_hack as DeviceHackTableTrait;
use crate::hack::hack_outcome as HackOutcomeTableTrait;
use crate::inventory::{self, inventory_item as InventoryItemTableTrait};
use crate::models::{AccessLevel, BatteryStatus, DeviceStatus, GameItemType};
use crate::player as PlayerTableTrait;

// Anti-cheat bounds on the client-reported minigame duration.
const MIN_MINIGAME_SECS: f32 = 3.0;
const MAX_CLAIM_MINIGAME_SECS: f32 = 30.0;

const TEMP_ACCESS_SECS: i64 = 24 * 3600;
const DISABLE_SECS: i64 = 24 * 3600;
const DISABLE_CHANCE: f64 = 0.25;

/// Immutable audit row, one per hack attempt regardless of outcome.
#[spacetimedb::table(name = device_hack, public)]
#[derive(Clone, Debug)]
pub struct DeviceHack {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    #[index(btree)]
    pub device_id: u64,
    pub attacker_id: Identity,
    pub minigame_score: u32,
    pub minigame_duration_secs: f32,
    pub success: bool,
    pub became_owner: bool,
    pub attempted_at: Timestamp,
}

/// Latest hack/claim outcome per user. Post-consumption failures (a lost
/// claim race) land here instead of a reducer error so the tool charge and
/// the audit row persist.
#[spacetimedb::table(name = hack_outcome, public)]
#[derive(Clone, Debug)]
pub struct HackOutcome {
    #[primary_key]
    pub user_id: Identity,
    pub device_id: u64,
    /// "claimed", "access_granted", "failed", or an error kind such as
    /// "conflict".
    pub kind: String,
    pub message: String,
    pub happened_at: Timestamp,
}

/******************************************************************************
 *                                REDUCERS                                    *
 ******************************************************************************/

/// --- Hack Device ---
/// An attempt against an active foreign device. Success grants 24 h of
/// temporary scan access and may knock the device offline for a day.
#[spacetimedb::reducer]
pub fn hack_device(
    ctx: &ReducerContext,
    device_id: u64,
    tool_inventory_id: u64,
    lat: f64,
    lng: f64,
    minigame_success: bool,
    minigame_score: u32,
    minigame_duration_secs: f32,
) -> Result<(), String> {
    hack_device_inner(
        ctx,
        device_id,
        tool_inventory_id,
        lat,
        lng,
        minigame_success,
        minigame_score,
        minigame_duration_secs,
    )
    .map_err(String::from)
}

fn hack_device_inner(
    ctx: &ReducerContext,
    device_id: u64,
    tool_inventory_id: u64,
    lat: f64,
    lng: f64,
    minigame_success: bool,
    minigame_score: u32,
    minigame_duration_secs: f32,
) -> GameResult<()> {
    let device = validate_attempt(ctx, device_id, lat, lng, minigame_duration_secs)?;
    if device.status != DeviceStatus::Active {
        return Err(GameError::Conflict(format!(
            "device is {:?}; only active devices can be hacked",
            device.status
        )));
    }

    consume_tool_charge(ctx, tool_inventory_id)?;
    record_attempt(ctx, device_id, minigame_score, minigame_duration_secs, minigame_success, false);

    if !minigame_success {
        publish_outcome(ctx, device_id, "failed", "hack minigame failed");
        log::info!(
            "[Hack] Player {:?} failed a hack on device {}",
            ctx.sender,
            device_id
        );
        return Ok(());
    }

    grant_temporary_access(ctx, device)?;
    Ok(())
}

/// --- Claim Device ---
/// An attempt against an abandoned device. Success transfers ownership;
/// losing the race to another claimant reports `conflict` through the
/// outcome row.
#[spacetimedb::reducer]
pub fn claim_device(
    ctx: &ReducerContext,
    device_id: u64,
    tool_inventory_id: u64,
    lat: f64,
    lng: f64,
    minigame_success: bool,
    minigame_score: u32,
    minigame_duration_secs: f32,
) -> Result<(), String> {
    claim_device_inner(
        ctx,
        device_id,
        tool_inventory_id,
        lat,
        lng,
        minigame_success,
        minigame_score,
        minigame_duration_secs,
    )
    .map_err(String::from)
}

fn claim_device_inner(
    ctx: &ReducerContext,
    device_id: u64,
    tool_inventory_id: u64,
    lat: f64,
    lng: f64,
    minigame_success: bool,
    minigame_score: u32,
    minigame_duration_secs: f32,
) -> GameResult<()> {
    let device = validate_attempt(ctx, device_id, lat, lng, minigame_duration_secs)?;
    if minigame_duration_secs > MAX_CLAIM_MINIGAME_SECS {
        return Err(GameError::Validation(format!(
            "claim minigame took {:.1} s, longer than the {:.0} s ceiling",
            minigame_duration_secs, MAX_CLAIM_MINIGAME_SECS
        )));
    }

    consume_tool_charge(ctx, tool_inventory_id)?;

    if !minigame_success {
        record_attempt(ctx, device_id, minigame_score, minigame_duration_secs, false, false);
        publish_outcome(ctx, device_id, "failed", "claim minigame failed");
        log::info!(
            "[Claim] Player {:?} failed a claim on device {}",
            ctx.sender,
            device_id
        );
        return Ok(());
    }

    // Critical section: the status re-check below is what loses the race.
    // Reducers are serializable transactions, so the second claimant sees
    // the first one's ownership transfer.
    if device.status != DeviceStatus::Abandoned {
        record_attempt(ctx, device_id, minigame_score, minigame_duration_secs, true, false);
        publish_outcome(ctx, device_id, "conflict", "claim race lost: device is no longer abandoned");
        log::info!(
            "[Claim] Player {:?} lost the claim race on device {}",
            ctx.sender,
            device_id
        );
        return Ok(());
    }

    transfer_ownership(ctx, device)?;
    record_attempt(ctx, device_id, minigame_score, minigame_duration_secs, true, true);
    publish_outcome(ctx, device_id, "claimed", "device ownership transferred");
    Ok(())
}

/******************************************************************************
 *                               INTERNALS                                    *
 ******************************************************************************/

/// Shared pre-consumption validation: coordinates, registration, target
/// existence, ownership, distance, and the minimum minigame duration.
fn validate_attempt(
    ctx: &ReducerContext,
    device_id: u64,
    lat: f64,
    lng: f64,
    minigame_duration_secs: f32,
) -> GameResult<DeployedDevice> {
    geo::validate_coordinates(lat, lng)?;
    ctx.db
        .player()
        .identity()
        .find(ctx.sender)
        .ok_or_else(|| GameError::NotFound("player not registered".to_string()))?;

    let device = ctx
        .db
        .deployed_device()
        .id()
        .find(device_id)
        .ok_or_else(|| GameError::NotFound(format!("device {} not found", device_id)))?;
    if device.status == DeviceStatus::Destroyed {
        return Err(GameError::Conflict("device is destroyed".to_string()));
    }
    if device.owner_id == ctx.sender {
        return Err(GameError::Forbidden("cannot hack your own device".to_string()));
    }

    let config = get_game_config(ctx)?;
    let distance = geo::haversine_distance_m(lat, lng, device.lat, device.lng);
    if distance > config.hack_max_distance_m {
        return Err(GameError::TooFar {
            actual_m: distance,
            max_m: config.hack_max_distance_m,
        });
    }

    if !minigame_duration_secs.is_finite() || minigame_duration_secs < MIN_MINIGAME_SECS {
        return Err(GameError::Validation(format!(
            "minigame duration {:.1} s is below the {:.0} s minimum",
            minigame_duration_secs, MIN_MINIGAME_SECS
        )));
    }

    Ok(device)
}

/// Burns one use of the hack tool. The last charge tombstones the row.
fn consume_tool_charge(ctx: &ReducerContext, tool_inventory_id: u64) -> GameResult<()> {
    let tool = inventory::get_owned_item(ctx, ctx.sender, tool_inventory_id)?;
    if tool.item_type != GameItemType::HackTool {
        return Err(GameError::Validation("item is not a hack tool".to_string()));
    }
    let uses_left =
        inventory::read_u32_property(&tool.properties, inventory::PROP_USES_LEFT).unwrap_or(1);
    if uses_left == 0 {
        return Err(GameError::InsufficientCharge("hack tool has no uses left".to_string()));
    }

    let remaining = uses_left - 1;
    let tool = inventory::set_item_property(
        ctx,
        tool,
        inventory::PROP_USES_LEFT,
        serde_json::json!(remaining),
    );
    if remaining == 0 {
        inventory::soft_delete_item(ctx, tool);
        log::debug!(
            "[Hack] Tool {} consumed its last charge and was retired",
            tool_inventory_id
        );
    }
    Ok(())
}

fn record_attempt(
    ctx: &ReducerContext,
    device_id: u64,
    minigame_score: u32,
    minigame_duration_secs: f32,
    success: bool,
    became_owner: bool,
) {
    ctx.db.device_hack().insert(DeviceHack {
        id: 0, // auto_inc
        device_id,
        attacker_id: ctx.sender,
        minigame_score,
        minigame_duration_secs,
        success,
        became_owner,
        attempted_at: ctx.timestamp,
    });
}

fn publish_outcome(ctx: &ReducerContext, device_id: u64, kind: &str, message: &str) {
    let outcomes = ctx.db.hack_outcome();
    let row = HackOutcome {
        user_id: ctx.sender,
        device_id,
        kind: kind.to_string(),
        message: message.to_string(),
        happened_at: ctx.timestamp,
    };
    if outcomes.user_id().find(ctx.sender).is_some() {
        outcomes.user_id().update(row);
    } else {
        outcomes.insert(row);
    }
}

/// Successful hack on an active device: a 24 h temporary grant, plus a 25%
/// chance of knocking the device offline for the owner-visible disable
/// window. A device that was disabled in the last 24 h cannot be disabled
/// again.
fn grant_temporary_access(ctx: &ReducerContext, device: DeployedDevice) -> GameResult<()> {
    let devices = ctx.db.deployed_device();
    let access = ctx.db.device_access();
    let now = ctx.timestamp;
    let expires_at = now + TimeDuration::from_micros(TEMP_ACCESS_SECS * 1_000_000);

    let recently_disabled = device
        .last_disabled_at
        .map(|t| {
            now.to_micros_since_unix_epoch() - t.to_micros_since_unix_epoch()
                < DISABLE_SECS * 1_000_000
        })
        .unwrap_or(false);
    let rolls_disable = !recently_disabled && ctx.rng().gen::<f64>() < DISABLE_CHANCE;

    let mut grant = match device_access::find_access(ctx, device.id, ctx.sender) {
        Some(existing) => existing,
        None => access.insert(DeviceAccess {
            id: 0, // auto_inc
            device_id: device.id,
            user_id: ctx.sender,
            access_level: AccessLevel::Temporary,
            granted_at: now,
            expires_at: Some(expires_at),
            is_device_disabled: false,
            disabled_until: None,
        }),
    };
    grant.access_level = AccessLevel::Temporary;
    grant.granted_at = now;
    grant.expires_at = Some(expires_at);
    if rolls_disable {
        grant.is_device_disabled = true;
        grant.disabled_until = Some(now + TimeDuration::from_micros(DISABLE_SECS * 1_000_000));
    }
    access.id().update(grant);

    if rolls_disable {
        let mut updated = device.clone();
        updated.last_disabled_at = Some(now);
        updated.updated_at = now;
        devices.id().update(updated);
        publish_outcome(
            ctx,
            device.id,
            "access_granted",
            "temporary access granted; device knocked offline for 24 h",
        );
        log::info!(
            "[Hack] Player {:?} gained access to device {} and disabled it",
            ctx.sender,
            device.id
        );
    } else {
        publish_outcome(ctx, device.id, "access_granted", "temporary access granted for 24 h");
        log::info!(
            "[Hack] Player {:?} gained temporary access to device {}",
            ctx.sender,
            device.id
        );
    }
    Ok(())
}

/// Successful claim: ownership, an empty battery if one is still linked,
/// and a clean access slate.
fn transfer_ownership(ctx: &ReducerContext, device: DeployedDevice) -> GameResult<()> {
    let devices = ctx.db.deployed_device();
    let mut updated = device.clone();

    // Any linked battery transfers to the hacker, fully drained. The row
    // stays tombstoned while installed in the device.
    let battery_present = match device.battery_inventory_id {
        Some(battery_inventory_id) => {
            if let Some(mut battery) = ctx.db.inventory_item().id().find(battery_inventory_id) {
                battery.user_id = ctx.sender;
                battery.properties = inventory::write_property(
                    &battery.properties,
                    inventory::PROP_CHARGE_PCT,
                    serde_json::json!(0.0),
                );
                battery.updated_at = ctx.timestamp;
                ctx.db.inventory_item().id().update(battery);
                true
            } else {
                log::warn!(
                    "[Claim] Device {} battery row {} is missing; treating as removed",
                    device.id,
                    battery_inventory_id
                );
                updated.battery_inventory_id = None;
                false
            }
        }
        None => false,
    };

    updated.owner_id = ctx.sender;
    updated.status = DeviceStatus::Active;
    updated.is_active = true;
    if battery_present {
        updated.battery_level = Some(0.0);
        updated.battery_status = BatteryStatus::Depleted;
    } else {
        updated.battery_level = None;
        updated.battery_status = BatteryStatus::Removed;
    }
    updated.battery_depleted_at = None;
    updated.abandoned_at = None;
    updated.updated_at = ctx.timestamp;
    devices.id().update(updated);

    let revoked = device_access::revoke_all_access(ctx, device.id);
    log::info!(
        "[Claim] Player {:?} claimed device {} ({} prior grants revoked)",
        ctx.sender,
        device.id,
        revoked
    );
    Ok(())
}
