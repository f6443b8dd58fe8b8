/******************************************************************************
 *                                                                            *
 * Zone sessions: entering, leaving, scanning inside a zone, and item        *
 * collection. Collection runs its preconditions in a fixed order so the     *
 * first failure determines the error kind, then commits the item claim,    *
 * inventory insert, counters, and XP in one transaction.                    *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{ReducerContext, ScheduleAt, Table, TimeDuration};

use crate::artifact::{self, artifact as ArtifactTableTrait};
use crate::config::get_game_config;
use crate::errors::{GameError, GameResult};
use crate::gear::{self, gear as GearTableTrait};
use crate::geo;
use crate::inventory::{self, inventory_item as InventoryItemTableTrait};
use crate::models::{max_gear_level_for_tier, GameItemType, Rarity};
use crate::player as PlayerTableTrait;
use crate::progression;
use crate::zone::zone as ZoneTableTrait;
use crate::zone_session::zone_activity_check_schedule as ZoneActivityCheckScheduleTableTrait;

/// Delay before a freshly emptied zone is re-examined for harvesting.
const ZONE_ACTIVITY_DEBOUNCE_SECS: i64 = 30;

/// How far last_activity is pushed into the past once a zone is empty, so
/// the cleanup sweep treats it as idle.
const EMPTY_ZONE_BACKDATE_SECS: i64 = 24 * 3600;

/// One-shot schedule row created after each artifact collection.
#[spacetimedb::table(name = zone_activity_check_schedule, scheduled(check_zone_activity))]
#[derive(Clone)]
pub struct ZoneActivityCheckSchedule {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub scheduled_at: ScheduleAt,
    pub zone_id: u64,
}

/******************************************************************************
 *                                REDUCERS                                    *
 ******************************************************************************/

/// --- Enter Zone ---
/// A player may enter a zone when standing inside its disk and meeting its
/// tier and biome requirements.
#[spacetimedb::reducer]
pub fn enter_zone(ctx: &ReducerContext, zone_id: u64, lat: f64, lng: f64) -> Result<(), String> {
    enter_zone_inner(ctx, zone_id, lat, lng).map_err(String::from)
}

fn enter_zone_inner(ctx: &ReducerContext, zone_id: u64, lat: f64, lng: f64) -> GameResult<()> {
    geo::validate_coordinates(lat, lng)?;
    let players = ctx.db.player();
    let mut player = players
        .identity()
        .find(ctx.sender)
        .ok_or_else(|| GameError::NotFound("player not registered".to_string()))?;

    let zones = ctx.db.zone();
    let mut zone = zones
        .id()
        .find(zone_id)
        .filter(|z| z.is_active)
        .ok_or_else(|| GameError::NotFound(format!("zone {} not found", zone_id)))?;

    if zone.tier_required > player.tier {
        return Err(GameError::Forbidden(format!(
            "zone requires tier {}, you are tier {}",
            zone.tier_required, player.tier
        )));
    }
    if !crate::models::Biome::available_for_tier(player.tier).contains(&zone.biome) {
        return Err(GameError::Forbidden(format!(
            "the {} biome is not accessible at tier {}",
            zone.biome.as_str(),
            player.tier
        )));
    }

    let distance = geo::haversine_distance_m(lat, lng, zone.center_lat, zone.center_lng);
    if distance > zone.radius_m as f64 {
        return Err(GameError::TooFar {
            actual_m: distance,
            max_m: zone.radius_m as f64,
        });
    }

    zone.last_activity = ctx.timestamp;
    zone.updated_at = ctx.timestamp;
    zones.id().update(zone);

    player.current_zone = Some(zone_id);
    player.last_lat = lat;
    player.last_lng = lng;
    player.last_activity = ctx.timestamp;
    players.identity().update(player);

    log::info!("[EnterZone] Player {:?} entered zone {}", ctx.sender, zone_id);
    Ok(())
}

/// --- Exit Zone ---
#[spacetimedb::reducer]
pub fn exit_zone(ctx: &ReducerContext) -> Result<(), String> {
    exit_zone_inner(ctx).map_err(String::from)
}

fn exit_zone_inner(ctx: &ReducerContext) -> GameResult<()> {
    let players = ctx.db.player();
    let mut player = players
        .identity()
        .find(ctx.sender)
        .ok_or_else(|| GameError::NotFound("player not registered".to_string()))?;

    match player.current_zone.take() {
        Some(zone_id) => {
            player.last_activity = ctx.timestamp;
            players.identity().update(player);
            log::info!("[ExitZone] Player {:?} left zone {}", ctx.sender, zone_id);
            Ok(())
        }
        None => Err(GameError::Conflict("not inside a zone".to_string())),
    }
}

/// --- Scan Zone ---
/// Refreshes the zone's activity stamp. The zone's active items are public
/// rows the client already subscribes to; the scan only validates that the
/// caller is really inside and logs what a detector sweep would report.
#[spacetimedb::reducer]
pub fn scan_zone(ctx: &ReducerContext, lat: f64, lng: f64) -> Result<(), String> {
    scan_zone_inner(ctx, lat, lng).map_err(String::from)
}

fn scan_zone_inner(ctx: &ReducerContext, lat: f64, lng: f64) -> GameResult<()> {
    geo::validate_coordinates(lat, lng)?;
    let players = ctx.db.player();
    let mut player = players
        .identity()
        .find(ctx.sender)
        .ok_or_else(|| GameError::NotFound("player not registered".to_string()))?;

    let zone_id = player
        .current_zone
        .ok_or_else(|| GameError::Forbidden("enter a zone before scanning it".to_string()))?;

    let zones = ctx.db.zone();
    let mut zone = zones
        .id()
        .find(zone_id)
        .filter(|z| z.is_active)
        .ok_or_else(|| GameError::NotFound(format!("zone {} not found", zone_id)))?;

    if !zone.contains(lat, lng) {
        return Err(GameError::TooFar {
            actual_m: geo::haversine_distance_m(lat, lng, zone.center_lat, zone.center_lng),
            max_m: zone.radius_m as f64,
        });
    }

    let artifacts = artifact::active_artifacts_in_zone(ctx, zone_id).len();
    let gear_count = gear::active_gear_in_zone(ctx, zone_id).len();

    zone.last_activity = ctx.timestamp;
    zone.updated_at = ctx.timestamp;
    zones.id().update(zone);

    player.last_lat = lat;
    player.last_lng = lng;
    player.last_activity = ctx.timestamp;
    players.identity().update(player);

    log::info!(
        "[ScanZone] Player {:?} scanned zone {}: {} artifacts, {} gear active",
        ctx.sender,
        zone_id,
        artifacts,
        gear_count
    );
    Ok(())
}

/// --- Equip Scanner ---
/// Marks one owned handheld scanner as the player's active detector. Its
/// `collect_max_rarity` property gates artifact collection.
#[spacetimedb::reducer]
pub fn equip_scanner(ctx: &ReducerContext, inventory_id: u64) -> Result<(), String> {
    equip_scanner_inner(ctx, inventory_id).map_err(String::from)
}

fn equip_scanner_inner(ctx: &ReducerContext, inventory_id: u64) -> GameResult<()> {
    let players = ctx.db.player();
    let mut player = players
        .identity()
        .find(ctx.sender)
        .ok_or_else(|| GameError::NotFound("player not registered".to_string()))?;

    let item = inventory::get_owned_item(ctx, ctx.sender, inventory_id)?;
    if item.item_type != GameItemType::DeployableScanner {
        return Err(GameError::Validation("item is not a scanner".to_string()));
    }

    player.equipped_scanner_id = Some(inventory_id);
    player.last_activity = ctx.timestamp;
    players.identity().update(player);
    log::info!("[EquipScanner] Player {:?} equipped scanner {}", ctx.sender, inventory_id);
    Ok(())
}

/// --- Collect Item ---
/// Preconditions run in a fixed order; the first failure decides the
/// returned error kind. On success everything commits atomically.
#[spacetimedb::reducer]
pub fn collect_item(
    ctx: &ReducerContext,
    zone_id: u64,
    item_type: GameItemType,
    item_id: u64,
    lat: f64,
    lng: f64,
) -> Result<(), String> {
    collect_item_inner(ctx, zone_id, item_type, item_id, lat, lng).map_err(String::from)
}

fn collect_item_inner(
    ctx: &ReducerContext,
    zone_id: u64,
    item_type: GameItemType,
    item_id: u64,
    lat: f64,
    lng: f64,
) -> GameResult<()> {
    geo::validate_coordinates(lat, lng)?;
    if item_type != GameItemType::Artifact && item_type != GameItemType::Gear {
        return Err(GameError::Validation(
            "only artifacts and gear can be collected".to_string(),
        ));
    }

    let players = ctx.db.player();
    let mut player = players
        .identity()
        .find(ctx.sender)
        .ok_or_else(|| GameError::NotFound("player not registered".to_string()))?;

    // 1. The player must have entered this zone.
    if player.current_zone != Some(zone_id) {
        return Err(GameError::Forbidden(
            "enter the zone before collecting".to_string(),
        ));
    }

    let config = get_game_config(ctx)?;

    match item_type {
        GameItemType::Artifact => {
            // 2. Item exists, is active, and belongs to this zone.
            let item = ctx
                .db
                .artifact()
                .id()
                .find(item_id)
                .filter(|a| a.is_active && !a.is_claimed && a.zone_id == zone_id)
                .ok_or_else(|| GameError::NotFound(format!("artifact {} not found", item_id)))?;

            // 3. Proximity: exactly at the limit is still allowed.
            let distance = geo::haversine_distance_m(lat, lng, item.lat, item.lng);
            if distance > config.max_collect_radius_m {
                return Err(GameError::TooFar {
                    actual_m: distance,
                    max_m: config.max_collect_radius_m,
                });
            }

            // 4. Tier gates the rarity and the biome.
            if item.rarity.rank() > Rarity::max_for_tier(player.tier).rank() {
                return Err(GameError::Forbidden(format!(
                    "{} artifacts require a higher tier",
                    item.rarity.as_str()
                )));
            }
            if !crate::models::Biome::available_for_tier(player.tier).contains(&item.biome) {
                return Err(GameError::Forbidden(format!(
                    "the {} biome is not accessible at tier {}",
                    item.biome.as_str(),
                    player.tier
                )));
            }

            // 5. The equipped scanner must detect this rarity.
            let scanner_max = equipped_scanner_max_rarity(ctx, &player)?;
            if item.rarity.rank() > scanner_max.rank() {
                return Err(GameError::Forbidden(format!(
                    "equipped scanner cannot collect {} artifacts",
                    item.rarity.as_str()
                )));
            }

            let item = artifact::claim_artifact(ctx, item);
            let properties = serde_json::json!({
                "rarity": item.rarity.as_str(),
                "biome": item.biome.as_str(),
                "zone_id": item.zone_id,
                "artifact_type": item.artifact_type,
            })
            .to_string();
            inventory::add_inventory_item(
                ctx,
                ctx.sender,
                GameItemType::Artifact,
                item.id,
                item.name.clone(),
                1,
                properties,
            );

            player.artifacts_collected += 1;
            let (xp, tier) = progression::apply_xp(
                player.xp,
                player.tier,
                progression::xp_for_artifact(item.rarity),
            );
            if tier > player.tier {
                log::info!("[Collect] Player {:?} advanced to tier {}", ctx.sender, tier);
            }
            player.xp = xp;
            player.tier = tier;
            log::info!(
                "[Collect] Player {:?} collected artifact '{}' ({}) from zone {}",
                ctx.sender,
                item.name,
                item.rarity.as_str(),
                zone_id
            );
        }
        GameItemType::Gear => {
            let item = ctx
                .db
                .gear()
                .id()
                .find(item_id)
                .filter(|g| g.is_active && !g.is_claimed && g.zone_id == zone_id)
                .ok_or_else(|| GameError::NotFound(format!("gear {} not found", item_id)))?;

            let distance = geo::haversine_distance_m(lat, lng, item.lat, item.lng);
            if distance > config.max_collect_radius_m {
                return Err(GameError::TooFar {
                    actual_m: distance,
                    max_m: config.max_collect_radius_m,
                });
            }

            if item.level > max_gear_level_for_tier(player.tier) {
                return Err(GameError::Forbidden(format!(
                    "level {} gear requires a higher tier",
                    item.level
                )));
            }
            if !crate::models::Biome::available_for_tier(player.tier).contains(&item.biome) {
                return Err(GameError::Forbidden(format!(
                    "the {} biome is not accessible at tier {}",
                    item.biome.as_str(),
                    player.tier
                )));
            }

            let item = gear::claim_gear(ctx, item);
            let properties = serde_json::json!({
                "level": item.level,
                "biome": item.biome.as_str(),
                "zone_id": item.zone_id,
                "gear_type": item.gear_type,
            })
            .to_string();
            inventory::add_inventory_item(
                ctx,
                ctx.sender,
                GameItemType::Gear,
                item.id,
                item.name.clone(),
                1,
                properties,
            );

            player.gear_collected += 1;
            log::info!(
                "[Collect] Player {:?} collected gear '{}' (level {}) from zone {}",
                ctx.sender,
                item.name,
                item.level,
                zone_id
            );
        }
        _ => unreachable!("validated above"),
    }

    player.last_lat = lat;
    player.last_lng = lng;
    player.last_activity = ctx.timestamp;
    players.identity().update(player);

    // Refresh the zone stamp and schedule the emptiness re-check.
    let zones = ctx.db.zone();
    if let Some(mut zone) = zones.id().find(zone_id) {
        zone.last_activity = ctx.timestamp;
        zone.updated_at = ctx.timestamp;
        zones.id().update(zone);
    }
    schedule_zone_activity_check(ctx, zone_id);

    Ok(())
}

/// Rarity ceiling of the player's equipped scanner. No equipped scanner
/// means only common artifacts are collectable.
fn equipped_scanner_max_rarity(
    ctx: &ReducerContext,
    player: &crate::Player,
) -> GameResult<Rarity> {
    let scanner_id = match player.equipped_scanner_id {
        Some(id) => id,
        None => return Ok(Rarity::Common),
    };
    let scanner = ctx
        .db
        .inventory_item()
        .id()
        .find(scanner_id)
        .filter(|i| !i.is_deleted && i.user_id == player.identity);
    match scanner {
        Some(row) => {
            let rarity = inventory::read_string_property(
                &row.properties,
                inventory::PROP_COLLECT_MAX_RARITY,
            )
            .and_then(|s| Rarity::parse(&s))
            .unwrap_or(Rarity::Common);
            Ok(rarity)
        }
        // Scanner was deployed or lost since it was equipped.
        None => Ok(Rarity::Common),
    }
}

/******************************************************************************
 *                        ZONE ACTIVITY DEBOUNCE                              *
 ******************************************************************************/

/// Schedules a one-shot emptiness check for the zone.
fn schedule_zone_activity_check(ctx: &ReducerContext, zone_id: u64) {
    let fire_at = ctx.timestamp + TimeDuration::from_micros(ZONE_ACTIVITY_DEBOUNCE_SECS * 1_000_000);
    ctx.db.zone_activity_check_schedule().insert(ZoneActivityCheckSchedule {
        id: 0, // auto_inc
        scheduled_at: fire_at.into(),
        zone_id,
    });
}

/// Scheduled reducer: if the zone has no active artifacts left, back-date
/// its activity and pull its expiry forward so the cleanup sweep may
/// harvest it.
#[spacetimedb::reducer]
pub fn check_zone_activity(
    ctx: &ReducerContext,
    args: ZoneActivityCheckSchedule,
) -> Result<(), String> {
    if ctx.sender != ctx.identity() {
        return Err("check_zone_activity may only be invoked by the scheduler".to_string());
    }
    // One-shot row; drop it regardless of outcome.
    ctx.db.zone_activity_check_schedule().id().delete(args.id);

    let zones = ctx.db.zone();
    let mut zone = match zones.id().find(args.zone_id) {
        Some(z) if z.is_active && z.auto_cleanup => z,
        _ => return Ok(()),
    };

    if !artifact::active_artifacts_in_zone(ctx, zone.id).is_empty() {
        return Ok(());
    }

    zone.last_activity =
        ctx.timestamp + TimeDuration::from_micros(-EMPTY_ZONE_BACKDATE_SECS * 1_000_000);
    if zone
        .expires_at
        .map(|exp| exp > ctx.timestamp)
        .unwrap_or(false)
    {
        zone.expires_at = Some(ctx.timestamp);
    }
    zone.updated_at = ctx.timestamp;
    zones.id().update(zone);
    log::info!(
        "[ZoneActivity] Zone {} is out of artifacts; expiry pulled forward for cleanup",
        args.zone_id
    );
    Ok(())
}
