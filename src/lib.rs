use spacetimedb::{ConnectionId, Identity, ReducerContext, Table, Timestamp};

// Declare the modules
mod models;
mod errors;
mod config;
mod geo;
mod rate_limiter;
mod progression;
mod inventory;
mod zone;
mod spawn_tables;
mod artifact;
mod gear;
mod zone_spawning;
mod zone_session;
mod zone_cleanup;
mod device;
mod device_access;
mod device_scan;
mod device_markers;
mod hack;
mod battery;
mod charging;
mod scheduler;

// Import Table Traits needed in this module
use crate::active_connection as ActiveConnectionTableTrait;
use crate::player as PlayerTableTrait;

use crate::errors::GameError;
use crate::models::GameItemType;

// Starter kit stats for the handheld scanner every new player receives.
const STARTER_SCANNER_SCAN_RADIUS_KM: f64 = 1.0;
const STARTER_SCANNER_HACK_RESISTANCE: u32 = 3;
const STARTER_HACK_TOOL_USES: u32 = 3;

/// Player session row: progression, counters, and the transient zone
/// membership the session manager maintains.
#[spacetimedb::table(name = player, public)]
#[derive(Clone, Debug)]
pub struct Player {
    #[primary_key]
    pub identity: Identity,
    pub username: String,
    /// 0..4, gates zones, biomes, and item access.
    pub tier: u32,
    pub xp: u64,
    pub artifacts_collected: u32,
    pub gear_collected: u32,
    pub zones_discovered: u32,
    /// Set by enter_zone, cleared by exit/eviction/cleanup.
    pub current_zone: Option<u64>,
    /// Handheld scanner whose properties gate artifact collection.
    pub equipped_scanner_id: Option<u64>,
    /// Last position reported through any location-bearing operation.
    pub last_lat: f64,
    pub last_lng: f64,
    pub is_online: bool,
    pub last_activity: Timestamp,
    pub created_at: Timestamp,
}

/// Tracks the live connection per identity so a stale disconnect cannot
/// mark a quickly-reconnected player offline.
#[spacetimedb::table(name = active_connection)]
#[derive(Clone, Debug)]
pub struct ActiveConnection {
    #[primary_key]
    identity: Identity,
    connection_id: ConnectionId,
    timestamp: Timestamp,
}

// --- Lifecycle Reducers ---

// Called once when the module is published or updated.
#[spacetimedb::reducer(init)]
pub fn init_module(ctx: &ReducerContext) -> Result<(), String> {
    log::info!("Initializing module...");

    crate::config::seed_game_config(ctx)?;
    crate::battery::seed_battery_types(ctx)?;
    // Registers the periodic tick and runs the first pass immediately.
    crate::scheduler::init_scheduler(ctx)?;

    log::info!("Module initialization complete.");
    Ok(())
}

#[spacetimedb::reducer(client_connected)]
pub fn identity_connected(ctx: &ReducerContext) -> Result<(), String> {
    let client_identity = ctx.sender;
    let connection_id = ctx.connection_id.ok_or_else(|| {
        log::error!("[Connect] Missing ConnectionId for {:?}", client_identity);
        "Internal error: Missing connection ID on connect".to_string()
    })?;

    let active_connections = ctx.db.active_connection();
    let new_active_conn = ActiveConnection {
        identity: client_identity,
        connection_id,
        timestamp: ctx.timestamp,
    };
    if active_connections.identity().find(&client_identity).is_some() {
        active_connections.identity().update(new_active_conn);
    } else {
        active_connections
            .try_insert(new_active_conn)
            .map_err(|e| format!("Failed to track connection: {}", e))?;
    }

    let players = ctx.db.player();
    if let Some(mut player) = players.identity().find(&client_identity) {
        if !player.is_online {
            player.is_online = true;
            players.identity().update(player);
            log::info!("[Connect] Set player {:?} to online.", client_identity);
        }
    } else {
        log::debug!(
            "[Connect] Identity {:?} has no player row yet (needs registration).",
            client_identity
        );
    }
    Ok(())
}

#[spacetimedb::reducer(client_disconnected)]
pub fn identity_disconnected(ctx: &ReducerContext) {
    let sender_id = ctx.sender;
    let disconnecting_connection_id = match ctx.connection_id {
        Some(id) => id,
        None => return,
    };

    let active_connections = ctx.db.active_connection();
    let players = ctx.db.player();

    if let Some(active_conn) = active_connections.identity().find(&sender_id) {
        if active_conn.connection_id == disconnecting_connection_id {
            active_connections.identity().delete(&sender_id);
            if let Some(mut player) = players.identity().find(&sender_id) {
                if player.is_online {
                    player.is_online = false;
                    players.identity().update(player);
                    log::info!("[Disconnect] Set player {:?} to offline.", sender_id);
                }
            }
        }
        // A mismatched connection id means the player already reconnected;
        // the stale disconnect changes nothing.
    }
}

/// Registers a new player or refreshes an existing one on reconnect. New
/// players receive the starter kit.
#[spacetimedb::reducer]
pub fn register_player(ctx: &ReducerContext, username: String) -> Result<(), String> {
    register_player_inner(ctx, username).map_err(String::from)
}

fn register_player_inner(ctx: &ReducerContext, username: String) -> Result<(), GameError> {
    let trimmed = username.trim();
    if trimmed.is_empty() || trimmed.len() > 32 {
        return Err(GameError::Validation(
            "username must be 1..=32 characters".to_string(),
        ));
    }

    let players = ctx.db.player();
    if let Some(mut existing) = players.identity().find(&ctx.sender) {
        existing.is_online = true;
        existing.last_activity = ctx.timestamp;
        players.identity().update(existing);
        log::info!("[RegisterPlayer] Player {:?} reconnected.", ctx.sender);
        return Ok(());
    }

    players
        .try_insert(Player {
            identity: ctx.sender,
            username: trimmed.to_string(),
            tier: 0,
            xp: 0,
            artifacts_collected: 0,
            gear_collected: 0,
            zones_discovered: 0,
            current_zone: None,
            equipped_scanner_id: None,
            last_lat: 0.0,
            last_lng: 0.0,
            is_online: true,
            last_activity: ctx.timestamp,
            created_at: ctx.timestamp,
        })
        .map_err(|e| GameError::Internal(format!("failed to create player: {}", e)))?;

    grant_starter_kit(ctx);
    log::info!("[RegisterPlayer] Registered new player '{}' ({:?}).", trimmed, ctx.sender);
    Ok(())
}

/// Every fresh account starts with a handheld scanner and a partly used
/// hack tool. Batteries come from the shop.
fn grant_starter_kit(ctx: &ReducerContext) {
    let scanner_properties = serde_json::to_string(&crate::inventory::ScannerProperties {
        scan_radius_km: STARTER_SCANNER_SCAN_RADIUS_KM,
        max_rarity_detected: "common".to_string(),
        collect_max_rarity: "rare".to_string(),
        hack_resistance: STARTER_SCANNER_HACK_RESISTANCE,
    })
    .unwrap_or_else(|_| "{}".to_string());
    let scanner = crate::inventory::add_inventory_item(
        ctx,
        ctx.sender,
        GameItemType::DeployableScanner,
        0,
        "Field Scanner Mk I".to_string(),
        1,
        scanner_properties,
    );

    let tool_properties = serde_json::to_string(&crate::inventory::HackToolProperties {
        uses_left: STARTER_HACK_TOOL_USES,
    })
    .unwrap_or_else(|_| "{}".to_string());
    crate::inventory::add_inventory_item(
        ctx,
        ctx.sender,
        GameItemType::HackTool,
        0,
        "Signal Spoofer".to_string(),
        1,
        tool_properties,
    );

    // The fresh scanner doubles as the equipped detector.
    let players = ctx.db.player();
    if let Some(mut player) = players.identity().find(&ctx.sender) {
        player.equipped_scanner_id = Some(scanner.id);
        players.identity().update(player);
    }
}
