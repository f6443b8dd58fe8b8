/******************************************************************************
 *                                                                            *
 * Singleton gameplay configuration, seeded once at module init. This is     *
 * the single configuration point for distance limits and cooldown           *
 * durations; operators widen limits by updating the row, never by           *
 * recompiling constants.                                                     *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{ReducerContext, Table};

use crate::config::game_config as GameConfigTableTrait;
use crate::errors::{GameError, GameResult};

// Production deploy limit. The original test builds carried a 30 km value;
// that is an operator override on this row, never a compiled-in default.
pub const DEFAULT_MAX_DEPLOY_DISTANCE_M: f64 = 50.0;

#[spacetimedb::table(name = game_config, public)]
#[derive(Clone, Debug)]
pub struct GameConfig {
    #[primary_key]
    #[auto_inc]
    pub id: u32,
    /// Player-to-device distance ceiling for deployment.
    pub max_deploy_distance_m: f64,
    /// Radius within which zones are returned from an area scan.
    pub zone_visibility_radius_m: f64,
    /// Radius within which an area scan may spawn new zones.
    pub zone_spawn_radius_m: f64,
    /// Player-to-item distance ceiling for collection.
    pub max_collect_radius_m: f64,
    /// Player-to-device distance ceiling for scanning through a device.
    pub device_scan_max_distance_m: f64,
    /// Player-to-device distance ceiling for hack attempts.
    pub hack_max_distance_m: f64,
    /// Per-user area scan cooldown.
    pub area_scan_cooldown_secs: u32,
    /// Per-(device, user) scan cooldown.
    pub device_scan_cooldown_secs: u32,
}

/// Seeds the config row if it does not exist yet. Idempotent; called from
/// module init.
pub fn seed_game_config(ctx: &ReducerContext) -> Result<(), String> {
    let configs = ctx.db.game_config();
    if configs.count() == 0 {
        log::info!("Seeding initial GameConfig.");
        configs.try_insert(GameConfig {
            id: 0, // auto_inc
            max_deploy_distance_m: DEFAULT_MAX_DEPLOY_DISTANCE_M,
            zone_visibility_radius_m: 7_000.0,
            zone_spawn_radius_m: 2_000.0,
            max_collect_radius_m: 50.0,
            device_scan_max_distance_m: 20_000.0,
            hack_max_distance_m: 50.0,
            area_scan_cooldown_secs: 30,
            device_scan_cooldown_secs: 300,
        })?;
    } else {
        log::debug!("GameConfig already seeded.");
    }
    Ok(())
}

/// Fetches the singleton config row.
pub fn get_game_config(ctx: &ReducerContext) -> GameResult<GameConfig> {
    ctx.db
        .game_config()
        .iter()
        .next()
        .ok_or_else(|| GameError::Internal("game config not seeded".to_string()))
}
