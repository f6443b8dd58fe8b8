/******************************************************************************
 *                                                                            *
 * The inventory adapter. One table holds every user-owned stack; rows are    *
 * soft-deleted (never hard-deleted) while something references them, and     *
 * "in use" is expressed by references from deployed devices and charging     *
 * sessions, not by deletion. Free-form per-row properties are a JSON         *
 * object mutated through the helpers here.                                   *
 *                                                                            *
 ******************************************************************************/

use serde::{Deserialize, Serialize};
use spacetimedb::{Identity, ReducerContext, Table, Timestamp};

use crate::charging::battery_charging_session as BatteryChargingSessionTableTrait;
use crate::device::deployed_device as DeployedDeviceTableTrait;
use crate::errors::{GameError, GameResult};
use crate::inventory::inventory_item as InventoryItemTableTrait;
use crate::models::{ChargingStatus, GameItemType};

// Property keys shared with clients. Stored inside the JSON blob, so a key
// rename is a data migration.
pub const PROP_CHARGE_PCT: &str = "charge_pct";
pub const PROP_USES_LEFT: &str = "uses_left";
pub const PROP_SCAN_RADIUS_KM: &str = "scan_radius_km";
pub const PROP_MAX_RARITY: &str = "max_rarity_detected";
pub const PROP_COLLECT_MAX_RARITY: &str = "collect_max_rarity";
pub const PROP_HACK_RESISTANCE: &str = "hack_resistance";

#[spacetimedb::table(name = inventory_item, public)]
#[derive(Clone, Debug)]
pub struct InventoryItem {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    #[index(btree)]
    pub user_id: Identity,
    pub item_type: GameItemType,
    /// Catalog reference: artifact/gear row id, battery instance id, or
    /// tool catalog id depending on `item_type`.
    pub item_id: u64,
    pub name: String,
    pub quantity: u32,
    /// JSON object with free-form per-item properties.
    pub properties: String,
    pub is_deleted: bool,
    pub deleted_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/******************************************************************************
 *                          PROPERTY JSON HELPERS                             *
 ******************************************************************************/

/// Typed shape of a handheld/deployable scanner's properties blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerProperties {
    pub scan_radius_km: f64,
    pub max_rarity_detected: String,
    pub collect_max_rarity: String,
    pub hack_resistance: u32,
}

/// Typed shape of a scanner battery's properties blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryProperties {
    pub charge_pct: f64,
    pub battery_type: String,
}

/// Typed shape of a hack tool's properties blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HackToolProperties {
    pub uses_left: u32,
}

/// Reads one key out of a properties blob. Returns None for missing keys
/// and for blobs that fail to parse.
pub fn read_property(properties: &str, key: &str) -> Option<serde_json::Value> {
    let parsed: serde_json::Value = serde_json::from_str(properties).ok()?;
    parsed.get(key).cloned()
}

pub fn read_f64_property(properties: &str, key: &str) -> Option<f64> {
    read_property(properties, key).and_then(|v| v.as_f64())
}

pub fn read_u32_property(properties: &str, key: &str) -> Option<u32> {
    read_property(properties, key)
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
}

pub fn read_string_property(properties: &str, key: &str) -> Option<String> {
    read_property(properties, key)
        .and_then(|v| v.as_str().map(|s| s.to_string()))
}

/// Writes one key into a properties blob, replacing any prior value. A
/// malformed blob is replaced by a fresh object rather than propagated.
pub fn write_property(properties: &str, key: &str, value: serde_json::Value) -> String {
    let mut parsed: serde_json::Value = serde_json::from_str(properties)
        .ok()
        .filter(|v: &serde_json::Value| v.is_object())
        .unwrap_or_else(|| serde_json::json!({}));
    parsed[key] = value;
    parsed.to_string()
}

/******************************************************************************
 *                             ROW OPERATIONS                                 *
 ******************************************************************************/

/// Inserts a new inventory row for the user and returns it.
pub fn add_inventory_item(
    ctx: &ReducerContext,
    user_id: Identity,
    item_type: GameItemType,
    item_id: u64,
    name: String,
    quantity: u32,
    properties: String,
) -> InventoryItem {
    ctx.db.inventory_item().insert(InventoryItem {
        id: 0, // auto_inc
        user_id,
        item_type,
        item_id,
        name,
        quantity,
        properties,
        is_deleted: false,
        deleted_at: None,
        created_at: ctx.timestamp,
        updated_at: ctx.timestamp,
    })
}

/// Loads a live (non-tombstoned) inventory row owned by the user.
pub fn get_owned_item(
    ctx: &ReducerContext,
    user_id: Identity,
    inventory_id: u64,
) -> GameResult<InventoryItem> {
    let item = ctx
        .db
        .inventory_item()
        .id()
        .find(inventory_id)
        .ok_or_else(|| GameError::NotFound(format!("inventory item {} not found", inventory_id)))?;
    if item.user_id != user_id {
        return Err(GameError::Forbidden("you do not own this item".to_string()));
    }
    if item.is_deleted {
        return Err(GameError::NotFound(format!(
            "inventory item {} not found",
            inventory_id
        )));
    }
    Ok(item)
}

/// Marks a row as tombstoned. Used when a device takes exclusive ownership
/// of the row (deploy) or a battery is destroyed.
pub fn soft_delete_item(ctx: &ReducerContext, mut item: InventoryItem) -> InventoryItem {
    item.is_deleted = true;
    item.deleted_at = Some(ctx.timestamp);
    item.updated_at = ctx.timestamp;
    ctx.db.inventory_item().id().update(item.clone());
    item
}

/// Clears the tombstone, returning the row to the player's usable
/// inventory.
pub fn restore_item(ctx: &ReducerContext, mut item: InventoryItem) -> InventoryItem {
    item.is_deleted = false;
    item.deleted_at = None;
    item.updated_at = ctx.timestamp;
    ctx.db.inventory_item().id().update(item.clone());
    item
}

/// Rewrites one JSON property on a row and persists it.
pub fn set_item_property(
    ctx: &ReducerContext,
    mut item: InventoryItem,
    key: &str,
    value: serde_json::Value,
) -> InventoryItem {
    item.properties = write_property(&item.properties, key, value);
    item.updated_at = ctx.timestamp;
    ctx.db.inventory_item().id().update(item.clone());
    item
}

/******************************************************************************
 *                              IN-USE CHECKS                                 *
 ******************************************************************************/

/// True if any active deployed device references this row as its scanner
/// or its battery. At most one active device may reference a battery row;
/// deploy relies on this check inside its transaction.
pub fn referenced_by_active_device(ctx: &ReducerContext, inventory_id: u64) -> bool {
    ctx.db.deployed_device().iter().any(|d| {
        d.is_active
            && (d.device_inventory_id == inventory_id
                || d.battery_inventory_id == Some(inventory_id))
    })
}

/// True if a non-terminal charging session references this inventory row.
pub fn referenced_by_active_charging(ctx: &ReducerContext, inventory_id: u64) -> bool {
    ctx.db
        .battery_charging_session()
        .iter()
        .any(|s| s.status == ChargingStatus::Active && s.inventory_item_id == inventory_id)
}

/// Validates that a battery inventory row is free for exclusive use.
pub fn ensure_battery_unused(ctx: &ReducerContext, inventory_id: u64) -> GameResult<()> {
    if referenced_by_active_device(ctx, inventory_id) {
        return Err(GameError::Conflict(
            "battery is installed in a deployed device".to_string(),
        ));
    }
    if referenced_by_active_charging(ctx, inventory_id) {
        return Err(GameError::Conflict(
            "battery is in an active charging session".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_round_trip_preserves_other_keys() {
        let props = r#"{"charge_pct": 40, "uses_left": 3}"#;
        let updated = write_property(props, PROP_CHARGE_PCT, serde_json::json!(100));
        assert_eq!(read_f64_property(&updated, PROP_CHARGE_PCT), Some(100.0));
        assert_eq!(read_u32_property(&updated, PROP_USES_LEFT), Some(3));
    }

    #[test]
    fn write_property_recovers_from_malformed_blobs() {
        let updated = write_property("not json", PROP_USES_LEFT, serde_json::json!(5));
        assert_eq!(read_u32_property(&updated, PROP_USES_LEFT), Some(5));
        // Arrays are not objects; replaced rather than indexed into.
        let updated = write_property("[1,2]", PROP_USES_LEFT, serde_json::json!(2));
        assert_eq!(read_u32_property(&updated, PROP_USES_LEFT), Some(2));
    }

    #[test]
    fn missing_keys_read_as_none() {
        assert_eq!(read_f64_property("{}", PROP_CHARGE_PCT), None);
        assert_eq!(read_string_property("{}", PROP_MAX_RARITY), None);
        assert_eq!(read_property("", PROP_CHARGE_PCT), None);
    }

    #[test]
    fn string_properties_survive_the_round_trip() {
        let props = write_property("{}", PROP_COLLECT_MAX_RARITY, serde_json::json!("epic"));
        assert_eq!(
            read_string_property(&props, PROP_COLLECT_MAX_RARITY),
            Some("epic".to_string())
        );
    }
}
