/******************************************************************************
 *                                                                            *
 * The battery economy: the type catalog, per-battery instances with         *
 * durability, the destruction risk model, insurance, and selling. The      *
 * probabilistic pieces are pure functions over plain numbers so the risk   *
 * curve is testable without a module host.                                  *
 *                                                                            *
 ******************************************************************************/

use lazy_static::lazy_static;
use spacetimedb::{Identity, ReducerContext, Table, Timestamp};

use crate::battery::battery_instance as BatteryInstanceTableTrait;
use crate::battery::battery_risk_quote as BatteryRiskQuoteTableTrait;
use crate::battery::battery_type as BatteryTypeTableTrait;
use crate::battery::insurance_claim as InsuranceClaimTableTrait;
use crate::battery::market_price as MarketPriceTableTrait;
use crate::errors::{GameError, GameResult};
use crate::inventory::{self, inventory_item as InventoryItemTableTrait};
use crate::models::{ClaimStatus, GameItemType};
use crate::player as PlayerTableTrait;

// Risk model parameters.
pub const GUARANTEE_CHARGES: u32 = 2;
pub const BASE_RISK_PCT: f64 = 3.0;
pub const MAX_RISK_PCT: f64 = 50.0;
pub const INSURANCE_THRESHOLD_PCT: f64 = 50.0;
pub const INSURANCE_PAYOUT_FRACTION: f64 = 0.5;
pub const SELL_FALLBACK_FRACTION: f64 = 0.2;

#[spacetimedb::table(name = battery_type, public)]
#[derive(Clone, Debug)]
pub struct BatteryType {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub name: String,
    /// Nominal runtime of a full charge inside a deployed device.
    pub duration_hours: f64,
    /// Passive drain applied by the scheduler, percent per hour.
    pub drain_rate_per_hour: f64,
    /// Wall-clock minutes a charging session takes.
    pub charge_time_mins: u32,
    pub base_price: u32,
    pub insurance_rate_pct: u32,
    /// Durability lost per surviving charge attempt.
    pub durability_loss_pct: f64,
}

#[spacetimedb::table(name = battery_instance, public)]
#[derive(Clone, Debug)]
pub struct BatteryInstance {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    #[index(btree)]
    pub user_id: Identity,
    pub battery_type_id: u64,
    pub current_durability_pct: f64,
    pub charging_count: u32,
    pub is_insured: bool,
    pub is_destroyed: bool,
    pub purchase_price: u32,
    pub last_charged_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Market bid for used batteries: the best row with
/// `min_durability_pct <= durability` wins; no row means the flat
/// fallback fraction of the purchase price.
#[spacetimedb::table(name = market_price, public)]
#[derive(Clone, Debug)]
pub struct MarketPrice {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    #[index(btree)]
    pub battery_type_id: u64,
    pub min_durability_pct: f64,
    pub price: u32,
}

/// Immutable once created, apart from the status transition
/// pending → approved → paid | rejected. Charging destruction creates
/// claims directly in `approved`.
#[spacetimedb::table(name = insurance_claim, public)]
#[derive(Clone, Debug)]
pub struct InsuranceClaim {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    #[index(btree)]
    pub user_id: Identity,
    pub battery_instance_id: u64,
    pub claim_amount_credits: u32,
    pub claim_status: ClaimStatus,
    pub created_at: Timestamp,
}

/// Latest risk quote per user, refreshed by `battery_risk` and by every
/// charge attempt.
#[spacetimedb::table(name = battery_risk_quote, public)]
#[derive(Clone, Debug)]
pub struct BatteryRiskQuote {
    #[primary_key]
    pub user_id: Identity,
    pub battery_instance_id: u64,
    pub risk_pct: f64,
    pub insurable: bool,
    pub insurance_cost: u32,
    pub quoted_at: Timestamp,
}

// --- Battery Catalog ---

struct BatteryTypeSeed {
    name: &'static str,
    duration_hours: f64,
    drain_rate_per_hour: f64,
    charge_time_mins: u32,
    base_price: u32,
    insurance_rate_pct: u32,
    durability_loss_pct: f64,
}

lazy_static! {
    static ref BATTERY_CATALOG: Vec<BatteryTypeSeed> = vec![
        BatteryTypeSeed {
            name: "Compact Cell",
            duration_hours: 50.0,
            drain_rate_per_hour: 2.0,
            charge_time_mins: 30,
            base_price: 250,
            insurance_rate_pct: 12,
            durability_loss_pct: 12.0,
        },
        BatteryTypeSeed {
            name: "Standard Cell",
            duration_hours: 100.0,
            drain_rate_per_hour: 1.0,
            charge_time_mins: 60,
            base_price: 1_000,
            insurance_rate_pct: 10,
            durability_loss_pct: 10.0,
        },
        BatteryTypeSeed {
            name: "Long-Life Cell",
            duration_hours: 200.0,
            drain_rate_per_hour: 0.5,
            charge_time_mins: 120,
            base_price: 3_500,
            insurance_rate_pct: 8,
            durability_loss_pct: 6.0,
        },
    ];
}

/// Seeds the battery type catalog once. Idempotent by name.
pub fn seed_battery_types(ctx: &ReducerContext) -> Result<(), String> {
    let types = ctx.db.battery_type();
    if types.count() > 0 {
        log::debug!("Battery catalog already seeded.");
        return Ok(());
    }
    for seed in BATTERY_CATALOG.iter() {
        types.try_insert(BatteryType {
            id: 0, // auto_inc
            name: seed.name.to_string(),
            duration_hours: seed.duration_hours,
            drain_rate_per_hour: seed.drain_rate_per_hour,
            charge_time_mins: seed.charge_time_mins,
            base_price: seed.base_price,
            insurance_rate_pct: seed.insurance_rate_pct,
            durability_loss_pct: seed.durability_loss_pct,
        })?;
    }
    log::info!("Seeded {} battery types.", BATTERY_CATALOG.len());
    Ok(())
}

/******************************************************************************
 *                             RISK MODEL                                     *
 ******************************************************************************/

/// Destruction risk for the next charge attempt, in percent. The first
/// `GUARANTEE_CHARGES` attempts on a battery are riskless; afterwards the
/// base risk scales with missing durability and is capped.
pub fn charging_risk_pct(durability_pct: f64, charging_count: u32) -> f64 {
    if charging_count < GUARANTEE_CHARGES {
        return 0.0;
    }
    let scaled = BASE_RISK_PCT * (1.0 + (100.0 - durability_pct.clamp(0.0, 100.0)) / 100.0);
    scaled.min(MAX_RISK_PCT)
}

pub fn is_insurable(durability_pct: f64, is_insured: bool, is_destroyed: bool) -> bool {
    durability_pct > INSURANCE_THRESHOLD_PCT && !is_insured && !is_destroyed
}

pub fn insurance_cost(purchase_price: u32, insurance_rate_pct: u32) -> u32 {
    (purchase_price as f64 * insurance_rate_pct as f64 / 100.0).round() as u32
}

pub fn insurance_payout(purchase_price: u32) -> u32 {
    (purchase_price as f64 * INSURANCE_PAYOUT_FRACTION).round() as u32
}

/// Sale price: a matching market bid wins, otherwise the flat fallback.
pub fn sell_price(market_bid: Option<u32>, purchase_price: u32) -> u32 {
    match market_bid {
        Some(bid) => bid,
        None => (purchase_price as f64 * SELL_FALLBACK_FRACTION).round() as u32,
    }
}

/// Loads a battery instance owned by the caller.
pub fn get_owned_instance(
    ctx: &ReducerContext,
    user_id: Identity,
    battery_instance_id: u64,
) -> GameResult<BatteryInstance> {
    let instance = ctx
        .db
        .battery_instance()
        .id()
        .find(battery_instance_id)
        .ok_or_else(|| {
            GameError::NotFound(format!("battery {} not found", battery_instance_id))
        })?;
    if instance.user_id != user_id {
        return Err(GameError::Forbidden("you do not own this battery".to_string()));
    }
    Ok(instance)
}

/// The inventory row materializing a battery instance, if it still exists.
pub fn find_battery_inventory_row(
    ctx: &ReducerContext,
    instance: &BatteryInstance,
) -> Option<inventory::InventoryItem> {
    ctx.db
        .inventory_item()
        .user_id()
        .filter(instance.user_id)
        .find(|i| i.item_type == GameItemType::ScannerBattery && i.item_id == instance.id)
}

/// Best market bid for (type, durability).
fn market_bid(ctx: &ReducerContext, battery_type_id: u64, durability_pct: f64) -> Option<u32> {
    ctx.db
        .market_price()
        .battery_type_id()
        .filter(battery_type_id)
        .filter(|row| row.min_durability_pct <= durability_pct)
        .max_by(|a, b| {
            a.min_durability_pct
                .partial_cmp(&b.min_durability_pct)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|row| row.price)
}

pub fn publish_risk_quote(ctx: &ReducerContext, instance: &BatteryInstance, battery_type: &BatteryType) {
    let quotes = ctx.db.battery_risk_quote();
    let quote = BatteryRiskQuote {
        user_id: instance.user_id,
        battery_instance_id: instance.id,
        risk_pct: charging_risk_pct(instance.current_durability_pct, instance.charging_count),
        insurable: is_insurable(
            instance.current_durability_pct,
            instance.is_insured,
            instance.is_destroyed,
        ),
        insurance_cost: insurance_cost(instance.purchase_price, battery_type.insurance_rate_pct),
        quoted_at: ctx.timestamp,
    };
    if quotes.user_id().find(instance.user_id).is_some() {
        quotes.user_id().update(quote);
    } else {
        quotes.insert(quote);
    }
}

/******************************************************************************
 *                                REDUCERS                                    *
 ******************************************************************************/

/// --- Purchase Battery ---
/// Creates a pristine instance and its inventory row at full charge. The
/// currency ledger lives outside the core; the purchase price is recorded
/// for the insurance and resale math.
#[spacetimedb::reducer]
pub fn purchase_battery(ctx: &ReducerContext, battery_type_id: u64) -> Result<(), String> {
    purchase_battery_inner(ctx, battery_type_id).map_err(String::from)
}

fn purchase_battery_inner(ctx: &ReducerContext, battery_type_id: u64) -> GameResult<()> {
    ctx.db
        .player()
        .identity()
        .find(ctx.sender)
        .ok_or_else(|| GameError::NotFound("player not registered".to_string()))?;
    let battery_type = ctx
        .db
        .battery_type()
        .id()
        .find(battery_type_id)
        .ok_or_else(|| {
            GameError::NotFound(format!("battery type {} not found", battery_type_id))
        })?;

    let instance = ctx.db.battery_instance().insert(BatteryInstance {
        id: 0, // auto_inc
        user_id: ctx.sender,
        battery_type_id,
        current_durability_pct: 100.0,
        charging_count: 0,
        is_insured: false,
        is_destroyed: false,
        purchase_price: battery_type.base_price,
        last_charged_at: None,
        created_at: ctx.timestamp,
        updated_at: ctx.timestamp,
    });

    let properties = serde_json::to_string(&inventory::BatteryProperties {
        charge_pct: 100.0,
        battery_type: battery_type.name.clone(),
    })
    .unwrap_or_else(|_| "{}".to_string());
    inventory::add_inventory_item(
        ctx,
        ctx.sender,
        GameItemType::ScannerBattery,
        instance.id,
        battery_type.name.clone(),
        1,
        properties,
    );

    log::info!(
        "[PurchaseBattery] Player {:?} bought '{}' (instance {})",
        ctx.sender,
        battery_type.name,
        instance.id
    );
    Ok(())
}

/// --- Insure Battery ---
#[spacetimedb::reducer]
pub fn insure_battery(ctx: &ReducerContext, battery_instance_id: u64) -> Result<(), String> {
    insure_battery_inner(ctx, battery_instance_id).map_err(String::from)
}

fn insure_battery_inner(ctx: &ReducerContext, battery_instance_id: u64) -> GameResult<()> {
    let instances = ctx.db.battery_instance();
    let mut instance = get_owned_instance(ctx, ctx.sender, battery_instance_id)?;

    if instance.is_destroyed {
        return Err(GameError::Conflict("battery is already destroyed".to_string()));
    }
    if instance.is_insured {
        return Err(GameError::Conflict("battery is already insured".to_string()));
    }
    if instance.current_durability_pct <= INSURANCE_THRESHOLD_PCT {
        return Err(GameError::Forbidden(format!(
            "batteries at or below {:.0}% durability cannot be insured",
            INSURANCE_THRESHOLD_PCT
        )));
    }

    let battery_type = ctx
        .db
        .battery_type()
        .id()
        .find(instance.battery_type_id)
        .ok_or_else(|| GameError::Internal("battery type missing from catalog".to_string()))?;
    let cost = insurance_cost(instance.purchase_price, battery_type.insurance_rate_pct);

    instance.is_insured = true;
    instance.updated_at = ctx.timestamp;
    instances.id().update(instance.clone());
    publish_risk_quote(ctx, &instance, &battery_type);

    log::info!(
        "[InsureBattery] Player {:?} insured battery {} for {} credits",
        ctx.sender,
        battery_instance_id,
        cost
    );
    Ok(())
}

/// --- Sell Battery ---
/// Sale is the one flow that hard-deletes: the instance and its inventory
/// row both disappear.
#[spacetimedb::reducer]
pub fn sell_battery(ctx: &ReducerContext, battery_instance_id: u64) -> Result<(), String> {
    sell_battery_inner(ctx, battery_instance_id).map_err(String::from)
}

fn sell_battery_inner(ctx: &ReducerContext, battery_instance_id: u64) -> GameResult<()> {
    let instance = get_owned_instance(ctx, ctx.sender, battery_instance_id)?;
    if instance.is_destroyed {
        return Err(GameError::Conflict("battery is already destroyed".to_string()));
    }

    let inventory_row = find_battery_inventory_row(ctx, &instance);
    if let Some(ref row) = inventory_row {
        if row.is_deleted {
            return Err(GameError::Conflict(
                "battery is installed in a device".to_string(),
            ));
        }
        inventory::ensure_battery_unused(ctx, row.id)?;
    }

    let bid = market_bid(ctx, instance.battery_type_id, instance.current_durability_pct);
    let amount = sell_price(bid, instance.purchase_price);

    if let Some(row) = inventory_row {
        ctx.db.inventory_item().id().delete(row.id);
    }
    ctx.db.battery_instance().id().delete(instance.id);

    log::info!(
        "[SellBattery] Player {:?} sold battery {} for {} credits ({})",
        ctx.sender,
        battery_instance_id,
        amount,
        if bid.is_some() { "market bid" } else { "fallback price" }
    );
    Ok(())
}

/// --- Battery Risk ---
/// Publishes the current risk numbers for one owned battery.
#[spacetimedb::reducer]
pub fn battery_risk(ctx: &ReducerContext, battery_instance_id: u64) -> Result<(), String> {
    battery_risk_inner(ctx, battery_instance_id).map_err(String::from)
}

fn battery_risk_inner(ctx: &ReducerContext, battery_instance_id: u64) -> GameResult<()> {
    let instance = get_owned_instance(ctx, ctx.sender, battery_instance_id)?;
    let battery_type = ctx
        .db
        .battery_type()
        .id()
        .find(instance.battery_type_id)
        .ok_or_else(|| GameError::Internal("battery type missing from catalog".to_string()))?;
    publish_risk_quote(ctx, &instance, &battery_type);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_two_charges_are_riskless() {
        assert_eq!(charging_risk_pct(100.0, 0), 0.0);
        assert_eq!(charging_risk_pct(10.0, 1), 0.0);
        assert!(charging_risk_pct(100.0, 2) > 0.0);
    }

    #[test]
    fn risk_scales_with_missing_durability() {
        // Pristine battery: base risk only.
        assert!((charging_risk_pct(100.0, 5) - 3.0).abs() < 1e-9);
        // At 60% durability: 3% × 1.4.
        assert!((charging_risk_pct(60.0, 5) - 4.2).abs() < 1e-9);
        // Fully worn: 3% × 2.
        assert!((charging_risk_pct(0.0, 5) - 6.0).abs() < 1e-9);
    }

    #[test]
    fn risk_is_capped_and_inputs_are_clamped() {
        assert!(charging_risk_pct(-500.0, 5) <= MAX_RISK_PCT);
        assert!((charging_risk_pct(-500.0, 5) - 6.0).abs() < 1e-9);
        assert!((charging_risk_pct(200.0, 5) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn insurability_needs_health_and_no_prior_policy() {
        assert!(is_insurable(51.0, false, false));
        assert!(!is_insurable(50.0, false, false));
        assert!(!is_insurable(90.0, true, false));
        assert!(!is_insurable(90.0, false, true));
    }

    #[test]
    fn insurance_math_rounds_to_whole_credits() {
        assert_eq!(insurance_cost(1_000, 10), 100);
        assert_eq!(insurance_cost(333, 10), 33);
        assert_eq!(insurance_cost(335, 10), 34);
        assert_eq!(insurance_payout(1_000), 500);
        assert_eq!(insurance_payout(333), 167);
    }

    #[test]
    fn sell_price_prefers_the_market_bid() {
        assert_eq!(sell_price(Some(720), 1_000), 720);
        assert_eq!(sell_price(Some(0), 1_000), 0);
        assert_eq!(sell_price(None, 1_000), 200);
        assert_eq!(sell_price(None, 333), 67);
    }
}
