/******************************************************************************
 *                                                                            *
 * Charging: the destruction roll that starts a charge, the charging        *
 * session rows whose progress the scheduler advances, and insurance        *
 * claims for insured batteries that did not survive. The whole charge     *
 * attempt runs in one transaction: the roll, the durability bookkeeping,   *
 * the session insert, and (on destruction) the claim all commit together.  *
 *                                                                            *
 ******************************************************************************/

use rand::Rng;
use spacetimedb::{Identity, ReducerContext, Table, TimeDuration, Timestamp};

use crate::battery::{
    self, battery_instance as BatteryInstanceTableTrait, battery_type as BatteryTypeTableTrait,
    insurance_claim as InsuranceClaimTableTrait, InsuranceClaim,
};
use crate::charging::battery_charging_session as BatteryChargingSessionTableTrait;
use crate::errors::{GameError, GameResult};
use crate::inventory::{self, inventory_item as InventoryItemTableTrait};
use crate::models::{ChargingStatus, ClaimStatus};

#[spacetimedb::table(name = battery_charging_session, public)]
#[derive(Clone, Debug)]
pub struct BatteryChargingSession {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    #[index(btree)]
    pub battery_instance_id: u64,
    /// The inventory row that receives `charge_pct = 100` on completion.
    pub inventory_item_id: u64,
    pub user_id: Identity,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    /// 0..100, recomputed every scheduler tick.
    pub progress: f64,
    pub status: ChargingStatus,
}

/// Linear charging progress, clamped into [0, 100]. A degenerate window
/// (end <= start) counts as complete.
pub fn charging_progress(start_micros: i64, end_micros: i64, now_micros: i64) -> f64 {
    if end_micros <= start_micros {
        return 100.0;
    }
    let fraction = (now_micros - start_micros) as f64 / (end_micros - start_micros) as f64;
    (fraction * 100.0).clamp(0.0, 100.0)
}

/******************************************************************************
 *                                REDUCERS                                    *
 ******************************************************************************/

/// --- Process Charging ---
/// One charge attempt on an owned battery. Rolls the destruction die
/// first; survivors lose durability, gain a charge count, and open a
/// charging session that the scheduler completes.
#[spacetimedb::reducer]
pub fn process_charging(ctx: &ReducerContext, battery_instance_id: u64) -> Result<(), String> {
    process_charging_inner(ctx, battery_instance_id).map_err(String::from)
}

fn process_charging_inner(ctx: &ReducerContext, battery_instance_id: u64) -> GameResult<()> {
    let instances = ctx.db.battery_instance();
    let mut instance = battery::get_owned_instance(ctx, ctx.sender, battery_instance_id)?;

    if instance.is_destroyed {
        return Err(GameError::Conflict("battery is already destroyed".to_string()));
    }
    if instance.current_durability_pct <= 0.0 {
        return Err(GameError::InsufficientCharge(
            "battery durability is exhausted".to_string(),
        ));
    }

    let battery_type = ctx
        .db
        .battery_type()
        .id()
        .find(instance.battery_type_id)
        .ok_or_else(|| GameError::Internal("battery type missing from catalog".to_string()))?;

    // The physical battery must be in the player's hands, not in a device
    // or another charger.
    let inventory_row = battery::find_battery_inventory_row(ctx, &instance)
        .ok_or_else(|| GameError::NotFound("battery inventory row not found".to_string()))?;
    if inventory_row.is_deleted {
        return Err(GameError::Conflict(
            "battery is installed in a device".to_string(),
        ));
    }
    inventory::ensure_battery_unused(ctx, inventory_row.id)?;

    // Risk as it stood before the attempt; published win or lose.
    let risk = battery::charging_risk_pct(instance.current_durability_pct, instance.charging_count);
    let roll: f64 = ctx.rng().gen_range(0.0..100.0);

    if roll < risk {
        // The battery burns out on the charger.
        instance.is_destroyed = true;
        instance.updated_at = ctx.timestamp;
        instances.id().update(instance.clone());
        inventory::soft_delete_item(ctx, inventory_row);

        if instance.is_insured {
            let payout = battery::insurance_payout(instance.purchase_price);
            ctx.db.insurance_claim().insert(InsuranceClaim {
                id: 0, // auto_inc
                user_id: instance.user_id,
                battery_instance_id: instance.id,
                claim_amount_credits: payout,
                claim_status: ClaimStatus::Approved,
                created_at: ctx.timestamp,
            });
            log::info!(
                "[Charging] Battery {} destroyed while charging (risk {:.1}%); insurance claim for {} credits approved",
                instance.id,
                risk,
                payout
            );
        } else {
            log::info!(
                "[Charging] Battery {} destroyed while charging (risk {:.1}%); uninsured",
                instance.id,
                risk
            );
        }

        battery::publish_risk_quote(ctx, &instance, &battery_type);
        return Ok(());
    }

    // Survived: wear, count, and the charging window.
    instance.current_durability_pct =
        (instance.current_durability_pct - battery_type.durability_loss_pct).max(0.0);
    instance.charging_count += 1;
    instance.last_charged_at = Some(ctx.timestamp);
    instance.updated_at = ctx.timestamp;
    instances.id().update(instance.clone());

    let end_time = ctx.timestamp
        + TimeDuration::from_micros(battery_type.charge_time_mins as i64 * 60 * 1_000_000);
    ctx.db.battery_charging_session().insert(BatteryChargingSession {
        id: 0, // auto_inc
        battery_instance_id: instance.id,
        inventory_item_id: inventory_row.id,
        user_id: instance.user_id,
        start_time: ctx.timestamp,
        end_time,
        progress: 0.0,
        status: ChargingStatus::Active,
    });

    battery::publish_risk_quote(ctx, &instance, &battery_type);
    log::info!(
        "[Charging] Battery {} survived the roll ({:.1}% < {:.1}% risk was not hit); durability now {:.0}%, session ends in {} min",
        instance.id,
        roll,
        risk,
        instance.current_durability_pct,
        battery_type.charge_time_mins
    );
    Ok(())
}

/// --- Cancel Charging ---
/// Stops an active session. The battery keeps whatever charge it had; no
/// durability is refunded.
#[spacetimedb::reducer]
pub fn cancel_charging(ctx: &ReducerContext, session_id: u64) -> Result<(), String> {
    cancel_charging_inner(ctx, session_id).map_err(String::from)
}

fn cancel_charging_inner(ctx: &ReducerContext, session_id: u64) -> GameResult<()> {
    let sessions = ctx.db.battery_charging_session();
    let mut session = sessions
        .id()
        .find(session_id)
        .ok_or_else(|| GameError::NotFound(format!("charging session {} not found", session_id)))?;
    if session.user_id != ctx.sender {
        return Err(GameError::Forbidden("not your charging session".to_string()));
    }
    if session.status != ChargingStatus::Active {
        return Err(GameError::Conflict("charging session already settled".to_string()));
    }

    session.status = ChargingStatus::Cancelled;
    session.progress = charging_progress(
        session.start_time.to_micros_since_unix_epoch(),
        session.end_time.to_micros_since_unix_epoch(),
        ctx.timestamp.to_micros_since_unix_epoch(),
    );
    sessions.id().update(session);
    log::info!("[Charging] Player {:?} cancelled session {}", ctx.sender, session_id);
    Ok(())
}

/******************************************************************************
 *                           SCHEDULER PHASE                                  *
 ******************************************************************************/

/// Recomputes progress on every active session and completes the ones
/// whose window has closed, setting the linked inventory battery to full
/// charge.
pub fn advance_charging_sessions(ctx: &ReducerContext) -> Result<(), String> {
    let sessions = ctx.db.battery_charging_session();
    let now = ctx.timestamp;
    let now_micros = now.to_micros_since_unix_epoch();

    let active: Vec<BatteryChargingSession> = sessions
        .iter()
        .filter(|s| s.status == ChargingStatus::Active)
        .collect();

    let mut completed = 0;
    for mut session in active {
        session.progress = charging_progress(
            session.start_time.to_micros_since_unix_epoch(),
            session.end_time.to_micros_since_unix_epoch(),
            now_micros,
        );
        if session.end_time <= now {
            session.status = ChargingStatus::Completed;
            session.progress = 100.0;
            if let Some(row) = ctx.db.inventory_item().id().find(session.inventory_item_id) {
                inventory::set_item_property(
                    ctx,
                    row,
                    inventory::PROP_CHARGE_PCT,
                    serde_json::json!(100.0),
                );
            } else {
                log::warn!(
                    "[Charging] Session {} references missing inventory row {}",
                    session.id,
                    session.inventory_item_id
                );
            }
            completed += 1;
        }
        sessions.id().update(session);
    }

    if completed > 0 {
        log::info!("[Charging] {} charging sessions completed", completed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN_MICROS: i64 = 60 * 1_000_000;

    #[test]
    fn progress_is_linear_between_start_and_end() {
        let start = 0;
        let end = 100 * MIN_MICROS;
        assert_eq!(charging_progress(start, end, 0), 0.0);
        assert_eq!(charging_progress(start, end, 50 * MIN_MICROS), 50.0);
        assert_eq!(charging_progress(start, end, 100 * MIN_MICROS), 100.0);
    }

    #[test]
    fn progress_clamps_outside_the_window() {
        let start = 10 * MIN_MICROS;
        let end = 20 * MIN_MICROS;
        assert_eq!(charging_progress(start, end, 0), 0.0);
        assert_eq!(charging_progress(start, end, 30 * MIN_MICROS), 100.0);
    }

    #[test]
    fn degenerate_window_reads_complete() {
        assert_eq!(charging_progress(10, 10, 0), 100.0);
        assert_eq!(charging_progress(20, 10, 15), 100.0);
    }
}
