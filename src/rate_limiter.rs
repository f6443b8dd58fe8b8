/******************************************************************************
 *                                                                            *
 * Per-user, per-operation cooldowns backed by a table so they survive        *
 * reconnects and apply across every handler replica. The check and the      *
 * stamp happen inside the caller's transaction, so two racing requests      *
 * serialize and the loser observes the winner's stamp.                      *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{Identity, ReducerContext, Table, TimeDuration, Timestamp};

use crate::errors::{GameError, GameResult};
use crate::rate_limiter::operation_cooldown as OperationCooldownTableTrait;

/// Rate-limited operations. Device scans additionally carry a per-device
/// cooldown in `ScanCooldown`; this table is purely per-user.
#[derive(Clone, Copy, Debug, PartialEq, spacetimedb::SpacetimeType)]
pub enum OperationKind {
    AreaScan,
    DeviceScan,
}

#[spacetimedb::table(name = operation_cooldown)]
#[derive(Clone, Debug)]
pub struct OperationCooldown {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    #[index(btree)]
    pub user_id: Identity,
    pub operation: OperationKind,
    pub next_allowed_at: Timestamp,
}

/// Whole seconds remaining until `until`, rounded up so a client that waits
/// the reported time is always clear of the cooldown.
pub fn remaining_secs(now_micros: i64, until_micros: i64) -> u64 {
    let remaining = until_micros.saturating_sub(now_micros);
    if remaining <= 0 {
        0
    } else {
        ((remaining + 999_999) / 1_000_000) as u64
    }
}

/// Rejects with `cooldown` if the operation is still cooling down for this
/// user; otherwise stamps `now + duration` and lets the caller proceed.
pub fn check_and_stamp(
    ctx: &ReducerContext,
    user_id: Identity,
    operation: OperationKind,
    duration_secs: u32,
) -> GameResult<Timestamp> {
    let cooldowns = ctx.db.operation_cooldown();
    let now = ctx.timestamp;
    let next_allowed = now + TimeDuration::from_micros(duration_secs as i64 * 1_000_000);

    let existing = cooldowns
        .user_id()
        .filter(user_id)
        .find(|row| row.operation == operation);

    match existing {
        Some(row) if row.next_allowed_at > now => Err(GameError::Cooldown {
            remaining_secs: remaining_secs(
                now.to_micros_since_unix_epoch(),
                row.next_allowed_at.to_micros_since_unix_epoch(),
            ),
        }),
        Some(mut row) => {
            row.next_allowed_at = next_allowed;
            cooldowns.id().update(row);
            Ok(next_allowed)
        }
        None => {
            cooldowns.insert(OperationCooldown {
                id: 0, // auto_inc
                user_id,
                operation,
                next_allowed_at: next_allowed,
            });
            Ok(next_allowed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_secs_rounds_up_to_whole_seconds() {
        assert_eq!(remaining_secs(0, 0), 0);
        assert_eq!(remaining_secs(10_000_000, 9_000_000), 0);
        assert_eq!(remaining_secs(0, 1), 1);
        assert_eq!(remaining_secs(0, 1_000_000), 1);
        assert_eq!(remaining_secs(0, 1_000_001), 2);
        assert_eq!(remaining_secs(5_000_000, 35_500_000), 31);
    }
}
