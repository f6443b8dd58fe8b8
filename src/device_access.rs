/******************************************************************************
 *                                                                            *
 * Access grants allowing non-owners to scan through a deployed device.      *
 * Grants are created by successful hacks; a claim wipes every grant on      *
 * the device. The permission predicate is pure so the rule is testable     *
 * in isolation.                                                             *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{Identity, ReducerContext, Table, Timestamp};

use crate::device_access::device_access as DeviceAccessTableTrait;
use crate::models::AccessLevel;

#[spacetimedb::table(name = device_access, public)]
#[derive(Clone, Debug)]
pub struct DeviceAccess {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    #[index(btree)]
    pub device_id: u64,
    pub user_id: Identity,
    pub access_level: AccessLevel,
    pub granted_at: Timestamp,
    /// Only meaningful for temporary grants.
    pub expires_at: Option<Timestamp>,
    /// A hack side effect may disable the device for this grant holder.
    pub is_device_disabled: bool,
    pub disabled_until: Option<Timestamp>,
}

/// Scan permission rule: owner and permanent grants always pass; temporary
/// grants pass while unexpired and not currently disabled.
pub fn scan_permitted(
    access_level: AccessLevel,
    expires_at_micros: Option<i64>,
    is_device_disabled: bool,
    disabled_until_micros: Option<i64>,
    now_micros: i64,
) -> bool {
    match access_level {
        AccessLevel::Owner | AccessLevel::Permanent => true,
        AccessLevel::Temporary => {
            let unexpired = expires_at_micros.map(|e| e > now_micros).unwrap_or(false);
            let not_disabled = !is_device_disabled
                || disabled_until_micros.map(|d| d <= now_micros).unwrap_or(true);
            unexpired && not_disabled
        }
    }
}

/// The caller's grant on a device, if any.
pub fn find_access(
    ctx: &ReducerContext,
    device_id: u64,
    user_id: Identity,
) -> Option<DeviceAccess> {
    ctx.db
        .device_access()
        .device_id()
        .filter(device_id)
        .find(|a| a.user_id == user_id)
}

/// True if the caller holds a grant that currently permits scanning.
pub fn has_valid_access(ctx: &ReducerContext, device_id: u64, user_id: Identity) -> bool {
    let now = ctx.timestamp.to_micros_since_unix_epoch();
    find_access(ctx, device_id, user_id)
        .map(|a| {
            scan_permitted(
                a.access_level,
                a.expires_at.map(|t| t.to_micros_since_unix_epoch()),
                a.is_device_disabled,
                a.disabled_until.map(|t| t.to_micros_since_unix_epoch()),
                now,
            )
        })
        .unwrap_or(false)
}

/// Deletes every grant on a device. Used by claims and device deletion.
pub fn revoke_all_access(ctx: &ReducerContext, device_id: u64) -> usize {
    let access = ctx.db.device_access();
    let grants: Vec<_> = access.device_id().filter(device_id).collect();
    let count = grants.len();
    for grant in grants {
        access.id().delete(grant.id);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MICROS: i64 = 3600 * 1_000_000;

    #[test]
    fn owner_and_permanent_always_pass() {
        assert!(scan_permitted(AccessLevel::Owner, None, false, None, 0));
        assert!(scan_permitted(AccessLevel::Permanent, None, true, Some(HOUR_MICROS), 0));
    }

    #[test]
    fn temporary_requires_an_unexpired_grant() {
        let now = 10 * HOUR_MICROS;
        assert!(scan_permitted(AccessLevel::Temporary, Some(now + 1), false, None, now));
        assert!(!scan_permitted(AccessLevel::Temporary, Some(now), false, None, now));
        assert!(!scan_permitted(AccessLevel::Temporary, None, false, None, now));
    }

    #[test]
    fn disabled_temporary_grant_waits_out_the_disable_window() {
        let now = 10 * HOUR_MICROS;
        let expires = now + 24 * HOUR_MICROS;
        // Disabled until one hour from now: blocked.
        assert!(!scan_permitted(
            AccessLevel::Temporary,
            Some(expires),
            true,
            Some(now + HOUR_MICROS),
            now
        ));
        // Disable window already over: allowed again.
        assert!(scan_permitted(
            AccessLevel::Temporary,
            Some(expires),
            true,
            Some(now),
            now
        ));
        // Disabled flag with no window behaves as cleared.
        assert!(scan_permitted(
            AccessLevel::Temporary,
            Some(expires),
            true,
            None,
            now
        ));
    }
}
