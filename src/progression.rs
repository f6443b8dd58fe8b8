/******************************************************************************
 *                                                                            *
 * XP and tier progression. The core treats this as a single pure function    *
 * over (xp, tier); the thresholds live here and nowhere else.                *
 *                                                                            *
 ******************************************************************************/

use crate::models::Rarity;

pub const MAX_TIER: u32 = 4;

/// Cumulative XP required to reach each tier.
const TIER_THRESHOLDS: [u64; 5] = [0, 100, 300, 900, 2_000];

/// XP awarded for collecting an artifact of the given rarity. Gear awards
/// no XP.
pub fn xp_for_artifact(rarity: Rarity) -> u64 {
    match rarity {
        Rarity::Common => 10,
        Rarity::Rare => 25,
        Rarity::Epic => 60,
        Rarity::Legendary => 150,
    }
}

/// Tier implied by a total XP amount.
pub fn tier_for_xp(xp: u64) -> u32 {
    let mut tier = 0;
    for (idx, threshold) in TIER_THRESHOLDS.iter().enumerate() {
        if xp >= *threshold {
            tier = idx as u32;
        }
    }
    tier.min(MAX_TIER)
}

/// Applies an XP award and returns (new_xp, new_tier). Tier never drops.
pub fn apply_xp(current_xp: u64, current_tier: u32, award: u64) -> (u64, u32) {
    let new_xp = current_xp.saturating_add(award);
    let new_tier = tier_for_xp(new_xp).max(current_tier).min(MAX_TIER);
    (new_xp, new_tier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_thresholds_are_honored() {
        assert_eq!(tier_for_xp(0), 0);
        assert_eq!(tier_for_xp(99), 0);
        assert_eq!(tier_for_xp(100), 1);
        assert_eq!(tier_for_xp(300), 2);
        assert_eq!(tier_for_xp(899), 2);
        assert_eq!(tier_for_xp(900), 3);
        assert_eq!(tier_for_xp(2_000), 4);
        assert_eq!(tier_for_xp(u64::MAX), 4);
    }

    #[test]
    fn xp_award_can_cross_a_threshold() {
        let (xp, tier) = apply_xp(90, 0, xp_for_artifact(Rarity::Rare));
        assert_eq!(xp, 115);
        assert_eq!(tier, 1);
    }

    #[test]
    fn tier_never_drops_even_if_xp_says_otherwise() {
        // An admin-granted tier stays put regardless of raw XP.
        let (_, tier) = apply_xp(0, 3, 1);
        assert_eq!(tier, 3);
    }

    #[test]
    fn rarer_artifacts_award_more_xp() {
        assert!(xp_for_artifact(Rarity::Common) < xp_for_artifact(Rarity::Rare));
        assert!(xp_for_artifact(Rarity::Rare) < xp_for_artifact(Rarity::Epic));
        assert!(xp_for_artifact(Rarity::Epic) < xp_for_artifact(Rarity::Legendary));
    }
}
