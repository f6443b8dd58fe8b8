/******************************************************************************
 *                                                                            *
 * Artifacts: collectable items bound to a zone. Rows are written once by    *
 * the zone spawner and deactivated exactly once, either by collection or    *
 * by the cleanup sweep; a deactivated row is never re-activated.            *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{ReducerContext, Table, Timestamp};

use crate::artifact::artifact as ArtifactTableTrait;
use crate::models::{Biome, Rarity};

#[spacetimedb::table(name = artifact, public)]
#[derive(Clone, Debug)]
pub struct Artifact {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    #[index(btree)]
    pub zone_id: u64,
    pub name: String,
    pub artifact_type: String,
    pub rarity: Rarity,
    pub biome: Biome,
    pub lat: f64,
    pub lng: f64,
    /// Collectable. Cleared on collection or zone cleanup, never re-set.
    pub is_active: bool,
    pub is_claimed: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Active, unclaimed artifacts of one zone.
pub fn active_artifacts_in_zone(ctx: &ReducerContext, zone_id: u64) -> Vec<Artifact> {
    ctx.db
        .artifact()
        .zone_id()
        .filter(zone_id)
        .filter(|a| a.is_active && !a.is_claimed)
        .collect()
}

/// Marks an artifact as collected inside the caller's transaction.
pub fn claim_artifact(ctx: &ReducerContext, mut artifact: Artifact) -> Artifact {
    artifact.is_active = false;
    artifact.is_claimed = true;
    artifact.updated_at = ctx.timestamp;
    ctx.db.artifact().id().update(artifact.clone());
    artifact
}
