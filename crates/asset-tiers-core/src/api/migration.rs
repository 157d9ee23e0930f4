//! Migration of the local inventory to the remote tier.

use crate::error::Result;
use crate::migration::MigrationPlan;
use crate::models::{
    MigrationProgress, MigrationResult, ReadinessReport, RollbackResult, VerificationReport,
};
use crate::AssetDelivery;
use std::sync::Arc;

impl AssetDelivery {
    /// Check that a migration can start.
    pub async fn migration_readiness(&self) -> ReadinessReport {
        self.pipeline.validate_readiness().await
    }

    /// Build (or return the already built) migration plan without running it.
    pub async fn plan_migration(&self) -> Result<Arc<MigrationPlan>> {
        self.pipeline.build_plan().await
    }

    /// Validate readiness, then run every phase in order.
    ///
    /// Never fails; a run that cannot start reports its reasons as errors.
    pub async fn migrate_all(&self) -> MigrationResult {
        self.pipeline.migrate_all().await
    }

    /// Rebuild migration state from the local inventory and one remote
    /// listing. Returns the number of assets found already migrated.
    pub async fn reconcile_migration_state(&self) -> Result<usize> {
        self.pipeline.reconcile_with_remote().await
    }

    pub async fn verify_migration(&self) -> VerificationReport {
        self.pipeline.verify_migration().await
    }

    /// Reset migrated assets to local. Remote objects are kept.
    pub async fn rollback_migration(&self) -> RollbackResult {
        self.pipeline.execute_rollback().await
    }

    pub fn migration_progress(&self) -> MigrationProgress {
        self.pipeline.get_migration_progress()
    }

    /// Stop the running migration after its current item.
    pub fn cancel_migration(&self) {
        self.pipeline.cancel();
    }
}
