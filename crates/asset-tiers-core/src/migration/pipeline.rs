//! Phased migration of local assets to the remote tier.

use super::plan::MigrationPlan;
use super::registry::AssetRegistry;
use crate::config::MigrationConfig;
use crate::error::{AssetError, Result};
use crate::local::InventoryScan;
use crate::models::{
    HealthStatus, ItemError, MigrationProgress, MigrationResult, MigrationState, PhaseResult,
    ReadinessReport, RollbackResult, VerificationReport, REMOTE_KEY_PREFIX,
};
use crate::remote::{with_retries, DynObjectStore};
use crate::retrieval::AssetRetrievalService;
use crate::telemetry;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happened to one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Migrated,
    /// Already remote, or an identical object already existed.
    Skipped,
}

#[derive(Debug, Default)]
struct RunState {
    active_phase: Option<usize>,
}

/// Moves assets from the local tier to the remote tier, one at a time,
/// phase by phase.
pub struct MigrationPipeline {
    service: AssetRetrievalService,
    registry: Arc<AssetRegistry>,
    config: MigrationConfig,
    plan: RwLock<Option<Arc<MigrationPlan>>>,
    run: Mutex<RunState>,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    cancel: CancellationToken,
}

impl MigrationPipeline {
    pub fn new(
        service: AssetRetrievalService,
        registry: Arc<AssetRegistry>,
        config: MigrationConfig,
    ) -> Self {
        let per_second = NonZeroU32::new(config.max_uploads_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            service,
            registry,
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
            config,
            plan: RwLock::new(None),
            run: Mutex::new(RunState::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<AssetRegistry> {
        &self.registry
    }

    /// Stop migrating after the current item. Cancellation is permanent for
    /// this pipeline; remaining items are reported as failed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn remote(&self) -> Result<&DynObjectStore> {
        self.service
            .remote()
            .ok_or_else(|| AssetError::config("remote tier is disabled"))
    }

    fn set_active_phase(&self, phase: Option<usize>) {
        self.run.lock().unwrap_or_else(|e| e.into_inner()).active_phase = phase;
    }

    /// Scan the local root and merge the result into the registry.
    pub async fn refresh_inventory(&self) -> Result<InventoryScan> {
        let scan = self.service.local().scan_inventory().await?;
        let conflicts = self.registry.merge_inventory(scan.assets.clone());
        for conflict in &conflicts {
            warn!(error = %conflict, "Asset not registered");
        }
        Ok(scan)
    }

    /// The current plan, if one has been built.
    pub fn plan(&self) -> Option<Arc<MigrationPlan>> {
        self.plan.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Build the plan from the registry unless one already exists.
    pub async fn build_plan(&self) -> Result<Arc<MigrationPlan>> {
        if let Some(plan) = self.plan() {
            return Ok(plan);
        }
        self.rebuild_plan().await
    }

    /// Rescan the inventory and replace the plan.
    pub async fn rebuild_plan(&self) -> Result<Arc<MigrationPlan>> {
        self.refresh_inventory().await?;
        let plan = Arc::new(MigrationPlan::build(
            &self.registry.all(),
            self.config.pilot_phase_size,
        )?);
        info!(
            phases = plan.len(),
            assets = plan.total_assets(),
            "Built migration plan"
        );
        *self.plan.write().unwrap_or_else(|e| e.into_inner()) = Some(plan.clone());
        Ok(plan)
    }

    /// Check that a migration can start. Never fails; problems are reported
    /// as reasons.
    pub async fn validate_readiness(&self) -> ReadinessReport {
        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        let remote_status = match self.service.remote() {
            Some(remote) => {
                let health = self.service.remote_health(remote).await;
                match health.status {
                    HealthStatus::Unhealthy => reasons.push(format!(
                        "remote tier is unhealthy: {}",
                        health.message.as_deref().unwrap_or("no details")
                    )),
                    HealthStatus::Degraded => warnings.push(format!(
                        "remote tier is degraded ({} ms)",
                        health.latency_ms
                    )),
                    HealthStatus::Healthy => {}
                }
                Some(health.status)
            }
            None => {
                reasons.push("remote tier is disabled".to_string());
                None
            }
        };

        let scanned = match self.refresh_inventory().await {
            Ok(scan) => {
                if !scan.rejected.is_empty() {
                    warnings.push(format!(
                        "{} files were rejected by validation",
                        scan.rejected.len()
                    ));
                }
                Some(scan.assets.len())
            }
            Err(e) => {
                reasons.push(format!("local inventory unreadable: {}", e));
                None
            }
        };
        if scanned == Some(0) {
            reasons.push("local inventory is empty".to_string());
        }
        let inventory_count = scanned.unwrap_or(0);

        ReadinessReport {
            ready: reasons.is_empty(),
            reasons,
            warnings,
            remote_status,
            inventory_count,
        }
    }

    /// Migrate one asset: read local bytes, upload, mark remote.
    pub async fn migrate_single_asset(&self, key: &str) -> Result<ItemOutcome> {
        let asset = self
            .registry
            .get(key)
            .ok_or_else(|| AssetError::MigrationItem {
                key: key.to_string(),
                message: "asset is not registered".into(),
            })?;
        let remote = self.remote()?;

        match asset.migration_state {
            MigrationState::Remote => return Ok(ItemOutcome::Skipped),
            MigrationState::Local => {}
            MigrationState::Migrating | MigrationState::Error => {
                // Left over from an interrupted or failed run.
                self.registry.rollback(key)?;
            }
        }

        if let Ok(existing) = remote.list(key, 1).await {
            if existing
                .iter()
                .any(|object| object.key == key && object.size == asset.size)
            {
                self.registry.begin_migration(key)?;
                self.registry.complete_migration(key, remote.public_url(key))?;
                debug!(key, "Identical remote object exists, skipping upload");
                return Ok(ItemOutcome::Skipped);
            }
        }

        self.registry.begin_migration(key)?;
        match self.upload(remote, key, &asset.local_path).await {
            Ok(url) => {
                self.registry.complete_migration(key, url)?;
                Ok(ItemOutcome::Migrated)
            }
            Err(e) => {
                self.registry.fail_migration(key)?;
                Err(AssetError::MigrationItem {
                    key: key.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    async fn upload(
        &self,
        remote: &DynObjectStore,
        key: &str,
        local_path: &std::path::Path,
    ) -> Result<String> {
        let bytes = self.service.local().read_path(local_path).await?;
        let content_type = crate::models::content_type_for(key);
        let timeout = self.service.options().tier_timeout;

        let retried = with_retries(&self.config.retry, key, || {
            let bytes = bytes.clone();
            async move {
                self.limiter.until_ready().await;
                match tokio::time::timeout(timeout, remote.put(key, bytes, content_type)).await {
                    Ok(result) => result,
                    Err(_) => Err(AssetError::Timeout {
                        tier: crate::models::Tier::Remote,
                        duration: timeout,
                    }),
                }
            }
        })
        .await;

        if retried.attempts > 1 && retried.result.is_ok() {
            debug!(key, attempts = retried.attempts, "Upload needed retries");
        }
        retried.result
    }

    /// Run one phase. Item failures are recorded, never fatal.
    pub async fn execute_phase(&self, index: usize) -> Result<PhaseResult> {
        let plan = self
            .plan()
            .ok_or_else(|| AssetError::config("no migration plan has been built"))?;
        let phase = plan.phase(index).ok_or_else(|| AssetError::Validation {
            field: "phase".into(),
            message: format!("phase {} does not exist (plan has {})", index, plan.len()),
        })?;

        let started = Instant::now();
        self.set_active_phase(Some(index));
        info!(phase = %phase.name, assets = phase.len(), "Starting migration phase");

        let mut result = PhaseResult {
            phase: phase.name.clone(),
            ..Default::default()
        };
        for key in &phase.asset_keys {
            if self.cancel.is_cancelled() {
                result
                    .errors
                    .push(ItemError::new(key.clone(), "migration cancelled"));
                result.failed += 1;
                continue;
            }
            match self.migrate_single_asset(key).await {
                Ok(ItemOutcome::Migrated) => {
                    result.migrated += 1;
                    telemetry::record_migration_item("migrated");
                }
                Ok(ItemOutcome::Skipped) => {
                    result.skipped += 1;
                    telemetry::record_migration_item("skipped");
                }
                Err(e) => {
                    warn!(phase = %phase.name, key = %key, error = %e, "Asset migration failed");
                    result.failed += 1;
                    result.errors.push(ItemError::new(key.clone(), e.to_string()));
                    telemetry::record_migration_item("failed");
                }
            }
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            phase = %phase.name,
            migrated = result.migrated,
            skipped = result.skipped,
            failed = result.failed,
            elapsed_ms = result.duration_ms,
            "Migration phase finished"
        );
        Ok(result)
    }

    /// Run every phase in order, pausing between phases.
    pub async fn execute_all_phases(&self) -> Result<MigrationResult> {
        let plan = self
            .plan()
            .ok_or_else(|| AssetError::config("no migration plan has been built"))?;
        let started = Instant::now();
        let mut phases = Vec::with_capacity(plan.len());

        for index in 0..plan.len() {
            phases.push(self.execute_phase(index).await?);

            let last = index + 1 == plan.len();
            if !last && !self.config.inter_phase_delay.is_zero() {
                info!(
                    delay_ms = self.config.inter_phase_delay.as_millis() as u64,
                    "Pausing between phases"
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => warn!("Migration cancelled between phases"),
                    _ = tokio::time::sleep(self.config.inter_phase_delay) => {}
                }
            }
        }
        self.set_active_phase(None);

        let result = MigrationResult::from_phases(phases, started.elapsed().as_millis() as u64);
        if result.success {
            info!(
                migrated = result.total_migrated,
                skipped = result.total_skipped,
                "Migration complete"
            );
        } else {
            error!(failed = result.total_failed, "Migration finished with failures");
        }
        Ok(result)
    }

    /// Readiness check, plan, then every phase.
    pub async fn migrate_all(&self) -> MigrationResult {
        let readiness = self.validate_readiness().await;
        if !readiness.ready {
            return MigrationResult {
                success: false,
                errors: readiness
                    .reasons
                    .into_iter()
                    .map(|reason| ItemError::new("readiness", reason))
                    .collect(),
                ..Default::default()
            };
        }

        let outcome = match self.build_plan().await {
            Ok(_) => self.execute_all_phases().await,
            Err(e) => Err(e),
        };
        outcome.unwrap_or_else(|e| MigrationResult {
            success: false,
            errors: vec![ItemError::new("plan", e.to_string())],
            ..Default::default()
        })
    }

    /// Progress computed from registry counts.
    ///
    /// `estimated_phase` is derived from the completion percentage;
    /// `active_phase` is the phase actually executing, if any.
    pub fn get_migration_progress(&self) -> MigrationProgress {
        let counts = self.registry.counts();
        let total = counts.total();
        let progress_percent = if total > 0 {
            counts.remote as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let phase_count = self.plan().map(|p| p.len()).unwrap_or(0);
        // floor(progress / (100 / phase_count)), in integers, clamped so a
        // finished run reports the last phase instead of `phase_count`.
        let estimated_phase = if phase_count > 0 && total > 0 {
            (counts.remote * phase_count / total).min(phase_count - 1)
        } else {
            0
        };

        MigrationProgress {
            total,
            migrated: counts.remote,
            failed: counts.error,
            pending: counts.local + counts.migrating,
            progress_percent,
            estimated_phase,
            active_phase: self.run.lock().unwrap_or_else(|e| e.into_inner()).active_phase,
            phase_count,
        }
    }

    /// Rescan the inventory and mark every local asset that already has a
    /// remote object under its key as `remote`.
    ///
    /// Restores registry state in a process that did not run the migration.
    /// Sizes are not compared here; [`verify_migration`](Self::verify_migration)
    /// reports mismatches. Returns the number of assets marked.
    pub async fn reconcile_with_remote(&self) -> Result<usize> {
        self.refresh_inventory().await?;
        let remote = self.remote()?;
        let present: std::collections::HashSet<String> = remote
            .list(REMOTE_KEY_PREFIX, usize::MAX)
            .await?
            .into_iter()
            .map(|object| object.key)
            .collect();

        let mut marked = 0;
        for key in self.registry.keys_in_state(MigrationState::Local) {
            if present.contains(&key) {
                self.registry.begin_migration(&key)?;
                self.registry.complete_migration(&key, remote.public_url(&key))?;
                marked += 1;
            }
        }
        info!(marked, remote_objects = present.len(), "Reconciled registry with remote");
        Ok(marked)
    }

    /// Reset migrated assets to `local`. Remote objects are left in place.
    ///
    /// A missing local file is restored from its remote copy first; an asset
    /// whose file cannot be restored keeps its state and is reported.
    pub async fn execute_rollback(&self) -> RollbackResult {
        let mut result = RollbackResult::default();
        let candidates: Vec<_> = self
            .registry
            .all()
            .into_iter()
            .filter(|asset| asset.migration_state != MigrationState::Local)
            .collect();

        for asset in candidates {
            let key = match asset.target_remote_key() {
                Ok(key) => key,
                Err(e) => {
                    result.errors.push(ItemError::new(asset.filename.clone(), e.to_string()));
                    continue;
                }
            };

            if !asset.local_path.is_file() {
                match self.restore_local(&key, &asset.local_path).await {
                    Ok(()) => result.restored_locally += 1,
                    Err(e) => {
                        let err = AssetError::Rollback {
                            key: key.clone(),
                            message: e.to_string(),
                        };
                        warn!(key = %key, error = %err, "Rollback could not restore local file");
                        result.errors.push(ItemError::new(key, err.to_string()));
                        continue;
                    }
                }
            }

            match self.registry.rollback(&key) {
                Ok(_) => result.rolled_back += 1,
                Err(e) => result.errors.push(ItemError::new(key, e.to_string())),
            }
        }

        result.success = result.errors.is_empty();
        result.message = format!(
            "Rolled back {} assets ({} restored locally); remote objects were not deleted",
            result.rolled_back, result.restored_locally
        );
        info!(
            rolled_back = result.rolled_back,
            restored = result.restored_locally,
            errors = result.errors.len(),
            "Rollback finished"
        );
        result
    }

    async fn restore_local(&self, key: &str, local_path: &std::path::Path) -> Result<()> {
        let remote = self.remote()?;
        let object = remote.get(key).await?;
        self.service
            .local()
            .write_path(local_path, &object.bytes)
            .await
    }

    /// Compare every `remote` asset against one listing of the remote
    /// prefix.
    pub async fn verify_migration(&self) -> VerificationReport {
        let mut report = VerificationReport::default();
        let remote = match self.remote() {
            Ok(remote) => remote,
            Err(e) => {
                report.errors.push(ItemError::new("remote", e.to_string()));
                return report;
            }
        };

        let listing = match remote.list(REMOTE_KEY_PREFIX, usize::MAX).await {
            Ok(listing) => listing,
            Err(e) => {
                report.errors.push(ItemError::new(REMOTE_KEY_PREFIX, e.to_string()));
                return report;
            }
        };
        let sizes: HashMap<String, u64> = listing
            .into_iter()
            .map(|object| (object.key, object.size))
            .collect();

        for key in self.registry.keys_in_state(MigrationState::Remote) {
            let Some(asset) = self.registry.get(&key) else {
                continue;
            };
            match sizes.get(&key) {
                None => report.missing.push(key),
                Some(size) if *size != asset.size => report.size_mismatch.push(key),
                Some(_) => report.verified += 1,
            }
        }

        report.success =
            report.missing.is_empty() && report.size_mismatch.is_empty() && report.errors.is_empty();
        info!(
            verified = report.verified,
            missing = report.missing.len(),
            size_mismatch = report.size_mismatch.len(),
            "Verification finished"
        );
        report
    }
}
