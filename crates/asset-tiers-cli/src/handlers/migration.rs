//! migrate, verify and rollback.

use super::shared::{print_item_errors, print_messages, Output};
use anyhow::Result;
use asset_tiers::AssetDelivery;
use tracing::warn;

pub(crate) async fn plan(out: &Output, delivery: &AssetDelivery) -> Result<bool> {
    let plan = delivery.plan_migration().await?;
    out.report(&*plan, || {
        println!(
            "Migration plan: {} assets in {} phases",
            plan.total_assets(),
            plan.len()
        );
        for (index, phase) in plan.phases().iter().enumerate() {
            println!(
                "  {}. {:<6} {:>5} assets  priority {:?}, risk {:?}, ~{} min",
                index + 1,
                phase.name,
                phase.len(),
                phase.priority,
                phase.risk_level,
                phase.estimated_duration_minutes
            );
        }
    })?;
    Ok(true)
}

pub(crate) async fn migrate(out: &Output, delivery: &AssetDelivery) -> Result<bool> {
    let readiness = delivery.migration_readiness().await;
    if !readiness.ready {
        out.report(&readiness, || {
            println!("Not ready to migrate");
            print_messages("ERROR", &readiness.reasons);
            print_messages("WARN ", &readiness.warnings);
        })?;
        return Ok(false);
    }

    // Ctrl-C stops after the current item.
    let canceller = delivery.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current asset");
            canceller.cancel_migration();
        }
    });
    let result = delivery.migrate_all().await;
    interrupt.abort();

    out.report(&result, || {
        for phase in &result.phases {
            println!(
                "{:<6} migrated {:>5}  skipped {:>5}  failed {:>5}  ({} ms)",
                phase.phase, phase.migrated, phase.skipped, phase.failed, phase.duration_ms
            );
        }
        print_item_errors(&result.errors);
        println!(
            "{}: {} migrated, {} skipped, {} failed in {} ms",
            if result.success { "PASS" } else { "FAIL" },
            result.total_migrated,
            result.total_skipped,
            result.total_failed,
            result.duration_ms
        );
    })?;
    Ok(result.success)
}

pub(crate) async fn verify(out: &Output, delivery: &AssetDelivery) -> Result<bool> {
    delivery.reconcile_migration_state().await?;
    let report = delivery.verify_migration().await;
    out.report(&report, || {
        println!("Verified {} assets", report.verified);
        for key in &report.missing {
            println!("  MISSING {}", key);
        }
        for key in &report.size_mismatch {
            println!("  SIZE    {}", key);
        }
        print_item_errors(&report.errors);
        println!("{}", if report.success { "PASS" } else { "FAIL" });
    })?;
    Ok(report.success)
}

pub(crate) async fn rollback(out: &Output, delivery: &AssetDelivery) -> Result<bool> {
    delivery.reconcile_migration_state().await?;
    let result = delivery.rollback_migration().await;
    out.report(&result, || {
        println!("{}", result.message);
        print_item_errors(&result.errors);
    })?;
    Ok(result.success)
}
