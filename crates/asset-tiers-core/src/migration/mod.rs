//! Local-to-remote migration.
//!
//! A [`MigrationPlan`] is built once from the local inventory and executed
//! phase by phase by the [`MigrationPipeline`]. Per-asset state lives in the
//! [`AssetRegistry`].

mod pipeline;
mod plan;
mod registry;

pub use pipeline::{ItemOutcome, MigrationPipeline};
pub use plan::{MigrationPhase, MigrationPlan, Priority, RiskLevel};
pub use registry::{AssetRegistry, StateCounts};
