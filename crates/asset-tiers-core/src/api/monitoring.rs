//! Background health monitoring.

use crate::monitor::MonitorSnapshot;
use crate::AssetDelivery;

impl AssetDelivery {
    /// Start periodic health checks. Returns `false` if already running.
    pub fn start_monitoring(&self) -> bool {
        self.monitor.start()
    }

    /// Stop periodic health checks. Returns `false` if they were not running.
    pub async fn stop_monitoring(&self) -> bool {
        self.monitor.stop().await
    }

    pub fn monitoring_snapshot(&self) -> MonitorSnapshot {
        self.monitor.snapshot()
    }
}
