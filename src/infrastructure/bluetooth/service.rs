//! Bridge service: the connect / reconnect loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::models::{Severity, ShotSink};
use crate::domain::settings::Settings;
use crate::error::Result;
use crate::infrastructure::bluetooth::bluez;
use crate::infrastructure::bluetooth::commands::{LaunchMonitor, MonitorConfig};

/// Owns the long-running connect loop. Each established link becomes one
/// session; on disconnect the session is torn down before a new connect
/// attempt starts.
pub struct BridgeService {
    settings: Settings,
    sink: Arc<dyn ShotSink>,
}

impl BridgeService {
    pub fn new(settings: Settings, sink: Arc<dyn ShotSink>) -> Self {
        Self { settings, sink }
    }

    /// Run until `shutdown` fires or a non-retryable error occurs.
    pub async fn run(&self, address: &str, shutdown: CancellationToken) -> Result<()> {
        let delay = Duration::from_secs(self.settings.reconnect_delay_secs);
        loop {
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                outcome = self.run_session(address) => outcome,
            };

            match outcome {
                Ok(()) => info!("device disconnected"),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    warn!(%err, "session failed");
                    self.sink.on_error(Severity::Error, &err.to_string());
                }
            }

            info!(?delay, "reconnecting after delay");
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = sleep(delay) => {}
            }
        }
    }

    /// One connect → setup → park-until-disconnect → teardown cycle.
    async fn run_session(&self, address: &str) -> Result<()> {
        let transport = bluez::connect_transport(
            self.settings.adapter.as_deref(),
            address,
            Duration::from_secs(self.settings.discovery_timeout_secs),
        )
        .await?;

        let config = MonitorConfig {
            auto_wake: self.settings.auto_wake,
            calibrate_tilt: self.settings.calibrate_tilt_on_connect,
            shot_config: self.settings.shot_config,
        };
        let monitor = LaunchMonitor::setup_session(transport.clone(), self.sink.clone(), config)
            .await?;
        info!("session established, bridging shots");

        transport.wait_disconnected().await;
        monitor.shutdown().await;
        Ok(())
    }
}
