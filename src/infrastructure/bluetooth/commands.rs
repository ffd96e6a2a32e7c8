//! Typed launch-monitor commands and the session startup sequence.
//!
//! Everything here is a thin wrapper over [`Session::send_request`] plus the
//! asynchronous alert handling that turns device pushes into sink calls.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::domain::models::{DeviceInfo, DeviceState, ReadinessTracker, Severity, ShotSink, TiltAngles};
use crate::domain::proto::{AlertNotification, AlertStatus, AlertType, LaunchMonitorService, ShotConfig};
use crate::domain::settings::ShotConfigSettings;
use crate::domain::shot::ShotRecord;
use crate::error::Result;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::session::Session;
use crate::infrastructure::bluetooth::transport::GattTransport;

/// Behaviour knobs for one session, lifted from the settings file.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Issue `wake()` whenever the device reports standby.
    pub auto_wake: bool,
    /// Run tilt calibration during setup.
    pub calibrate_tilt: bool,
    pub shot_config: ShotConfigSettings,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            auto_wake: true,
            calibrate_tilt: false,
            shot_config: ShotConfigSettings::default(),
        }
    }
}

/// High-level handle over a handshaken session.
pub struct LaunchMonitor {
    session: Arc<Session>,
    sink: Arc<dyn ShotSink>,
    readiness: StdMutex<ReadinessTracker>,
    tilt: StdMutex<Option<TiltAngles>>,
    battery: Arc<StdMutex<Option<u8>>>,
    device_info: StdMutex<DeviceInfo>,
    auto_wake: bool,
    aux_cancel: CancellationToken,
}

impl LaunchMonitor {
    /// Bring up a full session over an established transport.
    ///
    /// The protected device-interface notifier is enabled before anything
    /// else touches GATT; see [`GattTransport`] for why the order is
    /// load-bearing.
    pub async fn setup_session(
        transport: Arc<dyn GattTransport>,
        sink: Arc<dyn ShotSink>,
        config: MonitorConfig,
    ) -> Result<Arc<Self>> {
        // 1. Protected notifier first. This also performs in-band pairing
        //    when no bond exists yet.
        let (notify_tx, notify_rx) = mpsc::channel(protocol::QUEUE_DEPTH);
        transport.enable_protected_notifier(notify_tx).await?;

        // 2. Plain notifiers.
        let aux_cancel = CancellationToken::new();
        let battery = Arc::new(StdMutex::new(None));
        spawn_plain_notifiers(&transport, &aux_cancel, battery.clone()).await?;

        // 3. Device identity.
        let device_info = read_device_info(&transport).await?;
        info!(
            serial = %device_info.serial,
            model = %device_info.model,
            firmware = %device_info.firmware,
            "device information"
        );

        // 4. Handshake.
        let (alert_tx, alert_rx) = mpsc::channel(protocol::QUEUE_DEPTH);
        let session = Session::start(transport.clone(), notify_rx, alert_tx);
        session.perform_handshake().await?;

        let monitor = Arc::new(Self {
            session,
            sink,
            readiness: StdMutex::new(ReadinessTracker::new()),
            tilt: StdMutex::new(None),
            battery,
            device_info: StdMutex::new(device_info),
            auto_wake: config.auto_wake,
            aux_cancel: aux_cancel.clone(),
        });

        tokio::spawn(alert_loop(monitor.clone(), alert_rx, aux_cancel));

        // 5. Wake the device and prime the cached state.
        monitor.wake().await?;
        monitor.query_status().await?;
        monitor.query_tilt().await?;

        // 6. Subscribe to the launch-monitor alert stream.
        monitor.subscribe_to_alerts().await?;

        // 7. Optional tilt calibration.
        if config.calibrate_tilt {
            monitor.start_tilt_calibration().await?;
        }

        // 8. Push environmental settings.
        monitor.shot_config(&config.shot_config).await?;

        Ok(monitor)
    }

    pub async fn wake(&self) -> Result<DeviceState> {
        let response = self
            .session
            .send_request(LaunchMonitorService::wake_up_request())
            .await?;
        let state = response.wake_up_response.unwrap_or(DeviceState::Unknown);
        debug!(?state, "wake");
        self.apply_state(state);
        Ok(state)
    }

    pub async fn query_status(&self) -> Result<DeviceState> {
        let response = self
            .session
            .send_request(LaunchMonitorService::status_request())
            .await?;
        let state = response.status_response.unwrap_or(DeviceState::Unknown);
        debug!(?state, "status");
        self.apply_state(state);
        Ok(state)
    }

    pub async fn query_tilt(&self) -> Result<TiltAngles> {
        let response = self
            .session
            .send_request(LaunchMonitorService::tilt_request())
            .await?;
        let tilt = response
            .tilt_response
            .map(|t| TiltAngles {
                roll: t.roll,
                pitch: t.pitch,
            })
            .unwrap_or_default();
        debug!(roll = tilt.roll, pitch = tilt.pitch, "tilt");
        *self.tilt.lock().unwrap() = Some(tilt);
        Ok(tilt)
    }

    pub async fn subscribe_to_alerts(&self) -> Result<Vec<AlertStatus>> {
        let response = self
            .session
            .send_request(LaunchMonitorService::subscribe_alerts_request(vec![
                AlertType::LaunchMonitor,
            ]))
            .await?;
        let entries = response.subscribe_alerts_response.unwrap_or_default();
        debug!(count = entries.len(), "alert subscription confirmed");
        Ok(entries)
    }

    pub async fn start_tilt_calibration(&self) -> Result<u32> {
        let response = self
            .session
            .send_request(LaunchMonitorService::start_tilt_calibration_request())
            .await?;
        let status = response
            .tilt_calibration_response
            .map(|c| c.status)
            .unwrap_or(0);
        info!(status, "tilt calibration started");
        Ok(status)
    }

    pub async fn shot_config(&self, settings: &ShotConfigSettings) -> Result<bool> {
        let response = self
            .session
            .send_request(LaunchMonitorService::shot_config_request(ShotConfig {
                temperature: settings.temperature_f,
                humidity: settings.humidity,
                altitude: settings.altitude_m,
                air_density: settings.air_density,
                tee_range: settings.tee_range_m,
            }))
            .await?;
        let accepted = response.shot_config_response.unwrap_or(false);
        if !accepted {
            warn!("device rejected shot configuration");
        }
        Ok(accepted)
    }

    /// Current cached device state.
    pub fn state(&self) -> DeviceState {
        self.readiness.lock().unwrap().state()
    }

    /// Derived readiness: the device is ready exactly when waiting.
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    pub fn tilt(&self) -> Option<TiltAngles> {
        *self.tilt.lock().unwrap()
    }

    pub fn battery_level(&self) -> Option<u8> {
        *self.battery.lock().unwrap()
    }

    pub fn device_info(&self) -> DeviceInfo {
        self.device_info.lock().unwrap().clone()
    }

    pub async fn shutdown(&self) {
        self.aux_cancel.cancel();
        self.session.shutdown().await;
    }

    fn apply_state(&self, state: DeviceState) {
        if let Some(ready) = self.readiness.lock().unwrap().update(state) {
            info!(ready, "readiness changed");
            self.sink.on_readiness_changed(ready);
        }
    }
}

async fn alert_loop(
    monitor: Arc<LaunchMonitor>,
    mut alert_rx: mpsc::Receiver<AlertNotification>,
    cancel: CancellationToken,
) {
    loop {
        let alert = tokio::select! {
            _ = cancel.cancelled() => break,
            alert = alert_rx.recv() => match alert {
                Some(alert) => alert,
                None => break,
            },
        };
        handle_alert(&monitor, alert).await;
    }
    trace!("alert loop stopped");
}

async fn handle_alert(monitor: &LaunchMonitor, alert: AlertNotification) {
    if let Some(state) = alert.state {
        monitor.apply_state(state);
        if state == DeviceState::Standby {
            if monitor.auto_wake {
                info!("device entered standby, waking");
                if let Err(err) = monitor.wake().await {
                    monitor
                        .sink
                        .on_error(Severity::Error, &format!("auto-wake failed: {err}"));
                }
            } else {
                monitor.sink.on_error(
                    Severity::Warning,
                    "device is in standby and will not register shots",
                );
            }
        }
    }

    if let Some(error) = alert.error {
        monitor.sink.on_error(
            Severity::from_device(error.severity),
            &format!("device reported error code {}", error.code),
        );
    }

    if let Some(metrics) = alert.metrics {
        let shot = ShotRecord::from_metrics(&metrics);
        info!(
            shot_id = shot.shot_id,
            ball_speed = shot.ball_speed,
            total_spin = shot.total_spin,
            "shot"
        );
        monitor.sink.on_shot(&shot);
    }

    if alert.tilt_calibration.is_some() {
        // Calibration finished; the cached tilt is stale.
        if let Err(err) = monitor.query_tilt().await {
            warn!(%err, "tilt re-query after calibration failed");
        }
    }
}

/// Enable the unprotected notifiers and spawn their (mostly informational)
/// consumers.
async fn spawn_plain_notifiers(
    transport: &Arc<dyn GattTransport>,
    cancel: &CancellationToken,
    battery: Arc<StdMutex<Option<u8>>>,
) -> Result<()> {
    let (battery_tx, battery_rx) = mpsc::channel(protocol::QUEUE_DEPTH);
    transport
        .enable_plain_notifier(
            protocol::BATTERY_SERVICE,
            protocol::BATTERY_LEVEL_CHAR,
            battery_tx,
        )
        .await?;
    spawn_informational(battery_rx, cancel.clone(), move |data| {
        if let Some(&level) = data.first() {
            info!(level, "battery level");
            *battery.lock().unwrap() = Some(level);
        }
    });

    let (measurement_tx, measurement_rx) = mpsc::channel(protocol::QUEUE_DEPTH);
    transport
        .enable_plain_notifier(
            protocol::MEASUREMENT_SERVICE,
            protocol::MEASUREMENT_CHAR,
            measurement_tx,
        )
        .await?;
    spawn_informational(measurement_rx, cancel.clone(), |data| {
        trace!(len = data.len(), "measurement notification");
    });

    // Subscribed for parity with the vendor app; payloads are discarded.
    let (control_tx, control_rx) = mpsc::channel(protocol::QUEUE_DEPTH);
    transport
        .enable_plain_notifier(
            protocol::MEASUREMENT_SERVICE,
            protocol::CONTROL_POINT_CHAR,
            control_tx,
        )
        .await?;
    spawn_informational(control_rx, cancel.clone(), |data| {
        trace!(len = data.len(), "control-point notification discarded");
    });

    // Bytes 1 and 2 mirror awake/ready, but the alert stream is
    // authoritative; log them and move on.
    let (status_tx, status_rx) = mpsc::channel(protocol::QUEUE_DEPTH);
    transport
        .enable_plain_notifier(
            protocol::MEASUREMENT_SERVICE,
            protocol::STATUS_CHAR,
            status_tx,
        )
        .await?;
    spawn_informational(status_rx, cancel.clone(), |data| {
        if data.len() >= 3 {
            debug!(
                is_awake = data[1] != 0,
                is_ready = data[2] != 0,
                "status characteristic"
            );
        }
    });

    Ok(())
}

fn spawn_informational(
    mut rx: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
    handler: impl Fn(&[u8]) + Send + 'static,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                data = rx.recv() => {
                    let Some(data) = data else { break };
                    handler(&data);
                }
            }
        }
    });
}

async fn read_device_info(transport: &Arc<dyn GattTransport>) -> Result<DeviceInfo> {
    Ok(DeviceInfo {
        serial: read_string(transport, protocol::SERIAL_NUMBER_CHAR).await?,
        model: read_string(transport, protocol::MODEL_NUMBER_CHAR).await?,
        firmware: read_string(transport, protocol::FIRMWARE_REVISION_CHAR).await?,
    })
}

async fn read_string(transport: &Arc<dyn GattTransport>, characteristic: uuid::Uuid) -> Result<String> {
    let raw = transport
        .read_value(protocol::DEVICE_INFO_SERVICE, characteristic)
        .await?;
    Ok(String::from_utf8_lossy(&raw)
        .trim_end_matches('\0')
        .to_string())
}
