use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use r10_bridge::domain::models::ShotSink;
use r10_bridge::domain::settings::SettingsService;
use r10_bridge::infrastructure::bluetooth::BridgeService;
use r10_bridge::infrastructure::logging;
use r10_bridge::infrastructure::simulator::{FanoutSink, LogSink, TcpShotSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `r10-bridge [--config <path>]`
    let mut args = std::env::args().skip(1);
    let settings_service = match args.next().as_deref() {
        Some("--config") => {
            let path = args.next().context("--config requires a path")?;
            SettingsService::with_path(PathBuf::from(path))?
        }
        Some(other) => anyhow::bail!("unknown argument: {other}"),
        None => SettingsService::new()?,
    };
    // Persist defaults on first run so there is a file to edit.
    settings_service.save()?;
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)?;

    let address = settings.device_address.clone().context(
        "no launch monitor configured; set \"device_address\" in the settings file",
    )?;

    let mut sinks: Vec<Arc<dyn ShotSink>> = vec![Arc::new(LogSink)];
    if settings.sink.tcp_enabled {
        info!(address = %settings.sink.tcp_address, "TCP sink enabled");
        sinks.push(Arc::new(TcpShotSink::new(settings.sink.tcp_address.clone())));
    }
    let sink: Arc<dyn ShotSink> = Arc::new(FanoutSink::new(sinks));

    let shutdown = CancellationToken::new();
    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            ctrl_c_shutdown.cancel();
        }
    });

    info!(%address, "starting bridge");
    let service = BridgeService::new(settings, sink);
    service.run(&address, shutdown).await?;
    info!("bridge stopped");
    Ok(())
}
