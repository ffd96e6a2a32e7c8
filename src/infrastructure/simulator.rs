//! Reference downstream sinks.
//!
//! The core only ever calls [`ShotSink`]; these adapters are what the
//! bundled binary wires in. Real simulator integrations implement the same
//! trait and own their own connection lifecycle.

use std::sync::Arc;

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::domain::models::{Severity, ShotSink};
use crate::domain::shot::ShotRecord;

/// Logs every event through `tracing`. Always installed.
pub struct LogSink;

impl ShotSink for LogSink {
    fn on_shot(&self, shot: &ShotRecord) {
        info!(
            shot_id = shot.shot_id,
            ball_speed = shot.ball_speed,
            launch_angle = shot.launch_angle,
            side_spin = shot.side_spin,
            back_spin = shot.back_spin,
            "shot delivered"
        );
    }

    fn on_readiness_changed(&self, ready: bool) {
        info!(ready, "launch monitor readiness");
    }

    fn on_error(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!("{message}"),
            Severity::Warning => warn!("{message}"),
            Severity::Error => error!("{message}"),
        }
    }
}

#[derive(Debug)]
enum SinkEvent {
    Shot(ShotRecord),
    Readiness(bool),
    Error(Severity, String),
}

/// Emits events as newline-delimited JSON over TCP.
///
/// The sink trait is synchronous, so events are queued onto a writer task
/// that connects lazily and reconnects per delivery attempt after failures.
pub struct TcpShotSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl TcpShotSink {
    pub fn new(address: String) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_task(address, rx));
        Self { tx }
    }
}

impl ShotSink for TcpShotSink {
    fn on_shot(&self, shot: &ShotRecord) {
        let _ = self.tx.send(SinkEvent::Shot(*shot));
    }

    fn on_readiness_changed(&self, ready: bool) {
        let _ = self.tx.send(SinkEvent::Readiness(ready));
    }

    fn on_error(&self, severity: Severity, message: &str) {
        let _ = self.tx.send(SinkEvent::Error(severity, message.to_string()));
    }
}

async fn writer_task(address: String, mut rx: mpsc::UnboundedReceiver<SinkEvent>) {
    let mut stream: Option<TcpStream> = None;
    while let Some(event) = rx.recv().await {
        let line = match serde_json::to_string(&event_json(&event)) {
            Ok(line) => line + "\n",
            Err(err) => {
                error!(%err, "unserialisable sink event");
                continue;
            }
        };

        if stream.is_none() {
            match TcpStream::connect(&address).await {
                Ok(s) => {
                    debug!(%address, "sink connected");
                    stream = Some(s);
                }
                Err(err) => {
                    warn!(%address, %err, "sink connect failed, dropping event");
                    continue;
                }
            }
        }

        if let Some(s) = stream.as_mut() {
            if let Err(err) = s.write_all(line.as_bytes()).await {
                warn!(%err, "sink write failed, reconnecting on next event");
                stream = None;
            }
        }
    }
}

fn event_json(event: &SinkEvent) -> serde_json::Value {
    match event {
        SinkEvent::Shot(shot) => json!({ "type": "shot", "shot": shot }),
        SinkEvent::Readiness(ready) => json!({ "type": "readiness", "ready": ready }),
        SinkEvent::Error(severity, message) => {
            json!({ "type": "error", "severity": severity, "message": message })
        }
    }
}

/// Broadcasts every event to a set of sinks.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ShotSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn ShotSink>>) -> Self {
        Self { sinks }
    }
}

impl ShotSink for FanoutSink {
    fn on_shot(&self, shot: &ShotRecord) {
        for sink in &self.sinks {
            sink.on_shot(shot);
        }
    }

    fn on_readiness_changed(&self, ready: bool) {
        for sink in &self.sinks {
            sink.on_readiness_changed(ready);
        }
    }

    fn on_error(&self, severity: Severity, message: &str) {
        for sink in &self.sinks {
            sink.on_error(severity, message);
        }
    }
}
