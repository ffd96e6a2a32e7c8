//! Session and command-layer tests against a fake GATT transport.
//!
//! The fake peer speaks the real wire format: host writes are reassembled
//! with the production framing code, and device replies travel back as
//! chunked notifications. Timeout-heavy cases run under paused tokio time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use r10_bridge::domain::frame::{self, Reassembler};
use r10_bridge::domain::models::{DeviceState, Severity, ShotSink, TiltAngles};
use r10_bridge::domain::proto::{
    AlertNotification, AlertStatus, AlertType, BallMetrics, LaunchMonitorService, ShotMetrics,
    Tilt, Wrapper,
};
use r10_bridge::domain::shot::ShotRecord;
use r10_bridge::error::BridgeError;
use r10_bridge::infrastructure::bluetooth::protocol;
use r10_bridge::infrastructure::bluetooth::{GattTransport, LaunchMonitor, MonitorConfig, Session};

// ---------------------------------------------------------------------------
// Fake transport
// ---------------------------------------------------------------------------

struct FakeTransport {
    writes_tx: mpsc::UnboundedSender<Vec<u8>>,
    notify_slot: StdMutex<Option<mpsc::Sender<Vec<u8>>>>,
    plain_before_protected: AtomicBool,
    protected_enabled: AtomicBool,
    disconnected: Notify,
}

impl FakeTransport {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (writes_tx, writes_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                writes_tx,
                notify_slot: StdMutex::new(None),
                plain_before_protected: AtomicBool::new(false),
                protected_enabled: AtomicBool::new(false),
                disconnected: Notify::new(),
            }),
            writes_rx,
        )
    }

    /// Push one BLE notification (header byte included) to the session.
    async fn notify(&self, data: Vec<u8>) {
        let tx = self
            .notify_slot
            .lock()
            .unwrap()
            .clone()
            .expect("protected notifier not enabled");
        tx.send(data).await.expect("session reader gone");
    }
}

#[async_trait]
impl GattTransport for FakeTransport {
    async fn enable_protected_notifier(&self, tx: mpsc::Sender<Vec<u8>>) -> r10_bridge::Result<()> {
        // The real device only authenticates the CCCD write when it is the
        // first GATT operation after connect.
        if self.plain_before_protected.load(Ordering::SeqCst) {
            return Err(BridgeError::NotifyAuthRequired);
        }
        *self.notify_slot.lock().unwrap() = Some(tx);
        self.protected_enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn enable_plain_notifier(
        &self,
        _service: Uuid,
        _characteristic: Uuid,
        _tx: mpsc::Sender<Vec<u8>>,
    ) -> r10_bridge::Result<()> {
        if !self.protected_enabled.load(Ordering::SeqCst) {
            self.plain_before_protected.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn write_command(&self, data: &[u8]) -> r10_bridge::Result<()> {
        let _ = self.writes_tx.send(data.to_vec());
        Ok(())
    }

    async fn read_value(
        &self,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> r10_bridge::Result<Vec<u8>> {
        Ok(b"FAKE".to_vec())
    }

    async fn wait_disconnected(&self) {
        self.disconnected.notified().await;
    }
}

// ---------------------------------------------------------------------------
// Capture sink
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CaptureSink {
    shots: StdMutex<Vec<ShotRecord>>,
    readiness: StdMutex<Vec<bool>>,
    errors: StdMutex<Vec<(Severity, String)>>,
}

impl ShotSink for CaptureSink {
    fn on_shot(&self, shot: &ShotRecord) {
        self.shots.lock().unwrap().push(*shot);
    }

    fn on_readiness_changed(&self, ready: bool) {
        self.readiness.lock().unwrap().push(ready);
    }

    fn on_error(&self, severity: Severity, message: &str) {
        self.errors
            .lock()
            .unwrap()
            .push((severity, message.to_string()));
    }
}

// ---------------------------------------------------------------------------
// Peer helpers
// ---------------------------------------------------------------------------

const HANDSHAKE_REPLY_TAIL: [u8; 3] = [0x00, 0x00, 0x00];

fn handshake_reply(header: u8) -> Vec<u8> {
    let mut reply = vec![0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0x01, 0x00, 0x00, header];
    reply.extend_from_slice(&HANDSHAKE_REPLY_TAIL);
    reply
}

/// Device-side mirror of the request layout: `B413` + echoed counter.
fn build_proto_response(counter: u16, proto: &[u8]) -> Vec<u8> {
    let mut payload = protocol::build_proto_request(counter, proto);
    payload[0] = 0xB4;
    payload
}

/// Manual harness: the test drives the peer side byte by byte.
struct Harness {
    transport: Arc<FakeTransport>,
    writes: mpsc::UnboundedReceiver<Vec<u8>>,
    session: Arc<Session>,
    alert_rx: mpsc::Receiver<AlertNotification>,
    reassembler: Reassembler,
    header: u8,
}

impl Harness {
    async fn start() -> Self {
        let (transport, writes) = FakeTransport::new();
        let (notify_tx, notify_rx) = mpsc::channel(protocol::QUEUE_DEPTH);
        transport.enable_protected_notifier(notify_tx).await.unwrap();
        let (alert_tx, alert_rx) = mpsc::channel(protocol::QUEUE_DEPTH);
        let session = Session::start(transport.clone(), notify_rx, alert_tx);
        Self {
            transport,
            writes,
            session,
            alert_rx,
            reassembler: Reassembler::new(),
            header: 0,
        }
    }

    async fn handshake(&mut self, header: u8) {
        let session = self.session.clone();
        let handshake = tokio::spawn(async move { session.perform_handshake().await });

        let hello = self.writes.recv().await.unwrap();
        assert_eq!(hello[0], 0x00);
        assert_eq!(&hello[1..], &protocol::HANDSHAKE_HELLO);

        let mut notification = vec![0x00];
        notification.extend_from_slice(&handshake_reply(header));
        self.transport.notify(notification).await;

        assert_eq!(handshake.await.unwrap().unwrap(), header);
        self.header = header;

        let confirm = self.writes.recv().await.unwrap();
        assert_eq!(confirm, vec![0x00, 0x00]);
    }

    /// Next framed host payload, skipping raw (header `0x00`) writes.
    async fn next_frame(&mut self) -> Vec<u8> {
        loop {
            let chunk = self.writes.recv().await.unwrap();
            if chunk[0] == 0x00 {
                continue;
            }
            assert_eq!(chunk[0], self.header, "write carries wrong header byte");
            if let Some(raw) = self.reassembler.accept(&chunk[1..]) {
                return frame::decode_frame(&raw).unwrap();
            }
        }
    }

    /// Next host request frame (`B313`), skipping acknowledgements.
    async fn next_request(&mut self) -> (u16, LaunchMonitorService) {
        loop {
            let payload = self.next_frame().await;
            if payload.starts_with(&[0xB3, 0x13]) {
                let counter = protocol::embedded_counter(&payload).unwrap();
                let body = protocol::proto_body(&payload).unwrap();
                let service = Wrapper::decode(body).unwrap().service.unwrap();
                return (counter, service);
            }
        }
    }

    /// Deliver one device payload as chunked notifications.
    async fn send_payload(&self, payload: &[u8]) {
        let wire = frame::encode_message(payload);
        for chunk in frame::chunk(&wire, self.header) {
            self.transport.notify(chunk).await;
        }
    }

    async fn send_response(&self, counter: u16, service: LaunchMonitorService) {
        let proto = Wrapper::new(service).encode();
        self.send_payload(&build_proto_response(counter, &proto)).await;
    }

    async fn send_alert(&self, alert: AlertNotification) {
        let proto = Wrapper::new(LaunchMonitorService {
            alert_notification: Some(alert),
            ..Default::default()
        })
        .encode();
        self.send_payload(&protocol::build_proto_request(0, &proto)).await;
    }
}

/// Scripted peer answering every request, for full `setup_session` runs.
fn spawn_auto_peer(
    transport: Arc<FakeTransport>,
    mut writes: mpsc::UnboundedReceiver<Vec<u8>>,
    header: u8,
    state: DeviceState,
) {
    tokio::spawn(async move {
        let mut reassembler = Reassembler::new();
        while let Some(chunk) = writes.recv().await {
            let (chunk_header, body) = (chunk[0], &chunk[1..]);
            if chunk_header == 0x00 {
                if body == protocol::HANDSHAKE_HELLO {
                    let mut notification = vec![0x00];
                    notification.extend_from_slice(&handshake_reply(header));
                    transport.notify(notification).await;
                }
                continue;
            }
            let Some(raw) = reassembler.accept(body) else {
                continue;
            };
            let payload = frame::decode_frame(&raw).unwrap();
            if !payload.starts_with(&[0xB3, 0x13]) {
                // Acknowledgements need no reply.
                continue;
            }
            let counter = protocol::embedded_counter(&payload).unwrap();
            let body = protocol::proto_body(&payload).unwrap();
            let request = Wrapper::decode(body).unwrap().service.unwrap_or_default();
            let response = answer(&request, state);
            let proto = Wrapper::new(response).encode();
            let reply = build_proto_response(counter, &proto);
            let wire = frame::encode_message(&reply);
            for chunk in frame::chunk(&wire, header) {
                transport.notify(chunk).await;
            }
        }
    });
}

fn answer(request: &LaunchMonitorService, state: DeviceState) -> LaunchMonitorService {
    let mut response = LaunchMonitorService::default();
    if request.status_request {
        response.status_response = Some(state);
    }
    if request.wake_up_request {
        response.wake_up_response = Some(state);
    }
    if request.tilt_request {
        response.tilt_response = Some(Tilt { roll: 1.5, pitch: -0.5 });
    }
    if request.subscribe_alerts_request.is_some() {
        response.subscribe_alerts_response = Some(vec![AlertStatus {
            alert_type: AlertType::LaunchMonitor,
            status: 1,
        }]);
    }
    if request.start_tilt_calibration_request {
        response.tilt_calibration_response =
            Some(r10_bridge::domain::proto::TiltCalibration { status: 1 });
    }
    if request.shot_config_request.is_some() {
        response.shot_config_response = Some(true);
    }
    response
}

async fn setup_monitor(
    header: u8,
    state: DeviceState,
    config: MonitorConfig,
) -> (Arc<FakeTransport>, Arc<CaptureSink>, Arc<LaunchMonitor>) {
    let (transport, writes) = FakeTransport::new();
    spawn_auto_peer(transport.clone(), writes, header, state);
    let sink = Arc::new(CaptureSink::default());
    let monitor = LaunchMonitor::setup_session(transport.clone(), sink.clone(), config)
        .await
        .unwrap();
    (transport, sink, monitor)
}

fn shot_alert(shot_id: u32) -> AlertNotification {
    AlertNotification {
        metrics: Some(ShotMetrics {
            shot_id,
            ball: Some(BallMetrics {
                ball_speed: 50.0,
                launch_angle: 14.5,
                launch_direction: -1.2,
                spin_axis: 3.0,
                total_spin: 3000.0,
            }),
            club: None,
        }),
        ..Default::default()
    }
}

async fn deliver_alert(transport: &FakeTransport, header: u8, alert: AlertNotification) {
    let proto = Wrapper::new(LaunchMonitorService {
        alert_notification: Some(alert),
        ..Default::default()
    })
    .encode();
    let payload = protocol::build_proto_request(0, &proto);
    let wire = frame::encode_message(&payload);
    for chunk in frame::chunk(&wire, header) {
        transport.notify(chunk).await;
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn handshake_adopts_negotiated_header_byte() {
    let mut harness = Harness::start().await;
    harness.handshake(0x7E).await;
    assert_eq!(harness.session.header(), 0x7E);
    assert!(harness.session.is_handshaken());

    // Subsequent writes carry the negotiated header byte.
    let session = harness.session.clone();
    let request =
        tokio::spawn(async move { session.send_request(LaunchMonitorService::status_request()).await });
    let (counter, service) = harness.next_request().await;
    assert_eq!(counter, 0);
    assert!(service.status_request);
    harness
        .send_response(
            0,
            LaunchMonitorService {
                status_response: Some(DeviceState::Waiting),
                ..Default::default()
            },
        )
        .await;
    let response = request.await.unwrap().unwrap();
    assert_eq!(response.status_response, Some(DeviceState::Waiting));
}

#[tokio::test(start_paused = true)]
async fn counter_advances_on_timeout_and_stale_reply_is_dropped() {
    let mut harness = Harness::start().await;
    harness.handshake(0x42).await;

    let session = harness.session.clone();
    let request =
        tokio::spawn(async move { session.send_request(LaunchMonitorService::status_request()).await });

    // Attempt #0 goes unanswered; the retry must use counter 1.
    let (counter, _) = harness.next_request().await;
    assert_eq!(counter, 0);
    let (counter, _) = harness.next_request().await;
    assert_eq!(counter, 1);

    // A late reply to #0 is stale: dropped without releasing the waiter.
    harness
        .send_response(
            0,
            LaunchMonitorService {
                status_response: Some(DeviceState::Error),
                ..Default::default()
            },
        )
        .await;
    harness
        .send_response(
            1,
            LaunchMonitorService {
                status_response: Some(DeviceState::Waiting),
                ..Default::default()
            },
        )
        .await;

    let response = request.await.unwrap().unwrap();
    assert_eq!(response.status_response, Some(DeviceState::Waiting));
}

#[tokio::test(start_paused = true)]
async fn request_times_out_after_three_attempts() {
    let mut harness = Harness::start().await;
    harness.handshake(0x42).await;

    let session = harness.session.clone();
    let request =
        tokio::spawn(async move { session.send_request(LaunchMonitorService::tilt_request()).await });

    for expected in 0..3u16 {
        let (counter, _) = harness.next_request().await;
        assert_eq!(counter, expected);
    }
    assert!(matches!(
        request.await.unwrap(),
        Err(BridgeError::RequestTimeout { attempts: 3 })
    ));

    // The next request keeps counting upward.
    let session = harness.session.clone();
    let request =
        tokio::spawn(async move { session.send_request(LaunchMonitorService::status_request()).await });
    let (counter, _) = harness.next_request().await;
    assert_eq!(counter, 3);
    harness
        .send_response(
            3,
            LaunchMonitorService {
                status_response: Some(DeviceState::Standby),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(
        request.await.unwrap().unwrap().status_response,
        Some(DeviceState::Standby)
    );
}

#[tokio::test(start_paused = true)]
async fn corrupt_frame_is_dropped_and_stream_recovers() {
    let mut harness = Harness::start().await;
    harness.handshake(0x42).await;

    // Well-framed message with a flipped body byte.
    let proto = Wrapper::new(LaunchMonitorService {
        alert_notification: Some(shot_alert(1)),
        ..Default::default()
    })
    .encode();
    let payload = protocol::build_proto_request(0, &proto);
    let mut wire = frame::encode_message(&payload);
    let mid = wire.len() / 2;
    wire[mid] = if wire[mid] == 0x55 { 0x56 } else { 0x55 };
    for chunk in frame::chunk(&wire, 0x42) {
        harness.transport.notify(chunk).await;
    }

    // The next valid frame is processed normally.
    harness.send_alert(shot_alert(2)).await;
    let alert = harness.alert_rx.recv().await.unwrap();
    assert_eq!(alert.metrics.unwrap().shot_id, 2);
}

#[tokio::test(start_paused = true)]
async fn duplicate_shot_ids_are_deduplicated() {
    let mut harness = Harness::start().await;
    harness.handshake(0x42).await;

    harness.send_alert(shot_alert(42)).await;
    harness.send_alert(shot_alert(42)).await;
    harness
        .send_alert(AlertNotification {
            state: Some(DeviceState::Waiting),
            ..Default::default()
        })
        .await;

    let first = harness.alert_rx.recv().await.unwrap();
    assert_eq!(first.metrics.unwrap().shot_id, 42);
    // The replayed shot never surfaces; the state alert is next in line.
    let second = harness.alert_rx.recv().await.unwrap();
    assert!(second.metrics.is_none());
    assert_eq!(second.state, Some(DeviceState::Waiting));
}

#[tokio::test(start_paused = true)]
async fn classified_messages_are_acknowledged() {
    let mut harness = Harness::start().await;
    harness.handshake(0x42).await;

    // Device-info message: no application action beyond the ack.
    harness
        .send_payload(&[0xA0, 0x13, 0x01, 0x02, 0x03, 0x04])
        .await;
    let ack = harness.next_frame().await;
    assert_eq!(&ack[..4], &[0x88, 0x13, 0xA0, 0x13]);
    assert_eq!(ack.len(), 12);
    assert!(ack[4..].iter().all(|&b| b == 0));
}

#[tokio::test(start_paused = true)]
async fn setup_session_reports_status_tilt_and_readiness() {
    let (_transport, sink, monitor) =
        setup_monitor(0x42, DeviceState::Waiting, MonitorConfig::default()).await;

    assert!(monitor.is_ready());
    assert_eq!(monitor.state(), DeviceState::Waiting);
    assert_eq!(monitor.tilt(), Some(TiltAngles { roll: 1.5, pitch: -0.5 }));
    assert_eq!(monitor.device_info().serial, "FAKE");
    // Readiness fired exactly once for standby → waiting.
    assert_eq!(*sink.readiness.lock().unwrap(), vec![true]);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shot_alert_is_normalised_and_deduplicated_downstream() {
    let (transport, sink, monitor) =
        setup_monitor(0x42, DeviceState::Waiting, MonitorConfig::default()).await;

    deliver_alert(&transport, 0x42, shot_alert(42)).await;
    wait_for(|| !sink.shots.lock().unwrap().is_empty()).await;

    // Replay of the same shot-id: no second delivery.
    deliver_alert(&transport, 0x42, shot_alert(42)).await;
    deliver_alert(&transport, 0x42, shot_alert(43)).await;
    wait_for(|| sink.shots.lock().unwrap().len() == 2).await;

    let shots = sink.shots.lock().unwrap();
    assert_eq!(shots.len(), 2);
    let shot = &shots[0];
    assert_eq!(shot.shot_id, 42);
    assert!((shot.ball_speed - 111.845).abs() < 0.01);
    assert!((shot.spin_axis - (-3.0)).abs() < 1e-6);
    let expected_side = 3000.0 * (-3.0f32).to_radians().sin();
    assert!((shot.side_spin - expected_side).abs() < 0.1);
    assert_eq!(shots[1].shot_id, 43);
    drop(shots);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn standby_alert_drops_readiness_and_surfaces_advisory() {
    let config = MonitorConfig { auto_wake: false, ..Default::default() };
    let (transport, sink, monitor) = setup_monitor(0x42, DeviceState::Waiting, config).await;
    assert_eq!(*sink.readiness.lock().unwrap(), vec![true]);

    deliver_alert(
        &transport,
        0x42,
        AlertNotification {
            state: Some(DeviceState::Standby),
            ..Default::default()
        },
    )
    .await;
    wait_for(|| sink.readiness.lock().unwrap().len() == 2).await;

    assert_eq!(*sink.readiness.lock().unwrap(), vec![true, false]);
    let errors = sink.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, Severity::Warning);
    drop(errors);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn device_error_alert_reaches_error_listener() {
    let (transport, sink, monitor) =
        setup_monitor(0x42, DeviceState::Waiting, MonitorConfig::default()).await;

    deliver_alert(
        &transport,
        0x42,
        AlertNotification {
            error: Some(r10_bridge::domain::proto::DeviceAlertError { code: 17, severity: 2 }),
            ..Default::default()
        },
    )
    .await;
    wait_for(|| !sink.errors.lock().unwrap().is_empty()).await;

    let errors = sink.errors.lock().unwrap();
    assert_eq!(errors[0].0, Severity::Error);
    assert!(errors[0].1.contains("17"));
    drop(errors);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn protected_notifier_must_be_first_gatt_operation() {
    let (transport, _writes) = FakeTransport::new();

    // A stray GATT operation before the protected notifier poisons the
    // session: setup must surface the authentication failure.
    let (tx, _rx) = mpsc::channel(4);
    transport
        .enable_plain_notifier(protocol::BATTERY_SERVICE, protocol::BATTERY_LEVEL_CHAR, tx)
        .await
        .unwrap();

    let sink = Arc::new(CaptureSink::default());
    let result = LaunchMonitor::setup_session(
        transport.clone() as Arc<dyn GattTransport>,
        sink,
        MonitorConfig::default(),
    )
    .await;
    assert!(matches!(
        result.map(|_| ()),
        Err(BridgeError::NotifyAuthRequired)
    ));
}

#[tokio::test(start_paused = true)]
async fn new_session_starts_with_fresh_dedup_and_header() {
    // First session delivers shot 42.
    let (transport, sink, monitor) =
        setup_monitor(0x42, DeviceState::Waiting, MonitorConfig::default()).await;
    deliver_alert(&transport, 0x42, shot_alert(42)).await;
    wait_for(|| sink.shots.lock().unwrap().len() == 1).await;
    monitor.shutdown().await;

    // Reconnect: a new session with a new header byte must deliver the same
    // shot-id again because the deduplication set is session-scoped.
    let (transport, sink2, monitor2) =
        setup_monitor(0x51, DeviceState::Waiting, MonitorConfig::default()).await;
    deliver_alert(&transport, 0x51, shot_alert(42)).await;
    wait_for(|| sink2.shots.lock().unwrap().len() == 1).await;
    assert_eq!(sink2.shots.lock().unwrap()[0].shot_id, 42);
    monitor2.shutdown().await;
}
