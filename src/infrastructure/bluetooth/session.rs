//! Device session: the protocol engine driving one connected link.
//!
//! A session owns three cooperating workers over bounded queues:
//!
//! ```text
//!             ┌──────────┐   GATT write    ┌────────────┐
//!  send_request ─▶ write ├────────────────▶│  device    │
//!             │  queue   │                 │            │
//!             └──────────┘                 └─────┬──────┘
//!                                    notification│
//!             ┌──────────┐  reassembled  ┌───────▼──────┐
//!  dispatch ◀─┤ processor│◀──────────────┤    reader    │
//!             └──────────┘   payloads    └──────────────┘
//! ```
//!
//! The reader strips the header byte, routes pre-handshake traffic to the
//! handshake advancer and reassembles frames. The processor classifies
//! payloads, acknowledges every classified message, correlates responses by
//! counter and forwards device alerts. The writer serialises GATT writes.

use std::collections::HashSet;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::domain::frame::{self, Reassembler};
use crate::domain::proto::{AlertNotification, LaunchMonitorService, Wrapper};
use crate::error::{BridgeError, Result};
use crate::infrastructure::bluetooth::protocol::{self, MessageKind};
use crate::infrastructure::bluetooth::transport::GattTransport;

#[derive(Debug)]
struct HandshakeState {
    complete: AtomicBool,
    header: AtomicU8,
    done: Notify,
}

#[derive(Debug, Default)]
struct PendingRequest {
    counter: u16,
    slot: Option<LaunchMonitorService>,
}

struct Shared {
    handshake: HandshakeState,
    pending: StdMutex<PendingRequest>,
    response_ready: Notify,
    processed_shots: StdMutex<HashSet<u32>>,
    write_tx: mpsc::Sender<Vec<u8>>,
    alert_tx: mpsc::Sender<AlertNotification>,
}

impl Shared {
    /// Frame, chunk and enqueue one interface message under the current
    /// session header byte.
    async fn enqueue_message(&self, payload: &[u8]) -> Result<()> {
        let header = self.handshake.header.load(Ordering::Acquire);
        let wire = frame::encode_message(payload);
        for chunk in frame::chunk(&wire, header) {
            self.write_tx
                .send(chunk)
                .await
                .map_err(|_| BridgeError::Disconnected)?;
        }
        Ok(())
    }
}

/// One connected, handshaken link to the launch monitor.
pub struct Session {
    shared: Arc<Shared>,
    request_lock: Mutex<()>,
    cancel: CancellationToken,
    workers: StdMutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Spawn the worker loops over an established transport.
    ///
    /// `notify_rx` carries raw notifications from the protected interface
    /// notifier; device alerts are forwarded into `alert_tx` after shot
    /// deduplication.
    pub fn start(
        transport: Arc<dyn GattTransport>,
        notify_rx: mpsc::Receiver<Vec<u8>>,
        alert_tx: mpsc::Sender<AlertNotification>,
    ) -> Arc<Self> {
        let (write_tx, write_rx) = mpsc::channel(protocol::QUEUE_DEPTH);
        let (proc_tx, proc_rx) = mpsc::channel(protocol::QUEUE_DEPTH);

        let shared = Arc::new(Shared {
            handshake: HandshakeState {
                complete: AtomicBool::new(false),
                header: AtomicU8::new(0x00),
                done: Notify::new(),
            },
            pending: StdMutex::new(PendingRequest::default()),
            response_ready: Notify::new(),
            processed_shots: StdMutex::new(HashSet::new()),
            write_tx,
            alert_tx,
        });

        let cancel = CancellationToken::new();
        let workers = vec![
            tokio::spawn(writer_loop(transport, write_rx, cancel.clone())),
            tokio::spawn(reader_loop(
                shared.clone(),
                notify_rx,
                proc_tx,
                cancel.clone(),
            )),
            tokio::spawn(processor_loop(shared.clone(), proc_rx, cancel.clone())),
        ];

        Arc::new(Self {
            shared,
            request_lock: Mutex::new(()),
            cancel,
            workers: StdMutex::new(workers),
        })
    }

    /// Negotiated session header byte (`0x00` until the handshake completes).
    pub fn header(&self) -> u8 {
        self.shared.handshake.header.load(Ordering::Acquire)
    }

    pub fn is_handshaken(&self) -> bool {
        self.shared.handshake.complete.load(Ordering::Acquire)
    }

    /// Run the opening exchange and adopt the device's header byte.
    pub async fn perform_handshake(&self) -> Result<u8> {
        let mut done = pin!(self.shared.handshake.done.notified());
        done.as_mut().enable();

        let mut hello = vec![0x00];
        hello.extend_from_slice(&protocol::HANDSHAKE_HELLO);
        self.shared
            .write_tx
            .send(hello)
            .await
            .map_err(|_| BridgeError::Disconnected)?;

        if !self.is_handshaken() {
            timeout(protocol::HANDSHAKE_TIMEOUT, done)
                .await
                .map_err(|_| BridgeError::HandshakeTimeout(protocol::HANDSHAKE_TIMEOUT))?;
        }

        let mut confirm = vec![0x00];
        confirm.extend_from_slice(&protocol::HANDSHAKE_CONFIRM);
        self.shared
            .write_tx
            .send(confirm)
            .await
            .map_err(|_| BridgeError::Disconnected)?;

        let header = self.header();
        info!("handshake complete, header byte {header:#04x}");
        Ok(header)
    }

    /// Send one protobuf request and wait for its counter-matched response.
    ///
    /// Requests are serialised: at most one is in flight at a time. Each
    /// attempt waits 5 s; the counter advances on every timeout because the
    /// device consumes the request and advances its own counter whether or
    /// not it answers. Failing to follow would classify every later
    /// response as stale and permanently desynchronise the link.
    pub async fn send_request(
        &self,
        service: LaunchMonitorService,
    ) -> Result<LaunchMonitorService> {
        let _guard = self.request_lock.lock().await;
        let proto = Wrapper::new(service).encode();

        for attempt in 1..=protocol::REQUEST_ATTEMPTS {
            let counter = {
                let mut pending = self.shared.pending.lock().unwrap();
                pending.slot = None;
                pending.counter
            };

            let mut ready = pin!(self.shared.response_ready.notified());
            ready.as_mut().enable();

            let payload = protocol::build_proto_request(counter, &proto);
            self.shared.enqueue_message(&payload).await?;
            trace!(counter, attempt, "request written");

            let wait = async {
                loop {
                    if let Some(response) = self.shared.pending.lock().unwrap().slot.take() {
                        return Ok(response);
                    }
                    if self.cancel.is_cancelled() {
                        return Err(BridgeError::Disconnected);
                    }
                    ready.as_mut().await;
                    ready.set(self.shared.response_ready.notified());
                    ready.as_mut().enable();
                }
            };

            match timeout(protocol::RESPONSE_TIMEOUT, wait).await {
                Ok(result) => {
                    let response = result?;
                    let mut pending = self.shared.pending.lock().unwrap();
                    pending.counter = pending.counter.wrapping_add(1);
                    return Ok(response);
                }
                Err(_) => {
                    let mut pending = self.shared.pending.lock().unwrap();
                    pending.counter = pending.counter.wrapping_add(1);
                    warn!(counter, attempt, "request timed out, counter advanced");
                }
            }
        }
        Err(BridgeError::RequestTimeout {
            attempts: protocol::REQUEST_ATTEMPTS,
        })
    }

    /// Stop all workers and release any waiters.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.shared.response_ready.notify_waiters();
        self.shared.handshake.done.notify_waiters();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.await;
        }
        debug!("session workers stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
        for worker in self.workers.lock().unwrap().drain(..) {
            worker.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

async fn writer_loop(
    transport: Arc<dyn GattTransport>,
    mut write_rx: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = write_rx.recv() => {
                let Some(chunk) = chunk else { break };
                if let Err(err) = transport.write_command(&chunk).await {
                    error!(%err, "GATT write failed");
                }
            }
        }
    }
    trace!("writer stopped");
}

async fn reader_loop(
    shared: Arc<Shared>,
    mut notify_rx: mpsc::Receiver<Vec<u8>>,
    proc_tx: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
) {
    let mut reassembler = Reassembler::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            data = notify_rx.recv() => {
                let Some(data) = data else { break };
                if data.is_empty() {
                    continue;
                }
                let (header, body) = (data[0], &data[1..]);
                if header == 0x00 || !shared.handshake.complete.load(Ordering::Acquire) {
                    advance_handshake(&shared, body);
                    continue;
                }
                if let Some(raw) = reassembler.accept(body) {
                    match frame::decode_frame(&raw) {
                        Ok(payload) => {
                            if proc_tx.send(payload).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            // Drop the frame; the stream resynchronises on
                            // the next start sentinel.
                            warn!(%err, "discarding frame");
                            reassembler.reset();
                        }
                    }
                }
            }
        }
    }
    trace!("reader stopped");
}

fn advance_handshake(shared: &Shared, body: &[u8]) {
    if shared.handshake.complete.load(Ordering::Acquire) {
        return;
    }
    match protocol::parse_handshake_reply(body) {
        Some(header) => {
            shared.handshake.header.store(header, Ordering::Release);
            shared.handshake.complete.store(true, Ordering::Release);
            shared.handshake.done.notify_waiters();
        }
        None => trace!(len = body.len(), "ignoring pre-handshake bytes"),
    }
}

async fn processor_loop(
    shared: Arc<Shared>,
    mut proc_rx: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            payload = proc_rx.recv() => {
                let Some(payload) = payload else { break };
                let kind = protocol::classify(&payload);
                if kind == MessageKind::Unknown {
                    debug!(prefix = ?payload.get(..2), "unclassified message dropped");
                    continue;
                }
                // Acknowledge before dispatch so the device never waits on
                // application work.
                let ack = protocol::build_ack(&payload);
                if let Err(err) = shared.enqueue_message(&ack).await {
                    warn!(%err, "failed to enqueue ack");
                }
                match kind {
                    MessageKind::DeviceInfo => trace!("device-info message acknowledged"),
                    MessageKind::Config => trace!("configuration message acknowledged"),
                    MessageKind::Response => handle_response(&shared, &payload),
                    MessageKind::Request => handle_device_request(&shared, &payload).await,
                    MessageKind::Unknown => unreachable!(),
                }
            }
        }
    }
    trace!("processor stopped");
}

fn handle_response(shared: &Shared, payload: &[u8]) {
    let (Some(counter), Some(body)) = (
        protocol::embedded_counter(payload),
        protocol::proto_body(payload),
    ) else {
        warn!(len = payload.len(), "short response payload");
        return;
    };

    let mut pending = shared.pending.lock().unwrap();
    if pending.counter != counter {
        // The counter was already advanced by a prior timeout; this reply
        // belongs to a request nobody is waiting on.
        debug!(
            counter,
            expected = pending.counter,
            "dropping stale response"
        );
        return;
    }
    match Wrapper::decode(body) {
        Ok(wrapper) => {
            pending.slot = Some(wrapper.service.unwrap_or_default());
            drop(pending);
            shared.response_ready.notify_waiters();
        }
        Err(err) => warn!(%err, "undecodable response body"),
    }
}

async fn handle_device_request(shared: &Shared, payload: &[u8]) {
    let Some(body) = protocol::proto_body(payload) else {
        warn!(len = payload.len(), "short device request payload");
        return;
    };
    let wrapper = match Wrapper::decode(body) {
        Ok(wrapper) => wrapper,
        Err(err) => {
            warn!(%err, "undecodable device request");
            return;
        }
    };
    let Some(mut alert) = wrapper.service.and_then(|s| s.alert_notification) else {
        trace!("device request without alert payload");
        return;
    };

    if let Some(metrics) = &alert.metrics {
        let fresh = shared
            .processed_shots
            .lock()
            .unwrap()
            .insert(metrics.shot_id);
        if !fresh {
            error!(shot_id = metrics.shot_id, "duplicate shot dropped");
            alert.metrics = None;
        }
    }

    if alert != AlertNotification::default() && shared.alert_tx.send(alert).await.is_err() {
        debug!("alert receiver gone");
    }
}
