//! BlueZ-backed [`GattTransport`].
//!
//! Two D-Bus connections are involved. A process-wide session handles
//! adapter selection, pairing-agent registration, discovery and connect;
//! a second, dedicated session created after connect carries every GATT
//! operation. Keeping them separate avoids wedging GATT calls on a
//! connection that is still parked inside BlueZ connect machinery.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bluer::agent::{Agent, AgentHandle};
use bluer::gatt::remote::{Characteristic, CharacteristicWriteRequest};
use bluer::gatt::WriteOp;
use bluer::{Adapter, AdapterEvent, Address, Device, Session as DbusSession};
use futures::StreamExt;
use tokio::process::Command;
use tokio::sync::{mpsc, OnceCell};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::{BridgeError, Result};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::GattTransport;

/// Process-wide D-Bus session used for discovery, pairing and connect.
static DBUS: OnceCell<DbusSession> = OnceCell::const_new();
/// Keeps the pairing agent registered for the lifetime of the process.
static AGENT: OnceCell<AgentHandle> = OnceCell::const_new();

async fn dbus_session() -> Result<&'static DbusSession> {
    DBUS.get_or_try_init(|| async {
        DbusSession::new().await.map_err(BridgeError::from)
    })
    .await
}

/// Register a `NoInputNoOutput` pairing agent and make it the default.
///
/// The R10 rejects any pairing attempt carrying the MITM flag, which the
/// default BlueZ agent sets. An agent with no request handlers advertises
/// `NoInputNoOutput` capability and keeps MITM off, letting the in-band
/// pairing triggered by the protected notifier succeed.
async fn register_pairing_agent(session: &DbusSession) -> Result<()> {
    if AGENT.get().is_some() {
        return Ok(());
    }
    let handle = session
        .register_agent(Agent {
            request_default: true,
            ..Default::default()
        })
        .await?;
    if AGENT.set(handle).is_ok() {
        info!("pairing agent registered (NoInputNoOutput, default)");
    }
    Ok(())
}

/// GATT object identifiers of one discovered characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointId {
    pub service_id: u16,
    pub characteristic_id: u16,
}

/// Two-level endpoint cache: `service UUID → characteristic UUID → ids`.
pub type EndpointMap = HashMap<Uuid, HashMap<Uuid, EndpointId>>;

pub struct BluezTransport {
    device: Device,
    endpoints: EndpointMap,
}

impl BluezTransport {
    /// Select the adapter, ensure the device is known, connect, and build
    /// the endpoint cache over a fresh dedicated D-Bus session.
    pub async fn connect(
        adapter_name: Option<&str>,
        address: &str,
        discovery_timeout: Duration,
    ) -> Result<Self> {
        let address = Address::from_str(address).map_err(|_| BridgeError::DeviceNotFound {
            address: address.to_string(),
        })?;

        let session = dbus_session().await?;
        let adapter = select_adapter(session, adapter_name).await?;
        register_pairing_agent(session).await?;

        ensure_device_known(&adapter, address, discovery_timeout).await?;

        let device = adapter.device(address)?;
        connect_device(&device).await?;

        // All GATT traffic goes over its own connection from here on.
        let ops_session = DbusSession::new().await?;
        let ops_adapter = match adapter_name {
            Some(name) => ops_session.adapter(name)?,
            None => ops_session.default_adapter().await?,
        };
        let ops_device = ops_adapter.device(address)?;

        let endpoints = discover_endpoints(&ops_device, adapter.name(), address).await?;
        debug!(services = endpoints.len(), "endpoint cache built");

        Ok(Self {
            device: ops_device,
            endpoints,
        })
    }

    fn endpoint(&self, service: Uuid, characteristic: Uuid) -> Result<EndpointId> {
        self.endpoints
            .get(&service)
            .and_then(|chars| chars.get(&characteristic))
            .copied()
            .ok_or_else(|| BridgeError::ConnectFailed {
                reason: format!("characteristic {characteristic} not found in service {service}"),
                source: None,
            })
    }

    async fn characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<Characteristic> {
        let id = self.endpoint(service, characteristic)?;
        let svc = self.device.service(id.service_id).await?;
        Ok(svc.characteristic(id.characteristic_id).await?)
    }

    async fn start_notify(
        &self,
        service: Uuid,
        characteristic: Uuid,
        tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<()> {
        let ch = self.characteristic(service, characteristic).await?;
        let stream = timeout(protocol::NOTIFY_ENABLE_TIMEOUT, ch.notify())
            .await
            .map_err(|_| BridgeError::NotifyAuthRequired)?
            .map_err(map_auth_error)?;
        tokio::spawn(async move {
            let mut stream = std::pin::pin!(stream);
            while let Some(value) = stream.next().await {
                if tx.send(value).await.is_err() {
                    break;
                }
            }
            trace!(%characteristic, "notification stream ended");
        });
        Ok(())
    }
}

#[async_trait]
impl GattTransport for BluezTransport {
    async fn enable_protected_notifier(&self, tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
        self.start_notify(
            protocol::DEVICE_INTERFACE_SERVICE,
            protocol::DEVICE_INTERFACE_NOTIFIER,
            tx,
        )
        .await
    }

    async fn enable_plain_notifier(
        &self,
        service: Uuid,
        characteristic: Uuid,
        tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<()> {
        self.start_notify(service, characteristic, tx).await
    }

    async fn write_command(&self, data: &[u8]) -> Result<()> {
        let ch = self
            .characteristic(
                protocol::DEVICE_INTERFACE_SERVICE,
                protocol::DEVICE_INTERFACE_WRITER,
            )
            .await?;
        let request = CharacteristicWriteRequest {
            op_type: WriteOp::Command,
            ..Default::default()
        };
        timeout(protocol::WRITE_TIMEOUT, ch.write_ext(data, &request))
            .await
            .map_err(|_| BridgeError::ConnectFailed {
                reason: "GATT write confirmation timed out".to_string(),
                source: None,
            })??;
        Ok(())
    }

    async fn read_value(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>> {
        let ch = self.characteristic(service, characteristic).await?;
        let value = timeout(protocol::READ_TIMEOUT, ch.read())
            .await
            .map_err(|_| BridgeError::ConnectFailed {
                reason: "GATT read timed out".to_string(),
                source: None,
            })??;
        Ok(value)
    }

    async fn wait_disconnected(&self) {
        let mut events = match self.device.events().await {
            Ok(events) => events,
            Err(err) => {
                warn!(%err, "device event stream unavailable, polling");
                loop {
                    sleep(Duration::from_secs(1)).await;
                    if !self.device.is_connected().await.unwrap_or(false) {
                        return;
                    }
                }
            }
        };
        while let Some(event) = events.next().await {
            if let bluer::DeviceEvent::PropertyChanged(bluer::DeviceProperty::Connected(false)) =
                event
            {
                return;
            }
        }
    }
}

fn map_auth_error(err: bluer::Error) -> BridgeError {
    use bluer::ErrorKind;
    match err.kind {
        ErrorKind::AuthenticationFailed
        | ErrorKind::AuthenticationRejected
        | ErrorKind::NotPermitted => BridgeError::NotifyAuthRequired,
        _ => BridgeError::Bluetooth(err),
    }
}

async fn select_adapter(session: &DbusSession, name: Option<&str>) -> Result<Adapter> {
    match name {
        Some(name) => session
            .adapter(name)
            .map_err(|_| BridgeError::AdapterUnavailable(name.to_string())),
        None => session
            .default_adapter()
            .await
            .map_err(|_| BridgeError::AdapterUnavailable("no default adapter".to_string())),
    }
}

/// Check the adapter's known-device set; run a discovery scan if the launch
/// monitor has not been seen yet.
async fn ensure_device_known(
    adapter: &Adapter,
    address: Address,
    discovery_timeout: Duration,
) -> Result<()> {
    if adapter
        .device_addresses()
        .await?
        .iter()
        .any(|a| *a == address)
    {
        return Ok(());
    }

    info!(%address, "device not known, scanning");
    let mut discovery = adapter.discover_devices().await?;
    let scan = async {
        while let Some(event) = discovery.next().await {
            if let AdapterEvent::DeviceAdded(found) = event {
                trace!(%found, "discovered");
                if found == address {
                    return true;
                }
            }
        }
        false
    };
    match timeout(discovery_timeout, scan).await {
        Ok(true) => Ok(()),
        _ => Err(BridgeError::DeviceNotFound {
            address: address.to_string(),
        }),
    }
}

async fn connect_device(device: &Device) -> Result<()> {
    if !device.is_connected().await? {
        device.connect().await.map_err(|err| BridgeError::ConnectFailed {
            reason: "GATT connect failed".to_string(),
            source: Some(Box::new(err)),
        })?;
    }

    // Wait for BlueZ to finish service resolution before touching GATT.
    let deadline = tokio::time::Instant::now() + protocol::SERVICES_RESOLVED_TIMEOUT;
    loop {
        if device.is_services_resolved().await? {
            return Ok(());
        }
        if !device.is_connected().await? {
            return Err(BridgeError::ConnectFailed {
                reason: "device dropped the link during service resolution".to_string(),
                source: None,
            });
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(BridgeError::ConnectFailed {
                reason: "services not resolved within 30s".to_string(),
                source: None,
            });
        }
        sleep(Duration::from_millis(500)).await;
    }
}

/// Build the endpoint cache. Native enumeration is attempted first; if it
/// stalls (some BlueZ stacks wedge the managed-objects call once the
/// connection has been used for a BLE connect), fall back to walking the
/// D-Bus object tree with `busctl` as a subprocess.
async fn discover_endpoints(
    device: &Device,
    adapter_name: &str,
    address: Address,
) -> Result<EndpointMap> {
    match timeout(Duration::from_secs(10), discover_native(device)).await {
        Ok(Ok(map)) if !map.is_empty() => return Ok(map),
        Ok(Ok(_)) => warn!("native GATT enumeration returned nothing"),
        Ok(Err(err)) => warn!(%err, "native GATT enumeration failed"),
        Err(_) => warn!("native GATT enumeration stalled"),
    }
    info!("falling back to busctl tree walk");
    discover_via_busctl(adapter_name, address).await
}

async fn discover_native(device: &Device) -> Result<EndpointMap> {
    let mut map = EndpointMap::new();
    for service in device.services().await? {
        let service_id = service.id();
        let service_uuid = service.uuid().await?;
        let chars = map.entry(service_uuid).or_default();
        for ch in service.characteristics().await? {
            chars.insert(
                ch.uuid().await?,
                EndpointId {
                    service_id,
                    characteristic_id: ch.id(),
                },
            );
        }
    }
    Ok(map)
}

// ---------------------------------------------------------------------------
// busctl fallback
// ---------------------------------------------------------------------------

async fn busctl(args: &[&str]) -> Result<String> {
    let output = Command::new("busctl").args(args).output().await?;
    if !output.status.success() {
        return Err(BridgeError::ConnectFailed {
            reason: format!("busctl {} failed: {}", args.first().unwrap_or(&""), output.status),
            source: None,
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Read a `UUID` property through busctl. Output looks like `s "0000180a-…"`.
async fn busctl_uuid(path: &str, interface: &str) -> Result<Uuid> {
    let out = busctl(&["get-property", "org.bluez", path, interface, "UUID"]).await?;
    let raw = out
        .split('"')
        .nth(1)
        .ok_or_else(|| BridgeError::ConnectFailed {
            reason: format!("unparsable UUID property at {path}"),
            source: None,
        })?;
    Uuid::parse_str(raw).map_err(|_| BridgeError::ConnectFailed {
        reason: format!("invalid UUID {raw} at {path}"),
        source: None,
    })
}

fn object_id(component: &str, prefix: &str) -> Option<u16> {
    u16::from_str_radix(component.strip_prefix(prefix)?, 16).ok()
}

/// Walk `/org/bluez/<hci>/dev_<mac>/serviceYYYY/charZZZZ` object paths.
async fn discover_via_busctl(adapter_name: &str, address: Address) -> Result<EndpointMap> {
    let dev_component = format!("dev_{}", address.to_string().replace(':', "_"));
    let prefix = format!("/org/bluez/{adapter_name}/{dev_component}/");

    let tree = busctl(&["tree", "org.bluez", "--list"]).await?;
    let mut service_uuids: HashMap<u16, Uuid> = HashMap::new();
    let mut map = EndpointMap::new();

    for line in tree.lines() {
        let path = line.trim();
        let Some(rest) = path.strip_prefix(&prefix) else {
            continue;
        };
        let components: Vec<&str> = rest.split('/').collect();
        match components.as_slice() {
            [service] => {
                if let Some(service_id) = object_id(service, "service") {
                    let uuid = busctl_uuid(path, "org.bluez.GattService1").await?;
                    service_uuids.insert(service_id, uuid);
                    map.entry(uuid).or_default();
                }
            }
            [service, ch] => {
                let (Some(service_id), Some(characteristic_id)) =
                    (object_id(service, "service"), object_id(ch, "char"))
                else {
                    continue;
                };
                let Some(service_uuid) = service_uuids.get(&service_id).copied() else {
                    continue;
                };
                let uuid = busctl_uuid(path, "org.bluez.GattCharacteristic1").await?;
                map.entry(service_uuid).or_default().insert(
                    uuid,
                    EndpointId {
                        service_id,
                        characteristic_id,
                    },
                );
            }
            _ => {}
        }
    }

    if map.is_empty() {
        return Err(BridgeError::ConnectFailed {
            reason: "busctl tree walk found no GATT services".to_string(),
            source: None,
        });
    }
    Ok(map)
}

/// Convenience wrapper used by the bridge service.
pub async fn connect_transport(
    adapter_name: Option<&str>,
    address: &str,
    discovery_timeout: Duration,
) -> Result<Arc<dyn GattTransport>> {
    Ok(Arc::new(
        BluezTransport::connect(adapter_name, address, discovery_timeout).await?,
    ))
}
