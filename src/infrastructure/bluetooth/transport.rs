//! Transport abstraction over the host's GATT surface.
//!
//! The session and command layers only ever see this trait, so the whole
//! protocol engine runs unmodified against a test double.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;

/// Operations a session needs from the GATT layer.
///
/// # Ordering constraint
///
/// [`enable_protected_notifier`](GattTransport::enable_protected_notifier)
/// MUST be the first GATT operation after connect. The device-interface
/// notifier requires authentication; if any other read or notify-enable
/// goes first, the host controller hangs on the subsequent attempt to
/// enable it and the session can only be recovered by reconnecting.
#[async_trait]
pub trait GattTransport: Send + Sync {
    /// Enable notifications on the protected device-interface notifier and
    /// forward every notification into `tx`.
    ///
    /// Installing the CCCD triggers in-band pairing when no bond exists yet,
    /// so this may take up to the 30 s notify-enable timeout.
    async fn enable_protected_notifier(&self, tx: mpsc::Sender<Vec<u8>>) -> Result<()>;

    /// Enable notifications on an unprotected characteristic.
    async fn enable_plain_notifier(
        &self,
        service: Uuid,
        characteristic: Uuid,
        tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<()>;

    /// Write-without-response on the device-interface writer characteristic.
    async fn write_command(&self, data: &[u8]) -> Result<()>;

    /// Read a characteristic value.
    async fn read_value(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>>;

    /// Resolves once the peer drops the link.
    async fn wait_disconnected(&self);
}
