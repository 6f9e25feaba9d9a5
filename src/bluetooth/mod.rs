pub mod gatt;
#[cfg(test)]
pub mod mock;
pub mod scanner;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Service {0} not found")]
    ServiceNotFound(Uuid),

    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Disconnect failed: {0}")]
    DisconnectFailed(String),

    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] bluer::Error),
}

/// Values received on a subscribed characteristic, in arrival order.
pub type Notifications = mpsc::Receiver<Vec<u8>>;

/// Resolves once when the device drops the link on its own.
pub type LinkLost = oneshot::Receiver<()>;

/// Abstract GATT transport for one remote device.
///
/// This trait enables:
/// - Production implementation over BlueZ
/// - Mock implementation for unit testing the session
#[async_trait]
pub trait GattTransport: Send + Sync + 'static {
    type Link: Send + Sync + 'static;
    type Service: Send + Sync + 'static;
    type Characteristic: Clone + Send + Sync + 'static;

    /// Human readable device description for log lines.
    fn describe(&self) -> String;

    /// Open the link-layer connection.
    async fn connect_link(&self) -> Result<(Self::Link, LinkLost), TransportError>;

    /// Look up a primary service on the connected device.
    async fn discover_service(
        &self,
        link: &Self::Link,
        service: Uuid,
    ) -> Result<Self::Service, TransportError>;

    /// Look up a characteristic within a service.
    async fn characteristic(
        &self,
        service: &Self::Service,
        characteristic: Uuid,
    ) -> Result<Self::Characteristic, TransportError>;

    async fn write_without_response(
        &self,
        characteristic: &Self::Characteristic,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Start notifications. Values arrive on the returned channel.
    async fn subscribe(
        &self,
        characteristic: &Self::Characteristic,
    ) -> Result<Notifications, TransportError>;

    async fn unsubscribe(&self, characteristic: &Self::Characteristic)
        -> Result<(), TransportError>;

    async fn disconnect_link(&self, link: &Self::Link) -> Result<(), TransportError>;
}
