use std::time::Duration;

use async_trait::async_trait;
use bluer::gatt::remote::{Characteristic, CharacteristicWriteRequest, Service};
use bluer::gatt::WriteOp;
use bluer::{Device, DeviceEvent, DeviceProperty};
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{GattTransport, LinkLost, Notifications, TransportError};

/// How long to wait for BlueZ to finish resolving services after connect.
const SERVICES_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);
const SERVICES_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Background task owned by the transport. Replacing or clearing it aborts
/// the previous one.
#[derive(Default)]
struct TaskSlot(Mutex<Option<JoinHandle<()>>>);

impl TaskSlot {
    async fn set(&self, task: JoinHandle<()>) {
        if let Some(old) = self.0.lock().await.replace(task) {
            old.abort();
        }
    }

    async fn abort(&self) {
        if let Some(task) = self.0.lock().await.take() {
            task.abort();
        }
    }
}

/// GATT transport over BlueZ for a single device.
pub struct BluerTransport {
    device: Device,
    name: Option<String>,
    /// Owns the notify stream.
    notify_task: TaskSlot,
    /// Watches for BlueZ reporting the device gone.
    link_task: TaskSlot,
}

impl BluerTransport {
    pub fn new(device: Device, name: Option<String>) -> Self {
        Self {
            device,
            name,
            notify_task: TaskSlot::default(),
            link_task: TaskSlot::default(),
        }
    }

    async fn wait_services_resolved(&self) -> Result<(), TransportError> {
        let deadline = tokio::time::Instant::now() + SERVICES_RESOLVE_TIMEOUT;
        while !self.device.is_services_resolved().await? {
            if tokio::time::Instant::now() >= deadline {
                warn!("Services of {} not resolved in time", self.device.address());
                break;
            }
            tokio::time::sleep(SERVICES_POLL_INTERVAL).await;
        }
        Ok(())
    }
}

#[async_trait]
impl GattTransport for BluerTransport {
    type Link = Device;
    type Service = Service;
    type Characteristic = Characteristic;

    fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!("{} ({})", name, self.device.address()),
            None => self.device.address().to_string(),
        }
    }

    async fn connect_link(&self) -> Result<(Device, LinkLost), TransportError> {
        if !self.device.is_connected().await? {
            self.device
                .connect()
                .await
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        }
        info!("Link up: {}", self.describe());

        let (lost_tx, lost_rx) = oneshot::channel();
        self.link_task
            .set(tokio::spawn(watch_link(self.device.clone(), lost_tx)))
            .await;
        Ok((self.device.clone(), lost_rx))
    }

    async fn discover_service(&self, link: &Device, uuid: Uuid) -> Result<Service, TransportError> {
        self.wait_services_resolved().await?;
        for service in link.services().await? {
            if service.uuid().await? == uuid {
                return Ok(service);
            }
        }
        Err(TransportError::ServiceNotFound(uuid))
    }

    async fn characteristic(
        &self,
        service: &Service,
        uuid: Uuid,
    ) -> Result<Characteristic, TransportError> {
        for characteristic in service.characteristics().await? {
            if characteristic.uuid().await? == uuid {
                return Ok(characteristic);
            }
        }
        Err(TransportError::CharacteristicNotFound(uuid))
    }

    async fn write_without_response(
        &self,
        characteristic: &Characteristic,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let req = CharacteristicWriteRequest {
            op_type: WriteOp::Command,
            ..Default::default()
        };
        characteristic
            .write_ext(data, &req)
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    async fn subscribe(&self, characteristic: &Characteristic) -> Result<Notifications, TransportError> {
        let (tx, rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = oneshot::channel();
        let characteristic = characteristic.clone();

        // Dropping the notify stream stops notifications, so the stream lives in this task
        let task = tokio::spawn(async move {
            let stream = match characteristic.notify().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            futures::pin_mut!(stream);
            while let Some(value) = stream.next().await {
                if tx.send(value).await.is_err() {
                    break;
                }
            }
            debug!("Notification stream ended");
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                self.notify_task.set(task).await;
                Ok(rx)
            }
            Ok(Err(e)) => Err(TransportError::SubscribeFailed(e.to_string())),
            Err(_) => Err(TransportError::SubscribeFailed(
                "notification task ended".into(),
            )),
        }
    }

    async fn unsubscribe(&self, _characteristic: &Characteristic) -> Result<(), TransportError> {
        self.notify_task.abort().await;
        Ok(())
    }

    async fn disconnect_link(&self, link: &Device) -> Result<(), TransportError> {
        // Closing on our side is not a link loss
        self.link_task.abort().await;
        link.disconnect()
            .await
            .map_err(|e| TransportError::DisconnectFailed(e.to_string()))
    }
}

/// Fire `lost` when BlueZ reports the device as disconnected.
async fn watch_link(device: Device, lost: oneshot::Sender<()>) {
    let events = match device.events().await {
        Ok(events) => events,
        Err(e) => {
            warn!("Cannot watch link state of {}: {}", device.address(), e);
            return;
        }
    };
    futures::pin_mut!(events);

    while let Some(event) = events.next().await {
        if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
            debug!("{} reported disconnected", device.address());
            let _ = lost.send(());
            return;
        }
    }
}
