use std::sync::{Arc, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::equalizer::EqState;
use super::info::DeviceInfo;
use super::presets::BuiltinPreset;
use super::{LogLevel, SessionEvent, SessionState};
use crate::bluetooth::{GattTransport, LinkLost, Notifications, TransportError};
use crate::protocol::commands::*;
use crate::protocol::{hex, PacketError, QxwPacket};

/// Pause after every write so the earbuds can keep up.
pub const PACING_DELAY: Duration = Duration::from_millis(300);

/// Pause between stopping notifications and closing the link.
pub const TEARDOWN_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not connected")]
    NotConnected,

    #[error("Cannot connect while {0}")]
    InvalidState(SessionState),

    #[error("Connection interrupted by disconnect")]
    Interrupted,

    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Transport handles held while the session is Ready.
struct Handles<T: GattTransport> {
    transport: Arc<T>,
    link: T::Link,
    write: T::Characteristic,
    notify: T::Characteristic,
    pump: JoinHandle<()>,
}

struct Shared<T: GattTransport> {
    state: watch::Sender<SessionState>,
    handles: Mutex<Option<Handles<T>>>,
    /// Held across write + pacing delay so frames never interleave.
    write_lock: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

/// One connection to a pair of earbuds.
///
/// Drives the connect → discover → subscribe lifecycle, paces outgoing
/// commands, and turns incoming notifications into [`SessionEvent`]s.
/// Cloning yields another handle to the same session.
pub struct DeviceSession<T: GattTransport> {
    shared: Arc<Shared<T>>,
}

impl<T: GattTransport> Clone for DeviceSession<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: GattTransport> Default for DeviceSession<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: GattTransport> DeviceSession<T> {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                state,
                handles: Mutex::new(None),
                write_lock: Mutex::new(()),
                events,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Connect through `transport`, find the EQ service and start notifications.
    ///
    /// On failure the session is back in Disconnected and the caller may try
    /// another transport; nothing is retried here.
    pub async fn connect(&self, transport: T) -> Result<(), SessionError> {
        let shared = &self.shared;
        if !shared.transition(SessionState::Disconnected, SessionState::Connecting) {
            return Err(SessionError::InvalidState(self.state()));
        }

        let transport = Arc::new(transport);
        shared.log(LogLevel::Info, format!("Trying device: {}", transport.describe()));

        let (link, lost) = match transport.connect_link().await {
            Ok(connected) => connected,
            Err(e) => {
                shared.log(LogLevel::Warn, format!("Connect failed for this device: {}", e));
                shared.set_state(SessionState::Disconnected);
                return Err(e.into());
            }
        };
        shared.log(LogLevel::Info, "Link connected");

        if !shared.transition(SessionState::Connecting, SessionState::DiscoveringServices) {
            shared.close_link(&*transport, &link).await;
            return Err(SessionError::Interrupted);
        }

        let (write, notify, notifications) = match discover(&*transport, &link).await {
            Ok(found) => found,
            Err(e) => {
                shared.log(
                    LogLevel::Warn,
                    format!("EQ service not found on this device: {}", e),
                );
                shared.close_link(&*transport, &link).await;
                shared.set_state(SessionState::Disconnected);
                return Err(e.into());
            }
        };
        shared.log(LogLevel::Info, "Notifications started");

        let mut handles = shared.handles.lock().await;
        if !shared.transition(SessionState::DiscoveringServices, SessionState::Ready) {
            drop(handles);
            if let Err(e) = transport.unsubscribe(&notify).await {
                shared.log(LogLevel::Debug, format!("Stop notifications failed: {}", e));
            }
            shared.close_link(&*transport, &link).await;
            return Err(SessionError::Interrupted);
        }
        let pump = tokio::spawn(pump(Arc::downgrade(shared), notifications, lost));
        *handles = Some(Handles {
            transport,
            link,
            write,
            notify,
            pump,
        });
        Ok(())
    }

    /// Write a frame and wait out the pacing delay.
    ///
    /// Sends are queued on an internal lock, so concurrent callers go out
    /// one after another. No reply is awaited.
    pub async fn send_command(&self, packet: &QxwPacket) -> Result<(), SessionError> {
        let frame = packet.to_bytes()?;
        let _guard = self.shared.write_lock.lock().await;

        let (transport, write) = {
            let handles = self.shared.handles.lock().await;
            match handles.as_ref() {
                Some(h) if self.state() == SessionState::Ready => {
                    (h.transport.clone(), h.write.clone())
                }
                _ => {
                    self.shared.log(LogLevel::Warn, "Error: not connected");
                    return Err(SessionError::NotConnected);
                }
            }
        };

        self.shared.log(LogLevel::Debug, format!("TX → {}", hex(&frame)));
        transport.write_without_response(&write, &frame).await?;
        tokio::time::sleep(PACING_DELAY).await;
        Ok(())
    }

    /// Select a preset stored on the earbuds by index.
    pub async fn select_preset(&self, index: u8) -> Result<(), SessionError> {
        let packet = QxwPacket::fixed(CMD_SELECT_EQ, TYPE_REQUEST, [index]);
        self.send_command(&packet).await?;
        self.shared.log(LogLevel::Info, format!("Preset {} selected", index));
        Ok(())
    }

    /// Select a built-in preset. Studio also gets a zeroed custom EQ, which is
    /// what the official app sends with it.
    pub async fn select_builtin(&self, preset: BuiltinPreset) -> Result<(), SessionError> {
        self.select_preset(preset.index()).await?;
        if preset == BuiltinPreset::Studio {
            self.apply_custom_eq(&EqState::new()).await?;
        }
        Ok(())
    }

    /// Send all 8 bands.
    pub async fn apply_custom_eq(&self, eq: &EqState) -> Result<(), SessionError> {
        self.send_command(&eq.custom_eq_packet()).await?;
        self.shared.log(LogLevel::Info, "Custom EQ applied");
        Ok(())
    }

    /// Ask for battery levels and name; the answer arrives as a
    /// [`SessionEvent::DeviceInfo`].
    pub async fn request_device_info(&self) -> Result<(), SessionError> {
        self.send_command(&QxwPacket::empty(CMD_DEVICE_INFO, TYPE_REQUEST))
            .await
    }

    /// Handle a raw notification value. Malformed frames are logged and dropped.
    pub fn on_notification(&self, value: &[u8]) {
        self.shared.handle_notification(value);
    }

    /// Stop notifications, close the link and return to Disconnected.
    ///
    /// Every step is best effort; failures are logged and the session always
    /// ends up Disconnected. The teardown runs on its own task so it completes
    /// even if the caller stops waiting.
    pub async fn disconnect(&self) {
        if self.state() == SessionState::Disconnected {
            debug!("disconnect: already disconnected");
            return;
        }

        let shared = self.shared.clone();
        let teardown = tokio::spawn(async move {
            let handles = shared.handles.lock().await.take();
            if let Some(handles) = handles {
                shared.teardown(handles).await;
            }
            shared.set_state(SessionState::Disconnected);
        });
        if let Err(e) = teardown.await {
            self.shared.log(LogLevel::Error, format!("Teardown task failed: {}", e));
            self.shared.set_state(SessionState::Disconnected);
        }
    }
}

async fn discover<T: GattTransport>(
    transport: &T,
    link: &T::Link,
) -> Result<(T::Characteristic, T::Characteristic, Notifications), TransportError> {
    let service = transport.discover_service(link, SERVICE_UUID).await?;
    let write = transport.characteristic(&service, WRITE_UUID).await?;
    let notify = transport.characteristic(&service, NOTIFY_UUID).await?;
    let notifications = transport.subscribe(&notify).await?;
    Ok((write, notify, notifications))
}

/// Feed notifications to the dispatcher and watch for link loss.
async fn pump<T: GattTransport>(
    shared: Weak<Shared<T>>,
    mut notifications: Notifications,
    mut lost: LinkLost,
) {
    let mut subscribed = true;
    let mut watching = true;

    while subscribed || watching {
        tokio::select! {
            value = notifications.recv(), if subscribed => {
                let Some(shared) = shared.upgrade() else { return };
                match value {
                    Some(value) => shared.handle_notification(&value),
                    None => {
                        shared.log(LogLevel::Warn, "Notification stream closed");
                        subscribed = false;
                    }
                }
            }
            result = &mut lost, if watching => {
                match result {
                    Ok(()) => {
                        if let Some(shared) = shared.upgrade() {
                            shared.release().await;
                        }
                        return;
                    }
                    // Transport can no longer report loss
                    Err(_) => watching = false,
                }
            }
        }
    }
}

impl<T: GattTransport> Shared<T> {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => debug!("{}", message),
            LogLevel::Info => info!("{}", message),
            LogLevel::Warn => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }
        self.emit(SessionEvent::Log { level, message });
    }

    fn set_state(&self, state: SessionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            self.state_changed(state);
        }
    }

    /// Move `from` → `to`; false if the session was not in `from`.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current != from {
                return false;
            }
            *current = to;
            true
        });
        if changed {
            self.state_changed(to);
        }
        changed
    }

    fn state_changed(&self, state: SessionState) {
        info!("Session state: {:?}", state);
        self.emit(SessionEvent::StateChanged(state));
    }

    fn handle_notification(&self, value: &[u8]) {
        self.log(LogLevel::Debug, format!("RX ← {}", hex(value)));

        let packet = match QxwPacket::from_bytes(value) {
            Ok(packet) => packet,
            Err(e) => {
                self.log(LogLevel::Warn, format!("Unknown packet: {}", e));
                return;
            }
        };

        match (packet.command(), packet.kind()) {
            (CMD_DEVICE_INFO, TYPE_REPLY) => match DeviceInfo::parse(&packet.body()) {
                Ok(info) => {
                    self.log(LogLevel::Info, info.to_string());
                    self.emit(SessionEvent::DeviceInfo(info));
                }
                Err(e) => self.log(LogLevel::Warn, e.to_string()),
            },
            (CMD_SELECT_EQ, _) => {
                self.log(LogLevel::Info, "Preset change confirmed");
                self.emit(SessionEvent::PresetConfirmed);
            }
            (CMD_CUSTOM_EQ, _) => {
                self.log(LogLevel::Info, "Custom EQ confirmed");
                self.emit(SessionEvent::CustomEqConfirmed);
            }
            (command, kind) => {
                self.log(LogLevel::Info, format!("Unknown command: 0x{:02x}", command));
                self.emit(SessionEvent::UnknownCommand { command, kind });
            }
        }
    }

    /// Graceful teardown: stop notifications, wait, close the link.
    async fn teardown(&self, handles: Handles<T>) {
        handles.pump.abort();

        match handles.transport.unsubscribe(&handles.notify).await {
            Ok(()) => self.log(LogLevel::Info, "Notifications stopped"),
            Err(e) => self.log(LogLevel::Warn, format!("Stop notifications failed: {}", e)),
        }

        tokio::time::sleep(TEARDOWN_DELAY).await;

        match handles.transport.disconnect_link(&handles.link).await {
            Ok(()) => self.log(LogLevel::Info, "Disconnected"),
            Err(e) => self.log(LogLevel::Warn, format!("Disconnect error: {}", e)),
        }
    }

    /// The device dropped the link: forget the handles without touching the transport.
    async fn release(&self) {
        let handles = self.handles.lock().await.take();
        drop(handles);
        self.log(LogLevel::Info, "Device disconnected");
        self.set_state(SessionState::Disconnected);
    }

    async fn close_link(&self, transport: &T, link: &T::Link) {
        if let Err(e) = transport.disconnect_link(link).await {
            self.log(LogLevel::Debug, format!("Closing link failed: {}", e));
        }
    }
}
