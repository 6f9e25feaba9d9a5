pub mod autoeq;
pub mod equalizer;
pub mod info;
pub mod presets;
pub mod session;

use std::fmt;

use info::DeviceInfo;

pub use session::{DeviceSession, SessionError};

/// Connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    DiscoveringServices,
    Ready,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "Disconnected"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::DiscoveringServices => write!(f, "Discovering services"),
            SessionState::Ready => write!(f, "Connected"),
        }
    }
}

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted by the device session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Connection state changed.
    StateChanged(SessionState),
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Battery/name reply parsed.
    DeviceInfo(DeviceInfo),
    /// The device acknowledged a preset select.
    PresetConfirmed,
    /// The device acknowledged a custom EQ.
    CustomEqConfirmed,
    /// A well-formed frame with a command we do not handle.
    UnknownCommand { command: u8, kind: u8 },
}
