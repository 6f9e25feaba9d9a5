use thiserror::Error;

/// Literal prefix at the start of every QXW frame.
pub const PREFIX: [u8; 3] = *b"QXW";

/// Size of prefix + command + type + length.
pub const HEADER_LEN: usize = 6;

/// Shortest buffer the parser accepts (prefix + command + type).
const MIN_FRAME_LEN: usize = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("Payload too long: {0} bytes (max 255)")]
    PayloadTooLong(usize),

    #[error("Not a QXW frame: {0}")]
    NotQxw(String),
}

/// A QXW protocol frame.
///
/// Wire format:
/// ```text
/// ['Q'] ['X'] ['W'] [command] [type] [payload_len] [payload...]
/// ```
///
/// The length byte is informational on receive: replies may be padded, so
/// the parser keeps everything after the header as payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QxwPacket {
    command: u8,
    kind: u8,
    /// Length byte as it appeared on the wire (`None` for a 5-byte frame).
    declared_len: Option<u8>,
    payload: Vec<u8>,
}

impl QxwPacket {
    /// Outgoing packet. The payload size is checked against the length byte
    /// at compile time; runtime-sized payloads go through [`build`].
    pub fn fixed<const N: usize>(command: u8, kind: u8, payload: [u8; N]) -> Self {
        const { assert!(N <= u8::MAX as usize) };
        Self {
            command,
            kind,
            declared_len: Some(N as u8),
            payload: payload.to_vec(),
        }
    }

    /// Packet with an empty payload.
    pub fn empty(command: u8, kind: u8) -> Self {
        Self::fixed(command, kind, [])
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    pub fn kind(&self) -> u8 {
        self.kind
    }

    /// Serialize for transmission. A parsed packet may carry more padding than
    /// the length byte can describe, which is refused here.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PacketError> {
        build(self.command, self.kind, Some(&self.payload))
    }

    /// Parse a frame received from the device.
    pub fn from_bytes(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < MIN_FRAME_LEN {
            return Err(PacketError::NotQxw(format!("{} bytes", data.len())));
        }
        if data[..3] != PREFIX {
            return Err(PacketError::NotQxw(format!("prefix {}", hex(&data[..3]))));
        }

        Ok(Self {
            command: data[3],
            kind: data[4],
            declared_len: data.get(5).copied(),
            payload: data.get(HEADER_LEN..).unwrap_or_default().to_vec(),
        })
    }

    /// Reply body as the device lays it out: the length byte followed by the payload.
    pub fn body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(1 + self.payload.len());
        body.extend(self.declared_len);
        body.extend_from_slice(&self.payload);
        body
    }
}

/// Encode a frame: prefix, command, type, payload length, payload.
pub fn build(command: u8, kind: u8, payload: Option<&[u8]>) -> Result<Vec<u8>, PacketError> {
    let payload = payload.unwrap_or_default();
    let len = u8::try_from(payload.len())
        .map_err(|_| PacketError::PayloadTooLong(payload.len()))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&PREFIX);
    frame.push(command);
    frame.push(kind);
    frame.push(len);
    frame.extend_from_slice(payload);
    Ok(frame)
}

impl std::fmt::Display for QxwPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cmd={:02X} type={:02X} len={}",
            self.command,
            self.kind,
            self.payload.len()
        )?;
        if !self.payload.is_empty() {
            write!(f, " {}", hex(&self.payload))?;
        }
        Ok(())
    }
}

/// Space-separated lowercase hex, as printed in TX/RX log lines.
pub fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
