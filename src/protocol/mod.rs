pub mod commands;
pub mod packet;

pub use packet::{hex, PacketError, QxwPacket};
