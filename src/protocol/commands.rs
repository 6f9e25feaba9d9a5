/// Command and type bytes for the QXW protocol, plus the GATT identifiers
/// the Fairbuds expose it on.
use uuid::Uuid;

// Commands
pub const CMD_SELECT_EQ: u8 = 0x10;
pub const CMD_CUSTOM_EQ: u8 = 0x20;
pub const CMD_DEVICE_INFO: u8 = 0x27;

// Frame types
pub const TYPE_REQUEST: u8 = 0x01;
pub const TYPE_REPLY: u8 = 0x02;
pub const TYPE_NOTIFY: u8 = 0x03;

// GATT
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000ff12_0000_1000_8000_00805f9b34fb);
pub const NOTIFY_UUID: Uuid = Uuid::from_u128(0x0000ff13_0000_1000_8000_00805f9b34fb);
pub const WRITE_UUID: Uuid = Uuid::from_u128(0x0000ff14_0000_1000_8000_00805f9b34fb);
