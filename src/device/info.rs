use thiserror::Error;

/// Minimum size of a device info body.
const MIN_INFO_LEN: usize = 5;

/// Length bytes are only scanned from this offset on; the fixed fields come first.
const NAME_SCAN_START: usize = 5;

/// Names are at most 31 characters.
const MAX_NAME_LEN: usize = 31;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InfoError {
    #[error("Device info payload too short: {0} bytes")]
    PayloadTooShort(usize),
}

/// Battery levels and name parsed from a device info reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub battery_left: u8,
    pub battery_right: u8,
    pub name: Option<String>,
}

impl DeviceInfo {
    /// Parse a device info body.
    ///
    /// Layout: `[reserved, reserved, battery_left, battery_right, ...]`. The
    /// name has no fixed offset; it is stored as a length-prefixed ASCII string
    /// somewhere in the tail, so the body is scanned backwards for the
    /// rightmost length byte followed by that many printable characters.
    pub fn parse(payload: &[u8]) -> Result<Self, InfoError> {
        if payload.len() < MIN_INFO_LEN {
            return Err(InfoError::PayloadTooShort(payload.len()));
        }

        Ok(Self {
            battery_left: payload[2],
            battery_right: payload[3],
            name: find_name(payload),
        })
    }
}

fn find_name(payload: &[u8]) -> Option<String> {
    (NAME_SCAN_START..payload.len()).rev().find_map(|i| {
        let len = payload[i] as usize;
        if len == 0 || len > MAX_NAME_LEN {
            return None;
        }
        let bytes = payload.get(i + 1..i + 1 + len)?;
        bytes
            .iter()
            .all(|b| (0x20..=0x7e).contains(b))
            .then(|| bytes.iter().map(|&b| b as char).collect())
    })
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Battery: L={}% R={}%", self.battery_left, self.battery_right)?;
        if let Some(name) = &self.name {
            write!(f, " Name: {}", name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_battery_and_name() {
        let info = DeviceInfo::parse(&[0x00, 0x00, 55, 60, 0, 3, 0x41, 0x42, 0x43]).unwrap();
        assert_eq!(info.battery_left, 55);
        assert_eq!(info.battery_right, 60);
        assert_eq!(info.name.as_deref(), Some("ABC"));
    }

    #[test]
    fn test_payload_too_short() {
        assert_eq!(
            DeviceInfo::parse(&[0x00, 0x00, 55, 60]),
            Err(InfoError::PayloadTooShort(4))
        );
        assert_eq!(DeviceInfo::parse(&[]), Err(InfoError::PayloadTooShort(0)));
    }

    #[test]
    fn test_no_name_is_not_an_error() {
        let info = DeviceInfo::parse(&[0x00, 0x00, 80, 78, 0x00]).unwrap();
        assert_eq!(info.battery_left, 80);
        assert_eq!(info.name, None);

        // Length byte present but the bytes are not printable
        let info = DeviceInfo::parse(&[0x00, 0x00, 80, 78, 0x00, 0x02, 0x01, 0xFF]).unwrap();
        assert_eq!(info.name, None);
    }

    #[test]
    fn test_prefers_rightmost_length_byte() {
        // Both strings are valid; the one nearer the end wins
        let mut payload = vec![0x00, 0x00, 10, 20, 0x00, 0x08];
        payload.extend_from_slice(b"Fairbuds");
        payload.push(0x02);
        payload.extend_from_slice(b"XY");

        let info = DeviceInfo::parse(&payload).unwrap();
        assert_eq!(info.name.as_deref(), Some("XY"));
    }

    #[test]
    fn test_name_with_trailing_padding() {
        let mut payload = vec![0x01, 0x00, 100, 95, 0x07, 0x08];
        payload.extend_from_slice(b"Fairbuds");
        payload.extend_from_slice(&[0x00, 0x00]);

        let info = DeviceInfo::parse(&payload).unwrap();
        assert_eq!(info.name.as_deref(), Some("Fairbuds"));
    }

    #[test]
    fn test_length_must_fit_and_stay_under_32() {
        // 0x20 (32) is a printable space but too long as a length
        let info = DeviceInfo::parse(&[0, 0, 1, 2, 0, 0x20, 0x41]).unwrap();
        assert_eq!(info.name, None);

        // Length points past the end
        let info = DeviceInfo::parse(&[0, 0, 1, 2, 0, 0x05, 0x41, 0x42]).unwrap();
        assert_eq!(info.name, None);
    }

    #[test]
    fn test_display() {
        let info = DeviceInfo {
            battery_left: 55,
            battery_right: 60,
            name: Some("Fairbuds".into()),
        };
        assert_eq!(info.to_string(), "Battery: L=55% R=60% Name: Fairbuds");
    }
}
