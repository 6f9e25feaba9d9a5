use std::fmt;

use thiserror::Error;

use crate::protocol::commands::{CMD_CUSTOM_EQ, TYPE_NOTIFY};
use crate::protocol::QxwPacket;

/// Center frequencies of the 8 fixed bands, in Hz.
pub const FREQUENCIES: [u32; BAND_COUNT] = [60, 100, 230, 500, 1100, 2400, 5400, 12000];
pub const BAND_COUNT: usize = 8;

// Gain encoding: (dB * 10) + 120, so 0 dB = 120
pub const GAIN_OFFSET: i32 = 120;
pub const GAIN_SCALE: f64 = 10.0;
pub const GAIN_MIN_DB: f64 = -12.0;
pub const GAIN_MAX_DB: f64 = 13.5;

// Q encoding: Q_real * 10; the device default is Q = 0.7
pub const DEFAULT_Q: u8 = 7;
pub const Q_SCALE: f64 = 10.0;

/// Length of the custom EQ payload: [index, gain, q] per band.
pub const CUSTOM_EQ_PAYLOAD_LEN: usize = BAND_COUNT * 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EqError {
    #[error("Invalid band {0} (must be 0-7)")]
    OutOfRange(usize),

    #[error("Expected 8 bands, got {0}")]
    InvalidPreset(usize),
}

/// Encode gain in dB to the protocol byte.
pub fn encode_gain(db: f64) -> u8 {
    let encoded = (db * GAIN_SCALE).round() as i32 + GAIN_OFFSET;
    encoded.clamp(0, 255) as u8
}

/// Decode a protocol byte to gain in dB.
pub fn decode_gain(byte_val: u8) -> f64 {
    (byte_val as i32 - GAIN_OFFSET) as f64 / GAIN_SCALE
}

/// Encode a Q factor to the protocol byte.
pub fn encode_q(q_real: f64) -> u8 {
    (q_real * Q_SCALE).round().clamp(0.0, 255.0) as u8
}

pub fn decode_q(byte_val: u8) -> f64 {
    byte_val as f64 / Q_SCALE
}

/// Encoded settings of one band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub gain: u8,
    pub q: u8,
}

impl Band {
    pub const FLAT: Band = Band {
        gain: GAIN_OFFSET as u8,
        q: DEFAULT_Q,
    };

    fn encode(gain_db: f64, q_real: f64) -> Self {
        Self {
            gain: encode_gain(gain_db.clamp(GAIN_MIN_DB, GAIN_MAX_DB)),
            q: encode_q(q_real),
        }
    }

    pub fn gain_db(&self) -> f64 {
        decode_gain(self.gain)
    }

    pub fn q_real(&self) -> f64 {
        decode_q(self.q)
    }
}

impl Default for Band {
    fn default() -> Self {
        Self::FLAT
    }
}

/// Current equalizer settings for the 8 bands.
///
/// The device only accepts the full band set, so every change is sent as a
/// complete custom EQ payload built from this state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EqState {
    bands: [Band; BAND_COUNT],
}

impl EqState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn band(&self, index: usize) -> Result<Band, EqError> {
        self.bands
            .get(index)
            .copied()
            .ok_or(EqError::OutOfRange(index))
    }

    pub fn bands(&self) -> &[Band; BAND_COUNT] {
        &self.bands
    }

    /// Set gain and Q of one band. Gain is clamped to the musical range.
    pub fn set_band(&mut self, index: usize, gain_db: f64, q_real: f64) -> Result<(), EqError> {
        let band = self.bands.get_mut(index).ok_or(EqError::OutOfRange(index))?;
        *band = Band::encode(gain_db, q_real);
        Ok(())
    }

    /// Set gain of one band, keeping its Q.
    pub fn set_band_gain(&mut self, index: usize, gain_db: f64) -> Result<(), EqError> {
        let band = self.bands.get_mut(index).ok_or(EqError::OutOfRange(index))?;
        band.gain = encode_gain(gain_db.clamp(GAIN_MIN_DB, GAIN_MAX_DB));
        Ok(())
    }

    /// Set Q of one band, keeping its gain.
    pub fn set_band_q(&mut self, index: usize, q_real: f64) -> Result<(), EqError> {
        let band = self.bands.get_mut(index).ok_or(EqError::OutOfRange(index))?;
        band.q = encode_q(q_real);
        Ok(())
    }

    pub fn set_all_q(&mut self, q_real: f64) {
        let q = encode_q(q_real);
        for band in &mut self.bands {
            band.q = q;
        }
    }

    /// Set every band gain at once, optionally with a shared Q.
    pub fn set_all_gains(&mut self, gains_db: &[f64], q_real: Option<f64>) -> Result<(), EqError> {
        if gains_db.len() != BAND_COUNT {
            return Err(EqError::InvalidPreset(gains_db.len()));
        }
        for (band, &gain_db) in self.bands.iter_mut().zip(gains_db) {
            band.gain = encode_gain(gain_db.clamp(GAIN_MIN_DB, GAIN_MAX_DB));
            if let Some(q) = q_real {
                band.q = encode_q(q);
            }
        }
        Ok(())
    }

    /// Apply a full preset of (gain dB, Q) pairs. Nothing changes unless
    /// exactly 8 entries are given.
    pub fn apply_preset(&mut self, bands: &[(f64, f64)]) -> Result<(), EqError> {
        if bands.len() != BAND_COUNT {
            return Err(EqError::InvalidPreset(bands.len()));
        }
        for (band, &(gain_db, q_real)) in self.bands.iter_mut().zip(bands) {
            *band = Band::encode(gain_db, q_real);
        }
        Ok(())
    }

    /// Back to flat: 0 dB, Q 0.7 on every band.
    pub fn reset(&mut self) {
        self.bands = [Band::FLAT; BAND_COUNT];
    }

    pub fn is_flat(&self) -> bool {
        self.bands.iter().all(|b| *b == Band::FLAT)
    }

    /// Decoded (gain dB, Q) pairs, the inverse of [`EqState::apply_preset`].
    pub fn to_preset(&self) -> Vec<(f64, f64)> {
        self.bands.iter().map(|b| (b.gain_db(), b.q_real())).collect()
    }

    /// `[index, gain, q]` for each band, in index order.
    pub fn encode_command_payload(&self) -> [u8; CUSTOM_EQ_PAYLOAD_LEN] {
        let mut payload = [0u8; CUSTOM_EQ_PAYLOAD_LEN];
        for (i, band) in self.bands.iter().enumerate() {
            payload[i * 3] = i as u8;
            payload[i * 3 + 1] = band.gain;
            payload[i * 3 + 2] = band.q;
        }
        payload
    }

    /// Custom EQ command carrying the whole band set.
    pub fn custom_eq_packet(&self) -> QxwPacket {
        QxwPacket::fixed(CMD_CUSTOM_EQ, TYPE_NOTIFY, self.encode_command_payload())
    }
}

impl fmt::Display for EqState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, band) in self.bands.iter().enumerate() {
            let gain = band.gain_db();
            let bar_len = (gain.abs() * 2.0) as usize;
            let bar = if gain >= 0.0 { "+" } else { "-" }.repeat(bar_len);
            write!(f, "Band {}: {:5}Hz  {:+6.1}dB  [{:>27}]", i, FREQUENCIES[i], gain, bar)?;
            if band.q != DEFAULT_Q {
                write!(f, " Q={:.1}", band.q_real())?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_roundtrip_within_resolution() {
        for step in 0..=255 {
            let db = GAIN_MIN_DB + step as f64 * 0.1;
            if db > GAIN_MAX_DB + 1e-9 {
                break;
            }
            let decoded = decode_gain(encode_gain(db));
            assert!((decoded - db).abs() <= 0.05, "{} -> {}", db, decoded);
        }
    }

    #[test]
    fn test_gain_clamping() {
        assert_eq!(encode_gain(100.0), 255);
        assert_eq!(encode_gain(-100.0), 0);
        assert_eq!(encode_gain(0.0), 120);
        assert_eq!(encode_gain(-10.0), 20);
        assert_eq!(encode_gain(10.0), 220);
    }

    #[test]
    fn test_q_encoding() {
        assert_eq!(encode_q(0.7), 7);
        assert_eq!(encode_q(5.32), 53);
        assert_eq!(encode_q(-1.0), 0);
        assert_eq!(encode_q(1000.0), 255);
        assert!((decode_q(30) - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_set_band_clamps_to_musical_range() {
        let mut eq = EqState::new();
        eq.set_band(0, 20.0, 0.7).unwrap();
        eq.set_band(1, -20.0, 0.7).unwrap();

        assert_eq!(eq.band(0).unwrap().gain, encode_gain(GAIN_MAX_DB));
        assert_eq!(eq.band(1).unwrap().gain, 0);
    }

    #[test]
    fn test_set_band_out_of_range() {
        let mut eq = EqState::new();
        assert_eq!(eq.set_band(8, 1.0, 0.7), Err(EqError::OutOfRange(8)));
        assert_eq!(eq.set_band_gain(9, 1.0), Err(EqError::OutOfRange(9)));
        assert_eq!(eq.set_band_q(42, 1.0), Err(EqError::OutOfRange(42)));
        assert!(eq.is_flat());
    }

    #[test]
    fn test_apply_preset_rtings_treble() {
        let preset = [
            (-2.3, 0.10),
            (4.6, 5.32),
            (6.4, 0.10),
            (3.6, 24.95),
            (-11.0, 0.10),
            (1.8, 17.00),
            (-9.1, 1.70),
            (13.5, 0.10),
        ];
        let mut eq = EqState::new();
        eq.apply_preset(&preset).unwrap();

        let gains: Vec<u8> = eq.bands().iter().map(|b| b.gain).collect();
        let qs: Vec<u8> = eq.bands().iter().map(|b| b.q).collect();
        assert_eq!(gains, vec![97, 166, 184, 156, 10, 138, 29, 255]);
        assert_eq!(qs, vec![1, 53, 1, 250, 1, 170, 17, 1]);

        for (band, &(gain_db, q_real)) in eq.bands().iter().zip(&preset) {
            assert_eq!(band.gain, encode_gain(gain_db));
            assert_eq!(band.q, encode_q(q_real));
        }
    }

    #[test]
    fn test_apply_preset_wrong_count_is_atomic() {
        let mut eq = EqState::new();
        eq.set_band(2, 3.0, 1.0).unwrap();
        let before = eq.clone();

        assert_eq!(eq.apply_preset(&[(1.0, 0.7); 7]), Err(EqError::InvalidPreset(7)));
        assert_eq!(eq.apply_preset(&[(1.0, 0.7); 9]), Err(EqError::InvalidPreset(9)));
        assert_eq!(eq, before);
    }

    #[test]
    fn test_reset() {
        let mut eq = EqState::new();
        eq.set_all_gains(&[3.0; 8], Some(2.0)).unwrap();
        assert!(!eq.is_flat());

        eq.reset();
        assert!(eq.bands().iter().all(|b| b.gain == 120 && b.q == 7));
    }

    #[test]
    fn test_encode_command_payload() {
        let mut eq = EqState::new();
        eq.set_band(0, 3.0, 0.7).unwrap();
        eq.set_band(7, -1.5, 2.0).unwrap();

        let payload = eq.encode_command_payload();
        assert_eq!(&payload[..3], &[0, 150, 7]);
        assert_eq!(&payload[3..6], &[1, 120, 7]);
        assert_eq!(&payload[21..], &[7, 105, 20]);
    }

    #[test]
    fn test_custom_eq_packet() {
        let bytes = EqState::new().custom_eq_packet().to_bytes().unwrap();
        assert_eq!(&bytes[..6], &[0x51, 0x58, 0x57, 0x20, 0x03, 24]);
        assert_eq!(bytes.len(), 30);
    }

    #[test]
    fn test_set_all_q_keeps_gains() {
        let mut eq = EqState::new();
        eq.set_band_gain(4, -6.0).unwrap();
        eq.set_all_q(1.4);

        assert_eq!(eq.band(4).unwrap().gain, 60);
        assert!(eq.bands().iter().all(|b| b.q == 14));
    }

    #[test]
    fn test_to_preset_reapplies_to_same_state() {
        let mut eq = EqState::new();
        eq.set_band_gain(0, 6.3).unwrap();
        eq.set_band_q(7, 3.3).unwrap();

        let mut copy = EqState::new();
        copy.apply_preset(&eq.to_preset()).unwrap();
        assert_eq!(copy, eq);
        assert!(!copy.is_flat());
    }

    #[test]
    fn test_display_marks_non_default_q() {
        let mut eq = EqState::new();
        eq.set_band(1, 2.0, 1.5).unwrap();
        let text = eq.to_string();

        assert_eq!(text.lines().count(), BAND_COUNT);
        assert!(text.lines().nth(1).unwrap().ends_with("Q=1.5"));
        assert!(text.lines().next().unwrap().contains("+0.0dB"));
    }
}
