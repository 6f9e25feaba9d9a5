use std::str::FromStr;

use anyhow::bail;

/// Presets stored on the earbuds, selected by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinPreset {
    Main,
    BassBoost,
    Flat,
    /// The only preset whose sound follows the custom EQ bands.
    Studio,
}

impl BuiltinPreset {
    pub const ALL: [BuiltinPreset; 4] = [
        BuiltinPreset::Main,
        BuiltinPreset::BassBoost,
        BuiltinPreset::Flat,
        BuiltinPreset::Studio,
    ];

    /// Index sent in the preset select command.
    pub fn index(self) -> u8 {
        match self {
            BuiltinPreset::Main => 1,
            BuiltinPreset::BassBoost => 2,
            BuiltinPreset::Flat => 3,
            BuiltinPreset::Studio => 4,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.index() == index)
    }

    /// Short name used on the command line.
    pub fn command(self) -> &'static str {
        match self {
            BuiltinPreset::Main => "main",
            BuiltinPreset::BassBoost => "bass",
            BuiltinPreset::Flat => "flat",
            BuiltinPreset::Studio => "studio",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            BuiltinPreset::Main => "Main",
            BuiltinPreset::BassBoost => "Bass boost",
            BuiltinPreset::Flat => "Flat",
            BuiltinPreset::Studio => "Studio",
        }
    }
}

impl FromStr for BuiltinPreset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(index) = s.parse::<u8>() {
            if let Some(preset) = Self::from_index(index) {
                return Ok(preset);
            }
        }
        match Self::ALL.into_iter().find(|p| p.command().eq_ignore_ascii_case(s)) {
            Some(preset) => Ok(preset),
            None => bail!("Unknown preset '{}' (expected main, bass, flat, studio or 1-4)", s),
        }
    }
}

/// An AutoEQ-format preset: (gain dB, Q) for each of the 8 bands.
#[derive(Debug, Clone, Copy)]
pub struct CustomPreset {
    pub name: &'static str,
    pub recommended: bool,
    pub bands: [(f64, f64); 8],
}

/// Variable-Q presets. These need the custom EQ command and the Studio preset.
pub const CUSTOM_PRESETS: &[CustomPreset] = &[
    CustomPreset {
        name: "rtings_treble",
        recommended: true,
        bands: [(-2.3, 0.10), (4.6, 5.32), (6.4, 0.10), (3.6, 24.95), (-11.0, 0.10), (1.8, 17.00), (-9.1, 1.70), (13.5, 0.10)],
    },
    CustomPreset {
        name: "rtings_bass",
        recommended: false,
        bands: [(10.0, 0.80), (5.4, 1.77), (-10.0, 0.17), (5.7, 20.22), (3.8, 0.19), (-0.7, 17.99), (-9.8, 1.45), (4.8, 0.11)],
    },
    CustomPreset {
        name: "dhrme",
        recommended: false,
        bands: [(-2.8, 0.17), (0.0, 7.38), (2.6, 0.17), (-8.8, 0.19), (0.1, 8.94), (8.1, 0.74), (-3.1, 1.73), (6.9, 0.63)],
    },
    CustomPreset {
        name: "dhrme_anc",
        recommended: false,
        bands: [(4.0, 1.33), (1.9, 4.74), (2.7, 0.27), (-9.2, 0.11), (-1.6, 23.97), (13.4, 0.87), (0.6, 12.00), (7.9, 2.22)],
    },
    CustomPreset {
        name: "main-ish",
        recommended: false,
        bands: [(-1.0, 0.71), (1.0, 0.71), (2.0, 0.71), (3.5, 0.71), (1.0, 0.71), (-3.0, 0.71), (1.0, 0.71), (1.0, 0.71)],
    },
];

/// Fixed-Q presets, compatible with the official app's EQ screen.
pub const APP_PRESETS: &[CustomPreset] = &[
    CustomPreset {
        name: "rtings",
        recommended: false,
        bands: [(4.5, 0.71), (1.8, 0.71), (-10.0, 0.71), (0.8, 0.71), (-7.4, 0.71), (10.0, 0.71), (-8.7, 0.71), (6.6, 0.71)],
    },
    CustomPreset {
        name: "dhrme",
        recommended: false,
        bands: [(-0.9, 0.71), (-0.9, 0.71), (-5.0, 0.71), (-1.6, 0.71), (-4.3, 0.71), (7.8, 0.71), (-2.6, 0.71), (9.5, 0.71)],
    },
    CustomPreset {
        name: "dhrme_anc",
        recommended: false,
        bands: [(-2.5, 0.71), (0.3, 0.71), (-7.3, 0.71), (-1.4, 0.71), (-8.8, 0.71), (9.8, 0.71), (-4.7, 0.71), (1.0, 0.71)],
    },
    CustomPreset {
        name: "senorbackdoor",
        recommended: false,
        bands: [(8.0, 0.7), (-2.0, 0.7), (-5.0, 0.7), (2.0, 0.7), (-2.0, 0.7), (8.0, 0.7), (1.0, 0.7), (11.0, 0.7)],
    },
];

/// Look up a bundled preset. `app:` selects from the fixed-Q set.
pub fn find_custom_preset(name: &str) -> Option<&'static CustomPreset> {
    match name.strip_prefix("app:") {
        Some(app_name) => APP_PRESETS.iter().find(|p| p.name == app_name),
        None => CUSTOM_PRESETS.iter().find(|p| p.name == name),
    }
}
