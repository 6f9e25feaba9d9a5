use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::device::autoeq::with_txt_extension;
use crate::device::equalizer::EqState;

/// Application configuration stored as TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Bluetooth address of the entry that last hosted the EQ service.
    pub device_address: Option<String>,
    /// Name of that entry.
    pub device_name: Option<String>,
    /// Ask for battery/name right after connecting.
    #[serde(default = "default_true")]
    pub request_info_on_connect: bool,
    /// Directory searched for AutoEQ files given by bare name.
    #[serde(default)]
    pub presets_dir: Option<PathBuf>,
    /// (gain dB, Q) of every band as last sent, so single-band edits build on it.
    #[serde(default)]
    pub eq_bands: Option<Vec<(f64, f64)>>,
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_address: None,
            device_name: None,
            request_info_on_connect: true,
            presets_dir: None,
            eq_bands: None,
        }
    }
}

impl AppConfig {
    /// Config file path: ~/.config/fairbuds/config.toml
    pub fn path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fairbuds");
        config_dir.join("config.toml")
    }

    /// Load config from disk, or return defaults.
    pub fn load() -> Self {
        let path = Self::path();
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("Failed to parse config: {}", e),
                },
                Err(e) => tracing::warn!("Failed to read config: {}", e),
            }
        }
        Self::default()
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Save config to disk.
    pub fn save(&self) -> Result<()> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        tracing::info!("Config saved to {}", path.display());
        Ok(())
    }

    /// The EQ sent last time, or flat if none was saved.
    pub fn saved_eq(&self) -> EqState {
        let mut eq = EqState::new();
        if let Some(bands) = &self.eq_bands {
            if let Err(e) = eq.apply_preset(bands) {
                tracing::warn!("Ignoring saved EQ: {}", e);
            }
        }
        eq
    }

    pub fn remember_eq(&mut self, eq: &EqState) {
        self.eq_bands = Some(eq.to_preset());
    }

    /// Resolve an AutoEQ file argument: a path the loader can open is used
    /// as-is, otherwise the name is looked up in `presets_dir`.
    pub fn resolve_preset_file(&self, name: &str) -> PathBuf {
        let direct = PathBuf::from(name);
        if with_txt_extension(&direct).exists() {
            return direct;
        }
        match &self.presets_dir {
            Some(dir) if with_txt_extension(&dir.join(name)).exists() => dir.join(name),
            _ => direct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_missing_fields() {
        let config = AppConfig::parse("device_address = \"AA:BB:CC:DD:EE:FF\"\n").unwrap();
        assert_eq!(config.device_address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert!(config.request_info_on_connect);
        assert_eq!(config.presets_dir, None);
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = AppConfig {
            device_address: Some("AA:BB:CC:DD:EE:FF".into()),
            device_name: Some("Fairbuds".into()),
            request_info_on_connect: false,
            presets_dir: Some(PathBuf::from("/tmp/presets")),
            eq_bands: Some(vec![(1.5, 0.7); 8]),
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(AppConfig::parse(&text).unwrap(), config);
    }

    #[test]
    fn test_saved_eq_roundtrip() {
        let mut eq = EqState::new();
        eq.set_band(3, -4.5, 2.0).unwrap();
        let mut config = AppConfig::default();
        assert!(config.saved_eq().is_flat());

        config.remember_eq(&eq);
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(AppConfig::parse(&text).unwrap().saved_eq(), eq);
    }

    #[test]
    fn test_malformed_saved_eq_falls_back_to_flat() {
        let config = AppConfig {
            eq_bands: Some(vec![(3.0, 0.7); 5]),
            ..Default::default()
        };
        assert!(config.saved_eq().is_flat());
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        assert!(AppConfig::parse("request_info_on_connect = \"yes\"").is_err());
    }

    #[test]
    fn test_resolve_preset_file_uses_presets_dir() {
        let dir = std::env::temp_dir().join(format!("fairbuds-presets-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("dhrme.v2.txt"), "").unwrap();
        let config = AppConfig {
            presets_dir: Some(dir.clone()),
            ..Default::default()
        };

        let resolved = config.resolve_preset_file("dhrme.v2");
        assert_eq!(resolved, dir.join("dhrme.v2"));
        assert!(with_txt_extension(&resolved).exists());

        // Unknown names fall through unchanged so the loader reports them
        assert_eq!(
            config.resolve_preset_file("no_such_preset_here"),
            PathBuf::from("no_such_preset_here")
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
