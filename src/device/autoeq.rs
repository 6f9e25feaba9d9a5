use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use super::equalizer::{BAND_COUNT, GAIN_MAX_DB, GAIN_MIN_DB};

/// Gain offsets that move an EQ measured on the Main preset onto Studio.
pub const MAIN_TO_STUDIO: [f64; BAND_COUNT] = [-1.0, 1.0, 2.0, 3.5, 1.0, -3.0, 1.0, 1.0];

/// One peaking filter from an AutoEQ parametric file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Filter {
    pub frequency: f64,
    pub gain_db: f64,
    pub q: f64,
}

/// Parse an AutoEQ parametric EQ text:
///
/// ```text
/// Preamp: -6.1 dB
/// Filter 1: ON PK Fc 60 Hz Gain -2.8 dB Q 0.17
/// ```
///
/// Exactly 8 enabled PK filters are required; they map to bands 0..7 in
/// file order. Gains outside the device range are clamped.
pub fn parse_parametric(text: &str) -> Result<Vec<Filter>> {
    let mut filters = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if !line.starts_with("Filter") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 12 || parts[2] != "ON" || parts[3] != "PK" {
            debug!("Skipping filter line: {}", line);
            continue;
        }
        let field = |i: usize, what: &str| -> Result<f64> {
            parts[i]
                .parse::<f64>()
                .with_context(|| format!("Invalid {} in '{}'", what, line))
        };
        filters.push(Filter {
            frequency: field(5, "frequency")?,
            gain_db: field(8, "gain")?,
            q: field(11, "Q")?,
        });
    }

    if filters.len() != BAND_COUNT {
        bail!("Expected {} filters, found {}", BAND_COUNT, filters.len());
    }

    for (i, filter) in filters.iter_mut().enumerate() {
        let clamped = filter.gain_db.clamp(GAIN_MIN_DB, GAIN_MAX_DB);
        if clamped != filter.gain_db {
            warn!("Band {}: clamping {:.1} to {:.1}", i, filter.gain_db, clamped);
            filter.gain_db = clamped;
        }
    }

    Ok(filters)
}

/// Read and parse an AutoEQ file. A missing `.txt` extension is added.
pub fn load_parametric(path: &Path) -> Result<Vec<Filter>> {
    let path = with_txt_extension(path);
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_parametric(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

/// The (gain dB, Q) pairs accepted by `EqState::apply_preset`.
pub fn to_bands(filters: &[Filter]) -> Vec<(f64, f64)> {
    filters.iter().map(|f| (f.gain_db, f.q)).collect()
}

/// The path `load_parametric` actually opens for `path`.
pub fn with_txt_extension(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|ext| ext == "txt") {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_owned();
        name.push(".txt");
        PathBuf::from(name)
    }
}

/// Parse an `index:gain` override, where index is the 1-based filter number.
pub fn parse_override(s: &str) -> Result<(usize, f64)> {
    let (index, gain) = s
        .split_once(':')
        .with_context(|| format!("Override '{}' must look like 'index:gain'", s))?;
    let index: usize = index.trim().parse().context("Invalid override index")?;
    let gain: f64 = gain.trim().parse().context("Invalid override gain")?;
    if !(1..=BAND_COUNT).contains(&index) {
        bail!("Override index {} must be 1-{}", index, BAND_COUNT);
    }
    Ok((index, gain))
}

/// Add per-filter gain offsets to every `Filter N:` line, clamping to the
/// device range. Other lines pass through untouched.
pub fn compensate(text: &str, offsets: &[f64; BAND_COUNT]) -> Result<String> {
    let mut out = String::with_capacity(text.len());

    for line in text.lines() {
        if !line.starts_with("Filter") {
            out.push_str(line);
            out.push('\n');
            continue;
        }
        let mut parts: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if parts.len() < 9 {
            bail!("Malformed filter line: {}", line);
        }
        let index: usize = parts[1]
            .trim_end_matches(':')
            .parse()
            .with_context(|| format!("Invalid filter number in '{}'", line))?;
        let offset = index
            .checked_sub(1)
            .and_then(|i| offsets.get(i))
            .with_context(|| format!("Filter number {} out of range", index))?;
        let gain: f64 = parts[8]
            .parse()
            .with_context(|| format!("Invalid gain in '{}'", line))?;

        let new_gain = (gain + offset).clamp(GAIN_MIN_DB, GAIN_MAX_DB);
        parts[8] = format!("{:.1}", new_gain);
        let _ = writeln!(out, "{}", parts.join(" "));
    }

    Ok(out)
}

/// Rewrite an AutoEQ file measured on Main so it sounds right on Studio.
pub fn compensate_file(path: &Path, overrides: &[(usize, f64)]) -> Result<()> {
    let mut offsets = MAIN_TO_STUDIO;
    for &(index, gain) in overrides {
        let offset = index
            .checked_sub(1)
            .and_then(|i| offsets.get_mut(i))
            .with_context(|| format!("Override index {} must be 1-{}", index, BAND_COUNT))?;
        *offset = gain;
    }

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let compensated = compensate(&text, &offsets)?;
    std::fs::write(path, compensated)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
