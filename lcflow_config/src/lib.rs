#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and baseline parsing for the flow-converter calibration core.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - The baseline CSV loader enforces headers and requires exactly one row
//!   per channel, so a stale or truncated baseline file is rejected up front.
use serde::Deserialize;

/// Comparator polarity of the analog front-end build.
///
/// Selects the sign convention for the hysteresis rails around a channel
/// base level: `Inverted` puts the low rail at `base - noise` and the high
/// rail at `base + noise`; `NonInverted` mirrors the signs.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    #[default]
    Inverted,
    NonInverted,
}

/// DAC search knobs.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct SearchCfg {
    /// Coarse step of the directional range search.
    pub range: u16,
    /// Resolution (iterations) of the bounded bisection used while the disc
    /// is spinning; 5 bits keeps one inner pass short enough to stay
    /// synchronized with rotor motion.
    pub successive_bits: u8,
}

impl Default for SearchCfg {
    fn default() -> Self {
        Self {
            range: 8,
            successive_bits: 5,
        }
    }
}

/// Latch-timing calibration knobs.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct TimingCfg {
    /// Minimum same-plateau run length; equals (sample clock / LC frequency) - 2.
    pub cycle_width: u8,
    /// Raw-unit delta above which two consecutive envelope samples belong to
    /// different treads of the staircase.
    pub plateau_delta: u16,
    /// Envelope level below which samples are ignored (oscillation too decayed).
    pub lc_threshold: u16,
}

impl Default for TimingCfg {
    fn default() -> Self {
        Self {
            cycle_width: 6,
            plateau_delta: 12,
            lc_threshold: 1600,
        }
    }
}

/// Noise-floor estimation knobs.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct NoiseCfg {
    /// Number of range-search windows sampled while the disc is stationary.
    pub window_epochs: u32,
}

impl Default for NoiseCfg {
    fn default() -> Self {
        Self { window_epochs: 234 }
    }
}

/// Rotation-lock calibration knobs.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct LockCfg {
    /// Separation threshold = noise * (factor - 1) + noise / 2.
    pub separation_factor: u16,
    /// Inner-loop passes to keep sampling after valid separation, so at
    /// least one full mechanical rotation contributes to the min/max envelope.
    pub settle_passes: u32,
}

impl Default for LockCfg {
    fn default() -> Self {
        Self {
            separation_factor: 4,
            settle_passes: 468,
        }
    }
}

/// Drift re-calibration knobs.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct RecalCfg {
    /// Largest correction (raw DAC units) accepted in one cycle; larger
    /// corrections are rejected and retried next cycle.
    pub delta_bound: u16,
    /// Cadence of the periodic background recalibration (ms).
    pub cadence_ms: u64,
    /// Timeout guard for one recalibration session (ms).
    pub timeout_ms: u64,
}

impl Default for RecalCfg {
    fn default() -> Self {
        Self {
            delta_bound: 10,
            cadence_ms: 2000,
            timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub polarity: Polarity,
    pub search: SearchCfg,
    pub timing: TimingCfg,
    pub noise: NoiseCfg,
    pub lock: LockCfg,
    pub recal: RecalCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Search
        if self.search.range == 0 {
            eyre::bail!("search.range must be > 0");
        }
        if self.search.range > 2048 {
            eyre::bail!("search.range must be <= 2048 (half of full scale)");
        }
        if self.search.successive_bits == 0 || self.search.successive_bits > 12 {
            eyre::bail!("search.successive_bits must be in 1..=12");
        }

        // Timing
        if self.timing.cycle_width == 0 {
            eyre::bail!("timing.cycle_width must be >= 1");
        }
        if self.timing.plateau_delta == 0 {
            eyre::bail!("timing.plateau_delta must be >= 1");
        }
        if self.timing.lc_threshold > 4095 {
            eyre::bail!("timing.lc_threshold must be a 12-bit value");
        }

        // Noise
        if self.noise.window_epochs == 0 {
            eyre::bail!("noise.window_epochs must be >= 1");
        }

        // Lock
        if self.lock.separation_factor < 2 {
            eyre::bail!("lock.separation_factor must be >= 2");
        }
        if self.lock.settle_passes == 0 {
            eyre::bail!("lock.settle_passes must be >= 1");
        }

        // Recal
        if self.recal.delta_bound == 0 {
            eyre::bail!("recal.delta_bound must be >= 1");
        }
        if self.recal.cadence_ms == 0 {
            eyre::bail!("recal.cadence_ms must be >= 1");
        }
        if self.recal.cadence_ms > 24 * 60 * 60 * 1000 {
            eyre::bail!("recal.cadence_ms is unreasonably large (>24h)");
        }
        if self.recal.timeout_ms == 0 {
            eyre::bail!("recal.timeout_ms must be >= 1");
        }

        Ok(())
    }
}

/// Baseline CSV schema.
///
/// Expected headers:
/// channel,base,noise
///
/// Example:
/// channel,base,noise
/// 0,2048,14
/// 1,2061,11
/// 2,2039,16
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct BaselineRow {
    pub channel: u8,
    pub base: i32,
    pub noise: u32,
}

/// Persisted per-channel calibration baselines (one entry per channel, in
/// channel order).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Baselines {
    pub base: [i32; 3],
    pub noise: [u32; 3],
}

impl TryFrom<Vec<BaselineRow>> for Baselines {
    type Error = eyre::Report;

    fn try_from(rows: Vec<BaselineRow>) -> Result<Self, Self::Error> {
        if rows.len() != 3 {
            eyre::bail!("baselines require exactly three rows, got {}", rows.len());
        }
        let mut base = [0i32; 3];
        let mut noise = [0u32; 3];
        let mut seen = [false; 3];
        for row in rows {
            let idx = usize::from(row.channel);
            if idx > 2 {
                eyre::bail!("baseline channel must be 0, 1 or 2, got {}", row.channel);
            }
            if seen[idx] {
                eyre::bail!("duplicate baseline row for channel {}", row.channel);
            }
            if !(0..=4095).contains(&row.base) {
                eyre::bail!(
                    "baseline base for channel {} out of 12-bit range: {}",
                    row.channel,
                    row.base
                );
            }
            seen[idx] = true;
            base[idx] = row.base;
            noise[idx] = row.noise;
        }
        Ok(Baselines { base, noise })
    }
}

/// Persist baselines in the same strict schema `load_baselines_csv` expects.
pub fn save_baselines_csv(path: &std::path::Path, baselines: &Baselines) -> eyre::Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .map_err(|e| eyre::eyre!("create baselines CSV {:?}: {}", path, e))?;
    wtr.write_record(["channel", "base", "noise"])?;
    for ch in 0..3 {
        wtr.write_record([
            ch.to_string(),
            baselines.base[ch].to_string(),
            baselines.noise[ch].to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn load_baselines_csv(path: &std::path::Path) -> eyre::Result<Baselines> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open baselines CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["channel", "base", "noise"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "baselines CSV must have headers 'channel,base,noise', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<BaselineRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }

    Baselines::try_from(rows)
}
