//! Noise-floor estimation.
//!
//! With the disc stationary, the envelope level only moves by electrical
//! noise. Repeated range searches track that motion; the spread between the
//! lowest and highest converged code over the whole window is the
//! per-channel noise amplitude used to size the hysteresis rails.

use lcflow_config::{NoiseCfg, SearchCfg};
use lcflow_traits::{CancelToken, Channel, FrontEnd, PerChannel, Rail};
use tracing::info;

use crate::error::Result;
use crate::util::DAC_FULL_SCALE;

/// Min/max envelope codes and their spread over a measurement window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoiseEstimate {
    pub min: PerChannel<u16>,
    pub max: PerChannel<u16>,
}

impl NoiseEstimate {
    /// Per-channel noise amplitude (max minus min).
    pub fn amplitude(&self) -> PerChannel<u32> {
        PerChannel::from_fn(|ch| u32::from(self.max[ch].saturating_sub(self.min[ch])))
    }
}

/// Measure the stationary noise floor. Each window runs one range search
/// seeded from where the previous one converged, so the searches ride the
/// jitter instead of re-acquiring from scratch.
pub fn measure_noise<F: FrontEnd>(
    fe: &mut F,
    noise_cfg: &NoiseCfg,
    search_cfg: &SearchCfg,
    cancel: &CancelToken,
) -> Result<NoiseEstimate> {
    let mut min = PerChannel::splat(DAC_FULL_SCALE);
    let mut max = PerChannel::splat(0u16);

    for _ in 0..noise_cfg.window_epochs {
        let starts = PerChannel::from_fn(|ch| fe.dac(ch, Rail::High));
        let codes = crate::search::find_dac_range(fe, starts, search_cfg.range, cancel)?;
        for ch in Channel::ALL {
            min[ch] = min[ch].min(codes[ch]);
            max[ch] = max[ch].max(codes[ch]);
        }
    }

    let est = NoiseEstimate { min, max };
    info!(
        ch0 = est.amplitude()[Channel::Ch0],
        ch1 = est.amplitude()[Channel::Ch1],
        ch2 = est.amplitude()[Channel::Ch2],
        "noise floor measured"
    );
    Ok(est)
}
