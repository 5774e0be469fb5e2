//! Rotation-lock calibration.
//!
//! With the disc spinning, short bounded bisections track the envelope as
//! metal and non-metal halves sweep past each sensor. A channel is
//! considered locked once the spread between its lowest and highest tracked
//! code clears the separation threshold derived from the noise floor, which
//! rules out mistaking noise for rotation. After all three channels lock,
//! sampling continues for a fixed number of settle passes so at least one
//! full revolution contributes to the min/max envelope before the
//! hysteresis rails are placed.

use lcflow_config::{LockCfg, Polarity, SearchCfg};
use lcflow_traits::{CancelToken, Channel, FrontEnd, PerChannel, Rail};
use tracing::{debug, info};

use crate::error::Result;
use crate::search::find_dac_successive;
use crate::util::{DAC_FULL_SCALE, midpoint};
use crate::apply_hysteresis_rails;

/// Envelope and thresholds produced by a completed rotation lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOutcome {
    /// Midpoint of each channel's envelope; the reference level that drift
    /// corrections are applied against.
    pub base: PerChannel<i32>,
    pub min: PerChannel<u16>,
    pub max: PerChannel<u16>,
    /// Separation threshold each channel had to clear.
    pub separation: PerChannel<u32>,
}

/// Derive the rotation-vs-noise separation threshold from a noise amplitude.
#[inline]
pub fn separation_threshold(noise: u32, factor: u16) -> u32 {
    noise * (u32::from(factor) - 1) + noise / 2
}

/// Track the spinning disc until every channel shows valid separation, then
/// settle and place the hysteresis rails around each envelope midpoint.
///
/// Lock flags latch per channel: once a channel clears its threshold it
/// stays locked even if later passes narrow the observed spread.
pub fn lock_rotation<F: FrontEnd>(
    fe: &mut F,
    noise: &PerChannel<u32>,
    lock_cfg: &LockCfg,
    search_cfg: &SearchCfg,
    polarity: Polarity,
    cancel: &CancelToken,
) -> Result<LockOutcome> {
    let separation =
        PerChannel::from_fn(|ch| separation_threshold(noise[ch], lock_cfg.separation_factor));

    let mut min = PerChannel::splat(DAC_FULL_SCALE);
    let mut max = PerChannel::splat(0u16);
    let mut locked = PerChannel::splat(false);

    let mut passes = 0u32;
    while passes < lock_cfg.settle_passes {
        loop {
            let starts = PerChannel::from_fn(|ch| fe.dac(ch, Rail::High));
            let codes = find_dac_successive(fe, starts, search_cfg.successive_bits, cancel)?;
            for ch in Channel::ALL {
                min[ch] = min[ch].min(codes[ch]);
                max[ch] = max[ch].max(codes[ch]);
                let spread = u32::from(max[ch] - min[ch]);
                if spread > separation[ch] && !locked[ch] {
                    locked[ch] = true;
                    debug!(channel = ch.index(), spread, "separation reached");
                }
            }
            if locked[Channel::Ch0] && locked[Channel::Ch1] && locked[Channel::Ch2] {
                break;
            }
        }
        passes += 1;
    }

    let mut base = PerChannel::splat(0i32);
    for ch in Channel::ALL {
        base[ch] = midpoint(i32::from(min[ch]), i32::from(max[ch]));
        apply_hysteresis_rails(fe, ch, base[ch], noise[ch], polarity)?;
    }

    info!(
        base0 = base[Channel::Ch0],
        base1 = base[Channel::Ch1],
        base2 = base[Channel::Ch2],
        "rotation locked, rails placed"
    );
    Ok(LockOutcome {
        base,
        min,
        max,
        separation,
    })
}
