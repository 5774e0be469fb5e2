//! Latch-trigger timing calibration.
//!
//! The decaying LC oscillation is turned into a staircase by sweeping the
//! latch delay one unit at a time and measuring the envelope level after
//! each step: every oscillation peak contributes one tread. A tread boundary
//! shows up as a sample-to-sample jump larger than `plateau_delta`. Once a
//! tread at least `cycle_width` samples wide has been crossed, stepping back
//! half the run length parks the latch point mid-tread, where the noise
//! margin between adjacent peaks is greatest.

use lcflow_config::TimingCfg;
use lcflow_traits::{CancelToken, Channel, FrontEnd, LatchStep, LatchTuning, PerChannel};
use tracing::{debug, info};

use crate::error::Result;
use crate::hw_report;
use crate::search::find_dac;

#[derive(Debug, Clone, Copy, Default)]
struct ChannelTrack {
    prev: i32,
    run: u32,
    finished: bool,
}

/// Sweep the latch delay of all three channels until each is parked
/// mid-tread. The disc must be stationary.
///
/// Envelope levels at or below `lc_threshold` are skipped for plateau
/// tracking (the oscillation has decayed too far to carry timing
/// information) but the sweep still advances through them.
pub fn calibrate_timing<F>(fe: &mut F, cfg: &TimingCfg, cancel: &CancelToken) -> Result<()>
where
    F: FrontEnd + LatchTuning,
{
    let plateau_delta = i32::from(cfg.plateau_delta);
    let cycle_width = u32::from(cfg.cycle_width);

    let mut tracks: PerChannel<ChannelTrack> = PerChannel::splat(ChannelTrack::default());
    let mut passes = 0u64;

    while tracks.iter().any(|(_, t)| !t.finished) {
        let levels = find_dac(fe, cancel)?;
        passes += 1;

        for ch in Channel::ALL {
            let t = &mut tracks[ch];
            if t.finished {
                continue;
            }

            let level = i32::from(levels[ch]);
            if level > i32::from(cfg.lc_threshold) {
                let delta = (level - t.prev).abs();
                t.run += 1;
                if delta > plateau_delta {
                    if t.run > cycle_width {
                        // Crossed a full tread: back into its middle.
                        fe.retreat_latch(ch, t.run / 2).map_err(hw_report)?;
                        t.finished = true;
                        debug!(channel = ch.index(), run = t.run, "latch parked mid-tread");
                    } else {
                        // Too narrow to be a tread; restart tracking here.
                        t.run = 0;
                        t.prev = level;
                    }
                } else {
                    t.prev = level;
                }
            }

            if !t.finished {
                match fe.nudge_latch(ch).map_err(hw_report)? {
                    LatchStep::Advanced => {}
                    LatchStep::Wrapped => {
                        // Fine slots carried into the coarse slot; earlier
                        // samples no longer share a time base.
                        t.prev = 0;
                        t.run = 0;
                    }
                }
            }
        }
    }

    info!(passes, "latch timing calibrated");
    Ok(())
}
