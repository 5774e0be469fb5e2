#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Calibration and sensing core for the LC flow converter.
//!
//! Three LC resonant sensors watch a half-metal disc; metal in front of a
//! coil damps its ringdown, and a comparator against a DAC threshold turns
//! that into one bit per channel per sampling epoch. This crate owns the
//! algorithms that place and maintain those thresholds:
//!
//! - [`search`]: DAC searches that converge on the envelope level.
//! - [`timing`]: latch-trigger sweep parking each channel mid-tread.
//! - [`noise`]: stationary noise-floor estimation.
//! - [`lock`]: rotation lock and hysteresis rail placement.
//! - [`recal`]: drift re-calibration on the secondary sensing path.
//!
//! [`Calibrator`] strings the stages together over a [`FrontEnd`]
//! implementation and keeps the resulting [`CalState`].

pub mod error;
pub mod lock;
pub mod mocks;
pub mod noise;
pub mod recal;
pub mod search;
pub mod ticker;
pub mod timing;
pub mod util;

pub use error::{CalError, Result};
pub use lock::{LockOutcome, lock_rotation, separation_threshold};
pub use noise::{NoiseEstimate, measure_noise};
pub use recal::{RecalOutcome, RecalSession, RecalTrigger, recalibrate};
pub use search::{find_dac, find_dac_range, find_dac_successive};
pub use ticker::{RecalTicker, TimeoutGuard};
pub use timing::calibrate_timing;

use lcflow_config::{Baselines, Config, Polarity};
use lcflow_traits::{CancelToken, Channel, Display, FrontEnd, LatchTuning, PerChannel, Rail, RotorSense};
use tracing::info;

use crate::util::clamp_dac;

/// Shown on the readout when the stationary calibration stages complete and
/// the operator should start the disc.
pub const CAL_DONE_SENTINEL: u16 = 8888;

/// Map a boxed front-end error into the crate's typed error space.
pub(crate) fn hw_report(e: Box<dyn std::error::Error + Send + Sync>) -> eyre::Report {
    #[cfg(feature = "hardware-errors")]
    if let Some(hw) = e.downcast_ref::<lcflow_hardware::HwError>() {
        return match hw {
            lcflow_hardware::HwError::Disabled => {
                eyre::Report::new(CalError::State("sampling engine disabled".into()))
            }
            other => eyre::Report::new(CalError::Hardware(other.to_string())),
        };
    }
    eyre::Report::new(CalError::Hardware(e.to_string()))
}

/// Place a channel's hysteresis rails around `level`. Under inverted
/// comparator polarity the low rail sits at `level - noise` and the high
/// rail at `level + noise`; non-inverted mirrors the signs.
pub fn apply_hysteresis_rails<F: FrontEnd>(
    fe: &mut F,
    ch: Channel,
    level: i32,
    noise: u32,
    polarity: Polarity,
) -> Result<()> {
    let n = noise as i32;
    let (low, high) = match polarity {
        Polarity::Inverted => (level - n, level + n),
        Polarity::NonInverted => (level + n, level - n),
    };
    fe.set_dac(ch, Rail::Low, clamp_dac(low)).map_err(hw_report)?;
    fe.set_dac(ch, Rail::High, clamp_dac(high)).map_err(hw_report)?;
    Ok(())
}

/// Everything the converter knows after calibration: noise floor,
/// separation thresholds, the primary reference levels the rails sit
/// around, and the secondary-path baseline used for drift estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalState {
    pub polarity: Polarity,
    pub noise: PerChannel<u32>,
    pub separation: PerChannel<u32>,
    /// Envelope midpoints on the primary path; drift corrections are
    /// applied relative to these.
    pub primary_base: PerChannel<i32>,
    /// Seeded secondary-path midpoints.
    pub secondary_base: PerChannel<i32>,
    /// Seeded per-state averages on the metal maxima.
    pub secondary_max: PerChannel<i32>,
    /// Seeded per-state averages on the non-metal minima.
    pub secondary_min: PerChannel<i32>,
    /// Last accepted drift estimate per channel.
    pub drift: PerChannel<i32>,
}

impl CalState {
    pub fn new(polarity: Polarity) -> Self {
        Self {
            polarity,
            noise: PerChannel::splat(0),
            separation: PerChannel::splat(0),
            primary_base: PerChannel::splat(0),
            secondary_base: PerChannel::splat(0),
            secondary_max: PerChannel::splat(0),
            secondary_min: PerChannel::splat(0),
            drift: PerChannel::splat(0),
        }
    }
}

/// Drives the calibration stages over a primary front-end and keeps the
/// resulting state across re-calibration sessions.
pub struct Calibrator<F, D>
where
    F: FrontEnd + LatchTuning,
    D: Display,
{
    fe: F,
    display: D,
    cfg: Config,
    state: CalState,
    calibrated: bool,
}

impl<F, D> Calibrator<F, D>
where
    F: FrontEnd + LatchTuning,
    D: Display,
{
    pub fn new(fe: F, display: D, cfg: Config) -> Result<Self> {
        cfg.validate()?;
        let state = CalState::new(cfg.polarity);
        Ok(Self {
            fe,
            display,
            cfg,
            state,
            calibrated: false,
        })
    }

    /// Full initial calibration. The disc must be stationary through the
    /// timing and noise stages; the sentinel on the display then tells the
    /// operator to start it, and the rotation lock finishes the job.
    pub fn run_init(&mut self, cancel: &CancelToken) -> Result<()> {
        info!("initial calibration started");
        timing::calibrate_timing(&mut self.fe, &self.cfg.timing, cancel)?;

        let estimate = noise::measure_noise(&mut self.fe, &self.cfg.noise, &self.cfg.search, cancel)?;
        self.state.noise = estimate.amplitude();

        self.display.show(CAL_DONE_SENTINEL);

        let lock = lock::lock_rotation(
            &mut self.fe,
            &self.state.noise,
            &self.cfg.lock,
            &self.cfg.search,
            self.cfg.polarity,
            cancel,
        )?;
        self.state.primary_base = lock.base;
        self.state.separation = lock.separation;
        self.calibrated = true;
        info!("initial calibration complete");
        Ok(())
    }

    /// Restore a previous calibration from persisted baselines and place
    /// the rails, skipping the stationary stages.
    pub fn restore(&mut self, baselines: &Baselines) -> Result<()> {
        for ch in Channel::ALL {
            self.state.primary_base[ch] = baselines.base[ch.index()];
            self.state.noise[ch] = baselines.noise[ch.index()];
            self.state.separation[ch] =
                separation_threshold(baselines.noise[ch.index()], self.cfg.lock.separation_factor);
            apply_hysteresis_rails(
                &mut self.fe,
                ch,
                self.state.primary_base[ch],
                self.state.noise[ch],
                self.state.polarity,
            )?;
        }
        self.calibrated = true;
        info!("calibration restored from baselines");
        Ok(())
    }

    /// Export the primary baselines for persistence.
    pub fn baselines(&self) -> Baselines {
        Baselines {
            base: self.state.primary_base.0,
            noise: self.state.noise.0,
        }
    }

    /// Run one re-calibration session on the secondary path.
    pub fn recalibrate<S>(
        &mut self,
        secondary: &mut S,
        trigger: RecalTrigger,
        cancel: &CancelToken,
    ) -> Result<RecalOutcome>
    where
        S: FrontEnd + RotorSense,
    {
        if !self.calibrated {
            return Err(eyre::Report::new(CalError::State(
                "re-calibration before initial calibration".into(),
            )));
        }
        let mut session = RecalSession::new(trigger);
        recal::recalibrate(
            &mut self.fe,
            secondary,
            &mut self.state,
            &mut session,
            &self.cfg.recal,
            &self.cfg.search,
            cancel,
        )
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn state(&self) -> &CalState {
        &self.state
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    pub fn front_end(&self) -> &F {
        &self.fe
    }

    pub fn front_end_mut(&mut self) -> &mut F {
        &mut self.fe
    }
}
