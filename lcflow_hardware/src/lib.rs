#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Front-end implementations for the flow converter.
//!
//! The simulated front-end models the physics the calibration core works
//! against: a decaying LC ringdown sampled through a tunable latch delay
//! (the staircase), stationary electrical jitter, and a spinning half-metal
//! disc that modulates each channel's envelope through six rotor states.
//! It drives the full calibration pipeline in tests and demo runs without
//! the sensing peripheral.

pub mod error;
pub mod timing_chain;

pub use error::HwError;
pub use timing_chain::TimingChain;

use lcflow_traits::{
    CancelToken, Channel, Display, EpochWait, FrontEnd, LatchStep, LatchTuning, PerChannel, Rail,
    RotorSense, RotorState,
};
use tracing::{debug, trace};

type HwResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Physics knobs of the simulated converter.
#[derive(Debug, Clone, Copy)]
pub struct SimProfile {
    /// Envelope level on the first tread of the staircase.
    pub peak: u16,
    /// Level drop between adjacent treads.
    pub tread_drop: u16,
    /// Latch-delay units per tread.
    pub tread_width: u32,
    /// Stationary jitter amplitude.
    pub jitter: u16,
    /// Epochs per jitter half period.
    pub jitter_period: u64,
    /// Envelope modulation depth while the disc spins.
    pub swing: u16,
    /// Epochs the rotor spends in each of the six states.
    pub state_epochs: u64,
    /// Epoch at which the operator starts the motor.
    pub motor_start_epoch: u64,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            peak: 3400,
            tread_drop: 120,
            tread_width: 8,
            jitter: 3,
            jitter_period: 16,
            swing: 200,
            state_epochs: 8,
            motor_start_epoch: 1000,
        }
    }
}

/// Simulated analog front-end covering all three capability traits.
pub struct SimulatedFrontEnd {
    profile: SimProfile,
    dac: PerChannel<[u16; 2]>,
    chains: PerChannel<TimingChain>,
    latched: u8,
    enabled: bool,
    epochs: u64,
}

impl SimulatedFrontEnd {
    pub fn new(profile: SimProfile) -> Self {
        Self {
            profile,
            dac: PerChannel::splat([0, 0]),
            chains: PerChannel::splat(TimingChain::new()),
            latched: 0,
            enabled: false,
            epochs: 0,
        }
    }

    pub fn epochs(&self) -> u64 {
        self.epochs
    }

    pub fn chain(&self, ch: Channel) -> &TimingChain {
        &self.chains[ch]
    }

    fn rail_index(rail: Rail) -> usize {
        match rail {
            Rail::Low => 0,
            Rail::High => 1,
        }
    }

    fn spinning(&self) -> bool {
        self.epochs >= self.profile.motor_start_epoch
    }

    /// Rotor phase 0..6 while the disc spins.
    fn rotor_phase(&self) -> u64 {
        let since = self.epochs - self.profile.motor_start_epoch;
        (since / self.profile.state_epochs) % 6
    }

    /// Envelope level of one channel at the current epoch and latch delay.
    fn level(&self, ch: Channel) -> u16 {
        let p = &self.profile;

        // Latch delay picks the tread of the decaying ringdown.
        let tread = self.chains[ch].fine_units() / p.tread_width;
        let base = p
            .peak
            .saturating_sub(p.tread_drop.saturating_mul(tread.min(31) as u16))
            .max(100);

        if self.spinning() {
            // Each channel sees the metal half of the disc for three of the
            // six states, offset by a third of a turn per channel.
            let phase = (self.rotor_phase() + 2 * ch.index() as u64) % 6;
            if phase < 3 {
                base.saturating_add(p.swing)
            } else {
                base.saturating_sub(p.swing)
            }
        } else {
            let high = (self.epochs / p.jitter_period) % 2 == 0;
            if high {
                base.saturating_add(p.jitter)
            } else {
                base.saturating_sub(p.jitter)
            }
        }
    }
}

impl Default for SimulatedFrontEnd {
    fn default() -> Self {
        Self::new(SimProfile::default())
    }
}

impl FrontEnd for SimulatedFrontEnd {
    fn set_dac(&mut self, ch: Channel, rail: Rail, code: u16) -> HwResult<()> {
        self.dac[ch][Self::rail_index(rail)] = code.min(0x0FFF);
        Ok(())
    }

    fn dac(&self, ch: Channel, rail: Rail) -> u16 {
        self.dac[ch][Self::rail_index(rail)]
    }

    fn comparator_bits(&self) -> u8 {
        self.latched
    }

    fn enable(&mut self) -> HwResult<()> {
        self.enabled = true;
        trace!("sampling engine enabled");
        Ok(())
    }

    fn disable(&mut self) -> HwResult<()> {
        self.enabled = false;
        trace!("sampling engine disabled");
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn await_epoch(&mut self, cancel: &CancelToken) -> HwResult<EpochWait> {
        if cancel.is_cancelled() {
            return Ok(EpochWait::Cancelled);
        }
        if !self.enabled {
            return Err(Box::new(HwError::Disabled));
        }
        self.epochs += 1;
        let mut bits = 0u8;
        for ch in Channel::ALL {
            if self.dac[ch][1] > self.level(ch) {
                bits |= 1 << ch.index();
            }
        }
        self.latched = bits;
        Ok(EpochWait::Completed)
    }
}

impl RotorSense for SimulatedFrontEnd {
    fn rotor_state(&self) -> Option<RotorState> {
        if !self.spinning() {
            return None;
        }
        RotorState::from_bits(self.rotor_phase() as u8 + 1)
    }

    fn rotation_counter(&self) -> i32 {
        if !self.spinning() {
            return 0;
        }
        let since = self.epochs - self.profile.motor_start_epoch;
        (since / (self.profile.state_epochs * 6)) as i32
    }
}

impl LatchTuning for SimulatedFrontEnd {
    fn nudge_latch(&mut self, ch: Channel) -> HwResult<LatchStep> {
        Ok(self.chains[ch].nudge())
    }

    fn retreat_latch(&mut self, ch: Channel, units: u32) -> HwResult<()> {
        self.chains[ch].retreat(units);
        Ok(())
    }
}

/// Four-digit readout that logs what it shows.
#[derive(Debug, Default)]
pub struct SimulatedLcd {
    last: Option<u16>,
}

impl SimulatedLcd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<u16> {
        self.last
    }
}

impl Display for SimulatedLcd {
    fn show(&mut self, value: u16) {
        debug!(value, "display");
        self.last = Some(value);
    }
}
