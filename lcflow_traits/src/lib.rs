pub mod clock;

pub use clock::{Clock, MonotonicClock};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One of the three LC sensing channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Ch0,
    Ch1,
    Ch2,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Ch0, Channel::Ch1, Channel::Ch2];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Channel::Ch0 => 0,
            Channel::Ch1 => 1,
            Channel::Ch2 => 2,
        }
    }
}

/// The two DAC trip points of a channel. During a search both rails carry the
/// same code; the rotation-lock finalization spreads them apart for hysteresis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rail {
    High,
    Low,
}

/// Fixed-size per-channel storage indexed by `Channel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PerChannel<T>(pub [T; 3]);

impl<T> PerChannel<T> {
    pub fn from_fn(mut f: impl FnMut(Channel) -> T) -> Self {
        Self([f(Channel::Ch0), f(Channel::Ch1), f(Channel::Ch2)])
    }

    pub fn splat(v: T) -> Self
    where
        T: Copy,
    {
        Self([v; 3])
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> PerChannel<U> {
        PerChannel([f(&self.0[0]), f(&self.0[1]), f(&self.0[2])])
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, &T)> {
        Channel::ALL.iter().copied().zip(self.0.iter())
    }
}

impl<T> std::ops::Index<Channel> for PerChannel<T> {
    type Output = T;
    #[inline]
    fn index(&self, ch: Channel) -> &T {
        &self.0[ch.index()]
    }
}

impl<T> std::ops::IndexMut<Channel> for PerChannel<T> {
    #[inline]
    fn index_mut(&mut self, ch: Channel) -> &mut T {
        &mut self.0[ch.index()]
    }
}

/// One of the six discrete rotor positions detected per revolution.
///
/// The raw readout is the 3-bit comparator pattern; 0 and 7 are transient
/// (all-clear / all-set) patterns that carry no position information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotorState {
    S1,
    S2,
    S3,
    S4,
    S5,
    S6,
}

impl RotorState {
    /// Decode the 3-bit comparator pattern; `None` for the transient 0/7 patterns.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0x07 {
            0x01 => Some(RotorState::S1),
            0x02 => Some(RotorState::S2),
            0x03 => Some(RotorState::S3),
            0x04 => Some(RotorState::S4),
            0x05 => Some(RotorState::S5),
            0x06 => Some(RotorState::S6),
            _ => None,
        }
    }
}

/// Outcome of waiting for a hardware sampling epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochWait {
    /// The epoch completed and comparator outputs are latched.
    Completed,
    /// The wait was released by a cancellation (timeout guard).
    Cancelled,
}

/// Result of advancing a channel's latch-timing delay by one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchStep {
    /// Delay advanced within the fine slots.
    Advanced,
    /// The fine slots carried into the coarse slot and were reset; any
    /// plateau bookkeeping derived from earlier samples is now stale.
    Wrapped,
}

/// Cooperative cancellation token. An external timer sets it; suspended
/// epoch waits resume and the calibration loop observes it at its next check.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Re-arm the token for a new session.
    #[inline]
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// One analog front-end of the sensing peripheral: six 12-bit DAC registers
/// (two rails per channel), three latched comparator outputs, and an
/// epoch-complete handshake.
///
/// Codes outside [0, 4095] are clamped by the implementation; searches rely
/// on saturation at the rails to detect that a channel has pegged.
pub trait FrontEnd {
    fn set_dac(
        &mut self,
        ch: Channel,
        rail: Rail,
        code: u16,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Read back a DAC register (after clamping).
    fn dac(&self, ch: Channel, rail: Rail) -> u16;

    /// Latched comparator outputs from the last completed epoch, one bit per
    /// channel (bit 0 = ch0).
    fn comparator_bits(&self) -> u8;

    /// Switch the sampling engine on; epochs start completing.
    fn enable(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Switch the sampling engine off.
    fn disable(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Whether the sampling engine is currently enabled.
    fn is_enabled(&self) -> bool;

    /// Suspend until the next epoch completes or `cancel` fires.
    fn await_epoch(
        &mut self,
        cancel: &CancelToken,
    ) -> Result<EpochWait, Box<dyn std::error::Error + Send + Sync>>;
}

/// Rotor position readout, available on the secondary front-end path.
pub trait RotorSense {
    /// Current 6-way rotor state, `None` while the pattern is transient.
    fn rotor_state(&self) -> Option<RotorState>;

    /// Free-running signed transition counter maintained by hardware.
    /// Six transitions per full rotation. Read-only from the core.
    fn rotation_counter(&self) -> i32;
}

/// Latch-trigger timing adjustment. The cascading five-register delay chain
/// is an implementation detail behind this trait; the core only sees unit
/// steps and the carry-out signal.
pub trait LatchTuning {
    /// Advance the channel's latch delay by one unit.
    fn nudge_latch(
        &mut self,
        ch: Channel,
    ) -> Result<LatchStep, Box<dyn std::error::Error + Send + Sync>>;

    /// Step the channel's latch delay back by `units` (clamped at the floor).
    fn retreat_latch(
        &mut self,
        ch: Channel,
        units: u32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// A 4-digit numeric readout.
pub trait Display {
    fn show(&mut self, value: u16);
}
