//! Deterministic in-memory doubles used by unit and integration tests.

use lcflow_traits::{
    CancelToken, Channel, EpochWait, FrontEnd, LatchStep, LatchTuning, PerChannel, Rail,
    RotorSense, RotorState,
};

use crate::util::DAC_FULL_SCALE;

type HwResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Comparator model: given the current DAC codes (high rail) and the
/// 1-based epoch index, produce the latched output bits.
pub type ComparatorFn = Box<dyn FnMut(&PerChannel<u16>, u64) -> u8 + Send>;

/// Rotor model: 3-bit state pattern at a given epoch index. Pure function
/// of the epoch so the readout can be queried without mutation.
pub type RotorFn = Box<dyn Fn(u64) -> u8 + Send>;

/// Total fine latch units before the chain carries into the coarse slot.
pub const LATCH_FINE_CAPACITY: u32 = 124;

/// Scriptable front-end double. The comparator closure decides each epoch's
/// latched bits from the codes the search wrote, which is enough to model a
/// quiet channel, a jittering one, or a spinning disc.
pub struct ScriptedFrontEnd {
    dac: PerChannel<[u16; 2]>,
    latched: u8,
    enabled: bool,
    epochs: u64,
    enables: u32,
    disables: u32,
    comparator: ComparatorFn,
    rotor: Option<RotorFn>,
    rotation_counter: i32,
    latch_fine: PerChannel<u32>,
    latch_coarse: PerChannel<u32>,
}

impl ScriptedFrontEnd {
    pub fn new(comparator: ComparatorFn) -> Self {
        Self {
            dac: PerChannel::splat([0, 0]),
            latched: 0,
            enabled: false,
            epochs: 0,
            enables: 0,
            disables: 0,
            comparator,
            rotor: None,
            rotation_counter: 0,
            latch_fine: PerChannel::splat(0),
            latch_coarse: PerChannel::splat(0),
        }
    }

    /// Fixed per-channel envelope levels: a comparator bit reads set while
    /// the channel's code sits above its level.
    pub fn with_levels(levels: PerChannel<u16>) -> Self {
        Self::new(Box::new(move |codes, _| bits_above(codes, &levels)))
    }

    /// Envelope levels that vary per epoch (jitter, rotation).
    pub fn with_level_sequence(
        mut levels: impl FnMut(u64) -> PerChannel<u16> + Send + 'static,
    ) -> Self {
        Self::new(Box::new(move |codes, epoch| {
            bits_above(codes, &levels(epoch))
        }))
    }

    pub fn set_rotor(&mut self, rotor: RotorFn) {
        self.rotor = Some(rotor);
    }

    pub fn set_rotation_counter(&mut self, counter: i32) {
        self.rotation_counter = counter;
    }

    /// Epochs completed so far.
    pub fn epochs(&self) -> u64 {
        self.epochs
    }

    pub fn enables(&self) -> u32 {
        self.enables
    }

    pub fn disables(&self) -> u32 {
        self.disables
    }

    pub fn latch_fine(&self, ch: Channel) -> u32 {
        self.latch_fine[ch]
    }

    pub fn latch_coarse(&self, ch: Channel) -> u32 {
        self.latch_coarse[ch]
    }

    fn rail_index(rail: Rail) -> usize {
        match rail {
            Rail::Low => 0,
            Rail::High => 1,
        }
    }

    fn codes(&self) -> PerChannel<u16> {
        PerChannel::from_fn(|ch| self.dac[ch][1])
    }
}

/// Comparator bits for codes strictly above the given levels.
pub fn bits_above(codes: &PerChannel<u16>, levels: &PerChannel<u16>) -> u8 {
    let mut bits = 0u8;
    for ch in Channel::ALL {
        if codes[ch] > levels[ch] {
            bits |= 1 << ch.index();
        }
    }
    bits
}

impl FrontEnd for ScriptedFrontEnd {
    fn set_dac(&mut self, ch: Channel, rail: Rail, code: u16) -> HwResult<()> {
        self.dac[ch][Self::rail_index(rail)] = code.min(DAC_FULL_SCALE);
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
        self.enables += 1;
        Ok(())
    }

    fn disable(&mut self) -> HwResult<()> {
        self.enabled = false;
        self.disables += 1;
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
            return Err("epoch wait while sampling engine disabled".into());
        }
        self.epochs += 1;
        let codes = self.codes();
        self.latched = (self.comparator)(&codes, self.epochs);
        Ok(EpochWait::Completed)
    }
}

impl RotorSense for ScriptedFrontEnd {
    fn rotor_state(&self) -> Option<RotorState> {
        self.rotor
            .as_ref()
            .and_then(|f| RotorState::from_bits(f(self.epochs)))
    }

    fn rotation_counter(&self) -> i32 {
        self.rotation_counter
    }
}

impl LatchTuning for ScriptedFrontEnd {
    fn nudge_latch(&mut self, ch: Channel) -> HwResult<LatchStep> {
        if self.latch_fine[ch] >= LATCH_FINE_CAPACITY {
            self.latch_fine[ch] = 0;
            self.latch_coarse[ch] += 1;
            Ok(LatchStep::Wrapped)
        } else {
            self.latch_fine[ch] += 1;
            Ok(LatchStep::Advanced)
        }
    }

    fn retreat_latch(&mut self, ch: Channel, units: u32) -> HwResult<()> {
        self.latch_fine[ch] = self.latch_fine[ch].saturating_sub(units);
        Ok(())
    }
}
