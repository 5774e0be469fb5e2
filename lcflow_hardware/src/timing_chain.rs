//! Latch-delay encoding: a cascade of four fine slots feeding one coarse
//! slot. Each slot carries a 5-bit delay field in the top bits of its
//! control word, so a slot holds up to 31 delay units; the four fine slots
//! give 124 units before a carry increments the coarse slot and clears
//! them. The calibration core only sees unit steps and the carry-out.

use lcflow_traits::LatchStep;

/// Fine slots per channel.
pub const FINE_SLOTS: usize = 4;

/// Delay units one slot holds before it is full.
pub const UNITS_PER_SLOT: u16 = 31;

/// Total fine units before a carry into the coarse slot.
pub const FINE_CAPACITY: u32 = FINE_SLOTS as u32 * UNITS_PER_SLOT as u32;

/// One delay unit in a slot's control word.
const UNIT_FIELD: u16 = 0x0800;

/// Mask of the delay field within a control word.
const FIELD_MASK: u16 = 0xF800;

/// Per-channel latch-delay state: four fine slots and one coarse slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingChain {
    fine: [u16; FINE_SLOTS],
    coarse: u16,
}

impl TimingChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the delay by one unit. Fills the first non-full fine slot;
    /// when all four are full the carry bumps the coarse slot, clears the
    /// fine slots and reports [`LatchStep::Wrapped`].
    pub fn nudge(&mut self) -> LatchStep {
        for slot in &mut self.fine {
            if *slot < UNITS_PER_SLOT {
                *slot += 1;
                return LatchStep::Advanced;
            }
        }
        self.coarse += 1;
        self.fine = [0; FINE_SLOTS];
        LatchStep::Wrapped
    }

    /// Step the delay back by `units`, draining the most recently filled
    /// slot first and clamping at the fine floor. The coarse slot is never
    /// unwound.
    pub fn retreat(&mut self, units: u32) {
        let mut left = units;
        for slot in self.fine.iter_mut().rev() {
            if left == 0 {
                break;
            }
            let take = u32::from(*slot).min(left);
            *slot -= take as u16;
            left -= take;
        }
    }

    /// Delay units currently held in the fine slots.
    pub fn fine_units(&self) -> u32 {
        self.fine.iter().map(|&s| u32::from(s)).sum()
    }

    pub fn coarse_units(&self) -> u16 {
        self.coarse
    }

    /// Control-word delay fields, coarse slot first, as they would be
    /// written to the sequencer registers.
    pub fn fields(&self) -> [u16; FINE_SLOTS + 1] {
        let mut out = [0u16; FINE_SLOTS + 1];
        out[0] = encode_units(self.coarse.min(UNITS_PER_SLOT));
        for (dst, &slot) in out[1..].iter_mut().zip(self.fine.iter()) {
            *dst = encode_units(slot);
        }
        out
    }
}

/// Delay field for a unit count, saturating at the field's capacity.
#[inline]
fn encode_units(units: u16) -> u16 {
    (units.min(UNITS_PER_SLOT) * UNIT_FIELD) & FIELD_MASK
}
