//! Small numeric helpers shared by the calibration stages.

/// Full-scale 12-bit DAC code.
pub const DAC_FULL_SCALE: u16 = 0x0FFF;

/// Mid-scale starting point for searches.
pub const DAC_MID_SCALE: u16 = 0x0800;

/// Clamp a signed working value into the 12-bit DAC range.
#[inline]
pub fn clamp_dac(v: i32) -> u16 {
    v.clamp(0, i32::from(DAC_FULL_SCALE)) as u16
}

/// Midpoint of two raw levels, truncating toward the lower one.
#[inline]
pub fn midpoint(lo: i32, hi: i32) -> i32 {
    (lo + hi) / 2
}
