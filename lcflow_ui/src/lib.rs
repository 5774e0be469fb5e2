#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions)]
//! Readout formatting for the converter's 4-digit display.

/// Largest value the 4-digit readout can show.
pub const DISPLAY_MAX: u16 = 9999;

/// Sentinel shown when the stationary calibration stages complete.
pub const CAL_DONE: u16 = 8888;

/// Rotor state transitions per full rotation of the disc.
pub const TRANSITIONS_PER_ROTATION: u32 = 6;

/// Whole rotations from the hardware transition counter. The counter runs
/// signed with the sense of rotation; the readout shows the magnitude.
pub fn rotations_from_counter(counter: i32) -> u32 {
    counter.unsigned_abs() / TRANSITIONS_PER_ROTATION
}

/// Clamp a value into the range the readout can express.
pub fn clamp_display(value: u32) -> u16 {
    value.min(u32::from(DISPLAY_MAX)) as u16
}

/// Decimal digits for the readout, most significant first, zero padded.
pub fn digits(value: u16) -> [u8; 4] {
    let v = value.min(DISPLAY_MAX);
    [
        (v / 1000) as u8,
        (v / 100 % 10) as u8,
        (v / 10 % 10) as u8,
        (v % 10) as u8,
    ]
}
