//! DAC level searches against the latched comparator outputs.
//!
//! Each search drives the six DAC registers (both rails of a channel carry
//! the same code while searching) and converges on the per-channel envelope
//! level using one comparator reading per sampling epoch. A set comparator
//! bit means the DAC code sits above the envelope, so the code must come
//! down; a clear bit means it must go up.
//!
//! The public functions bracket the sampling engine (enable on entry,
//! disable on exit, including error paths). The `*_loop` variants leave the
//! engine untouched for callers that keep it running across many searches.

use lcflow_traits::{CancelToken, Channel, EpochWait, FrontEnd, PerChannel, Rail};
use tracing::trace;

use crate::error::{CalError, Result};
use crate::hw_report;
use crate::util::{DAC_FULL_SCALE, DAC_MID_SCALE, clamp_dac};

/// Resolution of the full bisection search.
pub const BISECTION_BITS: u32 = 12;

fn write_both_rails<F: FrontEnd>(fe: &mut F, ch: Channel, code: u16) -> Result<()> {
    fe.set_dac(ch, Rail::High, code).map_err(hw_report)?;
    fe.set_dac(ch, Rail::Low, code).map_err(hw_report)?;
    Ok(())
}

/// Wait for the next epoch and return the latched comparator bits.
fn next_epoch<F: FrontEnd>(fe: &mut F, cancel: &CancelToken) -> Result<u8> {
    match fe.await_epoch(cancel).map_err(hw_report)? {
        EpochWait::Completed => Ok(fe.comparator_bits()),
        EpochWait::Cancelled => Err(eyre::Report::new(CalError::Timeout)),
    }
}

#[inline]
fn bit_set(bits: u8, ch: Channel) -> bool {
    bits & (1u8 << ch.index()) != 0
}

/// Run `body` with the sampling engine enabled, disabling it again on every
/// exit path. A disable failure on the success path is reported.
fn with_engine<F: FrontEnd, T>(fe: &mut F, body: impl FnOnce(&mut F) -> Result<T>) -> Result<T> {
    fe.enable().map_err(hw_report)?;
    let out = body(fe);
    let off = fe.disable().map_err(hw_report);
    let value = out?;
    off?;
    Ok(value)
}

/// Full 12-bit bisection from mid-scale; one epoch per bit, 12 epochs total.
///
/// Converges on the largest code whose comparator output stays clear, which
/// tracks the current envelope level of each channel.
pub fn find_dac<F: FrontEnd>(fe: &mut F, cancel: &CancelToken) -> Result<PerChannel<u16>> {
    with_engine(fe, |fe| bisection_loop(fe, cancel))
}

pub(crate) fn bisection_loop<F: FrontEnd>(
    fe: &mut F,
    cancel: &CancelToken,
) -> Result<PerChannel<u16>> {
    let mut codes = PerChannel::splat(DAC_MID_SCALE);
    for ch in Channel::ALL {
        write_both_rails(fe, ch, codes[ch])?;
    }

    let mut trial = DAC_MID_SCALE;
    for _ in 0..BISECTION_BITS {
        let bits = next_epoch(fe, cancel)?;
        let next = trial >> 1;
        for ch in Channel::ALL {
            if bit_set(bits, ch) {
                // Code above the envelope: drop this bit, probe the next.
                codes[ch] = (codes[ch] & !trial) | next;
            } else {
                codes[ch] |= next;
            }
            write_both_rails(fe, ch, codes[ch])?;
        }
        trial = next;
    }

    trace!(
        ch0 = codes[Channel::Ch0],
        ch1 = codes[Channel::Ch1],
        ch2 = codes[Channel::Ch2],
        "bisection converged"
    );
    Ok(codes)
}

/// Bounded bisection from per-channel starting points, refining only the
/// `bits` least significant bits. Takes exactly `bits` epochs, which keeps a
/// pass short enough to stay synchronized with a spinning disc.
pub fn find_dac_successive<F: FrontEnd>(
    fe: &mut F,
    starts: PerChannel<u16>,
    bits: u8,
    cancel: &CancelToken,
) -> Result<PerChannel<u16>> {
    with_engine(fe, |fe| successive_loop(fe, starts, bits, cancel))
}

pub(crate) fn successive_loop<F: FrontEnd>(
    fe: &mut F,
    starts: PerChannel<u16>,
    bits: u8,
    cancel: &CancelToken,
) -> Result<PerChannel<u16>> {
    debug_assert!((1..=12).contains(&bits));
    let mut codes = starts.map(|&c| i32::from(c.min(DAC_FULL_SCALE)));
    for ch in Channel::ALL {
        write_both_rails(fe, ch, clamp_dac(codes[ch]))?;
    }

    let mut step = 1i32 << (bits - 1);
    while step > 0 {
        let out = next_epoch(fe, cancel)?;
        for ch in Channel::ALL {
            if bit_set(out, ch) {
                codes[ch] -= step;
            } else {
                codes[ch] += step;
            }
            codes[ch] = i32::from(clamp_dac(codes[ch]));
            write_both_rails(fe, ch, clamp_dac(codes[ch]))?;
        }
        step >>= 1;
    }

    Ok(codes.map(|&c| clamp_dac(c)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// Directional range search from per-channel starting points.
///
/// Two phases: a coarse phase stepping by `range` and a unit phase stepping
/// by one. In each phase a channel walks toward the envelope and completes
/// on the first direction reversal; the reversing step is still applied, so
/// the final code brackets the envelope from the far side. A channel whose
/// code saturates at either rail also completes, so a pegged comparator
/// cannot stall the other channels.
pub fn find_dac_range<F: FrontEnd>(
    fe: &mut F,
    starts: PerChannel<u16>,
    range: u16,
    cancel: &CancelToken,
) -> Result<PerChannel<u16>> {
    with_engine(fe, |fe| range_loop(fe, starts, range, cancel))
}

pub(crate) fn range_loop<F: FrontEnd>(
    fe: &mut F,
    starts: PerChannel<u16>,
    range: u16,
    cancel: &CancelToken,
) -> Result<PerChannel<u16>> {
    let mut codes = starts.map(|&c| i32::from(c.min(DAC_FULL_SCALE)));
    for ch in Channel::ALL {
        write_both_rails(fe, ch, clamp_dac(codes[ch]))?;
    }

    let mut step = i32::from(range.max(1));
    loop {
        let mut seen: PerChannel<Option<Direction>> = PerChannel::splat(None);
        let mut done = PerChannel::splat(false);

        while !(done[Channel::Ch0] && done[Channel::Ch1] && done[Channel::Ch2]) {
            let out = next_epoch(fe, cancel)?;
            for ch in Channel::ALL {
                if done[ch] {
                    continue;
                }
                let dir = if bit_set(out, ch) {
                    Direction::Down
                } else {
                    Direction::Up
                };
                match seen[ch] {
                    Some(prev) if prev != dir => done[ch] = true,
                    _ => seen[ch] = Some(dir),
                }
                codes[ch] += match dir {
                    Direction::Up => step,
                    Direction::Down => -step,
                };
                let clamped = clamp_dac(codes[ch]);
                // Saturation at a rail means the envelope is out of reach in
                // this direction; treat the channel as complete.
                if i32::from(clamped) != codes[ch] || clamped == 0 || clamped == DAC_FULL_SCALE {
                    done[ch] = true;
                }
                codes[ch] = i32::from(clamped);
                write_both_rails(fe, ch, clamped)?;
            }
        }

        if step > 1 {
            // Restart with unit steps to resolve the envelope exactly.
            step = 1;
        } else {
            break;
        }
    }

    Ok(codes.map(|&c| clamp_dac(c)))
}

/// True when `err` is the cooperative-timeout signal from an epoch wait.
pub(crate) fn is_timeout(err: &eyre::Report) -> bool {
    matches!(err.downcast_ref::<CalError>(), Some(CalError::Timeout))
}
