//! Drift re-calibration on the secondary sensing path.
//!
//! A second analog front-end, kept disabled outside these sessions, re-reads
//! the envelope levels without disturbing the live thresholds on the primary
//! path. Samples are attributed to per-channel min/max accumulators by the
//! rotor state observed when each sample completes; averaged accumulators
//! yield a drift estimate that shifts the primary rails, subject to a sanity
//! bound so one bad session cannot throw the thresholds.

use lcflow_config::{RecalCfg, SearchCfg};
use lcflow_traits::{
    CancelToken, Channel, EpochWait, FrontEnd, PerChannel, Rail, RotorSense, RotorState,
};
use tracing::{debug, info, warn};

use crate::apply_hysteresis_rails;
use crate::error::Result;
use crate::hw_report;
use crate::search::{is_timeout, successive_loop};
use crate::util::{clamp_dac, midpoint};
use crate::CalState;

/// Why a re-calibration session was started. Selects the sample budget,
/// the averaging divisor and what the result is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecalTrigger {
    /// First session after initial calibration; records the secondary-path
    /// baseline and applies nothing.
    Seed,
    /// Cadence-driven background session while the disc may be idle.
    Periodic,
    /// Session piggybacked on a rotor transition while the disc spins.
    RotorEvent,
}

impl RecalTrigger {
    /// Samples to accumulate before the session is valid.
    fn sample_budget(self) -> u32 {
        match self {
            RecalTrigger::Seed => 48,
            RecalTrigger::Periodic => 24,
            RecalTrigger::RotorEvent => 4,
        }
    }

    /// Divisor turning an accumulator sum into an average level. Seed
    /// spreads its budget over six rotor states at eight samples each;
    /// the other modes land four samples per accumulator.
    fn divisor(self) -> i32 {
        match self {
            RecalTrigger::Seed => 8,
            RecalTrigger::Periodic | RecalTrigger::RotorEvent => 4,
        }
    }
}

/// One re-calibration session in flight.
#[derive(Debug)]
pub struct RecalSession {
    trigger: RecalTrigger,
    restart_pending: bool,
}

impl RecalSession {
    pub fn new(trigger: RecalTrigger) -> Self {
        Self {
            trigger,
            restart_pending: false,
        }
    }

    pub fn trigger(&self) -> RecalTrigger {
        self.trigger
    }

    /// Discard samples accumulated so far; the next pass starts a fresh
    /// averaging window. Used when a new trigger arrives mid-session.
    pub fn request_restart(&mut self) {
        self.restart_pending = true;
    }

    fn take_restart(&mut self) -> bool {
        std::mem::take(&mut self.restart_pending)
    }
}

/// How a session ended and what it changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecalOutcome {
    /// The full sample budget was accumulated.
    pub valid: bool,
    /// The timeout guard fired before the budget was met.
    pub timed_out: bool,
    /// Samples taken, including any discarded by a restart.
    pub samples: u32,
    /// Channels whose primary rails were moved.
    pub applied: PerChannel<bool>,
}

#[derive(Debug, Default)]
struct Accumulators {
    max: PerChannel<i32>,
    min: PerChannel<i32>,
}

impl Accumulators {
    fn clear(&mut self) {
        *self = Self::default();
    }

    /// Attribute one converged sample to the accumulator selected by the
    /// rotor state. The mapping assumes clockwise rotation cutting ch0
    /// first: states 1, 2 and 4 sit on metal maxima of ch0, ch1 and ch2;
    /// states 6, 5 and 3 on their minima.
    fn record(&mut self, state: RotorState, codes: &PerChannel<u16>) {
        match state {
            RotorState::S1 => self.max[Channel::Ch0] += i32::from(codes[Channel::Ch0]),
            RotorState::S2 => self.max[Channel::Ch1] += i32::from(codes[Channel::Ch1]),
            RotorState::S3 => self.min[Channel::Ch2] += i32::from(codes[Channel::Ch2]),
            RotorState::S4 => self.max[Channel::Ch2] += i32::from(codes[Channel::Ch2]),
            RotorState::S5 => self.min[Channel::Ch1] += i32::from(codes[Channel::Ch1]),
            RotorState::S6 => self.min[Channel::Ch0] += i32::from(codes[Channel::Ch0]),
        }
    }
}

/// Run one re-calibration session.
///
/// The secondary front-end is enabled for the whole session and disabled on
/// every exit path, timeout included. On timeout the primary thresholds are
/// left untouched and the outcome reports `timed_out`.
pub fn recalibrate<P, S>(
    primary: &mut P,
    secondary: &mut S,
    state: &mut CalState,
    session: &mut RecalSession,
    cfg: &RecalCfg,
    search: &SearchCfg,
    cancel: &CancelToken,
) -> Result<RecalOutcome>
where
    P: FrontEnd,
    S: FrontEnd + RotorSense,
{
    secondary.enable().map_err(hw_report)?;
    let out = session_body(primary, secondary, state, session, cfg, search, cancel);
    let off = secondary.disable().map_err(hw_report);
    let outcome = out?;
    off?;
    Ok(outcome)
}

fn session_body<P, S>(
    primary: &mut P,
    secondary: &mut S,
    state: &mut CalState,
    session: &mut RecalSession,
    cfg: &RecalCfg,
    search: &SearchCfg,
    cancel: &CancelToken,
) -> Result<RecalOutcome>
where
    P: FrontEnd,
    S: FrontEnd + RotorSense,
{
    let trigger = session.trigger();
    let budget = trigger.sample_budget();

    let mut acc = Accumulators::default();
    let mut samples = 0u32;
    let mut valid = false;
    let mut timed_out = false;

    loop {
        // Periodic sessions resume from the drift-corrected secondary base;
        // the others re-acquire from the primary base.
        let starts = match trigger {
            RecalTrigger::Periodic => {
                PerChannel::from_fn(|ch| clamp_dac(state.secondary_base[ch] + state.drift[ch]))
            }
            RecalTrigger::Seed | RecalTrigger::RotorEvent => {
                PerChannel::from_fn(|ch| clamp_dac(state.primary_base[ch]))
            }
        };

        let codes = match successive_loop(secondary, starts, search.successive_bits, cancel) {
            Ok(codes) => codes,
            Err(e) if is_timeout(&e) => {
                timed_out = true;
                break;
            }
            Err(e) => return Err(e),
        };
        samples += 1;

        if trigger != RecalTrigger::RotorEvent && session.take_restart() {
            debug!(samples, "averaging window restarted");
            acc.clear();
        }

        if let Some(rotor) = secondary.rotor_state() {
            acc.record(rotor, &codes);
        }

        if samples == budget {
            valid = true;
            break;
        }

        // Seed and periodic sessions pace themselves to rotor transitions;
        // an event session takes its readings back to back.
        if trigger != RecalTrigger::RotorEvent {
            match secondary.await_epoch(cancel).map_err(hw_report)? {
                EpochWait::Completed => {}
                EpochWait::Cancelled => {
                    timed_out = true;
                    break;
                }
            }
        }

        if cancel.is_cancelled() {
            timed_out = true;
            break;
        }
    }

    let mut applied = PerChannel::splat(false);
    if valid {
        match trigger {
            RecalTrigger::Seed => {
                let div = trigger.divisor();
                state.secondary_max = acc.max.map(|&v| v / div);
                state.secondary_min = acc.min.map(|&v| v / div);
                state.secondary_base =
                    PerChannel::from_fn(|ch| midpoint(state.secondary_min[ch], state.secondary_max[ch]));
                info!(
                    base0 = state.secondary_base[Channel::Ch0],
                    base1 = state.secondary_base[Channel::Ch1],
                    base2 = state.secondary_base[Channel::Ch2],
                    "secondary baseline seeded"
                );
            }
            RecalTrigger::Periodic => {
                let div = trigger.divisor();
                for ch in Channel::ALL {
                    let avg = midpoint(acc.min[ch] / div, acc.max[ch] / div);
                    let drift = avg - state.secondary_base[ch];
                    state.drift[ch] = drift;
                    let level = state.primary_base[ch] + drift;
                    applied[ch] = apply_bounded(primary, ch, level, state, cfg)?;
                }
            }
            RecalTrigger::RotorEvent => {
                // All samples landed in one accumulator; which one depends
                // on where the rotor sits now. Half the estimate is applied
                // to every channel.
                let drift = secondary.rotor_state().map(|rotor| {
                    let div = trigger.divisor();
                    match rotor {
                        RotorState::S1 => acc.max[Channel::Ch0] / div - state.secondary_max[Channel::Ch0],
                        RotorState::S2 => acc.max[Channel::Ch1] / div - state.secondary_max[Channel::Ch1],
                        RotorState::S3 => acc.min[Channel::Ch2] / div - state.secondary_min[Channel::Ch2],
                        RotorState::S4 => acc.max[Channel::Ch2] / div - state.secondary_max[Channel::Ch2],
                        RotorState::S5 => acc.min[Channel::Ch1] / div - state.secondary_min[Channel::Ch1],
                        RotorState::S6 => acc.min[Channel::Ch0] / div - state.secondary_min[Channel::Ch0],
                    }
                });
                match drift {
                    Some(drift) => {
                        // The estimate persists as ch0's running drift, so
                        // the next cadence session resumes from it; ch1 and
                        // ch2 re-derive theirs from their own windows.
                        state.drift[Channel::Ch0] = drift;
                        for ch in Channel::ALL {
                            let level = state.primary_base[ch] + drift / 2;
                            applied[ch] = apply_bounded(primary, ch, level, state, cfg)?;
                        }
                    }
                    None => {
                        debug!("rotor state transient at decision time, thresholds kept");
                    }
                }
            }
        }
    } else if timed_out {
        warn!(samples, ?trigger, "re-calibration timed out, thresholds kept");
    }

    Ok(RecalOutcome {
        valid,
        timed_out,
        samples,
        applied,
    })
}

/// Move a channel's rails to `level` if the correction passes the sanity
/// bound; otherwise leave them and report the skip.
fn apply_bounded<P: FrontEnd>(
    primary: &mut P,
    ch: Channel,
    level: i32,
    state: &CalState,
    cfg: &RecalCfg,
) -> Result<bool> {
    let current = midpoint(
        i32::from(primary.dac(ch, Rail::Low)),
        i32::from(primary.dac(ch, Rail::High)),
    );
    let delta = current - level;
    if delta.abs() < i32::from(cfg.delta_bound) {
        apply_hysteresis_rails(primary, ch, level, state.noise[ch], state.polarity)?;
        Ok(true)
    } else {
        warn!(
            channel = ch.index(),
            delta, "drift correction out of bounds, skipped"
        );
        Ok(false)
    }
}
