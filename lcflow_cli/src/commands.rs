//! Command implementations: bring-up calibration, the steady-state rotation
//! display loop, and the self-check probe.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use lcflow_config::{Baselines, Config};
use lcflow_core::{CalError, Calibrator, RecalOutcome, RecalTicker, RecalTrigger, TimeoutGuard};
use lcflow_hardware::{SimProfile, SimulatedFrontEnd, SimulatedLcd};
use lcflow_traits::{CancelToken, Display, FrontEnd, MonotonicClock, RotorSense};
use tracing::{info, warn};

pub type SimCalibrator = Calibrator<SimulatedFrontEnd, SimulatedLcd>;

/// Outcome of a steady-state run, for the final status line.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunReport {
    pub cycles: u64,
    pub rotations: u32,
    pub recals: u32,
    pub rotor_recals: u32,
}

/// Secondary sensing path: same peripheral profile, disc already spinning.
fn spinning_secondary() -> SimulatedFrontEnd {
    SimulatedFrontEnd::new(SimProfile {
        motor_start_epoch: 0,
        ..SimProfile::default()
    })
}

/// Calibrate from scratch, or restore persisted baselines, then seed the
/// secondary-path drift reference.
pub fn bring_up(
    cfg: Config,
    baselines: Option<&Baselines>,
    cancel: &CancelToken,
) -> eyre::Result<(SimCalibrator, SimulatedFrontEnd)> {
    let mut cal = Calibrator::new(SimulatedFrontEnd::default(), SimulatedLcd::new(), cfg)?;
    match baselines {
        Some(b) => cal.restore(b)?,
        None => cal.run_init(cancel)?,
    }

    let mut secondary = spinning_secondary();
    let outcome = cal.recalibrate(&mut secondary, RecalTrigger::Seed, cancel)?;
    if outcome.timed_out {
        return Err(eyre::Report::new(CalError::Timeout));
    }
    info!(samples = outcome.samples, "secondary baseline seeded");
    Ok((cal, secondary))
}

/// One re-calibration session under the one-shot timeout guard.
fn guarded_recal(
    cal: &mut SimCalibrator,
    secondary: &mut SimulatedFrontEnd,
    trigger: RecalTrigger,
    timeout: Duration,
    cancel: &CancelToken,
) -> eyre::Result<RecalOutcome> {
    cancel.reset();
    let guard = TimeoutGuard::arm(timeout, MonotonicClock::new(), cancel.clone())?;
    let outcome = cal.recalibrate(secondary, trigger, cancel)?;
    guard.disarm();
    Ok(outcome)
}

/// Steady state: show whole rotations on the readout, run a periodic drift
/// re-calibration on the ticker cadence, and an event-synchronized one each
/// time the rotor is seen in a new state. The hardware rotation counter is
/// never written, so re-calibration cannot lose count.
pub fn run_steady(
    cal: &mut SimCalibrator,
    secondary: &mut SimulatedFrontEnd,
    cycles: u64,
    shutdown: &Arc<AtomicBool>,
    cancel: &CancelToken,
) -> eyre::Result<RunReport> {
    let recal_cfg = cal.config().recal;
    let timeout = Duration::from_millis(recal_cfg.timeout_ms);
    let ticker = RecalTicker::spawn(
        Duration::from_millis(recal_cfg.cadence_ms),
        MonotonicClock::new(),
    )?;

    let mut report = RunReport::default();
    let mut last_rotor = secondary.rotor_state();
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("shutdown requested, leaving steady state");
            break;
        }
        if cycles != 0 && report.cycles >= cycles {
            break;
        }

        if ticker.due() {
            let outcome = guarded_recal(cal, secondary, RecalTrigger::Periodic, timeout, cancel)?;
            if outcome.timed_out {
                warn!("periodic re-calibration timed out, keeping previous thresholds");
            } else {
                report.recals += 1;
            }
        }

        // A transition since the last look means the disc is spinning; the
        // event-mode session reads the envelope the new state exposes.
        let rotor = secondary.rotor_state();
        if last_rotor.zip(rotor).is_some_and(|(prev, cur)| prev != cur) {
            let outcome =
                guarded_recal(cal, secondary, RecalTrigger::RotorEvent, timeout, cancel)?;
            if outcome.timed_out {
                warn!("rotor-event re-calibration timed out, keeping previous thresholds");
            } else {
                report.rotor_recals += 1;
            }
        }
        last_rotor = secondary.rotor_state();

        report.rotations = lcflow_ui::rotations_from_counter(secondary.rotation_counter());
        cal.display_mut()
            .show(lcflow_ui::clamp_display(report.rotations));

        report.cycles += 1;
        std::thread::sleep(Duration::from_millis(10));
    }

    Ok(report)
}

/// Probe the front-end: the sampling engine must come up, complete a few
/// epochs, and shut down again.
pub fn self_check(cancel: &CancelToken) -> eyre::Result<()> {
    let mut fe = SimulatedFrontEnd::default();
    fe.enable()
        .map_err(|e| eyre::eyre!("self-check enable: {e}"))?;
    for _ in 0..3 {
        fe.await_epoch(cancel)
            .map_err(|e| eyre::eyre!("self-check epoch wait: {e}"))?;
    }
    let bits = fe.comparator_bits();
    fe.disable()
        .map_err(|e| eyre::eyre!("self-check disable: {e}"))?;
    info!(comparator_bits = bits, "front-end self-check passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> Config {
        let mut cfg = Config::default();
        cfg.noise.window_epochs = 30;
        cfg.lock.settle_passes = 20;
        cfg.recal.cadence_ms = 5;
        cfg.recal.timeout_ms = 500;
        cfg
    }

    #[test]
    fn steady_loop_dispatches_both_recal_modes() {
        let cancel = CancelToken::new();
        let (mut cal, mut secondary) = bring_up(fast_config(), None, &cancel).unwrap();
        let shutdown = Arc::new(AtomicBool::new(false));

        let report = run_steady(&mut cal, &mut secondary, 60, &shutdown, &cancel).unwrap();

        assert_eq!(report.cycles, 60);
        assert!(report.recals >= 1, "no cadence session ran");
        // Each cadence session moves the secondary by an epoch count that is
        // not a whole number of rotor revolutions, so transitions keep
        // surfacing and the event-synchronized mode runs as well.
        assert!(report.rotor_recals >= 1, "no event session ran");
    }

    #[test]
    fn shutdown_flag_leaves_the_loop_early() {
        let cancel = CancelToken::new();
        let (mut cal, mut secondary) = bring_up(fast_config(), None, &cancel).unwrap();
        let shutdown = Arc::new(AtomicBool::new(true));

        let report = run_steady(&mut cal, &mut secondary, 0, &shutdown, &cancel).unwrap();

        assert_eq!(report.cycles, 0);
    }
}
