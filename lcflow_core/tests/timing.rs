use lcflow_core::calibrate_timing;
use lcflow_config::TimingCfg;
use lcflow_traits::{
    CancelToken, Channel, EpochWait, FrontEnd, LatchStep, LatchTuning, PerChannel, Rail,
};

type HwResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Front-end whose envelope level depends on the latch delay: sweeping the
/// delay walks down a staircase, one tread per oscillation peak.
struct StaircaseRig {
    dac: PerChannel<[u16; 2]>,
    latched: u8,
    enabled: bool,
    fine: PerChannel<u32>,
    coarse: PerChannel<u32>,
    fine_capacity: u32,
    level: fn(fine: u32, coarse: u32) -> u16,
}

impl StaircaseRig {
    fn new(fine_capacity: u32, level: fn(u32, u32) -> u16) -> Self {
        Self {
            dac: PerChannel::splat([0, 0]),
            latched: 0,
            enabled: false,
            fine: PerChannel::splat(0),
            coarse: PerChannel::splat(0),
            fine_capacity,
            level,
        }
    }

    fn rail_index(rail: Rail) -> usize {
        match rail {
            Rail::Low => 0,
            Rail::High => 1,
        }
    }
}

impl FrontEnd for StaircaseRig {
    fn set_dac(&mut self, ch: Channel, rail: Rail, code: u16) -> HwResult<()> {
        self.dac[ch][Self::rail_index(rail)] = code.min(4095);
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
        Ok(())
    }

    fn disable(&mut self) -> HwResult<()> {
        self.enabled = false;
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
        let mut bits = 0u8;
        for ch in Channel::ALL {
            let level = (self.level)(self.fine[ch], self.coarse[ch]);
            if self.dac[ch][1] > level {
                bits |= 1 << ch.index();
            }
        }
        self.latched = bits;
        Ok(EpochWait::Completed)
    }
}

impl LatchTuning for StaircaseRig {
    fn nudge_latch(&mut self, ch: Channel) -> HwResult<LatchStep> {
        if self.fine[ch] >= self.fine_capacity {
            self.fine[ch] = 0;
            self.coarse[ch] += 1;
            Ok(LatchStep::Wrapped)
        } else {
            self.fine[ch] += 1;
            Ok(LatchStep::Advanced)
        }
    }

    fn retreat_latch(&mut self, ch: Channel, units: u32) -> HwResult<()> {
        self.fine[ch] = self.fine[ch].saturating_sub(units);
        Ok(())
    }
}

/// Eight delay units per tread, 120 raw units between treads, well above
/// the decay threshold.
fn clean_staircase(fine: u32, _coarse: u32) -> u16 {
    (3600 - 120 * (fine / 8).min(10)) as u16
}

#[test]
fn parks_each_channel_in_the_middle_of_a_tread() {
    let mut rig = StaircaseRig::new(124, clean_staircase);
    let cancel = CancelToken::new();

    calibrate_timing(&mut rig, &TimingCfg::default(), &cancel).unwrap();

    // The first boundary is crossed at unit 8 after a run of eight samples
    // on the first tread; stepping back half the run lands at unit 4.
    for ch in Channel::ALL {
        assert_eq!(rig.fine[ch], 4, "channel {}", ch.index());
        assert_eq!(rig.coarse[ch], 0);
    }
}

/// Decayed in the first coarse window, staircase only after the carry.
fn decayed_first_window(fine: u32, coarse: u32) -> u16 {
    if coarse == 0 {
        1000
    } else {
        clean_staircase(fine, coarse)
    }
}

#[test]
fn carry_into_the_coarse_slot_restarts_plateau_tracking() {
    let mut rig = StaircaseRig::new(12, decayed_first_window);
    let cancel = CancelToken::new();

    calibrate_timing(&mut rig, &TimingCfg::default(), &cancel).unwrap();

    for ch in Channel::ALL {
        assert_eq!(rig.coarse[ch], 1, "channel {}", ch.index());
        assert_eq!(rig.fine[ch], 4);
    }
}

#[test]
fn cancelled_token_aborts_the_sweep() {
    let mut rig = StaircaseRig::new(124, clean_staircase);
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = calibrate_timing(&mut rig, &TimingCfg::default(), &cancel).unwrap_err();
    assert!(err.to_string().contains("timed out"), "{err}");
}
