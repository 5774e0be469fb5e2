use lcflow_core::lock::{lock_rotation, separation_threshold};
use lcflow_core::mocks::ScriptedFrontEnd;
use lcflow_config::{LockCfg, Polarity, SearchCfg};
use lcflow_traits::{CancelToken, Channel, FrontEnd, PerChannel, Rail};

const BASE: u16 = 2048;
const SWING: u16 = 200;
const NOISE: u32 = 8;

/// Disc model: all three envelopes swing between metal and non-metal
/// levels with a half period of 40 epochs.
fn spinning_disc() -> ScriptedFrontEnd {
    let mut fe = ScriptedFrontEnd::with_level_sequence(|epoch| {
        let level = if (epoch / 40) % 2 == 0 {
            BASE - SWING
        } else {
            BASE + SWING
        };
        PerChannel::splat(level)
    });
    for ch in Channel::ALL {
        fe.set_dac(ch, Rail::High, BASE).unwrap();
        fe.set_dac(ch, Rail::Low, BASE).unwrap();
    }
    fe
}

fn lock_cfg() -> LockCfg {
    LockCfg {
        separation_factor: 4,
        settle_passes: 20,
    }
}

#[test]
fn locks_and_places_rails_around_the_envelope_midpoint() {
    let mut fe = spinning_disc();
    let cancel = CancelToken::new();
    let noise = PerChannel::splat(NOISE);

    let outcome = lock_rotation(
        &mut fe,
        &noise,
        &lock_cfg(),
        &SearchCfg::default(),
        Polarity::Inverted,
        &cancel,
    )
    .unwrap();

    for ch in Channel::ALL {
        let spread = u32::from(outcome.max[ch] - outcome.min[ch]);
        assert!(
            spread > outcome.separation[ch],
            "channel {}: spread {spread} vs separation {}",
            ch.index(),
            outcome.separation[ch]
        );
        assert_eq!(
            outcome.base[ch],
            (i32::from(outcome.min[ch]) + i32::from(outcome.max[ch])) / 2
        );
        assert!(
            (i32::from(BASE) - outcome.base[ch]).abs() <= i32::from(SWING),
            "channel {}: base {}",
            ch.index(),
            outcome.base[ch]
        );
        let n = NOISE as i32;
        assert_eq!(i32::from(fe.dac(ch, Rail::Low)), outcome.base[ch] - n);
        assert_eq!(i32::from(fe.dac(ch, Rail::High)), outcome.base[ch] + n);
    }
}

#[test]
fn non_inverted_polarity_mirrors_the_rails() {
    let mut fe = spinning_disc();
    let cancel = CancelToken::new();
    let noise = PerChannel::splat(NOISE);

    let outcome = lock_rotation(
        &mut fe,
        &noise,
        &lock_cfg(),
        &SearchCfg::default(),
        Polarity::NonInverted,
        &cancel,
    )
    .unwrap();

    for ch in Channel::ALL {
        let n = NOISE as i32;
        assert_eq!(i32::from(fe.dac(ch, Rail::Low)), outcome.base[ch] + n);
        assert_eq!(i32::from(fe.dac(ch, Rail::High)), outcome.base[ch] - n);
    }
}

#[test]
fn keeps_sampling_for_the_settle_passes_after_locking() {
    let mut fe = spinning_disc();
    let cancel = CancelToken::new();
    let noise = PerChannel::splat(NOISE);
    let cfg = lock_cfg();

    lock_rotation(
        &mut fe,
        &noise,
        &cfg,
        &SearchCfg::default(),
        Polarity::Inverted,
        &cancel,
    )
    .unwrap();

    // Each settle pass runs at least one five-epoch bisection.
    assert!(
        fe.epochs() >= u64::from(cfg.settle_passes) * 5,
        "epochs: {}",
        fe.epochs()
    );
}

#[test]
fn separation_threshold_formula() {
    assert_eq!(separation_threshold(8, 4), 8 * 3 + 4);
    assert_eq!(separation_threshold(0, 4), 0);
    assert_eq!(separation_threshold(15, 2), 15 + 7);
}
