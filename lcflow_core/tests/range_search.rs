use lcflow_core::find_dac_range;
use lcflow_core::mocks::ScriptedFrontEnd;
use lcflow_traits::{CancelToken, Channel, FrontEnd, PerChannel};
use rstest::rstest;

#[rstest]
#[case(2000, 2040)]
#[case(2000, 2037)]
#[case(2048, 2048)]
#[case(3000, 1500)]
#[case(10, 300)]
fn converges_within_one_unit(#[case] start: u16, #[case] level: u16) {
    let mut fe = ScriptedFrontEnd::with_levels(PerChannel::splat(level));
    let cancel = CancelToken::new();

    let codes = find_dac_range(&mut fe, PerChannel::splat(start), 8, &cancel).unwrap();

    for ch in Channel::ALL {
        let diff = i32::from(codes[ch]) - i32::from(level);
        assert!(diff.abs() <= 1, "channel {}: {diff}", ch.index());
    }
}

#[test]
fn is_deterministic_for_a_fixed_envelope() {
    let cancel = CancelToken::new();
    let run = || {
        let mut fe = ScriptedFrontEnd::with_levels(PerChannel([2011, 1999, 2803]));
        let codes = find_dac_range(&mut fe, PerChannel::splat(2048), 8, &cancel).unwrap();
        (codes, fe.epochs())
    };

    let (codes_a, epochs_a) = run();
    let (codes_b, epochs_b) = run();

    assert_eq!(codes_a, codes_b);
    assert_eq!(epochs_a, epochs_b);
}

#[test]
fn pegged_high_comparator_saturates_at_the_bottom_rail() {
    // Output stuck set reads as "code above envelope" forever.
    let mut fe = ScriptedFrontEnd::new(Box::new(|_, _| 0b111));
    let cancel = CancelToken::new();

    let codes = find_dac_range(&mut fe, PerChannel::splat(2048), 8, &cancel).unwrap();

    assert_eq!(codes, PerChannel::splat(0));
    assert!(!fe.is_enabled());
}

#[test]
fn pegged_low_comparator_saturates_at_the_top_rail() {
    let mut fe = ScriptedFrontEnd::new(Box::new(|_, _| 0));
    let cancel = CancelToken::new();

    let codes = find_dac_range(&mut fe, PerChannel::splat(2048), 8, &cancel).unwrap();

    assert_eq!(codes, PerChannel::splat(4095));
}

#[test]
fn mixed_channel_behaviors_complete_independently() {
    // ch0 stuck above, ch1 stuck below, ch2 alternating each epoch.
    let mut fe = ScriptedFrontEnd::new(Box::new(|_, epoch| {
        let ch2 = if epoch % 2 == 1 { 0b100 } else { 0 };
        0b001 | ch2
    }));
    let cancel = CancelToken::new();

    let codes = find_dac_range(&mut fe, PerChannel::splat(2048), 8, &cancel).unwrap();

    // The pegged channels walk to their rails; the alternating channel
    // reverses immediately and stays near its start.
    assert_eq!(codes[Channel::Ch0], 0);
    assert_eq!(codes[Channel::Ch1], 4095);
    let diff = i32::from(codes[Channel::Ch2]) - 2048;
    assert!(diff.abs() <= 9, "ch2 drifted: {diff}");
    // Coarse phase is bounded by the walk from mid-scale to a rail, the
    // unit phase by immediate saturation.
    assert!(fe.epochs() <= 2048 / 8 + 8, "epochs: {}", fe.epochs());
}

#[test]
fn alternating_comparator_terminates_on_first_reversal() {
    let mut fe = ScriptedFrontEnd::new(Box::new(|_, epoch| if epoch % 2 == 0 { 0b111 } else { 0 }));
    let cancel = CancelToken::new();

    let codes = find_dac_range(&mut fe, PerChannel::splat(2048), 8, &cancel).unwrap();

    // Coarse and unit phase each stop after two epochs; the net movement
    // stays within one coarse step of the start.
    for ch in Channel::ALL {
        let diff = i32::from(codes[ch]) - 2048;
        assert!(diff.abs() <= 9, "channel {}: {diff}", ch.index());
    }
    assert!(fe.epochs() <= 6);
}
