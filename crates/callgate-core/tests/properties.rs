//! Property-based coverage of the invariants a correct gate must hold
//! regardless of update history.

use callgate_core::{Gate, GateConfig, GateError, Local};
use proptest::prelude::*;

fn make_gate(frames: usize, frame_limit: i64, gate_limit: i64) -> Gate<Local> {
    let cfg = GateConfig::new("prop", frames as f64, 1.0).with_frame_limit(frame_limit).with_gate_limit(gate_limit);
    Gate::new(cfg, Local::new("prop", frames, None)).unwrap()
}

proptest! {
    /// P1: a successful update moves both the head frame and the sum by
    /// exactly the applied value.
    #[test]
    fn p1_successful_update_moves_head_and_sum_by_value(v in 1i64..=5) {
        let gate = make_gate(4, 0, 0);
        let sum_before = gate.sum().unwrap();
        let head_before = gate.data().unwrap()[0];
        gate.update(v, true).unwrap();
        prop_assert_eq!(gate.sum().unwrap(), sum_before + v);
        prop_assert_eq!(gate.data().unwrap()[0], head_before + v);
    }

    /// P2: the cached sum always equals the sum of the visible frames.
    #[test]
    fn p2_sum_always_matches_data(updates in proptest::collection::vec(1i64..=3, 0..20)) {
        let gate = make_gate(6, 0, 0);
        for v in updates {
            let _ = gate.update(v, false);
        }
        let data = gate.data().unwrap();
        let sum = gate.sum().unwrap();
        prop_assert_eq!(data.iter().sum::<i64>(), sum);
    }

    /// P3: a burst of updates within one window, none of which exceeds a
    /// limit, leaves `sum` equal to the total applied.
    #[test]
    fn p3_unthrottled_burst_sum_equals_total(values in proptest::collection::vec(1i64..=2, 1..5)) {
        let total: i64 = values.iter().sum();
        let gate = make_gate(10, 0, 0);
        for v in &values {
            gate.update(*v, true).unwrap();
        }
        prop_assert_eq!(gate.sum().unwrap(), total);
    }

    /// P5: once `frame_limit` is set, the head frame never observably
    /// exceeds it, no matter how many updates are attempted.
    #[test]
    fn p5_frame_limit_never_exceeded(values in proptest::collection::vec(1i64..=4, 0..30)) {
        let gate = make_gate(4, 3, 0);
        for v in values {
            let _ = gate.update(v, false);
            prop_assert!(gate.data().unwrap()[0] <= 3);
        }
    }

    /// P6: once `gate_limit` is set, the sum never observably exceeds it.
    #[test]
    fn p6_gate_limit_never_exceeded(values in proptest::collection::vec(1i64..=4, 0..30)) {
        let gate = make_gate(4, 0, 6);
        for v in values {
            let _ = gate.update(v, false);
            prop_assert!(gate.sum().unwrap() <= 6);
        }
    }

    /// A rejected update never partially mutates state: sum and head are
    /// unchanged after an error.
    #[test]
    fn rejected_update_leaves_state_untouched(over in 4i64..=10) {
        let gate = make_gate(4, 3, 0);
        let sum_before = gate.sum().unwrap();
        let head_before = gate.data().unwrap()[0];
        let result = gate.update(over, true);
        prop_assert!(result.is_err());
        prop_assert_eq!(gate.sum().unwrap(), sum_before);
        prop_assert_eq!(gate.data().unwrap()[0], head_before);
    }
}

/// P4: sliding by `n` (0 < n < frames) shifts every frame right by `n`,
/// zero-filling the new head frames, without going through the public
/// `update`/slide-timer path (this drives the storage backend directly so
/// the frame arithmetic is exercised in isolation from the clock).
#[test]
fn p4_slide_shifts_and_zero_fills() {
    use callgate_core::Storage;
    let storage = Local::new("p4", 5, Some(&[5, 4, 3, 2, 1]));
    storage.slide(2).unwrap();
    assert_eq!(storage.as_list().unwrap(), vec![0, 0, 5, 4, 3]);
}

/// Values above the configured frame limit are rejected before reaching
/// storage (fast-path check in `Gate::update`), and are never classified
/// as overflow.
#[test]
fn update_above_frame_limit_is_frame_limit_not_overflow() {
    let gate = make_gate(4, 2, 0);
    let err = gate.update(3, true).unwrap_err();
    assert!(matches!(err, GateError::FrameLimitExceeded(_)));
}
