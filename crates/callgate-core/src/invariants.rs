//! Debug assertion macros for the invariants a correct gate must hold.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`); zero overhead
//! in release builds. Used by every `Storage` implementation after a
//! mutation commits.

// =============================================================================
// sum == Σ data
// =============================================================================

macro_rules! debug_assert_sum_matches {
    ($data:expr, $sum:expr) => {
        debug_assert_eq!(
            $data.iter().sum::<i64>(),
            $sum,
            "cached sum diverged from Σ data"
        )
    };
}

// =============================================================================
// every data[i] >= 0 and sum >= 0
// =============================================================================

macro_rules! debug_assert_non_negative {
    ($data:expr, $sum:expr) => {
        debug_assert!($data.iter().all(|&v| v >= 0), "negative frame value");
        debug_assert!($sum >= 0, "negative sum");
    };
}

// =============================================================================
// limits hold after a successful update
// =============================================================================

macro_rules! debug_assert_frame_limit {
    ($head:expr, $frame_limit:expr) => {
        debug_assert!(
            $frame_limit <= 0 || $head <= $frame_limit,
            "data[0] = {} exceeds frame_limit {}",
            $head,
            $frame_limit
        )
    };
}

macro_rules! debug_assert_gate_limit {
    ($sum:expr, $gate_limit:expr) => {
        debug_assert!(
            $gate_limit <= 0 || $sum <= $gate_limit,
            "sum = {} exceeds gate_limit {}",
            $sum,
            $gate_limit
        )
    };
}

pub(crate) use debug_assert_frame_limit;
pub(crate) use debug_assert_gate_limit;
pub(crate) use debug_assert_non_negative;
pub(crate) use debug_assert_sum_matches;
