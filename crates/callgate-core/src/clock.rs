//! Frame-index clock.
//!
//! Pure translation from wall time to the start instant of the frame that
//! contains it. No state, no I/O — every backend and the engine itself call
//! through here so the floor-to-frame arithmetic lives in exactly one place.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Floors `now` to the most recent multiple of `frame_step_secs`, in `tz`.
///
/// Mirrors `CallGate._current_step`: `now - (now.timestamp() % step)`. Using
/// the Unix timestamp (not a calendar field) for the modulo means the frame
/// grid is anchored at the epoch regardless of `tz` — `tz` only affects which
/// wall-clock instant `now()` resolves to before flooring.
pub fn current_step(tz: Tz, frame_step_secs: f64) -> DateTime<Tz> {
    let now = Utc::now().with_timezone(&tz);
    floor_to_frame(now, frame_step_secs)
}

/// Floors an arbitrary instant to the current frame boundary.
///
/// Exposed separately from [`current_step`] so tests can drive the slide
/// engine from a fixed instant instead of the live clock.
pub fn floor_to_frame<Tz2: TimeZone>(instant: DateTime<Tz2>, frame_step_secs: f64) -> DateTime<Tz2> {
    let ts = instant.timestamp() as f64 + f64::from(instant.timestamp_subsec_micros()) / 1_000_000.0;
    let remainder = ts.rem_euclid(frame_step_secs);
    instant - chrono::Duration::microseconds((remainder * 1_000_000.0).round() as i64)
}

/// Number of whole `frame_step_secs` periods between two instants, clamped to
/// zero when `to` is not after `from` (handles clock skew / NTP leaps: if the
/// wall clock jumps backwards, a negative diff is clamped to zero).
pub fn frame_diff<Tz2: TimeZone>(from: DateTime<Tz2>, to: DateTime<Tz2>, frame_step_secs: f64) -> u64 {
    let delta_secs = (to - from).num_milliseconds() as f64 / 1000.0;
    if delta_secs <= 0.0 {
        return 0;
    }
    (delta_secs / frame_step_secs).floor() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn floor_aligns_to_step() {
        let t = Utc.timestamp_opt(1_000_007, 250_000_000).unwrap();
        let floored = floor_to_frame(t, 10.0);
        assert_eq!(floored.timestamp(), 1_000_000);
    }

    #[test]
    fn floor_is_idempotent() {
        let t = Utc.timestamp_opt(1_000_000, 0).unwrap();
        let floored = floor_to_frame(t, 10.0);
        assert_eq!(floor_to_frame(floored, 10.0), floored);
    }

    #[test]
    fn frame_diff_counts_whole_steps() {
        let a = Utc.timestamp_opt(1_000_000, 0).unwrap();
        let b = Utc.timestamp_opt(1_000_035, 0).unwrap();
        assert_eq!(frame_diff(a, b, 10.0), 3);
    }

    #[test]
    fn frame_diff_clamps_negative_to_zero() {
        let a = Utc.timestamp_opt(1_000_100, 0).unwrap();
        let b = Utc.timestamp_opt(1_000_000, 0).unwrap();
        assert_eq!(frame_diff(a, b, 10.0), 0);
    }
}
