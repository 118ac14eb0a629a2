//! Error taxonomy.
//!
//! Five kinds: `ConfigError` and `TypeMisuse` are raised
//! synchronously at construction/call-site; `FrameLimitExceeded` and
//! `GateLimitExceeded` are throttling errors, visible only when the caller
//! opts into `throw = true`; `FrameOverflow`/`GateOverflow` are always
//! surfaced, in both modes, because they indicate a logic bug rather than a
//! transient condition. `BackendError` covers connection failure and
//! unclassified server-side script errors.

use thiserror::Error;

/// Errors raised at gate construction: indivisible window/step, limit
/// misuse, a bad storage tag, malformed initial data or timestamp.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("the frame step must be less than the gate size")]
    StepNotLessThanSize,

    #[error("gate size must be divisible by frame step without remainder")]
    NotDivisible,

    #[error("limits must be non-negative")]
    NegativeLimit,

    #[error("frame limit ({frame_limit}) cannot exceed gate limit ({gate_limit}) when both are set")]
    FrameLimitExceedsGateLimit { gate_limit: i64, frame_limit: i64 },

    #[error("initial data must be a sequence of non-negative integers")]
    InvalidInitialData,

    #[error("initial timestamp must be a valid ISO-8601 string: {0}")]
    InvalidTimestamp(String),

    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
}

/// A gate's name paired with the limit value it hit, attached to throttling
/// and overflow errors so callers can format a message without holding a
/// reference back to the gate itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitContext {
    pub gate_name: String,
    pub limit: i64,
}

/// Errors raised by [`crate::gate::Gate::update`] and
/// [`crate::gate::Gate::check_limits`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    /// Wrong scalar type passed to `update` — in Rust this degenerates to
    /// values outside the representable range, kept for parity with the
    /// original's `TypeMisuse`.
    #[error("value out of range for an update")]
    TypeMisuse,

    #[error("frame limit is reached: {} (gate {})", .0.limit, .0.gate_name)]
    FrameLimitExceeded(LimitContext),

    #[error("gate limit is reached: {} (gate {})", .0.limit, .0.gate_name)]
    GateLimitExceeded(LimitContext),

    #[error("frame value would go below zero (gate {})", .0.gate_name)]
    FrameOverflow(LimitContext),

    #[error("gate sum would go below zero (gate {})", .0.gate_name)]
    GateOverflow(LimitContext),

    #[error("storage backend error: {0}")]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl GateError {
    /// Throttling errors are the only kind the non-throwing retry loop is
    /// allowed to swallow; overflow errors are always surfaced to the
    /// caller in both modes.
    pub fn is_throttling(&self) -> bool {
        matches!(self, Self::FrameLimitExceeded(_) | Self::GateLimitExceeded(_))
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self, Self::FrameOverflow(_) | Self::GateOverflow(_))
    }
}

/// Connection failure, or a server-side script error that did not match any
/// of the known taxonomy tokens. Unmatched errors are re-raised verbatim so
/// debugging is not swallowed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("connection failure: {0}")]
    Connection(String),

    #[error("consistency violation: {0}")]
    Inconsistent(String),

    #[error("unclassified backend error: {0}")]
    Other(String),
}

/// Maps a redis/distributed script error token to the typed taxonomy.
/// `None` means the text did not match a known token and the caller should
/// fall back to `BackendError::Other`.
pub fn classify_script_error(gate_name: &str, limit: i64, text: &str) -> Option<GateError> {
    let ctx = || LimitContext { gate_name: gate_name.to_string(), limit };
    if text.contains("Frame limit exceeded") || text.contains("frame limit exceeded") {
        Some(GateError::FrameLimitExceeded(ctx()))
    } else if text.contains("Gate limit exceeded") {
        Some(GateError::GateLimitExceeded(ctx()))
    } else if text.contains("Frame overflow") || text.contains("frame overflow") {
        Some(GateError::FrameOverflow(ctx()))
    } else if text.contains("Gate overflow") {
        Some(GateError::GateOverflow(ctx()))
    } else if let Some(rest) = text.strip_prefix("Sum mismatch: ") {
        Some(GateError::Backend(BackendError::Inconsistent(rest.to_string())))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_tokens() {
        assert!(matches!(
            classify_script_error("g", 5, "Frame limit exceeded"),
            Some(GateError::FrameLimitExceeded(_))
        ));
        assert!(matches!(
            classify_script_error("g", 5, "Gate overflow"),
            Some(GateError::GateOverflow(_))
        ));
        assert!(classify_script_error("g", 5, "ERR something else").is_none());
    }

    #[test]
    fn throttling_vs_overflow_classification() {
        let ctx = LimitContext { gate_name: "g".into(), limit: 1 };
        assert!(GateError::FrameLimitExceeded(ctx.clone()).is_throttling());
        assert!(!GateError::FrameLimitExceeded(ctx.clone()).is_overflow());
        assert!(GateError::GateOverflow(ctx).is_overflow());
    }
}
