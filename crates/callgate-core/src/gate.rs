//! The Gate engine: composes the clock and a [`Storage`] backend into a
//! sliding-window rate-limit counter.

use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, instrument, warn};

use crate::clock;
use crate::error::{ConfigError, GateError, LimitContext};
use crate::storage::Storage;
use crate::types::{Frame, GateDict, GateLimits, GateState, StorageKind};

/// Validated, divisibility-checked gate/frame durations, expressed in
/// (possibly fractional) seconds. Scaling by a common power of ten before
/// the modulo check avoids floating-point drift producing a false
/// indivisibility rejection.
fn validate_gate_and_step(gate_size_secs: f64, frame_step_secs: f64) -> Result<(), ConfigError> {
    if frame_step_secs >= gate_size_secs {
        return Err(ConfigError::StepNotLessThanSize);
    }
    let decimals = |v: f64| -> u32 {
        let s = format!("{v}");
        match s.split_once('.') {
            Some((_, frac)) if frac != "0" => frac.len() as u32 + 1,
            _ => 0,
        }
    };
    let k = decimals(gate_size_secs).max(decimals(frame_step_secs));
    let scale = 10f64.powi(k as i32);
    let win = gate_size_secs * scale;
    let step = frame_step_secs * scale;
    if (win % step).abs() > f64::EPSILON * win.max(1.0) {
        return Err(ConfigError::NotDivisible);
    }
    Ok(())
}

fn validate_limits(gate_limit: i64, frame_limit: i64) -> Result<(), ConfigError> {
    if gate_limit < 0 || frame_limit < 0 {
        return Err(ConfigError::NegativeLimit);
    }
    if gate_limit > 0 && frame_limit > gate_limit {
        return Err(ConfigError::FrameLimitExceedsGateLimit { gate_limit, frame_limit });
    }
    Ok(())
}

/// Construction parameters for [`Gate::new`]. A typed record in place of the
/// source's positional-plus-`**kwargs` constructor: dynamic kwargs replaced
/// by an explicit configuration record at every API boundary.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub name: String,
    pub gate_size_secs: f64,
    pub frame_step_secs: f64,
    pub gate_limit: i64,
    pub frame_limit: i64,
    pub timezone: Tz,
    pub storage_kind: StorageKind,
    pub initial_data: Option<Vec<i64>>,
    pub initial_timestamp: Option<DateTime<Utc>>,
}

impl GateConfig {
    pub fn new(name: impl Into<String>, gate_size_secs: f64, frame_step_secs: f64) -> Self {
        Self {
            name: name.into(),
            gate_size_secs,
            frame_step_secs,
            gate_limit: 0,
            frame_limit: 0,
            timezone: Tz::UTC,
            storage_kind: StorageKind::Simple,
            initial_data: None,
            initial_timestamp: None,
        }
    }

    pub fn with_gate_limit(mut self, limit: i64) -> Self {
        self.gate_limit = limit;
        self
    }

    pub fn with_frame_limit(mut self, limit: i64) -> Self {
        self.frame_limit = limit;
        self
    }

    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.timezone = tz;
        self
    }

    pub fn with_storage_kind(mut self, kind: StorageKind) -> Self {
        self.storage_kind = kind;
        self
    }

    pub fn with_initial_data(mut self, data: Vec<i64>) -> Self {
        self.initial_data = Some(data);
        self
    }

    pub fn frames(&self) -> Result<usize, ConfigError> {
        validate_gate_and_step(self.gate_size_secs, self.frame_step_secs)?;
        Ok((self.gate_size_secs / self.frame_step_secs).round() as usize)
    }
}

/// Thread-and-reentrance-safe sliding-window rate-limit counter, generic
/// over the storage backend.
///
/// `S` is typically an `Arc<dyn Storage>` or a concrete backend type; the
/// facade crate wraps this in an enum-dispatch `Gate` that erases the
/// backend type for callers, avoiding dynamic class hierarchies — the sum
/// type lives one layer up, in `callgate`.
pub struct Gate<S: Storage> {
    name: String,
    gate_size_secs: f64,
    frame_step_secs: f64,
    frames: usize,
    gate_limit: i64,
    frame_limit: i64,
    timezone: Tz,
    storage_kind: StorageKind,
    storage: S,
    /// Guards `current_dt` and sequences refresh+update as one logical step.
    /// Reentrant so a decorator calling `update` from inside an already-held
    /// scope guard on the same thread does not self-deadlock.
    rlock: ReentrantMutex<RefCell<Option<DateTime<Utc>>>>,
    /// Read-only snapshot access (`data`, `sum`) uses a plain mutex so
    /// readers never block on a full update cycle longer than one storage
    /// call.
    lock: Mutex<()>,
}

impl<S: Storage> Gate<S> {
    /// Builds a gate over an already-constructed storage backend.
    ///
    /// If `config.initial_timestamp` is absent, the storage is asked for a
    /// previously persisted timestamp and that is adopted instead — this is
    /// how a distributed restart resumes without losing frames.
    pub fn new(config: GateConfig, storage: S) -> Result<Self, GateError> {
        validate_gate_and_step(config.gate_size_secs, config.frame_step_secs)?;
        validate_limits(config.gate_limit, config.frame_limit)?;
        let frames = config.frames()?;

        let current_dt = match config.initial_timestamp {
            Some(ts) => Some(ts),
            None => storage.get_timestamp()?,
        };

        Ok(Self {
            name: config.name,
            gate_size_secs: config.gate_size_secs,
            frame_step_secs: config.frame_step_secs,
            frames,
            gate_limit: config.gate_limit,
            frame_limit: config.frame_limit,
            timezone: config.timezone,
            storage_kind: config.storage_kind,
            storage,
            rlock: ReentrantMutex::new(RefCell::new(current_dt)),
            lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn gate_size_secs(&self) -> f64 {
        self.gate_size_secs
    }

    pub fn frame_step_secs(&self) -> f64 {
        self.frame_step_secs
    }

    pub fn limits(&self) -> GateLimits {
        GateLimits { gate_limit: self.gate_limit, frame_limit: self.frame_limit }
    }

    pub fn gate_limit(&self) -> i64 {
        self.gate_limit
    }

    pub fn frame_limit(&self) -> i64 {
        self.frame_limit
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.storage_kind
    }

    pub fn current_dt(&self) -> Option<DateTime<Utc>> {
        *self.rlock.lock().borrow()
    }

    /// A copy of the ring, newest first.
    pub fn data(&self) -> Result<Vec<i64>, GateError> {
        let _g = self.lock.lock();
        self.storage.as_list()
    }

    pub fn sum(&self) -> Result<i64, GateError> {
        let _g = self.lock.lock();
        self.storage.sum()
    }

    pub fn state(&self) -> Result<GateState, GateError> {
        let _g = self.lock.lock();
        self.storage.state()
    }

    fn current_step(&self) -> DateTime<Tz> {
        clock::current_step(self.timezone, self.frame_step_secs)
    }

    /// Head frame: the current instant's frame and its value.
    pub fn current_frame(&self) -> Result<Frame, GateError> {
        let _g = self.lock.lock();
        let current = self.current_dt().unwrap_or_else(|| self.current_step().with_timezone(&Utc));
        let data = self.storage.as_list()?;
        Ok(Frame { dt: current, value: data.first().copied().unwrap_or(0) })
    }

    /// Tail frame: the oldest frame still in the window and its value.
    pub fn last_frame(&self) -> Result<Frame, GateError> {
        let _g = self.lock.lock();
        let current = self.current_dt().unwrap_or_else(|| self.current_step().with_timezone(&Utc));
        let data = self.storage.as_list()?;
        let dt = current - chrono::Duration::milliseconds(((self.frames.saturating_sub(1)) as f64 * self.frame_step_secs * 1000.0) as i64);
        Ok(Frame { dt, value: data.get(self.frames.saturating_sub(1)).copied().unwrap_or(0) })
    }

    pub fn is_empty(&self) -> Result<bool, GateError> {
        Ok(self.sum()? == 0)
    }

    /// Slide engine. Must be called while holding `rlock`.
    fn refresh_frames_locked(&self, current_dt_cell: &RefCell<Option<DateTime<Utc>>>) -> Result<(), GateError> {
        let step_now = self.current_step().with_timezone(&Utc);
        let existing = *current_dt_cell.borrow();
        let Some(prev) = existing else {
            *current_dt_cell.borrow_mut() = Some(step_now);
            self.storage.set_timestamp(step_now)?;
            return Ok(());
        };
        let diff = clock::frame_diff(prev, step_now, self.frame_step_secs);
        if diff as usize >= self.frames {
            self.clear_locked(current_dt_cell)?;
        } else if diff > 0 {
            debug!(gate = %self.name, diff, "sliding frames forward");
            self.storage.slide(diff)?;
            *current_dt_cell.borrow_mut() = Some(step_now);
            self.storage.set_timestamp(step_now)?;
        }
        Ok(())
    }

    fn clear_locked(&self, current_dt_cell: &RefCell<Option<DateTime<Utc>>>) -> Result<(), GateError> {
        self.storage.clear()?;
        self.storage.clear_timestamp()?;
        *current_dt_cell.borrow_mut() = None;
        Ok(())
    }

    /// Resets the gate to empty.
    pub fn clear(&self) -> Result<(), GateError> {
        let guard = self.rlock.lock();
        self.clear_locked(&guard)
    }

    /// Refreshes frames and raises without mutating if either ceiling is
    /// already met.
    #[instrument(skip(self), fields(gate = %self.name))]
    pub fn check_limits(&self) -> Result<(), GateError> {
        let guard = self.rlock.lock();
        self.refresh_frames_locked(&guard)?;
        let sum = self.storage.sum()?;
        let head = self.storage.as_list()?.first().copied().unwrap_or(0);
        let ctx = |limit| LimitContext { gate_name: self.name.clone(), limit };
        if self.gate_limit > 0 && sum >= self.gate_limit {
            return Err(GateError::GateLimitExceeded(ctx(self.gate_limit)));
        }
        if self.frame_limit > 0 && head >= self.frame_limit {
            return Err(GateError::FrameLimitExceeded(ctx(self.frame_limit)));
        }
        Ok(())
    }

    /// Updates the counter in the current frame and the gate sum.
    ///
    /// `value == 0` is a no-op. `value > frame_limit > 0` fails fast with
    /// `FrameLimitExceeded` before touching storage. When `throw` is
    /// `false`, throttling errors drive an internal retry loop that sleeps
    /// one `frame_step` and re-refreshes before each attempt; overflow and
    /// config/backend errors are always surfaced.
    #[instrument(skip(self), fields(gate = %self.name, value, throw))]
    pub fn update(&self, value: i64, throw: bool) -> Result<(), GateError> {
        if value == 0 {
            return Ok(());
        }
        if self.frame_limit > 0 && value > self.frame_limit {
            return Err(GateError::FrameLimitExceeded(LimitContext {
                gate_name: self.name.clone(),
                limit: self.frame_limit,
            }));
        }

        let guard = self.rlock.lock();
        self.refresh_frames_locked(&guard)?;
        match self.storage.atomic_update(value, self.frame_limit, self.gate_limit) {
            Ok(()) => Ok(()),
            Err(e) if e.is_throttling() && !throw => {
                warn!(gate = %self.name, error = %e, "throttled, entering retry loop");
                loop {
                    thread::sleep(StdDuration::from_secs_f64(self.frame_step_secs));
                    self.refresh_frames_locked(&guard)?;
                    match self.storage.atomic_update(value, self.frame_limit, self.gate_limit) {
                        Ok(()) => return Ok(()),
                        Err(e) if e.is_throttling() => continue,
                        Err(e) => return Err(e),
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Serializes configuration and visible state to the portable
    /// dictionary shape.
    pub fn as_dict(&self) -> Result<GateDict, GateError> {
        let guard = self.rlock.lock();
        let current_dt = *guard.borrow();
        Ok(GateDict {
            name: self.name.clone(),
            gate_size: self.gate_size_secs,
            frame_step: self.frame_step_secs,
            gate_limit: self.gate_limit,
            frame_limit: self.frame_limit,
            timezone: Some(self.timezone.to_string()),
            storage: self.storage_kind,
            data: self.storage.as_list()?,
            current_dt: current_dt.map(|dt| dt.to_rfc3339()),
            extra: serde_json::Map::new(),
        })
    }

    /// Writes [`Gate::as_dict`] as JSON to `path`, creating parent
    /// directories if needed.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), GateError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GateError::Backend(crate::error::BackendError::Other(e.to_string())))?;
        }
        let dict = self.as_dict()?;
        let file = std::fs::File::create(path)
            .map_err(|e| GateError::Backend(crate::error::BackendError::Other(e.to_string())))?;
        serde_json::to_writer_pretty(file, &dict)
            .map_err(|e| GateError::Backend(crate::error::BackendError::Other(e.to_string())))?;
        Ok(())
    }
}

/// Shared ownership wrapper used by the sugar layer, where multiple
/// handles (decorator closures, scope guards) need to reference the same
/// gate concurrently.
pub type SharedGate<S> = Arc<Gate<S>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::Local;

    fn gate(name: &str, size: f64, step: f64) -> Gate<Local> {
        let cfg = GateConfig::new(name, size, step);
        let frames = cfg.frames().unwrap();
        Gate::new(cfg, Local::new(name, frames, None)).unwrap()
    }

    #[test]
    fn rejects_indivisible_window() {
        let cfg = GateConfig::new("g", 3.0, 2.0);
        assert!(matches!(cfg.frames(), Err(ConfigError::NotDivisible)));
    }

    #[test]
    fn rejects_step_not_less_than_size() {
        let cfg = GateConfig::new("g", 2.0, 2.0);
        assert!(matches!(cfg.frames(), Err(ConfigError::StepNotLessThanSize)));
    }

    #[test]
    fn rejects_frame_limit_over_gate_limit() {
        let err = validate_limits(4, 5).unwrap_err();
        assert!(matches!(err, ConfigError::FrameLimitExceedsGateLimit { .. }));
    }

    #[test]
    fn update_zero_is_noop() {
        let g = gate("g", 2.0, 1.0);
        g.update(0, true).unwrap();
        assert_eq!(g.sum().unwrap(), 0);
    }

    #[test]
    fn update_once_sets_head_and_sum() {
        let g = gate("g", 2.0, 1.0);
        g.update(1, true).unwrap();
        assert_eq!(g.sum().unwrap(), 1);
        assert_eq!(g.data().unwrap()[0], 1);
        assert!(g.current_dt().is_some());
    }

    #[test]
    fn gate_limit_throws_on_sixth_call() {
        let cfg = GateConfig::new("g", 4.0, 1.0).with_gate_limit(5);
        let frames = cfg.frames().unwrap();
        let g = Gate::new(cfg, Local::new("g", frames, None)).unwrap();
        for _ in 0..5 {
            g.update(1, true).unwrap();
        }
        let err = g.update(1, true).unwrap_err();
        assert!(matches!(err, GateError::GateLimitExceeded(_)));
    }

    #[test]
    fn frame_limit_trips_before_gate_limit() {
        let cfg = GateConfig::new("g", 4.0, 1.0).with_gate_limit(4).with_frame_limit(2);
        let frames = cfg.frames().unwrap();
        let g = Gate::new(cfg, Local::new("g", frames, None)).unwrap();
        g.update(2, true).unwrap();
        let err = g.update(1, true).unwrap_err();
        assert!(matches!(err, GateError::FrameLimitExceeded(_)));
    }

    #[test]
    fn clear_resets_ring_and_timestamp() {
        let g = gate("g", 2.0, 1.0);
        g.update(1, true).unwrap();
        g.clear().unwrap();
        assert_eq!(g.sum().unwrap(), 0);
        assert!(g.current_dt().is_none());
    }

    #[test]
    fn as_dict_round_trips_visible_state() {
        let g = gate("g", 2.0, 1.0);
        g.update(3, true).unwrap();
        let dict = g.as_dict().unwrap();
        assert_eq!(dict.name, "g");
        assert_eq!(dict.data[0], 3);
        assert!(dict.current_dt.is_some());
    }
}
