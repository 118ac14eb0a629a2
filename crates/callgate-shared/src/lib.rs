//! Cross-process storage backend: `StorageKind::Shared`.
//!
//! A memory-mapped file holds the ring and the cached sum, visible to every
//! sibling process that maps the same path; a second file, locked with
//! `flock`, serializes access across processes the way a mutex serializes
//! access across threads. Grounded on `call_gate/storages/shared.py`'s
//! `GlobalLock` (file-based `flock`) and `SharedMemoryStorage` (a numpy
//! array over `multiprocessing.SharedMemory`), ported from a named POSIX
//! shared-memory segment to a plain mapped file under the system temp
//! directory — `memmap2` has no direct `SharedMemory`-by-name equivalent,
//! and a file mapping gives the same cross-process visibility. Process-local
//! concurrency additionally goes through a `parking_lot::Mutex`, mirroring
//! the source's `RLock` guarding the same `GlobalLock`.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;

use callgate_core::{BackendError, GateError, GateState, LimitContext};
use chrono::{DateTime, Utc};
use memmap2::MmapMut;
use parking_lot::Mutex;

const SUM_OFFSET: usize = 0;
const TIMESTAMP_OFFSET: usize = 8;
const HEADER_LEN: usize = 16;
const NO_TIMESTAMP: i64 = i64::MIN;

fn data_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("callgate-shared-{name}.data"))
}

fn lock_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(".callgate-{name}.lock"))
}

fn io_err(e: std::io::Error) -> GateError {
    GateError::Backend(BackendError::Other(e.to_string()))
}

struct Inner {
    mmap: MmapMut,
    capacity: usize,
}

impl Inner {
    fn frame_offset(&self, index: usize) -> usize {
        HEADER_LEN + index * 8
    }

    fn read_i64(&self, offset: usize) -> i64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.mmap[offset..offset + 8]);
        i64::from_le_bytes(bytes)
    }

    fn write_i64(&mut self, offset: usize, value: i64) {
        self.mmap[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    fn sum(&self) -> i64 {
        self.read_i64(SUM_OFFSET)
    }

    fn set_sum(&mut self, value: i64) {
        self.write_i64(SUM_OFFSET, value);
    }

    fn frame(&self, index: usize) -> i64 {
        self.read_i64(self.frame_offset(index))
    }

    fn set_frame(&mut self, index: usize, value: i64) {
        let offset = self.frame_offset(index);
        self.write_i64(offset, value);
    }

    fn as_list(&self) -> Vec<i64> {
        (0..self.capacity).map(|i| self.frame(i)).collect()
    }

    fn recompute_sum(&mut self) {
        let total: i64 = (0..self.capacity).map(|i| self.frame(i)).sum();
        self.set_sum(total);
    }
}

/// `StorageKind::Shared` — a ring mapped into every sibling process that
/// opens the same gate name.
pub struct Shared {
    name: String,
    /// Process-local serialization of cross-process acquisitions below, plus
    /// a handle to the lock file itself (mirrors the source's `RLock`
    /// wrapping `GlobalLock`).
    lock_handle: Mutex<fd_lock::RwLock<File>>,
    state: Mutex<Inner>,
}

impl Shared {
    /// Opens (creating if absent) the backing file for `name`, sized for
    /// `capacity` frames, and seeds it with `initial` when it did not
    /// already exist.
    pub fn new(name: impl Into<String>, capacity: usize, initial: Option<&[i64]>) -> Result<Self, GateError> {
        let name = name.into();
        let size = HEADER_LEN + capacity * 8;

        let data_file_path = data_path(&name);
        let created = !data_file_path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&data_file_path)
            .map_err(io_err)?;
        file.set_len(size as u64).map_err(io_err)?;

        let mut mmap = unsafe { MmapMut::map_mut(&file).map_err(io_err)? };
        if created {
            mmap.fill(0);
            let mut ts_bytes = [0u8; 8];
            ts_bytes.copy_from_slice(&NO_TIMESTAMP.to_le_bytes());
            mmap[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 8].copy_from_slice(&ts_bytes);
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path(&name))
            .map_err(io_err)?;
        let lock_handle = Mutex::new(fd_lock::RwLock::new(lock_file));

        let mut inner = Inner { mmap, capacity };
        if created {
            if let Some(seed) = initial {
                let mut guard = lock_handle.lock();
                let _write = guard.write().map_err(io_err)?;
                let mut sum = 0i64;
                for (i, v) in seed.iter().take(capacity).enumerate() {
                    inner.set_frame(i, *v);
                    sum += *v;
                }
                inner.set_sum(sum);
            }
        }

        Ok(Self { name, lock_handle, state: Mutex::new(inner) })
    }

    fn with_cross_process_lock<T>(&self, f: impl FnOnce(&mut Inner) -> Result<T, GateError>) -> Result<T, GateError> {
        let mut lock_handle = self.lock_handle.lock();
        let _guard = lock_handle.write().map_err(io_err)?;
        let mut state = self.state.lock();
        f(&mut state)
    }
}

impl callgate_core::Storage for Shared {
    fn slide(&self, n: u64) -> Result<(), GateError> {
        self.with_cross_process_lock(|inner| {
            if n as usize >= inner.capacity {
                for i in 0..inner.capacity {
                    inner.set_frame(i, 0);
                }
                inner.set_sum(0);
                return Ok(());
            }
            let n = n as usize;
            let old: Vec<i64> = inner.as_list();
            for i in (n..inner.capacity).rev() {
                inner.set_frame(i, old[i - n]);
            }
            for i in 0..n {
                inner.set_frame(i, 0);
            }
            inner.recompute_sum();
            Ok(())
        })
    }

    fn state(&self) -> Result<GateState, GateError> {
        self.with_cross_process_lock(|inner| Ok(GateState { data: inner.as_list(), sum: inner.sum() }))
    }

    fn sum(&self) -> Result<i64, GateError> {
        self.with_cross_process_lock(|inner| Ok(inner.sum()))
    }

    fn atomic_update(&self, value: i64, frame_limit: i64, gate_limit: i64) -> Result<(), GateError> {
        self.with_cross_process_lock(|inner| {
            let current = inner.frame(0);
            let new_value = current + value;
            let current_sum = inner.sum();
            let new_sum = current_sum + value;

            let ctx = |limit| LimitContext { gate_name: self.name.clone(), limit };
            if frame_limit > 0 && new_value > frame_limit {
                return Err(GateError::FrameLimitExceeded(ctx(frame_limit)));
            }
            if gate_limit > 0 && new_sum > gate_limit {
                return Err(GateError::GateLimitExceeded(ctx(gate_limit)));
            }
            if new_sum < 0 {
                return Err(GateError::GateOverflow(ctx(gate_limit)));
            }
            if new_value < 0 {
                return Err(GateError::FrameOverflow(ctx(frame_limit)));
            }

            inner.set_frame(0, new_value);
            inner.set_sum(new_sum);
            Ok(())
        })
    }

    fn as_list(&self) -> Result<Vec<i64>, GateError> {
        self.with_cross_process_lock(|inner| Ok(inner.as_list()))
    }

    fn clear(&self) -> Result<(), GateError> {
        self.with_cross_process_lock(|inner| {
            for i in 0..inner.capacity {
                inner.set_frame(i, 0);
            }
            inner.set_sum(0);
            Ok(())
        })
    }

    fn close(&self) -> Result<(), GateError> {
        let _ = std::fs::remove_file(lock_path(&self.name));
        Ok(())
    }

    fn set_head(&self, value: i64) -> Result<(), GateError> {
        self.with_cross_process_lock(|inner| {
            let delta = value - inner.frame(0);
            inner.set_frame(0, value);
            let new_sum = inner.sum() + delta;
            if new_sum < 0 {
                return Err(GateError::Backend(BackendError::Other("set_head drove sum negative".into())));
            }
            inner.set_sum(new_sum);
            Ok(())
        })
    }

    fn get_timestamp(&self) -> Result<Option<DateTime<Utc>>, GateError> {
        self.with_cross_process_lock(|inner| {
            let raw = inner.read_i64(TIMESTAMP_OFFSET);
            if raw == NO_TIMESTAMP {
                Ok(None)
            } else {
                Ok(DateTime::from_timestamp_micros(raw))
            }
        })
    }

    fn set_timestamp(&self, ts: DateTime<Utc>) -> Result<(), GateError> {
        self.with_cross_process_lock(|inner| {
            inner.write_i64(TIMESTAMP_OFFSET, ts.timestamp_micros());
            Ok(())
        })
    }

    fn clear_timestamp(&self) -> Result<(), GateError> {
        self.with_cross_process_lock(|inner| {
            inner.write_i64(TIMESTAMP_OFFSET, NO_TIMESTAMP);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callgate_core::Storage as _;

    fn unique_name(case: &str) -> String {
        format!("test-{case}-{}", std::process::id())
    }

    #[test]
    fn atomic_update_tracks_sum_across_handles() {
        let name = unique_name("atomic");
        let a = Shared::new(&name, 4, None).unwrap();
        let b = Shared::new(&name, 4, None).unwrap();
        a.atomic_update(3, 0, 0).unwrap();
        assert_eq!(b.sum().unwrap(), 3);
        assert_eq!(b.as_list().unwrap()[0], 3);
        a.close().unwrap();
        let _ = std::fs::remove_file(data_path(&name));
    }

    #[test]
    fn slide_shifts_and_zero_fills() {
        let name = unique_name("slide");
        let s = Shared::new(&name, 4, Some(&[1, 2, 3, 4])).unwrap();
        assert_eq!(s.sum().unwrap(), 10);
        s.slide(2).unwrap();
        assert_eq!(s.as_list().unwrap(), vec![0, 0, 1, 2]);
        assert_eq!(s.sum().unwrap(), 3);
        s.close().unwrap();
        let _ = std::fs::remove_file(data_path(&name));
    }

    #[test]
    fn timestamp_round_trips_and_clears() {
        let name = unique_name("ts");
        let s = Shared::new(&name, 2, None).unwrap();
        assert_eq!(s.get_timestamp().unwrap(), None);
        let ts = Utc::now();
        s.set_timestamp(ts).unwrap();
        assert!(s.get_timestamp().unwrap().is_some());
        s.clear_timestamp().unwrap();
        assert_eq!(s.get_timestamp().unwrap(), None);
        s.close().unwrap();
        let _ = std::fs::remove_file(data_path(&name));
    }
}
