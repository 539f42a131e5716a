use std::sync::{Arc, Mutex, MutexGuard};

use log::trace;

use crate::structs::buffer::Buffer;
use crate::structs::macroblock::{MacroblockData, MacroblockJob};
use crate::structs::stream_unit::StreamUnit;
use crate::utils::errors::PoolError;

/// Sizing policy of a [`PacketPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Requests up to this many bytes are served from the small freelist.
    pub small_threshold: usize,
    /// Maximum number of cached entries per freelist.
    pub depth: usize,
    /// Upper bound on simultaneously checked-out buffers, units and jobs
    /// (each counted separately). `None` disables the check.
    pub max_outstanding: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            small_threshold: 2048,
            depth: 64,
            max_outstanding: None,
        }
    }
}

/// Allocation counters of a [`PacketPool`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub buffers_out: usize,
    pub units_out: usize,
    pub jobs_out: usize,
    pub fresh_allocations: usize,
    pub reuses: usize,
    pub resizes: usize,
    pub discards: usize,
    pub cached_small: usize,
    pub cached_large: usize,
    pub cached_units: usize,
    pub cached_jobs: usize,
}

impl PoolStats {
    /// Number of pool objects currently owned outside the pool.
    pub fn outstanding(&self) -> usize {
        self.buffers_out + self.units_out + self.jobs_out
    }
}

#[derive(Debug, Default)]
struct PoolState {
    small: Vec<Vec<u8>>,
    large: Vec<Vec<u8>>,
    chains: Vec<Vec<Buffer>>,
    jobs: Vec<Box<MacroblockData>>,
    stats: PoolStats,
}

/// A thread-safe freelist allocator for packet buffers, stream units and
/// macroblock jobs.
///
/// Objects handed out by the pool return to it when dropped, so every exit
/// path releases exactly once. A single pool-wide lock guards the
/// freelists; it is only held for the push or pop itself, allocation and
/// deallocation happen outside of it.
#[derive(Debug, Clone)]
pub struct PacketPool {
    state: Arc<Mutex<PoolState>>,
    config: PoolConfig,
}

impl PacketPool {
    /// Creates an empty pool with the given sizing policy.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState::default())),
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_outstanding(
        &self,
        kind: &'static str,
        requested: usize,
        outstanding: usize,
    ) -> Result<(), PoolError> {
        match self.config.max_outstanding {
            Some(max) if outstanding >= max => Err(PoolError::ResourceExhausted {
                kind,
                requested,
                outstanding,
            }),
            _ => Ok(()),
        }
    }

    /// Acquires a buffer holding exactly `min_size` zeroed bytes.
    ///
    /// A cached buffer whose capacity lies within `[min_size, 2 * min_size]`
    /// is reused as is; otherwise the most recently released buffer of the
    /// size class is resized, and an empty class falls back to a fresh
    /// allocation. The payload window initially spans the whole buffer.
    pub fn acquire_buffer(&self, min_size: usize) -> Result<Buffer, PoolError> {
        let cached = {
            let mut guard = self.lock();
            let state = &mut *guard;
            self.check_outstanding("buffer", min_size, state.stats.buffers_out)?;

            let list = if min_size <= self.config.small_threshold {
                &mut state.small
            } else {
                &mut state.large
            };

            let in_band = |cap: usize| cap >= min_size && cap <= min_size.saturating_mul(2);
            let cached = match list.iter().rposition(|b| in_band(b.capacity())) {
                Some(i) => {
                    let data = list.swap_remove(i);
                    state.stats.reuses += 1;
                    Some(data)
                }
                None => {
                    let data = list.pop();
                    if data.is_some() {
                        state.stats.resizes += 1;
                    } else {
                        state.stats.fresh_allocations += 1;
                    }
                    data
                }
            };

            state.stats.buffers_out += 1;
            cached
        };

        let mut data = cached.unwrap_or_default();
        data.clear();
        if data.capacity() > min_size.saturating_mul(2) {
            data.shrink_to(min_size);
        }
        if data.try_reserve_exact(min_size).is_err() {
            let outstanding = {
                let mut state = self.lock();
                state.stats.buffers_out -= 1;
                state.stats.buffers_out
            };
            return Err(PoolError::ResourceExhausted {
                kind: "buffer",
                requested: min_size,
                outstanding,
            });
        }
        data.resize(min_size, 0);

        Ok(Buffer::from_pool(data, self.clone()))
    }

    /// Returns a buffer to the pool. Equivalent to dropping it.
    pub fn release_buffer(&self, buffer: Buffer) {
        drop(buffer);
    }

    /// Acquires an empty stream unit.
    pub fn acquire_stream_unit(&self) -> Result<StreamUnit, PoolError> {
        let chain = {
            let mut state = self.lock();
            self.check_outstanding("stream unit", 0, state.stats.units_out)?;
            state.stats.units_out += 1;
            state.chains.pop()
        };

        Ok(StreamUnit::from_pool(
            chain.unwrap_or_else(|| Vec::with_capacity(4)),
            self.clone(),
        ))
    }

    /// Returns a stream unit, and every buffer chained to it, to the pool.
    /// Equivalent to dropping it.
    pub fn release_stream_unit(&self, unit: StreamUnit) {
        drop(unit);
    }

    /// Acquires a macroblock job with cleared coefficients and no-op block
    /// operations.
    pub fn acquire_job(&self) -> Result<MacroblockJob, PoolError> {
        let cached = {
            let mut state = self.lock();
            self.check_outstanding("macroblock job", 0, state.stats.jobs_out)?;
            state.stats.jobs_out += 1;
            state.jobs.pop()
        };

        let mut data = cached.unwrap_or_default();
        data.reset();
        Ok(MacroblockJob::from_pool(data, self.clone()))
    }

    /// Returns a macroblock job to the pool. Equivalent to dropping it.
    pub fn release_job(&self, job: MacroblockJob) {
        drop(job);
    }

    pub(crate) fn recycle_buffer(&self, data: Vec<u8>) {
        let small = data.capacity() <= self.config.small_threshold;
        let discarded = {
            let mut guard = self.lock();
            let state = &mut *guard;
            state.stats.buffers_out = state.stats.buffers_out.saturating_sub(1);
            let depth = self.config.depth;
            let list = if small {
                &mut state.small
            } else {
                &mut state.large
            };
            if list.len() < depth {
                list.push(data);
                None
            } else {
                state.stats.discards += 1;
                Some(data)
            }
        };

        if discarded.is_some() {
            trace!("Buffer freelist full, deallocating");
        }
    }

    pub(crate) fn recycle_chain(&self, chain: Vec<Buffer>) {
        debug_assert!(chain.is_empty());
        let mut state = self.lock();
        state.stats.units_out = state.stats.units_out.saturating_sub(1);
        if state.chains.len() < self.config.depth {
            state.chains.push(chain);
        } else {
            state.stats.discards += 1;
        }
    }

    pub(crate) fn recycle_job(&self, mut data: Box<MacroblockData>) {
        // Picture references must not outlive the job.
        data.release_references();

        let mut state = self.lock();
        state.stats.jobs_out = state.stats.jobs_out.saturating_sub(1);
        if state.jobs.len() < self.config.depth {
            state.jobs.push(data);
        } else {
            state.stats.discards += 1;
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            cached_small: state.small.len(),
            cached_large: state.large.len(),
            cached_units: state.chains.len(),
            cached_jobs: state.jobs.len(),
            ..state.stats
        }
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}
