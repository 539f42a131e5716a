use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use log::{debug, error, trace};

use crate::process::fifo::MacroblockFifo;
use crate::structs::macroblock::{BlockCoding, MacroblockData};
use crate::utils::errors::FifoError;

/// Job counters shared by every worker of a pool.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    jobs: AtomicU64,
    skipped: AtomicU64,
    blocks_transformed: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub jobs: u64,
    pub skipped: u64,
    pub blocks_transformed: u64,
}

impl WorkerCounters {
    pub fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            jobs: self.jobs.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            blocks_transformed: self.blocks_transformed.load(Ordering::Relaxed),
        }
    }
}

/// Runs one macroblock job: prediction, then per block the inverse
/// transform and reconstruction the codec registered.
///
/// `NotCoded` blocks are left untouched and `Sparse` blocks skip the
/// transform. Returns the number of blocks that went through the
/// transform.
pub fn run_job(job: &mut MacroblockData) -> usize {
    let Some(picture) = job.picture.clone() else {
        return 0;
    };

    (job.predict)(job, &picture);

    let mut transformed = 0;
    for index in 0..job.block_count {
        match job.coding[index] {
            BlockCoding::NotCoded => continue,
            BlockCoding::Sparse => {}
            BlockCoding::Dense => {
                let transform = job.inverse_transform[index];
                transform(&mut job.blocks[index]);
                transformed += 1;
            }
        }
        let target = job.block_target(&picture, index);
        (job.reconstruct[index])(&job.blocks[index], target);
    }

    transformed
}

/// Called from a thread that is unwinding.
pub type PanicHook = Arc<dyn Fn() + Send + Sync>;

/// Runs its hook when dropped during a panic.
pub struct PanicGuard(PanicHook);

impl PanicGuard {
    pub fn new(hook: PanicHook) -> Self {
        Self(hook)
    }
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(
                "Thread {} panicked",
                thread::current().name().unwrap_or("<unnamed>")
            );
            (self.0)();
        }
    }
}

/// Fixed set of threads draining one [`MacroblockFifo`].
///
/// Workers exit when the fifo is closed and empty, or when the session
/// cancel token is observed at the blocking pop. A worker that panics
/// runs the pool's panic hook on its way out.
#[derive(Debug)]
pub struct DecoderWorkerPool {
    handles: Vec<JoinHandle<()>>,
    counters: Arc<WorkerCounters>,
}

impl DecoderWorkerPool {
    /// Spawns `workers` threads. A panicking worker cancels `jobs` so the
    /// producer and the other workers stop.
    pub fn spawn(jobs: Arc<MacroblockFifo>, workers: usize) -> std::io::Result<Self> {
        let fifo = Arc::clone(&jobs);
        let hook: PanicHook = Arc::new(move || {
            fifo.cancel_token().cancel();
            fifo.wake_all();
        });
        Self::spawn_with_panic_hook(jobs, workers, hook)
    }

    pub fn spawn_with_panic_hook(
        jobs: Arc<MacroblockFifo>,
        workers: usize,
        on_panic: PanicHook,
    ) -> std::io::Result<Self> {
        let counters = Arc::new(WorkerCounters::default());
        let mut handles = Vec::with_capacity(workers.max(1));

        for index in 0..workers.max(1) {
            let jobs = Arc::clone(&jobs);
            let counters = Arc::clone(&counters);
            let guard = PanicGuard::new(Arc::clone(&on_panic));
            let handle = thread::Builder::new()
                .name(format!("mb-worker-{index}"))
                .spawn(move || {
                    let _guard = guard;
                    worker_loop(index, &jobs, &counters)
                })?;
            handles.push(handle);
        }

        Ok(Self { handles, counters })
    }

    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    pub fn stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }

    /// Waits for every worker. Returns the number of workers that panicked.
    pub fn join(self) -> (WorkerStats, usize) {
        let panicked = self
            .handles
            .into_iter()
            .map(JoinHandle::join)
            .filter(Result::is_err)
            .count();
        (self.counters.snapshot(), panicked)
    }
}

fn worker_loop(index: usize, jobs: &MacroblockFifo, counters: &WorkerCounters) {
    loop {
        let mut job = match jobs.pop() {
            Ok(job) => job,
            Err(FifoError::Cancelled) => {
                debug!("Worker {index} cancelled");
                return;
            }
            Err(FifoError::Closed) => {
                debug!("Worker {index} finished");
                return;
            }
        };

        trace!("Worker {index} running {job:?}");
        let transformed = run_job(&mut job);

        counters.jobs.fetch_add(1, Ordering::Relaxed);
        if job.skipped {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
        }
        counters
            .blocks_transformed
            .fetch_add(transformed as u64, Ordering::Relaxed);

        // The job goes back to the pool before its picture may be delivered.
        let picture = job.picture.take();
        drop(job);
        if let Some(picture) = picture {
            picture.finish_job();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fifo::CancelToken;
    use crate::structs::macroblock::reconstruct_copy;
    use crate::structs::picture::{ChromaFormat, CodingType, PictureBuffer, PictureSink};
    use crate::utils::packet_pool::PacketPool;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Arc<PictureBuffer>>>);

    impl PictureSink for Collect {
        fn picture_ready(&self, picture: Arc<PictureBuffer>) {
            self.0.lock().unwrap().push(picture);
        }
    }

    fn negate(block: &mut [i16; 64]) {
        block.iter_mut().for_each(|c| *c = -*c);
    }

    #[test]
    fn sparse_blocks_skip_transform() -> anyhow::Result<()> {
        let pool = PacketPool::default();
        let picture = Arc::new(PictureBuffer::new(
            16,
            16,
            ChromaFormat::Yuv420,
            CodingType::Intra,
            None,
        ));

        let mut job = pool.acquire_job()?;
        job.bind(&picture, 0, 0);
        job.blocks[0] = [-40; 64];
        job.coding[0] = BlockCoding::Dense;
        job.inverse_transform[0] = negate;
        job.reconstruct[0] = reconstruct_copy;
        job.blocks[1] = [60; 64];
        job.coding[1] = BlockCoding::Sparse;
        job.inverse_transform[1] = negate;
        job.reconstruct[1] = reconstruct_copy;
        job.blocks[2] = [90; 64];
        job.reconstruct[2] = reconstruct_copy;

        assert_eq!(run_job(&mut job), 1);
        assert_eq!(picture.planes[0].at(0, 0), 40);
        assert_eq!(picture.planes[0].at(8, 0), 60);
        assert_eq!(picture.planes[0].at(0, 8), 0);
        Ok(())
    }

    #[test]
    fn last_job_delivers_picture() -> anyhow::Result<()> {
        let pool = PacketPool::default();
        let sink = Arc::new(Collect::default());
        let jobs = Arc::new(MacroblockFifo::new(8, CancelToken::new()));
        let workers = DecoderWorkerPool::spawn(Arc::clone(&jobs), 3)?;
        assert_eq!(workers.workers(), 3);

        let picture = Arc::new(PictureBuffer::new(
            64,
            32,
            ChromaFormat::Yuv420,
            CodingType::Intra,
            Some(sink.clone()),
        ));
        for address in 0..picture.mb_count() {
            let mut job = pool.acquire_job()?;
            job.bind(&picture, address % picture.mb_width, address / picture.mb_width);
            job.blocks[0] = [address as i16 + 1; 64];
            job.coding[0] = BlockCoding::Sparse;
            job.reconstruct[0] = reconstruct_copy;
            picture.begin_job();
            jobs.push(job)?;
        }
        picture.finish_job();
        jobs.close();

        let (stats, panicked) = workers.join();
        assert_eq!(panicked, 0);
        assert_eq!(stats.jobs, 8);

        let delivered = sink.0.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].planes[0].at(48, 16), 8);
        drop(delivered);
        drop(picture);
        assert_eq!(pool.stats().jobs_out, 0);
        Ok(())
    }

    #[test]
    fn cancel_releases_idle_workers() -> anyhow::Result<()> {
        let pool = PacketPool::default();
        let cancel = CancelToken::new();
        let jobs = Arc::new(MacroblockFifo::new(16, cancel.clone()));
        let workers = DecoderWorkerPool::spawn(Arc::clone(&jobs), 4)?;

        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        jobs.wake_all();

        let (stats, panicked) = workers.join();
        assert_eq!(panicked, 0);
        assert_eq!(stats.jobs, 0);

        assert!(jobs.push(pool.acquire_job()?).is_err());
        assert_eq!(pool.stats().jobs_out, 0);
        Ok(())
    }

    fn explode(_job: &MacroblockData, _picture: &PictureBuffer) {
        panic!("prediction failed");
    }

    #[test]
    fn panicking_worker_cancels_the_pool() -> anyhow::Result<()> {
        let pool = PacketPool::default();
        let cancel = CancelToken::new();
        let jobs = Arc::new(MacroblockFifo::new(16, cancel.clone()));
        let workers = DecoderWorkerPool::spawn(Arc::clone(&jobs), 3)?;

        let picture = Arc::new(PictureBuffer::new(
            16,
            16,
            ChromaFormat::Yuv420,
            CodingType::Intra,
            None,
        ));
        let mut job = pool.acquire_job()?;
        job.bind(&picture, 0, 0);
        job.predict = explode;
        jobs.push(job)?;

        // never closed: only the hook lets the other workers out
        let (_, panicked) = workers.join();
        assert_eq!(panicked, 1);
        assert!(cancel.is_cancelled());
        assert!(jobs.push(pool.acquire_job()?).is_err());
        Ok(())
    }
}
