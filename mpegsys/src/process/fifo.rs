use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::structs::macroblock::MacroblockJob;
use crate::structs::stream_unit::StreamUnit;
use crate::utils::errors::FifoError;

/// Session-wide stop request shared by every fifo and thread of a session.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag. Threads blocked in a fifo only notice it once the
    /// fifo is woken with [`BoundedFifo::wake_all`].
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct Ring<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    closed: bool,
}

impl<T> Ring<T> {
    fn is_empty(&self) -> bool {
        self.head == self.tail
    }
}

/// Bounded blocking circular queue.
///
/// `N` slots, `N` a power of two; the queue is empty when `head == tail`
/// and full when `(tail + 1) mod N == head`, so at most `N - 1` items are
/// in flight. `push` blocks while full and `pop` while empty. Both return
/// [`FifoError::Cancelled`] once the shared [`CancelToken`] is set and the
/// fifo woken; `pop` returns [`FifoError::Closed`] after [`close`] once the
/// remaining items are drained.
///
/// Items are never dropped while the fifo lock is held, so releasing them
/// to their pool cannot nest the pool lock inside the fifo lock.
///
/// [`close`]: BoundedFifo::close
#[derive(Debug)]
pub struct BoundedFifo<T> {
    ring: Mutex<Ring<T>>,
    data_available: Condvar,
    space_available: Condvar,
    cancel: CancelToken,
    mask: usize,
}

/// Stream units between the demuxer and one elementary stream consumer.
pub type DecoderFifo = BoundedFifo<StreamUnit>;
/// Macroblock jobs between a parser thread and the worker pool.
pub type MacroblockFifo = BoundedFifo<MacroblockJob>;

impl<T> BoundedFifo<T> {
    /// Creates a fifo with `capacity` slots, rounded up to a power of two
    /// (minimum 2).
    pub fn new(capacity: usize, cancel: CancelToken) -> Self {
        let size = capacity.max(2).next_power_of_two();
        Self {
            ring: Mutex::new(Ring {
                slots: (0..size).map(|_| None).collect(),
                head: 0,
                tail: 0,
                closed: false,
            }),
            data_available: Condvar::new(),
            space_available: Condvar::new(),
            cancel,
            mask: size - 1,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring<T>> {
        self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of slots; one less than this can be occupied.
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    pub fn len(&self) -> usize {
        let ring = self.lock();
        ring.tail.wrapping_sub(ring.head) & self.mask
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Appends `item`, blocking while the fifo is full. On cancellation or
    /// after [`close`](Self::close) the item is dropped and the error
    /// returned.
    pub fn push(&self, item: T) -> Result<(), FifoError> {
        let mut ring = self.lock();

        let err = loop {
            if self.cancel.is_cancelled() {
                break FifoError::Cancelled;
            }
            if ring.closed {
                break FifoError::Closed;
            }
            if (ring.tail + 1) & self.mask != ring.head {
                let tail = ring.tail;
                ring.slots[tail] = Some(item);
                ring.tail = (tail + 1) & self.mask;
                drop(ring);
                self.data_available.notify_one();
                return Ok(());
            }
            ring = self
                .space_available
                .wait(ring)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        };

        drop(ring);
        drop(item);
        Err(err)
    }

    /// Removes the oldest item, blocking while the fifo is empty.
    pub fn pop(&self) -> Result<T, FifoError> {
        let mut ring = self.lock();

        loop {
            if self.cancel.is_cancelled() {
                return Err(FifoError::Cancelled);
            }
            if !ring.is_empty() {
                if let Some(item) = self.take_head(&mut ring) {
                    drop(ring);
                    self.space_available.notify_one();
                    return Ok(item);
                }
                continue;
            }
            if ring.closed {
                return Err(FifoError::Closed);
            }
            ring = self
                .data_available
                .wait(ring)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Removes the oldest item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut ring = self.lock();
        while !ring.is_empty() {
            if let Some(item) = self.take_head(&mut ring) {
                drop(ring);
                self.space_available.notify_one();
                return Some(item);
            }
        }
        None
    }

    fn take_head(&self, ring: &mut Ring<T>) -> Option<T> {
        let head = ring.head;
        ring.head = (head + 1) & self.mask;
        ring.slots[head].take()
    }

    /// Empties the fifo and drops every queued item outside the lock.
    /// Returns the number of items dropped.
    pub fn drain(&self) -> usize {
        let items = {
            let mut ring = self.lock();
            let mut items = Vec::new();
            while !ring.is_empty() {
                if let Some(item) = self.take_head(&mut ring) {
                    items.push(item);
                }
            }
            items
        };
        self.space_available.notify_all();
        items.len()
    }

    /// Marks the end of input. Queued items stay poppable; pushes fail.
    pub fn close(&self) {
        self.lock().closed = true;
        self.data_available.notify_all();
        self.space_available.notify_all();
    }

    /// Wakes every waiter so it re-checks the cancellation flag.
    pub fn wake_all(&self) {
        // Taking the lock orders the wake after any waiter's predicate check.
        drop(self.lock());
        self.data_available.notify_all();
        self.space_available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::packet_pool::PacketPool;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn full_at_capacity_minus_one() -> anyhow::Result<()> {
        let fifo = BoundedFifo::new(3, CancelToken::new());
        assert_eq!(fifo.capacity(), 4);

        for i in 0..3 {
            fifo.push(i)?;
        }
        assert_eq!(fifo.len(), 3);
        assert_eq!(fifo.try_pop(), Some(0));
        fifo.push(3)?;
        assert_eq!(fifo.len(), 3);
        Ok(())
    }

    #[test]
    fn concurrent_push_pop_keeps_order() -> anyhow::Result<()> {
        let fifo = Arc::new(BoundedFifo::new(8, CancelToken::new()));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let producer = {
            let fifo = Arc::clone(&fifo);
            let max_seen = Arc::clone(&max_seen);
            thread::spawn(move || {
                for i in 0..10_000usize {
                    if fifo.push(i).is_err() {
                        break;
                    }
                    max_seen.fetch_max(fifo.len(), Ordering::SeqCst);
                }
                fifo.close();
            })
        };

        let mut received = Vec::with_capacity(10_000);
        while let Ok(i) = fifo.pop() {
            max_seen.fetch_max(fifo.len(), Ordering::SeqCst);
            received.push(i);
        }
        producer.join().unwrap();

        assert_eq!(received, (0..10_000).collect::<Vec<_>>());
        assert!(max_seen.load(Ordering::SeqCst) < fifo.capacity());
        Ok(())
    }

    #[test]
    fn close_drains_then_reports_closed() -> anyhow::Result<()> {
        let fifo = BoundedFifo::new(4, CancelToken::new());
        fifo.push(1)?;
        fifo.push(2)?;
        fifo.close();

        assert_eq!(fifo.push(3), Err(FifoError::Closed));
        assert_eq!(fifo.pop(), Ok(1));
        assert_eq!(fifo.pop(), Ok(2));
        assert_eq!(fifo.pop(), Err(FifoError::Closed));
        Ok(())
    }

    #[test]
    fn cancel_wakes_blocked_consumers() {
        let cancel = CancelToken::new();
        let fifo: Arc<BoundedFifo<u32>> = Arc::new(BoundedFifo::new(4, cancel.clone()));

        let waiters = (0..4)
            .map(|_| {
                let fifo = Arc::clone(&fifo);
                thread::spawn(move || fifo.pop())
            })
            .collect::<Vec<_>>();

        thread::sleep(std::time::Duration::from_millis(20));
        cancel.cancel();
        fifo.wake_all();

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Err(FifoError::Cancelled));
        }
    }

    #[test]
    fn cancel_wakes_blocked_producer() {
        let cancel = CancelToken::new();
        let fifo = Arc::new(BoundedFifo::new(2, cancel.clone()));
        fifo.push(0u32).unwrap();

        let producer = {
            let fifo = Arc::clone(&fifo);
            thread::spawn(move || fifo.push(1))
        };

        thread::sleep(std::time::Duration::from_millis(20));
        cancel.cancel();
        fifo.wake_all();
        assert_eq!(producer.join().unwrap(), Err(FifoError::Cancelled));
    }

    #[test]
    fn drain_returns_units_to_pool() -> anyhow::Result<()> {
        let pool = PacketPool::default();
        let fifo = DecoderFifo::new(32, CancelToken::new());

        for _ in 0..10 {
            let mut unit = pool.acquire_stream_unit()?;
            unit.push_buffer(pool.acquire_buffer(64)?);
            fifo.push(unit)?;
        }
        assert_eq!(pool.stats().outstanding(), 20);

        assert_eq!(fifo.drain(), 10);
        assert!(fifo.is_empty());
        assert_eq!(pool.stats().outstanding(), 0);
        Ok(())
    }
}
