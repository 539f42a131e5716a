use std::fmt;

use crate::utils::packet_pool::PacketPool;

/// A pooled byte region with a payload window `[start, end)`.
///
/// Buffers are only created by [`PacketPool::acquire_buffer`] and go back
/// to their pool when dropped.
pub struct Buffer {
    data: Vec<u8>,
    start: usize,
    end: usize,
    pool: PacketPool,
}

impl Buffer {
    pub(crate) fn from_pool(data: Vec<u8>, pool: PacketPool) -> Self {
        let end = data.len();
        Self {
            data,
            start: 0,
            end,
            pool,
        }
    }

    /// The whole region, headers included.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The bytes inside the payload window.
    pub fn payload(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    pub fn payload_len(&self) -> usize {
        self.end - self.start
    }

    pub fn payload_start(&self) -> usize {
        self.start
    }

    pub fn payload_end(&self) -> usize {
        self.end
    }

    /// Moves the payload window. Panics if the window does not fit the
    /// buffer.
    pub fn set_payload_window(&mut self, start: usize, end: usize) {
        assert!(
            start <= end && end <= self.data.len(),
            "payload window [{start}, {end}) outside buffer of {} bytes",
            self.data.len()
        );
        self.start = start;
        self.end = end;
    }

    /// Drops `count` bytes from the front of the payload window, clamped to
    /// the window's end.
    pub fn advance_start(&mut self, count: usize) {
        self.start = (self.start + count).min(self.end);
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        self.payload()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.data.len())
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.pool.recycle_buffer(data);
    }
}

#[test]
fn payload_window() -> anyhow::Result<()> {
    let pool = PacketPool::default();
    let mut buffer = pool.acquire_buffer(16)?;
    buffer
        .as_mut_slice()
        .iter_mut()
        .enumerate()
        .for_each(|(i, b)| *b = i as u8);

    buffer.set_payload_window(6, 16);
    assert_eq!(buffer.payload_len(), 10);
    assert_eq!(buffer.payload()[0], 6);

    buffer.advance_start(20);
    assert_eq!(buffer.payload_len(), 0);
    assert_eq!(buffer.payload_start(), 16);
    Ok(())
}
