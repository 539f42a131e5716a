use std::fmt;

use crate::structs::buffer::Buffer;
use crate::utils::packet_pool::PacketPool;

/// A reassembled elementary-stream payload.
///
/// Holds an ordered chain of [`Buffer`]s whose payload windows, read in
/// order, form the unit's bytes. Timestamps are 33-bit 90 kHz values taken
/// from the first fragment; `None` means the value is inherited from
/// context.
pub struct StreamUnit {
    buffers: Vec<Buffer>,
    pool: PacketPool,

    /// Start code byte of the packets carried (`0xE0` for the first video
    /// stream, `0xBA` for a pack header, ...).
    pub stream_id: u8,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    pub data_alignment: bool,
    /// Most recent system clock reference seen before this unit, set on the
    /// first unit of each stream after a pack header.
    pub clock_ref: Option<u64>,
    /// Set when a fragment length disagrees with the declared packet size.
    pub corrupted: bool,
    size: usize,
}

impl StreamUnit {
    pub(crate) fn from_pool(buffers: Vec<Buffer>, pool: PacketPool) -> Self {
        Self {
            buffers,
            pool,
            stream_id: 0,
            pts: None,
            dts: None,
            data_alignment: false,
            clock_ref: None,
            corrupted: false,
            size: 0,
        }
    }

    /// Appends a fragment to the chain.
    pub fn push_buffer(&mut self, buffer: Buffer) {
        self.size += buffer.payload_len();
        self.buffers.push(buffer);
    }

    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    /// Total payload bytes over all chained buffers.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn fragment_count(&self) -> usize {
        self.buffers.len()
    }

    /// Iterates the payload bytes across buffer boundaries.
    pub fn bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.buffers.iter().flat_map(|b| b.payload().iter().copied())
    }

    /// First `n` payload bytes, or fewer if the unit is shorter.
    pub fn peek(&self, n: usize) -> Vec<u8> {
        self.bytes().take(n).collect()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size);
        self.buffers
            .iter()
            .for_each(|b| out.extend_from_slice(b.payload()));
        out
    }
}

impl fmt::Debug for StreamUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamUnit")
            .field("stream_id", &format_args!("{:#04X}", self.stream_id))
            .field("size", &self.size)
            .field("fragments", &self.buffers.len())
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("data_alignment", &self.data_alignment)
            .field("clock_ref", &self.clock_ref)
            .finish()
    }
}

impl Drop for StreamUnit {
    fn drop(&mut self) {
        let mut chain = std::mem::take(&mut self.buffers);
        chain.clear();
        self.pool.recycle_chain(chain);
    }
}

#[test]
fn bytes_cross_fragments() -> anyhow::Result<()> {
    let pool = PacketPool::default();
    let mut unit = pool.acquire_stream_unit()?;

    for chunk in [&[1u8, 2, 3][..], &[], &[4, 5]] {
        let mut buffer = pool.acquire_buffer(chunk.len())?;
        buffer.as_mut_slice().copy_from_slice(chunk);
        unit.push_buffer(buffer);
    }

    assert_eq!(unit.size(), 5);
    assert_eq!(unit.fragment_count(), 3);
    assert_eq!(unit.to_vec(), vec![1, 2, 3, 4, 5]);
    assert_eq!(unit.peek(4), vec![1, 2, 3, 4]);

    drop(unit);
    assert_eq!(pool.stats().outstanding(), 0);
    Ok(())
}
