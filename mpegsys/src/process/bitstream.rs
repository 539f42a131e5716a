use std::io;
use std::sync::Arc;

use log::trace;

use crate::process::fifo::DecoderFifo;
use crate::structs::start_code::START_CODE_PREFIX;
use crate::structs::stream_unit::StreamUnit;
use crate::utils::errors::BitStreamError;

/// Bit-granularity reader over the units of one [`DecoderFifo`].
///
/// Bits are kept MSB-aligned in a 32-bit accumulator that is refilled one
/// byte at a time. When the current unit is exhausted it is dropped, which
/// returns it and its buffers to the pool, before blocking on the fifo for
/// the next one. Empty payload windows are skipped.
///
/// Only one thread consumes a given bit stream.
#[derive(Debug)]
pub struct BitStream {
    fifo: Arc<DecoderFifo>,
    unit: Option<StreamUnit>,
    buffer_index: usize,
    offset: usize,

    acc: u32,
    available: u32,

    pending_pts: Option<u64>,
    pending_clock_ref: Option<u64>,
    units_consumed: usize,
}

impl BitStream {
    pub fn new(fifo: Arc<DecoderFifo>) -> Self {
        Self {
            fifo,
            unit: None,
            buffer_index: 0,
            offset: 0,
            acc: 0,
            available: 0,
            pending_pts: None,
            pending_clock_ref: None,
            units_consumed: 0,
        }
    }

    pub fn fifo(&self) -> &Arc<DecoderFifo> {
        &self.fifo
    }

    /// Bits currently resident in the accumulator.
    pub fn available(&self) -> u32 {
        self.available
    }

    pub fn units_consumed(&self) -> usize {
        self.units_consumed
    }

    /// Presentation timestamp of the latest unit entered, once.
    pub fn take_pts(&mut self) -> Option<u64> {
        self.pending_pts.take()
    }

    /// Clock reference carried by the latest unit entered, once.
    pub fn take_clock_ref(&mut self) -> Option<u64> {
        self.pending_clock_ref.take()
    }

    fn next_byte(&mut self) -> Result<u8, BitStreamError> {
        loop {
            if let Some(unit) = &self.unit {
                if let Some(buffer) = unit.buffers().get(self.buffer_index) {
                    let payload = buffer.payload();
                    if let Some(&byte) = payload.get(self.offset) {
                        self.offset += 1;
                        return Ok(byte);
                    }
                    self.buffer_index += 1;
                    self.offset = 0;
                    continue;
                }
            }

            // Release the exhausted unit before blocking for the next one.
            self.unit = None;
            let unit = self.fifo.pop()?;
            trace!(
                "BitStream entering unit {:#04X}, {} bytes",
                unit.stream_id,
                unit.size()
            );

            if unit.pts.is_some() {
                self.pending_pts = unit.pts;
            }
            if unit.clock_ref.is_some() {
                self.pending_clock_ref = unit.clock_ref;
            }
            self.buffer_index = 0;
            self.offset = 0;
            self.units_consumed += 1;
            self.unit = Some(unit);
        }
    }

    /// Makes at least `n` bits resident, `1 <= n <= 32`.
    ///
    /// Refills happen a byte at a time and are kept when the request
    /// fails: bytes loaded before the input ran out stay resident. A
    /// request that still needs a byte while more than 24 bits are
    /// resident reports [`BitStreamError::AccumulatorOverflow`].
    pub fn need_bits(&mut self, n: u32) -> Result<(), BitStreamError> {
        debug_assert!((1..=32).contains(&n), "need_bits({n})");

        while self.available < n {
            if self.available > 24 {
                return Err(BitStreamError::AccumulatorOverflow {
                    requested: n,
                    available: self.available,
                });
            }
            let byte = self.next_byte()?;
            self.acc |= (byte as u32) << (24 - self.available);
            self.available += 8;
        }

        Ok(())
    }

    /// Discards `n` bits that [`need_bits`](Self::need_bits) made resident.
    pub fn dump_bits(&mut self, n: u32) {
        assert!(
            n <= self.available,
            "dump_bits({n}) with {} bits resident",
            self.available
        );
        self.acc = self.acc.checked_shl(n).unwrap_or(0);
        self.available -= n;
    }

    pub fn show_bits(&mut self, n: u32) -> Result<u32, BitStreamError> {
        self.need_bits(n)?;
        Ok(self.acc.checked_shr(32 - n).unwrap_or(0))
    }

    pub fn get_bits(&mut self, n: u32) -> Result<u32, BitStreamError> {
        let value = self.show_bits(n)?;
        self.dump_bits(n);
        Ok(value)
    }

    pub fn get_bit(&mut self) -> Result<bool, BitStreamError> {
        self.get_bits(1).map(|b| b == 1)
    }

    /// Drops the bits up to the next byte boundary.
    pub fn align_to_byte(&mut self) {
        self.dump_bits(self.available & 7);
    }

    /// Aligns and skips bytes until a start code is resident in the
    /// accumulator. Returns its code byte without consuming it.
    pub fn seek_start_code(&mut self) -> Result<u8, BitStreamError> {
        self.align_to_byte();
        let mut skipped = 0usize;

        loop {
            let word = self.show_bits(32)?;
            if word >> 8 == START_CODE_PREFIX {
                if skipped > 0 {
                    trace!("Skipped {skipped} bytes before start code {word:#010X}");
                }
                return Ok(word as u8);
            }
            self.dump_bits(8);
            skipped += 1;
        }
    }

    /// Reads whole bytes into `buf`. Returns fewer than `buf.len()` bytes
    /// only at end of stream.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, BitStreamError> {
        self.align_to_byte();

        let mut filled = 0;
        while filled < buf.len() && self.available >= 8 {
            buf[filled] = self.get_bits(8)? as u8;
            filled += 1;
        }

        while filled < buf.len() {
            if let Some(unit) = &self.unit {
                if let Some(buffer) = unit.buffers().get(self.buffer_index) {
                    let rest = buffer.payload().get(self.offset..).unwrap_or_default();
                    let n = rest.len().min(buf.len() - filled);
                    buf[filled..filled + n].copy_from_slice(&rest[..n]);
                    filled += n;
                    self.offset += n;
                    if n == rest.len() {
                        self.buffer_index += 1;
                        self.offset = 0;
                    }
                    continue;
                }
            }

            match self.next_byte() {
                Ok(byte) => {
                    buf[filled] = byte;
                    filled += 1;
                }
                Err(BitStreamError::EndOfStream) => break,
                Err(e) => return Err(e),
            }
        }

        Ok(filled)
    }
}

impl io::Read for BitStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.read_bytes(buf)
            .map_err(|e| io::Error::other(e.to_string()))
    }
}
