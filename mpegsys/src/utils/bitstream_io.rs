//! Bitstream I/O utilities for header parsing.
//!
//! Wraps a big-endian `bitstream_io` reader over a byte slice. Used for the
//! fixed-layout system headers (pack, PES, program stream map) that are
//! always contained in one framed packet.

use std::io;

use bitstream_io::{BigEndian, BitRead, BitReader, UnsignedInteger};

#[derive(Debug)]
pub struct BitstreamIoReader<R: io::Read + io::Seek> {
    bs: BitReader<R, BigEndian>,
    len: u64,
}

pub type BsIoSliceReader<'a> = BitstreamIoReader<io::Cursor<&'a [u8]>>;

impl<R> BitstreamIoReader<R>
where
    R: io::Read + io::Seek,
{
    pub fn new(read: R, len_bytes: u64) -> Self {
        Self {
            bs: BitReader::new(read),
            len: len_bytes << 3,
        }
    }

    #[inline(always)]
    pub fn get(&mut self) -> io::Result<bool> {
        self.bs.read_bit()
    }

    #[inline(always)]
    pub fn get_n<I: UnsignedInteger>(&mut self, n: u32) -> io::Result<I> {
        match self.bs.read_unsigned_var(n) {
            Ok(val) => Ok(val),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "get_n({}): out of bounds bits at {}",
                    n,
                    self.bs.position_in_bits().unwrap_or(0)
                ),
            )),
            Err(e) => Err(e),
        }
    }

    /// Reads a 33-bit timestamp split as 3/15/15 bits with a marker bit
    /// after each part, as carried by pack and PES headers.
    pub fn get_timestamp(&mut self) -> io::Result<u64> {
        let high: u64 = self.get_n(3)?;
        self.skip_n(1)?;
        let mid: u64 = self.get_n(15)?;
        self.skip_n(1)?;
        let low: u64 = self.get_n(15)?;
        self.skip_n(1)?;

        Ok(high << 30 | mid << 15 | low)
    }

    #[inline(always)]
    pub fn available(&mut self) -> io::Result<u64> {
        self.bs
            .position_in_bits()
            .map(|pos| self.len.saturating_sub(pos))
    }

    #[inline(always)]
    pub fn skip_n(&mut self, n: u32) -> io::Result<()> {
        if n <= 64 {
            self.bs.skip(n)
        } else {
            self.available().and_then(|avail| {
                if n as u64 > avail {
                    Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "skip_n: out of bounds bits",
                    ))
                } else {
                    self.bs.skip(n)
                }
            })
        }
    }

    /// Skips whole bytes; the reader must be byte aligned.
    pub fn skip_bytes(&mut self, n: usize) -> io::Result<()> {
        self.skip_n((n as u32).saturating_mul(8))
    }
}

impl<'a> BsIoSliceReader<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        let len = buf.len() as u64;
        let read = io::Cursor::new(buf);

        Self::new(read, len)
    }
}

#[test]
fn reads_split_timestamp() -> anyhow::Result<()> {
    // '0010' + PTS 0x1_2345_6789 with marker bits set
    let pts: u64 = 0x1_2345_6789;
    let bytes = [
        0x20 | ((pts >> 29) & 0x0E) as u8 | 1,
        (pts >> 22) as u8,
        ((pts >> 14) & 0xFE) as u8 | 1,
        (pts >> 7) as u8,
        ((pts << 1) & 0xFE) as u8 | 1,
    ];

    let mut reader = BsIoSliceReader::from_slice(&bytes);
    reader.skip_n(4)?;
    assert_eq!(reader.get_timestamp()?, pts);
    assert_eq!(reader.available()?, 0);
    assert!(reader.get().is_err());
    Ok(())
}
