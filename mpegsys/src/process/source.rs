//! Upstream byte sources.

use std::io::{self, Read, Seek, SeekFrom};

/// Where the demuxer reads raw multiplexed bytes from.
///
/// A successful read of zero bytes means end of stream. Only seekable
/// sources support discovery.
pub trait ByteSource: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn is_seekable(&self) -> bool {
        false
    }

    fn seek(&mut self, _offset: u64) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "source is not seekable",
        ))
    }
}

/// A forward-only source (pipe, socket, stdin).
#[derive(Debug)]
pub struct StreamSource<R> {
    inner: R,
}

impl<R: Read + Send> StreamSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read + Send> ByteSource for StreamSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.inner.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }
}

/// A source supporting absolute seeks (files, in-memory cursors).
#[derive(Debug)]
pub struct SeekableSource<R> {
    inner: R,
}

impl<R: Read + Seek + Send> SeekableSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek + Send> ByteSource for SeekableSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.inner.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(offset)).map(|_| ())
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn is_seekable(&self) -> bool {
        (**self).is_seekable()
    }

    fn seek(&mut self, offset: u64) -> io::Result<()> {
        (**self).seek(offset)
    }
}

/// Fills `buf` completely. Returns the number of bytes read, which is
/// shorter than `buf` only at end of stream.
pub fn read_full<S: ByteSource + ?Sized>(source: &mut S, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[test]
fn read_full_stops_at_end() -> anyhow::Result<()> {
    let mut source = StreamSource::new(&[1u8, 2, 3][..]);
    let mut buf = [0u8; 4];
    assert_eq!(read_full(&mut source, &mut buf)?, 3);
    assert_eq!(read_full(&mut source, &mut buf)?, 0);
    assert!(!source.is_seekable());
    assert!(source.seek(0).is_err());
    Ok(())
}
