use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use mpegsys::process::source::{ByteSource, SeekableSource, StreamSource};

/// Unified input that handles both file and pipe input.
///
/// Files are seekable and support stream discovery; stdin is forward-only.
pub struct InputSource {
    source: Box<dyn ByteSource>,
    is_pipe: bool,
}

impl InputSource {
    /// Opens `input_path`; use "-" for stdin pipe input.
    pub fn new<P: AsRef<Path>>(input_path: P) -> Result<Self> {
        let path = input_path.as_ref();
        let is_pipe = path.to_string_lossy() == "-";

        let source: Box<dyn ByteSource> = if is_pipe {
            Box::new(StreamSource::new(io::stdin()))
        } else {
            let file = File::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            Box::new(SeekableSource::new(BufReader::with_capacity(
                256 * 1024,
                file,
            )))
        };

        Ok(Self { source, is_pipe })
    }

    /// Check if this is pipe input
    pub fn is_pipe(&self) -> bool {
        self.is_pipe
    }

    pub fn into_source(self) -> Box<dyn ByteSource> {
        self.source
    }
}
