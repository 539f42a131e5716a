use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use mpegsys::process::bitstream::BitStream;
use mpegsys::utils::errors::BitStreamError;

const CHUNK_SIZE: usize = 64 * 1024;

pub struct StreamWriterConfig {
    pub stream_id: u8,
    /// `None` reads the stream without keeping it.
    pub output: Option<PathBuf>,
    pub written: Arc<AtomicU64>,
    pub pb: Option<ProgressBar>,
}

/// Copies the elementary stream bytes of one bit stream to its output
/// until the stream ends or the session is stopped.
pub fn write_stream(config: StreamWriterConfig, mut bs: BitStream) -> Result<()> {
    let StreamWriterConfig {
        stream_id,
        output,
        written,
        pb,
    } = config;

    let mut writer: Box<dyn Write> = match &output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(io::sink()),
    };

    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match bs.read_bytes(&mut buffer) {
            Ok(n) => n,
            Err(BitStreamError::Cancelled) => {
                log::debug!("Stream {stream_id:#04X} writer stopped");
                break;
            }
            Err(e) => return Err(e.into()),
        };

        writer.write_all(&buffer[..n])?;
        written.fetch_add(n as u64, Ordering::Relaxed);
        if let Some(pb) = &pb {
            pb.inc(n as u64);
        }

        if n < buffer.len() {
            break;
        }
    }

    writer.flush()?;
    log::debug!(
        "Stream {stream_id:#04X}: {} bytes from {} units",
        written.load(Ordering::Relaxed),
        bs.units_consumed()
    );
    Ok(())
}
