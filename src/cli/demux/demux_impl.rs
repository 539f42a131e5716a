use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use indicatif::MultiProgress;

use super::pictures::PictureCounter;
use super::progress::{create_progress_bar, finalize_progress_bar};
use super::stream_writer::{StreamWriterConfig, write_stream};
use crate::cli::command::{Cli, DemuxArgs};
use crate::input::InputSource;
use crate::timestamp::time_str;
use mpegsys::process::parser_thread::HeaderOnlySyntax;
use mpegsys::process::session::{Session, SessionConfig, SessionReport};
use mpegsys::process::source::ByteSource;
use mpegsys::structs::picture::{CodingType, PictureSink};
use mpegsys::structs::start_code::StreamKind;

/// Video stream read when nothing is selected on a pipe.
const DEFAULT_PIPE_STREAM: u8 = 0xE0;

struct WrittenStream {
    stream_id: u8,
    path: Option<PathBuf>,
    written: Arc<AtomicU64>,
}

pub fn cmd_demux(args: &DemuxArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    if args.workers == 0 {
        anyhow::bail!("At least one worker thread is required");
    }

    log::info!(
        "Demultiplexing program stream: {} (strict mode: {})",
        args.input.display(),
        cli.strict
    );

    let input = InputSource::new(&args.input)?;
    let is_pipe = input.is_pipe();

    let config = SessionConfig {
        decoder_fifo_capacity: args.fifo_depth.max(1),
        workers: args.workers,
        fail_level: cli.fail_level(),
        max_picture_area: args.max_picture_area,
        ..SessionConfig::default()
    };
    let mut session = Session::new(input.into_source(), config);

    let streams = select_streams(&mut session, &args.streams, is_pipe)?;

    if let Some(dir) = &args.output_path {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        log::info!("Output path specified: {}", dir.display());
    }

    let pb = match multi {
        Some(multi) => Some(create_progress_bar(multi)?),
        None => None,
    };

    let pictures = Arc::new(PictureCounter::new(pb.clone()));
    let mut written_streams = Vec::new();

    for (stream_id, kind) in streams {
        if args.parse_video && kind == StreamKind::Video {
            let sink: Arc<dyn PictureSink> = pictures.clone();
            session.start_video_decoder(stream_id, Box::new(HeaderOnlySyntax), Some(sink))?;
            continue;
        }

        let path = args.output_path.as_deref().map(|dir| output_file(dir, stream_id));
        let written = Arc::new(AtomicU64::new(0));
        let config = StreamWriterConfig {
            stream_id,
            output: path.clone(),
            written: Arc::clone(&written),
            pb: pb.clone(),
        };
        session.attach_bitstream(stream_id, move |bs| write_stream(config, bs))?;

        log::debug!("Stream {stream_id:#04X} ({kind}) attached");
        written_streams.push(WrittenStream {
            stream_id,
            path,
            written,
        });
    }

    let start_time = std::time::Instant::now();
    session.run()?;
    let result = session.wait();
    finalize_progress_bar(&pb, result.is_ok());
    let report = result?;

    display_summary(
        &report,
        &written_streams,
        &pictures,
        start_time.elapsed().as_secs_f64(),
    );
    Ok(())
}

/// Resolves the streams to extract and their kinds.
///
/// Explicit ids are taken as given. Otherwise a seekable input is probed
/// for its audio and video streams and a pipe falls back to the first
/// video stream.
fn select_streams<S: ByteSource + 'static>(
    session: &mut Session<S>,
    requested: &[u8],
    is_pipe: bool,
) -> Result<Vec<(u8, StreamKind)>> {
    if is_pipe {
        if requested.is_empty() {
            log::info!("No stream selected on pipe input, using {DEFAULT_PIPE_STREAM:#04X}");
            return Ok(vec![(
                DEFAULT_PIPE_STREAM,
                StreamKind::from_stream_id(DEFAULT_PIPE_STREAM),
            )]);
        }
        return Ok(requested
            .iter()
            .map(|&id| (id, StreamKind::from_stream_id(id)))
            .collect());
    }

    let discovery = session.discover()?;

    if !requested.is_empty() {
        return Ok(requested
            .iter()
            .map(|&id| {
                let kind = discovery
                    .streams
                    .iter()
                    .find(|stream| stream.stream_id == id)
                    .map(|stream| stream.kind)
                    .unwrap_or_else(|| {
                        log::warn!("Stream {id:#04X} was not seen during discovery");
                        StreamKind::from_stream_id(id)
                    });
                (id, kind)
            })
            .collect());
    }

    let found: Vec<_> = discovery
        .streams
        .iter()
        .filter(|stream| matches!(stream.kind, StreamKind::Video | StreamKind::Audio))
        .map(|stream| (stream.stream_id, stream.kind))
        .collect();

    if found.is_empty() {
        anyhow::bail!(
            "No audio or video stream found in the first {} packets",
            discovery.packets_probed
        );
    }
    Ok(found)
}

fn output_file(dir: &Path, stream_id: u8) -> PathBuf {
    dir.join(format!("stream_{stream_id:02x}.es"))
}

fn display_summary(
    report: &SessionReport,
    written_streams: &[WrittenStream],
    pictures: &PictureCounter,
    elapsed_secs: f64,
) {
    let demux = &report.feed.demux;

    println!();
    println!("Demux Summary");
    println!("  Packets                   {}", demux.packets);
    println!("  Units routed              {}", report.feed.routed_units);
    println!("  Units dropped             {}", report.feed.unrouted_units);
    println!("  Resynchronizations        {}", demux.resyncs);
    println!("  Garbage bytes             {}", demux.garbage_bytes);
    println!("  Elapsed                   {}", time_str(elapsed_secs));
    println!();

    if !written_streams.is_empty() {
        println!("Elementary Streams");
        for stream in written_streams {
            let written = stream.written.load(Ordering::Relaxed);
            match &stream.path {
                Some(path) => println!(
                    "  {:#04X}                      {written} bytes -> {}",
                    stream.stream_id,
                    path.display()
                ),
                None => println!("  {:#04X}                      {written} bytes", stream.stream_id),
            }
        }
        println!();
    }

    for (stream_id, stats) in &report.parsers {
        println!("Video Stream {stream_id:#04X}");
        println!("  Sequence headers          {}", stats.sequences);
        println!("  Pictures parsed           {}", stats.pictures);
        println!("  Pictures trashed          {}", stats.pictures_trashed);
        println!("  Macroblocks               {}", stats.macroblocks);
        println!("  Parse errors              {}", stats.errors);
        println!();
    }

    if !report.parsers.is_empty() {
        println!("Completed Pictures");
        println!(
            "  I / P / B / D             {} / {} / {} / {}",
            pictures.count(CodingType::Intra),
            pictures.count(CodingType::Predicted),
            pictures.count(CodingType::Bidirectional),
            pictures.count(CodingType::DcOnly)
        );
        println!("  Macroblock jobs           {}", report.workers.jobs);
        println!();
    }

    log::debug!("Pool at shutdown: {:?}", report.pool);
    if report.drained_on_stop > 0 {
        log::debug!("{} queued items released on stop", report.drained_on_stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpegsys::process::source::SeekableSource;
    use std::io::Cursor;

    fn pes(stream_id: u8, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x00, 0x00, 0x01, stream_id];
        packet.extend(((payload.len() + 3) as u16).to_be_bytes());
        // second generation header without timestamps
        packet.extend([0x80, 0x00, 0x00]);
        packet.extend(payload);
        packet
    }

    fn session(bytes: Vec<u8>) -> Session<SeekableSource<Cursor<Vec<u8>>>> {
        Session::new(SeekableSource::new(Cursor::new(bytes)), SessionConfig::default())
    }

    #[test]
    fn discovery_selects_audio_and_video() -> Result<()> {
        let mut bytes = pes(0xE0, &[1; 32]);
        bytes.extend(pes(0xBD, &[2; 32]));
        bytes.extend(pes(0xC0, &[3; 32]));
        bytes.extend([0x00, 0x00, 0x01, 0xB9]);

        let mut session = session(bytes);
        let streams = select_streams(&mut session, &[], false)?;
        assert_eq!(
            streams,
            [(0xC0, StreamKind::Audio), (0xE0, StreamKind::Video)]
        );
        Ok(())
    }

    #[test]
    fn explicit_streams_keep_their_order() -> Result<()> {
        let mut session = session(pes(0xE0, &[1; 32]));
        let streams = select_streams(&mut session, &[0xC1, 0xE0], false)?;
        assert_eq!(
            streams,
            [(0xC1, StreamKind::Audio), (0xE0, StreamKind::Video)]
        );
        Ok(())
    }

    #[test]
    fn pipe_defaults_to_first_video_stream() -> Result<()> {
        let mut session = session(Vec::new());
        let streams = select_streams(&mut session, &[], true)?;
        assert_eq!(streams, [(0xE0, StreamKind::Video)]);
        Ok(())
    }

    #[test]
    fn output_file_names() {
        assert_eq!(
            output_file(Path::new("out"), 0xE0),
            Path::new("out").join("stream_e0.es")
        );
    }
}
