use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;

use super::command::{Cli, InfoArgs};
use crate::input::InputSource;
use crate::timestamp::ticks_str;
use mpegsys::process::demux::{DemuxConfig, Demuxer, DiscoveryReport};
use mpegsys::structs::pack_header::PackGeneration;
use mpegsys::utils::packet_pool::PacketPool;

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing program stream: {}", args.input.display());

    let input = InputSource::new(&args.input)?;
    if input.is_pipe() {
        anyhow::bail!("Stream information needs a seekable input, not a pipe");
    }

    let config = DemuxConfig {
        probe_packets: args.probe_packets,
        ..DemuxConfig::default()
    };
    let mut demuxer = Demuxer::with_pool(input.into_source(), PacketPool::default(), config);
    demuxer.set_fail_level(cli.fail_level());

    let pb = match multi {
        Some(multi) => {
            let pb = multi.add(ProgressBar::new_spinner());
            pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
            pb.enable_steady_tick(std::time::Duration::from_millis(100));
            pb.set_message("Probing packets...");
            Some(pb)
        }
        None => None,
    };

    let discovery = demuxer.discover();
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    let discovery = discovery.context("Stream discovery failed")?;

    let report = InfoReport::new(&args.input, &discovery);
    if report.streams.is_empty() {
        println!("No elementary stream found in the first {} packets.", report.packets_probed);
        println!("This doesn't appear to be a valid MPEG program stream.");
    } else {
        display_report(&report);
    }

    if let Some(path) = &args.report {
        write_report(path, &report)?;
        log::info!("Stream report written to {}", path.display());
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct InfoReport {
    input: String,
    pack_generation: Option<&'static str>,
    packets_probed: usize,
    program_stream_map: Option<MapReport>,
    streams: Vec<StreamReport>,
}

#[derive(Debug, Serialize)]
struct MapReport {
    version: u8,
    entries: Vec<MapEntry>,
}

#[derive(Debug, Serialize)]
struct MapEntry {
    stream_id: String,
    stream_type: String,
}

#[derive(Debug, Serialize)]
struct StreamReport {
    stream_id: String,
    kind: String,
    units: usize,
    bytes: usize,
    first_pts: Option<u64>,
    first_pts_time: Option<String>,
}

impl InfoReport {
    fn new(input: &Path, discovery: &DiscoveryReport) -> Self {
        Self {
            input: input.display().to_string(),
            pack_generation: discovery.pack_generation.map(|generation| match generation {
                PackGeneration::First => "MPEG-1",
                PackGeneration::Second => "MPEG-2",
            }),
            packets_probed: discovery.packets_probed,
            program_stream_map: discovery.program_stream_map.as_ref().map(|psm| MapReport {
                version: psm.version,
                entries: psm
                    .entries
                    .iter()
                    .map(|entry| MapEntry {
                        stream_id: format!("{:#04X}", entry.stream_id),
                        stream_type: format!("{:#04X}", entry.stream_type),
                    })
                    .collect(),
            }),
            streams: discovery
                .streams
                .iter()
                .map(|stream| StreamReport {
                    stream_id: format!("{:#04X}", stream.stream_id),
                    kind: stream.kind.to_string(),
                    units: stream.units,
                    bytes: stream.bytes,
                    first_pts: stream.first_pts,
                    first_pts_time: stream.first_pts.map(ticks_str),
                })
                .collect(),
        }
    }
}

fn display_report(report: &InfoReport) {
    println!();
    println!("Program Stream Information");
    println!("==========================");
    println!();

    println!(
        "Pack header                 {}",
        report.pack_generation.unwrap_or("none")
    );
    println!("Packets probed              {}", report.packets_probed);
    match &report.program_stream_map {
        Some(map) => println!(
            "Program stream map          version {}, {} entries",
            map.version,
            map.entries.len()
        ),
        None => println!("Program stream map          none"),
    }
    println!();

    println!("Elementary Streams");
    println!("  {:<6}  {:<8}  {:>8}  {:>12}  First PTS", "Id", "Kind", "Units", "Bytes");
    for stream in &report.streams {
        println!(
            "  {:<6}  {:<8}  {:>8}  {:>12}  {}",
            stream.stream_id,
            stream.kind,
            stream.units,
            stream.bytes,
            stream.first_pts_time.as_deref().unwrap_or("-")
        );
    }
    println!();
}

fn write_report(path: &Path, report: &InfoReport) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create report {}", path.display()))?;
    serde_yaml_ng::to_writer(BufWriter::new(file), report)
        .with_context(|| format!("Failed to write report {}", path.display()))?;
    Ok(())
}
