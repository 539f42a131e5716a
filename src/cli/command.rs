use std::path::PathBuf;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};

#[derive(Debug, ClapParser)]
#[command(
    name         = env!("CARGO_PKG_NAME"),
    version      = env!("CARGO_PKG_VERSION"),
    long_version = concat!(
        env!("CARGO_PKG_VERSION"),
        "\nmpegsys ", env!("MPEGSYS_VERSION"),
        "\nbuilt ", env!("BUILD_TIMESTAMP"),
    ),
    author       = env!("CARGO_PKG_AUTHORS"),
    about        = "Tools for inspecting and demultiplexing MPEG program streams",
    long_about   = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Treat warnings as fatal errors (fail on first warning).
    #[arg(long, global = true)]
    pub strict: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show progress bars during operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Severity at which recoverable stream errors stop processing.
    pub fn fail_level(&self) -> log::Level {
        if self.strict {
            log::Level::Warn
        } else {
            log::Level::Error
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Split a program stream into its elementary streams.
    Demux(DemuxArgs),

    /// Print stream information
    Info(InfoArgs),
}

#[derive(Debug, Args)]
pub struct DemuxArgs {
    /// Input program stream (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Directory receiving one `stream_<id>.es` file per selected stream.
    /// Without it the streams are read and counted only.
    #[arg(long, value_name = "DIR")]
    pub output_path: Option<PathBuf>,

    /// Stream id to extract, decimal or 0x-prefixed (repeatable).
    /// Defaults to every audio and video stream, or 0xE0 for stdin.
    #[arg(long = "stream", value_name = "ID", value_parser = parse_stream_id)]
    pub streams: Vec<u8>,

    /// Run video streams through the picture pipeline instead of writing them.
    #[arg(long)]
    pub parse_video: bool,

    /// Macroblock worker threads per parsed video stream.
    #[arg(long, value_name = "N", default_value_t = 2)]
    pub workers: usize,

    /// Units queued per stream before the demuxer waits.
    #[arg(long, value_name = "N", default_value_t = 32)]
    pub fifo_depth: usize,

    /// Largest picture, in luma samples, a parsed video sequence may announce.
    #[arg(long, value_name = "SAMPLES", default_value_t = 4096 * 4096)]
    pub max_picture_area: u64,
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Input program stream.
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Also write the stream table as YAML.
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Packets read before discovery gives up.
    #[arg(long, value_name = "N", default_value_t = 4096)]
    pub probe_packets: usize,
}

/// Parses `224`, `0xE0` or `0XE0`.
pub fn parse_stream_id(value: &str) -> Result<u8, String> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse::<u8>(),
    };
    parsed.map_err(|e| format!("invalid stream id {value:?}: {e}"))
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    /// Convert LogLevel to log::LevelFilter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_ids() {
        assert_eq!(parse_stream_id("0xE0"), Ok(0xE0));
        assert_eq!(parse_stream_id("0Xc0"), Ok(0xC0));
        assert_eq!(parse_stream_id("189"), Ok(0xBD));
        assert!(parse_stream_id("0x1E0").is_err());
        assert!(parse_stream_id("video").is_err());
    }

    #[test]
    fn demux_arguments() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "mpegsysd",
            "--strict",
            "demux",
            "movie.mpg",
            "--stream",
            "0xE0",
            "--stream",
            "192",
            "--workers",
            "4",
        ])?;
        assert_eq!(cli.fail_level(), log::Level::Warn);

        let Commands::Demux(args) = cli.command else {
            anyhow::bail!("expected the demux command");
        };
        assert_eq!(args.streams, [0xE0, 0xC0]);
        assert_eq!(args.workers, 4);
        assert_eq!(args.max_picture_area, 4096 * 4096);
        assert!(args.output_path.is_none());
        Ok(())
    }
}
