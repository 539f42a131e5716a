#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! Ingestion and decode core for MPEG program streams (ISO/IEC 11172-1 and
//! 13818-1 system layer) carrying MPEG-1/2 video.
//!
//! ### Pipeline
//!
//! ```text
//! ByteSource -> Demuxer -> DecoderFifo (per stream) -> BitStream
//!            -> ParserThread -> MacroblockFifo -> DecoderWorkerPool -> PictureSink
//! ```
//!
//! Every stage runs on its own OS thread and the fifos between them are
//! bounded, so a slow consumer throttles the demuxer instead of letting
//! memory grow. Buffers, stream units and macroblock jobs come from one
//! [`utils::packet_pool::PacketPool`] and return to it when dropped.
//!
//! ### Error Recovery
//!
//! Garbage between packets is skipped by start code resynchronisation and
//! malformed headers drop only the packet they belong to. I/O failures,
//! unknown pack header variants and pool exhaustion end the session.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mpegsys::process::session::{Session, SessionConfig};
//! use mpegsys::process::source::SeekableSource;
//! use std::io::Read;
//!
//! let file = std::fs::File::open("movie.mpg")?;
//! let mut session = Session::new(SeekableSource::new(file), SessionConfig::default());
//!
//! for stream in session.discover()?.streams {
//!     println!("{:#04X}: {}", stream.stream_id, stream.kind);
//! }
//!
//! session.attach_bitstream(0xE0, |mut bs| {
//!     let mut es = Vec::new();
//!     bs.read_to_end(&mut es)?;
//!     println!("{} bytes of video", es.len());
//!     Ok(())
//! })?;
//! session.run()?;
//! let report = session.wait()?;
//! println!("{} packets", report.feed.demux.packets);
//! # Ok::<(), anyhow::Error>(())
//! ```

/// Pipeline stages.
///
/// 1. **Demultiplexing** ([`process::demux`]): frames packets from a
///    [`process::source::ByteSource`] and reassembles stream units.
///
/// 2. **Queueing** ([`process::fifo`]): bounded blocking fifos with shared
///    cancellation.
///
/// 3. **Bit reading** ([`process::bitstream`]): bit cursor over the units
///    of one stream.
///
/// 4. **Video parsing** ([`process::parser_thread`]) and **reconstruction**
///    ([`process::worker_pool`]), paced by [`process::synchro`].
///
/// 5. **Orchestration** ([`process::session`]): owns threads, fifos and
///    the pool of one session.
pub mod process;

/// Wire format and pipeline data structures.
///
/// - **Start codes** ([`structs::start_code`]): code values and stream kinds
/// - **Pack headers** ([`structs::pack_header`]): both generations, SCR
/// - **PES headers** ([`structs::pes_header`]): timestamps and alignment
/// - **Program stream map** ([`structs::psm`]): stream types
/// - **Buffers and units** ([`structs::buffer`], [`structs::stream_unit`])
/// - **Video headers** ([`structs::video_header`]): sequence to slice
/// - **Macroblock jobs** ([`structs::macroblock`]) and **pictures** ([`structs::picture`])
pub mod structs;

/// Supporting infrastructure.
///
/// - **Bitstream I/O** ([`utils::bitstream_io`]): header bit reader
/// - **Error Handling** ([`utils::errors`]): error types
/// - **Packet Pool** ([`utils::packet_pool`]): freelist allocator
pub mod utils;
