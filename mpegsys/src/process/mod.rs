/// Upstream byte sources.
///
/// Provides the [`ByteSource`](source::ByteSource) trait with forward-only
/// and seekable implementations.
pub mod source;

/// Program stream demultiplexing.
///
/// Provides the [`Demuxer`](demux::Demuxer) that frames packets, recovers
/// from garbage and reassembles [`StreamUnit`](crate::structs::stream_unit::StreamUnit)s.
pub mod demux;

/// Bounded blocking fifos between pipeline threads.
pub mod fifo;

/// Bit-granularity reading across stream units.
pub mod bitstream;

/// Clock recovery and presentation time correction.
pub mod synchro;

/// Video structure parsing and macroblock job emission.
pub mod parser_thread;

/// Macroblock reconstruction threads.
pub mod worker_pool;

/// Session controller owning every thread of a pipeline.
pub mod session;
