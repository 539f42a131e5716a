mod demux_impl;
pub mod pictures;
pub mod progress;
pub mod stream_writer;

pub use demux_impl::cmd_demux;
