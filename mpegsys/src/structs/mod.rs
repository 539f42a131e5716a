pub mod buffer;
pub mod macroblock;
pub mod pack_header;
pub mod pes_header;
pub mod picture;
pub mod psm;
pub mod start_code;
pub mod stream_unit;
pub mod video_header;
