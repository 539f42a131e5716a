pub mod command;
pub mod demux;
pub mod info;
