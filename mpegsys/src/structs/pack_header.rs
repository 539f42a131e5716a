//! Pack headers and their system clock reference.

use crate::structs::start_code::PACKET_HEADER_SIZE;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::HeaderError;

/// Payload bytes after the 6-byte packet header of a second generation pack.
pub const SECOND_GENERATION_PAYLOAD: usize = 8;
/// Payload bytes after the 6-byte packet header of a first generation pack.
pub const FIRST_GENERATION_PAYLOAD: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackGeneration {
    First,
    Second,
}

impl PackGeneration {
    /// Selects the generation from the byte following the pack start code.
    pub fn from_marker(byte: u8) -> Option<Self> {
        if byte & 0xC0 == 0x40 {
            Some(PackGeneration::Second)
        } else if byte & 0xF0 == 0x20 {
            Some(PackGeneration::First)
        } else {
            None
        }
    }

    pub fn payload_len(self) -> usize {
        match self {
            PackGeneration::First => FIRST_GENERATION_PAYLOAD,
            PackGeneration::Second => SECOND_GENERATION_PAYLOAD,
        }
    }

    /// Total framed size before stuffing.
    pub fn packet_len(self) -> usize {
        PACKET_HEADER_SIZE + self.payload_len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackHeader {
    pub generation: PackGeneration,
    /// System clock reference base, 33 bits at 90 kHz.
    pub scr: u64,
    /// 27 MHz extension, second generation only.
    pub scr_extension: u16,
    /// Multiplex rate in units of 50 bytes/s.
    pub mux_rate: u32,
    pub stuffing_len: usize,
}

impl PackHeader {
    /// Parses a framed pack header, start code included.
    pub fn read(packet: &[u8]) -> Result<Self, HeaderError> {
        let marker = packet.get(4).copied().unwrap_or_default();
        let generation = PackGeneration::from_marker(marker)
            .ok_or(HeaderError::MissingMarker("pack header"))?;

        let mut reader = BsIoSliceReader::from_slice(packet.get(4..).unwrap_or_default());

        let header = match generation {
            PackGeneration::Second => {
                reader.skip_n(2)?;
                let scr = reader.get_timestamp()?;
                let scr_extension = reader.get_n(9)?;
                reader.skip_n(1)?;
                let mux_rate = reader.get_n(22)?;
                // two markers, reserved
                reader.skip_n(7)?;
                let stuffing_len = reader.get_n::<u8>(3)? as usize;

                Self {
                    generation,
                    scr,
                    scr_extension,
                    mux_rate,
                    stuffing_len,
                }
            }
            PackGeneration::First => {
                reader.skip_n(4)?;
                let scr = reader.get_timestamp()?;
                reader.skip_n(1)?;
                let mux_rate = reader.get_n(22)?;

                Self {
                    generation,
                    scr,
                    scr_extension: 0,
                    mux_rate,
                    stuffing_len: 0,
                }
            }
        };

        Ok(header)
    }

    /// Clock reference in 27 MHz units.
    pub fn scr_27mhz(&self) -> u64 {
        self.scr * 300 + self.scr_extension as u64
    }
}
