//! Packetized elementary stream headers.
//!
//! Two header generations share the 6-byte packet header. The second
//! generation starts its optional header with the bits `10`; anything else
//! is parsed as a first generation header (stuffing, optional STD buffer
//! field, then the timestamp flags).

use std::io;

use crate::structs::start_code::{PACKET_HEADER_SIZE, has_pes_header};
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::HeaderError;

/// Maximum first generation stuffing bytes before the header is rejected.
pub const MAX_STUFFING: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PesGeneration {
    /// No optional header (padding, private stream 2, ...).
    None,
    First,
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    pub generation: PesGeneration,
    /// Bytes from the start code to the first payload byte.
    pub header_len: usize,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    pub data_alignment: bool,
}

impl PesHeader {
    /// Parses the header of a framed packet. `packet` covers the packet
    /// from its start code up to the end of its declared length.
    pub fn read(packet: &[u8]) -> Result<Self, HeaderError> {
        if packet.len() < PACKET_HEADER_SIZE {
            return Err(HeaderError::ExceedsPacket {
                header: PACKET_HEADER_SIZE,
                packet: packet.len(),
            });
        }

        let stream_id = packet[3];
        let mut header = Self {
            stream_id,
            generation: PesGeneration::None,
            header_len: PACKET_HEADER_SIZE,
            pts: None,
            dts: None,
            data_alignment: false,
        };

        if !has_pes_header(stream_id) {
            return Ok(header);
        }

        let optional = &packet[PACKET_HEADER_SIZE..];
        match optional.first() {
            Some(b) if b & 0xC0 == 0x80 => header.read_second_generation(optional)?,
            Some(_) => header.read_first_generation(optional)?,
            None => {
                return Err(HeaderError::Truncated(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "empty PES header",
                )));
            }
        }

        if header.header_len > packet.len() {
            return Err(HeaderError::ExceedsPacket {
                header: header.header_len,
                packet: packet.len(),
            });
        }

        Ok(header)
    }

    fn read_second_generation(&mut self, optional: &[u8]) -> Result<(), HeaderError> {
        let mut reader = BsIoSliceReader::from_slice(optional);

        // '10', scrambling control, priority
        reader.skip_n(5)?;
        self.data_alignment = reader.get()?;
        // copyright, original
        reader.skip_n(2)?;
        let pts_dts_flags: u8 = reader.get_n(2)?;
        // ESCR, rate, trick mode, copy info, CRC, extension flags
        reader.skip_n(6)?;
        let header_data_length = reader.get_n::<u8>(8)? as usize;

        self.generation = PesGeneration::Second;
        self.header_len = PACKET_HEADER_SIZE + 3 + header_data_length;

        if pts_dts_flags & 0b10 != 0 {
            reader.skip_n(4)?;
            self.pts = Some(reader.get_timestamp()?);
        }
        if pts_dts_flags == 0b11 {
            reader.skip_n(4)?;
            self.dts = Some(reader.get_timestamp()?);
        }

        Ok(())
    }

    fn read_first_generation(&mut self, optional: &[u8]) -> Result<(), HeaderError> {
        let stuffing = optional.iter().take_while(|&&b| b == 0xFF).count();
        if stuffing >= MAX_STUFFING {
            return Err(HeaderError::TooMuchStuffing);
        }

        let mut reader = BsIoSliceReader::from_slice(&optional[stuffing..]);
        let mut len = stuffing;

        let peek: u8 = reader.get_n(2)?;
        if peek == 0b01 {
            // STD buffer scale and size
            reader.skip_n(14)?;
            len += 2;
        } else {
            reader = BsIoSliceReader::from_slice(&optional[stuffing..]);
        }

        let flags: u8 = reader.get_n(4)?;
        match flags {
            0b0010 => {
                self.pts = Some(reader.get_timestamp()?);
                len += 5;
            }
            0b0011 => {
                self.pts = Some(reader.get_timestamp()?);
                reader.skip_n(4)?;
                self.dts = Some(reader.get_timestamp()?);
                len += 10;
            }
            0b0000 => {
                let marker: u8 = reader.get_n(4)?;
                if marker != 0x0F {
                    return Err(HeaderError::MissingMarker("first generation PES header"));
                }
                len += 1;
            }
            _ => return Err(HeaderError::MissingMarker("first generation PES header")),
        }

        self.generation = PesGeneration::First;
        self.header_len = PACKET_HEADER_SIZE + len;
        Ok(())
    }

    pub fn payload_len(&self, packet_len: usize) -> usize {
        packet_len.saturating_sub(self.header_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timestamp_bytes(prefix: u8, ts: u64) -> [u8; 5] {
        [
            prefix << 4 | ((ts >> 29) & 0x0E) as u8 | 1,
            (ts >> 22) as u8,
            ((ts >> 14) & 0xFE) as u8 | 1,
            (ts >> 7) as u8,
            ((ts << 1) & 0xFE) as u8 | 1,
        ]
    }

    #[test]
    fn second_generation_with_pts_and_dts() -> anyhow::Result<()> {
        let mut packet = vec![0x00, 0x00, 0x01, 0xE0, 0x00, 0x00];
        packet.extend([0x84, 0xC0, 10]);
        packet.extend(timestamp_bytes(0b0011, 900_000));
        packet.extend(timestamp_bytes(0b0001, 896_400));
        packet.extend([0xAA; 4]);

        let header = PesHeader::read(&packet)?;
        assert_eq!(header.generation, PesGeneration::Second);
        assert!(header.data_alignment);
        assert_eq!(header.header_len, 19);
        assert_eq!(header.pts, Some(900_000));
        assert_eq!(header.dts, Some(896_400));
        assert_eq!(header.payload_len(packet.len()), 4);
        Ok(())
    }

    #[test]
    fn first_generation_with_stuffing_and_std() -> anyhow::Result<()> {
        let mut packet = vec![0x00, 0x00, 0x01, 0xC0, 0x00, 0x00];
        packet.extend([0xFF, 0xFF, 0x40, 0x20]);
        packet.extend(timestamp_bytes(0b0010, 12_345));
        packet.extend([1, 2, 3]);

        let header = PesHeader::read(&packet)?;
        assert_eq!(header.generation, PesGeneration::First);
        assert_eq!(header.header_len, 6 + 2 + 2 + 5);
        assert_eq!(header.pts, Some(12_345));
        assert_eq!(header.dts, None);
        assert_eq!(&packet[header.header_len..], &[1, 2, 3]);
        Ok(())
    }

    #[test]
    fn first_generation_without_timestamp() -> anyhow::Result<()> {
        let packet = [0x00, 0x00, 0x01, 0xE0, 0x00, 0x03, 0x0F, 0x11, 0x22];
        let header = PesHeader::read(&packet)?;
        assert_eq!(header.header_len, 7);
        assert_eq!(header.pts, None);
        Ok(())
    }

    #[test]
    fn headerless_stream_ids() -> anyhow::Result<()> {
        let packet = [0x00, 0x00, 0x01, 0xBE, 0x00, 0x02, 0xFF, 0xFF];
        let header = PesHeader::read(&packet)?;
        assert_eq!(header.generation, PesGeneration::None);
        assert_eq!(header.header_len, 6);
        Ok(())
    }

    #[test]
    fn rejects_excess_stuffing() {
        let mut packet = vec![0x00, 0x00, 0x01, 0xE0, 0x00, 0x00];
        packet.extend([0xFF; 20]);
        packet.push(0x0F);
        assert!(matches!(
            PesHeader::read(&packet),
            Err(HeaderError::TooMuchStuffing)
        ));
    }

    #[test]
    fn rejects_header_longer_than_packet() {
        let packet = [0x00, 0x00, 0x01, 0xE0, 0x00, 0x03, 0x80, 0x00, 0x20];
        assert!(matches!(
            PesHeader::read(&packet),
            Err(HeaderError::ExceedsPacket { header: 41, .. })
        ));
    }
}
