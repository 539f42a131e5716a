//! Program stream map.

use crate::structs::start_code::{PACKET_HEADER_SIZE, StreamKind};
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::HeaderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsmEntry {
    pub stream_type: u8,
    pub stream_id: u8,
}

impl PsmEntry {
    pub fn kind(&self) -> StreamKind {
        match self.stream_type {
            0x01 | 0x02 | 0x10 | 0x1B | 0x24 => StreamKind::Video,
            0x03 | 0x04 | 0x0F | 0x11 | 0x81 => StreamKind::Audio,
            _ => StreamKind::from_stream_id(self.stream_id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramStreamMap {
    pub version: u8,
    pub current_next: bool,
    pub entries: Vec<PsmEntry>,
}

impl ProgramStreamMap {
    /// Parses a framed program stream map packet, start code included.
    pub fn read(packet: &[u8]) -> Result<Self, HeaderError> {
        let body = packet.get(PACKET_HEADER_SIZE..).unwrap_or_default();
        let mut reader = BsIoSliceReader::from_slice(body);

        let current_next = reader.get()?;
        reader.skip_n(2)?;
        let version = reader.get_n(5)?;
        reader.skip_n(7)?;
        if !reader.get()? {
            return Err(HeaderError::MissingMarker("program stream map"));
        }

        let info_len = reader.get_n::<u16>(16)? as usize;
        reader.skip_bytes(info_len)?;

        let mut remaining = reader.get_n::<u16>(16)? as usize;
        let mut entries = Vec::new();
        while remaining >= 4 {
            let stream_type = reader.get_n(8)?;
            let stream_id = reader.get_n(8)?;
            let es_info_len = reader.get_n::<u16>(16)? as usize;
            reader.skip_bytes(es_info_len)?;

            entries.push(PsmEntry {
                stream_type,
                stream_id,
            });
            remaining = remaining.saturating_sub(4 + es_info_len);
        }

        Ok(Self {
            version,
            current_next,
            entries,
        })
    }

    pub fn kind_of(&self, stream_id: u8) -> Option<StreamKind> {
        self.entries
            .iter()
            .find(|e| e.stream_id == stream_id)
            .map(PsmEntry::kind)
    }
}

#[test]
fn parses_entries() -> anyhow::Result<()> {
    let packet = [
        0x00, 0x00, 0x01, 0xBC, 0x00, 0x16, // header
        0x83, 0xFF, // current_next, version 3, marker
        0x00, 0x02, 0xAA, 0xBB, // program info
        0x00, 0x0A, // map length
        0x02, 0xE0, 0x00, 0x00, // video
        0x81, 0xBD, 0x00, 0x02, 0x05, 0x00, // AC-3 with descriptor
        0x00, 0x00, 0x00, 0x00, // CRC
    ];

    let psm = ProgramStreamMap::read(&packet)?;
    assert!(psm.current_next);
    assert_eq!(psm.version, 3);
    assert_eq!(psm.entries.len(), 2);
    assert_eq!(psm.kind_of(0xE0), Some(StreamKind::Video));
    assert_eq!(psm.kind_of(0xBD), Some(StreamKind::Audio));
    assert_eq!(psm.kind_of(0xC0), None);
    Ok(())
}
