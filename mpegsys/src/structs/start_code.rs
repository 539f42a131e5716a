//! Start codes of program streams and of the video elementary stream.
//!
//! Every framed unit begins with the 24-bit prefix `0x000001` followed by a
//! one-byte code. System-layer codes live in `0xB9..=0xFF`, video-layer
//! codes below them.

use std::fmt;

pub const START_CODE_PREFIX: u32 = 0x00_00_01;

/// Start code word plus the 2-byte length field of ordinary packets.
pub const PACKET_HEADER_SIZE: usize = 6;

pub const PROGRAM_END_CODE: u8 = 0xB9;
pub const PACK_HEADER_CODE: u8 = 0xBA;
pub const SYSTEM_HEADER_CODE: u8 = 0xBB;
pub const PROGRAM_STREAM_MAP_ID: u8 = 0xBC;
pub const PRIVATE_STREAM_1_ID: u8 = 0xBD;
pub const PADDING_STREAM_ID: u8 = 0xBE;
pub const PRIVATE_STREAM_2_ID: u8 = 0xBF;
pub const ECM_STREAM_ID: u8 = 0xF0;
pub const EMM_STREAM_ID: u8 = 0xF1;
pub const DSMCC_STREAM_ID: u8 = 0xF2;
pub const H222_TYPE_E_STREAM_ID: u8 = 0xF8;
pub const PROGRAM_STREAM_DIRECTORY_ID: u8 = 0xFF;

pub const FIRST_VIDEO_STREAM_ID: u8 = 0xE0;

pub const PICTURE_START_CODE: u8 = 0x00;
pub const SLICE_START_CODE_MIN: u8 = 0x01;
pub const SLICE_START_CODE_MAX: u8 = 0xAF;
pub const USER_DATA_START_CODE: u8 = 0xB2;
pub const SEQUENCE_HEADER_CODE: u8 = 0xB3;
pub const SEQUENCE_ERROR_CODE: u8 = 0xB4;
pub const EXTENSION_START_CODE: u8 = 0xB5;
pub const SEQUENCE_END_CODE: u8 = 0xB7;
pub const GROUP_START_CODE: u8 = 0xB8;

#[inline(always)]
pub fn is_start_code(word: u32) -> bool {
    word >> 8 == START_CODE_PREFIX
}

#[inline(always)]
pub fn is_slice(code: u8) -> bool {
    (SLICE_START_CODE_MIN..=SLICE_START_CODE_MAX).contains(&code)
}

/// Whether packets of this stream id carry the optional PES header after
/// the 6-byte packet header.
pub fn has_pes_header(stream_id: u8) -> bool {
    stream_id >= PRIVATE_STREAM_1_ID
        && !matches!(
            stream_id,
            PADDING_STREAM_ID
                | PRIVATE_STREAM_2_ID
                | ECM_STREAM_ID
                | EMM_STREAM_ID
                | DSMCC_STREAM_ID
                | H222_TYPE_E_STREAM_ID
                | PROGRAM_STREAM_DIRECTORY_ID
        )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
    Private,
    Other,
}

impl StreamKind {
    /// Classification by stream id range, used when no program stream map
    /// describes the stream.
    pub fn from_stream_id(stream_id: u8) -> Self {
        match stream_id {
            0xE0..=0xEF => StreamKind::Video,
            0xC0..=0xDF => StreamKind::Audio,
            PRIVATE_STREAM_1_ID | PRIVATE_STREAM_2_ID => StreamKind::Private,
            _ => StreamKind::Other,
        }
    }

    pub fn is_elementary(self) -> bool {
        matches!(self, StreamKind::Video | StreamKind::Audio)
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Video => write!(f, "video"),
            StreamKind::Audio => write!(f, "audio"),
            StreamKind::Private => write!(f, "private"),
            StreamKind::Other => write!(f, "other"),
        }
    }
}

#[test]
fn pes_header_presence() {
    assert!(has_pes_header(0xE0));
    assert!(has_pes_header(0xC3));
    assert!(has_pes_header(PRIVATE_STREAM_1_ID));
    assert!(!has_pes_header(PADDING_STREAM_ID));
    assert!(!has_pes_header(PROGRAM_STREAM_MAP_ID));
    assert!(!has_pes_header(PACK_HEADER_CODE));
    assert!(!has_pes_header(H222_TYPE_E_STREAM_ID));

    assert!(is_start_code(0x0000_01BA));
    assert!(!is_start_code(0x0001_01BA));
    assert_eq!(StreamKind::from_stream_id(0xE7), StreamKind::Video);
    assert_eq!(StreamKind::from_stream_id(0xBD), StreamKind::Private);
}
