//! Structural headers of the video elementary stream.
//!
//! Each `read` starts right after the 32-bit start code, which the caller
//! has already consumed, and leaves the stream positioned after the last
//! field it knows about. Trailing extension bits are skipped by the next
//! start code search.

use crate::process::bitstream::BitStream;
use crate::structs::picture::{ChromaFormat, CodingType};
use crate::utils::errors::ParseError;

pub const SEQUENCE_EXTENSION_ID: u8 = 1;
pub const SEQUENCE_DISPLAY_EXTENSION_ID: u8 = 2;
pub const PICTURE_CODING_EXTENSION_ID: u8 = 8;

pub const PICTURE_STRUCTURE_FRAME: u8 = 3;

/// Pictures taller than this carry a slice vertical position extension.
const SLICE_POSITION_EXTENSION_HEIGHT: u32 = 2800;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceHeader {
    pub width: u32,
    pub height: u32,
    pub aspect_ratio_code: u8,
    pub frame_rate_code: u8,
    /// In units of 400 bit/s.
    pub bit_rate: u32,
    pub vbv_buffer_size: u32,
    pub constrained_parameters: bool,
    pub intra_quantizer_matrix: Option<[u8; 64]>,
    pub non_intra_quantizer_matrix: Option<[u8; 64]>,

    pub mpeg2: bool,
    pub profile_level: u8,
    pub progressive: bool,
    pub chroma_format: ChromaFormat,
    pub low_delay: bool,
}

impl SequenceHeader {
    pub fn read(bs: &mut BitStream) -> Result<Self, ParseError> {
        let width = bs.get_bits(12)?;
        let height = bs.get_bits(12)?;
        let aspect_ratio_code = bs.get_bits(4)? as u8;
        let frame_rate_code = bs.get_bits(4)? as u8;
        let bit_rate = bs.get_bits(18)?;
        if !bs.get_bit()? {
            return Err(ParseError::MissingMarker("sequence header"));
        }
        let vbv_buffer_size = bs.get_bits(10)?;
        let constrained_parameters = bs.get_bit()?;
        let intra_quantizer_matrix = read_matrix(bs)?;
        let non_intra_quantizer_matrix = read_matrix(bs)?;

        if width == 0 || height == 0 {
            return Err(ParseError::InvalidPictureSize { width, height });
        }

        Ok(Self {
            width,
            height,
            aspect_ratio_code,
            frame_rate_code,
            bit_rate,
            vbv_buffer_size,
            constrained_parameters,
            intra_quantizer_matrix,
            non_intra_quantizer_matrix,
            mpeg2: false,
            profile_level: 0,
            progressive: true,
            chroma_format: ChromaFormat::Yuv420,
            low_delay: false,
        })
    }

    /// Applies a sequence extension; the 4-bit extension id is consumed.
    pub fn read_extension(&mut self, bs: &mut BitStream) -> Result<(), ParseError> {
        let profile_level = bs.get_bits(8)? as u8;
        let progressive = bs.get_bit()?;
        let chroma_code = bs.get_bits(2)? as u8;
        let width_ext = bs.get_bits(2)?;
        let height_ext = bs.get_bits(2)?;
        let bit_rate_ext = bs.get_bits(12)?;
        if !bs.get_bit()? {
            return Err(ParseError::MissingMarker("sequence extension"));
        }
        let vbv_ext = bs.get_bits(8)?;
        let low_delay = bs.get_bit()?;
        // frame rate extension n/d
        bs.get_bits(7)?;

        self.chroma_format = ChromaFormat::from_code(chroma_code)
            .ok_or(ParseError::ReservedChromaFormat(chroma_code))?;
        self.width |= width_ext << 12;
        self.height |= height_ext << 12;
        self.bit_rate |= bit_rate_ext << 18;
        self.vbv_buffer_size |= vbv_ext << 10;
        self.profile_level = profile_level;
        self.progressive = progressive;
        self.low_delay = low_delay;
        self.mpeg2 = true;
        Ok(())
    }

    pub fn mb_width(&self) -> u32 {
        self.width.div_ceil(16)
    }

    pub fn mb_height(&self) -> u32 {
        self.height.div_ceil(16)
    }
}

fn read_matrix(bs: &mut BitStream) -> Result<Option<[u8; 64]>, ParseError> {
    if !bs.get_bit()? {
        return Ok(None);
    }
    let mut matrix = [0u8; 64];
    for value in matrix.iter_mut() {
        *value = bs.get_bits(8)? as u8;
    }
    Ok(Some(matrix))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupHeader {
    pub drop_frame: bool,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub pictures: u8,
    pub closed: bool,
    pub broken_link: bool,
}

impl GroupHeader {
    pub fn read(bs: &mut BitStream) -> Result<Self, ParseError> {
        let drop_frame = bs.get_bit()?;
        let hours = bs.get_bits(5)? as u8;
        let minutes = bs.get_bits(6)? as u8;
        if !bs.get_bit()? {
            return Err(ParseError::MissingMarker("group of pictures header"));
        }
        let seconds = bs.get_bits(6)? as u8;
        let pictures = bs.get_bits(6)? as u8;
        let closed = bs.get_bit()?;
        let broken_link = bs.get_bit()?;

        Ok(Self {
            drop_frame,
            hours,
            minutes,
            seconds,
            pictures,
            closed,
            broken_link,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureHeader {
    pub temporal_reference: u16,
    pub coding_type: CodingType,
    pub vbv_delay: u16,
    /// `[forward, backward]`.
    pub full_pel: [bool; 2],
    /// `[forward/backward][horizontal/vertical]`.
    pub f_codes: [[u8; 2]; 2],

    pub intra_dc_precision: u8,
    pub picture_structure: u8,
    pub top_field_first: bool,
    pub frame_pred_frame_dct: bool,
    pub concealment_motion_vectors: bool,
    pub q_scale_type: bool,
    pub intra_vlc_format: bool,
    pub alternate_scan: bool,
    pub progressive_frame: bool,
}

impl PictureHeader {
    pub fn read(bs: &mut BitStream) -> Result<Self, ParseError> {
        let temporal_reference = bs.get_bits(10)? as u16;
        let code = bs.get_bits(3)? as u8;
        let coding_type = CodingType::from_code(code).ok_or(ParseError::InvalidCodingType(code))?;
        let vbv_delay = bs.get_bits(16)? as u16;

        let mut full_pel = [false; 2];
        let mut f_codes = [[0u8; 2]; 2];
        if matches!(
            coding_type,
            CodingType::Predicted | CodingType::Bidirectional
        ) {
            full_pel[0] = bs.get_bit()?;
            let f = bs.get_bits(3)? as u8;
            f_codes[0] = [f, f];
        }
        if coding_type == CodingType::Bidirectional {
            full_pel[1] = bs.get_bit()?;
            let f = bs.get_bits(3)? as u8;
            f_codes[1] = [f, f];
        }

        while bs.get_bit()? {
            bs.get_bits(8)?;
        }

        Ok(Self {
            temporal_reference,
            coding_type,
            vbv_delay,
            full_pel,
            f_codes,
            intra_dc_precision: 0,
            picture_structure: PICTURE_STRUCTURE_FRAME,
            top_field_first: false,
            frame_pred_frame_dct: true,
            concealment_motion_vectors: false,
            q_scale_type: false,
            intra_vlc_format: false,
            alternate_scan: false,
            progressive_frame: true,
        })
    }

    /// Applies a picture coding extension; the 4-bit extension id is
    /// consumed.
    pub fn read_coding_extension(&mut self, bs: &mut BitStream) -> Result<(), ParseError> {
        for direction in self.f_codes.iter_mut() {
            for f in direction.iter_mut() {
                *f = bs.get_bits(4)? as u8;
            }
        }
        self.intra_dc_precision = bs.get_bits(2)? as u8;
        self.picture_structure = bs.get_bits(2)? as u8;
        self.top_field_first = bs.get_bit()?;
        self.frame_pred_frame_dct = bs.get_bit()?;
        self.concealment_motion_vectors = bs.get_bit()?;
        self.q_scale_type = bs.get_bit()?;
        self.intra_vlc_format = bs.get_bit()?;
        self.alternate_scan = bs.get_bit()?;
        // repeat_first_field, chroma_420_type
        bs.get_bits(2)?;
        self.progressive_frame = bs.get_bit()?;
        Ok(())
    }

    pub fn is_frame(&self) -> bool {
        self.picture_structure == PICTURE_STRUCTURE_FRAME
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceHeader {
    /// Macroblock row, from zero.
    pub row: u32,
    pub quantizer_scale: u8,
    pub intra_slice: bool,
}

impl SliceHeader {
    pub fn read(
        bs: &mut BitStream,
        code: u8,
        sequence: &SequenceHeader,
    ) -> Result<Self, ParseError> {
        let mut row = code as u32 - 1;
        if sequence.mpeg2 && sequence.height > SLICE_POSITION_EXTENSION_HEIGHT {
            row += bs.get_bits(3)? << 7;
        }
        let quantizer_scale = bs.get_bits(5)? as u8;

        let mut intra_slice = false;
        if sequence.mpeg2 {
            if bs.get_bit()? {
                intra_slice = bs.get_bit()?;
                // slice_picture_id_enable, slice_picture_id
                bs.get_bits(7)?;
                while bs.get_bit()? {
                    bs.get_bits(8)?;
                }
            }
        } else {
            while bs.get_bit()? {
                bs.get_bits(8)?;
            }
        }

        if row >= sequence.mb_height() {
            return Err(ParseError::SliceOutOfPicture {
                row,
                rows: sequence.mb_height(),
            });
        }

        Ok(Self {
            row,
            quantizer_scale,
            intra_slice,
        })
    }
}
