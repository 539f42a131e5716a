//! Macroblock decode jobs.
//!
//! A job carries everything a worker needs to reconstruct one macroblock:
//! motion vectors, up to twelve coefficient blocks, and the per-block
//! operations a codec registered for it. The core never interprets
//! coefficients itself; it only runs the operations in order.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::structs::picture::{BlockTarget, ChromaFormat, PictureBuffer};
use crate::utils::packet_pool::PacketPool;

pub const MAX_BLOCKS: usize = 12;

pub const MB_QUANT: u8 = 0x01;
pub const MB_MOTION_FORWARD: u8 = 0x02;
pub const MB_MOTION_BACKWARD: u8 = 0x04;
pub const MB_PATTERN: u8 = 0x08;
pub const MB_INTRA: u8 = 0x10;

/// Motion compensation for the whole macroblock, run once before the
/// blocks. Writes the prediction into `picture`.
pub type PredictFn = fn(&MacroblockData, &PictureBuffer);
/// Inverse transform of one coefficient block, in place.
pub type TransformFn = fn(&mut [i16; 64]);
/// Stores (intra) or adds (inter) a transformed block at its target.
pub type ReconstructFn = fn(&[i16; 64], BlockTarget<'_>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockCoding {
    /// No coefficients; transform and reconstruct are both skipped.
    #[default]
    NotCoded,
    /// Only the DC or a few coefficients; the transform step is skipped and
    /// the block is reconstructed as is.
    Sparse,
    Dense,
}

const LUMA_X: [usize; 4] = [0, 8, 0, 8];
const LUMA_Y: [usize; 4] = [0, 0, 8, 8];
const CHROMA_X: [usize; MAX_BLOCKS] = [0, 0, 0, 0, 0, 0, 0, 0, 8, 8, 8, 8];
const CHROMA_Y: [usize; MAX_BLOCKS] = [0, 0, 0, 0, 0, 0, 8, 8, 0, 0, 8, 8];

pub struct MacroblockData {
    pub mb_x: u32,
    pub mb_y: u32,
    /// `MB_*` flags.
    pub mb_type: u8,
    pub skipped: bool,
    pub quantizer_scale: u8,
    /// Half-sample vectors, indexed `[forward/backward][field][x/y]`.
    pub motion_vectors: [[[i16; 2]; 2]; 2],
    pub field_dct: bool,
    pub chroma_format: ChromaFormat,
    pub block_count: usize,

    pub blocks: [[i16; 64]; MAX_BLOCKS],
    pub coding: [BlockCoding; MAX_BLOCKS],

    pub predict: PredictFn,
    pub inverse_transform: [TransformFn; MAX_BLOCKS],
    pub reconstruct: [ReconstructFn; MAX_BLOCKS],

    /// Distance in samples between two rows of one block.
    pub luma_stride: usize,
    pub chroma_stride: usize,

    pub picture: Option<Arc<PictureBuffer>>,
    pub forward_ref: Option<Arc<PictureBuffer>>,
    pub backward_ref: Option<Arc<PictureBuffer>>,
}

impl Default for MacroblockData {
    fn default() -> Self {
        Self {
            mb_x: 0,
            mb_y: 0,
            mb_type: 0,
            skipped: false,
            quantizer_scale: 0,
            motion_vectors: [[[0; 2]; 2]; 2],
            field_dct: false,
            chroma_format: ChromaFormat::Yuv420,
            block_count: ChromaFormat::Yuv420.block_count(),
            blocks: [[0; 64]; MAX_BLOCKS],
            coding: [BlockCoding::NotCoded; MAX_BLOCKS],
            predict: predict_none,
            inverse_transform: [transform_none; MAX_BLOCKS],
            reconstruct: [reconstruct_none; MAX_BLOCKS],
            luma_stride: 0,
            chroma_stride: 0,
            picture: None,
            forward_ref: None,
            backward_ref: None,
        }
    }
}

impl MacroblockData {
    /// Clears coefficients and restores the no-op operations.
    pub fn reset(&mut self) {
        self.mb_x = 0;
        self.mb_y = 0;
        self.mb_type = 0;
        self.skipped = false;
        self.quantizer_scale = 0;
        self.motion_vectors = [[[0; 2]; 2]; 2];
        self.field_dct = false;
        self.chroma_format = ChromaFormat::Yuv420;
        self.block_count = ChromaFormat::Yuv420.block_count();
        self.blocks.iter_mut().for_each(|b| b.fill(0));
        self.coding = [BlockCoding::NotCoded; MAX_BLOCKS];
        self.predict = predict_none;
        self.inverse_transform = [transform_none; MAX_BLOCKS];
        self.reconstruct = [reconstruct_none; MAX_BLOCKS];
        self.luma_stride = 0;
        self.chroma_stride = 0;
        self.release_references();
    }

    pub fn release_references(&mut self) {
        self.picture = None;
        self.forward_ref = None;
        self.backward_ref = None;
    }

    /// Places the job at a macroblock of `picture` with frame-organised
    /// strides.
    pub fn bind(&mut self, picture: &Arc<PictureBuffer>, mb_x: u32, mb_y: u32) {
        self.mb_x = mb_x;
        self.mb_y = mb_y;
        self.chroma_format = picture.chroma_format;
        self.block_count = picture.chroma_format.block_count();
        self.luma_stride = picture.planes[0].width();
        self.chroma_stride = picture.planes[1].width();
        self.picture = Some(Arc::clone(picture));
    }

    /// Where block `index` of this macroblock lives in `picture`.
    pub fn block_target<'a>(&self, picture: &'a PictureBuffer, index: usize) -> BlockTarget<'a> {
        let mb_x = self.mb_x as usize;
        let mb_y = self.mb_y as usize;

        if index < 4 {
            let plane = &picture.planes[0];
            let x = mb_x * 16 + LUMA_X[index];
            let y = if self.field_dct {
                mb_y * 16 + index / 2
            } else {
                mb_y * 16 + LUMA_Y[index]
            };
            BlockTarget {
                plane,
                offset: y * plane.width() + x,
                stride: self.luma_stride,
            }
        } else {
            let plane = &picture.planes[1 + (index & 1)];
            let (cw, ch) = self.chroma_format.chroma_mb_size();
            let x = mb_x * cw + CHROMA_X[index];
            let y = mb_y * ch + CHROMA_Y[index];
            BlockTarget {
                plane,
                offset: y * plane.width() + x,
                stride: self.chroma_stride,
            }
        }
    }
}

impl fmt::Debug for MacroblockData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacroblockData")
            .field("mb_x", &self.mb_x)
            .field("mb_y", &self.mb_y)
            .field("mb_type", &format_args!("{:#04X}", self.mb_type))
            .field("skipped", &self.skipped)
            .field("block_count", &self.block_count)
            .field("coding", &&self.coding[..self.block_count])
            .finish()
    }
}

/// A pooled [`MacroblockData`]; returns to its pool when dropped.
pub struct MacroblockJob {
    data: Option<Box<MacroblockData>>,
    pool: PacketPool,
}

impl MacroblockJob {
    pub(crate) fn from_pool(data: Box<MacroblockData>, pool: PacketPool) -> Self {
        Self {
            data: Some(data),
            pool,
        }
    }
}

impl Deref for MacroblockJob {
    type Target = MacroblockData;

    fn deref(&self) -> &MacroblockData {
        match &self.data {
            Some(data) => data,
            None => unreachable!("macroblock job used after release"),
        }
    }
}

impl DerefMut for MacroblockJob {
    fn deref_mut(&mut self) -> &mut MacroblockData {
        match &mut self.data {
            Some(data) => data,
            None => unreachable!("macroblock job used after release"),
        }
    }
}

impl fmt::Debug for MacroblockJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl Drop for MacroblockJob {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.recycle_job(data);
        }
    }
}

pub fn predict_none(_job: &MacroblockData, _picture: &PictureBuffer) {}

/// Full-sample copy from the forward reference, using the integer part of
/// the first forward vector.
pub fn predict_forward_copy(job: &MacroblockData, picture: &PictureBuffer) {
    if let Some(reference) = &job.forward_ref {
        copy_from_reference(job, reference, picture, job.motion_vectors[0][0]);
    }
}

pub fn predict_backward_copy(job: &MacroblockData, picture: &PictureBuffer) {
    if let Some(reference) = &job.backward_ref {
        copy_from_reference(job, reference, picture, job.motion_vectors[1][0]);
    }
}

fn copy_from_reference(
    job: &MacroblockData,
    reference: &PictureBuffer,
    picture: &PictureBuffer,
    vector: [i16; 2],
) {
    let (cw, ch) = job.chroma_format.chroma_mb_size();
    let (sx, sy) = (16 / cw as isize, 16 / ch as isize);
    let dx = vector[0] as isize >> 1;
    let dy = vector[1] as isize >> 1;

    for (plane, (w, h, vx, vy)) in [
        (16, 16, dx, dy),
        (cw, ch, dx / sx, dy / sy),
        (cw, ch, dx / sx, dy / sy),
    ]
    .into_iter()
    .enumerate()
    {
        let src = &reference.planes[plane];
        let dst = &picture.planes[plane];
        let x0 = job.mb_x as usize * w;
        let y0 = job.mb_y as usize * h;
        let max_x = src.width().saturating_sub(1) as isize;
        let max_y = src.height().saturating_sub(1) as isize;

        for row in 0..h {
            let sy = ((y0 + row) as isize + vy).clamp(0, max_y) as usize;
            for col in 0..w {
                let sx = ((x0 + col) as isize + vx).clamp(0, max_x) as usize;
                dst.set((y0 + row) * dst.width() + x0 + col, src.at(sx, sy));
            }
        }
    }
}

pub fn transform_none(_block: &mut [i16; 64]) {}

pub fn reconstruct_none(_block: &[i16; 64], _target: BlockTarget<'_>) {}

/// Stores the block, saturated to 0..=255.
pub fn reconstruct_copy(block: &[i16; 64], target: BlockTarget<'_>) {
    for (i, &c) in block.iter().enumerate() {
        target.set(i / 8, i % 8, c.clamp(0, 255) as u8);
    }
}

/// Adds the block to the prediction already in place, saturated.
pub fn reconstruct_add(block: &[i16; 64], target: BlockTarget<'_>) {
    for (i, &c) in block.iter().enumerate() {
        let (row, col) = (i / 8, i % 8);
        let value = (target.get(row, col) as i16).saturating_add(c);
        target.set(row, col, value.clamp(0, 255) as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::picture::CodingType;

    fn picture(width: u32, height: u32) -> Arc<PictureBuffer> {
        Arc::new(PictureBuffer::new(
            width,
            height,
            ChromaFormat::Yuv420,
            CodingType::Intra,
            None,
        ))
    }

    #[test]
    fn block_targets_cover_macroblock() {
        let picture = picture(32, 32);
        let mut job = MacroblockData::default();
        job.bind(&picture, 1, 1);

        let t = job.block_target(&picture, 3);
        assert_eq!(t.offset, 24 * 32 + 24);
        assert_eq!(t.stride, 32);

        let cr = job.block_target(&picture, 5);
        assert!(std::ptr::eq(cr.plane, &picture.planes[2]));
        assert_eq!(cr.offset, 8 * 16 + 8);

        job.field_dct = true;
        job.luma_stride = 64;
        let t = job.block_target(&picture, 2);
        assert_eq!(t.offset, 17 * 32 + 16);
        assert_eq!(t.stride, 64);
    }

    #[test]
    fn reconstruct_saturates() {
        let picture = picture(16, 16);
        let mut job = MacroblockData::default();
        job.bind(&picture, 0, 0);

        let mut block = [0i16; 64];
        block[0] = 300;
        block[1] = -5;
        block[9] = 100;
        reconstruct_copy(&block, job.block_target(&picture, 0));
        assert_eq!(picture.planes[0].at(0, 0), 255);
        assert_eq!(picture.planes[0].at(1, 0), 0);
        assert_eq!(picture.planes[0].at(1, 1), 100);

        reconstruct_add(&block, job.block_target(&picture, 0));
        assert_eq!(picture.planes[0].at(0, 0), 255);
        assert_eq!(picture.planes[0].at(1, 1), 200);
    }

    #[test]
    fn forward_copy_clamps_at_edges() {
        let reference = picture(16, 16);
        reference.planes[0].set(0, 77);
        let target = picture(16, 16);

        let mut job = MacroblockData::default();
        job.bind(&target, 0, 0);
        job.forward_ref = Some(Arc::clone(&reference));
        job.motion_vectors[0][0] = [-8, -8];
        predict_forward_copy(&job, &target);

        assert_eq!(target.planes[0].at(0, 0), 77);
        assert_eq!(target.planes[0].at(3, 3), 77);
        assert_eq!(target.planes[0].at(4, 4), 77);
        assert_eq!(target.planes[0].at(5, 5), 0);
    }
}
