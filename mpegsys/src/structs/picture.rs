use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Receives reconstructed pictures once every macroblock job of the
/// picture has completed. Completion order across pictures is not
/// guaranteed.
pub trait PictureSink: Send + Sync {
    fn picture_ready(&self, picture: Arc<PictureBuffer>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChromaFormat {
    #[default]
    Yuv420,
    Yuv422,
    Yuv444,
}

impl ChromaFormat {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ChromaFormat::Yuv420),
            2 => Some(ChromaFormat::Yuv422),
            3 => Some(ChromaFormat::Yuv444),
            _ => None,
        }
    }

    /// Chroma blocks per macroblock (both planes together).
    pub fn chroma_blocks(self) -> usize {
        match self {
            ChromaFormat::Yuv420 => 2,
            ChromaFormat::Yuv422 => 4,
            ChromaFormat::Yuv444 => 8,
        }
    }

    /// Luma plus chroma blocks per macroblock.
    pub fn block_count(self) -> usize {
        4 + self.chroma_blocks()
    }

    /// Chroma macroblock size as (width, height) in samples.
    pub fn chroma_mb_size(self) -> (usize, usize) {
        match self {
            ChromaFormat::Yuv420 => (8, 8),
            ChromaFormat::Yuv422 => (8, 16),
            ChromaFormat::Yuv444 => (16, 16),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingType {
    Intra,
    Predicted,
    Bidirectional,
    DcOnly,
}

impl CodingType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(CodingType::Intra),
            2 => Some(CodingType::Predicted),
            3 => Some(CodingType::Bidirectional),
            4 => Some(CodingType::DcOnly),
            _ => None,
        }
    }
}

impl fmt::Display for CodingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodingType::Intra => write!(f, "I"),
            CodingType::Predicted => write!(f, "P"),
            CodingType::Bidirectional => write!(f, "B"),
            CodingType::DcOnly => write!(f, "D"),
        }
    }
}

/// One sample plane. Samples are atomics so decode workers can write
/// disjoint macroblocks of the same picture concurrently.
pub struct Plane {
    samples: Box<[AtomicU8]>,
    width: usize,
    height: usize,
}

impl Plane {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            samples: (0..width * height).map(|_| AtomicU8::new(0)).collect(),
            width,
            height,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, index: usize) -> u8 {
        self.samples
            .get(index)
            .map_or(0, |s| s.load(Ordering::Relaxed))
    }

    pub fn set(&self, index: usize, value: u8) {
        debug_assert!(index < self.samples.len(), "sample {index} outside plane");
        if let Some(s) = self.samples.get(index) {
            s.store(value, Ordering::Relaxed);
        }
    }

    pub fn at(&self, x: usize, y: usize) -> u8 {
        self.get(y * self.width + x)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.samples
            .iter()
            .map(|s| s.load(Ordering::Relaxed))
            .collect()
    }
}

impl fmt::Debug for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Plane({}x{})", self.width, self.height)
    }
}

/// Where a reconstruct operation writes one 8x8 block: sample `(row, col)`
/// lives at `offset + row * stride + col` of `plane`.
#[derive(Debug, Clone, Copy)]
pub struct BlockTarget<'a> {
    pub plane: &'a Plane,
    pub offset: usize,
    pub stride: usize,
}

impl BlockTarget<'_> {
    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.plane.get(self.offset + row * self.stride + col)
    }

    pub fn set(&self, row: usize, col: usize, value: u8) {
        self.plane.set(self.offset + row * self.stride + col, value);
    }
}

/// A reconstructed picture, sized up to whole macroblocks.
///
/// The parser holds one completion reference while it emits jobs and every
/// emitted job holds another; whoever releases the last one hands the
/// picture to its sink.
pub struct PictureBuffer {
    pub planes: [Plane; 3],
    pub width: u32,
    pub height: u32,
    pub mb_width: u32,
    pub mb_height: u32,
    pub chroma_format: ChromaFormat,
    pub coding_type: CodingType,
    pub temporal_reference: u16,
    /// Corrected presentation time in microseconds, when known.
    pub presentation_time: Option<i64>,
    pending: AtomicUsize,
    sink: Option<Arc<dyn PictureSink>>,
}

impl PictureBuffer {
    pub fn new(
        width: u32,
        height: u32,
        chroma_format: ChromaFormat,
        coding_type: CodingType,
        sink: Option<Arc<dyn PictureSink>>,
    ) -> Self {
        let mb_width = width.div_ceil(16);
        let mb_height = height.div_ceil(16);
        let luma_w = mb_width as usize * 16;
        let luma_h = mb_height as usize * 16;
        let (cw, ch) = chroma_format.chroma_mb_size();
        let chroma_w = mb_width as usize * cw;
        let chroma_h = mb_height as usize * ch;

        Self {
            planes: [
                Plane::new(luma_w, luma_h),
                Plane::new(chroma_w, chroma_h),
                Plane::new(chroma_w, chroma_h),
            ],
            width,
            height,
            mb_width,
            mb_height,
            chroma_format,
            coding_type,
            temporal_reference: 0,
            presentation_time: None,
            pending: AtomicUsize::new(1),
            sink,
        }
    }

    pub fn mb_count(&self) -> u32 {
        self.mb_width * self.mb_height
    }

    /// Registers one more outstanding job.
    pub fn begin_job(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Releases one completion reference; the last release delivers the
    /// picture to its sink.
    pub fn finish_job(self: &Arc<Self>) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(sink) = &self.sink {
                sink.picture_ready(Arc::clone(self));
            }
        }
    }

    pub fn pending_jobs(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

impl fmt::Debug for PictureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PictureBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("chroma_format", &self.chroma_format)
            .field("coding_type", &self.coding_type)
            .field("temporal_reference", &self.temporal_reference)
            .field("presentation_time", &self.presentation_time)
            .field("pending", &self.pending_jobs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<u16>>);

    impl PictureSink for Collect {
        fn picture_ready(&self, picture: Arc<PictureBuffer>) {
            self.0.lock().unwrap().push(picture.temporal_reference);
        }
    }

    #[test]
    fn planes_round_up_to_macroblocks() {
        let picture = PictureBuffer::new(
            33,
            17,
            ChromaFormat::Yuv420,
            CodingType::Intra,
            None,
        );
        assert_eq!(picture.mb_width, 3);
        assert_eq!(picture.mb_height, 2);
        assert_eq!(picture.planes[0].width(), 48);
        assert_eq!(picture.planes[1].height(), 16);
    }

    #[test]
    fn last_completion_delivers() {
        let sink = Arc::new(Collect::default());
        let picture = Arc::new(PictureBuffer::new(
            16,
            16,
            ChromaFormat::Yuv420,
            CodingType::Intra,
            Some(sink.clone()),
        ));

        picture.begin_job();
        picture.begin_job();
        picture.finish_job();
        picture.finish_job();
        assert!(sink.0.lock().unwrap().is_empty());

        // parser's own hold
        picture.finish_job();
        assert_eq!(*sink.0.lock().unwrap(), vec![0]);
    }
}
