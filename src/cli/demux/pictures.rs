use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use indicatif::ProgressBar;
use mpegsys::structs::picture::{CodingType, PictureBuffer, PictureSink};

/// Counts completed pictures per coding type.
#[derive(Default)]
pub struct PictureCounter {
    intra: AtomicU64,
    predicted: AtomicU64,
    bidirectional: AtomicU64,
    dc_only: AtomicU64,
    pb: Option<ProgressBar>,
}

impl PictureCounter {
    pub fn new(pb: Option<ProgressBar>) -> Self {
        Self {
            pb,
            ..Self::default()
        }
    }

    fn counter(&self, coding_type: CodingType) -> &AtomicU64 {
        match coding_type {
            CodingType::Intra => &self.intra,
            CodingType::Predicted => &self.predicted,
            CodingType::Bidirectional => &self.bidirectional,
            CodingType::DcOnly => &self.dc_only,
        }
    }

    pub fn count(&self, coding_type: CodingType) -> u64 {
        self.counter(coding_type).load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        [
            CodingType::Intra,
            CodingType::Predicted,
            CodingType::Bidirectional,
            CodingType::DcOnly,
        ]
        .into_iter()
        .map(|coding_type| self.count(coding_type))
        .sum()
    }
}

impl PictureSink for PictureCounter {
    fn picture_ready(&self, picture: Arc<PictureBuffer>) {
        self.counter(picture.coding_type)
            .fetch_add(1, Ordering::Relaxed);
        log::trace!(
            "{} picture {} ({}x{}) ready",
            picture.coding_type,
            picture.temporal_reference,
            picture.width,
            picture.height
        );

        if let Some(pb) = &self.pb {
            pb.set_message(format!("{} pictures", self.total()));
        }
    }
}
