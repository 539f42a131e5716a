use std::sync::Arc;

use log::{debug, error, info, trace, warn};

use crate::log_or_err;
use crate::process::bitstream::BitStream;
use crate::process::fifo::MacroblockFifo;
use crate::process::synchro::Synchro;
use crate::structs::macroblock::{
    MB_INTRA, MB_MOTION_BACKWARD, MB_MOTION_FORWARD, MacroblockData, MacroblockJob,
    predict_backward_copy, predict_forward_copy,
};
use crate::structs::picture::{ChromaFormat, CodingType, PictureBuffer, PictureSink};
use crate::structs::start_code::{
    EXTENSION_START_CODE, GROUP_START_CODE, PICTURE_START_CODE, SEQUENCE_END_CODE,
    SEQUENCE_ERROR_CODE, SEQUENCE_HEADER_CODE, USER_DATA_START_CODE, is_slice,
};
use crate::structs::video_header::{
    GroupHeader, PICTURE_CODING_EXTENSION_ID, PictureHeader, SEQUENCE_EXTENSION_ID,
    SequenceHeader, SliceHeader,
};
use crate::utils::errors::{BitStreamError, FifoError, ParseError};
use crate::utils::packet_pool::PacketPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    SeekingSyncPoint,
    ParsingStructuralHeaders,
    EmittingJobs,
    Draining,
    /// Input is consumed and discarded until the stream ends or the
    /// session stops.
    Error,
    Stopped,
}

/// What the codec found at the current macroblock position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroblockStep {
    /// A macroblock was parsed into the job, `address_increment`
    /// positions after the previous one.
    Coded { address_increment: u32 },
    /// The rest of the slice carries nothing to emit.
    EndOfSlice,
}

/// Per-slice state handed to the codec.
#[derive(Debug, Clone)]
pub struct SliceContext {
    pub sequence: Arc<SequenceHeader>,
    pub picture: PictureHeader,
    pub slice: SliceHeader,
    /// Updated by the codec through the quantiser field of macroblocks.
    pub quantizer_scale: u8,
    pub last_mb_type: u8,
    pub last_motion_vectors: [[[i16; 2]; 2]; 2],
}

impl SliceContext {
    pub fn chroma_format(&self) -> ChromaFormat {
        self.sequence.chroma_format
    }

    pub fn coding_type(&self) -> CodingType {
        self.picture.coding_type
    }

    fn remember(&mut self, job: &MacroblockData) {
        self.last_mb_type = job.mb_type;
        self.last_motion_vectors = job.motion_vectors;
        if job.mb_type & MB_INTRA != 0 {
            self.last_motion_vectors = [[[0; 2]; 2]; 2];
        }
    }
}

/// Macroblock layer of a specific codec.
///
/// The parser thread owns everything above the macroblock layer: start
/// codes, headers, addressing, skipped macroblocks, picture lifetime and
/// pacing. A codec only turns the bits of one macroblock into a job: its
/// type, motion vectors, coefficients and the per-block operations the
/// workers will run.
pub trait MacroblockSyntax: Send {
    fn start_slice(&mut self, _ctx: &SliceContext) {}

    /// Parses the macroblock at the current position, including its
    /// address increment, into `job`. Position and picture references are
    /// filled in by the caller afterwards.
    fn parse_macroblock(
        &mut self,
        bs: &mut BitStream,
        ctx: &mut SliceContext,
        job: &mut MacroblockData,
    ) -> Result<MacroblockStep, ParseError>;

    /// Fills a macroblock the stream skipped. P pictures copy the forward
    /// reference in place; B pictures repeat the previous macroblock's
    /// prediction.
    fn fill_skipped(&self, ctx: &SliceContext, job: &mut MacroblockData) -> Result<(), ParseError> {
        job.skipped = true;
        job.quantizer_scale = ctx.quantizer_scale;

        match ctx.coding_type() {
            CodingType::Predicted => {
                job.mb_type = MB_MOTION_FORWARD;
                job.predict = predict_forward_copy;
            }
            CodingType::Bidirectional => {
                let mb_type = ctx.last_mb_type & (MB_MOTION_FORWARD | MB_MOTION_BACKWARD);
                job.mb_type = mb_type;
                job.motion_vectors = ctx.last_motion_vectors;
                job.predict = if mb_type == MB_MOTION_BACKWARD {
                    predict_backward_copy
                } else {
                    predict_forward_copy
                };
            }
            CodingType::Intra | CodingType::DcOnly => {
                return Err(ParseError::InvalidMacroblock(
                    "skipped macroblock in intra picture",
                ));
            }
        }
        Ok(())
    }
}

/// Parses structure only; every slice is treated as empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderOnlySyntax;

impl MacroblockSyntax for HeaderOnlySyntax {
    fn parse_macroblock(
        &mut self,
        _bs: &mut BitStream,
        _ctx: &mut SliceContext,
        _job: &mut MacroblockData,
    ) -> Result<MacroblockStep, ParseError> {
        Ok(MacroblockStep::EndOfSlice)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ParserStats {
    pub sequences: u64,
    pub groups: u64,
    pub pictures: u64,
    pub pictures_trashed: u64,
    pub slices: u64,
    pub macroblocks: u64,
    pub skipped_macroblocks: u64,
    pub errors: u64,
    pub resyncs: u64,
    pub units_discarded: u64,
}

/// Largest picture, in luma samples, a sequence may announce by default.
pub const DEFAULT_MAX_PICTURE_AREA: u64 = 4096 * 4096;

pub struct ParserThreadConfig {
    pub bitstream: BitStream,
    pub jobs: Arc<MacroblockFifo>,
    pub pool: PacketPool,
    pub syntax: Box<dyn MacroblockSyntax>,
    pub synchro: Synchro,
    pub sink: Option<Arc<dyn PictureSink>>,
    pub program: u16,
    pub fail_level: log::Level,
    /// Sequences announcing more luma samples than this are rejected.
    pub max_picture_area: u64,
}

/// Walks one video elementary stream and feeds macroblock jobs to the
/// worker pool.
///
/// At end of stream the open picture is sealed and the job fifo closed so
/// the workers finish what is queued and exit.
pub struct ParserThread {
    bs: BitStream,
    jobs: Arc<MacroblockFifo>,
    pool: PacketPool,
    syntax: Box<dyn MacroblockSyntax>,
    synchro: Synchro,
    sink: Option<Arc<dyn PictureSink>>,
    program: u16,
    pub fail_level: log::Level,
    max_picture_area: u64,

    state: ParserState,
    sequence: Option<Arc<SequenceHeader>>,
    group: Option<GroupHeader>,
    picture_header: Option<PictureHeader>,
    presentation_time: Option<i64>,

    current: Option<Arc<PictureBuffer>>,
    trashing: bool,
    warned_field_pictures: bool,
    forward_ref: Option<Arc<PictureBuffer>>,
    backward_ref: Option<Arc<PictureBuffer>>,

    stats: ParserStats,
}

impl std::fmt::Debug for ParserThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserThread")
            .field("state", &self.state)
            .field("sequence", &self.sequence)
            .field("current", &self.current)
            .field("stats", &self.stats)
            .finish()
    }
}

impl ParserThread {
    pub fn new(config: ParserThreadConfig) -> Self {
        let ParserThreadConfig {
            bitstream,
            jobs,
            pool,
            syntax,
            synchro,
            sink,
            program,
            fail_level,
            max_picture_area,
        } = config;

        Self {
            bs: bitstream,
            jobs,
            pool,
            syntax,
            synchro,
            sink,
            program,
            fail_level,
            max_picture_area,
            state: ParserState::SeekingSyncPoint,
            sequence: None,
            group: None,
            picture_header: None,
            presentation_time: None,
            current: None,
            trashing: false,
            warned_field_pictures: false,
            forward_ref: None,
            backward_ref: None,
            stats: ParserStats::default(),
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    pub fn sequence(&self) -> Option<&SequenceHeader> {
        self.sequence.as_deref()
    }

    pub fn group(&self) -> Option<&GroupHeader> {
        self.group.as_ref()
    }

    /// Runs until the stream ends or the session stops.
    pub fn run(&mut self) -> ParserStats {
        loop {
            if self.jobs.cancel_token().is_cancelled() && self.state != ParserState::Stopped {
                debug!("Parser stopping on request");
                self.release_pictures();
                self.state = ParserState::Stopped;
            }

            let step = match self.state {
                ParserState::SeekingSyncPoint => self.seek_sync_point(),
                ParserState::ParsingStructuralHeaders | ParserState::EmittingJobs => {
                    self.parse_next()
                }
                ParserState::Draining => {
                    self.finish_picture();
                    self.release_pictures();
                    self.jobs.close();
                    self.state = ParserState::Stopped;
                    Ok(())
                }
                ParserState::Error => {
                    self.discard_input();
                    Ok(())
                }
                ParserState::Stopped => break,
            };

            if let Err(err) = step {
                self.on_error(err);
            }
        }

        info!(
            "Parser done: {} pictures ({} trashed), {} macroblocks, {} errors",
            self.stats.pictures,
            self.stats.pictures_trashed,
            self.stats.macroblocks,
            self.stats.errors
        );
        self.stats
    }

    fn seek_sync_point(&mut self) -> Result<(), ParseError> {
        let code = self.bs.seek_start_code()?;
        if code == SEQUENCE_HEADER_CODE {
            self.state = ParserState::ParsingStructuralHeaders;
        } else {
            trace!("Skipping start code {code:#04X} before sequence header");
            self.bs.dump_bits(32);
        }
        Ok(())
    }

    fn parse_next(&mut self) -> Result<(), ParseError> {
        let code = self.bs.seek_start_code()?;
        self.bs.dump_bits(32);

        match code {
            SEQUENCE_HEADER_CODE => self.parse_sequence_header(),
            EXTENSION_START_CODE => self.parse_extension(),
            GROUP_START_CODE => self.parse_group(),
            PICTURE_START_CODE => self.parse_picture_header(),
            SEQUENCE_END_CODE => {
                debug!("Sequence end");
                self.finish_picture();
                self.picture_header = None;
                self.state = ParserState::SeekingSyncPoint;
                Ok(())
            }
            SEQUENCE_ERROR_CODE => {
                warn!("Sequence error code in stream, resynchronising");
                self.finish_picture();
                self.picture_header = None;
                self.stats.resyncs += 1;
                self.state = ParserState::SeekingSyncPoint;
                Ok(())
            }
            USER_DATA_START_CODE => Ok(()),
            code if is_slice(code) => self.parse_slice(code),
            code => {
                trace!("Ignoring start code {code:#04X}");
                Ok(())
            }
        }
    }

    fn parse_sequence_header(&mut self) -> Result<(), ParseError> {
        let sequence = SequenceHeader::read(&mut self.bs)?;
        self.finish_picture();
        if let Err(err) = check_picture_area(&sequence, self.max_picture_area) {
            self.drop_sequence();
            return Err(err);
        }

        if let Some(previous) = &self.sequence {
            if (previous.width, previous.height) != (sequence.width, sequence.height) {
                info!(
                    "Picture size changed from {}x{} to {}x{}",
                    previous.width, previous.height, sequence.width, sequence.height
                );
                self.release_pictures();
            }
        } else {
            info!(
                "Video sequence {}x{}, frame rate code {}, bit rate {} bit/s",
                sequence.width,
                sequence.height,
                sequence.frame_rate_code,
                sequence.bit_rate as u64 * 400
            );
        }

        self.stats.sequences += 1;
        self.sequence = Some(Arc::new(sequence));
        self.picture_header = None;
        Ok(())
    }

    fn parse_extension(&mut self) -> Result<(), ParseError> {
        let id = self.bs.get_bits(4)? as u8;

        match id {
            SEQUENCE_EXTENSION_ID => {
                let Some(sequence) = &mut self.sequence else {
                    return Ok(());
                };
                let sequence = Arc::make_mut(sequence);
                let applied = sequence
                    .read_extension(&mut self.bs)
                    .and_then(|()| check_picture_area(&*sequence, self.max_picture_area));
                match applied {
                    Ok(()) => trace!("Sequence extension: {:?}", sequence.chroma_format),
                    Err(err) => {
                        // The header is only half applied; wait for the next one.
                        self.drop_sequence();
                        return Err(err);
                    }
                }
            }
            PICTURE_CODING_EXTENSION_ID => {
                if let Some(picture) = &mut self.picture_header {
                    picture.read_coding_extension(&mut self.bs)?;
                }
            }
            _ => trace!("Skipping extension {id}"),
        }
        Ok(())
    }

    fn parse_group(&mut self) -> Result<(), ParseError> {
        let group = GroupHeader::read(&mut self.bs)?;
        trace!("{group:?}");

        if group.broken_link {
            debug!("Broken link, dropping backward reference");
            self.backward_ref = None;
        }
        self.stats.groups += 1;
        self.group = Some(group);
        Ok(())
    }

    fn parse_picture_header(&mut self) -> Result<(), ParseError> {
        self.finish_picture();
        let header = PictureHeader::read(&mut self.bs)?;

        if let Some(clock_ref) = self.bs.take_clock_ref() {
            self.synchro.observe_clock_ref(clock_ref, self.program);
        }
        self.presentation_time = self
            .bs
            .take_pts()
            .and_then(|pts| self.synchro.correct(pts, self.program));

        trace!(
            "Picture {} {} presentation {:?}",
            header.coding_type, header.temporal_reference, self.presentation_time
        );
        self.picture_header = Some(header);
        Ok(())
    }

    /// Creates the picture buffer at the first slice, once every picture
    /// extension has been applied, or decides to trash the picture.
    fn open_picture(&mut self) -> Result<(), ParseError> {
        let (Some(sequence), Some(header)) = (&self.sequence, &self.picture_header) else {
            return Err(ParseError::SliceWithoutPicture);
        };

        let coding_type = header.coding_type;
        let trash_reason = if !header.is_frame() {
            if !self.warned_field_pictures {
                warn!("Field pictures are not decoded, trashing them");
                self.warned_field_pictures = true;
            }
            Some("field picture")
        } else if coding_type == CodingType::Bidirectional
            && self
                .presentation_time
                .is_some_and(|t| self.synchro.is_late(t))
        {
            Some("late")
        } else if coding_type == CodingType::Bidirectional
            && (self.forward_ref.is_none() || self.backward_ref.is_none())
        {
            Some("missing references")
        } else if coding_type == CodingType::Predicted && self.backward_ref.is_none() {
            Some("missing reference")
        } else {
            None
        };

        if let Some(reason) = trash_reason {
            debug!(
                "Trashing {} picture {} ({reason})",
                coding_type, header.temporal_reference
            );
            self.stats.pictures_trashed += 1;
            self.trashing = true;
            return Ok(());
        }

        let mut picture = PictureBuffer::new(
            sequence.width,
            sequence.height,
            sequence.chroma_format,
            coding_type,
            self.sink.clone(),
        );
        picture.temporal_reference = header.temporal_reference;
        picture.presentation_time = self.presentation_time;
        let picture = Arc::new(picture);

        if coding_type != CodingType::Bidirectional {
            self.forward_ref = self.backward_ref.take();
            self.backward_ref = Some(Arc::clone(&picture));
        }

        self.stats.pictures += 1;
        self.current = Some(picture);
        Ok(())
    }

    /// Releases the parser's hold on the open picture.
    fn finish_picture(&mut self) {
        self.trashing = false;
        if let Some(picture) = self.current.take() {
            debug!(
                "Sealed {} picture {}, {} jobs pending",
                picture.coding_type,
                picture.temporal_reference,
                picture.pending_jobs() - 1
            );
            picture.finish_job();
        }
    }

    fn release_pictures(&mut self) {
        self.current = None;
        self.forward_ref = None;
        self.backward_ref = None;
    }

    fn drop_sequence(&mut self) {
        self.finish_picture();
        self.release_pictures();
        self.sequence = None;
        self.picture_header = None;
    }

    fn parse_slice(&mut self, code: u8) -> Result<(), ParseError> {
        if self.current.is_none() && !self.trashing {
            self.open_picture()?;
        }
        if self.trashing {
            return Ok(());
        }
        let (Some(sequence), Some(header), Some(picture)) = (
            self.sequence.clone(),
            self.picture_header,
            self.current.clone(),
        ) else {
            return Err(ParseError::SliceWithoutPicture);
        };

        let slice = SliceHeader::read(&mut self.bs, code, &sequence)?;
        self.stats.slices += 1;

        let mut ctx = SliceContext {
            sequence,
            picture: header,
            slice,
            quantizer_scale: slice.quantizer_scale,
            last_mb_type: 0,
            last_motion_vectors: [[[0; 2]; 2]; 2],
        };
        self.syntax.start_slice(&ctx);
        self.state = ParserState::EmittingJobs;

        let mb_width = picture.mb_width;
        let mb_count = picture.mb_count();
        let mut previous: Option<u32> = None;

        loop {
            let mut job = self.pool.acquire_job()?;
            let increment = match self.syntax.parse_macroblock(&mut self.bs, &mut ctx, &mut job)? {
                MacroblockStep::EndOfSlice => break,
                MacroblockStep::Coded { address_increment } => address_increment,
            };
            if increment == 0 {
                return Err(ParseError::InvalidMacroblock("zero address increment"));
            }

            let address = match previous {
                None => slice.row * mb_width + increment - 1,
                Some(previous) => previous + increment,
            };
            if address >= mb_count {
                return Err(ParseError::MacroblockOutOfPicture {
                    address,
                    count: mb_count,
                });
            }

            if let Some(previous) = previous {
                for skipped in previous + 1..address {
                    let mut skip = self.pool.acquire_job()?;
                    self.syntax.fill_skipped(&ctx, &mut skip)?;
                    self.emit(skip, &picture, skipped)?;
                    self.stats.skipped_macroblocks += 1;
                }
            }

            ctx.remember(&job);
            self.emit(job, &picture, address)?;
            previous = Some(address);

            if self.bs.show_bits(23)? == 0 {
                break;
            }
        }

        self.state = ParserState::ParsingStructuralHeaders;
        Ok(())
    }

    fn emit(
        &mut self,
        mut job: MacroblockJob,
        picture: &Arc<PictureBuffer>,
        address: u32,
    ) -> Result<(), ParseError> {
        let field_dct = job.field_dct;
        job.bind(picture, address % picture.mb_width, address / picture.mb_width);
        if field_dct {
            job.luma_stride *= 2;
        }
        // A P picture is already the backward reference; it predicts from
        // the forward one only.
        job.forward_ref = self.forward_ref.clone();
        if picture.coding_type == CodingType::Bidirectional {
            job.backward_ref = self.backward_ref.clone();
        }

        picture.begin_job();
        self.stats.macroblocks += 1;
        if let Err(err) = self.jobs.push(job) {
            picture.finish_job();
            return Err(BitStreamError::from(err).into());
        }
        Ok(())
    }

    fn discard_input(&mut self) {
        match self.bs.fifo().pop() {
            Ok(unit) => {
                self.stats.units_discarded += 1;
                drop(unit);
            }
            Err(FifoError::Closed) => {
                self.jobs.close();
                self.state = ParserState::Stopped;
            }
            Err(FifoError::Cancelled) => self.state = ParserState::Stopped,
        }
    }

    fn absorb(&self, err: ParseError) -> Result<(), ParseError> {
        log_or_err!(self, log::Level::Warn, err);
        Ok(())
    }

    fn on_error(&mut self, err: ParseError) {
        match err {
            ParseError::BitStream(BitStreamError::EndOfStream) => {
                debug!("Video stream ended");
                self.state = ParserState::Draining;
            }
            ParseError::BitStream(BitStreamError::Cancelled) => {
                self.release_pictures();
                self.state = ParserState::Stopped;
            }
            err if err.is_recoverable() => {
                self.stats.errors += 1;
                match self.absorb(err) {
                    Ok(()) => {
                        self.stats.resyncs += 1;
                        self.state = if self.sequence.is_some() {
                            ParserState::ParsingStructuralHeaders
                        } else {
                            ParserState::SeekingSyncPoint
                        };
                    }
                    Err(err) => self.enter_error_state(err),
                }
            }
            err => {
                self.stats.errors += 1;
                self.enter_error_state(err);
            }
        }
    }

    fn enter_error_state(&mut self, err: ParseError) {
        error!("Video parser stopped producing: {err}");
        self.release_pictures();
        self.state = ParserState::Error;
    }
}

fn check_picture_area(sequence: &SequenceHeader, max_area: u64) -> Result<(), ParseError> {
    if sequence.width as u64 * sequence.height as u64 > max_area {
        return Err(ParseError::PictureTooLarge {
            width: sequence.width,
            height: sequence.height,
            max_area,
        });
    }
    Ok(())
}
