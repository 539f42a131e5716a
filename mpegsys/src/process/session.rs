use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use log::{debug, error, info, warn};

use crate::process::bitstream::BitStream;
use crate::process::demux::{DemuxConfig, DemuxStats, Demuxer, DiscoveryReport};
use crate::process::fifo::{CancelToken, DecoderFifo, MacroblockFifo};
use crate::process::parser_thread::{
    DEFAULT_MAX_PICTURE_AREA, MacroblockSyntax, ParserStats, ParserThread, ParserThreadConfig,
};
use crate::process::source::ByteSource;
use crate::process::synchro::{Synchro, SynchroConfig, SystemClock};
use crate::process::worker_pool::{DecoderWorkerPool, PanicGuard, PanicHook, WorkerStats};
use crate::structs::picture::PictureSink;
use crate::utils::errors::{DemuxError, FifoError, SessionError};
use crate::utils::packet_pool::{PacketPool, PoolConfig, PoolStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub decoder_fifo_capacity: usize,
    pub macroblock_fifo_capacity: usize,
    /// Worker threads per decoded video stream.
    pub workers: usize,
    /// Units pulled from the demuxer per feeder iteration.
    pub units_per_pull: usize,
    /// Recoverable errors at or above this severity stop the session.
    pub fail_level: log::Level,
    /// Largest picture, in luma samples, a video sequence may announce.
    pub max_picture_area: u64,
    pub pool: PoolConfig,
    pub demux: DemuxConfig,
    pub synchro: SynchroConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            decoder_fifo_capacity: 32,
            macroblock_fifo_capacity: 256,
            workers: 2,
            units_per_pull: 8,
            fail_level: log::Level::Error,
            max_picture_area: DEFAULT_MAX_PICTURE_AREA,
            pool: PoolConfig::default(),
            demux: DemuxConfig::default(),
            synchro: SynchroConfig::default(),
        }
    }
}

#[derive(Debug, Default)]
struct SessionFifos {
    decoder: Vec<Arc<DecoderFifo>>,
    macroblock: Vec<Arc<MacroblockFifo>>,
}

/// Everything a stop request has to reach. Clones share the fifo lists,
/// so a clone taken early still reaches fifos registered later.
#[derive(Debug, Clone, Default)]
struct Shutdown {
    cancel: CancelToken,
    fifos: Arc<Mutex<SessionFifos>>,
}

impl Shutdown {
    fn fifos(&self) -> MutexGuard<'_, SessionFifos> {
        self.fifos.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register_decoder(&self, fifo: Arc<DecoderFifo>) {
        self.fifos().decoder.push(fifo);
    }

    fn register_macroblock(&self, fifo: Arc<MacroblockFifo>) {
        self.fifos().macroblock.push(fifo);
    }

    fn trigger(&self) {
        self.cancel.cancel();
        let fifos = self.fifos();
        fifos.decoder.iter().for_each(|f| f.wake_all());
        fifos.macroblock.iter().for_each(|f| f.wake_all());
    }

    fn drain(&self) -> usize {
        let fifos = self.fifos();
        fifos.decoder.iter().map(|f| f.drain()).sum::<usize>()
            + fifos.macroblock.iter().map(|f| f.drain()).sum::<usize>()
    }

    /// Stops the whole session when a pipeline thread panics.
    fn panic_hook(&self) -> PanicHook {
        let shutdown = self.clone();
        Arc::new(move || shutdown.trigger())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedStats {
    pub demux: DemuxStats,
    pub routed_units: usize,
    pub unrouted_units: usize,
}

struct VideoDecoder {
    stream_id: u8,
    parser: JoinHandle<ParserStats>,
    workers: DecoderWorkerPool,
}

#[derive(Debug, Default, Clone)]
pub struct SessionReport {
    pub feed: FeedStats,
    pub parsers: Vec<(u8, ParserStats)>,
    pub workers: WorkerStats,
    pub pool: PoolStats,
    pub drained_on_stop: usize,
}

/// One demultiplexing and decoding session.
///
/// Owns the packet pool, every fifo and every thread of the pipeline.
/// Streams are selected and their consumers attached before [`run`]
/// starts the feeder thread; [`stop`] cancels all of them and [`wait`]
/// joins them and returns what is still queued to the pool.
///
/// [`run`]: Session::run
/// [`stop`]: Session::stop
/// [`wait`]: Session::wait
pub struct Session<S: ByteSource + 'static> {
    config: SessionConfig,
    pool: PacketPool,
    demuxer: Option<Demuxer<S>>,
    shutdown: Shutdown,

    routes: BTreeMap<u8, Arc<DecoderFifo>>,
    consumers: Vec<(u8, JoinHandle<Result<()>>)>,
    decoders: Vec<VideoDecoder>,
    feeder: Option<JoinHandle<Result<FeedStats>>>,
}

impl<S: ByteSource + 'static> Session<S> {
    pub fn new(source: S, config: SessionConfig) -> Self {
        let pool = PacketPool::new(config.pool);
        let mut demuxer = Demuxer::with_pool(source, pool.clone(), config.demux);
        demuxer.set_fail_level(config.fail_level);

        Self {
            config,
            pool,
            demuxer: Some(demuxer),
            shutdown: Shutdown::default(),
            routes: BTreeMap::new(),
            consumers: Vec::new(),
            decoders: Vec::new(),
            feeder: None,
        }
    }

    pub fn pool(&self) -> &PacketPool {
        &self.pool
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.shutdown.cancel
    }

    pub fn selected(&self) -> impl Iterator<Item = u8> + '_ {
        self.routes.keys().copied()
    }

    fn demuxer_mut(&mut self) -> Result<&mut Demuxer<S>> {
        self.demuxer
            .as_mut()
            .ok_or_else(|| SessionError::AlreadyStarted.into())
    }

    /// Probes the source for its streams and rewinds it. Only seekable
    /// sources can be probed.
    pub fn discover(&mut self) -> Result<DiscoveryReport> {
        let demuxer = self.demuxer_mut()?;
        if !demuxer.is_seekable() {
            return Err(DemuxError::NotSeekable.into());
        }
        demuxer.discover().context("Stream discovery failed")
    }

    /// Creates the decoder fifo of `stream_id`; its units are routed there
    /// once the session runs.
    pub fn select(&mut self, stream_id: u8) -> Result<Arc<DecoderFifo>> {
        if self.demuxer.is_none() {
            return Err(SessionError::AlreadyStarted.into());
        }
        if self.routes.contains_key(&stream_id) {
            return Err(SessionError::AlreadySelected(stream_id).into());
        }

        let fifo = Arc::new(DecoderFifo::new(
            self.config.decoder_fifo_capacity,
            self.shutdown.cancel.clone(),
        ));
        self.routes.insert(stream_id, Arc::clone(&fifo));
        self.shutdown.register_decoder(Arc::clone(&fifo));
        debug!("Selected stream {stream_id:#04X}");
        Ok(fifo)
    }

    /// Selects `stream_id` and runs `consumer` on its bit stream in a
    /// thread of its own.
    pub fn attach_bitstream<F>(&mut self, stream_id: u8, consumer: F) -> Result<()>
    where
        F: FnOnce(BitStream) -> Result<()> + Send + 'static,
    {
        let fifo = self.select(stream_id)?;
        let handle = thread::Builder::new()
            .name(format!("es-{stream_id:02x}"))
            .spawn(move || consumer(BitStream::new(fifo)))
            .context("Failed to spawn consumer thread")?;
        self.consumers.push((stream_id, handle));
        Ok(())
    }

    /// Selects the video stream `stream_id` and starts its parser thread
    /// and worker pool.
    pub fn start_video_decoder(
        &mut self,
        stream_id: u8,
        syntax: Box<dyn MacroblockSyntax>,
        sink: Option<Arc<dyn PictureSink>>,
    ) -> Result<()> {
        let synchro = Synchro::new(self.config.synchro, Box::new(SystemClock::default()));
        self.start_video_decoder_with(stream_id, syntax, sink, synchro)
    }

    pub fn start_video_decoder_with(
        &mut self,
        stream_id: u8,
        syntax: Box<dyn MacroblockSyntax>,
        sink: Option<Arc<dyn PictureSink>>,
        synchro: Synchro,
    ) -> Result<()> {
        let fifo = self.select(stream_id)?;
        let jobs = Arc::new(MacroblockFifo::new(
            self.config.macroblock_fifo_capacity,
            self.shutdown.cancel.clone(),
        ));
        self.shutdown.register_macroblock(Arc::clone(&jobs));

        let workers = DecoderWorkerPool::spawn_with_panic_hook(
            Arc::clone(&jobs),
            self.config.workers,
            self.shutdown.panic_hook(),
        )
        .context("Failed to spawn decode workers")?;

        let mut parser = ParserThread::new(ParserThreadConfig {
            bitstream: BitStream::new(fifo),
            jobs,
            pool: self.pool.clone(),
            syntax,
            synchro,
            sink,
            program: 0,
            fail_level: self.config.fail_level,
            max_picture_area: self.config.max_picture_area,
        });
        let guard = PanicGuard::new(self.shutdown.panic_hook());
        let parser = thread::Builder::new()
            .name(format!("vpar-{stream_id:02x}"))
            .spawn(move || {
                let _guard = guard;
                parser.run()
            })
            .context("Failed to spawn parser thread")?;

        info!(
            "Video decoder on stream {stream_id:#04X} with {} workers",
            workers.workers()
        );
        self.decoders.push(VideoDecoder {
            stream_id,
            parser,
            workers,
        });
        Ok(())
    }

    /// Starts the feeder thread that demultiplexes the source into the
    /// selected streams' fifos.
    pub fn run(&mut self) -> Result<()> {
        let mut demuxer = self
            .demuxer
            .take()
            .ok_or(SessionError::AlreadyStarted)?;
        if self.routes.is_empty() {
            warn!("No stream selected, every unit will be dropped");
        }

        let routes = self.routes.clone();
        let shutdown = self.shutdown.clone();
        let units_per_pull = self.config.units_per_pull.max(1);

        let feeder = thread::Builder::new()
            .name("demux".into())
            .spawn(move || feed(&mut demuxer, &routes, &shutdown, units_per_pull))
            .context("Failed to spawn demux thread")?;
        self.feeder = Some(feeder);
        Ok(())
    }

    /// Cancels every thread of the session. Pair with [`wait`](Self::wait).
    pub fn stop(&self) {
        info!("Stopping session");
        self.shutdown.trigger();
    }

    /// Joins every thread, returns queued items to the pool and reports.
    /// A demultiplexing failure is returned before any consumer failure it
    /// caused; otherwise the first consumer failure is.
    pub fn wait(mut self) -> Result<SessionReport> {
        let mut report = SessionReport::default();
        let mut first_error: Option<anyhow::Error> = None;

        if self.feeder.is_none() && !self.routes.is_empty() {
            // never started: let the consumers see the end of their streams
            self.routes.values().for_each(|f| f.close());
        }

        for (stream_id, consumer) in self.consumers.drain(..) {
            let result = match consumer.join() {
                Ok(result) => result.with_context(|| format!("Stream {stream_id:#04X} consumer")),
                Err(_) => Err(SessionError::ThreadPanicked("consumer").into()),
            };
            if let Err(err) = result {
                error!("{err:#}");
                // A consumer that stops early would block the feeder forever.
                self.shutdown.trigger();
                first_error.get_or_insert(err);
            }
        }

        for decoder in self.decoders.drain(..) {
            match decoder.parser.join() {
                Ok(stats) => report.parsers.push((decoder.stream_id, stats)),
                Err(_) => {
                    // The workers would wait for jobs that never come.
                    self.shutdown.trigger();
                    first_error.get_or_insert(SessionError::ThreadPanicked("parser").into());
                }
            }
            let (stats, panicked) = decoder.workers.join();
            if panicked > 0 {
                self.shutdown.trigger();
                first_error.get_or_insert(SessionError::ThreadPanicked("worker").into());
            }
            report.workers.jobs += stats.jobs;
            report.workers.skipped += stats.skipped;
            report.workers.blocks_transformed += stats.blocks_transformed;
        }

        // Consumers go first: one that stopped early has already cancelled
        // the feeder, which could otherwise block on a full fifo.
        if let Some(feeder) = self.feeder.take() {
            match feeder.join() {
                Ok(Ok(feed)) => report.feed = feed,
                Ok(Err(err)) => first_error = Some(err),
                Err(_) => first_error = Some(SessionError::ThreadPanicked("demux").into()),
            }
        }

        report.drained_on_stop = self.shutdown.drain();
        self.routes.clear();
        self.shutdown = Shutdown::default();
        report.pool = self.pool.stats();

        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }
}

impl<S: ByteSource + 'static> Drop for Session<S> {
    fn drop(&mut self) {
        if self.feeder.is_some() || !self.consumers.is_empty() || !self.decoders.is_empty() {
            self.shutdown.trigger();
        }
    }
}

fn feed<S: ByteSource>(
    demuxer: &mut Demuxer<S>,
    routes: &BTreeMap<u8, Arc<DecoderFifo>>,
    shutdown: &Shutdown,
    units_per_pull: usize,
) -> Result<FeedStats> {
    let mut stats = FeedStats::default();

    let result = 'feed: loop {
        if shutdown.cancel.is_cancelled() {
            debug!("Feeder stopping on request");
            break Ok(());
        }

        let units = match demuxer.pull_units(units_per_pull) {
            Ok(units) => units,
            Err(DemuxError::EndOfStream) => break Ok(()),
            Err(err) => break Err(err),
        };

        for unit in units {
            let Some(fifo) = routes.get(&unit.stream_id) else {
                stats.unrouted_units += 1;
                continue;
            };
            match fifo.push(unit) {
                Ok(()) => stats.routed_units += 1,
                Err(FifoError::Cancelled) => break 'feed Ok(()),
                Err(FifoError::Closed) => stats.unrouted_units += 1,
            }
        }
    };

    stats.demux = demuxer.stats();
    match result {
        Ok(()) => {
            info!(
                "Demux finished: {} packets, {} units routed, {} garbage bytes",
                stats.demux.packets, stats.routed_units, stats.demux.garbage_bytes
            );
            routes.values().for_each(|f| f.close());
            Ok(stats)
        }
        Err(err) => {
            if err.is_fatal() {
                error!("Demux failed: {err}");
            } else {
                error!("Demux stopped by strict mode: {err}");
            }
            shutdown.trigger();
            Err(anyhow!(err).context("Demultiplexing stopped the session"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::demux::tests::{pack, pes};
    use crate::process::parser_thread::{HeaderOnlySyntax, MacroblockStep, SliceContext};
    use crate::process::source::{SeekableSource, StreamSource};
    use crate::structs::macroblock::{MB_INTRA, MacroblockData};
    use crate::structs::picture::PictureBuffer;
    use crate::structs::video_header::tests::EsWriter;
    use crate::utils::errors::ParseError;
    use std::io::{Cursor, Read};
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Default)]
    struct Collect(Mutex<Vec<u16>>);

    impl PictureSink for Collect {
        fn picture_ready(&self, picture: Arc<PictureBuffer>) {
            self.0.lock().unwrap().push(picture.temporal_reference);
        }
    }

    fn program(video: &[u8], audio: &[u8]) -> Vec<u8> {
        let mut bytes = pack(90_000);
        for (i, chunk) in video.chunks(100).enumerate() {
            bytes.extend(pes(0xE0, (i == 0).then_some(90_000), chunk));
            if let Some(audio) = audio.get(i * 10..(i + 1) * 10) {
                bytes.extend(pes(0xC0, None, audio));
            }
        }
        bytes.extend([0x00, 0x00, 0x01, 0xB9]);
        bytes
    }

    fn collect_into(out: Arc<Mutex<Vec<u8>>>) -> impl FnOnce(BitStream) -> Result<()> + Send {
        move |mut bs| {
            let mut bytes = Vec::new();
            bs.read_to_end(&mut bytes)?;
            out.lock().unwrap().extend(bytes);
            Ok(())
        }
    }

    #[test]
    fn routes_selected_streams() -> anyhow::Result<()> {
        let video: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let audio: Vec<u8> = (0..50u8).collect();
        let source = SeekableSource::new(Cursor::new(program(&video, &audio)));

        let mut session = Session::new(source, SessionConfig::default());
        let report = session.discover()?;
        assert_eq!(report.streams.len(), 2);

        let out = Arc::new(Mutex::new(Vec::new()));
        session.attach_bitstream(0xE0, collect_into(Arc::clone(&out)))?;
        let err = session.select(0xE0).err();
        assert!(matches!(
            err.as_ref().and_then(|e| e.downcast_ref::<SessionError>()),
            Some(SessionError::AlreadySelected(0xE0))
        ));
        session.run()?;
        assert!(session.run().is_err());

        let report = session.wait()?;
        assert_eq!(*out.lock().unwrap(), video);
        assert_eq!(report.feed.routed_units, 1);
        // pack header and the audio unit
        assert_eq!(report.feed.unrouted_units, 2);
        assert_eq!(report.pool.outstanding(), 0);
        Ok(())
    }

    #[test]
    fn unseekable_source_cannot_be_discovered() {
        let source = StreamSource::new(Cursor::new(program(&[1, 2, 3], &[])));
        let mut session = Session::new(source, SessionConfig::default());
        let err = session.discover().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DemuxError>(),
            Some(DemuxError::NotSeekable)
        ));
    }

    #[test]
    fn video_decoder_delivers_pictures() -> anyhow::Result<()> {
        let mut es = EsWriter::new();
        es.sequence(48, 32)?;
        for (tr, coding) in [(0, 1), (1, 2), (2, 2)] {
            es.picture(tr, coding)?;
            es.slice(1, 4)?;
            es.slice(2, 4)?;
        }
        es.code(0xB7)?;
        let video = es.finish()?;

        let source = StreamSource::new(Cursor::new(program(&video, &[])));
        let mut session = Session::new(source, SessionConfig::default());
        let sink = Arc::new(Collect::default());
        session.start_video_decoder(0xE0, Box::new(HeaderOnlySyntax), Some(sink.clone()))?;
        session.run()?;

        let report = session.wait()?;
        let mut delivered = sink.0.lock().unwrap().clone();
        delivered.sort();
        assert_eq!(delivered, vec![0, 1, 2]);

        let (stream_id, stats) = report.parsers[0];
        assert_eq!(stream_id, 0xE0);
        assert_eq!(stats.pictures, 3);
        assert_eq!(stats.slices, 6);
        assert_eq!(report.pool.outstanding(), 0);
        Ok(())
    }

    #[test]
    fn stop_releases_everything() -> anyhow::Result<()> {
        // A consumer that never reads leaves the feeder blocked on a full fifo.
        let mut bytes = Vec::new();
        for i in 0..200u64 {
            bytes.extend(pes(0xE0, Some(i * 3600), &[0x55; 64]));
        }
        let source = StreamSource::new(Cursor::new(bytes));
        let config = SessionConfig {
            decoder_fifo_capacity: 4,
            ..Default::default()
        };
        let mut session = Session::new(source, config);

        let cancel = session.cancel_token().clone();
        session.attach_bitstream(0xE0, move |_bs| {
            while !cancel.is_cancelled() {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        })?;
        session.start_video_decoder(0xE1, Box::new(HeaderOnlySyntax), None)?;
        session.run()?;

        thread::sleep(Duration::from_millis(50));
        session.stop();
        let pool = session.pool().clone();
        let report = session.wait()?;

        assert!(report.drained_on_stop > 0);
        assert!(report.feed.routed_units < 200);
        assert_eq!(pool.stats().outstanding(), 0);
        Ok(())
    }

    #[test]
    fn fatal_demux_error_cancels_consumers() -> anyhow::Result<()> {
        let mut bytes = pes(0xE0, None, &[1; 16]);
        // neither pack header generation
        bytes.extend([0x00, 0x00, 0x01, 0xBA, 0xC0, 0x00]);
        let source = StreamSource::new(Cursor::new(bytes));

        let mut session = Session::new(source, SessionConfig::default());
        session.attach_bitstream(0xE0, |mut bs| {
            let mut sink = Vec::new();
            match bs.read_to_end(&mut sink) {
                Ok(_) => Ok(()),
                Err(_) => Ok(()),
            }
        })?;
        session.run()?;

        let err = session.wait().unwrap_err();
        assert!(format!("{err:#}").contains("Unknown pack header variant"));
        Ok(())
    }

    /// Panics on the first macroblock it is asked for.
    struct BrokenSyntax;

    impl MacroblockSyntax for BrokenSyntax {
        fn parse_macroblock(
            &mut self,
            _bs: &mut BitStream,
            _ctx: &mut SliceContext,
            _job: &mut MacroblockData,
        ) -> Result<MacroblockStep, ParseError> {
            panic!("corrupt macroblock layer");
        }
    }

    fn explode(_job: &MacroblockData, _picture: &PictureBuffer) {
        panic!("prediction failed");
    }

    /// One macroblock per slice whose prediction panics in the worker.
    struct BrokenPrediction;

    impl MacroblockSyntax for BrokenPrediction {
        fn parse_macroblock(
            &mut self,
            _bs: &mut BitStream,
            _ctx: &mut SliceContext,
            job: &mut MacroblockData,
        ) -> Result<MacroblockStep, ParseError> {
            job.mb_type = MB_INTRA;
            job.predict = explode;
            Ok(MacroblockStep::Coded {
                address_increment: 1,
            })
        }
    }

    /// One intra picture followed by enough filler to fill a short video
    /// fifo, interleaved with a few audio packets.
    fn stalled_program() -> anyhow::Result<Vec<u8>> {
        let mut es = EsWriter::new();
        es.sequence(32, 32)?;
        es.picture(0, 1)?;
        es.slice(1, 8)?;
        es.code(0xB2)?;
        let mut video = es.finish()?;
        video.extend([0xFF; 4000]);
        Ok(program(&video, &[0x11; 50]))
    }

    /// Starts a video decoder with `syntax` and an audio consumer that
    /// reads until its stream ends or the session stops.
    fn start_with(
        syntax: Box<dyn MacroblockSyntax>,
    ) -> anyhow::Result<Session<StreamSource<Cursor<Vec<u8>>>>> {
        let source = StreamSource::new(Cursor::new(stalled_program()?));
        let config = SessionConfig {
            decoder_fifo_capacity: 2,
            ..Default::default()
        };
        let mut session = Session::new(source, config);
        session.attach_bitstream(0xC0, |mut bs| {
            let mut sink = Vec::new();
            let _ = bs.read_to_end(&mut sink);
            Ok(())
        })?;
        session.start_video_decoder(0xE0, syntax, None)?;
        session.run()?;
        Ok(session)
    }

    fn wait_within(
        session: Session<StreamSource<Cursor<Vec<u8>>>>,
        limit: Duration,
    ) -> anyhow::Result<Result<SessionReport>> {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(session.wait());
        });
        Ok(rx.recv_timeout(limit)?)
    }

    #[test]
    fn parser_panic_stops_the_session() -> anyhow::Result<()> {
        let session = start_with(Box::new(BrokenSyntax))?;
        let pool = session.pool().clone();

        let err = wait_within(session, Duration::from_secs(10))?.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::ThreadPanicked("parser"))
        ));
        assert_eq!(pool.stats().outstanding(), 0);
        Ok(())
    }

    #[test]
    fn worker_panic_stops_the_session() -> anyhow::Result<()> {
        let session = start_with(Box::new(BrokenPrediction))?;
        let cancel = session.cancel_token().clone();

        let err = wait_within(session, Duration::from_secs(10))?.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::ThreadPanicked("worker"))
        ));
        assert!(cancel.is_cancelled());
        Ok(())
    }

    #[test]
    fn corrupt_sequence_extension_mid_stream() -> anyhow::Result<()> {
        let mut es = EsWriter::new();
        es.sequence(32, 32)?;
        es.picture(0, 1)?;
        es.slice(1, 4)?;
        es.sequence(32, 32)?;
        // sequence extension with the reserved chroma format 0
        es.code(0xB5)?
            .bits(4, 1)?
            .bits(8, 0x85)?
            .bits(1, 1)?
            .bits(2, 0)?
            .bits(4, 0)?
            .bits(12, 0)?
            .bits(1, 1)?
            .bits(8, 0)?
            .bits(1, 0)?
            .bits(7, 0)?;
        es.picture(1, 1)?;
        es.slice(1, 4)?;
        es.sequence(32, 32)?;
        for tr in 2..5 {
            es.picture(tr, 1)?;
            es.slice(1, 4)?;
        }
        es.code(0xB7)?;
        let video = es.finish()?;

        let source = StreamSource::new(Cursor::new(program(&video, &[])));
        let mut session = Session::new(source, SessionConfig::default());
        let sink = Arc::new(Collect::default());
        session.start_video_decoder(0xE0, Box::new(HeaderOnlySyntax), Some(sink.clone()))?;
        session.run()?;

        let report = session.wait()?;
        let mut delivered = sink.0.lock().unwrap().clone();
        delivered.sort();
        assert_eq!(delivered, vec![0, 2, 3, 4]);

        let (_, stats) = report.parsers[0];
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.resyncs, 1);
        assert_eq!(stats.pictures, 4);
        assert_eq!(report.pool.outstanding(), 0);
        Ok(())
    }
}
