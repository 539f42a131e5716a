use std::collections::{BTreeMap, VecDeque};

use log::{debug, trace, warn};

use crate::log_or_err;
use crate::process::source::{ByteSource, read_full};
use crate::structs::buffer::Buffer;
use crate::structs::pack_header::{PackGeneration, PackHeader};
use crate::structs::pes_header::PesHeader;
use crate::structs::psm::ProgramStreamMap;
use crate::structs::start_code::{
    PACK_HEADER_CODE, PACKET_HEADER_SIZE, PADDING_STREAM_ID, PROGRAM_END_CODE,
    PROGRAM_STREAM_MAP_ID, SYSTEM_HEADER_CODE, StreamKind, has_pes_header, is_start_code,
};
use crate::structs::stream_unit::StreamUnit;
use crate::utils::errors::DemuxError;
use crate::utils::packet_pool::PacketPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemuxConfig {
    /// Fragments after which an open unit is closed even without a new
    /// timestamp.
    pub max_unit_fragments: usize,
    /// Packets read by [`Demuxer::discover`] before it gives up.
    pub probe_packets: usize,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            max_unit_fragments: 32,
            probe_packets: 4096,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DemuxStats {
    pub packets: usize,
    pub units: usize,
    pub pack_headers: usize,
    pub garbage_bytes: usize,
    pub resyncs: usize,
    pub dropped_packets: usize,
}

/// One elementary stream seen during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub stream_id: u8,
    pub kind: StreamKind,
    pub units: usize,
    pub bytes: usize,
    pub first_pts: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub pack_generation: Option<PackGeneration>,
    pub streams: Vec<StreamInfo>,
    pub packets_probed: usize,
    pub program_stream_map: Option<ProgramStreamMap>,
}

/// Resynchronizing program stream demultiplexer.
///
/// Frames packets by start code, strips their headers into the payload
/// window of a pooled [`Buffer`] and groups fragments of the same stream
/// into [`StreamUnit`]s.
///
/// # Example
///
/// ```rust,no_run
/// use mpegsys::process::demux::Demuxer;
/// use mpegsys::process::source::StreamSource;
///
/// let file = std::fs::File::open("movie.mpg")?;
/// let mut demuxer = Demuxer::new(StreamSource::new(file));
///
/// while let Ok(units) = demuxer.pull_units(16) {
///     for unit in units {
///         println!("{:#04X}: {} bytes", unit.stream_id, unit.size());
///     }
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct Demuxer<S: ByteSource> {
    source: S,
    pool: PacketPool,
    config: DemuxConfig,
    pub fail_level: log::Level,

    open_units: BTreeMap<u8, StreamUnit>,
    ready: VecDeque<StreamUnit>,
    ended: bool,

    last_scr: Option<u64>,
    scr_epoch: u64,
    clock_epochs: BTreeMap<u8, u64>,

    generation: Option<PackGeneration>,
    psm: Option<ProgramStreamMap>,
    stats: DemuxStats,
    deferred: Option<DemuxError>,
}

impl<S: ByteSource> Demuxer<S> {
    pub fn new(source: S) -> Self {
        Self::with_pool(source, PacketPool::default(), DemuxConfig::default())
    }

    pub fn with_pool(source: S, pool: PacketPool, config: DemuxConfig) -> Self {
        Self {
            source,
            pool,
            config,
            fail_level: log::Level::Error,
            open_units: BTreeMap::new(),
            ready: VecDeque::new(),
            ended: false,
            last_scr: None,
            scr_epoch: 0,
            clock_epochs: BTreeMap::new(),
            generation: None,
            psm: None,
            stats: DemuxStats::default(),
            deferred: None,
        }
    }

    pub fn set_fail_level(&mut self, level: log::Level) {
        self.fail_level = level;
    }

    pub fn pool(&self) -> &PacketPool {
        &self.pool
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    pub fn pack_generation(&self) -> Option<PackGeneration> {
        self.generation
    }

    pub fn program_stream_map(&self) -> Option<&ProgramStreamMap> {
        self.psm.as_ref()
    }

    pub fn is_seekable(&self) -> bool {
        self.source.is_seekable()
    }

    /// Returns up to `n` completed units in completion order.
    ///
    /// Fewer than `n` units are returned only when the stream ended or an
    /// error stopped the demuxer; once every unit has been handed out, the
    /// next call returns [`DemuxError::EndOfStream`]. Units completed
    /// before an error are returned first and the error is reported by the
    /// following call.
    pub fn pull_units(&mut self, n: usize) -> Result<Vec<StreamUnit>, DemuxError> {
        let mut units = Vec::with_capacity(n);

        while units.len() < n {
            if let Some(unit) = self.ready.pop_front() {
                units.push(unit);
                continue;
            }
            if self.ended {
                break;
            }
            if let Some(err) = self.deferred.take() {
                if units.is_empty() {
                    return Err(err);
                }
                self.deferred = Some(err);
                break;
            }

            let step = match self.next_packet() {
                Ok(Some(buffer)) => self.handle_packet(buffer),
                Ok(None) | Err(DemuxError::EndOfStream) => {
                    self.finish();
                    Ok(())
                }
                Err(e) => Err(e),
            };
            if let Err(err) = step {
                self.deferred = Some(err);
            }
        }

        if units.is_empty() && n > 0 {
            return Err(DemuxError::EndOfStream);
        }

        self.stats.units += units.len();
        Ok(units)
    }

    /// Reads the stream from the current position up to the probe budget,
    /// records what it finds and seeks back to the origin. Every unit read
    /// goes straight back to the pool.
    pub fn discover(&mut self) -> Result<DiscoveryReport, DemuxError> {
        if !self.source.is_seekable() {
            return Err(DemuxError::NotSeekable);
        }

        let mut streams: BTreeMap<u8, StreamInfo> = BTreeMap::new();

        while self.stats.packets < self.config.probe_packets {
            let units = match self.pull_units(16) {
                Ok(units) => units,
                Err(DemuxError::EndOfStream) => break,
                Err(e) => return Err(e),
            };

            for unit in units {
                if matches!(
                    unit.stream_id,
                    PACK_HEADER_CODE | SYSTEM_HEADER_CODE | PROGRAM_STREAM_MAP_ID | PADDING_STREAM_ID
                ) {
                    continue;
                }

                let info = streams.entry(unit.stream_id).or_insert(StreamInfo {
                    stream_id: unit.stream_id,
                    kind: StreamKind::from_stream_id(unit.stream_id),
                    units: 0,
                    bytes: 0,
                    first_pts: None,
                });
                info.units += 1;
                info.bytes += unit.size();
                info.first_pts = info.first_pts.or(unit.pts);
            }
        }

        let report = DiscoveryReport {
            pack_generation: self.generation,
            streams: streams
                .into_values()
                .map(|mut info| {
                    if let Some(kind) = self.psm.as_ref().and_then(|psm| psm.kind_of(info.stream_id)) {
                        info.kind = kind;
                    }
                    info
                })
                .collect(),
            packets_probed: self.stats.packets,
            program_stream_map: self.psm.clone(),
        };

        debug!(
            "Discovery probed {} packets, found {} streams",
            report.packets_probed,
            report.streams.len()
        );

        self.rewind()?;
        Ok(report)
    }

    /// Seeks back to the origin and forgets all reassembly state.
    pub fn rewind(&mut self) -> Result<(), DemuxError> {
        self.source.seek(0)?;
        self.open_units.clear();
        self.ready.clear();
        self.ended = false;
        self.deferred = None;
        self.last_scr = None;
        self.scr_epoch = 0;
        self.clock_epochs.clear();
        self.stats = DemuxStats::default();
        Ok(())
    }

    fn finish(&mut self) {
        self.ended = true;
        let open = std::mem::take(&mut self.open_units);
        self.ready.extend(open.into_values());
    }

    /// Frames the next packet. `Ok(None)` is the program end code.
    fn next_packet(&mut self) -> Result<Option<Buffer>, DemuxError> {
        let mut word = [0u8; 4];
        if read_full(&mut self.source, &mut word)? < word.len() {
            return Err(DemuxError::EndOfStream);
        }

        let mut code = u32::from_be_bytes(word);
        let mut skipped = 0usize;
        while !is_start_code(code) || ((code & 0xFF) as u8) < PROGRAM_END_CODE {
            let mut byte = [0u8];
            if read_full(&mut self.source, &mut byte)? == 0 {
                self.stats.garbage_bytes += skipped + 4;
                warn!("Stream ended inside {} bytes of garbage", skipped + 4);
                return Err(DemuxError::EndOfStream);
            }
            code = code << 8 | byte[0] as u32;
            skipped += 1;
        }

        if skipped > 0 {
            warn!("Skipped {skipped} bytes of garbage before start code {code:#010X}");
            self.stats.garbage_bytes += skipped;
            self.stats.resyncs += 1;
        }

        let stream_id = (code & 0xFF) as u8;
        let word = code.to_be_bytes();

        let buffer = match stream_id {
            PROGRAM_END_CODE => {
                debug!("Program end code");
                return Ok(None);
            }
            PACK_HEADER_CODE => {
                let mut marker = [0u8];
                if read_full(&mut self.source, &mut marker)? == 0 {
                    return Err(DemuxError::EndOfStream);
                }
                let generation = PackGeneration::from_marker(marker[0])
                    .ok_or(DemuxError::UnknownStreamVariant(marker[0]))?;

                let mut buffer = self.pool.acquire_buffer(generation.packet_len())?;
                let data = buffer.as_mut_slice();
                data[..4].copy_from_slice(&word);
                data[4] = marker[0];
                self.read_rest(&mut data[5..])?;

                if generation == PackGeneration::Second {
                    let stuffing = (data[data.len() - 1] & 0x07) as usize;
                    let mut discard = [0u8; 7];
                    self.read_rest(&mut discard[..stuffing])?;
                }

                self.generation = Some(generation);
                buffer
            }
            _ => {
                let mut length = [0u8; 2];
                self.read_rest(&mut length)?;
                let payload_len = u16::from_be_bytes(length) as usize;

                let mut buffer = self.pool.acquire_buffer(PACKET_HEADER_SIZE + payload_len)?;
                let data = buffer.as_mut_slice();
                data[..4].copy_from_slice(&word);
                data[4..6].copy_from_slice(&length);
                self.read_rest(&mut data[PACKET_HEADER_SIZE..])?;
                buffer
            }
        };

        self.stats.packets += 1;
        trace!("Packet {code:#010X}, {} bytes", buffer.len());
        Ok(Some(buffer))
    }

    fn read_rest(&mut self, buf: &mut [u8]) -> Result<(), DemuxError> {
        if read_full(&mut self.source, buf)? < buf.len() {
            debug!("Stream ended inside a packet");
            return Err(DemuxError::EndOfStream);
        }
        Ok(())
    }

    fn handle_packet(&mut self, mut buffer: Buffer) -> Result<(), DemuxError> {
        let stream_id = buffer.as_slice()[3];
        let code = u32::from_be_bytes([0, 0, 1, stream_id]);

        match stream_id {
            PACK_HEADER_CODE => {
                match PackHeader::read(buffer.as_slice()) {
                    Ok(pack) => {
                        self.stats.pack_headers += 1;
                        self.last_scr = Some(pack.scr);
                        self.scr_epoch += 1;
                    }
                    Err(reason) => {
                        log_or_err!(self, log::Level::Warn, DemuxError::StructuralParse { code, reason })
                    }
                }
                return self.emit_standalone(buffer, stream_id);
            }
            PROGRAM_STREAM_MAP_ID => {
                match ProgramStreamMap::read(buffer.as_slice()) {
                    Ok(psm) => {
                        debug!("Program stream map version {}, {} entries", psm.version, psm.entries.len());
                        self.psm = Some(psm);
                    }
                    Err(reason) => {
                        log_or_err!(self, log::Level::Warn, DemuxError::StructuralParse { code, reason })
                    }
                }
                return self.emit_standalone(buffer, stream_id);
            }
            id if !has_pes_header(id) => return self.emit_standalone(buffer, stream_id),
            _ => {}
        }

        let header = match PesHeader::read(buffer.as_slice()) {
            Ok(header) => header,
            Err(reason) => {
                self.stats.dropped_packets += 1;
                log_or_err!(self, log::Level::Warn, DemuxError::StructuralParse { code, reason });
                return Ok(());
            }
        };
        buffer.set_payload_window(header.header_len, buffer.len());

        let closes = header.pts.is_some()
            || header.data_alignment
            || self
                .open_units
                .get(&stream_id)
                .is_some_and(|u| u.fragment_count() >= self.config.max_unit_fragments);
        if closes {
            if let Some(unit) = self.open_units.remove(&stream_id) {
                self.ready.push_back(unit);
            }
        }

        if !self.open_units.contains_key(&stream_id) {
            let mut unit = self.new_unit(stream_id)?;
            unit.pts = header.pts;
            unit.dts = header.dts;
            unit.data_alignment = header.data_alignment;
            self.open_units.insert(stream_id, unit);
        }

        if let Some(unit) = self.open_units.get_mut(&stream_id) {
            unit.push_buffer(buffer);
        }
        Ok(())
    }

    fn emit_standalone(&mut self, mut buffer: Buffer, stream_id: u8) -> Result<(), DemuxError> {
        buffer.set_payload_window(PACKET_HEADER_SIZE.min(buffer.len()), buffer.len());
        let mut unit = self.new_unit(stream_id)?;
        unit.push_buffer(buffer);
        self.ready.push_back(unit);
        Ok(())
    }

    fn new_unit(&mut self, stream_id: u8) -> Result<StreamUnit, DemuxError> {
        let mut unit = self.pool.acquire_stream_unit()?;
        unit.stream_id = stream_id;

        let epoch = self.clock_epochs.entry(stream_id).or_default();
        if *epoch != self.scr_epoch {
            *epoch = self.scr_epoch;
            unit.clock_ref = self.last_scr;
        }
        Ok(unit)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::process::source::{SeekableSource, StreamSource};
    use std::io::Cursor;

    pub(crate) fn timestamp_bytes(prefix: u8, ts: u64) -> [u8; 5] {
        [
            prefix << 4 | ((ts >> 29) & 0x0E) as u8 | 1,
            (ts >> 22) as u8,
            ((ts >> 14) & 0xFE) as u8 | 1,
            (ts >> 7) as u8,
            ((ts << 1) & 0xFE) as u8 | 1,
        ]
    }

    /// Second generation PES packet.
    pub(crate) fn pes(stream_id: u8, pts: Option<u64>, payload: &[u8]) -> Vec<u8> {
        let mut optional = vec![0x80, 0x00, 0x00];
        if let Some(pts) = pts {
            optional[1] = 0x80;
            optional[2] = 5;
            optional.extend(timestamp_bytes(0b0010, pts));
        }
        let len = optional.len() + payload.len();

        let mut packet = vec![0x00, 0x00, 0x01, stream_id, (len >> 8) as u8, len as u8];
        packet.extend(optional);
        packet.extend_from_slice(payload);
        packet
    }

    /// Second generation pack header with the given SCR base.
    pub(crate) fn pack(scr: u64) -> Vec<u8> {
        vec![
            0x00,
            0x00,
            0x01,
            0xBA,
            0x44 | ((scr >> 27) & 0x38) as u8 | ((scr >> 28) & 0x03) as u8,
            (scr >> 20) as u8,
            ((scr >> 12) & 0xF8) as u8 | 0x04 | ((scr >> 13) & 0x03) as u8,
            (scr >> 5) as u8,
            ((scr << 3) & 0xF8) as u8 | 0x04,
            0x01,
            0x01,
            0x89,
            0xC3,
            0xF8,
        ]
    }

    fn stream_demuxer(bytes: Vec<u8>) -> Demuxer<StreamSource<Cursor<Vec<u8>>>> {
        Demuxer::new(StreamSource::new(Cursor::new(bytes)))
    }

    #[test]
    fn terminator_alone_is_end_of_stream() {
        let mut demuxer = stream_demuxer(vec![0x00, 0x00, 0x01, 0xB9]);
        assert!(matches!(demuxer.pull_units(4), Err(DemuxError::EndOfStream)));
        assert_eq!(demuxer.pool().stats().outstanding(), 0);
    }

    #[test]
    fn pack_then_ordinary_packet() -> anyhow::Result<()> {
        // 6-byte header (code + marker byte + one more), 8 payload bytes
        let mut bytes = vec![0x00, 0x00, 0x01, 0xBA, 0x44, 0x00];
        bytes.extend([0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0xF8]);
        bytes.extend([0x00, 0x00, 0x01, 0xBE, 0x00, 0x0A]);
        bytes.extend(0..10u8);

        let mut demuxer = stream_demuxer(bytes);
        let units = demuxer.pull_units(2)?;
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].stream_id, 0xBA);
        assert_eq!(units[0].size(), 8);
        assert_eq!(units[1].size(), 10);
        assert_eq!(units[1].to_vec(), (0..10u8).collect::<Vec<_>>());
        assert_eq!(demuxer.pack_generation(), Some(PackGeneration::Second));
        Ok(())
    }

    #[test]
    fn pack_stuffing_is_skipped() -> anyhow::Result<()> {
        let mut bytes = pack(0);
        bytes[13] = 0xFA;
        bytes.extend([0xFF, 0xFF]);
        bytes.extend(pes(0xBF, None, &[9, 9]));

        let mut demuxer = stream_demuxer(bytes);
        let units = demuxer.pull_units(2)?;
        assert_eq!(units[1].stream_id, 0xBF);
        assert_eq!(units[1].to_vec(), vec![0x80, 0x00, 0x00, 9, 9]);
        assert_eq!(demuxer.stats().garbage_bytes, 0);
        Ok(())
    }

    #[test]
    fn garbage_is_skipped() -> anyhow::Result<()> {
        let mut bytes = vec![0x12, 0x00, 0x00, 0x47, 0x01];
        bytes.extend([0x00, 0x00, 0x01, 0xBF, 0x00, 0x03, 7, 8, 9]);
        bytes.extend([0x00, 0x00, 0x01, 0xB9]);

        let mut demuxer = stream_demuxer(bytes);
        let units = demuxer.pull_units(8)?;
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].to_vec(), vec![7, 8, 9]);
        assert_eq!(demuxer.stats().garbage_bytes, 5);
        assert_eq!(demuxer.stats().resyncs, 1);
        assert!(matches!(demuxer.pull_units(1), Err(DemuxError::EndOfStream)));
        Ok(())
    }

    #[test]
    fn fragments_are_reassembled_by_timestamp() -> anyhow::Result<()> {
        let mut bytes = pack(90_000);
        bytes.extend(pes(0xE0, Some(3600), &[1, 2, 3]));
        bytes.extend(pes(0xC0, Some(3000), &[0xA]));
        bytes.extend(pes(0xE0, None, &[4, 5]));
        bytes.extend(pes(0xE0, Some(7200), &[6]));
        bytes.extend([0x00, 0x00, 0x01, 0xB9]);

        let mut demuxer = stream_demuxer(bytes);
        let units = demuxer.pull_units(8)?;
        let ids = units.iter().map(|u| u.stream_id).collect::<Vec<_>>();
        assert_eq!(ids, vec![0xBA, 0xE0, 0xC0, 0xE0]);

        let video = &units[1];
        assert_eq!(video.pts, Some(3600));
        assert_eq!(video.fragment_count(), 2);
        assert_eq!(video.to_vec(), vec![1, 2, 3, 4, 5]);
        assert_eq!(video.clock_ref, Some(90_000));

        assert_eq!(units[2].clock_ref, Some(90_000));
        assert_eq!(units[3].pts, Some(7200));
        assert_eq!(units[3].clock_ref, None);

        drop(units);
        assert_eq!(demuxer.pool().stats().outstanding(), 0);
        Ok(())
    }

    #[test]
    fn fragment_limit_closes_unit() -> anyhow::Result<()> {
        let mut bytes = pes(0xE0, Some(0), &[0]);
        for i in 1..5u8 {
            bytes.extend(pes(0xE0, None, &[i]));
        }

        let mut demuxer = Demuxer::with_pool(
            StreamSource::new(Cursor::new(bytes)),
            PacketPool::default(),
            DemuxConfig {
                max_unit_fragments: 2,
                ..DemuxConfig::default()
            },
        );
        let units = demuxer.pull_units(8)?;
        let sizes = units.iter().map(|u| u.fragment_count()).collect::<Vec<_>>();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(units[1].pts, None);
        Ok(())
    }

    #[test]
    fn broken_header_drops_packet() -> anyhow::Result<()> {
        let mut bytes = vec![0x00, 0x00, 0x01, 0xE0, 0x00, 0x03, 0x80, 0x00, 0x20];
        bytes.extend(pes(0xE0, Some(0), &[1]));

        let mut demuxer = stream_demuxer(bytes);
        let units = demuxer.pull_units(8)?;
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].to_vec(), vec![1]);
        assert_eq!(demuxer.stats().dropped_packets, 1);
        Ok(())
    }

    #[test]
    fn strict_mode_promotes_structural_errors() {
        let bytes = vec![0x00, 0x00, 0x01, 0xE0, 0x00, 0x03, 0x80, 0x00, 0x20];
        let mut demuxer = stream_demuxer(bytes);
        demuxer.set_fail_level(log::Level::Warn);
        assert!(matches!(
            demuxer.pull_units(1),
            Err(DemuxError::StructuralParse { code: 0x1E0, .. })
        ));
    }

    #[test]
    fn unknown_pack_variant_is_fatal() {
        let mut demuxer = stream_demuxer(vec![0x00, 0x00, 0x01, 0xBA, 0x80, 0x00]);
        let err = demuxer.pull_units(1).unwrap_err();
        assert!(matches!(err, DemuxError::UnknownStreamVariant(0x80)));
        assert!(err.is_fatal());
    }

    #[test]
    fn completed_units_survive_a_fatal_error() -> anyhow::Result<()> {
        let mut bytes = pack(0);
        bytes.extend(pes(0xE0, Some(0), &[1, 2]));
        bytes.extend(pes(0xE0, Some(3600), &[3]));
        bytes.extend([0x00, 0x00, 0x01, 0xBA, 0x80, 0x00]);

        let mut demuxer = stream_demuxer(bytes);
        let units = demuxer.pull_units(8)?;
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].to_vec(), vec![1, 2]);

        let err = demuxer.pull_units(8).unwrap_err();
        assert!(matches!(err, DemuxError::UnknownStreamVariant(0x80)));
        Ok(())
    }

    #[test]
    fn truncated_packet_releases_buffer() {
        let mut demuxer = stream_demuxer(vec![0x00, 0x00, 0x01, 0xE0, 0x00, 0x40, 0x80]);
        assert!(matches!(demuxer.pull_units(1), Err(DemuxError::EndOfStream)));
        assert_eq!(demuxer.pool().stats().outstanding(), 0);
    }

    #[test]
    fn discovery_rewinds() -> anyhow::Result<()> {
        let mut bytes = pack(0);
        bytes.extend(pes(0xE0, Some(3600), &[1, 2]));
        bytes.extend(pes(0xC0, Some(1800), &[3]));
        bytes.extend(pes(0xE0, Some(7200), &[4]));

        let mut demuxer = Demuxer::new(SeekableSource::new(Cursor::new(bytes)));
        let report = demuxer.discover()?;
        assert_eq!(report.pack_generation, Some(PackGeneration::Second));
        assert_eq!(report.streams.len(), 2);
        assert_eq!(report.streams[0].stream_id, 0xC0);
        assert_eq!(report.streams[0].kind, StreamKind::Audio);
        assert_eq!(report.streams[1].units, 2);
        assert_eq!(report.streams[1].bytes, 3);
        assert_eq!(report.streams[1].first_pts, Some(3600));
        assert_eq!(demuxer.pool().stats().outstanding(), 0);

        let units = demuxer.pull_units(1)?;
        assert_eq!(units[0].stream_id, 0xBA);
        Ok(())
    }

    #[test]
    fn discovery_needs_seekable_source() {
        let mut demuxer = stream_demuxer(vec![]);
        assert!(matches!(demuxer.discover(), Err(DemuxError::NotSeekable)));
    }
}
