//! Program clock recovery and presentation time correction.
//!
//! Clock references and timestamps arrive as 33-bit 90 kHz tick counts and
//! are handled here in microseconds. Each program keeps a running average
//! of `now - clock_ref`; the first timestamp after the clock starts pins
//! the program to the local clock with a fixed presentation delay.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use log::{debug, warn};

pub const CR_MAX_AVERAGE_COUNTER: u32 = 40;
pub const CR_MAX_GAP_US: i64 = 1_000_000;
pub const DEFAULT_PTS_DELAY_US: i64 = 500_000;
pub const DEFAULT_LATE_THRESHOLD_US: i64 = 100_000;

pub fn ticks_to_us(ticks: u64) -> i64 {
    (ticks as i64) * 100 / 9
}

/// Local time source, in microseconds.
pub trait Clock: Send {
    fn now_us(&self) -> i64;
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_us(&self) -> i64 {
        self.origin.elapsed().as_micros() as i64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicI64>);

impl ManualClock {
    pub fn set(&self, now_us: i64) {
        self.0.store(now_us, Ordering::Release);
    }

    pub fn advance(&self, us: i64) {
        self.0.fetch_add(us, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynchroConfig {
    pub average_samples: u32,
    pub max_gap_us: i64,
    pub pts_delay_us: i64,
    /// B pictures later than this are dropped.
    pub late_threshold_us: i64,
}

impl Default for SynchroConfig {
    fn default() -> Self {
        Self {
            average_samples: CR_MAX_AVERAGE_COUNTER,
            max_gap_us: CR_MAX_GAP_US,
            pts_delay_us: DEFAULT_PTS_DELAY_US,
            late_threshold_us: DEFAULT_LATE_THRESHOLD_US,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SynchroState {
    #[default]
    NotStarted,
    Start,
    Reinit,
    Ok,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProgramClock {
    pub state: SynchroState,
    pub last_cr: i64,
    pub delta_cr: i64,
    pub delta_absolute: i64,
    pub average_count: u32,
}

impl ProgramClock {
    fn reinit(&mut self) {
        self.delta_cr = 0;
        self.last_cr = 0;
        self.average_count = 0;
    }
}

pub struct Synchro {
    config: SynchroConfig,
    clock: Box<dyn Clock>,
    programs: BTreeMap<u16, ProgramClock>,
}

impl std::fmt::Debug for Synchro {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchro")
            .field("config", &self.config)
            .field("programs", &self.programs)
            .finish()
    }
}

impl Default for Synchro {
    fn default() -> Self {
        Self::new(SynchroConfig::default(), Box::new(SystemClock::default()))
    }
}

impl Synchro {
    pub fn new(config: SynchroConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            programs: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &SynchroConfig {
        &self.config
    }

    pub fn now_us(&self) -> i64 {
        self.clock.now_us()
    }

    pub fn program(&self, program: u16) -> ProgramClock {
        self.programs.get(&program).copied().unwrap_or_default()
    }

    /// Feeds one clock reference (90 kHz ticks) of `program`.
    pub fn observe_clock_ref(&mut self, raw_clock_ref: u64, program: u16) {
        let now = self.clock.now_us();
        let cr = ticks_to_us(raw_clock_ref);
        let samples = self.config.average_samples.max(1);
        let max_gap = self.config.max_gap_us;
        let pgrm = self.programs.entry(program).or_default();

        let delta = now - cr;
        if pgrm.last_cr != 0 && (pgrm.last_cr - cr).abs() > max_gap {
            warn!("Clock reference of program {program} jumped, re-initialised");
            pgrm.reinit();
            pgrm.state = SynchroState::Reinit;
        }
        pgrm.last_cr = cr;

        if pgrm.average_count == samples {
            pgrm.delta_cr = (delta + pgrm.delta_cr * (samples as i64 - 1)) / samples as i64;
        } else {
            pgrm.delta_cr = (delta + pgrm.delta_cr * pgrm.average_count as i64)
                / (pgrm.average_count as i64 + 1);
            pgrm.average_count += 1;
        }

        if pgrm.state == SynchroState::NotStarted {
            debug!("Program {program} clock started");
            pgrm.state = SynchroState::Start;
        }
    }

    /// Maps a raw presentation timestamp (90 kHz ticks) to local time in
    /// microseconds. Returns `None` while the program clock is not usable;
    /// the first timestamp after a re-initialisation is dropped as well.
    pub fn correct(&mut self, raw_pts: u64, program: u16) -> Option<i64> {
        let now = self.clock.now_us();
        let delay = self.config.pts_delay_us;
        let pgrm = self.programs.entry(program).or_default();
        let pts = ticks_to_us(raw_pts);

        match pgrm.state {
            SynchroState::NotStarted => None,
            SynchroState::Start => {
                let pts = pts + pgrm.delta_cr;
                pgrm.delta_absolute = now - pts + delay;
                pgrm.state = SynchroState::Ok;
                Some(pts + pgrm.delta_absolute)
            }
            SynchroState::Reinit => {
                pgrm.state = SynchroState::Start;
                None
            }
            SynchroState::Ok => Some(pts + pgrm.delta_cr + pgrm.delta_absolute),
        }
    }

    /// Whether a picture due at `presentation_us` is already too late to
    /// be worth decoding.
    pub fn is_late(&self, presentation_us: i64) -> bool {
        self.clock.now_us() - presentation_us > self.config.late_threshold_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synchro() -> (Synchro, ManualClock) {
        let clock = ManualClock::default();
        clock.set(10_000_000);
        (
            Synchro::new(SynchroConfig::default(), Box::new(clock.clone())),
            clock,
        )
    }

    #[test]
    fn timestamps_wait_for_clock() {
        let (mut synchro, _) = synchro();
        assert_eq!(synchro.correct(90_000, 0), None);
        assert_eq!(synchro.program(0).state, SynchroState::NotStarted);
    }

    #[test]
    fn first_timestamp_pins_presentation_delay() {
        let (mut synchro, clock) = synchro();
        synchro.observe_clock_ref(90_000, 0);
        assert_eq!(synchro.program(0).state, SynchroState::Start);

        assert_eq!(synchro.correct(90_000, 0), Some(10_500_000));
        assert_eq!(synchro.program(0).state, SynchroState::Ok);

        // 40 ms later in stream time, regardless of the local clock
        clock.advance(5_000);
        assert_eq!(synchro.correct(93_600, 0), Some(10_540_000));
    }

    #[test]
    fn clock_jump_reinitialises() {
        let (mut synchro, clock) = synchro();
        synchro.observe_clock_ref(90_000, 0);
        synchro.correct(90_000, 0);

        clock.advance(40_000);
        synchro.observe_clock_ref(90_000 + 3600, 0);
        assert_eq!(synchro.program(0).state, SynchroState::Ok);
        assert_eq!(synchro.program(0).average_count, 2);

        synchro.observe_clock_ref(90_000 * 10, 0);
        assert_eq!(synchro.program(0).state, SynchroState::Reinit);
        assert_eq!(synchro.program(0).average_count, 1);

        assert_eq!(synchro.correct(90_000 * 10, 0), None);
        assert!(synchro.correct(90_000 * 10, 0).is_some());
    }

    #[test]
    fn average_is_bounded() {
        let (mut synchro, clock) = synchro();
        for i in 0..100u64 {
            clock.advance(40_000);
            synchro.observe_clock_ref(90_000 + i * 3600, 3);
        }
        let pgrm = synchro.program(3);
        assert_eq!(pgrm.average_count, CR_MAX_AVERAGE_COUNTER);
        assert_eq!(pgrm.delta_cr, 10_040_000 - 1_000_000);
    }

    #[test]
    fn lateness() {
        let (synchro, clock) = synchro();
        assert!(!synchro.is_late(10_000_000));
        clock.advance(100_001);
        assert!(synchro.is_late(10_000_000));
    }
}
