#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err.into());
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

#[derive(thiserror::Error, Debug)]
pub enum PoolError {
    #[error("Pool cannot satisfy {kind} request of {requested} bytes ({outstanding} outstanding)")]
    ResourceExhausted {
        kind: &'static str,
        requested: usize,
        outstanding: usize,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    #[error("Header truncated: {0}")]
    Truncated(#[from] std::io::Error),

    #[error("Too much first generation stuffing")]
    TooMuchStuffing,

    #[error("Header of {header} bytes exceeds packet of {packet} bytes")]
    ExceedsPacket { header: usize, packet: usize },

    #[error("Missing marker in {0}")]
    MissingMarker(&'static str),
}

#[derive(thiserror::Error, Debug)]
pub enum DemuxError {
    #[error("End of stream")]
    EndOfStream,

    #[error("I/O failure while demultiplexing: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown pack header variant: marker byte {0:#04X}")]
    UnknownStreamVariant(u8),

    #[error("Structural error in packet {code:#010X}: {reason}")]
    StructuralParse { code: u32, reason: HeaderError },

    #[error(transparent)]
    ResourceExhausted(#[from] PoolError),

    #[error("Stream discovery requires a seekable source")]
    NotSeekable,
}

impl DemuxError {
    /// Errors after which the session cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DemuxError::Io(_)
                | DemuxError::UnknownStreamVariant(_)
                | DemuxError::ResourceExhausted(_)
                | DemuxError::NotSeekable
        )
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FifoError {
    #[error("Fifo wait cancelled by stop request")]
    Cancelled,

    #[error("Fifo closed and drained")]
    Closed,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum BitStreamError {
    #[error("Bit stream read cancelled by stop request")]
    Cancelled,

    #[error("Bit stream reached end of stream")]
    EndOfStream,

    #[error("need_bits({requested}) with {available} bits resident would overflow the accumulator")]
    AccumulatorOverflow { requested: u32, available: u32 },
}

impl From<FifoError> for BitStreamError {
    fn from(err: FifoError) -> Self {
        match err {
            FifoError::Cancelled => BitStreamError::Cancelled,
            FifoError::Closed => BitStreamError::EndOfStream,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error(transparent)]
    BitStream(#[from] BitStreamError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Missing marker bit in {0}")]
    MissingMarker(&'static str),

    #[error("Invalid picture coding type {0}")]
    InvalidCodingType(u8),

    #[error("Invalid picture size {width}x{height}")]
    InvalidPictureSize { width: u32, height: u32 },

    #[error("Slice vertical position {row} outside picture of {rows} macroblock rows")]
    SliceOutOfPicture { row: u32, rows: u32 },

    #[error("Macroblock address {address} outside picture of {count} macroblocks")]
    MacroblockOutOfPicture { address: u32, count: u32 },

    #[error("Invalid macroblock syntax: {0}")]
    InvalidMacroblock(&'static str),

    #[error("Slice before any picture header")]
    SliceWithoutPicture,

    #[error("Reserved chroma format code {0}")]
    ReservedChromaFormat(u8),

    #[error("Picture size {width}x{height} exceeds the limit of {max_area} pixels")]
    PictureTooLarge { width: u32, height: u32, max_area: u64 },
}

impl ParseError {
    /// Structural errors resynchronize; everything else ends decoding.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ParseError::BitStream(_) | ParseError::Pool(_))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("Stream {0:#04X} is already selected")]
    AlreadySelected(u8),

    #[error("Session already started")]
    AlreadyStarted,

    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}
