use crate::ihex::HexError;
use core::fmt::{self, Debug, Display};

mod private {
    #[derive(Debug)]
    pub enum Private {}
}

/// The error type used by this library.
///
/// This can encapsulate a GPIO error from the pin driver, and adds the
/// wire-protocol, flash-controller and HEX-stream errors on top of that.
pub enum Error<E> {
    /// A GPIO operation on one of the SWD pins failed.
    Gpio(E),

    /// The target answered with something that is not a valid 3-bit ACK.
    ///
    /// The line has been reset when this is returned; the target may have
    /// lost frame synchronization or be absent entirely.
    Protocol,

    /// The target acknowledged with FAULT; its sticky error flags have
    /// been cleared through DP.ABORT.
    Fault,

    /// The target kept acknowledging WAIT until the retry budget ran out.
    WaitTimeout,

    /// A read payload failed its even-parity check.
    Parity,

    /// IDCODE read back as all-zeros or all-ones; nothing is connected.
    NoTarget,

    /// IDCODE is not in the supported-family table.
    UnknownTarget(u32),

    /// The debug domain did not acknowledge power-up in time.
    PowerUpTimeout,

    /// The flash controller still reads locked after the key sequence.
    UnlockFailed,

    /// Flash BSY did not clear within the family's timeout.
    FlashTimeout,

    /// The flash status register reported error flags (raw SR value).
    FlashStatus(u32),

    /// Operation not permitted in the flash driver's current state.
    BadState,

    /// Flash readback differed from the image at `addr`.
    Mismatch {
        /// First mismatching absolute address.
        addr: u32,
    },

    /// The Intel HEX stream was rejected.
    Hex(HexError),

    #[doc(hidden)]
    __NonExhaustive(private::Private),
}

impl<E> From<HexError> for Error<E> {
    fn from(e: HexError) -> Self {
        Error::Hex(e)
    }
}

impl<E: Debug> Debug for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Gpio(gpio) => write!(f, "Error::Gpio({:?})", gpio),
            Error::Protocol => f.write_str("Error::Protocol"),
            Error::Fault => f.write_str("Error::Fault"),
            Error::WaitTimeout => f.write_str("Error::WaitTimeout"),
            Error::Parity => f.write_str("Error::Parity"),
            Error::NoTarget => f.write_str("Error::NoTarget"),
            Error::UnknownTarget(id) => write!(f, "Error::UnknownTarget({:#010x})", id),
            Error::PowerUpTimeout => f.write_str("Error::PowerUpTimeout"),
            Error::UnlockFailed => f.write_str("Error::UnlockFailed"),
            Error::FlashTimeout => f.write_str("Error::FlashTimeout"),
            Error::FlashStatus(sr) => write!(f, "Error::FlashStatus({:#010x})", sr),
            Error::BadState => f.write_str("Error::BadState"),
            Error::Mismatch { addr } => write!(f, "Error::Mismatch {{ addr: {:#010x} }}", addr),
            Error::Hex(hex) => write!(f, "Error::Hex({:?})", hex),
            Error::__NonExhaustive(_) => unreachable!(),
        }
    }
}

impl<E: Display> Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Gpio(gpio) => write!(f, "GPIO error: {}", gpio),
            Error::Protocol => f.write_str("SWD protocol error"),
            Error::Fault => f.write_str("target signalled FAULT"),
            Error::WaitTimeout => f.write_str("target stuck in WAIT"),
            Error::Parity => f.write_str("payload parity error"),
            Error::NoTarget => f.write_str("no target detected"),
            Error::UnknownTarget(id) => write!(f, "unsupported target (IDCODE {:#010x})", id),
            Error::PowerUpTimeout => f.write_str("debug power-up not acknowledged"),
            Error::UnlockFailed => f.write_str("flash controller refused to unlock"),
            Error::FlashTimeout => f.write_str("flash operation timed out"),
            Error::FlashStatus(sr) => write!(f, "flash error flags set (SR = {:#010x})", sr),
            Error::BadState => f.write_str("flash driver in wrong state for operation"),
            Error::Mismatch { addr } => write!(f, "verify mismatch at {:#010x}", addr),
            Error::Hex(hex) => write!(f, "invalid HEX input: {:?}", hex),
            Error::__NonExhaustive(_) => unreachable!(),
        }
    }
}

/// Session-level failure classification, as reported on the command
/// channel (see [`crate::command`] for the wire encoding).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Storage initialization or mount failed.
    SdMount,
    /// Path lookup failed.
    FileNotFound,
    /// Invalid record, bad checksum, truncated stream or unknown record
    /// type in the HEX input.
    HexParse,
    /// No or invalid IDCODE, power-up timeout, or a protocol fault while
    /// connecting.
    TargetConnect,
    /// Unlock refused, or an erase/program error or timeout.
    ProgramFail,
    /// Readback mismatch or an SWD fault during the verify pass.
    VerifyFail,
    /// Malformed command.
    Generic,
}
