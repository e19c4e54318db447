//! A bit-banged [SWD] flash programmer for STM32 Cortex-M targets.
//!
//! This crate drives the two-wire Serial Wire Debug port of an ARM
//! Cortex-M device through three plain GPIO pins (SWCLK, SWDIO, NRST),
//! identifies the target, and programs a firmware image delivered as a
//! streamed Intel HEX file into the on-chip flash. STM32 F0, F1 and F4
//! flash interfaces are currently supported.
//!
//! The hardware seam is the [`SwdPins`] trait; everything above it (the
//! wire engine, the DP/AP transaction layer, the memory bus, the flash
//! driver and the session orchestrator) is platform independent and
//! `no_std`. An adapter over [`embedded-hal`] pins is provided in
//! [`pins`].
//!
//! Contributions are welcome!
//!
//! [SWD]: https://developer.arm.com/documentation/ihi0031/latest
//! [`embedded-hal`]: https://docs.rs/embedded-hal/

#![doc(html_root_url = "https://docs.rs/swd-flash/0.2.0")]
#![warn(missing_debug_implementations, rust_2018_idioms)]
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod log;
mod dap;
mod error;
mod mem;
mod utils;
pub mod command;
pub mod flash;
pub mod ihex;
pub mod loader;
pub mod pins;
pub mod prelude;
pub mod programmer;
pub mod swd;

#[cfg(test)]
mod sim;

pub use crate::error::{Error, ErrorKind};

/// Direction of the bidirectional SWDIO line, as seen from the probe.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IoDirection {
    /// The probe drives the line.
    Output,
    /// The line is released and the target may drive it.
    Input,
}

/// Pin-level access to an SWD port.
///
/// Implementations own the three wires for the duration of a programming
/// session; no other code may touch them while a [`swd::Swd`] holds the
/// driver. The direction flip requested by [`set_io_dir`] must have
/// settled before the next [`read_io`]; drivers for hosts where pin
/// reconfiguration is slow are encouraged to cache the direction and skip
/// no-op changes.
///
/// [`set_io_dir`]: SwdPins::set_io_dir
/// [`read_io`]: SwdPins::read_io
pub trait SwdPins {
    /// Error reported by the underlying GPIO access.
    type Error;

    /// Drives the SWCLK line.
    fn set_clk(&mut self, high: bool) -> Result<(), Self::Error>;

    /// Drives the SWDIO line. Only called while the direction is
    /// [`IoDirection::Output`].
    fn set_io(&mut self, high: bool) -> Result<(), Self::Error>;

    /// Samples the SWDIO line. Only called while the direction is
    /// [`IoDirection::Input`].
    fn read_io(&mut self) -> Result<bool, Self::Error>;

    /// Switches who drives SWDIO.
    fn set_io_dir(&mut self, dir: IoDirection) -> Result<(), Self::Error>;

    /// Drives the target reset line (active low).
    fn set_rst(&mut self, high: bool) -> Result<(), Self::Error>;

    /// Waits one calibrated SWCLK half-cycle.
    fn tick(&mut self);

    /// Waits `ms` milliseconds. Used between flash busy polls and for the
    /// reset pulse, never on the bit path.
    fn delay_ms(&mut self, ms: u32);
}

/// A sink for assembled write units.
///
/// The stream assembler in [`loader`] emits each completed unit exactly
/// once. The two shipped implementations program and verify target flash
/// (see [`flash`]).
pub trait WriteSink {
    /// Error the sink can fail with.
    type Error;

    /// Consumes one write unit starting at absolute address `addr`.
    ///
    /// `addr` is aligned to the assembler's unit size; positions inside
    /// `data` that no HEX record covered hold `0xFF`.
    fn emit(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error>;
}

/// A sequential source of firmware image bytes.
///
/// This mirrors the storage collaborator delivering the HEX file: plain
/// sequential reads plus a single rewind between the program and verify
/// passes. A read returning `0` means end of stream.
pub trait ImageSource {
    /// Reads up to `buf.len()` bytes, returning how many were read.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Restarts the stream from the beginning.
    fn rewind(&mut self);
}
