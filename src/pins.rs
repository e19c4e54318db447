//! [`SwdPins`] adapter over `embedded-hal` pins.
//!
//! SWDIO is bidirectional. Rather than reconfiguring a GPIO pad per bit
//! (orders of magnitude too slow on most hosts), this adapter expects
//! the IO pin in an open-drain-with-pull-up configuration: "input"
//! direction just means releasing the line by driving it high, after
//! which the pin's input path sees whatever the target drives.

use crate::{IoDirection, SwdPins};
use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::digital::v2::{InputPin, OutputPin};

/// Bit-banged SWD port over three GPIO pins and a microsecond delay.
///
/// # Type Parameters
///
/// * **`CLK`**: push-pull output driving SWCLK.
/// * **`IO`**: open-drain pin with pull-up on SWDIO, readable at any
///   time.
/// * **`RST`**: push-pull output driving NRST (active low).
/// * **`D`**: delay provider for the half-cycle tick.
#[derive(Debug)]
pub struct OpenDrainPins<CLK, IO, RST, D> {
    clk: CLK,
    io: IO,
    rst: RST,
    delay: D,
    half_cycle_us: u16,
    dir: IoDirection,
}

impl<E, CLK, IO, RST, D> OpenDrainPins<CLK, IO, RST, D>
where
    CLK: OutputPin<Error = E>,
    IO: OutputPin<Error = E> + InputPin<Error = E>,
    RST: OutputPin<Error = E>,
    D: DelayUs<u16>,
{
    /// Creates the adapter. `half_cycle_us` sets the SWCLK rate; 2 µs
    /// gives a 250 kHz clock, slow enough for any target.
    pub fn new(clk: CLK, io: IO, rst: RST, delay: D, half_cycle_us: u16) -> Self {
        OpenDrainPins {
            clk,
            io,
            rst,
            delay,
            half_cycle_us,
            dir: IoDirection::Output,
        }
    }

    /// Releases the pins.
    pub fn free(self) -> (CLK, IO, RST, D) {
        (self.clk, self.io, self.rst, self.delay)
    }
}

impl<E, CLK, IO, RST, D> SwdPins for OpenDrainPins<CLK, IO, RST, D>
where
    CLK: OutputPin<Error = E>,
    IO: OutputPin<Error = E> + InputPin<Error = E>,
    RST: OutputPin<Error = E>,
    D: DelayUs<u16>,
{
    type Error = E;

    fn set_clk(&mut self, high: bool) -> Result<(), E> {
        if high {
            self.clk.set_high()
        } else {
            self.clk.set_low()
        }
    }

    fn set_io(&mut self, high: bool) -> Result<(), E> {
        if high {
            self.io.set_high()
        } else {
            self.io.set_low()
        }
    }

    fn read_io(&mut self) -> Result<bool, E> {
        self.io.is_high()
    }

    fn set_io_dir(&mut self, dir: IoDirection) -> Result<(), E> {
        if dir == self.dir {
            return Ok(());
        }
        if dir == IoDirection::Input {
            // Release the line; the pull-up holds it high until the
            // target drives it.
            self.io.set_high()?;
        }
        self.dir = dir;
        Ok(())
    }

    fn set_rst(&mut self, high: bool) -> Result<(), E> {
        if high {
            self.rst.set_high()
        } else {
            self.rst.set_low()
        }
    }

    fn tick(&mut self) {
        self.delay.delay_us(self.half_cycle_us);
    }

    fn delay_ms(&mut self, ms: u32) {
        for _ in 0..ms {
            self.delay.delay_us(1_000);
        }
    }
}
