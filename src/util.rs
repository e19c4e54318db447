
use log::{error, info};

use structopt::StructOpt;

pub use linux_embedded_hal::sysfs_gpio::{Direction, Error as PinError};
pub use linux_embedded_hal::{Delay, Pin as Pindev};

use embedded_hal::blocking::delay::DelayMs;

use simplelog::{LevelFilter, TermLogger, TerminalMode};

use swd_flash::loader::SliceSource;
use swd_flash::programmer::Programmer;
use swd_flash::{IoDirection, SwdPins};

#[derive(Debug, StructOpt)]
struct Options {
    #[structopt(subcommand)]
    operation: Operations,

    /// SWCLK (output) pin
    #[structopt(long, default_value = "17", env = "CLK_PIN")]
    clk_pin: u64,

    /// SWDIO (bidirectional) pin
    #[structopt(long, default_value = "27", env = "IO_PIN")]
    io_pin: u64,

    /// Target reset (output, active low) pin
    #[structopt(long, default_value = "22", env = "RST_PIN")]
    rst_pin: u64,

    /// Configure log level
    #[structopt(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: LevelFilter,
}

#[derive(Debug, StructOpt)]
enum Operations {
    /// Read target identification
    Info,
    /// Mass-erase the target's flash
    Erase,
    /// Program and verify an Intel HEX image
    Program {
        /// Input HEX file
        file: String,
    },
    /// Verify the target against an Intel HEX image
    Verify {
        /// Input HEX file
        file: String,
    },
    /// Pulse the target reset line
    Reset,
}

/// SWD port over sysfs GPIO pins.
struct SysfsPins {
    clk: Pindev,
    io: Pindev,
    rst: Pindev,
    delay: Delay,
    dir: IoDirection,
}

impl SwdPins for SysfsPins {
    type Error = PinError;

    fn set_clk(&mut self, high: bool) -> Result<(), PinError> {
        self.clk.set_value(high as u8)
    }

    fn set_io(&mut self, high: bool) -> Result<(), PinError> {
        self.io.set_value(high as u8)
    }

    fn read_io(&mut self) -> Result<bool, PinError> {
        Ok(self.io.get_value()? != 0)
    }

    fn set_io_dir(&mut self, dir: IoDirection) -> Result<(), PinError> {
        if dir == self.dir {
            return Ok(());
        }
        self.io.set_direction(match dir {
            // Re-drive the last idle level when taking the line back.
            IoDirection::Output => Direction::Low,
            IoDirection::Input => Direction::In,
        })?;
        self.dir = dir;
        Ok(())
    }

    fn set_rst(&mut self, high: bool) -> Result<(), PinError> {
        self.rst.set_value(high as u8)
    }

    fn tick(&mut self) {
        // sysfs accesses are far slower than any target's minimum
        // half-cycle already.
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error + 'static>> {
    // Load options
    let opts = Options::from_args();

    // Setup logging
    TermLogger::init(opts.log_level, simplelog::Config::default(), TerminalMode::Mixed).unwrap();

    // Connect and configure GPIO pins
    let clk = Pindev::new(opts.clk_pin);
    let io = Pindev::new(opts.io_pin);
    let rst = Pindev::new(opts.rst_pin);

    clk.export().unwrap();
    io.export().unwrap();
    rst.export().unwrap();
    clk.set_direction(Direction::Low).unwrap();
    io.set_direction(Direction::Low).unwrap();
    rst.set_direction(Direction::High).unwrap();

    let pins = SysfsPins {
        clk,
        io,
        rst,
        delay: Delay,
        dir: IoDirection::Output,
    };
    let mut programmer = Programmer::new(pins);

    // Perform the requested operation
    match &opts.operation {
        Operations::Info => match programmer.identify() {
            Ok(target) => {
                info!("Target IDCODE 0x{:08x} ({:?})", target.idcode, target.family);
            }
            Err(e) => {
                error!("Identification failed: {:?}", e);
                return Ok(());
            }
        },
        Operations::Erase => match programmer.erase() {
            Ok(()) => info!("Mass erase complete"),
            Err(e) => {
                error!("Erase failed ({:?}): {:?}", e.kind, e.cause);
                return Ok(());
            }
        },
        Operations::Program { file } => {
            info!("Programming {}", file);

            let data = std::fs::read(file).unwrap();
            let mut image = SliceSource::new(&data);

            match programmer.program_image(&mut image) {
                Ok(()) => info!("Program + verify complete"),
                Err(e) => {
                    error!("Programming failed ({:?}): {:?}", e.kind, e.cause);
                    return Ok(());
                }
            }
        }
        Operations::Verify { file } => {
            info!("Verifying against {}", file);

            let data = std::fs::read(file).unwrap();
            let mut image = SliceSource::new(&data);

            match programmer.verify_image(&mut image) {
                Ok(()) => info!("Verify complete"),
                Err(e) => {
                    error!("Verify failed ({:?}): {:?}", e.kind, e.cause);
                    return Ok(());
                }
            }
        }
        Operations::Reset => match programmer.reset_target() {
            Ok(()) => info!("Target reset"),
            Err(e) => {
                error!("Reset failed: {:?}", e);
                return Ok(());
            }
        },
    }

    Ok(())
}
