//! SWD line engine: bit-level wire access, line reset and packet framing.
//!
//! Clocking convention: outputs change while SWCLK is low, inputs are
//! sampled after the rising edge. The pin driver's `tick` separates the
//! two half-cycles.

use crate::dap;
use crate::{Error, IoDirection, SwdPins};

/// How often a WAIT acknowledgement is retried before giving up.
const WAIT_RETRIES: usize = 64;

/// Idle (low) cycles driven after each completed transaction.
const IDLE_CYCLES: usize = 8;

/// High cycles on either side of the JTAG-to-SWD selection sequence.
/// The architecture requires at least 50.
const RESET_CYCLES: usize = 56;

/// Three-bit transaction acknowledgement, LSB received first.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Ack {
    Ok,
    Wait,
    Fault,
    Invalid,
}

impl Ack {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0b001 => Ack::Ok,
            0b010 => Ack::Wait,
            0b100 => Ack::Fault,
            _ => Ack::Invalid,
        }
    }
}

/// Bit-banged SWD probe attached to a pin driver.
///
/// Holds the only reference to the pins for the duration of a session;
/// all higher layers (DP/AP transactions, the memory bus, the flash
/// driver) reach the wire exclusively through this type.
#[derive(Debug)]
pub struct Swd<P: SwdPins> {
    pins: P,
    /// Cached DP.SELECT contents, `None` until first written.
    pub(crate) select: Option<u32>,
    /// Cached MEM-AP CSW contents, `None` until first written.
    pub(crate) csw: Option<u32>,
}

impl<P: SwdPins> Swd<P> {
    /// Creates a probe over `pins`. No wire traffic happens until
    /// [`connect`](Swd::connect) or [`line_reset`](Swd::line_reset).
    pub fn new(pins: P) -> Self {
        Swd {
            pins,
            select: None,
            csw: None,
        }
    }

    /// Releases the pin driver.
    pub fn release(self) -> P {
        self.pins
    }

    pub(crate) fn pins_mut(&mut self) -> &mut P {
        &mut self.pins
    }

    fn write_bit(&mut self, bit: bool) -> Result<(), Error<P::Error>> {
        self.pins.set_clk(false).map_err(Error::Gpio)?;
        self.pins.set_io(bit).map_err(Error::Gpio)?;
        self.pins.tick();
        self.pins.set_clk(true).map_err(Error::Gpio)?;
        self.pins.tick();
        Ok(())
    }

    fn read_bit(&mut self) -> Result<bool, Error<P::Error>> {
        self.pins.set_clk(false).map_err(Error::Gpio)?;
        self.pins.tick();
        self.pins.set_clk(true).map_err(Error::Gpio)?;
        self.pins.tick();
        self.pins.read_io().map_err(Error::Gpio)
    }

    /// One clock cycle during which neither side drives the line.
    fn turnaround(&mut self) -> Result<(), Error<P::Error>> {
        self.pins.set_clk(false).map_err(Error::Gpio)?;
        self.pins.tick();
        self.pins.set_clk(true).map_err(Error::Gpio)?;
        self.pins.tick();
        Ok(())
    }

    /// Writes one byte, LSB first.
    pub fn write_byte(&mut self, byte: u8) -> Result<(), Error<P::Error>> {
        for i in 0..8 {
            self.write_bit(byte & (1 << i) != 0)?;
        }
        Ok(())
    }

    /// Reads one byte, LSB first.
    pub fn read_byte(&mut self) -> Result<u8, Error<P::Error>> {
        let mut byte = 0;
        for i in 0..8 {
            if self.read_bit()? {
                byte |= 1 << i;
            }
        }
        Ok(byte)
    }

    fn idle(&mut self) -> Result<(), Error<P::Error>> {
        for _ in 0..IDLE_CYCLES {
            self.write_bit(false)?;
        }
        Ok(())
    }

    /// Drives the line-reset sequence and selects SWD on the DAP.
    ///
    /// This is the JTAG-to-SWD flavour: a run of at least 50 high
    /// cycles, the 16-bit selection sequence `0xE79E` (LSB first),
    /// another high run, then idle cycles. SWD-only debug ports ignore
    /// the selection sequence; mixed-mode ports need it.
    pub fn line_reset(&mut self) -> Result<(), Error<P::Error>> {
        self.select = None;
        self.csw = None;
        self.pins
            .set_io_dir(IoDirection::Output)
            .map_err(Error::Gpio)?;
        for _ in 0..RESET_CYCLES {
            self.write_bit(true)?;
        }
        self.write_byte(0x9E)?;
        self.write_byte(0xE7)?;
        for _ in 0..RESET_CYCLES {
            self.write_bit(true)?;
        }
        self.idle()
    }

    /// Resets the line and reads IDCODE, the mandatory first read after a
    /// line reset.
    ///
    /// All-zeros or all-ones means nothing answered.
    pub fn connect(&mut self) -> Result<u32, Error<P::Error>> {
        self.line_reset()?;
        let idcode = self.read_dp(dap::DpRead::Idcode as u8)?;
        if idcode == 0 || idcode == 0xFFFF_FFFF {
            return Err(Error::NoTarget);
        }
        trace!("line reset ok, IDCODE = {:08x}", idcode);
        Ok(idcode)
    }

    fn read_ack(&mut self) -> Result<Ack, Error<P::Error>> {
        let mut bits = 0;
        for i in 0..3 {
            if self.read_bit()? {
                bits |= 1 << i;
            }
        }
        Ok(Ack::from_bits(bits))
    }

    fn write_payload(&mut self, value: u32) -> Result<(), Error<P::Error>> {
        for i in 0..32 {
            self.write_bit(value & (1 << i) != 0)?;
        }
        self.write_bit(value.count_ones() % 2 == 1)
    }

    fn read_payload(&mut self) -> Result<(u32, bool), Error<P::Error>> {
        let mut value = 0u32;
        for i in 0..32 {
            if self.read_bit()? {
                value |= 1 << i;
            }
        }
        let parity = self.read_bit()?;
        Ok((value, parity))
    }

    /// One transaction attempt. Leaves the line driven low by the probe
    /// whatever the acknowledgement was.
    fn transact_once(
        &mut self,
        request: u8,
        data: &mut u32,
        rnw: bool,
    ) -> Result<Ack, Error<P::Error>> {
        self.write_byte(request)?;
        self.pins
            .set_io_dir(IoDirection::Input)
            .map_err(Error::Gpio)?;
        self.turnaround()?;
        let ack = self.read_ack()?;
        match ack {
            Ack::Ok if rnw => {
                let (value, parity) = self.read_payload()?;
                self.turnaround()?;
                self.pins
                    .set_io_dir(IoDirection::Output)
                    .map_err(Error::Gpio)?;
                self.idle()?;
                if parity != (value.count_ones() % 2 == 1) {
                    return Err(Error::Parity);
                }
                *data = value;
            }
            Ack::Ok => {
                self.turnaround()?;
                self.pins
                    .set_io_dir(IoDirection::Output)
                    .map_err(Error::Gpio)?;
                self.write_payload(*data)?;
                self.idle()?;
            }
            _ => {
                // No data phase after WAIT/FAULT; give the bus back and
                // settle the line before whatever comes next.
                self.turnaround()?;
                self.pins
                    .set_io_dir(IoDirection::Output)
                    .map_err(Error::Gpio)?;
                self.idle()?;
            }
        }
        Ok(ack)
    }

    /// Runs one DP/AP transaction to completion: WAIT is retried with the
    /// same request, FAULT clears the sticky flags through DP.ABORT, and
    /// a garbled acknowledgement forces a line reset.
    pub(crate) fn transact(
        &mut self,
        request: u8,
        data: &mut u32,
        rnw: bool,
    ) -> Result<(), Error<P::Error>> {
        for _ in 0..WAIT_RETRIES {
            match self.transact_once(request, data, rnw)? {
                Ack::Ok => return Ok(()),
                Ack::Wait => continue,
                Ack::Fault => {
                    self.clear_sticky_errors()?;
                    return Err(Error::Fault);
                }
                Ack::Invalid => {
                    self.line_reset()?;
                    return Err(Error::Protocol);
                }
            }
        }
        Err(Error::WaitTimeout)
    }

    /// Writes DP.ABORT with all sticky-clear bits. Used on the FAULT
    /// path, so the acknowledgement is not interpreted further.
    fn clear_sticky_errors(&mut self) -> Result<(), Error<P::Error>> {
        let mut value = dap::ABORT_ALL_CLEAR;
        let request = dap::request(false, false, dap::DpWrite::Abort as u8);
        self.transact_once(request, &mut value, false).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimTarget, IDCODE_M3};

    #[test]
    fn connect_reads_idcode() {
        let mut swd = Swd::new(SimTarget::new(IDCODE_M3));
        assert_eq!(swd.connect().unwrap(), IDCODE_M3);
    }

    #[test]
    fn absent_target_is_protocol_error() {
        let mut swd = Swd::new(SimTarget::absent());
        match swd.connect() {
            Err(Error::Protocol) => {}
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn all_ones_idcode_is_no_target() {
        let mut swd = Swd::new(SimTarget::new(0xFFFF_FFFF));
        match swd.connect() {
            Err(Error::NoTarget) => {}
            other => panic!("expected NoTarget, got {:?}", other),
        }
    }

    #[test]
    fn wait_acks_are_retried() {
        let mut swd = Swd::new(SimTarget::new(IDCODE_M3).with_wait_acks(5));
        assert_eq!(swd.connect().unwrap(), IDCODE_M3);
    }

    #[test]
    fn wait_budget_is_bounded() {
        // One fewer WAIT than the budget still succeeds...
        let mut swd = Swd::new(SimTarget::new(IDCODE_M3).with_wait_acks(63));
        assert_eq!(swd.connect().unwrap(), IDCODE_M3);

        // ...the full budget does not.
        let mut swd = Swd::new(SimTarget::new(IDCODE_M3).with_wait_acks(64));
        match swd.connect() {
            Err(Error::WaitTimeout) => {}
            other => panic!("expected WaitTimeout, got {:?}", other),
        }
    }

    #[test]
    fn corrupted_payload_fails_parity() {
        let mut swd = Swd::new(SimTarget::new(IDCODE_M3).with_corrupt_parity());
        match swd.connect() {
            Err(Error::Parity) => {}
            other => panic!("expected parity error, got {:?}", other),
        }
    }

    #[test]
    fn fault_clears_sticky_and_surfaces() {
        let mut swd = Swd::new(SimTarget::new(IDCODE_M3).with_fault_acks(1));
        swd.connect().unwrap();
        match swd.read_u32(0x2000_0000) {
            Err(Error::Fault) => {}
            other => panic!("expected fault, got {:?}", other),
        }
        assert_eq!(swd.release().abort_writes(), 1);
    }
}
