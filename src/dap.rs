//! Typed Debug Port and Access Port register access, layered on the line
//! engine in [`crate::swd`].
//!
//! AP reads on SWD are posted: the payload of an AP read transaction is
//! the result of the *previous* AP read. [`Swd::read_ap`] hides this by
//! issuing the follow-up DP.RDBUFF read before returning, so callers can
//! treat AP reads as synchronous.

use crate::swd::Swd;
use crate::{Error, SwdPins};

// IDCODE and ABORT share an address; the access direction selects
// between them, so readable and writable DP registers get separate
// tables.

/// DP registers readable over SWD.
pub(crate) enum DpRead {
    Idcode = 0x0,
    CtrlStat = 0x4,
    Rdbuff = 0xC,
}

/// DP registers writable over SWD.
pub(crate) enum DpWrite {
    Abort = 0x0,
    CtrlStat = 0x4,
    Select = 0x8,
}

/// MEM-AP registers (full 8-bit addresses; bits [7:4] select the bank).
pub(crate) enum ApReg {
    Csw = 0x00,
    Tar = 0x04,
    Drw = 0x0C,
    Idr = 0xFC,
}

// DP.ABORT sticky-clear bits.
const STKCMPCLR: u32 = 1 << 1;
const STKERRCLR: u32 = 1 << 2;
const WDERRCLR: u32 = 1 << 3;
const ORUNERRCLR: u32 = 1 << 4;
pub(crate) const ABORT_ALL_CLEAR: u32 = STKCMPCLR | STKERRCLR | WDERRCLR | ORUNERRCLR;

/// Builds a request byte, transmitted LSB first: start, APnDP, RnW,
/// A[2], A[3], parity, stop, park.
pub(crate) fn request(ap: bool, rnw: bool, addr: u8) -> u8 {
    let a2 = (addr >> 2) & 1;
    let a3 = (addr >> 3) & 1;
    let parity = (ap as u8 + rnw as u8 + a2 + a3) & 1;
    0x81 | (ap as u8) << 1 | (rnw as u8) << 2 | a2 << 3 | a3 << 4 | parity << 5
}

impl<P: SwdPins> Swd<P> {
    /// Reads a DP register.
    pub fn read_dp(&mut self, addr: u8) -> Result<u32, Error<P::Error>> {
        let mut value = 0;
        self.transact(request(false, true, addr), &mut value, true)?;
        Ok(value)
    }

    /// Writes a DP register.
    pub fn write_dp(&mut self, addr: u8, value: u32) -> Result<(), Error<P::Error>> {
        let mut value = value;
        self.transact(request(false, false, addr), &mut value, false)
    }

    /// Reads an AP register, hiding the posted-read window.
    pub fn read_ap(&mut self, addr: u8) -> Result<u32, Error<P::Error>> {
        self.select_bank(addr)?;
        // The payload of this transaction is stale; the fresh value lands
        // in RDBUFF.
        let mut stale = 0;
        self.transact(request(true, true, addr), &mut stale, true)?;
        self.read_dp(DpRead::Rdbuff as u8)
    }

    /// Writes an AP register.
    pub fn write_ap(&mut self, addr: u8, value: u32) -> Result<(), Error<P::Error>> {
        self.select_bank(addr)?;
        let mut value = value;
        self.transact(request(true, false, addr), &mut value, false)
    }

    /// Points DP.SELECT at the bank containing `addr`, if it is not
    /// already. APSEL stays 0; only one AP is used.
    fn select_bank(&mut self, addr: u8) -> Result<(), Error<P::Error>> {
        let select = u32::from(addr & 0xF0);
        if self.select != Some(select) {
            self.write_dp(DpWrite::Select as u8, select)?;
            self.select = Some(select);
        }
        Ok(())
    }
}
