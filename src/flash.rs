//! Driver for the STM32 flash program/erase controller, reached through
//! the target's MEM-AP.
//!
//! The F0/F1 and F4 families share the same key-based lock scheme but
//! differ in register layout, status bits, erase granule and program
//! granularity; each family gets its own register table and bit
//! definitions, dispatched once per session after identification.

use crate::swd::Swd;
use crate::{Error, SwdPins, WriteSink};
use bitflags::bitflags;

/// Cortex-M debug-port identities this programmer knows how to flash.
///
/// Identification is IDCODE-granular on purpose: STM32 parts sharing a
/// core share a debug-port IDCODE and differ only in `DBGMCU_IDCODE`,
/// which this driver does not consult. The register layouts below are
/// common to everything behind each IDCODE.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum McuFamily {
    /// STM32F0-class parts (Cortex-M0).
    CortexM0,
    /// STM32F1-class parts (Cortex-M3).
    CortexM3,
    /// STM32F4-class parts (Cortex-M4).
    CortexM4,
}

impl McuFamily {
    /// Looks up the family for a DP IDCODE.
    pub fn from_idcode(idcode: u32) -> Option<Self> {
        match idcode {
            0x0BB1_1477 => Some(McuFamily::CortexM0),
            0x4BA0_0477 => Some(McuFamily::CortexM3),
            0x4BA0_1477 => Some(McuFamily::CortexM4),
            _ => None,
        }
    }

    fn regs(self) -> &'static FlashRegs {
        match self {
            McuFamily::CortexM0 | McuFamily::CortexM3 => &F1_REGS,
            McuFamily::CortexM4 => &F4_REGS,
        }
    }

    /// Upper bound on a mass erase, in milliseconds.
    fn erase_timeout_ms(self) -> u32 {
        match self {
            McuFamily::CortexM0 | McuFamily::CortexM3 => 2_000,
            // Worst-case F4 mass erase at low supply voltage is tens of
            // seconds.
            McuFamily::CortexM4 => 32_000,
        }
    }
}

/// Upper bound on a single program access, in milliseconds.
const PROGRAM_TIMEOUT_MS: u32 = 50;

/// Absolute flash-interface register addresses for one family layout.
#[derive(Debug)]
struct FlashRegs {
    keyr: u32,
    sr: u32,
    cr: u32,
    /// Erase address register; the F4 layout has none (sectors are
    /// selected through CR.SNB instead).
    ar: Option<u32>,
}

static F1_REGS: FlashRegs = FlashRegs {
    keyr: 0x4002_2004,
    sr: 0x4002_200C,
    cr: 0x4002_2010,
    ar: Some(0x4002_2014),
};

static F4_REGS: FlashRegs = FlashRegs {
    keyr: 0x4002_3C04,
    sr: 0x4002_3C0C,
    cr: 0x4002_3C10,
    ar: None,
};

const KEY1: u32 = 0x4567_0123;
const KEY2: u32 = 0xCDEF_89AB;

/// Flash is mapped here on every supported family.
pub const FLASH_BASE: u32 = 0x0800_0000;

/// F0/F1 page size.
const F1_PAGE_SIZE: u32 = 1024;

/// F4 sector sizes, in order from `FLASH_BASE`.
static F4_SECTOR_SIZES: [u32; 12] = [
    16 * 1024,
    16 * 1024,
    16 * 1024,
    16 * 1024,
    64 * 1024,
    128 * 1024,
    128 * 1024,
    128 * 1024,
    128 * 1024,
    128 * 1024,
    128 * 1024,
    128 * 1024,
];

bitflags! {
    /// F0/F1 FLASH_SR bits.
    struct Sr: u32 {
        const BSY = 1 << 0;
        const PGERR = 1 << 2;
        const WRPRTERR = 1 << 4;
        const EOP = 1 << 5;
    }
}

bitflags! {
    /// F0/F1 FLASH_CR bits.
    struct Cr: u32 {
        const PG = 1 << 0;
        const PER = 1 << 1;
        const MER = 1 << 2;
        const STRT = 1 << 6;
        const LOCK = 1 << 7;
    }
}

bitflags! {
    /// F4 FLASH_SR bits.
    struct Sr4: u32 {
        const EOP = 1 << 0;
        const WRPERR = 1 << 4;
        const PGAERR = 1 << 5;
        const PGPERR = 1 << 6;
        const PGSERR = 1 << 7;
        const BSY = 1 << 16;
    }
}

bitflags! {
    /// F4 FLASH_CR bits. SNB is a 4-bit sector-number field at [6:3];
    /// PSIZE a 2-bit field at [9:8].
    struct Cr4: u32 {
        const PG = 1 << 0;
        const SER = 1 << 1;
        const MER = 1 << 2;
        const STRT = 1 << 16;
        const LOCK = 1 << 31;
        const PSIZE_X32 = 0b10 << 8;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    Locked,
    Unlocked,
    Failed,
}

/// Driver for one family's flash controller.
///
/// Constructed per session after identification; borrows the probe
/// exclusively, so nothing else can clock the wire while flash
/// operations are in flight.
#[derive(Debug)]
pub struct Flash<'a, P: SwdPins> {
    swd: &'a mut Swd<P>,
    family: McuFamily,
    regs: &'static FlashRegs,
    state: State,
}

impl<'a, P: SwdPins> Flash<'a, P> {
    /// Creates a driver for `family`. The controller is assumed locked,
    /// its power-on state.
    pub fn new(swd: &'a mut Swd<P>, family: McuFamily) -> Self {
        Flash {
            swd,
            family,
            regs: family.regs(),
            state: State::Locked,
        }
    }

    fn lock_bit(&self) -> u32 {
        match self.family {
            McuFamily::CortexM0 | McuFamily::CortexM3 => Cr::LOCK.bits(),
            McuFamily::CortexM4 => Cr4::LOCK.bits(),
        }
    }

    fn ensure_unlocked(&self) -> Result<(), Error<P::Error>> {
        if self.state == State::Unlocked {
            Ok(())
        } else {
            Err(Error::BadState)
        }
    }

    fn fail_on_err<T>(&mut self, r: Result<T, Error<P::Error>>) -> Result<T, Error<P::Error>> {
        if r.is_err() {
            self.state = State::Failed;
        }
        r
    }

    /// Runs the key sequence and checks that the controller actually
    /// unlocked.
    pub fn unlock(&mut self) -> Result<(), Error<P::Error>> {
        match self.state {
            State::Unlocked => return Ok(()),
            State::Failed => return Err(Error::BadState),
            State::Locked => {}
        }
        self.swd.write_u32(self.regs.keyr, KEY1)?;
        self.swd.write_u32(self.regs.keyr, KEY2)?;
        let cr = self.swd.read_u32(self.regs.cr)?;
        if cr & self.lock_bit() != 0 {
            self.state = State::Failed;
            return Err(Error::UnlockFailed);
        }
        debug!("flash unlocked (CR = {:08x})", cr);
        self.state = State::Unlocked;
        Ok(())
    }

    /// Re-engages the lock. Permitted in any state; cleanup paths call
    /// this after failures.
    pub fn lock(&mut self) -> Result<(), Error<P::Error>> {
        let lock = self.lock_bit();
        self.swd.write_u32(self.regs.cr, lock)?;
        if self.state == State::Unlocked {
            self.state = State::Locked;
        }
        Ok(())
    }

    /// Erases the entire flash array.
    pub fn erase_all(&mut self) -> Result<(), Error<P::Error>> {
        self.ensure_unlocked()?;
        info!("mass erase");
        let (cr, strt) = match self.family {
            McuFamily::CortexM0 | McuFamily::CortexM3 => (Cr::MER.bits(), Cr::STRT.bits()),
            McuFamily::CortexM4 => ((Cr4::MER | Cr4::PSIZE_X32).bits(), Cr4::STRT.bits()),
        };
        let timeout = self.family.erase_timeout_ms();
        let r = self.trigger_and_wait(cr, strt, timeout);
        self.fail_on_err(r)
    }

    /// Erases every page (sector on F4) overlapping `[addr, addr + len)`.
    /// Provided as the finer-grained alternative to [`erase_all`].
    ///
    /// [`erase_all`]: Flash::erase_all
    pub fn erase_region(&mut self, addr: u32, len: u32) -> Result<(), Error<P::Error>> {
        self.ensure_unlocked()?;
        if len == 0 {
            return Ok(());
        }
        let end = addr + len;
        match self.family {
            McuFamily::CortexM0 | McuFamily::CortexM3 => {
                let mut page = addr & !(F1_PAGE_SIZE - 1);
                while page < end {
                    let r = self.erase_f1_page(page);
                    self.fail_on_err(r)?;
                    page += F1_PAGE_SIZE;
                }
            }
            McuFamily::CortexM4 => {
                let mut base = FLASH_BASE;
                for (number, &size) in F4_SECTOR_SIZES.iter().enumerate() {
                    if base < end && base + size > addr {
                        let r = self.erase_f4_sector(number as u32);
                        self.fail_on_err(r)?;
                    }
                    base += size;
                }
            }
        }
        Ok(())
    }

    fn erase_f1_page(&mut self, page: u32) -> Result<(), Error<P::Error>> {
        debug!("erase page {:08x}", page);
        let ar = match self.regs.ar {
            Some(ar) => ar,
            None => return Err(Error::BadState),
        };
        self.swd.write_u32(self.regs.cr, Cr::PER.bits())?;
        self.swd.write_u32(ar, page)?;
        self.swd
            .write_u32(self.regs.cr, (Cr::PER | Cr::STRT).bits())?;
        let res = self.busy_wait(self.family.erase_timeout_ms());
        self.swd.write_u32(self.regs.cr, 0)?;
        res
    }

    fn erase_f4_sector(&mut self, number: u32) -> Result<(), Error<P::Error>> {
        debug!("erase sector {}", number);
        let cr = (Cr4::SER | Cr4::PSIZE_X32).bits() | number << 3;
        self.trigger_and_wait(cr, Cr4::STRT.bits(), self.family.erase_timeout_ms())
    }

    fn trigger_and_wait(&mut self, cr: u32, strt: u32, timeout_ms: u32) -> Result<(), Error<P::Error>> {
        self.swd.write_u32(self.regs.cr, cr)?;
        self.swd.write_u32(self.regs.cr, cr | strt)?;
        let res = self.busy_wait(timeout_ms);
        // Drop the operation bits again even after an error.
        self.swd.write_u32(self.regs.cr, 0)?;
        res
    }

    /// Programs `data` at `addr`, which must already be erased. `addr`
    /// must be aligned to the family's program granularity; a trailing
    /// partial granule is padded with `0xFF`.
    pub fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), Error<P::Error>> {
        self.ensure_unlocked()?;
        if data.is_empty() {
            return Ok(());
        }
        debug!("program {} bytes at {:08x}", data.len(), addr);
        let r = self.program_granules(addr, data);
        let cleared = self.swd.write_u32(self.regs.cr, 0);
        self.fail_on_err(r)?;
        self.fail_on_err(cleared)
    }

    fn program_granules(&mut self, addr: u32, data: &[u8]) -> Result<(), Error<P::Error>> {
        let mut cur = addr;
        match self.family {
            McuFamily::CortexM0 | McuFamily::CortexM3 => {
                self.swd.write_u32(self.regs.cr, Cr::PG.bits())?;
                for chunk in data.chunks(2) {
                    let half = u16::from_le_bytes([chunk[0], *chunk.get(1).unwrap_or(&0xFF)]);
                    self.swd.write_u16(cur, half)?;
                    self.busy_wait(PROGRAM_TIMEOUT_MS)?;
                    cur += 2;
                }
            }
            McuFamily::CortexM4 => {
                self.swd
                    .write_u32(self.regs.cr, (Cr4::PG | Cr4::PSIZE_X32).bits())?;
                for chunk in data.chunks(4) {
                    let mut word = [0xFF; 4];
                    word[..chunk.len()].copy_from_slice(chunk);
                    self.swd.write_u32(cur, u32::from_le_bytes(word))?;
                    self.busy_wait(PROGRAM_TIMEOUT_MS)?;
                    cur += 4;
                }
            }
        }
        Ok(())
    }

    /// Reads back `[addr, addr + data.len())` and compares. A mismatch
    /// reports the first differing address; the target's contents are
    /// considered corrupt at that point.
    pub fn verify(&mut self, addr: u32, data: &[u8]) -> Result<(), Error<P::Error>> {
        let mut buf = [0u8; 64];
        let mut pos = 0;
        while pos < data.len() {
            let take = (data.len() - pos).min(buf.len());
            self.swd.read(addr + pos as u32, &mut buf[..take])?;
            for i in 0..take {
                if buf[i] != data[pos + i] {
                    return Err(Error::Mismatch {
                        addr: addr + (pos + i) as u32,
                    });
                }
            }
            pos += take;
        }
        Ok(())
    }

    /// Polls SR until BSY clears, with the platform millisecond delay
    /// between polls. Decodes the family's error bits once idle.
    fn busy_wait(&mut self, timeout_ms: u32) -> Result<(), Error<P::Error>> {
        let (bsy, errs) = match self.family {
            McuFamily::CortexM0 | McuFamily::CortexM3 => {
                (Sr::BSY.bits(), (Sr::PGERR | Sr::WRPRTERR).bits())
            }
            McuFamily::CortexM4 => (
                Sr4::BSY.bits(),
                (Sr4::WRPERR | Sr4::PGAERR | Sr4::PGPERR | Sr4::PGSERR).bits(),
            ),
        };
        let mut remaining = timeout_ms;
        loop {
            let sr = self.swd.read_u32(self.regs.sr)?;
            if sr & bsy == 0 {
                if sr & errs != 0 {
                    // Error flags are write-1-to-clear; reset them so a
                    // cleanup lock still goes through.
                    self.swd.write_u32(self.regs.sr, sr & errs)?;
                    return Err(Error::FlashStatus(sr));
                }
                return Ok(());
            }
            if remaining == 0 {
                return Err(Error::FlashTimeout);
            }
            remaining -= 1;
            self.swd.pins_mut().delay_ms(1);
        }
    }
}

/// [`WriteSink`] that programs each unit into flash.
#[derive(Debug)]
pub struct ProgramSink<'s, 'a, P: SwdPins>(pub &'s mut Flash<'a, P>);

impl<P: SwdPins> WriteSink for ProgramSink<'_, '_, P> {
    type Error = Error<P::Error>;

    fn emit(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error> {
        self.0.program(addr, data)
    }
}

/// [`WriteSink`] that compares each unit against flash.
#[derive(Debug)]
pub struct VerifySink<'s, 'a, P: SwdPins>(pub &'s mut Flash<'a, P>);

impl<P: SwdPins> WriteSink for VerifySink<'_, '_, P> {
    type Error = Error<P::Error>;

    fn emit(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error> {
        self.0.verify(addr, data)
    }
}
