//! Word and bulk access to target memory through the MEM-AP.

use crate::dap::ApReg;
use crate::swd::Swd;
use crate::{Error, SwdPins};
use core::convert::TryInto;

// CSW fields.
const CSW_SIZE_HALFWORD: u32 = 0b001;
const CSW_SIZE_WORD: u32 = 0b010;
const CSW_ADDRINC_SINGLE: u32 = 0b01 << 4;
const CSW_HPROT1: u32 = 1 << 25;
const CSW_MASTER_DEBUG: u32 = 1 << 29;

const CSW_WORD: u32 = CSW_MASTER_DEBUG | CSW_HPROT1 | CSW_ADDRINC_SINGLE | CSW_SIZE_WORD;
const CSW_HALFWORD: u32 = CSW_MASTER_DEBUG | CSW_HPROT1 | CSW_ADDRINC_SINGLE | CSW_SIZE_HALFWORD;

/// TAR auto-increment is only guaranteed within a 1 KiB window; crossing
/// it requires rewriting TAR.
const TAR_WINDOW: u32 = 0x400;

impl<P: SwdPins> Swd<P> {
    fn set_csw(&mut self, csw: u32) -> Result<(), Error<P::Error>> {
        if self.csw != Some(csw) {
            self.write_ap(ApReg::Csw as u8, csw)?;
            self.csw = Some(csw);
        }
        Ok(())
    }

    /// Reads one aligned 32-bit word.
    pub fn read_u32(&mut self, addr: u32) -> Result<u32, Error<P::Error>> {
        self.set_csw(CSW_WORD)?;
        self.write_ap(ApReg::Tar as u8, addr)?;
        self.read_ap(ApReg::Drw as u8)
    }

    /// Writes one aligned 32-bit word.
    pub fn write_u32(&mut self, addr: u32, value: u32) -> Result<(), Error<P::Error>> {
        self.set_csw(CSW_WORD)?;
        self.write_ap(ApReg::Tar as u8, addr)?;
        self.write_ap(ApReg::Drw as u8, value)
    }

    /// Writes one aligned 16-bit half-word, positioned on the correct
    /// DRW byte lanes. The flash interfaces of the F0/F1 families only
    /// accept half-word program accesses.
    pub fn write_u16(&mut self, addr: u32, value: u16) -> Result<(), Error<P::Error>> {
        self.set_csw(CSW_HALFWORD)?;
        self.write_ap(ApReg::Tar as u8, addr)?;
        let lane = (addr & 0b10) * 8;
        self.write_ap(ApReg::Drw as u8, u32::from(value) << lane)
    }

    /// Reads `buf.len()` bytes starting at `addr`. Unaligned edges are
    /// handled by reading the containing word and copying the bytes the
    /// caller asked for.
    pub fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Error<P::Error>> {
        if buf.is_empty() {
            return Ok(());
        }
        let mut pos = 0;
        let lead = (addr % 4) as usize;
        if lead != 0 {
            let word = self.read_u32(addr - lead as u32)?.to_le_bytes();
            let take = (4 - lead).min(buf.len());
            buf[..take].copy_from_slice(&word[lead..lead + take]);
            pos = take;
        }
        let mut cur = addr + pos as u32;
        self.set_csw(CSW_WORD)?;
        let mut stream = false;
        while pos + 4 <= buf.len() {
            if !stream || cur % TAR_WINDOW == 0 {
                self.write_ap(ApReg::Tar as u8, cur)?;
                stream = true;
            }
            let word = self.read_ap(ApReg::Drw as u8)?;
            buf[pos..pos + 4].copy_from_slice(&word.to_le_bytes());
            pos += 4;
            cur += 4;
        }
        if pos < buf.len() {
            let word = self.read_u32(cur)?.to_le_bytes();
            let rest = buf.len() - pos;
            buf[pos..].copy_from_slice(&word[..rest]);
        }
        Ok(())
    }

    /// Writes `data` starting at `addr`. Unaligned edges are merged into
    /// the containing word by read-modify-write; flash programming always
    /// supplies aligned regions, so the RMW path only runs for plain
    /// memory.
    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), Error<P::Error>> {
        if data.is_empty() {
            return Ok(());
        }
        let mut pos = 0;
        let lead = (addr % 4) as usize;
        if lead != 0 {
            let base = addr - lead as u32;
            let mut word = self.read_u32(base)?.to_le_bytes();
            let take = (4 - lead).min(data.len());
            word[lead..lead + take].copy_from_slice(&data[..take]);
            self.write_u32(base, u32::from_le_bytes(word))?;
            pos = take;
        }
        let mut cur = addr + pos as u32;
        self.set_csw(CSW_WORD)?;
        let mut stream = false;
        while pos + 4 <= data.len() {
            if !stream || cur % TAR_WINDOW == 0 {
                self.write_ap(ApReg::Tar as u8, cur)?;
                stream = true;
            }
            let word = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
            self.write_ap(ApReg::Drw as u8, word)?;
            pos += 4;
            cur += 4;
        }
        if pos < data.len() {
            let mut word = self.read_u32(cur)?.to_le_bytes();
            word[..data.len() - pos].copy_from_slice(&data[pos..]);
            self.write_u32(cur, u32::from_le_bytes(word))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimTarget, IDCODE_M3};

    fn probe() -> Swd<SimTarget> {
        let mut swd = Swd::new(SimTarget::new(IDCODE_M3));
        swd.connect().unwrap();
        swd
    }

    #[test]
    fn word_roundtrip() {
        let mut swd = probe();
        swd.write_u32(0x2000_0000, 0xDEAD_BEEF).unwrap();
        assert_eq!(swd.read_u32(0x2000_0000).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn halfword_lanes() {
        let mut swd = probe();
        swd.write_u16(0x2000_0000, 0x2211).unwrap();
        swd.write_u16(0x2000_0002, 0x4433).unwrap();
        assert_eq!(swd.read_u32(0x2000_0000).unwrap(), 0x4433_2211);
    }

    #[test]
    fn bulk_crosses_autoincrement_window() {
        let mut swd = probe();
        // Spans the 1 KiB TAR window boundary at 0x2000_0400. The
        // simulator wraps the auto-increment inside the window, so a
        // missing TAR rewrite would scramble this.
        let data: Vec<u8> = (0..2048u32).map(|i| i as u8).collect();
        swd.write(0x2000_0000, &data).unwrap();
        let mut back = vec![0u8; data.len()];
        swd.read(0x2000_0000, &mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn unaligned_edges_are_merged() {
        let mut swd = probe();
        swd.write_u32(0x2000_0000, 0xAAAA_AAAA).unwrap();
        swd.write_u32(0x2000_0004, 0xBBBB_BBBB).unwrap();
        swd.write(0x2000_0001, &[0x11, 0x22, 0x33, 0x44, 0x55]).unwrap();
        assert_eq!(swd.read_u32(0x2000_0000).unwrap(), 0x3322_11AA);
        assert_eq!(swd.read_u32(0x2000_0004).unwrap(), 0xBBBB_5544);

        let mut back = [0u8; 5];
        swd.read(0x2000_0001, &mut back).unwrap();
        assert_eq!(back, [0x11, 0x22, 0x33, 0x44, 0x55]);
    }
}
