//! End-to-end programming session orchestration.
//!
//! A session is strictly sequential: connect and identify, power up the
//! debug domain, halt the core, unlock and mass-erase, stream-program,
//! stream-verify, lock, reset. The first failing step aborts the rest,
//! but locking and resetting are still attempted so the target is not
//! left unlocked and halted.

use crate::dap::{ApReg, DpRead, DpWrite};
use crate::flash::{Flash, McuFamily, ProgramSink, VerifySink};
use crate::loader::{Loader, StreamError};
use crate::swd::Swd;
use crate::{Error, ErrorKind, ImageSource, SwdPins};

/// Debug Halting Control and Status Register.
const DHCSR: u32 = 0xE000_EDF0;
/// DBGKEY | C_HALT | C_DEBUGEN.
const DHCSR_HALT: u32 = 0xA05F_0003;

// DP.CTRL/STAT power-up request and acknowledge bits.
const CDBGPWRUPREQ: u32 = 1 << 28;
const CDBGPWRUPACK: u32 = 1 << 29;
const CSYSPWRUPREQ: u32 = 1 << 30;
const CSYSPWRUPACK: u32 = 1 << 31;

/// Power-up acknowledge polls, 1 ms apart.
const POWERUP_RETRIES: usize = 100;

/// Reset pulse width.
const RESET_PULSE_MS: u32 = 10;

/// Write-unit size for flash programming. Half an F0/F1 erase page, so a
/// unit never spans a page boundary on any supported family.
pub const UNIT_SIZE: usize = 512;

/// Identity of a connected target.
#[derive(Debug, Copy, Clone)]
pub struct TargetInfo {
    /// Raw DP IDCODE.
    pub idcode: u32,
    /// Family derived from it.
    pub family: McuFamily,
}

/// A session failure: the command-channel classification plus the
/// underlying cause.
#[derive(Debug)]
pub struct SessionError<E> {
    /// What the command channel reports.
    pub kind: ErrorKind,
    /// What actually went wrong.
    pub cause: Error<E>,
}

fn session_err<E>(kind: ErrorKind) -> impl FnOnce(Error<E>) -> SessionError<E> {
    move |cause| SessionError { kind, cause }
}

fn stream_err<E>(phase: ErrorKind) -> impl FnOnce(StreamError<Error<E>>) -> SessionError<E> {
    move |e| match e {
        StreamError::Hex(h) => SessionError {
            kind: ErrorKind::HexParse,
            cause: Error::Hex(h),
        },
        StreamError::Sink(cause) => SessionError { kind: phase, cause },
    }
}

/// Orchestrates complete connect–erase–program–verify–reset sessions
/// over one SWD probe.
#[derive(Debug)]
pub struct Programmer<P: SwdPins> {
    swd: Swd<P>,
}

impl<P: SwdPins> Programmer<P> {
    /// Creates a programmer owning `pins` for its lifetime.
    pub fn new(pins: P) -> Self {
        Programmer {
            swd: Swd::new(pins),
        }
    }

    /// Releases the pin driver.
    pub fn release(self) -> P {
        self.swd.release()
    }

    /// Resets the line and identifies the connected target.
    pub fn identify(&mut self) -> Result<TargetInfo, Error<P::Error>> {
        let idcode = self.swd.connect()?;
        let family = McuFamily::from_idcode(idcode).ok_or(Error::UnknownTarget(idcode))?;
        info!("target IDCODE {:08x}, {:?}", idcode, family);
        Ok(TargetInfo { idcode, family })
    }

    /// Programs `image` into target flash and verifies the result.
    ///
    /// The image is streamed twice (program, then verify after a
    /// rewind); the whole flash is mass-erased first. On success the
    /// target is locked and reset into the new firmware.
    pub fn program_image<S: ImageSource>(
        &mut self,
        image: &mut S,
    ) -> Result<(), SessionError<P::Error>> {
        let info = self.attach().map_err(session_err(ErrorKind::TargetConnect))?;
        let result = self.run_session(info.family, image);
        if result.is_err() {
            // Best-effort cleanup; the session error is what counts.
            let mut flash = Flash::new(&mut self.swd, info.family);
            let _ = flash.lock();
            let _ = self.reset_target();
        }
        result
    }

    /// Mass-erases the target without programming anything.
    pub fn erase(&mut self) -> Result<(), SessionError<P::Error>> {
        fn erase_locked<P: SwdPins>(flash: &mut Flash<'_, P>) -> Result<(), Error<P::Error>> {
            flash.unlock()?;
            flash.erase_all()?;
            flash.lock()
        }

        let info = self.attach().map_err(session_err(ErrorKind::TargetConnect))?;
        let mut flash = Flash::new(&mut self.swd, info.family);
        let result = erase_locked(&mut flash);
        if result.is_err() {
            let _ = flash.lock();
        }
        result.map_err(session_err(ErrorKind::ProgramFail))
    }

    /// Compares target flash against `image` without writing anything.
    pub fn verify_image<S: ImageSource>(
        &mut self,
        image: &mut S,
    ) -> Result<(), SessionError<P::Error>> {
        let info = self.attach().map_err(session_err(ErrorKind::TargetConnect))?;
        let mut flash = Flash::new(&mut self.swd, info.family);
        Loader::<UNIT_SIZE>::new()
            .run(image, &mut VerifySink(&mut flash))
            .map_err(stream_err(ErrorKind::VerifyFail))
    }

    /// Pulses the target's reset line.
    pub fn reset_target(&mut self) -> Result<(), Error<P::Error>> {
        let pins = self.swd.pins_mut();
        pins.set_rst(false).map_err(Error::Gpio)?;
        pins.delay_ms(RESET_PULSE_MS);
        pins.set_rst(true).map_err(Error::Gpio)
    }

    /// Identify, power up the debug domain and halt the core.
    fn attach(&mut self) -> Result<TargetInfo, Error<P::Error>> {
        let info = self.identify()?;
        self.power_up()?;
        let idr = self.swd.read_ap(ApReg::Idr as u8)?;
        debug!("MEM-AP IDR {:08x}", idr);
        // Erasing out from under a running core is asking for trouble;
        // halt it first.
        self.swd.write_u32(DHCSR, DHCSR_HALT)?;
        Ok(info)
    }

    fn power_up(&mut self) -> Result<(), Error<P::Error>> {
        self.swd
            .write_dp(DpWrite::CtrlStat as u8, CDBGPWRUPREQ | CSYSPWRUPREQ)?;
        let acks = CDBGPWRUPACK | CSYSPWRUPACK;
        for _ in 0..POWERUP_RETRIES {
            if self.swd.read_dp(DpRead::CtrlStat as u8)? & acks == acks {
                return Ok(());
            }
            self.swd.pins_mut().delay_ms(1);
        }
        Err(Error::PowerUpTimeout)
    }

    fn run_session<S: ImageSource>(
        &mut self,
        family: McuFamily,
        image: &mut S,
    ) -> Result<(), SessionError<P::Error>> {
        let mut flash = Flash::new(&mut self.swd, family);
        flash.unlock().map_err(session_err(ErrorKind::ProgramFail))?;
        flash
            .erase_all()
            .map_err(session_err(ErrorKind::ProgramFail))?;

        info!("programming");
        Loader::<UNIT_SIZE>::new()
            .run(image, &mut ProgramSink(&mut flash))
            .map_err(stream_err(ErrorKind::ProgramFail))?;

        info!("verifying");
        image.rewind();
        Loader::<UNIT_SIZE>::new()
            .run(image, &mut VerifySink(&mut flash))
            .map_err(stream_err(ErrorKind::VerifyFail))?;

        flash.lock().map_err(session_err(ErrorKind::ProgramFail))?;
        self.reset_target()
            .map_err(session_err(ErrorKind::ProgramFail))?;
        info!("session complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::SliceSource;
    use crate::sim::{Event, SimTarget, IDCODE_M0, IDCODE_M3, IDCODE_M4};

    // 8 bytes at 0x0800_0000 plus 2 bytes at 0x0800_0100.
    const IMAGE: &[u8] = b":020000040800F2\r\n\
                           :08000000112233445566778894\r\n\
                           :02010000AABB98\r\n\
                           :00000001FF\r\n";

    fn programmed(sim: &SimTarget) -> Vec<u32> {
        sim.events()
            .iter()
            .filter_map(|e| match e {
                Event::Programmed(a) => Some(*a),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn full_session_programs_and_verifies() {
        let mut prog = Programmer::new(SimTarget::new(IDCODE_M3));
        prog.program_image(&mut SliceSource::new(IMAGE)).unwrap();

        let sim = prog.release();
        assert_eq!(
            sim.flash_bytes(0x0800_0000, 8),
            &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]
        );
        assert_eq!(sim.flash_bytes(0x0800_0100, 2), &[0xAA, 0xBB]);
        // The gap stays erased.
        assert_eq!(sim.flash_bytes(0x0800_0008, 1), &[0xFF]);

        let events = sim.events();
        let pos = |e: &Event| events.iter().position(|x| x == e).unwrap();
        // Halt strictly before erase, erase before program, lock and
        // reset at the end.
        assert!(pos(&Event::Halted) < pos(&Event::MassErased));
        assert!(pos(&Event::MassErased) < pos(&Event::Programmed(0x0800_0000)));
        assert!(pos(&Event::Locked) > pos(&Event::Programmed(0x0800_0100)));
        assert_eq!(events.last(), Some(&Event::ResetPulsed));
    }

    #[test]
    fn works_on_all_families() {
        for idcode in [IDCODE_M0, IDCODE_M3, IDCODE_M4] {
            let mut prog = Programmer::new(SimTarget::new(idcode));
            prog.program_image(&mut SliceSource::new(IMAGE)).unwrap();
            let sim = prog.release();
            assert_eq!(sim.flash_bytes(0x0800_0100, 2), &[0xAA, 0xBB]);
        }
    }

    #[test]
    fn absent_target_fails_before_erase() {
        let mut prog = Programmer::new(SimTarget::absent());
        let err = prog
            .program_image(&mut SliceSource::new(IMAGE))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TargetConnect);
        assert!(prog.release().events().is_empty());
    }

    #[test]
    fn floating_idcode_is_target_connect() {
        let mut prog = Programmer::new(SimTarget::new(0xFFFF_FFFF));
        let err = prog
            .program_image(&mut SliceSource::new(IMAGE))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TargetConnect);
    }

    #[test]
    fn unknown_idcode_is_target_connect() {
        let mut prog = Programmer::new(SimTarget::new(0x2BA0_1477));
        let err = prog
            .program_image(&mut SliceSource::new(IMAGE))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TargetConnect);
        match err.cause {
            Error::UnknownTarget(0x2BA0_1477) => {}
            other => panic!("unexpected cause {:?}", other),
        }
    }

    #[test]
    fn stuck_power_up_is_target_connect() {
        let mut prog = Programmer::new(SimTarget::new(IDCODE_M3).with_stuck_power_up());
        let err = prog
            .program_image(&mut SliceSource::new(IMAGE))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TargetConnect);
        match err.cause {
            Error::PowerUpTimeout => {}
            other => panic!("unexpected cause {:?}", other),
        }
    }

    #[test]
    fn refused_unlock_is_program_fail() {
        let mut prog = Programmer::new(SimTarget::new(IDCODE_M3).with_refused_unlock());
        let err = prog
            .program_image(&mut SliceSource::new(IMAGE))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProgramFail);
        // Cleanup still pulsed reset.
        assert_eq!(prog.release().events().last(), Some(&Event::ResetPulsed));
    }

    #[test]
    fn hex_error_is_reported_as_parse_failure() {
        let mut prog = Programmer::new(SimTarget::new(IDCODE_M3));
        let bad = b":020000040800F2\r\n:04000000DEADBEEFC5\r\n:00000001FF\r\n";
        let err = prog
            .program_image(&mut SliceSource::new(bad))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::HexParse);
    }

    #[test]
    fn corrupted_write_is_verify_fail() {
        let mut prog = Programmer::new(SimTarget::new(IDCODE_M3).with_corrupt_write_at(0x0800_0004));
        let err = prog
            .program_image(&mut SliceSource::new(IMAGE))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::VerifyFail);
        match err.cause {
            Error::Mismatch { addr: 0x0800_0004 } => {}
            other => panic!("unexpected cause {:?}", other),
        }
        // Cleanup locked the controller again.
        let sim = prog.release();
        assert_eq!(sim.events().last(), Some(&Event::ResetPulsed));
        assert!(sim.events().contains(&Event::Locked));
    }

    #[test]
    fn erase_only_session() {
        let mut prog = Programmer::new(SimTarget::new(IDCODE_M3));
        prog.erase().unwrap();
        let sim = prog.release();
        assert!(sim.events().contains(&Event::MassErased));
        assert!(programmed(&sim).is_empty());
    }

    #[test]
    fn verify_only_session_matches_programmed_flash() {
        let mut prog = Programmer::new(SimTarget::new(IDCODE_M3));
        prog.program_image(&mut SliceSource::new(IMAGE)).unwrap();
        prog.verify_image(&mut SliceSource::new(IMAGE)).unwrap();
    }
}
