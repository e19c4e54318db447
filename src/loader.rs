//! Streaming assembly of HEX records into aligned write units.
//!
//! Flash programming is irreversible and slow, so scattered data records
//! are coalesced into fixed-size, unit-aligned blocks before they reach
//! the flash driver: one erase page sees at most one program pass, and
//! gaps keep the erased value `0xFF`. Memory use is bounded by the unit
//! size no matter how large the image is.

use crate::ihex::{self, HexError, RecordKind};
use crate::{ImageSource, WriteSink};

/// Longest accepted line, terminator excluded.
const LINE_MAX: usize = 256;

/// Errors surfaced while streaming an image.
#[derive(Debug)]
pub enum StreamError<E> {
    /// The HEX text was rejected.
    Hex(HexError),
    /// The sink refused a unit.
    Sink(E),
}

impl<E> From<HexError> for StreamError<E> {
    fn from(e: HexError) -> Self {
        StreamError::Hex(e)
    }
}

/// Streaming assembler turning HEX text into write units of `N` bytes.
///
/// `N` must be a power of two no larger than 32 KiB. Feed bytes in any
/// chunking; units are emitted to the sink as soon as they complete, and
/// the end-of-file record flushes the remainder.
#[derive(Debug)]
pub struct Loader<const N: usize> {
    /// Upper 16 address bits from the last type-04 record.
    upper: u32,
    base: u32,
    unit: [u8; N],
    /// Extent of the unit covered by records so far; 0 means empty.
    len: u16,
    line: [u8; LINE_MAX],
    line_len: usize,
    done: bool,
}

impl<const N: usize> Loader<N> {
    /// Creates an empty assembler.
    pub fn new() -> Self {
        assert!(N.is_power_of_two() && N <= 0x8000);
        Loader {
            upper: 0,
            base: 0,
            unit: [0xFF; N],
            len: 0,
            line: [0; LINE_MAX],
            line_len: 0,
            done: false,
        }
    }

    /// True once the end-of-file record has been processed.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feeds a chunk of the byte stream, emitting completed units to
    /// `sink`. Returns `true` once the end-of-file record was seen;
    /// bytes after it are not consumed.
    pub fn feed<S: WriteSink>(
        &mut self,
        bytes: &[u8],
        sink: &mut S,
    ) -> Result<bool, StreamError<S::Error>> {
        for &b in bytes {
            if self.done {
                break;
            }
            match b {
                b'\r' | b'\n' => self.end_line(sink)?,
                _ => {
                    if self.line_len == LINE_MAX {
                        return Err(StreamError::Hex(HexError::LineTooLong));
                    }
                    self.line[self.line_len] = b;
                    self.line_len += 1;
                }
            }
        }
        Ok(self.done)
    }

    /// Ends the stream. A final line without terminator is still
    /// processed; a stream that never produced the end-of-file record is
    /// a truncated image, and its pending unit is *not* flushed.
    pub fn finish<S: WriteSink>(&mut self, sink: &mut S) -> Result<(), StreamError<S::Error>> {
        if !self.done {
            self.end_line(sink)?;
        }
        if self.done {
            Ok(())
        } else {
            Err(StreamError::Hex(HexError::MissingEof))
        }
    }

    /// Streams all of `source` through the assembler. Reads in
    /// sector-sized chunks, matching the storage collaborator.
    pub fn run<R: ImageSource, S: WriteSink>(
        &mut self,
        source: &mut R,
        sink: &mut S,
    ) -> Result<(), StreamError<S::Error>> {
        let mut sector = [0u8; 512];
        loop {
            let n = source.read(&mut sector);
            if n == 0 {
                return self.finish(sink);
            }
            if self.feed(&sector[..n], sink)? {
                return Ok(());
            }
        }
    }

    fn end_line<S: WriteSink>(&mut self, sink: &mut S) -> Result<(), StreamError<S::Error>> {
        if self.line_len == 0 {
            // Empty line, or the LF half of a CRLF.
            return Ok(());
        }
        let record = ihex::parse_record(&self.line[..self.line_len])?;
        self.line_len = 0;
        match record.kind {
            RecordKind::Data => {
                let abs = self.upper | u32::from(record.address);
                self.absorb(abs, record.data(), sink)?;
            }
            RecordKind::Eof => {
                self.flush(sink)?;
                self.done = true;
            }
            RecordKind::ExtLinearAddr => {
                let d = record.data();
                self.upper = u32::from(d[0]) << 24 | u32::from(d[1]) << 16;
            }
            RecordKind::StartLinearAddr => {}
        }
        Ok(())
    }

    fn absorb<S: WriteSink>(
        &mut self,
        addr: u32,
        data: &[u8],
        sink: &mut S,
    ) -> Result<(), StreamError<S::Error>> {
        let mut addr = addr;
        let mut data = data;
        while !data.is_empty() {
            if self.len == 0 {
                self.base = addr & !(N as u32 - 1);
                for b in self.unit.iter_mut() {
                    *b = 0xFF;
                }
            }
            if addr < self.base || addr - self.base >= N as u32 {
                self.flush(sink)?;
                continue;
            }
            let offset = (addr - self.base) as usize;
            let take = data.len().min(N - offset);
            self.unit[offset..offset + take].copy_from_slice(&data[..take]);
            self.len = self.len.max((offset + take) as u16);
            addr += take as u32;
            data = &data[take..];
            if !data.is_empty() {
                // The record continues past the unit boundary; flush and
                // let the next lap adopt the new base.
                self.flush(sink)?;
            }
        }
        Ok(())
    }

    fn flush<S: WriteSink>(&mut self, sink: &mut S) -> Result<(), StreamError<S::Error>> {
        if self.len > 0 {
            sink.emit(self.base, &self.unit[..usize::from(self.len)])
                .map_err(StreamError::Sink)?;
            self.len = 0;
        }
        Ok(())
    }
}

/// [`ImageSource`] over an in-memory image.
#[derive(Debug)]
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    /// Wraps `data` as a rewindable stream.
    pub fn new(data: &'a [u8]) -> Self {
        SliceSource { data, pos: 0 }
    }
}

impl ImageSource for SliceSource<'_> {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let take = buf.len().min(self.data.len() - self.pos);
        buf[..take].copy_from_slice(&self.data[self.pos..self.pos + take]);
        self.pos += take;
        take
    }

    fn rewind(&mut self) {
        self.pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct VecSink {
        calls: Vec<(u32, Vec<u8>)>,
    }

    impl WriteSink for VecSink {
        type Error = ();

        fn emit(&mut self, addr: u32, data: &[u8]) -> Result<(), ()> {
            self.calls.push((addr, data.to_vec()));
            Ok(())
        }
    }

    fn load<const N: usize>(stream: &[u8]) -> Result<VecSink, StreamError<()>> {
        let mut sink = VecSink::default();
        let mut loader = Loader::<N>::new();
        loader.run(&mut SliceSource::new(stream), &mut sink)?;
        Ok(sink)
    }

    #[test]
    fn minimal_image_single_unit() {
        let sink = load::<512>(
            b":020000040800F2\r\n:04000000DEADBEEFC4\r\n:00000001FF\r\n",
        )
        .unwrap();
        assert_eq!(sink.calls.len(), 1);
        let (base, data) = &sink.calls[0];
        assert_eq!(*base, 0x0800_0000);
        assert_eq!(data, &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn adjacent_records_merge_into_one_unit() {
        let sink = load::<16>(
            b":020000040800F2\r\n:02001000AABB89\r\n:02001200CCDD43\r\n:00000001FF\r\n",
        )
        .unwrap();
        assert_eq!(sink.calls.len(), 1);
        let (base, data) = &sink.calls[0];
        assert_eq!(*base, 0x0800_0010);
        assert_eq!(data, &[0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn record_straddling_units_is_split() {
        let sink = load::<16>(
            b":020000040800F2\r\n:04000E00D0D1D2D3A8\r\n:00000001FF\r\n",
        )
        .unwrap();
        assert_eq!(sink.calls.len(), 2);

        let (base, data) = &sink.calls[0];
        assert_eq!(*base, 0x0800_0000);
        assert_eq!(data.len(), 16);
        assert!(data[..14].iter().all(|&b| b == 0xFF));
        assert_eq!(&data[14..], &[0xD0, 0xD1]);

        let (base, data) = &sink.calls[1];
        assert_eq!(*base, 0x0800_0010);
        assert_eq!(data, &[0xD2, 0xD3]);
    }

    #[test]
    fn bad_checksum_emits_nothing() {
        let r = load::<512>(b":020000040800F2\r\n:04000000DEADBEEFC5\r\n:00000001FF\r\n");
        match r {
            Err(StreamError::Hex(HexError::Checksum)) => {}
            other => panic!("expected checksum error, got {:?}", other.map(|s| s.calls)),
        }
    }

    #[test]
    fn missing_eof_is_truncation() {
        let mut sink = VecSink::default();
        let mut loader = Loader::<512>::new();
        loader
            .feed(b":04000000DEADBEEFC4\r\n", &mut sink)
            .unwrap();
        match loader.finish(&mut sink) {
            Err(StreamError::Hex(HexError::MissingEof)) => {}
            other => panic!("expected MissingEof, got {:?}", other),
        }
        // The pending unit must not leak out of a truncated image.
        assert!(sink.calls.is_empty());
    }

    #[test]
    fn eof_without_terminator_is_accepted() {
        let sink = load::<512>(b":04000000DEADBEEFC4\n:00000001FF").unwrap();
        assert_eq!(sink.calls.len(), 1);
    }

    #[test]
    fn all_line_endings_and_blank_lines() {
        let sink = load::<512>(
            b"\r\n:020000040800F2\r:04000000DEADBEEFC4\n\n:00000001FF\r\n",
        )
        .unwrap();
        assert_eq!(sink.calls.len(), 1);
        assert_eq!(sink.calls[0].0, 0x0800_0000);
    }

    #[test]
    fn start_linear_address_is_ignored() {
        let sink = load::<512>(
            b":0400000508000000EF\r\n:04000000DEADBEEFC4\r\n:00000001FF\r\n",
        )
        .unwrap();
        assert_eq!(sink.calls.len(), 1);
    }

    #[test]
    fn upper_address_applies_to_following_data() {
        let sink = load::<512>(
            b":04000000DEADBEEFC4\r\n:020000040800F2\r\n:040000001122334452\r\n:00000001FF\r\n",
        )
        .unwrap();
        // Same 16-bit address, different upper halves: two units.
        assert_eq!(sink.calls.len(), 2);
        assert_eq!(sink.calls[0].0, 0x0000_0000);
        assert_eq!(sink.calls[1].0, 0x0800_0000);
    }

    #[test]
    fn backwards_address_flushes() {
        let sink = load::<16>(
            b":02001000AABB89\r\n:02000000CCDD55\r\n:00000001FF\r\n",
        )
        .unwrap();
        assert_eq!(sink.calls.len(), 2);
        assert_eq!(sink.calls[0].0, 0x0000_0010);
        assert_eq!(sink.calls[1].0, 0x0000_0000);
    }

    #[test]
    fn overlong_line_is_rejected() {
        let mut stream = vec![b':'];
        stream.extend(std::iter::repeat(b'0').take(400));
        let r = load::<512>(&stream);
        match r {
            Err(StreamError::Hex(HexError::LineTooLong)) => {}
            other => panic!("expected LineTooLong, got {:?}", other.map(|s| s.calls)),
        }
    }

    #[test]
    fn sink_errors_propagate() {
        struct FailSink;
        impl WriteSink for FailSink {
            type Error = &'static str;
            fn emit(&mut self, _: u32, _: &[u8]) -> Result<(), &'static str> {
                Err("nope")
            }
        }
        let mut loader = Loader::<512>::new();
        let r = loader.run(
            &mut SliceSource::new(b":04000000DEADBEEFC4\r\n:00000001FF\r\n"),
            &mut FailSink,
        );
        match r {
            Err(StreamError::Sink("nope")) => {}
            other => panic!("expected sink error, got {:?}", other),
        }
    }

    #[test]
    fn slice_source_rewinds() {
        let mut src = SliceSource::new(b"abcdef");
        let mut buf = [0u8; 4];
        assert_eq!(src.read(&mut buf), 4);
        assert_eq!(src.read(&mut buf), 2);
        assert_eq!(src.read(&mut buf), 0);
        src.rewind();
        assert_eq!(src.read(&mut buf), 4);
        assert_eq!(&buf, b"abcd");
    }
}
