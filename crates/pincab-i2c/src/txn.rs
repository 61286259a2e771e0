//! Command words and the batched transaction builder.
//!
//! A transaction is an ordered list of write-then-optional-read segments
//! against one target address, flattened into a single stream of 16-bit
//! command words that the transfer engine pumps out over DMA. Each word
//! carries a data byte (or a read slot) plus START/STOP framing flags, so a
//! device can do "write register pointer, read N bytes, write another
//! register" as one atomic bus grant without yielding the bus in between.

use crate::error::TransferError;

/// Maximum number of segments in one batched transaction.
pub const MAX_SEGMENTS: usize = 4;

/// One 16-bit command word in the transmit stream.
///
/// Layout follows the bus controller's command register: data byte in bits
/// 0..=7, READ flag (bit 8) marks a slot that clocks a byte *in* instead of
/// out, STOP (bit 9) ends the transaction after this word, START (bit 10)
/// emits a start or repeated-start condition before this word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CmdWord(u16);

impl CmdWord {
    const READ: u16 = 1 << 8;
    const STOP: u16 = 1 << 9;
    const START: u16 = 1 << 10;

    /// A word that clocks `byte` out to the target.
    pub const fn write(byte: u8) -> Self {
        CmdWord(byte as u16)
    }

    /// A word that clocks one byte in from the target.
    pub const fn read() -> Self {
        CmdWord(Self::READ)
    }

    pub const fn with_start(self) -> Self {
        CmdWord(self.0 | Self::START)
    }

    pub const fn with_stop(self) -> Self {
        CmdWord(self.0 | Self::STOP)
    }

    pub const fn is_read(self) -> bool {
        self.0 & Self::READ != 0
    }

    pub const fn is_start(self) -> bool {
        self.0 & Self::START != 0
    }

    pub const fn is_stop(self) -> bool {
        self.0 & Self::STOP != 0
    }

    /// The data byte carried by a write word.
    pub const fn data(self) -> u8 {
        self.0 as u8
    }

    /// Raw register value for the hardware glue.
    pub const fn bits(self) -> u16 {
        self.0
    }
}

/// One write-then-optional-read unit within a batched transaction.
#[derive(Debug, Clone, Copy)]
struct Segment<'w> {
    write: &'w [u8],
    read_len: usize,
}

/// Caller-side builder assembling one or more operations into a single
/// batched command stream.
///
/// Segments borrow the caller's byte slices; nothing is copied until
/// [`encode_into`](Transaction::encode_into) flattens the transaction into
/// the bus transmit buffer at launch time.
#[derive(Debug, Default)]
pub struct Transaction<'w> {
    segs: heapless::Vec<Segment<'w>, MAX_SEGMENTS>,
}

impl<'w> Transaction<'w> {
    pub fn new() -> Self {
        Transaction { segs: heapless::Vec::new() }
    }

    /// Append a write-only segment.
    pub fn write(&mut self, bytes: &'w [u8]) -> Result<&mut Self, TransferError> {
        self.push(bytes, 0)
    }

    /// Append a read-only segment expecting `len` bytes.
    pub fn read(&mut self, len: usize) -> Result<&mut Self, TransferError> {
        self.push(&[], len)
    }

    /// Append one segment that writes `bytes`, then reads `len` bytes after
    /// a repeated start.
    pub fn write_read(
        &mut self,
        bytes: &'w [u8],
        len: usize,
    ) -> Result<&mut Self, TransferError> {
        self.push(bytes, len)
    }

    fn push(&mut self, write: &'w [u8], read_len: usize) -> Result<&mut Self, TransferError> {
        if write.is_empty() && read_len == 0 {
            return Err(TransferError::Empty);
        }
        self.segs
            .push(Segment { write, read_len })
            .map_err(|_| TransferError::TooManySegments)?;
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.segs.is_empty()
    }

    /// Total number of bytes the transaction expects to read back.
    pub fn read_total(&self) -> usize {
        self.segs.iter().map(|s| s.read_len).sum()
    }

    /// Flatten all segments into `out`: a START marker on the first word of
    /// every segment (and on the first read slot after a write, where the
    /// direction turnaround needs a repeated start), a STOP marker on the
    /// final word of the whole stream.
    ///
    /// Returns the total expected read length.
    pub fn encode_into<const N: usize>(
        &self,
        out: &mut heapless::Vec<CmdWord, N>,
    ) -> Result<usize, TransferError> {
        if self.segs.is_empty() {
            return Err(TransferError::Empty);
        }
        out.clear();

        for seg in &self.segs {
            let mut first = true;
            for &b in seg.write {
                let mut w = CmdWord::write(b);
                if first {
                    w = w.with_start();
                    first = false;
                }
                out.push(w).map_err(|_| TransferError::TooLong)?;
            }
            for i in 0..seg.read_len {
                let mut w = CmdWord::read();
                if first || (i == 0 && !seg.write.is_empty()) {
                    w = w.with_start();
                    first = false;
                }
                out.push(w).map_err(|_| TransferError::TooLong)?;
            }
        }

        // Stop marker on the final word of the stream.
        let last = out.len() - 1;
        out[last] = out[last].with_stop();

        Ok(self.read_total())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(txn: &Transaction) -> heapless::Vec<CmdWord, 64> {
        let mut out = heapless::Vec::new();
        txn.encode_into(&mut out).unwrap();
        out
    }

    #[test]
    fn framing_marks_segment_starts_and_final_stop() {
        let mut txn = Transaction::new();
        txn.write(&[0x20, 0x01]).unwrap().write_read(&[0x27], 1).unwrap();

        let words = encode(&txn);
        assert_eq!(words.len(), 4);

        assert!(words[0].is_start());
        assert!(!words[0].is_read());
        assert_eq!(words[0].data(), 0x20);

        assert!(!words[1].is_start());
        assert_eq!(words[1].data(), 0x01);

        // First byte of the second segment carries a repeated start.
        assert!(words[2].is_start());
        assert_eq!(words[2].data(), 0x27);

        // The read slot turns the bus around (repeated start) and ends the
        // stream; nothing before it may stop early.
        assert!(words[3].is_start());
        assert!(words[3].is_read());
        assert!(words[3].is_stop());
        assert!(!words[0].is_stop());
        assert!(!words[1].is_stop());
        assert!(!words[2].is_stop());
    }

    #[test]
    fn pure_read_segment_starts_on_first_slot() {
        let mut txn = Transaction::new();
        txn.read(2).unwrap();

        let words = encode(&txn);
        assert_eq!(words.len(), 2);
        assert!(words[0].is_start() && words[0].is_read());
        assert!(!words[1].is_start());
        assert!(words[1].is_stop());
    }

    #[test]
    fn read_total_sums_segments() {
        let mut txn = Transaction::new();
        txn.write_read(&[0x00], 7).unwrap().read(2).unwrap();
        assert_eq!(txn.read_total(), 9);
        assert_eq!(encode(&txn).len(), 10);
    }

    #[test]
    fn empty_segments_are_rejected() {
        let mut txn = Transaction::new();
        assert_eq!(txn.write(&[]).unwrap_err(), TransferError::Empty);
        assert!(txn.is_empty());

        let txn = Transaction::new();
        let mut out = heapless::Vec::<CmdWord, 8>::new();
        assert_eq!(txn.encode_into(&mut out).unwrap_err(), TransferError::Empty);
    }

    #[test]
    fn segment_capacity_is_bounded() {
        let mut txn = Transaction::new();
        for _ in 0..MAX_SEGMENTS {
            txn.read(1).unwrap();
        }
        assert_eq!(txn.read(1).unwrap_err(), TransferError::TooManySegments);
    }
}
