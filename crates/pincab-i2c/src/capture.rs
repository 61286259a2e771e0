//! Postmortem capture of recent bus transactions.
//!
//! A fixed-capacity ring the scheduler writes at each transaction's
//! terminal event; oldest entries are silently overwritten. Purely an
//! observability aid for field diagnosis of bus faults. The diagnostic
//! console dumps it, optionally filtered by an address allow-list.

#[cfg(feature = "capture")]
use embassy_time::Instant;
#[cfg(feature = "capture")]
use heapless::Vec;

#[cfg(feature = "capture")]
use crate::txn::CmdWord;

/// Entries retained per bus.
#[cfg(feature = "capture")]
pub const CAPTURE_ENTRIES: usize = 16;
/// Payload bytes copied per direction; longer transfers are truncated.
#[cfg(feature = "capture")]
pub const CAPTURE_BYTES: usize = 16;
/// Address allow-list capacity.
#[cfg(feature = "capture")]
pub const CAPTURE_FILTER_ADDRS: usize = 8;

/// How the captured transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CaptureStatus {
    Ok,
    Abort,
    Timeout,
}

/// One recorded transaction.
#[cfg(feature = "capture")]
#[derive(Debug, Clone)]
pub struct CaptureEntry {
    pub at: Instant,
    pub addr: u8,
    /// Transmitted data bytes (read slots excluded), truncated.
    pub tx: Vec<u8, CAPTURE_BYTES>,
    /// Received bytes, truncated.
    pub rx: Vec<u8, CAPTURE_BYTES>,
    pub status: CaptureStatus,
}

/// Fixed-capacity transaction recorder with a wrapping write index.
#[cfg(feature = "capture")]
pub struct CaptureRing {
    buf: Vec<CaptureEntry, CAPTURE_ENTRIES>,
    /// Overwrite position once the buffer is full; the oldest entry.
    next: usize,
    enabled: bool,
    filter: Vec<u8, CAPTURE_FILTER_ADDRS>,
}

#[cfg(feature = "capture")]
impl CaptureRing {
    pub const fn new() -> Self {
        CaptureRing {
            buf: Vec::new(),
            next: 0,
            enabled: true,
            filter: Vec::new(),
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Restrict capture to the given addresses. An empty slice captures
    /// everything. Addresses beyond the allow-list capacity are dropped.
    pub fn set_filter(&mut self, addrs: &[u8]) {
        self.filter.clear();
        for &a in addrs.iter().take(CAPTURE_FILTER_ADDRS) {
            let _ = self.filter.push(a);
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.next = 0;
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Record a transaction's terminal event.
    pub fn record(
        &mut self,
        at: Instant,
        addr: u8,
        words: &[CmdWord],
        rx: &[u8],
        status: CaptureStatus,
    ) {
        if !self.enabled {
            return;
        }
        if !self.filter.is_empty() && !self.filter.contains(&addr) {
            return;
        }

        let mut entry = CaptureEntry {
            at,
            addr,
            tx: Vec::new(),
            rx: Vec::new(),
            status,
        };
        for w in words.iter().filter(|w| !w.is_read()).take(CAPTURE_BYTES) {
            let _ = entry.tx.push(w.data());
        }
        for &b in rx.iter().take(CAPTURE_BYTES) {
            let _ = entry.rx.push(b);
        }

        if self.buf.is_full() {
            self.buf[self.next] = entry;
            self.next = (self.next + 1) % CAPTURE_ENTRIES;
        } else {
            let _ = self.buf.push(entry);
        }
    }

    /// Iterate entries oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &CaptureEntry> + '_ {
        let split = if self.buf.is_full() { self.next } else { 0 };
        self.buf[split..].iter().chain(self.buf[..split].iter())
    }
}

#[cfg(feature = "capture")]
impl Default for CaptureRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "capture"))]
mod tests {
    use super::*;

    fn record_n(ring: &mut CaptureRing, n: usize) {
        for i in 0..n {
            let words = [CmdWord::write(i as u8).with_start().with_stop()];
            ring.record(
                Instant::from_micros(i as u64),
                0x40,
                &words,
                &[],
                CaptureStatus::Ok,
            );
        }
    }

    #[test]
    fn wraps_overwriting_oldest_first() {
        let mut ring = CaptureRing::new();
        record_n(&mut ring, CAPTURE_ENTRIES + 3);

        assert_eq!(ring.len(), CAPTURE_ENTRIES);
        let first = ring.iter().next().unwrap();
        // Entries 0..=2 were overwritten; entry 3 is now the oldest.
        assert_eq!(first.tx[0], 3);
        let last = ring.iter().last().unwrap();
        assert_eq!(last.tx[0], (CAPTURE_ENTRIES + 2) as u8);
        assert_eq!(ring.iter().count(), CAPTURE_ENTRIES);
    }

    #[test]
    fn filter_drops_other_addresses() {
        let mut ring = CaptureRing::new();
        ring.set_filter(&[0x68]);
        let words = [CmdWord::write(0).with_start().with_stop()];
        ring.record(Instant::from_micros(0), 0x40, &words, &[], CaptureStatus::Ok);
        ring.record(Instant::from_micros(1), 0x68, &words, &[], CaptureStatus::Abort);

        assert_eq!(ring.len(), 1);
        let entry = ring.iter().next().unwrap();
        assert_eq!(entry.addr, 0x68);
        assert_eq!(entry.status, CaptureStatus::Abort);

        // Clearing the filter captures everything again.
        ring.set_filter(&[]);
        ring.record(Instant::from_micros(2), 0x40, &words, &[], CaptureStatus::Ok);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn disabled_ring_records_nothing() {
        let mut ring = CaptureRing::new();
        ring.set_enabled(false);
        record_n(&mut ring, 4);
        assert!(ring.is_empty());
    }

    #[test]
    fn payloads_are_truncated_and_read_slots_excluded() {
        let mut ring = CaptureRing::new();
        let mut words: Vec<CmdWord, 40> = Vec::new();
        for i in 0..32 {
            words.push(CmdWord::write(i)).unwrap();
        }
        words.push(CmdWord::read()).unwrap();
        let rx = [0xAA; 24];
        ring.record(Instant::from_micros(0), 0x20, &words, &rx, CaptureStatus::Ok);

        let entry = ring.iter().next().unwrap();
        assert_eq!(entry.tx.len(), CAPTURE_BYTES);
        assert_eq!(entry.rx.len(), CAPTURE_BYTES);
        assert!(entry.tx.iter().all(|&b| b < 32));
    }
}
