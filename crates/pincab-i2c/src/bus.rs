//! The per-bus transaction scheduler.
//!
//! One [`I2cBus`] owns one physical controller: its device list, transmit
//! and receive buffers, transfer engine slot and capture ring. The main
//! loop calls [`tick`](I2cBus::tick) periodically; the tick never blocks.
//! When the bus is idle it offers the turn to registered devices in
//! round-robin order; when a transfer is in flight it watches for the stop
//! or abort condition, or the deadline.
//!
//! Interrupt-context completion (the fast path that lets a device chain a
//! follow-up transaction with minimum bus dead time) enters through
//! [`service_irq`](I2cBus::service_irq). Tick context and interrupt context
//! share state, so the bus is meant to live inside a [`BusCell`]: the
//! critical-section lock is the scoped interrupt mask both sides take
//! before touching it.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Instant};
use heapless::Vec;

#[cfg(feature = "capture")]
use crate::capture::CaptureRing;
use crate::capture::CaptureStatus;
use crate::config::{BusConfig, EnableMode, PinOwner, PinRole};
use crate::device::{DeviceStats, I2cDevice};
use crate::diag::{AdHocResult, AdHocStatus, ADHOC_BYTES};
use crate::engine::{EngineFactory, EngineSlot, EngineStatus, TransferEngine};
use crate::error::{ConfigError, TransferError};
use crate::txn::{CmdWord, Transaction};

/// Devices per bus.
pub const MAX_DEVICES: usize = 16;
/// Command words per transaction.
pub const TX_BUF_WORDS: usize = 64;
/// Receive bytes per transaction.
pub const RX_BUF_BYTES: usize = 64;

/// Hard deadline for one transaction. Generous: the longest legal
/// transaction at 100 kHz still fits.
pub const TRANSACTION_TIMEOUT: Duration = Duration::from_micros(2500);
/// Consecutive timeouts beyond this count mean the bus is probably wedged.
pub const WEDGE_THRESHOLD: u16 = 20;
/// Minimum spacing between automatic recovery attempts, so an
/// unrecoverable fault doesn't burn cycles in a retry storm.
pub const RECOVERY_COOLDOWN: Duration = Duration::from_secs(10);

/// Scheduling state of one bus. Exactly one holds at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusState {
    /// No transaction in flight; the next tick offers the bus around.
    Ready,
    /// A write-only transaction is in flight.
    Writing,
    /// A read-containing transaction is in flight.
    Reading,
}

/// Who holds the current bus turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Idle,
    /// Index into the device list.
    Device(usize),
    /// A diagnostic one-shot operation.
    AdHoc,
}

/// Single-slot diagnostic operation, serviced when the bus is Ready.
enum AdHocSlot {
    Empty,
    Pending {
        addr: u8,
        write: Vec<u8, ADHOC_BYTES>,
        read_len: usize,
    },
    InFlight,
    Done(AdHocResult),
}

/// A device's one-tick window onto the bus.
///
/// Handles only exist inside device callbacks, which is what enforces the
/// access contract: there is no way to launch a transfer outside your own
/// turn. At most one launch per callback; a second attempt is rejected
/// with [`TransferError::AlreadyLaunched`].
pub struct TransferHandle<'a> {
    sink: &'a mut dyn LaunchSink,
    addr: u8,
    now: Instant,
    launched: bool,
}

impl TransferHandle<'_> {
    pub(crate) fn new<'a>(
        sink: &'a mut dyn LaunchSink,
        addr: u8,
        now: Instant,
    ) -> TransferHandle<'a> {
        TransferHandle { sink, addr, now, launched: false }
    }

    /// The address transactions launched through this handle will target.
    pub fn address(&self) -> u8 {
        self.addr
    }

    /// Launch a batched transaction. The bus leaves `Ready` the instant
    /// this returns `Ok`; completion arrives later through the owning
    /// device's callbacks.
    pub fn launch(&mut self, txn: &Transaction<'_>) -> Result<(), TransferError> {
        if self.launched {
            return Err(TransferError::AlreadyLaunched);
        }
        self.sink.launch(self.addr, txn, self.now)?;
        self.launched = true;
        Ok(())
    }

    /// Whether a transaction was launched through this handle.
    pub fn launched(&self) -> bool {
        self.launched
    }
}

/// Type-erased launch entry so [`TransferHandle`] stays non-generic over
/// the engine factory.
pub(crate) trait LaunchSink {
    fn launch(
        &mut self,
        addr: u8,
        txn: &Transaction<'_>,
        now: Instant,
    ) -> Result<(), TransferError>;
}

/// Everything a launch touches, split out of [`I2cBus`] so a
/// [`TransferHandle`] can borrow it while the device entry itself stays
/// mutably borrowed by the callback dispatch.
struct Inner<F: EngineFactory> {
    cfg: BusConfig,
    engine: EngineSlot<F>,
    /// Whether hardware bring-up is wanted yet (enable-mode dependent).
    engine_wanted: bool,
    engine_retry_logged: bool,
    state: BusState,
    turn: Turn,
    tx: Vec<CmdWord, TX_BUF_WORDS>,
    /// Expected read length of the in-flight transaction.
    pending_read: usize,
    /// Target address of the in-flight transaction.
    cur_addr: u8,
    deadline: Instant,
    /// A completion was handled in interrupt context without chaining; the
    /// thread-context callback still has to run on the next tick.
    pending_thread_cb: bool,
    last_rx_len: usize,
    last_was_read: bool,
    timeout_streak: u16,
    last_auto_clear: Option<Instant>,
    clear_requested: bool,
    recoveries: u32,
    /// Transactions launched on this bus, ad hoc operations included.
    transactions: u32,
    adhoc: AdHocSlot,
    #[cfg(feature = "capture")]
    capture: CaptureRing,
}

impl<F: EngineFactory> LaunchSink for Inner<F> {
    fn launch(
        &mut self,
        addr: u8,
        txn: &Transaction<'_>,
        now: Instant,
    ) -> Result<(), TransferError> {
        if self.state != BusState::Ready {
            return Err(TransferError::Busy);
        }
        let read_len = txn.encode_into(&mut self.tx)?;
        if read_len > RX_BUF_BYTES {
            return Err(TransferError::TooLong);
        }
        let engine = self.engine.engine().ok_or(TransferError::Inert)?;
        engine.start(addr, &self.tx, read_len).map_err(TransferError::Engine)?;

        self.pending_read = read_len;
        self.cur_addr = addr;
        self.deadline = now + TRANSACTION_TIMEOUT;
        self.transactions = self.transactions.wrapping_add(1);
        self.state = if read_len > 0 { BusState::Reading } else { BusState::Writing };
        Ok(())
    }
}

impl<F: EngineFactory> Inner<F> {
    #[cfg(feature = "capture")]
    fn record(&mut self, at: Instant, rx: &[u8], status: CaptureStatus) {
        self.capture.record(at, self.cur_addr, &self.tx, rx, status);
    }

    #[cfg(not(feature = "capture"))]
    fn record(&mut self, _at: Instant, _rx: &[u8], _status: CaptureStatus) {}
}

struct DeviceEntry<'d> {
    dev: &'d mut dyn I2cDevice,
    stats: DeviceStats,
}

/// One physical bus controller and its registered devices.
pub struct I2cBus<'d, F: EngineFactory> {
    inner: Inner<F>,
    rx_buf: Vec<u8, RX_BUF_BYTES>,
    devices: Vec<DeviceEntry<'d>, MAX_DEVICES>,
    /// Round-robin position: the device holding (or next offered) the turn.
    cur: usize,
}

/// The shared home of a bus: tick context and the engine's interrupt
/// trampoline both enter through this critical-section cell, which is the
/// scoped interrupt mask guarding the state they share.
pub type BusCell<'d, F> = Mutex<CriticalSectionRawMutex, RefCell<I2cBus<'d, F>>>;

impl<'d, F: EngineFactory> I2cBus<'d, F> {
    /// Validate the configuration, claim the bus pins through the external
    /// allocator, and park the engine resources. No hardware is touched
    /// until the enable mode asks for bring-up and a tick runs.
    pub fn new(
        cfg: BusConfig,
        resources: F::Resources,
        pins: &mut dyn PinOwner,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        pins.claim(cfg.sda, PinRole::Sda)?;
        pins.claim(cfg.scl, PinRole::Scl)?;

        Ok(I2cBus {
            inner: Inner {
                engine_wanted: cfg.mode == EnableMode::Always,
                engine_retry_logged: false,
                cfg,
                engine: EngineSlot::Vacant(resources),
                state: BusState::Ready,
                turn: Turn::Idle,
                tx: Vec::new(),
                pending_read: 0,
                cur_addr: 0,
                deadline: Instant::from_ticks(0),
                pending_thread_cb: false,
                last_rx_len: 0,
                last_was_read: false,
                timeout_streak: 0,
                last_auto_clear: None,
                clear_requested: false,
                recoveries: 0,
                transactions: 0,
                adhoc: AdHocSlot::Empty,
                #[cfg(feature = "capture")]
                capture: CaptureRing::new(),
            },
            rx_buf: Vec::new(),
            devices: Vec::new(),
            cur: 0,
        })
    }

    /// Register a device. Registration order is round-robin order; devices
    /// are never removed. On an on-demand bus the first registration
    /// requests hardware bring-up.
    pub fn add_device(&mut self, dev: &'d mut dyn I2cDevice) -> Result<(), ConfigError> {
        self.devices
            .push(DeviceEntry { dev, stats: DeviceStats::default() })
            .map_err(|_| ConfigError::TooManyDevices)?;
        if self.inner.cfg.mode == EnableMode::OnDemand {
            self.inner.engine_wanted = true;
        }
        Ok(())
    }

    /// The non-blocking per-bus poll. Drives engine bring-up, recovery,
    /// the ready-offer rotation and completion/timeout detection.
    pub fn tick(&mut self, now: Instant) {
        if !self.inner.engine.is_active() {
            self.try_bring_up();
            return;
        }

        if self.inner.pending_thread_cb {
            self.run_thread_completion(now);
            return;
        }

        match self.inner.state {
            BusState::Ready => self.tick_ready(now),
            BusState::Writing | BusState::Reading => self.tick_active(now),
        }
    }

    /// Interrupt-context entry, called by the engine's completion ISR
    /// through the [`BusCell`] lock. Latches the completion and gives the
    /// owning device its chance to chain a follow-up transaction
    /// immediately; the thread-context callback (if still due) runs on the
    /// next tick.
    pub fn service_irq(&mut self, now: Instant) {
        if !matches!(self.inner.state, BusState::Writing | BusState::Reading) {
            return;
        }
        let status = match self.inner.engine.engine() {
            Some(e) => e.poll(),
            None => return,
        };
        if status == EngineStatus::Stop {
            self.finish_success(now, true);
        }
        // An abort needs no fast path; the next tick picks it up.
    }

    /// Arm a forced bus-clear, serviced on the next Ready tick. This is
    /// the diagnostic console's bus-clear trigger.
    pub fn request_recovery(&mut self) {
        self.inner.clear_requested = true;
    }

    /// Queue a diagnostic one-shot operation (console write/read, address
    /// probe). Serviced when the bus is Ready, before the round-robin
    /// offer; the result parks in the slot until collected with
    /// [`take_adhoc_result`](I2cBus::take_adhoc_result).
    pub fn submit_adhoc(
        &mut self,
        addr: u8,
        write: &[u8],
        read_len: usize,
    ) -> Result<(), TransferError> {
        if !matches!(self.inner.adhoc, AdHocSlot::Empty) {
            return Err(TransferError::Busy);
        }
        if write.len() > ADHOC_BYTES || read_len > ADHOC_BYTES {
            return Err(TransferError::TooLong);
        }
        if write.is_empty() && read_len == 0 {
            return Err(TransferError::Empty);
        }
        let mut buf = Vec::new();
        buf.extend_from_slice(write).map_err(|_| TransferError::TooLong)?;
        self.inner.adhoc = AdHocSlot::Pending { addr, write: buf, read_len };
        Ok(())
    }

    /// Collect the result of a completed ad hoc operation, if any.
    pub fn take_adhoc_result(&mut self) -> Option<AdHocResult> {
        if matches!(self.inner.adhoc, AdHocSlot::Done(_)) {
            match core::mem::replace(&mut self.inner.adhoc, AdHocSlot::Empty) {
                AdHocSlot::Done(r) => Some(r),
                _ => None,
            }
        } else {
            None
        }
    }

    // ------------------------------------------------------------------
    // Accessors for the diagnostic console and tests
    // ------------------------------------------------------------------

    pub fn bus_number(&self) -> u8 {
        self.inner.cfg.bus
    }

    pub fn state(&self) -> BusState {
        self.inner.state
    }

    /// Whether the transfer engine has been brought up.
    pub fn is_active(&self) -> bool {
        self.inner.engine.is_active()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn timeout_streak(&self) -> u16 {
        self.inner.timeout_streak
    }

    /// Recovery cycles run since bring-up (the boot-time clear excluded).
    pub fn recovery_count(&self) -> u32 {
        self.inner.recoveries
    }

    /// Transactions launched on this bus since bring-up.
    pub fn transaction_count(&self) -> u32 {
        self.inner.transactions
    }

    /// Per-device counters in registration order.
    pub fn device_stats(&self) -> impl Iterator<Item = (u8, DeviceStats)> + '_ + use<'_, 'd, F> {
        self.devices.iter().map(|e| ((*e.dev).address(), e.stats))
    }

    #[cfg(feature = "capture")]
    pub fn capture(&self) -> &CaptureRing {
        &self.inner.capture
    }

    #[cfg(feature = "capture")]
    pub fn capture_mut(&mut self) -> &mut CaptureRing {
        &mut self.inner.capture
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn try_bring_up(&mut self) {
        if !self.inner.engine_wanted {
            return;
        }
        if self.inner.engine.try_activate() {
            self.inner.engine_retry_logged = false;
            let speed = self.inner.cfg.speed_hz;
            if let Some(engine) = self.inner.engine.engine() {
                // Boot-time clear: targets may have been left mid-byte by
                // a reset that interrupted a transfer.
                let outcome = engine.bus_clear(speed);
                info!(
                    "i2c{}: engine up, initial bus clear: {}",
                    self.inner.cfg.bus,
                    outcome
                );
            }
        } else if !self.inner.engine_retry_logged {
            self.inner.engine_retry_logged = true;
            warn!(
                "i2c{}: engine resources unavailable, bus inert (will retry)",
                self.inner.cfg.bus
            );
        }
    }

    fn tick_ready(&mut self, now: Instant) {
        // Pending recovery requests come first: a forced clear from the
        // console, or the wedge heuristic tripping.
        if self.inner.clear_requested {
            self.inner.clear_requested = false;
            self.inner.timeout_streak = 0;
            self.run_recovery();
            return;
        }
        if self.inner.timeout_streak > WEDGE_THRESHOLD && self.auto_clear_due(now) {
            warn!(
                "i2c{}: {} consecutive timeouts, bus looks wedged",
                self.inner.cfg.bus,
                self.inner.timeout_streak
            );
            self.inner.timeout_streak = 0;
            self.inner.last_auto_clear = Some(now);
            self.run_recovery();
            return;
        }

        if matches!(self.inner.adhoc, AdHocSlot::Pending { .. }) {
            self.launch_adhoc(now);
            return;
        }

        // Offer the bus around, starting where the previous scan ended so
        // no device can be starved by earlier entries.
        let n = self.devices.len();
        for k in 0..n {
            let i = (self.cur + k) % n;
            let entry = &mut self.devices[i];
            let addr = entry.dev.address();
            let mut handle = TransferHandle::new(&mut self.inner, addr, now);
            let _ = entry.dev.on_ready(&mut handle);
            if handle.launched {
                entry.stats.tx_started += 1;
                self.cur = i;
                self.inner.turn = Turn::Device(i);
                return;
            }
        }
        // Full scan, nobody had work; yield until the next tick.
    }

    fn tick_active(&mut self, now: Instant) {
        let status = match self.inner.engine.engine() {
            Some(e) => e.poll(),
            None => return,
        };
        match status {
            EngineStatus::Stop => self.finish_success(now, false),
            EngineStatus::Abort => self.finish_abort(now),
            EngineStatus::Busy | EngineStatus::Idle => {
                if now >= self.inner.deadline {
                    self.finish_timeout(now);
                }
            }
        }
    }

    /// Stop condition observed: close out the transaction, then run the
    /// completion callbacks. `from_irq` marks the interrupt-context path,
    /// where only the completion-interrupt hook runs now and the
    /// thread-context callback is deferred to the next tick.
    fn finish_success(&mut self, now: Instant, from_irq: bool) {
        let mut tmp = [0u8; RX_BUF_BYTES];
        let rx_len = match self.inner.engine.engine() {
            Some(e) => e.take_rx(&mut tmp),
            None => 0,
        };
        self.rx_buf.clear();
        let _ = self.rx_buf.extend_from_slice(&tmp[..rx_len]);

        let was_read = self.inner.pending_read > 0;
        self.inner.last_was_read = was_read;
        self.inner.last_rx_len = rx_len;
        self.inner.timeout_streak = 0;
        self.inner.state = BusState::Ready;
        self.inner.record(now, &self.rx_buf, CaptureStatus::Ok);

        match self.inner.turn {
            Turn::AdHoc => {
                self.inner.turn = Turn::Idle;
                self.inner.adhoc = AdHocSlot::Done(AdHocResult::ok(&self.rx_buf[..rx_len]));
            }
            Turn::Device(i) => {
                {
                    let stats = &mut self.devices[i].stats;
                    if was_read {
                        stats.rx_completed += 1;
                    } else {
                        stats.tx_completed += 1;
                    }
                }

                // Completion-interrupt hook first; a launch here replaces
                // the thread-context callback for this cycle.
                let entry = &mut self.devices[i];
                let addr = entry.dev.address();
                let mut handle = TransferHandle::new(&mut self.inner, addr, now);
                let _ = entry.dev.on_completion_irq(&self.rx_buf[..rx_len], &mut handle);
                if handle.launched {
                    entry.stats.tx_started += 1;
                    return;
                }

                if from_irq {
                    self.inner.pending_thread_cb = true;
                } else {
                    self.run_thread_completion(now);
                }
            }
            Turn::Idle => {}
        }
    }

    /// Thread-context half of a successful completion: `on_receive` or
    /// `on_write_complete`, with chaining keeping the turn.
    fn run_thread_completion(&mut self, now: Instant) {
        self.inner.pending_thread_cb = false;
        let i = match self.inner.turn {
            Turn::Device(i) => i,
            _ => return,
        };
        let was_read = self.inner.last_was_read;
        let rx_len = self.inner.last_rx_len;

        let entry = &mut self.devices[i];
        let addr = entry.dev.address();
        let mut handle = TransferHandle::new(&mut self.inner, addr, now);
        let _ = if was_read {
            entry.dev.on_receive(&self.rx_buf[..rx_len], &mut handle)
        } else {
            entry.dev.on_write_complete(&mut handle)
        };
        if handle.launched {
            // Chained: the device keeps its turn, no round-robin advance.
            entry.stats.tx_started += 1;
        } else {
            self.inner.turn = Turn::Idle;
            self.advance();
        }
    }

    fn finish_abort(&mut self, now: Instant) {
        if let Some(e) = self.inner.engine.engine() {
            e.cancel();
        }
        self.inner.state = BusState::Ready;
        self.inner.record(now, &[], CaptureStatus::Abort);
        // An abort is a clean hardware response, not a hang; it does not
        // feed the wedge heuristic.

        match self.inner.turn {
            Turn::AdHoc => {
                self.inner.turn = Turn::Idle;
                self.inner.adhoc = AdHocSlot::Done(AdHocResult::status(AdHocStatus::Nak));
            }
            Turn::Device(i) => {
                debug!(
                    "i2c{}: transfer to {:#x} aborted",
                    self.inner.cfg.bus,
                    self.inner.cur_addr
                );
                self.devices[i].stats.aborts += 1;
                self.devices[i].dev.on_abort();
                self.inner.turn = Turn::Idle;
                // The round-robin index stays put: the aborted device gets
                // the next offer, since a NAK is often a transient busy
                // condition worth an immediate retry.
            }
            Turn::Idle => {}
        }
    }

    fn finish_timeout(&mut self, now: Instant) {
        if let Some(e) = self.inner.engine.engine() {
            e.cancel();
        }
        self.inner.state = BusState::Ready;
        self.inner.timeout_streak = self.inner.timeout_streak.saturating_add(1);
        self.inner.record(now, &[], CaptureStatus::Timeout);
        warn!(
            "i2c{}: transfer to {:#x} timed out ({} consecutive)",
            self.inner.cfg.bus,
            self.inner.cur_addr,
            self.inner.timeout_streak
        );

        match self.inner.turn {
            Turn::AdHoc => {
                self.inner.turn = Turn::Idle;
                self.inner.adhoc = AdHocSlot::Done(AdHocResult::status(AdHocStatus::Timeout));
            }
            Turn::Device(i) => {
                self.devices[i].stats.timeouts += 1;
                self.devices[i].dev.on_timeout();
                self.inner.turn = Turn::Idle;
                self.advance();
            }
            Turn::Idle => {}
        }
    }

    fn advance(&mut self) {
        if !self.devices.is_empty() {
            self.cur = (self.cur + 1) % self.devices.len();
        }
    }

    fn auto_clear_due(&self, now: Instant) -> bool {
        match self.inner.last_auto_clear {
            None => true,
            Some(t) => now >= t + RECOVERY_COOLDOWN,
        }
    }

    /// Run a recovery cycle and re-initialize every registered device,
    /// since a cleared bus can leave device register state unknown.
    fn run_recovery(&mut self) {
        let speed = self.inner.cfg.speed_hz;
        let outcome = match self.inner.engine.engine() {
            Some(e) => e.bus_clear(speed),
            None => return,
        };
        self.inner.recoveries += 1;
        if outcome.is_cleared() {
            info!("i2c{}: bus recovery complete", self.inner.cfg.bus);
        } else {
            warn!("i2c{}: bus recovery failed: {}", self.inner.cfg.bus, outcome);
        }
        for entry in &mut self.devices {
            entry.dev.reinit();
        }
    }

    fn launch_adhoc(&mut self, now: Instant) {
        let (addr, write, read_len) =
            match core::mem::replace(&mut self.inner.adhoc, AdHocSlot::InFlight) {
                AdHocSlot::Pending { addr, write, read_len } => (addr, write, read_len),
                other => {
                    self.inner.adhoc = other;
                    return;
                }
            };

        let mut txn = Transaction::new();
        let built = if write.is_empty() {
            txn.read(read_len).map(|_| ())
        } else if read_len == 0 {
            txn.write(&write).map(|_| ())
        } else {
            txn.write_read(&write, read_len).map(|_| ())
        };

        let launched = built.and_then(|_| self.inner.launch(addr, &txn, now));
        match launched {
            Ok(()) => self.inner.turn = Turn::AdHoc,
            Err(_) => {
                self.inner.adhoc = AdHocSlot::Done(AdHocResult::status(AdHocStatus::Rejected));
            }
        }
    }
}
