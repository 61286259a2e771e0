//! Transfer engine abstraction.
//!
//! The engine wraps the two DMA channels bound to one bus controller: one
//! continuously pumping command words out, one receiving response bytes in.
//! It knows nothing about devices, only word counts and two completion
//! conditions (stop and abort). The scheduler drives it through the
//! [`TransferEngine`] trait; host tests substitute a scripted double.

use portable_atomic::{AtomicBool, Ordering};

use crate::error::EngineFault;
use crate::recovery::RecoveryOutcome;
use crate::txn::CmdWord;

/// What the scheduler observes when it polls the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EngineStatus {
    /// No transfer has been started.
    Idle,
    /// A transfer is in flight.
    Busy,
    /// The stop condition was observed; the transfer completed.
    Stop,
    /// The hardware reported the transfer could not complete (NAK or
    /// arbitration fault).
    Abort,
}

/// One bus controller's asynchronous transfer channel pair.
///
/// `poll` is a level read: it keeps returning the terminal status until the
/// next `start` or `cancel` resets it, so the tick path and the interrupt
/// path can both observe a completion without racing to consume it.
pub trait TransferEngine {
    /// Queue the flattened command stream for asynchronous transmission and
    /// arm the receive channel for `read_len` bytes.
    fn start(&mut self, addr: u8, words: &[CmdWord], read_len: usize) -> Result<(), EngineFault>;

    /// Current transfer status.
    fn poll(&mut self) -> EngineStatus;

    /// Tear down the in-flight transfer (deadline expiry or shutdown).
    fn cancel(&mut self);

    /// Copy the received bytes of the completed transfer into `out`,
    /// returning how many were written.
    fn take_rx(&mut self, out: &mut [u8]) -> usize;

    /// Run the bit-level bus recovery procedure: mask the engine's failure
    /// interrupts, demote SDA/SCL to plain GPIO, run
    /// [`clear_bus`](crate::recovery::clear_bus), then restore pin function
    /// and interrupts.
    fn bus_clear(&mut self, freq_hz: u32) -> RecoveryOutcome;
}

/// Abstracts engine creation so acquisition can be retried lazily.
///
/// DMA channels may be exhausted at boot by unrelated subsystems; failing
/// `create` hands the resources back so the bus can retry on a later tick
/// instead of failing hard at startup.
pub trait EngineFactory {
    type Engine: TransferEngine;
    /// Resources needed to create the engine (peripheral handles, DMA
    /// channel claims, pins).
    type Resources;
    type Error: core::fmt::Debug;

    fn create(
        resources: Self::Resources,
    ) -> Result<Self::Engine, (Self::Error, Self::Resources)>;
}

/// Lifecycle slot for the engine: resources waiting to be turned into an
/// engine, or the live engine itself.
pub(crate) enum EngineSlot<F: EngineFactory> {
    Vacant(F::Resources),
    Active(F::Engine),
    /// Transient marker while the slot changes hands; never observed
    /// outside [`EngineSlot::try_activate`].
    Claimed,
}

impl<F: EngineFactory> EngineSlot<F> {
    pub(crate) fn is_active(&self) -> bool {
        matches!(self, EngineSlot::Active(_))
    }

    pub(crate) fn engine(&mut self) -> Option<&mut F::Engine> {
        match self {
            EngineSlot::Active(e) => Some(e),
            _ => None,
        }
    }

    /// Attempt to turn the parked resources into a live engine. Returns
    /// true if the slot holds an active engine afterwards. On factory
    /// failure the resources go back into the slot for a later retry.
    pub(crate) fn try_activate(&mut self) -> bool {
        if self.is_active() {
            return true;
        }
        let resources = match core::mem::replace(self, EngineSlot::Claimed) {
            EngineSlot::Vacant(r) => r,
            other => {
                *self = other;
                return false;
            }
        };
        match F::create(resources) {
            Ok(engine) => {
                *self = EngineSlot::Active(engine);
                true
            }
            Err((_err, resources)) => {
                *self = EngineSlot::Vacant(resources);
                false
            }
        }
    }
}

/// ISR-latched completion flags for hardware engine implementations.
///
/// The bus interrupt handler latches the stop or abort condition here; the
/// engine's `poll` reads the flags from tick context. `const`-constructible
/// so it can live in a `static` next to the interrupt vector.
pub struct TransferSignals {
    stop: AtomicBool,
    abort: AtomicBool,
}

impl TransferSignals {
    pub const fn new() -> Self {
        TransferSignals { stop: AtomicBool::new(false), abort: AtomicBool::new(false) }
    }

    /// Called from interrupt context when the stop condition is detected.
    pub fn latch_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Called from interrupt context on an abort condition.
    pub fn latch_abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    pub fn stop_latched(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn abort_latched(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    /// Reset both flags; called when a new transfer starts or the current
    /// one is cancelled.
    pub fn clear(&self) {
        self.stop.store(false, Ordering::Release);
        self.abort.store(false, Ordering::Release);
    }
}

impl Default for TransferSignals {
    fn default() -> Self {
        Self::new()
    }
}
