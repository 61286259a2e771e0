//! The contract every peripheral driver implements.
//!
//! The scheduler only talks to devices through [`I2cDevice`]; a driver's
//! internal register protocol is its own business. Callbacks must never
//! block, since the scheduler tick has to return immediately so the main
//! loop keeps its cadence.

use crate::bus::TransferHandle;

/// Capability set of one peripheral on a shared bus.
///
/// Launching a transfer is only possible through the [`TransferHandle`]
/// passed into `on_ready`, `on_receive`, `on_write_complete` and
/// `on_completion_irq`, so a driver cannot touch the bus outside its turn.
/// The boolean returns tell the scheduler whether a transaction was
/// launched; they must agree with what the driver actually did through the
/// handle.
pub trait I2cDevice {
    /// The device's fixed 7-bit target address.
    fn address(&self) -> u8;

    /// It is this device's turn on the bus. May launch zero or one
    /// transaction through the handle; returns whether it launched.
    fn on_ready(&mut self, bus: &mut TransferHandle<'_>) -> bool;

    /// A read-containing transaction completed; `data` holds the received
    /// bytes and is only valid during this call, so copy out anything you
    /// need. Launching through the handle chains a new transaction without
    /// giving up the turn; return whether you did.
    fn on_receive(&mut self, data: &[u8], bus: &mut TransferHandle<'_>) -> bool {
        let _ = (data, bus);
        false
    }

    /// A write-only transaction completed. Same chaining semantics as
    /// [`on_receive`](I2cDevice::on_receive).
    fn on_write_complete(&mut self, bus: &mut TransferHandle<'_>) -> bool {
        let _ = bus;
        false
    }

    /// Interrupt-context hook fired the instant the stop condition is
    /// detected, before the thread-context callback. Launching here starts
    /// the next transaction with minimum dead time on the bus and
    /// *replaces* the thread-context callback for this completion. Keep it
    /// short; this runs with the bus interrupt masked.
    fn on_completion_irq(&mut self, data: &[u8], bus: &mut TransferHandle<'_>) -> bool {
        let _ = (data, bus);
        false
    }

    /// The in-flight transaction hit its deadline and was torn down.
    fn on_timeout(&mut self) {}

    /// The hardware reported the transaction could not complete.
    fn on_abort(&mut self) {}

    /// A bus recovery ran; the device's register state is unknown. Resend
    /// setup commands on upcoming turns.
    fn reinit(&mut self) {}
}

/// Per-device transaction counters, kept by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceStats {
    /// Transactions launched (including chained ones).
    pub tx_started: u32,
    /// Write-only transactions completed.
    pub tx_completed: u32,
    /// Read-containing transactions completed.
    pub rx_completed: u32,
    pub timeouts: u32,
    pub aborts: u32,
}
