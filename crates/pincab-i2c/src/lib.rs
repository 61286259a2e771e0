#![no_std]
//! Asynchronous I2C bus sharing for the pinball-cabinet controller.
//!
//! One physical bus is multiplexed among many independently-written device
//! drivers (accelerometers, PWM LED drivers, RTCs, port expanders), each
//! with its own protocol and polling cadence, without ever blocking the
//! main control loop. The scheduler offers the bus around in round-robin
//! order, hands launched transactions to a DMA-based transfer engine, and
//! reports completion, timeout or abort back through each driver's
//! callbacks. Wedged buses are detected by timeout streaks and cleared
//! with a bit-banged recovery sequence.
//!
//! Hardware access sits behind the [`TransferEngine`]/[`EngineFactory`]
//! traits, so the core runs unchanged under host tests with scripted
//! engine doubles.

// This mod MUST go first, so that the others see its macros.
mod fmt;

mod bus;
mod capture;
mod config;
mod device;
mod diag;
mod engine;
mod error;
mod recovery;
mod registry;
mod txn;

pub use bus::{
    BusCell, BusState, I2cBus, TransferHandle, MAX_DEVICES, RECOVERY_COOLDOWN,
    RX_BUF_BYTES, TRANSACTION_TIMEOUT, TX_BUF_WORDS, WEDGE_THRESHOLD,
};
#[cfg(feature = "capture")]
pub use capture::{CaptureEntry, CaptureRing, CAPTURE_BYTES, CAPTURE_ENTRIES};
pub use capture::CaptureStatus;
pub use config::{BusConfig, EnableMode, PinOwner, PinRole, BUS_COUNT};
pub use device::{DeviceStats, I2cDevice};
pub use diag::{
    AdHocResult, AdHocStatus, BusScanner, ScanReport, ADHOC_BYTES,
    SCAN_FIRST_ADDR, SCAN_LAST_ADDR,
};
pub use engine::{EngineFactory, EngineStatus, TransferEngine, TransferSignals};
pub use error::{ConfigError, EngineFault, PinClaimError, TransferError};
pub use recovery::{clear_bus, RecoveryOutcome, MAX_CLOCK_PULSES};
pub use registry::BusRegistry;
pub use txn::{CmdWord, Transaction, MAX_SEGMENTS};
