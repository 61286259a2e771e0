use core::fmt;

/// Configuration-time failures. These fail fast with a descriptive message;
/// the bus in question simply never becomes active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Bus number outside the range supported by the board.
    InvalidBusNumber(u8),
    /// SDA and SCL resolve to the same physical pin.
    PinConflict { sda: u8, scl: u8 },
    /// Clock speed outside the supported 100 kHz .. 1 MHz range.
    InvalidSpeed(u32),
    /// The external pin-ownership allocator refused one of our pins.
    PinClaim(PinClaimError),
    /// The registration list is full.
    TooManyDevices,
    /// A bus with this number is already present in the registry.
    DuplicateBus(u8),
    /// The registry is full.
    TooManyBuses,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidBusNumber(n) => {
                write!(f, "invalid I2C bus number: {}", n)
            }
            ConfigError::PinConflict { sda, scl } => {
                write!(f, "SDA and SCL must be distinct pins (sda={}, scl={})", sda, scl)
            }
            ConfigError::InvalidSpeed(hz) => {
                write!(f, "unsupported I2C clock speed: {} Hz", hz)
            }
            ConfigError::PinClaim(e) => {
                write!(f, "pin claim rejected: {}", e)
            }
            ConfigError::TooManyDevices => {
                write!(f, "device registration list is full")
            }
            ConfigError::DuplicateBus(n) => {
                write!(f, "bus {} is already registered", n)
            }
            ConfigError::TooManyBuses => {
                write!(f, "bus registry is full")
            }
        }
    }
}

impl From<PinClaimError> for ConfigError {
    fn from(e: PinClaimError) -> Self {
        ConfigError::PinClaim(e)
    }
}

/// Returned by the external GPIO ownership allocator when a pin is invalid
/// or already claimed by another subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinClaimError {
    pub pin: u8,
}

impl fmt::Display for PinClaimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO {} unavailable", self.pin)
    }
}

/// Failures reported to a device when it tries to launch a transaction.
///
/// Routine bus faults (timeout, abort) never surface here; they arrive as
/// callback notifications after the fact. These errors are for launches the
/// scheduler refuses to start in the first place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferError {
    /// A transaction was already launched from this callback invocation.
    AlreadyLaunched,
    /// Another transaction is in flight on this bus.
    Busy,
    /// The transfer engine has not been brought up (resources unavailable
    /// or the bus is disabled).
    Inert,
    /// The transaction has no segments.
    Empty,
    /// The flattened command stream or the expected read length exceeds
    /// the bus buffers.
    TooLong,
    /// Segment list capacity exceeded.
    TooManySegments,
    /// The transfer engine rejected the transfer.
    Engine(EngineFault),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::AlreadyLaunched => {
                write!(f, "transaction already launched from this callback")
            }
            TransferError::Busy => write!(f, "transfer already in flight"),
            TransferError::Inert => write!(f, "transfer engine not available"),
            TransferError::Empty => write!(f, "transaction has no segments"),
            TransferError::TooLong => {
                write!(f, "transaction exceeds bus buffer capacity")
            }
            TransferError::TooManySegments => {
                write!(f, "too many segments in one transaction")
            }
            TransferError::Engine(e) => write!(f, "engine fault: {}", e),
        }
    }
}

impl From<EngineFault> for TransferError {
    fn from(e: EngineFault) -> Self {
        TransferError::Engine(e)
    }
}

/// Faults a transfer engine can report when asked to start a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EngineFault {
    /// The engine is still busy with a previous transfer.
    Busy,
    /// The engine rejected the transfer parameters.
    Rejected,
}

impl fmt::Display for EngineFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineFault::Busy => write!(f, "engine busy"),
            EngineFault::Rejected => write!(f, "transfer rejected"),
        }
    }
}
