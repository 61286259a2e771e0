//! Bit-banged bus recovery.
//!
//! If the controller is reset mid-read, the target can be left holding SDA
//! low waiting to finish clocking out a byte, wedging the bus. The standard
//! fix is to pulse SCL until the target releases SDA, then emit an explicit
//! START/STOP pair to reset every target's internal state machine.
//!
//! The engine implementation is responsible for masking its failure
//! interrupts and demoting the bus lines to plain GPIO around this
//! procedure, and for restoring them afterwards; see
//! [`TransferEngine::bus_clear`](crate::engine::TransferEngine::bus_clear).

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

/// Nine pulses clock out the longest byte-plus-ack a target can be stuck in.
pub const MAX_CLOCK_PULSES: u8 = 9;

/// Terminal report of one recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecoveryOutcome {
    /// Both lines float high; the bus is usable.
    Cleared,
    /// SCL is held low by hardware; signaling alone cannot recover this.
    SclStuckLow,
    /// SDA stayed low through the full pulse train.
    SdaStuckLow,
    /// Neither line can be released.
    BothStuckLow,
}

impl RecoveryOutcome {
    pub fn is_cleared(self) -> bool {
        matches!(self, RecoveryOutcome::Cleared)
    }
}

/// Run the recovery sequence on two open-drain lines.
///
/// `freq_hz` sets the pulse cadence (one full SCL period per pulse). Both
/// pins must be configured open-drain so that "set high" releases the line
/// and the real level can be read back.
pub fn clear_bus<SCL, SDA, D, E>(
    scl: &mut SCL,
    sda: &mut SDA,
    delay: &mut D,
    freq_hz: u32,
) -> Result<RecoveryOutcome, E>
where
    SCL: OutputPin<Error = E> + InputPin<Error = E>,
    SDA: OutputPin<Error = E> + InputPin<Error = E>,
    D: DelayNs,
{
    let half_period_ns = 500_000_000 / freq_hz.max(1);

    // Release both lines and let them settle.
    scl.set_high()?;
    sda.set_high()?;
    delay.delay_ns(half_period_ns);

    // A clock line we cannot release is beyond signaling-level recovery
    // (held in reset, shorted, or a target stretching forever).
    if !scl.is_high()? {
        return Ok(if sda.is_high()? {
            RecoveryOutcome::SclStuckLow
        } else {
            RecoveryOutcome::BothStuckLow
        });
    }

    for _ in 0..MAX_CLOCK_PULSES {
        if sda.is_high()? {
            break;
        }
        scl.set_low()?;
        delay.delay_ns(half_period_ns);
        scl.set_high()?;
        delay.delay_ns(half_period_ns);
        if !scl.is_high()? {
            return Ok(if sda.is_high()? {
                RecoveryOutcome::SclStuckLow
            } else {
                RecoveryOutcome::BothStuckLow
            });
        }
    }

    if !sda.is_high()? {
        return Ok(RecoveryOutcome::SdaStuckLow);
    }

    // Explicit START then STOP with SCL held high, resetting any target
    // state machine that survived the pulse train.
    sda.set_low()?;
    delay.delay_ns(half_period_ns);
    sda.set_high()?;
    delay.delay_ns(half_period_ns);

    Ok(RecoveryOutcome::Cleared)
}
