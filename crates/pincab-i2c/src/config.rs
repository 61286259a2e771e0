//! Bus configuration and pin-ownership boundary.
//!
//! The JSON configuration loader lives outside this crate; it deserializes
//! a [`BusConfig`] per physical controller and hands it to
//! [`I2cBus::new`](crate::I2cBus::new). Pin assignments are claimed through
//! the external [`PinOwner`] allocator before any hardware is touched, so a
//! mis-wired configuration fails at setup time instead of at runtime.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, PinClaimError};

/// Number of physical bus controllers on the board.
pub const BUS_COUNT: u8 = 2;

/// When the bus hardware is brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(rename_all = "kebab-case")]
pub enum EnableMode {
    /// Bring the hardware up as soon as the main loop starts ticking.
    #[default]
    Always,
    /// Defer hardware bring-up until the first device registers, so an
    /// unused optional bus never consumes engine resources.
    OnDemand,
    /// Never bring the hardware up; the bus stays inert.
    Disabled,
}

/// Per-bus setup parameters, as supplied by the configuration loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusConfig {
    /// Physical controller number (0-based).
    pub bus: u8,
    /// SDA GPIO number.
    pub sda: u8,
    /// SCL GPIO number.
    pub scl: u8,
    /// Bus clock in Hz.
    #[serde(default = "default_speed")]
    pub speed_hz: u32,
    /// Enable the internal pull-ups on both lines.
    #[serde(default = "default_pull_ups")]
    pub pull_ups: bool,
    #[serde(default)]
    pub mode: EnableMode,
}

fn default_speed() -> u32 {
    400_000
}

fn default_pull_ups() -> bool {
    true
}

impl BusConfig {
    /// Sanity-check the configuration before any resources are committed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus >= BUS_COUNT {
            return Err(ConfigError::InvalidBusNumber(self.bus));
        }
        if self.sda == self.scl {
            return Err(ConfigError::PinConflict { sda: self.sda, scl: self.scl });
        }
        if !(100_000..=1_000_000).contains(&self.speed_hz) {
            return Err(ConfigError::InvalidSpeed(self.speed_hz));
        }
        Ok(())
    }
}

/// Which bus line a pin claim is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinRole {
    Sda,
    Scl,
}

/// The external GPIO ownership allocator.
///
/// The scheduler reserves its SDA/SCL pins through this before touching
/// hardware; a refusal is a configuration error, not a runtime fault.
pub trait PinOwner {
    fn claim(&mut self, pin: u8, role: PinRole) -> Result<(), PinClaimError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_fast_mode_with_pull_ups() {
        let cfg = BusConfig {
            bus: 0,
            sda: 2,
            scl: 3,
            speed_hz: default_speed(),
            pull_ups: default_pull_ups(),
            mode: EnableMode::default(),
        };
        assert_eq!(cfg.speed_hz, 400_000);
        assert!(cfg.pull_ups);
        assert_eq!(cfg.mode, EnableMode::Always);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_bad_configs() {
        let base = BusConfig {
            bus: 0,
            sda: 2,
            scl: 3,
            speed_hz: 400_000,
            pull_ups: true,
            mode: EnableMode::Always,
        };

        let mut cfg = base;
        cfg.bus = BUS_COUNT;
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidBusNumber(BUS_COUNT)));

        let mut cfg = base;
        cfg.scl = cfg.sda;
        assert!(matches!(cfg.validate(), Err(ConfigError::PinConflict { .. })));

        let mut cfg = base;
        cfg.speed_hz = 50_000;
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidSpeed(50_000)));
    }
}
