//! The application-root bus registry.
//!
//! There is exactly one bus 0 and one bus 1 on the board; the registry
//! makes that explicit without hidden global state. The application root
//! owns it and hands bus references to device constructors and the main
//! loop.

use embassy_time::Instant;
use heapless::Vec;

use crate::bus::I2cBus;
use crate::engine::EngineFactory;
use crate::error::ConfigError;

/// Fixed-capacity collection of configured buses, looked up by bus number.
pub struct BusRegistry<'d, F: EngineFactory, const N: usize> {
    buses: Vec<I2cBus<'d, F>, N>,
}

impl<'d, F: EngineFactory, const N: usize> BusRegistry<'d, F, N> {
    pub const fn new() -> Self {
        BusRegistry { buses: Vec::new() }
    }

    /// Add a configured bus. Rejects duplicates; a rejected bus is dropped,
    /// which is fine at configuration time while the firmware is still
    /// setting up and the error is surfaced to the operator.
    pub fn add(&mut self, bus: I2cBus<'d, F>) -> Result<(), ConfigError> {
        if self.buses.iter().any(|b| b.bus_number() == bus.bus_number()) {
            return Err(ConfigError::DuplicateBus(bus.bus_number()));
        }
        self.buses.push(bus).map_err(|_| ConfigError::TooManyBuses)
    }

    pub fn get(&self, bus_number: u8) -> Option<&I2cBus<'d, F>> {
        self.buses.iter().find(|b| b.bus_number() == bus_number)
    }

    pub fn get_mut(&mut self, bus_number: u8) -> Option<&mut I2cBus<'d, F>> {
        self.buses.iter_mut().find(|b| b.bus_number() == bus_number)
    }

    /// One scheduler pass over every bus. The buses are fully independent
    /// state machines; order carries no meaning.
    pub fn tick_all(&mut self, now: Instant) {
        for bus in self.buses.iter_mut() {
            bus.tick(now);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &I2cBus<'d, F>> {
        self.buses.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut I2cBus<'d, F>> {
        self.buses.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }
}

impl<'d, F: EngineFactory, const N: usize> Default for BusRegistry<'d, F, N> {
    fn default() -> Self {
        Self::new()
    }
}
