//! [`Bus`] over an `embedded-hal` SPI device.
//!
//! Chip select and bus locking belong to the `SpiDevice` implementation;
//! each call here is one chip-select-framed transaction.

use embedded_hal::spi::{Error as _, ErrorKind, SpiDevice};
use log::debug;

use crate::chip::{Bus, BusError};

pub struct SpiBus<S> {
    spi: S,
}

impl<S: SpiDevice> SpiBus<S> {
    pub fn new(spi: S) -> Self {
        Self { spi }
    }

    pub fn into_inner(self) -> S {
        self.spi
    }
}

/// Overruns are worth another attempt; everything else is a fault.
fn classify(kind: ErrorKind) -> BusError {
    match kind {
        ErrorKind::Overrun => BusError::Retry,
        other => {
            debug!("SPI: {:?}", other);
            BusError::Fault
        }
    }
}

impl<S: SpiDevice> Bus for SpiBus<S> {
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError> {
        self.spi.transfer(rx, tx).map_err(|e| classify(e.kind()))
    }

    fn write(&mut self, tx: &[u8]) -> Result<(), BusError> {
        self.spi.write(tx).map_err(|e| classify(e.kind()))
    }
}
