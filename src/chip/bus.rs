//! Half-duplex byte bus port.
//!
//! One call moves exactly one chip frame. Chip-select timing, bus locking
//! and clocking belong to the implementation. The transport layer only
//! cares whether a failed frame may be retried.

use crate::error::TransportError;

/// Outcome of a failed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// Transient condition; the same frame can be sent again.
    Retry,
    /// The bus is unusable for this frame.
    Fault,
}

/// Framed byte bus to the sensor chip.
pub trait Bus {
    /// Clock out `tx` while capturing the same number of bytes into `rx`,
    /// inside a single frame. `rx.len() == tx.len()`.
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError>;

    /// Clock out `tx` as a single frame.
    fn write(&mut self, tx: &[u8]) -> Result<(), BusError>;
}

impl<T: Bus + ?Sized> Bus for &mut T {
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError> {
        (**self).transfer(tx, rx)
    }

    fn write(&mut self, tx: &[u8]) -> Result<(), BusError> {
        (**self).write(tx)
    }
}

/// Run one frame operation until it succeeds or faults. No backoff.
pub(crate) fn retry_frame<F>(mut frame: F) -> Result<(), TransportError>
where
    F: FnMut() -> Result<(), BusError>,
{
    loop {
        match frame() {
            Ok(()) => return Ok(()),
            Err(BusError::Retry) => continue,
            Err(BusError::Fault) => return Err(TransportError::BusFault),
        }
    }
}
