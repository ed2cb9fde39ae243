//! Device status events and their single-slot subscriber.
//!
//! At most one callback is registered per device. The worker invokes it
//! synchronously from the event loop, never from interrupt context.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::bootloader::UpdateOutcome;
use crate::error::BootloaderError;

/// Lifecycle-level events emitted by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// The companion process was launched.
    CompanionStarted,
    /// Sensing halted and the interrupt masked; power-down follows.
    Suspended,
    /// Sensing restarted after resume.
    Resumed,
    FirmwareUpdated(UpdateOutcome),
    FirmwareFailed(BootloaderError),
}

pub type StatusCallback = Box<dyn FnMut(&StatusEvent) + Send>;

/// Registration refused because a callback is already installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotOccupied;

struct Slot {
    callback: Option<StatusCallback>,
    generation: u32,
}

/// Holds at most one [`StatusCallback`].
pub struct StatusSubscriber {
    slot: Mutex<CriticalSectionRawMutex, RefCell<Slot>>,
}

impl StatusSubscriber {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(RefCell::new(Slot {
                callback: None,
                generation: 0,
            })),
        }
    }

    pub fn register(&self, callback: StatusCallback) -> Result<(), SlotOccupied> {
        self.slot.lock(|cell| {
            let mut slot = cell.borrow_mut();
            if slot.callback.is_some() {
                return Err(SlotOccupied);
            }
            slot.callback = Some(callback);
            slot.generation = slot.generation.wrapping_add(1);
            Ok(())
        })
    }

    /// Remove the callback. Returns whether one was installed.
    pub fn clear(&self) -> bool {
        self.slot.lock(|cell| {
            let mut slot = cell.borrow_mut();
            slot.generation = slot.generation.wrapping_add(1);
            slot.callback.take().is_some()
        })
    }

    pub fn is_registered(&self) -> bool {
        self.slot.lock(|cell| cell.borrow().callback.is_some())
    }

    /// Invoke the callback, if any, outside the lock.
    pub fn notify(&self, event: &StatusEvent) {
        let taken = self.slot.lock(|cell| {
            let mut slot = cell.borrow_mut();
            slot.callback.take().map(|cb| (cb, slot.generation))
        });
        let Some((mut callback, generation)) = taken else {
            return;
        };
        callback(event);
        self.slot.lock(|cell| {
            let mut slot = cell.borrow_mut();
            // Cleared or replaced while running: drop ours.
            if slot.generation == generation && slot.callback.is_none() {
                slot.callback = Some(callback);
            }
        });
    }
}

impl Default for StatusSubscriber {
    fn default() -> Self {
        Self::new()
    }
}
