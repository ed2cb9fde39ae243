//! Channel id → device routing for inbound bus traffic.
//!
//! Owned by whoever attaches devices and passed by reference to the bus
//! glue; there is no global device list.

use core::cell::RefCell;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use heapless::FnvIndexMap;

use super::link::DeviceLink;
use crate::error::{DeliveryError, LifecycleError};
use crate::msg::Audience;
use crate::msg::codec::peek_channel;

/// Devices one registry can route to. Must stay a power of two.
pub const MAX_DEVICES: usize = 8;

type Links = FnvIndexMap<u16, Arc<DeviceLink>, MAX_DEVICES>;

pub struct DeviceRegistry {
    links: Mutex<CriticalSectionRawMutex, RefCell<Links>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            links: Mutex::new(RefCell::new(Links::new())),
        }
    }

    pub fn insert(&self, channel: u16, link: Arc<DeviceLink>) -> Result<(), LifecycleError> {
        self.links.lock(|cell| {
            let mut links = cell.borrow_mut();
            if links.contains_key(&channel) {
                return Err(LifecycleError::DuplicateChannel(channel));
            }
            links
                .insert(channel, link)
                .map(|_| ())
                .map_err(|_| LifecycleError::RegistryFull)
        })
    }

    pub fn remove(&self, channel: u16) -> Option<Arc<DeviceLink>> {
        self.links.lock(|cell| cell.borrow_mut().remove(&channel))
    }

    pub fn lookup(&self, channel: u16) -> Option<Arc<DeviceLink>> {
        self.links.lock(|cell| cell.borrow().get(&channel).cloned())
    }

    pub fn len(&self) -> usize {
        self.links.lock(|cell| cell.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Route a raw bus buffer by the channel id in its header.
    pub fn deliver(&self, audience: Audience, buf: &[u8]) -> Result<(), DeliveryError> {
        let channel = peek_channel(buf).ok_or(DeliveryError::NoDevice)?;
        self.deliver_to(channel, audience, buf)
    }

    pub fn deliver_to(
        &self,
        channel: u16,
        audience: Audience,
        buf: &[u8],
    ) -> Result<(), DeliveryError> {
        // Clone out so the copy into the queue runs outside the lock.
        let link = self.lookup(channel).ok_or(DeliveryError::NoDevice)?;
        link.deliver(audience, buf)
    }

    /// Interrupt glue: wake the device owning `channel`.
    pub fn notify_irq(&self, channel: u16) -> Result<(), DeliveryError> {
        let link = self.lookup(channel).ok_or(DeliveryError::NoDevice)?;
        link.notify_irq();
        Ok(())
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
