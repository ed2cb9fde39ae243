//! Inbound message queue between bus delivery and the worker.
//!
//! Delivery happens on whatever context the message bus calls back on;
//! the worker drains the queue in arrival order.
//!
//! ```text
//! ┌──────────────┐ InboundMessage ┌──────────────┐
//! │  Bus deliver │───────────────▶│    Worker    │
//! │  (any ctx)   │   + wake       │  (one thread)│
//! └──────────────┘                └──────────────┘
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::Vec;

use crate::error::DeliveryError;

/// Largest inbound message accepted.
pub const MAX_INBOUND_SIZE: usize = 4096;

/// Inbound queue depth.
pub const INBOUND_DEPTH: usize = 16;

/// Which sub-audience a message was addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Point-to-point command from the controller; `sender` receives
    /// unicast replies.
    Control { sender: u32 },
    /// Fusion traffic, relayed verbatim to the fusion group.
    Fusion,
}

/// Inbound message copied out of the bus's buffer.
pub struct InboundMessage {
    pub audience: Audience,
    pub payload: Vec<u8, MAX_INBOUND_SIZE>,
}

impl InboundMessage {
    pub fn copy_from(audience: Audience, buf: &[u8]) -> Result<Self, DeliveryError> {
        let payload = Vec::from_slice(buf).map_err(|()| DeliveryError::TooLarge)?;
        Ok(Self { audience, payload })
    }
}

pub type InboundQueue = Channel<CriticalSectionRawMutex, InboundMessage, INBOUND_DEPTH>;
