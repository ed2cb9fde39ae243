//! Port traits: the boundary between the engine and its collaborators.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Device worker
//! ```
//!
//! The platform, message bus and report sink are supplied at attach time.
//! The engine only invokes them; pin setup, power rails, socket handling
//! and input-device exposure all live behind these traits.
//!
//! All port errors are typed; the worker logs every failure it sees.

use core::fmt;

use crate::error::ProtocolError;

// ───────────────────────────────────────────────────────────────
// Platform port (engine → board support)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformError {
    /// Regulator or init sequencing failed.
    Power,
    /// Interrupt line could not be claimed.
    Irq,
    /// Companion process did not start.
    Launch,
    /// Firmware image could not be fetched.
    FirmwareUnavailable,
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Power => write!(f, "power sequencing failed"),
            Self::Irq => write!(f, "interrupt request failed"),
            Self::Launch => write!(f, "companion launch failed"),
            Self::FirmwareUnavailable => write!(f, "firmware unavailable"),
        }
    }
}

/// Interrupt trigger requested by the companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqTrigger {
    Rising,
    Falling,
    High,
    Low,
}

impl TryFrom<u8> for IrqTrigger {
    type Error = ProtocolError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Self::Rising),
            0x02 => Ok(Self::Falling),
            0x04 => Ok(Self::High),
            0x08 => Ok(Self::Low),
            _ => Err(ProtocolError::MalformedMessage),
        }
    }
}

impl From<IrqTrigger> for u8 {
    fn from(t: IrqTrigger) -> Self {
        match t {
            IrqTrigger::Rising => 0x01,
            IrqTrigger::Falling => 0x02,
            IrqTrigger::High => 0x04,
            IrqTrigger::Low => 0x08,
        }
    }
}

/// Board support for one sensor. Shared between the worker and callers
/// of suspend/resume, hence `&self` receivers.
pub trait Platform: Send + Sync {
    /// Claim (`true`) or release (`false`) board resources.
    fn init(&self, on: bool) -> Result<(), PlatformError>;

    /// Sequence the supply rails, including settle delays.
    fn power(&self, on: bool) -> Result<(), PlatformError>;

    /// Drive the reset line; `false` holds the chip in reset.
    fn reset(&self, state: bool);

    /// Raw interrupt line level. The line is active low.
    fn irq_line_state(&self) -> bool;

    /// Claim the interrupt. The handler only calls the device link's
    /// `notify_irq`.
    fn request_irq(&self, trigger: IrqTrigger) -> Result<(), PlatformError>;

    fn free_irq(&self);

    fn enable_irq(&self);

    fn disable_irq(&self);

    /// Start the fusion companion with the given argument vector.
    fn launch_companion(&self, argv: &[&str]) -> Result<(), PlatformError>;

    /// Fetch a named firmware image.
    fn request_firmware(&self, name: &str) -> Result<Vec<u8>, PlatformError>;
}

// ───────────────────────────────────────────────────────────────
// Message bus port (engine ↔ companion)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageBusError {
    /// Channel or group could not be registered.
    Registration,
    /// Recipient or group unreachable.
    Unreachable,
    /// Message rejected by the bus.
    Rejected,
}

impl fmt::Display for MessageBusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registration => write!(f, "registration failed"),
            Self::Unreachable => write!(f, "destination unreachable"),
            Self::Rejected => write!(f, "message rejected"),
        }
    }
}

/// Outbound side of the message bus. Inbound buffers arrive through the
/// [`DeviceRegistry`](crate::device::DeviceRegistry).
pub trait MessageBus: Send {
    /// Register the device channel and return its id.
    fn register(&mut self, channel: &str) -> Result<u16, MessageBusError>;

    /// Register a broadcast group on the channel.
    fn register_group(&mut self, number: u8, name: &str) -> Result<(), MessageBusError>;

    fn unicast(&mut self, buf: &[u8], recipient: u32) -> Result<(), MessageBusError>;

    fn multicast(&mut self, buf: &[u8], group: u8) -> Result<(), MessageBusError>;

    /// Drop the channel and all its groups.
    fn unregister(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Report sink port (engine → input layer)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportError {
    /// The input layer refused the channel description.
    Registration,
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registration => write!(f, "report channel registration failed"),
        }
    }
}

/// Touch-report channel exposed to the rest of the system.
pub trait ReportSink: Send {
    /// Describe and open the channel.
    fn configure(&mut self, x_range: u16, y_range: u16) -> Result<(), ReportError>;

    /// Report one contact of the current frame.
    fn contact(&mut self, contact: &crate::msg::Contact);

    /// Eraser tool entered (`true`) or left (`false`) proximity.
    fn eraser(&mut self, active: bool);

    /// Close the current frame.
    fn sync(&mut self);

    /// Close the channel.
    fn release(&mut self);

    /// Hint that an interrupt is being serviced.
    fn activity(&mut self) {}
}
