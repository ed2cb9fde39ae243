//! Message bus multiplexer wire layer.
//!
//! - [`codec`]: message header and attribute framing
//! - [`commands`]: typed driver commands and fusion attribute ids
//! - [`channels`]: inbound queue shared with the worker

pub mod channels;
pub mod codec;
pub mod commands;

pub use channels::{Audience, InboundMessage, InboundQueue};
pub use codec::{Attribute, Attributes, Mark, MessageHeader, OutboundMessage};
pub use commands::{Contact, DriverCommand, DriverKind, FusionKind, ToolType, TouchFrame};

/// Broadcast group carrying driver control traffic.
pub const GROUP_DRIVER: u8 = 0;

/// Broadcast group carrying asynchronous events to fusion subscribers.
pub const GROUP_FUSION: u8 = 1;

pub const GROUP_DRIVER_NAME: &str = "driver";
pub const GROUP_FUSION_NAME: &str = "fusion";
