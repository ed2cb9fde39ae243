//! Chip access: the byte bus port and the framed transport built on it.
//!
//! ```text
//! ┌──────────────┐ read/write ┌──────────────┐ frames ┌──────────┐
//! │ Worker / BL  │───────────▶│  Transport   │───────▶│   Bus    │
//! └──────────────┘  (words)   └──────────────┘  (BE)  └──────────┘
//! ```

pub mod bus;
pub mod transport;

pub use bus::{Bus, BusError};
pub use transport::{ChipAccess, Encoding, RawAccess, Transport};
