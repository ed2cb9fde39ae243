//! StiTouch engine library.
//!
//! Drives an SPI touch-sensor imager: framed chip access in three
//! encodings, the chip bootloader, and a per-device worker bridging the
//! chip to a fusion companion over an attribute message bus.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │   SpiBus (Bus)   StdDelay (DelayNs)   LogReportSink (Reports)  │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │ DeviceHandle ─▶ worker: msg dispatch · irq · suspend   │    │
//! │  │                 └─▶ Transport ─▶ bootloader            │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │  DeviceRegistry (bus channel → device)                         │
//! └────────────────────────────────────────────────────────────────┘
//! ```

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod bootloader;
pub mod chip;
pub mod config;
pub mod crc;
pub mod device;
pub mod error;
pub mod msg;

pub use config::DeviceConfig;
pub use device::{Collaborators, DeviceHandle, DeviceRegistry};
pub use error::{Error, Result};
