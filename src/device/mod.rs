//! Per-device engine.
//!
//! - [`link`]: state shared with other contexts (queue, wake, flags)
//! - [`worker`]: the event loop and command dispatch
//! - [`irq`]: interrupt bridge and sensing control
//! - [`report`]: touch-report translation
//! - [`registry`]: channel id → device routing
//! - [`handle`]: attach/detach and power management

pub mod handle;
pub mod irq;
pub mod link;
pub mod registry;
mod report;
pub mod worker;

pub use handle::DeviceHandle;
pub use irq::{BufferSelect, IrqParams, MAX_IRQ_PARAMS, select_buffer};
pub use link::DeviceLink;
pub use registry::{DeviceRegistry, MAX_DEVICES};
pub use worker::{Collaborators, Destination, Device};
