//! Adapters: concrete implementations of the engine's port traits.
//!
//! | Adapter    | Implements   | Connects to                       |
//! |------------|--------------|-----------------------------------|
//! | `spi`      | Bus          | any `embedded_hal` `SpiDevice`    |
//! | `delay`    | DelayNs      | `std::thread::sleep`              |
//! | `log_sink` | ReportSink   | log output (bring-up, headless)   |

pub mod delay;
pub mod log_sink;
pub mod spi;
