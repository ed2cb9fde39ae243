//! Engine boundary: collaborator ports and status events.
//!
//! Everything platform-specific (pins, regulators, sockets, the input
//! layer) sits behind the traits in [`ports`]; the engine reports
//! lifecycle milestones through [`events`].

pub mod events;
pub mod ports;
