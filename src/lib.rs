//! Device pairing and projection-state synchronization for fabrication
//! tables (mesas).
//!
//! The crate carries both halves of the protocol: the actix-web service that
//! owns pairing sessions, per-mesa work queues, and the calibration push
//! channel, and the client controllers a paired display device runs against
//! it.

pub mod client;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod geometry;
pub mod inbound;
pub mod push;
pub mod registry;
pub mod test_support;
