//! Domain types and the ports the settlement engine depends on.

pub mod message;
pub mod ports;
pub mod transaction;
pub mod wallet;
