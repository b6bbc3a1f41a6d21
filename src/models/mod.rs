//! Parsed-data model types: network primitives, BGP messages and
//! attributes, and the MRT container types that wrap them.

pub mod bgp;
pub mod mrt;
pub mod network;

pub use bgp::*;
pub use mrt::*;
pub use network::*;
