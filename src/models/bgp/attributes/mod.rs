//! BGP attribute structs
mod aspath;

pub use aspath::*;
