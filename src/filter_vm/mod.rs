//! Bytecode filter VM (SPEC_FULL §4.5): a small stack machine that tests a
//! compiled filter expression against one decoded update message.
//!
//! Grounded stylistically on `parser/filter.rs`'s `Filterable` trait naming
//! and error-handling idiom, but architecturally distinct from it — that
//! filter is a regex match over an already-flattened route record; this one
//! is a bytecode interpreter over a [`crate::codec::message::UpdateCodec`],
//! with its own opcode table, constant pool, and trie-slot bindings.

pub mod image;
pub mod interp;
pub mod opcode;

pub use image::{AccessFn, Constant, Image};
pub use interp::{Interp, MessageView, TrieBank, VmResult};
pub use opcode::{AccessMask, Opcode};
