//! PSPF/2025 operation system
//!
//! Codecs are a closed variant set dispatched on the opcode byte; chains are
//! the 64-bit packed composition of up to eight of them.

pub mod chain;
pub mod operation;

pub use chain::{
    apply_chain, apply_chain_stream, names_to_operations, operations_to_string, pack_operations,
    reverse_chain, reverse_chain_stream, string_to_operations, unpack_operations,
};
pub use operation::Codec;
