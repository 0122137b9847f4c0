//! PSPF/2025 format implementation

pub mod builder;
pub mod checksums;
pub mod cli;
pub mod constants;
pub mod crypto;
pub mod debug;
pub mod extraction;
pub mod index;
pub mod keys;
pub mod launcher;
pub mod locking;
pub mod manifest;
pub mod metadata;
pub mod operations;
pub mod placeholders;
pub mod reader;
pub mod runtime_env;
pub mod slots;
pub mod verifier;
pub mod workenv;

// Re-export main functions
pub use builder::build;
pub use launcher::launch;
pub use verifier::verify;

// Re-export types for advanced usage
pub use index::Index;
pub use manifest::Manifest;
pub use reader::Reader;
pub use slots::SlotDescriptor;
pub use verifier::ValidationLevel;
