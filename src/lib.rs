//! Flavorpack - Progressive Secure Package Format (PSPF/2025)
//!
//! This crate provides the two cooperating engines of the format: the
//! builder (manifest -> signed package) and the launcher (signed package ->
//! validated workenv + child process).

// Enforce strict code quality and reliability
#![deny(
    // Safety
    unsafe_code,

    // Correctness
    missing_debug_implementations,
    unreachable_pub,

    // Future compatibility
    future_incompatible,

    // Rust 2018 idioms
    rust_2018_idioms,
)]
#![warn(
    // Error handling best practices
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo,

    // Performance
    clippy::inefficient_to_string,
    clippy::large_enum_variant,

    // Code clarity and maintainability
    clippy::cognitive_complexity,
    clippy::type_complexity,

    // Best practices
    clippy::clone_on_ref_ptr,
    clippy::wildcard_imports,
    clippy::enum_glob_use,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::explicit_iter_loop,
    clippy::explicit_into_iter_loop,
)]

pub mod api;
pub mod errors;
pub mod exit_codes;
pub mod logger;
pub mod pspf;
pub mod utils;
pub mod version;

use std::sync::atomic::AtomicU32;

// Re-export main API functions
pub use api::{
    BuildOptions, LaunchOptions, VerifyReport, build_package, launch_package, verify_package,
};
pub use errors::{FlavorError, Result};
pub use utils::get_platform_string;

// Global state for signal forwarding in spawn mode (used by the launcher binary)
pub static CHILD_PID: AtomicU32 = AtomicU32::new(0);
