//! Medic library crate
//!
//! Watches a supervised worker's error log, locates the crashing function,
//! asks a patch service for a replacement and applies it behind a safety
//! gate. The binary in `main.rs` wires these pieces into the run loop.

pub mod apply;
pub mod client;
pub mod config;
pub mod extract;
pub mod locate;
pub mod pipeline;
pub mod preview;
pub mod safety;
pub mod supervisor;
pub mod tail;
pub mod util;
