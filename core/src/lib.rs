//! Core types shared by every Strategy Lab crate.
//!
//! The types here are also the JSON wire format of the HTTP API, so every struct
//! serializes with camelCase field names.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, missing_debug_implementations)]

pub mod error;
pub mod types;

pub use error::SignalParseError;
pub use types::*;
