//! Shared types for the NumGate virtual-number platform
//!
//! Provider configuration records (endpoint templates, response mappings,
//! pricing and webhook settings) and the canonical models every provider
//! response is normalized into.

pub mod types;

pub use types::*;
