//! Common types, traits, and error definitions for mpc_tracking
//!
//! This module provides the value types exchanged between the transform,
//! fit, model and solver stages of one control tick.

pub mod types;
pub mod traits;
pub mod error;

pub use types::*;
pub use traits::*;
pub use error::*;
