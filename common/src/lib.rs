//! FXQL Common Types
//!
//! This crate contains shared types used across the FXQL gateway,
//! including identifiers, quote types and the error taxonomy.

pub mod identifiers;
pub mod quote;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use quote::*;
pub use error::*;
pub use time::*;
