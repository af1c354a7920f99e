//! FXQL Protocol Messages
//!
//! Transport-agnostic request and response types for the FXQL gateway,
//! and the mapping from pipeline errors to response envelopes.

pub mod messages;

pub use messages::*;
