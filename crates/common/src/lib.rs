//! QADash Common Library
//!
//! Shared data model and error types for the QADash run-view engine.

pub mod error;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;

/// QADash version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
