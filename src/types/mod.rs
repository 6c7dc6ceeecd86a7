//! Core types for steward.

pub mod content;
pub mod generation;
pub mod usage;

pub use content::*;
pub use generation::*;
pub use usage::*;
