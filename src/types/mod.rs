//! Shared types for Kura

pub mod error;

pub use error::{KuraError, Result};
