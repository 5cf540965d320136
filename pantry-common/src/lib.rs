//! # Pantry Common Library
//!
//! Shared code for the Pantry client-side engines:
//! - Error types
//! - Config file resolution and TOML loading
//! - Event types (PantryEvent enum) and the EventBus
//! - Tracing initialisation

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
