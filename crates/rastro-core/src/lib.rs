//! # Rastro Core
//! Shared error type, configuration, domain records and collaborator traits.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::RastroConfig;
pub use error::{RastroError, Result};
