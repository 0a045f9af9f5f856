//! # Control Common
//!
//! Shared types, errors, and constants used across control plane components.
//!
//! ## Modules
//! - `types` - Cluster records, wire inputs/responses, events, agent actions
//! - `error` - Common error types
//! - `constants` - Shared configuration constants

pub mod constants;
pub mod error;
pub mod types;

pub use error::ControlPlaneError;
pub use types::*;
