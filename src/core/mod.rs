/*!
 * Core Module
 * Shared types, errors, limits, and configuration
 */

pub mod config;
pub mod errors;
pub mod limits;
pub mod types;

pub use config::{HostConfig, PolicyConfig};
pub use errors::{ExtError, LookupKind};
pub use types::*;
