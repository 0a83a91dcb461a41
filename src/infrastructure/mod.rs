//! Infrastructure layer module
//!
//! Process-wide concerns that sit outside the repository ports:
//! - Configuration management
//! - Logging infrastructure

/// Configuration loading.
pub mod config;
/// Logging setup.
pub mod logging;
