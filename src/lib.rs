//! WebChat Bridge library
//!
//! Exposes modules for the binary and integration tests

pub mod cli;
pub mod config;
pub mod errors;
pub mod fixture;
pub mod metrics;
pub mod parsers;
pub mod prompt;
pub mod server;

pub use config::BridgeConfig;
pub use errors::ApiError;
pub use fixture::{FixtureBook, FixtureSurface};
