//! parley configuration system.
//!
//! Provides TOML-based configuration for the signaling server and client
//! with full validation. All sections use sensible defaults so partial
//! configs work out of the box.

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{
    ClientConfig, IceServerConfig, LogLevel, LoggingConfig, ParleyConfig, ServerConfig,
    CONFIG_SCHEMA_VERSION,
};
pub use toml_loader::{load_default, load_from_path};
