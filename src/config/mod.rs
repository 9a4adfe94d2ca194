//! Configuration management
//!
//! Node settings are read from an optional TOML file and then overridden by
//! environment variables, so several nodes can run side by side on one host.

pub mod settings;

pub use settings::NodeConfig;
