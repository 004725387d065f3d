//! Configuration loading and hot reload.

pub mod toml_config;
