//! courier-core — message model, wire format, and configuration.

pub mod config;
pub mod message;
pub mod wire;
