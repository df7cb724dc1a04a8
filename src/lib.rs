//! forward - a dual-endpoint HTTP reverse proxy
//!
//! Relays a "portal" and a "backend" upstream, each from its own local
//! port, tracing every request and response to standard output.
//!
//! - `config`: Environment configuration with accumulated validation errors
//! - `bootstrap`: Binding and supervising both proxy instances

pub mod bootstrap;
pub mod config;
