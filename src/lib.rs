// Library root — exposes internals for integration tests and future crate consumers.
// The binary entry point is src/main.rs.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod embed;
pub mod engine;
pub mod error;
pub mod kg;
