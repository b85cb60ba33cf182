//! Startup helpers: logging and environment loading.

pub mod logger;
