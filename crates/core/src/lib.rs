//! Core utilities shared by every renderer crate.
//!
//! - [`Error`] / [`Result`] for configuration and I/O failures
//! - [`init_logging`] for the `tracing` subscriber
//! - [`Timer`] for the shader time uniform and frame pacing
//! - [`config`] for the TOML-backed [`RendererConfig`]

pub mod config;
mod error;
mod logging;
mod timer;

pub use config::RendererConfig;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;
