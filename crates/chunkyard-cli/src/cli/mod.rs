//! Building blocks of the `chunkyard` binary.
//!
//! ## Submodules
//!
//! - [`config`] - clap arguments and their validated configurations.
//! - [`command`] - the external-program [`chunkyard::Assigner`].
//! - [`handler`] - the `plan`, `status` and `run` subcommands.
//! - [`telemetry`] - console logging and optional OpenTelemetry export.
//!
//! These are wired together in the binary's `main.rs`.

pub mod command;
pub mod config;
pub mod handler;
pub mod telemetry;
