//! timetrax packager library.
//!
//! This crate builds the timetrax CLI from a pinned source checkout, stages
//! the executable into an output tree, installs bash, zsh, and fish
//! completion scripts generated by the executable itself, and records a
//! manifest describing the result. It backs the `timetrax-packager` binary
//! and can be driven programmatically from tests or release tooling.
//!
//! # Modules
//!
//! - [`atomic`] - Write-to-temporary-then-rename file replacement
//! - [`builder`] - Reproducible cargo build invocation
//! - [`cli`] - Command-line argument definitions
//! - [`completion`] - Completion script generation and installation
//! - [`config`] - `timetrax-packager.toml` loading
//! - [`digest`] - SHA-256 digests
//! - [`error`] - Semantic error types and exit categories
//! - [`exec`] - External command execution seam
//! - [`lockfile`] - `Cargo.lock` pin checking
//! - [`manifest`] - Output tree manifest
//! - [`output`] - Progress and dry-run output
//! - [`pipeline`] - Package pipeline orchestration
//! - [`resolution`] - Pinned input resolution
//! - [`shell`] - Supported shells and their install paths
//! - [`source`] - Source tree access and identity
//! - [`stager`] - Executable staging
//! - [`target`] - Supported build targets
//! - [`toolchain`] - Toolchain file detection

pub mod atomic;
pub mod builder;
pub mod cli;
pub mod completion;
pub mod config;
pub mod digest;
pub mod error;
pub mod exec;
pub mod lockfile;
pub mod manifest;
pub mod output;
pub mod pipeline;
pub mod resolution;
pub mod shell;
pub mod source;
pub mod stager;
pub mod target;
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
pub mod toolchain;

/// Name of the packaged program and of its binary target.
pub const PROGRAM_NAME: &str = "timetrax";
