//! pg-kaboom Library
//!
//! Chaos weapons for PostgreSQL: a gated registry of destructive operations
//! plus the command layer that announces (dry-run) or runs them.
//! The binary entry point is in main.rs.

pub mod arsenal;
pub mod cluster;
pub mod command;
pub mod config;
pub mod disk;
pub mod error;
pub mod host;
pub mod launcher;
pub mod paths;
pub mod payload;
pub mod reporter;
pub mod restart;
pub mod safety;
pub mod statement;
pub mod target;

pub use arsenal::{arsenal, Kaboom};
pub use error::{KaboomError, Result};
