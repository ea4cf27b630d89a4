//! Core types shared by the morph IR, the mutation engine and the CLI.

pub mod config;
pub mod error;

pub use config::*;
pub use error::{Error, Result};
