//! Core of the long-polling echo bot.
//!
//! This crate is intentionally framework-agnostic. The messaging endpoint lives
//! behind the [`ports::Transport`] port, implemented in adapter crates.

pub mod config;
pub mod cursor;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod handler;
pub mod logging;
pub mod outbox;
pub mod poll;
pub mod ports;

pub use errors::{Error, Result};
