//! # Spindle Common Library
//!
//! Shared code for the Spindle pipeline services including:
//! - Error type used by every database and configuration call
//! - TOML configuration loading and root folder resolution
//! - SQLite initialization (pipeline tables + default settings)
//! - Pipeline event types and the broadcast EventBus

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
