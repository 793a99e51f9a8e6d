//! Shared types, errors, and configuration for Tally.
//!
//! This crate provides common types used across all other crates:
//! - `Amount`, a decimal money type (never floating point)
//! - Typed IDs for refunds, payment entries and return requests
//! - Pagination types for the refund listing
//! - Transport-level error type
//! - Configuration management

pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, LedgerBackend, LedgerConfig};
pub use error::{AppError, AppResult};
