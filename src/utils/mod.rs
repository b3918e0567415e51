//! Utility modules for common functionality.
//!
//! This module contains shared helpers used throughout the engine,
//! currently logging configuration.

pub mod logger;
