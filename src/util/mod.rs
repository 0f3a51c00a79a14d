//! Utility functions module
//!
//! Contains helper functions for units formatting and duration parsing.

pub mod units;

// Re-export commonly used functions
pub use units::{
    format_count, format_duration, format_flops, format_prime_rate, format_si, parse_duration,
};
