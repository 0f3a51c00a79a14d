//! Data models module
//!
//! Contains the result structures returned by the CPU and GPU engines and
//! the rate metric they reduce to.

pub mod result;

// Re-export commonly used types
pub use result::{
    calculate_rate, rates_reproducible, DeviceInfo, GpuResult, Rate, RateMetric, RateUnit,
    SieveResult, SystemInfo,
};
