//! CGRB - Compute Rust Bench
//!
//! Measures raw compute throughput of a host: a multi-core prime counting
//! workload for the CPU and a fused multiply-add kernel for the GPU.

use std::fmt;

pub mod bench;
pub mod cli;
pub mod config;
pub mod driver;
pub mod gpu;
pub mod models;
pub mod util;

// Common error types
#[derive(Debug)]
pub enum CgrbError {
    /// I/O operation failed
    IoError(std::io::Error),
    /// Configuration file could not be read, parsed or written
    ConfigError(String),
    /// Configuration values rejected before any work started
    InvalidConfig(String),
    /// A running sieve worker could not continue
    WorkerFailure {
        /// Index of the failing worker
        worker: usize,
        /// What went wrong
        reason: String,
    },
    /// The CPU benchmark run was aborted
    BenchmarkFailed(String),
    /// No usable compute device
    NoDeviceFound(String),
    /// Compute kernel failed to compile or link
    KernelBuildFailed(String),
    /// Device buffer allocation failed
    AllocationFailed(String),
    /// Kernel dispatch or execution failed
    ExecutionFailed(String),
}

impl fmt::Display for CgrbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CgrbError::IoError(err) => write!(f, "I/O error: {}", err),
            CgrbError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            CgrbError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            CgrbError::WorkerFailure { worker, reason } => {
                write!(f, "Worker {} failed: {}", worker, reason)
            }
            CgrbError::BenchmarkFailed(msg) => write!(f, "Benchmark failed: {}", msg),
            CgrbError::NoDeviceFound(msg) => write!(f, "No compute device found: {}", msg),
            CgrbError::KernelBuildFailed(msg) => write!(f, "Kernel build failed: {}", msg),
            CgrbError::AllocationFailed(msg) => write!(f, "Buffer allocation failed: {}", msg),
            CgrbError::ExecutionFailed(msg) => write!(f, "Kernel execution failed: {}", msg),
        }
    }
}

impl std::error::Error for CgrbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CgrbError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CgrbError {
    fn from(err: std::io::Error) -> Self {
        CgrbError::IoError(err)
    }
}

impl From<serde_json::Error> for CgrbError {
    fn from(err: serde_json::Error) -> Self {
        CgrbError::ConfigError(format!("JSON serialization error: {}", err))
    }
}

impl From<toml::de::Error> for CgrbError {
    fn from(err: toml::de::Error) -> Self {
        CgrbError::ConfigError(format!("TOML parsing error: {}", err))
    }
}

impl From<toml::ser::Error> for CgrbError {
    fn from(err: toml::ser::Error) -> Self {
        CgrbError::ConfigError(format!("TOML serialization error: {}", err))
    }
}

/// Result type alias for CGRB operations
pub type Result<T> = std::result::Result<T, CgrbError>;

/// Error presentation helpers for the driver
pub mod error {
    use super::CgrbError;

    /// Whether the error belongs to the GPU path
    pub fn is_device_error(error: &CgrbError) -> bool {
        matches!(
            error,
            CgrbError::NoDeviceFound(_)
                | CgrbError::KernelBuildFailed(_)
                | CgrbError::AllocationFailed(_)
                | CgrbError::ExecutionFailed(_)
        )
    }

    /// Convert error to user-friendly message
    pub fn user_friendly_message(error: &CgrbError) -> String {
        match error {
            CgrbError::InvalidConfig(msg) => {
                format!("Invalid settings: {}. Nothing was run.", msg)
            }
            CgrbError::ConfigError(msg) => {
                format!("Configuration error: {}. Check your config file.", msg)
            }
            CgrbError::WorkerFailure { worker, reason } => {
                format!("CPU worker {} stopped: {}", worker, reason)
            }
            CgrbError::BenchmarkFailed(msg) => {
                format!("CPU benchmark aborted, no rate was recorded: {}", msg)
            }
            CgrbError::NoDeviceFound(_) => {
                "No usable GPU was found. Check that GPU drivers are installed.".to_string()
            }
            CgrbError::KernelBuildFailed(_) => {
                "The GPU rejected the benchmark kernel.".to_string()
            }
            CgrbError::AllocationFailed(_) => {
                "The GPU could not allocate the benchmark buffers.".to_string()
            }
            CgrbError::ExecutionFailed(_) => {
                "The GPU kernel did not run to completion.".to_string()
            }
            _ => error.to_string(),
        }
    }

    /// Suggest what the user can change before running again
    pub fn suggestion(error: &CgrbError) -> Option<String> {
        match error {
            CgrbError::NoDeviceFound(_) => Some(
                "Run `cgrb devices` to list adapters, then pick one with --device.".to_string(),
            ),
            CgrbError::KernelBuildFailed(_) => Some(
                "Try a smaller work-group size with --local.".to_string(),
            ),
            CgrbError::AllocationFailed(_) => Some(
                "Reduce the global work size with --global.".to_string(),
            ),
            CgrbError::ExecutionFailed(_) => Some(
                "Reduce --iterations or disable auto tuning with --no-auto-tune.".to_string(),
            ),
            CgrbError::BenchmarkFailed(_) | CgrbError::WorkerFailure { .. } => Some(
                "Lower the starting candidate or the worker count.".to_string(),
            ),
            _ => None,
        }
    }
}

// Common types and constants
pub const APP_NAME: &str = "cgrb";
pub const CONFIG_FILE: &str = "cgrb.toml";
/// Default run length of either engine
pub const DEFAULT_DURATION_SECS: u64 = 120;
