//! Benchmark result data models
//!
//! Contains the structures returned by both engines, the scalar rate they
//! reduce to, and the host/device metadata attached to them.

use crate::config::PartitionPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Unit of a benchmark rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateUnit {
    /// Primes found per second
    PrimesPerSecond,
    /// Billions of floating point operations per second
    GigaFlops,
}

impl RateUnit {
    pub fn symbol(&self) -> &'static str {
        match self {
            RateUnit::PrimesPerSecond => "primes/s",
            RateUnit::GigaFlops => "GFLOPS",
        }
    }
}

/// Scalar rate metric of a single run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    pub value: f64,
    pub unit: RateUnit,
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.value, self.unit.symbol())
    }
}

/// Anything that reduces to one comparable rate
pub trait RateMetric {
    fn rate(&self) -> Rate;
}

/// Aggregate result of a CPU prime counting run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SieveResult {
    /// Timestamp when the benchmark was executed
    pub timestamp: DateTime<Utc>,
    /// Number of workers that ran
    pub worker_count: usize,
    /// Partitioning policy used
    pub partition: PartitionPolicy,
    /// Sum of all worker counts
    pub total_primes_found: u64,
    /// Sum of all candidates examined
    pub candidates_tested: u64,
    /// Primes found by each worker, indexed by worker id
    pub per_worker_primes: Vec<u64>,
    /// Configured run length
    #[serde(with = "duration_serde")]
    pub nominal_duration: Duration,
    /// Start of the run until every worker was joined
    #[serde(with = "duration_serde")]
    pub elapsed_time: Duration,
    /// Primes per second
    pub rate: f64,
    /// Run was stopped early by the user
    pub interrupted: bool,
    /// Host information at time of benchmark
    pub system_info: SystemInfo,
}

impl SieveResult {
    /// Build a result from joined worker counts
    pub fn new(
        worker_count: usize,
        partition: PartitionPolicy,
        per_worker_primes: Vec<u64>,
        candidates_tested: u64,
        nominal_duration: Duration,
        elapsed_time: Duration,
    ) -> Self {
        let total_primes_found = per_worker_primes.iter().sum();
        Self {
            timestamp: Utc::now(),
            worker_count,
            partition,
            total_primes_found,
            candidates_tested,
            per_worker_primes,
            nominal_duration,
            elapsed_time,
            rate: calculate_rate(total_primes_found, elapsed_time),
            interrupted: false,
            system_info: SystemInfo::detect(),
        }
    }

    /// Rate divided by the number of workers
    pub fn rate_per_core(&self) -> f64 {
        if self.worker_count > 0 {
            self.rate / self.worker_count as f64
        } else {
            0.0
        }
    }

    /// Time spent past the configured duration
    pub fn overshoot(&self) -> Duration {
        self.elapsed_time.saturating_sub(self.nominal_duration)
    }

    /// Check the overshoot against a fraction of the nominal duration
    pub fn within_overshoot(&self, tolerance: f64) -> bool {
        self.overshoot().as_secs_f64() <= self.nominal_duration.as_secs_f64() * tolerance
    }

    /// Get a human-readable summary of the result
    pub fn summary(&self) -> String {
        format!(
            "{} - CPU {} workers - {} primes in {:.1}s - {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.worker_count,
            self.total_primes_found,
            self.elapsed_time.as_secs_f64(),
            self.rate()
        )
    }
}

impl RateMetric for SieveResult {
    fn rate(&self) -> Rate {
        Rate {
            value: self.rate,
            unit: RateUnit::PrimesPerSecond,
        }
    }
}

/// Compute device description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Position in the adapter list
    pub index: usize,
    pub name: String,
    /// Graphics API backend (Vulkan, Metal, Dx12, ...)
    pub backend: String,
    /// Discrete, integrated, virtual, CPU
    pub device_type: String,
    pub driver: String,
    pub max_invocations_per_workgroup: u32,
    pub max_workgroups_per_dimension: u32,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({}, {})",
            self.index, self.name, self.device_type, self.backend
        )
    }
}

/// Result of an accelerator kernel run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuResult {
    /// Timestamp when the benchmark was executed
    pub timestamp: DateTime<Utc>,
    /// Device the kernel ran on
    pub device: DeviceInfo,
    /// Work-items per launch
    pub global_work_size: u32,
    /// Work-group size
    pub local_work_size: u32,
    /// Iterations per work-item of the last launch
    pub iterations_per_item: u32,
    /// Completed kernel launches
    pub launches: u64,
    /// Counted floating point operations over all launches
    pub total_flop_count: u64,
    /// First dispatch until last completion
    #[serde(with = "duration_serde")]
    pub elapsed_time: Duration,
    /// Billions of operations per second
    pub rate_gflops: f64,
    /// First output element, read back after the run
    pub check_value: f32,
    /// Run was stopped early by the user
    pub interrupted: bool,
}

impl GpuResult {
    /// Get a human-readable summary of the result
    pub fn summary(&self) -> String {
        format!(
            "{} - GPU {} - {} launches in {:.1}s - {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.device.name,
            self.launches,
            self.elapsed_time.as_secs_f64(),
            self.rate()
        )
    }
}

impl RateMetric for GpuResult {
    fn rate(&self) -> Rate {
        Rate {
            value: self.rate_gflops,
            unit: RateUnit::GigaFlops,
        }
    }
}

/// Operations per second, zero for an empty interval
pub fn calculate_rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// Check that repeated runs agree within `tolerance` of their mean rate
pub fn rates_reproducible<R: RateMetric>(results: &[R], tolerance: f64) -> bool {
    if results.len() < 2 {
        return true;
    }

    let rates: Vec<f64> = results.iter().map(|r| r.rate().value).collect();
    let mean = rates.iter().sum::<f64>() / rates.len() as f64;
    if mean <= 0.0 {
        return rates.iter().all(|&r| r == 0.0);
    }

    rates
        .iter()
        .map(|&r| ((r - mean) / mean).abs())
        .fold(0.0, f64::max)
        <= tolerance
}

/// Host information captured at benchmark time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Operating system and architecture
    pub os: String,
    /// CPU model name
    pub cpu: String,
    pub logical_cores: usize,
    pub physical_cores: usize,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            cpu: detect_cpu(),
            logical_cores: num_cpus::get(),
            physical_cores: num_cpus::get_physical(),
        }
    }
}

impl SystemInfo {
    /// Create system info by detecting current system
    pub fn detect() -> Self {
        Self::default()
    }
}

fn detect_cpu() -> String {
    #[cfg(target_os = "linux")]
    {
        if let Ok(cpuinfo) = std::fs::read_to_string("/proc/cpuinfo") {
            let model = cpuinfo
                .lines()
                .find(|line| line.starts_with("model name"))
                .and_then(|line| line.split(':').nth(1))
                .map(|name| name.trim().to_string());
            if let Some(model) = model {
                return model;
            }
        }
    }
    "Unknown CPU".to_string()
}

// Durations are stored as integer nanoseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_nanos() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_sieve_result(primes: Vec<u64>, elapsed: Duration) -> SieveResult {
        SieveResult::new(
            primes.len(),
            PartitionPolicy::default(),
            primes,
            1_000_000,
            Duration::from_secs(10),
            elapsed,
        )
    }

    fn create_test_device() -> DeviceInfo {
        DeviceInfo {
            index: 0,
            name: "Test Adapter".to_string(),
            backend: "Vulkan".to_string(),
            device_type: "DiscreteGpu".to_string(),
            driver: "test".to_string(),
            max_invocations_per_workgroup: 1024,
            max_workgroups_per_dimension: 65535,
        }
    }

    fn create_test_gpu_result(rate_gflops: f64) -> GpuResult {
        GpuResult {
            timestamp: Utc::now(),
            device: create_test_device(),
            global_work_size: 1 << 20,
            local_work_size: 256,
            iterations_per_item: 1024,
            launches: 10,
            total_flop_count: 171_798_691_840,
            elapsed_time: Duration::from_secs(2),
            rate_gflops,
            check_value: 1.0,
            interrupted: false,
        }
    }

    #[test]
    fn test_sieve_result_aggregates_workers() {
        let result = create_test_sieve_result(vec![100, 200, 300, 400], Duration::from_secs(10));
        assert_eq!(result.total_primes_found, 1000);
        assert_eq!(result.worker_count, 4);
        assert!((result.rate - 100.0).abs() < 1e-9);
        assert!((result.rate_per_core() - 25.0).abs() < 1e-9);
        assert_eq!(result.rate().unit, RateUnit::PrimesPerSecond);
    }

    #[test]
    fn test_sieve_result_overshoot() {
        let result = create_test_sieve_result(vec![1], Duration::from_millis(10_050));
        assert_eq!(result.overshoot(), Duration::from_millis(50));
        assert!(result.within_overshoot(0.01));
        assert!(!result.within_overshoot(0.001));

        let early = create_test_sieve_result(vec![1], Duration::from_secs(5));
        assert_eq!(early.overshoot(), Duration::ZERO);
    }

    #[test]
    fn test_zero_elapsed_rate() {
        assert_eq!(calculate_rate(1000, Duration::ZERO), 0.0);
        assert!((calculate_rate(500, Duration::from_millis(500)) - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_rates_reproducible() {
        let consistent = vec![
            create_test_gpu_result(100.0),
            create_test_gpu_result(104.0),
            create_test_gpu_result(97.0),
        ];
        assert!(rates_reproducible(&consistent, 0.10));
        assert!(!rates_reproducible(&consistent, 0.01));

        let inconsistent = vec![create_test_gpu_result(100.0), create_test_gpu_result(150.0)];
        assert!(!rates_reproducible(&inconsistent, 0.10));

        assert!(rates_reproducible(&[create_test_gpu_result(1.0)], 0.0));
    }

    #[test]
    fn test_rate_display() {
        let rate = create_test_gpu_result(123.456).rate();
        assert_eq!(rate.to_string(), "123.46 GFLOPS");
    }

    #[test]
    fn test_summaries() {
        let sieve = create_test_sieve_result(vec![5, 5], Duration::from_secs(10));
        assert!(sieve.summary().contains("primes/s"));
        assert!(sieve.summary().contains("2 workers"));

        let gpu = create_test_gpu_result(50.0);
        assert!(gpu.summary().contains("Test Adapter"));
        assert!(gpu.summary().contains("GFLOPS"));
    }

    #[test]
    fn test_system_info_detection() {
        let system_info = SystemInfo::detect();
        assert!(!system_info.os.is_empty());
        assert!(!system_info.cpu.is_empty());
        assert!(system_info.logical_cores >= 1);
    }

    #[test]
    fn test_serde_serialization() {
        let result = create_test_sieve_result(vec![10, 20], Duration::from_millis(1500));
        let json = serde_json::to_string(&result).expect("Failed to serialize to JSON");
        let deserialized: SieveResult =
            serde_json::from_str(&json).expect("Failed to deserialize from JSON");

        assert_eq!(deserialized.total_primes_found, 30);
        assert_eq!(deserialized.elapsed_time, Duration::from_millis(1500));
        assert_eq!(deserialized.per_worker_primes, vec![10, 20]);
        assert_eq!(result.timestamp, deserialized.timestamp);

        let gpu = create_test_gpu_result(10.0);
        let json = serde_json::to_string(&gpu).unwrap();
        let deserialized: GpuResult = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.device, gpu.device);
        assert_eq!(deserialized.total_flop_count, gpu.total_flop_count);
    }
}
