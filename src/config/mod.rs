//! Configuration management module
//!
//! Handles loading, saving, and validation of the CPU and GPU benchmark
//! parameters.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CgrbError, Result, APP_NAME, CONFIG_FILE, DEFAULT_DURATION_SECS};

/// Numbers per chunk handed to a segmented sieve worker
pub const DEFAULT_CHUNK_SIZE: u64 = 1_000_000;
/// Candidates tested between two deadline checks in interleaved mode
pub const DEFAULT_CHECK_INTERVAL: u64 = 4096;
pub const DEFAULT_GLOBAL_WORK_SIZE: u32 = 1 << 20;
pub const DEFAULT_ITERATIONS_PER_ITEM: u32 = 1024;
pub const DEFAULT_LOCAL_WORK_SIZE: u32 = 256;
/// Largest first candidate for the chunked policy. Each worker sieves its
/// own base primes up to the square root of the numbers it reaches, about a
/// megabyte at this bound.
pub const MAX_SIEVE_START: u64 = 1 << 40;

const MAX_DURATION: Duration = Duration::from_secs(24 * 3600);
const MAX_WORKERS: usize = 1024;

/// Complete benchmark configuration for both engines
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Prime counting engine settings
    pub cpu: SieveConfig,
    /// Accelerator kernel settings
    pub gpu: GpuConfig,
    /// Acceptance thresholds applied to finished runs
    pub tolerances: Tolerances,
}

/// How the integer domain is split between sieve workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartitionPolicy {
    /// Worker `i` tests `start + i`, `start + i + n`, ... by trial division
    Interleaved {
        /// Candidates tested between two deadline checks
        check_interval: u64,
    },
    /// Workers pull disjoint `[low, low + chunk_size)` ranges from a shared cursor
    Chunked {
        /// Numbers per range
        chunk_size: u64,
    },
}

impl Default for PartitionPolicy {
    fn default() -> Self {
        PartitionPolicy::Chunked {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl PartitionPolicy {
    /// Human-readable name of the policy
    pub fn description(&self) -> &'static str {
        match self {
            PartitionPolicy::Interleaved { .. } => "interleaved trial division",
            PartitionPolicy::Chunked { .. } => "chunked segmented sieve",
        }
    }
}

/// CPU prime counting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SieveConfig {
    /// Wall-clock run length
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Number of worker threads
    pub worker_count: usize,
    /// First candidate to test
    pub start: u64,
    /// Publish progress updates while running
    pub show_progress: bool,
    /// Work partitioning policy
    pub partition: PartitionPolicy,
}

impl Default for SieveConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(DEFAULT_DURATION_SECS),
            worker_count: num_cpus::get().max(1),
            start: 2,
            show_progress: true,
            partition: PartitionPolicy::default(),
        }
    }
}

impl SieveConfig {
    /// Create a new sieve configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<()> {
        validate_duration(self.duration)?;

        if self.worker_count == 0 {
            return Err(CgrbError::InvalidConfig(
                "Worker count must be greater than 0".to_string(),
            ));
        }
        if self.worker_count > MAX_WORKERS {
            return Err(CgrbError::InvalidConfig(format!(
                "Too many workers: {} (max: {})",
                self.worker_count, MAX_WORKERS
            )));
        }

        match self.partition {
            PartitionPolicy::Interleaved { check_interval } => {
                if check_interval == 0 {
                    return Err(CgrbError::InvalidConfig(
                        "Check interval must be greater than 0".to_string(),
                    ));
                }
            }
            PartitionPolicy::Chunked { chunk_size } => {
                if chunk_size == 0 {
                    return Err(CgrbError::InvalidConfig(
                        "Chunk size must be greater than 0".to_string(),
                    ));
                }
                if chunk_size > 1 << 32 {
                    return Err(CgrbError::InvalidConfig(format!(
                        "Chunk size too large: {}",
                        chunk_size
                    )));
                }
                if self.start > MAX_SIEVE_START {
                    return Err(CgrbError::InvalidConfig(format!(
                        "Start {} too large for the chunked policy (max: {})",
                        self.start, MAX_SIEVE_START
                    )));
                }
            }
        }

        Ok(())
    }

    /// Set the run duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the number of workers
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the first candidate
    pub fn with_start(mut self, start: u64) -> Self {
        self.start = start;
        self
    }

    /// Set the partitioning policy
    pub fn with_partition(mut self, partition: PartitionPolicy) -> Self {
        self.partition = partition;
        self
    }

    /// Enable or disable progress updates
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }
}

/// Adapter preference when no explicit device index is given
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerPreference {
    #[default]
    HighPerformance,
    LowPower,
}

/// GPU kernel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    /// Wall-clock run length of the launch loop
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Adapter index as listed by `cgrb devices`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_index: Option<usize>,
    /// Preference used when `device_index` is unset
    pub power_preference: PowerPreference,
    /// Work-group size, defaults to min(256, device limit)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_work_size: Option<u32>,
    /// Number of work-items per launch, rounded up to the work-group size
    pub global_work_size: u32,
    /// Multiply-add loop iterations per work-item and launch
    pub iterations_per_item: u32,
    /// Rescale iterations after the first launch
    pub auto_tune: bool,
    /// Stop after this many launches even if time remains
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_launches: Option<u64>,
    /// Abort a run that has not finished after this long
    #[serde(with = "option_duration_serde", skip_serializing_if = "Option::is_none")]
    pub watchdog: Option<Duration>,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(DEFAULT_DURATION_SECS),
            device_index: None,
            power_preference: PowerPreference::default(),
            local_work_size: None,
            global_work_size: DEFAULT_GLOBAL_WORK_SIZE,
            iterations_per_item: DEFAULT_ITERATIONS_PER_ITEM,
            auto_tune: true,
            max_launches: None,
            watchdog: None,
        }
    }
}

impl GpuConfig {
    /// Create a new GPU configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<()> {
        validate_duration(self.duration)?;

        if self.global_work_size == 0 {
            return Err(CgrbError::InvalidConfig(
                "Global work size must be greater than 0".to_string(),
            ));
        }
        if self.iterations_per_item == 0 {
            return Err(CgrbError::InvalidConfig(
                "Iterations per item must be greater than 0".to_string(),
            ));
        }
        if let Some(local) = self.local_work_size {
            if local == 0 {
                return Err(CgrbError::InvalidConfig(
                    "Local work size must be greater than 0".to_string(),
                ));
            }
        }
        if self.max_launches == Some(0) {
            return Err(CgrbError::InvalidConfig(
                "Launch limit must be greater than 0".to_string(),
            ));
        }
        if let Some(watchdog) = self.watchdog {
            if watchdog.is_zero() {
                return Err(CgrbError::InvalidConfig(
                    "Watchdog must be greater than 0".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Set the run duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Select an adapter by index
    pub fn with_device_index(mut self, index: usize) -> Self {
        self.device_index = Some(index);
        self
    }

    /// Set the work-group size
    pub fn with_local_work_size(mut self, size: u32) -> Self {
        self.local_work_size = Some(size);
        self
    }

    /// Set the number of work-items
    pub fn with_global_work_size(mut self, size: u32) -> Self {
        self.global_work_size = size;
        self
    }

    /// Set the loop iterations per work-item
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations_per_item = iterations;
        self
    }

    /// Enable or disable iteration tuning
    pub fn with_auto_tune(mut self, enabled: bool) -> Self {
        self.auto_tune = enabled;
        self
    }

    /// Limit the number of launches
    pub fn with_max_launches(mut self, launches: u64) -> Self {
        self.max_launches = Some(launches);
        self
    }

    /// Set the watchdog timeout
    pub fn with_watchdog(mut self, watchdog: Duration) -> Self {
        self.watchdog = Some(watchdog);
        self
    }
}

/// Thresholds used to judge a finished run
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    /// Allowed run time past the deadline, as a fraction of the duration
    pub overshoot: f64,
    /// Allowed relative deviation between repeated rates
    pub reproducibility: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            overshoot: 0.01,
            reproducibility: 0.10,
        }
    }
}

impl Tolerances {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("Overshoot", self.overshoot),
            ("Reproducibility", self.reproducibility),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CgrbError::InvalidConfig(format!(
                    "{} tolerance must be a non-negative number",
                    name
                )));
            }
        }
        Ok(())
    }
}

impl BenchmarkConfig {
    /// Create a new benchmark configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate both engine configurations
    pub fn validate(&self) -> Result<()> {
        self.cpu.validate()?;
        self.gpu.validate()?;
        self.tolerances.validate()
    }

    /// Load configuration from the standard config file location
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, falling back to defaults
    /// when the file does not exist
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            log::debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).map_err(|e| {
            CgrbError::ConfigError(format!(
                "Failed to read config file {}: {}",
                config_path.display(),
                e
            ))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            CgrbError::ConfigError(format!(
                "Failed to parse config file {}: {}",
                config_path.display(),
                e
            ))
        })?;

        config.validate()?;
        log::info!("Loaded configuration from {}", config_path.display());

        Ok(config)
    }

    /// Save configuration to the standard config file location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CgrbError::ConfigError(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let content = toml::to_string_pretty(self)?;

        fs::write(config_path, content).map_err(|e| {
            CgrbError::ConfigError(format!(
                "Failed to write config file {}: {}",
                config_path.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Get the standard configuration file path
    /// Uses $CONFIG_HOME/cgrb/cgrb.toml
    pub fn config_file_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            CgrbError::ConfigError("Unable to determine config directory".to_string())
        })?;

        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }
}

fn validate_duration(duration: Duration) -> Result<()> {
    if duration.is_zero() {
        return Err(CgrbError::InvalidConfig(
            "Duration must be greater than 0".to_string(),
        ));
    }
    if duration > MAX_DURATION {
        return Err(CgrbError::InvalidConfig(format!(
            "Duration too long: {}s (max: {}s)",
            duration.as_secs(),
            MAX_DURATION.as_secs()
        )));
    }
    Ok(())
}

// Durations are written as humantime strings ("2m", "1m 30s")
mod duration_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(D::Error::custom)
    }
}

mod option_duration_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|text| humantime::parse_duration(&text).map_err(D::Error::custom))
            .transpose()
    }
}
