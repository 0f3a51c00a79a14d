//! Command line interface
//!
//! ```bash
//! cgrb cpu --duration 30s --workers 8
//! cgrb gpu --device 1 --launches 1
//! cgrb all --duration 2m --json
//! cgrb devices
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{
    BenchmarkConfig, GpuConfig, PartitionPolicy, PowerPreference, SieveConfig,
    DEFAULT_CHECK_INTERVAL, DEFAULT_CHUNK_SIZE,
};
use crate::util::parse_duration;

/// CPU and GPU compute throughput benchmark
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "cgrb")]
#[command(version)]
#[command(about = "Measure prime counting throughput on the CPU and FMA throughput on the GPU")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file, defaults to the user config directory
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Count primes on all CPU cores
    Cpu(CpuArgs),

    /// Run the multiply-add kernel on a GPU
    Gpu(GpuArgs),

    /// Run the CPU benchmark, then the GPU benchmark
    All(AllArgs),

    /// List compute adapters
    Devices,
}

/// Options shared by every benchmark command
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct RunArgs {
    /// Run length per engine (e.g. 30s, 2m)
    #[arg(short, long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Run each benchmark this many times and check the rates agree
    #[arg(long, default_value_t = 1)]
    pub repeat: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    /// Trial division over interleaved candidates
    Interleaved,
    /// Segmented sieve over shared chunks
    Chunked,
}

/// Prime counting options
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct SieveArgs {
    /// Number of worker threads (default: logical cores)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Work partitioning policy
    #[arg(long, value_enum)]
    pub policy: Option<PolicyArg>,

    /// Numbers per chunk for the chunked policy
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Candidates between deadline checks for the interleaved policy
    #[arg(long)]
    pub check_interval: Option<u64>,

    /// First candidate
    #[arg(long)]
    pub start: Option<u64>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Kernel options
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct KernelArgs {
    /// Adapter index from `cgrb devices`
    #[arg(long)]
    pub device: Option<usize>,

    /// Prefer a low power adapter when no index is given
    #[arg(long)]
    pub low_power: bool,

    /// Work-group size
    #[arg(long)]
    pub local: Option<u32>,

    /// Work-items per launch
    #[arg(long)]
    pub global: Option<u32>,

    /// Multiply-add loop iterations per work-item
    #[arg(long)]
    pub iterations: Option<u32>,

    /// Keep the iteration count fixed
    #[arg(long)]
    pub no_auto_tune: bool,

    /// Stop after this many launches (1 for a single timed launch)
    #[arg(long)]
    pub launches: Option<u64>,

    /// Abort a GPU run that takes longer than this
    #[arg(long, value_parser = parse_duration)]
    pub watchdog: Option<Duration>,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct CpuArgs {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(flatten)]
    pub sieve: SieveArgs,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct GpuArgs {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(flatten)]
    pub kernel: KernelArgs,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct AllArgs {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(flatten)]
    pub sieve: SieveArgs,
    #[command(flatten)]
    pub kernel: KernelArgs,
}

impl SieveArgs {
    /// Overlay the given flags on a loaded configuration
    pub fn apply(&self, mut config: SieveConfig) -> SieveConfig {
        if let Some(workers) = self.workers {
            config = config.with_worker_count(workers);
        }
        if let Some(start) = self.start {
            config = config.with_start(start);
        }
        if self.no_progress {
            config = config.with_progress(false);
        }

        let policy = match self.policy {
            Some(policy) => Some(policy),
            None if self.chunk_size.is_some() => Some(PolicyArg::Chunked),
            None if self.check_interval.is_some() => Some(PolicyArg::Interleaved),
            None => None,
        };
        match policy {
            Some(PolicyArg::Chunked) => {
                let chunk_size = self.chunk_size.unwrap_or(match config.partition {
                    PartitionPolicy::Chunked { chunk_size } => chunk_size,
                    PartitionPolicy::Interleaved { .. } => DEFAULT_CHUNK_SIZE,
                });
                config.with_partition(PartitionPolicy::Chunked { chunk_size })
            }
            Some(PolicyArg::Interleaved) => {
                let check_interval = self.check_interval.unwrap_or(match config.partition {
                    PartitionPolicy::Interleaved { check_interval } => check_interval,
                    PartitionPolicy::Chunked { .. } => DEFAULT_CHECK_INTERVAL,
                });
                config.with_partition(PartitionPolicy::Interleaved { check_interval })
            }
            None => config,
        }
    }
}

impl KernelArgs {
    /// Overlay the given flags on a loaded configuration
    pub fn apply(&self, mut config: GpuConfig) -> GpuConfig {
        if let Some(device) = self.device {
            config = config.with_device_index(device);
        }
        if self.low_power {
            config.power_preference = PowerPreference::LowPower;
        }
        if let Some(local) = self.local {
            config = config.with_local_work_size(local);
        }
        if let Some(global) = self.global {
            config = config.with_global_work_size(global);
        }
        if let Some(iterations) = self.iterations {
            config = config.with_iterations(iterations);
        }
        if self.no_auto_tune {
            config = config.with_auto_tune(false);
        }
        if let Some(launches) = self.launches {
            config = config.with_max_launches(launches);
        }
        if let Some(watchdog) = self.watchdog {
            config = config.with_watchdog(watchdog);
        }
        config
    }
}

impl RunArgs {
    /// Apply the run length to both engines
    pub fn apply(&self, mut config: BenchmarkConfig) -> BenchmarkConfig {
        if let Some(duration) = self.duration {
            config.cpu = config.cpu.with_duration(duration);
            config.gpu = config.gpu.with_duration(duration);
        }
        config
    }
}

impl Command {
    /// Merge command flags into the loaded configuration
    pub fn apply(&self, mut config: BenchmarkConfig) -> BenchmarkConfig {
        match self {
            Command::Cpu(args) => {
                config = args.run.apply(config);
                config.cpu = args.sieve.apply(config.cpu);
            }
            Command::Gpu(args) => {
                config = args.run.apply(config);
                config.gpu = args.kernel.apply(config.gpu);
            }
            Command::All(args) => {
                config = args.run.apply(config);
                config.cpu = args.sieve.apply(config.cpu);
                config.gpu = args.kernel.apply(config.gpu);
            }
            Command::Devices => {}
        }
        config
    }

    /// Number of runs per engine
    pub fn repeat(&self) -> usize {
        match self {
            Command::Cpu(args) => args.run.repeat,
            Command::Gpu(args) => args.run.repeat,
            Command::All(args) => args.run.repeat,
            Command::Devices => 0,
        }
    }
}

/// Parse CLI arguments from an iterator (for testing)
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_command() {
        let cli = parse_args([
            "cgrb",
            "cpu",
            "--duration",
            "30s",
            "--workers",
            "4",
            "--policy",
            "interleaved",
        ])
        .unwrap();

        match &cli.command {
            Command::Cpu(args) => {
                assert_eq!(args.run.duration, Some(Duration::from_secs(30)));
                assert_eq!(args.sieve.workers, Some(4));
                assert_eq!(args.sieve.policy, Some(PolicyArg::Interleaved));
            }
            _ => panic!("Expected Cpu command"),
        }

        let config = cli.command.apply(BenchmarkConfig::default());
        assert_eq!(config.cpu.duration, Duration::from_secs(30));
        assert_eq!(config.cpu.worker_count, 4);
        assert_eq!(
            config.cpu.partition,
            PartitionPolicy::Interleaved {
                check_interval: DEFAULT_CHECK_INTERVAL
            }
        );
    }

    #[test]
    fn test_chunk_size_implies_chunked() {
        let cli = parse_args(["cgrb", "cpu", "--chunk-size", "5000"]).unwrap();
        let config = cli.command.apply(BenchmarkConfig::default());
        assert_eq!(
            config.cpu.partition,
            PartitionPolicy::Chunked { chunk_size: 5000 }
        );
    }

    #[test]
    fn test_parse_gpu_command() {
        let cli = parse_args([
            "cgrb",
            "gpu",
            "--device",
            "1",
            "--local",
            "128",
            "--global",
            "65536",
            "--iterations",
            "64",
            "--no-auto-tune",
            "--launches",
            "1",
            "--watchdog",
            "5m",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);

        let config = cli.command.apply(BenchmarkConfig::default());
        assert_eq!(config.gpu.device_index, Some(1));
        assert_eq!(config.gpu.local_work_size, Some(128));
        assert_eq!(config.gpu.global_work_size, 65536);
        assert_eq!(config.gpu.iterations_per_item, 64);
        assert!(!config.gpu.auto_tune);
        assert_eq!(config.gpu.max_launches, Some(1));
        assert_eq!(config.gpu.watchdog, Some(Duration::from_secs(300)));
        // CPU settings are untouched by the gpu command
        assert_eq!(config.cpu.duration, Duration::from_secs(120));
    }

    #[test]
    fn test_all_applies_duration_to_both() {
        let cli = parse_args(["cgrb", "all", "-d", "2m", "--repeat", "3"]).unwrap();
        assert_eq!(cli.command.repeat(), 3);
        let config = cli.command.apply(BenchmarkConfig::default());
        assert_eq!(config.cpu.duration, Duration::from_secs(120));
        assert_eq!(config.gpu.duration, Duration::from_secs(120));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse_args(["cgrb", "devices", "--config", "bench.toml", "-v"]).unwrap();
        assert_eq!(cli.command, Command::Devices);
        assert_eq!(cli.config, Some(PathBuf::from("bench.toml")));
        assert!(cli.verbose);
    }

    #[test]
    fn test_invalid_arguments_rejected() {
        assert!(parse_args(["cgrb"]).is_err());
        assert!(parse_args(["cgrb", "cpu", "--duration", "soon"]).is_err());
        assert!(parse_args(["cgrb", "cpu", "--duration", "0s"]).is_err());
        assert!(parse_args(["cgrb", "cpu", "--policy", "random"]).is_err());
        assert!(parse_args(["cgrb", "gpu", "--workers", "2"]).is_err());
    }
}
