//! Benchmark driver
//!
//! Runs the selected engines with a validated configuration, shows progress,
//! enforces the GPU watchdog and collects results with their tolerance
//! warnings. Nothing here touches engine internals.

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::bench::{run_sieve_benchmark, AggregatedProgress, StopSignal};
use crate::config::{BenchmarkConfig, GpuConfig};
use crate::gpu::run_accelerator_benchmark;
use crate::models::{rates_reproducible, GpuResult, SieveResult};
use crate::util::{format_count, format_duration, format_flops, format_prime_rate};
use crate::{error, CgrbError, Result};

/// Which engines a run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineSelection {
    Cpu,
    Gpu,
    All,
}

impl EngineSelection {
    fn includes_cpu(&self) -> bool {
        matches!(self, EngineSelection::Cpu | EngineSelection::All)
    }

    fn includes_gpu(&self) -> bool {
        matches!(self, EngineSelection::Gpu | EngineSelection::All)
    }
}

/// Everything one invocation produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub cpu: Vec<SieveResult>,
    pub gpu: Vec<GpuResult>,
    /// Why the GPU part was skipped when running both engines
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_error: Option<String>,
    /// Tolerance checks that did not pass
    pub warnings: Vec<String>,
}

/// Runs the kernel engine once on a blocking thread
pub type GpuEngine = fn(&GpuConfig, &StopSignal) -> Result<GpuResult>;

/// Length of the progress bar in steps
const PROGRESS_STEPS: u64 = 1000;

/// Orchestrates engine runs for the command line
pub struct Driver {
    config: BenchmarkConfig,
    stop: StopSignal,
    repeat: usize,
    gpu_engine: GpuEngine,
}

impl Driver {
    /// Create a driver, rejecting invalid settings before any engine starts
    pub fn new(config: BenchmarkConfig, repeat: usize) -> Result<Self> {
        config.validate()?;
        if repeat == 0 {
            return Err(CgrbError::InvalidConfig(
                "Repeat count must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            config,
            stop: StopSignal::new(),
            repeat,
            gpu_engine: run_accelerator_benchmark,
        })
    }

    /// Replace the kernel engine, e.g. with a different accelerator backend
    pub fn with_gpu_engine(mut self, engine: GpuEngine) -> Self {
        self.gpu_engine = engine;
        self
    }

    /// Signal shared with every engine run of this driver
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Stop the running engines when Ctrl+C is pressed
    pub fn install_ctrl_c_handler(&self) {
        let stop = self.stop_signal();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted, finishing the current batch");
                stop.stop();
            }
        });
    }

    /// Run the selected engines `repeat` times each
    pub async fn run(&self, selection: EngineSelection) -> Result<RunReport> {
        let mut report = RunReport::default();

        if selection.includes_cpu() {
            for run in 0..self.repeat {
                if self.stop.is_stopped() {
                    break;
                }
                log::info!("CPU run {}/{}", run + 1, self.repeat);
                let result = self.run_cpu().await?;
                if !result.within_overshoot(self.config.tolerances.overshoot) {
                    report.warnings.push(format!(
                        "CPU run overshot its deadline by {}",
                        format_duration(result.overshoot())
                    ));
                }
                report.cpu.push(result);
            }
            if !rates_reproducible(&report.cpu, self.config.tolerances.reproducibility) {
                report.warnings.push(format!(
                    "CPU rates differ by more than {:.0}% between runs",
                    self.config.tolerances.reproducibility * 100.0
                ));
            }
        }

        if selection.includes_gpu() {
            for run in 0..self.repeat {
                if self.stop.is_stopped() {
                    break;
                }
                log::info!("GPU run {}/{}", run + 1, self.repeat);
                match self.run_gpu().await {
                    Ok(result) => report.gpu.push(result),
                    // A missing or broken GPU does not discard the CPU results
                    Err(e) if selection == EngineSelection::All && error::is_device_error(&e) => {
                        log::warn!("Skipping GPU benchmark: {}", e);
                        report.gpu_error = Some(e.to_string());
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            if !rates_reproducible(&report.gpu, self.config.tolerances.reproducibility) {
                report.warnings.push(format!(
                    "GPU rates differ by more than {:.0}% between runs",
                    self.config.tolerances.reproducibility * 100.0
                ));
            }
        }

        for warning in &report.warnings {
            log::warn!("{}", warning);
        }

        Ok(report)
    }

    /// Run the prime counting engine once
    pub async fn run_cpu(&self) -> Result<SieveResult> {
        let config = &self.config.cpu;
        if !config.show_progress {
            return run_sieve_benchmark(config, &self.stop, None).await;
        }

        let (progress_tx, progress_rx) = mpsc::channel(100);
        let progress = tokio::spawn(show_progress(progress_rx));
        let result = run_sieve_benchmark(config, &self.stop, Some(progress_tx)).await;
        progress.await.ok();
        result
    }

    /// Run the kernel engine once on a blocking thread, bounded by the watchdog
    pub async fn run_gpu(&self) -> Result<GpuResult> {
        let config = self.config.gpu.clone();
        let stop = self.stop_signal();
        let engine = self.gpu_engine;
        let handle = tokio::task::spawn_blocking(move || engine(&config, &stop));

        let joined = match self.config.gpu.watchdog {
            Some(watchdog) => match tokio::time::timeout(watchdog, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    // The launch loop exits after its current launch
                    self.stop.stop();
                    return Err(CgrbError::ExecutionFailed(format!(
                        "watchdog expired after {}",
                        format_duration(watchdog)
                    )));
                }
            },
            None => handle.await,
        };

        joined.map_err(|e| CgrbError::ExecutionFailed(format!("GPU task failed: {}", e)))?
    }
}

async fn show_progress(mut progress_rx: mpsc::Receiver<AggregatedProgress>) {
    let pb = ProgressBar::new(PROGRESS_STEPS);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {msg}")
    {
        pb.set_style(style);
    }

    while let Some(progress) = progress_rx.recv().await {
        pb.set_position((progress.completion_percentage() * PROGRESS_STEPS as f64) as u64);
        pb.set_message(format!(
            "{} primes, {}",
            format_count(progress.total_primes_found),
            format_prime_rate(progress.rate)
        ));
    }
    pb.finish_and_clear();
}

/// Plain text rendering of a report
pub fn format_report(report: &RunReport) -> String {
    let mut lines = Vec::new();

    for (i, result) in report.cpu.iter().enumerate() {
        lines.push(format!("CPU run {}", i + 1));
        lines.push(format!(
            "  Workers:          {} ({})",
            result.worker_count,
            result.partition.description()
        ));
        lines.push(format!(
            "  Primes found:     {}",
            format_count(result.total_primes_found)
        ));
        lines.push(format!(
            "  Elapsed:          {}",
            format_duration(result.elapsed_time)
        ));
        lines.push(format!("  Rate:             {}", format_prime_rate(result.rate)));
        lines.push(format!(
            "  Rate per core:    {}",
            format_prime_rate(result.rate_per_core())
        ));
        if result.interrupted {
            lines.push("  (interrupted)".to_string());
        }
    }

    for (i, result) in report.gpu.iter().enumerate() {
        lines.push(format!("GPU run {}", i + 1));
        lines.push(format!("  Device:           {}", result.device));
        lines.push(format!(
            "  Work size:        {} x {} ({} iterations)",
            result.global_work_size, result.local_work_size, result.iterations_per_item
        ));
        lines.push(format!(
            "  Launches:         {} in {}",
            result.launches,
            format_duration(result.elapsed_time)
        ));
        lines.push(format!("  Throughput:       {}", format_flops(result.rate_gflops)));
        lines.push(format!("  Check value:      {}", result.check_value));
        if result.interrupted {
            lines.push("  (interrupted)".to_string());
        }
    }

    if let Some(gpu_error) = &report.gpu_error {
        lines.push(format!("GPU skipped: {}", gpu_error));
    }
    for warning in &report.warnings {
        lines.push(format!("Warning: {}", warning));
    }

    lines.join("\n")
}
