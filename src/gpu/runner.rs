//! Timed kernel launch loop

use std::time::Instant;

use chrono::Utc;

use crate::bench::{Deadline, StopSignal};
use crate::config::GpuConfig;
use crate::gpu::context::DeviceContext;
use crate::gpu::kernel::{flop_count, tune_iterations};
use crate::gpu::{Accelerator, DeviceSelector, WorkSize};
use crate::models::GpuResult;
use crate::{CgrbError, Result};

/// Runs the FMA kernel on one accelerator for a configured duration
pub struct KernelRunner<A: Accelerator> {
    accelerator: A,
    config: GpuConfig,
}

impl<A: Accelerator> KernelRunner<A> {
    /// Create a runner, rejecting invalid settings before touching a device
    pub fn new(accelerator: A, config: GpuConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            accelerator,
            config,
        })
    }

    pub fn accelerator(&self) -> &A {
        &self.accelerator
    }

    /// Run every lifecycle stage; resources are released on success and failure
    pub fn run(&mut self, stop: &StopSignal) -> Result<GpuResult> {
        let mut context = DeviceContext::<A>::new();

        match self.run_stages(&mut context, stop) {
            Ok(result) => {
                context.release();
                log::info!("{}", result.summary());
                Ok(result)
            }
            Err(e) => {
                log::error!("GPU benchmark failed: {}", e);
                context.fail();
                Err(e)
            }
        }
    }

    fn run_stages(
        &mut self,
        context: &mut DeviceContext<A>,
        stop: &StopSignal,
    ) -> Result<GpuResult> {
        let selector = DeviceSelector::from_config(&self.config);
        let (device, info) = self.accelerator.select_device(&selector)?;
        log::info!("Selected device {}", info);
        context.attach_device(device, info)?;

        let work = WorkSize::resolve(&self.config, context.device_info()?)?;
        log::info!(
            "Work size: {} items, {} per group, {} groups",
            work.global,
            work.local,
            work.workgroups()
        );

        let program = self.accelerator.build_program(context.device()?, work.local)?;
        context.attach_program(program)?;

        let buffers =
            self.accelerator
                .allocate_buffers(context.device()?, context.program()?, &work)?;
        context.attach_buffers(buffers, work)?;

        context.mark_dispatched()?;
        let deadline = Deadline::start(self.config.duration)?;
        let mut iterations = self.config.iterations_per_item;
        let mut launches = 0u64;
        let mut total_flop_count = 0u64;

        loop {
            let launch_start = Instant::now();
            self.accelerator.dispatch(
                context.device()?,
                context.program()?,
                context.buffers()?,
                &work,
                iterations,
            )?;
            let launch_time = launch_start.elapsed();

            launches += 1;
            total_flop_count = total_flop_count
                .checked_add(flop_count(work.global, iterations)?)
                .ok_or_else(|| {
                    CgrbError::ExecutionFailed("operation counter overflowed".to_string())
                })?;
            log::debug!(
                "Launch {}: {} iterations in {:?}",
                launches,
                iterations,
                launch_time
            );

            if launches == 1 && self.config.auto_tune {
                let tuned = tune_iterations(iterations, launch_time);
                if tuned != iterations {
                    log::info!(
                        "Tuned iterations per item from {} to {} (first launch took {:?})",
                        iterations,
                        tuned,
                        launch_time
                    );
                    iterations = tuned;
                }
            }

            if deadline.expired()
                || stop.is_stopped()
                || self.config.max_launches.is_some_and(|max| launches >= max)
            {
                break;
            }
        }
        let elapsed_time = deadline.elapsed();

        let check_value = self
            .accelerator
            .read_check_value(context.device()?, context.buffers()?)?;
        context.mark_completed()?;

        let elapsed_secs = elapsed_time.as_secs_f64();
        let rate_gflops = if elapsed_secs > 0.0 {
            total_flop_count as f64 / elapsed_secs / 1e9
        } else {
            0.0
        };

        Ok(GpuResult {
            timestamp: Utc::now(),
            device: context.device_info()?.clone(),
            global_work_size: work.global,
            local_work_size: work.local,
            iterations_per_item: iterations,
            launches,
            total_flop_count,
            elapsed_time,
            rate_gflops,
            check_value,
            interrupted: stop.is_stopped(),
        })
    }
}
