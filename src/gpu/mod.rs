//! GPU benchmark engine
//!
//! The runner drives any [`Accelerator`] through a fixed lifecycle:
//! select a device, build the kernel, allocate buffers, launch until the
//! deadline, read back a check value and release everything in reverse.

pub mod context;
pub mod kernel;
pub mod runner;
pub mod wgpu_backend;

#[cfg(test)]
pub(crate) mod testing;

use crate::bench::StopSignal;
use crate::config::{GpuConfig, PowerPreference, DEFAULT_LOCAL_WORK_SIZE};
use crate::models::{DeviceInfo, GpuResult};
use crate::{CgrbError, Result};

// Re-export commonly used types
pub use context::{DeviceContext, LifecycleState};
pub use runner::KernelRunner;
pub use wgpu_backend::WgpuAccelerator;

/// Which adapter to run on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSelector {
    /// Explicit adapter index, takes precedence over the preference
    pub index: Option<usize>,
    pub power_preference: PowerPreference,
}

impl DeviceSelector {
    pub fn from_config(config: &GpuConfig) -> Self {
        Self {
            index: config.device_index,
            power_preference: config.power_preference,
        }
    }
}

/// Resolved launch geometry for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSize {
    /// Work-items per launch, a multiple of `local`
    pub global: u32,
    /// Work-group size
    pub local: u32,
}

impl WorkSize {
    /// Fit the configured sizes to the limits of `device`
    pub fn resolve(config: &GpuConfig, device: &DeviceInfo) -> Result<Self> {
        let max_local = device.max_invocations_per_workgroup;
        let local = match config.local_work_size {
            Some(local) if local > max_local => {
                return Err(CgrbError::InvalidConfig(format!(
                    "Work-group size {} exceeds the device limit of {}",
                    local, max_local
                )));
            }
            Some(local) => local,
            None => DEFAULT_LOCAL_WORK_SIZE.min(max_local).max(1),
        };

        let global = config
            .global_work_size
            .checked_next_multiple_of(local)
            .ok_or_else(|| {
                CgrbError::InvalidConfig(format!(
                    "Global work size {} cannot be rounded up to a multiple of {}",
                    config.global_work_size, local
                ))
            })?;

        let work = Self { global, local };
        if work.workgroups() > device.max_workgroups_per_dimension {
            return Err(CgrbError::InvalidConfig(format!(
                "{} work-groups exceed the device limit of {} per dimension",
                work.workgroups(),
                device.max_workgroups_per_dimension
            )));
        }
        Ok(work)
    }

    /// Number of work-groups dispatched per launch
    pub fn workgroups(&self) -> u32 {
        self.global / self.local
    }
}

/// Compute backend driven by [`KernelRunner`].
///
/// Each associated type owns its device resources and frees them on drop.
pub trait Accelerator {
    type Device;
    type Program;
    type Buffers;

    /// Open the selected adapter
    fn select_device(&mut self, selector: &DeviceSelector) -> Result<(Self::Device, DeviceInfo)>;

    /// Compile the kernel for the given work-group size
    fn build_program(&mut self, device: &Self::Device, local_size: u32) -> Result<Self::Program>;

    /// Allocate the output, parameter and readback buffers
    fn allocate_buffers(
        &mut self,
        device: &Self::Device,
        program: &Self::Program,
        work: &WorkSize,
    ) -> Result<Self::Buffers>;

    /// Submit one launch and block until the device has finished it
    fn dispatch(
        &mut self,
        device: &Self::Device,
        program: &Self::Program,
        buffers: &Self::Buffers,
        work: &WorkSize,
        iterations: u32,
    ) -> Result<()>;

    /// Copy the first output element back to the host
    fn read_check_value(&mut self, device: &Self::Device, buffers: &Self::Buffers) -> Result<f32>;
}

/// List every adapter the graphics backends report
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    Ok(WgpuAccelerator::new().devices())
}

/// Run the FMA kernel benchmark on a wgpu adapter, blocking the caller
pub fn run_accelerator_benchmark(config: &GpuConfig, stop: &StopSignal) -> Result<GpuResult> {
    let mut runner = KernelRunner::new(WgpuAccelerator::new(), config.clone())?;
    runner.run(stop)
}
