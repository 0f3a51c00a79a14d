//! In-memory accelerator that counts live resources and fails on request

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::gpu::{Accelerator, DeviceSelector, WorkSize};
use crate::models::DeviceInfo;
use crate::{CgrbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    SelectDevice,
    BuildProgram,
    AllocateBuffers,
    Dispatch,
    ReadBack,
}

/// Handle that stays counted in `live` until dropped
#[derive(Debug)]
pub struct MockResource {
    live: Arc<AtomicUsize>,
}

impl MockResource {
    fn new(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            live: Arc::clone(live),
        }
    }
}

impl Drop for MockResource {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn mock_device_info() -> DeviceInfo {
    DeviceInfo {
        index: 0,
        name: "Mock Accelerator".to_string(),
        backend: "Mock".to_string(),
        device_type: "VirtualGpu".to_string(),
        driver: "mock".to_string(),
        max_invocations_per_workgroup: 1024,
        max_workgroups_per_dimension: 65535,
    }
}

#[derive(Debug, Default)]
pub struct MockAccelerator {
    pub live: Arc<AtomicUsize>,
    pub fail_at: Option<FailAt>,
    pub launch_time: Duration,
    /// Iteration count of every dispatch, in order
    pub dispatched: Vec<u32>,
}

impl MockAccelerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(stage: FailAt) -> Self {
        Self {
            fail_at: Some(stage),
            ..Self::default()
        }
    }

    pub fn with_launch_time(mut self, launch_time: Duration) -> Self {
        self.launch_time = launch_time;
        self
    }

    pub fn live_resources(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn check(&self, stage: FailAt) -> Result<()> {
        if self.fail_at != Some(stage) {
            return Ok(());
        }
        Err(match stage {
            FailAt::SelectDevice => CgrbError::NoDeviceFound("mock has no device".to_string()),
            FailAt::BuildProgram => CgrbError::KernelBuildFailed("mock build error".to_string()),
            FailAt::AllocateBuffers => {
                CgrbError::AllocationFailed("mock out of memory".to_string())
            }
            FailAt::Dispatch | FailAt::ReadBack => {
                CgrbError::ExecutionFailed("mock device lost".to_string())
            }
        })
    }
}

impl Accelerator for MockAccelerator {
    type Device = MockResource;
    type Program = MockResource;
    type Buffers = MockResource;

    fn select_device(&mut self, selector: &DeviceSelector) -> Result<(MockResource, DeviceInfo)> {
        self.check(FailAt::SelectDevice)?;
        if let Some(index) = selector.index {
            if index > 0 {
                return Err(CgrbError::NoDeviceFound(format!(
                    "index {} out of range, available: {}",
                    index,
                    mock_device_info()
                )));
            }
        }
        Ok((MockResource::new(&self.live), mock_device_info()))
    }

    fn build_program(&mut self, _device: &MockResource, _local_size: u32) -> Result<MockResource> {
        self.check(FailAt::BuildProgram)?;
        Ok(MockResource::new(&self.live))
    }

    fn allocate_buffers(
        &mut self,
        _device: &MockResource,
        _program: &MockResource,
        _work: &WorkSize,
    ) -> Result<MockResource> {
        self.check(FailAt::AllocateBuffers)?;
        Ok(MockResource::new(&self.live))
    }

    fn dispatch(
        &mut self,
        _device: &MockResource,
        _program: &MockResource,
        _buffers: &MockResource,
        _work: &WorkSize,
        iterations: u32,
    ) -> Result<()> {
        self.check(FailAt::Dispatch)?;
        if !self.launch_time.is_zero() {
            std::thread::sleep(self.launch_time);
        }
        self.dispatched.push(iterations);
        Ok(())
    }

    fn read_check_value(&mut self, _device: &MockResource, _buffers: &MockResource) -> Result<f32> {
        self.check(FailAt::ReadBack)?;
        Ok(1.2345)
    }
}
