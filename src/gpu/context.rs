//! Accelerator lifecycle state and the resources held at each stage

use std::fmt;

use crate::gpu::{Accelerator, WorkSize};
use crate::models::DeviceInfo;
use crate::{CgrbError, Result};

/// Stages of one accelerator run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Uninitialized,
    DeviceSelected,
    ProgramBuilt,
    BuffersAllocated,
    Dispatched,
    Completed,
    Failed,
}

impl LifecycleState {
    /// Whether `next` directly follows this state
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        match (self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Uninitialized, DeviceSelected)
            | (DeviceSelected, ProgramBuilt)
            | (ProgramBuilt, BuffersAllocated)
            | (BuffersAllocated, Dispatched)
            | (Dispatched, Completed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Completed | LifecycleState::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::DeviceSelected => "device selected",
            LifecycleState::ProgramBuilt => "program built",
            LifecycleState::BuffersAllocated => "buffers allocated",
            LifecycleState::Dispatched => "dispatched",
            LifecycleState::Completed => "completed",
            LifecycleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Device resources of one run, owned exclusively by the runner.
///
/// Resources are dropped buffers first, then program, then device, both on
/// [`release`](Self::release) and when the context is dropped on an error
/// path. Releasing consumes the context.
pub struct DeviceContext<A: Accelerator> {
    state: LifecycleState,
    device: Option<A::Device>,
    device_info: Option<DeviceInfo>,
    program: Option<A::Program>,
    buffers: Option<A::Buffers>,
    work_size: Option<WorkSize>,
}

impl<A: Accelerator> DeviceContext<A> {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            device: None,
            device_info: None,
            program: None,
            buffers: None,
            work_size: None,
        }
    }

    /// Get the current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    fn transition_to(&mut self, next: LifecycleState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(CgrbError::ExecutionFailed(format!(
                "invalid accelerator transition from {} to {}",
                self.state, next
            )));
        }
        log::debug!("Accelerator state: {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    pub fn attach_device(&mut self, device: A::Device, info: DeviceInfo) -> Result<()> {
        self.transition_to(LifecycleState::DeviceSelected)?;
        self.device = Some(device);
        self.device_info = Some(info);
        Ok(())
    }

    pub fn attach_program(&mut self, program: A::Program) -> Result<()> {
        self.transition_to(LifecycleState::ProgramBuilt)?;
        self.program = Some(program);
        Ok(())
    }

    pub fn attach_buffers(&mut self, buffers: A::Buffers, work_size: WorkSize) -> Result<()> {
        self.transition_to(LifecycleState::BuffersAllocated)?;
        self.buffers = Some(buffers);
        self.work_size = Some(work_size);
        Ok(())
    }

    pub fn mark_dispatched(&mut self) -> Result<()> {
        self.transition_to(LifecycleState::Dispatched)
    }

    pub fn mark_completed(&mut self) -> Result<()> {
        self.transition_to(LifecycleState::Completed)
    }

    pub fn device(&self) -> Result<&A::Device> {
        self.device.as_ref().ok_or_else(|| self.missing("device"))
    }

    pub fn device_info(&self) -> Result<&DeviceInfo> {
        self.device_info.as_ref().ok_or_else(|| self.missing("device"))
    }

    pub fn program(&self) -> Result<&A::Program> {
        self.program.as_ref().ok_or_else(|| self.missing("program"))
    }

    pub fn buffers(&self) -> Result<&A::Buffers> {
        self.buffers.as_ref().ok_or_else(|| self.missing("buffers"))
    }

    pub fn work_size(&self) -> Result<WorkSize> {
        self.work_size.ok_or_else(|| self.missing("work size"))
    }

    fn missing(&self, what: &str) -> CgrbError {
        CgrbError::ExecutionFailed(format!("no {} in state {}", what, self.state))
    }

    /// Mark the run as failed and free everything acquired so far
    pub fn fail(mut self) {
        log::warn!("Accelerator run failed in state {}", self.state);
        self.state = LifecycleState::Failed;
        self.release_resources();
    }

    /// Free all resources at the end of a run
    pub fn release(mut self) {
        self.release_resources();
    }

    fn release_resources(&mut self) {
        drop(self.buffers.take());
        drop(self.program.take());
        drop(self.device.take());
    }
}

impl<A: Accelerator> Default for DeviceContext<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Accelerator> Drop for DeviceContext<A> {
    fn drop(&mut self) {
        self.release_resources();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::testing::{mock_device_info, MockAccelerator};
    use crate::gpu::{Accelerator, DeviceSelector};
    use crate::config::PowerPreference;

    const WORK: WorkSize = WorkSize {
        global: 1024,
        local: 256,
    };

    fn selector() -> DeviceSelector {
        DeviceSelector {
            index: None,
            power_preference: PowerPreference::HighPerformance,
        }
    }

    fn fully_allocated(mock: &mut MockAccelerator) -> DeviceContext<MockAccelerator> {
        let mut context = DeviceContext::<MockAccelerator>::new();
        let (device, info) = mock.select_device(&selector()).unwrap();
        context.attach_device(device, info).unwrap();
        let program = mock.build_program(context.device().unwrap(), 256).unwrap();
        context.attach_program(program).unwrap();
        let buffers = mock
            .allocate_buffers(context.device().unwrap(), context.program().unwrap(), &WORK)
            .unwrap();
        context.attach_buffers(buffers, WORK).unwrap();
        context
    }

    #[test]
    fn test_linear_transitions() {
        use LifecycleState::*;

        let order = [
            Uninitialized,
            DeviceSelected,
            ProgramBuilt,
            BuffersAllocated,
            Dispatched,
            Completed,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]));
            assert!(!pair[1].can_transition_to(pair[0]));
        }
        assert!(!Uninitialized.can_transition_to(ProgramBuilt));
        assert!(!DeviceSelected.can_transition_to(Dispatched));
    }

    #[test]
    fn test_failed_reachable_until_terminal() {
        use LifecycleState::*;

        for state in [Uninitialized, DeviceSelected, ProgramBuilt, BuffersAllocated, Dispatched] {
            assert!(state.can_transition_to(Failed));
            assert!(!state.is_terminal());
        }
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Uninitialized));
        assert!(Completed.is_terminal());
    }

    #[test]
    fn test_out_of_order_attach_rejected() {
        let mut mock = MockAccelerator::new();
        let mut context = DeviceContext::<MockAccelerator>::new();
        let (device, _) = mock.select_device(&selector()).unwrap();
        let program = mock.build_program(&device, 64).unwrap();

        assert!(context.attach_program(program).is_err());
        assert_eq!(context.state(), LifecycleState::Uninitialized);
        assert!(context.device().is_err());
    }

    #[test]
    fn test_release_frees_everything() {
        let mut mock = MockAccelerator::new();
        let mut context = fully_allocated(&mut mock);
        assert_eq!(mock.live_resources(), 3);
        assert_eq!(context.work_size().unwrap(), WORK);
        assert_eq!(context.device_info().unwrap(), &mock_device_info());

        context.mark_dispatched().unwrap();
        context.mark_completed().unwrap();
        assert_eq!(context.state(), LifecycleState::Completed);
        context.release();
        assert_eq!(mock.live_resources(), 0);
    }

    #[test]
    fn test_fail_and_drop_free_everything() {
        let mut mock = MockAccelerator::new();
        let context = fully_allocated(&mut mock);
        context.fail();
        assert_eq!(mock.live_resources(), 0);

        let context = fully_allocated(&mut mock);
        assert_eq!(mock.live_resources(), 3);
        drop(context);
        assert_eq!(mock.live_resources(), 0);
    }
}
