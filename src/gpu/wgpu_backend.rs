//! wgpu implementation of [`Accelerator`]

use std::borrow::Cow;

use wgpu::util::DeviceExt;

use crate::config::PowerPreference;
use crate::gpu::kernel::{kernel_source, KernelParams};
use crate::gpu::{Accelerator, DeviceSelector, WorkSize};
use crate::models::DeviceInfo;
use crate::{CgrbError, Result};

/// Bytes per output element (one `f32` per work-item)
const OUTPUT_ELEMENT_SIZE: u64 = std::mem::size_of::<f32>() as u64;

pub struct WgpuAccelerator {
    instance: wgpu::Instance,
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    limits: wgpu::Limits,
}

pub struct WgpuProgram {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

pub struct WgpuBuffers {
    params: wgpu::Buffer,
    output: wgpu::Buffer,
    readback: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl Drop for WgpuBuffers {
    fn drop(&mut self) {
        self.readback.destroy();
        self.output.destroy();
        self.params.destroy();
    }
}

impl WgpuAccelerator {
    pub fn new() -> Self {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        Self { instance }
    }

    fn adapters(&self) -> Vec<wgpu::Adapter> {
        self.instance.enumerate_adapters(wgpu::Backends::all())
    }

    /// Describe every adapter in enumeration order
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.adapters()
            .iter()
            .enumerate()
            .map(|(index, adapter)| describe(index, adapter))
            .collect()
    }

    fn pick_adapter(&self, selector: &DeviceSelector) -> Result<(usize, wgpu::Adapter)> {
        let adapters = self.adapters();
        if adapters.is_empty() {
            return Err(CgrbError::NoDeviceFound(
                "no adapter reported by any graphics backend".to_string(),
            ));
        }

        if let Some(index) = selector.index {
            let available = adapters
                .iter()
                .enumerate()
                .map(|(i, adapter)| describe(i, adapter).to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return adapters
                .into_iter()
                .enumerate()
                .nth(index)
                .ok_or_else(|| {
                    CgrbError::NoDeviceFound(format!(
                        "device index {} out of range, available: {}",
                        index, available
                    ))
                });
        }

        let device_types: Vec<wgpu::DeviceType> = adapters
            .iter()
            .map(|adapter| adapter.get_info().device_type)
            .collect();
        let index = preferred_index(&device_types, selector.power_preference).ok_or_else(|| {
            CgrbError::NoDeviceFound("no adapter matches the power preference".to_string())
        })?;
        adapters
            .into_iter()
            .nth(index)
            .map(|adapter| (index, adapter))
            .ok_or_else(|| CgrbError::NoDeviceFound(format!("adapter {} disappeared", index)))
    }
}

/// Lower is better
fn preference_rank(device_type: wgpu::DeviceType, preference: PowerPreference) -> u8 {
    use wgpu::DeviceType;

    match (preference, device_type) {
        (PowerPreference::HighPerformance, DeviceType::DiscreteGpu) => 0,
        (PowerPreference::HighPerformance, DeviceType::IntegratedGpu) => 1,
        (PowerPreference::LowPower, DeviceType::IntegratedGpu) => 0,
        (PowerPreference::LowPower, DeviceType::DiscreteGpu) => 1,
        (_, DeviceType::VirtualGpu) => 2,
        (_, DeviceType::Other) => 3,
        (_, DeviceType::Cpu) => 4,
    }
}

/// Enumeration index of the best adapter for `preference`; ties go to the first
fn preferred_index(
    device_types: &[wgpu::DeviceType],
    preference: PowerPreference,
) -> Option<usize> {
    device_types
        .iter()
        .enumerate()
        .min_by_key(|(_, device_type)| preference_rank(**device_type, preference))
        .map(|(index, _)| index)
}

impl Default for WgpuAccelerator {
    fn default() -> Self {
        Self::new()
    }
}

fn describe(index: usize, adapter: &wgpu::Adapter) -> DeviceInfo {
    let info = adapter.get_info();
    let limits = adapter.limits();
    DeviceInfo {
        index,
        name: info.name,
        backend: format!("{:?}", info.backend),
        device_type: format!("{:?}", info.device_type),
        driver: format!("{} {}", info.driver, info.driver_info)
            .trim()
            .to_string(),
        max_invocations_per_workgroup: limits
            .max_compute_invocations_per_workgroup
            .min(limits.max_compute_workgroup_size_x),
        max_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
    }
}

impl Accelerator for WgpuAccelerator {
    type Device = WgpuDevice;
    type Program = WgpuProgram;
    type Buffers = WgpuBuffers;

    fn select_device(&mut self, selector: &DeviceSelector) -> Result<(WgpuDevice, DeviceInfo)> {
        let (index, adapter) = self.pick_adapter(selector)?;
        let info = describe(index, &adapter);
        let limits = adapter.limits();

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("cgrb compute device"),
                required_features: wgpu::Features::empty(),
                required_limits: limits.clone(),
            },
            None,
        ))
        .map_err(|e| CgrbError::NoDeviceFound(format!("{}: {}", info.name, e)))?;

        device.on_uncaptured_error(Box::new(|error| {
            log::error!("Uncaptured GPU error: {}", error);
        }));

        Ok((
            WgpuDevice {
                device,
                queue,
                limits,
            },
            info,
        ))
    }

    fn build_program(&mut self, device: &WgpuDevice, local_size: u32) -> Result<WgpuProgram> {
        let device_handle = &device.device;
        device_handle.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device_handle.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("FMA Kernel"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(kernel_source(local_size))),
        });

        let bind_group_layout =
            device_handle.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("FMA Bind Group Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: false },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let pipeline_layout =
            device_handle.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("FMA Pipeline Layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let pipeline = device_handle.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("FMA Pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: "main",
        });

        if let Some(error) = pollster::block_on(device_handle.pop_error_scope()) {
            return Err(CgrbError::KernelBuildFailed(error.to_string()));
        }
        log::debug!("Built FMA kernel with work-group size {}", local_size);

        Ok(WgpuProgram {
            pipeline,
            bind_group_layout,
        })
    }

    fn allocate_buffers(
        &mut self,
        device: &WgpuDevice,
        program: &WgpuProgram,
        work: &WorkSize,
    ) -> Result<WgpuBuffers> {
        let output_size = work.global as u64 * OUTPUT_ELEMENT_SIZE;
        let max_binding = device.limits.max_storage_buffer_binding_size as u64;
        if output_size > max_binding || output_size > device.limits.max_buffer_size {
            return Err(CgrbError::AllocationFailed(format!(
                "output buffer of {} bytes exceeds the device limit of {} bytes",
                output_size,
                max_binding.min(device.limits.max_buffer_size)
            )));
        }

        let device_handle = &device.device;
        device_handle.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device_handle.push_error_scope(wgpu::ErrorFilter::Validation);

        let params = device_handle.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("FMA Params"),
            contents: bytemuck::bytes_of(&KernelParams::new(0)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let output = device_handle.create_buffer(&wgpu::BufferDescriptor {
            label: Some("FMA Output"),
            size: output_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let readback = device_handle.create_buffer(&wgpu::BufferDescriptor {
            label: Some("FMA Readback"),
            size: OUTPUT_ELEMENT_SIZE,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let bind_group = device_handle.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("FMA Bind Group"),
            layout: &program.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: output.as_entire_binding(),
                },
            ],
        });

        let validation = pollster::block_on(device_handle.pop_error_scope());
        let out_of_memory = pollster::block_on(device_handle.pop_error_scope());
        let buffers = WgpuBuffers {
            params,
            output,
            readback,
            bind_group,
        };
        if let Some(error) = out_of_memory.or(validation) {
            return Err(CgrbError::AllocationFailed(error.to_string()));
        }
        log::debug!("Allocated {} byte output buffer", output_size);

        Ok(buffers)
    }

    fn dispatch(
        &mut self,
        device: &WgpuDevice,
        program: &WgpuProgram,
        buffers: &WgpuBuffers,
        work: &WorkSize,
        iterations: u32,
    ) -> Result<()> {
        device.queue.write_buffer(
            &buffers.params,
            0,
            bytemuck::bytes_of(&KernelParams::new(iterations)),
        );

        let device_handle = &device.device;
        device_handle.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder = device_handle.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("FMA Launch"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("FMA Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &buffers.bind_group, &[]);
            pass.dispatch_workgroups(work.workgroups(), 1, 1);
        }
        let submission = device.queue.submit(std::iter::once(encoder.finish()));

        if let Some(error) = pollster::block_on(device_handle.pop_error_scope()) {
            return Err(CgrbError::ExecutionFailed(error.to_string()));
        }

        device_handle.poll(wgpu::Maintain::WaitForSubmissionIndex(submission));
        Ok(())
    }

    fn read_check_value(&mut self, device: &WgpuDevice, buffers: &WgpuBuffers) -> Result<f32> {
        let mut encoder = device
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("FMA Readback"),
            });
        encoder.copy_buffer_to_buffer(
            &buffers.output,
            0,
            &buffers.readback,
            0,
            OUTPUT_ELEMENT_SIZE,
        );
        device.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = buffers.readback.slice(..);
        let (tx, rx) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            if tx.send(result).is_err() {
                log::error!("Readback receiver dropped before the map completed");
            }
        });
        device.device.poll(wgpu::Maintain::Wait);

        match pollster::block_on(rx) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(CgrbError::ExecutionFailed(format!("readback failed: {}", e))),
            Err(_) => {
                return Err(CgrbError::ExecutionFailed(
                    "readback callback never ran".to_string(),
                ))
            }
        }

        let value = {
            let data = buffer_slice.get_mapped_range();
            bytemuck::try_cast_slice::<u8, f32>(&data)
                .ok()
                .and_then(|values| values.first().copied())
        };
        buffers.readback.unmap();

        value.ok_or_else(|| CgrbError::ExecutionFailed("readback buffer is empty".to_string()))
    }
}
