//! FMA throughput kernel: WGSL source, launch parameters and operation
//! accounting.

use std::time::Duration;

use bytemuck::{Pod, Zeroable};

use crate::{CgrbError, Result};

/// Unrolled multiply-adds per loop iteration in the kernel body
pub const FMA_PER_ITERATION: u64 = 8;
/// A fused multiply-add counts as a multiply plus an add
pub const FLOPS_PER_FMA: u64 = 2;

/// Launches faster than this get more iterations
pub const TUNE_MIN_LAUNCH: Duration = Duration::from_millis(50);
/// Launches slower than this get half the iterations
pub const TUNE_MAX_LAUNCH: Duration = Duration::from_millis(600);
/// Launch time the upward rescale aims for
pub const TUNE_TARGET_LAUNCH: Duration = Duration::from_millis(200);
/// Largest single upward rescale
pub const TUNE_MAX_FACTOR: u64 = 64;

const KERNEL_TEMPLATE: &str = r#"
struct Params {
    iterations: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read_write> output: array<f32>;

@compute @workgroup_size({{WORKGROUP_SIZE}})
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let index = gid.x;
    var x: f32 = f32(index & 0xFFFFu) + 1.2345;
    let y: f32 = 1.000001;
    let c: f32 = 1.0000001;

    for (var i: u32 = 0u; i < params.iterations; i = i + 1u) {
        x = fma(x, y, c);
        x = fma(x, y, c);
        x = fma(x, y, c);
        x = fma(x, y, c);
        x = fma(x, y, c);
        x = fma(x, y, c);
        x = fma(x, y, c);
        x = fma(x, y, c);
    }

    if (index < arrayLength(&output)) {
        output[index] = x;
    }
}
"#;

/// WGSL source with the work-group size baked in
pub fn kernel_source(workgroup_size: u32) -> String {
    KERNEL_TEMPLATE.replace("{{WORKGROUP_SIZE}}", &workgroup_size.to_string())
}

/// Uniform block read by the kernel, padded to 16 bytes
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct KernelParams {
    pub iterations: u32,
    pub _padding: [u32; 3],
}

impl KernelParams {
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations,
            _padding: [0; 3],
        }
    }
}

/// Floating point operations performed by one launch
pub fn flop_count(global_work_size: u32, iterations: u32) -> Result<u64> {
    (global_work_size as u64)
        .checked_mul(iterations as u64)
        .and_then(|n| n.checked_mul(FMA_PER_ITERATION * FLOPS_PER_FMA))
        .ok_or_else(|| {
            CgrbError::InvalidConfig(format!(
                "{} work-items x {} iterations overflows the operation counter",
                global_work_size, iterations
            ))
        })
}

/// Rescale the per-item iteration count from the first launch time
pub fn tune_iterations(iterations: u32, launch_time: Duration) -> u32 {
    if launch_time < TUNE_MIN_LAUNCH {
        let factor = if launch_time.is_zero() {
            TUNE_MAX_FACTOR
        } else {
            let ratio = TUNE_TARGET_LAUNCH.as_secs_f64() / launch_time.as_secs_f64();
            (ratio as u64).clamp(1, TUNE_MAX_FACTOR)
        };
        iterations.saturating_mul(factor as u32)
    } else if launch_time > TUNE_MAX_LAUNCH {
        (iterations / 2).max(1)
    } else {
        iterations
    }
}
