//! GPU merge kernel.
//!
//! Each sweep is one compute dispatch with an invocation per cell. The
//! dispatch reads the current labels and lowers an `atomic<u32>` copy with
//! `atomicMin`, then the copy replaces the current buffer. Only the min-swap
//! policy runs on the device. A global counter records the adjacencies that
//! still disagreed; the host reads it back after each dispatch to decide
//! whether another sweep is needed.
//!
//! Full propagation, a missing adapter, or a band larger than the device can
//! bind all route the merge through [`ParallelKernel`] instead.

use crate::core::error::{GpuError, SegmentResult};
use crate::core::gpu::{GpuAdapter, GpuDevice, GpuPool};
use crate::core::types::{Label, Threshold};
use crate::kernel::parallel::ParallelKernel;
use crate::kernel::policy::UnificationPolicy;
use crate::kernel::{run_sweeps, BandShape, KernelKind, MergeKernel, MergeOutcome, SweepMode, SweepStats};
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;
use wgpu::util::DeviceExt;

const WORKGROUP_SIZE: u32 = 16;

/// Shader parameters.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct MergeParams {
    width: u32,
    rows: u32,
    threshold: u32,
    _padding: u32,
}

/// Compiled merge sweep pipeline.
struct MergePipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

impl MergePipeline {
    fn new(gpu: &GpuDevice) -> Self {
        let device = gpu.device();

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("merge_sweep_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/merge_sweep.wgsl").into()),
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("merge_sweep_bind_group_layout"),
            entries: &[
                // Params uniform buffer
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
                // Pixels, one u32 per cell
                storage(1, true),
                // Labels read by the sweep
                storage(2, true),
                // Labels written by the sweep
                storage(3, false),
                // Unification counter
                storage(4, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("merge_sweep_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("merge_sweep_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        Self {
            pipeline,
            bind_group_layout,
        }
    }
}

/// Kernel that offloads sweeps to the GPU when it can.
pub struct AcceleratorKernel {
    threshold: Threshold,
    fallback: ParallelKernel,
    device: Option<(Arc<GpuDevice>, MergePipeline)>,
}

impl AcceleratorKernel {
    /// Create a GPU kernel.
    ///
    /// `threads` sizes the CPU pool used whenever the merge falls back.
    pub fn new(threshold: Threshold, policy: UnificationPolicy, threads: usize) -> SegmentResult<Self> {
        let fallback = ParallelKernel::with_threads(threshold, policy, threads)?;

        let device = if !policy.is_lock_free() {
            log::warn!("{} policy cannot run on the GPU, using the CPU kernel", policy);
            None
        } else {
            match GpuPool::global().device() {
                Some(gpu) => {
                    let pipeline = MergePipeline::new(&gpu);
                    Some((gpu, pipeline))
                }
                None => {
                    log::warn!("GPU not available, falling back to CPU kernel");
                    None
                }
            }
        };

        Ok(Self {
            threshold,
            fallback,
            device,
        })
    }

    /// Whether merges actually run on the GPU.
    pub fn is_offloaded(&self) -> bool {
        self.device.is_some()
    }

    fn merge_on_device(
        &self,
        gpu: &GpuDevice,
        pipeline: &MergePipeline,
        pixels: &[u8],
        labels: &mut [Label],
        shape: BandShape,
        mode: SweepMode,
    ) -> Result<MergeOutcome, GpuError> {
        let label_bytes = std::mem::size_of_val(labels) as u64;
        gpu.check_storage_size(label_bytes)?;

        let device = gpu.device();
        let queue = gpu.queue();

        let wide_pixels: Vec<u32> = pixels.iter().map(|&p| p as u32).collect();
        let pixels_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("merge_pixels_buffer"),
            contents: bytemuck::cast_slice(&wide_pixels),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let label_buffer = |label: &str| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(labels),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            })
        };
        let current_buffer = label_buffer("merge_current_labels_buffer");
        let next_buffer = label_buffer("merge_next_labels_buffer");

        let counter_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("merge_counter_buffer"),
            contents: bytemuck::bytes_of(&0u32),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
        });

        let params = MergeParams {
            width: shape.width as u32,
            rows: shape.rows as u32,
            threshold: self.threshold.value() as u32,
            _padding: 0,
        };
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("merge_params_buffer"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("merge_sweep_bind_group"),
            layout: &pipeline.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: pixels_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: current_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: next_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: counter_buffer.as_entire_binding(),
                },
            ],
        });

        let workgroups_x = (shape.width as u32).div_ceil(WORKGROUP_SIZE);
        let workgroups_y = (shape.rows as u32).div_ceil(WORKGROUP_SIZE);

        let sweep = || -> SegmentResult<SweepStats> {
            queue.write_buffer(&counter_buffer, 0, bytemuck::bytes_of(&0u32));

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("merge_sweep_encoder"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("merge_sweep_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&pipeline.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(workgroups_x, workgroups_y, 1);
            }
            encoder.copy_buffer_to_buffer(&next_buffer, 0, &current_buffer, 0, label_bytes);
            queue.submit(std::iter::once(encoder.finish()));

            let counter: Vec<u32> = gpu.read_buffer(&counter_buffer, 4)?;
            Ok(SweepStats {
                unifications: counter.first().copied().unwrap_or(0) as u64,
            })
        };

        let outcome = run_sweeps(mode, sweep).map_err(|e| match e {
            crate::core::error::SegmentError::Gpu(gpu_error) => gpu_error,
            other => GpuError::Readback(other.to_string()),
        })?;

        let merged: Vec<Label> = gpu.read_buffer(&current_buffer, label_bytes)?;
        labels.copy_from_slice(&merged);
        Ok(outcome)
    }
}

impl MergeKernel for AcceleratorKernel {
    fn name(&self) -> &str {
        if self.is_offloaded() {
            "accelerator"
        } else {
            "accelerator (cpu fallback)"
        }
    }

    fn kind(&self) -> KernelKind {
        KernelKind::Accelerator
    }

    fn adapter(&self) -> Option<GpuAdapter> {
        self.device.as_ref().map(|(gpu, _)| gpu.adapter())
    }

    fn merge(
        &self,
        pixels: &[u8],
        labels: &mut [Label],
        width: usize,
        mode: SweepMode,
    ) -> SegmentResult<MergeOutcome> {
        let shape = BandShape::of(width, pixels, labels)?;
        let Some((gpu, pipeline)) = &self.device else {
            return self.fallback.merge(pixels, labels, width, mode);
        };
        if shape.is_empty() {
            return self.fallback.merge(pixels, labels, width, mode);
        }

        match self.merge_on_device(gpu, pipeline, pixels, labels, shape, mode) {
            Ok(outcome) => Ok(outcome),
            Err(e @ GpuError::BufferTooLarge { .. }) => {
                // Nothing was written back, labels are untouched.
                log::warn!("{}, falling back to CPU kernel", e);
                self.fallback.merge(pixels, labels, width, mode)
            }
            Err(e) => Err(e.into()),
        }
    }
}
