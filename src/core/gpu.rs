//! GPU acceleration infrastructure.
//!
//! Wraps a wgpu device and queue behind [`GpuDevice`] and shares one of them
//! process-wide through [`GpuPool`]. Machines without a usable adapter get
//! `None` from the pool and callers fall back to the CPU.

use crate::core::error::GpuError;
use bytemuck::Pod;
use pollster::FutureExt;
use serde::Serialize;
use std::sync::Arc;

/// GPU execution backend reported by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuBackend {
    /// Use Vulkan (Linux, Windows)
    Vulkan,
    /// Use Metal (macOS)
    Metal,
    /// Use DirectX 12 (Windows)
    Dx12,
    /// OpenGL / GLES
    Gl,
    /// Use WebGPU (web, fallback)
    WebGpu,
    /// No GPU acceleration
    None,
}

impl From<wgpu::Backend> for GpuBackend {
    fn from(backend: wgpu::Backend) -> Self {
        match backend {
            wgpu::Backend::Vulkan => GpuBackend::Vulkan,
            wgpu::Backend::Metal => GpuBackend::Metal,
            wgpu::Backend::Dx12 => GpuBackend::Dx12,
            wgpu::Backend::Gl => GpuBackend::Gl,
            wgpu::Backend::BrowserWebGpu => GpuBackend::WebGpu,
            _ => GpuBackend::None,
        }
    }
}

/// The adapter a run offloaded its sweeps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GpuAdapter {
    /// Adapter name as reported by the driver.
    pub name: String,
    /// Graphics API it runs on.
    pub backend: GpuBackend,
}

/// GPU device manager.
///
/// Cloning is cheap: device and queue are reference counted.
#[derive(Clone)]
pub struct GpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    backend: GpuBackend,
    name: String,
}

impl GpuDevice {
    /// Initialize a GPU device on the best available adapter.
    pub fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .block_on()
            .ok_or(GpuError::NotAvailable)?;

        let info = adapter.get_info();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("segmerge_device"),
                    required_limits: adapter.limits(),
                    ..Default::default()
                },
                None,
            )
            .block_on()
            .map_err(|e| GpuError::DeviceRequest(e.to_string()))?;

        log::info!("GPU device: {} ({:?})", info.name, info.backend);

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            backend: info.backend.into(),
            name: info.name,
        })
    }

    /// The wgpu device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The wgpu queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Get the backend being used.
    pub fn backend(&self) -> GpuBackend {
        self.backend
    }

    /// Adapter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adapter name and backend, for run reports.
    pub fn adapter(&self) -> GpuAdapter {
        GpuAdapter {
            name: self.name().to_string(),
            backend: self.backend(),
        }
    }

    /// Largest storage buffer a single binding may cover, in bytes.
    pub fn max_storage_bytes(&self) -> u64 {
        let limits = self.device.limits();
        (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size)
    }

    /// Fail with [`GpuError::BufferTooLarge`] if `bytes` cannot be bound.
    pub fn check_storage_size(&self, bytes: u64) -> Result<(), GpuError> {
        let limit = self.max_storage_bytes();
        if bytes > limit {
            return Err(GpuError::BufferTooLarge {
                requested: bytes,
                limit,
            });
        }
        Ok(())
    }

    /// Block until all submitted work has finished.
    pub fn wait(&self) {
        let _ = self.device.poll(wgpu::Maintain::Wait);
    }

    /// Copy the first `size` bytes of `source` back to the host.
    ///
    /// `source` must have been created with `COPY_SRC` usage.
    pub fn read_buffer<T: Pod>(&self, source: &wgpu::Buffer, size: u64) -> Result<Vec<T>, GpuError> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("segmerge_staging_buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("segmerge_readback_encoder"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = crossbeam::channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.wait();

        rx.recv()
            .map_err(|e| GpuError::Readback(e.to_string()))?
            .map_err(|e| GpuError::Readback(e.to_string()))?;

        let data = slice.get_mapped_range();
        let values: Vec<T> = bytemuck::cast_slice(&data[..]).to_vec();
        drop(data);
        staging.unmap();
        Ok(values)
    }
}

impl std::fmt::Debug for GpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuDevice")
            .field("name", &self.name)
            .field("backend", &self.backend)
            .finish()
    }
}

/// Global GPU device pool shared by every accelerator kernel.
pub struct GpuPool {
    device: Option<Arc<GpuDevice>>,
}

impl GpuPool {
    /// Get or initialize the global GPU pool.
    pub fn global() -> &'static Self {
        static POOL: std::sync::OnceLock<GpuPool> = std::sync::OnceLock::new();
        POOL.get_or_init(|| {
            let device = match GpuDevice::new() {
                Ok(device) => Some(Arc::new(device)),
                Err(e) => {
                    log::debug!("No GPU device: {}", e);
                    None
                }
            };
            GpuPool { device }
        })
    }

    /// Get the GPU device if available.
    pub fn device(&self) -> Option<Arc<GpuDevice>> {
        self.device.clone()
    }

    /// Check if GPU is available.
    pub fn is_available(&self) -> bool {
        self.device.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_mapping() {
        assert_eq!(GpuBackend::from(wgpu::Backend::Vulkan), GpuBackend::Vulkan);
        assert_eq!(GpuBackend::from(wgpu::Backend::Metal), GpuBackend::Metal);
        assert_eq!(GpuBackend::from(wgpu::Backend::Empty), GpuBackend::None);
    }

    #[test]
    fn test_adapter_report() {
        let Some(gpu) = GpuPool::global().device() else {
            return;
        };
        let adapter = gpu.adapter();
        assert_eq!(adapter.name, gpu.name());
        assert_ne!(adapter.backend, GpuBackend::None);
        let json = serde_json::to_value(&adapter).unwrap();
        assert!(json["backend"].is_string());
    }

    #[test]
    fn test_gpu_pool() {
        let pool = GpuPool::global();
        // Should not panic
        assert_eq!(pool.is_available(), pool.device().is_some());
    }

    #[test]
    fn test_storage_limit() {
        let Some(gpu) = GpuPool::global().device() else {
            return;
        };
        assert!(gpu.check_storage_size(1024).is_ok());
        assert!(matches!(
            gpu.check_storage_size(u64::MAX),
            Err(GpuError::BufferTooLarge { .. })
        ));
    }
}
