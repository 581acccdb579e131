//! Headless device bring-up
//!
//! The allocators never need a surface, so the context is created without one
//! and works the same on CI machines with a software adapter.

use crate::RenderError;
use std::sync::Arc;

/// What the device allows, as far as buffer sub-allocation cares.
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    pub backend: wgpu::Backend,
    pub adapter_name: String,
    pub max_buffer_size: u64,
    /// Dynamic uniform offsets must be multiples of this
    pub min_uniform_offset_alignment: u32,
    pub max_uniform_binding_size: u32,
}

pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub capabilities: DeviceCapabilities,
}

impl GpuContext {
    /// Pick the default adapter and open a device with default limits.
    pub async fn new_headless() -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RenderError::NoAdapter)?;

        let info = adapter.get_info();
        tracing::info!(adapter = %info.name, backend = ?info.backend, "GPU adapter selected");

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Latch GpuMem Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;

        let limits = device.limits();
        let capabilities = DeviceCapabilities {
            backend: info.backend,
            adapter_name: info.name,
            max_buffer_size: limits.max_buffer_size,
            min_uniform_offset_alignment: limits.min_uniform_buffer_offset_alignment,
            max_uniform_binding_size: limits.max_uniform_buffer_binding_size,
        };
        tracing::info!(
            max_buffer_size = capabilities.max_buffer_size,
            uniform_alignment = capabilities.min_uniform_offset_alignment,
            "GPU device ready"
        );

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            capabilities,
        })
    }

    /// Create an unmapped buffer, checking the size against the device limit.
    pub fn create_buffer(
        &self,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> Result<wgpu::Buffer, RenderError> {
        let limit = self.capabilities.max_buffer_size;
        if size > limit {
            return Err(RenderError::BufferTooLarge { requested: size, limit });
        }
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        }))
    }
}
