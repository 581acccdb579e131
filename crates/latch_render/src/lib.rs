//! Latch Render System
//!
//! Device-side collaborators for the GPU memory allocators: headless wgpu
//! bring-up, growable buffers backing the segment allocator, and the fence
//! that tells the frame clock which frames the GPU has finished.

pub mod backing;
pub mod context;
pub mod fence;

pub use backing::WgpuSegmentBacking;
pub use context::{DeviceCapabilities, GpuContext};
pub use fence::GpuFrameFence;
pub use wgpu;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    #[error("failed to create GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("buffer of {requested} bytes exceeds the device limit of {limit} bytes")]
    BufferTooLarge { requested: u64, limit: u64 },

    #[error("device is idle but frames after {completed} up to {current} were never ended")]
    FramesNeverEnded { current: u64, completed: u64 },
}
