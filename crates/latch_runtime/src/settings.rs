//! Runtime settings

use anyhow::{ensure, Context, Result};
use latch_gpumem::{GpuMemSettings, MAX_FRAMES};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Frame-loop settings, loaded from an optional JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub allocators: GpuMemSettings,
    /// Frames to run before exiting
    pub frames: u64,
    /// Frames the simulated device lags behind submission
    pub simulated_latency: u64,
    /// Constant-buffer allocations each worker makes per frame
    pub draws_per_worker: usize,
    /// Mesh uploads per frame through the free-list allocator
    pub meshes_per_frame: usize,
    /// Meshes kept resident before the oldest is freed
    pub resident_meshes: usize,
    /// Log allocator stats every this many frames (0 disables)
    pub stats_interval: u64,
    /// Try a real wgpu device before falling back to simulation
    pub use_gpu: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            allocators: GpuMemSettings::default(),
            frames: 600,
            simulated_latency: 2,
            draws_per_worker: 256,
            meshes_per_frame: 4,
            resident_meshes: 256,
            stats_interval: 60,
            use_gpu: true,
        }
    }
}

impl RuntimeSettings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings: Self = match path {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("reading settings from {}", path.display()))?;
                serde_json::from_str(&json)
                    .with_context(|| format!("parsing settings in {}", path.display()))?
            }
            None => Self::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.allocators.validate()?;
        ensure!(
            self.simulated_latency < MAX_FRAMES as u64,
            "simulated_latency ({}) must stay below {MAX_FRAMES} frames",
            self.simulated_latency
        );
        ensure!(self.frames > 0, "frames must be at least 1");
        Ok(())
    }
}
