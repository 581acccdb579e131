//! Latch GpuMem Runtime
//!
//! Drives the GPU memory allocators through a frame loop
//!
//! Usage: latch-gpumem [settings.json]

mod driver;
mod settings;

use anyhow::Result;
use driver::FrameLoop;
use settings::RuntimeSettings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Initialize logging (RUST_LOG overrides the default level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Latch GpuMem v{}", latch_gpumem::VERSION);

    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let settings = RuntimeSettings::load(path.as_deref())?;

    let summary = FrameLoop::new(settings)?.run()?;
    tracing::info!(
        frames = summary.frames,
        draws = summary.draws,
        meshes = summary.meshes,
        "run complete"
    );

    Ok(())
}
