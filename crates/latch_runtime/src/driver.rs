//! Frame loop
//!
//! Each frame: wait for a free frame slot, record per-draw constants from the
//! worker pool through the segment allocator, stream meshes through the
//! free-list allocator, submit, then sync both allocators against the
//! completed watermark.

use crate::settings::RuntimeSettings;
use anyhow::{ensure, Result};
use latch_gpumem::{
    AllocError, AllocationHandle, BackingStore, FrameClock, FrameIndex, FreeListAllocator, NullBacking,
    SegmentAllocator, WorkerContext,
};
use latch_render::{wgpu, GpuContext, GpuFrameFence, WgpuSegmentBacking};
use std::collections::VecDeque;
use std::sync::Arc;

/// Offset alignment for constants when no device reports one
const DEFAULT_UNIFORM_ALIGNMENT: u64 = 256;

enum Device {
    Gpu {
        ctx: GpuContext,
        fence: GpuFrameFence,
        constant_buffer: Arc<WgpuSegmentBacking>,
        mesh_heap: wgpu::Buffer,
    },
    /// Retires each frame a fixed number of frames after it is submitted
    Simulated { latency: u64 },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub draws: u64,
    pub meshes: u64,
}

pub struct FrameLoop {
    settings: RuntimeSettings,
    clock: Arc<FrameClock>,
    device: Device,
    meshes: FreeListAllocator,
    constants: SegmentAllocator,
    workers: rayon::ThreadPool,
    resident: VecDeque<AllocationHandle>,
    uniform_alignment: u64,
    rng: u64,
    summary: RunSummary,
}

impl FrameLoop {
    pub fn new(settings: RuntimeSettings) -> Result<Self> {
        let clock = Arc::new(FrameClock::new());
        let alloc_settings = &settings.allocators;

        let gpu = if settings.use_gpu {
            match pollster::block_on(GpuContext::new_headless()) {
                Ok(ctx) => Some(ctx),
                Err(err) => {
                    tracing::warn!(%err, "no GPU device, simulating completion");
                    None
                }
            }
        } else {
            None
        };

        let (device, backing): (Device, Arc<dyn BackingStore>) = match gpu {
            Some(ctx) => {
                let constant_buffer = Arc::new(WgpuSegmentBacking::new(
                    &ctx,
                    &alloc_settings.segments,
                    wgpu::BufferUsages::UNIFORM,
                )?);
                let mesh_heap = ctx.create_buffer(
                    "mesh heap",
                    alloc_settings.free_list.resource_size,
                    wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
                )?;
                let fence = GpuFrameFence::new(Arc::clone(&ctx.device), Arc::clone(&ctx.queue), Arc::clone(&clock));
                let backing = Arc::clone(&constant_buffer) as Arc<dyn BackingStore>;
                (
                    Device::Gpu {
                        ctx,
                        fence,
                        constant_buffer,
                        mesh_heap,
                    },
                    backing,
                )
            }
            None => (
                Device::Simulated {
                    latency: settings.simulated_latency,
                },
                Arc::new(NullBacking),
            ),
        };

        let uniform_alignment = match &device {
            Device::Gpu { ctx, .. } => u64::from(ctx.capabilities.min_uniform_offset_alignment),
            Device::Simulated { .. } => DEFAULT_UNIFORM_ALIGNMENT,
        };
        ensure!(
            alloc_settings.segments.segment_size % uniform_alignment == 0,
            "segment_size ({}) must be a multiple of the uniform offset alignment ({uniform_alignment})",
            alloc_settings.segments.segment_size
        );

        let meshes = FreeListAllocator::new(&alloc_settings.free_list)?;
        let constants = SegmentAllocator::new(&alloc_settings.segments, backing)?;
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(alloc_settings.segments.worker_count)
            .thread_name(|i| format!("latch-worker-{i}"))
            .build()?;

        tracing::info!(
            workers = constants.worker_count(),
            segment_size = constants.segment_size(),
            mesh_heap = meshes.resource_size(),
            fit = ?meshes.fit_policy(),
            gpu = matches!(device, Device::Gpu { .. }),
            "allocators ready"
        );

        Ok(Self {
            settings,
            clock,
            device,
            meshes,
            constants,
            workers,
            resident: VecDeque::new(),
            uniform_alignment,
            rng: 0x9E37_79B9_7F4A_7C15,
            summary: RunSummary::default(),
        })
    }

    pub fn run(mut self) -> Result<RunSummary> {
        let mut last_frame = 0;
        for _ in 0..self.settings.frames {
            self.wait_for_capacity()?;
            let frame = self.clock.begin_frame();

            self.record_draws(frame)?;
            self.stream_meshes(frame)?;
            self.submit(frame);

            let completed = self.clock.completed();
            self.constants.sync(frame, completed)?;
            self.meshes.sync(completed);

            let interval = self.settings.stats_interval;
            if interval > 0 && frame % interval == 0 {
                self.log_stats(frame);
            }
            last_frame = frame;
        }
        self.shutdown(last_frame)?;
        Ok(self.summary)
    }

    fn wait_for_capacity(&self) -> Result<()> {
        match &self.device {
            Device::Gpu { fence, .. } => {
                fence.wait_for_capacity()?;
            }
            Device::Simulated { .. } => debug_assert!(self.clock.has_capacity()),
        }
        Ok(())
    }

    /// Every worker allocates constants for its share of the draws.
    fn record_draws(&mut self, frame: FrameIndex) -> Result<()> {
        let draws = self.settings.draws_per_worker;
        let alignment = self.uniform_alignment;
        let constants = &self.constants;

        let per_worker: Vec<Result<Vec<(u64, u64)>, AllocError>> = self.workers.broadcast(|worker| {
            let ctx = WorkerContext::new(worker.index(), frame);
            (0..draws)
                .map(|draw| {
                    let size = draw_constant_size(worker.index(), draw);
                    constants.alloc_aligned(ctx, size, alignment).map(|offset| (offset, size))
                })
                .collect()
        });

        let payload = [frame as u8; 256];
        for ranges in per_worker {
            let ranges = ranges?;
            self.summary.draws += ranges.len() as u64;
            if let Device::Gpu {
                ctx, constant_buffer, ..
            } = &self.device
            {
                let buffer = constant_buffer.buffer();
                for (offset, size) in ranges {
                    ctx.queue.write_buffer(&buffer, offset, &payload[..size as usize]);
                }
            }
        }
        Ok(())
    }

    /// Upload new meshes and free the oldest ones past the residency budget.
    fn stream_meshes(&mut self, frame: FrameIndex) -> Result<()> {
        for _ in 0..self.settings.meshes_per_frame {
            let size = self.next_mesh_size();
            let mesh = self.meshes.alloc(size)?;
            if let Device::Gpu { ctx, mesh_heap, .. } = &self.device {
                let header = [frame.to_le_bytes(), mesh.size().to_le_bytes()].concat();
                ctx.queue.write_buffer(mesh_heap, mesh.offset(), &header);
            }
            self.resident.push_back(mesh);
            self.summary.meshes += 1;
        }

        while self.resident.len() > self.settings.resident_meshes {
            if let Some(oldest) = self.resident.pop_front() {
                self.meshes.dealloc(oldest, frame)?;
            }
        }
        Ok(())
    }

    fn submit(&mut self, frame: FrameIndex) {
        match &self.device {
            Device::Gpu { ctx, fence, .. } => {
                let encoder = ctx
                    .device
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("frame") });
                ctx.queue.submit(std::iter::once(encoder.finish()));
                fence.end_frame(frame);
                fence.poll();
            }
            Device::Simulated { latency } => self.clock.mark_completed(frame.saturating_sub(*latency)),
        }
        self.summary.frames += 1;
    }

    /// Drain the device, free every resident mesh and check nothing leaked.
    fn shutdown(&mut self, last_frame: FrameIndex) -> Result<()> {
        if last_frame == 0 {
            return Ok(());
        }
        for mesh in self.resident.drain(..) {
            self.meshes.dealloc(mesh, last_frame)?;
        }
        match &self.device {
            Device::Gpu { fence, .. } => {
                fence.wait_idle();
            }
            Device::Simulated { .. } => self.clock.mark_completed(last_frame),
        }

        let completed = self.clock.completed();
        self.constants.sync(last_frame, completed)?;
        self.meshes.sync(completed);
        self.log_stats(last_frame);

        self.meshes.validate()?;
        let meshes = self.meshes.stats();
        ensure!(meshes.allocated_bytes == 0, "mesh heap leaked: {meshes}");
        let constants = self.constants.collect_stats();
        ensure!(constants.bytes_in_use == 0, "constant segments leaked: {constants}");
        Ok(())
    }

    fn log_stats(&self, frame: FrameIndex) {
        tracing::info!(frame, in_flight = self.clock.frames_in_flight(), "meshes: {}", self.meshes.stats());
        tracing::info!(frame, "constants: {}", self.constants.collect_stats());
        if let Device::Gpu { constant_buffer, .. } = &self.device {
            tracing::debug!(frame, bytes = constant_buffer.size(), "constant buffer size");
        }
    }

    /// 1 KiB to 63 KiB in 1 KiB steps
    fn next_mesh_size(&mut self) -> u64 {
        // xorshift64
        self.rng ^= self.rng << 13;
        self.rng ^= self.rng >> 7;
        self.rng ^= self.rng << 17;
        1024 * (1 + self.rng % 63)
    }
}

/// 64 to 256 bytes in 16-byte steps, varied per worker and draw
fn draw_constant_size(worker: usize, draw: usize) -> u64 {
    64 + 16 * ((worker * 7 + draw * 13) % 13) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use latch_gpumem::{FreeListSettings, GpuMemSettings, SegmentSettings};

    fn simulated(frames: u64) -> RuntimeSettings {
        RuntimeSettings {
            allocators: GpuMemSettings {
                free_list: FreeListSettings {
                    resource_size: 16 * 1024 * 1024,
                    ..Default::default()
                },
                segments: SegmentSettings {
                    resource_size: 8 * 1024 * 1024,
                    segment_size: 4096,
                    initial_segment_count: 4,
                    worker_count: 3,
                },
            },
            frames,
            simulated_latency: 3,
            draws_per_worker: 40,
            meshes_per_frame: 3,
            resident_meshes: 20,
            stats_interval: 0,
            use_gpu: false,
        }
    }

    #[test]
    fn simulated_run_releases_everything() {
        let summary = FrameLoop::new(simulated(50)).unwrap().run().unwrap();
        assert_eq!(
            summary,
            RunSummary {
                frames: 50,
                draws: 50 * 3 * 40,
                meshes: 50 * 3,
            }
        );
    }

    #[test]
    fn segment_size_must_fit_uniform_alignment() {
        let mut settings = simulated(1);
        settings.allocators.segments.segment_size = 1000;
        settings.allocators.segments.resource_size = 1_000_000;
        assert!(FrameLoop::new(settings).is_err());
    }

    #[test]
    fn constant_sizes_stay_in_range() {
        for worker in 0..8 {
            for draw in 0..64 {
                let size = draw_constant_size(worker, draw);
                assert!((64..=256).contains(&size));
                assert_eq!(size % 16, 0);
            }
        }
    }
}
