//! Feeds GPU completion into the frame clock
//!
//! After a frame's last submit, [`GpuFrameFence::end_frame`] registers a queue
//! callback that advances the completed watermark once the device is done with
//! everything submitted so far. Callbacks only fire while the device is polled.

use crate::RenderError;
use latch_gpumem::{FrameClock, FrameIndex};
use std::sync::Arc;

pub struct GpuFrameFence {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    clock: Arc<FrameClock>,
}

impl GpuFrameFence {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, clock: Arc<FrameClock>) -> Self {
        Self { device, queue, clock }
    }

    pub fn clock(&self) -> &Arc<FrameClock> {
        &self.clock
    }

    /// Mark `frame` complete once all work submitted up to now has executed.
    pub fn end_frame(&self, frame: FrameIndex) {
        let clock = Arc::clone(&self.clock);
        self.queue.on_submitted_work_done(move || {
            clock.mark_completed(frame);
            tracing::trace!(frame, "GPU finished frame");
        });
    }

    /// Run pending completion callbacks without blocking.
    pub fn poll(&self) -> FrameIndex {
        self.device.poll(wgpu::Maintain::Poll);
        self.clock.completed()
    }

    /// Block until another frame may be opened without reusing a bucket that
    /// is still in flight.
    ///
    /// Waiting drains all submitted work, so if the window is still full
    /// afterwards some open frame never reached [`end_frame`](Self::end_frame).
    pub fn wait_for_capacity(&self) -> Result<FrameIndex, RenderError> {
        self.poll();
        if !self.clock.has_capacity() {
            self.device.poll(wgpu::Maintain::Wait);
        }
        if !self.clock.has_capacity() {
            let (current, completed) = (self.clock.current(), self.clock.completed());
            tracing::error!(current, completed, "frames in flight never ended; device is idle");
            return Err(RenderError::FramesNeverEnded { current, completed });
        }
        Ok(self.clock.completed())
    }

    /// Block until every submitted frame has completed.
    pub fn wait_idle(&self) -> FrameIndex {
        self.device.poll(wgpu::Maintain::Wait);
        self.clock.completed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GpuContext;
    use latch_gpumem::MAX_FRAMES;

    #[test]
    fn completion_reaches_the_clock() {
        let Ok(ctx) = pollster::block_on(GpuContext::new_headless()) else {
            eprintln!("no GPU adapter, skipping");
            return;
        };
        let clock = Arc::new(FrameClock::new());
        let fence = GpuFrameFence::new(Arc::clone(&ctx.device), Arc::clone(&ctx.queue), Arc::clone(&clock));

        for _ in 0..3 {
            let frame = clock.begin_frame();
            let encoder = ctx.device.create_command_encoder(&Default::default());
            ctx.queue.submit(std::iter::once(encoder.finish()));
            fence.end_frame(frame);
            fence.wait_for_capacity().unwrap();
        }

        assert_eq!(fence.wait_idle(), 3);
        assert_eq!(clock.frames_in_flight(), 0);
    }

    #[test]
    fn unended_frames_fail_instead_of_hanging() {
        let Ok(ctx) = pollster::block_on(GpuContext::new_headless()) else {
            eprintln!("no GPU adapter, skipping");
            return;
        };
        let clock = Arc::new(FrameClock::new());
        let fence = GpuFrameFence::new(Arc::clone(&ctx.device), Arc::clone(&ctx.queue), Arc::clone(&clock));

        // Open a full window of frames but never end any of them
        for _ in 0..MAX_FRAMES {
            clock.begin_frame();
        }
        let err = fence.wait_for_capacity().unwrap_err();
        assert!(matches!(
            err,
            RenderError::FramesNeverEnded { current, completed: 0 } if current == MAX_FRAMES as u64
        ));
    }
}
