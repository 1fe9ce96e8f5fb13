// Renderer frontend
//
// Backend-agnostic surface the application talks to. Vulkan is the only
// backend today; the trait keeps that seam explicit.

use anyhow::{Context, Result};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::backend::VulkanBackend;
use crate::config::Config;

/// Per-frame data handed from the application to the renderer.
pub struct RenderPacket {
    pub delta_time: f32,
}

/// Contract between the frontend and a rendering backend.
pub trait RenderBackend {
    /// Prepares the next frame. `Ok(false)` means this frame should be
    /// skipped without drawing; the backend has already handled why.
    fn begin_frame(&mut self, delta_time: f32) -> Result<bool>;

    /// Finishes recording, submits, and presents the frame opened by the
    /// last successful `begin_frame`.
    fn end_frame(&mut self, delta_time: f32) -> Result<()>;

    /// Records a new framebuffer size. Cheap; callable at any time.
    fn on_resize(&mut self, width: u32, height: u32);

    /// Blocks until the device finishes outstanding work. Called once
    /// before teardown.
    fn shutdown(&mut self);

    /// Number of frames fully submitted and presented so far.
    fn frame_number(&self) -> u64;
}

pub struct Renderer {
    backend: Box<dyn RenderBackend>,
}

impl Renderer {
    pub fn new(
        config: &Config,
        app_name: &str,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let backend = VulkanBackend::new(
            config,
            app_name,
            display_handle,
            window_handle,
            width,
            height,
        )
        .context("Failed to initialize the Vulkan backend")?;

        Ok(Self {
            backend: Box::new(backend),
        })
    }

    pub fn on_resize(&mut self, width: u32, height: u32) {
        self.backend.on_resize(width, height);
    }

    /// Runs one frame end to end. `Ok(false)` reports a skipped frame,
    /// which is routine while the window is being resized.
    pub fn draw_frame(&mut self, packet: &RenderPacket) -> Result<bool> {
        if !self.backend.begin_frame(packet.delta_time)? {
            return Ok(false);
        }

        if let Err(e) = self.backend.end_frame(packet.delta_time) {
            log::error!("Frame submission failed: {:#}", e);
            return Err(e);
        }

        Ok(true)
    }

    pub fn frame_number(&self) -> u64 {
        self.backend.frame_number()
    }

    pub fn shutdown(&mut self) {
        self.backend.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Calls {
        begin: Arc<AtomicUsize>,
        end: Arc<AtomicUsize>,
    }

    struct MockBackend {
        ready: bool,
        fail_begin: bool,
        fail_end: bool,
        frames: u64,
        calls: Calls,
    }

    impl MockBackend {
        fn new(ready: bool, calls: Calls) -> Self {
            Self {
                ready,
                fail_begin: false,
                fail_end: false,
                frames: 0,
                calls,
            }
        }
    }

    impl RenderBackend for MockBackend {
        fn begin_frame(&mut self, _delta_time: f32) -> Result<bool> {
            self.calls.begin.fetch_add(1, Ordering::SeqCst);
            if self.fail_begin {
                anyhow::bail!("acquire blew up");
            }
            Ok(self.ready)
        }

        fn end_frame(&mut self, _delta_time: f32) -> Result<()> {
            self.calls.end.fetch_add(1, Ordering::SeqCst);
            if self.fail_end {
                anyhow::bail!("submit blew up");
            }
            self.frames += 1;
            Ok(())
        }

        fn on_resize(&mut self, _width: u32, _height: u32) {}

        fn shutdown(&mut self) {}

        fn frame_number(&self) -> u64 {
            self.frames
        }
    }

    fn renderer_with(backend: MockBackend) -> Renderer {
        Renderer {
            backend: Box::new(backend),
        }
    }

    fn packet() -> RenderPacket {
        RenderPacket { delta_time: 0.016 }
    }

    #[test]
    fn skipped_frames_never_reach_end_frame() {
        let calls = Calls::default();
        let mut renderer = renderer_with(MockBackend::new(false, calls.clone()));

        let drew = renderer.draw_frame(&packet()).unwrap();

        assert!(!drew);
        assert_eq!(calls.begin.load(Ordering::SeqCst), 1);
        assert_eq!(calls.end.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn completed_frames_pass_through_both_phases() {
        let calls = Calls::default();
        let mut renderer = renderer_with(MockBackend::new(true, calls.clone()));

        let drew = renderer.draw_frame(&packet()).unwrap();

        assert!(drew);
        assert_eq!(calls.begin.load(Ordering::SeqCst), 1);
        assert_eq!(calls.end.load(Ordering::SeqCst), 1);
        assert_eq!(renderer.frame_number(), 1);
    }

    #[test]
    fn begin_errors_are_fatal() {
        let mut backend = MockBackend::new(true, Calls::default());
        backend.fail_begin = true;
        let mut renderer = renderer_with(backend);

        assert!(renderer.draw_frame(&packet()).is_err());
    }

    #[test]
    fn submission_errors_are_fatal() {
        let calls = Calls::default();
        let mut backend = MockBackend::new(true, calls.clone());
        backend.fail_end = true;
        let mut renderer = renderer_with(backend);

        assert!(renderer.draw_frame(&packet()).is_err());
        assert_eq!(calls.end.load(Ordering::SeqCst), 1);
        // An aborted frame never counts as completed
        assert_eq!(renderer.frame_number(), 0);
    }

    #[test]
    fn frame_number_reads_straight_from_the_backend() {
        let mut backend = MockBackend::new(true, Calls::default());
        backend.frames = 41;
        let renderer = renderer_with(backend);

        assert_eq!(renderer.frame_number(), 41);
    }
}
