//! The rendering session.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context as _};
use ash::vk;
use tracing::{debug, error, info, warn};
use vireo_gpu::swapchain::is_degenerate;
use vireo_gpu::{Command, RenderDevice};
use winit::event::WindowEvent;

use crate::app::RenderApp;
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::frame::FrameContext;
use crate::sync::{FrameOutcome, FrameSynchronizer, SkipReason};

/// Frame counters and FPS tracking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub presented: u64,
    pub skipped: u64,
    pub rebuilds: u64,
    pub min_fps: f64,
    pub max_fps: f64,
    fps_sum: f64,
    fps_samples: u64,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self {
            presented: 0,
            skipped: 0,
            rebuilds: 0,
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
            fps_samples: 0,
        }
    }
}

impl FrameStats {
    fn sample(&mut self, dt: f32) {
        if dt > 0.0 {
            let fps = 1.0 / f64::from(dt);
            self.min_fps = self.min_fps.min(fps);
            self.max_fps = self.max_fps.max(fps);
            self.fps_sum += fps;
            self.fps_samples += 1;
        }
    }

    pub fn average_fps(&self) -> Option<f64> {
        (self.fps_samples > 0).then(|| self.fps_sum / self.fps_samples as f64)
    }
}

struct Live<D: RenderDevice> {
    ctx: AppContext<D>,
    frames: FrameSynchronizer,
}

impl<D: RenderDevice> Live<D> {
    /// Run the `Rebuilding` state. Returns the new extent, or `None` when
    /// the window has no drawable area.
    fn rebuild(&mut self) -> anyhow::Result<Option<vk::Extent2D>> {
        let ready = self
            .ctx
            .rebuild_surface()
            .context("rebuilding presentation surface")?;
        self.frames
            .rebuilt(self.ctx.device(), self.ctx.surface_state())
            .context("re-attaching frame synchronization")?;
        self.ctx
            .set_frames_in_flight(self.frames.frames_in_flight());
        let extent = self.ctx.extent();
        match extent {
            Some(extent) if ready => {
                info!("Surface rebuilt: {}x{}", extent.width, extent.height);
                Ok(Some(extent))
            }
            _ => {
                debug!("Surface dropped until the window has a drawable area");
                Ok(None)
            }
        }
    }
}

/// A rendering session: device, presentation surface, pipelines, upload
/// paths and the frame loop, driving one [`RenderApp`].
///
/// Shutdown runs exactly once, either through [`Self::shutdown`] or when
/// the session is dropped.
pub struct Session<D: RenderDevice, A: RenderApp<D>> {
    live: Option<Live<D>>,
    app: A,
    events: Vec<WindowEvent>,
    pending_resize: Option<vk::Extent2D>,
    quit_requested: bool,
    stats: FrameStats,
    target_frame_time: Option<Duration>,
    last_frame_time: Instant,
}

impl<D: RenderDevice, A: RenderApp<D>> Session<D, A> {
    /// Build every session resource on `device` and load the application.
    ///
    /// Any failure releases what was created, shuts the device down and
    /// aborts startup.
    pub fn initialize(mut device: D, config: AppConfig, mut app: A) -> anyhow::Result<Self> {
        if let Err(err) = config.validate() {
            device.shutdown();
            return Err(err).context("validating configuration");
        }
        info!(
            "Initializing '{}' ({}x{}{}) on {}",
            config.title,
            config.width,
            config.height,
            if config.fullscreen { ", fullscreen" } else { "" },
            device.backend()
        );

        let target_frame_time = config
            .target_fps
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)));
        let desc = app.pipeline(&config);
        let mut ctx = AppContext::new(device, config, desc)?;

        let frames = match FrameSynchronizer::new(
            ctx.device(),
            ctx.config().frames_in_flight,
            ctx.surface_state(),
        ) {
            Ok(frames) => frames,
            Err(err) => {
                let mut device = ctx.release();
                device.shutdown();
                return Err(err).context("creating frame synchronization");
            }
        };
        ctx.set_frames_in_flight(frames.frames_in_flight());

        let mut session = Self {
            live: Some(Live { ctx, frames }),
            app,
            events: Vec::new(),
            pending_resize: None,
            quit_requested: false,
            stats: FrameStats::default(),
            target_frame_time,
            last_frame_time: Instant::now(),
        };
        if let Some(live) = session.live.as_mut() {
            session
                .app
                .load(&mut live.ctx)
                .context("loading application assets")?;
        }
        info!("Session ready");
        Ok(session)
    }

    /// Queue a platform event for delivery before the next draw.
    ///
    /// `CloseRequested` also requests quit; `Resized` schedules a rebuild.
    pub fn event(&mut self, event: WindowEvent) {
        match &event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.quit_requested = true;
            }
            WindowEvent::Resized(size) => {
                debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(live) = self.live.as_mut() {
                    if let Err(e) = live.frames.request_rebuild() {
                        warn!("Could not schedule a rebuild: {e}");
                    }
                }
            }
            _ => {}
        }
        self.events.push(event);
    }

    /// Run one acquire, record, submit, present cycle.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn frame(&mut self) -> anyhow::Result<FrameOutcome> {
        let Some(live) = self.live.as_mut() else {
            bail!("session is shut down");
        };
        let frame_start = Instant::now();

        // Minimized: no submission at all until the window has an area.
        if is_degenerate(live.ctx.device().drawable_extent()) {
            self.stats.skipped += 1;
            return Ok(FrameOutcome::Skipped(SkipReason::ZeroExtent));
        }
        if !live.ctx.surface().is_ready() {
            live.frames.request_rebuild()?;
        }
        if live.frames.needs_rebuild() {
            match live.rebuild()? {
                Some(extent) => {
                    self.stats.rebuilds += 1;
                    self.pending_resize = Some(extent);
                }
                None => {
                    self.stats.skipped += 1;
                    return Ok(FrameOutcome::Skipped(SkipReason::ZeroExtent));
                }
            }
        }

        let Some(state) = live.ctx.surface_state() else {
            bail!("no presentation surface after rebuild");
        };
        let extent = state.extent();
        let acquired = live
            .frames
            .begin(live.ctx.device(), state)
            .context("acquiring swap image")?;
        live.ctx.set_frame_number(live.frames.frame_number());
        live.ctx.process_retired();

        let Some(acquired) = acquired else {
            self.stats.skipped += 1;
            if let Some(extent) = live.rebuild()? {
                self.stats.rebuilds += 1;
                self.pending_resize = Some(extent);
            }
            return Ok(FrameOutcome::Skipped(SkipReason::OutOfDate));
        };

        let now = Instant::now();
        let dt = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.stats.sample(dt);

        let frame = FrameContext {
            command_buffer: acquired.command_buffer,
            image_index: acquired.image_index,
            slot: acquired.slot,
            extent,
            dt,
            frame_number: live.frames.frame_number(),
        };
        let drawn = Self::record(
            &mut self.app,
            &mut live.ctx,
            &frame,
            &mut self.events,
            self.pending_resize.take(),
        );

        // Submit and present even after a failed callback so the fence
        // and the acquired image are always handed back.
        let Some(state) = live.ctx.surface_state() else {
            bail!("presentation surface lost during recording");
        };
        live.frames
            .finish(live.ctx.device(), state, acquired)
            .context("submitting frame")?;
        live.ctx.set_frame_number(live.frames.frame_number());
        self.stats.presented += 1;
        drawn?;

        if live.frames.needs_rebuild() {
            if let Some(extent) = live.rebuild()? {
                self.stats.rebuilds += 1;
                self.pending_resize = Some(extent);
            }
        }

        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }
        Ok(FrameOutcome::Presented)
    }

    /// Deliver queued callbacks, then record the render pass around the
    /// application's draw.
    fn record(
        app: &mut A,
        ctx: &mut AppContext<D>,
        frame: &FrameContext,
        events: &mut Vec<WindowEvent>,
        resize: Option<vk::Extent2D>,
    ) -> anyhow::Result<()> {
        if let Some(extent) = resize {
            app.resize(ctx, extent.width, extent.height)
                .context("resize callback")?;
        }
        for event in events.drain(..) {
            app.event(ctx, &event);
        }

        let Some(state) = ctx.surface_state() else {
            bail!("no presentation surface while recording");
        };
        let framebuffer = state
            .framebuffer(frame.image_index)
            .with_context(|| format!("no framebuffer for image {}", frame.image_index))?;
        let render_pass = state.render_pass();
        let device = ctx.device();
        device.record(
            frame.command_buffer,
            Command::BeginRenderPass {
                render_pass,
                framebuffer,
                extent: frame.extent,
                clear_color: ctx.config().clear_color,
                clear_depth: 1.0,
            },
        );
        device.record(frame.command_buffer, Command::SetViewport(frame.extent));
        ctx.binder()
            .record_bind(device, frame.command_buffer, frame.image_index);

        ctx.set_drawing(true);
        let drawn = app.draw(ctx, frame).context("draw callback");
        ctx.set_drawing(false);
        ctx.device()
            .record(frame.command_buffer, Command::EndRenderPass);
        drawn
    }

    /// Pump events and run frames until quit is requested or `pump` returns
    /// `false`.
    ///
    /// `pump` collects one iteration's platform events. Embedders whose
    /// event loop owns control flow (winit) call [`Self::event`] and
    /// [`Self::frame`] directly instead.
    pub fn run_loop(
        &mut self,
        mut pump: impl FnMut(&mut Vec<WindowEvent>) -> bool,
    ) -> anyhow::Result<()> {
        let mut incoming = Vec::new();
        while !self.quit_requested() {
            if !pump(&mut incoming) {
                break;
            }
            for event in incoming.drain(..) {
                self.event(event);
            }
            if self.quit_requested() {
                break;
            }
            self.frame()?;
        }
        Ok(())
    }

    /// Stop the loop before the next frame.
    pub fn request_quit(&mut self) {
        self.quit_requested = true;
    }

    pub fn quit_requested(&self) -> bool {
        self.quit_requested
            || self
                .live
                .as_ref()
                .is_some_and(|live| live.ctx.quit_requested())
    }

    pub const fn app(&self) -> &A {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    /// Shared resources, until shutdown.
    pub fn context(&self) -> Option<&AppContext<D>> {
        self.live.as_ref().map(|live| &live.ctx)
    }

    pub fn context_mut(&mut self) -> Option<&mut AppContext<D>> {
        self.live.as_mut().map(|live| &mut live.ctx)
    }

    /// Frame synchronization state, until shutdown.
    pub fn frames(&self) -> Option<&FrameSynchronizer> {
        self.live.as_ref().map(|live| &live.frames)
    }

    pub fn frames_mut(&mut self) -> Option<&mut FrameSynchronizer> {
        self.live.as_mut().map(|live| &mut live.frames)
    }

    pub const fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub const fn is_shut_down(&self) -> bool {
        self.live.is_none()
    }

    /// Wait for the device, let the application clean up, then destroy
    /// pipelines, the surface, upload resources, synchronization
    /// primitives and finally the device. Later calls do nothing.
    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        let Some(mut live) = self.live.take() else {
            return Ok(());
        };

        if self.stats.presented > 0 {
            info!("FPS Statistics:");
            info!("  Min: {:.1}", self.stats.min_fps);
            info!("  Max: {:.1}", self.stats.max_fps);
            if let Some(avg) = self.stats.average_fps() {
                info!("  Avg: {avg:.1}");
            }
            info!("  Total frames: {}", self.stats.presented);
            info!("  Skipped: {}, rebuilds: {}", self.stats.skipped, self.stats.rebuilds);
        }

        info!("Starting cleanup...");
        let idle = live.ctx.device().wait_idle();
        if let Err(e) = &idle {
            error!("Failed to wait idle: {e}");
        }

        self.app.cleanup(&mut live.ctx);
        self.events.clear();

        let Live { ctx, frames } = live;
        let mut device = ctx.release();
        frames.destroy(&device);
        device.shutdown();
        info!("Cleanup complete");

        idle.context("waiting for the device to go idle")
    }
}

impl<D: RenderDevice, A: RenderApp<D>> Drop for Session<D, A> {
    fn drop(&mut self) {
        if self.live.is_some() {
            warn!("Session dropped without shutdown, releasing resources");
            if let Err(e) = self.shutdown() {
                error!("Shutdown failed: {e:#}");
            }
        }
    }
}
