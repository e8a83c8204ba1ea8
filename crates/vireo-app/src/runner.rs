//! Application runner and event loop.

use std::sync::Arc;

use anyhow::Context as _;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vireo_gpu::{GpuContext, GpuContextBuilder, PresentTarget};
use vireo_platform::{PlatformError, PlatformWindow};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use crate::app::RenderApp;
use crate::config::AppConfig;
use crate::session::Session;

/// Run a [`RenderApp`] with the given configuration.
///
/// Initializes logging, creates the window, the Vulkan device and the
/// session, then runs the event loop until the application quits or a
/// frame fails. A fatal error is returned after everything was released.
pub fn run_app<A: RenderApp<GpuContext> + 'static>(config: AppConfig, app: A) -> anyhow::Result<()> {
    // A subscriber installed by the embedder wins.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();

    config.validate().context("validating configuration")?;
    info!("{} starting on {}...", config.title, config.backend);

    let event_loop = EventLoop::new().map_err(|e| PlatformError::EventLoop(e.to_string()))?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner {
        config,
        app: Some(app),
        window: None,
        session: None,
        error: None,
    };

    event_loop
        .run_app(&mut runner)
        .map_err(|e| PlatformError::EventLoop(e.to_string()))?;
    runner.shutdown();

    match runner.error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<A: RenderApp<GpuContext>> {
    config: AppConfig,
    /// Handed to the session on first resume.
    app: Option<A>,
    window: Option<PlatformWindow>,
    session: Option<Session<GpuContext, A>>,
    error: Option<anyhow::Error>,
}

impl<A: RenderApp<GpuContext>> AppRunner<A> {
    fn create_session(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let Some(app) = self.app.take() else {
            return Ok(());
        };

        let window = PlatformWindow::create(event_loop, &self.config.platform())?;
        let target: Arc<dyn PresentTarget> = Arc::new(window.clone());
        let gpu = GpuContextBuilder::new()
            .app_name(&self.config.title)
            .validation(self.config.validation)
            .wireframe(self.config.wireframe)
            .build(target)
            .context("creating GPU context")?;
        info!("GPU: {}", gpu.capabilities().summary());

        let session = Session::initialize(gpu, self.config.clone(), app)?;
        window.request_redraw();
        self.window = Some(window);
        self.session = Some(session);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.error.get_or_insert(err);
        self.shutdown();
        event_loop.exit();
    }

    fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.shutdown() {
                error!("Shutdown failed: {e:#}");
                self.error.get_or_insert(e);
            }
        }
        // The surface must go before the window it was created for.
        self.window = None;
    }
}

impl<A: RenderApp<GpuContext>> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.session.is_some() || self.error.is_some() {
            return;
        }
        info!("Creating session...");
        if let Err(e) = self.create_session(event_loop) {
            self.fail(event_loop, e.context("failed to initialize application"));
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match event {
            WindowEvent::RedrawRequested => {
                if let Err(e) = session.frame() {
                    self.fail(event_loop, e.context("render error"));
                    return;
                }
                if session.quit_requested() {
                    self.shutdown();
                    event_loop.exit();
                } else if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            event => {
                session.event(event);
                if session.quit_requested() {
                    self.shutdown();
                    event_loop.exit();
                }
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}
