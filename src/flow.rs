//! Frame lifecycle and the native driver loop.
//!
//! An application is a [`RenderFlow`]: three hooks the driver calls at fixed
//! points. `on_init` runs once after the device and pipeline exist,
//! `on_update` runs at a fixed rate, and `on_render` runs once per displayed
//! frame. Both cadences share one thread and never overlap.
//!
//! # User-facing types
//!
//! - [`RenderFlow`] is the trait applications implement
//! - [`FlowBuilder`] assembles a flow from closures over a state value
//! - [`Runner`] drives a flow against any [`GpuDevice`]
//! - [`run`] opens a window and drives a [`Runner`] from winit events
//!
//! # Lifecycle
//!
//! Each frame the runner:
//! 1. Runs every fixed-rate update that became due since the last frame
//! 2. Begins a device frame
//! 3. Calls `on_render`, which normally drives the pipeline through all passes
//! 4. Ends the device frame, presenting it

use std::{fmt, sync::Arc};

use instant::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::PhysicalKey,
    window::{Window, WindowId},
};

use crate::{
    context::{self, Config},
    gpu::{GpuDevice, GpuError, wgpu_device::WgpuDevice},
    input::InputState,
    pipelines::{Phase, PipelineError, RenderPipeline},
    resources::Loader,
};

/// Longest stretch of time a single frame may catch up on with updates.
pub const MAX_UPDATE_BACKLOG: Duration = Duration::from_millis(250);

/// Handed to [`RenderFlow::on_init`].
pub struct InitContext<'a> {
    pub device: &'a mut dyn GpuDevice,
    pub pipeline: &'a mut RenderPipeline,
    pub config: &'a Config,
    /// `None` when the runner was built without an async runtime.
    pub loader: Option<&'a Loader>,
}

/// Handed to [`RenderFlow::on_render`] between `begin_frame` and `end_frame`.
pub struct Frame<'a> {
    pub device: &'a mut dyn GpuDevice,
    pub pipeline: &'a mut RenderPipeline,
    pub input: &'a InputState,
    /// Wall time since the previous frame.
    pub elapsed: Duration,
}

/// Handed to [`RenderFlow::on_update`].
#[derive(Debug)]
pub struct UpdateContext<'a> {
    pub input: &'a InputState,
    /// The fixed update step.
    pub dt: Duration,
    /// Number of updates run before this one.
    pub tick: u64,
}

/// The three hooks of an application.
///
/// Errors from any hook stop the frame they happened in; the driver logs
/// them and, for [`run`], exits.
pub trait RenderFlow {
    fn on_init(&mut self, ctx: &mut InitContext<'_>) -> anyhow::Result<()>;

    /// Draws one frame. A render that starts the geometry pass must finish
    /// the final forward pass, or the frame is rejected.
    fn on_render(&mut self, frame: &mut Frame<'_>) -> anyhow::Result<()>;

    fn on_update(&mut self, ctx: &UpdateContext<'_>) -> anyhow::Result<()>;
}

type InitFn<S> = Box<dyn FnOnce(&mut S, &mut InitContext<'_>) -> anyhow::Result<()>>;
type RenderFn<S> = Box<dyn FnMut(&mut S, &mut Frame<'_>) -> anyhow::Result<()>>;
type UpdateFn<S> = Box<dyn FnMut(&mut S, &UpdateContext<'_>) -> anyhow::Result<()>>;

/// Builds a [`RenderFlow`] out of closures sharing a state value.
///
/// ```no_run
/// use deferred_ngin::flow::FlowBuilder;
///
/// let flow = FlowBuilder::new(0u32)
///     .on_init(|_, _| Ok(()))
///     .on_render(|_, _| Ok(()))
///     .on_update(|count, _| {
///         *count += 1;
///         Ok(())
///     })
///     .build()
///     .unwrap();
/// ```
pub struct FlowBuilder<S> {
    state: S,
    init: Option<InitFn<S>>,
    render: Option<RenderFn<S>>,
    update: Option<UpdateFn<S>>,
}

impl<S> FlowBuilder<S> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            init: None,
            render: None,
            update: None,
        }
    }

    pub fn on_init<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut S, &mut InitContext<'_>) -> anyhow::Result<()> + 'static,
    {
        self.init = Some(Box::new(f));
        self
    }

    pub fn on_render<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut S, &mut Frame<'_>) -> anyhow::Result<()> + 'static,
    {
        self.render = Some(Box::new(f));
        self
    }

    pub fn on_update<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut S, &UpdateContext<'_>) -> anyhow::Result<()> + 'static,
    {
        self.update = Some(Box::new(f));
        self
    }

    /// Fails with [`PipelineError::MissingCallback`] unless all three hooks are set.
    pub fn build(self) -> Result<ClosureFlow<S>, PipelineError> {
        let init = self.init.ok_or(PipelineError::MissingCallback("on_init"))?;
        let render = self
            .render
            .ok_or(PipelineError::MissingCallback("on_render"))?;
        let update = self
            .update
            .ok_or(PipelineError::MissingCallback("on_update"))?;
        Ok(ClosureFlow {
            state: self.state,
            init: Some(init),
            render,
            update,
        })
    }
}

/// A flow made by [`FlowBuilder`].
pub struct ClosureFlow<S> {
    state: S,
    init: Option<InitFn<S>>,
    render: RenderFn<S>,
    update: UpdateFn<S>,
}

impl<S> ClosureFlow<S> {
    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }
}

impl<S: fmt::Debug> fmt::Debug for ClosureFlow<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureFlow")
            .field("state", &self.state)
            .field("initialized", &self.init.is_none())
            .finish()
    }
}

impl<F: RenderFlow + ?Sized> RenderFlow for Box<F> {
    fn on_init(&mut self, ctx: &mut InitContext<'_>) -> anyhow::Result<()> {
        (**self).on_init(ctx)
    }

    fn on_render(&mut self, frame: &mut Frame<'_>) -> anyhow::Result<()> {
        (**self).on_render(frame)
    }

    fn on_update(&mut self, ctx: &UpdateContext<'_>) -> anyhow::Result<()> {
        (**self).on_update(ctx)
    }
}

impl<S> RenderFlow for ClosureFlow<S> {
    fn on_init(&mut self, ctx: &mut InitContext<'_>) -> anyhow::Result<()> {
        match self.init.take() {
            Some(init) => init(&mut self.state, ctx),
            None => Ok(()),
        }
    }

    fn on_render(&mut self, frame: &mut Frame<'_>) -> anyhow::Result<()> {
        (self.render)(&mut self.state, frame)
    }

    fn on_update(&mut self, ctx: &UpdateContext<'_>) -> anyhow::Result<()> {
        (self.update)(&mut self.state, ctx)
    }
}

/// Fixed-rate update clock.
///
/// Frame time is accumulated and spent in whole steps. The backlog is capped
/// at [`MAX_UPDATE_BACKLOG`], so a long stall runs a bounded number of updates
/// instead of spiralling.
#[derive(Clone, Debug)]
pub struct TickScheduler {
    step: Duration,
    accumulator: Duration,
    ticks: u64,
}

impl TickScheduler {
    pub fn new(updates_per_second: u32) -> Self {
        Self {
            step: Duration::from_secs(1) / updates_per_second.max(1),
            accumulator: Duration::ZERO,
            ticks: 0,
        }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    /// Total updates handed out so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Adds `elapsed` and returns how many updates are now due.
    pub fn advance(&mut self, elapsed: Duration) -> u32 {
        self.accumulator = (self.accumulator + elapsed).min(MAX_UPDATE_BACKLOG);
        let mut due = 0;
        while self.accumulator >= self.step {
            self.accumulator -= self.step;
            due += 1;
        }
        self.ticks += u64::from(due);
        due
    }
}

/// Drives a [`RenderFlow`] against a device.
pub struct Runner<D: GpuDevice> {
    device: D,
    pipeline: RenderPipeline,
    flow: Box<dyn RenderFlow>,
    config: Config,
    scheduler: TickScheduler,
    input: InputState,
    loader: Option<Loader>,
    initialized: bool,
}

impl<D: GpuDevice> Runner<D> {
    /// Builds the pipeline on `device`. Setup errors surface here.
    pub fn new(
        mut device: D,
        config: Config,
        flow: impl RenderFlow + 'static,
    ) -> Result<Self, PipelineError> {
        let pipeline = RenderPipeline::new(&mut device, &config)?;
        Ok(Self {
            device,
            pipeline,
            flow: Box::new(flow),
            scheduler: TickScheduler::new(config.updates_per_second),
            config,
            input: InputState::default(),
            loader: None,
            initialized: false,
        })
    }

    pub fn with_loader(mut self, loader: Loader) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn pipeline(&self) -> &RenderPipeline {
        &self.pipeline
    }

    pub fn input_mut(&mut self) -> &mut InputState {
        &mut self.input
    }

    pub fn scheduler(&self) -> &TickScheduler {
        &self.scheduler
    }

    /// Calls `on_init` once. Later calls do nothing.
    pub fn init(&mut self) -> anyhow::Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.initialized = true;
        let mut ctx = InitContext {
            device: &mut self.device,
            pipeline: &mut self.pipeline,
            config: &self.config,
            loader: self.loader.as_ref(),
        };
        self.flow.on_init(&mut ctx)
    }

    /// Runs due updates, then renders one frame.
    pub fn frame(&mut self, elapsed: Duration) -> anyhow::Result<()> {
        self.init()?;
        let due = self.scheduler.advance(elapsed);
        let first_tick = self.scheduler.ticks() - u64::from(due);
        for i in 0..u64::from(due) {
            self.flow.on_update(&UpdateContext {
                input: &self.input,
                dt: self.scheduler.step(),
                tick: first_tick + i,
            })?;
        }

        self.device.begin_frame()?;
        let rendered = self.flow.on_render(&mut Frame {
            device: &mut self.device,
            pipeline: &mut self.pipeline,
            input: &self.input,
            elapsed,
        });
        let phase = self.pipeline.phase();
        if phase != Phase::Idle {
            self.pipeline.abort_frame();
        }
        let ended = self.device.end_frame();
        rendered?;
        if phase != Phase::Idle {
            return Err(PipelineError::IncompleteFrame(phase).into());
        }
        ended?;
        Ok(())
    }

    /// Recreates the pipeline targets. Resizing the device display is up to the caller.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), PipelineError> {
        self.pipeline.resize(&mut self.device, width, height)
    }
}

impl<D: GpuDevice> fmt::Debug for Runner<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("pipeline", &self.pipeline)
            .field("scheduler", &self.scheduler)
            .field("initialized", &self.initialized)
            .finish()
    }
}

struct App {
    config: Config,
    flow: Option<Box<dyn RenderFlow>>,
    runtime: tokio::runtime::Runtime,
    window: Option<Arc<Window>>,
    runner: Option<Runner<WgpuDevice>>,
    last_frame: Instant,
    error: Option<anyhow::Error>,
}

impl App {
    fn start(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let Some(flow) = self.flow.take() else {
            return Ok(());
        };
        let attributes = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(event_loop.create_window(attributes)?);
        let device = self.runtime.block_on(context::create_device(window.clone()))?;

        let size = window.inner_size();
        let config = self
            .config
            .clone()
            .with_size(size.width.max(1), size.height.max(1));
        let loader = Loader::new(config.asset_root.clone(), self.runtime.handle().clone());
        let mut runner = Runner::new(device, config, flow)?.with_loader(loader);
        runner.init()?;
        log::info!("initialized `{}`", self.config.title);

        window.request_redraw();
        self.window = Some(window);
        self.runner = Some(runner);
        self.last_frame = Instant::now();
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("{err:#}");
        self.error = Some(err);
        event_loop.exit();
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), PipelineError> {
        if let Some(runner) = &mut self.runner {
            runner.device_mut().resize(width, height);
            runner.resize(width, height)?;
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(err) = self.start(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Err(err) = self.resize(size.width, size.height) {
                    self.fail(event_loop, err.into());
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let (Some(runner), PhysicalKey::Code(code)) = (&mut self.runner, event.physical_key)
                {
                    runner.input_mut().key(code, event.state.is_pressed());
                }
            }
            WindowEvent::RedrawRequested => {
                let Some(runner) = &mut self.runner else {
                    return;
                };
                let elapsed = self.last_frame.elapsed();
                self.last_frame = Instant::now();
                if let Err(err) = runner.frame(elapsed) {
                    let surface_lost =
                        matches!(err.downcast_ref::<GpuError>(), Some(GpuError::Surface(_)));
                    if !surface_lost {
                        self.fail(event_loop, err);
                        return;
                    }
                    // reconfigure and try again next frame
                    log::warn!("{err}");
                    if let Some(window) = &self.window {
                        let size = window.inner_size();
                        runner.device_mut().resize(size.width, size.height);
                    }
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

/// Opens a window and runs `flow` until the window closes.
///
/// Returns the first error that stopped the loop.
pub fn run(config: Config, flow: impl RenderFlow + 'static) -> anyhow::Result<()> {
    if let Err(e) = env_logger::try_init() {
        eprintln!("Warning: Could not initialize logger: {e}");
    }
    let runtime = tokio::runtime::Runtime::new()?;
    let event_loop = EventLoop::new()?;
    let mut app = App {
        config,
        flow: Some(Box::new(flow)),
        runtime,
        window: None,
        runner: None,
        last_frame: Instant::now(),
        error: None,
    };
    event_loop.run_app(&mut app)?;
    match app.error.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
