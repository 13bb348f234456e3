//! The three-phase deferred frame.
//!
//! A frame always runs the same passes in the same order:
//!
//! 1. **Geometry**: meshes are drawn into the G-buffer, which holds world
//!    position, albedo, normal, material and depth.
//! 2. **Post-processing**: the enabled post programs run one after another
//!    over a pair of ping-pong targets, with the G-buffer bound as input.
//! 3. **Final forward**: the chain result and the G-buffer depth are copied
//!    into the forward target, depth-tested forward draws land on top, and the
//!    forward color is composited onto the display.
//!
//! [`RenderPipeline`] owns every target involved and tracks the current
//! [`Phase`], so passes called out of order are rejected instead of drawing
//! into the wrong place.
//!
//! # Key types
//!
//! - [`RenderPipeline`] owns the targets, the built-in programs and the post chain
//! - [`PostProgramId`] identifies a registered post program
//! - [`FrameStats`] counts what the last post-processing pass did

use cgmath::{Matrix4, SquareMatrix, Vector3};

use crate::{
    context::Config,
    data_structures::{
        instance::MeshInstance,
        render_target::{ColorFormat, RenderTarget, TargetError},
        scene_graph::{CameraJob, RenderJob, RenderJobs},
    },
    gpu::{DrawCall, GpuDevice, GpuError, ProgramDesc, TextureHandle},
    pipelines::{
        PipelineError,
        light::LightSet,
        program::{
            G_ALBEDO_SLOT, G_DEPTH_SLOT, G_MATERIAL_SLOT, G_NORMAL_SLOT, G_POSITION_SLOT,
            POST_COLOR_SLOT, ShaderProgram,
        },
    },
};

/// G-buffer color attachments in slot order.
const G_BUFFER_COLORS: [ColorFormat; 4] = [
    ColorFormat::Float32,
    ColorFormat::Normalized8,
    ColorFormat::Float32,
    ColorFormat::Float32,
];

/// Where the pipeline is within a frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Geometry,
    PostProcess,
    ForwardFinal,
}

/// One side of the ping-pong pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PingPong {
    A,
    B,
}

impl PingPong {
    fn other(self) -> Self {
        match self {
            PingPong::A => PingPong::B,
            PingPong::B => PingPong::A,
        }
    }

    fn index(self) -> usize {
        match self {
            PingPong::A => 0,
            PingPong::B => 1,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PostProgramId(usize);

impl PostProgramId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// What the last post-processing pass did.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub post_draws: u32,
    pub swaps: u32,
}

struct Targets {
    g_buffer: RenderTarget,
    ping_pong: [RenderTarget; 2],
    forward: RenderTarget,
}

impl Targets {
    fn new(
        device: &mut dyn GpuDevice,
        width: u32,
        height: u32,
        post_format: ColorFormat,
    ) -> Result<Self, PipelineError> {
        let mut g_buffer = RenderTarget::new(device, "g-buffer", width, height)?;
        for format in G_BUFFER_COLORS {
            g_buffer.add_color_attachment(device, format)?;
        }
        g_buffer.add_depth_attachment(device)?;

        let mut ping_pong = [
            RenderTarget::new(device, "ping-pong A", width, height)?,
            RenderTarget::new(device, "ping-pong B", width, height)?,
        ];
        for target in &mut ping_pong {
            target.add_color_attachment(device, post_format)?;
        }

        let mut forward = RenderTarget::new(device, "forward", width, height)?;
        forward.add_color_attachment(device, post_format)?;
        forward.add_depth_attachment(device)?;

        log::info!("created deferred targets at {width}x{height}");
        Ok(Self {
            g_buffer,
            ping_pong,
            forward,
        })
    }

    fn destroy(self, device: &mut dyn GpuDevice) {
        let [a, b] = self.ping_pong;
        for target in [self.g_buffer, a, b, self.forward] {
            target.destroy(device);
        }
    }
}

/// Bytes one sample of a color attachment takes against
/// [`crate::gpu::DeviceLimits::max_color_attachment_bytes_per_sample`].
fn sample_cost(format: ColorFormat) -> u32 {
    match format {
        ColorFormat::Normalized8 => 8,
        ColorFormat::Float32 => 16,
    }
}

fn color_texture(target: &RenderTarget, index: u32) -> Result<TextureHandle, PipelineError> {
    let attachment = target.color_attachment(index).ok_or_else(|| {
        TargetError::NoSuchAttachment {
            label: target.label().to_string(),
            index,
        }
    })?;
    Ok(attachment.texture)
}

fn depth_texture(target: &RenderTarget) -> Result<TextureHandle, PipelineError> {
    let attachment = target
        .depth_attachment()
        .ok_or_else(|| TargetError::NoDepthAttachment(target.label().to_string()))?;
    Ok(attachment.texture)
}

pub struct RenderPipeline {
    targets: Targets,
    width: u32,
    height: u32,
    post_source: u32,
    clear_color: [f32; 4],
    geometry: ShaderProgram,
    composite: ShaderProgram,
    post_programs: Vec<ShaderProgram>,
    read: PingPong,
    phase: Phase,
    stats: FrameStats,
}

impl std::fmt::Debug for RenderPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPipeline")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("post_programs", &self.post_programs.len())
            .field("read", &self.read)
            .field("phase", &self.phase)
            .finish()
    }
}

impl RenderPipeline {
    /// Creates every target and the built-in programs.
    ///
    /// Fails if the device cannot hold the G-buffer: too few simultaneous
    /// color attachments or too few bytes per sample. The ping-pong and
    /// forward targets take the format of the post source attachment.
    pub fn new(device: &mut dyn GpuDevice, config: &Config) -> Result<Self, PipelineError> {
        let count = G_BUFFER_COLORS.len() as u32;
        let post_format = G_BUFFER_COLORS
            .get(config.post_source_attachment as usize)
            .copied()
            .ok_or(PipelineError::PostSource {
                index: config.post_source_attachment,
                count,
            })?;
        let required: u32 = G_BUFFER_COLORS.iter().copied().map(sample_cost).sum();
        let max = device.limits().max_color_attachment_bytes_per_sample;
        if required > max {
            return Err(PipelineError::BytesPerSample { required, max });
        }

        let targets = Targets::new(device, config.width, config.height, post_format)?;
        let geometry = ShaderProgram::new(device, ProgramDesc::geometry())?;
        let composite = ShaderProgram::new(device, ProgramDesc::composite())?;
        Ok(Self {
            width: targets.g_buffer.width(),
            height: targets.g_buffer.height(),
            targets,
            post_source: config.post_source_attachment,
            clear_color: config.clear_color,
            geometry,
            composite,
            post_programs: Vec::new(),
            read: PingPong::A,
            phase: Phase::Idle,
            stats: FrameStats::default(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn g_buffer(&self) -> &RenderTarget {
        &self.targets.g_buffer
    }

    pub fn ping_pong(&self, side: PingPong) -> &RenderTarget {
        &self.targets.ping_pong[side.index()]
    }

    pub fn forward_target(&self) -> &RenderTarget {
        &self.targets.forward
    }

    /// The program geometry draws go through. Its view and projection are
    /// set by [`geometry_pass`](Self::geometry_pass).
    pub fn geometry_program(&self) -> &ShaderProgram {
        &self.geometry
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    /// Appends a program to the post chain. Registration order is run order.
    pub fn add_post_program(&mut self, program: ShaderProgram) -> PostProgramId {
        log::debug!(
            "post program `{}` registered at position {}",
            program.label(),
            self.post_programs.len()
        );
        self.post_programs.push(program);
        PostProgramId(self.post_programs.len() - 1)
    }

    pub fn post_program(&self, id: PostProgramId) -> Option<&ShaderProgram> {
        self.post_programs.get(id.0)
    }

    pub fn post_program_mut(&mut self, id: PostProgramId) -> Option<&mut ShaderProgram> {
        self.post_programs.get_mut(id.0)
    }

    pub fn set_post_enabled(&mut self, id: PostProgramId, enabled: bool) -> Result<(), PipelineError> {
        let program = self
            .post_programs
            .get_mut(id.0)
            .ok_or(PipelineError::UnknownPostProgram(id.0))?;
        program.set_enabled(enabled);
        Ok(())
    }

    pub fn post_programs(&self) -> &[ShaderProgram] {
        &self.post_programs
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.stats
    }

    /// The ping-pong side holding the latest chain result. Carries over between frames.
    pub fn read_buffer(&self) -> PingPong {
        self.read
    }

    /// Writes `lights` into every post program that declares the lighting uniforms.
    pub fn apply_lights(
        &self,
        device: &mut dyn GpuDevice,
        lights: &LightSet,
        camera: &CameraJob,
    ) -> Result<(), GpuError> {
        for program in &self.post_programs {
            if program.has_uniform("uPointLightCount") {
                lights.apply(device, program, camera.position)?;
            }
        }
        Ok(())
    }

    /// Recreates every target at the new size. Slot order is unchanged.
    pub fn resize(
        &mut self,
        device: &mut dyn GpuDevice,
        width: u32,
        height: u32,
    ) -> Result<(), PipelineError> {
        if width == 0 || height == 0 || (width, height) == (self.width, self.height) {
            return Ok(());
        }
        let post_format = G_BUFFER_COLORS[self.post_source as usize];
        let targets = Targets::new(device, width, height, post_format)?;
        std::mem::replace(&mut self.targets, targets).destroy(device);
        self.width = width;
        self.height = height;
        Ok(())
    }

    fn enter(&mut self, expected: Phase, next: Phase) -> Result<(), PipelineError> {
        if self.phase != expected {
            return Err(PipelineError::PhaseOrder {
                expected,
                found: self.phase,
            });
        }
        self.phase = next;
        Ok(())
    }

    fn finish<T>(&mut self, result: Result<T, PipelineError>) -> Result<T, PipelineError> {
        if let Err(err) = &result {
            log::error!("aborting frame in {:?}: {err}", self.phase);
            self.phase = Phase::Idle;
        }
        result
    }

    /// Drops a half-finished frame so the next one can start at the geometry pass.
    pub fn abort_frame(&mut self) {
        if self.phase != Phase::Idle {
            log::error!("aborting frame in {:?}", self.phase);
            self.phase = Phase::Idle;
        }
    }

    /// Clears the G-buffer and runs `draw` with the geometry program bound.
    ///
    /// Depth test and back-face culling are on for the whole pass.
    pub fn geometry_pass<F>(
        &mut self,
        device: &mut dyn GpuDevice,
        camera: &CameraJob,
        draw: F,
    ) -> Result<(), PipelineError>
    where
        F: FnOnce(&mut dyn GpuDevice, &ShaderProgram) -> anyhow::Result<()>,
    {
        self.enter(Phase::Idle, Phase::Geometry)?;
        let result = self.run_geometry(device, camera, draw);
        self.finish(result)
    }

    fn run_geometry<F>(
        &mut self,
        device: &mut dyn GpuDevice,
        camera: &CameraJob,
        draw: F,
    ) -> Result<(), PipelineError>
    where
        F: FnOnce(&mut dyn GpuDevice, &ShaderProgram) -> anyhow::Result<()>,
    {
        // previous post passes left G-buffer images bound as inputs
        for slot in 0..=POST_COLOR_SLOT {
            device.bind_texture(slot, None)?;
        }
        self.targets.g_buffer.bind(device)?;
        device.set_clear_color(self.clear_color);
        device.set_depth_test(true);
        device.set_face_culling(true);
        device.clear()?;
        self.geometry.bind(device)?;
        self.geometry.set_uniform(device, "uView", camera.view)?;
        self.geometry.set_uniform(device, "uProjection", camera.projection)?;
        draw(device, &self.geometry).map_err(PipelineError::Callback)
    }

    /// Runs the enabled post programs over the ping-pong pair.
    ///
    /// Both sides start as a copy of the post source attachment. Each enabled
    /// program reads one side at [`POST_COLOR_SLOT`], writes the other, and
    /// swaps them. Disabled programs neither draw nor swap.
    pub fn post_processing_pass(&mut self, device: &mut dyn GpuDevice) -> Result<(), PipelineError> {
        self.enter(Phase::Geometry, Phase::PostProcess)?;
        let result = self.run_post_chain(device);
        self.finish(result)
    }

    fn run_post_chain(&mut self, device: &mut dyn GpuDevice) -> Result<(), PipelineError> {
        device.set_depth_test(false);
        device.set_face_culling(false);

        let g_buffer = &self.targets.g_buffer;
        for side in &self.targets.ping_pong {
            RenderTarget::copy_color(device, g_buffer, side, self.post_source)?;
        }
        for slot in [G_POSITION_SLOT, G_ALBEDO_SLOT, G_NORMAL_SLOT, G_MATERIAL_SLOT] {
            device.bind_texture(slot, Some(color_texture(g_buffer, slot)?))?;
        }
        device.bind_texture(G_DEPTH_SLOT, Some(depth_texture(g_buffer)?))?;

        let mut stats = FrameStats::default();
        for program in self.post_programs.iter().filter(|p| p.is_enabled()) {
            let read = &self.targets.ping_pong[self.read.index()];
            let write = &self.targets.ping_pong[self.read.other().index()];
            write.bind(device)?;
            program.bind(device)?;
            device.bind_texture(POST_COLOR_SLOT, Some(color_texture(read, 0)?))?;
            device.draw(&DrawCall::fullscreen())?;
            self.read = self.read.other();
            stats.post_draws += 1;
            stats.swaps += 1;
        }
        self.stats = stats;
        Ok(())
    }

    /// Copies the chain result and the G-buffer depth into the forward
    /// target, runs `draw` on it with depth test on, then composites the
    /// forward color onto the display.
    pub fn final_forward_pass<F>(
        &mut self,
        device: &mut dyn GpuDevice,
        draw: F,
    ) -> Result<(), PipelineError>
    where
        F: FnOnce(&mut dyn GpuDevice) -> anyhow::Result<()>,
    {
        self.enter(Phase::PostProcess, Phase::ForwardFinal)?;
        let result = self.run_forward(device, draw);
        if result.is_ok() {
            self.phase = Phase::Idle;
        }
        self.finish(result)
    }

    fn run_forward<F>(&mut self, device: &mut dyn GpuDevice, draw: F) -> Result<(), PipelineError>
    where
        F: FnOnce(&mut dyn GpuDevice) -> anyhow::Result<()>,
    {
        let targets = &self.targets;
        let read = &targets.ping_pong[self.read.index()];
        RenderTarget::copy_color(device, read, &targets.forward, 0)?;
        RenderTarget::copy_depth(device, &targets.g_buffer, &targets.forward)?;

        targets.forward.bind(device)?;
        device.set_depth_test(true);
        draw(device).map_err(PipelineError::Callback)?;

        device.set_depth_test(false);
        RenderTarget::unbind(device)?;
        self.composite.bind(device)?;
        device.bind_texture(0, Some(color_texture(&targets.forward, 0)?))?;
        device.draw(&DrawCall::fullscreen())?;
        Ok(())
    }

    /// Runs all three passes in order.
    pub fn render_frame<G, F>(
        &mut self,
        device: &mut dyn GpuDevice,
        camera: &CameraJob,
        geometry: G,
        forward: F,
    ) -> Result<(), PipelineError>
    where
        G: FnOnce(&mut dyn GpuDevice, &ShaderProgram) -> anyhow::Result<()>,
        F: FnOnce(&mut dyn GpuDevice) -> anyhow::Result<()>,
    {
        self.geometry_pass(device, camera, geometry)?;
        self.post_processing_pass(device)?;
        self.final_forward_pass(device, forward)
    }

    /// Renders one frame of scene-graph jobs.
    ///
    /// The first camera job provides view and projection (identity without
    /// one). Light jobs feed every lighting post program. Forward jobs are
    /// drawn with `forward` and skipped when it is `None`.
    pub fn render_scene(
        &mut self,
        device: &mut dyn GpuDevice,
        jobs: &RenderJobs<'_>,
        forward: Option<&ShaderProgram>,
    ) -> Result<(), PipelineError> {
        self.render_scene_with(device, jobs, forward, |_, _| Ok(()))
    }

    /// [`render_scene`](Self::render_scene) plus `extra`, run in the forward
    /// pass after the forward jobs (a skybox, for instance).
    pub fn render_scene_with<F>(
        &mut self,
        device: &mut dyn GpuDevice,
        jobs: &RenderJobs<'_>,
        forward: Option<&ShaderProgram>,
        extra: F,
    ) -> Result<(), PipelineError>
    where
        F: FnOnce(&mut dyn GpuDevice, &CameraJob) -> anyhow::Result<()>,
    {
        let camera = jobs.camera().copied().unwrap_or_else(identity_camera);
        let lights = LightSet::collect(jobs.lights.iter().map(|job| (job.payload, job.world)));
        self.apply_lights(device, &lights, &camera)?;
        self.render_frame(
            device,
            &camera,
            |device, program| {
                for job in &jobs.geometry {
                    job.payload.draw_in_world(device, program, job.world)?;
                }
                Ok(())
            },
            |device| {
                match forward {
                    Some(program) => draw_jobs(device, program, &camera, &jobs.forward)?,
                    None if !jobs.forward.is_empty() => {
                        log::debug!("{} forward jobs but no forward program", jobs.forward.len())
                    }
                    None => {}
                }
                extra(device, &camera)
            },
        )
    }

    pub fn destroy(self, device: &mut dyn GpuDevice) {
        self.targets.destroy(device);
    }
}

/// Draws scene-graph mesh jobs with `program`, setting its view and projection from `camera`.
pub fn draw_jobs(
    device: &mut dyn GpuDevice,
    program: &ShaderProgram,
    camera: &CameraJob,
    jobs: &[RenderJob<'_, MeshInstance>],
) -> Result<(), GpuError> {
    program.bind(device)?;
    program.set_uniform(device, "uView", camera.view)?;
    program.set_uniform(device, "uProjection", camera.projection)?;
    for job in jobs {
        job.payload.draw_in_world(device, program, job.world)?;
    }
    Ok(())
}

/// A camera at the origin with identity view and projection.
pub fn identity_camera() -> CameraJob {
    CameraJob {
        position: Vector3::new(0.0, 0.0, 0.0),
        view: Matrix4::identity(),
        projection: Matrix4::identity(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::SoftwareDevice;

    fn pipeline(device: &mut SoftwareDevice) -> RenderPipeline {
        RenderPipeline::new(device, &Config::default().with_size(4, 4)).unwrap()
    }

    #[test]
    fn g_buffer_slots_follow_insertion_order() {
        let mut device = SoftwareDevice::new(4, 4);
        let pipeline = pipeline(&mut device);
        let formats: Vec<_> = pipeline
            .g_buffer()
            .color_attachments()
            .iter()
            .map(|a| a.format)
            .collect();
        assert_eq!(
            formats,
            G_BUFFER_COLORS.iter().copied().map(Some).collect::<Vec<_>>()
        );
        assert!(pipeline.g_buffer().depth_attachment().is_some());
    }

    #[test]
    fn passes_out_of_order_are_rejected() {
        let mut device = SoftwareDevice::new(4, 4);
        let mut pipeline = pipeline(&mut device);
        device.begin_frame().unwrap();
        let err = pipeline.post_processing_pass(&mut device).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::PhaseOrder {
                expected: Phase::Geometry,
                found: Phase::Idle
            }
        ));
        assert_eq!(pipeline.phase(), Phase::Idle);
    }

    #[test]
    fn failing_callback_resets_to_idle() {
        let mut device = SoftwareDevice::new(4, 4);
        let mut pipeline = pipeline(&mut device);
        device.begin_frame().unwrap();
        let err = pipeline
            .geometry_pass(&mut device, &identity_camera(), |_, _| {
                Err(anyhow::anyhow!("boom"))
            })
            .unwrap_err();
        assert!(matches!(err, PipelineError::Callback(_)));
        assert_eq!(pipeline.phase(), Phase::Idle);
    }

    #[test]
    fn too_few_bytes_per_sample_fails_at_setup() {
        let mut device = SoftwareDevice::with_limits(
            4,
            4,
            crate::gpu::DeviceLimits {
                max_color_attachment_bytes_per_sample: 32,
                ..Default::default()
            },
        );
        let err = RenderPipeline::new(&mut device, &Config::default().with_size(4, 4)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::BytesPerSample {
                required: 56,
                max: 32
            }
        ));
    }
}
