//! [`GpuDevice`] on top of wgpu.
//!
//! wgpu has no global "bound state", so this device keeps it on the CPU side
//! and turns every clear and draw into its own short render pass:
//! - the bound target becomes the pass attachments (loaded, then stored)
//! - each draw snapshots the program's uniform bytes into a fresh buffer, so
//!   set-uniform-then-draw behaves as it would on an immediate-mode API
//! - render pipelines are built lazily and cached per program, target formats,
//!   depth state, culling and topology
//! - blits are `copy_texture_to_texture` calls on the frame's encoder

use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::{
    data_structures::mesh::Vertex,
    gpu::{
        AttachmentSlot, BlitDesc, BufferHandle, BufferKind, DeviceLimits, DrawCall, DrawTarget,
        FramebufferHandle, FrontFace, GpuDevice, GpuError, ProgramDesc, ProgramHandle, Region,
        SlotKind, Slots, TextureDesc, TextureFormat, TextureHandle, TextureKind, Topology,
        UniformLayout, UniformValue,
    },
};

pub const MAX_TEXTURE_SLOTS: u32 = 8;

impl From<TextureFormat> for wgpu::TextureFormat {
    fn from(format: TextureFormat) -> Self {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }
}

impl From<Topology> for wgpu::PrimitiveTopology {
    fn from(topology: Topology) -> Self {
        match topology {
            Topology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
            Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        }
    }
}

impl From<FrontFace> for wgpu::FrontFace {
    fn from(front_face: FrontFace) -> Self {
        match front_face {
            FrontFace::Ccw => wgpu::FrontFace::Ccw,
            FrontFace::Cw => wgpu::FrontFace::Cw,
        }
    }
}

/// Where [`DrawTarget::Display`] renders to.
pub enum Display {
    Surface {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    },
    /// Stand-in for a window when running headless.
    Offscreen { texture: wgpu::Texture },
}

impl Display {
    fn format(&self) -> wgpu::TextureFormat {
        match self {
            Display::Surface { config, .. } => config.format,
            Display::Offscreen { texture } => texture.format(),
        }
    }

    fn size(&self) -> (u32, u32) {
        match self {
            Display::Surface { config, .. } => (config.width, config.height),
            Display::Offscreen { texture } => (texture.width(), texture.height()),
        }
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDesc,
}

struct Framebuffer {
    width: u32,
    height: u32,
    colors: HashMap<u32, TextureHandle>,
    depth: Option<TextureHandle>,
}

impl Framebuffer {
    fn slot(&self, slot: AttachmentSlot) -> Result<TextureHandle, GpuError> {
        match slot {
            AttachmentSlot::Color(i) => self.colors.get(&i).copied(),
            AttachmentSlot::Depth => self.depth,
        }
        .ok_or(GpuError::EmptySlot(slot))
    }
}

struct GpuProgram {
    label: String,
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    layout: UniformLayout,
    data: Vec<u8>,
    textures: Vec<SlotKind>,
    mesh_vertices: bool,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramHandle,
    colors: Vec<wgpu::TextureFormat>,
    depth: Option<wgpu::TextureFormat>,
    depth_test: bool,
    face_culling: bool,
    front_face: FrontFace,
    topology: Topology,
}

struct FrameState {
    encoder: wgpu::CommandEncoder,
    surface_texture: Option<wgpu::SurfaceTexture>,
    display_view: wgpu::TextureView,
}

struct DrawState {
    target: DrawTarget,
    program: Option<ProgramHandle>,
    slots: Vec<Option<TextureHandle>>,
    depth_test: bool,
    face_culling: bool,
    front_face: FrontFace,
    clear_color: wgpu::Color,
}

/// Resolved attachments of the bound target.
struct PassTargets {
    colors: Vec<(wgpu::TextureView, wgpu::TextureFormat)>,
    depth: Option<wgpu::TextureView>,
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    display: Display,
    limits: DeviceLimits,
    textures: Slots<GpuTexture>,
    buffers: Slots<wgpu::Buffer>,
    framebuffers: Slots<Framebuffer>,
    programs: Slots<GpuProgram>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    sampler: wgpu::Sampler,
    fallback: wgpu::TextureView,
    state: DrawState,
    frame: Option<FrameState>,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, display: Display) -> Self {
        let device_limits = device.limits();
        let limits = DeviceLimits {
            max_color_attachments: device_limits.max_color_attachments,
            max_color_attachment_bytes_per_sample: device_limits
                .max_color_attachment_bytes_per_sample,
            max_texture_slots: MAX_TEXTURE_SLOTS
                .min(device_limits.max_sampled_textures_per_shader_stage),
        };
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("nearest sampler"),
            ..Default::default()
        });
        let fallback = white_texture(&device, &queue);
        Self {
            device,
            queue,
            display,
            limits,
            textures: Slots::new("texture"),
            buffers: Slots::new("buffer"),
            framebuffers: Slots::new("framebuffer"),
            programs: Slots::new("program"),
            pipelines: HashMap::new(),
            sampler,
            fallback,
            state: DrawState {
                target: DrawTarget::Display,
                program: None,
                slots: vec![None; limits.max_texture_slots as usize],
                depth_test: false,
                face_culling: false,
                front_face: FrontFace::Ccw,
                clear_color: wgpu::Color::BLACK,
            },
            frame: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Reconfigures the window surface. Offscreen displays keep their size.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        if let Display::Surface { surface, config } = &mut self.display {
            config.width = width;
            config.height = height;
            surface.configure(&self.device, config);
        }
    }

    /// Offscreen display texture of a headless device.
    pub fn display_texture(&self) -> Option<&wgpu::Texture> {
        match &self.display {
            Display::Offscreen { texture } => Some(texture),
            Display::Surface { .. } => None,
        }
    }

    fn targets(&self) -> Result<PassTargets, GpuError> {
        match self.state.target {
            DrawTarget::Display => {
                let frame = self.frame.as_ref().ok_or(GpuError::NoFrame)?;
                Ok(PassTargets {
                    colors: vec![(frame.display_view.clone(), self.display.format())],
                    depth: None,
                })
            }
            DrawTarget::Framebuffer {
                framebuffer,
                outputs,
            } => {
                let fb = self.framebuffers.get(framebuffer.0)?;
                let mut colors = Vec::with_capacity(outputs as usize);
                for i in 0..outputs {
                    let tex = self.textures.get(fb.slot(AttachmentSlot::Color(i))?.0)?;
                    colors.push((tex.view.clone(), tex.desc.format.into()));
                }
                let depth = match fb.depth {
                    Some(handle) => Some(self.textures.get(handle.0)?.view.clone()),
                    None => None,
                };
                Ok(PassTargets { colors, depth })
            }
        }
    }

    fn pipeline(&mut self, key: PipelineKey) -> Result<wgpu::RenderPipeline, GpuError> {
        if let Some(pipeline) = self.pipelines.get(&key) {
            return Ok(pipeline.clone());
        }
        let program = self.programs.get(key.program.0)?;
        log::debug!("building render pipeline for `{}`", program.label);
        let vertex_layouts = if program.mesh_vertices {
            vec![Vertex::desc()]
        } else {
            Vec::new()
        };
        let targets: Vec<Option<wgpu::ColorTargetState>> = key
            .colors
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: *format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                cache: None,
                label: Some(&program.label),
                layout: Some(&program.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &program.vertex,
                    entry_point: Some("vs_main"),
                    buffers: &vertex_layouts,
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &program.fragment,
                    entry_point: Some("fs_main"),
                    targets: &targets,
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: key.topology.into(),
                    strip_index_format: match key.topology {
                        Topology::TriangleStrip => Some(wgpu::IndexFormat::Uint32),
                        Topology::TriangleList => None,
                    },
                    front_face: key.front_face.into(),
                    cull_mode: key.face_culling.then_some(wgpu::Face::Back),
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: key.depth.map(|format| wgpu::DepthStencilState {
                    format,
                    depth_write_enabled: Some(key.depth_test),
                    depth_compare: Some(if key.depth_test {
                        wgpu::CompareFunction::Less
                    } else {
                        wgpu::CompareFunction::Always
                    }),
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview_mask: None,
            });
        self.pipelines.insert(key, pipeline.clone());
        Ok(pipeline)
    }

    fn uniform_group(&self, program: &GpuProgram) -> wgpu::BindGroup {
        if program.layout.is_empty() {
            return self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("empty uniforms"),
                layout: &program.uniform_layout,
                entries: &[],
            });
        }
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{} uniforms", program.label)),
                contents: &program.data,
                usage: wgpu::BufferUsages::UNIFORM,
            });
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} uniform group", program.label)),
            layout: &program.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        })
    }

    fn texture_group(&self, program: &GpuProgram) -> Result<wgpu::BindGroup, GpuError> {
        let mut views = Vec::with_capacity(program.textures.len());
        for (slot, kind) in program.textures.iter().enumerate() {
            let view = match self.state.slots.get(slot).copied().flatten() {
                Some(handle) => self.textures.get(handle.0)?.view.clone(),
                None if *kind == SlotKind::Color => self.fallback.clone(),
                None => {
                    return Err(GpuError::MissingTexture {
                        program: program.label.clone(),
                        slot: slot as u32,
                    });
                }
            };
            views.push(view);
        }
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Sampler(&self.sampler),
        }];
        entries.extend(views.iter().enumerate().map(|(i, view)| wgpu::BindGroupEntry {
            binding: i as u32 + 1,
            resource: wgpu::BindingResource::TextureView(view),
        }));
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} texture group", program.label)),
            layout: &program.texture_layout,
            entries: &entries,
        }))
    }

    fn pass<'a>(
        encoder: &'a mut wgpu::CommandEncoder,
        targets: &PassTargets,
        clear: Option<wgpu::Color>,
    ) -> wgpu::RenderPass<'a> {
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = targets
            .colors
            .iter()
            .map(|(view, _)| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: match clear {
                            Some(color) => wgpu::LoadOp::Clear(color),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })
            })
            .collect();
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("deferred-ngin pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: targets.depth.as_ref().map(|view| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: match clear {
                            Some(_) => wgpu::LoadOp::Clear(1.0),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
            multiview_mask: None,
        })
    }
}

fn white_texture(device: &wgpu::Device, queue: &wgpu::Queue) -> wgpu::TextureView {
    let size = wgpu::Extent3d {
        width: 1,
        height: 1,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("fallback white"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            aspect: wgpu::TextureAspect::All,
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
        },
        &[255, 255, 255, 255],
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4),
            rows_per_image: Some(1),
        },
        size,
    );
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn texture_entry(binding: u32, kind: SlotKind) -> wgpu::BindGroupLayoutEntry {
    let (sample_type, view_dimension) = match kind {
        SlotKind::Color => (
            wgpu::TextureSampleType::Float { filterable: false },
            wgpu::TextureViewDimension::D2,
        ),
        SlotKind::Depth => (
            wgpu::TextureSampleType::Depth,
            wgpu::TextureViewDimension::D2,
        ),
        SlotKind::Cube => (
            wgpu::TextureSampleType::Float { filterable: false },
            wgpu::TextureViewDimension::Cube,
        ),
    };
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            multisampled: false,
            view_dimension,
            sample_type,
        },
        count: None,
    }
}

impl GpuDevice for WgpuDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn display_size(&self) -> (u32, u32) {
        self.display.size()
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, GpuError> {
        let usage = match desc.kind {
            TextureKind::D2 => {
                wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST
            }
            TextureKind::Cube => {
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST
            }
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width.max(1),
                height: desc.height.max(1),
                depth_or_array_layers: desc.kind.layers(),
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format.into(),
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&desc.label),
            dimension: Some(match desc.kind {
                TextureKind::D2 => wgpu::TextureViewDimension::D2,
                TextureKind::Cube => wgpu::TextureViewDimension::Cube,
            }),
            ..Default::default()
        });
        Ok(TextureHandle(self.textures.insert(GpuTexture {
            texture,
            view,
            desc: desc.clone(),
        })))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(tex) = self.textures.remove(texture.0) {
            tex.texture.destroy();
        }
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        data: &[u8],
    ) -> Result<(), GpuError> {
        let tex = self.textures.get(texture.0)?;
        let bytes_per_row = tex.desc.width * tex.desc.format.bytes_per_pixel();
        let expected = (bytes_per_row * tex.desc.height) as usize;
        if data.len() != expected {
            return Err(GpuError::DataLength {
                expected,
                found: data.len(),
            });
        }
        if layer >= tex.desc.kind.layers() {
            return Err(GpuError::LayerOutOfRange {
                layer,
                layers: tex.desc.kind.layers(),
            });
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: layer,
                },
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(tex.desc.height),
            },
            wgpu::Extent3d {
                width: tex.desc.width,
                height: tex.desc.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn create_buffer(&mut self, kind: BufferKind, data: &[u8]) -> Result<BufferHandle, GpuError> {
        let (label, usage) = match kind {
            BufferKind::Vertex => ("Vertex Buffer", wgpu::BufferUsages::VERTEX),
            BufferKind::Index => ("Index Buffer", wgpu::BufferUsages::INDEX),
        };
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: data,
                usage,
            });
        Ok(BufferHandle(self.buffers.insert(buffer)))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(buffer) = self.buffers.remove(buffer.0) {
            buffer.destroy();
        }
    }

    fn create_framebuffer(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<FramebufferHandle, GpuError> {
        Ok(FramebufferHandle(self.framebuffers.insert(Framebuffer {
            width,
            height,
            colors: HashMap::new(),
            depth: None,
        })))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(framebuffer.0);
    }

    fn attach(
        &mut self,
        framebuffer: FramebufferHandle,
        slot: AttachmentSlot,
        texture: Option<TextureHandle>,
    ) -> Result<(), GpuError> {
        if let AttachmentSlot::Color(i) = slot {
            if i >= self.limits.max_color_attachments {
                return Err(GpuError::SlotOutOfRange {
                    slot: i,
                    max: self.limits.max_color_attachments,
                });
            }
        }
        if let Some(handle) = texture {
            let desc = &self.textures.get(handle.0)?.desc;
            let fb = self.framebuffers.get(framebuffer.0)?;
            if desc.width != fb.width || desc.height != fb.height {
                return Err(GpuError::SizeMismatch {
                    src_width: desc.width,
                    src_height: desc.height,
                    dst_width: fb.width,
                    dst_height: fb.height,
                });
            }
        }
        let fb = self.framebuffers.get_mut(framebuffer.0)?;
        match (slot, texture) {
            (AttachmentSlot::Color(i), Some(t)) => {
                fb.colors.insert(i, t);
            }
            (AttachmentSlot::Color(i), None) => {
                fb.colors.remove(&i);
            }
            (AttachmentSlot::Depth, t) => fb.depth = t,
        }
        Ok(())
    }

    fn bind_target(&mut self, target: DrawTarget) -> Result<(), GpuError> {
        if let DrawTarget::Framebuffer { framebuffer, .. } = target {
            self.framebuffers.get(framebuffer.0)?;
        }
        self.state.target = target;
        Ok(())
    }

    fn blit(&mut self, blit: &BlitDesc) -> Result<(), GpuError> {
        let src_handle = self.framebuffers.get(blit.src.0)?.slot(blit.src_slot)?;
        let dst_handle = self.framebuffers.get(blit.dst.0)?.slot(blit.dst_slot)?;
        let src = self.textures.get(src_handle.0)?;
        let dst = self.textures.get(dst_handle.0)?;
        if src.desc.format != dst.desc.format {
            return Err(GpuError::FormatMismatch {
                src: src.desc.format,
                dst: dst.desc.format,
            });
        }
        if src.desc.width != dst.desc.width || src.desc.height != dst.desc.height {
            return Err(GpuError::SizeMismatch {
                src_width: src.desc.width,
                src_height: src.desc.height,
                dst_width: dst.desc.width,
                dst_height: dst.desc.height,
            });
        }
        let r = blit.region;
        let full = Region::full(src.desc.width, src.desc.height);
        let out_of_bounds = r.x + r.width > src.desc.width || r.y + r.height > src.desc.height;
        // depth images can only be copied whole
        if out_of_bounds || (src.desc.format.is_depth() && r != full) {
            return Err(GpuError::RegionOutOfBounds {
                region: r,
                width: src.desc.width,
                height: src.desc.height,
            });
        }
        let (src, dst) = (src.texture.clone(), dst.texture.clone());
        let frame = self.frame.as_mut().ok_or(GpuError::NoFrame)?;
        let origin = wgpu::Origin3d { x: r.x, y: r.y, z: 0 };
        frame.encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &src,
                mip_level: 0,
                origin,
            },
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &dst,
                mip_level: 0,
                origin,
            },
            wgpu::Extent3d {
                width: r.width,
                height: r.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn create_program(&mut self, desc: ProgramDesc) -> Result<ProgramHandle, GpuError> {
        let missing = |stage| GpuError::MissingStage {
            program: desc.label.clone(),
            stage,
        };
        let vertex_src = desc.vertex.clone().ok_or_else(|| missing("vertex"))?;
        let fragment_src = desc.fragment.clone().ok_or_else(|| missing("fragment"))?;
        let vertex = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&format!("{} vertex", desc.label)),
                source: wgpu::ShaderSource::Wgsl(vertex_src),
            });
        let fragment = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&format!("{} fragment", desc.label)),
                source: wgpu::ShaderSource::Wgsl(fragment_src),
            });

        let layout = UniformLayout::new(&desc.uniforms);
        let mut uniform_entries = Vec::new();
        if !layout.is_empty() {
            uniform_entries.push(wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }
        let uniform_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{} uniform layout", desc.label)),
                entries: &uniform_entries,
            });

        let mut texture_entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
            count: None,
        }];
        texture_entries.extend(
            desc.textures
                .iter()
                .enumerate()
                .map(|(i, kind)| texture_entry(i as u32 + 1, *kind)),
        );
        let texture_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{} texture layout", desc.label)),
                entries: &texture_entries,
            });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&format!("{} pipeline layout", desc.label)),
                bind_group_layouts: &[Some(&uniform_layout), Some(&texture_layout)],
                immediate_size: 0,
            });

        Ok(ProgramHandle(self.programs.insert(GpuProgram {
            data: vec![0; layout.size() as usize],
            label: desc.label,
            vertex,
            fragment,
            layout,
            textures: desc.textures,
            mesh_vertices: desc.mesh_vertices,
            uniform_layout,
            texture_layout,
            pipeline_layout,
        })))
    }

    fn use_program(&mut self, program: ProgramHandle) -> Result<(), GpuError> {
        self.programs.get(program.0)?;
        self.state.program = Some(program);
        Ok(())
    }

    fn set_uniform(
        &mut self,
        program: ProgramHandle,
        name: &str,
        value: UniformValue,
    ) -> Result<(), GpuError> {
        let program = self.programs.get_mut(program.0)?;
        program
            .layout
            .write(&mut program.data, &program.label, name, &value)
    }

    fn bind_texture(&mut self, slot: u32, texture: Option<TextureHandle>) -> Result<(), GpuError> {
        let max = self.limits.max_texture_slots;
        if let Some(handle) = texture {
            self.textures.get(handle.0)?;
        }
        let entry = self
            .state
            .slots
            .get_mut(slot as usize)
            .ok_or(GpuError::SlotOutOfRange { slot, max })?;
        *entry = texture;
        Ok(())
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.state.depth_test = enabled;
    }

    fn set_face_culling(&mut self, enabled: bool) {
        self.state.face_culling = enabled;
    }

    fn set_front_face(&mut self, front_face: FrontFace) {
        self.state.front_face = front_face;
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        self.state.clear_color = wgpu::Color {
            r: color[0] as f64,
            g: color[1] as f64,
            b: color[2] as f64,
            a: color[3] as f64,
        };
    }

    fn clear(&mut self) -> Result<(), GpuError> {
        let targets = self.targets()?;
        let clear = self.state.clear_color;
        let frame = self.frame.as_mut().ok_or(GpuError::NoFrame)?;
        drop(Self::pass(&mut frame.encoder, &targets, Some(clear)));
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) -> Result<(), GpuError> {
        let program_handle = self.state.program.ok_or(GpuError::NoProgram)?;
        let targets = self.targets()?;
        let key = PipelineKey {
            program: program_handle,
            colors: targets.colors.iter().map(|(_, format)| *format).collect(),
            depth: targets
                .depth
                .as_ref()
                .map(|_| TextureFormat::Depth32Float.into()),
            depth_test: self.state.depth_test,
            face_culling: self.state.face_culling,
            front_face: self.state.front_face,
            topology: call.topology,
        };
        let pipeline = self.pipeline(key)?;
        let program = self.programs.get(program_handle.0)?;
        let uniforms = self.uniform_group(program);
        let textures = self.texture_group(program)?;
        let vertices = match call.vertices {
            Some(handle) => Some(self.buffers.get(handle.0)?.clone()),
            None => None,
        };
        let indices = match call.indices {
            Some(handle) => Some(self.buffers.get(handle.0)?.clone()),
            None => None,
        };

        let frame = self.frame.as_mut().ok_or(GpuError::NoFrame)?;
        let mut pass = Self::pass(&mut frame.encoder, &targets, None);
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &uniforms, &[]);
        pass.set_bind_group(1, &textures, &[]);
        if let Some(vertices) = &vertices {
            pass.set_vertex_buffer(0, vertices.slice(..));
        }
        match &indices {
            Some(indices) => {
                pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..call.count, 0, 0..1);
            }
            None => pass.draw(0..call.count, 0..1),
        }
        Ok(())
    }

    fn begin_frame(&mut self) -> Result<(), GpuError> {
        let (surface_texture, display_view) = match &self.display {
            Display::Surface { surface, .. } => {
                let texture = match surface.get_current_texture() {
                    wgpu::CurrentSurfaceTexture::Success(texture)
                    | wgpu::CurrentSurfaceTexture::Suboptimal(texture) => texture,
                    other => return Err(GpuError::Surface(format!("{other:?}"))),
                };
                let view = texture
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                (Some(texture), view)
            }
            Display::Offscreen { texture } => (
                None,
                texture.create_view(&wgpu::TextureViewDescriptor::default()),
            ),
        };
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        self.frame = Some(FrameState {
            encoder,
            surface_texture,
            display_view,
        });
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), GpuError> {
        let frame = self.frame.take().ok_or(GpuError::NoFrame)?;
        self.queue.submit(std::iter::once(frame.encoder.finish()));
        if let Some(surface_texture) = frame.surface_texture {
            surface_texture.present();
        }
        Ok(())
    }
}
