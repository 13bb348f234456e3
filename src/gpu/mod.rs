//! GPU device abstraction.
//!
//! The rest of the crate never talks to a graphics API directly. Everything a
//! frame needs is expressed through [`GpuDevice`]:
//! - texture, buffer and framebuffer lifetime (handles are plain indices)
//! - framebuffer attachment and draw-target selection
//! - same-size blits between framebuffer attachments
//! - program creation, uniforms and numbered texture slots
//! - depth test / culling toggles and draw submission
//!
//! Two implementations ship with the crate: [`wgpu_device::WgpuDevice`] for
//! real rendering and [`software::SoftwareDevice`], a CPU reference device that
//! logs every command and shades full-screen passes per pixel.

use std::{borrow::Cow, fmt, sync::Arc};

use thiserror::Error;

pub mod software;
pub mod uniform;
pub mod wgpu_device;

pub use uniform::{UniformKind, UniformLayout, UniformValue};

use software::NativeShader;

macro_rules! handle {
    ($name:ident) => {
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub fn index(&self) -> usize {
                self.0 as usize
            }
        }
    };
}

handle!(TextureHandle);
handle!(BufferHandle);
handle!(FramebufferHandle);
handle!(ProgramHandle);

/// Pixel formats a texture can be created with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8 bit per channel, normalized to `[0, 1]`.
    Rgba8Unorm,
    /// 32 bit float per channel.
    Rgba32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm => 4,
            TextureFormat::Rgba32Float => 16,
            TextureFormat::Depth32Float => 4,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    D2,
    /// Six square layers in +X, -X, +Y, -Y, +Z, -Z order.
    Cube,
}

impl TextureKind {
    pub fn layers(&self) -> u32 {
        match self {
            TextureKind::D2 => 1,
            TextureKind::Cube => 6,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub kind: TextureKind,
}

impl TextureDesc {
    pub fn new_2d(label: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format,
            kind: TextureKind::D2,
        }
    }

    pub fn new_cube(label: impl Into<String>, size: u32, format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            width: size,
            height: size,
            format,
            kind: TextureKind::Cube,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// A framebuffer slot an image can be attached to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AttachmentSlot {
    Color(u32),
    Depth,
}

/// Where subsequent draws and clears land.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DrawTarget {
    /// The window surface (or the offscreen stand-in of a headless device).
    Display,
    /// A framebuffer with color slots `0..outputs` enabled as simultaneous outputs.
    Framebuffer {
        framebuffer: FramebufferHandle,
        outputs: u32,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlitDesc {
    pub src: FramebufferHandle,
    pub src_slot: AttachmentSlot,
    pub dst: FramebufferHandle,
    pub dst_slot: AttachmentSlot,
    pub region: Region,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topology {
    TriangleList,
    TriangleStrip,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum FrontFace {
    #[default]
    Ccw,
    Cw,
}

/// A single draw submission.
///
/// Without a vertex buffer the draw is attribute-less: the vertex stage derives
/// its positions from the vertex index. That is how every full-screen pass is
/// issued.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DrawCall {
    pub topology: Topology,
    pub vertices: Option<BufferHandle>,
    pub indices: Option<BufferHandle>,
    pub count: u32,
}

impl DrawCall {
    /// Three procedural vertices covering the whole viewport.
    pub fn fullscreen() -> Self {
        Self {
            topology: Topology::TriangleList,
            vertices: None,
            indices: None,
            count: 3,
        }
    }

    pub fn is_fullscreen(&self) -> bool {
        self.vertices.is_none() && self.indices.is_none() && self.count == 3
    }
}

/// What a program expects to find bound at one texture slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Color,
    Depth,
    Cube,
}

/// Everything needed to build a program on any device.
///
/// `vertex`/`fragment` are WGSL sources with `vs_main`/`fs_main` entry points.
/// `native` is the CPU counterpart of the fragment stage, used by the software
/// device. A device refuses a program lacking the stage it needs.
#[derive(Clone)]
pub struct ProgramDesc {
    pub label: String,
    pub vertex: Option<Cow<'static, str>>,
    pub fragment: Option<Cow<'static, str>>,
    pub native: Option<NativeShader>,
    pub uniforms: Vec<(String, UniformKind)>,
    pub textures: Vec<SlotKind>,
    /// Whether the vertex stage consumes [`crate::data_structures::mesh::Vertex`] buffers.
    pub mesh_vertices: bool,
}

impl ProgramDesc {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            vertex: None,
            fragment: None,
            native: None,
            uniforms: Vec::new(),
            textures: Vec::new(),
            mesh_vertices: false,
        }
    }

    pub fn with_wgsl(
        mut self,
        vertex: impl Into<Cow<'static, str>>,
        fragment: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.vertex = Some(vertex.into());
        self.fragment = Some(fragment.into());
        self
    }

    pub fn with_native(mut self, shader: NativeShader) -> Self {
        self.native = Some(shader);
        self
    }

    pub fn with_native_fn<F>(self, shader: F) -> Self
    where
        F: Fn(&software::Fragment<'_>, &mut [[f32; 4]]) + Send + Sync + 'static,
    {
        self.with_native(Arc::new(shader))
    }

    pub fn with_uniform(mut self, name: impl Into<String>, kind: UniformKind) -> Self {
        self.uniforms.push((name.into(), kind));
        self
    }

    pub fn with_textures(mut self, slots: impl IntoIterator<Item = SlotKind>) -> Self {
        self.textures.extend(slots);
        self
    }

    pub fn with_mesh_vertices(mut self) -> Self {
        self.mesh_vertices = true;
        self
    }
}

impl fmt::Debug for ProgramDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramDesc")
            .field("label", &self.label)
            .field("wgsl", &self.fragment.is_some())
            .field("native", &self.native.is_some())
            .field("uniforms", &self.uniforms)
            .field("textures", &self.textures)
            .field("mesh_vertices", &self.mesh_vertices)
            .finish()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_color_attachments: u32,
    pub max_color_attachment_bytes_per_sample: u32,
    pub max_texture_slots: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_color_attachments: 8,
            max_color_attachment_bytes_per_sample: 128,
            max_texture_slots: 8,
        }
    }
}

/// Errors raised by a device call.
///
/// These indicate a broken resource contract rather than a transient failure
/// and are never retried.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("unknown {kind} handle {index}")]
    UnknownHandle { kind: &'static str, index: u32 },
    #[error("size mismatch: {src_width}x{src_height} vs {dst_width}x{dst_height}")]
    SizeMismatch {
        src_width: u32,
        src_height: u32,
        dst_width: u32,
        dst_height: u32,
    },
    #[error("format mismatch: {src:?} vs {dst:?}")]
    FormatMismatch {
        src: TextureFormat,
        dst: TextureFormat,
    },
    #[error("region {region:?} exceeds the {width}x{height} attachment")]
    RegionOutOfBounds {
        region: Region,
        width: u32,
        height: u32,
    },
    #[error("framebuffer has no image attached at {0:?}")]
    EmptySlot(AttachmentSlot),
    #[error("texture slot {slot} is out of range (max {max})")]
    SlotOutOfRange { slot: u32, max: u32 },
    #[error("layer {layer} is out of range for a texture with {layers} layers")]
    LayerOutOfRange { layer: u32, layers: u32 },
    #[error("texel ({x}, {y}) is outside the {width}x{height} texture")]
    TexelOutOfBounds { x: u32, y: u32, width: u32, height: u32 },
    #[error("program `{program}` expects a texture at slot {slot}")]
    MissingTexture { program: String, slot: u32 },
    #[error("no program bound")]
    NoProgram,
    #[error("program `{program}` has no uniform named `{name}`")]
    UnknownUniform { program: String, name: String },
    #[error("uniform `{name}` is {expected:?}, got {found:?}")]
    UniformType {
        name: String,
        expected: UniformKind,
        found: UniformKind,
    },
    #[error("program `{program}` lacks the shader stage this device needs: {stage}")]
    MissingStage {
        program: String,
        stage: &'static str,
    },
    #[error("draw or clear outside of begin_frame/end_frame")]
    NoFrame,
    #[error("expected {expected} bytes of texel data, got {found}")]
    DataLength { expected: usize, found: usize },
    #[error("surface error: {0}")]
    Surface(String),
}

/// The resource and command surface the renderer is built on.
///
/// All calls are immediate: state set by one call (bound target, program,
/// texture slots, depth test) stays in effect until changed.
pub trait GpuDevice {
    fn limits(&self) -> DeviceLimits;

    /// Size of the display surface.
    fn display_size(&self) -> (u32, u32);

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, GpuError>;
    fn destroy_texture(&mut self, texture: TextureHandle);
    /// Uploads tightly packed texels for one layer.
    fn write_texture(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        data: &[u8],
    ) -> Result<(), GpuError>;

    fn create_buffer(&mut self, kind: BufferKind, data: &[u8]) -> Result<BufferHandle, GpuError>;
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_framebuffer(&mut self, width: u32, height: u32)
    -> Result<FramebufferHandle, GpuError>;
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);
    /// Attaches `texture` to `slot`, or detaches whatever is there with `None`.
    fn attach(
        &mut self,
        framebuffer: FramebufferHandle,
        slot: AttachmentSlot,
        texture: Option<TextureHandle>,
    ) -> Result<(), GpuError>;
    fn bind_target(&mut self, target: DrawTarget) -> Result<(), GpuError>;
    fn blit(&mut self, blit: &BlitDesc) -> Result<(), GpuError>;

    fn create_program(&mut self, desc: ProgramDesc) -> Result<ProgramHandle, GpuError>;
    fn use_program(&mut self, program: ProgramHandle) -> Result<(), GpuError>;
    fn set_uniform(
        &mut self,
        program: ProgramHandle,
        name: &str,
        value: UniformValue,
    ) -> Result<(), GpuError>;
    fn bind_texture(&mut self, slot: u32, texture: Option<TextureHandle>) -> Result<(), GpuError>;

    fn set_depth_test(&mut self, enabled: bool);
    fn set_face_culling(&mut self, enabled: bool);
    fn set_front_face(&mut self, front_face: FrontFace);
    fn set_clear_color(&mut self, color: [f32; 4]);
    /// Clears every enabled output of the bound target (and its depth, if any).
    fn clear(&mut self) -> Result<(), GpuError>;
    fn draw(&mut self, call: &DrawCall) -> Result<(), GpuError>;

    fn begin_frame(&mut self) -> Result<(), GpuError>;
    fn end_frame(&mut self) -> Result<(), GpuError>;
}

/// Slot-indexed storage backing the handle newtypes of a device.
#[derive(Debug)]
pub(crate) struct Slots<T> {
    kind: &'static str,
    items: Vec<Option<T>>,
}

impl<T> Slots<T> {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            items: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, item: T) -> u32 {
        self.items.push(Some(item));
        (self.items.len() - 1) as u32
    }

    pub(crate) fn remove(&mut self, index: u32) -> Option<T> {
        self.items.get_mut(index as usize).and_then(Option::take)
    }

    pub(crate) fn get(&self, index: u32) -> Result<&T, GpuError> {
        self.items
            .get(index as usize)
            .and_then(Option::as_ref)
            .ok_or(GpuError::UnknownHandle {
                kind: self.kind,
                index,
            })
    }

    pub(crate) fn get_mut(&mut self, index: u32) -> Result<&mut T, GpuError> {
        let kind = self.kind;
        self.items
            .get_mut(index as usize)
            .and_then(Option::as_mut)
            .ok_or(GpuError::UnknownHandle { kind, index })
    }

    pub(crate) fn live(&self) -> usize {
        self.items.iter().filter(|item| item.is_some()).count()
    }
}
