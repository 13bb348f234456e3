//! Shader programs and the built-in program descriptors.

use std::collections::HashSet;

use crate::gpu::{
    GpuDevice, GpuError, ProgramDesc, ProgramHandle, SlotKind, UniformKind, UniformValue,
};

/// Texture slots every post-processing program reads.
pub const G_POSITION_SLOT: u32 = 0;
pub const G_ALBEDO_SLOT: u32 = 1;
pub const G_NORMAL_SLOT: u32 = 2;
pub const G_MATERIAL_SLOT: u32 = 3;
pub const G_DEPTH_SLOT: u32 = 4;
/// The output of the previous enabled post program (or the post source).
pub const POST_COLOR_SLOT: u32 = 5;

pub(crate) const FULLSCREEN_WGSL: &str = include_str!("shaders/fullscreen.wgsl");
const POST_PRELUDE_WGSL: &str = include_str!("shaders/post_prelude.wgsl");

/// A compiled program plus the bits of its declaration callers need at draw time.
#[derive(Debug)]
pub struct ShaderProgram {
    handle: ProgramHandle,
    label: String,
    enabled: bool,
    uniforms: HashSet<String>,
    texture_slots: u32,
}

impl ShaderProgram {
    pub fn new(device: &mut dyn GpuDevice, desc: ProgramDesc) -> Result<Self, GpuError> {
        let label = desc.label.clone();
        let uniforms = desc.uniforms.iter().map(|(name, _)| name.clone()).collect();
        let texture_slots = desc.textures.len() as u32;
        let handle = device.create_program(desc)?;
        log::debug!("compiled program `{label}`");
        Ok(Self {
            handle,
            label,
            enabled: true,
            uniforms,
            texture_slots,
        })
    }

    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disabled post programs are skipped by the chain without touching the ping-pong state.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn has_uniform(&self, name: &str) -> bool {
        self.uniforms.contains(name)
    }

    pub fn texture_slots(&self) -> u32 {
        self.texture_slots
    }

    pub fn bind(&self, device: &mut dyn GpuDevice) -> Result<(), GpuError> {
        device.use_program(self.handle)
    }

    pub fn set_uniform(
        &self,
        device: &mut dyn GpuDevice,
        name: &str,
        value: impl Into<UniformValue>,
    ) -> Result<(), GpuError> {
        device.set_uniform(self.handle, name, value.into())
    }
}

impl ProgramDesc {
    /// Writes world position, albedo, normal and material into the four
    /// G-buffer color outputs. Slot 0 is the albedo texture.
    pub fn geometry() -> Self {
        const WGSL: &str = include_str!("shaders/gbuffer.wgsl");
        ProgramDesc::new("geometry")
            .with_wgsl(WGSL, WGSL)
            .with_uniform("uModel", UniformKind::Mat4)
            .with_uniform("uView", UniformKind::Mat4)
            .with_uniform("uProjection", UniformKind::Mat4)
            .with_uniform("uMaterial", UniformKind::Vec4)
            .with_textures([SlotKind::Color])
            .with_mesh_vertices()
    }

    /// Copies slot 0 onto whatever target is bound.
    pub fn composite() -> Self {
        ProgramDesc::new("composite")
            .with_wgsl(FULLSCREEN_WGSL, include_str!("shaders/composite.wgsl"))
            .with_textures([SlotKind::Color])
            .with_native_fn(|frag, out| out[0] = frag.sample(0))
    }

    /// Forward program drawing meshes in one flat color.
    pub fn solid_color() -> Self {
        const WGSL: &str = include_str!("shaders/solid.wgsl");
        ProgramDesc::new("solid color")
            .with_wgsl(WGSL, WGSL)
            .with_uniform("uModel", UniformKind::Mat4)
            .with_uniform("uView", UniformKind::Mat4)
            .with_uniform("uProjection", UniformKind::Mat4)
            .with_uniform("uColor", UniformKind::Vec4)
            .with_mesh_vertices()
    }

    /// Forward program drawing a cube map behind everything already in the
    /// depth buffer. Slot 0 is the cube texture.
    pub fn skybox() -> Self {
        const WGSL: &str = include_str!("shaders/skybox.wgsl");
        ProgramDesc::new("skybox")
            .with_wgsl(WGSL, WGSL)
            .with_uniform("uView", UniformKind::Mat4)
            .with_uniform("uProjection", UniformKind::Mat4)
            .with_textures([SlotKind::Cube])
            .with_mesh_vertices()
    }

    /// A full-screen post-processing program.
    ///
    /// `fragment` only needs to define `fs_main(in: FragmentInput)` (and its
    /// own uniform block); the sampler and the G-buffer/post color bindings
    /// are prepended.
    pub fn post_process(label: impl Into<String>, fragment: &str) -> Self {
        ProgramDesc::new(label)
            .with_wgsl(FULLSCREEN_WGSL, format!("{POST_PRELUDE_WGSL}{fragment}"))
            .with_textures([
                SlotKind::Color,
                SlotKind::Color,
                SlotKind::Color,
                SlotKind::Color,
                SlotKind::Depth,
                SlotKind::Color,
            ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::SoftwareDevice;

    #[test]
    fn post_programs_read_gbuffer_then_chain_color() {
        let desc = ProgramDesc::post_process("noop", "");
        assert_eq!(desc.textures.len() as u32, POST_COLOR_SLOT + 1);
        assert_eq!(desc.textures[G_DEPTH_SLOT as usize], SlotKind::Depth);
        assert!(desc.fragment.as_deref().is_some_and(|f| f.contains("post_color")));
    }

    #[test]
    fn shader_program_tracks_declared_uniforms() {
        let mut device = SoftwareDevice::new(1, 1);
        let mut program = ShaderProgram::new(&mut device, ProgramDesc::geometry()).unwrap();
        assert!(program.is_enabled());
        assert!(program.has_uniform("uMaterial"));
        assert!(!program.has_uniform("uColor"));
        assert_eq!(program.texture_slots(), 1);
        program.set_enabled(false);
        assert!(!program.is_enabled());

        program
            .set_uniform(&mut device, "uMaterial", [0.1, 0.2, 0.3, 4.0])
            .unwrap();
        assert!(matches!(
            program.set_uniform(&mut device, "uMaterial", 1.0),
            Err(GpuError::UniformType { .. })
        ));
    }
}
