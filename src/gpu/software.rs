//! CPU reference device.
//!
//! [`SoftwareDevice`] keeps every image as RGBA `f32` texels in memory and
//! follows the same state rules as the wgpu device:
//! - normalized-8 images quantize on every write
//! - blits copy texels between attachments of equal size and format
//! - full-screen (attribute-less, 3 vertex) draws run the program's native
//!   fragment shader once per pixel of the bound target, sampling nearest
//! - mesh draws are recorded but not rasterized
//!
//! Every state-changing call is appended to a command log, which makes the
//! device handy for inspecting what a frame actually did.

use std::{collections::HashMap, sync::Arc};

use crate::gpu::{
    AttachmentSlot, BlitDesc, BufferHandle, BufferKind, DeviceLimits, DrawCall, DrawTarget,
    FramebufferHandle, FrontFace, GpuDevice, GpuError, ProgramDesc, ProgramHandle, SlotKind,
    Slots, TextureDesc, TextureFormat, TextureHandle, TextureKind, UniformLayout, UniformValue,
};

/// The CPU fragment stage: fills one color per enabled output.
pub type NativeShader = Arc<dyn Fn(&Fragment<'_>, &mut [[f32; 4]]) + Send + Sync>;

const WHITE: [f32; 4] = [1.0; 4];

#[derive(Clone, Debug)]
struct Image {
    width: u32,
    height: u32,
    format: TextureFormat,
    kind: TextureKind,
    layers: Vec<Vec<[f32; 4]>>,
}

impl Image {
    fn new(width: u32, height: u32, format: TextureFormat, kind: TextureKind) -> Self {
        let fill = if format.is_depth() {
            [1.0, 0.0, 0.0, 1.0]
        } else {
            [0.0, 0.0, 0.0, 0.0]
        };
        let texels = vec![fill; (width * height) as usize];
        Self {
            width,
            height,
            format,
            kind,
            layers: vec![texels; kind.layers() as usize],
        }
    }

    fn store(&self, texel: [f32; 4]) -> [f32; 4] {
        match self.format {
            TextureFormat::Rgba8Unorm => texel.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() / 255.0),
            TextureFormat::Rgba32Float => texel,
            TextureFormat::Depth32Float => [texel[0], 0.0, 0.0, 1.0],
        }
    }

    fn fill(&mut self, texel: [f32; 4]) {
        let texel = self.store(texel);
        for layer in &mut self.layers {
            layer.fill(texel);
        }
    }

    fn texel(&self, layer: usize, uv: [f32; 2]) -> [f32; 4] {
        let x = ((uv[0] * self.width as f32).floor() as i64).clamp(0, self.width as i64 - 1);
        let y = ((uv[1] * self.height as f32).floor() as i64).clamp(0, self.height as i64 - 1);
        self.layers[layer][(y as u32 * self.width + x as u32) as usize]
    }
}

#[derive(Clone, Debug)]
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

struct Program {
    desc: ProgramDesc,
    layout: UniformLayout,
    values: HashMap<String, UniformValue>,
}

/// One recorded draw with the state it was issued under.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawRecord {
    pub target: DrawTarget,
    pub program: ProgramHandle,
    pub label: String,
    pub call: DrawCall,
    pub depth_test: bool,
    pub face_culling: bool,
    pub front_face: FrontFace,
    pub textures: Vec<Option<TextureHandle>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    BindTarget(DrawTarget),
    Clear(DrawTarget),
    Blit(BlitDesc),
    Draw(DrawRecord),
}

/// Everything a native fragment shader can see for one pixel.
pub struct Fragment<'a> {
    /// Texture coordinate of the pixel center, origin top-left.
    pub uv: [f32; 2],
    pub pixel: [u32; 2],
    pub size: [u32; 2],
    slots: &'a [Option<&'a Image>],
    uniforms: &'a HashMap<String, UniformValue>,
}

impl Fragment<'_> {
    pub fn sample(&self, slot: u32) -> [f32; 4] {
        self.sample_at(slot, self.uv)
    }

    /// Nearest-texel lookup; unbound slots read as white.
    pub fn sample_at(&self, slot: u32, uv: [f32; 2]) -> [f32; 4] {
        match self.slots.get(slot as usize).copied().flatten() {
            Some(image) => image.texel(0, uv),
            None => WHITE,
        }
    }

    pub fn texel_size(&self, slot: u32) -> [f32; 2] {
        match self.slots.get(slot as usize).copied().flatten() {
            Some(image) => [1.0 / image.width as f32, 1.0 / image.height as f32],
            None => [1.0 / self.size[0] as f32, 1.0 / self.size[1] as f32],
        }
    }

    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms.get(name).copied()
    }

    /// Unset uniforms read as zero, like a freshly linked program.
    pub fn float(&self, name: &str) -> f32 {
        self.uniform(name).and_then(|v| v.as_float()).unwrap_or(0.0)
    }

    pub fn int(&self, name: &str) -> i32 {
        match self.uniform(name) {
            Some(UniformValue::Int(v)) => v,
            _ => 0,
        }
    }

    pub fn vec3(&self, name: &str) -> [f32; 3] {
        match self.uniform(name) {
            Some(UniformValue::Vec3(v)) => v,
            _ => [0.0; 3],
        }
    }

    pub fn vec4(&self, name: &str) -> [f32; 4] {
        match self.uniform(name) {
            Some(UniformValue::Vec4(v)) => v,
            _ => [0.0; 4],
        }
    }
}

pub struct SoftwareDevice {
    limits: DeviceLimits,
    display: Image,
    textures: Slots<Image>,
    buffers: Slots<(BufferKind, Vec<u8>)>,
    framebuffers: Slots<Framebuffer>,
    programs: Slots<Program>,
    target: DrawTarget,
    program: Option<ProgramHandle>,
    slots: Vec<Option<TextureHandle>>,
    depth_test: bool,
    face_culling: bool,
    front_face: FrontFace,
    clear_color: [f32; 4],
    in_frame: bool,
    frames: u64,
    commands: Vec<Command>,
}

impl SoftwareDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_limits(width, height, DeviceLimits::default())
    }

    pub fn with_limits(width: u32, height: u32, limits: DeviceLimits) -> Self {
        Self {
            limits,
            display: Image::new(width, height, TextureFormat::Rgba8Unorm, TextureKind::D2),
            textures: Slots::new("texture"),
            buffers: Slots::new("buffer"),
            framebuffers: Slots::new("framebuffer"),
            programs: Slots::new("program"),
            target: DrawTarget::Display,
            program: None,
            slots: vec![None; limits.max_texture_slots as usize],
            depth_test: false,
            face_culling: false,
            front_face: FrontFace::Ccw,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            in_frame: false,
            frames: 0,
            commands: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn draws(&self) -> impl Iterator<Item = &DrawRecord> {
        self.commands.iter().filter_map(|c| match c {
            Command::Draw(record) => Some(record),
            _ => None,
        })
    }

    pub fn blits(&self) -> impl Iterator<Item = &BlitDesc> {
        self.commands.iter().filter_map(|c| match c {
            Command::Blit(blit) => Some(blit),
            _ => None,
        })
    }

    /// Texels of layer 0, row-major from the top-left.
    pub fn pixels(&self, texture: TextureHandle) -> Result<&[[f32; 4]], GpuError> {
        Ok(&self.textures.get(texture.0)?.layers[0])
    }

    /// Texels of one layer of a texture (cube faces are layers 0..6).
    pub fn layer_pixels(&self, texture: TextureHandle, layer: u32) -> Result<&[[f32; 4]], GpuError> {
        let image = self.textures.get(texture.0)?;
        image
            .layers
            .get(layer as usize)
            .map(Vec::as_slice)
            .ok_or(GpuError::LayerOutOfRange {
                layer,
                layers: image.kind.layers(),
            })
    }

    pub fn pixel(&self, texture: TextureHandle, x: u32, y: u32) -> Result<[f32; 4], GpuError> {
        let image = self.textures.get(texture.0)?;
        if x >= image.width || y >= image.height {
            return Err(GpuError::TexelOutOfBounds {
                x,
                y,
                width: image.width,
                height: image.height,
            });
        }
        Ok(image.layers[0][(y * image.width + x) as usize])
    }

    pub fn display_pixels(&self) -> &[[f32; 4]] {
        &self.display.layers[0]
    }

    /// Overwrites layer 0 of a texture without going through a draw.
    pub fn fill_texture(&mut self, texture: TextureHandle, texel: [f32; 4]) -> Result<(), GpuError> {
        self.textures.get_mut(texture.0)?.fill(texel);
        Ok(())
    }

    pub fn depth_test(&self) -> bool {
        self.depth_test
    }

    pub fn face_culling(&self) -> bool {
        self.face_culling
    }

    pub fn bound_target(&self) -> DrawTarget {
        self.target
    }

    pub fn bound_texture(&self, slot: u32) -> Option<TextureHandle> {
        self.slots.get(slot as usize).copied().flatten()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn live_textures(&self) -> usize {
        self.textures.live()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.live()
    }

    pub fn uniform(&self, program: ProgramHandle, name: &str) -> Option<UniformValue> {
        self.programs
            .get(program.0)
            .ok()
            .and_then(|p| p.values.get(name).copied())
    }

    fn ensure_frame(&self) -> Result<(), GpuError> {
        if self.in_frame {
            Ok(())
        } else {
            Err(GpuError::NoFrame)
        }
    }

    /// Texture handles of the enabled outputs; `None` stands for the display.
    fn outputs(&self) -> Result<(Vec<Option<TextureHandle>>, Option<TextureHandle>), GpuError> {
        match self.target {
            DrawTarget::Display => Ok((vec![None], None)),
            DrawTarget::Framebuffer {
                framebuffer,
                outputs,
            } => {
                let fb = self.framebuffers.get(framebuffer.0)?;
                let colors = (0..outputs)
                    .map(|i| fb.slot(AttachmentSlot::Color(i)).map(Some))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((colors, fb.depth))
            }
        }
    }

    fn image(&self, output: Option<TextureHandle>) -> Result<&Image, GpuError> {
        match output {
            Some(handle) => self.textures.get(handle.0),
            None => Ok(&self.display),
        }
    }

    fn image_mut(&mut self, output: Option<TextureHandle>) -> Result<&mut Image, GpuError> {
        match output {
            Some(handle) => self.textures.get_mut(handle.0),
            None => Ok(&mut self.display),
        }
    }

    fn shade_fullscreen(
        &mut self,
        program: ProgramHandle,
        outputs: &[Option<TextureHandle>],
    ) -> Result<(), GpuError> {
        let prog = self.programs.get(program.0)?;
        let shader = prog.desc.native.clone().ok_or_else(|| GpuError::MissingStage {
            program: prog.desc.label.clone(),
            stage: "native fragment",
        })?;
        let first = self.image(outputs[0])?;
        let (width, height) = (first.width, first.height);

        let mut bound = Vec::with_capacity(prog.desc.textures.len());
        for (slot, kind) in prog.desc.textures.iter().enumerate() {
            let image = match self.slots.get(slot).copied().flatten() {
                Some(handle) => Some(self.textures.get(handle.0)?),
                None if *kind == SlotKind::Color => None,
                None => {
                    return Err(GpuError::MissingTexture {
                        program: prog.desc.label.clone(),
                        slot: slot as u32,
                    });
                }
            };
            bound.push(image);
        }

        let mut results = vec![Vec::with_capacity((width * height) as usize); outputs.len()];
        let mut out = vec![[0.0, 0.0, 0.0, 1.0]; outputs.len()];
        for y in 0..height {
            for x in 0..width {
                let fragment = Fragment {
                    uv: [
                        (x as f32 + 0.5) / width as f32,
                        (y as f32 + 0.5) / height as f32,
                    ],
                    pixel: [x, y],
                    size: [width, height],
                    slots: &bound,
                    uniforms: &prog.values,
                };
                out.fill([0.0, 0.0, 0.0, 1.0]);
                shader(&fragment, &mut out);
                for (result, texel) in results.iter_mut().zip(&out) {
                    result.push(*texel);
                }
            }
        }

        for (output, texels) in outputs.iter().zip(results) {
            let image = self.image_mut(*output)?;
            if image.width != width || image.height != height {
                return Err(GpuError::SizeMismatch {
                    src_width: width,
                    src_height: height,
                    dst_width: image.width,
                    dst_height: image.height,
                });
            }
            let stored = texels.into_iter().map(|t| image.store(t)).collect();
            image.layers[0] = stored;
        }
        Ok(())
    }
}

impl GpuDevice for SoftwareDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn display_size(&self) -> (u32, u32) {
        (self.display.width, self.display.height)
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, GpuError> {
        let image = Image::new(desc.width.max(1), desc.height.max(1), desc.format, desc.kind);
        Ok(TextureHandle(self.textures.insert(image)))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(texture.0);
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        data: &[u8],
    ) -> Result<(), GpuError> {
        let image = self.textures.get_mut(texture.0)?;
        let count = (image.width * image.height) as usize;
        let expected = count * image.format.bytes_per_pixel() as usize;
        if data.len() != expected {
            return Err(GpuError::DataLength {
                expected,
                found: data.len(),
            });
        }
        let texels: Vec<[f32; 4]> = match image.format {
            TextureFormat::Rgba8Unorm => data
                .chunks_exact(4)
                .map(|c| [c[0], c[1], c[2], c[3]].map(|b| b as f32 / 255.0))
                .collect(),
            TextureFormat::Rgba32Float => data
                .chunks_exact(16)
                .map(|c| {
                    let mut t = [0.0f32; 4];
                    bytemuck::cast_slice_mut::<f32, u8>(&mut t).copy_from_slice(c);
                    t
                })
                .collect(),
            TextureFormat::Depth32Float => data
                .chunks_exact(4)
                .map(|c| [f32::from_le_bytes([c[0], c[1], c[2], c[3]]), 0.0, 0.0, 1.0])
                .collect(),
        };
        let layers = image.kind.layers();
        let slot = image
            .layers
            .get_mut(layer as usize)
            .ok_or(GpuError::LayerOutOfRange { layer, layers })?;
        *slot = texels;
        Ok(())
    }

    fn create_buffer(&mut self, kind: BufferKind, data: &[u8]) -> Result<BufferHandle, GpuError> {
        Ok(BufferHandle(self.buffers.insert((kind, data.to_vec()))))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(buffer.0);
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
            let image = self.textures.get(handle.0)?;
            let fb = self.framebuffers.get(framebuffer.0)?;
            if image.width != fb.width || image.height != fb.height {
                return Err(GpuError::SizeMismatch {
                    src_width: image.width,
                    src_height: image.height,
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
        self.target = target;
        self.commands.push(Command::BindTarget(target));
        Ok(())
    }

    fn blit(&mut self, blit: &BlitDesc) -> Result<(), GpuError> {
        self.ensure_frame()?;
        let src_tex = self.framebuffers.get(blit.src.0)?.slot(blit.src_slot)?;
        let dst_tex = self.framebuffers.get(blit.dst.0)?.slot(blit.dst_slot)?;
        let src = self.textures.get(src_tex.0)?;
        let dst = self.textures.get(dst_tex.0)?;
        if src.format != dst.format {
            return Err(GpuError::FormatMismatch {
                src: src.format,
                dst: dst.format,
            });
        }
        if src.width != dst.width || src.height != dst.height {
            return Err(GpuError::SizeMismatch {
                src_width: src.width,
                src_height: src.height,
                dst_width: dst.width,
                dst_height: dst.height,
            });
        }
        let r = blit.region;
        if r.x + r.width > src.width || r.y + r.height > src.height {
            return Err(GpuError::RegionOutOfBounds {
                region: r,
                width: src.width,
                height: src.height,
            });
        }
        let width = src.width;
        let source = src.layers[0].clone();
        let dst = self.textures.get_mut(dst_tex.0)?;
        for y in r.y..r.y + r.height {
            let start = (y * width + r.x) as usize;
            let end = start + r.width as usize;
            dst.layers[0][start..end].copy_from_slice(&source[start..end]);
        }
        self.commands.push(Command::Blit(*blit));
        Ok(())
    }

    fn create_program(&mut self, desc: ProgramDesc) -> Result<ProgramHandle, GpuError> {
        let layout = UniformLayout::new(&desc.uniforms);
        Ok(ProgramHandle(self.programs.insert(Program {
            desc,
            layout,
            values: HashMap::new(),
        })))
    }

    fn use_program(&mut self, program: ProgramHandle) -> Result<(), GpuError> {
        self.programs.get(program.0)?;
        self.program = Some(program);
        Ok(())
    }

    fn set_uniform(
        &mut self,
        program: ProgramHandle,
        name: &str,
        value: UniformValue,
    ) -> Result<(), GpuError> {
        let prog = self.programs.get_mut(program.0)?;
        prog.layout.check(&prog.desc.label, name, &value)?;
        prog.values.insert(name.to_string(), value);
        Ok(())
    }

    fn bind_texture(&mut self, slot: u32, texture: Option<TextureHandle>) -> Result<(), GpuError> {
        let max = self.limits.max_texture_slots;
        if let Some(handle) = texture {
            self.textures.get(handle.0)?;
        }
        let entry = self
            .slots
            .get_mut(slot as usize)
            .ok_or(GpuError::SlotOutOfRange { slot, max })?;
        *entry = texture;
        Ok(())
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.depth_test = enabled;
    }

    fn set_face_culling(&mut self, enabled: bool) {
        self.face_culling = enabled;
    }

    fn set_front_face(&mut self, front_face: FrontFace) {
        self.front_face = front_face;
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    fn clear(&mut self) -> Result<(), GpuError> {
        self.ensure_frame()?;
        let (colors, depth) = self.outputs()?;
        let color = self.clear_color;
        for output in colors {
            self.image_mut(output)?.fill(color);
        }
        if let Some(depth) = depth {
            self.textures.get_mut(depth.0)?.fill([1.0, 0.0, 0.0, 1.0]);
        }
        self.commands.push(Command::Clear(self.target));
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) -> Result<(), GpuError> {
        self.ensure_frame()?;
        let program = self.program.ok_or(GpuError::NoProgram)?;
        for buffer in call.vertices.iter().chain(call.indices.iter()) {
            self.buffers.get(buffer.0)?;
        }
        let (outputs, _) = self.outputs()?;
        if call.is_fullscreen() {
            self.shade_fullscreen(program, &outputs)?;
        }
        let label = self.programs.get(program.0)?.desc.label.clone();
        self.commands.push(Command::Draw(DrawRecord {
            target: self.target,
            program,
            label,
            call: *call,
            depth_test: self.depth_test,
            face_culling: self.face_culling,
            front_face: self.front_face,
            textures: self.slots.clone(),
        }));
        Ok(())
    }

    fn begin_frame(&mut self) -> Result<(), GpuError> {
        self.in_frame = true;
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), GpuError> {
        self.ensure_frame()?;
        self.in_frame = false;
        self.frames += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_with_color(
        device: &mut SoftwareDevice,
        format: TextureFormat,
    ) -> (FramebufferHandle, TextureHandle) {
        let fb = device.create_framebuffer(4, 4).unwrap();
        let tex = device
            .create_texture(&TextureDesc::new_2d("color", 4, 4, format))
            .unwrap();
        device.attach(fb, AttachmentSlot::Color(0), Some(tex)).unwrap();
        (fb, tex)
    }

    #[test]
    fn normalized_targets_quantize_on_clear() {
        let mut device = SoftwareDevice::new(4, 4);
        let (fb, tex) = target_with_color(&mut device, TextureFormat::Rgba8Unorm);
        device.begin_frame().unwrap();
        device
            .bind_target(DrawTarget::Framebuffer {
                framebuffer: fb,
                outputs: 1,
            })
            .unwrap();
        device.set_clear_color([0.2, 2.0, -1.0, 1.0]);
        device.clear().unwrap();
        let texel = device.pixel(tex, 0, 0).unwrap();
        assert_eq!(texel, [51.0 / 255.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn fullscreen_draw_shades_every_pixel() {
        let mut device = SoftwareDevice::new(4, 4);
        let (fb, tex) = target_with_color(&mut device, TextureFormat::Rgba32Float);
        let program = device
            .create_program(
                ProgramDesc::new("uv")
                    .with_native_fn(|frag, out| out[0] = [frag.uv[0], frag.uv[1], 0.0, 1.0]),
            )
            .unwrap();
        device.begin_frame().unwrap();
        device
            .bind_target(DrawTarget::Framebuffer {
                framebuffer: fb,
                outputs: 1,
            })
            .unwrap();
        device.use_program(program).unwrap();
        device.draw(&DrawCall::fullscreen()).unwrap();
        assert_eq!(device.pixel(tex, 0, 0).unwrap(), [0.125, 0.125, 0.0, 1.0]);
        assert_eq!(device.pixel(tex, 3, 1).unwrap(), [0.875, 0.375, 0.0, 1.0]);
        assert_eq!(device.draws().count(), 1);
    }

    #[test]
    fn draws_need_a_frame_and_a_program() {
        let mut device = SoftwareDevice::new(2, 2);
        assert!(matches!(
            device.draw(&DrawCall::fullscreen()),
            Err(GpuError::NoFrame)
        ));
        device.begin_frame().unwrap();
        assert!(matches!(
            device.draw(&DrawCall::fullscreen()),
            Err(GpuError::NoProgram)
        ));
    }

    #[test]
    fn depth_slots_must_be_bound() {
        let mut device = SoftwareDevice::new(2, 2);
        let program = device
            .create_program(
                ProgramDesc::new("needs depth")
                    .with_textures([SlotKind::Depth])
                    .with_native_fn(|_, _| {}),
            )
            .unwrap();
        device.begin_frame().unwrap();
        device.use_program(program).unwrap();
        let err = device.draw(&DrawCall::fullscreen()).unwrap_err();
        assert!(matches!(err, GpuError::MissingTexture { slot: 0, .. }));
    }

    #[test]
    fn pixels_outside_the_texture_are_errors() {
        let mut device = SoftwareDevice::new(4, 4);
        let (_, tex) = target_with_color(&mut device, TextureFormat::Rgba8Unorm);
        assert!(device.pixel(tex, 3, 3).is_ok());
        assert!(matches!(
            device.pixel(tex, 4, 0),
            Err(GpuError::TexelOutOfBounds { x: 4, y: 0, width: 4, height: 4 })
        ));
        assert!(matches!(
            device.pixel(tex, 0, 9),
            Err(GpuError::TexelOutOfBounds { y: 9, .. })
        ));
    }
}
