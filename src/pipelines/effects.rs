//! Ready-made post-processing effects.
//!
//! Every effect has a WGSL fragment stage and an equivalent CPU stage, so a
//! chain behaves the same on the wgpu device and on the software device.
//! Parameters live in program uniforms; the CPU stages read them back from the
//! fragment, which means later `set_uniform` calls affect both backends.

use cgmath::{ElementWise, InnerSpace, Vector3, Vector4};

use crate::{
    gpu::{GpuDevice, GpuError, ProgramDesc, UniformKind, software::Fragment},
    pipelines::{
        light::MAX_POINT_LIGHTS,
        program::{
            G_ALBEDO_SLOT, G_DEPTH_SLOT, G_MATERIAL_SLOT, G_NORMAL_SLOT, G_POSITION_SLOT,
            POST_COLOR_SLOT, ShaderProgram,
        },
    },
};

const LUMA: [f32; 3] = [0.299, 0.587, 0.114];
const EDGE_THRESHOLD: f32 = 0.1;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EdgeSource {
    Depth,
    Albedo,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Effect {
    Invert,
    /// Per channel: values at or above `cutoff` become 1, the rest 0.
    Threshold { cutoff: f32 },
    /// Channel average, quantized to `steps` levels unless `steps` is 0.
    Grayscale { steps: u32 },
    /// Sobel edges over depth or albedo luminance, blended toward `outline`.
    EdgeDetection { source: EdgeSource, outline: [f32; 4] },
    /// Deferred Phong shading from the G-buffer. `steps > 0` bands the diffuse term.
    Lighting { steps: u32 },
    Halftone { scale: f32, steps: f32, intensity: f32 },
}

impl Effect {
    pub fn label(&self) -> &'static str {
        match self {
            Effect::Invert => "invert",
            Effect::Threshold { .. } => "threshold",
            Effect::Grayscale { .. } => "grayscale",
            Effect::EdgeDetection { .. } => "edge detection",
            Effect::Lighting { .. } => "lighting",
            Effect::Halftone { .. } => "halftone",
        }
    }

    pub fn program_desc(&self) -> ProgramDesc {
        let label = self.label();
        match self {
            Effect::Invert => ProgramDesc::post_process(label, include_str!("shaders/invert.wgsl"))
                .with_native_fn(invert),
            Effect::Threshold { .. } => {
                ProgramDesc::post_process(label, include_str!("shaders/threshold.wgsl"))
                    .with_uniform("uCutoff", UniformKind::Float)
                    .with_native_fn(threshold)
            }
            Effect::Grayscale { .. } => {
                ProgramDesc::post_process(label, include_str!("shaders/grayscale.wgsl"))
                    .with_uniform("uSteps", UniformKind::Float)
                    .with_native_fn(grayscale)
            }
            Effect::EdgeDetection { .. } => {
                ProgramDesc::post_process(label, include_str!("shaders/edge_detection.wgsl"))
                    .with_uniform("uOutline", UniformKind::Vec4)
                    .with_uniform("uSource", UniformKind::Int)
                    .with_native_fn(edge_detection)
            }
            Effect::Lighting { .. } => {
                let mut desc =
                    ProgramDesc::post_process(label, include_str!("shaders/lighting.wgsl"))
                        .with_uniform("uCameraPos", UniformKind::Vec3)
                        .with_uniform("uSteps", UniformKind::Float)
                        .with_uniform("uDirLightDirection", UniformKind::Vec3)
                        .with_uniform("uDirLightIntensity", UniformKind::Float)
                        .with_uniform("uDirLightColor", UniformKind::Vec3)
                        .with_uniform("uPointLightCount", UniformKind::Int);
                for i in 0..MAX_POINT_LIGHTS {
                    desc = desc
                        .with_uniform(format!("uPointLights[{i}].position"), UniformKind::Vec3)
                        .with_uniform(format!("uPointLights[{i}].intensity"), UniformKind::Float)
                        .with_uniform(format!("uPointLights[{i}].color"), UniformKind::Vec3);
                }
                desc.with_native_fn(lighting)
            }
            Effect::Halftone { .. } => {
                ProgramDesc::post_process(label, include_str!("shaders/halftone.wgsl"))
                    .with_uniform("uScale", UniformKind::Float)
                    .with_uniform("uSteps", UniformKind::Float)
                    .with_uniform("uIntensity", UniformKind::Float)
                    .with_native_fn(halftone)
            }
        }
    }

    /// Compiles the effect and uploads its parameters.
    pub fn create(&self, device: &mut dyn GpuDevice) -> Result<ShaderProgram, GpuError> {
        let program = ShaderProgram::new(device, self.program_desc())?;
        match *self {
            Effect::Invert => {}
            Effect::Threshold { cutoff } => program.set_uniform(device, "uCutoff", cutoff)?,
            Effect::Grayscale { steps } => {
                program.set_uniform(device, "uSteps", steps as f32)?;
            }
            Effect::EdgeDetection { source, outline } => {
                program.set_uniform(device, "uOutline", outline)?;
                let source = match source {
                    EdgeSource::Depth => 0,
                    EdgeSource::Albedo => 1,
                };
                program.set_uniform(device, "uSource", source)?;
            }
            Effect::Lighting { steps } => {
                program.set_uniform(device, "uSteps", steps as f32)?;
                program.set_uniform(device, "uPointLightCount", 0)?;
            }
            Effect::Halftone {
                scale,
                steps,
                intensity,
            } => {
                program.set_uniform(device, "uScale", scale)?;
                program.set_uniform(device, "uSteps", steps)?;
                program.set_uniform(device, "uIntensity", intensity)?;
            }
        }
        Ok(program)
    }
}

fn invert(frag: &Fragment<'_>, out: &mut [[f32; 4]]) {
    let [r, g, b, a] = frag.sample(POST_COLOR_SLOT);
    out[0] = [1.0 - r, 1.0 - g, 1.0 - b, a];
}

fn threshold(frag: &Fragment<'_>, out: &mut [[f32; 4]]) {
    let cutoff = frag.float("uCutoff");
    let [r, g, b, a] = frag.sample(POST_COLOR_SLOT);
    let step = |c: f32| if c >= cutoff { 1.0 } else { 0.0 };
    out[0] = [step(r), step(g), step(b), a];
}

fn quantize(value: f32, steps: f32) -> f32 {
    if steps > 0.0 {
        (value * steps).floor() / steps
    } else {
        value
    }
}

fn grayscale(frag: &Fragment<'_>, out: &mut [[f32; 4]]) {
    let [r, g, b, _] = frag.sample(POST_COLOR_SLOT);
    let gray = quantize((r + g + b) / 3.0, frag.float("uSteps"));
    out[0] = [gray, gray, gray, 1.0];
}

fn luminance(c: [f32; 4]) -> f32 {
    c[0] * LUMA[0] + c[1] * LUMA[1] + c[2] * LUMA[2]
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn edge_detection(frag: &Fragment<'_>, out: &mut [[f32; 4]]) {
    let from_albedo = frag.int("uSource") != 0;
    let [tw, th] = frag.texel_size(G_DEPTH_SLOT);
    let (mut gx, mut gy) = (0.0, 0.0);
    for y in -1i32..=1 {
        for x in -1i32..=1 {
            let uv = [frag.uv[0] + x as f32 * tw, frag.uv[1] + y as f32 * th];
            let v = if from_albedo {
                luminance(frag.sample_at(G_ALBEDO_SLOT, uv))
            } else {
                frag.sample_at(G_DEPTH_SLOT, uv)[0]
            };
            let wx = if y == 0 { 2.0 } else { 1.0 };
            let wy = if x == 0 { 2.0 } else { 1.0 };
            gx += x as f32 * wx * v;
            gy += y as f32 * wy * v;
        }
    }
    let strength = (gx * gx + gy * gy).sqrt();
    let t = smoothstep(EDGE_THRESHOLD, EDGE_THRESHOLD + 0.02, strength);
    let color = frag.sample(POST_COLOR_SLOT);
    let outline = frag.vec4("uOutline");
    out[0] = std::array::from_fn(|i| color[i] + (outline[i] - color[i]) * t);
}

struct Surface {
    n: Vector3<f32>,
    v: Vector3<f32>,
    albedo: Vector3<f32>,
    material: [f32; 4],
    steps: f32,
}

impl Surface {
    fn shade(&self, l: Vector3<f32>, light: Vector3<f32>) -> Vector3<f32> {
        let [_, kd, ks, shininess] = self.material;
        let diff = quantize(self.n.dot(l).max(0.0), self.steps);
        let r = self.n * (2.0 * l.dot(self.n)) - l;
        let spec = ks * r.dot(self.v).max(0.0).powf(shininess);
        light.mul_element_wise(self.albedo) * (kd * diff) + light * spec
    }
}

fn normalized(v: Vector3<f32>) -> Vector3<f32> {
    if v.magnitude2() > 0.0 { v.normalize() } else { v }
}

fn lighting(frag: &Fragment<'_>, out: &mut [[f32; 4]]) {
    let color = frag.sample(POST_COLOR_SLOT);
    if frag.sample(G_DEPTH_SLOT)[0] >= 1.0 {
        out[0] = color;
        return;
    }
    let position = Vector4::from(frag.sample(G_POSITION_SLOT)).truncate();
    let normal = Vector4::from(frag.sample(G_NORMAL_SLOT)).truncate();
    let surface = Surface {
        n: normalized(normal),
        v: normalized(Vector3::from(frag.vec3("uCameraPos")) - position),
        albedo: Vector4::from(color).truncate(),
        material: frag.sample(G_MATERIAL_SLOT),
        steps: frag.float("uSteps"),
    };

    let mut result = surface.albedo * surface.material[0];

    let dir_color = Vector3::from(frag.vec3("uDirLightColor")) * frag.float("uDirLightIntensity");
    let dir = normalized(frag.vec3("uDirLightDirection").into());
    result += surface.shade(dir, dir_color);

    let count = frag.int("uPointLightCount").clamp(0, MAX_POINT_LIGHTS as i32);
    for i in 0..count {
        let to_light = Vector3::from(frag.vec3(&format!("uPointLights[{i}].position"))) - position;
        let attenuation =
            frag.float(&format!("uPointLights[{i}].intensity")) / to_light.magnitude().max(1e-4);
        let light = Vector3::from(frag.vec3(&format!("uPointLights[{i}].color"))) * attenuation;
        result += surface.shade(normalized(to_light), light);
    }
    out[0] = result.extend(1.0).into();
}

fn halftone(frag: &Fragment<'_>, out: &mut [[f32; 4]]) {
    let color = frag.sample(POST_COLOR_SLOT);
    if frag.sample(G_DEPTH_SLOT)[0] >= 1.0 {
        out[0] = color;
        return;
    }
    let (scale, steps, intensity) = (
        frag.float("uScale"),
        frag.float("uSteps"),
        frag.float("uIntensity"),
    );
    let quantized = quantize(luminance(color), steps);
    let [tw, th] = frag.texel_size(POST_COLOR_SLOT);
    let screen = [frag.uv[0] / tw, frag.uv[1] / th];
    let pattern = (screen[0] * scale).sin() * (screen[1] * scale).sin();
    let tone = if quantized >= pattern { 1.0 } else { 0.0 };
    let mix = |c: f32| c + (tone - c) * intensity;
    out[0] = [mix(color[0]), mix(color[1]), mix(color[2]), 1.0];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_effect_declares_the_uniforms_it_sets() {
        use crate::gpu::software::SoftwareDevice;
        let mut device = SoftwareDevice::new(2, 2);
        let effects = [
            Effect::Invert,
            Effect::Threshold { cutoff: 0.5 },
            Effect::Grayscale { steps: 4 },
            Effect::EdgeDetection {
                source: EdgeSource::Depth,
                outline: [0.0, 0.0, 0.0, 1.0],
            },
            Effect::Lighting { steps: 0 },
            Effect::Halftone {
                scale: 1.0,
                steps: 4.0,
                intensity: 0.5,
            },
        ];
        for effect in effects {
            let program = effect.create(&mut device).unwrap();
            assert_eq!(program.label(), effect.label());
        }
    }

    #[test]
    fn smoothstep_saturates() {
        assert_eq!(smoothstep(0.1, 0.12, 0.0), 0.0);
        assert_eq!(smoothstep(0.1, 0.12, 1.0), 1.0);
    }

    #[test]
    fn halftone_without_steps_uses_raw_luminance() {
        use crate::{
            context::Config,
            gpu::software::SoftwareDevice,
            pipelines::{RenderPipeline, deferred::identity_camera},
        };
        let mut device = SoftwareDevice::new(4, 4);
        let config = Config::default()
            .with_size(4, 4)
            .with_clear_color([0.6, 0.6, 0.6, 1.0]);
        let mut pipeline = RenderPipeline::new(&mut device, &config).unwrap();
        let halftone = Effect::Halftone {
            scale: 0.0,
            steps: 0.0,
            intensity: 1.0,
        };
        pipeline.add_post_program(halftone.create(&mut device).unwrap());

        device.begin_frame().unwrap();
        pipeline
            .geometry_pass(&mut device, &identity_camera(), |_, _| Ok(()))
            .unwrap();
        let depth = pipeline.g_buffer().depth_attachment().unwrap().texture;
        device.fill_texture(depth, [0.5, 0.0, 0.0, 1.0]).unwrap();
        pipeline.post_processing_pass(&mut device).unwrap();

        // a flat pattern turns every finite luminance white
        let side = pipeline.ping_pong(pipeline.read_buffer());
        let out = side.color_attachment(0).unwrap().texture;
        for texel in device.pixels(out).unwrap() {
            assert_eq!(*texel, [1.0, 1.0, 1.0, 1.0]);
        }
    }

    #[test]
    fn quantize_passes_values_through_without_steps() {
        assert_eq!(quantize(0.37, 0.0), 0.37);
        assert_eq!(quantize(0.37, 4.0), 0.25);
    }

    #[test]
    fn lighting_adds_ambient_diffuse_and_specular() {
        use crate::{
            context::Config,
            gpu::software::SoftwareDevice,
            pipelines::{RenderPipeline, deferred::identity_camera},
        };
        let mut device = SoftwareDevice::new(2, 2);
        let mut pipeline = RenderPipeline::new(&mut device, &Config::default().with_size(2, 2)).unwrap();
        let program = Effect::Lighting { steps: 0 }.create(&mut device).unwrap();
        program.set_uniform(&mut device, "uCameraPos", [0.0, 0.0, 5.0]).unwrap();
        program.set_uniform(&mut device, "uDirLightDirection", [0.0, 0.0, 2.0]).unwrap();
        program.set_uniform(&mut device, "uDirLightColor", [1.0, 1.0, 1.0]).unwrap();
        program.set_uniform(&mut device, "uDirLightIntensity", 1.0).unwrap();
        pipeline.add_post_program(program);

        device.begin_frame().unwrap();
        pipeline
            .geometry_pass(&mut device, &identity_camera(), |_, _| Ok(()))
            .unwrap();
        let g = pipeline.g_buffer();
        let texture = |i| g.color_attachment(i).unwrap().texture;
        device.fill_texture(texture(0), [0.0, 0.0, 0.0, 1.0]).unwrap();
        device.fill_texture(texture(1), [0.4, 0.4, 0.4, 1.0]).unwrap();
        device.fill_texture(texture(2), [0.0, 0.0, 1.0, 0.0]).unwrap();
        // ambient 0.1, diffuse 0.5, specular 0.2, shininess 1
        device.fill_texture(texture(3), [0.1, 0.5, 0.2, 1.0]).unwrap();
        let depth = g.depth_attachment().unwrap().texture;
        device.fill_texture(depth, [0.5, 0.0, 0.0, 1.0]).unwrap();
        pipeline.post_processing_pass(&mut device).unwrap();

        // light and view both along +z: 0.1 * 0.4 + 0.5 * 0.4 + 0.2
        let expected = 0.04 + 0.2 + 0.2;
        let side = pipeline.ping_pong(pipeline.read_buffer());
        let out = side.color_attachment(0).unwrap().texture;
        for texel in device.pixels(out).unwrap() {
            for c in &texel[..3] {
                assert!((c - expected).abs() < 1.0 / 255.0, "{texel:?}");
            }
            assert_eq!(texel[3], 1.0);
        }
    }
}
