//! Mesh geometry and its GPU-side state.
//!
//! - [`Vertex`]: the fixed interleaved layout every mesh uses
//! - [`MeshData`]: CPU geometry plus procedural constructors
//! - [`Mesh`]: uploaded (or still arriving) geometry that can be drawn
//! - [`Material`]: the per-instance surface parameters written to the G-buffer

use std::{cell::RefCell, f32::consts::TAU};

use crate::{
    data_structures::pending::{Completion, Deferred, LoadState},
    gpu::{BufferHandle, BufferKind, DrawCall, FrontFace, GpuDevice, GpuError, Topology},
};

/// One interleaved vertex: position, color, texture coordinate, normal.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
    pub tex_coords: [f32; 2],
    pub normal: [f32; 3],
}

impl Vertex {
    pub const DEFAULT_COLOR: [f32; 4] = [0.5, 0.5, 0.5, 1.0];

    pub fn new(position: [f32; 3], tex_coords: [f32; 2], normal: [f32; 3]) -> Self {
        Self {
            position,
            color: Self::DEFAULT_COLOR,
            tex_coords,
            normal,
        }
    }

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 7]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 9]>() as wgpu::BufferAddress,
                    shader_location: 3,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        }
    }
}

/// Geometry that has not been uploaded yet.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub topology: Topology,
}

impl MeshData {
    /// Axis-aligned box centered on the origin, one quad per face.
    pub fn cuboid(width: f32, height: f32, depth: f32) -> Self {
        let (w, h, d) = (width / 2.0, height / 2.0, depth / 2.0);
        // corners of each face: top-left, top-right, bottom-right, bottom-left
        let faces: [([[f32; 3]; 4], [f32; 3]); 6] = [
            ([[-w, h, -d], [w, h, -d], [w, -h, -d], [-w, -h, -d]], [0.0, 0.0, -1.0]),
            ([[w, h, d], [-w, h, d], [-w, -h, d], [w, -h, d]], [0.0, 0.0, 1.0]),
            ([[w, h, -d], [w, h, d], [w, -h, d], [w, -h, -d]], [1.0, 0.0, 0.0]),
            ([[-w, h, d], [-w, h, -d], [-w, -h, -d], [-w, -h, d]], [-1.0, 0.0, 0.0]),
            ([[-w, h, d], [w, h, d], [w, h, -d], [-w, h, -d]], [0.0, 1.0, 0.0]),
            ([[-w, -h, -d], [w, -h, -d], [w, -h, d], [-w, -h, d]], [0.0, -1.0, 0.0]),
        ];
        let uvs = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (face, (corners, normal)) in faces.iter().enumerate() {
            let base = face as u32 * 4;
            for (corner, uv) in corners.iter().zip(uvs) {
                vertices.push(Vertex::new(*corner, uv, *normal));
            }
            indices.extend([0, 1, 2, 2, 3, 0].map(|i| base + i));
        }
        Self {
            vertices,
            indices,
            topology: Topology::TriangleList,
        }
    }

    /// Unit-diameter UV sphere as a single triangle strip.
    ///
    /// Produces `(subdivs + 1)²` vertices and `2 · subdivs · (subdivs + 1)` indices.
    pub fn sphere(subdivs: u32) -> Self {
        let subdivs = subdivs.max(1);
        let row = subdivs + 1;
        let mut vertices = Vec::with_capacity((row * row) as usize);
        let mut indices = Vec::with_capacity((2 * subdivs * row) as usize);

        for layer in 0..=subdivs {
            let y_turns = layer as f32 / subdivs as f32 / 2.0;
            let ring = (TAU * y_turns).sin();
            let y = (TAU * y_turns).cos() / 2.0;
            for subdiv in 0..=subdivs {
                let turns = subdiv as f32 / subdivs as f32;
                let x = (turns * TAU).cos() / 2.0 * ring;
                let z = (turns * TAU).sin() / 2.0 * ring;
                let len = (x * x + y * y + z * z).sqrt();
                vertices.push(Vertex::new(
                    [x, y, z],
                    [turns, layer as f32 / subdivs as f32],
                    [x / len, y / len, z / len],
                ));
                if layer < subdivs {
                    indices.push(layer * row + subdiv);
                    indices.push((layer + 1) * row + subdiv);
                }
            }
        }
        Self {
            vertices,
            indices,
            topology: Topology::TriangleStrip,
        }
    }

    /// Number of elements a draw of this geometry submits.
    pub fn element_count(&self) -> u32 {
        if self.indices.is_empty() {
            self.vertices.len() as u32
        } else {
            self.indices.len() as u32
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct MeshConfig {
    pub front_face: FrontFace,
}

/// Surface parameters packed into the material G-buffer channel.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Material {
    pub ambient: f32,
    pub diffuse: f32,
    pub specular: f32,
    pub shininess: f32,
}

impl Material {
    pub fn new(ambient: f32, diffuse: f32, specular: f32, shininess: f32) -> Self {
        Self {
            ambient,
            diffuse,
            specular,
            shininess,
        }
    }

    pub fn packed(&self) -> [f32; 4] {
        [self.ambient, self.diffuse, self.specular, self.shininess]
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::new(0.1, 0.8, 0.5, 32.0)
    }
}

#[derive(Debug)]
struct GpuMesh {
    vertices: BufferHandle,
    indices: Option<BufferHandle>,
    count: u32,
    topology: Topology,
}

fn upload(device: &mut dyn GpuDevice, data: MeshData) -> Result<GpuMesh, GpuError> {
    let vertices = device.create_buffer(BufferKind::Vertex, bytemuck::cast_slice(&data.vertices))?;
    let indices = if data.indices.is_empty() {
        None
    } else {
        Some(device.create_buffer(BufferKind::Index, bytemuck::cast_slice(&data.indices))?)
    };
    Ok(GpuMesh {
        vertices,
        indices,
        count: data.element_count(),
        topology: data.topology,
    })
}

/// Drawable geometry.
///
/// A mesh is either ready (buffers uploaded), pending (waiting on a loader) or
/// failed. Drawing anything but a ready mesh does nothing.
pub struct Mesh {
    label: String,
    config: MeshConfig,
    inner: RefCell<Deferred<MeshData, GpuMesh>>,
}

impl Mesh {
    /// Uploads `data` right away.
    pub fn new(
        device: &mut dyn GpuDevice,
        label: impl Into<String>,
        data: MeshData,
    ) -> Result<Self, GpuError> {
        let gpu = upload(device, data)?;
        Ok(Self {
            label: label.into(),
            config: MeshConfig::default(),
            inner: RefCell::new(Deferred::Ready(gpu)),
        })
    }

    /// A mesh whose data will be delivered through the returned completion.
    pub fn pending(label: impl Into<String>) -> (Self, Completion<MeshData>) {
        let (inner, completion) = Deferred::pending();
        let mesh = Self {
            label: label.into(),
            config: MeshConfig::default(),
            inner: RefCell::new(inner),
        };
        (mesh, completion)
    }

    pub fn with_config(mut self, config: MeshConfig) -> Self {
        self.config = config;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn config(&self) -> MeshConfig {
        self.config
    }

    pub fn state(&self) -> LoadState {
        self.inner.borrow().state()
    }

    /// Uploads data that arrived since the last call.
    pub fn poll(&self, device: &mut dyn GpuDevice) -> Result<LoadState, GpuError> {
        self.inner
            .borrow_mut()
            .resolve(&self.label, |data| upload(device, data))
    }

    /// Issues one draw if the mesh is ready. Returns whether it drew.
    pub fn draw(&self, device: &mut dyn GpuDevice) -> Result<bool, GpuError> {
        self.poll(device)?;
        let inner = self.inner.borrow();
        let Some(gpu) = inner.ready() else {
            return Ok(false);
        };
        device.set_front_face(self.config.front_face);
        device.draw(&DrawCall {
            topology: gpu.topology,
            vertices: Some(gpu.vertices),
            indices: gpu.indices,
            count: gpu.count,
        })?;
        Ok(true)
    }

    pub fn destroy(self, device: &mut dyn GpuDevice) {
        if let Deferred::Ready(gpu) = self.inner.into_inner() {
            device.destroy_buffer(gpu.vertices);
            if let Some(indices) = gpu.indices {
                device.destroy_buffer(indices);
            }
        }
    }
}

impl std::fmt::Debug for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("label", &self.label)
            .field("state", &self.state())
            .finish()
    }
}
