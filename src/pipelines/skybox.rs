//! Cube-mapped background for the forward pass.

use image::RgbaImage;

use crate::{
    data_structures::{
        mesh::{Mesh, MeshData},
        scene_graph::CameraJob,
    },
    gpu::{GpuDevice, GpuError, ProgramDesc, TextureDesc, TextureFormat, TextureHandle},
    pipelines::program::ShaderProgram,
};

pub const SKYBOX_SLOT: u32 = 0;

#[derive(Debug)]
pub struct Skybox {
    cube: TextureHandle,
    mesh: Mesh,
    program: ShaderProgram,
}

impl Skybox {
    /// Builds a skybox from six square faces in +X, -X, +Y, -Y, +Z, -Z order.
    pub fn new(device: &mut dyn GpuDevice, faces: &[RgbaImage; 6]) -> Result<Self, GpuError> {
        let size = faces[0].width();
        let cube = device.create_texture(&TextureDesc::new_cube(
            "skybox",
            size,
            TextureFormat::Rgba8Unorm,
        ))?;
        let built = Self::upload(device, cube, faces).and_then(|()| {
            let mesh = Mesh::new(device, "skybox", MeshData::cuboid(2.0, 2.0, 2.0))?;
            let program = ShaderProgram::new(device, ProgramDesc::skybox())?;
            Ok((mesh, program))
        });
        match built {
            Ok((mesh, program)) => Ok(Self {
                cube,
                mesh,
                program,
            }),
            Err(e) => {
                device.destroy_texture(cube);
                Err(e)
            }
        }
    }

    /// One flat color per face.
    pub fn from_colors(device: &mut dyn GpuDevice, colors: [[u8; 4]; 6]) -> Result<Self, GpuError> {
        let faces = colors.map(|c| RgbaImage::from_pixel(1, 1, image::Rgba(c)));
        Self::new(device, &faces)
    }

    fn upload(
        device: &mut dyn GpuDevice,
        cube: TextureHandle,
        faces: &[RgbaImage; 6],
    ) -> Result<(), GpuError> {
        for (layer, face) in faces.iter().enumerate() {
            device.write_texture(cube, layer as u32, face.as_raw())?;
        }
        Ok(())
    }

    pub fn texture(&self) -> TextureHandle {
        self.cube
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    /// Draws the box around the camera. Only pixels still at the far plane
    /// are covered, so call it inside the forward pass.
    pub fn draw(&self, device: &mut dyn GpuDevice, camera: &CameraJob) -> Result<bool, GpuError> {
        self.program.bind(device)?;
        self.program.set_uniform(device, "uView", camera.view)?;
        self.program
            .set_uniform(device, "uProjection", camera.projection)?;
        device.bind_texture(SKYBOX_SLOT, Some(self.cube))?;
        self.mesh.draw(device)
    }

    pub fn destroy(self, device: &mut dyn GpuDevice) {
        device.destroy_texture(self.cube);
        self.mesh.destroy(device);
    }
}
