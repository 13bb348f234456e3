//! A placed copy of a mesh.
//!
//! Several instances can share one [`Mesh`]; each keeps its own scale,
//! rotation and translation plus the surface it is drawn with.

use std::rc::Rc;

use cgmath::{Matrix4, One, Quaternion, Vector3};

use crate::{
    data_structures::{
        mesh::{Material, Mesh},
        texture::Texture,
    },
    gpu::{GpuDevice, GpuError},
    pipelines::program::ShaderProgram,
};

#[derive(Debug)]
pub struct MeshInstance {
    mesh: Rc<Mesh>,
    translation: Vector3<f32>,
    rotation: Quaternion<f32>,
    scale: Vector3<f32>,
    model: Matrix4<f32>,
    dirty: bool,
    pub texture: Option<Rc<Texture>>,
    pub material: Material,
}

impl MeshInstance {
    pub fn new(mesh: Rc<Mesh>) -> Self {
        Self {
            mesh,
            translation: Vector3::new(0.0, 0.0, 0.0),
            rotation: Quaternion::one(),
            scale: Vector3::new(1.0, 1.0, 1.0),
            model: Matrix4::one(),
            dirty: false,
            texture: None,
            material: Material::default(),
        }
    }

    pub fn with_texture(mut self, texture: Rc<Texture>) -> Self {
        self.texture = Some(texture);
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn with_translation(mut self, translation: Vector3<f32>) -> Self {
        self.set_translation(translation);
        self.update_model();
        self
    }

    pub fn with_scale(mut self, scale: Vector3<f32>) -> Self {
        self.set_scale(scale);
        self.update_model();
        self
    }

    pub fn mesh(&self) -> &Rc<Mesh> {
        &self.mesh
    }

    pub fn set_translation(&mut self, translation: Vector3<f32>) {
        self.translation = translation;
        self.dirty = true;
    }

    pub fn set_rotation(&mut self, rotation: Quaternion<f32>) {
        self.rotation = rotation;
        self.dirty = true;
    }

    pub fn set_scale(&mut self, scale: Vector3<f32>) {
        self.scale = scale;
        self.dirty = true;
    }

    /// Recomputes translation · rotation · scale.
    pub fn update_model(&mut self) -> Matrix4<f32> {
        self.model = self.compose();
        self.dirty = false;
        self.model
    }

    fn compose(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.translation)
            * Matrix4::from(self.rotation)
            * Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }

    /// The model matrix as of the last [`update_model`](Self::update_model).
    pub fn model(&self) -> Matrix4<f32> {
        self.model
    }

    /// Draws with `uModel` set to the model matrix. With `update_model` false
    /// the previous matrix is reused even if the transform changed since.
    pub fn draw(
        &mut self,
        device: &mut dyn GpuDevice,
        program: &ShaderProgram,
        update_model: bool,
    ) -> Result<bool, GpuError> {
        if update_model {
            self.update_model();
        }
        self.submit(device, program, self.model)
    }

    /// Draws with `uModel = world · model`, as scene-graph jobs do. The model
    /// always reflects the current transform.
    pub fn draw_in_world(
        &self,
        device: &mut dyn GpuDevice,
        program: &ShaderProgram,
        world: Matrix4<f32>,
    ) -> Result<bool, GpuError> {
        let model = if self.dirty { self.compose() } else { self.model };
        self.submit(device, program, world * model)
    }

    fn submit(
        &self,
        device: &mut dyn GpuDevice,
        program: &ShaderProgram,
        model: Matrix4<f32>,
    ) -> Result<bool, GpuError> {
        program.set_uniform(device, "uModel", model)?;
        if program.has_uniform("uMaterial") {
            program.set_uniform(device, "uMaterial", self.material.packed())?;
        }
        if program.texture_slots() > 0 {
            match &self.texture {
                Some(texture) => {
                    texture.bind(device, 0)?;
                }
                None => device.bind_texture(0, None)?,
            }
        }
        self.mesh.draw(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data_structures::mesh::MeshData,
        gpu::{ProgramDesc, UniformValue, software::SoftwareDevice},
    };

    #[test]
    fn model_is_translation_rotation_scale() {
        let mut device = SoftwareDevice::new(1, 1);
        let mesh = Rc::new(Mesh::new(&mut device, "cube", MeshData::cuboid(1.0, 1.0, 1.0)).unwrap());
        let mut instance = MeshInstance::new(mesh);
        instance.set_scale(Vector3::new(2.0, 2.0, 2.0));
        instance.set_translation(Vector3::new(1.0, 0.0, 0.0));
        let model = instance.update_model();
        let p = model * cgmath::Vector4::new(1.0, 0.0, 0.0, 1.0);
        assert_eq!(p, cgmath::Vector4::new(3.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn stale_model_is_reused_on_request() {
        let mut device = SoftwareDevice::new(1, 1);
        let program = ShaderProgram::new(&mut device, ProgramDesc::geometry()).unwrap();
        let mesh = Rc::new(Mesh::new(&mut device, "cube", MeshData::cuboid(1.0, 1.0, 1.0)).unwrap());
        let mut instance = MeshInstance::new(mesh);
        device.begin_frame().unwrap();
        device.use_program(program.handle()).unwrap();

        instance.set_translation(Vector3::new(0.0, 5.0, 0.0));
        instance.draw(&mut device, &program, false).unwrap();
        assert_eq!(
            device.uniform(program.handle(), "uModel"),
            Some(UniformValue::from(Matrix4::<f32>::one()))
        );

        instance.draw(&mut device, &program, true).unwrap();
        assert_eq!(
            device.uniform(program.handle(), "uModel"),
            Some(UniformValue::from(Matrix4::from_translation(Vector3::new(0.0, 5.0, 0.0))))
        );
        assert_eq!(device.draws().count(), 2);
    }

    #[test]
    fn world_draws_see_transform_changes() {
        let mut device = SoftwareDevice::new(1, 1);
        let program = ShaderProgram::new(&mut device, ProgramDesc::geometry()).unwrap();
        let mesh = Rc::new(Mesh::new(&mut device, "cube", MeshData::cuboid(1.0, 1.0, 1.0)).unwrap());
        let mut instance = MeshInstance::new(mesh).with_translation(Vector3::new(1.0, 0.0, 0.0));
        device.begin_frame().unwrap();
        device.use_program(program.handle()).unwrap();

        instance.set_translation(Vector3::new(0.0, 0.0, -2.0));
        let world = Matrix4::from_translation(Vector3::new(0.0, 3.0, 0.0));
        instance.draw_in_world(&mut device, &program, world).unwrap();
        assert_eq!(
            device.uniform(program.handle(), "uModel"),
            Some(UniformValue::from(Matrix4::from_translation(Vector3::new(0.0, 3.0, -2.0))))
        );
        assert_eq!(instance.model(), Matrix4::from_translation(Vector3::new(1.0, 0.0, 0.0)));
    }
}
