//! Camera payload and perspective projection.
//!
//! The camera itself has no pose: its scene node provides position and
//! orientation, and the view matrix is the inverse of that node's world matrix.

use cgmath::{Matrix4, Rad, perspective};
use std::f32::consts::TAU;

/// cgmath builds OpenGL clip space (z in -1..1); wgpu expects z in 0..1.
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Projection {
    pub aspect: f32,
    pub fovy: Rad<f32>,
    pub znear: f32,
    pub zfar: f32,
}

impl Projection {
    pub fn new<F: Into<Rad<f32>>>(width: u32, height: u32, fovy: F, znear: f32, zfar: f32) -> Self {
        Self {
            aspect: width as f32 / height.max(1) as f32,
            fovy: fovy.into(),
            znear,
            zfar,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = width as f32 / height.max(1) as f32;
    }

    pub fn matrix(&self) -> Matrix4<f32> {
        OPENGL_TO_WGPU_MATRIX * perspective(self.fovy, self.aspect, self.znear, self.zfar)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Camera {
    pub projection: Projection,
}

impl Camera {
    /// A quarter turn vertical field of view, near plane 0.1 and far plane 100.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            projection: Projection::new(width, height, Rad(0.25 * TAU), 0.1, 100.0),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.projection.resize(width, height);
    }
}
