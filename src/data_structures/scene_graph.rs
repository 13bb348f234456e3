//! Scene graph and per-frame render jobs.
//!
//! The graph is a tree of owned [`SceneNode`]s. Each frame,
//! [`SceneGraph::generate_render_jobs`] walks the whole tree depth first,
//! resolves every node's world matrix and sorts the payloads into job lists
//! for the pipeline phases. Nothing is cached between calls.

use std::f32::consts::TAU;

use cgmath::{Matrix4, Rad, SquareMatrix, Vector3};

use crate::{
    camera::Camera,
    data_structures::instance::MeshInstance,
    input::{InputCode, InputState},
    pipelines::light::Light,
};

/// What a node carries besides its transform.
#[derive(Debug, Default)]
pub enum Payload {
    #[default]
    Empty,
    /// Drawn in the geometry pass, into the G-buffer.
    GeometryMesh(MeshInstance),
    /// Drawn in the final forward pass, depth tested against the G-buffer depth.
    ForwardMesh(MeshInstance),
    Light(Light),
    Camera(Camera),
}

#[derive(Debug)]
pub struct SceneNode {
    pub position: Vector3<f32>,
    pub scale: Vector3<f32>,
    pub yaw: Rad<f32>,
    pub pitch: Rad<f32>,
    pub roll: Rad<f32>,
    /// Units per second.
    pub translation_speed: f32,
    /// Radians per second.
    pub rotation_speed: f32,
    pub payload: Payload,
    children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn new(payload: Payload) -> Self {
        Self {
            position: Vector3::new(0.0, 0.0, 0.0),
            scale: Vector3::new(1.0, 1.0, 1.0),
            yaw: Rad(0.0),
            pitch: Rad(0.0),
            roll: Rad(0.0),
            translation_speed: 0.5,
            rotation_speed: 0.2 * TAU,
            payload,
            children: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Payload::Empty)
    }

    pub fn with_position(mut self, position: Vector3<f32>) -> Self {
        self.position = position;
        self
    }

    pub fn with_scale(mut self, scale: Vector3<f32>) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_child(mut self, child: SceneNode) -> Self {
        self.children.push(child);
        self
    }

    /// Appends `child` and returns its index among this node's children.
    pub fn add_child(&mut self, child: SceneNode) -> usize {
        self.children.push(child);
        self.children.len() - 1
    }

    pub fn children(&self) -> &[SceneNode] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [SceneNode] {
        &mut self.children
    }

    /// T · R_y(yaw) · R_x(pitch) · R_z(roll) · S
    pub fn local_matrix(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.position)
            * Matrix4::from_angle_y(self.yaw)
            * Matrix4::from_angle_x(self.pitch)
            * Matrix4::from_angle_z(self.roll)
            * Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }

    /// Direction the node looks along (its local -Z).
    pub fn forward(&self) -> Vector3<f32> {
        let (sy, cy) = self.yaw.0.sin_cos();
        let (sp, cp) = self.pitch.0.sin_cos();
        Vector3::new(-sy * cp, sp, -cy * cp)
    }

    pub fn right(&self) -> Vector3<f32> {
        let (sy, cy) = self.yaw.0.sin_cos();
        Vector3::new(cy, 0.0, -sy)
    }

    /// Moves along the forward/right basis; `dy` moves along world up.
    pub fn translate(&mut self, dx: f32, dy: f32, dz: f32) {
        let (f, r) = (self.forward(), self.right());
        let speed = self.translation_speed;
        self.position.x += (dz * f.x + dx * r.x) * speed;
        self.position.y += dy * speed;
        self.position.z += (dz * f.z + dx * r.z) * speed;
    }

    pub fn rotate(&mut self, droll: f32, dpitch: f32, dyaw: f32) {
        let speed = self.rotation_speed;
        self.roll += Rad(droll * speed);
        self.pitch += Rad(dpitch * speed);
        self.yaw += Rad(dyaw * speed);
    }

    /// Applies one tick of keyboard movement scaled by `dt` seconds.
    pub fn update(&mut self, input: &InputState, dt: f32) {
        use InputCode::*;
        let dpitch = input.axis(ArrowUp, ArrowDown) * dt;
        let dyaw = input.axis(ArrowLeft, ArrowRight) * dt;
        let droll = input.axis(RollRight, RollLeft) * dt;
        let dz = input.axis(Forward, Backward) * dt;
        let dx = input.axis(Right, Left) * dt;
        let dy = input.axis(Up, Down) * dt;
        self.translate(dx, dy, dz);
        self.rotate(droll, dpitch, dyaw);
    }
}

/// A payload and the world matrix its node resolved to this frame.
#[derive(Debug)]
pub struct RenderJob<'a, T> {
    pub payload: &'a T,
    pub world: Matrix4<f32>,
}

// derive(Clone) would require T: Clone
impl<T> Clone for RenderJob<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RenderJob<'_, T> {}

/// A camera resolved against the graph.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CameraJob {
    pub position: Vector3<f32>,
    pub view: Matrix4<f32>,
    pub projection: Matrix4<f32>,
}

impl CameraJob {
    pub fn new(camera: &Camera, world: Matrix4<f32>) -> Self {
        Self {
            position: world.w.truncate(),
            // a singular world matrix (zero scale) leaves the view untouched
            view: world.invert().unwrap_or(Matrix4::identity()),
            projection: camera.projection.matrix(),
        }
    }
}

/// Job lists of one frame, borrowed from the graph.
#[derive(Debug, Default)]
pub struct RenderJobs<'a> {
    pub geometry: Vec<RenderJob<'a, MeshInstance>>,
    pub forward: Vec<RenderJob<'a, MeshInstance>>,
    pub lights: Vec<RenderJob<'a, Light>>,
    pub cameras: Vec<CameraJob>,
}

impl RenderJobs<'_> {
    /// The first camera found in traversal order.
    pub fn camera(&self) -> Option<&CameraJob> {
        self.cameras.first()
    }
}

#[derive(Debug)]
pub struct SceneGraph {
    pub root: SceneNode,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new(SceneNode::empty())
    }
}

impl SceneGraph {
    pub fn new(root: SceneNode) -> Self {
        Self { root }
    }

    /// Walks the tree pre-order with `world = parent_world · local`.
    ///
    /// The tree is owned, so it cannot contain cycles.
    pub fn generate_render_jobs(&self) -> RenderJobs<'_> {
        let mut jobs = RenderJobs::default();
        visit(&self.root, Matrix4::identity(), &mut jobs);
        jobs
    }

    /// Follows child indices from the root, e.g. `&[0, 2]` is the third child of the first child.
    pub fn node_mut(&mut self, path: &[usize]) -> Option<&mut SceneNode> {
        let mut node = &mut self.root;
        for &index in path {
            node = node.children.get_mut(index)?;
        }
        Some(node)
    }

    /// Applies keyboard movement to the node at `path`. Returns false if there is none.
    pub fn update_node(&mut self, path: &[usize], input: &InputState, dt: f32) -> bool {
        match self.node_mut(path) {
            Some(node) => {
                node.update(input, dt);
                true
            }
            None => false,
        }
    }
}

fn visit<'a>(node: &'a SceneNode, parent: Matrix4<f32>, jobs: &mut RenderJobs<'a>) {
    let world = parent * node.local_matrix();
    match &node.payload {
        Payload::Empty => {}
        Payload::GeometryMesh(mesh) => jobs.geometry.push(RenderJob {
            payload: mesh,
            world,
        }),
        Payload::ForwardMesh(mesh) => jobs.forward.push(RenderJob {
            payload: mesh,
            world,
        }),
        Payload::Light(light) => jobs.lights.push(RenderJob {
            payload: light,
            world,
        }),
        Payload::Camera(camera) => jobs.cameras.push(CameraJob::new(camera, world)),
    }
    for child in &node.children {
        visit(child, world, jobs);
    }
}
