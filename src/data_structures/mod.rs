//! Engine data structures.
//!
//! - `render_target` holds framebuffers and their ordered attachments
//! - `mesh` has vertex layout, procedural geometry and drawable meshes
//! - `instance` places a shared mesh with its own transform and surface
//! - `texture` wraps sampled images that may still be loading
//! - `pending` is the readiness state machine shared by loaded resources
//! - `scene_graph` turns a node tree into per-frame render jobs

pub mod instance;
pub mod mesh;
pub mod pending;
pub mod render_target;
pub mod scene_graph;
pub mod texture;
