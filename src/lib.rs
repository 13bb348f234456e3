//! deferred-ngin
//!
//! A small deferred-shading renderer. Scene geometry is drawn into a
//! multi-attachment G-buffer, an ordered chain of togglable full-screen
//! effects runs over it through ping-pong targets, and the result is
//! composited with depth-tested forward draws onto the display.
//!
//! High-level modules
//! - `gpu`: the device abstraction with a wgpu backend and a CPU reference backend
//! - `context`: engine configuration and wgpu device creation
//! - `data_structures`: render targets, meshes, instances, textures and the scene graph
//! - `pipelines`: the three-phase frame orchestrator, programs, effects and lights
//! - `camera`: perspective projection for camera nodes
//! - `input`: keyboard state driving node movement
//! - `resources`: asynchronous asset loading
//! - `flow`: application hooks and the native driver loop
//!

pub mod camera;
pub mod context;
pub mod data_structures;
pub mod flow;
pub mod gpu;
pub mod input;
pub mod pipelines;
pub mod resources;
