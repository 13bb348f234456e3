//! Render passes and the programs they run.
//!
//! - `deferred` orchestrates the geometry, post-processing and final forward passes
//! - `program` wraps compiled programs and holds the built-in descriptors
//! - `effects` is the library of full-screen post-processing effects
//! - `light` gathers scene lights into lighting uniforms
//! - `skybox` draws a cube-mapped background in the forward pass

use thiserror::Error;

use crate::{data_structures::render_target::TargetError, gpu::GpuError};

pub mod deferred;
pub mod effects;
pub mod light;
pub mod program;
pub mod skybox;

pub use deferred::{Phase, RenderPipeline};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error("the `{0}` callback was never set")]
    MissingCallback(&'static str),
    #[error("pass out of order: pipeline should be in {expected:?}, found {found:?}")]
    PhaseOrder { expected: Phase, found: Phase },
    #[error("frame ended in {0:?} instead of returning to Idle")]
    IncompleteFrame(Phase),
    #[error("post source attachment {index} is not one of the {count} G-buffer colors")]
    PostSource { index: u32, count: u32 },
    #[error("G-buffer needs {required} bytes per sample, the device allows {max}")]
    BytesPerSample { required: u32, max: u32 },
    #[error("unknown post program id {0}")]
    UnknownPostProgram(usize),
    #[error(transparent)]
    Callback(anyhow::Error),
}
