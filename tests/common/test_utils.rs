use std::{cell::RefCell, rc::Rc};

use deferred_ngin::{
    context::Config,
    gpu::{GpuDevice, TextureHandle, software::SoftwareDevice},
    pipelines::{RenderPipeline, deferred::identity_camera},
};

pub const WIDTH: u32 = 4;
pub const HEIGHT: u32 = 4;

/// Hook invocation counters shared between a flow and the test body.
#[derive(Debug, Default)]
pub struct State {
    init_invocations: u32,
    update_invocations: u32,
    render_invocations: u32,
    pub ticks_seen: Vec<u64>,
}

impl State {
    pub fn shared() -> Rc<RefCell<State>> {
        Rc::new(RefCell::new(State::default()))
    }

    pub fn init(&mut self) {
        self.init_invocations += 1;
    }

    pub fn update(&mut self, tick: u64) {
        self.update_invocations += 1;
        self.ticks_seen.push(tick);
    }

    pub fn render(&mut self) {
        self.render_invocations += 1;
    }

    pub fn init_invocations(&self) -> u32 {
        self.init_invocations
    }

    pub fn update_invocations(&self) -> u32 {
        self.update_invocations
    }

    pub fn render_invocations(&self) -> u32 {
        self.render_invocations
    }
}

pub fn config() -> Config {
    Config::default().with_size(WIDTH, HEIGHT)
}

pub fn device() -> SoftwareDevice {
    SoftwareDevice::new(WIDTH, HEIGHT)
}

pub fn pipeline(device: &mut SoftwareDevice, config: &Config) -> RenderPipeline {
    RenderPipeline::new(device, config).expect("pipeline setup")
}

/// Runs all three passes with no draws of its own.
pub fn empty_frame(device: &mut SoftwareDevice, pipeline: &mut RenderPipeline) {
    device.begin_frame().expect("begin frame");
    pipeline
        .render_frame(device, &identity_camera(), |_, _| Ok(()), |_| Ok(()))
        .expect("frame");
    device.end_frame().expect("end frame");
}

/// Labels of the draws recorded so far, in order.
pub fn draw_labels(device: &SoftwareDevice) -> Vec<String> {
    device.draws().map(|d| d.label.clone()).collect()
}

pub fn assert_uniform(device: &SoftwareDevice, texture: TextureHandle, expected: [f32; 4]) {
    let pixels = device.pixels(texture).expect("texture exists");
    for (i, texel) in pixels.iter().enumerate() {
        for c in 0..4 {
            assert!(
                (texel[c] - expected[c]).abs() < 1e-5,
                "texel {i} is {texel:?}, expected {expected:?}"
            );
        }
    }
}
