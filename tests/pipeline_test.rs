use std::rc::Rc;

use cgmath::{Matrix4, SquareMatrix, Vector3};
use deferred_ngin::{
    camera::Camera,
    data_structures::{
        instance::MeshInstance,
        mesh::{Mesh, MeshData},
        render_target::ColorFormat,
        scene_graph::{Payload, SceneGraph, SceneNode},
    },
    gpu::{AttachmentSlot, DrawTarget, GpuDevice, ProgramDesc, UniformValue},
    pipelines::{
        Phase, PipelineError,
        deferred::{PingPong, identity_camera},
        effects::Effect,
        light::{Light, PointLight},
        program::{G_DEPTH_SLOT, POST_COLOR_SLOT, ShaderProgram},
    },
};

use crate::common::test_utils::{
    HEIGHT, WIDTH, assert_uniform, config, device, draw_labels, empty_frame, pipeline,
};

mod common;

#[test]
fn invert_then_threshold_turns_mid_gray_white() {
    let mut device = device();
    let config = config()
        .with_post_source_attachment(0)
        .with_clear_color([0.5, 0.5, 0.5, 1.0]);
    let mut pipeline = pipeline(&mut device, &config);
    for effect in [Effect::Invert, Effect::Threshold { cutoff: 0.5 }] {
        let program = effect.create(&mut device).unwrap();
        pipeline.add_post_program(program);
    }

    empty_frame(&mut device, &mut pipeline);

    assert_eq!(device.display_pixels().len(), (WIDTH * HEIGHT) as usize);
    for texel in device.display_pixels() {
        assert_eq!(*texel, [1.0, 1.0, 1.0, 1.0]);
    }
    assert_eq!(pipeline.phase(), Phase::Idle);

    // invert wrote B from A, threshold wrote A from B
    let after_invert = pipeline.ping_pong(PingPong::B).color_attachment(0).unwrap().texture;
    assert_uniform(&device, after_invert, [0.5, 0.5, 0.5, 1.0]);
    let after_threshold = pipeline.ping_pong(PingPong::A).color_attachment(0).unwrap().texture;
    assert_uniform(&device, after_threshold, [1.0, 1.0, 1.0, 1.0]);
}

#[test]
fn invert_alone_keeps_mid_gray() {
    let mut device = device();
    let config = config()
        .with_post_source_attachment(0)
        .with_clear_color([0.5, 0.5, 0.5, 1.0]);
    let mut pipeline = pipeline(&mut device, &config);
    pipeline.add_post_program(Effect::Invert.create(&mut device).unwrap());
    let threshold = pipeline.add_post_program(
        Effect::Threshold { cutoff: 0.5 }.create(&mut device).unwrap(),
    );
    pipeline.set_post_enabled(threshold, false).unwrap();

    empty_frame(&mut device, &mut pipeline);

    assert_eq!(draw_labels(&device), ["invert", "composite"]);
    assert_eq!(pipeline.read_buffer(), PingPong::B);
    let read = pipeline.ping_pong(PingPong::B).color_attachment(0).unwrap().texture;
    assert_uniform(&device, read, [0.5, 0.5, 0.5, 1.0]);
}

#[test]
fn normalized_post_source_rounds_mid_gray_below_the_cutoff() {
    let mut device = device();
    // default post source: albedo, 8-bit normalized
    let config = config().with_clear_color([0.5, 0.5, 0.5, 1.0]);
    let mut pipeline = pipeline(&mut device, &config);
    for effect in [Effect::Invert, Effect::Threshold { cutoff: 0.5 }] {
        let program = effect.create(&mut device).unwrap();
        pipeline.add_post_program(program);
    }

    empty_frame(&mut device, &mut pipeline);

    // 0.5 stores as 128/255, inverted to 127/255, which falls below 0.5
    let after_invert = pipeline.ping_pong(PingPong::B).color_attachment(0).unwrap().texture;
    assert_uniform(&device, after_invert, [127.0 / 255.0, 127.0 / 255.0, 127.0 / 255.0, 1.0]);
    for texel in device.display_pixels() {
        assert_eq!(*texel, [0.0, 0.0, 0.0, 1.0]);
    }
}

#[test]
fn no_post_programs_shows_the_post_source() {
    let mut device = device();
    let config = config()
        .with_post_source_attachment(0)
        .with_clear_color([0.25, 0.5, 0.75, 1.0]);
    let mut pipeline = pipeline(&mut device, &config);

    empty_frame(&mut device, &mut pipeline);

    assert_eq!(draw_labels(&device), ["composite"]);
    let forward = pipeline.forward_target().color_attachment(0).unwrap().texture;
    assert_uniform(&device, forward, [0.25, 0.5, 0.75, 1.0]);
    assert_eq!(pipeline.frame_stats().swaps, 0);
}

#[test]
fn each_enabled_program_draws_once_and_swaps() {
    let mut device = device();
    let mut pipeline = pipeline(&mut device, &config());
    let mut ids = Vec::new();
    for _ in 0..3 {
        let program = Effect::Invert.create(&mut device).unwrap();
        ids.push(pipeline.add_post_program(program));
    }
    pipeline.set_post_enabled(ids[1], false).unwrap();

    empty_frame(&mut device, &mut pipeline);

    assert_eq!(draw_labels(&device), ["invert", "invert", "composite"]);
    let stats = pipeline.frame_stats();
    assert_eq!((stats.post_draws, stats.swaps), (2, 2));
    assert_eq!(pipeline.read_buffer(), PingPong::A);
}

#[test]
fn read_side_carries_over_between_frames() {
    let mut device = device();
    let config = config()
        .with_post_source_attachment(0)
        .with_clear_color([0.25, 0.25, 0.25, 1.0]);
    let mut pipeline = pipeline(&mut device, &config);
    for _ in 0..3 {
        let program = Effect::Invert.create(&mut device).unwrap();
        pipeline.add_post_program(program);
    }

    empty_frame(&mut device, &mut pipeline);
    assert_eq!(pipeline.read_buffer(), PingPong::B);
    empty_frame(&mut device, &mut pipeline);
    assert_eq!(pipeline.read_buffer(), PingPong::A);

    // three inversions of the source leave it inverted once
    let forward = pipeline.forward_target().color_attachment(0).unwrap().texture;
    assert_uniform(&device, forward, [0.75, 0.75, 0.75, 1.0]);
}

#[test]
fn disabled_programs_leave_the_chain_untouched() {
    let mut device = device();
    let mut pipeline = pipeline(&mut device, &config());
    let mut program = Effect::Invert.create(&mut device).unwrap();
    program.set_enabled(false);
    let id = pipeline.add_post_program(program);

    empty_frame(&mut device, &mut pipeline);
    assert_eq!(pipeline.frame_stats().post_draws, 0);
    assert_eq!(pipeline.read_buffer(), PingPong::A);

    pipeline.set_post_enabled(id, true).unwrap();
    empty_frame(&mut device, &mut pipeline);
    assert_eq!(pipeline.frame_stats().post_draws, 1);
    assert_eq!(pipeline.read_buffer(), PingPong::B);
}

#[test]
fn post_draws_read_the_g_buffer_and_the_previous_result() {
    let mut device = device();
    let mut pipeline = pipeline(&mut device, &config());
    let program = Effect::Invert.create(&mut device).unwrap();
    pipeline.add_post_program(program);

    empty_frame(&mut device, &mut pipeline);

    let g_depth = pipeline.g_buffer().depth_attachment().unwrap().texture;
    let first_read = pipeline.ping_pong(PingPong::A).color_attachment(0).unwrap().texture;
    let post = device.draws().find(|d| d.label == "invert").unwrap();
    assert!(post.call.is_fullscreen());
    assert!(post.call.vertices.is_none());
    assert!(!post.depth_test);
    assert!(!post.face_culling);
    assert_eq!(post.textures[G_DEPTH_SLOT as usize], Some(g_depth));
    assert_eq!(post.textures[POST_COLOR_SLOT as usize], Some(first_read));
    assert_eq!(
        post.target,
        DrawTarget::Framebuffer {
            framebuffer: pipeline.ping_pong(PingPong::B).framebuffer(),
            outputs: 1
        }
    );

    let composite = device.draws().last().unwrap();
    assert_eq!(composite.label, "composite");
    assert_eq!(composite.target, DrawTarget::Display);
    assert!(composite.call.is_fullscreen());
}

#[test]
fn forward_pass_draws_over_copied_color_and_depth() {
    let mut device = device();
    let mut pipeline = pipeline(&mut device, &config());
    let solid = ShaderProgram::new(&mut device, ProgramDesc::solid_color()).unwrap();
    let mesh = Mesh::new(&mut device, "cube", MeshData::cuboid(1.0, 1.0, 1.0)).unwrap();

    device.begin_frame().unwrap();
    pipeline
        .render_frame(
            &mut device,
            &identity_camera(),
            |device, program| {
                let instance = MeshInstance::new(Rc::new(
                    Mesh::new(device, "quad", MeshData::cuboid(1.0, 1.0, 0.0))?,
                ));
                instance.draw_in_world(device, program, Matrix4::identity())?;
                Ok(())
            },
            |device| {
                solid.bind(device)?;
                mesh.draw(device)?;
                Ok(())
            },
        )
        .unwrap();
    device.end_frame().unwrap();

    let forward = pipeline.forward_target();
    let into_forward: Vec<_> = device
        .blits()
        .filter(|b| b.dst == forward.framebuffer())
        .map(|b| b.dst_slot)
        .collect();
    assert_eq!(into_forward, [AttachmentSlot::Color(0), AttachmentSlot::Depth]);

    let geometry = device.draws().find(|d| d.label == "geometry").unwrap();
    assert!(geometry.depth_test);
    assert!(geometry.face_culling);
    assert_eq!(
        geometry.target,
        DrawTarget::Framebuffer {
            framebuffer: pipeline.g_buffer().framebuffer(),
            outputs: 4
        }
    );

    let solid_draw = device.draws().find(|d| d.label == "solid color").unwrap();
    assert!(solid_draw.depth_test);
    assert!(!solid_draw.call.is_fullscreen());
    assert_eq!(
        solid_draw.target,
        DrawTarget::Framebuffer {
            framebuffer: forward.framebuffer(),
            outputs: 1
        }
    );
    assert_eq!(draw_labels(&device), ["geometry", "solid color", "composite"]);
}

#[test]
fn skipped_passes_are_rejected() {
    let mut device = device();
    let mut pipeline = pipeline(&mut device, &config());
    device.begin_frame().unwrap();

    let err = pipeline.final_forward_pass(&mut device, |_| Ok(())).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::PhaseOrder {
            expected: Phase::PostProcess,
            found: Phase::Idle
        }
    ));

    pipeline
        .geometry_pass(&mut device, &identity_camera(), |_, _| Ok(()))
        .unwrap();
    assert_eq!(pipeline.phase(), Phase::Geometry);
    let err = pipeline
        .geometry_pass(&mut device, &identity_camera(), |_, _| Ok(()))
        .unwrap_err();
    assert!(matches!(err, PipelineError::PhaseOrder { .. }));
}

#[test]
fn render_scene_sorts_jobs_into_their_passes() {
    let mut device = device();
    let mut pipeline = pipeline(&mut device, &config());
    let lighting = Effect::Lighting { steps: 0 }.create(&mut device).unwrap();
    let lighting_handle = lighting.handle();
    pipeline.add_post_program(lighting);
    let solid = ShaderProgram::new(&mut device, ProgramDesc::solid_color()).unwrap();

    let cube = Rc::new(Mesh::new(&mut device, "cube", MeshData::cuboid(1.0, 1.0, 1.0)).unwrap());
    let graph = SceneGraph::new(
        SceneNode::empty()
            .with_child(
                SceneNode::new(Payload::Camera(Camera::new(WIDTH, HEIGHT)))
                    .with_position(Vector3::new(0.0, 0.0, 5.0)),
            )
            .with_child(SceneNode::new(Payload::GeometryMesh(MeshInstance::new(cube.clone()))))
            .with_child(SceneNode::new(Payload::GeometryMesh(MeshInstance::new(cube.clone()))))
            .with_child(SceneNode::new(Payload::ForwardMesh(MeshInstance::new(cube))))
            .with_child(SceneNode::new(Payload::Light(Light::Point(PointLight {
                position: Vector3::new(0.0, 1.0, 0.0),
                color: Vector3::new(1.0, 1.0, 1.0),
                intensity: 2.0,
            })))),
    );
    let jobs = graph.generate_render_jobs();

    device.begin_frame().unwrap();
    pipeline.render_scene(&mut device, &jobs, Some(&solid)).unwrap();
    device.end_frame().unwrap();

    assert_eq!(
        draw_labels(&device),
        ["geometry", "geometry", "lighting", "solid color", "composite"]
    );
    assert_eq!(
        device.uniform(lighting_handle, "uPointLightCount"),
        Some(UniformValue::Int(1))
    );
    assert_eq!(
        device.uniform(lighting_handle, "uCameraPos"),
        Some(UniformValue::Vec3([0.0, 0.0, 5.0]))
    );

    device.clear_commands();
    device.begin_frame().unwrap();
    pipeline.render_scene(&mut device, &jobs, None).unwrap();
    device.end_frame().unwrap();
    assert_eq!(
        draw_labels(&device),
        ["geometry", "geometry", "lighting", "composite"]
    );
}

#[test]
fn resize_rebuilds_targets_in_the_same_order() {
    let mut device = device();
    let mut pipeline = pipeline(&mut device, &config());
    let live = device.live_textures();

    pipeline.resize(&mut device, 8, 2).unwrap();

    assert_eq!((pipeline.width(), pipeline.height()), (8, 2));
    assert_eq!(device.live_textures(), live);
    let g_buffer = pipeline.g_buffer();
    let formats: Vec<_> = g_buffer
        .color_attachments()
        .iter()
        .map(|a| (a.format, a.width, a.height))
        .collect();
    assert_eq!(
        formats,
        [
            (Some(ColorFormat::Float32), 8, 2),
            (Some(ColorFormat::Normalized8), 8, 2),
            (Some(ColorFormat::Float32), 8, 2),
            (Some(ColorFormat::Float32), 8, 2),
        ]
    );

    pipeline.resize(&mut device, 0, 2).unwrap();
    assert_eq!((pipeline.width(), pipeline.height()), (8, 2));
}

#[test]
fn post_source_must_name_a_g_buffer_color() {
    let mut device = device();
    let err = deferred_ngin::pipelines::RenderPipeline::new(
        &mut device,
        &config().with_post_source_attachment(4),
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::PostSource { index: 4, count: 4 }));
}
