use cgmath::Vector3;
use deferred_ngin::{
    camera::Camera,
    data_structures::scene_graph::{Payload, SceneGraph, SceneNode},
    gpu::{DrawTarget, GpuDevice, GpuError, TextureDesc, TextureFormat, TextureKind},
    pipelines::skybox::{SKYBOX_SLOT, Skybox},
};
use image::{Rgba, RgbaImage};

use crate::common::test_utils::{HEIGHT, WIDTH, config, device, draw_labels, pipeline};

mod common;

const FACES: [[u8; 4]; 6] = [
    [255, 0, 0, 255],
    [0, 255, 0, 255],
    [0, 0, 255, 255],
    [255, 255, 0, 255],
    [0, 255, 255, 255],
    [255, 0, 255, 255],
];

fn unit(c: [u8; 4]) -> [f32; 4] {
    c.map(|b| b as f32 / 255.0)
}

#[test]
fn cube_textures_hold_six_faces() {
    let mut device = device();
    let desc = TextureDesc::new_cube("sky", 2, TextureFormat::Rgba8Unorm);
    assert_eq!(desc.kind, TextureKind::Cube);
    let cube = device.create_texture(&desc).unwrap();

    for (layer, color) in FACES.iter().enumerate() {
        let face = RgbaImage::from_pixel(2, 2, Rgba(*color));
        device.write_texture(cube, layer as u32, face.as_raw()).unwrap();
    }
    for (layer, color) in FACES.iter().enumerate() {
        let texels = device.layer_pixels(cube, layer as u32).unwrap();
        assert_eq!(texels.len(), 4);
        assert!(texels.iter().all(|t| *t == unit(*color)));
    }

    let extra = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]));
    let err = device.write_texture(cube, 6, extra.as_raw()).unwrap_err();
    assert!(matches!(err, GpuError::LayerOutOfRange { layer: 6, layers: 6 }));
    assert!(matches!(
        device.layer_pixels(cube, 6),
        Err(GpuError::LayerOutOfRange { layer: 6, layers: 6 })
    ));

    device.bind_texture(SKYBOX_SLOT, Some(cube)).unwrap();
    assert_eq!(device.bound_texture(SKYBOX_SLOT), Some(cube));
}

#[test]
fn two_dimensional_textures_have_a_single_layer() {
    let mut device = device();
    let flat = device
        .create_texture(&TextureDesc::new_2d("flat", 1, 1, TextureFormat::Rgba8Unorm))
        .unwrap();
    let err = device.write_texture(flat, 1, &[0, 0, 0, 255]).unwrap_err();
    assert!(matches!(err, GpuError::LayerOutOfRange { layer: 1, layers: 1 }));
}

#[test]
fn skybox_uploads_every_face_into_one_cube() {
    let mut device = device();
    let textures = device.live_textures();
    let skybox = Skybox::from_colors(&mut device, FACES).unwrap();
    assert_eq!(device.live_textures(), textures + 1);
    for (layer, color) in FACES.iter().enumerate() {
        assert_eq!(
            device.layer_pixels(skybox.texture(), layer as u32).unwrap(),
            [unit(*color)]
        );
    }

    skybox.destroy(&mut device);
    assert_eq!(device.live_textures(), textures);
    assert_eq!(device.live_buffers(), 0);
}

#[test]
fn mismatched_faces_release_the_cube() {
    let mut device = device();
    let textures = device.live_textures();
    let mut faces: [RgbaImage; 6] =
        std::array::from_fn(|_| RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255])));
    faces[3] = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]));

    let err = Skybox::new(&mut device, &faces).unwrap_err();
    assert!(matches!(err, GpuError::DataLength { .. }));
    assert_eq!(device.live_textures(), textures);
}

#[test]
fn skybox_draws_in_the_forward_pass_with_its_cube_bound() {
    let mut device = device();
    let mut pipeline = pipeline(&mut device, &config());
    let skybox = Skybox::from_colors(&mut device, FACES).unwrap();
    let graph = SceneGraph::new(
        SceneNode::empty().with_child(
            SceneNode::new(Payload::Camera(Camera::new(WIDTH, HEIGHT)))
                .with_position(Vector3::new(0.0, 0.0, 5.0)),
        ),
    );
    let jobs = graph.generate_render_jobs();

    device.begin_frame().unwrap();
    pipeline
        .render_scene_with(&mut device, &jobs, None, |device, camera| {
            assert_eq!(camera.position, Vector3::new(0.0, 0.0, 5.0));
            skybox.draw(device, camera)?;
            Ok(())
        })
        .unwrap();
    device.end_frame().unwrap();

    assert_eq!(draw_labels(&device), ["skybox", "composite"]);
    let draw = device.draws().find(|d| d.label == "skybox").unwrap();
    assert!(draw.depth_test);
    assert!(!draw.call.is_fullscreen());
    assert_eq!(draw.textures[SKYBOX_SLOT as usize], Some(skybox.texture()));
    assert_eq!(
        draw.target,
        DrawTarget::Framebuffer {
            framebuffer: pipeline.forward_target().framebuffer(),
            outputs: 1
        }
    );
    assert!(skybox.program().has_uniform("uView"));
    assert_eq!(skybox.program().texture_slots(), 1);
}
