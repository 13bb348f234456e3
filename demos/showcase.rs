//! Spinning shapes under deferred lighting with outlines, in front of a skybox.
//!
//! WASD/Space/C move the camera, the arrow keys and Q/E turn it.

use std::rc::Rc;

use cgmath::{Rad, Vector3};
use deferred_ngin::{
    camera::Camera,
    context::Config,
    data_structures::{
        instance::MeshInstance,
        mesh::{Material, Mesh, MeshData},
        scene_graph::{Payload, SceneGraph, SceneNode},
    },
    flow::{self, FlowBuilder},
    gpu::ProgramDesc,
    pipelines::{
        effects::{EdgeSource, Effect},
        light::{DirLight, Light, PointLight},
        program::ShaderProgram,
        skybox::Skybox,
    },
};

#[derive(Default)]
struct Showcase {
    scene: Option<SceneGraph>,
    markers: Option<ShaderProgram>,
    skybox: Option<Skybox>,
}

/// Child indices of the root.
const CAMERA: usize = 0;
const SPINNER: usize = 1;

struct Meshes {
    cube: Rc<Mesh>,
    floor: Rc<Mesh>,
    sphere: Rc<Mesh>,
    tetrahedron: Rc<Mesh>,
}

fn build_scene(config: &Config, meshes: Meshes) -> SceneGraph {
    let camera = SceneNode::new(Payload::Camera(Camera::new(config.width, config.height)))
        .with_position(Vector3::new(0.0, 1.5, 6.0));

    let spinner = SceneNode::empty()
        .with_child(
            SceneNode::new(Payload::GeometryMesh(MeshInstance::new(meshes.cube)))
                .with_position(Vector3::new(-1.5, 0.0, 0.0)),
        )
        .with_child(
            SceneNode::new(Payload::GeometryMesh(
                MeshInstance::new(meshes.tetrahedron)
                    .with_material(Material::new(0.2, 0.7, 0.9, 64.0)),
            ))
            .with_position(Vector3::new(1.5, 0.0, 0.0))
            .with_scale(Vector3::new(0.6, 0.6, 0.6)),
        );

    let floor = SceneNode::new(Payload::GeometryMesh(MeshInstance::new(meshes.floor)))
        .with_position(Vector3::new(0.0, -1.0, 0.0));

    let lamp = SceneNode::new(Payload::Light(Light::Point(PointLight {
        position: Vector3::new(0.0, 0.0, 0.0),
        color: Vector3::new(1.0, 0.9, 0.6),
        intensity: 3.0,
    })))
    .with_position(Vector3::new(0.0, 2.0, 1.0))
    .with_child(
        SceneNode::new(Payload::ForwardMesh(MeshInstance::new(meshes.sphere)))
            .with_scale(Vector3::new(0.1, 0.1, 0.1)),
    );

    let sun = SceneNode::new(Payload::Light(Light::Directional(DirLight {
        direction: Vector3::new(0.3, 1.0, 0.5),
        color: Vector3::new(1.0, 1.0, 1.0),
        intensity: 0.6,
    })));

    SceneGraph::new(
        SceneNode::empty()
            .with_child(camera)
            .with_child(spinner)
            .with_child(floor)
            .with_child(lamp)
            .with_child(sun),
    )
}

fn main() -> anyhow::Result<()> {
    let config = Config::default()
        .with_title("deferred-ngin showcase")
        .with_asset_root(env!("ASSET_DIR"));
    let flow = FlowBuilder::new(Showcase::default())
        .on_init(|state, ctx| {
            let tetrahedron = match ctx.loader {
                Some(loader) => loader.load_mesh("tetrahedron.obj"),
                None => Mesh::new(ctx.device, "tetrahedron", MeshData::cuboid(1.0, 1.0, 1.0))?,
            };
            let meshes = Meshes {
                cube: Rc::new(Mesh::new(ctx.device, "cube", MeshData::cuboid(1.0, 1.0, 1.0))?),
                floor: Rc::new(Mesh::new(ctx.device, "floor", MeshData::cuboid(8.0, 0.1, 8.0))?),
                sphere: Rc::new(Mesh::new(ctx.device, "sphere", MeshData::sphere(16))?),
                tetrahedron: Rc::new(tetrahedron),
            };
            state.scene = Some(build_scene(ctx.config, meshes));

            let markers = ShaderProgram::new(ctx.device, ProgramDesc::solid_color())?;
            markers.set_uniform(ctx.device, "uColor", [1.0, 0.9, 0.3, 1.0])?;
            state.markers = Some(markers);
            state.skybox = Some(Skybox::from_colors(
                ctx.device,
                [
                    [120, 150, 200, 255],
                    [120, 150, 200, 255],
                    [170, 200, 240, 255],
                    [60, 60, 70, 255],
                    [130, 160, 210, 255],
                    [110, 140, 190, 255],
                ],
            )?);

            for effect in [
                Effect::Lighting { steps: 0 },
                Effect::EdgeDetection {
                    source: EdgeSource::Depth,
                    outline: [0.05, 0.05, 0.05, 1.0],
                },
            ] {
                let program = effect.create(ctx.device)?;
                ctx.pipeline.add_post_program(program);
            }
            let mut halftone = Effect::Halftone {
                scale: 1.5,
                steps: 4.0,
                intensity: 0.5,
            }
            .create(ctx.device)?;
            halftone.set_enabled(false);
            ctx.pipeline.add_post_program(halftone);
            Ok(())
        })
        .on_update(|state, ctx| {
            let dt = ctx.dt.as_secs_f32();
            if let Some(scene) = &mut state.scene {
                scene.update_node(&[CAMERA], ctx.input, dt);
                if let Some(spinner) = scene.node_mut(&[SPINNER]) {
                    spinner.yaw += Rad(0.5 * dt);
                }
            }
            Ok(())
        })
        .on_render(|state, frame| {
            let Some(scene) = &state.scene else {
                return Ok(());
            };
            let jobs = scene.generate_render_jobs();
            frame.pipeline.render_scene_with(
                frame.device,
                &jobs,
                state.markers.as_ref(),
                |device, camera| {
                    if let Some(skybox) = &state.skybox {
                        skybox.draw(device, camera)?;
                    }
                    Ok(())
                },
            )?;
            Ok(())
        })
        .build()?;
    flow::run(config, flow)
}
