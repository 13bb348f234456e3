use std::{path::PathBuf, time::Duration};

use deferred_ngin::{
    data_structures::{
        mesh::{Mesh, MeshData},
        pending::LoadState,
        texture::Texture,
    },
    gpu::{GpuDevice, Topology, software::SoftwareDevice},
    resources::Loader,
};
use image::{Rgba, RgbaImage};

use crate::common::test_utils::device;

mod common;

fn asset_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets")
}

/// Polls until the mesh leaves `Pending`, giving up after a few seconds.
async fn settle(mesh: &Mesh, device: &mut SoftwareDevice) -> LoadState {
    for _ in 0..500 {
        let state = mesh.poll(device).unwrap();
        if state != LoadState::Pending {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("`{}` never finished loading", mesh.label());
}

#[test]
fn pending_meshes_draw_once_their_data_arrives() {
    let mut device = device();
    let (mesh, completion) = Mesh::pending("late cube");
    device.begin_frame().unwrap();

    assert!(!mesh.draw(&mut device).unwrap());
    assert_eq!(device.draws().count(), 0);
    assert_eq!(mesh.state(), LoadState::Pending);

    completion.complete(Ok(MeshData::cuboid(1.0, 1.0, 1.0)));
    assert!(mesh.draw(&mut device).unwrap());
    assert_eq!(mesh.state(), LoadState::Ready);

    let draws: Vec<_> = device.draws().collect();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].call.topology, Topology::TriangleList);
    assert_eq!(draws[0].call.count, 36);
    assert!(draws[0].call.indices.is_some());
}

#[test]
fn strip_meshes_keep_their_topology() {
    let mut device = device();
    let mesh = Mesh::new(&mut device, "sphere", MeshData::sphere(4)).unwrap();
    device.begin_frame().unwrap();
    mesh.draw(&mut device).unwrap();
    let draw = device.draws().next().unwrap();
    assert_eq!(draw.call.topology, Topology::TriangleStrip);
    assert_eq!(draw.call.count, 2 * 4 * 5);
}

#[test]
fn failed_loads_never_draw() {
    let mut device = device();
    let (mesh, completion) = Mesh::pending("broken");
    completion.complete(Err(anyhow::anyhow!("no such file")));
    device.begin_frame().unwrap();

    assert!(!mesh.draw(&mut device).unwrap());
    assert!(!mesh.draw(&mut device).unwrap());
    assert_eq!(mesh.state(), LoadState::Failed);
    assert_eq!(device.draws().count(), 0);
}

#[test]
fn dropping_a_pending_mesh_discards_its_load() {
    let (mesh, completion) = Mesh::pending("unwanted");
    assert!(completion.is_wanted());
    drop(mesh);
    assert!(!completion.is_wanted());
    completion.complete(Ok(MeshData::cuboid(1.0, 1.0, 1.0)));
}

#[test]
fn destroying_a_ready_mesh_frees_its_buffers() {
    let mut device = device();
    let mesh = Mesh::new(&mut device, "cube", MeshData::cuboid(1.0, 1.0, 1.0)).unwrap();
    assert_eq!(device.live_buffers(), 2);
    mesh.destroy(&mut device);
    assert_eq!(device.live_buffers(), 0);
}

#[test]
fn pending_textures_bind_as_empty_slots() {
    let mut device = device();
    let (texture, completion) = Texture::pending("late texture");

    assert_eq!(texture.bind(&mut device, 0).unwrap(), LoadState::Pending);
    assert_eq!(device.bound_texture(0), None);

    completion.complete(Ok(RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255]))));
    assert_eq!(texture.bind(&mut device, 0).unwrap(), LoadState::Ready);
    let handle = texture.handle().unwrap();
    assert_eq!(device.bound_texture(0), Some(handle));
    assert_eq!(device.pixel(handle, 1, 1).unwrap(), [1.0, 0.0, 0.0, 1.0]);
}

#[tokio::test]
async fn loader_delivers_obj_meshes() {
    let loader = Loader::current(asset_root()).unwrap();
    let mut device = device();
    let mesh = loader.load_mesh("tetrahedron.obj");

    assert_eq!(settle(&mesh, &mut device).await, LoadState::Ready);

    device.begin_frame().unwrap();
    assert!(mesh.draw(&mut device).unwrap());
    let draw = device.draws().next().unwrap();
    assert_eq!(draw.call.topology, Topology::TriangleList);
    assert_eq!(draw.call.count, 12);
}

#[tokio::test]
async fn missing_files_end_failed() {
    let loader = Loader::current(asset_root()).unwrap();
    let mut device = device();
    let mesh = loader.load_mesh("does-not-exist.obj");
    assert_eq!(settle(&mesh, &mut device).await, LoadState::Failed);
}
