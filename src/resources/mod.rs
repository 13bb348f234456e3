//! Asset fetch.
//!
//! Files are read relative to an asset root (see [`crate::context::Config::asset_root`]).
//! [`Loader`] starts loads on a tokio runtime and hands back resources that
//! stay `Pending` until the data arrives; nothing here ever blocks a frame.

use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::data_structures::{
    mesh::{Mesh, MeshData},
    texture::Texture,
};

pub mod mesh;
pub mod texture;

pub async fn load_string(root: &Path, file_name: &str) -> anyhow::Result<String> {
    let path = root.join(file_name);
    tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

pub async fn load_binary(root: &Path, file_name: &str) -> anyhow::Result<Vec<u8>> {
    let path = root.join(file_name);
    tokio::fs::read(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

/// Starts asset loads in the background.
///
/// Each `load_*` call returns immediately. The resource becomes `Ready` at
/// the first draw or bind after its data arrived, or `Failed` if the load
/// errored. Dropping the resource before that discards the data.
#[derive(Clone, Debug)]
pub struct Loader {
    root: PathBuf,
    runtime: tokio::runtime::Handle,
}

impl Loader {
    pub fn new(root: impl Into<PathBuf>, runtime: tokio::runtime::Handle) -> Self {
        Self {
            root: root.into(),
            runtime,
        }
    }

    /// Uses the runtime the caller is running on.
    pub fn current(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("Loader::current needs to run inside a tokio runtime")?;
        Ok(Self::new(root, runtime))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Loads and parses an OBJ file.
    pub fn load_mesh(&self, file_name: &str) -> Mesh {
        let (mesh, completion) = Mesh::pending(file_name);
        let root = self.root.clone();
        let file_name = file_name.to_string();
        self.runtime.spawn(async move {
            let result = async {
                let text = load_string(&root, &file_name).await?;
                MeshData::from_obj_str(&text).with_context(|| format!("parsing {file_name}"))
            }
            .await;
            completion.complete(result);
        });
        mesh
    }

    /// Loads and decodes an image file into RGBA8.
    pub fn load_texture(&self, file_name: &str) -> Texture {
        let (texture, completion) = Texture::pending(file_name);
        let root = self.root.clone();
        let file_name = file_name.to_string();
        self.runtime.spawn(async move {
            let result = texture::load_image(&root, &file_name).await;
            completion.complete(result);
        });
        texture
    }
}
