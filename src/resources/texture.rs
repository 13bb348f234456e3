use std::path::Path;

use image::RgbaImage;

use crate::{data_structures::texture::decode_image, resources::load_binary};

/// Reads and decodes an image, guessing the format from the file extension.
pub async fn load_image(root: &Path, file_name: &str) -> anyhow::Result<RgbaImage> {
    let data = load_binary(root, file_name).await?;
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    tokio::task::spawn_blocking(move || decode_image(&data, extension.as_deref())).await?
}
