//! Sampled 2D textures.
//!
//! A [`Texture`] wraps a device texture that may still be waiting for its
//! image. Images are converted to RGBA8 before upload, whatever their source
//! format was.

use std::cell::RefCell;

use anyhow::Result;
use image::{ImageFormat, RgbaImage, load_from_memory_with_format};

use crate::{
    data_structures::pending::{Completion, Deferred, LoadState},
    gpu::{GpuDevice, GpuError, TextureDesc, TextureFormat, TextureHandle},
};

/// Decodes raw image file contents (PNG, JPEG, ...) into RGBA8.
///
/// `format` is an optional extension hint; without it the format is guessed.
pub fn decode_image(bytes: &[u8], format: Option<&str>) -> Result<RgbaImage> {
    let img = match format.and_then(ImageFormat::from_extension) {
        Some(fmt) => load_from_memory_with_format(bytes, fmt)?,
        None => image::load_from_memory(bytes)?,
    };
    Ok(img.to_rgba8())
}

fn upload(device: &mut dyn GpuDevice, label: &str, rgba: RgbaImage) -> Result<TextureHandle, GpuError> {
    let (width, height) = rgba.dimensions();
    let handle = device.create_texture(&TextureDesc::new_2d(
        label,
        width,
        height,
        TextureFormat::Rgba8Unorm,
    ))?;
    device.write_texture(handle, 0, rgba.as_raw())?;
    Ok(handle)
}

pub struct Texture {
    label: String,
    inner: RefCell<Deferred<RgbaImage, TextureHandle>>,
}

impl Texture {
    pub fn from_image(
        device: &mut dyn GpuDevice,
        label: impl Into<String>,
        rgba: RgbaImage,
    ) -> Result<Self, GpuError> {
        let label = label.into();
        let handle = upload(device, &label, rgba)?;
        Ok(Self {
            label,
            inner: RefCell::new(Deferred::Ready(handle)),
        })
    }

    pub fn from_bytes(
        device: &mut dyn GpuDevice,
        label: impl Into<String>,
        bytes: &[u8],
        format: Option<&str>,
    ) -> Result<Self> {
        let rgba = decode_image(bytes, format)?;
        Ok(Self::from_image(device, label, rgba)?)
    }

    /// A 1x1 texture of a single color.
    pub fn solid(
        device: &mut dyn GpuDevice,
        label: impl Into<String>,
        color: [u8; 4],
    ) -> Result<Self, GpuError> {
        Self::from_image(device, label, RgbaImage::from_pixel(1, 1, image::Rgba(color)))
    }

    pub fn pending(label: impl Into<String>) -> (Self, Completion<RgbaImage>) {
        let (inner, completion) = Deferred::pending();
        let texture = Self {
            label: label.into(),
            inner: RefCell::new(inner),
        };
        (texture, completion)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> LoadState {
        self.inner.borrow().state()
    }

    pub fn poll(&self, device: &mut dyn GpuDevice) -> Result<LoadState, GpuError> {
        let label = &self.label;
        self.inner
            .borrow_mut()
            .resolve(label, |rgba| upload(device, label, rgba))
    }

    pub fn handle(&self) -> Option<TextureHandle> {
        self.inner.borrow().ready().copied()
    }

    /// Binds the texture to `slot`. Until it is ready the slot is cleared,
    /// which programs read as white.
    pub fn bind(&self, device: &mut dyn GpuDevice, slot: u32) -> Result<LoadState, GpuError> {
        let state = self.poll(device)?;
        device.bind_texture(slot, self.handle())?;
        Ok(state)
    }

    pub fn destroy(self, device: &mut dyn GpuDevice) {
        if let Deferred::Ready(handle) = self.inner.into_inner() {
            device.destroy_texture(handle);
        }
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("label", &self.label)
            .field("state", &self.state())
            .finish()
    }
}
