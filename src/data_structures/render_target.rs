//! Framebuffers with an ordered list of color attachments.
//!
//! The slot of a color attachment is its insertion index and never changes.
//! Every pass of the pipeline draws into one of these targets; copies between
//! them are plain blits.

use thiserror::Error;

use crate::gpu::{
    AttachmentSlot, BlitDesc, DrawTarget, FramebufferHandle, GpuDevice, GpuError, Region,
    TextureDesc, TextureFormat, TextureHandle,
};

/// The two color formats a target can hold.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ColorFormat {
    Normalized8,
    Float32,
}

impl ColorFormat {
    pub fn texture_format(&self) -> TextureFormat {
        match self {
            ColorFormat::Normalized8 => TextureFormat::Rgba8Unorm,
            ColorFormat::Float32 => TextureFormat::Rgba32Float,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub texture: TextureHandle,
    /// `None` for the depth attachment.
    pub format: Option<ColorFormat>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Error)]
pub enum TargetError {
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error("`{label}` needs {requested} color attachments, the device supports {max}")]
    TooManyColorAttachments {
        label: String,
        requested: u32,
        max: u32,
    },
    #[error("`{label}` has no color attachment {index}")]
    NoSuchAttachment { label: String, index: u32 },
    #[error("`{0}` has no depth attachment")]
    NoDepthAttachment(String),
}

#[derive(Debug)]
pub struct RenderTarget {
    label: String,
    width: u32,
    height: u32,
    framebuffer: FramebufferHandle,
    colors: Vec<Attachment>,
    depth: Option<Attachment>,
}

impl RenderTarget {
    pub fn new(
        device: &mut dyn GpuDevice,
        label: impl Into<String>,
        width: u32,
        height: u32,
    ) -> Result<Self, TargetError> {
        let (width, height) = (width.max(1), height.max(1));
        let framebuffer = device.create_framebuffer(width, height)?;
        Ok(Self {
            label: label.into(),
            width,
            height,
            framebuffer,
            colors: Vec::new(),
            depth: None,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn framebuffer(&self) -> FramebufferHandle {
        self.framebuffer
    }

    pub fn color_attachments(&self) -> &[Attachment] {
        &self.colors
    }

    pub fn color_attachment(&self, index: u32) -> Option<&Attachment> {
        self.colors.get(index as usize)
    }

    pub fn depth_attachment(&self) -> Option<&Attachment> {
        self.depth.as_ref()
    }

    /// Allocates an image and attaches it to the next free color slot.
    ///
    /// Returns the slot index. Going past the device's simultaneous color
    /// attachment limit fails here rather than at draw time.
    pub fn add_color_attachment(
        &mut self,
        device: &mut dyn GpuDevice,
        format: ColorFormat,
    ) -> Result<u32, TargetError> {
        let slot = self.colors.len() as u32;
        let max = device.limits().max_color_attachments;
        if slot >= max {
            return Err(TargetError::TooManyColorAttachments {
                label: self.label.clone(),
                requested: slot + 1,
                max,
            });
        }
        let texture = device.create_texture(&TextureDesc::new_2d(
            format!("{} color {slot}", self.label),
            self.width,
            self.height,
            format.texture_format(),
        ))?;
        device.attach(self.framebuffer, AttachmentSlot::Color(slot), Some(texture))?;
        self.colors.push(Attachment {
            texture,
            format: Some(format),
            width: self.width,
            height: self.height,
        });
        Ok(slot)
    }

    /// Allocates and attaches the depth image, replacing any previous one.
    pub fn add_depth_attachment(
        &mut self,
        device: &mut dyn GpuDevice,
    ) -> Result<TextureHandle, TargetError> {
        let texture = device.create_texture(&TextureDesc::new_2d(
            format!("{} depth", self.label),
            self.width,
            self.height,
            TextureFormat::Depth32Float,
        ))?;
        device.attach(self.framebuffer, AttachmentSlot::Depth, Some(texture))?;
        if let Some(old) = self.depth.replace(Attachment {
            texture,
            format: None,
            width: self.width,
            height: self.height,
        }) {
            device.destroy_texture(old.texture);
        }
        Ok(texture)
    }

    /// Makes this target the draw destination with every color slot as an output.
    pub fn bind(&self, device: &mut dyn GpuDevice) -> Result<(), GpuError> {
        device.bind_target(DrawTarget::Framebuffer {
            framebuffer: self.framebuffer,
            outputs: self.colors.len() as u32,
        })
    }

    /// Points subsequent draws back at the display.
    pub fn unbind(device: &mut dyn GpuDevice) -> Result<(), GpuError> {
        device.bind_target(DrawTarget::Display)
    }

    /// Blits `src`'s color attachment `index` into `dst`'s attachment 0.
    pub fn copy_color(
        device: &mut dyn GpuDevice,
        src: &RenderTarget,
        dst: &RenderTarget,
        index: u32,
    ) -> Result<(), TargetError> {
        if src.color_attachment(index).is_none() {
            return Err(TargetError::NoSuchAttachment {
                label: src.label.clone(),
                index,
            });
        }
        if dst.colors.is_empty() {
            return Err(TargetError::NoSuchAttachment {
                label: dst.label.clone(),
                index: 0,
            });
        }
        device.blit(&BlitDesc {
            src: src.framebuffer,
            src_slot: AttachmentSlot::Color(index),
            dst: dst.framebuffer,
            dst_slot: AttachmentSlot::Color(0),
            region: Region::full(src.width, src.height),
        })?;
        Ok(())
    }

    /// Blits the full depth image of `src` into `dst`.
    pub fn copy_depth(
        device: &mut dyn GpuDevice,
        src: &RenderTarget,
        dst: &RenderTarget,
    ) -> Result<(), TargetError> {
        for target in [src, dst] {
            if target.depth.is_none() {
                return Err(TargetError::NoDepthAttachment(target.label.clone()));
            }
        }
        device.blit(&BlitDesc {
            src: src.framebuffer,
            src_slot: AttachmentSlot::Depth,
            dst: dst.framebuffer,
            dst_slot: AttachmentSlot::Depth,
            region: Region::full(src.width, src.height),
        })?;
        Ok(())
    }

    pub fn destroy(self, device: &mut dyn GpuDevice) {
        for attachment in self.colors.iter().chain(self.depth.iter()) {
            device.destroy_texture(attachment.texture);
        }
        device.destroy_framebuffer(self.framebuffer);
    }
}
