//! Engine configuration and wgpu device creation.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context as _, anyhow};
use winit::window::Window;

use crate::gpu::wgpu_device::{Display, WgpuDevice};

/// Settings shared by the driver, the pipeline and the asset loader.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Fixed rate of `on_update` calls.
    pub updates_per_second: u32,
    pub clear_color: [f32; 4],
    /// G-buffer color attachment copied into the ping-pong buffers at chain start.
    pub post_source_attachment: u32,
    pub asset_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            title: "deferred-ngin".to_string(),
            width: 1280,
            height: 720,
            updates_per_second: 60,
            clear_color: [0.9, 0.9, 0.9, 1.0],
            post_source_attachment: 1,
            asset_root: PathBuf::from("./assets"),
        }
    }
}

impl Config {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_updates_per_second(mut self, updates_per_second: u32) -> Self {
        self.updates_per_second = updates_per_second;
        self
    }

    pub fn with_clear_color(mut self, clear_color: [f32; 4]) -> Self {
        self.clear_color = clear_color;
        self
    }

    pub fn with_post_source_attachment(mut self, index: u32) -> Self {
        self.post_source_attachment = index;
        self
    }

    pub fn with_asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = root.into();
        self
    }
}

fn instance() -> wgpu::Instance {
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..wgpu::InstanceDescriptor::new_without_display_handle()
    })
}

async fn request_device(adapter: &wgpu::Adapter) -> anyhow::Result<(wgpu::Device, wgpu::Queue)> {
    let info = adapter.get_info();
    log::info!("using adapter {} ({:?})", info.name, info.backend);
    let supported = adapter.limits();
    // the G-buffer needs more bytes per sample than the default 32
    let required_limits = wgpu::Limits {
        max_color_attachments: supported.max_color_attachments,
        max_color_attachment_bytes_per_sample: supported.max_color_attachment_bytes_per_sample,
        ..wgpu::Limits::default()
    };
    adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("deferred-ngin device"),
            required_features: wgpu::Features::empty(),
            required_limits,
            memory_hints: Default::default(),
            trace: wgpu::Trace::Off,
            ..Default::default()
        })
        .await
        .context("requesting a wgpu device")
}

/// Creates a device that presents to `window`.
pub async fn create_device(window: Arc<Window>) -> anyhow::Result<WgpuDevice> {
    let size = window.inner_size();
    let instance = instance();
    let surface = instance
        .create_surface(window)
        .context("creating the window surface")?;
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        })
        .await
        .context("no adapter can present to this window")?;
    let (device, queue) = request_device(&adapter).await?;

    let caps = surface.get_capabilities(&adapter);
    let format = caps
        .formats
        .iter()
        .copied()
        .find(|f| f.is_srgb())
        .or_else(|| caps.formats.first().copied())
        .ok_or_else(|| anyhow!("surface reports no formats"))?;
    let config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width: size.width.max(1),
        height: size.height.max(1),
        present_mode: caps
            .present_modes
            .first()
            .copied()
            .unwrap_or(wgpu::PresentMode::Fifo),
        alpha_mode: caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto),
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    };
    surface.configure(&device, &config);
    log::info!("surface configured as {:?} {}x{}", format, config.width, config.height);
    Ok(WgpuDevice::new(
        device,
        queue,
        Display::Surface { surface, config },
    ))
}

/// Creates a device whose display is an offscreen RGBA8 texture.
pub async fn create_headless_device(width: u32, height: u32) -> anyhow::Result<WgpuDevice> {
    let instance = instance();
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions::default())
        .await
        .context("no headless adapter available")?;
    let (device, queue) = request_device(&adapter).await?;
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("offscreen display"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    Ok(WgpuDevice::new(device, queue, Display::Offscreen { texture }))
}
