//! Per-surface adapter: surface configuration, depth texture lifetime and
//! one draw per frame.

use crate::renderer::{DrawParams, GpuRenderer, RenderTarget};

pub struct CanvasRenderer {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    target: RenderTarget,
}

impl CanvasRenderer {
    /// Configure a surface for the renderer's device.
    ///
    /// The surface uses the device's preferred format and premultiplied
    /// alpha so the page behind the canvas shows through transparent pixels.
    pub fn new(
        renderer: &GpuRenderer,
        surface: wgpu::Surface<'static>,
        width: u32,
        height: u32,
    ) -> Self {
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: renderer.surface_format(),
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: wgpu::CompositeAlphaMode::PreMultiplied,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(renderer.device(), &config);
        let target = renderer.create_target(config.width, config.height);

        Self {
            surface,
            config,
            target,
        }
    }

    pub fn width(&self) -> u32 {
        self.config.width
    }

    pub fn height(&self) -> u32 {
        self.config.height
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.config.width as f32 / self.config.height.max(1) as f32
    }

    /// Resize the surface, recreating the depth texture and per-surface
    /// uniforms.
    pub fn resize(&mut self, renderer: &GpuRenderer, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(renderer.device(), &self.config);
        self.target = renderer.create_target(width, height);
    }

    /// Draw one frame of the named geometry and present it.
    pub fn render(
        &mut self,
        renderer: &GpuRenderer,
        name: &str,
        params: &DrawParams,
    ) -> Result<(), crate::context::RendererError> {
        let surface_texture = match self.surface.get_current_texture() {
            wgpu::CurrentSurfaceTexture::Success(texture)
            | wgpu::CurrentSurfaceTexture::Suboptimal(texture) => texture,
            wgpu::CurrentSurfaceTexture::Lost | wgpu::CurrentSurfaceTexture::Outdated => {
                // The swapchain went stale (resize, device reset). Configure
                // again and retry once.
                self.surface.configure(renderer.device(), &self.config);
                match self.surface.get_current_texture() {
                    wgpu::CurrentSurfaceTexture::Success(texture)
                    | wgpu::CurrentSurfaceTexture::Suboptimal(texture) => texture,
                    other => return Err(crate::context::RendererError::Surface(other)),
                }
            }
            other => return Err(crate::context::RendererError::Surface(other)),
        };

        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        renderer.draw(&self.target, &view, name, params);
        surface_texture.present();

        Ok(())
    }
}
