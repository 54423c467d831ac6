//! GPU device acquisition.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("no suitable GPU adapter: {0}")]
    Adapter(String),
    #[error("failed to acquire a GPU device: {0}")]
    Device(String),
    #[error(transparent)]
    CreateSurface(#[from] wgpu::CreateSurfaceError),
    #[error("surface error: {0:?}")]
    Surface(wgpu::CurrentSurfaceTexture),
}

/// The device, queue and adapter everything else is built on.
///
/// Fatal at construction: there is no recovery from a missing adapter or a
/// failed device request.
pub struct GpuContext {
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    pub async fn new(
        instance: &wgpu::Instance,
        compatible_surface: Option<&wgpu::Surface<'_>>,
    ) -> Result<Self, RendererError> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| RendererError::Adapter(e.to_string()))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_webgl2_defaults()
                    .using_resolution(adapter.limits()),
                ..Default::default()
            })
            .await
            .map_err(|e| RendererError::Device(e.to_string()))?;

        Ok(Self {
            adapter,
            device,
            queue,
        })
    }

    /// The device's preferred format for a surface.
    pub fn preferred_format(&self, surface: &wgpu::Surface<'_>) -> wgpu::TextureFormat {
        let capabilities = surface.get_capabilities(&self.adapter);
        capabilities
            .formats
            .first()
            .copied()
            .unwrap_or(wgpu::TextureFormat::Bgra8Unorm)
    }
}
