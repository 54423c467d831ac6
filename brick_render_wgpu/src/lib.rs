//! Interactive wgpu renderer for flattened brick geometry.
//!
//! [`worker::Loader`] produces [`brick_render::Geometry`] on a background
//! thread, [`renderer::GpuRenderer`] uploads and draws it, and
//! [`canvas::CanvasRenderer`] ties one surface to the renderer. User input
//! flows through [`scene::SceneController`].

pub use canvas::CanvasRenderer;
pub use context::{GpuContext, RendererError};
pub use renderer::{parse_hex_color, DrawParams, GpuRenderer, RenderTarget, DEPTH_FORMAT};
pub use scene::{projection, SceneController, Transformation};
pub use worker::{LoadError, LoadedPart, Loader};

pub use brick_render;
pub use wgpu;

pub mod canvas;
pub mod context;
pub mod renderer;
pub mod scene;
pub mod worker;
