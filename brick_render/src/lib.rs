//! Loading, assembling and flattening LDraw brick models.
//!
//! The pipeline runs fetch → [`loader::FileLoader`] → [`part::assemble`] →
//! [`geometry::flatten`], producing flat vertex streams a renderer can
//! upload directly. [`depth_sort`] orders the same streams back to front for
//! 2D vector output.

pub use color::{resolve_color, ColorTable, LDrawColor, EDGE_CODE_BASE};
pub use depth_sort::{depth_sort, Primitive};
pub use geometry::{flatten, FlattenSettings, Geometry, StudGeometry, StudInstance, VertexBuffers};
pub use glam;
pub use ldraw::error::Error;
pub use ldraw::LdrawFile;
pub use loader::{candidate_paths, ContentsCache, FetchContents, FileLoader, LoadResult};
pub use part::{assemble, Part};

pub type ColorCode = u32;

// Special color code that "inherits" the existing color.
pub const CURRENT_COLOR: ColorCode = 16;
// Special color code selecting the edge color of the inherited color.
pub const EDGE_COLOR: ColorCode = 24;

pub mod color;
pub mod depth_sort;
pub mod geometry;
pub mod ldraw;
pub mod loader;
pub mod part;
