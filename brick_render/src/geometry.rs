//! Flattening a [`Part`] tree into renderable vertex streams.

use glam::{vec3, vec4, Mat4, Vec3};
use log::error;

use crate::color::{resolve_color, ColorTable};
use crate::ldraw::DrawCommand;
use crate::part::Part;
use crate::{ColorCode, CURRENT_COLOR};

/// Flat vertex streams produced by [`flatten`].
///
/// Lines and triangles store a position and a color code per vertex. Optional
/// lines additionally carry the opposite endpoint and both control points per
/// vertex so the visibility test can run on the GPU.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct VertexBuffers {
    /// `[x, y, z, color]`, two vertices per line.
    pub lines: Vec<f32>,
    /// `[x, y, z, ox, oy, oz, c1x, c1y, c1z, c2x, c2y, c2z, color]`,
    /// two vertices per line.
    pub optional_lines: Vec<f32>,
    /// `[x, y, z, color]`, three vertices per triangle.
    pub opaque_triangles: Vec<f32>,
    /// `[x, y, z, color]`, three vertices per triangle.
    pub transparent_triangles: Vec<f32>,
}

impl VertexBuffers {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
            && self.optional_lines.is_empty()
            && self.opaque_triangles.is_empty()
            && self.transparent_triangles.is_empty()
    }
}

/// One placement of a stud.
#[derive(Debug, Clone, PartialEq)]
pub struct StudInstance {
    /// Accumulated transform of the reference, in output coordinates.
    pub transform: Mat4,
    /// Resolved color the stud was referenced with.
    pub color: ColorCode,
}

/// A stud primitive flattened once, plus every placement of it.
#[derive(Debug, Clone, PartialEq)]
pub struct StudGeometry {
    /// Normalized name of the stud file.
    pub name: String,
    /// The stud's own geometry in its local space, shared by all instances.
    pub buffers: VertexBuffers,
    pub instances: Vec<StudInstance>,
}

/// Output of [`flatten`].
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub main: VertexBuffers,
    /// Stud primitives extracted for instanced drawing, in first-use order.
    pub studs: Vec<StudGeometry>,
    /// Largest coordinate magnitude over all emitted vertices.
    pub view_box: f32,
    /// Centroid of the bounding box.
    pub center: Vec3,
}

#[derive(Debug, Clone)]
pub struct FlattenSettings {
    /// Extract stud primitives into instanced sub-geometry instead of
    /// inlining their vertices at every placement.
    pub stud_instancing: bool,
}

impl Default for FlattenSettings {
    fn default() -> Self {
        Self {
            stud_instancing: true,
        }
    }
}

/// Settings that inherit or accumulate when recursing into subfiles.
#[derive(Clone, Copy)]
struct GeometryContext {
    transform: Mat4,
    current_color: ColorCode,
    inverted: bool,
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    min: Vec3,
    max: Vec3,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }
}

impl Bounds {
    fn update(&mut self, v: Vec3) {
        self.min = self.min.min(v);
        self.max = self.max.max(v);
    }

    fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }
}

struct StudAccum {
    name: String,
    buffers: VertexBuffers,
    bounds: Bounds,
    instances: Vec<StudInstance>,
}

/// Flatten a part tree into vertex streams.
///
/// The traversal carries an accumulated transform, the inherited color and
/// the winding inversion flag. Every emitted vertex is remapped from LDraw
/// coordinates (y points into the screen) to output coordinates (z points
/// into the screen) by swapping y and z.
#[tracing::instrument(skip_all)]
pub fn flatten(part: &Part, colors: &ColorTable, settings: &FlattenSettings) -> Geometry {
    let mut main = VertexBuffers::default();
    let mut bounds = Bounds::default();
    let mut studs: Vec<StudAccum> = Vec::new();

    let ctx = GeometryContext {
        transform: Mat4::IDENTITY,
        current_color: CURRENT_COLOR,
        inverted: false,
    };

    append_geometry(
        &mut main,
        &mut bounds,
        Some(&mut studs),
        part,
        colors,
        settings,
        ctx,
    );

    // Instances contribute the corners of the stud's local box.
    for stud in &studs {
        if stud.bounds.is_empty() {
            continue;
        }
        for instance in &stud.instances {
            for corner in box_corners(&stud.bounds) {
                bounds.update(instance.transform.transform_point3(corner));
            }
        }
    }

    let (view_box, center) = if bounds.is_empty() {
        (0.0, Vec3::ZERO)
    } else {
        let magnitude = bounds.min.abs().max(bounds.max.abs());
        (
            magnitude.max_element(),
            (bounds.min + bounds.max) / 2.0,
        )
    };

    Geometry {
        main,
        studs: studs
            .into_iter()
            .map(|s| StudGeometry {
                name: s.name,
                buffers: s.buffers,
                instances: s.instances,
            })
            .collect(),
        view_box,
        center,
    }
}

fn append_geometry(
    buffers: &mut VertexBuffers,
    bounds: &mut Bounds,
    mut studs: Option<&mut Vec<StudAccum>>,
    part: &Part,
    colors: &ColorTable,
    settings: &FlattenSettings,
    ctx: GeometryContext,
) {
    for cmd in &part.file.commands {
        match cmd {
            DrawCommand::SubFile(sub) => {
                let Some(child) = part.sub_parts.get(&sub.file) else {
                    // The assembler guarantees this key. A miss means the
                    // part was constructed by hand.
                    error!("Unresolved sub-part {} in {}", sub.file, part.file.name);
                    continue;
                };

                let current_color = resolve_color(sub.color, ctx.current_color);

                if settings.stud_instancing && studs.is_some() && is_stud(&sub.file) {
                    let studs = studs.as_mut().unwrap();
                    if !studs.iter().any(|s| s.name == sub.file) {
                        let mut accum = StudAccum {
                            name: sub.file.clone(),
                            buffers: VertexBuffers::default(),
                            bounds: Bounds::default(),
                            instances: Vec::new(),
                        };
                        // The stud is flattened once in its own space.
                        // Its color code 16 vertices pick up the instance
                        // color at draw time.
                        append_geometry(
                            &mut accum.buffers,
                            &mut accum.bounds,
                            None,
                            child,
                            colors,
                            settings,
                            GeometryContext {
                                transform: Mat4::IDENTITY,
                                current_color: CURRENT_COLOR,
                                inverted: false,
                            },
                        );
                        studs.push(accum);
                    }
                    let accum = studs.iter_mut().find(|s| s.name == sub.file).unwrap();
                    accum.instances.push(StudInstance {
                        transform: remap_matrix(ctx.transform * sub.transform),
                        color: current_color,
                    });
                    continue;
                }

                append_geometry(
                    buffers,
                    bounds,
                    studs.as_mut().map(|s| &mut **s),
                    child,
                    colors,
                    settings,
                    GeometryContext {
                        transform: ctx.transform * sub.transform,
                        current_color,
                        inverted: ctx.inverted ^ sub.invert,
                    },
                );
            }
            DrawCommand::Line(line) => {
                let color = resolve_color(line.color, ctx.current_color);
                for v in line.vertices {
                    let p = emit_point(&ctx, v, bounds);
                    push_vertex(&mut buffers.lines, p, color);
                }
            }
            DrawCommand::OptLine(line) => {
                let color = resolve_color(line.color, ctx.current_color);
                let [v1, v2] = line.vertices.map(|v| emit_point(&ctx, v, bounds));
                // Control points steer visibility only. They don't grow the
                // bounding box.
                let [c1, c2] = line
                    .control_points
                    .map(|v| remap(ctx.transform.transform_point3(v)));
                for (p, other) in [(v1, v2), (v2, v1)] {
                    buffers.optional_lines.extend([
                        p.x, p.y, p.z, other.x, other.y, other.z, c1.x, c1.y, c1.z, c2.x, c2.y,
                        c2.z, color as f32,
                    ]);
                }
            }
            DrawCommand::Triangle(tri) => {
                let color = resolve_color(tri.color, ctx.current_color);
                let stream = if colors.is_opaque(color) {
                    &mut buffers.opaque_triangles
                } else {
                    &mut buffers.transparent_triangles
                };
                let mut vertices = tri.vertices;
                if ctx.inverted {
                    vertices.reverse();
                }
                for v in vertices {
                    let p = emit_point(&ctx, v, bounds);
                    push_vertex(stream, p, color);
                }
            }
        }
    }
}

fn emit_point(ctx: &GeometryContext, v: Vec3, bounds: &mut Bounds) -> Vec3 {
    let p = remap(ctx.transform.transform_point3(v));
    bounds.update(p);
    p
}

fn push_vertex(buffer: &mut Vec<f32>, p: Vec3, color: ColorCode) {
    buffer.extend([p.x, p.y, p.z, color as f32]);
}

// LDraw's y axis points into the screen. The renderer expects z to point
// into the screen instead, so emitted positions swap the two.
fn remap(v: Vec3) -> Vec3 {
    vec3(v.x, v.z, v.y)
}

// The y/z swap conjugates transforms that are applied to already remapped
// vertices, such as the per-instance stud transforms.
fn remap_matrix(m: Mat4) -> Mat4 {
    let swap = Mat4::from_cols(
        vec4(1.0, 0.0, 0.0, 0.0),
        vec4(0.0, 0.0, 1.0, 0.0),
        vec4(0.0, 1.0, 0.0, 0.0),
        vec4(0.0, 0.0, 0.0, 1.0),
    );
    swap * m * swap
}

fn box_corners(bounds: &Bounds) -> [Vec3; 8] {
    let (lo, hi) = (bounds.min, bounds.max);
    [
        vec3(lo.x, lo.y, lo.z),
        vec3(hi.x, lo.y, lo.z),
        vec3(lo.x, hi.y, lo.z),
        vec3(hi.x, hi.y, lo.z),
        vec3(lo.x, lo.y, hi.z),
        vec3(hi.x, lo.y, hi.z),
        vec3(lo.x, hi.y, hi.z),
        vec3(hi.x, hi.y, hi.z),
    ]
}

fn is_stud(name: &str) -> bool {
    name.starts_with("stud") && name.ends_with(".dat")
}
