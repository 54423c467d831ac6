//! GPU pipelines and the per-frame draw sequence.

use std::collections::HashMap;

use brick_render::glam::{Mat4, Vec3};
use brick_render::{ColorTable, Geometry, VertexBuffers};
use wgpu::util::DeviceExt;

/// Reverse-Z: nearer geometry has larger depth, the buffer clears to 0 and
/// the comparison is Greater.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const DEPTH_CLEAR: f32 = 0.0;

const MESH_VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32];
const OPT_LINE_VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
    0 => Float32x3, 1 => Float32x3, 2 => Float32x3, 3 => Float32x3, 4 => Float32
];
const MESH_INSTANCE_ATTRIBUTES: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
    2 => Float32x4, 3 => Float32x4, 4 => Float32x4, 5 => Float32x4, 6 => Float32
];
const OPT_LINE_INSTANCE_ATTRIBUTES: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
    5 => Float32x4, 6 => Float32x4, 7 => Float32x4, 8 => Float32x4, 9 => Float32
];

/// Floats per vertex in the line and triangle streams.
const MESH_VERTEX_FLOATS: usize = 4;
/// Floats per vertex in the optional line stream.
const OPT_LINE_VERTEX_FLOATS: usize = 13;

/// Per-instance stud placement, matching the instance attributes in the
/// shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct StudInstanceData {
    model: [[f32; 4]; 4],
    color_code: f32,
}

/// Per-frame inputs for one draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawParams {
    /// Projection and model transform combined.
    pub transform: Mat4,
    /// Straight-alpha color substituted for color code 16.
    pub default_color: [f32; 4],
}

/// Parse a `#RRGGBB` color into a straight-alpha RGBA quadruple.
pub fn parse_hex_color(hex: &str) -> Option<[f32; 4]> {
    let hex = hex.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16)
            .ok()
            .map(|v| v as f32 / 255.0)
    };
    Some([channel(0)?, channel(2)?, channel(4)?, 1.0])
}

struct VertexSlot {
    buffer: wgpu::Buffer,
    vertices: u32,
}

struct GpuStud {
    lines: Option<VertexSlot>,
    optional_lines: Option<VertexSlot>,
    opaque: Option<VertexSlot>,
    transparent: Option<VertexSlot>,
    instances: wgpu::Buffer,
    instance_count: u32,
}

/// Uploaded geometry for one part name.
pub struct GpuGeometry {
    lines: Option<VertexSlot>,
    optional_lines: Option<VertexSlot>,
    opaque: Option<VertexSlot>,
    transparent: Option<VertexSlot>,
    studs: Vec<GpuStud>,
    pub view_box: f32,
    pub center: Vec3,
}

/// Per-surface resources. Recreated whenever the surface is resized.
pub struct RenderTarget {
    depth_view: wgpu::TextureView,
    transform_buffer: wgpu::Buffer,
    color_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

struct Pipelines {
    opaque: wgpu::RenderPipeline,
    opaque_stud: wgpu::RenderPipeline,
    transparent: wgpu::RenderPipeline,
    transparent_stud: wgpu::RenderPipeline,
    line: wgpu::RenderPipeline,
    line_stud: wgpu::RenderPipeline,
    optional_line: wgpu::RenderPipeline,
    optional_line_stud: wgpu::RenderPipeline,
}

/// Owns the pipelines, the color lookup texture and the uploaded geometry.
///
/// The device and queue are acquired externally (see
/// [`crate::context::GpuContext`]) and shared with the renderer for its
/// lifetime.
pub struct GpuRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_format: wgpu::TextureFormat,
    bind_group_layout: wgpu::BindGroupLayout,
    color_lookup: wgpu::Texture,
    color_lookup_view: wgpu::TextureView,
    pipelines: Pipelines,
    geometry_cache: HashMap<String, GpuGeometry>,
}

impl GpuRenderer {
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        surface_format: wgpu::TextureFormat,
    ) -> Self {
        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("brick bind group layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::VERTEX,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::VERTEX,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: false },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                ],
            });

        let color_lookup = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("color lookup"),
            size: wgpu::Extent3d {
                width: 256,
                height: 256,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let color_lookup_view = color_lookup.create_view(&wgpu::TextureViewDescriptor::default());

        let pipelines = Pipelines::new(&device, &bind_group_layout, surface_format);

        Self {
            device,
            queue,
            surface_format,
            bind_group_layout,
            color_lookup,
            color_lookup_view,
            pipelines,
            geometry_cache: HashMap::new(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.surface_format
    }

    /// Upload the palette into the color lookup texture.
    pub fn upload_colors(&self, table: &ColorTable) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.color_lookup,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &table.lookup_texels(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(256 * 4),
                rows_per_image: Some(256),
            },
            wgpu::Extent3d {
                width: 256,
                height: 256,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Upload flattened geometry under a part name.
    ///
    /// Re-submitting a name that was uploaded before reuses the existing
    /// buffers. Returns `false` in that case.
    pub fn upload_geometry(&mut self, name: &str, geometry: &Geometry) -> bool {
        if self.geometry_cache.contains_key(name) {
            return false;
        }

        let studs = geometry
            .studs
            .iter()
            .map(|stud| {
                let instance_data: Vec<StudInstanceData> = stud
                    .instances
                    .iter()
                    .map(|instance| StudInstanceData {
                        model: instance.transform.to_cols_array_2d(),
                        color_code: instance.color as f32,
                    })
                    .collect();
                let instances =
                    self.device
                        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                            label: Some(&format!("{name}/{} instances", stud.name)),
                            contents: bytemuck::cast_slice(&instance_data),
                            usage: wgpu::BufferUsages::VERTEX,
                        });
                let slots = self.vertex_slots(&stud.name, &stud.buffers);
                GpuStud {
                    lines: slots.lines,
                    optional_lines: slots.optional_lines,
                    opaque: slots.opaque,
                    transparent: slots.transparent,
                    instances,
                    instance_count: stud.instances.len() as u32,
                }
            })
            .collect();

        let slots = self.vertex_slots(name, &geometry.main);
        self.geometry_cache.insert(
            name.to_string(),
            GpuGeometry {
                lines: slots.lines,
                optional_lines: slots.optional_lines,
                opaque: slots.opaque,
                transparent: slots.transparent,
                studs,
                view_box: geometry.view_box,
                center: geometry.center,
            },
        );
        true
    }

    pub fn geometry(&self, name: &str) -> Option<&GpuGeometry> {
        self.geometry_cache.get(name)
    }

    fn vertex_slots(&self, label: &str, buffers: &VertexBuffers) -> Slots {
        let slot = |suffix: &str, data: &[f32], floats_per_vertex: usize| {
            if data.is_empty() {
                return None;
            }
            let buffer = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("{label}/{suffix}")),
                    contents: bytemuck::cast_slice(data),
                    usage: wgpu::BufferUsages::VERTEX,
                });
            Some(VertexSlot {
                buffer,
                vertices: (data.len() / floats_per_vertex) as u32,
            })
        };

        Slots {
            lines: slot("lines", &buffers.lines, MESH_VERTEX_FLOATS),
            optional_lines: slot(
                "optional lines",
                &buffers.optional_lines,
                OPT_LINE_VERTEX_FLOATS,
            ),
            opaque: slot("opaque", &buffers.opaque_triangles, MESH_VERTEX_FLOATS),
            transparent: slot(
                "transparent",
                &buffers.transparent_triangles,
                MESH_VERTEX_FLOATS,
            ),
        }
    }

    /// Create the per-surface resources for a render target.
    pub fn create_target(&self, width: u32, height: u32) -> RenderTarget {
        let depth_texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        let transform_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("transform uniform"),
            size: std::mem::size_of::<[f32; 16]>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let color_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("default color uniform"),
            size: std::mem::size_of::<[f32; 4]>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("brick bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: transform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: color_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&self.color_lookup_view),
                },
            ],
        });

        RenderTarget {
            depth_view: depth_texture.create_view(&wgpu::TextureViewDescriptor::default()),
            transform_buffer,
            color_buffer,
            bind_group,
        }
    }

    /// Record and submit one frame.
    ///
    /// The geometry for `name` must have been uploaded; a missing entry is a
    /// programmer error.
    pub fn draw(
        &self,
        target: &RenderTarget,
        view: &wgpu::TextureView,
        name: &str,
        params: &DrawParams,
    ) {
        let geometry = self
            .geometry_cache
            .get(name)
            .unwrap_or_else(|| panic!("geometry for {name:?} was never uploaded"));

        self.queue.write_buffer(
            &target.transform_buffer,
            0,
            bytemuck::cast_slice(&params.transform.to_cols_array()),
        );
        self.queue.write_buffer(
            &target.color_buffer,
            0,
            bytemuck::cast_slice(&params.default_color),
        );

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("brick frame"),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("brick pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &target.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(DEPTH_CLEAR),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            pass.set_bind_group(0, &target.bind_group, &[]);

            let pipelines = &self.pipelines;

            // Opaque triangles populate the depth buffer first; lines render
            // at the same depth and win thanks to the triangles' depth bias;
            // transparent triangles draw last with depth writes off so they
            // don't hide each other.
            draw_slot(&mut pass, &pipelines.opaque, &geometry.opaque);
            for stud in &geometry.studs {
                draw_stud_slot(&mut pass, &pipelines.opaque_stud, &stud.opaque, stud);
            }

            draw_slot(&mut pass, &pipelines.line, &geometry.lines);
            for stud in &geometry.studs {
                draw_stud_slot(&mut pass, &pipelines.line_stud, &stud.lines, stud);
            }

            draw_slot(&mut pass, &pipelines.optional_line, &geometry.optional_lines);
            for stud in &geometry.studs {
                draw_stud_slot(
                    &mut pass,
                    &pipelines.optional_line_stud,
                    &stud.optional_lines,
                    stud,
                );
            }

            draw_slot(&mut pass, &pipelines.transparent, &geometry.transparent);
            for stud in &geometry.studs {
                draw_stud_slot(
                    &mut pass,
                    &pipelines.transparent_stud,
                    &stud.transparent,
                    stud,
                );
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

struct Slots {
    lines: Option<VertexSlot>,
    optional_lines: Option<VertexSlot>,
    opaque: Option<VertexSlot>,
    transparent: Option<VertexSlot>,
}

fn draw_slot<'a>(
    pass: &mut wgpu::RenderPass<'a>,
    pipeline: &'a wgpu::RenderPipeline,
    slot: &'a Option<VertexSlot>,
) {
    let Some(slot) = slot else {
        return;
    };
    pass.set_pipeline(pipeline);
    pass.set_vertex_buffer(0, slot.buffer.slice(..));
    pass.draw(0..slot.vertices, 0..1);
}

fn draw_stud_slot<'a>(
    pass: &mut wgpu::RenderPass<'a>,
    pipeline: &'a wgpu::RenderPipeline,
    slot: &'a Option<VertexSlot>,
    stud: &'a GpuStud,
) {
    let Some(slot) = slot else {
        return;
    };
    if stud.instance_count == 0 {
        return;
    }
    pass.set_pipeline(pipeline);
    pass.set_vertex_buffer(0, slot.buffer.slice(..));
    pass.set_vertex_buffer(1, stud.instances.slice(..));
    pass.draw(0..slot.vertices, 0..stud.instance_count);
}

impl Pipelines {
    fn new(
        device: &wgpu::Device,
        bind_group_layout: &wgpu::BindGroupLayout,
        surface_format: wgpu::TextureFormat,
    ) -> Self {
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("brick pipeline layout"),
            bind_group_layouts: &[Some(bind_group_layout)],
            immediate_size: 0,
        });

        let mesh_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("mesh shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/mesh.wgsl").into()),
        });
        let optional_line_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("optional line shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/optional_line.wgsl").into()),
        });

        let mesh_vertex = wgpu::VertexBufferLayout {
            array_stride: (MESH_VERTEX_FLOATS * 4) as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &MESH_VERTEX_ATTRIBUTES,
        };
        let opt_line_vertex = wgpu::VertexBufferLayout {
            array_stride: (OPT_LINE_VERTEX_FLOATS * 4) as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &OPT_LINE_VERTEX_ATTRIBUTES,
        };
        let instance_stride = std::mem::size_of::<StudInstanceData>() as u64;
        let mesh_instance = wgpu::VertexBufferLayout {
            array_stride: instance_stride,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &MESH_INSTANCE_ATTRIBUTES,
        };
        let opt_line_instance = wgpu::VertexBufferLayout {
            array_stride: instance_stride,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &OPT_LINE_INSTANCE_ATTRIBUTES,
        };

        // Pushes faces slightly back so coplanar edge lines stay visible.
        let triangle_bias = wgpu::DepthBiasState {
            constant: -1,
            slope_scale: -1.0,
            clamp: 0.0,
        };

        let spec = PipelineSpec {
            device,
            layout: &layout,
            surface_format,
        };

        let triangles = Primitive {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull: Some(wgpu::Face::Back),
            blend: wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING,
            bias: triangle_bias,
        };
        let lines = Primitive {
            topology: wgpu::PrimitiveTopology::LineList,
            cull: None,
            blend: wgpu::BlendState::REPLACE,
            bias: wgpu::DepthBiasState::default(),
        };

        Self {
            opaque: spec.pipeline(
                "opaque",
                &mesh_shader,
                "vs_main",
                &[mesh_vertex.clone()],
                &triangles,
                true,
            ),
            opaque_stud: spec.pipeline(
                "opaque stud",
                &mesh_shader,
                "vs_stud",
                &[mesh_vertex.clone(), mesh_instance.clone()],
                &triangles,
                true,
            ),
            transparent: spec.pipeline(
                "transparent",
                &mesh_shader,
                "vs_main",
                &[mesh_vertex.clone()],
                &triangles,
                false,
            ),
            transparent_stud: spec.pipeline(
                "transparent stud",
                &mesh_shader,
                "vs_stud",
                &[mesh_vertex.clone(), mesh_instance.clone()],
                &triangles,
                false,
            ),
            line: spec.pipeline(
                "line",
                &mesh_shader,
                "vs_main",
                &[mesh_vertex.clone()],
                &lines,
                true,
            ),
            line_stud: spec.pipeline(
                "line stud",
                &mesh_shader,
                "vs_stud",
                &[mesh_vertex, mesh_instance],
                &lines,
                true,
            ),
            optional_line: spec.pipeline(
                "optional line",
                &optional_line_shader,
                "vs_main",
                &[opt_line_vertex.clone()],
                &lines,
                true,
            ),
            optional_line_stud: spec.pipeline(
                "optional line stud",
                &optional_line_shader,
                "vs_stud",
                &[opt_line_vertex, opt_line_instance],
                &lines,
                true,
            ),
        }
    }
}

struct Primitive {
    topology: wgpu::PrimitiveTopology,
    cull: Option<wgpu::Face>,
    blend: wgpu::BlendState,
    bias: wgpu::DepthBiasState,
}

struct PipelineSpec<'a> {
    device: &'a wgpu::Device,
    layout: &'a wgpu::PipelineLayout,
    surface_format: wgpu::TextureFormat,
}

impl PipelineSpec<'_> {
    fn pipeline(
        &self,
        label: &str,
        shader: &wgpu::ShaderModule,
        vs_entry: &str,
        buffers: &[wgpu::VertexBufferLayout],
        primitive: &Primitive,
        depth_write: bool,
    ) -> wgpu::RenderPipeline {
        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(self.layout),
                vertex: wgpu::VertexState {
                    module: shader,
                    entry_point: Some(vs_entry),
                    buffers,
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.surface_format,
                        blend: Some(primitive.blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: primitive.topology,
                    cull_mode: primitive.cull,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: Some(depth_write),
                    depth_compare: Some(wgpu::CompareFunction::Greater),
                    stencil: wgpu::StencilState::default(),
                    bias: primitive.bias,
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(
            Some([224.0 / 255.0, 77.0 / 255.0, 77.0 / 255.0, 1.0]),
            parse_hex_color("#e04d4d")
        );
        assert_eq!(Some([0.0, 0.0, 0.0, 1.0]), parse_hex_color("#000000"));
        assert_eq!(None, parse_hex_color("e04d4d"));
        assert_eq!(None, parse_hex_color("#e04d"));
        assert_eq!(None, parse_hex_color("#e04d4g"));
    }

    #[test]
    fn test_instance_data_layout() {
        // Four mat4 columns plus the color code, tightly packed.
        assert_eq!(68, std::mem::size_of::<StudInstanceData>());
    }
}
