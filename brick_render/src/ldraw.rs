//! LDraw file format and parser.

use glam::{Mat4, Vec3, Vec4};

use crate::ColorCode;

pub use parse::parse_commands;

use crate::ldraw::error::Error;

pub mod error;
mod parse;

/// RGB color in sRGB color space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Color {
    /// Construct a new color instance from individual RGB components.
    pub fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }
}

/// [Line Type 0](https://www.ldraw.org/article/218.html#lt0) META command:
/// [!COLOUR language extension](https://www.ldraw.org/article/299.html).
#[derive(Debug, PartialEq, Clone)]
pub struct ColourCmd {
    /// Name of the color.
    pub name: String,
    /// Color code uniquely identifying this color. Codes 16 and 24 are reserved.
    pub code: ColorCode,
    /// Primary value of the color.
    pub value: Color,
    /// Contrasting edge value of the color.
    pub edge: Color,
    /// Optional alpha (opacity) value.
    pub alpha: Option<u8>,
    /// Optional ["brightness for colors that glow"](https://www.ldraw.org/article/299.html#luminance).
    pub luminance: Option<u8>,
}

/// [Line Type 0](https://www.ldraw.org/article/218.html#lt0) comment.
#[derive(Debug, PartialEq, Clone)]
pub struct CommentCmd {
    /// Comment content, excluding the command identifier `0` and the optional comment marker `//`.
    pub text: String,
}

impl CommentCmd {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

/// A transformation matrix as written on a type 1 line.
#[derive(Debug, PartialEq, Clone)]
pub struct Transform {
    /// Position.
    pub pos: Vec3,
    /// First row of rotation+scaling matrix part.
    pub row0: Vec3,
    /// Second row of rotation+scaling matrix part.
    pub row1: Vec3,
    /// Third row of rotation+scaling matrix part.
    pub row2: Vec3,
}

impl Transform {
    /// Get the 4x4 transformation matrix applied to the subfile.
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_cols(
            self.row0.extend(self.pos.x),
            self.row1.extend(self.pos.y),
            self.row2.extend(self.pos.z),
            Vec4::new(0.0, 0.0, 0.0, 1.0),
        )
        .transpose()
    }

    /// Determinant of the upper-left 3x3 linear part.
    ///
    /// A negative determinant means the transform mirrors the subfile,
    /// flipping its winding.
    pub fn determinant(&self) -> f32 {
        self.row0.dot(self.row1.cross(self.row2))
    }
}

/// [Line Type 1](https://www.ldraw.org/article/218.html#lt1) LDraw command:
/// Reference a sub-file from the current file.
#[derive(Debug, PartialEq, Clone)]
pub struct SubFileRefCmd {
    /// Color code of the part.
    pub color: ColorCode,
    /// Transform of this part relative to parent.
    pub transform: Transform,
    /// Referenced sub-file.
    pub file: String,
}

/// [Line Type 2](https://www.ldraw.org/article/218.html#lt2) LDraw command:
/// Draw a segment between 2 vertices.
#[derive(Debug, PartialEq, Clone)]
pub struct LineCmd {
    /// Color code of the primitive.
    pub color: ColorCode,
    /// Vertices of the segment.
    pub vertices: [Vec3; 2],
}

/// [Line Type 3](https://www.ldraw.org/article/218.html#lt3) LDraw command:
/// Draw a triangle between 3 vertices.
#[derive(Debug, PartialEq, Clone)]
pub struct TriangleCmd {
    /// Color code of the primitive.
    pub color: ColorCode,
    /// Vertices of the triangle.
    pub vertices: [Vec3; 3],
}

/// [Line Type 4](https://www.ldraw.org/article/218.html#lt4) LDraw command:
/// Draw a quad between 4 vertices.
#[derive(Debug, PartialEq, Clone)]
pub struct QuadCmd {
    /// Color code of the primitive.
    pub color: ColorCode,
    /// Vertices of the quad. In theory they are guaranteed to be coplanar according to the LDraw
    /// specification, although no attempt is made to validate this property.
    pub vertices: [Vec3; 4],
}

/// [Line Type 5](https://www.ldraw.org/article/218.html#lt5) LDraw command:
/// Draw an optional segment between two vertices, aided by 2 control points.
#[derive(Debug, PartialEq, Clone)]
pub struct OptLineCmd {
    /// Color code of the primitive.
    pub color: ColorCode,
    /// Vertices of the segment.
    pub vertices: [Vec3; 2],
    /// Control points of the segment.
    pub control_points: [Vec3; 2],
}

/// Types of commands contained in a single line of an LDraw file.
#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    /// [Line Type 0](https://www.ldraw.org/article/218.html#lt0) comment.
    /// Note: any line type 0 not otherwise parsed as a known meta-command is parsed as a generic comment.
    Comment(CommentCmd),
    /// [Line Type 0](https://www.ldraw.org/article/218.html#lt0) META command:
    /// [!COLOUR language extension](https://www.ldraw.org/article/299.html).
    Colour(ColourCmd),
    /// [Line Type 0](https://www.ldraw.org/article/218.html#lt0) META command:
    /// `BFC INVERTNEXT` from the [BFC language extension](https://www.ldraw.org/article/415).
    /// Inverts the winding of the next subfile reference.
    BfcInvertNext,
    /// [Line Type 1](https://www.ldraw.org/article/218.html#lt1) sub-file reference.
    SubFileRef(SubFileRefCmd),
    /// [Line Type 2](https://www.ldraw.org/article/218.html#lt2) segment.
    Line(LineCmd),
    /// [Line Type 3](https://www.ldraw.org/article/218.html#lt3) triangle.
    Triangle(TriangleCmd),
    /// [Line Type 4](https://www.ldraw.org/article/218.html#lt4) quadrilateral.
    Quad(QuadCmd),
    /// [Line Type 5](https://www.ldraw.org/article/218.html#lt5) optional line.
    OptLine(OptLineCmd),
}

/// A sub-file reference with the per-line parser state already applied.
#[derive(Debug, PartialEq, Clone)]
pub struct SubFileDraw {
    /// Color code of the part.
    pub color: ColorCode,
    /// Transform of this part relative to parent, in column-major order.
    pub transform: Mat4,
    /// Normalized name of the referenced sub-file.
    pub file: String,
    /// `true` if the subfile winding should be flipped.
    ///
    /// Combines a mirroring transform (negative determinant) with a
    /// preceding `0 BFC INVERTNEXT` directive. The two cancel out.
    pub invert: bool,
}

/// Draw a segment between 2 vertices.
#[derive(Debug, PartialEq, Clone)]
pub struct LineDraw {
    pub color: ColorCode,
    pub vertices: [Vec3; 2],
}

/// Draw a segment that is only visible when its control points straddle it on screen.
#[derive(Debug, PartialEq, Clone)]
pub struct OptLineDraw {
    pub color: ColorCode,
    pub vertices: [Vec3; 2],
    pub control_points: [Vec3; 2],
}

/// Draw a triangle between 3 vertices.
///
/// Quadrilaterals are decomposed into two of these when the file is parsed.
#[derive(Debug, PartialEq, Clone)]
pub struct TriangleDraw {
    pub color: ColorCode,
    pub vertices: [Vec3; 3],
}

/// The drawing commands of a parsed file.
///
/// Line level state has already been resolved at this point. Quads are split
/// into triangles, and `BFC INVERTNEXT` directives are folded into the
/// following sub-file reference.
#[derive(Debug, PartialEq, Clone)]
pub enum DrawCommand {
    SubFile(SubFileDraw),
    Line(LineDraw),
    OptLine(OptLineDraw),
    Triangle(TriangleDraw),
}

/// A parsed LDraw source file. Immutable once parsed.
#[derive(Debug, PartialEq, Clone)]
pub struct LdrawFile {
    /// Normalized name the file was requested under.
    pub name: String,
    /// Drawing commands in file order.
    pub commands: Vec<DrawCommand>,
    /// Unique normalized names referenced by type 1 commands, in first-use order.
    pub sub_file_names: Vec<String>,
}

impl LdrawFile {
    /// Parse the raw text of a single LDraw file.
    ///
    /// Sub-file references are not resolved. Use [`crate::loader::FileLoader`]
    /// and [`crate::part::assemble`] to load a file together with everything
    /// it references.
    pub fn parse(name: &str, contents: &str) -> Result<Self, Error> {
        let name = normalize_name(name);
        let cmds = parse_commands(&name, contents.as_bytes())?;

        let mut commands = Vec::new();
        let mut sub_file_names: Vec<String> = Vec::new();

        // "0 BFC INVERTNEXT" applies to exactly the next draw command.
        let mut invert_next = false;

        for cmd in cmds {
            match cmd {
                Command::BfcInvertNext => invert_next = true,
                Command::SubFileRef(sfr_cmd) => {
                    let file = normalize_name(&sfr_cmd.file);
                    if !sub_file_names.contains(&file) {
                        sub_file_names.push(file.clone());
                    }
                    commands.push(DrawCommand::SubFile(SubFileDraw {
                        color: sfr_cmd.color,
                        transform: sfr_cmd.transform.to_matrix(),
                        file,
                        invert: (sfr_cmd.transform.determinant() < 0.0) ^ invert_next,
                    }));
                    invert_next = false;
                }
                Command::Line(line_cmd) => {
                    commands.push(DrawCommand::Line(LineDraw {
                        color: line_cmd.color,
                        vertices: line_cmd.vertices,
                    }));
                    invert_next = false;
                }
                Command::OptLine(opt_cmd) => {
                    commands.push(DrawCommand::OptLine(OptLineDraw {
                        color: opt_cmd.color,
                        vertices: opt_cmd.vertices,
                        control_points: opt_cmd.control_points,
                    }));
                    invert_next = false;
                }
                Command::Triangle(tri_cmd) => {
                    commands.push(DrawCommand::Triangle(TriangleDraw {
                        color: tri_cmd.color,
                        vertices: tri_cmd.vertices,
                    }));
                    invert_next = false;
                }
                Command::Quad(quad_cmd) => {
                    let [p1, p2, p3, p4] = quad_cmd.vertices;
                    commands.push(DrawCommand::Triangle(TriangleDraw {
                        color: quad_cmd.color,
                        vertices: [p1, p2, p3],
                    }));
                    commands.push(DrawCommand::Triangle(TriangleDraw {
                        color: quad_cmd.color,
                        vertices: [p3, p4, p1],
                    }));
                    invert_next = false;
                }
                Command::Comment(_) | Command::Colour(_) => (),
            }
        }

        Ok(Self {
            name,
            commands,
            sub_file_names,
        })
    }
}

/// Normalize an LDraw file or submodel name for hashing and comparison.
pub fn normalize_name(s: &str) -> String {
    // LDraw filenames are not case sensitive.
    // Normalize paths to lowercase and forward slashes.
    // The official parts library can be assumed to use lowercase.
    s.to_lowercase().replace('\\', "/").replace("//", "/")
}
