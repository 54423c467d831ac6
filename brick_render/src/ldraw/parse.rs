// LDraw File Format Specification
// https://www.ldraw.org/article/218.html

use glam::Vec3;
use log::{error, trace};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1, take_while_m_n},
    character::complete::digit1,
    combinator::{complete, map, map_res, opt},
    error::ErrorKind,
    number::complete::float,
    AsChar, IResult, Input, Parser,
};
use std::str;

use super::{
    Color, ColourCmd, Command, CommentCmd, LineCmd, OptLineCmd, QuadCmd, SubFileRefCmd, Transform,
    TriangleCmd,
};
use crate::ldraw::error::{Error, ParseError};

/// Parse raw LDR content without sub-file resolution.
///
/// Parse the given LDR data passed in `ldr_content` and return the list of parsed commands.
/// Sub-file references (Line Type 1) are not resolved, and returned as [`Command::SubFileRef`].
///
/// The input LDR content must comply to the LDraw standard. In particular this means:
/// - UTF-8 encoded
/// - Both DOS/Windows `<CR><LF>` and Unix `<LF>` line termination accepted
///
/// A type 1 line without a file name or a malformed `!COLOUR` definition fails
/// the whole file; `filename` only names the file in that error. Malformed
/// drawing commands are logged and skipped, and lines with an unknown line
/// type are ignored entirely so that newer files still load.
pub fn parse_commands(filename: &str, ldr_content: &[u8]) -> Result<Vec<Command>, Error> {
    // Remove the UTF-8 byte-order mark (BOM) if present.
    let ldr_content = strip_bom(ldr_content);

    // "An LDraw file consists of one command per line."
    // Some LDraw files have incorrect or incomplete commands.
    // Always advance to the next line to allow parsing to continue.
    let mut commands = Vec::new();
    for line in ldr_content.split(|b| is_cr_or_lf(*b)) {
        if line.iter().all(|b| is_space(*b)) {
            continue;
        }
        match read_line(line) {
            Ok((_, cmd)) => commands.push(cmd),
            Err(e) => match line_type(line) {
                // A reference without a file name or a bad color definition
                // poisons everything drawn with the file. Surface the
                // offending line to the caller.
                Some(b"0") | Some(b"1") => {
                    return Err(ParseError::new_from_nom(
                        filename,
                        String::from_utf8_lossy(line).to_string(),
                        &e,
                    )
                    .into());
                }
                Some(b"2") | Some(b"3") | Some(b"4") | Some(b"5") => {
                    error!(
                        "Error parsing {:?}, {e}",
                        String::from_utf8_lossy(line).to_string()
                    );
                }
                // "If the line type of the command is invalid, the line is ignored."
                _ => trace!(
                    "Ignoring unknown line type: {:?}",
                    String::from_utf8_lossy(line).to_string()
                ),
            },
        }
    }

    Ok(commands)
}

// The first whitespace-delimited token of the line.
fn line_type(line: &[u8]) -> Option<&[u8]> {
    let start = line.iter().position(|b| !is_space(*b))?;
    let rest = &line[start..];
    let end = rest.iter().position(|b| is_space(*b)).unwrap_or(rest.len());
    Some(&rest[..end])
}

fn nom_error(i: &[u8], kind: ErrorKind) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(i, kind))
}

fn strip_bom(i: &[u8]) -> &[u8] {
    i.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(i)
}

// "Whitespace is defined as one or more spaces (#32), tabs (#9), or combination thereof."
fn is_space(chr: u8) -> bool {
    chr == b'\t' || chr == b' '
}

// Detect a *potential* end of line <CR><LF> or <LF> by testing for either of <CR>
// and <LF>. Note that this doesn't necessarily means a proper end of line if <CR>
// is not followed by <LF>, but we assume this doesn't happen.
#[inline]
fn is_cr_or_lf(chr: u8) -> bool {
    chr == b'\n' || chr == b'\r'
}

// Parse any character which is not <CR> or <LF>, potentially until the end of input.
fn take_not_cr_or_lf(i: &[u8]) -> IResult<&[u8], &[u8]> {
    i.split_at_position_complete(is_cr_or_lf)
}

// Parse any character which is not a space, potentially until the end of input.
fn take_not_space(i: &[u8]) -> IResult<&[u8], &[u8]> {
    i.split_at_position_complete(is_space)
}

// Read the command ID and swallow the following space, if any.
fn read_cmd_id_str(i: &[u8]) -> IResult<&[u8], &[u8]> {
    let (i, _) = space0(i)?;
    let (i, id) = i.split_at_position1_complete(|item| !item.is_dec_digit(), ErrorKind::Digit)?;
    let (i, _) = space0(i)?;
    Ok((i, id))
}

fn from_hex(i: &[u8]) -> Result<u8, nom::error::ErrorKind> {
    match std::str::from_utf8(i) {
        Ok(s) => match u8::from_str_radix(s, 16) {
            Ok(val) => Ok(val),
            Err(_) => Err(ErrorKind::AlphaNumeric),
        },
        Err(_) => Err(ErrorKind::AlphaNumeric),
    }
}

fn is_hex_digit(c: u8) -> bool {
    (c as char).is_ascii_hexdigit()
}

fn hex_primary(i: &[u8]) -> IResult<&[u8], u8> {
    map_res(take_while_m_n(2, 2, is_hex_digit), from_hex).parse(i)
}

fn hex_color(i: &[u8]) -> IResult<&[u8], Color> {
    let (i, _) = tag(&b"#"[..]).parse(i)?;
    let (i, (red, green, blue)) = (hex_primary, hex_primary, hex_primary).parse(i)?;
    Ok((i, Color { red, green, blue }))
}

fn digit1_as_u8(i: &[u8]) -> IResult<&[u8], u8> {
    map_res(map_res(digit1, str::from_utf8), str::parse::<u8>).parse(i)
}

// ALPHA part of !COLOUR
fn colour_alpha(i: &[u8]) -> IResult<&[u8], Option<u8>> {
    opt(complete(|i| {
        let (i, _) = sp(i)?;
        let (i, _) = tag(&b"ALPHA"[..])(i)?;
        let (i, _) = sp(i)?;
        digit1_as_u8(i)
    }))
    .parse(i)
}

// LUMINANCE part of !COLOUR
fn colour_luminance(i: &[u8]) -> IResult<&[u8], Option<u8>> {
    opt(complete(|i| {
        let (i, _) = sp(i)?;
        let (i, _) = tag(&b"LUMINANCE"[..])(i)?;
        let (i, _) = sp(i)?;
        digit1_as_u8(i)
    }))
    .parse(i)
}

// !COLOUR extension meta-command
fn meta_colour(i: &[u8]) -> IResult<&[u8], Command> {
    let (i, _) = tag(&b"!COLOUR"[..])(i)?;
    let (i, _) = sp(i)?;
    let (i, name) = map_res(take_not_space, str::from_utf8).parse(i)?;
    let (i, _) = sp(i)?;
    let (i, _) = tag(&b"CODE"[..])(i)?;
    let (i, _) = sp(i)?;
    let (i, code) = color_id(i)?;
    let (i, _) = sp(i)?;
    let (i, _) = tag(&b"VALUE"[..])(i)?;
    let (i, _) = sp(i)?;
    let (i, value) = hex_color(i)?;
    let (i, _) = sp(i)?;
    let (i, _) = tag(&b"EDGE"[..])(i)?;
    let (i, _) = sp(i)?;
    let (i, edge) = hex_color(i)?;
    let (i, alpha) = colour_alpha(i)?;
    let (i, luminance) = colour_luminance(i)?;

    Ok((
        i,
        Command::Colour(ColourCmd {
            name: name.to_string(),
            code,
            value,
            edge,
            alpha,
            luminance,
        }),
    ))
}

// BFC INVERTNEXT from the BFC language extension.
// The other BFC directives fall through to the comment parser.
fn bfc_invert_next(i: &[u8]) -> IResult<&[u8], Command> {
    let (i, _) = tag(&b"BFC"[..])(i)?;
    let (i, _) = sp(i)?;
    let (i, _) = tag(&b"INVERTNEXT"[..])(i)?;
    Ok((i, Command::BfcInvertNext))
}

fn comment(i: &[u8]) -> IResult<&[u8], Command> {
    let (i, text) = take_not_cr_or_lf(i)?;
    Ok((
        i,
        Command::Comment(CommentCmd::new(&String::from_utf8_lossy(text))),
    ))
}

fn meta_cmd(i: &[u8]) -> IResult<&[u8], Command> {
    // A line that starts the !COLOUR meta must parse as one. Falling back to
    // a comment would silently drop palette entries.
    if i.starts_with(b"!COLOUR") {
        meta_colour(i)
    } else {
        alt((complete(bfc_invert_next), comment)).parse(i)
    }
}

fn v3(i: &[u8]) -> IResult<&[u8], Vec3> {
    let (i, (x, _, y, _, z)) = (float, sp, float, sp, float).parse(i)?;
    Ok((i, Vec3 { x, y, z }))
}

fn color_id(i: &[u8]) -> IResult<&[u8], u32> {
    // Some older files have hex colors for some reason.
    map_res(
        map_res(
            take_while1(|c| is_hex_digit(c) || c == b'x' || c == b'X'),
            str::from_utf8,
        ),
        |s| str::parse::<u32>(s).or_else(|_| u32::from_str_radix(s.trim_start_matches("0x"), 16)),
    )
    .parse(i)
}

fn filename(i: &[u8]) -> IResult<&[u8], &str> {
    // Assume leading and trailing whitespace isn't part of the filename.
    let (i, name) = map(map_res(take_not_cr_or_lf, str::from_utf8), str::trim).parse(i)?;
    if name.is_empty() {
        Err(nom_error(i, ErrorKind::NonEmpty))
    } else {
        Ok((i, name))
    }
}

fn file_ref_cmd(i: &[u8]) -> IResult<&[u8], Command> {
    let (i, color) = color_id(i)?;
    let (i, _) = sp(i)?;
    let (i, transform) = transform(i)?;
    let (i, _) = sp(i)?;
    let (i, file) = filename(i)?;

    Ok((
        i,
        Command::SubFileRef(SubFileRefCmd {
            color,
            transform,
            file: file.into(),
        }),
    ))
}

fn transform(i: &[u8]) -> IResult<&[u8], Transform> {
    let (i, (pos, _, row0, _, row1, _, row2)) = (v3, sp, v3, sp, v3, sp, v3).parse(i)?;
    Ok((
        i,
        Transform {
            pos,
            row0,
            row1,
            row2,
        },
    ))
}

fn line_cmd(i: &[u8]) -> IResult<&[u8], Command> {
    let (i, color) = color_id(i)?;
    let (i, _) = sp(i)?;
    let (i, (vert1, _, vert2)) = (v3, sp, v3).parse(i)?;
    let (i, _) = space0(i)?;

    Ok((
        i,
        Command::Line(LineCmd {
            color,
            vertices: [vert1, vert2],
        }),
    ))
}

fn tri_cmd(i: &[u8]) -> IResult<&[u8], Command> {
    let (i, color) = color_id(i)?;
    let (i, _) = sp(i)?;
    let (i, (vert1, _, vert2, _, vert3)) = (v3, sp, v3, sp, v3).parse(i)?;
    let (i, _) = space0(i)?;

    Ok((
        i,
        Command::Triangle(TriangleCmd {
            color,
            vertices: [vert1, vert2, vert3],
        }),
    ))
}

fn quad_cmd(i: &[u8]) -> IResult<&[u8], Command> {
    let (i, color) = color_id(i)?;
    let (i, _) = sp(i)?;
    let (i, (vert1, _, vert2, _, vert3, _, vert4)) = (v3, sp, v3, sp, v3, sp, v3).parse(i)?;
    let (i, _) = space0(i)?;

    Ok((
        i,
        Command::Quad(QuadCmd {
            color,
            vertices: [vert1, vert2, vert3, vert4],
        }),
    ))
}

fn opt_line_cmd(i: &[u8]) -> IResult<&[u8], Command> {
    let (i, color) = color_id(i)?;
    let (i, _) = sp(i)?;
    let (i, (vert1, _, vert2)) = (v3, sp, v3).parse(i)?;
    let (i, _) = space0(i)?;

    // Control points aren't optional in the LDraw spec.
    // Parse as optional to support files that omit them.
    let (i, controls) = opt(complete(|i| {
        let (i, (control1, _, control2)) = (v3, sp, v3).parse(i)?;

        Ok((i, (control1, control2)))
    }))
    .parse(i)?;

    let (control1, control2) = controls.unwrap_or_default();

    Ok((
        i,
        Command::OptLine(OptLineCmd {
            color,
            vertices: [vert1, vert2],
            control_points: [control1, control2],
        }),
    ))
}

// Zero or more "spaces", as defined in LDraw standard.
// Valid even on empty input.
fn space0(i: &[u8]) -> IResult<&[u8], &[u8]> {
    i.split_at_position_complete(|item| !is_space(item))
}

// One or more "spaces", as defined in LDraw standard.
// Valid even on empty input.
fn sp(i: &[u8]) -> IResult<&[u8], &[u8]> {
    i.split_at_position1_complete(|item| !is_space(item), ErrorKind::Space)
}

// "There is no line length restriction. Each command consists of optional leading
// whitespace followed by whitespace-delimited tokens. Some commands also have trailing
// arbitrary data which may itself include internal whitespace; such data is not tokenized,
// but treated as single unit according to the command."
//
// "Lines may also be empty or consist only of whitespace. Such lines have no effect."
//
// "The line type of a line is the first number on the line."
// "If the line type of the command is invalid, the line is ignored."
fn read_line(i: &[u8]) -> IResult<&[u8], Command> {
    let (i, cmd_id) = read_cmd_id_str(i)?;
    let (i, cmd) = match cmd_id {
        b"0" => meta_cmd(i),
        b"1" => file_ref_cmd(i),
        b"2" => line_cmd(i),
        b"3" => tri_cmd(i),
        b"4" => quad_cmd(i),
        b"5" => opt_line_cmd(i),
        _ => Err(nom_error(i, ErrorKind::Switch)),
    }?;
    Ok((i, cmd))
}
