//! The LDraw color palette, parsed from a color configuration file
//! (`LDConfig.ldr` or one of its variants).

use std::collections::HashMap;

use crate::ldraw::{error::Error, parse_commands, Command};
use crate::{ColorCode, CURRENT_COLOR, EDGE_COLOR};

/// First color code of the synthetic bank holding edge colors.
///
/// Edge colors have no code of their own in the configuration file. Placing
/// them at a fixed offset keeps every resolvable color addressable in the
/// 256x256 lookup image.
pub const EDGE_CODE_BASE: ColorCode = 0x8000;

/// A single palette entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LDrawColor {
    pub name: String,
    pub code: ColorCode,
    /// Face color, straight (not premultiplied) sRGB.
    pub rgba: [u8; 4],
    /// Contrasting color for outlines drawn on top of this color.
    pub edge: [u8; 3],
    /// `rgba[3] == 255`.
    pub opaque: bool,
}

/// Palette mapping color codes to colors.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ColorTable {
    colors: HashMap<ColorCode, LDrawColor>,
}

impl ColorTable {
    /// Parse a color configuration file.
    ///
    /// Lines of the form
    /// `0 !COLOUR <name> CODE <code> VALUE #RRGGBB EDGE #RRGGBB [ALPHA <a>]`
    /// define palette entries. All other lines are ignored.
    pub fn parse(name: &str, contents: &str) -> Result<Self, Error> {
        let cmds = parse_commands(name, contents.as_bytes())?;

        let colors = cmds
            .into_iter()
            .filter_map(|cmd| match cmd {
                Command::Colour(c) => {
                    let alpha = c.alpha.unwrap_or(255);
                    let color = LDrawColor {
                        name: c.name,
                        code: c.code,
                        rgba: [c.value.red, c.value.green, c.value.blue, alpha],
                        edge: [c.edge.red, c.edge.green, c.edge.blue],
                        opaque: alpha == 255,
                    };
                    Some((c.code, color))
                }
                _ => None,
            })
            .collect();

        Ok(Self { colors })
    }

    pub fn get(&self, code: ColorCode) -> Option<&LDrawColor> {
        self.colors.get(&code)
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Whether faces with this color belong in the opaque triangle stream.
    ///
    /// The current color sentinel and unknown codes are treated as opaque.
    pub fn is_opaque(&self, code: ColorCode) -> bool {
        self.colors.get(&code).map(|c| c.opaque).unwrap_or(true)
    }

    /// The 256x256 RGBA8 color lookup image sampled by the shaders.
    ///
    /// Color code `c` lives at `(c % 256, c / 256)`; the edge color of `c`
    /// lives in the upper bank at [`edge_code`]`(c)`. Codes outside the
    /// addressable range are skipped.
    pub fn lookup_texels(&self) -> Vec<u8> {
        let mut texels = vec![0u8; 256 * 256 * 4];
        let mut write = |code: ColorCode, rgba: [u8; 4]| {
            if let Ok(code) = usize::try_from(code) {
                if code < 256 * 256 {
                    texels[code * 4..code * 4 + 4].copy_from_slice(&rgba);
                }
            }
        };
        for color in self.colors.values() {
            write(color.code, color.rgba);
            if color.code < EDGE_CODE_BASE {
                let [r, g, b] = color.edge;
                write(edge_code(color.code), [r, g, b, 255]);
            }
        }
        texels
    }
}

/// The synthetic code addressing the edge color of `code` in the lookup image.
pub fn edge_code(code: ColorCode) -> ColorCode {
    EDGE_CODE_BASE + code
}

/// Resolve the color code written on a command against the inherited context color.
///
/// Code 16 inherits the context color. Code 24 selects the edge color of the
/// context color, falling back to 0 (black) when the context color is itself
/// the inherit sentinel and no concrete color is known yet.
pub fn resolve_color(local: ColorCode, inherited: ColorCode) -> ColorCode {
    if local == CURRENT_COLOR {
        inherited
    } else if local == EDGE_COLOR {
        if inherited == CURRENT_COLOR {
            0
        } else {
            edge_code(inherited)
        }
    } else {
        local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_colour_line() {
        let table = ColorTable::parse(
            "ldcfg.ldr",
            "0 !COLOUR Transparent_Pink CODE 45 VALUE #FC97AC EDGE #F9345B ALPHA 128",
        )
        .unwrap();

        assert_eq!(
            Some(&LDrawColor {
                name: "Transparent_Pink".to_string(),
                code: 45,
                rgba: [252, 151, 172, 128],
                edge: [249, 52, 91],
                opaque: false,
            }),
            table.get(45)
        );
    }

    #[test]
    fn test_non_color_metas_ignored() {
        let document = indoc! {"
            0 LDraw.org Configuration File
            0 !AVATAR head.png
            0 !COLOUR Black CODE 0 VALUE #1B2A34 EDGE #2B4354
        "};
        let table = ColorTable::parse("ldcfg.ldr", document).unwrap();
        assert_eq!(1, table.len());
        assert!(table.get(0).unwrap().opaque);
    }

    #[test]
    fn test_malformed_colour_is_an_error() {
        let result = ColorTable::parse("ldcfg.ldr", "0 !COLOUR Black CODE 0 VALUE #1B2A34");
        assert!(result.is_err());
    }

    #[test]
    fn test_is_opaque() {
        let document = indoc! {"
            0 !COLOUR Red CODE 4 VALUE #C91A09 EDGE #333333
            0 !COLOUR Trans_Red CODE 36 VALUE #C91A09 EDGE #F08F8F ALPHA 128
        "};
        let table = ColorTable::parse("ldcfg.ldr", document).unwrap();
        assert!(table.is_opaque(4));
        assert!(!table.is_opaque(36));
        // The current color sentinel and unknown codes default to opaque.
        assert!(table.is_opaque(CURRENT_COLOR));
        assert!(table.is_opaque(9999));
    }

    #[test]
    fn test_resolve_color() {
        assert_eq!(4, resolve_color(4, 7));
        assert_eq!(7, resolve_color(CURRENT_COLOR, 7));
        assert_eq!(edge_code(7), resolve_color(EDGE_COLOR, 7));
        assert_eq!(0, resolve_color(EDGE_COLOR, CURRENT_COLOR));
    }

    #[test]
    fn test_lookup_texels_addressing() {
        let table = ColorTable::parse(
            "ldcfg.ldr",
            "0 !COLOUR Lime CODE 300 VALUE #010203 EDGE #040506",
        )
        .unwrap();
        let texels = table.lookup_texels();
        assert_eq!(256 * 256 * 4, texels.len());

        // Code 300 maps to x = 44, y = 1.
        let face = 300 * 4;
        assert_eq!([1, 2, 3, 255], texels[face..face + 4]);

        let edge = edge_code(300) as usize * 4;
        assert_eq!([4, 5, 6, 255], texels[edge..edge + 4]);
    }
}
