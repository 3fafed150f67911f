//! Font-aware decoding of shown strings.
//!
//! Character codes become text through the font's encoding and its
//! `ToUnicode` CMap, both resolved by lopdf, and advance by the font's own
//! `/Widths` (simple fonts) or `/W` (composite fonts). The standard 14
//! fonts usually ship without widths and fall back to
//! [`FALLBACK_GLYPH_WIDTH`].

use lopdf::{Dictionary, Document, Encoding, Object, dictionary};
use tracing::{debug, warn};

use crate::content::as_number;

/// Advance of one glyph, in em, for fonts without width metrics.
pub(crate) const FALLBACK_GLYPH_WIDTH: f64 = 0.5;

/// Single-byte encodings lopdf carries tables for.
const NAMED_ENCODINGS: [&str; 5] = [
    "StandardEncoding",
    "MacRomanEncoding",
    "MacExpertEncoding",
    "WinAnsiEncoding",
    "PDFDocEncoding",
];

const REPLACEMENT: &str = "\u{FFFD}";

/// One decoded character code.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Glyph {
    pub text: String,
    /// Horizontal advance in em.
    pub width: f64,
    /// Single-byte code 32, the only code word spacing applies to.
    pub is_space: bool,
}

enum Codes<'a> {
    /// One byte per code, decoded up front.
    Simple(Vec<String>),
    /// Two-byte codes mapped through the font's CMap; `None` when the font
    /// gives no way to recover text.
    Composite(Option<Encoding<'a>>),
}

#[derive(Debug)]
enum Widths {
    Unknown,
    Simple {
        first: i64,
        widths: Vec<f64>,
        missing: Option<f64>,
    },
    Composite {
        default: f64,
        /// Inclusive CID ranges with their advance.
        ranges: Vec<(u32, u32, f64)>,
    },
}

/// Decoder for one font resource.
pub(crate) struct FontDecoder<'a> {
    codes: Codes<'a>,
    widths: Widths,
}

impl<'a> FontDecoder<'a> {
    pub fn load(font: &'a Dictionary, doc: &'a Document) -> Self {
        let subtype = font.get(b"Subtype").and_then(Object::as_name).unwrap_or_default();
        if subtype == b"Type0" {
            Self {
                codes: Codes::Composite(composite_encoding(font, doc)),
                widths: composite_widths(font, doc),
            }
        } else {
            Self {
                codes: Codes::Simple(simple_table(font, doc)),
                widths: simple_widths(font, doc),
            }
        }
    }

    /// `StandardEncoding` without metrics, for text shown with no usable font.
    pub fn standard() -> Self {
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "Encoding" => "StandardEncoding",
        };
        Self {
            codes: Codes::Simple(one_byte_table(&font, &Document::new())),
            widths: Widths::Unknown,
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Vec<Glyph> {
        match &self.codes {
            Codes::Simple(table) => bytes
                .iter()
                .map(|&byte| Glyph {
                    text: table.get(usize::from(byte)).cloned().unwrap_or_default(),
                    width: self.width(u32::from(byte)),
                    is_space: byte == b' ',
                })
                .collect(),
            Codes::Composite(encoding) => bytes
                .chunks_exact(2)
                .map(|pair| {
                    let code = u32::from(u16::from_be_bytes([pair[0], pair[1]]));
                    let text = encoding
                        .as_ref()
                        .and_then(|encoding| Document::decode_text(encoding, pair).ok())
                        .unwrap_or_else(|| REPLACEMENT.to_string());
                    Glyph {
                        text,
                        width: self.width(code),
                        is_space: false,
                    }
                })
                .collect(),
        }
    }

    fn width(&self, code: u32) -> f64 {
        match &self.widths {
            Widths::Unknown => FALLBACK_GLYPH_WIDTH,
            Widths::Simple {
                first,
                widths,
                missing,
            } => (i64::from(code) - first)
                .try_into()
                .ok()
                .and_then(|i: usize| widths.get(i).copied())
                .or(*missing)
                .unwrap_or(FALLBACK_GLYPH_WIDTH),
            Widths::Composite { default, ranges } => ranges
                .iter()
                .find(|(lo, hi, _)| (*lo..=*hi).contains(&code))
                .map_or(*default, |(_, _, width)| *width),
        }
    }
}

// ---------------------------------------------------------------------------
// Simple fonts
// ---------------------------------------------------------------------------

/// Copy of `font` whose encoding lopdf will resolve as `encoding`.
fn with_encoding(font: &Dictionary, encoding: &str) -> Dictionary {
    let mut patched = font.clone();
    patched.set("Type", "Font");
    patched.set("Encoding", encoding);
    if encoding != "Identity-H" {
        patched.remove(b"ToUnicode");
    }
    patched
}

/// Base encoding table, then `/Differences`, then `ToUnicode` on top.
fn simple_table(font: &Dictionary, doc: &Document) -> Vec<String> {
    let base = with_encoding(font, base_encoding_name(font, doc));
    let mut table = one_byte_table(&base, doc);
    apply_differences(&mut table, font, doc);

    if font.has(b"ToUnicode") {
        // lopdf reads CMaps with two-byte source codes, so single-byte codes
        // are looked up as 0x00XX.
        let cmap_font = with_encoding(font, "Identity-H");
        match cmap_font.get_font_encoding(doc) {
            Ok(encoding @ Encoding::UnicodeMapEncoding(_)) => {
                for (code, slot) in (0u8..=255).zip(table.iter_mut()) {
                    if let Ok(text) = Document::decode_text(&encoding, &[0, code]) {
                        if !text.is_empty() && text != REPLACEMENT {
                            *slot = text;
                        }
                    }
                }
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "ToUnicode CMap unreadable, keeping base encoding"),
        }
    }
    table
}

fn base_encoding_name(font: &Dictionary, doc: &Document) -> &'static str {
    let name = match font.get_deref(b"Encoding", doc) {
        Ok(Object::Name(name)) => Some(name.as_slice()),
        Ok(Object::Dictionary(dict)) => dict.get(b"BaseEncoding").and_then(Object::as_name).ok(),
        _ => None,
    };
    name.and_then(|name| NAMED_ENCODINGS.iter().find(|known| known.as_bytes() == name))
        .copied()
        .unwrap_or("StandardEncoding")
}

fn one_byte_table(font: &Dictionary, doc: &Document) -> Vec<String> {
    match font.get_font_encoding(doc) {
        Ok(encoding) => (0u8..=255)
            .map(|code| Document::decode_text(&encoding, &[code]).unwrap_or_default())
            .collect(),
        Err(e) => {
            warn!(error = %e, "font encoding unreadable, text from this font is dropped");
            vec![String::new(); 256]
        }
    }
}

fn apply_differences(table: &mut [String], font: &Dictionary, doc: &Document) {
    let Ok(Object::Dictionary(encoding)) = font.get_deref(b"Encoding", doc) else {
        return;
    };
    let Ok(differences) = encoding.get(b"Differences").and_then(Object::as_array) else {
        return;
    };

    let mut code = 0usize;
    for item in differences {
        match item {
            Object::Integer(start) => code = usize::try_from(*start).unwrap_or(usize::MAX),
            Object::Name(name) => {
                if let Some(slot) = table.get_mut(code) {
                    match glyph_text(name) {
                        Some(text) => *slot = text,
                        None => debug!(glyph = %String::from_utf8_lossy(name), code, "unmapped glyph name"),
                    }
                }
                code = code.saturating_add(1);
            }
            _ => {}
        }
    }
}

/// Text for glyph names that spell out their character.
fn glyph_text(name: &[u8]) -> Option<String> {
    let name = std::str::from_utf8(name).ok()?;
    let base = name.split('.').next().unwrap_or(name);

    let hex = base
        .strip_prefix("uni")
        .filter(|h| h.len() == 4)
        .or_else(|| base.strip_prefix('u').filter(|h| (4..=6).contains(&h.len())));
    if let Some(hex) = hex {
        if let Some(c) = u32::from_str_radix(hex, 16).ok().and_then(char::from_u32) {
            return Some(c.to_string());
        }
    }

    if base.len() == 1 && base.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Some(base.to_string());
    }

    let text = match base {
        "space" | "nbspace" => " ",
        "zero" => "0",
        "one" => "1",
        "two" => "2",
        "three" => "3",
        "four" => "4",
        "five" => "5",
        "six" => "6",
        "seven" => "7",
        "eight" => "8",
        "nine" => "9",
        "period" => ".",
        "comma" => ",",
        "colon" => ":",
        "semicolon" => ";",
        "hyphen" | "minus" => "-",
        "slash" => "/",
        "parenleft" => "(",
        "parenright" => ")",
        "quotesingle" => "'",
        "quoteleft" => "\u{2018}",
        "quoteright" => "\u{2019}",
        "quotedblleft" => "\u{201C}",
        "quotedblright" => "\u{201D}",
        "endash" => "\u{2013}",
        "emdash" => "\u{2014}",
        "section" => "\u{A7}",
        "ordmasculine" => "\u{BA}",
        "ordfeminine" => "\u{AA}",
        "bullet" => "\u{2022}",
        _ => return None,
    };
    Some(text.to_string())
}

/// Width of one glyph-space unit in em: `/FontMatrix` for Type 3, else 1/1000.
fn glyph_scale(font: &Dictionary) -> f64 {
    font.get(b"FontMatrix")
        .and_then(Object::as_array)
        .ok()
        .and_then(|m| m.first())
        .and_then(as_number)
        .unwrap_or(0.001)
}

fn simple_widths(font: &Dictionary, doc: &Document) -> Widths {
    let Ok(widths) = font.get_deref(b"Widths", doc).and_then(Object::as_array) else {
        return Widths::Unknown;
    };
    let scale = glyph_scale(font);
    let missing = font
        .get_deref(b"FontDescriptor", doc)
        .and_then(Object::as_dict)
        .and_then(|d| d.get(b"MissingWidth"))
        .ok()
        .and_then(as_number)
        .map(|w| w * scale);

    Widths::Simple {
        first: font.get(b"FirstChar").and_then(Object::as_i64).unwrap_or(0),
        widths: widths
            .iter()
            .map(|w| deref_number(w, doc).unwrap_or(0.0) * scale)
            .collect(),
        missing,
    }
}

// ---------------------------------------------------------------------------
// Composite fonts
// ---------------------------------------------------------------------------

fn composite_encoding<'a>(font: &'a Dictionary, doc: &'a Document) -> Option<Encoding<'a>> {
    let base = String::from_utf8_lossy(
        font.get(b"BaseFont").and_then(Object::as_name).unwrap_or_default(),
    )
    .into_owned();
    if !font.type_is(b"Font") {
        warn!(font = %base, "composite font dictionary lacks /Type /Font, text is replaced");
        return None;
    }
    match font.get_font_encoding(doc) {
        Ok(encoding) if Document::decode_text(&encoding, &[0, 0]).is_ok() => Some(encoding),
        Ok(encoding) => {
            warn!(font = %base, ?encoding, "composite font encoding not supported, text is replaced");
            None
        }
        Err(e) => {
            warn!(font = %base, error = %e, "composite font has no usable ToUnicode CMap, text is replaced");
            None
        }
    }
}

fn composite_widths(font: &Dictionary, doc: &Document) -> Widths {
    let descendant = font
        .get_deref(b"DescendantFonts", doc)
        .and_then(Object::as_array)
        .ok()
        .and_then(|fonts| fonts.first())
        .and_then(|first| doc.dereference(first).ok())
        .and_then(|(_, obj)| obj.as_dict().ok());
    let Some(cid_font) = descendant else {
        return Widths::Unknown;
    };

    let default = cid_font.get(b"DW").ok().and_then(as_number).unwrap_or(1000.0) / 1000.0;
    let mut ranges = Vec::new();

    if let Ok(w) = cid_font.get_deref(b"W", doc).and_then(Object::as_array) {
        let mut items = w.iter().map(|item| doc.dereference(item).map_or(item, |(_, obj)| obj));
        while let Some(first) = items.next().and_then(as_number) {
            match items.next() {
                // c [w1 w2 ...]
                Some(Object::Array(list)) => {
                    for (offset, width) in list.iter().enumerate() {
                        if let Some(width) = deref_number(width, doc) {
                            let cid = first as u32 + offset as u32;
                            ranges.push((cid, cid, width / 1000.0));
                        }
                    }
                }
                // c_first c_last w
                Some(last) => {
                    let (Some(last), Some(width)) = (as_number(last), items.next().and_then(as_number))
                    else {
                        break;
                    };
                    ranges.push((first as u32, last as u32, width / 1000.0));
                }
                None => break,
            }
        }
    }

    Widths::Composite { default, ranges }
}

fn deref_number(obj: &Object, doc: &Document) -> Option<f64> {
    doc.dereference(obj).ok().and_then(|(_, obj)| as_number(obj))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::identity_cmap;
    use lopdf::Stream;

    #[test]
    fn win_ansi_maps_typographic_punctuation() {
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        };
        let doc = Document::new();
        let decoder = FontDecoder::load(&font, &doc);
        let text: String = decoder
            .decode(b"\x93Art. 5\x94 \x96 revoked")
            .into_iter()
            .map(|g| g.text)
            .collect();
        assert_eq!(text, "\u{201C}Art. 5\u{201D} \u{2013} revoked");
    }

    #[test]
    fn widths_come_from_the_font() {
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "TrueType",
            "FirstChar" => 65,
            "Widths" => vec![722.into(), 667.into()],
        };
        let doc = Document::new();
        let glyphs = FontDecoder::load(&font, &doc).decode(b"ABC");
        assert!((glyphs[0].width - 0.722).abs() < 1e-9);
        assert!((glyphs[1].width - 0.667).abs() < 1e-9);
        // Outside /Widths and no MissingWidth.
        assert!((glyphs[2].width - FALLBACK_GLYPH_WIDTH).abs() < 1e-9);
    }

    #[test]
    fn differences_override_base_encoding() {
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "Encoding" => dictionary! {
                "Type" => "Encoding",
                "BaseEncoding" => "WinAnsiEncoding",
                "Differences" => vec![
                    1.into(),
                    Object::Name(b"section".to_vec()),
                    Object::Name(b"uni00E7".to_vec()),
                ],
            },
        };
        let doc = Document::new();
        let text: String = FontDecoder::load(&font, &doc)
            .decode(b"\x01 1\x02\xe3o")
            .into_iter()
            .map(|g| g.text)
            .collect();
        assert_eq!(text, "\u{A7} 1\u{E7}\u{E3}o");
    }

    #[test]
    fn identity_h_decodes_through_to_unicode() {
        let mut doc = Document::with_version("1.5");
        let cmap_id = doc.add_object(Stream::new(dictionary! {}, identity_cmap(&[(1, 'A'), (2, 'r'), (3, 't')])));
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => "Subset",
            "Encoding" => "Identity-H",
            "ToUnicode" => cmap_id,
            "DescendantFonts" => vec![Object::Dictionary(dictionary! {
                "Type" => "Font",
                "Subtype" => "CIDFontType2",
                "DW" => 500,
                "W" => vec![1.into(), Object::Array(vec![600.into(), 400.into()])],
            })],
        };

        let glyphs = FontDecoder::load(&font, &doc).decode(&[0, 1, 0, 2, 0, 3]);
        let text: String = glyphs.iter().map(|g| g.text.as_str()).collect();
        assert_eq!(text, "Art");
        let widths: Vec<f64> = glyphs.iter().map(|g| g.width).collect();
        assert_eq!(widths, vec![0.6, 0.4, 0.5]);
    }

    #[test]
    fn composite_font_without_cmap_is_replaced_not_garbled() {
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => "Subset",
            "Encoding" => "Identity-H",
        };
        let doc = Document::new();
        let text: String = FontDecoder::load(&font, &doc)
            .decode(&[0, 1, 0, 2])
            .into_iter()
            .map(|g| g.text)
            .collect();
        assert_eq!(text, "\u{FFFD}\u{FFFD}");
    }

    #[test]
    fn glyph_names() {
        assert_eq!(glyph_text(b"a").as_deref(), Some("a"));
        assert_eq!(glyph_text(b"uni2013").as_deref(), Some("\u{2013}"));
        assert_eq!(glyph_text(b"u1F600").as_deref(), Some("\u{1F600}"));
        assert_eq!(glyph_text(b"seven.oldstyle").as_deref(), Some("7"));
        assert_eq!(glyph_text(b"g123"), None);
    }
}
