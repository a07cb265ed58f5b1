use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use tiny_skia::{Path, PathBuilder};
use ttf_parser::{GlyphId, OutlineBuilder};

use crate::cascade::TextAnchor;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct GlyphPlacement {
    pub glyph_id: u16,
    /// Pen position relative to the run origin, y pointing down.
    pub x: f32,
    pub y: f32,
}

/// A shaped single-line run.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TextLayout {
    pub glyphs: Vec<GlyphPlacement>,
    pub advance: f32,
    pub scale: f32,
}

impl TextLayout {
    pub fn anchor_offset(&self, anchor: TextAnchor) -> f32 {
        match anchor {
            TextAnchor::Start => 0.0,
            TextAnchor::Middle => -self.advance / 2.0,
            TextAnchor::End => -self.advance,
        }
    }
}

pub(crate) fn layout_text(font_data: &[u8], text: &str, font_size: f32) -> Option<TextLayout> {
    if text.is_empty() || font_size <= 0.0 {
        return None;
    }
    let Some(face) = HbFace::from_slice(font_data, 0) else {
        return layout_text_unshaped(font_data, text, font_size);
    };
    let units = face.units_per_em().max(1) as f32;
    let scale = font_size / units;
    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(detect_direction(text));
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let infos = output.glyph_infos();
    let positions = output.glyph_positions();
    if infos.is_empty() || infos.len() != positions.len() {
        return layout_text_unshaped(font_data, text, font_size);
    }

    let mut glyphs = Vec::with_capacity(infos.len());
    let mut pen_x = 0.0f32;
    let mut pen_y = 0.0f32;
    for (info, pos) in infos.iter().zip(positions.iter()) {
        let gid = info.glyph_id as u16;
        if gid != 0 {
            glyphs.push(GlyphPlacement {
                glyph_id: gid,
                x: pen_x + pos.x_offset as f32 * scale,
                y: pen_y - pos.y_offset as f32 * scale,
            });
        }
        pen_x += pos.x_advance as f32 * scale;
        pen_y -= pos.y_advance as f32 * scale;
    }
    Some(TextLayout {
        glyphs,
        advance: pen_x,
        scale,
    })
}

fn layout_text_unshaped(font_data: &[u8], text: &str, font_size: f32) -> Option<TextLayout> {
    let face = ttf_parser::Face::parse(font_data, 0).ok()?;
    let scale = font_size / face.units_per_em().max(1) as f32;
    let mut glyphs = Vec::new();
    let mut pen_x = 0.0f32;
    for ch in text.chars() {
        let Some(gid) = face.glyph_index(ch) else {
            pen_x += font_size * 0.5;
            continue;
        };
        glyphs.push(GlyphPlacement {
            glyph_id: gid.0,
            x: pen_x,
            y: 0.0,
        });
        pen_x += face
            .glyph_hor_advance(gid)
            .map(|w| w as f32 * scale)
            .unwrap_or(font_size * 0.5);
    }
    Some(TextLayout {
        glyphs,
        advance: pen_x,
        scale,
    })
}

/// Outlines of every glyph in `layout` as one path, baseline at (`x`, `y`).
pub(crate) fn text_outline(font_data: &[u8], layout: &TextLayout, x: f32, y: f32) -> Option<Path> {
    let face = ttf_parser::Face::parse(font_data, 0).ok()?;
    let mut builder = GlyphPathBuilder::new(PathBuilder::new(), layout.scale);
    for glyph in &layout.glyphs {
        builder.origin_x = x + glyph.x;
        builder.origin_y = y + glyph.y;
        let _ = face.outline_glyph(GlyphId(glyph.glyph_id), &mut builder);
    }
    builder.finish()
}

fn detect_direction(text: &str) -> HbDirection {
    for ch in text.chars() {
        let code = ch as u32;
        let rtl = matches!(
            code,
            0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF | 0x1EE00..=0x1EEFF
        );
        if rtl {
            return HbDirection::RightToLeft;
        }
    }
    HbDirection::LeftToRight
}

/// Font units (y up) to user space (y down).
struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(builder: PathBuilder, scale: f32) -> Self {
        Self {
            builder,
            origin_x: 0.0,
            origin_y: 0.0,
            scale,
        }
    }

    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y - y * self.scale)
    }

    fn finish(self) -> Option<Path> {
        self.builder.finish()
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_offsets_follow_advance() {
        let layout = TextLayout {
            glyphs: Vec::new(),
            advance: 40.0,
            scale: 1.0,
        };
        assert_eq!(layout.anchor_offset(TextAnchor::Start), 0.0);
        assert_eq!(layout.anchor_offset(TextAnchor::Middle), -20.0);
        assert_eq!(layout.anchor_offset(TextAnchor::End), -40.0);
    }

    #[test]
    fn invalid_font_data_yields_no_layout() {
        assert!(layout_text(&[0, 1, 2], "abc", 12.0).is_none());
        assert!(layout_text(&[], "", 12.0).is_none());
    }

    #[test]
    fn rtl_text_is_detected() {
        assert_eq!(detect_direction("abc"), HbDirection::LeftToRight);
        assert_eq!(detect_direction("\u{05D0}"), HbDirection::RightToLeft);
    }

    #[test]
    fn glyph_builder_flips_y_axis() {
        let mut builder = GlyphPathBuilder::new(PathBuilder::new(), 0.5);
        builder.origin_x = 10.0;
        builder.origin_y = 20.0;
        assert_eq!(builder.map(4.0, 4.0), (12.0, 18.0));
    }
}
