use std::io::Cursor;
use std::path::PathBuf;

use crate::error::RenderError;

/// Straight-alpha color with channels in 0..=1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };

    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
        a: 1.0,
    };

    pub const TRANSPARENT: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
            a: a as f32 / 255.0,
        }
    }

    pub fn with_alpha_scaled(self, factor: f32) -> Self {
        Self {
            a: (self.a * factor).clamp(0.0, 1.0),
            ..self
        }
    }

    pub(crate) fn to_sk_color(self) -> tiny_skia::Color {
        tiny_skia::Color::from_rgba(
            self.r.clamp(0.0, 1.0),
            self.g.clamp(0.0, 1.0),
            self.b.clamp(0.0, 1.0),
            self.a.clamp(0.0, 1.0),
        )
        .unwrap_or(tiny_skia::Color::BLACK)
    }
}

/// Caller-facing render configuration.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Fallback viewport width when the document does not set one; 0 derives it.
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub scale: f64,
    pub background: Color,
    pub default_font_family: String,
    pub default_font_size: f32,
    pub enable_external_resources: bool,
    /// Base directory for relative file references.
    pub resource_dir: Option<PathBuf>,
    pub font_dirs: Vec<PathBuf>,
    pub max_depth: usize,
    pub fail_on_missing_resources: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            viewport_width: 0.0,
            viewport_height: 0.0,
            scale: 1.0,
            background: Color::TRANSPARENT,
            default_font_family: "Helvetica".to_string(),
            default_font_size: 16.0,
            enable_external_resources: false,
            resource_dir: None,
            font_dirs: Vec::new(),
            max_depth: 256,
            fail_on_missing_resources: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompatFlags {
    pub strict_mode: bool,
    pub deterministic_rendering: bool,
    pub allow_unsupported_filter_fallback: bool,
    /// Enables the report pie-chart overlay keyed by the `PieParent` id.
    pub legacy_pie_chart: bool,
}

impl Default for CompatFlags {
    fn default() -> Self {
        Self {
            strict_mode: true,
            deterministic_rendering: true,
            allow_unsupported_filter_fallback: false,
            legacy_pie_chart: false,
        }
    }
}

/// Rendered image: straight-alpha RGBA8, row-major, top row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl RenderResult {
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 4;
        let px = self.rgba.get(idx..idx + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, RenderError> {
        let image = image::RgbaImage::from_raw(self.width, self.height, self.rgba.clone())
            .ok_or_else(|| {
                RenderError::RenderFailed(format!(
                    "pixel buffer does not match {}x{}",
                    self.width, self.height
                ))
            })?;
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, image::ImageFormat::Png)
            .map_err(|err| RenderError::RenderFailed(format!("png encode failed: {err}")))?;
        Ok(out.into_inner())
    }
}
