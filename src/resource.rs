use std::path::{Path, PathBuf};

use base64::Engine;
use tiny_skia::Pixmap;

use crate::debug::DebugLogger;
use crate::document::Document;
use crate::error::RenderError;

/// How a reference is resolved, decided from its text alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ResourceTarget {
    /// `#id` inside the same document.
    Fragment(String),
    Data,
    File(PathBuf),
    Remote(String),
}

impl ResourceTarget {
    pub fn classify(href: &str) -> Self {
        let href = href.trim();
        if let Some(id) = href.strip_prefix('#') {
            return ResourceTarget::Fragment(id.to_string());
        }
        let lower = href.to_ascii_lowercase();
        if lower.starts_with("data:") {
            return ResourceTarget::Data;
        }
        if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("//")
        {
            return ResourceTarget::Remote(href.to_string());
        }
        if lower.starts_with("file://") {
            return ResourceTarget::File(PathBuf::from(&href["file://".len()..]));
        }
        ResourceTarget::File(PathBuf::from(href))
    }
}

/// Every `href` / `xlink:href` value in document order.
pub(crate) fn collect_references(doc: &Document) -> Vec<String> {
    doc.iter()
        .filter_map(|(_, node)| node.href())
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty())
        .collect()
}

/// Rejects remote references unless external resources are enabled.
pub(crate) fn enforce_policy(doc: &Document, allow_external: bool) -> Result<(), RenderError> {
    if allow_external {
        return Ok(());
    }
    for href in collect_references(doc) {
        if let ResourceTarget::Remote(url) = ResourceTarget::classify(&href) {
            return Err(RenderError::ExternalResourceBlocked(format!(
                "External resource blocked: {url}"
            )));
        }
    }
    Ok(())
}

/// Loads images referenced from the document. Failures are logged and
/// skipped unless `fail_on_missing` is set.
pub(crate) struct ResourceLoader {
    resource_dir: Option<PathBuf>,
    fail_on_missing: bool,
    logger: Option<DebugLogger>,
}

impl ResourceLoader {
    pub fn new(
        resource_dir: Option<PathBuf>,
        fail_on_missing: bool,
        logger: Option<DebugLogger>,
    ) -> Self {
        Self {
            resource_dir,
            fail_on_missing,
            logger,
        }
    }

    pub fn load_image(&self, href: &str) -> Result<Option<Pixmap>, RenderError> {
        match self.try_load_image(href) {
            Ok(pixmap) => Ok(Some(pixmap)),
            Err(err) if self.fail_on_missing => Err(err),
            Err(err) => {
                if let Some(logger) = self.logger.as_ref() {
                    logger.event(
                        "svg.resource.failed",
                        &[("href", truncate(href)), ("reason", &err.message())],
                    );
                }
                Ok(None)
            }
        }
    }

    fn try_load_image(&self, href: &str) -> Result<Pixmap, RenderError> {
        let (mime, bytes) = self.load_bytes(href)?;
        decode_image_to_pixmap(&bytes, mime.as_deref()).ok_or_else(|| {
            RenderError::ExternalResourceFailed(format!(
                "Unable to decode image: {}",
                truncate(href)
            ))
        })
    }

    fn load_bytes(&self, href: &str) -> Result<(Option<String>, Vec<u8>), RenderError> {
        match ResourceTarget::classify(href) {
            ResourceTarget::Data => {
                let (mime, data) = parse_data_uri(href.trim()).ok_or_else(|| {
                    RenderError::ExternalResourceFailed("Malformed data URI".to_string())
                })?;
                Ok((Some(mime), data))
            }
            ResourceTarget::File(path) => {
                let path = self.resolve_path(&path);
                let bytes = std::fs::read(&path).map_err(|err| {
                    RenderError::ExternalResourceFailed(format!(
                        "Unable to read {}: {err}",
                        path.display()
                    ))
                })?;
                Ok((None, bytes))
            }
            ResourceTarget::Remote(url) => Err(RenderError::ExternalResourceFailed(format!(
                "Remote fetching is not supported: {url}"
            ))),
            ResourceTarget::Fragment(id) => Err(RenderError::ExternalResourceFailed(format!(
                "Fragment #{id} is not an image"
            ))),
        }
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        match self.resource_dir.as_ref() {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

fn truncate(href: &str) -> &str {
    if href.len() <= 96 {
        return href;
    }
    let mut end = 96;
    while !href.is_char_boundary(end) {
        end -= 1;
    }
    &href[..end]
}

pub(crate) fn decode_image_to_pixmap(data: &[u8], mime: Option<&str>) -> Option<Pixmap> {
    let guessed_format = match mime {
        Some(mime) if mime.contains("png") => Some(image::ImageFormat::Png),
        Some(mime) if mime.contains("jpeg") || mime.contains("jpg") => {
            Some(image::ImageFormat::Jpeg)
        }
        _ => image::guess_format(data).ok(),
    };

    let decoded = match guessed_format {
        Some(fmt) => image::load_from_memory_with_format(data, fmt).ok()?,
        None => image::load_from_memory(data).ok()?,
    };
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height)?;
    for (src, dst) in rgba
        .as_raw()
        .chunks_exact(4)
        .zip(pixmap.data_mut().chunks_exact_mut(4))
    {
        let a = src[3];
        dst[0] = premul_u8(src[0], a);
        dst[1] = premul_u8(src[1], a);
        dst[2] = premul_u8(src[2], a);
        dst[3] = a;
    }
    Some(pixmap)
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

/// `(mime, payload)`; base64 payloads may contain whitespace, others are
/// percent-decoded.
pub(crate) fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let rest = uri.get(..5)?.eq_ignore_ascii_case("data:").then(|| &uri[5..])?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header
        .split(';')
        .next()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("text/plain")
        .to_ascii_lowercase();
    let data = if header
        .split(';')
        .any(|part| part.trim().eq_ignore_ascii_case("base64"))
    {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .ok()?
    } else {
        percent_decode(payload)
    };
    Some((mime, data))
}

fn percent_decode(raw: &str) -> Vec<u8> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbaImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        img.put_pixel(1, 0, image::Rgba([0, 0, 255, 128]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).expect("encode");
        out.into_inner()
    }

    #[test]
    fn classifies_references() {
        assert_eq!(
            ResourceTarget::classify("#grad"),
            ResourceTarget::Fragment("grad".to_string())
        );
        assert_eq!(ResourceTarget::classify("data:image/png;base64,AA"), ResourceTarget::Data);
        assert_eq!(
            ResourceTarget::classify("HTTPS://example.com/a.png"),
            ResourceTarget::Remote("HTTPS://example.com/a.png".to_string())
        );
        assert_eq!(
            ResourceTarget::classify("file:///tmp/a.png"),
            ResourceTarget::File(PathBuf::from("/tmp/a.png"))
        );
        assert_eq!(
            ResourceTarget::classify("img/a.png"),
            ResourceTarget::File(PathBuf::from("img/a.png"))
        );
    }

    #[test]
    fn remote_references_are_blocked_by_default() {
        let doc = Document::parse(
            r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">
                <use href="#a"/><image xlink:href="http://example.com/x.png"/>
            </svg>"##,
        )
        .expect("document");
        assert_eq!(
            collect_references(&doc),
            vec!["#a".to_string(), "http://example.com/x.png".to_string()]
        );
        let err = enforce_policy(&doc, false).expect_err("blocked");
        assert!(matches!(err, RenderError::ExternalResourceBlocked(_)));
        assert_eq!(
            err.message(),
            "External resource blocked: http://example.com/x.png"
        );
        assert!(enforce_policy(&doc, true).is_ok());
    }

    #[test]
    fn data_uris_decode_base64_and_percent_payloads() {
        let (mime, data) = parse_data_uri("data:text/plain;base64,aGVs\nbG8=").expect("uri");
        assert_eq!(mime, "text/plain");
        assert_eq!(data, b"hello");
        let (_, data) = parse_data_uri("data:,a%20b%zz").expect("uri");
        assert_eq!(data, b"a b%zz");
        assert!(parse_data_uri("nodata").is_none());
    }

    #[test]
    fn decodes_png_as_premultiplied() {
        let pixmap = decode_image_to_pixmap(&png_bytes(), None).expect("decode");
        assert_eq!(pixmap.width(), 2);
        let data = pixmap.data();
        assert_eq!(&data[..4], &[255, 0, 0, 255]);
        assert_eq!(&data[4..8], &[0, 0, 128, 128]);
    }

    #[test]
    fn loader_reads_data_uri_and_relative_files() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes());
        let loader = ResourceLoader::new(None, true, None);
        let pixmap = loader
            .load_image(&format!("data:image/png;base64,{encoded}"))
            .expect("load")
            .expect("pixmap");
        assert_eq!(pixmap.height(), 1);

        let dir = std::env::temp_dir().join(format!("fullbleed_svg_res_{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("dir");
        std::fs::write(dir.join("dot.png"), png_bytes()).expect("write");
        let loader = ResourceLoader::new(Some(dir.clone()), true, None);
        assert!(loader.load_image("dot.png").expect("load").is_some());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_resources_are_skipped_unless_required() {
        let lenient = ResourceLoader::new(None, false, None);
        assert!(lenient
            .load_image("/definitely/not/here.png")
            .expect("lenient")
            .is_none());
        let strict = ResourceLoader::new(None, true, None);
        let err = strict
            .load_image("https://example.com/a.png")
            .expect_err("strict");
        assert!(matches!(err, RenderError::ExternalResourceFailed(_)));
    }
}
