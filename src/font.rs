use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::RenderError;

const MAX_FONT_DIR_DEPTH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FontStyleVariant {
    Regular,
    Bold,
    Italic,
    BoldItalic,
}

impl FontStyleVariant {
    pub fn from_flags(bold: bool, italic: bool) -> Self {
        match (bold, italic) {
            (true, true) => FontStyleVariant::BoldItalic,
            (true, false) => FontStyleVariant::Bold,
            (false, true) => FontStyleVariant::Italic,
            (false, false) => FontStyleVariant::Regular,
        }
    }

    fn is_bold(self) -> bool {
        matches!(self, FontStyleVariant::Bold | FontStyleVariant::BoldItalic)
    }

    fn is_italic(self) -> bool {
        matches!(self, FontStyleVariant::Italic | FontStyleVariant::BoldItalic)
    }
}

#[derive(Debug)]
struct RegisteredFont {
    data: Arc<Vec<u8>>,
    variant: FontStyleVariant,
}

/// Fonts registered by the caller plus lazily indexed system font files.
#[derive(Debug, Default)]
pub(crate) struct FontRegistry {
    fonts: Vec<RegisteredFont>,
    lookup: HashMap<String, Vec<usize>>,
    system_files: OnceLock<HashMap<String, PathBuf>>,
    system_cache: Mutex<HashMap<String, Option<Arc<Vec<u8>>>>>,
    extra_dirs: Vec<PathBuf>,
}

impl FontRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers every font file under `path` and adds it to the system search path.
    pub(crate) fn register_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        for file in collect_font_files(path, MAX_FONT_DIR_DEPTH) {
            self.register_file(file);
        }
        self.extra_dirs.push(path.to_path_buf());
    }

    pub(crate) fn register_file(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        if !is_font_file(path) {
            return;
        }
        let Ok(data) = fs::read(path) else {
            return;
        };
        let source = path.to_string_lossy().to_string();
        let _ = self.register_bytes(data, Some(&source));
    }

    /// Parses `data` as a TrueType/OpenType face and indexes it under its
    /// family, full, PostScript and file-stem names. Returns the primary name.
    pub(crate) fn register_bytes(
        &mut self,
        data: Vec<u8>,
        origin: Option<&str>,
    ) -> Result<String, RenderError> {
        let origin = origin.unwrap_or("EmbeddedFont");
        let (names, variant) = match ttf_parser::Face::parse(&data, 0) {
            Ok(face) => (
                face_names(&face, Path::new(origin)),
                FontStyleVariant::from_flags(face.is_bold(), face.is_italic()),
            ),
            Err(err) => {
                return Err(RenderError::ExternalResourceFailed(format!(
                    "font {origin} could not be parsed: {err}"
                )));
            }
        };
        let slot = self.fonts.len();
        let primary = names[0].clone();
        for key in names.iter().map(|n| normalize_name(n)).filter(|k| !k.is_empty()) {
            let entries = self.lookup.entry(key).or_default();
            if !entries.contains(&slot) {
                entries.push(slot);
            }
        }
        self.fonts.push(RegisteredFont {
            data: Arc::new(data),
            variant,
        });
        Ok(primary)
    }

    pub(crate) fn len(&self) -> usize {
        self.fonts.len()
    }

    /// Font bytes for `family` in the requested style, registered fonts first.
    pub(crate) fn resolve(&self, family: &str, variant: FontStyleVariant) -> Option<Arc<Vec<u8>>> {
        for candidate in font_family_candidates(family) {
            if let Some(font) = self.resolve_registered(&candidate, variant) {
                return Some(font.data.clone());
            }
        }
        self.resolve_system(family, variant)
    }

    fn resolve_registered(&self, family: &str, variant: FontStyleVariant) -> Option<&RegisteredFont> {
        let key = normalize_name(family);
        let indices = self.lookup.get(&key)?;
        let score = |font: &RegisteredFont| {
            u8::from(font.variant.is_bold() == variant.is_bold())
                + u8::from(font.variant.is_italic() == variant.is_italic())
        };
        indices
            .iter()
            .map(|idx| &self.fonts[*idx])
            .max_by_key(|font| score(font))
    }

    fn resolve_system(&self, family: &str, variant: FontStyleVariant) -> Option<Arc<Vec<u8>>> {
        let cache_key = format!("{}|{:?}", normalize_name(family), variant);
        if let Ok(cache) = self.system_cache.lock() {
            if let Some(entry) = cache.get(&cache_key) {
                return entry.clone();
            }
        }

        let files = self.system_files.get_or_init(|| {
            let mut dirs = system_font_dirs();
            dirs.extend(self.extra_dirs.iter().cloned());
            index_font_files(&dirs)
        });
        let mut loaded = None;
        'families: for candidate in font_family_candidates(family) {
            for file_name in system_font_file_candidates(&candidate, variant) {
                let Some(path) = files.get(&file_name.to_ascii_lowercase()) else {
                    continue;
                };
                let Ok(bytes) = fs::read(path) else {
                    continue;
                };
                if ttf_parser::Face::parse(&bytes, 0).is_ok() {
                    loaded = Some(Arc::new(bytes));
                    break 'families;
                }
            }
        }

        if let Ok(mut cache) = self.system_cache.lock() {
            cache.insert(cache_key, loaded.clone());
        }
        loaded
    }
}

fn is_font_file(path: &Path) -> bool {
    path.extension()
        .and_then(|v| v.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "ttf" | "otf"))
        .unwrap_or(false)
}

fn collect_font_files(dir: &Path, depth: usize) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if depth > 0 {
                out.extend(collect_font_files(&path, depth - 1));
            }
        } else if is_font_file(&path) {
            out.push(path);
        }
    }
    out.sort();
    out
}

/// Lower-cased file name → first path found, in directory priority order.
fn index_font_files(dirs: &[PathBuf]) -> HashMap<String, PathBuf> {
    let mut out = HashMap::new();
    for dir in dirs {
        for path in collect_font_files(dir, MAX_FONT_DIR_DEPTH) {
            let Some(name) = path.file_name().and_then(|v| v.to_str()) else {
                continue;
            };
            out.entry(name.to_ascii_lowercase()).or_insert(path);
        }
    }
    out
}

fn system_font_dirs() -> Vec<PathBuf> {
    let from_env = std::env::var_os("FULLBLEED_SVG_FONT_DIR")
        .map(|raw| std::env::split_paths(&raw).collect::<Vec<_>>())
        .unwrap_or_default();
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut dirs: Vec<PathBuf> = from_env
        .into_iter()
        .filter(|p| !p.as_os_str().is_empty())
        .collect();

    if cfg!(target_os = "windows") {
        dirs.push(PathBuf::from(r"C:\Windows\Fonts"));
        if let Some(windir) = std::env::var_os("WINDIR") {
            dirs.push(PathBuf::from(windir).join("Fonts"));
        }
    } else if cfg!(target_os = "macos") {
        dirs.extend(["/System/Library/Fonts", "/Library/Fonts"].map(PathBuf::from));
        dirs.extend(home.map(|h| h.join("Library/Fonts")));
    } else {
        dirs.extend(["/usr/share/fonts", "/usr/local/share/fonts"].map(PathBuf::from));
        if let Some(home) = home {
            dirs.push(home.join(".fonts"));
            dirs.push(home.join(".local/share/fonts"));
        }
    }
    dirs
}

/// Comma-separated `font-family` list, unquoted, with `sans-serif` appended
/// as the last resort when absent.
fn font_family_candidates(family: &str) -> Vec<String> {
    let mut out: Vec<String> = family
        .split(',')
        .map(|part| part.trim().trim_matches(['"', '\'']).trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    if !out.iter().any(|name| normalize_name(name) == "sans-serif") {
        out.push("sans-serif".to_string());
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GenericFamily {
    Sans,
    Serif,
    Mono,
}

impl GenericFamily {
    fn of(family: &str) -> Option<Self> {
        let compact: String = normalize_name(family)
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect();
        match compact.as_str() {
            "sansserif" | "systemui" | "helvetica" | "helveticaneue" | "arial" | "arialmt"
            | "liberationsans" => Some(Self::Sans),
            "serif" | "times" | "timesroman" | "timesnewroman" | "timesnewromanpsmt"
            | "liberationserif" => Some(Self::Serif),
            "monospace" | "courier" | "couriernew" | "liberationmono" => Some(Self::Mono),
            _ => None,
        }
    }

    /// Well-known file names per face, indexed regular, bold, italic, bold italic.
    fn files(self) -> [&'static [&'static str]; 4] {
        match self {
            Self::Sans => [
                &["arial.ttf", "Arial.ttf", "LiberationSans-Regular.ttf", "DejaVuSans.ttf", "NotoSans-Regular.ttf"],
                &["arialbd.ttf", "Arial Bold.ttf", "LiberationSans-Bold.ttf", "DejaVuSans-Bold.ttf", "NotoSans-Bold.ttf"],
                &["ariali.ttf", "Arial Italic.ttf", "LiberationSans-Italic.ttf", "DejaVuSans-Oblique.ttf", "NotoSans-Italic.ttf"],
                &["arialbi.ttf", "Arial Bold Italic.ttf", "LiberationSans-BoldItalic.ttf", "DejaVuSans-BoldOblique.ttf", "NotoSans-BoldItalic.ttf"],
            ],
            Self::Serif => [
                &["times.ttf", "Times New Roman.ttf", "LiberationSerif-Regular.ttf", "DejaVuSerif.ttf"],
                &["timesbd.ttf", "Times New Roman Bold.ttf", "LiberationSerif-Bold.ttf", "DejaVuSerif-Bold.ttf"],
                &["timesi.ttf", "Times New Roman Italic.ttf", "LiberationSerif-Italic.ttf", "DejaVuSerif-Italic.ttf"],
                &["timesbi.ttf", "Times New Roman Bold Italic.ttf", "LiberationSerif-BoldItalic.ttf", "DejaVuSerif-BoldItalic.ttf"],
            ],
            Self::Mono => [
                &["cour.ttf", "Courier New.ttf", "LiberationMono-Regular.ttf", "DejaVuSansMono.ttf"],
                &["courbd.ttf", "Courier New Bold.ttf", "LiberationMono-Bold.ttf", "DejaVuSansMono-Bold.ttf"],
                &["couri.ttf", "Courier New Italic.ttf", "LiberationMono-Italic.ttf", "DejaVuSansMono-Oblique.ttf"],
                &["courbi.ttf", "Courier New Bold Italic.ttf", "LiberationMono-BoldItalic.ttf", "DejaVuSansMono-BoldOblique.ttf"],
            ],
        }
    }
}

impl FontStyleVariant {
    /// Face indices into [`GenericFamily::files`], closest match first.
    fn face_preference(self) -> [usize; 4] {
        match self {
            FontStyleVariant::Regular => [0, 1, 2, 3],
            FontStyleVariant::Bold => [1, 0, 3, 2],
            FontStyleVariant::Italic => [2, 0, 3, 1],
            FontStyleVariant::BoldItalic => [3, 1, 2, 0],
        }
    }

    fn file_suffixes(self) -> &'static [&'static str] {
        match self {
            FontStyleVariant::Regular => &["", "-Regular"],
            FontStyleVariant::Bold => &["-Bold", "Bold", ""],
            FontStyleVariant::Italic => &["-Italic", "Italic", ""],
            FontStyleVariant::BoldItalic => &["-BoldItalic", "BoldItalic", "-Bold", ""],
        }
    }
}

/// File names to probe for `family`: the generic tables for known families,
/// otherwise names synthesized from the family with style suffixes.
fn system_font_file_candidates(family: &str, style: FontStyleVariant) -> Vec<String> {
    let Some(generic) = GenericFamily::of(family) else {
        let compact = normalize_name(family).replace(' ', "");
        if compact.is_empty() {
            return Vec::new();
        }
        return style
            .file_suffixes()
            .iter()
            .flat_map(|suffix| ["ttf", "otf"].map(|ext| format!("{compact}{suffix}.{ext}")))
            .collect();
    };
    let faces = generic.files();
    let mut out: Vec<String> = Vec::new();
    for name in style.face_preference().into_iter().flat_map(|face| faces[face]) {
        if !out.iter().any(|seen| seen.eq_ignore_ascii_case(name)) {
            out.push((*name).to_string());
        }
    }
    out
}

/// Distinct names for a face, primary first. The primary is the first of
/// family (typographic or legacy), full name, PostScript name, file stem.
fn face_names(face: &ttf_parser::Face<'_>, origin: &Path) -> Vec<String> {
    use ttf_parser::name::name_id;

    let first_of = |ids: &[u16]| {
        face.names()
            .into_iter()
            .filter(|record| ids.contains(&record.name_id))
            .find_map(|record| record.to_string())
    };
    let ranked = [
        first_of(&[name_id::TYPOGRAPHIC_FAMILY, name_id::FAMILY]),
        first_of(&[name_id::FULL_NAME]),
        first_of(&[name_id::POST_SCRIPT_NAME]),
        origin.file_stem().and_then(|s| s.to_str()).map(str::to_string),
    ];
    let mut names: Vec<String> = Vec::with_capacity(4);
    for name in ranked.into_iter().flatten() {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    if names.is_empty() {
        names.push("EmbeddedFont".to_string());
    }
    names
}

fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bold_candidates_prefer_bold_files() {
        let candidates = system_font_file_candidates("Helvetica", FontStyleVariant::Bold);
        assert_eq!(candidates[0], "arialbd.ttf");
        assert!(candidates.iter().any(|v| v == "arial.ttf"));
    }

    #[test]
    fn generic_families_share_candidate_tables() {
        assert_eq!(
            system_font_file_candidates("Times New Roman", FontStyleVariant::Regular),
            system_font_file_candidates("serif", FontStyleVariant::Regular)
        );
        assert_eq!(
            system_font_file_candidates("Courier", FontStyleVariant::Italic)[0],
            "couri.ttf"
        );
    }

    #[test]
    fn unknown_family_synthesizes_file_names() {
        let candidates = system_font_file_candidates("Open Sans", FontStyleVariant::Bold);
        assert_eq!(candidates[0], "opensans-Bold.ttf");
        assert_eq!(candidates.len(), 6);
    }

    #[test]
    fn family_list_always_ends_with_sans_serif() {
        assert_eq!(
            font_family_candidates("'My Font', serif"),
            vec!["My Font", "serif", "sans-serif"]
        );
        assert_eq!(font_family_candidates("sans-serif"), vec!["sans-serif"]);
    }

    #[test]
    fn invalid_font_bytes_are_rejected() {
        let mut registry = FontRegistry::new();
        let err = registry
            .register_bytes(vec![0, 1, 2, 3], Some("broken.ttf"))
            .expect_err("invalid font");
        assert!(matches!(err, RenderError::ExternalResourceFailed(_)));
        assert_eq!(registry.len(), 0);
    }
}
