//! Embeddable font families, configured in the `[fonts.<Family>]` tables of the config file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FontStyle {
    Regular,
    Bold,
    Italic,
    BoldItalic,
}

impl FontStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            FontStyle::Regular => "regular",
            FontStyle::Bold => "bold",
            FontStyle::Italic => "italic",
            FontStyle::BoldItalic => "bold-italic",
        }
    }

    fn weight(&self) -> &'static str {
        match self {
            FontStyle::Bold | FontStyle::BoldItalic => "bold",
            _ => "normal",
        }
    }

    fn slant(&self) -> &'static str {
        match self {
            FontStyle::Italic | FontStyle::BoldItalic => "italic",
            _ => "normal",
        }
    }
}

/// A font family and the files of its styles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontFamily {
    pub name: String,
    pub files: BTreeMap<FontStyle, PathBuf>,
}

impl FontFamily {
    fn slug(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }

    /// Path of a style inside the package, relative to the OPF.
    pub fn package_path(&self, style: FontStyle) -> Option<String> {
        let file = self.files.get(&style)?;
        let ext = file
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("ttf")
            .to_ascii_lowercase();
        Some(format!("fonts/{}-{}.{}", self.slug(), style.as_str(), ext))
    }

    /// `@font-face` rules for every style plus a body rule selecting the family.
    pub fn css(&self) -> String {
        let mut css = String::new();
        for style in self.files.keys() {
            if let Some(path) = self.package_path(*style) {
                css.push_str(&format!(
                    "@font-face {{ font-family: \"{}\"; font-weight: {}; font-style: {}; src: url(\"{}\"); }}\n",
                    self.name,
                    style.weight(),
                    style.slant(),
                    path
                ));
            }
        }
        css.push_str(&format!("body {{ font-family: \"{}\", serif; }}\n", self.name));
        css
    }
}

/// MIME type of a font file by extension.
pub fn font_media_type(path: &Path, epub3: bool) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match (ext.as_str(), epub3) {
        ("otf", true) => "font/otf",
        ("otf", false) => "application/vnd.ms-opentype",
        ("woff", _) => "font/woff",
        ("woff2", _) => "font/woff2",
        (_, true) => "font/ttf",
        (_, false) => "application/x-font-ttf",
    }
}

/// Looks up font families by name.
pub trait FontRegistry: Send + Sync {
    fn family(&self, name: &str) -> Option<FontFamily>;

    fn names(&self) -> Vec<String>;
}

/// Files of one configured family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FontFiles {
    pub regular: PathBuf,
    pub bold: Option<PathBuf>,
    pub italic: Option<PathBuf>,
    pub bold_italic: Option<PathBuf>,
}

/// Registry built from the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigFontRegistry {
    families: BTreeMap<String, FontFiles>,
}

impl ConfigFontRegistry {
    pub fn new(families: BTreeMap<String, FontFiles>) -> Self {
        Self { families }
    }
}

impl FontRegistry for ConfigFontRegistry {
    /// Case-insensitive lookup.
    fn family(&self, name: &str) -> Option<FontFamily> {
        let (family, files) = self
            .families
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name.trim()))?;
        let mut map = BTreeMap::new();
        map.insert(FontStyle::Regular, files.regular.clone());
        let optional = [
            (FontStyle::Bold, &files.bold),
            (FontStyle::Italic, &files.italic),
            (FontStyle::BoldItalic, &files.bold_italic),
        ];
        for (style, path) in optional {
            if let Some(p) = path {
                map.insert(style, p.clone());
            }
        }
        Some(FontFamily {
            name: family.clone(),
            files: map,
        })
    }

    fn names(&self) -> Vec<String> {
        self.families.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ConfigFontRegistry {
        let mut families = BTreeMap::new();
        families.insert(
            "Linux Libertine".to_string(),
            FontFiles {
                regular: PathBuf::from("/fonts/LinLibertine_R.otf"),
                italic: Some(PathBuf::from("/fonts/LinLibertine_RI.otf")),
                ..FontFiles::default()
            },
        );
        ConfigFontRegistry::new(families)
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let family = registry().family("linux libertine").unwrap();
        assert_eq!(family.name, "Linux Libertine");
        assert_eq!(family.files.len(), 2);
        assert!(registry().family("Comic").is_none());
    }

    #[test]
    fn css_declares_each_style() {
        let family = registry().family("Linux Libertine").unwrap();
        assert_eq!(
            family.package_path(FontStyle::Italic).as_deref(),
            Some("fonts/Linux_Libertine-italic.otf")
        );
        let css = family.css();
        assert_eq!(css.matches("@font-face").count(), 2);
        assert!(css.contains("font-style: italic"));
        assert!(css.contains("body { font-family: \"Linux Libertine\", serif; }"));
    }

    #[test]
    fn media_types_depend_on_version() {
        assert_eq!(font_media_type(Path::new("a.otf"), true), "font/otf");
        assert_eq!(font_media_type(Path::new("a.otf"), false), "application/vnd.ms-opentype");
        assert_eq!(font_media_type(Path::new("a.ttf"), false), "application/x-font-ttf");
    }
}
