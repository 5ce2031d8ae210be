//! Per-export state: title encoding, id registry and the temporary working directory.

use std::collections::HashMap;
use std::path::Path;

use deunicode::deunicode;
use tempfile::TempDir;

use crate::parser::IdRegistry;

/// Longest ASCII tail kept in an encoded file name.
const MAX_ENCODED_TAIL: usize = 100;

/// State shared by every stage of one export. Dropping it deletes the temporary directory
/// and everything downloaded into it.
#[derive(Debug)]
pub struct ExportSession {
    encoded: HashMap<String, String>,
    next_code: u32,
    pub ids: IdRegistry,
    temp_dir: TempDir,
}

impl ExportSession {
    pub fn new() -> std::io::Result<Self> {
        let temp_dir = tempfile::Builder::new().prefix("wsexport-").tempdir()?;
        Ok(Self::with_temp_dir(temp_dir))
    }

    pub fn with_temp_dir(temp_dir: TempDir) -> Self {
        Self {
            encoded: HashMap::new(),
            next_code: 0,
            ids: IdRegistry::default(),
            temp_dir,
        }
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Stable, filesystem-safe identifier for a title: `c<N>_<ascii>`.
    ///
    /// The same input always yields the same output within one session and distinct
    /// inputs never collide, even when they transliterate to the same ASCII.
    pub fn encode(&mut self, title: &str) -> String {
        if let Some(hit) = self.encoded.get(title) {
            return hit.clone();
        }
        let ascii = ascii_tail(title);
        let code = format!("c{}_{}", self.next_code, ascii);
        self.next_code += 1;
        self.encoded.insert(title.to_string(), code.clone());
        code
    }
}

/// Transliterate to ASCII, replace anything outside `[A-Za-z0-9_.]` with `_` and keep
/// the last 100 characters.
fn ascii_tail(title: &str) -> String {
    let cleaned: String = deunicode(title)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        return "_".to_string();
    }
    // all ASCII at this point, so byte offsets are char offsets
    let start = cleaned.len().saturating_sub(MAX_ENCODED_TAIL);
    cleaned[start..].to_string()
}
