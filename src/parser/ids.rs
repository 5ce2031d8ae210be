//! Element id sanitizing: ids must be unique across the whole book and valid XML names.

use std::collections::{HashMap, HashSet};

use deunicode::deunicode;

use crate::api::decode_component;
use crate::dom::Document;

/// Ids generated by the rendering engine (`mwAb`, `mw-x`), dropped from the output.
pub fn is_engine_id(id: &str) -> bool {
    let mut chars = id.chars();
    if chars.next() != Some('m') || chars.next() != Some('w') {
        return false;
    }
    let rest = chars.as_str();
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Transliterate and restrict to `[A-Za-z0-9_\-:.]`, starting with a letter.
pub fn clean_id(id: &str) -> String {
    let cleaned: String = deunicode(id)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | ':' | '.' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => cleaned,
        _ => format!("id-{cleaned}"),
    }
}

/// Book-wide id table: `(page title, original id)` to the id written in the output.
#[derive(Debug, Default)]
pub struct IdRegistry {
    mapping: HashMap<(String, String), String>,
    used: HashSet<String>,
    counter: u32,
}

impl IdRegistry {
    /// Allocate an output id for `original` on `page`. Every call returns an id not
    /// returned before; the first allocation for a pair is the one [`lookup`](Self::lookup) sees.
    pub fn allocate(&mut self, page: &str, original: &str) -> String {
        let base = clean_id(original);
        let mut candidate = base.clone();
        while self.used.contains(&candidate) {
            self.counter += 1;
            candidate = format!("{base}-n{}", self.counter);
        }
        self.used.insert(candidate.clone());
        self.mapping
            .entry((page.to_string(), original.to_string()))
            .or_insert_with(|| candidate.clone());
        candidate
    }

    pub fn lookup(&self, page: &str, original: &str) -> Option<&str> {
        self.mapping
            .get(&(page.to_string(), original.to_string()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

/// Rewrite every id in `doc` and the same-document `#fragment` links pointing at them.
pub fn sanitize_ids(doc: &mut Document, page: &str, registry: &mut IdRegistry) {
    let mut renamed: HashMap<String, String> = HashMap::new();
    for el in doc.elements() {
        let Some(original) = doc.attr(el, "id").map(str::to_string) else {
            continue;
        };
        if is_engine_id(&original) {
            doc.remove_attr(el, "id");
            continue;
        }
        let new_id = registry.allocate(page, &original);
        doc.set_attr(el, "id", new_id.clone());
        renamed.entry(original).or_insert(new_id);
    }
    for a in doc.elements_by_tag("a") {
        let Some(fragment) = doc.attr(a, "href").and_then(|h| h.strip_prefix('#')) else {
            continue;
        };
        let fragment = decode_component(fragment);
        if let Some(new_id) = renamed.get(&fragment) {
            doc.set_attr(a, "href", format!("#{new_id}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_ids_are_recognized() {
        assert!(is_engine_id("mwAg"));
        assert!(is_engine_id("mw-x_1"));
        assert!(is_engine_id("mw-reference-text"));
        assert!(is_engine_id("mw_9"));
        assert!(!is_engine_id("mw"));
        assert!(!is_engine_id("mx-1"));
        assert!(!is_engine_id("cite_note-1"));
        assert!(!is_engine_id("mw é"));
    }

    #[test]
    fn ids_are_cleaned() {
        assert_eq!(clean_id("Chapitre_été"), "Chapitre_ete");
        assert_eq!(clean_id("1"), "id-1");
        assert_eq!(clean_id("a b#c"), "a_b_c");
    }

    #[test]
    fn duplicates_across_pages_get_counter_suffix() {
        let mut reg = IdRegistry::default();
        assert_eq!(reg.allocate("A", "note"), "note");
        assert_eq!(reg.allocate("B", "note"), "note-n1");
        assert_eq!(reg.allocate("B", "note"), "note-n2");
        assert_eq!(reg.lookup("B", "note"), Some("note-n1"));
        assert_eq!(reg.lookup("A", "note"), Some("note"));
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn fragment_links_follow_renamed_ids() {
        let mut reg = IdRegistry::default();
        reg.allocate("Other", "cite_note-1");
        let mut doc = Document::parse(
            "<p id=\"mwAQ\"><a href=\"#cite_note-1\">1</a></p><ol><li id=\"cite_note-1\">n</li></ol>",
        );
        sanitize_ids(&mut doc, "Page", &mut reg);
        let li = doc.elements_by_tag("li")[0];
        assert_eq!(doc.attr(li, "id"), Some("cite_note-1-n1"));
        let a = doc.elements_by_tag("a")[0];
        assert_eq!(doc.attr(a, "href"), Some("#cite_note-1-n1"));
        let p = doc.elements_by_tag("p")[0];
        assert!(doc.attr(p, "id").is_none());
    }
}
