//! Picture identity derived from media URLs.

use crate::api::decode_component;

/// Key identifying one rendition of a picture, and the media file it comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureKey {
    /// Unique per rendition: thumbnails of different sizes get different keys.
    pub title: String,
    /// Source file name, shared by all renditions.
    pub name: String,
}

/// Hash bucket pair such as `a/ab`: one hex digit, then two starting with it.
fn is_bucket(outer: &str, inner: &str) -> bool {
    let hex = |s: &str| s.chars().all(|c| c.is_ascii_hexdigit());
    outer.len() == 1 && inner.len() == 2 && hex(outer) && hex(inner) && inner.starts_with(outer)
}

/// Derive the key for an image URL.
///
/// Media host layout is `.../<h>/<hh>/<File>` for originals and
/// `.../thumb/<h>/<hh>/<File>/<size>px-<File>` for thumbnails. When the two segments
/// before the source file name are hex buckets the URL is a thumbnail: the key is the
/// thumbnail file name and the name is the source file. Otherwise both are the last segment.
pub fn picture_key(url: &str) -> Option<PictureKey> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let last = *segments.last()?;
    let n = segments.len();
    if n >= 4 && is_bucket(segments[n - 4], segments[n - 3]) {
        return Some(PictureKey {
            title: decode_component(last),
            name: decode_component(segments[n - 2]),
        });
    }
    let decoded = decode_component(last);
    Some(PictureKey {
        title: decoded.clone(),
        name: decoded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumbnails_of_one_file_get_distinct_keys_and_shared_name() {
        let small = picture_key(
            "//upload.wikimedia.org/wikipedia/commons/thumb/a/ab/Caf%C3%A9.jpg/220px-Caf%C3%A9.jpg",
        )
        .unwrap();
        let large = picture_key(
            "//upload.wikimedia.org/wikipedia/commons/thumb/a/ab/Caf%C3%A9.jpg/440px-Caf%C3%A9.jpg",
        )
        .unwrap();
        assert_eq!(small.title, "220px-Café.jpg");
        assert_eq!(large.title, "440px-Café.jpg");
        assert_ne!(small.title, large.title);
        assert_eq!(small.name, "Café.jpg");
        assert_eq!(large.name, "Café.jpg");
    }

    #[test]
    fn originals_use_last_segment() {
        let key = picture_key("https://upload.wikimedia.org/wikipedia/commons/a/ab/X.png").unwrap();
        assert_eq!(key.title, "X.png");
        assert_eq!(key.name, "X.png");
    }

    #[test]
    fn language_segment_is_not_a_bucket() {
        let key = picture_key("https://upload.wikimedia.org/wikisource/de/a/ab/X.png").unwrap();
        assert_eq!(key.name, "X.png");
    }

    #[test]
    fn query_string_is_ignored() {
        let key = picture_key("https://example.org/img/Y.svg?version=3").unwrap();
        assert_eq!(key.title, "Y.svg");
    }

    #[test]
    fn empty_url_has_no_key() {
        assert!(picture_key("").is_none());
    }
}
