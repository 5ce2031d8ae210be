//! Picture downloads and cover resolution.

use std::collections::BTreeMap;
use std::path::Path;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::api::{absolute_url, ApiError, Download, Fetcher};
use crate::model::Picture;
use crate::parser::picture_key;

/// Width of the rendered cover thumbnail.
pub const COVER_WIDTH: u32 = 400;

/// Split a cover reference into file name and optional page (`Book.djvu/12`).
pub fn split_cover_reference(reference: &str) -> (String, Option<u32>) {
    let reference = reference.trim();
    let reference = reference
        .split_once(':')
        .filter(|(prefix, _)| {
            matches!(prefix.to_ascii_lowercase().as_str(), "file" | "image")
        })
        .map(|(_, rest)| rest)
        .unwrap_or(reference);
    if let Some((file, page)) = reference.rsplit_once('/') {
        if let Ok(page) = page.trim().parse::<u32>() {
            return (file.trim().to_string(), Some(page));
        }
    }
    (reference.to_string(), None)
}

/// Thumbnail parameter selecting a page of a multi-page document.
pub fn cover_thumb_param(file: &str, page: Option<u32>) -> Option<String> {
    let lower = file.to_ascii_lowercase();
    if lower.ends_with(".djvu") || lower.ends_with(".pdf") {
        Some(format!("page{}-{}px", page.unwrap_or(1), COVER_WIDTH))
    } else {
        None
    }
}

/// Resolve a cover reference to a picture, or `None` when the file is unknown.
pub async fn resolve_cover<F: Fetcher + ?Sized>(
    api: &F,
    reference: &str,
) -> Result<Option<Picture>, ApiError> {
    let (file, page) = split_cover_reference(reference);
    if file.is_empty() {
        return Ok(None);
    }
    let param = cover_thumb_param(&file, page);
    let Some(info) = api.image_info(&file, param.as_deref(), COVER_WIDTH).await? else {
        return Ok(None);
    };
    let Some(key) = picture_key(&info.url) else {
        return Ok(None);
    };
    let mut picture = Picture::new(key.title, info.canonical_name, info.url);
    picture.mimetype = info.mimetype;
    Ok(Some(picture))
}

/// Download every picture concurrently (at most `concurrency` at once) into `dir`.
///
/// Pictures that fail to download are removed from the map and reported with a warning.
pub async fn download_pictures<F: Fetcher + ?Sized>(
    api: &F,
    pictures: &mut BTreeMap<String, Picture>,
    dir: &Path,
    concurrency: usize,
    progress: Option<&(dyn Fn(usize, usize) + Send + Sync)>,
) {
    let domain = api.domain().to_string();
    let jobs: Vec<(String, String)> = pictures
        .iter()
        .map(|(key, p)| (key.clone(), absolute_url(&p.url, &domain)))
        .collect();
    let total = jobs.len();
    let results: Vec<(String, String, Result<Download, ApiError>)> = stream::iter(jobs)
        .map(|(key, url)| async move {
            let result = api.download(&url, dir).await;
            (key, url, result)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    for (done, (key, url, result)) in results.into_iter().enumerate() {
        match result {
            Ok(download) => {
                if let Some(picture) = pictures.get_mut(&key) {
                    debug!(%key, %url, mimetype = %download.mimetype, "downloaded picture");
                    picture.url = url;
                    if !download.mimetype.starts_with("application/octet-stream") || picture.mimetype.is_empty() {
                        picture.mimetype = download.mimetype;
                    }
                    picture.file = Some(download.path);
                }
            }
            Err(e) => {
                warn!(%key, error = %e, "could not download picture, dropping it");
                pictures.remove(&key);
            }
        }
        if let Some(report) = progress {
            report(done + 1, total);
        }
    }
}
