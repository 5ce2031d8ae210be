//! Contributor credits from an external statistics service.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use crate::api::{ApiError, PoliteClient};
use crate::model::Contributor;

/// Pages or files per credits request.
const TITLES_PER_REQUEST: usize = 50;

/// One row as returned by the credits service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreditRow {
    pub name: String,
    pub count: u64,
    #[serde(default)]
    pub bot: bool,
}

/// Source of per-user contribution counts.
#[async_trait]
pub trait CreditsSource: Send + Sync {
    /// Contributions to wiki pages (including proofread `Page:` and `Index:` pages).
    async fn page_credits(&self, lang: &str, titles: &[String]) -> Result<Vec<CreditRow>, ApiError>;

    /// Contributions to media files, by file name.
    async fn image_credits(&self, names: &[String]) -> Result<Vec<CreditRow>, ApiError>;
}

/// Sum counts per user, keep the bot flag if any row has it, sort by count descending.
pub fn merge_credits(rows: impl IntoIterator<Item = CreditRow>) -> Vec<Contributor> {
    let mut merged: HashMap<String, Contributor> = HashMap::new();
    for row in rows {
        let entry = merged
            .entry(row.name.clone())
            .or_insert_with(|| Contributor {
                name: row.name,
                count: 0,
                bot: false,
            });
        entry.count += row.count;
        entry.bot |= row.bot;
    }
    let mut credits: Vec<Contributor> = merged.into_values().collect();
    credits.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    credits
}

/// Credits service reached over HTTP.
///
/// `GET <endpoint>?lang=<lang>&page=A|B` and `GET <endpoint>?lang=commons&image=A|B`
/// both answer with a JSON array of [`CreditRow`].
#[derive(Debug, Clone)]
pub struct HttpCreditsSource {
    endpoint: String,
    client: Arc<PoliteClient>,
}

impl HttpCreditsSource {
    pub fn new(endpoint: impl Into<String>, client: Arc<PoliteClient>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client,
        }
    }

    async fn query(&self, lang: &str, kind: &str, titles: &[String]) -> Result<Vec<CreditRow>, ApiError> {
        let mut rows = Vec::new();
        for batch in titles.chunks(TITLES_PER_REQUEST) {
            let joined = batch.join("|");
            let url = Url::parse_with_params(&self.endpoint, &[("lang", lang), (kind, joined.as_str())])
                .map_err(|e| ApiError::InvalidUrl {
                    input: self.endpoint.clone(),
                    reason: e.to_string(),
                })?;
            let batch_rows: Vec<CreditRow> = self.client.get_json(url.as_str(), "credits").await?;
            rows.extend(batch_rows);
        }
        Ok(rows)
    }
}

#[async_trait]
impl CreditsSource for HttpCreditsSource {
    async fn page_credits(&self, lang: &str, titles: &[String]) -> Result<Vec<CreditRow>, ApiError> {
        self.query(lang, "page", titles).await
    }

    async fn image_credits(&self, names: &[String]) -> Result<Vec<CreditRow>, ApiError> {
        self.query("commons", "image", names).await
    }
}
