//! Catalog service client.
//!
//! Every fetch resolves to a value.  Network failures, non-2xx responses and
//! malformed bodies are logged and replaced wholesale by the built-in
//! fallback for the requested scope (or an empty list when the scope has
//! none).  Remote and fallback data are never merged.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{CatalogConfig, ShowsEndpoint};
use crate::fallback;
use crate::model::{first_duplicate, Category, Show};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("catalog service returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("malformed catalog response: {0}")]
    Validation(String),
}

/// Where the items of a [`Fetched`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchOutcome {
    /// The catalog service answered with a valid list.
    Remote,
    /// The fetch failed and the built-in catalog was used.
    Fallback,
    /// The fetch failed and the scope has no built-in data.
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub items: Vec<T>,
    pub outcome: FetchOutcome,
    /// Why the remote fetch was abandoned, when it was.
    pub error: Option<String>,
}

impl<T> Fetched<T> {
    pub fn is_degraded(&self) -> bool {
        self.outcome != FetchOutcome::Remote
    }
}

#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
    shows_endpoint: ShowsEndpoint,
    api_token: Option<String>,
    timeout: Duration,
}

impl CatalogClient {
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            shows_endpoint: config.shows_endpoint,
            api_token: config.api_token.clone(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Per-request deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn fetch_categories(&self) -> Fetched<Category> {
        let url = format!("{}/categories", self.base_url);
        let result = self
            .get_list::<Category>(&url)
            .await
            .and_then(validate_categories);
        settle("categories", &url, result, || Some(fallback::categories()))
    }

    /// Fetch the shows of one category.
    ///
    /// # Panics
    ///
    /// Panics if `category_id` is blank.  That is a caller bug, not a
    /// catalog failure.
    pub async fn fetch_shows(&self, category_id: &str) -> Fetched<Show> {
        assert!(
            !category_id.trim().is_empty(),
            "fetch_shows called without a category id"
        );

        let url = self.shows_url(category_id);
        let result = self
            .get_list::<Show>(&url)
            .await
            .map(|shows| self.associate(category_id, shows))
            .and_then(validate_shows);
        settle(category_id, &url, result, || fallback::shows(category_id))
    }

    fn shows_url(&self, category_id: &str) -> String {
        match self.shows_endpoint {
            ShowsEndpoint::Combined => format!("{}/categories/shows", self.base_url),
            ShowsEndpoint::Query => format!(
                "{}/categories/shows?category={}",
                self.base_url,
                urlencoding::encode(category_id)
            ),
            ShowsEndpoint::Path => format!(
                "{}/categories/{}/shows",
                self.base_url,
                urlencoding::encode(category_id)
            ),
        }
    }

    /// In combined mode the service returns every show; drop the ones tagged
    /// with another category.  Untagged shows are kept.
    fn associate(&self, category_id: &str, shows: Vec<Show>) -> Vec<Show> {
        if self.shows_endpoint != ShowsEndpoint::Combined {
            return shows;
        }
        shows
            .into_iter()
            .filter(|s| s.category_id.as_deref().map_or(true, |c| c == category_id))
            .collect()
    }

    async fn get_list<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>, CatalogError> {
        let mut request = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status(status));
        }

        let body = response.bytes().await?;
        debug!("catalog: {} returned {} bytes", url, body.len());
        serde_json::from_slice::<Vec<T>>(&body).map_err(|e| CatalogError::Validation(e.to_string()))
    }
}

fn validate_categories(categories: Vec<Category>) -> Result<Vec<Category>, CatalogError> {
    if let Some(c) = categories.iter().find(|c| c.category_id.trim().is_empty()) {
        return Err(CatalogError::Validation(format!(
            "category '{}' has an empty id",
            c.display_name
        )));
    }
    if let Some(dup) = first_duplicate(categories.iter().map(|c| c.category_id.as_str())) {
        return Err(CatalogError::Validation(format!(
            "duplicate category id '{}'",
            dup
        )));
    }
    Ok(categories)
}

fn validate_shows(shows: Vec<Show>) -> Result<Vec<Show>, CatalogError> {
    if let Some(dup) = first_duplicate(shows.iter().map(|s| s.show_id.as_str())) {
        return Err(CatalogError::Validation(format!("duplicate show id '{}'", dup)));
    }
    for show in &shows {
        if show.show_id.trim().is_empty() {
            return Err(CatalogError::Validation(format!(
                "show '{}' has an empty id",
                show.title
            )));
        }
        if let Some(dup) = first_duplicate(show.episodes.iter().map(|e| e.episode_id.as_str())) {
            return Err(CatalogError::Validation(format!(
                "duplicate episode id '{}' in show '{}'",
                dup, show.show_id
            )));
        }
    }
    Ok(shows)
}

/// Turn a fetch result into a value, substituting the scope's fallback on
/// failure.  Emits one diagnostic record per fetch.
fn settle<T>(
    scope: &str,
    url: &str,
    result: Result<Vec<T>, CatalogError>,
    fallback: impl FnOnce() -> Option<Vec<T>>,
) -> Fetched<T> {
    match result {
        Ok(items) => {
            info!(
                scope,
                url,
                outcome = "remote",
                fallback_used = false,
                count = items.len(),
                "catalog fetch"
            );
            Fetched {
                items,
                outcome: FetchOutcome::Remote,
                error: None,
            }
        }
        Err(e) => {
            let (items, outcome) = match fallback() {
                Some(items) => (items, FetchOutcome::Fallback),
                None => (Vec::new(), FetchOutcome::Empty),
            };
            let fallback_used = outcome == FetchOutcome::Fallback;
            warn!(
                scope,
                url,
                outcome = ?outcome,
                fallback_used,
                count = items.len(),
                error = %e,
                "catalog fetch failed"
            );
            Fetched {
                items,
                outcome,
                error: Some(e.to_string()),
            }
        }
    }
}
