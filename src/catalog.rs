//! Category page fetching and product extraction.
//!
//! Products are located structurally: every element matching the name
//! selector is walked upward to its nearest container element, and the
//! remaining fields are read from inside that container.
use futures::stream::{self, StreamExt};
use reqwest::{Client, Url};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config;
use crate::model::ProductRecord;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid category url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

/// Extraction heuristics, taken from the scraper config.
#[derive(Debug, Clone)]
pub struct ExtractRules {
    name: Selector,
    anchor: Selector,
    image: Selector,
    container_tag: String,
    currency_marker: String,
    max_per_category: usize,
}

impl ExtractRules {
    pub fn new(
        name_selector: &str,
        container_tag: &str,
        currency_marker: &str,
        max_per_category: usize,
    ) -> Option<Self> {
        Some(Self {
            name: Selector::parse(name_selector).ok()?,
            anchor: Selector::parse("a[href]").ok()?,
            image: Selector::parse("img[src]").ok()?,
            container_tag: container_tag.to_ascii_lowercase(),
            currency_marker: currency_marker.to_string(),
            max_per_category,
        })
    }

    pub fn from_config(cfg: &config::Scraper) -> Option<Self> {
        Self::new(
            &cfg.name_selector,
            &cfg.container_tag,
            &cfg.currency_marker,
            cfg.max_products_per_category,
        )
    }
}

/// Result of fetching one category.
#[derive(Debug)]
pub struct CategoryResult {
    pub category: String,
    pub outcome: Result<Vec<ProductRecord>, FetchError>,
}

#[derive(Clone)]
pub struct CatalogFetcher {
    http: Client,
    rules: ExtractRules,
}

impl CatalogFetcher {
    pub fn new(
        rules: ExtractRules,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { http, rules })
    }

    pub fn from_config(cfg: &config::Scraper) -> anyhow::Result<Self> {
        let rules = ExtractRules::from_config(cfg)
            .ok_or_else(|| anyhow::anyhow!("invalid name selector {:?}", cfg.name_selector))?;
        Ok(Self::new(
            rules,
            &cfg.user_agent,
            Duration::from_secs(cfg.timeout_secs),
        )?)
    }

    async fn fetch_html(&self, url: &Url) -> Result<String, FetchError> {
        let http_err = |source| FetchError::Http {
            url: url.to_string(),
            source,
        };
        let res = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(http_err)?;
        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        res.text().await.map_err(http_err)
    }

    /// Fetch one category page and extract its products, capped at the
    /// configured maximum.
    pub async fn fetch(&self, category: &str, url: &str) -> Result<Vec<ProductRecord>, FetchError> {
        let page = Url::parse(url).map_err(|source| FetchError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let html = self.fetch_html(&page).await?;
        Ok(parse_products(&html, category, &page, &self.rules))
    }

    /// Fetch every category with at most `concurrency` requests in flight.
    /// Results come back in input order; failures stay per category.
    #[instrument(skip_all, fields(categories = categories.len()))]
    pub async fn fetch_all(
        &self,
        categories: &[(String, String)],
        concurrency: usize,
    ) -> Vec<CategoryResult> {
        stream::iter(categories.iter())
            .map(|(category, url)| async move {
                info!(%category, %url, "scanning category");
                let outcome = self.fetch(category, url).await;
                match &outcome {
                    Ok(products) => info!(%category, count = products.len(), "category scanned"),
                    Err(err) => warn!(%category, %err, "category fetch failed"),
                }
                CategoryResult {
                    category: category.clone(),
                    outcome,
                }
            })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}

/// Extract products from a category page. Missing fields become empty strings.
pub fn parse_products(
    html: &str,
    category: &str,
    page: &Url,
    rules: &ExtractRules,
) -> Vec<ProductRecord> {
    let document = Html::parse_document(html);

    let mut products = Vec::new();
    for name_el in document.select(&rules.name) {
        if rules.max_per_category > 0 && products.len() >= rules.max_per_category {
            break;
        }
        let Some(container) = enclosing(name_el, &rules.container_tag) else {
            continue;
        };

        let name = name_el.text().collect::<String>().trim().to_string();
        let price = container
            .text()
            .map(str::trim)
            .find(|t| !t.is_empty() && t.contains(rules.currency_marker.as_str()))
            .unwrap_or_default()
            .to_string();
        let link = container
            .select(&rules.anchor)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(|href| absolutize(page, href))
            .unwrap_or_default();
        let image = container
            .select(&rules.image)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(|src| absolutize(page, src))
            .unwrap_or_default();

        products.push(ProductRecord {
            category: category.to_string(),
            name,
            price,
            link,
            image,
        });
    }
    products
}

/// Nearest element named `tag`, starting at `el` itself.
fn enclosing<'a>(el: ElementRef<'a>, tag: &str) -> Option<ElementRef<'a>> {
    if el.value().name().eq_ignore_ascii_case(tag) {
        return Some(el);
    }
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name().eq_ignore_ascii_case(tag))
}

/// Site-relative references (`/path`) are joined onto the page origin;
/// anything else is kept verbatim.
fn absolutize(page: &Url, href: &str) -> String {
    let href = href.trim();
    if href.starts_with('/') {
        if let Ok(abs) = page.join(href) {
            return abs.to_string();
        }
    }
    href.to_string()
}
