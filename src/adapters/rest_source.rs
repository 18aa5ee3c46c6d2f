use crate::adapters::record_from_content;
use crate::config::connector::{
    ConnectorConfig, DEFAULT_CONCURRENT_REQUESTS, DEFAULT_PAGE_LENGTH, DEFAULT_TIMEOUT_SECONDS,
    INPUT_COLLECTION, INPUT_CONCURRENT_REQUESTS, INPUT_PAGE_LENGTH, INPUT_PASSWORD,
    INPUT_TIMEOUT_SECONDS, INPUT_USERNAME,
};
use crate::domain::model::{DocumentRecord, DocumentUri};
use crate::domain::ports::DocumentSource;
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct RestSourceOptions {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub collection: Option<String>,
    pub page_length: usize,
    pub concurrent_requests: usize,
    pub timeout: Duration,
}

impl RestSourceOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            username: None,
            password: None,
            collection: None,
            page_length: DEFAULT_PAGE_LENGTH,
            concurrent_requests: DEFAULT_CONCURRENT_REQUESTS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        }
    }

    pub fn from_config(config: &ConnectorConfig) -> Result<Self> {
        let non_empty = |key: &str| {
            config
                .get(key)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Ok(Self {
            base_url: config.rest_base_url()?,
            username: non_empty(INPUT_USERNAME),
            password: config.get(INPUT_PASSWORD).map(str::to_string),
            collection: non_empty(INPUT_COLLECTION),
            page_length: config.get_parsed(INPUT_PAGE_LENGTH, DEFAULT_PAGE_LENGTH)?,
            concurrent_requests: config
                .get_parsed(INPUT_CONCURRENT_REQUESTS, DEFAULT_CONCURRENT_REQUESTS)?,
            timeout: Duration::from_secs(
                config.get_parsed(INPUT_TIMEOUT_SECONDS, DEFAULT_TIMEOUT_SECONDS)?,
            ),
        })
    }
}

/// Reads documents through the database's REST API: `/v1/search` pages
/// through the matching URIs and `/v1/documents` fetches each one.
pub struct RestSource {
    client: Client,
    options: RestSourceOptions,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    uri: String,
    #[serde(default)]
    format: Option<String>,
}

impl RestSource {
    pub fn new(options: RestSourceOptions) -> Result<Self> {
        let client = Client::builder().timeout(options.timeout).build()?;
        Ok(Self { client, options })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.options.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.options.username {
            Some(username) => request.basic_auth(username, self.options.password.as_deref()),
            None => request,
        }
    }

    async fn list_documents(&self) -> Result<Vec<SearchHit>> {
        let page_length = self.options.page_length.max(1);
        let mut hits = Vec::new();
        let mut start: u64 = 1;

        loop {
            let mut query = vec![
                ("format", "json".to_string()),
                ("start", start.to_string()),
                ("pageLength", page_length.to_string()),
            ];
            if let Some(collection) = &self.options.collection {
                query.push(("collection", collection.clone()));
            }

            let request = self.client.get(self.endpoint("/v1/search")).query(&query);
            let response = self.authorize(request).send().await?.error_for_status()?;
            let body = response.bytes().await?;
            let page: SearchResponse = serde_json::from_slice(&body)?;

            let fetched = page.results.len();
            tracing::debug!("Search page at {} returned {} of {} URIs", start, fetched, page.total);
            hits.extend(page.results);

            if fetched == 0 || hits.len() as u64 >= page.total {
                break;
            }
            start += fetched as u64;
        }

        Ok(hits)
    }
}

async fn fetch_document(request: RequestBuilder, hit: SearchHit) -> Result<DocumentRecord> {
    let response = request.send().await?.error_for_status()?;

    let is_xml = match hit.format.as_deref() {
        Some(format) => format.eq_ignore_ascii_case("xml"),
        None => response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |ct| ct.contains("xml")),
    };
    let body = response.bytes().await?;

    Ok(record_from_content(DocumentUri::new(hit.uri), body.to_vec(), is_xml))
}

#[async_trait]
impl DocumentSource for RestSource {
    async fn read_documents(&self) -> Result<Vec<DocumentRecord>> {
        let hits = self.list_documents().await?;
        tracing::info!("📡 {} documents to fetch from {}", hits.len(), self.options.base_url);

        let semaphore = Arc::new(Semaphore::new(self.options.concurrent_requests.max(1)));
        let mut tasks = JoinSet::new();

        for (index, hit) in hits.into_iter().enumerate() {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| EtlError::SourceError {
                    message: format!("fetch limiter closed: {}", e),
                })?;
            let request = self.authorize(
                self.client
                    .get(self.endpoint("/v1/documents"))
                    .query(&[("uri", hit.uri.as_str())]),
            );

            tasks.spawn(async move {
                let result = fetch_document(request, hit).await;
                drop(permit);
                (index, result)
            });
        }

        let mut fetched = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = joined.map_err(|e| EtlError::SourceError {
                message: format!("document fetch task failed: {}", e),
            })?;
            fetched.push((index, result?));
        }
        fetched.sort_by_key(|(index, _)| *index);

        Ok(fetched.into_iter().map(|(_, record)| record).collect())
    }

    fn describe(&self) -> String {
        format!("REST endpoint {}", self.options.base_url)
    }
}
