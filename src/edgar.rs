//! Filing-registry client (SEC EDGAR layout).
//!
//! Compliance requirements:
//! - mandatory identification header `<application-name> <contact-email>`
//! - 10 requests per second, sliding window, shared process-wide
//! - exponential backoff on 429/403 starting at 2s, capped at 60s, up to
//!   5 attempts; 403 after the final retry is fatal

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex as SyncMutex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

const MAX_RETRIES: u32 = 5;
const BACKOFF_START: Duration = Duration::from_secs(2);
const BACKOFF_CAP: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CACHE_TTL: Duration = Duration::from_secs(3600);
const RATE_LIMIT_REQUESTS: usize = 10;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("rate limited by registry: {0}")]
    RateLimited(String),
    #[error("blocked by registry (403) after retries; check identification header: {0}")]
    Blocked(String),
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry returned {status} for {url}")]
    Status { status: u16, url: String },
    #[error("failed to parse registry response: {0}")]
    Parse(String),
}

/// One row of a company's filing list.
#[derive(Debug, Clone)]
pub struct FilingHeader {
    pub accession_number: String,
    pub form_type: String,
    /// YYYY-MM-DD.
    pub filing_date: String,
    pub primary_document: String,
    pub description: Option<String>,
    pub cik: String,
    pub company_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmissionsResponse {
    name: Option<String>,
    #[serde(default)]
    filings: SubmissionsFilings,
}

#[derive(Debug, Default, Deserialize)]
struct SubmissionsFilings {
    #[serde(default)]
    recent: RecentFilings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentFilings {
    #[serde(default)]
    accession_number: Vec<String>,
    #[serde(default)]
    form: Vec<String>,
    #[serde(default)]
    filing_date: Vec<String>,
    #[serde(default)]
    primary_document: Vec<String>,
    #[serde(default)]
    primary_doc_description: Vec<String>,
}

/// Rate-limited, caching registry client. All ingestion tasks share one
/// instance so the token bucket is truly process-wide.
pub struct EdgarClient {
    client: Client,
    base_url: String,
    user_agent: String,
    request_times: Mutex<VecDeque<Instant>>,
    cache: SyncMutex<HashMap<String, (String, Instant)>>,
}

impl EdgarClient {
    pub fn new(base_url: &str, app_name: &str, admin_email: &str) -> Result<Self, FetchError> {
        let user_agent = format!("{} {}", app_name, admin_email);
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent,
            request_times: Mutex::new(VecDeque::with_capacity(RATE_LIMIT_REQUESTS)),
            cache: SyncMutex::new(HashMap::new()),
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    fn absolute_url(&self, url: &str) -> String {
        if url.starts_with("http") {
            url.to_string()
        } else {
            format!("{}{}", self.base_url, url)
        }
    }

    /// Sliding-window rate limit: wait until a slot frees up.
    async fn wait_for_rate_limit(&self) {
        let mut times = self.request_times.lock().await;
        let now = Instant::now();
        while let Some(front) = times.front().copied() {
            if now.duration_since(front) >= RATE_LIMIT_WINDOW {
                times.pop_front();
            } else {
                break;
            }
        }
        if times.len() >= RATE_LIMIT_REQUESTS {
            if let Some(front) = times.front().copied() {
                let wait = RATE_LIMIT_WINDOW.saturating_sub(front.elapsed());
                if !wait.is_zero() {
                    debug!("rate limiting: waiting {}ms", wait.as_millis());
                    sleep(wait).await;
                }
                times.pop_front();
            }
        }
        times.push_back(Instant::now());
    }

    fn cached(&self, url: &str) -> Option<String> {
        let mut cache = self.cache.lock();
        if let Some((content, at)) = cache.get(url) {
            if at.elapsed() < CACHE_TTL {
                return Some(content.clone());
            }
            cache.remove(url);
        }
        None
    }

    fn store_cache(&self, url: &str, content: &str) {
        self.cache
            .lock()
            .insert(url.to_string(), (content.to_string(), Instant::now()));
    }

    /// Fetch a URL with rate limiting, caching and backoff.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let url = self.absolute_url(url);

        if let Some(content) = self.cached(&url) {
            return Ok(content);
        }

        let mut backoff = BACKOFF_START;
        for attempt in 1..=MAX_RETRIES {
            self.wait_for_rate_limit().await;

            match self.client.get(&url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let content = response.text().await?;
                        self.store_cache(&url, &content);
                        return Ok(content);
                    }
                    match status {
                        StatusCode::TOO_MANY_REQUESTS => {
                            warn!(attempt, url = %url, "rate limited (429), backing off {}s", backoff.as_secs());
                        }
                        StatusCode::FORBIDDEN => {
                            if attempt == MAX_RETRIES {
                                return Err(FetchError::Blocked(self.user_agent.clone()));
                            }
                            warn!(attempt, url = %url, "blocked (403), backing off {}s", backoff.as_secs());
                        }
                        StatusCode::NOT_FOUND => {
                            return Err(FetchError::NotFound(url));
                        }
                        s if s.is_server_error() => {
                            warn!(attempt, url = %url, status = s.as_u16(), "server error, backing off");
                        }
                        s => {
                            return Err(FetchError::Status {
                                status: s.as_u16(),
                                url,
                            });
                        }
                    }
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    warn!(attempt, url = %url, error = %e, "transient error, backing off");
                    if attempt == MAX_RETRIES {
                        return Err(e.into());
                    }
                }
                Err(e) => return Err(e.into()),
            }

            sleep(backoff).await;
            backoff = (backoff * 2).min(BACKOFF_CAP);
        }

        Err(FetchError::RateLimited(url))
    }

    /// List a company's filings from the submissions endpoint, filtered by
    /// form types and an optional date range.
    pub async fn list_filings(
        &self,
        cik: &str,
        form_types: &[String],
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<Vec<FilingHeader>, FetchError> {
        let url = format!(
            "https://data.sec.gov/submissions/CIK{}.json",
            pad_cik(cik)
        );
        let content = self.fetch(&url).await?;
        let parsed: SubmissionsResponse = serde_json::from_str(&content)
            .map_err(|e| FetchError::Parse(format!("{}: {}", url, e)))?;

        let recent = parsed.filings.recent;
        let mut headers = Vec::new();
        for i in 0..recent.accession_number.len() {
            let form = recent.form.get(i).cloned().unwrap_or_default();
            if !form_types.is_empty() && !form_types.contains(&form) {
                continue;
            }
            let date = recent.filing_date.get(i).cloned().unwrap_or_default();
            if let Some(start) = start_date {
                if date.as_str() < start {
                    continue;
                }
            }
            if let Some(end) = end_date {
                if date.as_str() > end {
                    continue;
                }
            }
            headers.push(FilingHeader {
                accession_number: recent.accession_number[i].clone(),
                form_type: form,
                filing_date: date,
                primary_document: recent.primary_document.get(i).cloned().unwrap_or_default(),
                description: recent.primary_doc_description.get(i).cloned(),
                cik: cik.to_string(),
                company_name: parsed.name.clone(),
            });
        }
        Ok(headers)
    }

    /// Fetch the filing index page listing a filing's documents.
    pub async fn fetch_filing_index(
        &self,
        cik: &str,
        accession: &str,
    ) -> Result<String, FetchError> {
        let url = format!(
            "/Archives/edgar/data/{}/{}/{}-index.htm",
            pad_cik(cik),
            strip_accession(accession),
            accession
        );
        self.fetch(&url).await
    }

    /// Fetch a specific document from a filing.
    pub async fn fetch_document(
        &self,
        cik: &str,
        accession: &str,
        document_name: &str,
    ) -> Result<String, FetchError> {
        let url = format!(
            "/Archives/edgar/data/{}/{}/{}",
            pad_cik(cik),
            strip_accession(accession),
            document_name
        );
        self.fetch(&url).await
    }
}

fn pad_cik(cik: &str) -> String {
    format!("{:0>10}", cik.trim())
}

fn strip_accession(accession: &str) -> String {
    accession.replace('-', "")
}
