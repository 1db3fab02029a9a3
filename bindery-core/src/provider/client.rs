//! HTTP client for the upstream book provider.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{safe_filename, BookMetadata, BookProvider, FetchedBook, ProgressFn};
use crate::error::FetchError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Progress band the streamed download maps into; the surrounding pipeline
/// owns the budget outside it.
const FETCH_PROGRESS_START: u8 = 20;
const FETCH_PROGRESS_END: u8 = 70;

/// Session cookie as persisted by the browser-export tooling.
#[derive(Debug, Deserialize)]
struct CookieEntry {
    name: String,
    value: String,
}

pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    cookie_header: Option<String>,
}

impl ProviderClient {
    /// Build the client. A missing or unreadable cookie file is tolerated
    /// here; the upstream will answer 401 and that surfaces as a typed auth
    /// error at request time.
    pub fn new(base_url: impl Into<String>, cookies_path: &Path) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let cookie_header = match load_cookie_header(cookies_path) {
            Ok(header) => Some(header),
            Err(err) => {
                warn!(path = %cookies_path.display(), error = %err, "no session cookies loaded");
                None
            }
        };

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cookie_header,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.http.get(url);
        if let Some(header) = &self.cookie_header {
            request = request.header(reqwest::header::COOKIE, header);
        }
        request
    }

    fn classify_status(status: StatusCode) -> Option<FetchError> {
        match status {
            StatusCode::NOT_FOUND => Some(FetchError::NotFound {
                status: status.as_u16(),
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(FetchError::Auth {
                status: status.as_u16(),
            }),
            s if !s.is_success() => Some(FetchError::Protocol(format!("status {s}"))),
            _ => None,
        }
    }

    fn map_reqwest(err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Http(err)
        }
    }
}

#[async_trait]
impl BookProvider for ProviderClient {
    async fn metadata(&self, book_id: &str) -> Result<BookMetadata, FetchError> {
        let url = format!("{}/api/v1/book/{book_id}/", self.base_url);
        debug!(%url, "fetching book metadata");

        let response = self.get(&url).send().await.map_err(Self::map_reqwest)?;
        if let Some(err) = Self::classify_status(response.status()) {
            return Err(err);
        }

        response
            .json::<BookMetadata>()
            .await
            .map_err(|e| FetchError::Protocol(format!("invalid metadata payload: {e}")))
    }

    async fn fetch(
        &self,
        book_id: &str,
        dest_root: &Path,
        progress: &ProgressFn,
    ) -> Result<FetchedBook, FetchError> {
        progress(FETCH_PROGRESS_START, "Downloading book content...");

        let meta = self.metadata(book_id).await?;
        let title = if meta.title.is_empty() {
            book_id.to_string()
        } else {
            meta.title.clone()
        };

        let dir_name = safe_filename(&title);
        let book_dir = dest_root.join(&dir_name);
        fs::create_dir_all(&book_dir).await?;
        let dest_path = book_dir.join(format!("{dir_name}.epub"));

        let url = format!("{}/api/v1/book/{book_id}/export/", self.base_url);
        debug!(%url, dest = %dest_path.display(), "streaming book export");

        let response = self.get(&url).send().await.map_err(Self::map_reqwest)?;
        if let Some(err) = Self::classify_status(response.status()) {
            return Err(err);
        }

        let total = response.content_length();
        let mut file = fs::File::create(&dest_path).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let mut last_reported = FETCH_PROGRESS_START;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(Self::map_reqwest)?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if let Some(total) = total.filter(|t| *t > 0) {
                let span = (FETCH_PROGRESS_END - FETCH_PROGRESS_START) as u64;
                let pct = FETCH_PROGRESS_START + ((written * span) / total) as u8;
                if pct > last_reported {
                    last_reported = pct;
                    progress(pct.min(FETCH_PROGRESS_END), "Downloading book content...");
                }
            }
        }
        file.flush().await?;

        if written == 0 {
            return Err(FetchError::Protocol("empty export payload".to_string()));
        }

        info!(book_id, bytes = written, "book export downloaded");
        progress(FETCH_PROGRESS_END, "Download complete, preparing conversion...");

        Ok(FetchedBook {
            path: dest_path,
            title,
        })
    }
}

fn load_cookie_header(path: &Path) -> Result<String, FetchError> {
    let raw = std::fs::read_to_string(path)?;
    let entries: Vec<CookieEntry> = serde_json::from_str(&raw)
        .map_err(|e| FetchError::Protocol(format!("invalid cookie file: {e}")))?;
    if entries.is_empty() {
        return Err(FetchError::Protocol("cookie file is empty".to_string()));
    }
    Ok(entries
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; "))
}
