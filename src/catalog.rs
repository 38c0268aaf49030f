use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tempfile::Builder;

use crate::config::ResolvedConfig;
use crate::error::CantoError;

/// Remote side of the system: the paginated query API and the asset transfer
/// primitive. `retrieve_asset` must leave `destination` either complete or absent.
pub trait CatalogClient: Send + Sync {
    fn fetch_page(&self, query: &str, page: u64) -> Result<Value, CantoError>;
    fn retrieve_asset(&self, url: &str, destination: &Path) -> Result<(), CantoError>;
}

#[derive(Clone)]
pub struct HttpCatalogClient {
    client: Client,
    base_url: String,
    asset_retries: usize,
}

impl HttpCatalogClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, CantoError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|err| CantoError::CatalogHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|err| CantoError::CatalogHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.api_base_url.clone(),
            asset_retries: config.asset_retries,
        })
    }

    /// `query` is already percent-encoded where it matters (spaces); it is
    /// spliced verbatim so colons and quotes reach the catalog untouched.
    pub fn page_url(&self, query: &str, page: u64) -> String {
        format!("{}/recordings?query={query}&page={page}", self.base_url)
    }

    fn handle_status(response: Response) -> Result<Response, CantoError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "catalog request failed".to_string());
        Err(CantoError::CatalogStatus { status, message })
    }

    fn send_with_retries<F>(&self, url: &str, mut make_req: F) -> Result<Response, CantoError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const BASE_DELAY_MS: u64 = 250;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < self.asset_retries && is_retryable_status(status) {
                        attempt += 1;
                        tracing::debug!(url, status, attempt, "retrying asset request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * attempt as u64));
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < self.asset_retries && is_retryable_error(&err) {
                        attempt += 1;
                        tracing::debug!(url, attempt, error = %err, "retrying asset request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * attempt as u64));
                        continue;
                    }
                    return Err(CantoError::AssetTransfer {
                        url: url.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
    }
}

impl CatalogClient for HttpCatalogClient {
    fn fetch_page(&self, query: &str, page: u64) -> Result<Value, CantoError> {
        let url = self.page_url(query, page);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| CantoError::CatalogHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| CantoError::CatalogHttp(err.to_string()))
    }

    fn retrieve_asset(&self, url: &str, destination: &Path) -> Result<(), CantoError> {
        let transfer_err = |message: String| CantoError::AssetTransfer {
            url: url.to_string(),
            message,
        };
        let response = self.send_with_retries(url, || self.client.get(url))?;
        let mut response = match Self::handle_status(response) {
            Ok(response) => response,
            Err(CantoError::CatalogStatus { status, .. }) => {
                return Err(transfer_err(format!("status {status}")));
            }
            Err(err) => return Err(err),
        };

        let parent = destination
            .parent()
            .ok_or_else(|| transfer_err("destination has no parent".to_string()))?;
        fs::create_dir_all(parent).map_err(|err| CantoError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".canto-")
            .suffix(".part")
            .tempfile_in(parent)
            .map_err(|err| CantoError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, temp.as_file_mut()).map_err(|err| transfer_err(err.to_string()))?;
        temp.as_file()
            .sync_all()
            .map_err(|err| CantoError::Filesystem(err.to_string()))?;
        temp.persist(destination)
            .map_err(|err| CantoError::Filesystem(err.error.to_string()))?;
        Ok(())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConfigLoader};

    #[test]
    fn page_url_keeps_filter_structure() {
        let config = ConfigLoader::resolve_config(Config::default());
        let client = HttpCatalogClient::new(&config).unwrap();
        let url = client.page_url("cnt:\"United%20States\"%20en:Robin", 2);
        assert_eq!(
            url,
            "https://xeno-canto.org/api/2/recordings?query=cnt:\"United%20States\"%20en:Robin&page=2"
        );
    }

    #[test]
    fn retry_policy() {
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
    }
}
