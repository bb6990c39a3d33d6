use image::DynamicImage;
use std::future::Future;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },
    #[error("failed to decode image from {url}: {message}")]
    Decode { url: String, message: String },
}

pub type FetchFuture = Pin<Box<dyn Future<Output = Result<DynamicImage, LoadError>> + Send>>;

/// Resolves an image URL to a decoded bitmap. The pipeline is generic over
/// this so batches can run against an in-memory source in tests.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> FetchFuture;
}

/// HTTP loader with the fixed two-attempt policy: first through the
/// pixel-clean proxy (when configured), then directly with a cache-busting
/// query parameter. Never more than two attempts per image.
#[derive(Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
    proxy: Option<String>,
}

impl HttpFetcher {
    pub fn new(proxy: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            proxy,
        }
    }

    fn first_attempt_url(&self, url: &str) -> String {
        match &self.proxy {
            Some(proxy) => format!("{}?url={}", proxy, urlencoding::encode(url)),
            None => url.to_string(),
        }
    }
}

impl ImageFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> FetchFuture {
        let http = self.http.clone();
        let first_url = self.first_attempt_url(url);
        let url = url.to_string();
        Box::pin(async move {
            match attempt(&http, &first_url).await {
                Ok(bitmap) => Ok(bitmap),
                Err(first_err) => {
                    debug!("first image fetch failed ({}), retrying direct", first_err);
                    let retry_url = cache_busted(&url);
                    attempt(&http, &retry_url).await
                }
            }
        })
    }
}

async fn attempt(http: &reqwest::Client, url: &str) -> Result<DynamicImage, LoadError> {
    let bytes = http
        .get(url)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|err| LoadError::Network {
            url: url.to_string(),
            message: err.to_string(),
        })?
        .bytes()
        .await
        .map_err(|err| LoadError::Network {
            url: url.to_string(),
            message: err.to_string(),
        })?;

    image::load_from_memory(&bytes).map_err(|err| LoadError::Decode {
        url: url.to_string(),
        message: err.to_string(),
    })
}

fn cache_busted(url: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0);
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}t={}", url, separator, millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_buster_uses_query_separator() {
        let busted = cache_busted("https://cdn.example/cat.png");
        assert!(busted.starts_with("https://cdn.example/cat.png?t="));

        let busted = cache_busted("https://cdn.example/cat.png?v=2");
        assert!(busted.starts_with("https://cdn.example/cat.png?v=2&t="));
    }

    #[test]
    fn proxy_wraps_first_attempt_only() {
        let fetcher = HttpFetcher::new(Some("https://api.kidscolor.app/api/proxy".to_string()));
        assert_eq!(
            fetcher.first_attempt_url("https://cdn.example/a b.png"),
            "https://api.kidscolor.app/api/proxy?url=https%3A%2F%2Fcdn.example%2Fa%20b.png"
        );

        let direct = HttpFetcher::new(None);
        assert_eq!(
            direct.first_attempt_url("https://cdn.example/cat.png"),
            "https://cdn.example/cat.png"
        );
    }
}
