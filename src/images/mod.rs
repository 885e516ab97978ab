//! Best-effort thumbnail downloads. Every failure ends in `None`; a row
//! without its image is still written.

pub mod convert;

use crate::config::ImageConfig;
use crate::utils::retry::RetryPolicy;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use self::convert::{classify, normalize};

const FALLBACK_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Source of embeddable thumbnail bytes.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Option<Vec<u8>>;
}

#[derive(Debug, Error)]
enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Request(e)
        }
    }
}

pub struct ImageFetcher {
    inner: reqwest::Client,
    user_agents: Vec<String>,
    policy: RetryPolicy,
}

impl ImageFetcher {
    pub fn new(config: &ImageConfig) -> Result<Self> {
        Self::build(config, Duration::from_secs(config.timeout_secs))
    }

    fn build(config: &ImageConfig, timeout: Duration) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            user_agents: config.user_agents.clone(),
            policy: RetryPolicy::new(config.max_attempts, Duration::ZERO),
        })
    }

    fn pick_user_agent(&self) -> &str {
        self.user_agents
            .choose(&mut rand::rng())
            .map(String::as_str)
            .unwrap_or(FALLBACK_USER_AGENT)
    }

    /// One GET, returning the body and its content type.
    async fn download(&self, url: &str) -> Result<(Vec<u8>, String), FetchError> {
        let ua = self.pick_user_agent();
        let resp = self
            .inner
            .get(url)
            .header(USER_AGENT, ua)
            .send()
            .await?
            .error_for_status()?;
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = resp.bytes().await?;
        Ok((bytes.to_vec(), content_type))
    }
}

#[async_trait]
impl ImageSource for ImageFetcher {
    async fn fetch(&self, url: &str) -> Option<Vec<u8>> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }

        let attempt = AtomicU32::new(0);
        let outcome = self
            .policy
            .run_if(
                || {
                    let n = attempt.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        self.download(url).await.inspect_err(|e| {
                            if matches!(e, FetchError::Timeout) {
                                warn!("Image request timed out (attempt {}): {}", n, url);
                            }
                        })
                    }
                },
                |e: &FetchError| matches!(e, FetchError::Timeout),
            )
            .await;

        let (bytes, content_type) = match outcome {
            Ok(v) => v,
            Err(FetchError::Timeout) => {
                warn!("Image still timing out after {} attempts: {}", self.policy.max_attempts, url);
                return None;
            }
            Err(e) => {
                warn!("Skipping image {}: {}", url, e);
                return None;
            }
        };

        let encoding = classify(url, &content_type);
        match normalize(bytes, encoding) {
            Ok(b) => {
                debug!("Image {} ({} bytes, {:?})", url, b.len(), encoding);
                Some(b)
            }
            Err(e) => {
                warn!("Skipping image {}: {}", url, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP server answering every request with `response`, or never
    /// answering when `response` is `None`. Returns base URL and hit counter.
    async fn serve(response: Option<Vec<u8>>) -> (String, Arc<AtomicU32>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { break };
                counter.fetch_add(1, Ordering::SeqCst);
                let response = response.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = sock.read(&mut buf).await;
                    match response {
                        Some(r) => {
                            let _ = sock.write_all(&r).await;
                            let _ = sock.shutdown().await;
                        }
                        None => tokio::time::sleep(Duration::from_secs(30)).await,
                    }
                });
            }
        });
        (format!("http://{addr}"), hits)
    }

    fn response(status: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
        let mut r = format!(
            "HTTP/1.1 {status}\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
            body.len()
        )
        .into_bytes();
        r.extend_from_slice(body);
        r
    }

    fn webp_bytes() -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(4, 4));
        let mut buf = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::WebP).unwrap();
        buf
    }

    fn fetcher(timeout: Duration) -> ImageFetcher {
        ImageFetcher::build(&ImageConfig::default(), timeout).unwrap()
    }

    #[tokio::test]
    async fn empty_url_is_absent() {
        assert!(fetcher(Duration::from_secs(1)).fetch("  ").await.is_none());
    }

    #[tokio::test]
    async fn webp_is_converted_to_png() {
        let (base, hits) = serve(Some(response("200 OK", "image/webp", &webp_bytes()))).await;
        let bytes = fetcher(Duration::from_secs(5)).fetch(&format!("{base}/a.jpg")).await.unwrap();
        assert!(bytes.starts_with(b"\x89PNG"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn http_error_is_not_retried() {
        let (base, hits) = serve(Some(response("404 Not Found", "text/html", b""))).await;
        assert!(fetcher(Duration::from_secs(5)).fetch(&format!("{base}/gone.jpg")).await.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeouts_are_retried_up_to_the_limit() {
        let (base, hits) = serve(None).await;
        let out = fetcher(Duration::from_millis(200)).fetch(&format!("{base}/slow.jpg")).await;
        assert!(out.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn undecodable_webp_is_absent() {
        let (base, _) = serve(Some(response("200 OK", "image/webp", b"garbage"))).await;
        assert!(fetcher(Duration::from_secs(5)).fetch(&format!("{base}/x.webp")).await.is_none());
    }
}
