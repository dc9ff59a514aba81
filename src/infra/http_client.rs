use crate::error::FetchFailure;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

/// Network seam for the adapters; a single attempt per call, no retry.
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpGetResult, FetchFailure>;
}

#[derive(Clone, Debug, Default)]
pub struct HttpGetResult {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl HttpGetResult {
    pub fn ok(bytes: impl Into<Vec<u8>>, content_type: &str) -> Self {
        Self {
            status: 200,
            bytes: bytes.into(),
            content_type: content_type.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    /// Turn a non-2xx response into a network failure.
    pub fn ensure_success(self) -> Result<Self, FetchFailure> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(FetchFailure::Network(format!("HTTP {}", self.status)))
        }
    }
}

pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClientPort for ReqwestHttp {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpGetResult, FetchFailure> {
        let resp = self.client.get(url).timeout(timeout).send().await?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = resp.bytes().await?.to_vec();
        Ok(HttpGetResult {
            status,
            bytes,
            content_type,
        })
    }
}
