//! `reqwest`-backed `ScaleApi`.

use std::time::Duration;

use async_trait::async_trait;
use bascula_traits::endpoints::{
    CALIBRATE_PATH, HEALTH_PATH, READ_PATH, STATUS_PATH, TARE_PATH, join,
};
use bascula_traits::{BoxError, HttpReply, ScaleApi};

use crate::error::{HttpError, Result};

/// HTTP client for the scale backend. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HttpScaleApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpScaleApi {
    /// `base_url` is the backend root, e.g. `http://127.0.0.1:8081`.
    /// `timeout` bounds connect and the whole exchange.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();
        reqwest::Url::parse(&base_url).map_err(|e| HttpError::InvalidUrl(format!("{base_url}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn finish(&self, req: reqwest::RequestBuilder) -> Result<HttpReply> {
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        tracing::trace!(status, len = body.len(), "http reply");
        Ok(HttpReply { status, body })
    }

    async fn get(&self, path: &str) -> Result<HttpReply> {
        self.finish(self.client.get(join(&self.base_url, path))).await
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<HttpReply> {
        self.finish(self.client.post(join(&self.base_url, path)).json(&body))
            .await
    }
}

#[async_trait]
impl ScaleApi for HttpScaleApi {
    async fn read(&self) -> std::result::Result<HttpReply, BoxError> {
        Ok(self.get(READ_PATH).await?)
    }

    async fn status(&self) -> std::result::Result<HttpReply, BoxError> {
        Ok(self.get(STATUS_PATH).await?)
    }

    async fn tare(&self) -> std::result::Result<HttpReply, BoxError> {
        Ok(self.post(TARE_PATH, serde_json::json!({})).await?)
    }

    async fn calibrate(&self, known_grams: f64) -> std::result::Result<HttpReply, BoxError> {
        Ok(self
            .post(CALIBRATE_PATH, serde_json::json!({ "known_grams": known_grams }))
            .await?)
    }

    async fn health(&self) -> std::result::Result<HttpReply, BoxError> {
        Ok(self.get(HEALTH_PATH).await?)
    }
}
