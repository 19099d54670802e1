//! Quota lookups over HTTP/JSON.

use super::{PluginError, PluginOptions};
use crate::Result;
use crate::limiter::{LimitOptions, Limiter, RateLimiter, TrafficLimiter};
use async_trait::async_trait;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct LimitRequest<'a> {
    network: &'a str,
    addr: &'a str,
    client: &'a str,
    src: &'a str,
}

impl<'a> From<&'a LimitOptions> for LimitRequest<'a> {
    fn from(options: &'a LimitOptions) -> Self {
        Self {
            network: &options.network,
            addr: &options.addr,
            client: &options.client,
            src: &options.src,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct LimitResponse {
    #[serde(default, rename = "in")]
    input: i64,
    #[serde(default, rename = "out")]
    output: i64,
}

/// Traffic limiter asking an HTTP endpoint for rates
///
/// Every lookup POSTs `{"network","addr","client","src"}` and expects
/// `{"in": <bytes/s>, "out": <bytes/s>}` back with status 200.
#[derive(Debug)]
pub struct HttpTrafficLimiter {
    name: String,
    url: String,
    headers: HeaderMap,
    client: RwLock<Option<reqwest::Client>>,
}

impl HttpTrafficLimiter {
    pub fn new(name: impl Into<String>, url: impl Into<String>, options: PluginOptions) -> Self {
        let name = name.into();
        let url = url.into();

        let mut headers = HeaderMap::new();
        for (key, value) in &options.headers {
            match (
                HeaderName::try_from(key.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(key), Ok(value)) => {
                    headers.insert(key, value);
                }
                _ => warn!(plugin = %name, header = %key, "Skipping invalid plugin header"),
            }
        }
        if let Some(token) = &options.token {
            match HeaderValue::try_from(format!("Bearer {token}")) {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                }
                Err(_) => warn!(plugin = %name, "Skipping invalid plugin token"),
            }
        }

        let client = match reqwest::Client::builder().timeout(options.timeout).build() {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(plugin = %name, error = %e, "Failed to build HTTP client");
                None
            }
        };

        Self {
            name,
            url,
            headers,
            client: RwLock::new(client),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn limit(&self, options: &LimitOptions) -> std::result::Result<LimitResponse, PluginError> {
        let client = self
            .client
            .read()
            .await
            .clone()
            .ok_or(PluginError::Unavailable)?;

        let mut headers = self.headers.clone();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let response = client
            .post(&self.url)
            .headers(headers)
            .json(&LimitRequest::from(options))
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(PluginError::Status(response.status().as_u16()));
        }
        Ok(response.json::<LimitResponse>().await?)
    }

    async fn lookup(&self, direction: &'static str, key: &str, options: &LimitOptions) -> Option<LimitResponse> {
        match self.limit(options).await {
            Ok(response) => {
                debug!(plugin = %self.name, direction, key, input = response.input, output = response.output, "Quota received");
                Some(response)
            }
            Err(e) => {
                warn!(plugin = %self.name, direction, key, error = %e, "Quota lookup failed");
                None
            }
        }
    }
}

#[async_trait]
impl TrafficLimiter for HttpTrafficLimiter {
    async fn input(&self, key: &str, options: &LimitOptions) -> Option<Box<dyn Limiter>> {
        let response = self.lookup("input", key, options).await?;
        RateLimiter::for_rate(response.input)
    }

    async fn output(&self, key: &str, options: &LimitOptions) -> Option<Box<dyn Limiter>> {
        let response = self.lookup("output", key, options).await?;
        RateLimiter::for_rate(response.output)
    }

    async fn close(&self) -> Result<()> {
        self.client.write().await.take();
        Ok(())
    }
}
