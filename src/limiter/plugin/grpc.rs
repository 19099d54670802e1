//! Quota lookups over gRPC.
//!
//! The authority exposes a single unary method, `/proto.Limiter/Limit`.
//! Messages are declared by hand with `prost` derives so no build script is
//! needed.

use super::{PluginError, PluginOptions};
use crate::Result;
use crate::limiter::{LimitOptions, Limiter, RateLimiter, TrafficLimiter};
use async_trait::async_trait;
use http::uri::PathAndQuery;
use std::sync::Arc;
use tokio::sync::RwLock;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::metadata::{Ascii, MetadataKey, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, warn};

const LIMIT_PATH: &str = "/proto.Limiter/Limit";

#[derive(Clone, PartialEq, prost::Message)]
pub struct LimitRequest {
    #[prost(string, tag = "1")]
    pub network: String,
    #[prost(string, tag = "2")]
    pub addr: String,
    #[prost(string, tag = "3")]
    pub client: String,
    #[prost(string, tag = "4")]
    pub src: String,
}

impl From<&LimitOptions> for LimitRequest {
    fn from(options: &LimitOptions) -> Self {
        Self {
            network: options.network.clone(),
            addr: options.addr.clone(),
            client: options.client.clone(),
            src: options.src.clone(),
        }
    }
}

/// Rates in bytes per second; zero or negative means unlimited
#[derive(Clone, PartialEq, prost::Message)]
pub struct LimitResponse {
    #[prost(int64, tag = "1")]
    pub input: i64,
    #[prost(int64, tag = "2")]
    pub output: i64,
}

/// Transport for the `Limit` call
#[async_trait]
pub trait LimitService: Send + Sync {
    async fn limit(&self, request: LimitRequest) -> std::result::Result<LimitResponse, PluginError>;
}

/// tonic client over a lazily connected channel
#[derive(Debug, Clone)]
pub struct GrpcLimitClient {
    inner: Grpc<Channel>,
    token: Option<MetadataValue<Ascii>>,
    metadata: Vec<(MetadataKey<Ascii>, MetadataValue<Ascii>)>,
}

impl GrpcLimitClient {
    /// Prepares a channel to `addr`; no connection is made until the first call
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(addr: &str, options: &PluginOptions) -> std::result::Result<Self, PluginError> {
        let uri = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };
        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| PluginError::InvalidEndpoint(format!("{addr}: {e}")))?
            .timeout(options.timeout)
            .connect_timeout(options.timeout);

        let token = options
            .token
            .as_deref()
            .map(str::parse::<MetadataValue<Ascii>>)
            .transpose()
            .map_err(|e| PluginError::InvalidEndpoint(format!("token: {e}")))?;

        Ok(Self {
            inner: Grpc::new(endpoint.connect_lazy()),
            token,
            metadata: request_metadata(options),
        })
    }
}

/// Extra headers as ASCII metadata; entries that are not valid metadata are skipped
fn request_metadata(options: &PluginOptions) -> Vec<(MetadataKey<Ascii>, MetadataValue<Ascii>)> {
    let mut metadata = Vec::with_capacity(options.headers.len());
    for (name, value) in &options.headers {
        let key = MetadataKey::<Ascii>::from_bytes(name.to_ascii_lowercase().as_bytes());
        match (key, value.parse::<MetadataValue<Ascii>>()) {
            (Ok(key), Ok(value)) => metadata.push((key, value)),
            _ => warn!(header = %name, "Skipping invalid gRPC metadata header"),
        }
    }
    metadata
}

#[async_trait]
impl LimitService for GrpcLimitClient {
    async fn limit(&self, request: LimitRequest) -> std::result::Result<LimitResponse, PluginError> {
        let mut grpc = self.inner.clone();
        grpc.ready()
            .await
            .map_err(|e| PluginError::Transport(e.to_string()))?;

        let mut request = tonic::Request::new(request);
        for (key, value) in &self.metadata {
            request.metadata_mut().insert(key.clone(), value.clone());
        }
        if let Some(token) = &self.token {
            request.metadata_mut().insert("token", token.clone());
        }

        let codec = ProstCodec::<LimitRequest, LimitResponse>::default();
        let response = grpc
            .unary(request, PathAndQuery::from_static(LIMIT_PATH), codec)
            .await?;
        Ok(response.into_inner())
    }
}

/// Traffic limiter asking a gRPC authority for rates
pub struct GrpcTrafficLimiter<C = GrpcLimitClient> {
    name: String,
    client: RwLock<Option<Arc<C>>>,
}

impl GrpcTrafficLimiter<GrpcLimitClient> {
    /// Creates the plugin; an unusable endpoint leaves every direction unlimited
    pub fn new(name: impl Into<String>, addr: &str, options: &PluginOptions) -> Self {
        let name = name.into();
        let client = match GrpcLimitClient::connect(addr, options) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(plugin = %name, error = %e, "gRPC quota authority disabled");
                None
            }
        };
        Self::with_service(name, client)
    }
}

impl<C: LimitService> GrpcTrafficLimiter<C> {
    pub fn with_service(name: impl Into<String>, client: Option<C>) -> Self {
        Self {
            name: name.into(),
            client: RwLock::new(client.map(Arc::new)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, direction: &'static str, key: &str, options: &LimitOptions) -> Option<LimitResponse> {
        let client = self.client.read().await.clone()?;
        match client.limit(LimitRequest::from(options)).await {
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
impl<C: LimitService + 'static> TrafficLimiter for GrpcTrafficLimiter<C> {
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
