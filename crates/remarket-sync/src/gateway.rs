//! # Remote Gateway
//!
//! The product API as seen by the engine.
//!
//! ## Endpoints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  GET  {base}/products         → [ProductDto]                           │
//! │  GET  {base}/products/{id}    → ProductDto                             │
//! │  POST {base}/products         ProductRequest → ProductDto              │
//! │                               (server assigns id, createdAt, updatedAt)│
//! │  POST {base}/reports          ReportRequest → 2xx = accepted           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Classification
//! ```text
//! no HTTP answer (connect, DNS, timeout)  → GatewayError::Network
//! 4xx                                     → GatewayError::Client
//! 5xx                                     → GatewayError::Server
//! 2xx with a body that does not decode    → GatewayError::Unknown
//! ```

use async_trait::async_trait;
use remarket_core::{ProductDto, ProductRequest, ReportRequest};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::auth::CredentialSource;
use crate::config::ApiSettings;
use crate::error::{GatewayError, GatewayResult, SyncError, SyncResult};

// =============================================================================
// Gateway Trait
// =============================================================================

/// Remote product API.
///
/// Knows nothing about local storage. Implementations must be safe to call
/// from several tasks at once.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Full catalog.
    async fn list_products(&self) -> GatewayResult<Vec<ProductDto>>;

    /// One listing. A missing listing is `GatewayError::Client { status: 404 }`.
    async fn get_product(&self, id: &str) -> GatewayResult<ProductDto>;

    /// Publishes a listing and returns the server's copy.
    async fn create_product(&self, request: &ProductRequest) -> GatewayResult<ProductDto>;

    /// Files a report. `Ok(false)` when the server answered but refused it.
    async fn create_report(&self, report: &ReportRequest) -> GatewayResult<bool>;
}

// =============================================================================
// HTTP Gateway
// =============================================================================

/// [`RemoteGateway`] over HTTP/JSON.
#[derive(Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: Url,
    credentials: Arc<dyn CredentialSource>,
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpGateway {
    /// Builds the client from `[api]` settings.
    pub fn new(settings: &ApiSettings, credentials: Arc<dyn CredentialSource>) -> SyncResult<Self> {
        let base_url = Url::parse(&settings.base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(settings.base_url.clone()));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .user_agent(concat!("remarket-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(HttpGateway {
            client,
            base_url,
            credentials,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `{base}/seg1/seg2`, each segment percent-encoded on its own.
    fn endpoint(&self, segments: &[&str]) -> GatewayResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| GatewayError::Unknown("base URL cannot take a path".into()))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");

        match self.credentials.access_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Sends and turns non-2xx answers into errors.
    async fn send(&self, builder: RequestBuilder) -> GatewayResult<Response> {
        let response = builder.send().await.map_err(classify)?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let reason = status.canonical_reason().unwrap_or("").to_string();
        // Body is diagnostic only.
        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), body = %body.trim(), "Product API error response");

        Err(GatewayError::from_status(status.as_u16(), reason))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> GatewayResult<T> {
        let response = self.send(builder).await?;
        response.json::<T>().await.map_err(classify)
    }
}

/// Maps a transport-level failure.
fn classify(err: reqwest::Error) -> GatewayError {
    if err.is_decode() {
        return GatewayError::Unknown(err.to_string());
    }
    if let Some(status) = err.status() {
        return GatewayError::from_status(status.as_u16(), err.to_string());
    }
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        return GatewayError::Network(err.to_string());
    }
    GatewayError::Unknown(err.to_string())
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn list_products(&self) -> GatewayResult<Vec<ProductDto>> {
        let url = self.endpoint(&["products"])?;
        let products: Vec<ProductDto> = self.send_json(self.request(Method::GET, url)).await?;
        debug!(count = products.len(), "Fetched product catalog");
        Ok(products)
    }

    async fn get_product(&self, id: &str) -> GatewayResult<ProductDto> {
        let url = self.endpoint(&["products", id])?;
        self.send_json(self.request(Method::GET, url)).await
    }

    async fn create_product(&self, request: &ProductRequest) -> GatewayResult<ProductDto> {
        let url = self.endpoint(&["products"])?;
        let created: ProductDto = self
            .send_json(self.request(Method::POST, url).json(request))
            .await?;
        debug!(id = %created.id, "Product created on server");
        Ok(created)
    }

    async fn create_report(&self, report: &ReportRequest) -> GatewayResult<bool> {
        let url = self.endpoint(&["reports"])?;
        let response = self
            .request(Method::POST, url)
            .json(report)
            .send()
            .await
            .map_err(classify)?;

        let accepted = response.status().is_success();
        if !accepted {
            warn!(
                product_id = %report.product_id,
                status = response.status().as_u16(),
                "Report rejected"
            );
        }
        Ok(accepted)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
