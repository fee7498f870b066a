//! HTTP boundary to the log backend.
//!
//! The workload only sees the [`Transport`] trait: hand over a push batch or a
//! query, get back a status code and a body. [`HttpTransport`] implements it
//! on top of a shared `reqwest::Client`.

use crate::errors::TransportError;
use crate::query::QueryRequest;
use crate::stats::QuerySummary;
use crate::stream::PushRequest;
use chrono::Utc;
use futures::future::BoxFuture;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

/// Path of the push endpoint.
pub const PUSH_ENDPOINT: &str = "/loki/api/v1/push";

/// Prefix of the tenant used when none is configured.
pub const TENANT_PREFIX: &str = "lokiload-tenant";

/// Status returned by a successful push.
pub const PUSH_SUCCESS: u16 = 204;

/// Status returned by a successful query.
pub const QUERY_SUCCESS: u16 = 200;

/// Status and body of a completed request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Sends requests to the backend.
///
/// Implementations own timeouts and headers; they never retry.
pub trait Transport: Send + Sync {
    fn push<'a>(
        &'a self,
        request: &'a PushRequest,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>>;

    fn query<'a>(
        &'a self,
        request: &'a QueryRequest,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>>;
}

/// Connection settings shared by every virtual user.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base URL, optionally carrying `user:password` credentials
    pub url: String,
    /// Value of `X-Scope-OrgID`
    pub tenant: Option<String>,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3100".to_string(),
            tenant: None,
            timeout: Duration::from_secs(10),
            user_agent: format!("lokiload/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// reqwest-backed [`Transport`] for one virtual user.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
    credentials: Option<(String, Option<String>)>,
    tenant: String,
    user_agent: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport with its own client.
    pub fn new(config: &TransportConfig, vu: u64) -> Result<Self, TransportError> {
        Self::with_client(reqwest::Client::new(), config, vu)
    }

    /// Build a transport reusing `client`'s connection pool.
    ///
    /// The tenant is the configured one, else the URL's username, else
    /// `lokiload-tenant-{vu}`.
    pub fn with_client(
        client: reqwest::Client,
        config: &TransportConfig,
        vu: u64,
    ) -> Result<Self, TransportError> {
        let invalid = |reason: &str| TransportError::InvalidUrl {
            url: config.url.clone(),
            reason: reason.to_string(),
        };

        let mut base = Url::parse(&config.url).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        if base.cannot_be_a_base() {
            return Err(invalid("URL cannot be a base"));
        }

        let credentials = (!base.username().is_empty()).then(|| {
            (
                base.username().to_string(),
                base.password().map(str::to_string),
            )
        });
        // credentials travel in the Authorization header instead
        let _ = base.set_username("");
        let _ = base.set_password(None);

        let tenant = config
            .tenant
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| credentials.as_ref().map(|(user, _)| user.clone()))
            .unwrap_or_else(|| format!("{}-{}", TENANT_PREFIX, vu));

        Ok(Self {
            client,
            base,
            credentials,
            tenant,
            user_agent: config.user_agent.clone(),
            timeout: config.timeout,
        })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `endpoint` appended to the base URL's path.
    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidUrl {
                url: self.base.to_string(),
                reason: "URL cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .extend(endpoint.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    fn prepare(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder
            .timeout(self.timeout)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .header(reqwest::header::ACCEPT, "application/json")
            .header("X-Scope-OrgID", &self.tenant);
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, password.as_ref()),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<TransportResponse, TransportError> {
        let response = self
            .prepare(builder)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.classify(e))?;
        Ok(TransportResponse { status, body })
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Request(err)
        }
    }
}

impl Transport for HttpTransport {
    fn push<'a>(
        &'a self,
        request: &'a PushRequest,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>> {
        Box::pin(async move {
            let url = self.endpoint_url(PUSH_ENDPOINT)?;
            self.send(self.client.post(url).json(request)).await
        })
    }

    fn query<'a>(
        &'a self,
        request: &'a QueryRequest,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>> {
        Box::pin(async move {
            let mut url = self.endpoint_url(&request.endpoint())?;
            url.query_pairs_mut()
                .extend_pairs(request.params(Utc::now()));
            self.send(self.client.get(url)).await
        })
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryResponse {
    #[serde(default)]
    data: Vec<String>,
}

/// Extract the `data` string list of a labels or label-values response.
///
/// A malformed body yields an empty list.
pub fn parse_discovery_body(body: &str) -> Vec<String> {
    match serde_json::from_str::<DiscoveryResponse>(body) {
        Ok(response) => response.data,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse discovery response");
            Vec::new()
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    data: QueryData,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    stats: Option<QueryStats>,
}

#[derive(Debug, Deserialize)]
struct QueryStats {
    summary: Option<QuerySummary>,
}

/// Extract `data.stats.summary` of a range or instant query response.
///
/// Backends that do not report statistics yield `None`.
pub fn parse_query_summary(body: &str) -> Option<QuerySummary> {
    match serde_json::from_str::<QueryResponse>(body) {
        Ok(response) => response.data.stats?.summary,
        Err(e) => {
            tracing::debug!(error = %e, "Query response carries no statistics");
            None
        }
    }
}
