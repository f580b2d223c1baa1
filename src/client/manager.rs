//! Execution context and request verbs
//!
//! [`Manager`] owns everything a call needs: endpoint, token, the shared
//! HTTP client and the cancellation scope. Every verb builds an [`Exchange`]
//! and hands it to the lock-retry executor.

use super::arguments::Arguments;
use super::error::{sanitize_for_log, Error, Result};
use super::executor::{Body, Target};
use super::scope::Scope;
use super::transport::TransportConfig;
use reqwest::header::{ACCEPT_LANGUAGE, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};
use url::Url;

/// Control plane used when no base URL is configured
pub const DEFAULT_BASE_URL: &str = "https://cp.iteco.cloud";

/// Backoff between lock retries and between task polls
pub const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// How long a call keeps retrying a locked object
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(1200);

/// How long a call waits for an asynchronous task
pub const TASK_TIMEOUT: Duration = Duration::from_secs(600);

/// Interval between `locked` flag polls in [`Manager::wait_lock`]
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_secs(1);

const LANGUAGE: &str = "ru-ru";

#[derive(Debug, Clone, Copy)]
pub(crate) struct Timing {
    pub retry_interval: Duration,
    pub lock_timeout: Duration,
    pub task_timeout: Duration,
    pub lock_poll_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            retry_interval: RETRY_INTERVAL,
            lock_timeout: LOCK_TIMEOUT,
            task_timeout: TASK_TIMEOUT,
            lock_poll_interval: LOCK_POLL_INTERVAL,
        }
    }
}

/// One outgoing HTTP call. A fresh request is built from it per attempt.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub method: Method,
    pub url: Url,
    pub body: Option<Vec<u8>>,
}

impl Exchange {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            body: None,
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Request URL without its query string
    pub fn endpoint(&self) -> String {
        let mut url = self.url.clone();
        url.set_query(None);
        url.to_string()
    }
}

/// Client for the control plane API
#[derive(Clone)]
pub struct Manager {
    client: Client,
    base_url: String,
    token: String,
    pub(crate) scope: Scope,
    span: Span,
    pub(crate) timing: Timing,
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("scope", &self.scope)
            .finish()
    }
}

impl Manager {
    /// Create a manager with a transport built from `transport`
    pub fn new(token: impl Into<String>, transport: &TransportConfig) -> Result<Self> {
        let client = transport.build_client()?;
        Ok(Self::with_client(client, token))
    }

    /// Create a manager around an existing HTTP client
    pub fn with_client(client: Client, token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
            scope: Scope::default(),
            span: Span::none(),
            timing: Timing::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Derived manager bound to `token`. The original is left untouched.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        let mut derived = self.clone();
        derived.scope = Scope::new(token);
        derived
    }

    /// Derived manager whose calls fail once `timeout` has elapsed
    pub fn with_deadline(&self, timeout: Duration) -> Self {
        let mut derived = self.clone();
        derived.scope = self
            .scope
            .with_deadline(tokio::time::Instant::now() + timeout);
        derived
    }

    /// Derived manager logging inside `span`
    pub fn with_span(&self, span: Span) -> Self {
        let mut derived = self.clone();
        derived.span = span;
        derived
    }

    #[cfg(test)]
    pub(crate) fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    /// Resolve `path` against the base URL
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let raw = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse(&raw).map_err(|source| Error::InvalidUrl { url: raw, source })
    }

    /// Build the wire request for one attempt of `exchange`
    pub(crate) fn build(&self, exchange: &Exchange) -> RequestBuilder {
        let mut builder = self
            .client
            .request(exchange.method.clone(), exchange.url.clone())
            .bearer_auth(&self.token)
            .header(ACCEPT_LANGUAGE, LANGUAGE);

        if let Some(body) = &exchange.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        builder
    }

    fn query_exchange(&self, method: Method, path: &str, args: &Arguments) -> Result<Exchange> {
        let mut url = self.endpoint(path)?;
        if !args.is_empty() {
            url.query_pairs_mut().extend_pairs(args.to_query());
        }
        Ok(Exchange::new(method, url))
    }

    /// Send a JSON body and wait for every task the call spawned.
    ///
    /// Returns `None` when the server answered with an empty body.
    pub async fn request<B, T>(&self, method: Method, path: &str, body: &B) -> Result<Option<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        async {
            tracing::debug!("[bcc] {} {}", method, path);

            let url = self.endpoint(path)?;
            let payload = serde_json::to_vec(body).map_err(|source| Error::Encode {
                url: url.to_string(),
                source,
            })?;
            tracing::debug!("[bcc] Send {}", sanitize_for_log(&payload));

            let exchange = Exchange::new(method, url).with_body(payload);
            let executed = self.execute::<T>(&exchange, Target::Json).await;
            self.settle(executed).await.map(Body::into_value)
        }
        .instrument(self.span.clone())
        .await
    }

    /// GET `path` with `args` as query parameters
    pub async fn get<T>(&self, path: &str, args: &Arguments) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        async {
            tracing::debug!("[bcc] GET {}", path);

            let exchange = self.query_exchange(Method::GET, path, args)?;
            self.execute::<T>(&exchange, Target::Json)
                .await
                .outcome
                .map(Body::into_value)
        }
        .instrument(self.span.clone())
        .await
    }

    /// GET an un-paged collection returned as a bare array
    pub async fn get_sub_items<T>(&self, path: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        Ok(self
            .get::<Vec<T>>(path, &Arguments::new())
            .await?
            .unwrap_or_default())
    }

    /// DELETE `path` and wait for every task the call spawned
    pub async fn delete(&self, path: &str, args: &Arguments) -> Result<()> {
        async {
            tracing::debug!("[bcc] DELETE {}", path);

            let exchange = self.query_exchange(Method::DELETE, path, args)?;
            let executed = self.execute::<IgnoredAny>(&exchange, Target::Discard).await;
            self.settle(executed).await.map(|_| ())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Download the kubectl config of a Kubernetes cluster into the
    /// current directory and return the written path
    pub async fn export_kubeconfig(&self, cluster_id: &str) -> Result<PathBuf> {
        async {
            let path = format!("v1/kubernetes/{}/config", cluster_id);
            tracing::debug!("[bcc] GET {}", path);

            let exchange = self.query_exchange(Method::GET, &path, &Arguments::new())?;
            let endpoint = exchange.endpoint();
            match self
                .execute::<IgnoredAny>(&exchange, Target::Kubeconfig)
                .await
                .outcome?
            {
                Body::Exported(file) => Ok(file),
                Body::Empty | Body::Value(_) => Err(Error::EmptyResponse { url: endpoint }),
            }
        }
        .instrument(self.span.clone())
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Manager {
        Manager::with_client(Client::new(), "secret").with_base_url("https://cp.example/")
    }

    #[test]
    fn test_endpoint_joins_base_and_path() {
        let m = manager();
        assert_eq!(m.endpoint("v1/disk").unwrap().as_str(), "https://cp.example/v1/disk");
        assert_eq!(m.endpoint("/v1/disk/42").unwrap().as_str(), "https://cp.example/v1/disk/42");
    }

    #[test]
    fn test_query_exchange_without_args_has_no_query() {
        let m = manager();
        let exchange = m.query_exchange(Method::GET, "v1/vm", &Arguments::new()).unwrap();
        assert_eq!(exchange.url.query(), None);
    }

    #[test]
    fn test_query_exchange_encodes_args() {
        let m = manager();
        let args = Arguments::from([("vdc", "a b"), ("page", "2")]);
        let exchange = m.query_exchange(Method::GET, "v1/network", &args).unwrap();

        assert_eq!(exchange.url.query(), Some("page=2&vdc=a+b"));
        assert_eq!(exchange.endpoint(), "https://cp.example/v1/network");
    }

    #[test]
    fn test_derived_scope_leaves_original() {
        let m = manager();
        let token = CancellationToken::new();
        let derived = m.with_cancellation(token.clone());
        token.cancel();

        assert!(derived.scope().check().is_err());
        assert!(m.scope().check().is_ok());
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", manager());
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_build_sets_headers() {
        let m = manager();
        let exchange = Exchange::new(Method::POST, m.endpoint("v1/vm").unwrap())
            .with_body(b"{}".to_vec());
        let request = m.build(&exchange).build().unwrap();

        let headers = request.headers();
        assert_eq!(headers[reqwest::header::AUTHORIZATION], "Bearer secret");
        assert_eq!(headers[ACCEPT_LANGUAGE], "ru-ru");
        assert_eq!(headers[CONTENT_TYPE], "application/json");
    }
}
