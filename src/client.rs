//! HTTP client for the Datto RMM REST API (v2).
//!
//! [`DattoClient`] wraps `reqwest::Client` and provides one method per
//! upstream endpoint the tools need. Responses are returned as
//! `serde_json::Value`; the tools layer only re-serializes them for the agent.
//!
//! ## Authentication
//!
//! Datto RMM uses an OAuth2 password grant: the API key and secret are
//! exchanged for a bearer token at `/auth/oauth/token`. The token is fetched
//! on first use and kept for the lifetime of the client. Clients are built per
//! tool call from request-scoped [`Credentials`], so a token never outlives the
//! request that produced it.
//!
//! ## Paged listings
//!
//! Device, alert and site listings return [`BoxStream`]s that fetch the next
//! page only when polled past the current page's items.
//!
//! ## Seams
//!
//! The tools layer talks to [`RmmApi`] and obtains instances from a
//! [`ClientFactory`], so tests can substitute recording fakes.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::credentials::Credentials;
use crate::paging::Page;

/// Items requested per upstream page (the API maximum).
const PAGE_SIZE: usize = 250;

/// Public OAuth client identity shared by all Datto RMM API integrations.
const OAUTH_CLIENT_ID: &str = "public-client";
const OAUTH_CLIENT_SECRET: &str = "public";

/// Errors returned by [`RmmApi`] methods.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP transport error (connection refused, timeout, DNS failure, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The API returned a non-2xx status. Displays the upstream message only.
    #[error("{message}")]
    Api { status: u16, message: String },
    /// The token endpoint rejected the key/secret pair.
    #[error("Authentication failed (HTTP {status}): {message}")]
    Auth { status: u16, message: String },
    /// The response body was not valid JSON.
    #[error("Invalid JSON from Datto RMM API: {0}")]
    Decode(#[from] serde_json::Error),
    /// An identifier that cannot stand as a single path segment.
    #[error("Invalid identifier: {0:?}")]
    InvalidId(String),
    /// A base URL or page link that cannot be used.
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// A quick job to dispatch to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickJob {
    pub job_name: String,
    pub component_uid: String,
    pub variables: BTreeMap<String, String>,
}

/// Upstream request body for `PUT /api/v2/device/{uid}/quickjob`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QuickJobBody<'a> {
    job_name: &'a str,
    job_component: JobComponent<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobComponent<'a> {
    component_uid: &'a str,
    variables: Vec<JobVariable<'a>>,
}

#[derive(Serialize)]
struct JobVariable<'a> {
    name: &'a str,
    value: &'a str,
}

impl QuickJob {
    fn body(&self) -> QuickJobBody<'_> {
        QuickJobBody {
            job_name: &self.job_name,
            job_component: JobComponent {
                component_uid: &self.component_uid,
                variables: self
                    .variables
                    .iter()
                    .map(|(name, value)| JobVariable { name, value })
                    .collect(),
            },
        }
    }
}

/// Resource-scoped operations against a Datto RMM account.
#[async_trait]
pub trait RmmApi: Send + Sync {
    /// All devices in the account.
    fn account_devices(&self) -> BoxStream<'_, Result<Value, ClientError>>;
    /// Devices belonging to one site.
    fn site_devices(&self, site_uid: &str) -> BoxStream<'_, Result<Value, ClientError>>;
    async fn device(&self, device_uid: &str) -> Result<Value, ClientError>;

    /// Open alerts across the account.
    fn account_open_alerts(&self) -> BoxStream<'_, Result<Value, ClientError>>;
    /// Open alerts for one site.
    fn site_open_alerts(&self, site_uid: &str) -> BoxStream<'_, Result<Value, ClientError>>;
    async fn resolve_alert(&self, alert_uid: &str) -> Result<Value, ClientError>;

    fn account_sites(&self) -> BoxStream<'_, Result<Value, ClientError>>;
    async fn site(&self, site_uid: &str) -> Result<Value, ClientError>;

    async fn create_quick_job(&self, device_uid: &str, job: &QuickJob)
        -> Result<Value, ClientError>;

    /// Hardware, OS and software audit for a device.
    async fn device_audit(&self, device_uid: &str) -> Result<Value, ClientError>;
    /// Software-only audit for a device.
    async fn device_software_audit(&self, device_uid: &str) -> Result<Value, ClientError>;
}

/// Builds an [`RmmApi`] for one set of credentials.
pub trait ClientFactory: Send + Sync {
    fn connect(&self, credentials: &Credentials) -> Result<Box<dyn RmmApi>, ClientError>;
}

/// Factory for real [`DattoClient`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct DattoClientFactory;

impl ClientFactory for DattoClientFactory {
    fn connect(&self, credentials: &Credentials) -> Result<Box<dyn RmmApi>, ClientError> {
        Ok(Box::new(DattoClient::new(credentials)?))
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// HTTP client for one Datto RMM account on one platform.
pub struct DattoClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    api_secret: String,
    token: Mutex<Option<String>>,
}

impl DattoClient {
    /// Create a client for the credentials' platform. No request is made until
    /// the first API call.
    pub fn new(credentials: &Credentials) -> Result<Self, ClientError> {
        Self::with_base_url(credentials, &credentials.platform.base_url())
    }

    /// Create a client against an explicit API root.
    pub fn with_base_url(credentials: &Credentials, base_url: &str) -> Result<Self, ClientError> {
        let invalid = |reason: String| ClientError::InvalidUrl {
            url: base_url.to_string(),
            reason,
        };
        let base_url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(invalid("not a hierarchical URL".to_string()));
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("datto-rmm-mcp/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_key: credentials.api_key.clone(),
            api_secret: credentials.api_secret.clone(),
            token: Mutex::new(None),
        })
    }

    /// `{base}/{prefix...}/{segments...}`. Each entry of `segments` is
    /// percent-encoded as exactly one path segment, so `/`, `?` and `#` inside
    /// an identifier never change the target.
    fn endpoint(&self, prefix: &[&str], segments: &[&str]) -> Result<Url, ClientError> {
        if let Some(bad) = segments.iter().find(|s| matches!(**s, "" | "." | "..")) {
            return Err(ClientError::InvalidId((*bad).to_string()));
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: "not a hierarchical URL".to_string(),
            })?
            .pop_if_empty()
            .extend(prefix)
            .extend(segments);
        Ok(url)
    }

    fn api_url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        self.endpoint(&["api", "v2"], segments)
    }

    /// Resolve a `nextPageUrl` against the API root. Links to another origin
    /// are refused so the bearer token never leaves the platform host.
    fn page_url(&self, link: &str) -> Result<Url, ClientError> {
        let invalid = |reason: String| ClientError::InvalidUrl {
            url: link.to_string(),
            reason,
        };
        let url = self.base_url.join(link).map_err(|e| invalid(e.to_string()))?;
        if url.origin() != self.base_url.origin() {
            return Err(invalid(format!(
                "page link leaves {}",
                self.base_url.origin().ascii_serialization()
            )));
        }
        Ok(url)
    }

    /// Return the cached bearer token, fetching one on first use.
    async fn token(&self) -> Result<String, ClientError> {
        let mut token = self.token.lock().await;
        if let Some(t) = token.as_ref() {
            return Ok(t.clone());
        }

        debug!(base_url = %self.base_url, "requesting Datto RMM access token");
        let resp = self
            .http
            .post(self.endpoint(&["auth", "oauth", "token"], &[])?)
            .basic_auth(OAUTH_CLIENT_ID, Some(OAUTH_CLIENT_SECRET))
            .form(&[
                ("grant_type", "password"),
                ("username", self.api_key.as_str()),
                ("password", self.api_secret.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ClientError::Auth {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)?;
        *token = Some(parsed.access_token.clone());
        Ok(parsed.access_token)
    }

    async fn get(&self, url: Url) -> Result<Value, ClientError> {
        let token = self.token().await?;
        let resp = self.http.get(url).bearer_auth(token).send().await?;
        Self::handle_response(resp).await
    }

    async fn post(&self, url: Url) -> Result<Value, ClientError> {
        let token = self.token().await?;
        let resp = self.http.post(url).bearer_auth(token).send().await?;
        Self::handle_response(resp).await
    }

    async fn put_json<B: Serialize + ?Sized>(&self, url: Url, body: &B) -> Result<Value, ClientError> {
        let token = self.token().await?;
        let resp = self
            .http
            .put(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        Self::handle_response(resp).await
    }

    /// Lazily walk a paged listing, yielding items from `items_key`.
    ///
    /// Each page is fetched only after every item of the previous page has been
    /// consumed. The walk ends at the first page without a `nextPageUrl` or
    /// without items.
    fn paginate(
        &self,
        segments: &[&str],
        items_key: &'static str,
    ) -> BoxStream<'_, Result<Value, ClientError>> {
        let first = match self.api_url(segments) {
            Ok(mut url) => {
                url.query_pairs_mut()
                    .append_pair("max", &PAGE_SIZE.to_string());
                url.to_string()
            }
            Err(e) => return stream::once(async move { Err::<Value, _>(e) }).boxed(),
        };
        stream::try_unfold(Some(first), move |next| async move {
            let Some(link) = next else {
                return Ok::<_, ClientError>(None);
            };
            let url = self.page_url(&link)?;
            debug!(%url, "fetching page");
            let page = Page::from_value(self.get(url).await?, items_key);
            let next = if page.items.is_empty() {
                None
            } else {
                page.next_page_url
            };
            let items = stream::iter(page.items.into_iter().map(Ok::<_, ClientError>));
            Ok(Some((items, next)))
        })
        .try_flatten()
        .boxed()
    }

    /// Parse an HTTP response: the JSON body on success (`null` when empty),
    /// or [`ClientError::Api`] carrying the upstream message.
    async fn handle_response(resp: reqwest::Response) -> Result<Value, ClientError> {
        let status = resp.status();
        let body = resp.text().await?;

        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            Ok(serde_json::from_str(&body)?)
        } else {
            Err(ClientError::Api {
                status: status.as_u16(),
                message: error_message(status, &body),
            })
        }
    }
}

/// Extract a human-readable message from an error body: `message`, then
/// `error`, then the raw body, then the status reason phrase.
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        for key in ["message", "error_description", "error"] {
            if let Some(msg) = v.get(key).and_then(Value::as_str) {
                return msg.to_string();
            }
        }
    }
    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    status
        .canonical_reason()
        .map_or_else(|| format!("HTTP {}", status.as_u16()), String::from)
}

#[async_trait]
impl RmmApi for DattoClient {
    fn account_devices(&self) -> BoxStream<'_, Result<Value, ClientError>> {
        self.paginate(&["account", "devices"], "devices")
    }

    fn site_devices(&self, site_uid: &str) -> BoxStream<'_, Result<Value, ClientError>> {
        self.paginate(&["site", site_uid, "devices"], "devices")
    }

    async fn device(&self, device_uid: &str) -> Result<Value, ClientError> {
        self.get(self.api_url(&["device", device_uid])?).await
    }

    fn account_open_alerts(&self) -> BoxStream<'_, Result<Value, ClientError>> {
        self.paginate(&["account", "alerts", "open"], "alerts")
    }

    fn site_open_alerts(&self, site_uid: &str) -> BoxStream<'_, Result<Value, ClientError>> {
        self.paginate(&["site", site_uid, "alerts", "open"], "alerts")
    }

    async fn resolve_alert(&self, alert_uid: &str) -> Result<Value, ClientError> {
        self.post(self.api_url(&["alert", alert_uid, "resolve"])?)
            .await
    }

    fn account_sites(&self) -> BoxStream<'_, Result<Value, ClientError>> {
        self.paginate(&["account", "sites"], "sites")
    }

    async fn site(&self, site_uid: &str) -> Result<Value, ClientError> {
        self.get(self.api_url(&["site", site_uid])?).await
    }

    async fn create_quick_job(
        &self,
        device_uid: &str,
        job: &QuickJob,
    ) -> Result<Value, ClientError> {
        self.put_json(self.api_url(&["device", device_uid, "quickjob"])?, &job.body())
            .await
    }

    async fn device_audit(&self, device_uid: &str) -> Result<Value, ClientError> {
        self.get(self.api_url(&["audit", "device", device_uid])?)
            .await
    }

    async fn device_software_audit(&self, device_uid: &str) -> Result<Value, ClientError> {
        self.get(self.api_url(&["audit", "device", device_uid, "software"])?)
            .await
    }
}
