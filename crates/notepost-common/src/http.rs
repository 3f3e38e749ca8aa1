//! HTTP client for the hosted publishing service.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{ConfigError, ServiceError};
use crate::service::{
    ApiKey, ClaimResponse, DocumentList, ImageUpload, Owner, PublishRequest, PublishResponse,
    PublishService, validate_edit_token, validate_slug,
};

pub const DEFAULT_URL: &str = "https://notepost.app";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("notepost/", env!("CARGO_PKG_VERSION"));
const DEVICE_HEADER: &str = "X-Device-Id";

/// Where the service lives and how long a request may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub base_url: Url,
    pub timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(&format!("{DEFAULT_URL}/")).expect("default service URL parses"),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ServiceConfig {
    /// Read `NOTEPOST_API_URL` and `NOTEPOST_TIMEOUT_SECS`, falling back to
    /// the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(url) = lookup("NOTEPOST_API_URL").filter(|v| !v.trim().is_empty()) {
            config = config.with_base_url(&url)?;
        }
        if let Some(raw) = lookup("NOTEPOST_TIMEOUT_SECS").filter(|v| !v.trim().is_empty()) {
            let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
                var: "NOTEPOST_TIMEOUT_SECS",
                value: raw.clone(),
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Replace the base URL. A trailing slash is added so relative endpoint
    /// paths join underneath it.
    pub fn with_base_url(mut self, url: &str) -> Result<Self, ConfigError> {
        let mut normalized = url.trim().to_owned();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let parsed = Url::parse(&normalized).map_err(|e| ConfigError::InvalidUrl {
            url: url.to_owned(),
            message: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: url.to_owned(),
                message: "only http and https are supported".to_owned(),
            });
        }
        self.base_url = parsed;
        Ok(self)
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, ServiceError> {
        self.base_url
            .join(path)
            .map_err(|e| ServiceError::InvalidRequest(format!("bad endpoint {path}: {e}")))
    }

    /// `collection/<slug>`, with the slug percent-encoded as one path segment.
    pub(crate) fn document_endpoint(&self, collection: &str, slug: &str) -> Result<Url, ServiceError> {
        let mut url = self.endpoint(collection)?;
        url.path_segments_mut()
            .map_err(|()| ServiceError::InvalidRequest(format!("bad endpoint {collection}")))?
            .pop_if_empty()
            .push(slug);
        Ok(url)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct UrlBody {
    url: String,
}

#[derive(Deserialize)]
struct OkBody {
    #[serde(default)]
    ok: bool,
}

/// [`PublishService`] backed by the hosted HTTP API.
#[derive(Debug, Clone)]
pub struct HttpPublishService {
    client: Client,
    config: ServiceConfig,
}

impl HttpPublishService {
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(ServiceError::Transport)?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn authorized(&self, request: RequestBuilder, owner: &Owner) -> RequestBuilder {
        match owner {
            Owner::Account(key) => request.bearer_auth(key.as_str()),
            Owner::Anonymous { device_id } => request.header(DEVICE_HEADER, device_id),
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ServiceError> {
        let response = request.send().await.map_err(ServiceError::Transport)?;
        let response = check_status(response).await?;
        response.json::<T>().await.map_err(ServiceError::Decode)
    }
}

/// Turn a non-2xx response into the matching [`ServiceError`], keeping the
/// server's message.
async fn check_status(response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed.error,
        Err(_) if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_owned(),
        Err(_) => body,
    };
    tracing::debug!(status = status.as_u16(), %message, "service returned an error");
    Err(ServiceError::from_status(status.as_u16(), message))
}

impl PublishService for HttpPublishService {
    async fn publish(
        &self,
        owner: &Owner,
        request: PublishRequest,
    ) -> Result<PublishResponse, ServiceError> {
        request.validate()?;
        let path = match owner {
            Owner::Account(_) => "api/documents",
            Owner::Anonymous { .. } => "api/anonymous/documents",
        };
        let url = self.config.endpoint(path)?;
        let builder = self.authorized(self.client.post(url), owner).json(&request);
        self.send(builder).await
    }

    async fn delete(
        &self,
        owner: &Owner,
        slug: &str,
        edit_token: Option<&str>,
    ) -> Result<(), ServiceError> {
        validate_slug(slug)?;
        let builder = match owner {
            Owner::Account(_) => {
                let url = self.config.document_endpoint("api/documents", slug)?;
                self.authorized(self.client.delete(url), owner)
            }
            Owner::Anonymous { .. } => {
                let token = edit_token.ok_or_else(|| {
                    ServiceError::InvalidRequest("anonymous delete needs an edit token".into())
                })?;
                validate_edit_token(token)?;
                let url = self
                    .config
                    .document_endpoint("api/anonymous/documents", slug)?;
                self.authorized(self.client.delete(url), owner)
                    .json(&serde_json::json!({ "editToken": token }))
            }
        };
        let body: OkBody = self.send(builder).await?;
        if !body.ok {
            return Err(ServiceError::Server {
                status: 200,
                message: "delete was not acknowledged".to_owned(),
            });
        }
        Ok(())
    }

    async fn list_documents(&self, key: &ApiKey) -> Result<DocumentList, ServiceError> {
        let url = self.config.endpoint("api/documents")?;
        self.send(self.client.get(url).bearer_auth(key.as_str()))
            .await
    }

    async fn claim(
        &self,
        key: &ApiKey,
        slug: &str,
        edit_token: &str,
    ) -> Result<ClaimResponse, ServiceError> {
        validate_slug(slug)?;
        validate_edit_token(edit_token)?;
        let url = self.config.endpoint("api/documents/claim")?;
        let builder = self
            .client
            .post(url)
            .bearer_auth(key.as_str())
            .json(&serde_json::json!({ "slug": slug, "editToken": edit_token }));
        self.send(builder).await
    }

    async fn upload_image(&self, owner: &Owner, image: ImageUpload) -> Result<String, ServiceError> {
        let part = reqwest::multipart::Part::bytes(image.data.to_vec())
            .file_name(image.filename)
            .mime_str(image.mime_type)
            .map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let url = self.config.endpoint("api/images")?;
        let builder = self.authorized(self.client.post(url), owner).multipart(form);
        let body: UrlBody = self.send(builder).await?;
        Ok(body.url)
    }

    async fn billing_portal_url(&self, key: &ApiKey) -> Result<String, ServiceError> {
        let url = self.config.endpoint("api/billing/portal")?;
        let body: UrlBody = self
            .send(self.client.get(url).bearer_auth(key.as_str()))
            .await?;
        Ok(body.url)
    }
}
