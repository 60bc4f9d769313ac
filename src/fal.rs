//! HTTP client for the fal.ai queue and storage APIs.
//!
//! The same client talks to the provider either directly (server side, with
//! the credential attached) or through the gateway proxy (client side, where
//! the real target travels in the `x-fal-target-url` header).

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder};
use serde::{Deserialize, Serialize};

use crate::models::{GenerationInput, ImageUpload, QueueResult, StatusResponse, SubmitResponse};

pub const TARGET_URL_HEADER: &str = "x-fal-target-url";

const STORAGE_TYPE: &str = "fal-cdn-v3";

/// Errors from the fal REST layer.
#[derive(Debug, thiserror::Error)]
pub enum FalError {
    /// The HTTP request itself failed (network, DNS, TLS, decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider (or the gateway in front of it) returned a non-2xx status.
    #[error("fal API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("invalid endpoint id `{0}`, expected `owner/alias[/path]`")]
    InvalidEndpoint(String),
}

/// A model endpoint such as `fal-ai/veo2/image-to-video`.
///
/// Submissions go to the full id; status and result lookups live under the
/// `owner/alias` app id only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointId {
    owner: String,
    alias: String,
    path: Option<String>,
}

impl EndpointId {
    pub fn parse(id: &str) -> Result<Self, FalError> {
        let mut parts = id.trim_matches('/').splitn(3, '/');
        let owner = parts.next().filter(|part| !part.is_empty());
        let alias = parts.next().filter(|part| !part.is_empty());

        match (owner, alias) {
            (Some(owner), Some(alias)) => Ok(Self {
                owner: owner.to_owned(),
                alias: alias.to_owned(),
                path: parts.next().map(str::to_owned),
            }),
            _ => Err(FalError::InvalidEndpoint(id.to_owned())),
        }
    }

    pub fn app_id(&self) -> String {
        format!("{}/{}", self.owner, self.alias)
    }

    pub fn full_id(&self) -> String {
        match &self.path {
            Some(path) => format!("{}/{}/{}", self.owner, self.alias, path),
            None => self.app_id(),
        }
    }
}

/// How outbound calls reach the provider.
#[derive(Debug, Clone)]
pub enum Route {
    Direct { key: String },
    Proxy { url: String },
}

#[derive(Serialize)]
struct InitiateUpload<'a> {
    content_type: &'a str,
    file_name: &'a str,
}

#[derive(Deserialize)]
struct InitiatedUpload {
    upload_url: String,
    file_url: String,
}

#[derive(Clone)]
pub struct FalClient {
    http: reqwest::Client,
    endpoint: EndpointId,
    queue_url: String,
    rest_url: String,
    route: Route,
}

impl FalClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: EndpointId,
        queue_url: &str,
        rest_url: &str,
        route: Route,
    ) -> Self {
        Self {
            http,
            endpoint,
            queue_url: queue_url.trim_end_matches('/').to_owned(),
            rest_url: rest_url.trim_end_matches('/').to_owned(),
            route,
        }
    }

    pub fn submit_url(&self) -> String {
        format!("{}/{}", self.queue_url, self.endpoint.full_id())
    }

    pub fn request_url(&self, request_id: &str) -> String {
        format!(
            "{}/{}/requests/{}",
            self.queue_url,
            self.endpoint.app_id(),
            request_id
        )
    }

    pub fn status_url(&self, request_id: &str, logs: bool) -> String {
        let logs = if logs { 1 } else { 0 };
        format!("{}/status?logs={logs}", self.request_url(request_id))
    }

    fn upload_initiate_url(&self) -> String {
        format!(
            "{}/storage/upload/initiate?storage_type={STORAGE_TYPE}",
            self.rest_url
        )
    }

    fn request(&self, method: Method, target: &str) -> RequestBuilder {
        match &self.route {
            Route::Direct { key } => self
                .http
                .request(method, target)
                .header(AUTHORIZATION, format!("Key {key}")),
            Route::Proxy { url } => self
                .http
                .request(method, url)
                .header(TARGET_URL_HEADER, target),
        }
    }

    /// Store an image in provider storage and return its public URL.
    ///
    /// The initiate call goes through the configured route; the bytes are
    /// then PUT straight to the signed upload URL it hands back.
    pub async fn upload(&self, image: &ImageUpload) -> Result<String, FalError> {
        let response = self
            .request(Method::POST, &self.upload_initiate_url())
            .json(&InitiateUpload {
                content_type: &image.content_type,
                file_name: &image.file_name,
            })
            .send()
            .await?;
        let initiated: InitiatedUpload = parse_response(response).await?;

        let response = self
            .http
            .put(&initiated.upload_url)
            .header(CONTENT_TYPE, &image.content_type)
            .body(image.bytes.clone())
            .send()
            .await?;
        ensure_success(response).await?;

        Ok(initiated.file_url)
    }

    pub async fn submit(&self, input: &GenerationInput) -> Result<SubmitResponse, FalError> {
        let response = self
            .request(Method::POST, &self.submit_url())
            .json(input)
            .send()
            .await?;

        parse_response(response).await
    }

    pub async fn status(&self, request_id: &str, logs: bool) -> Result<StatusResponse, FalError> {
        let response = self
            .request(Method::GET, &self.status_url(request_id, logs))
            .send()
            .await?;

        parse_response(response).await
    }

    pub async fn result(&self, request_id: &str) -> Result<QueueResult, FalError> {
        let response = self
            .request(Method::GET, &self.request_url(request_id))
            .send()
            .await?;

        Ok(QueueResult {
            data: parse_response(response).await?,
            request_id: request_id.to_owned(),
        })
    }
}

/// Source of finalized job results for the result endpoint.
#[async_trait]
pub trait QueueResults: Send + Sync {
    async fn fetch_result(&self, request_id: &str) -> Result<QueueResult, FalError>;
}

#[async_trait]
impl QueueResults for FalClient {
    async fn fetch_result(&self, request_id: &str) -> Result<QueueResult, FalError> {
        self.result(request_id).await
    }
}

pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, FalError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(FalError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

pub(crate) async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, FalError> {
    let response = ensure_success(response).await?;
    Ok(response.json::<T>().await?)
}
