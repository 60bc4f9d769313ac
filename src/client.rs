//! Provider access for the workflow controller, routed through the gateway.

use async_trait::async_trait;

use crate::fal::{parse_response, EndpointId, FalClient, FalError, Route};
use crate::models::{GenerationInput, ImageUpload, QueueResult, StatusResponse};

/// Everything the workflow needs from the provider.
///
/// Implementations must be usable from spawned tasks.
#[async_trait]
pub trait VideoProvider: Send + Sync + 'static {
    /// Upload the image to provider storage and return its URL.
    async fn upload_image(&self, image: &ImageUpload) -> Result<String, FalError>;

    /// Queue a generation job and return its request id.
    async fn submit(&self, input: &GenerationInput) -> Result<String, FalError>;

    /// Current queue status, including progress logs.
    async fn status(&self, request_id: &str) -> Result<StatusResponse, FalError>;

    async fn fetch_result(&self, request_id: &str) -> Result<QueueResult, FalError>;
}

/// Talks to the provider through a running gateway: queue and storage calls
/// go via `/api/fal/proxy`, results via `/api/fal/result`. The credential
/// never leaves the gateway.
pub struct GatewayProvider {
    http: reqwest::Client,
    fal: FalClient,
    result_url: String,
}

impl GatewayProvider {
    pub fn new(
        gateway_url: &str,
        endpoint: EndpointId,
        queue_url: &str,
        rest_url: &str,
    ) -> Self {
        let gateway_url = gateway_url.trim_end_matches('/');
        let http = reqwest::Client::new();
        let fal = FalClient::new(
            http.clone(),
            endpoint,
            queue_url,
            rest_url,
            Route::Proxy {
                url: format!("{gateway_url}/api/fal/proxy"),
            },
        );

        Self {
            http,
            fal,
            result_url: format!("{gateway_url}/api/fal/result"),
        }
    }
}

#[async_trait]
impl VideoProvider for GatewayProvider {
    async fn upload_image(&self, image: &ImageUpload) -> Result<String, FalError> {
        self.fal.upload(image).await
    }

    async fn submit(&self, input: &GenerationInput) -> Result<String, FalError> {
        Ok(self.fal.submit(input).await?.request_id)
    }

    async fn status(&self, request_id: &str) -> Result<StatusResponse, FalError> {
        self.fal.status(request_id, true).await
    }

    async fn fetch_result(&self, request_id: &str) -> Result<QueueResult, FalError> {
        let response = self
            .http
            .get(&self.result_url)
            .query(&[("requestId", request_id)])
            .send()
            .await?;

        parse_response(response).await
    }
}
