use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{self, HeaderMap, HeaderName};
use actix_web::http::Uri;
use actix_web::middleware::{from_fn, Logger, Next};
use actix_web::{get, web, App, HttpRequest, HttpResponse, HttpServer, ResponseError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{io_err, GatewayError};
use crate::fal::{EndpointId, FalClient, FalError, QueueResults, Route, TARGET_URL_HEADER};

const USER_AGENT: &str = concat!("veo-relay/", env!("CARGO_PKG_VERSION"));

pub struct AppState {
    pub fal_key: Option<String>,
    pub results: Arc<dyn QueueResults>,
    pub proxy_allowed_hosts: Vec<String>,
    pub proxy_timeout: Duration,
}

impl AppState {
    /// Builds the state the server runs with: results come straight from the
    /// provider queue using the configured credential.
    pub fn from_config(config: &Config) -> Result<Self, FalError> {
        let endpoint = EndpointId::parse(&config.endpoint_id)?;
        let fal = FalClient::new(
            reqwest::Client::new(),
            endpoint,
            &config.queue_url,
            &config.rest_url,
            Route::Direct {
                key: config.fal_key.clone().unwrap_or_default(),
            },
        );

        Ok(Self {
            fal_key: config.fal_key.clone(),
            results: Arc::new(fal),
            proxy_allowed_hosts: config.proxy_allowed_hosts.clone(),
            proxy_timeout: config.proxy_timeout,
        })
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    credential_configured: bool,
}

#[derive(Deserialize)]
struct ResultParams {
    #[serde(rename = "requestId")]
    request_id: Option<String>,
}

#[get("/health")]
async fn health(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        credential_configured: data.fal_key.is_some(),
    })
}

#[get("/result")]
async fn fetch_result(
    data: web::Data<AppState>,
    params: web::Query<ResultParams>,
) -> Result<HttpResponse, GatewayError> {
    let request_id = params
        .into_inner()
        .request_id
        .filter(|id| !id.is_empty())
        .ok_or(GatewayError::MissingRequestId)?;

    match data.results.fetch_result(&request_id).await {
        Ok(result) => Ok(HttpResponse::Ok().json(result)),
        Err(err) => {
            tracing::error!(request_id = %request_id, error = %err, "Error fetching result");
            Err(GatewayError::ResultUnavailable)
        }
    }
}

/// Rejects every proxy request before forwarding while no credential is
/// configured.
async fn require_credential<B: MessageBody + 'static>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, actix_web::Error> {
    let configured = req
        .app_data::<web::Data<AppState>>()
        .is_some_and(|state| state.fal_key.is_some());

    if !configured {
        tracing::error!(path = %req.path(), "Rejecting proxy request, FAL_KEY is not set");
        let response = GatewayError::MissingCredential.error_response();
        return Ok(req.into_response(response).map_into_right_body());
    }

    next.call(req).await.map(ServiceResponse::map_into_left_body)
}

fn is_forwarded(name: &HeaderName) -> bool {
    *name == header::CONTENT_TYPE
        || *name == header::ACCEPT
        || (name.as_str().starts_with("x-fal-") && name.as_str() != TARGET_URL_HEADER)
}

/// Resolves the `x-fal-target-url` header, accepting only hosts that are (or
/// are subdomains of) an allowed host.
pub fn target_url(headers: &HeaderMap, allowed_hosts: &[String]) -> Result<Uri, GatewayError> {
    let value = headers
        .get(TARGET_URL_HEADER)
        .ok_or(GatewayError::MissingTargetUrl)?;

    let uri: Uri = value
        .to_str()
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(GatewayError::InvalidTargetUrl)?;

    if uri.scheme().is_none() {
        return Err(GatewayError::InvalidTargetUrl);
    }

    let host = uri
        .host()
        .map(str::to_ascii_lowercase)
        .ok_or(GatewayError::InvalidTargetUrl)?;

    let allowed = allowed_hosts
        .iter()
        .any(|allowed| host == *allowed || host.ends_with(&format!(".{allowed}")));

    if allowed {
        Ok(uri)
    } else {
        Err(GatewayError::InvalidTargetUrl)
    }
}

async fn proxy(
    req: HttpRequest,
    body: web::Bytes,
    data: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let key = data
        .fal_key
        .as_deref()
        .ok_or(GatewayError::MissingCredential)?;

    let target = match target_url(req.headers(), &data.proxy_allowed_hosts) {
        Ok(target) => target,
        Err(err) => {
            tracing::warn!(error = %err, "Refusing proxy request");
            return Err(err);
        }
    };

    let proxy_id = Uuid::new_v4();
    tracing::debug!(%proxy_id, method = %req.method(), target = %target, "Forwarding to provider");

    let mut upstream = awc::Client::default()
        .request(req.method().clone(), target.to_string())
        .timeout(data.proxy_timeout);

    for (name, value) in req.headers().iter().filter(|(name, _)| is_forwarded(name)) {
        upstream = upstream.insert_header((name.clone(), value.clone()));
    }

    let response = upstream
        .insert_header((header::AUTHORIZATION, format!("Key {key}")))
        .insert_header((header::USER_AGENT, USER_AGENT))
        .send_body(body)
        .await
        .map_err(|err| {
            tracing::error!(%proxy_id, error = %err, "Provider request failed");
            GatewayError::Upstream(err)
        })?;

    tracing::info!(%proxy_id, status = response.status().as_u16(), "Provider responded");

    let mut builder = HttpResponse::build(response.status());
    if let Some(content_type) = response.headers().get(header::CONTENT_TYPE) {
        builder.insert_header((header::CONTENT_TYPE, content_type.clone()));
    }

    Ok(builder.streaming(response))
}

/// Mounts the health check, the result endpoint and the credential-guarded
/// proxy under `/api/fal`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health).service(
        web::scope("/api/fal").service(fetch_result).service(
            web::scope("/proxy")
                .wrap(from_fn(require_credential))
                .default_service(web::to(proxy)),
        ),
    );
}

pub async fn start_web_server(config: Config) -> std::io::Result<()> {
    let state = AppState::from_config(&config).map_err(io_err)?;

    if state.fal_key.is_none() {
        tracing::warn!("FAL_KEY is not set, proxy requests will be rejected");
    }

    let app_state = web::Data::new(state);

    tracing::info!(host = %config.host, port = config.port, "Starting web server");

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(Logger::default())
            .configure(configure)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::HeaderValue;

    fn hosts() -> Vec<String> {
        vec!["fal.ai".into(), "fal.run".into()]
    }

    fn headers_with_target(target: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(TARGET_URL_HEADER),
            HeaderValue::from_str(target).unwrap(),
        );
        headers
    }

    #[test]
    fn accepts_provider_hosts_and_subdomains() {
        let headers = headers_with_target("https://queue.fal.run/fal-ai/veo2/requests/abc");
        let uri = target_url(&headers, &hosts()).unwrap();
        assert_eq!(uri.host(), Some("queue.fal.run"));

        let headers = headers_with_target("https://fal.ai/x");
        assert!(target_url(&headers, &hosts()).is_ok());
    }

    #[test]
    fn rejects_lookalike_and_foreign_hosts() {
        for target in [
            "https://evilfal.run/x",
            "https://fal.run.example.com/x",
            "https://example.com/x",
            "/relative/path",
        ] {
            let headers = headers_with_target(target);
            assert!(
                matches!(
                    target_url(&headers, &hosts()),
                    Err(GatewayError::InvalidTargetUrl)
                ),
                "{target} should be rejected"
            );
        }
    }

    #[test]
    fn missing_target_header_is_reported() {
        assert!(matches!(
            target_url(&HeaderMap::new(), &hosts()),
            Err(GatewayError::MissingTargetUrl)
        ));
    }

    #[test]
    fn only_payload_and_provider_headers_are_forwarded() {
        assert!(is_forwarded(&header::CONTENT_TYPE));
        assert!(is_forwarded(&HeaderName::from_static("x-fal-queue-priority")));
        assert!(!is_forwarded(&HeaderName::from_static(TARGET_URL_HEADER)));
        assert!(!is_forwarded(&header::AUTHORIZATION));
        assert!(!is_forwarded(&header::COOKIE));
    }
}
