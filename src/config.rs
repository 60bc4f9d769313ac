use std::env;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3600;
pub const DEFAULT_QUEUE_URL: &str = "https://queue.fal.run";
pub const DEFAULT_REST_URL: &str = "https://rest.alpha.fal.ai";
pub const DEFAULT_ENDPOINT_ID: &str = "fal-ai/veo2/image-to-video";
pub const DEFAULT_PROXY_ALLOWED_HOSTS: &str = "fal.ai,fal.run";
pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(60);

/// Gateway configuration loaded from environment variables.
///
/// | Env Var                   | Default                      |
/// |---------------------------|------------------------------|
/// | `HOST`                    | `0.0.0.0`                    |
/// | `PORT`                    | `3600`                       |
/// | `FAL_KEY`                 | unset                        |
/// | `FAL_QUEUE_URL`           | `https://queue.fal.run`      |
/// | `FAL_REST_URL`            | `https://rest.alpha.fal.ai`  |
/// | `FAL_ENDPOINT_ID`         | `fal-ai/veo2/image-to-video` |
/// | `FAL_PROXY_ALLOWED_HOSTS` | `fal.ai,fal.run`             |
/// | `FAL_PROXY_TIMEOUT_SECS`  | `60`                         |
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Provider credential. Never sent to clients; proxy traffic is rejected
    /// while it is missing.
    pub fal_key: Option<String>,
    pub queue_url: String,
    pub rest_url: String,
    pub endpoint_id: String,
    pub proxy_allowed_hosts: Vec<String>,
    pub proxy_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: DEFAULT_PORT,
            fal_key: None,
            queue_url: DEFAULT_QUEUE_URL.to_owned(),
            rest_url: DEFAULT_REST_URL.to_owned(),
            endpoint_id: DEFAULT_ENDPOINT_ID.to_owned(),
            proxy_allowed_hosts: split_hosts(DEFAULT_PROXY_ALLOWED_HOSTS),
            proxy_timeout: DEFAULT_PROXY_TIMEOUT,
        }
    }
}

impl Config {
    /// Unparseable numeric values fall back to their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = env::var("PORT")
            .map_err(|_| ())
            .and_then(|string| string.parse::<u16>().map_err(|_| ()))
            .unwrap_or(defaults.port);

        let proxy_timeout = env::var("FAL_PROXY_TIMEOUT_SECS")
            .map_err(|_| ())
            .and_then(|string| string.parse::<u64>().map_err(|_| ()))
            .map(Duration::from_secs)
            .unwrap_or(defaults.proxy_timeout);

        let proxy_allowed_hosts = env::var("FAL_PROXY_ALLOWED_HOSTS")
            .map(|hosts| split_hosts(&hosts))
            .unwrap_or(defaults.proxy_allowed_hosts);

        Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port,
            fal_key: env::var("FAL_KEY").ok().filter(|key| !key.is_empty()),
            queue_url: env::var("FAL_QUEUE_URL").unwrap_or(defaults.queue_url),
            rest_url: env::var("FAL_REST_URL").unwrap_or(defaults.rest_url),
            endpoint_id: env::var("FAL_ENDPOINT_ID").unwrap_or(defaults.endpoint_id),
            proxy_allowed_hosts,
            proxy_timeout,
        }
    }
}

fn split_hosts(hosts: &str) -> Vec<String> {
    hosts
        .split(',')
        .map(|host| host.trim().to_ascii_lowercase())
        .filter(|host| !host.is_empty())
        .collect()
}
