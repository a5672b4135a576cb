//! HTTP-backed music service
//!
//! Forwards each [`ServiceCall`] to an upstream NetEase API server, carrying the
//! shared cookie jar in both directions. The upstream's status and body are
//! returned exactly as received.

use crate::config::UpstreamConfig;
use crate::cookies::CookieJar;
use crate::service::{MusicService, ServiceCall, ServiceError, ServiceResponse};
use async_trait::async_trait;
use reqwest::header::{COOKIE, SET_COOKIE};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub struct UpstreamService {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    jar: Arc<CookieJar>,
}

impl UpstreamService {
    pub fn new(config: &UpstreamConfig, jar: Arc<CookieJar>) -> Result<Self, ServiceError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ServiceError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            timeout: config.request_timeout(),
            jar,
        })
    }

    fn map_reqwest_error(&self, e: reqwest::Error) -> ServiceError {
        if e.is_timeout() {
            ServiceError::Timeout(self.timeout)
        } else {
            ServiceError::Transport(e.to_string())
        }
    }

    /// Build the upstream URL, keeping any path prefix of the base URL
    fn url_for(&self, path: &str, query: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        let joined = format!("{}{}", self.base_url.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        if query.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(query.iter());
        }
        url
    }
}

#[async_trait]
impl MusicService for UpstreamService {
    async fn call(&self, call: ServiceCall) -> Result<ServiceResponse, ServiceError> {
        let (path, query) = call.endpoint();
        let url = self.url_for(path, &query);

        let mut request = self.client.get(url.clone());
        if let Some(cookie) = self.jar.header_value() {
            request = request.header(COOKIE, cookie);
        }

        debug!(call = call.name(), %url, "Forwarding to upstream");

        let response = request
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let status = response.status().as_u16();
        for value in response.headers().get_all(SET_COOKIE) {
            match value.to_str() {
                Ok(header) => {
                    if !self.jar.store_set_cookie(header) {
                        debug!(call = call.name(), header, "Upstream cookie not stored");
                    }
                }
                Err(_) => warn!(call = call.name(), "Ignoring non-ASCII Set-Cookie from upstream"),
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        debug!(call = call.name(), status, bytes = body.len(), "Upstream replied");
        Ok(ServiceResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(base_url: &str) -> UpstreamService {
        let config = UpstreamConfig {
            base_url: base_url.to_string(),
            ..UpstreamConfig::default()
        };
        UpstreamService::new(&config, Arc::new(CookieJar::new("music.163.com").unwrap())).unwrap()
    }

    #[test]
    fn test_url_for_plain_base() {
        let svc = service("http://127.0.0.1:3000");
        let url = svc.url_for("/song/url", &[("id", "33894312")]);
        assert_eq!(url.as_str(), "http://127.0.0.1:3000/song/url?id=33894312");
    }

    #[test]
    fn test_url_for_keeps_prefix_and_encodes() {
        let svc = service("https://api.example.com/ncm/");
        let url = svc.url_for("/cloudsearch", &[("keywords", "海阔天空 beyond")]);
        assert_eq!(url.path(), "/ncm/cloudsearch");
        let pairs: Vec<_> = url.query_pairs().collect();
        assert_eq!(pairs[0].1, "海阔天空 beyond");
    }

    #[test]
    fn test_url_for_without_query() {
        let svc = service("http://127.0.0.1:3000/?stale=1");
        let url = svc.url_for("/banner", &[]);
        assert_eq!(url.as_str(), "http://127.0.0.1:3000/banner");
    }

    #[test]
    fn test_invalid_base_url() {
        let config = UpstreamConfig {
            base_url: "nope".to_string(),
            ..UpstreamConfig::default()
        };
        let result = UpstreamService::new(&config, Arc::new(CookieJar::new("music.163.com").unwrap()));
        assert!(matches!(result, Err(ServiceError::InvalidUrl(_))));
    }
}
