//! Cross-origin headers applied to every response

use crate::config::CorsConfig;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN,
};
use hyper::{Response, StatusCode};

#[derive(Debug, Clone)]
pub struct Cors {
    allow_origin: HeaderValue,
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
}

impl Default for Cors {
    fn default() -> Self {
        Self {
            allow_origin: HeaderValue::from_static("*"),
            allow_methods: HeaderValue::from_static("GET, POST, OPTIONS"),
            allow_headers: HeaderValue::from_static("Content-Type"),
        }
    }
}

impl Cors {
    pub fn from_config(config: &CorsConfig) -> anyhow::Result<Self> {
        let value = |name: &str, raw: &str| {
            HeaderValue::from_str(raw)
                .map_err(|e| anyhow::anyhow!("Invalid cors.{} value '{}': {}", name, raw, e))
        };
        Ok(Self {
            allow_origin: value("allow_origin", &config.allow_origin)?,
            allow_methods: value("allow_methods", &config.allow_methods)?,
            allow_headers: value("allow_headers", &config.allow_headers)?,
        })
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, self.allow_origin.clone());
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers.clone());
    }

    /// Answer an OPTIONS preflight
    pub fn preflight(&self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::new()));
        *response.status_mut() = StatusCode::NO_CONTENT;
        self.apply(response.headers_mut());
        response
    }
}
