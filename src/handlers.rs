//! Request handling: validation, service dispatch and response relay

use crate::cookies::CookieRelay;
use crate::cors::Cors;
use crate::error::{json_error_response, GatewayErrorCode};
use crate::pages;
use crate::router::{Endpoint, Router};
use crate::service::{MusicService, ServiceCall, ServiceError, ServiceResponse};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Header name for request ID
pub const X_REQUEST_ID: &str = "x-request-id";

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// QR login code meaning the scan was confirmed and the session is authorized
pub const QR_AUTHORIZED: i64 = 803;

/// Decoded query string. The first occurrence of a name wins.
#[derive(Debug, Default, Clone)]
pub struct Query {
    params: HashMap<String, String>,
}

impl Query {
    pub fn parse(raw: Option<&str>) -> Self {
        let mut params = HashMap::new();
        if let Some(raw) = raw {
            for (name, value) in url::form_urlencoded::parse(raw.as_bytes()) {
                params.entry(name.into_owned()).or_insert_with(|| value.into_owned());
            }
        }
        Self { params }
    }

    /// A parameter counts as present only when non-empty
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// How a route treats the cookie relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CookiePolicy {
    /// Absorb request cookies before the call, reflect the jar afterwards
    Relay,
    /// Absorb and reflect only once a QR login reports authorization
    OnAuthorized,
    None,
}

fn cookie_policy(endpoint: Endpoint) -> CookiePolicy {
    match endpoint {
        Endpoint::QrKey => CookiePolicy::None,
        Endpoint::QrCheck => CookiePolicy::OnAuthorized,
        _ => CookiePolicy::Relay,
    }
}

/// Map an API endpoint and its query to a service call.
///
/// Errors carry the static message returned with the 400.
pub fn service_call(endpoint: Endpoint, query: &Query) -> Result<ServiceCall, &'static str> {
    let require = |name: &str, message: &'static str| {
        query.get(name).map(str::to_string).ok_or(message)
    };

    let call = match endpoint {
        Endpoint::CaptchaSent => ServiceCall::CaptchaSent {
            phone: require("phone", "Phone number is required")?,
        },
        Endpoint::LoginCellphone => {
            let phone = require("phone", "Phone number is required")?;
            if let Some(password) = query.get("password") {
                ServiceCall::LoginCellphone {
                    phone,
                    password: password.to_string(),
                }
            } else if let Some(captcha) = query.get("captcha") {
                ServiceCall::CaptchaVerify {
                    phone,
                    captcha: captcha.to_string(),
                }
            } else {
                return Err("Password or captcha is required");
            }
        }
        Endpoint::QrKey => ServiceCall::QrKey,
        Endpoint::QrCheck => ServiceCall::QrCheck {
            key: require("key", "key is required")?,
        },
        Endpoint::LoginStatus | Endpoint::QrLoginPage => ServiceCall::AccountInfo,
        Endpoint::Logout => ServiceCall::Logout,
        Endpoint::UserDetail => ServiceCall::UserDetail {
            uid: require("uid", "uid is required")?,
        },
        Endpoint::UserPlaylist => ServiceCall::UserPlaylist {
            uid: require("uid", "uid is required")?,
        },
        Endpoint::SongUrl => ServiceCall::SongUrl {
            id: require("id", "id is required")?,
        },
        Endpoint::SongDetail => ServiceCall::SongDetail {
            ids: require("ids", "ids is required")?,
        },
        Endpoint::PlaylistDetail => ServiceCall::PlaylistTracks {
            id: require("id", "id is required")?,
        },
        Endpoint::RecommendResource => ServiceCall::RecommendResource,
        Endpoint::RecommendSongs => ServiceCall::RecommendSongs,
        Endpoint::Search => ServiceCall::Search {
            keywords: require("keywords", "keywords is required")?,
        },
        Endpoint::Banner => ServiceCall::Banner,
        Endpoint::QrLoginRedirect => return Err("not a service route"),
    };

    Ok(call)
}

/// Query summary for logs, with passwords masked
fn loggable_query(call: &ServiceCall) -> String {
    call.endpoint()
        .1
        .iter()
        .map(|(name, value)| {
            if *name == "password" {
                format!("{}=***", name)
            } else {
                format!("{}={}", name, value)
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Rebuild the QR key reply as `{"code":200,"data":{"unikey":...}}`
pub fn normalize_qr_key(reply: &ServiceResponse) -> Option<Bytes> {
    let value: serde_json::Value = serde_json::from_slice(&reply.body).ok()?;
    let unikey = value
        .get("unikey")
        .or_else(|| value.pointer("/data/unikey"))?
        .as_str()?;
    let normalized = serde_json::json!({
        "code": 200,
        "data": { "unikey": unikey },
    });
    Some(Bytes::from(normalized.to_string()))
}

/// Whether an account-info reply describes a logged-in session
pub fn is_logged_in(reply: &ServiceResponse) -> bool {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(&reply.body) else {
        return false;
    };
    value.get("code").and_then(|c| c.as_f64()) == Some(200.0)
        && (value.get("account").map_or(false, |a| a.is_object())
            || value.get("profile").map_or(false, |p| p.is_object()))
}

fn json_response(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    response
}

fn service_error_response(call: &ServiceCall, err: ServiceError) -> Response<Full<Bytes>> {
    match err {
        ServiceError::Timeout(_) => {
            warn!(call = call.name(), error = %err, "Music service timed out");
            json_error_response(GatewayErrorCode::UpstreamTimeout, "Music service timed out")
        }
        _ => {
            // Log detailed error internally, return generic message externally
            error!(call = call.name(), error = %err, "Music service call failed");
            json_error_response(
                GatewayErrorCode::UpstreamUnavailable,
                "Music service unavailable",
            )
        }
    }
}

/// Shared request handler state
pub struct Gateway {
    router: Router,
    service: Arc<dyn MusicService>,
    relay: CookieRelay,
    cors: Cors,
}

impl Gateway {
    pub fn new(router: Router, service: Arc<dyn MusicService>, relay: CookieRelay, cors: Cors) -> Self {
        Self {
            router,
            service,
            relay,
            cors,
        }
    }

    pub fn relay(&self) -> &CookieRelay {
        &self.relay
    }

    /// Handle one request. The request body is never read.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>> {
        let (parts, body) = req.into_parts();
        drop(body);

        // Generate or propagate request ID
        let request_id = parts
            .headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let method = parts.method.clone();
        let path = parts.uri.path().to_string();
        debug!(%method, %path, request_id, "Incoming request");

        let mut response = match self.router.resolve(&path) {
            None => json_error_response(GatewayErrorCode::NotFound, "Not found"),
            Some(_) if method == Method::OPTIONS => self.cors.preflight(),
            Some(route) if !route.method_rule.allows(&method) => {
                debug!(%method, %path, "Method not allowed");
                json_error_response(GatewayErrorCode::MethodNotAllowed, "Method not allowed")
            }
            Some(route) => {
                let query = Query::parse(parts.uri.query());
                self.dispatch(route.endpoint, &path, &query, &parts.headers).await
            }
        };

        self.cors.apply(response.headers_mut());
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }
        response
    }

    async fn dispatch(
        &self,
        endpoint: Endpoint,
        path: &str,
        query: &Query,
        headers: &HeaderMap,
    ) -> Response<Full<Bytes>> {
        match endpoint {
            Endpoint::QrLoginRedirect => return pages::redirect_to_qr_login(),
            Endpoint::QrLoginPage => return self.qr_login_page().await,
            _ => {}
        }

        let call = match service_call(endpoint, query) {
            Ok(call) => call,
            Err(message) => {
                debug!(path, message, "Missing required parameter");
                return json_error_response(GatewayErrorCode::MissingParameter, message);
            }
        };

        let policy = cookie_policy(endpoint);
        if policy == CookiePolicy::Relay {
            self.relay.absorb(headers);
        }

        let summary = loggable_query(&call);
        let reply = match self.service.call(call.clone()).await {
            Ok(reply) => reply,
            Err(e) => return service_error_response(&call, e),
        };

        let Ok(status) = StatusCode::from_u16(reply.status) else {
            error!(path, status = reply.status, "Music service returned an invalid status");
            return json_error_response(
                GatewayErrorCode::UpstreamUnavailable,
                "Music service returned an invalid status",
            );
        };

        let mut response = if endpoint == Endpoint::QrKey {
            match normalize_qr_key(&reply) {
                Some(body) => json_response(StatusCode::OK, body),
                None => {
                    warn!(path, status = reply.status, "No unikey in QR key reply, relaying as-is");
                    json_response(status, reply.body.clone())
                }
            }
        } else {
            json_response(status, reply.body.clone())
        };

        match policy {
            CookiePolicy::Relay => self.relay.reflect(response.headers_mut()),
            CookiePolicy::OnAuthorized if reply.json_code() == Some(QR_AUTHORIZED) => {
                self.relay.absorb(headers);
                self.relay.reflect(response.headers_mut());
                info!(path, "QR login authorized, session cookies reflected");
            }
            _ => {}
        }

        info!(path, query = %summary, status = reply.status, "[OK]");
        response
    }

    async fn qr_login_page(&self) -> Response<Full<Bytes>> {
        let logged_in = match self.service.call(ServiceCall::AccountInfo).await {
            Ok(reply) => is_logged_in(&reply),
            Err(e) => {
                warn!(error = %e, "Account check failed, serving QR login page");
                false
            }
        };
        debug!(logged_in, "Serving QR login frontend");
        pages::qr_login_page(logged_in)
    }
}
