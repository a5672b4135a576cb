//! Browser pages for QR code login

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE, LOCATION};
use hyper::{Response, StatusCode};

pub const QR_LOGIN_PATH: &str = "/qr-login";

const QR_LOGIN_HTML: &str = include_str!("../templates/qr_login.html");
const LOGGED_IN_HTML: &str = include_str!("../templates/logged_in.html");

pub fn redirect_to_qr_login() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::TEMPORARY_REDIRECT;
    response
        .headers_mut()
        .insert(LOCATION, HeaderValue::from_static(QR_LOGIN_PATH));
    response
}

/// The login page, or the "already logged in" page when the session is authorized
pub fn qr_login_page(logged_in: bool) -> Response<Full<Bytes>> {
    let html = if logged_in { LOGGED_IN_HTML } else { QR_LOGIN_HTML };
    let mut response = Response::new(Full::new(Bytes::from_static(html.as_bytes())));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}
