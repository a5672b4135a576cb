//! The music service seam
//!
//! Handlers never talk to NetEase directly. They build a [`ServiceCall`] and
//! hand it to a [`MusicService`], relaying whatever comes back.

use async_trait::async_trait;
use hyper::body::Bytes;
use std::time::Duration;

/// One logical vendor operation with its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    CaptchaSent { phone: String },
    LoginCellphone { phone: String, password: String },
    CaptchaVerify { phone: String, captcha: String },
    QrKey,
    QrCheck { key: String },
    AccountInfo,
    Logout,
    UserDetail { uid: String },
    UserPlaylist { uid: String },
    SongUrl { id: String },
    SongDetail { ids: String },
    /// Every track of a playlist, not just the first page
    PlaylistTracks { id: String },
    RecommendResource,
    RecommendSongs,
    Search { keywords: String },
    Banner,
}

impl ServiceCall {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            ServiceCall::CaptchaSent { .. } => "captcha_sent",
            ServiceCall::LoginCellphone { .. } => "login_cellphone",
            ServiceCall::CaptchaVerify { .. } => "captcha_verify",
            ServiceCall::QrKey => "qr_key",
            ServiceCall::QrCheck { .. } => "qr_check",
            ServiceCall::AccountInfo => "account_info",
            ServiceCall::Logout => "logout",
            ServiceCall::UserDetail { .. } => "user_detail",
            ServiceCall::UserPlaylist { .. } => "user_playlist",
            ServiceCall::SongUrl { .. } => "song_url",
            ServiceCall::SongDetail { .. } => "song_detail",
            ServiceCall::PlaylistTracks { .. } => "playlist_tracks",
            ServiceCall::RecommendResource => "recommend_resource",
            ServiceCall::RecommendSongs => "recommend_songs",
            ServiceCall::Search { .. } => "search",
            ServiceCall::Banner => "banner",
        }
    }

    /// Upstream path and query pairs for this call
    pub fn endpoint(&self) -> (&'static str, Vec<(&'static str, &str)>) {
        match self {
            ServiceCall::CaptchaSent { phone } => ("/captcha/sent", vec![("phone", phone.as_str())]),
            ServiceCall::LoginCellphone { phone, password } => (
                "/login/cellphone",
                vec![("phone", phone.as_str()), ("password", password.as_str())],
            ),
            ServiceCall::CaptchaVerify { phone, captcha } => (
                "/login/cellphone",
                vec![("phone", phone.as_str()), ("captcha", captcha.as_str())],
            ),
            ServiceCall::QrKey => ("/login/qr/key", Vec::new()),
            ServiceCall::QrCheck { key } => ("/login/qr/check", vec![("key", key.as_str())]),
            ServiceCall::AccountInfo => ("/user/account", Vec::new()),
            ServiceCall::Logout => ("/logout", Vec::new()),
            ServiceCall::UserDetail { uid } => ("/user/detail", vec![("uid", uid.as_str())]),
            ServiceCall::UserPlaylist { uid } => ("/user/playlist", vec![("uid", uid.as_str())]),
            ServiceCall::SongUrl { id } => ("/song/url", vec![("id", id.as_str())]),
            ServiceCall::SongDetail { ids } => ("/song/detail", vec![("ids", ids.as_str())]),
            ServiceCall::PlaylistTracks { id } => ("/playlist/track/all", vec![("id", id.as_str())]),
            ServiceCall::RecommendResource => ("/recommend/resource", Vec::new()),
            ServiceCall::RecommendSongs => ("/recommend/songs", Vec::new()),
            ServiceCall::Search { keywords } => ("/cloudsearch", vec![("keywords", keywords.as_str())]),
            ServiceCall::Banner => ("/banner", Vec::new()),
        }
    }
}

/// Raw reply of a service call, relayed to the caller untouched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponse {
    pub status: u16,
    pub body: Bytes,
}

impl ServiceResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// The numeric `code` field of a JSON body, if any
    pub fn json_code(&self) -> Option<i64> {
        let value: serde_json::Value = serde_json::from_slice(&self.body).ok()?;
        value.get("code").and_then(|c| c.as_f64()).map(|c| c as i64)
    }
}

/// Failure to obtain any reply from the service
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service did not answer within {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("service transport error: {0}")]
    Transport(String),
    #[error("invalid service URL: {0}")]
    InvalidUrl(String),
}

/// Performs vendor operations on behalf of the handlers
#[async_trait]
pub trait MusicService: Send + Sync {
    async fn call(&self, call: ServiceCall) -> Result<ServiceResponse, ServiceError>;
}
