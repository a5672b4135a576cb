//! Route table mapping request paths to endpoints

use hyper::Method;
use std::collections::HashMap;

/// Everything the gateway knows how to serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    CaptchaSent,
    LoginCellphone,
    QrKey,
    QrCheck,
    LoginStatus,
    Logout,
    UserDetail,
    UserPlaylist,
    SongUrl,
    SongDetail,
    PlaylistDetail,
    RecommendResource,
    RecommendSongs,
    Search,
    Banner,
    QrLoginRedirect,
    QrLoginPage,
}

/// Which request methods a route accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodRule {
    /// GET only; anything else is rejected with 405
    GetOnly,
    Any,
}

impl MethodRule {
    pub fn allows(&self, method: &Method) -> bool {
        match self {
            MethodRule::GetOnly => *method == Method::GET,
            MethodRule::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub endpoint: Endpoint,
    pub method_rule: MethodRule,
}

/// Static path table, built once at startup and shared by reference
#[derive(Debug, Clone)]
pub struct Router {
    routes: HashMap<&'static str, Route>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        use Endpoint::*;
        use MethodRule::*;

        let table = [
            // Login
            ("/api/captcha/sent", CaptchaSent, GetOnly),
            ("/api/login/cellphone", LoginCellphone, GetOnly),
            ("/api/login/qr/key", QrKey, GetOnly),
            ("/api/login/qr/check", QrCheck, GetOnly),
            ("/api/login/status", LoginStatus, Any),
            ("/api/logout", Logout, Any),
            ("/login/qr", QrLoginRedirect, Any),
            ("/qr-login", QrLoginPage, Any),
            // User
            ("/api/user/detail", UserDetail, Any),
            ("/api/user/playlist", UserPlaylist, Any),
            // Songs and playlists
            ("/api/song/url", SongUrl, Any),
            ("/api/song/detail", SongDetail, Any),
            ("/api/playlist/detail", PlaylistDetail, Any),
            // Discovery
            ("/api/recommend/resource", RecommendResource, Any),
            ("/api/recommend/songs", RecommendSongs, Any),
            ("/api/search", Search, Any),
            ("/api/banner", Banner, Any),
        ];

        let routes = table
            .into_iter()
            .map(|(path, endpoint, method_rule)| (path, Route { endpoint, method_rule }))
            .collect();

        Self { routes }
    }

    pub fn resolve(&self, path: &str) -> Option<&Route> {
        self.routes.get(path)
    }

    /// All registered paths, sorted
    pub fn paths(&self) -> Vec<&'static str> {
        let mut paths: Vec<_> = self.routes.keys().copied().collect();
        paths.sort_unstable();
        paths
    }
}
