//! Cookie jar and the request/response cookie relay
//!
//! The jar holds the vendor session state (login cookies and friends). It is
//! created once at startup and shared between the handlers, which copy the
//! caller's cookies into it and reflect its contents back, and the upstream
//! service, which sends the jar along with each call and stores whatever the
//! upstream sets.
//!
//! Storage, expiry and domain matching are delegated to [`cookie_store`]. Every
//! cookie is kept at the root path so a name maps to exactly one value.

use crate::config::CookieConfig;
use cookie::Cookie;
use cookie_store::CookieStore;
use hyper::header::{HeaderMap, HeaderValue, COOKIE, SET_COOKIE};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;
use url::Url;

const ROOT_PATH: &str = "/";

/// Thread-safe session cookie store for one vendor domain
pub struct CookieJar {
    store: RwLock<CookieStore>,
    origin: Url,
}

impl std::fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieJar")
            .field("domain", &self.domain())
            .field("cookies", &self.cookies().len())
            .finish()
    }
}

impl CookieJar {
    /// Create an empty jar for `domain` (a leading dot is ignored)
    pub fn new(domain: &str) -> anyhow::Result<Self> {
        let host = domain.trim().trim_start_matches('.').to_ascii_lowercase();
        if host.is_empty() {
            anyhow::bail!("Cookie domain must not be empty");
        }
        let origin = Url::parse(&format!("https://{}/", host))
            .map_err(|e| anyhow::anyhow!("Invalid cookie domain '{}': {}", domain, e))?;

        Ok(Self {
            store: RwLock::new(CookieStore::default()),
            origin,
        })
    }

    pub fn domain(&self) -> &str {
        self.origin.host_str().unwrap_or_default()
    }

    fn insert(&self, mut cookie: Cookie<'_>) -> bool {
        cookie.set_path(ROOT_PATH);
        let name = cookie.name().to_string();
        match self.store.write().insert_raw(&cookie, &self.origin) {
            Ok(_) => {
                debug!(name, "Cookie stored");
                true
            }
            Err(e) => {
                debug!(name, error = ?e, "Cookie rejected");
                false
            }
        }
    }

    /// Store one `Set-Cookie` header value.
    ///
    /// Returns false when the header is unparsable, expired with nothing to
    /// delete, or scoped to a foreign `Domain`.
    pub fn store_set_cookie(&self, header: &str) -> bool {
        match Cookie::parse(header) {
            Ok(cookie) => self.insert(cookie),
            Err(e) => {
                debug!(error = %e, "Unparsable Set-Cookie");
                false
            }
        }
    }

    /// Store the pairs of an inbound `Cookie` header (`a=b; c=d`), skipping
    /// malformed ones. Returns how many were stored.
    pub fn store_cookie_header(&self, header: &str) -> usize {
        Cookie::split_parse(header)
            .filter_map(|parsed| parsed.ok())
            .map(|cookie| self.insert(cookie))
            .filter(|stored| *stored)
            .count()
    }

    /// Live `(name, value)` pairs, ordered by name
    pub fn cookies(&self) -> Vec<(String, String)> {
        let store = self.store.read();
        let mut pairs: Vec<(String, String)> = store
            .get_request_values(&self.origin)
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        pairs.sort();
        pairs
    }

    /// Render the live cookies as a `Cookie` request header value
    pub fn header_value(&self) -> Option<String> {
        let cookies = self.cookies();
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Copies request cookies into the jar and reflects the jar onto responses
#[derive(Debug, Clone)]
pub struct CookieRelay {
    jar: Arc<CookieJar>,
    reflect_domain: String,
    path: String,
}

impl CookieRelay {
    pub fn new(jar: Arc<CookieJar>, config: &CookieConfig) -> Self {
        Self {
            jar,
            reflect_domain: config.reflect_domain.clone(),
            path: config.path.clone(),
        }
    }

    pub fn jar(&self) -> &Arc<CookieJar> {
        &self.jar
    }

    /// Copy every cookie of the inbound request into the jar, returning how many were stored
    pub fn absorb(&self, headers: &HeaderMap) -> usize {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|header| self.jar.store_cookie_header(header))
            .sum()
    }

    /// Append one `Set-Cookie` per jar cookie, scoped to the reflect domain and path
    pub fn reflect(&self, headers: &mut HeaderMap) {
        for (name, value) in self.jar.cookies() {
            let rendered = format!(
                "{}={}; Path={}; Domain={}",
                name, value, self.path, self.reflect_domain
            );
            match HeaderValue::from_str(&rendered) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(_) => debug!(name, "Skipping cookie with invalid header characters"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jar() -> CookieJar {
        CookieJar::new("music.163.com").unwrap()
    }

    fn relay() -> CookieRelay {
        CookieRelay::new(Arc::new(jar()), &CookieConfig::default())
    }

    fn pair(name: &str, value: &str) -> (String, String) {
        (name.to_string(), value.to_string())
    }

    #[test]
    fn test_new_normalizes_domain() {
        assert_eq!(CookieJar::new(".Music.163.com").unwrap().domain(), "music.163.com");
        assert!(CookieJar::new("  ").is_err());
        assert!(CookieJar::new("bad domain").is_err());
    }

    #[test]
    fn test_store_cookie_header_skips_malformed_pairs() {
        let jar = jar();
        assert_eq!(jar.store_cookie_header("MUSIC_U=abc; broken; =nameless; __csrf=xyz"), 2);
        assert_eq!(jar.cookies(), vec![pair("MUSIC_U", "abc"), pair("__csrf", "xyz")]);
    }

    #[test]
    fn test_later_value_replaces_earlier() {
        let jar = jar();
        jar.store_cookie_header("a=1; b=2");
        jar.store_cookie_header("a=3");

        assert_eq!(jar.cookies(), vec![pair("a", "3"), pair("b", "2")]);
        assert_eq!(jar.header_value().as_deref(), Some("a=3; b=2"));
    }

    #[test]
    fn test_one_value_per_name_regardless_of_path() {
        let jar = jar();
        assert!(jar.store_set_cookie("MUSIC_U=a; Path=/"));
        assert!(jar.store_set_cookie("MUSIC_U=b; Path=/weapi"));

        assert_eq!(jar.cookies(), vec![pair("MUSIC_U", "b")]);
        assert_eq!(jar.header_value().as_deref(), Some("MUSIC_U=b"));
    }

    #[test]
    fn test_set_cookie_with_max_age_is_live() {
        let jar = jar();
        assert!(jar.store_set_cookie("MUSIC_U=token; Max-Age=1296000; Path=/api; HttpOnly"));
        assert_eq!(jar.cookies(), vec![pair("MUSIC_U", "token")]);
    }

    #[test]
    fn test_zero_max_age_deletes() {
        let jar = jar();
        assert!(jar.store_set_cookie("MUSIC_U=abc; Path=/"));
        assert!(jar.store_set_cookie("MUSIC_U=; Max-Age=0; Path=/"));
        assert!(jar.cookies().is_empty());
    }

    #[test]
    fn test_past_expires_deletes() {
        let jar = jar();
        assert!(jar.store_set_cookie("MUSIC_U=abc; Path=/"));
        assert!(jar.store_set_cookie("MUSIC_U=deleted; expires=Thu, 01-Jan-70 00:00:01 GMT; Path=/"));
        assert!(jar.cookies().is_empty());

        assert!(jar.store_set_cookie("__csrf=abc; Path=/"));
        assert!(jar.store_set_cookie("__csrf=gone; Expires=Thu, 01 Jan 1970 00:00:00 GMT"));
        assert!(jar.header_value().is_none());
    }

    #[test]
    fn test_foreign_domain_is_rejected() {
        let jar = jar();
        assert!(!jar.store_set_cookie("tracker=1; Domain=.evil.example"));
        assert!(jar.store_set_cookie("NMTID=1; Domain=.music.163.com"));
        assert_eq!(jar.cookies(), vec![pair("NMTID", "1")]);
    }

    #[test]
    fn test_garbage_set_cookie_is_rejected() {
        let jar = jar();
        assert!(!jar.store_set_cookie("garbage"));
        assert!(!jar.store_set_cookie("=x; Path=/"));
        assert!(jar.cookies().is_empty());
    }

    #[test]
    fn test_relay_absorbs_and_reflects() {
        let relay = relay();
        let mut request = HeaderMap::new();
        request.insert(COOKIE, HeaderValue::from_static("MUSIC_U=abc; __csrf=def"));

        assert_eq!(relay.absorb(&request), 2);

        let mut response = HeaderMap::new();
        relay.reflect(&mut response);
        let set: Vec<_> = response
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            set,
            vec![
                "MUSIC_U=abc; Path=/; Domain=.music.163.com".to_string(),
                "__csrf=def; Path=/; Domain=.music.163.com".to_string(),
            ]
        );
    }

    #[test]
    fn test_relay_without_cookies_is_noop() {
        let relay = relay();
        assert_eq!(relay.absorb(&HeaderMap::new()), 0);

        let mut response = HeaderMap::new();
        relay.reflect(&mut response);
        assert!(response.get(SET_COOKIE).is_none());
    }

    #[test]
    fn test_jar_concurrent_writers() {
        let jar = Arc::new(jar());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let jar = Arc::clone(&jar);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        jar.store_cookie_header(&format!("c{}={}", i, j));
                        let _ = jar.cookies();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let cookies = jar.cookies();
        assert_eq!(cookies.len(), 8);
        assert!(cookies.iter().all(|(_, value)| value == "49"));
    }
}
