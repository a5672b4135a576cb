use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Environment variable that overrides `server.port`
pub const PORT_ENV: &str = "PORT";

/// Global configuration for the gateway
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Where the music service calls are sent
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Cookie relay scoping
    #[serde(default)]
    pub cookies: CookieConfig,

    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Listen port (default: 8080, overridden by the PORT environment variable)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Time in seconds in-flight requests get to finish after a shutdown signal
    #[serde(default = "default_shutdown_grace_period")]
    pub shutdown_grace_period_secs: u64,

    /// Maximum concurrent HTTP/2 streams per connection
    #[serde(default = "default_max_concurrent_streams")]
    pub max_concurrent_streams: u32,
}

impl ServerConfig {
    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_listen_port(),
            shutdown_grace_period_secs: default_shutdown_grace_period(),
            max_concurrent_streams: default_max_concurrent_streams(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the NetEase API server (default: http://127.0.0.1:3000)
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,

    /// Maximum time in seconds to wait for an upstream reply
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum idle connections kept to the upstream host
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base_url(),
            request_timeout_secs: default_request_timeout(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CookieConfig {
    /// Vendor domain the jar is keyed by
    #[serde(default = "default_cookie_domain")]
    pub domain: String,

    /// Domain attribute written on reflected Set-Cookie headers
    #[serde(default = "default_reflect_domain")]
    pub reflect_domain: String,

    /// Path attribute written on reflected Set-Cookie headers
    #[serde(default = "default_cookie_path")]
    pub path: String,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            domain: default_cookie_domain(),
            reflect_domain: default_reflect_domain(),
            path: default_cookie_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    #[serde(default = "default_allow_origin")]
    pub allow_origin: String,

    #[serde(default = "default_allow_methods")]
    pub allow_methods: String,

    #[serde(default = "default_allow_headers")]
    pub allow_headers: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origin: default_allow_origin(),
            allow_methods: default_allow_methods(),
            allow_headers: default_allow_headers(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_shutdown_grace_period() -> u64 {
    5
}

fn default_max_concurrent_streams() -> u32 {
    250
}

fn default_upstream_base_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_pool_max_idle_per_host() -> usize {
    10
}

fn default_cookie_domain() -> String {
    "music.163.com".to_string()
}

fn default_reflect_domain() -> String {
    ".music.163.com".to_string()
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_allow_origin() -> String {
    "*".to_string()
}

fn default_allow_methods() -> String {
    "GET, POST, OPTIONS".to_string()
}

fn default_allow_headers() -> String {
    "Content-Type".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply a `PORT` value on top of the file configuration. Empty values are ignored.
    pub fn apply_port_override(&mut self, value: Option<&str>) -> anyhow::Result<()> {
        let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(());
        };
        self.server.port = raw
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {} value '{}': {}", PORT_ENV, raw, e))?;
        Ok(())
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        match Url::parse(&self.upstream.base_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(format!(
                "upstream.base_url must use http or https, got '{}'",
                url.scheme()
            )),
            Err(e) => errors.push(format!(
                "upstream.base_url '{}' is not a valid URL: {}",
                self.upstream.base_url, e
            )),
        }

        if self.cookies.domain.trim().is_empty() {
            errors.push("cookies.domain must not be empty".to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
port = 9000
bind = "127.0.0.1"
shutdown_grace_period_secs = 2

[upstream]
base_url = "http://music-api.internal:3000"
request_timeout_secs = 10

[cookies]
domain = "music.163.com"
reflect_domain = ".music.163.com"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.shutdown_grace_period(), Duration::from_secs(2));
        assert_eq!(config.upstream.base_url, "http://music-api.internal:3000");
        assert_eq!(config.upstream.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.upstream.pool_max_idle_per_host, 10);
        assert_eq!(config.cookies.path, "/");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.shutdown_grace_period_secs, 5);
        assert_eq!(config.server.max_concurrent_streams, 250);
        assert_eq!(config.upstream.base_url, "http://127.0.0.1:3000");
        assert_eq!(config.upstream.request_timeout_secs, 30);
        assert_eq!(config.cookies.domain, "music.163.com");
        assert_eq!(config.cookies.reflect_domain, ".music.163.com");
        assert_eq!(config.cors.allow_origin, "*");
        assert_eq!(config.cors.allow_methods, "GET, POST, OPTIONS");
        assert_eq!(config.cors.allow_headers, "Content-Type");
    }

    #[test]
    fn test_port_override() {
        let mut config = Config::default();
        config.apply_port_override(Some("3000")).unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_port_override_ignores_empty() {
        let mut config = Config::default();
        config.apply_port_override(Some("  ")).unwrap();
        assert_eq!(config.server.port, 8080);
        config.apply_port_override(None).unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_port_override_rejects_garbage() {
        let mut config = Config::default();
        let err = config.apply_port_override(Some("eighty")).unwrap_err();
        assert!(err.to_string().contains("Invalid PORT value"));
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_validate_reports_all_errors() {
        let mut config = Config::default();
        config.upstream.base_url = "ftp://example.com".to_string();
        config.cookies.domain = " ".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("must use http or https"));
        assert!(err.contains("cookies.domain must not be empty"));
    }

    #[test]
    fn test_validate_rejects_unparsable_url() {
        let mut config = Config::default();
        config.upstream.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 18080\n\n[upstream]\nbase_url = \"https://api.example.com\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 18080);
        assert_eq!(config.upstream.base_url, "https://api.example.com");
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[upstream]\nbase_url = \"::nope::\"").unwrap();

        assert!(Config::load(file.path()).is_err());
    }
}
