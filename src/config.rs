//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override)
//!
//! Validation runs eagerly and reports every problem at once.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub kinde: KindeConfig,
    pub session: SessionConfig,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub access: AccessConfig,
    /// Exposes the health and metrics endpoints
    #[serde(default)]
    pub debug: bool,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 3000)
    pub port: u16,
    /// Upper bound for a single request, provider round trips included
    pub request_timeout_seconds: u64,
}

/// A configuration value that must never be printed
///
/// `Debug` and `Display` both render `[redacted]`; the value is only
/// reachable through [`Secret::expose`].
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([redacted])")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

/// Kinde application settings
#[derive(Debug, Clone, Deserialize)]
pub struct KindeConfig {
    /// Kinde business domain (e.g., "https://acme.kinde.com")
    #[serde(default)]
    pub auth_domain: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Secret,
    /// Callback URL registered with Kinde
    #[serde(default)]
    pub redirect_url: String,
    /// Where Kinde sends the browser after logout
    #[serde(default)]
    pub logout_redirect_url: String,
    /// Fallback target after a successful login
    pub post_login_redirect_url: Option<String>,
    /// API audience requested in the authorization URL
    pub audience: Option<String>,
    pub scope: String,
    /// Timeout for calls to the Kinde token and JWKS endpoints
    pub http_timeout_seconds: u64,
}

impl KindeConfig {
    /// Client-visible subset of the settings
    pub fn public(&self) -> PublicConfig {
        PublicConfig {
            auth_domain: self.auth_domain.clone(),
            client_id: self.client_id.clone(),
            redirect_url: self.redirect_url.clone(),
            logout_redirect_url: self.logout_redirect_url.clone(),
            post_login_redirect_url: self.post_login_redirect_url.clone(),
            audience: self.audience.clone(),
        }
    }

    /// Audience with blank values treated as unset
    pub fn audience(&self) -> Option<&str> {
        self.audience
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Configuration that is safe to hand to a browser
///
/// Deliberately has no field for the client secret or session password.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublicConfig {
    pub auth_domain: String,
    pub client_id: String,
    pub redirect_url: String,
    pub logout_redirect_url: String,
    pub post_login_redirect_url: Option<String>,
    pub audience: Option<String>,
}

/// Session cookie configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Password the cookie encryption key is derived from (32+ bytes)
    #[serde(default)]
    pub password: Secret,
    /// Session lifetime in seconds (default: 604800 = 7 days)
    pub max_age_seconds: i64,
    pub cookie: CookieConfig,
}

/// Session cookie attributes
#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    pub name: String,
    pub path: String,
    pub same_site: SameSitePolicy,
    pub secure: bool,
    pub http_only: bool,
}

/// `SameSite` cookie attribute
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    Strict,
    #[default]
    Lax,
    None,
}

impl From<SameSitePolicy> for axum_extra::extract::cookie::SameSite {
    fn from(policy: SameSitePolicy) -> Self {
        use axum_extra::extract::cookie::SameSite;

        match policy {
            SameSitePolicy::Strict => SameSite::Strict,
            SameSitePolicy::Lax => SameSite::Lax,
            SameSitePolicy::None => SameSite::None,
        }
    }
}

/// Paths of the authentication endpoints
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub login: String,
    pub callback: String,
    pub register: String,
    pub logout: String,
    pub health: String,
    pub access: String,
    pub metrics: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            login: "/api/login".to_string(),
            callback: "/api/callback".to_string(),
            register: "/api/register".to_string(),
            logout: "/api/logout".to_string(),
            health: "/api/health".to_string(),
            access: "/api/access".to_string(),
            metrics: "/api/metrics".to_string(),
        }
    }
}

impl EndpointsConfig {
    fn all(&self) -> [(&'static str, &str); 7] {
        [
            ("login", &self.login),
            ("callback", &self.callback),
            ("register", &self.register),
            ("logout", &self.logout),
            ("health", &self.health),
            ("access", &self.access),
            ("metrics", &self.metrics),
        ]
    }

    /// Whether `path` is one of the authentication endpoints
    pub fn contains(&self, path: &str) -> bool {
        self.all().iter().any(|(_, endpoint)| *endpoint == path)
    }
}

/// Route guard configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub enabled: bool,
    /// Route patterns that require a logged-in user
    pub protected: Vec<String>,
    /// Route patterns only meaningful to logged-out users (e.g. "/login")
    pub logged_out_only: Vec<String>,
    /// Where logged-in users are sent from logged-out-only routes
    pub logged_in_landing: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            protected: Vec::new(),
            logged_out_only: Vec::new(),
            logged_in_landing: "/".to_string(),
        }
    }
}

/// Per-route permission requirements
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub rules: Vec<AccessRuleConfig>,
}

/// One access rule as written in configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AccessRuleConfig {
    /// Route pattern (e.g., "/admin/**")
    pub route: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Where users lacking a permission are sent
    pub redirect_url: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

const MIN_SESSION_PASSWORD_BYTES: usize = 32;
/// Browsers cap cookie lifetimes at 400 days
const MAX_SESSION_AGE_SECONDS: i64 = 400 * 24 * 60 * 60;

impl AppConfig {
    /// Load configuration from `config/` and the environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (KINDE_AXUM__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        Self::load_from_dir(Path::new("config"))
    }

    /// Same as [`AppConfig::load`] with the file directory made explicit
    pub fn load_from_dir(dir: &Path) -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("server.request_timeout_seconds", 30)?
            .set_default("kinde.scope", "openid profile email offline")?
            .set_default("kinde.http_timeout_seconds", 10)?
            .set_default("session.max_age_seconds", 604800)?
            .set_default("session.cookie.name", "kinde_session")?
            .set_default("session.cookie.path", "/")?
            .set_default("session.cookie.same_site", "lax")?
            .set_default("session.cookie.secure", true)?
            .set_default("session.cookie.http_only", true)?
            .set_default("debug", false)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::from(dir.join("default.toml")).required(false))
            .add_source(File::from(dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("KINDE_AXUM")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("guard.protected")
                    .with_list_parse_key("guard.logged_out_only")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Check every required field, collecting all problems
    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        let problems = self.problems();
        if !problems.is_empty() {
            return Err(crate::error::AppError::Config(format!(
                "invalid configuration: {}",
                problems.join("; ")
            )));
        }

        if !self.session.cookie.secure && self.kinde.redirect_url.starts_with("https://") {
            tracing::warn!(
                cookie = %self.session.cookie.name,
                "Session cookie is not marked Secure although the app is served over https"
            );
        }

        if self.debug {
            tracing::warn!(
                health = %self.endpoints.health,
                metrics = %self.endpoints.metrics,
                "Debug mode enabled; diagnostic endpoints are exposed"
            );
        }

        Ok(())
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let required = [
            ("kinde.auth_domain", self.kinde.auth_domain.trim().is_empty()),
            ("kinde.client_id", self.kinde.client_id.trim().is_empty()),
            ("kinde.client_secret", self.kinde.client_secret.is_empty()),
            ("kinde.redirect_url", self.kinde.redirect_url.trim().is_empty()),
            (
                "kinde.logout_redirect_url",
                self.kinde.logout_redirect_url.trim().is_empty(),
            ),
            ("session.password", self.session.password.is_empty()),
        ];
        for (field, missing) in required {
            if missing {
                problems.push(format!("{field} is required"));
            }
        }

        let urls = [
            ("kinde.auth_domain", &self.kinde.auth_domain),
            ("kinde.redirect_url", &self.kinde.redirect_url),
            ("kinde.logout_redirect_url", &self.kinde.logout_redirect_url),
        ];
        for (field, value) in urls {
            if !value.trim().is_empty() && !is_http_url(value) {
                problems.push(format!("{field} must be an absolute http(s) URL"));
            }
        }

        if !self.session.password.is_empty()
            && self.session.password.expose().len() < MIN_SESSION_PASSWORD_BYTES
        {
            problems.push(format!(
                "session.password must be at least {MIN_SESSION_PASSWORD_BYTES} bytes"
            ));
        }

        if !(1..=MAX_SESSION_AGE_SECONDS).contains(&self.session.max_age_seconds) {
            problems.push(format!(
                "session.max_age_seconds must be between 1 and {MAX_SESSION_AGE_SECONDS}"
            ));
        }

        if self.session.cookie.name.trim().is_empty() {
            problems.push("session.cookie.name is required".to_string());
        }

        if self.session.cookie.same_site == SameSitePolicy::None && !self.session.cookie.secure {
            problems.push("session.cookie.same_site=none requires session.cookie.secure".to_string());
        }

        for (name, path) in self.endpoints.all() {
            if !path.starts_with('/') {
                problems.push(format!("endpoints.{name} must start with '/'"));
            }
        }

        let patterns = self
            .guard
            .protected
            .iter()
            .map(|p| ("guard.protected", p))
            .chain(
                self.guard
                    .logged_out_only
                    .iter()
                    .map(|p| ("guard.logged_out_only", p)),
            )
            .chain(self.access.rules.iter().map(|r| ("access.rules.route", &r.route)));
        for (field, pattern) in patterns {
            if !pattern.starts_with('/') {
                problems.push(format!("{field} entry '{pattern}' must start with '/'"));
            }
        }

        for rule in &self.access.rules {
            if rule.redirect_url.trim().is_empty() {
                problems.push(format!(
                    "access.rules.redirect_url is required for route '{}'",
                    rule.route
                ));
            }
        }

        problems
    }
}

fn is_http_url(value: &str) -> bool {
    url::Url::parse(value.trim())
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
                request_timeout_seconds: 30,
            },
            kinde: KindeConfig {
                auth_domain: "https://acme.kinde.com".to_string(),
                client_id: "client-id".to_string(),
                client_secret: Secret::new("client-secret"),
                redirect_url: "http://localhost:3000/api/callback".to_string(),
                logout_redirect_url: "http://localhost:3000".to_string(),
                post_login_redirect_url: Some("/dashboard".to_string()),
                audience: None,
                scope: "openid profile email offline".to_string(),
                http_timeout_seconds: 10,
            },
            session: SessionConfig {
                password: Secret::new("x".repeat(32)),
                max_age_seconds: 604_800,
                cookie: CookieConfig {
                    name: "kinde_session".to_string(),
                    path: "/".to_string(),
                    same_site: SameSitePolicy::Lax,
                    secure: false,
                    http_only: true,
                },
            },
            endpoints: EndpointsConfig::default(),
            guard: GuardConfig::default(),
            access: AccessConfig::default(),
            debug: false,
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn validate_accepts_complete_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validate_lists_every_missing_field() {
        let mut config = valid_config();
        config.kinde.auth_domain = String::new();
        config.kinde.client_id = "  ".to_string();
        config.kinde.client_secret = Secret::default();
        config.session.password = Secret::default();

        let error = config.validate().expect_err("missing fields must fail");
        let crate::error::AppError::Config(message) = error else {
            panic!("expected a configuration error");
        };
        for field in [
            "kinde.auth_domain",
            "kinde.client_id",
            "kinde.client_secret",
            "session.password",
        ] {
            assert!(message.contains(field), "{field} missing from: {message}");
        }
        assert!(!message.contains("kinde.redirect_url"));
    }

    #[test]
    fn validate_rejects_short_session_password() {
        let mut config = valid_config();
        config.session.password = Secret::new("short");

        let error = config.validate().expect_err("short password must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("session.password must be at least 32 bytes")
        ));
    }

    #[test]
    fn validate_bounds_session_max_age() {
        let mut config = valid_config();
        config.session.max_age_seconds = 10_000_000_000_000;
        let error = config.validate().expect_err("max age beyond cookie cap must fail");
        assert!(error.to_string().contains("session.max_age_seconds must be between"));

        config.session.max_age_seconds = MAX_SESSION_AGE_SECONDS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_relative_domain() {
        let mut config = valid_config();
        config.kinde.auth_domain = "acme.kinde.com".to_string();

        let error = config.validate().expect_err("domain must be a URL");
        assert!(error.to_string().contains("kinde.auth_domain must be an absolute"));
    }

    #[test]
    fn secrets_never_appear_in_debug_output() {
        let config = valid_config();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("client-secret"));
        assert!(!rendered.contains(&"x".repeat(32)));
        assert!(rendered.contains("[redacted]"));
    }

    #[test]
    fn public_config_has_no_secrets() {
        let config = valid_config();
        let json = serde_json::to_string(&config.kinde.public()).unwrap();
        assert!(json.contains("client-id"));
        assert!(!json.contains("client-secret"));
    }

    #[test]
    fn load_from_dir_reads_toml_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
debug = true

[kinde]
auth_domain = "https://acme.kinde.com"
client_id = "from-file"
client_secret = "file-secret"
redirect_url = "https://app.example.com/api/callback"
logout_redirect_url = "https://app.example.com"

[session]
password = "0123456789abcdef0123456789abcdef"

[guard]
protected = ["/dashboard/**"]

[[access.rules]]
route = "/admin/**"
permissions = ["admin"]
redirect_url = "/denied"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from_dir(dir.path()).expect("config loads");
        assert_eq!(config.kinde.client_id, "from-file");
        assert_eq!(config.kinde.scope, "openid profile email offline");
        assert_eq!(config.session.cookie.name, "kinde_session");
        assert_eq!(config.session.cookie.same_site, SameSitePolicy::Lax);
        assert!(config.session.cookie.secure);
        assert!(config.debug);
        assert_eq!(config.guard.protected, vec!["/dashboard/**".to_string()]);
        assert_eq!(config.access.rules.len(), 1);
        assert_eq!(config.endpoints.login, "/api/login");
    }

    #[test]
    fn load_from_dir_fails_fast_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let error = AppConfig::load_from_dir(dir.path()).expect_err("empty config must fail");
        assert!(error.to_string().contains("kinde.client_id is required"));
    }
}
