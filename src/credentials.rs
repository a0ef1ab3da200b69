//! Datto RMM credential resolution.
//!
//! Credentials come from one of two sources:
//!
//! - **Environment** — `DATTO_API_KEY` / `DATTO_API_SECRET`, falling back to
//!   the gateway aliases `X_API_KEY` / `X_API_SECRET`. Resolved once at
//!   startup.
//! - **Request headers** (gateway mode) — `X-Datto-API-Key` /
//!   `X-Datto-API-Secret`, falling back to `X-API-Key` / `X-API-Secret`.
//!   Resolved per HTTP request and passed down the call chain, never stored.
//!
//! Both sources read the platform from a third value (`DATTO_PLATFORM` or
//! `X-Datto-Platform`). Unrecognized platforms fall back to
//! [`Platform::Concord`] without an error.

use std::fmt;

use axum::http::HeaderMap;

/// Environment variable names, primary then alias.
pub const ENV_API_KEY: [&str; 2] = ["DATTO_API_KEY", "X_API_KEY"];
pub const ENV_API_SECRET: [&str; 2] = ["DATTO_API_SECRET", "X_API_SECRET"];
pub const ENV_PLATFORM: &str = "DATTO_PLATFORM";

/// Header names, primary then alias. Lookups are case-insensitive.
pub const HEADER_API_KEY: [&str; 2] = ["x-datto-api-key", "x-api-key"];
pub const HEADER_API_SECRET: [&str; 2] = ["x-datto-api-secret", "x-api-secret"];
pub const HEADER_PLATFORM: &str = "x-datto-platform";

/// Headers a gateway-mode caller must send, as advertised in 401 responses.
pub const REQUIRED_HEADERS: [&str; 2] = ["X-Datto-API-Key", "X-Datto-API-Secret"];

/// One of the regional Datto RMM API endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    Pinotage,
    Merlot,
    #[default]
    Concord,
    Vidal,
    Zinfandel,
    Syrah,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::Pinotage,
        Platform::Merlot,
        Platform::Concord,
        Platform::Vidal,
        Platform::Zinfandel,
        Platform::Syrah,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Pinotage => "pinotage",
            Platform::Merlot => "merlot",
            Platform::Concord => "concord",
            Platform::Vidal => "vidal",
            Platform::Zinfandel => "zinfandel",
            Platform::Syrah => "syrah",
        }
    }

    /// Parse a platform codename, returning `None` for anything unrecognized.
    pub fn parse(value: &str) -> Option<Platform> {
        Self::ALL.into_iter().find(|p| p.as_str() == value)
    }

    /// Parse a platform codename, substituting the default for missing or
    /// unrecognized values.
    pub fn parse_or_default(value: Option<&str>) -> Platform {
        value.and_then(Platform::parse).unwrap_or_default()
    }

    /// API root for this platform (no trailing slash).
    pub fn base_url(self) -> String {
        format!("https://{}-api.centrastage.net", self.as_str())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved API key, secret and platform, scoped to one client construction.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub platform: Platform,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("platform", &self.platform)
            .finish()
    }
}

impl Credentials {
    /// Resolve credentials through an arbitrary name lookup.
    ///
    /// `key_names` and `secret_names` are tried in order and empty values are
    /// treated as absent. Returns `None` unless both a key and a secret are found.
    pub fn resolve<F>(
        lookup: F,
        key_names: &[&str],
        secret_names: &[&str],
        platform_name: &str,
    ) -> Option<Credentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| lookup(*name))
                .find(|v| !v.is_empty())
        };

        let api_key = first(key_names)?;
        let api_secret = first(secret_names)?;
        let platform = Platform::parse_or_default(lookup(platform_name).as_deref());

        Some(Credentials {
            api_key,
            api_secret,
            platform,
        })
    }

    /// Resolve from an environment-shaped lookup, e.g. `|k| std::env::var(k).ok()`.
    pub fn from_env_lookup<F>(lookup: F) -> Option<Credentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::resolve(lookup, &ENV_API_KEY, &ENV_API_SECRET, ENV_PLATFORM)
    }

    /// Resolve from the headers of an inbound gateway request.
    pub fn from_headers(headers: &HeaderMap) -> Option<Credentials> {
        Self::resolve(
            |name| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.trim().to_string())
            },
            &HEADER_API_KEY,
            &HEADER_API_SECRET,
            HEADER_PLATFORM,
        )
    }
}
