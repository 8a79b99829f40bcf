//! Address and timing validation shared by the upstream client, the health
//! monitor and the CLI.

pub mod defaults;
mod error;

pub use error::ConfigError;

use reqwest::Url;

/// Parse `raw` as an absolute `http://` or `https://` URL with a host.
///
/// # Errors
///
/// Returns `ConfigError::InvalidUrl` when the text does not start with an
/// HTTP scheme, fails to parse, or has no host.
pub fn validate_http_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidUrl {
        url: raw.to_string(),
        message: message.to_string(),
    };

    if !(raw.starts_with("http://") || raw.starts_with("https://")) {
        return Err(invalid("must start with http:// or https://"));
    }

    let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(url)
}

/// `scheme://host[:port]` of `url`, without a trailing slash.
///
/// Used as the default base for the health and restart endpoints.
#[must_use]
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// Join `base` and an absolute `path`, collapsing a trailing slash on `base`.
#[must_use]
pub fn join_path(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_http_and_https() {
        assert!(validate_http_url("http://localhost:8080/mcp").is_ok());
        assert!(validate_http_url("https://example.com/v1/mcp").is_ok());
    }

    #[test]
    fn test_rejects_other_schemes_and_garbage() {
        for raw in ["", "localhost:8080", "ftp://example.com", "ws://x/mcp", "http://"] {
            assert!(
                matches!(validate_http_url(raw), Err(ConfigError::InvalidUrl { .. })),
                "expected rejection for {raw:?}"
            );
        }
    }

    #[test]
    fn test_origin_drops_path_and_query() {
        let url = validate_http_url("http://127.0.0.1:9000/mcp?x=1").unwrap();
        assert_eq!(origin_of(&url), "http://127.0.0.1:9000");

        let url = validate_http_url("https://example.com/a/b").unwrap();
        assert_eq!(origin_of(&url), "https://example.com");
    }

    #[test]
    fn test_join_path() {
        assert_eq!(
            join_path("http://h:1/", "/api/health"),
            "http://h:1/api/health"
        );
        assert_eq!(
            join_path("http://h:1", "/api/restart"),
            "http://h:1/api/restart"
        );
    }
}
