//! HTTP plumbing shared by the LMS and spreadsheet adapters.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Url;

/// Build a client that sends `token` as a bearer token on every request.
pub fn authorized_client(token: &str, timeout: Duration) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
        .context("Invalid token format")?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Parse a base URL that endpoint paths can be appended to.
pub fn base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("Invalid base URL: {raw}"))?;
    if url.cannot_be_a_base() {
        anyhow::bail!("Base URL cannot carry a path: {raw}");
    }
    Ok(url)
}

/// Append percent-encoded path segments to `base`.
pub fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_building() {
        let base = base_url("https://canvas.example.edu/").unwrap();
        let url = endpoint(&base, &["api", "v1", "courses", "12", "users"]);
        assert_eq!(url.as_str(), "https://canvas.example.edu/api/v1/courses/12/users");
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let base = base_url("https://sheets.example.com").unwrap();
        let url = endpoint(&base, &["v4", "spreadsheets", "abc", "values", "My Tab!A2:F"]);
        assert_eq!(url.path(), "/v4/spreadsheets/abc/values/My%20Tab!A2:F");
    }

    #[test]
    fn test_base_url_rejects_garbage() {
        assert!(base_url("not a url").is_err());
        assert!(base_url("mailto:ops@example.edu").is_err());
    }
}
