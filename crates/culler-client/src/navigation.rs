//! Following-page URLs and validation.

use culler_core::error::AppError;
use url::Url;

const HOSTS: &[&str] = &["x.com", "www.x.com", "twitter.com", "www.twitter.com"];

/// `https://x.com/<handle>/following`.
pub fn following_url(handle: &str) -> Result<Url, AppError> {
    let handle = handle.trim().trim_start_matches('@');
    if handle.is_empty() || !handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AppError::ConfigError(format!("Invalid handle '{handle}'")));
    }
    Url::parse(&format!("https://x.com/{handle}/following"))
        .map_err(|e| AppError::ConfigError(format!("Invalid URL: {e}")))
}

/// The profile handle of a profile or following page URL.
///
/// Accepts `https://x.com/<handle>` and `https://x.com/<handle>/following`
/// (and the twitter.com equivalents); anything else is rejected.
pub fn profile_handle(url: &str) -> Result<String, AppError> {
    let parsed =
        Url::parse(url).map_err(|e| AppError::ConfigError(format!("Invalid URL '{url}': {e}")))?;

    let host = parsed.host_str().unwrap_or_default();
    if !HOSTS.contains(&host) {
        return Err(AppError::ConfigError(format!(
            "'{host}' is not a supported host"
        )));
    }

    let parts: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    match parts.as_slice() {
        [handle] | [handle, "following"] => Ok((*handle).to_string()),
        _ => Err(AppError::ConfigError(format!(
            "'{url}' is not a profile or following page"
        ))),
    }
}

pub fn is_following_page(url: &str) -> bool {
    profile_handle(url).is_ok() && url.trim_end_matches('/').ends_with("/following")
}
