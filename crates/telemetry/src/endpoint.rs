//! Receiver endpoint resolution.
//!
//! Report endpoints ("usage-counts", "deployment-information") are paths
//! relative to the configured receiver URL. An absolute URL is used as is.

use reqwest::Url;

use crate::error::DeliveryError;

/// Content type of every report
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Parse the receiver base URL.
///
/// A trailing slash is added so that endpoints are appended to the base
/// path instead of replacing its last segment.
pub fn parse_base(url: &str) -> Result<Url, DeliveryError> {
    let mut base = Url::parse(url)
        .map_err(|e| DeliveryError::Config(format!("invalid receiver URL '{}': {}", url, e)))?;

    if !matches!(base.scheme(), "http" | "https") {
        return Err(DeliveryError::Config(format!(
            "receiver URL '{}' must use http or https",
            url
        )));
    }

    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

/// Resolve an endpoint against the receiver base URL
pub fn resolve(base: &Url, endpoint: &str) -> Result<Url, DeliveryError> {
    base.join(endpoint.trim_start_matches('/'))
        .map_err(|e| DeliveryError::Config(format!("invalid endpoint '{}': {}", endpoint, e)))
}
