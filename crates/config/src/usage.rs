//! Reporter identity
//!
//! Every payload sent to the receiver carries the node id and product name
//! configured here.

use serde::Deserialize;

/// Default product name reported when none is configured
pub const DEFAULT_PRODUCT: &str = "tally";

/// Identity and master switch for usage reporting
///
/// ```toml
/// [usage]
/// enabled = true
/// product = "gateway"
/// node_id = "10.0.0.12"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    /// Master switch; when false no job is scheduled
    /// Default: true
    pub enabled: bool,

    /// Product name sent with every payload
    pub product: String,

    /// Node identifier. Falls back to the host name when unset.
    pub node_id: Option<String>,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            product: DEFAULT_PRODUCT.to_string(),
            node_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = UsageConfig::default();
        assert!(config.enabled);
        assert_eq!(config.product, "tally");
        assert!(config.node_id.is_none());
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
enabled = false
product = "gateway"
node_id = "10.0.0.12"
"#;
        let config: UsageConfig = toml::from_str(toml).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.product, "gateway");
        assert_eq!(config.node_id.as_deref(), Some("10.0.0.12"));
    }
}
