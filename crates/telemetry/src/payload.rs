//! Report payload types.
//!
//! Defines the exact JSON bodies posted to the receiver. Field names are
//! camelCase on the wire; `tally show` prints the same structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tally_config::{MAX_TYPE_LEN, UsageConfig};

use crate::aggregator::CountSnapshot;

/// Longest node id accepted by the receiver
pub const MAX_NODE_ID_LEN: usize = 128;

/// Longest product name accepted by the receiver
pub const MAX_PRODUCT_LEN: usize = 100;

/// Who is reporting: node and product, already trimmed to receiver limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    node_id: String,
    product: String,
}

impl NodeIdentity {
    pub fn new(node_id: impl AsRef<str>, product: impl AsRef<str>) -> Self {
        Self {
            node_id: truncate(node_id.as_ref(), MAX_NODE_ID_LEN),
            product: truncate(product.as_ref(), MAX_PRODUCT_LEN),
        }
    }

    /// Identity from config, defaulting the node id to the hostname
    pub fn from_config(config: &UsageConfig) -> Self {
        let node_id = config.node_id.clone().unwrap_or_else(default_node_id);
        Self::new(node_id, &config.product)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn product(&self) -> &str {
        &self.product
    }
}

/// Hostname of this machine, or `"unknown"`
pub fn default_node_id() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// A usage count posted to the `usage-counts` endpoint.
///
/// Window fields are present only for counts produced by an
/// [`IntervalAggregator`](crate::IntervalAggregator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCount {
    pub node_id: String,
    pub product: String,
    pub count: u64,
    #[serde(rename = "type")]
    pub usage_type: String,
    pub created_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<u64>,
}

impl UsageCount {
    /// A point-in-time count
    pub fn new(identity: &NodeIdentity, usage_type: &str, count: u64) -> Self {
        Self {
            node_id: identity.node_id.clone(),
            product: identity.product.clone(),
            count,
            usage_type: truncate(usage_type, MAX_TYPE_LEN),
            created_time: Utc::now(),
            window_start: None,
            window_end: None,
            sequence_id: None,
        }
    }

    /// The count of one closed aggregation window
    pub fn from_snapshot(identity: &NodeIdentity, usage_type: &str, snapshot: &CountSnapshot) -> Self {
        Self {
            window_start: Some(snapshot.window_start()),
            window_end: Some(snapshot.window_end()),
            sequence_id: Some(snapshot.sequence_id().value()),
            ..Self::new(identity, usage_type, snapshot.count())
        }
    }
}

/// Node identity posted once to the `meta-information` endpoint.
///
/// Lets the receiver register the node before its first usage report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaInformation {
    pub node_id: String,
    pub product: String,
    pub created_time: DateTime<Utc>,
}

impl MetaInformation {
    pub fn new(identity: &NodeIdentity) -> Self {
        Self {
            node_id: identity.node_id.clone(),
            product: identity.product.clone(),
            created_time: Utc::now(),
        }
    }
}

/// Static facts about the deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInfo {
    /// Reporter version
    pub version: String,

    /// Operating system (linux, macos, windows)
    pub os: String,

    /// CPU architecture (aarch64, x86_64)
    pub arch: String,

    /// Number of CPU cores
    pub cpu_cores: u32,

    /// Total memory in bytes, 0 when unknown
    pub memory_bytes: u64,
}

impl DeploymentInfo {
    /// Collect deployment info from the current environment
    pub fn collect() -> Self {
        let cpu_cores = std::thread::available_parallelism()
            .map(|p| p.get() as u32)
            .unwrap_or(1);

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpu_cores,
            memory_bytes: detect_memory(),
        }
    }

    /// SHA-256 of the JSON encoding, hex
    pub fn hash(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&json)))
    }
}

#[cfg(target_os = "linux")]
fn detect_memory() -> u64 {
    std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|content| {
            content
                .lines()
                .find(|line| line.starts_with("MemTotal:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok())
                .map(|kb| kb * 1024)
        })
        .unwrap_or(0)
}

#[cfg(target_os = "macos")]
fn detect_memory() -> u64 {
    std::process::Command::new("sysctl")
        .args(["-n", "hw.memsize"])
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn detect_memory() -> u64 {
    0
}

/// Deployment report posted to the `deployment-information` endpoint.
///
/// The receiver uses `deploymentInfoHash` to detect changes without
/// comparing whole documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInformation {
    pub node_id: String,
    pub product: String,
    pub created_time: DateTime<Utc>,
    pub deployment_info: DeploymentInfo,
    pub deployment_info_hash: String,
}

impl DeploymentInformation {
    pub fn new(identity: &NodeIdentity, info: DeploymentInfo) -> Result<Self, serde_json::Error> {
        let deployment_info_hash = info.hash()?;
        Ok(Self {
            node_id: identity.node_id.clone(),
            product: identity.product.clone(),
            created_time: Utc::now(),
            deployment_info: info,
            deployment_info_hash,
        })
    }

    /// Collect the current deployment and wrap it
    pub fn collect(identity: &NodeIdentity) -> Result<Self, serde_json::Error> {
        Self::new(identity, DeploymentInfo::collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::IntervalAggregator;

    fn identity() -> NodeIdentity {
        NodeIdentity::new("node-1", "gateway")
    }

    #[test]
    fn test_identity_truncates() {
        let id = NodeIdentity::new("n".repeat(200), "p".repeat(150));
        assert_eq!(id.node_id().len(), MAX_NODE_ID_LEN);
        assert_eq!(id.product().len(), MAX_PRODUCT_LEN);
    }

    #[test]
    fn test_identity_truncates_on_char_boundary() {
        let id = NodeIdentity::new("é".repeat(130), "x");
        assert_eq!(id.node_id().chars().count(), MAX_NODE_ID_LEN);
    }

    #[test]
    fn test_identity_from_config() {
        let config = UsageConfig {
            node_id: Some("edge-3".into()),
            ..Default::default()
        };
        let id = NodeIdentity::from_config(&config);
        assert_eq!(id.node_id(), "edge-3");
        assert_eq!(id.product(), tally_config::DEFAULT_PRODUCT);
    }

    #[test]
    fn test_identity_defaults_to_hostname() {
        let id = NodeIdentity::from_config(&UsageConfig::default());
        assert!(!id.node_id().is_empty());
    }

    #[test]
    fn test_usage_count_wire_format() {
        let count = UsageCount::new(&identity(), "API_COUNT", 42);
        let json = serde_json::to_value(&count).unwrap();

        assert_eq!(json["nodeId"], "node-1");
        assert_eq!(json["product"], "gateway");
        assert_eq!(json["count"], 42);
        assert_eq!(json["type"], "API_COUNT");
        assert!(json["createdTime"].as_str().unwrap().ends_with('Z'));
        assert!(json.get("windowStart").is_none());
        assert!(json.get("sequenceId").is_none());
    }

    #[test]
    fn test_usage_count_from_snapshot() {
        let agg = IntervalAggregator::new();
        agg.add(8);
        let snapshot = agg.flush_and_reset();

        let count = UsageCount::from_snapshot(&identity(), "TRANSACTION", &snapshot);
        assert_eq!(count.count, 8);
        assert_eq!(count.window_start, Some(snapshot.window_start()));
        assert_eq!(count.window_end, Some(snapshot.window_end()));
        assert_eq!(count.sequence_id, Some(0));

        let json = serde_json::to_value(&count).unwrap();
        assert_eq!(json["sequenceId"], 0);
    }

    #[test]
    fn test_usage_type_truncated() {
        let count = UsageCount::new(&identity(), "A_VERY_LONG_USAGE_TYPE_NAME", 1);
        assert_eq!(count.usage_type.len(), MAX_TYPE_LEN);
    }

    #[test]
    fn test_meta_information_wire_format() {
        let json = serde_json::to_value(MetaInformation::new(&identity())).unwrap();

        assert_eq!(json["nodeId"], "node-1");
        assert_eq!(json["product"], "gateway");
        assert!(json["createdTime"].is_string());
        assert_eq!(json.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_deployment_info_collect() {
        let info = DeploymentInfo::collect();
        assert!(!info.os.is_empty());
        assert!(!info.arch.is_empty());
        assert!(info.cpu_cores >= 1);
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_deployment_hash_is_stable() {
        let info = DeploymentInfo::collect();
        let a = info.hash().unwrap();
        let b = info.clone().hash().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let changed = DeploymentInfo {
            cpu_cores: info.cpu_cores + 1,
            ..info
        };
        assert_ne!(changed.hash().unwrap(), a);
    }

    #[test]
    fn test_deployment_information_wire_format() {
        let report = DeploymentInformation::collect(&identity()).unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["nodeId"], "node-1");
        assert_eq!(json["deploymentInfoHash"], report.deployment_info.hash().unwrap());
        assert!(json["deploymentInfo"]["cpuCores"].is_number());
    }
}
