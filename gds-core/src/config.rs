use crate::backend::PartitionId;
use serde::{Deserialize, Serialize};

const NAMESPACE_PATTERN: &str = r"^[0-9A-Za-z._-]{1,100}$";

/// Gateway configuration: the partition every request is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Dataset (project) id
    pub dataset_id: String,

    /// Namespace within the dataset (None = default namespace)
    pub namespace: Option<String>,
}

impl GatewayConfig {
    /// Create a new configuration for a dataset
    pub fn new(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            namespace: None,
        }
    }

    /// Set the namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Partition id stamped on backend requests
    pub fn partition(&self) -> PartitionId {
        PartitionId {
            dataset_id: self.dataset_id.clone(),
            namespace: self.namespace.clone(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.dataset_id.trim().is_empty() {
            return Err("dataset_id must not be empty".to_string());
        }

        if let Some(namespace) = &self.namespace {
            let re = regex::Regex::new(NAMESPACE_PATTERN)
                .map_err(|e| format!("Invalid namespace pattern: {}", e))?;
            if !re.is_match(namespace) {
                return Err(format!(
                    "namespace '{}' must match {}",
                    namespace, NAMESPACE_PATTERN
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_from_config() {
        let config = GatewayConfig::new("my-dataset").with_namespace("tenant-a");
        let partition = config.partition();
        assert_eq!(partition.dataset_id, "my-dataset");
        assert_eq!(partition.namespace.as_deref(), Some("tenant-a"));
    }

    #[test]
    fn test_validate_success() {
        assert!(GatewayConfig::new("my-dataset").validate().is_ok());
        assert!(GatewayConfig::new("my-dataset")
            .with_namespace("a.b_c-1")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validate_empty_dataset() {
        assert!(GatewayConfig::new("").validate().is_err());
    }

    #[test]
    fn test_validate_bad_namespace() {
        assert!(GatewayConfig::new("ds").with_namespace("has space").validate().is_err());
        assert!(GatewayConfig::new("ds").with_namespace("").validate().is_err());
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = GatewayConfig::new("ds").with_namespace("ns");
        let json = serde_json::to_string(&config).unwrap();
        let parsed: GatewayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
