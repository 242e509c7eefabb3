use serde::{Deserialize, Serialize};

/// Configuration for [`InMemoryDocumentStore`](crate::InMemoryDocumentStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStoreConfig {
    /// How many times a transaction body runs before a conflict is reported.
    pub max_transaction_attempts: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_transaction_attempts: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows_retries() {
        assert_eq!(MemoryStoreConfig::default().max_transaction_attempts, 5);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: MemoryStoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, MemoryStoreConfig::default());

        let cfg: MemoryStoreConfig =
            serde_json::from_str(r#"{"max_transaction_attempts": 1}"#).unwrap();
        assert_eq!(cfg.max_transaction_attempts, 1);
    }
}
