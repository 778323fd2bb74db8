//! Static per-provider model catalog.

use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;

/// Whether a model's daily quota counts whole requests or tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaUnit {
    #[default]
    Requests,
    Tokens,
}

impl std::fmt::Display for QuotaUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaUnit::Requests => write!(f, "requests"),
            QuotaUnit::Tokens => write!(f, "tokens"),
        }
    }
}

/// Immutable description of one candidate model. Built once at provider
/// construction and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    /// Upstream model identifier
    pub id: String,
    /// Human-readable name for listings
    pub display_name: String,
    /// Daily quota for this model
    pub quota_limit: u64,
    /// Whether the quota counts requests or tokens
    pub quota_unit: QuotaUnit,
    /// Position in the provider's candidate order; lower tries first
    pub priority: usize,
}

/// Priority-ordered list of a provider's candidate models.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    /// Build the catalog from config, assigning priorities by list position.
    pub fn from_config(models: &[ModelConfig]) -> Self {
        let models = models
            .iter()
            .enumerate()
            .map(|(priority, m)| ModelDescriptor {
                id: m.id.clone(),
                display_name: m.display_name.clone().unwrap_or_else(|| m.id.clone()),
                quota_limit: m.quota_limit,
                quota_unit: m.quota_unit,
                priority,
            })
            .collect();

        Self { models }
    }

    /// Models in ascending priority order.
    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    /// Look up a model by id.
    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_config(id: &str, quota_limit: u64) -> ModelConfig {
        ModelConfig {
            id: id.to_string(),
            display_name: None,
            quota_limit,
            quota_unit: QuotaUnit::Requests,
        }
    }

    #[test]
    fn test_catalog_preserves_config_order() {
        let catalog = ModelCatalog::from_config(&[
            model_config("first", 10),
            model_config("second", 20),
            model_config("third", 30),
        ]);

        let ids: Vec<&str> = catalog.models().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
        assert_eq!(catalog.models()[0].priority, 0);
        assert_eq!(catalog.models()[2].priority, 2);
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let mut with_name = model_config("m1", 10);
        with_name.display_name = Some("Model One".to_string());
        let catalog = ModelCatalog::from_config(&[with_name, model_config("m2", 10)]);

        assert_eq!(catalog.models()[0].display_name, "Model One");
        assert_eq!(catalog.models()[1].display_name, "m2");
    }

    #[test]
    fn test_get_looks_up_by_id() {
        let catalog = ModelCatalog::from_config(&[model_config("known", 10)]);

        assert_eq!(catalog.get("known").unwrap().quota_limit, 10);
        assert!(catalog.get("unknown").is_none());
    }

    #[test]
    fn test_quota_unit_display() {
        assert_eq!(QuotaUnit::Requests.to_string(), "requests");
        assert_eq!(QuotaUnit::Tokens.to_string(), "tokens");
    }
}
