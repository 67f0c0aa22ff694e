//! Dynamic Feature Catalog
//!
//! Administrator-defined feature declarations that extend the static plan
//! schema at runtime. Keys are globally unique (case-sensitive, including
//! soft-deleted definitions) and double as document ids.

use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;

use motorlot_shared::{
    collections, decode, DynamicFeatureDefinition, FeatureType, Filter, PlatformError,
    PlatformResult, RecordStore,
};

/// Input for defining a new dynamic feature
#[derive(Debug, Clone)]
pub struct NewFeature {
    pub key: String,
    pub feature_type: FeatureType,
    pub category: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub options: Vec<String>,
    pub default_value: Option<Value>,
}

pub struct DynamicFeatureCatalog {
    store: Arc<dyn RecordStore>,
}

impl DynamicFeatureCatalog {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Define a new feature. Fails with `DuplicateKey` if the key was ever
    /// used, active or not.
    pub async fn define(&self, input: NewFeature) -> PlatformResult<DynamicFeatureDefinition> {
        if self
            .store
            .get(collections::DYNAMIC_FEATURES, &input.key)
            .await?
            .is_some()
        {
            return Err(PlatformError::DuplicateKey(input.key));
        }

        let definition = DynamicFeatureDefinition {
            key: input.key,
            feature_type: input.feature_type,
            category: input.category,
            min: input.min,
            max: input.max,
            options: input.options,
            default_value: input.default_value,
            is_active: true,
            created_at: OffsetDateTime::now_utc(),
        };

        if let Some(default) = &definition.default_value {
            validate(&definition, default)?;
        }

        self.store
            .set(
                collections::DYNAMIC_FEATURES,
                &definition.key,
                serde_json::to_value(&definition)?,
            )
            .await?;

        tracing::info!(key = %definition.key, "Defined dynamic feature");
        Ok(definition)
    }

    pub async fn get(&self, key: &str) -> PlatformResult<Option<DynamicFeatureDefinition>> {
        let doc = self.store.get(collections::DYNAMIC_FEATURES, key).await?;
        doc.map(decode).transpose()
    }

    /// List active definitions, optionally restricted to one category
    pub async fn list_active(
        &self,
        category: Option<&str>,
    ) -> PlatformResult<Vec<DynamicFeatureDefinition>> {
        let mut filters = vec![Filter::eq("is_active", true)];
        if let Some(category) = category {
            filters.push(Filter::eq("category", category));
        }
        let docs = self
            .store
            .query(collections::DYNAMIC_FEATURES, &filters, None, None)
            .await?;
        docs.into_iter().map(decode).collect()
    }

    /// Soft-delete a definition. The key stays reserved.
    pub async fn deactivate(&self, key: &str) -> PlatformResult<()> {
        self.get(key)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("dynamic feature {}", key)))?;
        self.store
            .update(
                collections::DYNAMIC_FEATURES,
                key,
                serde_json::json!({"is_active": false}),
            )
            .await
    }
}

/// Validate a value against a feature definition
pub fn validate(definition: &DynamicFeatureDefinition, value: &Value) -> PlatformResult<()> {
    match definition.feature_type {
        FeatureType::Bool => {
            if !value.is_boolean() {
                return Err(PlatformError::InvalidValue(format!(
                    "{} expects a boolean",
                    definition.key
                )));
            }
        }
        FeatureType::Number => {
            let Some(n) = value.as_f64() else {
                return Err(PlatformError::InvalidValue(format!(
                    "{} expects a number",
                    definition.key
                )));
            };
            if let Some(min) = definition.min {
                if n < min {
                    return Err(PlatformError::InvalidValue(format!(
                        "{} below minimum {}",
                        definition.key, min
                    )));
                }
            }
            if let Some(max) = definition.max {
                if n > max {
                    return Err(PlatformError::InvalidValue(format!(
                        "{} above maximum {}",
                        definition.key, max
                    )));
                }
            }
        }
        FeatureType::String => {
            if !value.is_string() {
                return Err(PlatformError::InvalidValue(format!(
                    "{} expects a string",
                    definition.key
                )));
            }
        }
        FeatureType::Enum => {
            let Some(s) = value.as_str() else {
                return Err(PlatformError::InvalidValue(format!(
                    "{} expects one of its options",
                    definition.key
                )));
            };
            if !definition.options.iter().any(|o| o == s) {
                return Err(PlatformError::InvalidValue(format!(
                    "{} is not a valid option for {}",
                    s, definition.key
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use motorlot_shared::MemoryStore;
    use serde_json::json;

    fn definition(feature_type: FeatureType) -> DynamicFeatureDefinition {
        DynamicFeatureDefinition {
            key: "test_feature".to_string(),
            feature_type,
            category: "marketing".to_string(),
            min: Some(0.0),
            max: Some(10.0),
            options: vec!["small".to_string(), "large".to_string()],
            default_value: None,
            is_active: true,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_validate_bool() {
        let def = definition(FeatureType::Bool);
        assert!(validate(&def, &json!(true)).is_ok());
        assert!(validate(&def, &json!("yes")).is_err());
    }

    #[test]
    fn test_validate_number_bounds() {
        let def = definition(FeatureType::Number);
        assert!(validate(&def, &json!(5)).is_ok());
        assert!(validate(&def, &json!(0)).is_ok());
        assert!(validate(&def, &json!(-1)).is_err());
        assert!(validate(&def, &json!(11)).is_err());
        assert!(validate(&def, &json!("5")).is_err());
    }

    #[test]
    fn test_validate_enum_membership() {
        let def = definition(FeatureType::Enum);
        assert!(validate(&def, &json!("small")).is_ok());
        assert!(validate(&def, &json!("medium")).is_err());
        assert!(validate(&def, &json!(3)).is_err());
    }

    #[tokio::test]
    async fn test_define_rejects_duplicate_key() {
        let store = Arc::new(MemoryStore::new());
        let catalog = DynamicFeatureCatalog::new(store);

        let input = NewFeature {
            key: "banner_slots".to_string(),
            feature_type: FeatureType::Number,
            category: "marketing".to_string(),
            min: Some(0.0),
            max: None,
            options: Vec::new(),
            default_value: None,
        };
        catalog.define(input.clone()).await.unwrap();

        let err = catalog.define(input.clone()).await.unwrap_err();
        assert!(matches!(err, PlatformError::DuplicateKey(_)));

        // Soft-deleting does not free the key
        catalog.deactivate("banner_slots").await.unwrap();
        let err = catalog.define(input).await.unwrap_err();
        assert!(matches!(err, PlatformError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn test_uniqueness_is_case_sensitive() {
        let store = Arc::new(MemoryStore::new());
        let catalog = DynamicFeatureCatalog::new(store);

        let lower = NewFeature {
            key: "showroom_video".to_string(),
            feature_type: FeatureType::Bool,
            category: "media".to_string(),
            min: None,
            max: None,
            options: Vec::new(),
            default_value: None,
        };
        let upper = NewFeature {
            key: "Showroom_Video".to_string(),
            ..lower.clone()
        };
        catalog.define(lower).await.unwrap();
        assert!(catalog.define(upper).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_active_filters_category() {
        let store = Arc::new(MemoryStore::new());
        let catalog = DynamicFeatureCatalog::new(store);

        for (key, category) in [("a", "marketing"), ("b", "media"), ("c", "marketing")] {
            catalog
                .define(NewFeature {
                    key: key.to_string(),
                    feature_type: FeatureType::Bool,
                    category: category.to_string(),
                    min: None,
                    max: None,
                    options: Vec::new(),
                    default_value: None,
                })
                .await
                .unwrap();
        }
        catalog.deactivate("c").await.unwrap();

        let marketing = catalog.list_active(Some("marketing")).await.unwrap();
        assert_eq!(marketing.len(), 1);
        assert_eq!(marketing[0].key, "a");

        let all = catalog.list_active(None).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
