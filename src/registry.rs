//! The kind table: every resource kind and its descriptors, built once at
//! startup and read-only afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::resource::Resource;
use crate::schema::{AttributeDescriptor, ProviderSchema, ResourceSchema};

pub use crate::schema::classify_change;

/// Resource kinds by name.
#[derive(Clone, Default)]
pub struct Registry {
    kinds: BTreeMap<&'static str, Arc<dyn Resource>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kinds", &self.kinds.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry of built-in kinds.
    pub fn builtin() -> Self {
        crate::resources::builtin()
            .into_iter()
            .fold(Self::new(), Self::with_resource)
    }

    /// Register a kind, replacing any kind of the same name.
    pub fn with_resource(mut self, resource: Arc<dyn Resource>) -> Self {
        self.kinds.insert(resource.type_name(), resource);
        self
    }

    /// Look up a kind.
    pub fn get(&self, kind: &str) -> Result<&Arc<dyn Resource>, ProviderError> {
        self.kinds
            .get(kind)
            .ok_or_else(|| ProviderError::UnknownResource(kind.to_string()))
    }

    /// The descriptor of `attribute` on `kind`.
    pub fn describe(
        &self,
        kind: &str,
        attribute: &str,
    ) -> Result<&AttributeDescriptor, ProviderError> {
        self.get(kind)?.schema().attribute(attribute).ok_or_else(|| {
            ProviderError::plan_invariant(kind, attribute, "no such attribute")
        })
    }

    /// All descriptors of `kind`, in declaration order.
    pub fn list(&self, kind: &str) -> Result<&[AttributeDescriptor], ProviderError> {
        Ok(&self.get(kind)?.schema().attributes)
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> Vec<String> {
        self.kinds.keys().map(|k| k.to_string()).collect()
    }

    /// Kinds that must be opted into.
    pub fn preview_kinds(&self) -> Vec<String> {
        self.kinds
            .values()
            .filter(|r| r.preview())
            .map(|r| r.type_name().to_string())
            .collect()
    }

    /// The schema served to the host.
    pub fn provider_schema(&self, provider: ResourceSchema) -> ProviderSchema {
        self.kinds.values().fold(
            ProviderSchema::new().with_provider_config(provider),
            |schema, r| schema.with_resource(r.type_name(), r.schema().clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ChangeClass, MutationClass};
    use serde_json::json;

    #[test]
    fn test_builtin_kinds() {
        let registry = Registry::builtin();
        assert_eq!(
            registry.kinds(),
            vec![
                "snowflake_compute_pool",
                "snowflake_database",
                "snowflake_external_oauth_integration",
                "snowflake_schema",
                "snowflake_streamlit",
                "snowflake_user",
                "snowflake_view",
            ]
        );
        assert_eq!(
            registry.preview_kinds(),
            vec!["snowflake_compute_pool", "snowflake_streamlit"]
        );
    }

    #[test]
    fn test_unknown_kind() {
        let registry = Registry::builtin();
        assert!(matches!(
            registry.get("snowflake_widget"),
            Err(ProviderError::UnknownResource(_))
        ));
    }

    #[test]
    fn test_describe() {
        let registry = Registry::builtin();
        let role = registry.describe("snowflake_user", "default_role").unwrap();
        assert_eq!(
            classify_change(role, Some(&json!("MY_ROLE")), Some(&json!("my_role"))),
            ChangeClass::NoChange
        );

        let eai = registry
            .describe("snowflake_streamlit", "external_access_integrations")
            .unwrap();
        assert_eq!(eai.mutation, MutationClass::ForceNew);

        assert!(registry.describe("snowflake_user", "nope").is_err());
        assert!(!registry.list("snowflake_view").unwrap().is_empty());
    }

    #[test]
    fn test_provider_schema() {
        let registry = Registry::builtin();
        let schema = registry.provider_schema(ResourceSchema::v0());
        assert_eq!(schema.resources.len(), 7);
        assert_eq!(schema.resources["snowflake_user"].version, 1);
    }
}
