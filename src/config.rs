//! Provider configuration and the preview feature set.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;
use crate::reconciler::RetryPolicy;
use crate::schema::{AttributeDescriptor, MutationClass, ResourceSchema, SemanticType};

/// Falls back for `profile`.
pub const PROFILE_ENV: &str = "SNOWFLAKE_PROFILE";

/// Reuse the first connected driver across configure calls.
pub const CONFIGURE_CLIENT_ONCE_ENV: &str = "SF_TF_ACC_TEST_CONFIGURE_CLIENT_ONCE";

/// Enable every preview kind.
pub const ENABLE_ALL_PREVIEW_FEATURES_ENV: &str = "SF_TF_ACC_TEST_ENABLE_ALL_PREVIEW_FEATURES";

const DEFAULT_PROFILE: &str = "default";

/// Retry settings as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per statement, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5000,
        }
    }
}

/// The provider configuration block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProviderConfig {
    /// Named credentials profile.
    pub profile: Option<String>,
    /// Preview kinds to enable.
    pub preview_features_enabled: Vec<String>,
    /// Statement retry settings.
    pub retry: RetryConfig,
    /// Per-statement timeout.
    pub statement_timeout_secs: Option<u64>,
    /// Memoise the driver across configure calls.
    #[serde(skip)]
    pub configure_client_once: bool,
    /// Enable every preview kind.
    #[serde(skip)]
    pub enable_all_preview_features: bool,
}

impl ProviderConfig {
    /// Decode the configuration block sent by the host.
    ///
    /// Attributes the host sends as `null` take their defaults.
    pub fn from_value(value: Value) -> Result<Self, ProviderError> {
        match strip_nulls(value) {
            Value::Null => Ok(Self::default()),
            other => serde_json::from_value(other)
                .map_err(|e| ProviderError::Configuration(e.to_string())),
        }
    }

    /// Overlay environment knobs read through `lookup`.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.profile.is_none() {
            self.profile = lookup(PROFILE_ENV).filter(|p| !p.is_empty());
        }
        self.configure_client_once = lookup(CONFIGURE_CLIENT_ONCE_ENV)
            .map(|v| is_truthy(&v))
            .unwrap_or(false);
        self.enable_all_preview_features = lookup(ENABLE_ALL_PREVIEW_FEATURES_ENV)
            .map(|v| is_truthy(&v))
            .unwrap_or(false);
        self
    }

    /// Overlay the process environment.
    pub fn with_process_env(self) -> Self {
        self.with_env(|key| std::env::var(key).ok())
    }

    /// The profile to connect with.
    pub fn profile(&self) -> &str {
        self.profile.as_deref().unwrap_or(DEFAULT_PROFILE)
    }

    /// The retry policy these settings describe.
    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::default()
            .with_max_attempts(self.retry.max_attempts)
            .with_backoff(
                Duration::from_millis(self.retry.base_delay_ms),
                Duration::from_millis(self.retry.max_delay_ms),
            );
        match self.statement_timeout_secs {
            Some(secs) if secs > 0 => policy.with_statement_timeout(Duration::from_secs(secs)),
            _ => policy,
        }
    }

    /// The schema of the configuration block.
    pub fn schema() -> ResourceSchema {
        ResourceSchema::v0()
            .with_description("Snowflake provider configuration.")
            .with_attribute(
                AttributeDescriptor::optional_string("profile")
                    .with_description(
                        "Named credentials profile; falls back to SNOWFLAKE_PROFILE.",
                    ),
            )
            .with_attribute(
                AttributeDescriptor::optional_string_set("preview_features_enabled")
                    .with_description("Preview resource kinds to enable."),
            )
            .with_attribute(AttributeDescriptor::new(
                "retry",
                SemanticType::NestedBlock(vec![
                    AttributeDescriptor::optional_int("max_attempts"),
                    AttributeDescriptor::optional_int("base_delay_ms"),
                    AttributeDescriptor::optional_int("max_delay_ms"),
                ]),
                MutationClass::InPlace,
            ))
            .with_attribute(AttributeDescriptor::optional_int("statement_timeout_secs"))
    }
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        other => other,
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// The preview kinds enabled for this process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreviewFeatures {
    enabled: BTreeSet<String>,
}

impl PreviewFeatures {
    /// Resolve the requested names against the known preview kinds.
    ///
    /// `all` enables every known kind; unknown names are rejected either way.
    pub fn resolve(
        requested: &[String],
        known: &[String],
        all: bool,
    ) -> Result<Self, ProviderError> {
        let unknown: Vec<&str> = requested
            .iter()
            .filter(|name| !known.contains(name))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(ProviderError::Configuration(format!(
                "unknown preview features: {}; valid values are: {}",
                unknown.join(", "),
                known.join(", ")
            )));
        }
        let enabled = if all { known } else { requested };
        Ok(Self {
            enabled: enabled.iter().cloned().collect(),
        })
    }

    /// Whether `kind` is enabled.
    pub fn is_enabled(&self, kind: &str) -> bool {
        self.enabled.contains(kind)
    }

    /// Enabled kinds, sorted.
    pub fn enabled(&self) -> impl Iterator<Item = &str> {
        self.enabled.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::from_value(Value::Null).unwrap();
        assert_eq!(config.profile(), "default");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn test_decode() {
        let config = ProviderConfig::from_value(json!({
            "profile": "ci",
            "preview_features_enabled": ["snowflake_streamlit"],
            "retry": {"max_attempts": 5},
            "statement_timeout_secs": 30,
        }))
        .unwrap();
        assert_eq!(config.profile(), "ci");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 200);
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.statement_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_null_attributes_take_defaults() {
        let config = ProviderConfig::from_value(json!({
            "profile": null,
            "preview_features_enabled": null,
            "retry": {"max_attempts": null, "max_delay_ms": 100},
        }))
        .unwrap();
        assert_eq!(config.profile, None);
        assert!(config.preview_features_enabled.is_empty());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.max_delay_ms, 100);
    }

    #[test]
    fn test_decode_rejects_bad_types() {
        let err = ProviderConfig::from_value(json!({"retry": "often"})).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[test]
    fn test_env_overlay() {
        let config = ProviderConfig::default().with_env(env(&[
            (PROFILE_ENV, "from_env"),
            (CONFIGURE_CLIENT_ONCE_ENV, "true"),
        ]));
        assert_eq!(config.profile(), "from_env");
        assert!(config.configure_client_once);
        assert!(!config.enable_all_preview_features);

        let config = ProviderConfig {
            profile: Some("explicit".into()),
            ..Default::default()
        }
        .with_env(env(&[(PROFILE_ENV, "from_env")]));
        assert_eq!(config.profile(), "explicit");
    }

    #[test]
    fn test_preview_features() {
        let known = vec!["snowflake_compute_pool".to_string(), "snowflake_streamlit".to_string()];

        let requested = ["snowflake_streamlit".to_string()];
        let features = PreviewFeatures::resolve(&requested, &known, false).unwrap();
        assert!(features.is_enabled("snowflake_streamlit"));
        assert!(!features.is_enabled("snowflake_compute_pool"));

        let features = PreviewFeatures::resolve(&[], &known, true).unwrap();
        assert_eq!(features.enabled().count(), 2);

        let requested = ["snowflake_widget".to_string()];
        let err = PreviewFeatures::resolve(&requested, &known, true).unwrap_err();
        assert!(err.to_string().contains("snowflake_widget"));
    }
}
