//! Configuration validation against a [`ResourceSchema`].
//!
//! Checks run before planning and never contact the remote. Messages name
//! the attribute and the expected shape but never echo the configured
//! value, so a mistyped secret does not end up in the host's output.
//!
//! # Example
//!
//! ```
//! use snowflake_provider::schema::{AttributeDescriptor, ResourceSchema};
//! use snowflake_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = ResourceSchema::v0()
//!     .with_attribute(AttributeDescriptor::required_string("name"))
//!     .with_attribute(AttributeDescriptor::optional_int("max_instances"));
//!
//! assert!(validate(&schema, &json!({"name": "POOL_A", "max_instances": 2})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "POOL_A", "max_instances": "two"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("max_instances".to_string()));
//! ```

use serde_json::{Map, Value};

use crate::schema::{
    AttributeDescriptor, Diagnostic, DiagnosticSeverity, ResourceSchema, SemanticType,
};
use crate::value;

/// Validate a configuration object against a schema.
///
/// An empty list means the configuration is valid.
///
/// # Validation Rules
///
/// - Attributes the schema does not declare are rejected
/// - Required attributes must be present and non-null (unknown values pass)
/// - Computed attributes must not be set
/// - Values must match the semantic type; enums match case-insensitively
/// - At most one attribute of each conflict group may be set
/// - Attributes declared together must be set together
pub fn validate(schema: &ResourceSchema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    match value {
        Value::Object(obj) => {
            validate_block(&schema.attributes, obj, "", &mut diagnostics);
            validate_groups(schema, obj, &mut diagnostics);
        },
        Value::Null => {
            validate_block(&schema.attributes, &Map::new(), "", &mut diagnostics);
        },
        other => diagnostics.push(
            Diagnostic::error("Expected object")
                .with_detail(format!("Got {}", value_type_name(other))),
        ),
    }
    diagnostics
}

/// Like [`validate`], as a `Result`.
pub fn validate_result(schema: &ResourceSchema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Whether the configuration is valid.
pub fn is_valid(schema: &ResourceSchema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

fn validate_block(
    attributes: &[AttributeDescriptor],
    obj: &Map<String, Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for name in obj.keys() {
        if !attributes.iter().any(|a| &a.name == name) {
            let attr_path = join_path(path, name);
            diagnostics.push(
                Diagnostic::error(format!("Unsupported attribute '{}'", attr_path))
                    .with_detail("An attribute of this name is not expected here")
                    .with_attribute(attr_path),
            );
        }
    }

    for attr in attributes {
        let attr_path = join_path(path, &attr.name);
        validate_attribute(attr, obj.get(&attr.name), &attr_path, diagnostics);
    }
}

fn validate_attribute(
    attr: &AttributeDescriptor,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if attr.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        // Resolved before apply; checked again then.
        Some(v) if value::is_unknown(v) => {},
        Some(_) if attr.is_computed() => {
            diagnostics.push(
                Diagnostic::error(format!("Computed attribute '{}' cannot be set", path))
                    .with_detail(
                        "The value is read from Snowflake; remove it from the configuration",
                    )
                    .with_attribute(path),
            );
        },
        Some(v) => validate_type(&attr.semantic_type, v, path, diagnostics),
    }
}

fn validate_type(ty: &SemanticType, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    if value::is_unknown(value) {
        return;
    }
    match ty {
        SemanticType::String | SemanticType::SensitiveString => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        SemanticType::Int => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "integer", value));
            }
        },
        SemanticType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        SemanticType::Enum(allowed) => match value.as_str() {
            Some(s) if allowed.iter().any(|a| a.eq_ignore_ascii_case(s)) => {},
            Some(_) => diagnostics.push(
                Diagnostic::error(format!("Invalid value for attribute '{}'", path))
                    .with_detail(format!("Expected one of: {}", allowed.join(", ")))
                    .with_attribute(path),
            ),
            None => diagnostics.push(type_error(path, "string", value)),
        },
        SemanticType::Set(element) | SemanticType::OrderedList(element) => {
            let expected = if matches!(ty, SemanticType::Set(_)) {
                "set"
            } else {
                "list"
            };
            match value.as_array() {
                Some(arr) => {
                    for (i, elem) in arr.iter().enumerate() {
                        let elem_path = format!("{}.{}", path, i);
                        validate_type(element, elem, &elem_path, diagnostics);
                    }
                },
                None => diagnostics.push(type_error(path, expected, value)),
            }
        },
        SemanticType::NestedBlock(attributes) => match value.as_object() {
            Some(obj) => validate_block(attributes, obj, path, diagnostics),
            None => diagnostics.push(type_error(path, "object", value)),
        },
    }
}

fn validate_groups(
    schema: &ResourceSchema,
    obj: &Map<String, Value>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let is_set = |name: &String| !value::is_unset(obj.get(name.as_str()));

    for group in &schema.conflicts {
        let set: Vec<&str> = group.iter().filter(|n| is_set(n)).map(String::as_str).collect();
        if set.len() > 1 {
            diagnostics.push(
                Diagnostic::error(format!("Conflicting attributes: {}", set.join(", ")))
                    .with_detail(format!("Only one of {} may be set", group.join(", ")))
                    .with_attribute(set[1]),
            );
        }
    }

    for group in &schema.required_together {
        let set = group.iter().filter(|n| is_set(n)).count();
        if set > 0 && set < group.len() {
            let missing: Vec<&str> = group
                .iter()
                .filter(|n| !is_set(n))
                .map(String::as_str)
                .collect();
            diagnostics.push(
                Diagnostic::error(format!(
                    "Attributes {} must be set together",
                    group.join(", ")
                ))
                .with_detail(format!("Missing: {}", missing.join(", ")))
                .with_attribute(missing[0]),
            );
        }
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            n.as_i64().is_some()
                || n.as_f64()
                    .map(|f| f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64)
                    .unwrap_or(false)
        },
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic {
        severity: DiagnosticSeverity::Error,
        summary: format!("Invalid type for attribute '{}'", path),
        detail: Some(format!("Expected {}, got {}", expected, value_type_name(got))),
        attribute: Some(path.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MutationClass;
    use serde_json::json;

    fn schema() -> ResourceSchema {
        ResourceSchema::v0()
            .with_attribute(AttributeDescriptor::required_string("name"))
            .with_attribute(AttributeDescriptor::optional_string("comment"))
            .with_attribute(AttributeDescriptor::optional_int("max_instances"))
            .with_attribute(AttributeDescriptor::optional_bool("auto_resume"))
            .with_attribute(AttributeDescriptor::optional_enum(
                "instance_family",
                &["CPU_X64_XS", "CPU_X64_S"],
            ))
            .with_attribute(AttributeDescriptor::optional_string_set("integrations"))
            .with_attribute(AttributeDescriptor::computed_string("owner"))
    }

    #[test]
    fn test_validate_required_string() {
        let schema = schema();
        assert!(validate(&schema, &json!({"name": "A"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("name".to_string()));

        let diagnostics = validate(&schema, &json!({"name": null}));
        assert_eq!(diagnostics.len(), 1);

        // Resolved later.
        assert!(validate(&schema, &json!({"name": value::unknown()})).is_empty());
    }

    #[test]
    fn test_validate_types() {
        let schema = schema();
        assert!(validate(
            &schema,
            &json!({"name": "A", "max_instances": 2, "auto_resume": false, "integrations": ["X"]})
        )
        .is_empty());

        let diagnostics = validate(
            &schema,
            &json!({"name": "A", "max_instances": 1.5, "auto_resume": "yes", "integrations": "X"}),
        );
        let attrs: Vec<_> = diagnostics.iter().filter_map(|d| d.attribute.as_deref()).collect();
        assert_eq!(attrs, vec!["max_instances", "auto_resume", "integrations"]);
    }

    #[test]
    fn test_validate_enum_case_insensitive() {
        let schema = schema();
        let diagnostics = validate(&schema, &json!({"name": "A", "instance_family": "cpu_x64_s"}));
        assert!(diagnostics.is_empty());

        let diagnostics = validate(&schema, &json!({"name": "A", "instance_family": "GPU_NV_S"}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].detail.as_deref().unwrap().contains("CPU_X64_XS"));
    }

    #[test]
    fn test_validate_unknown_attribute() {
        let diagnostics = validate(&schema(), &json!({"name": "A", "colour": "blue"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("colour"));
    }

    #[test]
    fn test_validate_computed_attribute() {
        let schema = schema();
        assert!(validate(&schema, &json!({"name": "A", "owner": null})).is_empty());

        let diagnostics = validate(&schema, &json!({"name": "A", "owner": "SYSADMIN"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("owner"));
    }

    #[test]
    fn test_messages_do_not_echo_values() {
        let schema = ResourceSchema::v0().with_attribute(
            AttributeDescriptor::new(
                "password",
                SemanticType::SensitiveString,
                MutationClass::InPlace,
            ),
        );
        let diagnostics = validate(&schema, &json!({"password": 12345}));
        assert_eq!(diagnostics.len(), 1);
        let text = format!("{:?}", diagnostics[0]);
        assert!(!text.contains("12345"));
    }

    #[test]
    fn test_validate_groups() {
        let schema = schema()
            .with_conflicting(&["comment", "max_instances"])
            .with_required_together(&["auto_resume", "instance_family"]);

        let diagnostics =
            validate(&schema, &json!({"name": "A", "comment": "c", "max_instances": 1}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Conflicting"));

        let diagnostics = validate(&schema, &json!({"name": "A", "auto_resume": true}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("instance_family"));

        assert!(validate(
            &schema,
            &json!({"name": "A", "auto_resume": true, "instance_family": "CPU_X64_XS"})
        )
        .is_empty());
    }

    #[test]
    fn test_validate_nested_block() {
        let schema = crate::config::ProviderConfig::schema();
        assert!(validate(&schema, &json!({"retry": {"max_attempts": 5}})).is_empty());

        let diagnostics = validate(&schema, &json!({"retry": {"max_attempts": "five"}}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("retry.max_attempts"));

        let diagnostics = validate(&schema, &json!({"retry": {"jitter": true}}));
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("retry.jitter"));
    }

    #[test]
    fn test_validate_root_not_object() {
        let diagnostics = validate(&schema(), &json!("nope"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].attribute.is_none());
        assert!(!is_valid(&schema(), &json!([])));
        assert!(validate_result(&schema(), &json!({"name": "A"})).is_ok());
    }
}
