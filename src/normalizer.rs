//! Turns raw `SHOW` / `DESCRIBE` / `SHOW PARAMETERS` output into one
//! canonical attribute map.
//!
//! The rules are applied in this order:
//!
//! 1. every source row is mapped to descriptor attributes through the
//!    descriptor's remote fields
//! 2. when sources disagree, the descriptor's authoritative source wins;
//!    otherwise `DESCRIBE` beats `SHOW`, and `SHOW PARAMETERS` is only
//!    consulted first for parameters
//! 3. case-insensitive strings (and enums) are upper-cased
//! 4. sets are de-duplicated and sorted
//! 5. parameter values are tagged with the level they were set at

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::{Map, Value};
use tracing::trace;

use crate::driver::Row;
use crate::error::ProviderError;
use crate::schema::{
    query_body, AttributeDescriptor, Equality, RemoteSource, ResourceSchema, SemanticType,
};
use crate::value::AttrMap;

/// The raw outputs read for one object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteView {
    /// The matching `SHOW` row.
    pub show: Row,
    /// `DESCRIBE` rows (`property`, `value`).
    pub describe: Vec<Row>,
    /// `SHOW PARAMETERS` rows (`key`, `value`, `level`).
    pub parameters: Vec<Row>,
}

/// Where a parameter value was set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParameterLevel {
    /// Not set anywhere; the system default.
    Default,
    /// Set on the account.
    Account,
    /// Set on a database.
    Database,
    /// Set on a schema.
    Schema,
    /// Set on the object itself (user, warehouse, table, ...).
    Object,
}

impl ParameterLevel {
    /// Parse the `level` column of `SHOW PARAMETERS`.
    pub fn parse(level: &str) -> Self {
        match level.trim().to_uppercase().as_str() {
            "" | "SYSTEM" | "DEFAULT" => Self::Default,
            "ACCOUNT" => Self::Account,
            "DATABASE" => Self::Database,
            "SCHEMA" => Self::Schema,
            _ => Self::Object,
        }
    }
}

impl fmt::Display for ParameterLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Default => "default",
            Self::Account => "account",
            Self::Database => "database",
            Self::Schema => "schema",
            Self::Object => "object",
        };
        f.write_str(s)
    }
}

/// The canonical remote view of one object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedView {
    values: AttrMap,
    levels: BTreeMap<String, ParameterLevel>,
}

impl NormalizedView {
    /// Build a view directly.
    pub fn new(values: AttrMap) -> Self {
        Self {
            values,
            levels: BTreeMap::new(),
        }
    }

    /// Tag a parameter with its level.
    pub fn with_level(mut self, name: impl Into<String>, level: ParameterLevel) -> Self {
        self.levels.insert(name.into(), level);
        self
    }

    /// The observed value of an attribute.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    /// The level a parameter was observed at.
    pub fn level(&self, name: &str) -> Option<ParameterLevel> {
        self.levels.get(name).copied()
    }

    /// Whether the parameter is set on the object itself.
    pub fn is_set_at(&self, name: &str, own: ParameterLevel) -> bool {
        self.level(name) == Some(own)
    }

    /// The value of an attribute as seen at this object's level.
    ///
    /// Parameters inherited from a parent scope (or left at their default)
    /// count as unset here.
    pub fn effective(&self, desc: &AttributeDescriptor, own: ParameterLevel) -> Option<&Value> {
        if desc.is_parameter() && !self.is_set_at(&desc.name, own) {
            return None;
        }
        self.get(&desc.name)
    }

    /// All observed values.
    pub fn values(&self) -> &AttrMap {
        &self.values
    }
}

/// Normalise the raw outputs for one object.
pub fn normalize(
    schema: &ResourceSchema,
    view: &RemoteView,
) -> Result<NormalizedView, ProviderError> {
    let mut out = NormalizedView::default();

    for desc in &schema.attributes {
        if !desc.is_observable() {
            continue;
        }

        let mut candidates: BTreeMap<RemoteSource, (Option<Value>, Option<ParameterLevel>)> =
            BTreeMap::new();
        for field in desc.remote_fields() {
            let raw = match field.source {
                RemoteSource::Show => view
                    .show
                    .get(&field.column.to_lowercase())
                    .map(|v| (v.clone(), None)),
                RemoteSource::Describe => property_row(&view.describe, "property", &field.column)
                    .and_then(|row| row.get("value"))
                    .map(|v| (v.clone(), None)),
                RemoteSource::Parameter => {
                    property_row(&view.parameters, "key", &field.column).and_then(|row| {
                        row.get("value").map(|v| {
                            let level = row.get("level").map(|l| ParameterLevel::parse(l));
                            (v.clone(), Some(level.unwrap_or(ParameterLevel::Default)))
                        })
                    })
                },
            };
            if let Some((text, level)) = raw {
                let parsed = parse_remote(desc, &text)?;
                candidates.entry(field.source).or_insert((parsed, level));
            }
        }

        let Some((value, level)) = pick(desc, candidates) else {
            continue;
        };
        if let Some(level) = level {
            out.levels.insert(desc.name.clone(), level);
        }
        if let Some(value) = value {
            let value = canonicalize(desc, value);
            trace!(attribute = %desc.name, "normalized remote value");
            out.values.insert(desc.name.clone(), value);
        }
    }

    Ok(out)
}

fn property_row<'a>(rows: &'a [Row], key_column: &str, name: &str) -> Option<&'a Row> {
    rows.iter().find(|row| {
        row.get(key_column)
            .map(|k| k.eq_ignore_ascii_case(name))
            .unwrap_or(false)
    })
}

/// Choose among the sources that reported a value.
fn pick(
    desc: &AttributeDescriptor,
    mut candidates: BTreeMap<RemoteSource, (Option<Value>, Option<ParameterLevel>)>,
) -> Option<(Option<Value>, Option<ParameterLevel>)> {
    let mut order = Vec::with_capacity(4);
    if let Some(source) = desc.authoritative {
        order.push(source);
    }
    if desc.is_parameter() {
        order.push(RemoteSource::Parameter);
    }
    order.extend([RemoteSource::Describe, RemoteSource::Show, RemoteSource::Parameter]);

    // A source that reported a real value beats one that reported "unset".
    for source in &order {
        if matches!(candidates.get(source), Some((Some(_), _))) {
            return candidates.remove(source);
        }
    }
    order.iter().find_map(|source| candidates.remove(source))
}

/// Parse remote text according to the attribute's semantic type.
pub fn parse_remote(
    desc: &AttributeDescriptor,
    text: &str,
) -> Result<Option<Value>, ProviderError> {
    parse_typed(&desc.semantic_type, text).map_err(|reason| ProviderError::Consistency {
        attribute: desc.name.clone(),
        message: reason,
    })
}

fn parse_typed(semantic_type: &SemanticType, text: &str) -> Result<Option<Value>, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match semantic_type {
        SemanticType::String | SemanticType::SensitiveString | SemanticType::Enum(_) => {
            Ok(Some(Value::String(text.to_string())))
        },
        SemanticType::Bool => match trimmed.to_lowercase().as_str() {
            "true" | "yes" | "on" => Ok(Some(Value::Bool(true))),
            "false" | "no" | "off" => Ok(Some(Value::Bool(false))),
            "null" => Ok(None),
            _ => Err(format!("is not a boolean: {}", trimmed)),
        },
        SemanticType::Int => {
            if trimmed.eq_ignore_ascii_case("null") {
                return Ok(None);
            }
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Some(Value::from(i)));
            }
            match trimmed.parse::<f64>() {
                Ok(f) if f.fract() == 0.0 => Ok(Some(Value::from(f as i64))),
                _ => Err(format!("is not an integer: {}", trimmed)),
            }
        },
        SemanticType::Set(element) | SemanticType::OrderedList(element) => {
            let items = split_list(trimmed);
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if let Some(v) = parse_typed(element, &item)? {
                    out.push(v);
                }
            }
            Ok(if out.is_empty() {
                None
            } else {
                Some(Value::Array(out))
            })
        },
        SemanticType::NestedBlock(_) => match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) if map.is_empty() => Ok(None),
            Ok(Value::Object(map)) => Ok(Some(Value::Object(map))),
            Ok(Value::Null) => Ok(None),
            _ => Err("is not an object".to_string()),
        },
    }
}

/// Split `[A, B]`, `["A","B"]` or `A,B` into elements.
fn split_list(text: &str) -> Vec<String> {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(text) {
        return items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect();
    }
    let body = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(text);
    body.split(',')
        .map(|item| {
            let item = item.trim();
            item.strip_prefix('"')
                .and_then(|t| t.strip_suffix('"'))
                .or_else(|| item.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')))
                .unwrap_or(item)
                .to_string()
        })
        .filter(|item| !item.is_empty())
        .collect()
}

/// Apply the case and ordering rules to one parsed value.
pub fn canonicalize(desc: &AttributeDescriptor, value: Value) -> Value {
    let upper = desc.equality == Equality::CaseInsensitive
        || matches!(desc.semantic_type, SemanticType::Enum(_));
    match (value, &desc.semantic_type) {
        (Value::String(s), _) if desc.equality == Equality::SqlText => {
            Value::String(query_body(&s).trim().to_string())
        },
        (Value::String(s), _) if upper => Value::String(s.to_uppercase()),
        (Value::Array(items), SemanticType::Set(_)) => {
            let mut seen = BTreeSet::new();
            let mut keyed: Vec<(String, Value)> = Vec::with_capacity(items.len());
            for item in items {
                let item = match item {
                    Value::String(s) if upper => Value::String(s.to_uppercase()),
                    other => other,
                };
                let key = match &item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if seen.insert(key.clone()) {
                    keyed.push((key, item));
                }
            }
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Array(keyed.into_iter().map(|(_, v)| v).collect())
        },
        (Value::Object(map), SemanticType::NestedBlock(fields)) => {
            let mut out = Map::new();
            for (k, v) in map {
                match fields.iter().find(|f| f.name == k) {
                    Some(field) => out.insert(k, canonicalize(field, v)),
                    None => out.insert(k, v),
                };
            }
            Value::Object(out)
        },
        (other, _) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::row;
    use crate::schema::{AttributeDescriptor, RemoteSource};
    use serde_json::json;

    fn user_like_schema() -> ResourceSchema {
        ResourceSchema::v0()
            .with_attribute(AttributeDescriptor::required_string("name"))
            .with_attribute(
                AttributeDescriptor::optional_string("comment")
                    .from_show("comment")
                    .from_describe("COMMENT"),
            )
            .with_attribute(
                AttributeDescriptor::optional_string("display_name")
                    .from_show("display_name")
                    .from_describe("DISPLAY_NAME")
                    .authoritative(RemoteSource::Show),
            )
            .with_attribute(
                AttributeDescriptor::optional_string("default_role")
                    .case_insensitive()
                    .from_show("default_role"),
            )
            .with_attribute(
                AttributeDescriptor::optional_string_set("default_secondary_roles")
                    .from_describe("DEFAULT_SECONDARY_ROLES"),
            )
            .with_attribute(AttributeDescriptor::optional_bool("disabled"))
            .with_attribute(AttributeDescriptor::optional_int("mins_to_unlock").sentinel_int(-1))
            .with_attribute(AttributeDescriptor::parameter_int(
                "statement_timeout_in_seconds",
                "STATEMENT_TIMEOUT_IN_SECONDS",
                -1,
            ))
            .with_attribute(AttributeDescriptor::parameter_string("timezone", "TIMEZONE"))
    }

    fn sample_view() -> RemoteView {
        RemoteView {
            show: row([
                ("name", "ALICE"),
                ("comment", "from show"),
                ("display_name", "Alice (show)"),
                ("default_role", "analyst"),
                ("disabled", "false"),
                ("mins_to_unlock", ""),
            ]),
            describe: vec![
                row([("property", "COMMENT"), ("value", "from describe")]),
                row([("property", "DISPLAY_NAME"), ("value", "Alice (describe)")]),
                row([
                    ("property", "DEFAULT_SECONDARY_ROLES"),
                    ("value", "[\"ALL\", \"ADMIN\", \"ALL\"]"),
                ]),
            ],
            parameters: vec![
                row([
                    ("key", "STATEMENT_TIMEOUT_IN_SECONDS"),
                    ("value", "600"),
                    ("level", "USER"),
                ]),
                row([("key", "TIMEZONE"), ("value", "Europe/Warsaw"), ("level", "ACCOUNT")]),
            ],
        }
    }

    #[test]
    fn test_describe_beats_show() {
        let view = normalize(&user_like_schema(), &sample_view()).unwrap();
        assert_eq!(view.get("comment"), Some(&json!("from describe")));
    }

    #[test]
    fn test_authoritative_source_wins() {
        let view = normalize(&user_like_schema(), &sample_view()).unwrap();
        assert_eq!(view.get("display_name"), Some(&json!("Alice (show)")));
    }

    #[test]
    fn test_case_insensitive_upper_cased() {
        let view = normalize(&user_like_schema(), &sample_view()).unwrap();
        assert_eq!(view.get("default_role"), Some(&json!("ANALYST")));
    }

    #[test]
    fn test_sets_sorted_and_deduplicated() {
        let view = normalize(&user_like_schema(), &sample_view()).unwrap();
        assert_eq!(view.get("default_secondary_roles"), Some(&json!(["ADMIN", "ALL"])));
    }

    #[test]
    fn test_view_text_reduced_to_query() {
        let schema = ResourceSchema::v0()
            .with_attribute(AttributeDescriptor::required_string("name"))
            .with_attribute(
                AttributeDescriptor::required_string("statement")
                    .with_equality(Equality::SqlText)
                    .from_show("text"),
            );
        let remote = RemoteView {
            show: row([
                ("name", "V"),
                ("text", "CREATE SECURE VIEW \"DB\".\"S\".\"V\" AS\n  select 1"),
            ]),
            describe: vec![],
            parameters: vec![],
        };
        let view = normalize(&schema, &remote).unwrap();
        assert_eq!(view.get("statement"), Some(&json!("select 1")));
    }

    #[test]
    fn test_typed_parsing() {
        let view = normalize(&user_like_schema(), &sample_view()).unwrap();
        assert_eq!(view.get("disabled"), Some(&json!(false)));
        assert_eq!(view.get("mins_to_unlock"), None);
        assert_eq!(view.get("name"), Some(&json!("ALICE")));
    }

    #[test]
    fn test_parameter_levels() {
        let schema = user_like_schema();
        let view = normalize(&schema, &sample_view()).unwrap();

        assert_eq!(view.level("statement_timeout_in_seconds"), Some(ParameterLevel::Object));
        assert_eq!(view.level("timezone"), Some(ParameterLevel::Account));
        assert!(view.is_set_at("statement_timeout_in_seconds", ParameterLevel::Object));

        let timeout = schema.attribute("statement_timeout_in_seconds").unwrap();
        let timezone = schema.attribute("timezone").unwrap();
        assert_eq!(view.effective(timeout, ParameterLevel::Object), Some(&json!(600)));
        // Inherited from the account: unset at this level.
        assert_eq!(view.effective(timezone, ParameterLevel::Object), None);
        assert_eq!(view.get("timezone"), Some(&json!("Europe/Warsaw")));
    }

    #[test]
    fn test_bad_remote_value_is_reported() {
        let schema =
            ResourceSchema::v0().with_attribute(AttributeDescriptor::optional_int("min_nodes"));
        let remote = RemoteView {
            show: row([("min_nodes", "many")]),
            ..Default::default()
        };
        let err = normalize(&schema, &remote).unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Consistency { ref attribute, .. } if attribute == "min_nodes"
        ));
    }

    #[test]
    fn test_list_forms() {
        assert_eq!(split_list("[A, B]"), vec!["A", "B"]);
        assert_eq!(split_list("A,B"), vec!["A", "B"]);
        assert_eq!(split_list("[\"A\",\"B\"]"), vec!["A", "B"]);
        assert!(split_list("[]").is_empty());
    }

    #[test]
    fn test_parameter_level_parse() {
        assert_eq!(ParameterLevel::parse(""), ParameterLevel::Default);
        assert_eq!(ParameterLevel::parse("account"), ParameterLevel::Account);
        assert_eq!(ParameterLevel::parse("DATABASE"), ParameterLevel::Database);
        assert_eq!(ParameterLevel::parse("SCHEMA"), ParameterLevel::Schema);
        assert_eq!(ParameterLevel::parse("USER"), ParameterLevel::Object);
    }
}
