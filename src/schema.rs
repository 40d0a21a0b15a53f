//! Attribute descriptors and resource schemas.
//!
//! Every resource kind declares an ordered list of [`AttributeDescriptor`]s.
//! A descriptor classifies one attribute: its semantic type, how a change
//! to it is applied (in place, by recreation, never), what an absent value
//! in configuration means, how two values are compared, whether it is
//! sensitive, and where it is read from on the remote side.
//!
//! Descriptors are built with the same chained-builder style as the rest of
//! the crate:
//!
//! ```
//! use snowflake_provider::schema::{AttributeDescriptor, ResourceSchema};
//!
//! let schema = ResourceSchema::v0()
//!     .with_attribute(AttributeDescriptor::required_string("name").rename())
//!     .with_attribute(AttributeDescriptor::optional_bool("is_transient").force_new())
//!     .with_attribute(AttributeDescriptor::optional_string("comment"));
//!
//! assert!(schema.attribute("is_transient").unwrap().is_force_new());
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::identifier;
use crate::value::{self, Sensitive};

/// The semantic type of an attribute value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    /// A string.
    String,
    /// A boolean.
    Bool,
    /// A 64-bit integer.
    Int,
    /// A string restricted to a fixed set of values (case-insensitive).
    Enum(&'static [&'static str]),
    /// An unordered collection of unique values.
    Set(Box<SemanticType>),
    /// An ordered collection.
    OrderedList(Box<SemanticType>),
    /// A nested object with its own attributes.
    NestedBlock(Vec<AttributeDescriptor>),
    /// A string that must never be printed.
    SensitiveString,
}

impl SemanticType {
    /// A set of the given element type.
    pub fn set(element: SemanticType) -> Self {
        Self::Set(Box::new(element))
    }

    /// An ordered list of the given element type.
    pub fn list(element: SemanticType) -> Self {
        Self::OrderedList(Box::new(element))
    }

    /// Whether values of this type are strings on the wire.
    pub fn is_textual(&self) -> bool {
        matches!(self, Self::String | Self::Enum(_) | Self::SensitiveString)
    }
}

/// How a change to an attribute reaches the remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationClass {
    /// Altered on the live object.
    InPlace,
    /// Changing it requires destroy-and-recreate.
    ForceNew,
    /// Read-only; only ever observed.
    Computed,
    /// A parameter whose value may be inherited from a parent scope.
    Parameter,
}

/// What an absent value in configuration means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultPolicy {
    /// Absence adopts whatever the remote reports (server default).
    UnsetIsDefault,
    /// Absence, or this literal, means "explicitly unset".
    UnsetIsSentinelString(&'static str),
    /// Absence, or this integer, means "explicitly unset".
    UnsetIsSentinelInt(i64),
}

impl DefaultPolicy {
    /// Whether the configured value is this policy's sentinel.
    pub fn is_sentinel(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::UnsetIsSentinelString(s), Value::String(v)) => v == s,
            (Self::UnsetIsSentinelInt(i), Value::Number(n)) => n.as_i64() == Some(*i),
            _ => false,
        }
    }

    /// Whether absence in configuration means "explicitly unset".
    pub fn absent_means_unset(&self) -> bool {
        !matches!(self, Self::UnsetIsDefault)
    }
}

/// How two values of an attribute are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Equality {
    /// Exact equality (numbers compared numerically).
    Identity,
    /// Strings compared without regard to case.
    CaseInsensitive,
    /// Collections compared as sets.
    SetMembership,
    /// Object identifiers compared on their canonical form; collections as
    /// sets of identifiers.
    Identifier,
    /// SQL text compared with whitespace collapsed and trailing `;` ignored.
    SqlText,
}

/// Which remote output a value is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteSource {
    /// A column of the `SHOW` row.
    Show,
    /// A property row of `DESCRIBE`.
    Describe,
    /// A row of `SHOW PARAMETERS`.
    Parameter,
}

/// One place an attribute is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteField {
    /// The output the value comes from.
    pub source: RemoteSource,
    /// Column name (SHOW), property name (DESCRIBE) or key (parameters).
    pub column: String,
}

/// How the remote side backs an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteBinding {
    /// The SHOW column named like the attribute (or the parameter key).
    Default,
    /// Explicit fields, in mapping order.
    Fields(Vec<RemoteField>),
    /// Never returned by the remote (passwords, keys); state keeps the
    /// last written value.
    WriteOnly,
    /// Derived from the identifier by the engine.
    Derived,
}

/// How an attribute is rendered in create/alter statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlForm {
    /// `KEY = value`.
    Property,
    /// A bare keyword: a create modifier (`CREATE SECURE VIEW`) and
    /// `SET KEY` / `UNSET KEY` on alter.
    Flag,
    /// A `WITH KEY` create clause, toggled with `ENABLE KEY` / `DISABLE KEY`.
    Toggle,
    /// Part of the identifier; changed with `RENAME TO`.
    Rename,
    /// Part of the identifier and never altered.
    Identity,
    /// Not rendered.
    None,
}

/// The classification of one attribute change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeClass {
    /// Old and new are equal under the descriptor's predicate.
    NoChange,
    /// The change is applied in place.
    InPlace,
    /// The change requires recreating the object.
    ForceNew,
    /// Only a computed value moved.
    OnlyComputed,
}

/// Metadata that classifies a single attribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeDescriptor {
    /// Attribute name.
    pub name: String,
    /// Semantic type.
    #[serde(rename = "type")]
    pub semantic_type: SemanticType,
    /// Mutation class.
    pub mutation: MutationClass,
    /// Default-handling policy.
    pub policy: DefaultPolicy,
    /// Equality predicate.
    pub equality: Equality,
    /// Must be present in configuration.
    pub required: bool,
    /// Redact on log and in diagnostics.
    pub sensitive: bool,
    /// Static default used when configuration omits the attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Statement keyword; defaults to the upper-cased name.
    #[serde(skip)]
    pub sql_key: Option<String>,
    /// Statement rendering.
    #[serde(skip)]
    pub sql_form: SqlForm,
    /// Altered in a statement of its own.
    #[serde(skip)]
    pub standalone_alter: bool,
    /// Remote mapping.
    #[serde(skip)]
    pub remote: RemoteBinding,
    /// Source that wins when several disagree.
    #[serde(skip)]
    pub authoritative: Option<RemoteSource>,
}

impl AttributeDescriptor {
    /// Create a descriptor with the given type and mutation class.
    pub fn new(
        name: impl Into<String>,
        semantic_type: SemanticType,
        mutation: MutationClass,
    ) -> Self {
        let equality = match semantic_type {
            SemanticType::Set(_) => Equality::SetMembership,
            SemanticType::Enum(_) => Equality::CaseInsensitive,
            _ => Equality::Identity,
        };
        let sensitive = semantic_type == SemanticType::SensitiveString;
        Self {
            name: name.into(),
            semantic_type,
            mutation,
            policy: DefaultPolicy::UnsetIsDefault,
            equality,
            required: false,
            sensitive,
            default: None,
            description: None,
            sql_key: None,
            sql_form: SqlForm::Property,
            standalone_alter: false,
            remote: if sensitive {
                RemoteBinding::WriteOnly
            } else {
                RemoteBinding::Default
            },
            authoritative: None,
        }
    }

    /// A required in-place string.
    pub fn required_string(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::String, MutationClass::InPlace).required()
    }

    /// An optional in-place string.
    pub fn optional_string(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::String, MutationClass::InPlace)
    }

    /// An optional in-place boolean.
    pub fn optional_bool(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::Bool, MutationClass::InPlace)
    }

    /// An optional in-place integer.
    pub fn optional_int(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::Int, MutationClass::InPlace)
    }

    /// An optional in-place enum.
    pub fn optional_enum(name: impl Into<String>, values: &'static [&'static str]) -> Self {
        Self::new(name, SemanticType::Enum(values), MutationClass::InPlace)
    }

    /// An optional in-place set of strings.
    pub fn optional_string_set(name: impl Into<String>) -> Self {
        Self::new(
            name,
            SemanticType::set(SemanticType::String),
            MutationClass::InPlace,
        )
    }

    /// A read-only string.
    pub fn computed_string(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::String, MutationClass::Computed)
    }

    /// A read-only boolean.
    pub fn computed_bool(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::Bool, MutationClass::Computed)
    }

    /// A parameter that can be inherited from a parent scope.
    ///
    /// Absence in configuration unsets the parameter at this level, as does
    /// the `sentinel` literal.
    pub fn parameter_int(name: impl Into<String>, key: &str, sentinel: i64) -> Self {
        Self::new(name, SemanticType::Int, MutationClass::Parameter)
            .sentinel_int(sentinel)
            .sql(key)
            .from_parameter(key)
    }

    /// A string parameter; the empty string unsets it.
    pub fn parameter_string(name: impl Into<String>, key: &str) -> Self {
        Self::new(name, SemanticType::String, MutationClass::Parameter)
            .sentinel_string("")
            .sql(key)
            .from_parameter(key)
    }

    /// Mark as required in configuration.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Changing this attribute recreates the object.
    pub fn force_new(mut self) -> Self {
        self.mutation = MutationClass::ForceNew;
        self
    }

    /// Mark as read-only.
    pub fn computed(mut self) -> Self {
        self.mutation = MutationClass::Computed;
        self.required = false;
        self
    }

    /// Treat this string literal as "explicit unset".
    pub fn sentinel_string(mut self, sentinel: &'static str) -> Self {
        self.policy = DefaultPolicy::UnsetIsSentinelString(sentinel);
        self
    }

    /// Treat this integer as "explicit unset".
    pub fn sentinel_int(mut self, sentinel: i64) -> Self {
        self.policy = DefaultPolicy::UnsetIsSentinelInt(sentinel);
        self
    }

    /// Compare values without regard to case.
    pub fn case_insensitive(mut self) -> Self {
        self.equality = Equality::CaseInsensitive;
        self
    }

    /// Use the given equality predicate.
    pub fn with_equality(mut self, equality: Equality) -> Self {
        self.equality = equality;
        self
    }

    /// Mark as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Use this value when configuration omits the attribute.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Render as `KEY = value` with this keyword.
    pub fn sql(mut self, key: &str) -> Self {
        self.sql_key = Some(key.to_string());
        self.sql_form = SqlForm::Property;
        self
    }

    /// Render as a bare keyword.
    pub fn flag(mut self, key: &str) -> Self {
        self.sql_key = Some(key.to_string());
        self.sql_form = SqlForm::Flag;
        self
    }

    /// Render as a `WITH KEY` clause, altered with `ENABLE` / `DISABLE`.
    pub fn toggle(mut self, key: &str) -> Self {
        self.sql_key = Some(key.to_string());
        self.sql_form = SqlForm::Toggle;
        self
    }

    /// The object name; changes are applied with `RENAME TO`.
    pub fn rename(mut self) -> Self {
        self.sql_form = SqlForm::Rename;
        self
    }

    /// Part of the identifier; never rendered as a property.
    pub fn identity(mut self) -> Self {
        self.sql_form = SqlForm::Identity;
        self
    }

    /// Never rendered as a property; the kind renders it itself.
    pub fn unrendered(mut self) -> Self {
        self.sql_form = SqlForm::None;
        self
    }

    /// Alter this attribute in a statement of its own.
    pub fn standalone(mut self) -> Self {
        self.standalone_alter = true;
        self
    }

    /// Read from this SHOW column.
    pub fn from_show(self, column: &str) -> Self {
        self.with_field(RemoteSource::Show, column)
    }

    /// Read from this DESCRIBE property.
    pub fn from_describe(self, property: &str) -> Self {
        self.with_field(RemoteSource::Describe, property)
    }

    /// Read from this SHOW PARAMETERS key.
    pub fn from_parameter(self, key: &str) -> Self {
        self.with_field(RemoteSource::Parameter, key)
    }

    fn with_field(mut self, source: RemoteSource, column: &str) -> Self {
        let field = RemoteField {
            source,
            column: column.to_string(),
        };
        match &mut self.remote {
            RemoteBinding::Fields(fields) => fields.push(field),
            _ => self.remote = RemoteBinding::Fields(vec![field]),
        }
        self
    }

    /// Prefer this source when sources disagree.
    pub fn authoritative(mut self, source: RemoteSource) -> Self {
        self.authoritative = Some(source);
        self
    }

    /// Never read back from the remote.
    pub fn write_only(mut self) -> Self {
        self.remote = RemoteBinding::WriteOnly;
        self
    }

    /// Derived from the identifier by the engine.
    pub fn derived(mut self) -> Self {
        self.remote = RemoteBinding::Derived;
        self.sql_form = SqlForm::None;
        self
    }

    /// Whether changing this attribute recreates the object.
    pub fn is_force_new(&self) -> bool {
        self.mutation == MutationClass::ForceNew
    }

    /// Whether the attribute is read-only.
    pub fn is_computed(&self) -> bool {
        self.mutation == MutationClass::Computed
    }

    /// Whether the attribute is a parameter.
    pub fn is_parameter(&self) -> bool {
        self.mutation == MutationClass::Parameter
    }

    /// Whether the attribute is a set.
    pub fn is_set(&self) -> bool {
        matches!(self.semantic_type, SemanticType::Set(_))
    }

    /// Statement keyword for this attribute.
    pub fn sql_key(&self) -> String {
        self.sql_key
            .clone()
            .unwrap_or_else(|| self.name.to_uppercase())
    }

    /// Where the attribute is read from, in mapping order.
    pub fn remote_fields(&self) -> Vec<RemoteField> {
        match &self.remote {
            RemoteBinding::Default => vec![RemoteField {
                source: if self.is_parameter() {
                    RemoteSource::Parameter
                } else {
                    RemoteSource::Show
                },
                column: if self.is_parameter() {
                    self.sql_key()
                } else {
                    self.name.clone()
                },
            }],
            RemoteBinding::Fields(fields) => fields.clone(),
            RemoteBinding::WriteOnly | RemoteBinding::Derived => Vec::new(),
        }
    }

    /// Whether the remote reports this attribute at all.
    pub fn is_observable(&self) -> bool {
        !matches!(
            self.remote,
            RemoteBinding::WriteOnly | RemoteBinding::Derived
        )
    }

    /// Wrap a value with this attribute's redaction marker.
    pub fn guard(&self, value: Value) -> Sensitive<Value> {
        Sensitive::marked(value, self.sensitive)
    }

    /// Render a value for a message, redacting sensitive attributes.
    pub fn render_value(&self, value: Option<&Value>) -> String {
        match value {
            None => "null".to_string(),
            Some(v) => self.guard(v.clone()).render(),
        }
    }
}

/// Schema of one resource kind: an ordered list of descriptors plus
/// cross-attribute constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ResourceSchema {
    /// Schema version of the persisted state.
    pub version: u64,
    /// Descriptors in declaration order.
    pub attributes: Vec<AttributeDescriptor>,
    /// Groups of attributes of which at most one may be set.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Vec<String>>,
    /// Groups of attributes that must be set together.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required_together: Vec<Vec<String>>,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ResourceSchema {
    /// An empty schema at the given version.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    /// An empty schema at version 0.
    pub fn v0() -> Self {
        Self::new(0)
    }

    /// Append a descriptor.
    pub fn with_attribute(mut self, descriptor: AttributeDescriptor) -> Self {
        self.attributes.push(descriptor);
        self
    }

    /// Declare attributes of which at most one may be set.
    pub fn with_conflicting(mut self, names: &[&str]) -> Self {
        self.conflicts
            .push(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// Declare attributes that must be set together.
    pub fn with_required_together(mut self, names: &[&str]) -> Self {
        self.required_together
            .push(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Look up a descriptor by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Descriptor names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|a| a.name.as_str())
    }

    /// Whether any attribute is a parameter.
    pub fn has_parameters(&self) -> bool {
        self.attributes.iter().any(|a| a.is_parameter())
    }

    /// Whether any attribute is read from DESCRIBE.
    pub fn reads_describe(&self) -> bool {
        self.attributes.iter().any(|a| {
            a.remote_fields()
                .iter()
                .any(|f| f.source == RemoteSource::Describe)
        })
    }
}

/// Schema of the whole provider.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ProviderSchema {
    /// Schema of the provider configuration block.
    pub provider: ResourceSchema,
    /// Schemas for each resource kind.
    pub resources: BTreeMap<String, ResourceSchema>,
}

impl ProviderSchema {
    /// An empty provider schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider configuration schema.
    pub fn with_provider_config(mut self, schema: ResourceSchema) -> Self {
        self.provider = schema;
        self
    }

    /// Add a resource schema.
    pub fn with_resource(mut self, name: impl Into<String>, schema: ResourceSchema) -> Self {
        self.resources.insert(name.into(), schema);
        self
    }
}

/// Compare two values under the descriptor's equality predicate.
///
/// `None`, `null` and empty collections all mean "unset" and compare equal
/// to each other. The unknown placeholder never equals anything.
pub fn values_equal(desc: &AttributeDescriptor, a: Option<&Value>, b: Option<&Value>) -> bool {
    let a = a.filter(|v| !is_empty_value(v));
    let b = b.filter(|v| !is_empty_value(v));
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            if value::is_unknown(a) || value::is_unknown(b) {
                return false;
            }
            match desc.equality {
                Equality::Identity => json_eq(a, b),
                Equality::CaseInsensitive => match (a, b) {
                    (Value::String(x), Value::String(y)) => x.to_uppercase() == y.to_uppercase(),
                    _ => json_eq(a, b),
                },
                Equality::SetMembership => set_eq(a, b, |v| canonical_key(v)),
                Equality::Identifier => match (a, b) {
                    (Value::Array(_), Value::Array(_)) => set_eq(a, b, identifier_key),
                    _ => identifier_key(a) == identifier_key(b),
                },
                Equality::SqlText => match (a, b) {
                    (Value::String(x), Value::String(y)) => normalize_sql(x) == normalize_sql(y),
                    _ => json_eq(a, b),
                },
            }
        },
        _ => false,
    }
}

/// Classify the change from `old` to `new` for one attribute.
pub fn classify_change(
    desc: &AttributeDescriptor,
    old: Option<&Value>,
    new: Option<&Value>,
) -> ChangeClass {
    if values_equal(desc, old, new) {
        return ChangeClass::NoChange;
    }
    match desc.mutation {
        MutationClass::ForceNew => ChangeClass::ForceNew,
        MutationClass::InPlace | MutationClass::Parameter => ChangeClass::InPlace,
        MutationClass::Computed => ChangeClass::OnlyComputed,
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Structural equality with numbers compared by value.
pub fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| json_eq(x, y))
        },
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|w| json_eq(v, w)).unwrap_or(false))
        },
        _ => a == b,
    }
}

fn set_eq(a: &Value, b: &Value, key: impl Fn(&Value) -> String) -> bool {
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            let x: BTreeSet<String> = x.iter().map(&key).collect();
            let y: BTreeSet<String> = y.iter().map(&key).collect();
            x == y
        },
        _ => json_eq(a, b),
    }
}

fn canonical_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n
            .as_i64()
            .map(|i| i.to_string())
            .unwrap_or_else(|| n.to_string()),
        other => other.to_string(),
    }
}

fn identifier_key(value: &Value) -> String {
    match value {
        Value::String(s) => identifier::canonical_text(s).unwrap_or_else(|| s.clone()),
        other => canonical_key(other),
    }
}

/// Collapse whitespace and drop a trailing semicolon.
///
/// A full `CREATE ... AS <query>` statement is reduced to its query first.
pub fn normalize_sql(text: &str) -> String {
    let collapsed = query_body(text).split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim_end_matches(';').trim_end().to_string()
}

/// The query of a `CREATE ... AS <query>` statement.
///
/// `SHOW VIEWS` reports the whole DDL in its `text` column while
/// configuration holds only the query. The first `AS` outside quotes,
/// comments and parentheses ends the header. Text that is not a `CREATE`
/// statement is returned unchanged.
pub fn query_body(text: &str) -> &str {
    let trimmed = text.trim_start();
    let is_create = trimmed
        .get(..6)
        .map(|w| w.eq_ignore_ascii_case("CREATE"))
        .unwrap_or(false)
        && trimmed
            .get(6..)
            .map(|rest| rest.starts_with(char::is_whitespace))
            .unwrap_or(false);
    if !is_create {
        return text;
    }

    let bytes = trimmed.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    if quote == b'\'' && bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            },
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            },
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 1;
            },
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b'a' | b'A' if depth == 0 => {
                let starts_word = i == 0 || !is_word_byte(bytes[i - 1]);
                let is_as = matches!(bytes.get(i + 1), Some(b's' | b'S'));
                let ends_word = bytes.get(i + 2).map(|b| !is_word_byte(*b)).unwrap_or(false);
                if starts_word && is_as && ends_word {
                    return trimmed[i + 2..].trim_start();
                }
            },
            _ => {},
        }
        i += 1;
    }
    text
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    /// An error that prevents the operation from completing.
    Error,
    /// A warning that doesn't prevent the operation but should be addressed.
    Warning,
}

/// A diagnostic message from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct Diagnostic {
    /// The severity of the diagnostic.
    pub severity: DiagnosticSeverity,
    /// A short summary of the issue.
    pub summary: String,
    /// A detailed description of the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// The attribute path where the issue occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Create a warning diagnostic.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Add detail to this diagnostic.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set the attribute path for this diagnostic.
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Whether this is an error.
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

/// Whether any diagnostic is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}
