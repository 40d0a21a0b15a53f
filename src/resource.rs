//! The capability set every resource kind provides.

use serde_json::Value;

use crate::error::ProviderError;
use crate::identifier::{Identifier, IdentifierScope};
use crate::normalizer::ParameterLevel;
use crate::schema::{Diagnostic, ResourceSchema};
use crate::sql::ObjectType;
use crate::upgrade::UpgraderChain;
use crate::value::{self, AttrMap};

/// Attribute holding the import encoding of the identifier.
pub const ID_ATTRIBUTE: &str = "id";

/// Attribute holding the quoted fully-qualified name.
pub const FQN_ATTRIBUTE: &str = "fully_qualified_name";

/// One resource kind.
///
/// Implementations are registered once at startup and shared between
/// concurrent calls; they hold no per-call state.
pub trait Resource: Send + Sync {
    /// Kind name, e.g. `snowflake_database`.
    fn type_name(&self) -> &'static str;

    /// Attribute descriptors and constraints.
    fn schema(&self) -> &ResourceSchema;

    /// SQL words for statements about this kind.
    fn object_type(&self) -> &ObjectType;

    /// The identifier scope of objects of this kind.
    fn scope(&self) -> IdentifierScope;

    /// State upgrade steps.
    fn upgraders(&self) -> &UpgraderChain;

    /// Whether the kind must be opted into.
    fn preview(&self) -> bool {
        false
    }

    /// Whether recreation can keep grants with `COPY GRANTS`.
    fn supports_copy_grants(&self) -> bool {
        false
    }

    /// The level at which this kind's own parameters are reported.
    fn parameter_level(&self) -> ParameterLevel {
        ParameterLevel::Object
    }

    /// Whether the remote supports `DESCRIBE` for this kind.
    fn describe_supported(&self) -> bool {
        self.schema().reads_describe()
    }

    /// Derive the identifier from `name`, `database` and `schema`.
    ///
    /// Returns `Ok(None)` while any part is still unknown.
    fn identifier(&self, attrs: &AttrMap) -> Result<Option<Identifier>, ProviderError> {
        let name = match identity_part(attrs, "name")? {
            Some(name) => name,
            None => return Ok(None),
        };
        let id = match self.scope() {
            IdentifierScope::Account => Identifier::account(name),
            IdentifierScope::Database => match identity_part(attrs, "database")? {
                Some(database) => Identifier::database_object(database, name),
                None => return Ok(None),
            },
            IdentifierScope::Schema | IdentifierScope::SchemaWithArguments => {
                match (identity_part(attrs, "database")?, identity_part(attrs, "schema")?) {
                    (Some(database), Some(schema)) => {
                        Identifier::schema_object(database, schema, name)
                    },
                    _ => return Ok(None),
                }
            },
        };
        Ok(Some(id))
    }

    /// Kind-specific checks beyond the descriptor constraints.
    fn validate(&self, _config: &AttrMap) -> Vec<Diagnostic> {
        Vec::new()
    }

    /// Body rendered after `AS` on create.
    fn create_trailer(&self, _attrs: &AttrMap) -> Option<String> {
        None
    }

    /// Minimal state for an imported object; the next read fills the rest.
    fn import_stub(&self, id: &Identifier) -> AttrMap {
        let mut attrs = AttrMap::new();
        attrs.insert("name".to_string(), Value::String(id.name_segment().canonical()));
        if let Some(database) = id.database() {
            attrs.insert("database".to_string(), Value::String(database.canonical()));
        }
        if let Some(schema) = id.schema() {
            attrs.insert("schema".to_string(), Value::String(schema.canonical()));
        }
        set_identity(&mut attrs, id);
        attrs
    }
}

/// Write the derived identity attributes.
pub fn set_identity(attrs: &mut AttrMap, id: &Identifier) {
    attrs.insert(ID_ATTRIBUTE.to_string(), Value::String(id.import_id()));
    attrs.insert(FQN_ATTRIBUTE.to_string(), Value::String(id.fully_qualified_name()));
}

fn identity_part<'a>(attrs: &'a AttrMap, name: &str) -> Result<Option<&'a str>, ProviderError> {
    match value::get(attrs, name) {
        None => Ok(None),
        Some(v) if value::is_unknown(v) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Err(ProviderError::Validation(format!(
            "attribute '{}' must not be empty",
            name
        ))),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ProviderError::Validation(format!(
            "attribute '{}' must be a string",
            name
        ))),
    }
}
