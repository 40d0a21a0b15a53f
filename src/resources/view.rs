use serde_json::Value;

use crate::identifier::IdentifierScope;
use crate::resource::Resource;
use crate::schema::{AttributeDescriptor, Diagnostic, Equality, ResourceSchema};
use crate::sql::ObjectType;
use crate::upgrade::UpgraderChain;
use crate::value::{self, AttrMap};

use super::{database_attribute, name_attribute, schema_attribute, with_identity};

const OBJECT: ObjectType = ObjectType::new("VIEW", "VIEWS");

/// `snowflake_view`
pub struct View {
    schema: ResourceSchema,
    upgraders: UpgraderChain,
}

impl View {
    /// Create the kind.
    pub fn new() -> Self {
        let statement = AttributeDescriptor::required_string("statement")
            .force_new()
            .unrendered()
            .with_equality(Equality::SqlText)
            .from_show("text")
            .with_description("The query the view selects from.");

        let schema = ResourceSchema::v0()
            .with_description("A view.")
            .with_attribute(name_attribute())
            .with_attribute(database_attribute())
            .with_attribute(schema_attribute())
            .with_attribute(
                AttributeDescriptor::optional_bool("is_secure")
                    .flag("SECURE")
                    .from_show("is_secure"),
            )
            .with_attribute(AttributeDescriptor::optional_string("comment").from_show("comment"))
            .with_attribute(statement)
            .with_attribute(AttributeDescriptor::computed_string("owner").from_show("owner"));

        Self {
            schema: with_identity(schema),
            upgraders: UpgraderChain::new(),
        }
    }
}

impl Default for View {
    fn default() -> Self {
        Self::new()
    }
}

impl Resource for View {
    fn type_name(&self) -> &'static str {
        "snowflake_view"
    }

    fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    fn object_type(&self) -> &ObjectType {
        &OBJECT
    }

    fn scope(&self) -> IdentifierScope {
        IdentifierScope::Schema
    }

    fn upgraders(&self) -> &UpgraderChain {
        &self.upgraders
    }

    fn supports_copy_grants(&self) -> bool {
        true
    }

    fn validate(&self, config: &AttrMap) -> Vec<Diagnostic> {
        match value::get(config, "statement") {
            Some(Value::String(s)) if s.trim().is_empty() => vec![Diagnostic::error(
                "Empty view statement",
            )
            .with_attribute("statement")],
            _ => Vec::new(),
        }
    }

    fn create_trailer(&self, attrs: &AttrMap) -> Option<String> {
        match value::get(attrs, "statement") {
            Some(Value::String(s)) => Some(s.trim().trim_end_matches(';').to_string()),
            _ => None,
        }
    }
}
