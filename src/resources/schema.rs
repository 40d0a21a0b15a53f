use crate::identifier::IdentifierScope;
use crate::normalizer::ParameterLevel;
use crate::resource::Resource;
use crate::schema::{AttributeDescriptor, ResourceSchema};
use crate::sql::ObjectType;
use crate::upgrade::UpgraderChain;

use super::{database_attribute, name_attribute, with_identity};

const OBJECT: ObjectType = ObjectType::new("SCHEMA", "SCHEMAS");

/// `snowflake_schema`
pub struct Schema {
    schema: ResourceSchema,
    upgraders: UpgraderChain,
}

impl Schema {
    /// Create the kind.
    pub fn new() -> Self {
        let schema = ResourceSchema::v0()
            .with_description("A schema within a database.")
            .with_attribute(name_attribute())
            .with_attribute(database_attribute())
            .with_attribute(
                AttributeDescriptor::optional_bool("with_managed_access")
                    .toggle("MANAGED ACCESS")
                    .from_show("is_managed_access"),
            )
            .with_attribute(
                AttributeDescriptor::optional_bool("is_transient")
                    .force_new()
                    .flag("TRANSIENT")
                    .from_show("is_transient"),
            )
            .with_attribute(AttributeDescriptor::optional_string("comment").from_show("comment"))
            .with_attribute(AttributeDescriptor::parameter_int(
                "data_retention_time_in_days",
                "DATA_RETENTION_TIME_IN_DAYS",
                -1,
            ))
            .with_attribute(AttributeDescriptor::computed_string("owner").from_show("owner"));

        Self {
            schema: with_identity(schema),
            upgraders: UpgraderChain::new(),
        }
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

impl Resource for Schema {
    fn type_name(&self) -> &'static str {
        "snowflake_schema"
    }

    fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    fn object_type(&self) -> &ObjectType {
        &OBJECT
    }

    fn scope(&self) -> IdentifierScope {
        IdentifierScope::Database
    }

    fn upgraders(&self) -> &UpgraderChain {
        &self.upgraders
    }

    fn parameter_level(&self) -> ParameterLevel {
        ParameterLevel::Schema
    }
}
