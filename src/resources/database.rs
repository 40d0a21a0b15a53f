use crate::identifier::IdentifierScope;
use crate::normalizer::ParameterLevel;
use crate::resource::{Resource, ID_ATTRIBUTE};
use crate::schema::{AttributeDescriptor, ResourceSchema};
use crate::sql::ObjectType;
use crate::upgrade::{reshape_identifier, UpgraderChain};

use super::{name_attribute, with_identity};

const OBJECT: ObjectType = ObjectType::new("DATABASE", "DATABASES");

/// `snowflake_database`
pub struct Database {
    schema: ResourceSchema,
    upgraders: UpgraderChain,
}

impl Database {
    /// Create the kind.
    pub fn new() -> Self {
        let schema = ResourceSchema::new(1)
            .with_description("A database.")
            .with_attribute(name_attribute())
            .with_attribute(
                AttributeDescriptor::optional_bool("is_transient")
                    .force_new()
                    .flag("TRANSIENT")
                    .from_show("is_transient")
                    .with_description("Transient databases have no fail-safe period."),
            )
            .with_attribute(AttributeDescriptor::optional_string("comment").from_show("comment"))
            .with_attribute(
                AttributeDescriptor::parameter_int(
                    "data_retention_time_in_days",
                    "DATA_RETENTION_TIME_IN_DAYS",
                    -1,
                )
                .with_description("Time Travel retention; -1 inherits the account setting."),
            )
            .with_attribute(AttributeDescriptor::parameter_int(
                "max_data_extension_time_in_days",
                "MAX_DATA_EXTENSION_TIME_IN_DAYS",
                -1,
            ))
            .with_attribute(AttributeDescriptor::computed_string("owner").from_show("owner"));

        // v0 stored the bare name as the id.
        let upgraders = UpgraderChain::new().with_fn(0, |state| {
            reshape_identifier(state, 0, ID_ATTRIBUTE, IdentifierScope::Account)
        });

        Self {
            schema: with_identity(schema),
            upgraders,
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Resource for Database {
    fn type_name(&self) -> &'static str {
        "snowflake_database"
    }

    fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    fn object_type(&self) -> &ObjectType {
        &OBJECT
    }

    fn scope(&self) -> IdentifierScope {
        IdentifierScope::Account
    }

    fn upgraders(&self) -> &UpgraderChain {
        &self.upgraders
    }

    fn parameter_level(&self) -> ParameterLevel {
        ParameterLevel::Database
    }
}
