use crate::identifier::IdentifierScope;
use crate::resource::{Resource, ID_ATTRIBUTE};
use crate::schema::{AttributeDescriptor, MutationClass, ResourceSchema, SemanticType};
use crate::sql::ObjectType;
use crate::upgrade::{list_to_set, reshape_identifier, UpgraderChain};

use super::{name_attribute, with_identity};

const OBJECT: ObjectType = ObjectType::new("USER", "USERS");

/// `snowflake_user`
pub struct User {
    schema: ResourceSchema,
    upgraders: UpgraderChain,
}

impl User {
    /// Create the kind.
    pub fn new() -> Self {
        let schema = ResourceSchema::new(1)
            .with_description("A user.")
            .with_attribute(name_attribute())
            .with_attribute(AttributeDescriptor::optional_string("login_name").case_insensitive())
            .with_attribute(AttributeDescriptor::optional_string("display_name"))
            .with_attribute(AttributeDescriptor::optional_string("comment"))
            .with_attribute(
                AttributeDescriptor::new(
                    "password",
                    SemanticType::SensitiveString,
                    MutationClass::InPlace,
                )
                .standalone()
                    .with_description("Never read back; changes are detected against state only."),
            )
            .with_attribute(AttributeDescriptor::optional_bool("disabled"))
            .with_attribute(AttributeDescriptor::optional_string("default_role").case_insensitive())
            .with_attribute(AttributeDescriptor::optional_string_set("default_secondary_roles"))
            .with_attribute(
                AttributeDescriptor::optional_int("mins_to_unlock")
                    .sentinel_int(-1)
                    .with_description("Minutes until a locked user unlocks; -1 leaves it unset."),
            )
            .with_attribute(AttributeDescriptor::optional_int("days_to_expiry").sentinel_int(-1))
            .with_attribute(AttributeDescriptor::parameter_string("timezone", "TIMEZONE"))
            .with_attribute(AttributeDescriptor::parameter_int(
                "statement_timeout_in_seconds",
                "STATEMENT_TIMEOUT_IN_SECONDS",
                -1,
            ))
            .with_attribute(AttributeDescriptor::computed_string("owner"));

        // v0 kept default_secondary_roles as an ordered list.
        let upgraders = UpgraderChain::new().with_fn(0, |state| {
            let state = list_to_set(state, "default_secondary_roles");
            reshape_identifier(state, 0, ID_ATTRIBUTE, IdentifierScope::Account)
        });

        Self {
            schema: with_identity(schema),
            upgraders,
        }
    }
}

impl Default for User {
    fn default() -> Self {
        Self::new()
    }
}

impl Resource for User {
    fn type_name(&self) -> &'static str {
        "snowflake_user"
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
}
