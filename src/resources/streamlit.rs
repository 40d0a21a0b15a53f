use serde_json::Value;

use crate::identifier::IdentifierScope;
use crate::resource::{Resource, ID_ATTRIBUTE};
use crate::schema::{AttributeDescriptor, Equality, ResourceSchema};
use crate::sql::ObjectType;
use crate::upgrade::{reshape_identifier, UpgraderChain};
use crate::value::AttrMap;

use super::{database_attribute, name_attribute, schema_attribute, with_identity};

const OBJECT: ObjectType = ObjectType::new("STREAMLIT", "STREAMLITS");

/// `snowflake_streamlit`
pub struct Streamlit {
    schema: ResourceSchema,
    upgraders: UpgraderChain,
}

impl Streamlit {
    /// Create the kind.
    pub fn new() -> Self {
        let schema = ResourceSchema::new(1)
            .with_description("A Streamlit application.")
            .with_attribute(name_attribute())
            .with_attribute(database_attribute())
            .with_attribute(schema_attribute())
            .with_attribute(
                AttributeDescriptor::required_string("stage")
                    .with_equality(Equality::Identifier)
                    .from_describe("STAGE")
                    .with_description("Fully qualified name of the stage holding the app files."),
            )
            .with_attribute(
                AttributeDescriptor::optional_string("directory_location")
                    .from_describe("DIRECTORY_LOCATION"),
            )
            .with_attribute(
                AttributeDescriptor::required_string("main_file").from_show("main_file"),
            )
            .with_attribute(
                AttributeDescriptor::optional_string("query_warehouse")
                    .with_equality(Equality::Identifier)
                    .from_show("query_warehouse"),
            )
            .with_attribute(
                AttributeDescriptor::optional_string_set("external_access_integrations")
                    .force_new()
                    .with_equality(Equality::Identifier)
                    .from_describe("EXTERNAL_ACCESS_INTEGRATIONS"),
            )
            .with_attribute(AttributeDescriptor::optional_string("title").from_show("title"))
            .with_attribute(AttributeDescriptor::optional_string("comment").from_show("comment"))
            .with_attribute(AttributeDescriptor::computed_string("owner").from_show("owner"));

        let upgraders = UpgraderChain::new().with_fn(0, |state| {
            let state = split_root_location(state);
            reshape_identifier(state, 0, ID_ATTRIBUTE, IdentifierScope::Schema)
        });

        Self {
            schema: with_identity(schema),
            upgraders,
        }
    }
}

/// `root_location = "@db.sch.stage/dir"` becomes `stage = "db.sch.stage"`
/// and `directory_location = "dir"`.
fn split_root_location(mut state: AttrMap) -> AttrMap {
    let Some(Value::String(root)) = state.remove("root_location") else {
        return state;
    };
    let root = root.trim_start_matches('@');
    let (stage, directory) = match root.split_once('/') {
        Some((stage, directory)) => (stage, Some(directory.trim_matches('/'))),
        None => (root, None),
    };
    state
        .entry("stage".to_string())
        .or_insert_with(|| Value::String(stage.to_string()));
    if let Some(directory) = directory.filter(|d| !d.is_empty()) {
        state
            .entry("directory_location".to_string())
            .or_insert_with(|| Value::String(directory.to_string()));
    }
    state
}

impl Default for Streamlit {
    fn default() -> Self {
        Self::new()
    }
}

impl Resource for Streamlit {
    fn type_name(&self) -> &'static str {
        "snowflake_streamlit"
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

    fn preview(&self) -> bool {
        true
    }
}
