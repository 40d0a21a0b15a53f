use serde_json::json;

use crate::identifier::IdentifierScope;
use crate::resource::Resource;
use crate::schema::{AttributeDescriptor, ResourceSchema};
use crate::sql::ObjectType;
use crate::upgrade::UpgraderChain;

use super::with_identity;

const OBJECT: ObjectType = ObjectType::new("COMPUTE POOL", "COMPUTE POOLS");

const INSTANCE_FAMILIES: &[&str] = &[
    "CPU_X64_XS",
    "CPU_X64_S",
    "CPU_X64_M",
    "CPU_X64_L",
    "HIGHMEM_X64_S",
    "HIGHMEM_X64_M",
    "HIGHMEM_X64_L",
    "GPU_NV_S",
    "GPU_NV_M",
    "GPU_NV_L",
];

/// `snowflake_compute_pool`
pub struct ComputePool {
    schema: ResourceSchema,
    upgraders: UpgraderChain,
}

impl ComputePool {
    /// Create the kind.
    pub fn new() -> Self {
        let schema = ResourceSchema::v0()
            .with_description("A compute pool for Snowpark Container Services.")
            .with_attribute(
                AttributeDescriptor::required_string("name")
                    .force_new()
                    .identity()
                    .from_show("name"),
            )
            .with_attribute(
                AttributeDescriptor::optional_enum("instance_family", INSTANCE_FAMILIES)
                    .force_new()
                    .from_show("instance_family"),
            )
            .with_attribute(
                AttributeDescriptor::optional_int("min_instances")
                    .with_default(json!(1))
                    .sql("MIN_NODES")
                    .from_show("min_nodes"),
            )
            .with_attribute(
                AttributeDescriptor::optional_int("max_instances")
                    .with_default(json!(1))
                    .sql("MAX_NODES")
                    .from_show("max_nodes"),
            )
            .with_attribute(AttributeDescriptor::optional_bool("auto_resume"))
            .with_attribute(AttributeDescriptor::optional_int("auto_suspend_secs"))
            .with_attribute(AttributeDescriptor::optional_string("comment"))
            .with_attribute(AttributeDescriptor::computed_string("owner"))
            .with_attribute(AttributeDescriptor::computed_string("state"));

        Self {
            schema: with_identity(schema),
            upgraders: UpgraderChain::new(),
        }
    }
}

impl Default for ComputePool {
    fn default() -> Self {
        Self::new()
    }
}

impl Resource for ComputePool {
    fn type_name(&self) -> &'static str {
        "snowflake_compute_pool"
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

    fn preview(&self) -> bool {
        true
    }
}
