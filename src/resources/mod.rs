//! Built-in resource kinds.

mod compute_pool;
mod database;
mod external_oauth_integration;
mod schema;
mod streamlit;
mod user;
mod view;

use std::sync::Arc;

use crate::resource::{Resource, FQN_ATTRIBUTE, ID_ATTRIBUTE};
use crate::schema::{AttributeDescriptor, ResourceSchema};

pub use compute_pool::ComputePool;
pub use database::Database;
pub use external_oauth_integration::ExternalOauthIntegration;
pub use schema::Schema;
pub use streamlit::Streamlit;
pub use user::User;
pub use view::View;

/// Every built-in kind, in registration order.
pub fn builtin() -> Vec<Arc<dyn Resource>> {
    vec![
        Arc::new(Database::new()),
        Arc::new(Schema::new()),
        Arc::new(User::new()),
        Arc::new(ComputePool::new()),
        Arc::new(ExternalOauthIntegration::new()),
        Arc::new(Streamlit::new()),
        Arc::new(View::new()),
    ]
}

/// The object name; renamed in place.
pub(crate) fn name_attribute() -> AttributeDescriptor {
    AttributeDescriptor::required_string("name")
        .rename()
        .from_show("name")
        .with_description("Object name. Changing it renames the object.")
}

/// The parent database; part of the identifier.
pub(crate) fn database_attribute() -> AttributeDescriptor {
    AttributeDescriptor::required_string("database")
        .force_new()
        .identity()
        .from_show("database_name")
        .with_description("The database in which to create the object.")
}

/// The parent schema; part of the identifier.
pub(crate) fn schema_attribute() -> AttributeDescriptor {
    AttributeDescriptor::required_string("schema")
        .force_new()
        .identity()
        .from_show("schema_name")
        .with_description("The schema in which to create the object.")
}

/// Append the derived identity attributes every kind carries.
pub(crate) fn with_identity(schema: ResourceSchema) -> ResourceSchema {
    schema
        .with_attribute(
            AttributeDescriptor::computed_string(ID_ATTRIBUTE)
                .derived()
                .with_description("Import identifier."),
        )
        .with_attribute(
            AttributeDescriptor::computed_string(FQN_ATTRIBUTE)
                .derived()
                .with_description("Fully qualified name of the object."),
        )
}
