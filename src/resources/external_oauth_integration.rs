use crate::identifier::IdentifierScope;
use crate::resource::{Resource, ID_ATTRIBUTE};
use crate::schema::{
    AttributeDescriptor, Diagnostic, Equality, MutationClass, RemoteSource, ResourceSchema,
    SemanticType,
};
use crate::sql::ObjectType;
use crate::upgrade::{rename_attribute, require_attribute, reshape_identifier, UpgraderChain};
use crate::value::{self, AttrMap};

const OBJECT: ObjectType = ObjectType::new("SECURITY INTEGRATION", "SECURITY INTEGRATIONS")
    .with_create_clauses(&["TYPE = EXTERNAL_OAUTH"]);

const OAUTH_TYPES: &[&str] = &["OKTA", "AZURE", "PING_FEDERATE", "CUSTOM"];
const USER_MAPPING_ATTRIBUTES: &[&str] = &["LOGIN_NAME", "EMAIL_ADDRESS"];
const ANY_ROLE_MODES: &[&str] = &["DISABLE", "ENABLE", "ENABLE_FOR_PRIVILEGE"];

/// Attribute names before the `external_oauth_` prefix was introduced.
const V0_RENAMES: &[(&str, &str)] = &[
    ("type", "external_oauth_type"),
    ("issuer", "external_oauth_issuer"),
    ("token_user_mapping_claims", "external_oauth_token_user_mapping_claim"),
    (
        "snowflake_user_mapping_attribute",
        "external_oauth_snowflake_user_mapping_attribute",
    ),
    ("jws_keys_urls", "external_oauth_jws_keys_url"),
    ("rsa_public_key", "external_oauth_rsa_public_key"),
    ("allowed_roles", "external_oauth_allowed_roles_list"),
    ("blocked_roles", "external_oauth_blocked_roles_list"),
    ("audience_urls", "external_oauth_audience_list"),
    ("any_role_mode", "external_oauth_any_role_mode"),
];

/// `snowflake_external_oauth_integration`
pub struct ExternalOauthIntegration {
    schema: ResourceSchema,
    upgraders: UpgraderChain,
}

fn described(desc: AttributeDescriptor) -> AttributeDescriptor {
    let key = desc.sql_key();
    desc.from_describe(&key)
}

impl ExternalOauthIntegration {
    /// Create the kind.
    pub fn new() -> Self {
        let string_set = || SemanticType::set(SemanticType::String);
        let schema = ResourceSchema::new(1)
            .with_description("A security integration for External OAuth.")
            .with_attribute(super::name_attribute())
            .with_attribute(
                AttributeDescriptor::optional_bool("enabled")
                    .required()
                    .from_show("enabled"),
            )
            .with_attribute(described(
                AttributeDescriptor::optional_enum("external_oauth_type", OAUTH_TYPES)
                    .required()
                    .force_new(),
            ))
            .with_attribute(described(
                AttributeDescriptor::optional_string("external_oauth_issuer").required(),
            ))
            .with_attribute(described(
                AttributeDescriptor::new(
                    "external_oauth_token_user_mapping_claim",
                    string_set(),
                    MutationClass::InPlace,
                )
                .required(),
            ))
            .with_attribute(described(
                AttributeDescriptor::optional_enum(
                    "external_oauth_snowflake_user_mapping_attribute",
                    USER_MAPPING_ATTRIBUTES,
                )
                .required(),
            ))
            .with_attribute(described(
                AttributeDescriptor::optional_string_set("external_oauth_jws_keys_url"),
            ))
            .with_attribute(
                AttributeDescriptor::new(
                    "external_oauth_rsa_public_key",
                    SemanticType::SensitiveString,
                    MutationClass::InPlace,
                )
                .write_only(),
            )
            .with_attribute(described(
                AttributeDescriptor::optional_string_set("external_oauth_allowed_roles_list")
                    .with_equality(Equality::Identifier),
            ))
            .with_attribute(described(
                AttributeDescriptor::optional_string_set("external_oauth_blocked_roles_list")
                    .with_equality(Equality::Identifier),
            ))
            .with_attribute(described(AttributeDescriptor::optional_string_set(
                "external_oauth_audience_list",
            )))
            .with_attribute(described(AttributeDescriptor::optional_enum(
                "external_oauth_any_role_mode",
                ANY_ROLE_MODES,
            )))
            .with_attribute(
                AttributeDescriptor::optional_string("comment")
                    .from_show("comment")
                    .from_describe("COMMENT")
                    .authoritative(RemoteSource::Show),
            )
            .with_conflicting(&[
                "external_oauth_allowed_roles_list",
                "external_oauth_blocked_roles_list",
            ])
            .with_conflicting(&["external_oauth_jws_keys_url", "external_oauth_rsa_public_key"]);

        let upgraders = UpgraderChain::new().with_fn(0, |state| {
            let state = V0_RENAMES
                .iter()
                .fold(state, |state, (from, to)| rename_attribute(state, from, to));
            require_attribute(&state, 0, "external_oauth_type")?;
            reshape_identifier(state, 0, ID_ATTRIBUTE, IdentifierScope::Account)
        });

        Self {
            schema: super::with_identity(schema),
            upgraders,
        }
    }
}

impl Default for ExternalOauthIntegration {
    fn default() -> Self {
        Self::new()
    }
}

impl Resource for ExternalOauthIntegration {
    fn type_name(&self) -> &'static str {
        "snowflake_external_oauth_integration"
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

    fn validate(&self, config: &AttrMap) -> Vec<Diagnostic> {
        let has = |name: &str| !value::is_unset(value::get(config, name));
        let mut diags = Vec::new();
        if !has("external_oauth_jws_keys_url") && !has("external_oauth_rsa_public_key") {
            diags.push(
                Diagnostic::error("Missing signing key")
                    .with_detail(
                        "One of external_oauth_jws_keys_url or \
                         external_oauth_rsa_public_key must be set.",
                    )
                    .with_attribute("external_oauth_jws_keys_url"),
            );
        }
        diags
    }
}
