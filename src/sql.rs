//! Structured statement requests and the default SQL renderer.
//!
//! The reconciler never concatenates SQL. It hands a [`StatementBuilder`]
//! structured create/alter/drop/show requests and receives a
//! [`Statement`] carrying both the executable text and a redacted form
//! safe for logs and diagnostics.
//!
//! [`SnowflakeSqlBuilder`] guarantees:
//!
//! - identifiers are always rendered fully qualified and double-quoted
//! - sensitive property values only appear in [`Statement::sql`]
//! - clauses are rendered in request order, so equal requests give equal text

use std::fmt;

use crate::identifier::Identifier;
use crate::value::REDACTED;

/// A rendered statement.
#[derive(Clone, PartialEq, Eq)]
pub struct Statement {
    sql: String,
    redacted: String,
}

impl Statement {
    /// A statement with nothing to redact.
    pub fn new(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self {
            redacted: sql.clone(),
            sql,
        }
    }

    /// Replace the redacted form.
    pub fn with_redacted(mut self, redacted: impl Into<String>) -> Self {
        self.redacted = redacted.into();
        self
    }

    /// The executable text. Never log this.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The text with sensitive values replaced.
    pub fn redacted(&self) -> &str {
        &self.redacted
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted)
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Statement").field(&self.redacted).finish()
    }
}

/// SQL words naming an object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectType {
    /// Singular keyword, e.g. `COMPUTE POOL`.
    pub keyword: &'static str,
    /// Plural keyword used by SHOW, e.g. `COMPUTE POOLS`.
    pub plural: &'static str,
    /// Clauses always rendered on create, e.g. `TYPE = EXTERNAL_OAUTH`.
    pub create_clauses: &'static [&'static str],
}

impl ObjectType {
    /// An object type with no fixed create clauses.
    pub const fn new(keyword: &'static str, plural: &'static str) -> Self {
        Self {
            keyword,
            plural,
            create_clauses: &[],
        }
    }

    /// Add fixed create clauses.
    pub const fn with_create_clauses(mut self, clauses: &'static [&'static str]) -> Self {
        self.create_clauses = clauses;
        self
    }
}

/// A typed value in a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// A string literal.
    Text(String),
    /// An object name.
    Identifier(String),
    /// An integer.
    Number(i64),
    /// A boolean.
    Bool(bool),
    /// A parenthesised list.
    List(Vec<SqlValue>),
}

impl SqlValue {
    fn render(&self) -> String {
        match self {
            Self::Text(s) => quote_literal(s),
            Self::Identifier(s) => render_identifier(s),
            Self::Number(n) => n.to_string(),
            Self::Bool(true) => "TRUE".to_string(),
            Self::Bool(false) => "FALSE".to_string(),
            Self::List(items) => format!(
                "({})",
                items
                    .iter()
                    .map(SqlValue::render)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

/// A `KEY = value` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    /// Statement keyword.
    pub key: String,
    /// Value.
    pub value: SqlValue,
    /// Redact the value in the logged form.
    pub sensitive: bool,
}

impl Property {
    /// A non-sensitive property.
    pub fn new(key: impl Into<String>, value: SqlValue) -> Self {
        Self {
            key: key.into(),
            value,
            sensitive: false,
        }
    }

    /// Mark the value as sensitive.
    pub fn sensitive(mut self, sensitive: bool) -> Self {
        self.sensitive = sensitive;
        self
    }
}

/// A create request.
#[derive(Debug, Clone)]
pub struct CreateRequest<'a> {
    /// Object type.
    pub object: &'a ObjectType,
    /// Target identifier.
    pub id: &'a Identifier,
    /// Render `CREATE OR REPLACE`.
    pub or_replace: bool,
    /// Keywords between `CREATE` and the object type, e.g. `SECURE`.
    pub modifiers: Vec<String>,
    /// Clauses rendered right after the name, e.g. `WITH MANAGED ACCESS`.
    pub clauses: Vec<String>,
    /// Properties.
    pub properties: Vec<Property>,
    /// Render `COPY GRANTS`.
    pub copy_grants: bool,
    /// Body rendered after `AS`.
    pub trailer: Option<String>,
}

impl<'a> CreateRequest<'a> {
    /// A plain create request.
    pub fn new(object: &'a ObjectType, id: &'a Identifier) -> Self {
        Self {
            object,
            id,
            or_replace: false,
            modifiers: Vec::new(),
            clauses: Vec::new(),
            properties: Vec::new(),
            copy_grants: false,
            trailer: None,
        }
    }
}

/// One alter action.
#[derive(Debug, Clone, PartialEq)]
pub enum AlterAction {
    /// `SET K = v ...`
    Set(Vec<Property>),
    /// `UNSET K, ...`
    Unset(Vec<String>),
    /// `SET FLAG`
    SetFlag(String),
    /// `UNSET FLAG`
    UnsetFlag(String),
    /// `ENABLE FEATURE`
    Enable(String),
    /// `DISABLE FEATURE`
    Disable(String),
    /// `RENAME TO new`
    RenameTo(Identifier),
}

/// Renders structured requests into statements.
pub trait StatementBuilder: Send + Sync {
    /// `CREATE ...`
    fn create(&self, request: &CreateRequest<'_>) -> Statement;

    /// `ALTER ...`
    fn alter(&self, object: &ObjectType, id: &Identifier, action: &AlterAction) -> Statement;

    /// `DROP ...`
    fn drop_object(&self, object: &ObjectType, id: &Identifier) -> Statement;

    /// `SHOW <plural> LIKE '<name>' [IN <container>]`
    fn show(&self, object: &ObjectType, id: &Identifier) -> Statement;

    /// `DESCRIBE ...`
    fn describe(&self, object: &ObjectType, id: &Identifier) -> Statement;

    /// `SHOW PARAMETERS IN ...`
    fn show_parameters(&self, object: &ObjectType, id: &Identifier) -> Statement;
}

/// The default renderer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnowflakeSqlBuilder;

impl SnowflakeSqlBuilder {
    fn render_properties(properties: &[Property], separator: &str) -> (String, String) {
        let mut sql = Vec::with_capacity(properties.len());
        let mut redacted = Vec::with_capacity(properties.len());
        for p in properties {
            let value = p.value.render();
            sql.push(format!("{} = {}", p.key, value));
            if p.sensitive {
                redacted.push(format!("{} = {}", p.key, quote_literal(REDACTED)));
            } else {
                redacted.push(format!("{} = {}", p.key, value));
            }
        }
        (sql.join(separator), redacted.join(separator))
    }
}

impl StatementBuilder for SnowflakeSqlBuilder {
    fn create(&self, request: &CreateRequest<'_>) -> Statement {
        let mut head = String::from("CREATE");
        if request.or_replace {
            head.push_str(" OR REPLACE");
        }
        for modifier in &request.modifiers {
            head.push(' ');
            head.push_str(modifier);
        }
        head.push(' ');
        head.push_str(request.object.keyword);
        head.push(' ');
        head.push_str(&request.id.fully_qualified_name());
        for clause in request
            .object
            .create_clauses
            .iter()
            .copied()
            .chain(request.clauses.iter().map(String::as_str))
        {
            head.push(' ');
            head.push_str(clause);
        }

        let (props, redacted_props) = Self::render_properties(&request.properties, " ");
        let mut tail = String::new();
        if request.copy_grants {
            tail.push_str(" COPY GRANTS");
        }
        if let Some(trailer) = &request.trailer {
            tail.push_str(" AS ");
            tail.push_str(trailer);
        }

        let join = |props: &str| {
            if props.is_empty() {
                format!("{}{}", head, tail)
            } else {
                format!("{} {}{}", head, props, tail)
            }
        };
        Statement::new(join(&props)).with_redacted(join(&redacted_props))
    }

    fn alter(&self, object: &ObjectType, id: &Identifier, action: &AlterAction) -> Statement {
        let head = format!("ALTER {} {}", object.keyword, id.fully_qualified_name());
        match action {
            AlterAction::Set(properties) => {
                let (sql, redacted) = Self::render_properties(properties, " ");
                Statement::new(format!("{} SET {}", head, sql))
                    .with_redacted(format!("{} SET {}", head, redacted))
            },
            AlterAction::Unset(keys) => {
                Statement::new(format!("{} UNSET {}", head, keys.join(", ")))
            },
            AlterAction::SetFlag(flag) => Statement::new(format!("{} SET {}", head, flag)),
            AlterAction::UnsetFlag(flag) => Statement::new(format!("{} UNSET {}", head, flag)),
            AlterAction::Enable(feature) => Statement::new(format!("{} ENABLE {}", head, feature)),
            AlterAction::Disable(feature) => {
                Statement::new(format!("{} DISABLE {}", head, feature))
            },
            AlterAction::RenameTo(new_id) => Statement::new(format!(
                "{} RENAME TO {}",
                head,
                new_id.fully_qualified_name()
            )),
        }
    }

    fn drop_object(&self, object: &ObjectType, id: &Identifier) -> Statement {
        Statement::new(format!(
            "DROP {} {}",
            object.keyword,
            id.fully_qualified_name()
        ))
    }

    fn show(&self, object: &ObjectType, id: &Identifier) -> Statement {
        let mut sql = format!("SHOW {} LIKE {}", object.plural, quote_literal(id.name()));
        match (id.database(), id.schema()) {
            (Some(db), Some(schema)) => {
                sql.push_str(&format!(" IN SCHEMA {}.{}", db.quoted_form(), schema.quoted_form()))
            },
            (Some(db), None) => sql.push_str(&format!(" IN DATABASE {}", db.quoted_form())),
            _ => {},
        }
        Statement::new(sql)
    }

    fn describe(&self, object: &ObjectType, id: &Identifier) -> Statement {
        Statement::new(format!(
            "DESCRIBE {} {}",
            object.keyword,
            id.fully_qualified_name()
        ))
    }

    fn show_parameters(&self, object: &ObjectType, id: &Identifier) -> Statement {
        Statement::new(format!(
            "SHOW PARAMETERS IN {} {}",
            object.keyword,
            id.fully_qualified_name()
        ))
    }
}

/// Single-quote a string literal, doubling quotes and escaping backslashes.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
}

fn render_identifier(s: &str) -> String {
    let simple = |part: &str| {
        part.chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false)
            && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    };
    let quoted = |part: &str| part.len() >= 2 && part.starts_with('"') && part.ends_with('"');
    if s.split('.').all(|part| simple(part) || quoted(part)) {
        s.to_string()
    } else {
        format!("\"{}\"", s.replace('"', "\"\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEW: ObjectType = ObjectType::new("VIEW", "VIEWS");
    const INTEGRATION: ObjectType = ObjectType::new("SECURITY INTEGRATION", "SECURITY INTEGRATIONS")
        .with_create_clauses(&["TYPE = EXTERNAL_OAUTH"]);

    #[test]
    fn test_create_with_modifiers_and_trailer() {
        let id = Identifier::schema_object("DB", "S", "v");
        let mut request = CreateRequest::new(&VIEW, &id);
        request.or_replace = true;
        request.modifiers.push("SECURE".into());
        request
            .properties
            .push(Property::new("COMMENT", SqlValue::Text("it's".into())));
        request.copy_grants = true;
        request.trailer = Some("select 1".into());

        let statement = SnowflakeSqlBuilder.create(&request);
        assert_eq!(
            statement.sql(),
            concat!(
                r#"CREATE OR REPLACE SECURE VIEW "DB"."S"."v" "#,
                r#"COMMENT = 'it''s' COPY GRANTS AS select 1"#,
            )
        );
        assert_eq!(statement.sql(), statement.redacted());
    }

    #[test]
    fn test_create_redacts_sensitive_values() {
        let id = Identifier::account("OKTA");
        let mut request = CreateRequest::new(&INTEGRATION, &id);
        request
            .properties
            .push(Property::new("ENABLED", SqlValue::Bool(true)));
        request.properties.push(
            Property::new("EXTERNAL_OAUTH_RSA_PUBLIC_KEY", SqlValue::Text("MIIB".into()))
                .sensitive(true),
        );

        let statement = SnowflakeSqlBuilder.create(&request);
        assert!(statement.sql().contains("'MIIB'"));
        assert!(!statement.redacted().contains("MIIB"));
        assert!(!format!("{}", statement).contains("MIIB"));
        assert!(!format!("{:?}", statement).contains("MIIB"));
        assert_eq!(
            statement.redacted(),
            concat!(
                r#"CREATE SECURITY INTEGRATION "OKTA" TYPE = EXTERNAL_OAUTH ENABLED = TRUE "#,
                r#"EXTERNAL_OAUTH_RSA_PUBLIC_KEY = '(sensitive value)'"#,
            )
        );
    }

    #[test]
    fn test_alter_actions() {
        let id = Identifier::account("U");
        let object = ObjectType::new("USER", "USERS");
        let b = SnowflakeSqlBuilder;

        let set = b.alter(
            &object,
            &id,
            &AlterAction::Set(vec![
                Property::new("MINS_TO_UNLOCK", SqlValue::Number(9)),
                Property::new(
                    "DEFAULT_SECONDARY_ROLES",
                    SqlValue::List(vec![SqlValue::Text("ALL".into())]),
                ),
            ]),
        );
        assert_eq!(
            set.sql(),
            r#"ALTER USER "U" SET MINS_TO_UNLOCK = 9 DEFAULT_SECONDARY_ROLES = ('ALL')"#
        );

        let unset = b.alter(
            &object,
            &id,
            &AlterAction::Unset(vec!["COMMENT".into(), "DAYS_TO_EXPIRY".into()]),
        );
        assert_eq!(unset.sql(), r#"ALTER USER "U" UNSET COMMENT, DAYS_TO_EXPIRY"#);

        let rename = b.alter(&object, &id, &AlterAction::RenameTo(Identifier::account("V")));
        assert_eq!(rename.sql(), r#"ALTER USER "U" RENAME TO "V""#);

        let enable = b.alter(
            &ObjectType::new("SCHEMA", "SCHEMAS"),
            &Identifier::database_object("DB", "S"),
            &AlterAction::Enable("MANAGED ACCESS".into()),
        );
        assert_eq!(enable.sql(), r#"ALTER SCHEMA "DB"."S" ENABLE MANAGED ACCESS"#);
    }

    #[test]
    fn test_show_scopes_to_container() {
        let b = SnowflakeSqlBuilder;
        assert_eq!(
            b.show(&VIEW, &Identifier::schema_object("DB", "S", "o'v")).sql(),
            r#"SHOW VIEWS LIKE 'o''v' IN SCHEMA "DB"."S""#
        );
        assert_eq!(
            b.show(
                &ObjectType::new("SCHEMA", "SCHEMAS"),
                &Identifier::database_object("DB", "S")
            )
            .sql(),
            r#"SHOW SCHEMAS LIKE 'S' IN DATABASE "DB""#
        );
        assert_eq!(
            b.show(&ObjectType::new("DATABASE", "DATABASES"), &Identifier::account("DB"))
                .sql(),
            "SHOW DATABASES LIKE 'DB'"
        );
    }

    #[test]
    fn test_identifier_values() {
        assert_eq!(SqlValue::Identifier("EAI_1".into()).render(), "EAI_1");
        assert_eq!(SqlValue::Identifier("my eai".into()).render(), "\"my eai\"");
        assert_eq!(SqlValue::Identifier("\"Quoted\"".into()).render(), "\"Quoted\"");
        assert_eq!(SqlValue::Identifier("DB.\"s\".STAGE".into()).render(), "DB.\"s\".STAGE");
    }
}
