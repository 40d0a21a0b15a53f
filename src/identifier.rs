//! Typed identifiers for account-, database-, schema- and
//! schema-object-scoped Snowflake objects.
//!
//! Identifiers accept three textual forms:
//!
//! - a bare name (`my_pool`), valid only where the scope has one segment
//! - a dotted fully-qualified name with optional quoting
//!   (`db."My Schema".view`), optionally followed by an argument list
//!   for functions and procedures (`db.s.f(VARCHAR, NUMBER(38, 0))`)
//! - the import encoding, segments joined by `|` (`db|My Schema|view`)
//!
//! Unquoted segments in dotted form are case-folded to upper case on
//! canonicalisation, quoted segments keep their case, and segments of the
//! import encoding are always taken verbatim. Equality and hashing use the
//! canonical form.
//!
//! ```
//! use snowflake_provider::identifier::{Identifier, IdentifierScope};
//!
//! let id = Identifier::parse(r#"analytics."Raw".events"#, IdentifierScope::Schema).unwrap();
//! assert_eq!(id.fully_qualified_name(), r#""ANALYTICS"."Raw"."EVENTS""#);
//! assert_eq!(id.import_id(), "ANALYTICS|Raw|EVENTS");
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};

use thiserror::Error;

/// Delimiter between segments of an import identifier.
pub const IMPORT_DELIMITER: char = '|';

/// Errors produced while parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// The input is malformed.
    #[error("invalid identifier at position {position}: {reason}")]
    Parse {
        /// Byte offset of the offending character.
        position: usize,
        /// What was wrong.
        reason: String,
    },

    /// The input has a different number of segments than the scope needs.
    #[error(
        "expected {expected} identifier ({} segment(s)), got {found} segment(s)",
        .expected.segment_count()
    )]
    ScopeMismatch {
        /// The scope the caller asked for.
        expected: IdentifierScope,
        /// How many segments were found.
        found: usize,
    },
}

impl IdentifierError {
    fn parse(position: usize, reason: impl Into<String>) -> Self {
        Self::Parse {
            position,
            reason: reason.into(),
        }
    }
}

/// The scope an identifier lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierScope {
    /// Account-level objects: databases, users, integrations, compute pools.
    Account,
    /// Objects inside a database: schemas, database roles.
    Database,
    /// Objects inside a schema: tables, views, streamlits.
    Schema,
    /// Overloadable objects inside a schema: functions and procedures.
    SchemaWithArguments,
}

impl IdentifierScope {
    /// Number of name segments an identifier of this scope carries.
    pub fn segment_count(&self) -> usize {
        match self {
            Self::Account => 1,
            Self::Database => 2,
            Self::Schema | Self::SchemaWithArguments => 3,
        }
    }
}

impl fmt::Display for IdentifierScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Account => "account object",
            Self::Database => "database object",
            Self::Schema => "schema object",
            Self::SchemaWithArguments => "schema object with arguments",
        };
        f.write_str(name)
    }
}

/// One name segment of an identifier.
#[derive(Debug, Clone)]
pub struct Segment {
    raw: String,
    quoted: bool,
}

impl Segment {
    /// A case-preserving segment.
    pub fn quoted(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            quoted: true,
        }
    }

    /// A segment that folds to upper case.
    pub fn unquoted(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            quoted: false,
        }
    }

    /// The segment as written.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether the segment was quoted.
    pub fn is_quoted(&self) -> bool {
        self.quoted
    }

    /// The canonical form used for comparison.
    pub fn canonical(&self) -> String {
        if self.quoted {
            self.raw.clone()
        } else {
            self.raw.to_uppercase()
        }
    }

    /// The segment double-quoted, with inner quotes doubled.
    pub fn quoted_form(&self) -> String {
        format!("\"{}\"", self.canonical().replace('"', "\"\""))
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for Segment {}

impl Hash for Segment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

/// A scoped name that designates exactly one remote object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// `name`
    AccountObject {
        /// Object name.
        name: Segment,
    },
    /// `database.name`
    DatabaseObject {
        /// Parent database.
        database: Segment,
        /// Object name.
        name: Segment,
    },
    /// `database.schema.name`
    SchemaObject {
        /// Parent database.
        database: Segment,
        /// Parent schema.
        schema: Segment,
        /// Object name.
        name: Segment,
    },
    /// `database.schema.name(arg types)`
    SchemaObjectWithArguments {
        /// Parent database.
        database: Segment,
        /// Parent schema.
        schema: Segment,
        /// Object name.
        name: Segment,
        /// Canonical argument data types.
        arguments: Vec<String>,
    },
}

impl Identifier {
    /// An account object with an exact (case-preserving) name.
    pub fn account(name: &str) -> Self {
        Self::AccountObject {
            name: Segment::quoted(name),
        }
    }

    /// A database object with exact names.
    pub fn database_object(database: &str, name: &str) -> Self {
        Self::DatabaseObject {
            database: Segment::quoted(database),
            name: Segment::quoted(name),
        }
    }

    /// A schema object with exact names.
    pub fn schema_object(database: &str, schema: &str, name: &str) -> Self {
        Self::SchemaObject {
            database: Segment::quoted(database),
            schema: Segment::quoted(schema),
            name: Segment::quoted(name),
        }
    }

    /// A schema object with arguments, with exact names.
    pub fn schema_object_with_arguments(
        database: &str,
        schema: &str,
        name: &str,
        arguments: &[&str],
    ) -> Self {
        Self::SchemaObjectWithArguments {
            database: Segment::quoted(database),
            schema: Segment::quoted(schema),
            name: Segment::quoted(name),
            arguments: arguments.iter().map(|a| canonical_data_type(a)).collect(),
        }
    }

    /// Parse any accepted textual form for the given scope.
    pub fn parse(raw: &str, scope: IdentifierScope) -> Result<Self, IdentifierError> {
        let input = raw.trim();
        if input.is_empty() {
            return Err(IdentifierError::parse(0, "identifier is empty"));
        }
        if has_unquoted(input, IMPORT_DELIMITER) {
            return Self::parse_import(input, scope);
        }
        let (segments, arguments) = split_segments(input, '.', false)?;
        Self::from_parts(scope, segments, arguments)
    }

    /// Parse the `|`-delimited import encoding.
    pub fn parse_import(raw: &str, scope: IdentifierScope) -> Result<Self, IdentifierError> {
        let input = raw.trim();
        if input.is_empty() {
            return Err(IdentifierError::parse(0, "identifier is empty"));
        }
        let (segments, arguments) = split_segments(input, IMPORT_DELIMITER, true)?;
        Self::from_parts(scope, segments, arguments)
    }

    fn from_parts(
        scope: IdentifierScope,
        segments: Vec<Segment>,
        arguments: Option<Vec<String>>,
    ) -> Result<Self, IdentifierError> {
        if segments.len() != scope.segment_count() {
            return Err(IdentifierError::ScopeMismatch {
                expected: scope,
                found: segments.len(),
            });
        }
        let mut parts = segments.into_iter();
        let mut next = || parts.next().unwrap_or_else(|| Segment::quoted(""));
        match (scope, arguments) {
            (IdentifierScope::Account, None) => Ok(Self::AccountObject { name: next() }),
            (IdentifierScope::Database, None) => Ok(Self::DatabaseObject {
                database: next(),
                name: next(),
            }),
            (IdentifierScope::Schema, None) => Ok(Self::SchemaObject {
                database: next(),
                schema: next(),
                name: next(),
            }),
            (IdentifierScope::SchemaWithArguments, Some(arguments)) => {
                Ok(Self::SchemaObjectWithArguments {
                    database: next(),
                    schema: next(),
                    name: next(),
                    arguments,
                })
            },
            (IdentifierScope::SchemaWithArguments, None) => Err(IdentifierError::parse(
                0,
                "expected an argument list such as name(VARCHAR)",
            )),
            (_, Some(_)) => Err(IdentifierError::parse(
                0,
                format!("argument list is not allowed for a {}", scope),
            )),
        }
    }

    /// The scope of this identifier.
    pub fn scope(&self) -> IdentifierScope {
        match self {
            Self::AccountObject { .. } => IdentifierScope::Account,
            Self::DatabaseObject { .. } => IdentifierScope::Database,
            Self::SchemaObject { .. } => IdentifierScope::Schema,
            Self::SchemaObjectWithArguments { .. } => IdentifierScope::SchemaWithArguments,
        }
    }

    /// The bare, case-preserving object name.
    pub fn name(&self) -> &str {
        self.name_segment().raw()
    }

    /// The object name segment.
    pub fn name_segment(&self) -> &Segment {
        match self {
            Self::AccountObject { name }
            | Self::DatabaseObject { name, .. }
            | Self::SchemaObject { name, .. }
            | Self::SchemaObjectWithArguments { name, .. } => name,
        }
    }

    /// The parent database, if any.
    pub fn database(&self) -> Option<&Segment> {
        match self {
            Self::AccountObject { .. } => None,
            Self::DatabaseObject { database, .. }
            | Self::SchemaObject { database, .. }
            | Self::SchemaObjectWithArguments { database, .. } => Some(database),
        }
    }

    /// The parent schema, if any.
    pub fn schema(&self) -> Option<&Segment> {
        match self {
            Self::SchemaObject { schema, .. } | Self::SchemaObjectWithArguments { schema, .. } => {
                Some(schema)
            },
            _ => None,
        }
    }

    /// Argument types for overloadable objects.
    pub fn arguments(&self) -> &[String] {
        match self {
            Self::SchemaObjectWithArguments { arguments, .. } => arguments,
            _ => &[],
        }
    }

    /// The name segments, outermost first.
    pub fn segments(&self) -> Vec<&Segment> {
        match self {
            Self::AccountObject { name } => vec![name],
            Self::DatabaseObject { database, name } => vec![database, name],
            Self::SchemaObject {
                database,
                schema,
                name,
            }
            | Self::SchemaObjectWithArguments {
                database,
                schema,
                name,
                ..
            } => vec![database, schema, name],
        }
    }

    /// Fully-qualified name with every segment double-quoted.
    pub fn fully_qualified_name(&self) -> String {
        let mut out = self
            .segments()
            .iter()
            .map(|s| s.quoted_form())
            .collect::<Vec<_>>()
            .join(".");
        if let Self::SchemaObjectWithArguments { arguments, .. } = self {
            out.push('(');
            out.push_str(&arguments.join(", "));
            out.push(')');
        }
        out
    }

    /// The import encoding of this identifier.
    pub fn import_id(&self) -> String {
        let canonical: Vec<String> = self.segments().iter().map(|s| s.canonical()).collect();
        let mut out = encode_import_id(&canonical);
        if let Self::SchemaObjectWithArguments { arguments, .. } = self {
            out.push('(');
            out.push_str(&arguments.join(", "));
            out.push(')');
        }
        out
    }

    /// The fully-qualified name of the parent database or schema.
    pub fn container_fully_qualified_name(&self) -> Option<String> {
        match (self.database(), self.schema()) {
            (Some(db), Some(schema)) => {
                Some(format!("{}.{}", db.quoted_form(), schema.quoted_form()))
            },
            (Some(db), None) => Some(db.quoted_form()),
            _ => None,
        }
    }

    /// The same identifier with a different object name.
    pub fn with_name(&self, name: &str) -> Self {
        let name = Segment::quoted(name);
        match self.clone() {
            Self::AccountObject { .. } => Self::AccountObject { name },
            Self::DatabaseObject { database, .. } => Self::DatabaseObject { database, name },
            Self::SchemaObject {
                database, schema, ..
            } => Self::SchemaObject {
                database,
                schema,
                name,
            },
            Self::SchemaObjectWithArguments {
                database,
                schema,
                arguments,
                ..
            } => Self::SchemaObjectWithArguments {
                database,
                schema,
                name,
                arguments,
            },
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fully_qualified_name())
    }
}

/// Join segments with the import delimiter, quoting where needed.
pub fn encode_import_id<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(|s| {
            let s = s.as_ref();
            if needs_quoting(s) {
                format!("\"{}\"", s.replace('"', "\"\""))
            } else {
                s.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(&IMPORT_DELIMITER.to_string())
}

/// Canonical text of a dotted identifier, if it parses.
///
/// Used by semantic equality where the scope is not known up front.
pub fn canonical_text(raw: &str) -> Option<String> {
    let input = raw.trim();
    if input.is_empty() {
        return None;
    }
    let (segments, arguments) = if has_unquoted(input, IMPORT_DELIMITER) {
        split_segments(input, IMPORT_DELIMITER, true).ok()?
    } else {
        split_segments(input, '.', false).ok()?
    };
    let mut out = segments
        .iter()
        .map(|s| s.canonical())
        .collect::<Vec<_>>()
        .join(".");
    if let Some(arguments) = arguments {
        out.push('(');
        out.push_str(&arguments.join(", "));
        out.push(')');
    }
    Some(out)
}

fn needs_quoting(segment: &str) -> bool {
    segment.is_empty()
        || segment.chars().any(|c| {
            c == IMPORT_DELIMITER
                || c == '.'
                || c == '"'
                || c == '('
                || c == ')'
                || c.is_whitespace()
        })
}

fn has_unquoted(input: &str, needle: char) -> bool {
    let mut in_quotes = false;
    for c in input.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == needle && !in_quotes {
            return true;
        }
    }
    false
}

/// Split `input` into segments on `delimiter`, honoring double quotes and an
/// optional trailing argument list.
fn split_segments(
    input: &str,
    delimiter: char,
    verbatim: bool,
) -> Result<(Vec<Segment>, Option<Vec<String>>), IdentifierError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut segments = Vec::new();
    let mut i = 0;

    loop {
        let start = chars.get(i).map(|(p, _)| *p).unwrap_or(input.len());
        let segment = match chars.get(i) {
            Some((_, '"')) => {
                let mut raw = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some((_, '"')) if matches!(chars.get(i + 1), Some((_, '"'))) => {
                            raw.push('"');
                            i += 2;
                        },
                        Some((_, '"')) => {
                            i += 1;
                            break;
                        },
                        Some((_, c)) => {
                            raw.push(*c);
                            i += 1;
                        },
                        None => {
                            return Err(IdentifierError::parse(start, "unterminated quoted segment"))
                        },
                    }
                }
                Segment::quoted(raw)
            },
            _ => {
                let mut raw = String::new();
                while let Some((pos, c)) = chars.get(i) {
                    if *c == delimiter || *c == '(' {
                        break;
                    }
                    if *c == '"' {
                        return Err(IdentifierError::parse(
                            *pos,
                            "unexpected quote inside unquoted segment",
                        ));
                    }
                    if c.is_whitespace() {
                        return Err(IdentifierError::parse(
                            *pos,
                            "whitespace must be enclosed in double quotes",
                        ));
                    }
                    raw.push(*c);
                    i += 1;
                }
                if raw.is_empty() {
                    return Err(IdentifierError::parse(start, "empty segment"));
                }
                if verbatim {
                    Segment::quoted(raw)
                } else {
                    Segment::unquoted(raw)
                }
            },
        };
        segments.push(segment);

        match chars.get(i) {
            None => return Ok((segments, None)),
            Some((_, c)) if *c == delimiter => {
                i += 1;
                if i >= chars.len() {
                    return Err(IdentifierError::parse(input.len(), "trailing delimiter"));
                }
            },
            Some((pos, '(')) => {
                let arguments = parse_arguments(input, *pos)?;
                return Ok((segments, Some(arguments)));
            },
            Some((pos, c)) => {
                return Err(IdentifierError::parse(
                    *pos,
                    format!("unexpected character '{}'", c),
                ))
            },
        }
    }
}

/// Parse `(T1, T2)` starting at `open`, which must close at end of input.
fn parse_arguments(input: &str, open: usize) -> Result<Vec<String>, IdentifierError> {
    let mut depth = 0usize;
    let mut close = None;
    for (pos, c) in input[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(open + pos);
                    break;
                }
            },
            _ => {},
        }
    }
    let close = close.ok_or_else(|| IdentifierError::parse(open, "unterminated argument list"))?;
    if close + 1 != input.len() {
        return Err(IdentifierError::parse(
            close + 1,
            "unexpected input after argument list",
        ));
    }

    let body = &input[open + 1..close];
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut arguments = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for (pos, c) in body.char_indices() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            },
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            },
            ',' if depth == 0 => {
                if current.trim().is_empty() {
                    return Err(IdentifierError::parse(open + 1 + pos, "empty argument type"));
                }
                arguments.push(canonical_data_type(&current));
                current.clear();
            },
            _ => current.push(c),
        }
    }
    if current.trim().is_empty() {
        return Err(IdentifierError::parse(close, "empty argument type"));
    }
    arguments.push(canonical_data_type(&current));
    Ok(arguments)
}

/// Upper-case a data type and normalise its whitespace:
/// `number( 38 ,0 )` becomes `NUMBER(38,0)`.
fn canonical_data_type(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::with_capacity(collapsed.len());
    let chars: Vec<char> = collapsed.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if *c == ' ' {
            let prev = i.checked_sub(1).and_then(|p| chars.get(p));
            let next = chars.get(i + 1);
            let tight = |c: Option<&char>| matches!(c, Some('(' | ')' | ','));
            if tight(prev) || tight(next) {
                continue;
            }
        }
        out.push(*c);
    }
    out.to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_name() {
        let id = Identifier::parse("my_pool", IdentifierScope::Account).unwrap();
        assert_eq!(id.name(), "my_pool");
        assert_eq!(id.fully_qualified_name(), "\"MY_POOL\"");
        assert_eq!(id, Identifier::account("MY_POOL"));
    }

    #[test]
    fn test_quoted_segments_preserve_case() {
        let id = Identifier::parse("\"my_pool\"", IdentifierScope::Account).unwrap();
        assert_eq!(id.fully_qualified_name(), "\"my_pool\"");
        assert_ne!(id, Identifier::account("MY_POOL"));
    }

    #[test]
    fn test_parse_dotted_with_quotes() {
        let id = Identifier::parse(r#"db."My.Schema".v"#, IdentifierScope::Schema).unwrap();
        assert_eq!(id.database().unwrap().canonical(), "DB");
        assert_eq!(id.schema().unwrap().canonical(), "My.Schema");
        assert_eq!(id.name(), "v");
        assert_eq!(id.fully_qualified_name(), r#""DB"."My.Schema"."V""#);
    }

    #[test]
    fn test_escaped_quote_in_segment() {
        let id = Identifier::parse(r#""a""b""#, IdentifierScope::Account).unwrap();
        assert_eq!(id.name(), "a\"b");
        assert_eq!(id.fully_qualified_name(), r#""a""b""#);
    }

    #[test]
    fn test_parse_arguments() {
        let id = Identifier::parse(
            "db.s.add_one(number( 38, 0 ), varchar)",
            IdentifierScope::SchemaWithArguments,
        )
        .unwrap();
        assert_eq!(id.arguments(), &["NUMBER(38,0)".to_string(), "VARCHAR".to_string()]);
        assert_eq!(
            id.fully_qualified_name(),
            r#""DB"."S"."ADD_ONE"(NUMBER(38,0), VARCHAR)"#
        );

        let no_args = Identifier::parse("db.s.f()", IdentifierScope::SchemaWithArguments).unwrap();
        assert!(no_args.arguments().is_empty());
    }

    #[test]
    fn test_scope_mismatch() {
        let err = Identifier::parse("lonely", IdentifierScope::Schema).unwrap_err();
        assert_eq!(
            err,
            IdentifierError::ScopeMismatch {
                expected: IdentifierScope::Schema,
                found: 1
            }
        );

        let err = Identifier::parse("a.b.c", IdentifierScope::Account).unwrap_err();
        assert!(matches!(err, IdentifierError::ScopeMismatch { found: 3, .. }));
    }

    #[test]
    fn test_parse_errors_carry_position() {
        let err = Identifier::parse("db.\"open", IdentifierScope::Database).unwrap_err();
        assert_eq!(
            err,
            IdentifierError::Parse {
                position: 3,
                reason: "unterminated quoted segment".to_string()
            }
        );

        let err = Identifier::parse("db..x", IdentifierScope::Schema).unwrap_err();
        assert!(matches!(err, IdentifierError::Parse { position: 3, .. }));

        let err = Identifier::parse("my pool", IdentifierScope::Account).unwrap_err();
        assert!(matches!(err, IdentifierError::Parse { position: 2, .. }));

        let err =
            Identifier::parse("db.s.f(int", IdentifierScope::SchemaWithArguments).unwrap_err();
        assert!(matches!(err, IdentifierError::Parse { position: 6, .. }));
    }

    #[test]
    fn test_import_encoding_round_trip() {
        let id = Identifier::schema_object("DB", "my schema", "a|b");
        let encoded = id.import_id();
        assert_eq!(encoded, r#"DB|"my schema"|"a|b""#);
        assert_eq!(
            Identifier::parse_import(&encoded, IdentifierScope::Schema).unwrap(),
            id
        );
        // `parse` detects the import form on its own
        assert_eq!(Identifier::parse(&encoded, IdentifierScope::Schema).unwrap(), id);
    }

    #[test]
    fn test_import_segments_are_verbatim() {
        let id = Identifier::parse("db|lower", IdentifierScope::Database).unwrap();
        assert_eq!(id, Identifier::database_object("db", "lower"));
        assert_ne!(id, Identifier::database_object("DB", "LOWER"));
    }

    #[test]
    fn test_encode_escapes_quotes() {
        assert_eq!(encode_import_id(&["say \"hi\"", "x"]), r#""say ""hi"""|x"#);
        assert_eq!(encode_import_id(&["", "x"]), r#"""|x"#);
    }

    #[test]
    fn test_fully_qualified_round_trip_all_scopes() {
        let ids = vec![
            Identifier::account("Pool \"A\""),
            Identifier::database_object("db", "SCHEMA.1"),
            Identifier::schema_object("DB", "S", "v"),
            Identifier::schema_object_with_arguments("DB", "S", "f", &["varchar", "number(38, 0)"]),
        ];
        for id in ids {
            let fqn = id.fully_qualified_name();
            assert_eq!(Identifier::parse(&fqn, id.scope()).unwrap(), id, "{}", fqn);
            let import = id.import_id();
            assert_eq!(
                Identifier::parse_import(&import, id.scope()).unwrap(),
                id,
                "{}",
                import
            );
        }
    }

    #[test]
    fn test_canonical_text() {
        assert_eq!(canonical_text("public"), Some("PUBLIC".to_string()));
        assert_eq!(canonical_text("\"Mixed\".x"), Some("Mixed.X".to_string()));
        assert_eq!(canonical_text("db|Mixed"), Some("db.Mixed".to_string()));
        assert_eq!(canonical_text("bad name"), None);
    }

    #[test]
    fn test_with_name_keeps_parents() {
        let id = Identifier::schema_object("DB", "S", "OLD");
        let renamed = id.with_name("NEW");
        assert_eq!(renamed, Identifier::schema_object("DB", "S", "NEW"));
        assert_eq!(
            renamed.container_fully_qualified_name(),
            Some("\"DB\".\"S\"".to_string())
        );
    }
}
