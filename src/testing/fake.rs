//! An in-memory stand-in for a Snowflake account.
//!
//! [`FakeSnowflake`] understands the statements rendered by
//! [`SnowflakeSqlBuilder`](crate::sql::SnowflakeSqlBuilder): it keeps
//! objects, fills in server-side defaults, resolves parameters through
//! the database and schema they live in, and answers `SHOW`, `DESCRIBE`
//! and `SHOW PARAMETERS` with rows shaped like the real ones.
//!
//! Tests can inject failures, make the fake silently drop a property,
//! slow every statement down, and change objects behind the engine's back.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::context::CallContext;
use crate::driver::{row_stream, DriverError, DriverFactory, Row, RowStream, SqlDriver};
use crate::sql::Statement;

const OWNER: &str = "ACCOUNTADMIN";
const CREATED_ON: &str = "2024-01-01 00:00:00.000 -0800";

/// Parameters every object reports, with their system defaults.
const PARAMETER_DEFAULTS: &[(&str, &str)] = &[
    ("DATA_RETENTION_TIME_IN_DAYS", "1"),
    ("MAX_DATA_EXTENSION_TIME_IN_DAYS", "14"),
    ("STATEMENT_TIMEOUT_IN_SECONDS", "172800"),
    ("TIMEZONE", "America/Los_Angeles"),
];

/// Properties that are accepted but never reported back.
const HIDDEN: &[&str] = &["PASSWORD", "EXTERNAL_OAUTH_RSA_PUBLIC_KEY"];

/// What the fake knows about one object type.
#[derive(Debug)]
struct KindSpec {
    keyword: &'static str,
    plural: &'static str,
    /// Name segments: 1 for account objects, 3 for schema objects.
    depth: usize,
    /// Keywords reported as `is_<flag>` columns.
    flags: &'static [&'static str],
    /// Properties filled in when create omits them.
    defaults: &'static [(&'static str, &'static str)],
    /// Extra SHOW columns.
    columns: &'static [(&'static str, &'static str)],
    /// Level reported for parameters set on the object itself.
    level: &'static str,
}

const KINDS: &[KindSpec] = &[
    KindSpec {
        keyword: "DATABASE",
        plural: "DATABASES",
        depth: 1,
        flags: &["TRANSIENT"],
        defaults: &[],
        columns: &[("kind", "STANDARD")],
        level: "DATABASE",
    },
    KindSpec {
        keyword: "SCHEMA",
        plural: "SCHEMAS",
        depth: 2,
        flags: &["TRANSIENT", "MANAGED ACCESS"],
        defaults: &[],
        columns: &[],
        level: "SCHEMA",
    },
    KindSpec {
        keyword: "USER",
        plural: "USERS",
        depth: 1,
        flags: &[],
        defaults: &[("DISABLED", "false")],
        columns: &[],
        level: "USER",
    },
    KindSpec {
        keyword: "COMPUTE POOL",
        plural: "COMPUTE POOLS",
        depth: 1,
        flags: &[],
        defaults: &[
            ("INSTANCE_FAMILY", "CPU_X64_XS"),
            ("MIN_NODES", "1"),
            ("MAX_NODES", "1"),
            ("AUTO_RESUME", "true"),
            ("AUTO_SUSPEND_SECS", "3600"),
        ],
        columns: &[("state", "IDLE")],
        level: "COMPUTE POOL",
    },
    KindSpec {
        keyword: "SECURITY INTEGRATION",
        plural: "SECURITY INTEGRATIONS",
        depth: 1,
        flags: &[],
        defaults: &[("EXTERNAL_OAUTH_ANY_ROLE_MODE", "DISABLE")],
        columns: &[("category", "SECURITY")],
        level: "INTEGRATION",
    },
    KindSpec {
        keyword: "STREAMLIT",
        plural: "STREAMLITS",
        depth: 3,
        flags: &[],
        defaults: &[],
        columns: &[],
        level: "STREAMLIT",
    },
    KindSpec {
        keyword: "VIEW",
        plural: "VIEWS",
        depth: 3,
        flags: &["SECURE"],
        defaults: &[],
        columns: &[],
        level: "VIEW",
    },
];

fn kind_spec(keyword: &str) -> Option<&'static KindSpec> {
    KINDS.iter().find(|k| k.keyword.eq_ignore_ascii_case(keyword))
}

/// A stored property value.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FakeValue {
    Scalar(String),
    List(Vec<String>),
}

impl FakeValue {
    fn render(&self) -> String {
        match self {
            Self::Scalar(s) => s.clone(),
            Self::List(items) => format!("[{}]", items.join(", ")),
        }
    }
}

#[derive(Debug, Clone)]
struct FakeObject {
    spec: &'static KindSpec,
    path: Vec<String>,
    flags: BTreeSet<String>,
    properties: BTreeMap<String, FakeValue>,
    parameters: BTreeMap<String, String>,
    text: Option<String>,
}

impl FakeObject {
    fn new(spec: &'static KindSpec, path: Vec<String>) -> Self {
        Self {
            spec,
            path,
            flags: BTreeSet::new(),
            properties: BTreeMap::new(),
            parameters: BTreeMap::new(),
            text: None,
        }
    }

    fn name(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    fn visible_properties(&self) -> impl Iterator<Item = (&String, &FakeValue)> {
        self.properties
            .iter()
            .filter(|(key, _)| !HIDDEN.contains(&key.as_str()))
    }
}

type ObjectKey = (&'static str, Vec<String>);

struct Failure {
    pattern: String,
    error: DriverError,
    remaining: u32,
}

#[derive(Default)]
struct Account {
    objects: BTreeMap<ObjectKey, FakeObject>,
    account_parameters: BTreeMap<String, String>,
    ignored: BTreeSet<String>,
    failures: Vec<Failure>,
    statements: Vec<String>,
    queries: Vec<String>,
    latency: Option<Duration>,
}

/// An in-memory Snowflake account.
///
/// Clones share the same account.
#[derive(Clone, Default)]
pub struct FakeSnowflake {
    account: Arc<Mutex<Account>>,
    connections: Arc<AtomicUsize>,
}

impl std::fmt::Debug for FakeSnowflake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let account = self.lock();
        f.debug_struct("FakeSnowflake")
            .field("objects", &account.objects.len())
            .field("statements", &account.statements.len())
            .finish()
    }
}

impl FakeSnowflake {
    /// An empty account.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Account> {
        self.account.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Statements sent through `exec`, including failed attempts.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    /// Statements sent through `query` and `query_multi`.
    pub fn queries(&self) -> Vec<String> {
        self.lock().queries.clone()
    }

    /// Forget the statement and query logs.
    pub fn clear_statements(&self) {
        let mut account = self.lock();
        account.statements.clear();
        account.queries.clear();
    }

    /// Fail the next `count` statements containing `pattern`.
    pub fn fail_next(&self, pattern: &str, error: DriverError, count: u32) {
        self.lock().failures.push(Failure {
            pattern: pattern.to_string(),
            error,
            remaining: count,
        });
    }

    /// Accept `key` in statements but never store it.
    pub fn ignore_property(&self, key: &str) {
        self.lock().ignored.insert(key.to_uppercase());
    }

    /// Delay every statement by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// Set a parameter on the account.
    pub fn set_account_parameter(&self, key: &str, value: &str) {
        self.lock()
            .account_parameters
            .insert(key.to_uppercase(), value.to_string());
    }

    /// Create a database and a schema in it, if missing.
    pub fn create_container(&self, database: &str, schema: &str) {
        let mut account = self.lock();
        for (keyword, path) in [
            ("DATABASE", vec![database.to_string()]),
            ("SCHEMA", vec![database.to_string(), schema.to_string()]),
        ] {
            if let Some(spec) = kind_spec(keyword) {
                account
                    .objects
                    .entry((spec.keyword, path.clone()))
                    .or_insert_with(|| FakeObject::new(spec, path));
            }
        }
    }

    /// Run a statement as another session would: nothing is logged and
    /// no failure is injected.
    pub fn out_of_band(&self, sql: &str) -> Result<(), DriverError> {
        self.lock().execute(sql).map(|_| ())
    }

    /// Whether an object exists; `fqn` is the quoted fully-qualified name.
    pub fn has_object(&self, keyword: &str, fqn: &str) -> bool {
        self.find(keyword, fqn).is_some()
    }

    /// The stored value of a property, as SHOW would report it.
    pub fn property(&self, keyword: &str, fqn: &str, key: &str) -> Option<String> {
        self.find(keyword, fqn)
            .and_then(|object| object.properties.get(&key.to_uppercase()).map(FakeValue::render))
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Number of times a driver was handed out by the factory.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn find(&self, keyword: &str, fqn: &str) -> Option<FakeObject> {
        let spec = kind_spec(keyword)?;
        let mut parser = Parser::new(fqn);
        let path = parser.path().ok()?;
        self.lock().objects.get(&(spec.keyword, path)).cloned()
    }

    async fn pause(&self) {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn run(&self, statement: &Statement, logged_as_exec: bool) -> Result<Vec<Row>, DriverError> {
        let mut account = self.lock();
        let sql = statement.sql();
        if logged_as_exec {
            account.statements.push(sql.to_string());
        } else {
            account.queries.push(sql.to_string());
        }
        account.inject(sql)?;
        account.execute(sql)
    }
}

#[async_trait::async_trait]
impl SqlDriver for FakeSnowflake {
    async fn exec(&self, _ctx: &CallContext, statement: &Statement) -> Result<u64, DriverError> {
        self.pause().await;
        self.run(statement, true).map(|rows| rows.len().max(1) as u64)
    }

    async fn query(
        &self,
        _ctx: &CallContext,
        statement: &Statement,
    ) -> Result<RowStream, DriverError> {
        self.pause().await;
        self.run(statement, false).map(row_stream)
    }

    async fn query_multi(
        &self,
        _ctx: &CallContext,
        statement: &Statement,
    ) -> Result<RowStream, DriverError> {
        self.pause().await;
        self.run(statement, false).map(row_stream)
    }
}

#[async_trait::async_trait]
impl DriverFactory for FakeSnowflake {
    async fn connect(&self, _profile: &str) -> Result<Arc<dyn SqlDriver>, DriverError> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }
}

fn syntax_error(sql: &str) -> DriverError {
    DriverError::Rejected(format!("SQL compilation error: syntax error in '{}'", sql))
}

fn render_path(path: &[String]) -> String {
    path.iter()
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

fn not_found(spec: &KindSpec, path: &[String]) -> DriverError {
    DriverError::NotFound(format!(
        "{} '{}' does not exist or not authorized",
        spec.keyword,
        render_path(path)
    ))
}

impl Account {
    fn inject(&mut self, sql: &str) -> Result<(), DriverError> {
        if let Some(failure) = self
            .failures
            .iter_mut()
            .find(|f| f.remaining > 0 && sql.contains(&f.pattern))
        {
            failure.remaining -= 1;
            return Err(failure.error.clone());
        }
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<Vec<Row>, DriverError> {
        let mut parser = Parser::new(sql);
        let verb = parser.word().map_err(|_| syntax_error(sql))?;
        let result = match verb.as_str() {
            "CREATE" => self.create(&mut parser).map(|_| Vec::new()),
            "ALTER" => self.alter(&mut parser).map(|_| Vec::new()),
            "DROP" => self.drop_object(&mut parser).map(|_| Vec::new()),
            "DESCRIBE" | "DESC" => self.describe(&mut parser),
            "SHOW" if parser.eat_word("PARAMETERS") => self.show_parameters(&mut parser),
            "SHOW" => self.show(&mut parser),
            _ => Err(Failed::Parse),
        };
        result.map_err(|e| e.or_syntax(sql))
    }

    fn get(&self, spec: &'static KindSpec, path: &[String]) -> Result<&FakeObject, Failed> {
        self.objects
            .get(&(spec.keyword, path.to_vec()))
            .ok_or_else(|| Failed::Driver(not_found(spec, path)))
    }

    fn require_container(&self, path: &[String]) -> Result<(), Failed> {
        let containers = [("DATABASE", 1), ("SCHEMA", 2)];
        for (keyword, depth) in containers {
            if path.len() > depth {
                let spec = kind_spec(keyword).ok_or(ParseError)?;
                self.get(spec, &path[..depth])?;
            }
        }
        Ok(())
    }

    fn assign(&self, object: &mut FakeObject, key: String, value: FakeValue) {
        if self.ignored.contains(&key) {
            return;
        }
        if PARAMETER_DEFAULTS.iter().any(|(k, _)| *k == key) {
            object.parameters.insert(key, value.render());
        } else {
            object.properties.insert(key, value);
        }
    }

    fn create(&mut self, parser: &mut Parser<'_>) -> Result<(), Failed> {
        let or_replace = parser.eat_word("OR");
        if or_replace {
            parser.expect_word("REPLACE")?;
        }
        let mut modifiers = BTreeSet::new();
        let spec = loop {
            if let Some(spec) = parser.object_kind(false) {
                break spec;
            }
            modifiers.insert(parser.word()?);
        };
        let path = parser.path()?;
        if path.len() != spec.depth {
            return Err(ParseError.into());
        }

        let mut object = FakeObject::new(spec, path.clone());
        object.flags = modifiers;
        while !parser.at_end() {
            if parser.eat_word("WITH") {
                object.flags.insert(parser.words_until_property()?);
            } else if parser.eat_word("COPY") {
                parser.expect_word("GRANTS")?;
            } else if parser.eat_word("AS") {
                // SHOW VIEWS reports the whole statement, not just the query.
                object.text = Some(parser.sql.trim().trim_end_matches(';').to_string());
                break;
            } else {
                let (key, value) = parser.property()?;
                self.assign(&mut object, key, value);
            }
        }
        for (key, value) in spec.defaults {
            object
                .properties
                .entry(key.to_string())
                .or_insert_with(|| FakeValue::Scalar(value.to_string()));
        }
        if spec.keyword == "USER" {
            let name = object.name().to_string();
            object
                .properties
                .entry("LOGIN_NAME".to_string())
                .or_insert_with(|| FakeValue::Scalar(name.to_uppercase()));
            object
                .properties
                .entry("DISPLAY_NAME".to_string())
                .or_insert_with(|| FakeValue::Scalar(name));
        }

        self.require_container(&path)?;
        let key = (spec.keyword, path);
        if self.objects.contains_key(&key) && !or_replace {
            return Err(Failed::Driver(DriverError::Rejected(format!(
                "Object '{}' already exists.",
                render_path(&key.1)
            ))));
        }
        self.objects.insert(key, object);
        Ok(())
    }

    fn alter(&mut self, parser: &mut Parser<'_>) -> Result<(), Failed> {
        let spec = parser.object_kind(false).ok_or(ParseError)?;
        let path = parser.path()?;
        let mut object = self.get(spec, &path)?.clone();

        if parser.eat_word("RENAME") {
            parser.expect_word("TO")?;
            let new_path = parser.path()?;
            if new_path.len() != spec.depth {
                return Err(ParseError.into());
            }
            return self.rename(spec, path, new_path);
        }

        if parser.eat_word("SET") {
            if parser.is_property_next() {
                while !parser.at_end() {
                    let (key, value) = parser.property()?;
                    self.assign(&mut object, key, value);
                }
            } else {
                object.flags.insert(parser.words_until_property()?);
            }
        } else if parser.eat_word("UNSET") {
            loop {
                let name = parser.words_until_comma()?;
                object.properties.remove(&name);
                object.parameters.remove(&name);
                object.flags.remove(&name);
                if !parser.eat_symbol(',') {
                    break;
                }
            }
        } else if parser.eat_word("ENABLE") {
            object.flags.insert(parser.words_until_property()?);
        } else if parser.eat_word("DISABLE") {
            object.flags.remove(&parser.words_until_property()?);
        } else {
            return Err(ParseError.into());
        }
        if !parser.at_end() {
            return Err(ParseError.into());
        }

        self.objects.insert((spec.keyword, path), object);
        Ok(())
    }

    fn rename(
        &mut self,
        spec: &'static KindSpec,
        from: Vec<String>,
        to: Vec<String>,
    ) -> Result<(), Failed> {
        if self.objects.contains_key(&(spec.keyword, to.clone())) {
            return Err(Failed::Driver(DriverError::Rejected(format!(
                "Object '{}' already exists.",
                render_path(&to)
            ))));
        }
        self.require_container(&to)?;
        let moved: Vec<ObjectKey> = self
            .objects
            .keys()
            .filter(|(keyword, path)| {
                (*keyword == spec.keyword && *path == from)
                    || (spec.depth < 3 && path.len() > from.len() && path.starts_with(&from))
            })
            .cloned()
            .collect();
        for key in moved {
            if let Some(mut object) = self.objects.remove(&key) {
                let mut path = to.clone();
                path.extend_from_slice(&object.path[from.len()..]);
                object.path = path.clone();
                self.objects.insert((key.0, path), object);
            }
        }
        Ok(())
    }

    fn drop_object(&mut self, parser: &mut Parser<'_>) -> Result<(), Failed> {
        let spec = parser.object_kind(false).ok_or(ParseError)?;
        let path = parser.path()?;
        self.get(spec, &path)?;
        self.objects.retain(|(keyword, p), _| {
            let same = *keyword == spec.keyword && *p == path;
            let contained = spec.depth < 3 && p.len() > path.len() && p.starts_with(&path);
            !(same || contained)
        });
        Ok(())
    }

    fn show(&mut self, parser: &mut Parser<'_>) -> Result<Vec<Row>, Failed> {
        let spec = parser.object_kind(true).ok_or(ParseError)?;
        let pattern = if parser.eat_word("LIKE") {
            Some(parser.literal()?)
        } else {
            None
        };
        let container = if parser.eat_word("IN") {
            if parser.eat_word("ACCOUNT") {
                Vec::new()
            } else {
                let keyword = parser.word()?;
                let container_spec = kind_spec(&keyword).ok_or(ParseError)?;
                let path = parser.path()?;
                self.get(container_spec, &path)?;
                path
            }
        } else {
            Vec::new()
        };

        Ok(self
            .objects
            .values()
            .filter(|o| o.spec.keyword == spec.keyword && o.path.starts_with(&container))
            .filter(|o| pattern.as_deref().map(|p| like(p, o.name())).unwrap_or(true))
            .map(show_row)
            .collect())
    }

    fn describe(&mut self, parser: &mut Parser<'_>) -> Result<Vec<Row>, Failed> {
        let spec = parser.object_kind(false).ok_or(ParseError)?;
        let path = parser.path()?;
        let object = self.get(spec, &path)?;
        Ok(object
            .visible_properties()
            .map(|(key, value)| {
                crate::driver::row([
                    ("property", key.clone()),
                    ("value", value.render()),
                    ("default", String::new()),
                ])
            })
            .collect())
    }

    fn show_parameters(&mut self, parser: &mut Parser<'_>) -> Result<Vec<Row>, Failed> {
        parser.expect_word("IN")?;
        let spec = parser.object_kind(false).ok_or(ParseError)?;
        let path = parser.path()?;
        let object = self.get(spec, &path)?;
        Ok(PARAMETER_DEFAULTS
            .iter()
            .map(|(key, default)| {
                let (value, level) = self
                    .resolve_parameter(object, key)
                    .unwrap_or_else(|| (default.to_string(), String::new()));
                crate::driver::row([
                    ("key", key.to_string()),
                    ("value", value),
                    ("default", default.to_string()),
                    ("level", level),
                ])
            })
            .collect())
    }

    /// The value of a parameter and the level it was set at, walking from
    /// the object up through its schema, its database and the account.
    fn resolve_parameter(&self, object: &FakeObject, key: &str) -> Option<(String, String)> {
        if let Some(value) = object.parameters.get(key) {
            return Some((value.clone(), object.spec.level.to_string()));
        }
        for depth in (1..object.path.len()).rev() {
            let keyword = if depth == 2 { "SCHEMA" } else { "DATABASE" };
            let parent = self
                .objects
                .get(&(keyword, object.path[..depth].to_vec()))
                .and_then(|parent| parent.parameters.get(key).map(|v| (v, parent.spec.level)));
            if let Some((value, level)) = parent {
                return Some((value.clone(), level.to_string()));
            }
        }
        self.account_parameters
            .get(key)
            .map(|value| (value.clone(), "ACCOUNT".to_string()))
    }
}

fn show_row(object: &FakeObject) -> Row {
    let mut row = Row::new();
    row.insert("created_on".to_string(), CREATED_ON.to_string());
    row.insert("name".to_string(), object.name().to_string());
    row.insert("owner".to_string(), OWNER.to_string());
    row.insert("comment".to_string(), String::new());
    if object.path.len() >= 2 {
        row.insert("database_name".to_string(), object.path[0].clone());
    }
    if object.path.len() >= 3 {
        row.insert("schema_name".to_string(), object.path[1].clone());
    }
    for flag in object.spec.flags {
        row.insert(
            format!("is_{}", flag.to_lowercase().replace(' ', "_")),
            object.flags.contains(*flag).to_string(),
        );
    }
    for (column, value) in object.spec.columns {
        row.insert(column.to_string(), value.to_string());
    }
    for (key, value) in object.visible_properties() {
        row.insert(key.to_lowercase(), value.render());
    }
    if let Some(text) = &object.text {
        row.insert("text".to_string(), text.clone());
    }
    row
}

/// Case-insensitive `LIKE` with `%` and `_`.
fn like(pattern: &str, name: &str) -> bool {
    fn matches(p: &[char], n: &[char]) -> bool {
        match p.split_first() {
            None => n.is_empty(),
            Some(('%', rest)) => (0..=n.len()).any(|i| matches(rest, &n[i..])),
            Some(('_', rest)) => !n.is_empty() && matches(rest, &n[1..]),
            Some((c, rest)) => n
                .split_first()
                .map(|(m, tail)| c.eq_ignore_ascii_case(m) && matches(rest, tail))
                .unwrap_or(false),
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    matches(&p, &n)
}

#[derive(Debug)]
struct ParseError;

#[derive(Debug)]
enum Failed {
    Parse,
    Driver(DriverError),
}

impl From<ParseError> for Failed {
    fn from(_: ParseError) -> Self {
        Self::Parse
    }
}

impl Failed {
    fn or_syntax(self, sql: &str) -> DriverError {
        match self {
            Self::Parse => syntax_error(sql),
            Self::Driver(err) => err,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Literal(String),
    Number(String),
    Symbol(char),
}

/// A cursor over the tokens of one statement.
struct Parser<'a> {
    sql: &'a str,
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(sql: &'a str) -> Self {
        Self {
            sql,
            tokens: tokenize(sql),
            pos: 0,
        }
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(t, _)| t)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn is_word_at(&self, offset: usize, word: &str) -> bool {
        matches!(self.peek_at(offset), Some(Token::Word(w)) if w.eq_ignore_ascii_case(word))
    }

    fn is_property_next(&self) -> bool {
        matches!(self.peek_at(0), Some(Token::Word(_)))
            && self.peek_at(1) == Some(&Token::Symbol('='))
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.is_word_at(0, word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, word: &str) -> Result<(), ParseError> {
        if self.eat_word(word) {
            Ok(())
        } else {
            Err(ParseError)
        }
    }

    fn eat_symbol(&mut self, symbol: char) -> bool {
        if self.peek_at(0) == Some(&Token::Symbol(symbol)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn word(&mut self) -> Result<String, ParseError> {
        match self.peek_at(0) {
            Some(Token::Word(w)) => {
                let w = w.to_uppercase();
                self.pos += 1;
                Ok(w)
            },
            _ => Err(ParseError),
        }
    }

    fn literal(&mut self) -> Result<String, ParseError> {
        match self.peek_at(0) {
            Some(Token::Literal(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            },
            _ => Err(ParseError),
        }
    }

    /// Words up to the next `KEY =`, `COPY`, `AS` or the end.
    fn words_until_property(&mut self) -> Result<String, ParseError> {
        let mut words = Vec::new();
        while matches!(self.peek_at(0), Some(Token::Word(_)))
            && !self.is_property_next()
            && !self.is_word_at(0, "COPY")
            && !self.is_word_at(0, "AS")
        {
            words.push(self.word()?);
        }
        if words.is_empty() {
            return Err(ParseError);
        }
        Ok(words.join(" "))
    }

    fn words_until_comma(&mut self) -> Result<String, ParseError> {
        let mut words = Vec::new();
        while matches!(self.peek_at(0), Some(Token::Word(_))) {
            words.push(self.word()?);
        }
        if words.is_empty() {
            return Err(ParseError);
        }
        Ok(words.join(" "))
    }

    /// The object keyword at the cursor, singular or plural.
    fn object_kind(&mut self, plural: bool) -> Option<&'static KindSpec> {
        let mut candidates: Vec<&'static KindSpec> = KINDS.iter().collect();
        candidates.sort_by_key(|k| std::cmp::Reverse(k.keyword.len()));
        for spec in candidates {
            let keyword = if plural { spec.plural } else { spec.keyword };
            let words: Vec<&str> = keyword.split(' ').collect();
            if words.iter().enumerate().all(|(i, w)| self.is_word_at(i, w)) {
                self.pos += words.len();
                return Some(spec);
            }
        }
        None
    }

    /// A dotted name; quoted segments are exact, bare ones upper-cased.
    fn path(&mut self) -> Result<Vec<String>, ParseError> {
        let mut parts = Vec::new();
        loop {
            match self.peek_at(0) {
                Some(Token::Quoted(s)) => parts.push(s.clone()),
                Some(Token::Word(w)) => parts.push(w.to_uppercase()),
                _ => return Err(ParseError),
            }
            self.pos += 1;
            if !self.eat_symbol('.') {
                return Ok(parts);
            }
        }
    }

    fn property(&mut self) -> Result<(String, FakeValue), ParseError> {
        let key = self.word()?;
        if !self.eat_symbol('=') {
            return Err(ParseError);
        }
        let value = if self.eat_symbol('(') {
            let mut items = Vec::new();
            if !self.eat_symbol(')') {
                loop {
                    items.push(self.scalar()?);
                    if self.eat_symbol(')') {
                        break;
                    }
                    if !self.eat_symbol(',') {
                        return Err(ParseError);
                    }
                }
            }
            FakeValue::List(items)
        } else {
            FakeValue::Scalar(self.scalar()?)
        };
        Ok((key, value))
    }

    fn scalar(&mut self) -> Result<String, ParseError> {
        match self.peek_at(0).cloned() {
            Some(Token::Literal(s)) | Some(Token::Number(s)) => {
                self.pos += 1;
                Ok(s)
            },
            Some(Token::Word(w))
                if w.eq_ignore_ascii_case("TRUE") || w.eq_ignore_ascii_case("FALSE") =>
            {
                self.pos += 1;
                Ok(w.to_lowercase())
            },
            Some(Token::Word(_)) | Some(Token::Quoted(_)) => {
                let parts = self.path()?;
                Ok(parts
                    .iter()
                    .map(|part| {
                        let plain = part.chars().all(|c| {
                            c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '$'
                        });
                        if plain {
                            part.clone()
                        } else {
                            format!("\"{}\"", part.replace('"', "\"\""))
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("."))
            },
            _ => Err(ParseError),
        }
    }
}

/// Split a statement into tokens, each paired with its end offset.
fn tokenize(sql: &str) -> Vec<(Token, usize)> {
    let mut tokens = Vec::new();
    let mut chars = sql.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let token = match c {
            '"' | '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        None => break,
                        Some((_, '\\')) if c == '\'' => {
                            if let Some((_, escaped)) = chars.next() {
                                text.push(escaped);
                            }
                        },
                        Some((_, q)) if q == c => {
                            if chars.peek().map(|&(_, n)| n == c).unwrap_or(false) {
                                chars.next();
                                text.push(c);
                            } else {
                                break;
                            }
                        },
                        Some((_, other)) => text.push(other),
                    }
                }
                if c == '"' {
                    Token::Quoted(text)
                } else {
                    Token::Literal(text)
                }
            },
            c if c.is_ascii_digit() || c == '-' => {
                let mut text = String::new();
                text.push(c);
                chars.next();
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if text == "-" {
                    Token::Symbol('-')
                } else {
                    Token::Number(text)
                }
            },
            c if c.is_alphanumeric() || c == '_' || c == '$' => {
                let mut text = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' || d == '$' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                Token::Word(text)
            },
            other => {
                chars.next();
                Token::Symbol(other)
            },
        };
        let end = chars.peek().map(|&(i, _)| i).unwrap_or(sql.len());
        debug_assert!(end > start);
        tokens.push((token, end));
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::collect_rows;

    async fn show(fake: &FakeSnowflake, sql: &str) -> Vec<Row> {
        let rows = fake
            .query(&CallContext::default(), &Statement::new(sql))
            .await
            .unwrap();
        collect_rows(rows).await.unwrap()
    }

    async fn exec(fake: &FakeSnowflake, sql: &str) -> Result<u64, DriverError> {
        fake.exec(&CallContext::default(), &Statement::new(sql)).await
    }

    #[test]
    fn test_tokenize() {
        let tokens: Vec<Token> = tokenize(r#"ALTER VIEW "db"."S".v SET COMMENT = 'it''s' MIN = -1"#)
            .into_iter()
            .map(|(t, _)| t)
            .collect();
        assert_eq!(tokens[2], Token::Quoted("db".into()));
        assert_eq!(tokens[6], Token::Word("v".into()));
        assert_eq!(tokens[10], Token::Literal("it's".into()));
        assert_eq!(tokens[13], Token::Number("-1".into()));
    }

    #[test]
    fn test_like() {
        assert!(like("pool_a", "POOL_A"));
        assert!(like("POOL_A", "POOLXA"));
        assert!(like("P%", "POOL"));
        assert!(!like("POOL", "POOL_A"));
    }

    #[tokio::test]
    async fn test_create_show_and_defaults() {
        let fake = FakeSnowflake::new();
        exec(&fake, r#"CREATE COMPUTE POOL "POOL_A" MIN_NODES = 2 COMMENT = 'x'"#)
            .await
            .unwrap();
        let rows = show(&fake, "SHOW COMPUTE POOLS LIKE 'pool_a'").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "POOL_A");
        assert_eq!(rows[0]["min_nodes"], "2");
        assert_eq!(rows[0]["max_nodes"], "1");
        assert_eq!(rows[0]["auto_resume"], "true");
        assert_eq!(rows[0]["comment"], "x");
        assert_eq!(rows[0]["owner"], "ACCOUNTADMIN");

        let err = exec(&fake, r#"CREATE COMPUTE POOL "POOL_A""#).await.unwrap_err();
        assert!(matches!(err, DriverError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_container_is_required() {
        let fake = FakeSnowflake::new();
        let err = exec(&fake, r#"CREATE VIEW "DB"."S"."V" AS select 1"#)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        fake.create_container("DB", "S");
        exec(&fake, r#"CREATE SECURE VIEW "DB"."S"."V" AS select 1"#)
            .await
            .unwrap();
        let rows = show(&fake, r#"SHOW VIEWS LIKE 'V' IN SCHEMA "DB"."S""#).await;
        assert_eq!(rows[0]["text"], r#"CREATE SECURE VIEW "DB"."S"."V" AS select 1"#);
        assert_eq!(rows[0]["is_secure"], "true");
        assert_eq!(rows[0]["database_name"], "DB");
        assert_eq!(rows[0]["schema_name"], "S");
    }

    #[tokio::test]
    async fn test_alter_and_rename() {
        let fake = FakeSnowflake::new();
        exec(&fake, r#"CREATE DATABASE "OLD" COMMENT = 'a'"#).await.unwrap();
        exec(&fake, r#"CREATE SCHEMA "OLD"."S" WITH MANAGED ACCESS"#).await.unwrap();
        exec(&fake, r#"ALTER DATABASE "OLD" RENAME TO "NEW""#).await.unwrap();
        assert!(fake.has_object("SCHEMA", r#""NEW"."S""#));
        assert!(!fake.has_object("DATABASE", r#""OLD""#));

        exec(&fake, r#"ALTER DATABASE "NEW" UNSET COMMENT"#).await.unwrap();
        assert_eq!(fake.property("DATABASE", r#""NEW""#, "COMMENT"), None);

        exec(&fake, r#"ALTER SCHEMA "NEW"."S" DISABLE MANAGED ACCESS"#).await.unwrap();
        let rows = show(&fake, r#"SHOW SCHEMAS LIKE 'S' IN DATABASE "NEW""#).await;
        assert_eq!(rows[0]["is_managed_access"], "false");

        let err = exec(&fake, r#"ALTER DATABASE "OLD" SET COMMENT = 'b'"#).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_parameter_inheritance() {
        let fake = FakeSnowflake::new();
        fake.set_account_parameter("MAX_DATA_EXTENSION_TIME_IN_DAYS", "20");
        exec(&fake, r#"CREATE DATABASE "DB" DATA_RETENTION_TIME_IN_DAYS = 5"#).await.unwrap();
        exec(&fake, r#"CREATE SCHEMA "DB"."S""#).await.unwrap();

        let rows = collect_rows(
            fake.query_multi(
                &CallContext::default(),
                &Statement::new(r#"SHOW PARAMETERS IN SCHEMA "DB"."S""#),
            )
            .await
            .unwrap(),
        )
        .await
        .unwrap();
        let param = |key: &str| rows.iter().find(|r| r["key"] == key).unwrap().clone();
        assert_eq!(param("DATA_RETENTION_TIME_IN_DAYS")["value"], "5");
        assert_eq!(param("DATA_RETENTION_TIME_IN_DAYS")["level"], "DATABASE");
        assert_eq!(param("MAX_DATA_EXTENSION_TIME_IN_DAYS")["level"], "ACCOUNT");
        assert_eq!(param("TIMEZONE")["level"], "");
    }

    #[tokio::test]
    async fn test_list_and_hidden_properties() {
        let fake = FakeSnowflake::new();
        exec(
            &fake,
            "CREATE SECURITY INTEGRATION \"OKTA\" TYPE = EXTERNAL_OAUTH \
             EXTERNAL_OAUTH_AUDIENCE_LIST = ('a', 'b') EXTERNAL_OAUTH_RSA_PUBLIC_KEY = 'MIIB'",
        )
        .await
        .unwrap();
        let rows = collect_rows(
            fake.query_multi(
                &CallContext::default(),
                &Statement::new(r#"DESCRIBE SECURITY INTEGRATION "OKTA""#),
            )
            .await
            .unwrap(),
        )
        .await
        .unwrap();
        let audience = rows
            .iter()
            .find(|r| r["property"] == "EXTERNAL_OAUTH_AUDIENCE_LIST")
            .unwrap();
        assert_eq!(audience["value"], "[a, b]");
        assert!(rows.iter().all(|r| r["property"] != "EXTERNAL_OAUTH_RSA_PUBLIC_KEY"));
    }

    #[tokio::test]
    async fn test_failure_injection_and_log() {
        let fake = FakeSnowflake::new();
        fake.fail_next("CREATE", DriverError::Transient("reset".into()), 1);
        assert!(exec(&fake, r#"CREATE DATABASE "DB""#).await.unwrap_err().is_transient());
        exec(&fake, r#"CREATE DATABASE "DB""#).await.unwrap();
        assert_eq!(fake.statements().len(), 2);

        fake.out_of_band(r#"ALTER DATABASE "DB" SET COMMENT = 'foo'"#).unwrap();
        assert_eq!(fake.statements().len(), 2);
        assert_eq!(fake.property("DATABASE", r#""DB""#, "COMMENT").as_deref(), Some("foo"));

        let err = exec(&fake, "GRANT ROLE R TO USER U").await.unwrap_err();
        assert!(matches!(err, DriverError::Rejected(_)));
    }
}
