//! The remote SQL driver interface.
//!
//! The engine never opens connections itself. It is handed an
//! [`SqlDriver`] (usually through a [`DriverFactory`] at configure time)
//! and issues exactly three call shapes against it. Every call receives
//! the [`CallContext`] so drivers can abandon work on cancellation.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio_stream::{Stream, StreamExt};

use crate::context::CallContext;
use crate::sql::Statement;

/// One result row, keyed by lower-case column name.
pub type Row = BTreeMap<String, String>;

/// A stream of result rows.
pub type RowStream = Pin<Box<dyn Stream<Item = Result<Row, DriverError>> + Send>>;

/// Failures reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// Transport failure or timeout; the statement may be retried.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The object named by the statement does not exist.
    #[error("object does not exist or not authorized: {0}")]
    NotFound(String),

    /// The statement was rejected (syntax, precondition).
    #[error("statement rejected: {0}")]
    Rejected(String),

    /// The current role lacks a required privilege.
    #[error("insufficient privileges: {0}")]
    PermissionDenied(String),
}

impl DriverError {
    /// Whether the driver considers the failure transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether the failure means the object is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Executes statements against the remote account.
///
/// Implementations must be safe to share between concurrent calls.
#[async_trait::async_trait]
pub trait SqlDriver: Send + Sync {
    /// Run a statement that returns no rows; yields rows affected.
    async fn exec(&self, ctx: &CallContext, statement: &Statement) -> Result<u64, DriverError>;

    /// Run a statement expected to return at most a handful of rows.
    async fn query(&self, ctx: &CallContext, statement: &Statement)
        -> Result<RowStream, DriverError>;

    /// Run a statement that returns one row per property of a single
    /// object (`DESCRIBE`, `SHOW PARAMETERS`).
    async fn query_multi(
        &self,
        ctx: &CallContext,
        statement: &Statement,
    ) -> Result<RowStream, DriverError>;
}

/// Opens drivers for named credential profiles.
#[async_trait::async_trait]
pub trait DriverFactory: Send + Sync {
    /// Connect using the named profile.
    async fn connect(&self, profile: &str) -> Result<Arc<dyn SqlDriver>, DriverError>;
}

/// Drain a row stream.
pub async fn collect_rows(mut rows: RowStream) -> Result<Vec<Row>, DriverError> {
    let mut out = Vec::new();
    while let Some(row) = rows.next().await {
        out.push(row?);
    }
    Ok(out)
}

/// Wrap already-materialised rows as a stream.
pub fn row_stream(rows: Vec<Row>) -> RowStream {
    Box::pin(tokio_stream::iter(rows.into_iter().map(Ok)))
}

/// Build a row from column/value pairs; column names are lower-cased.
pub fn row<K: AsRef<str>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Row {
    pairs
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_lowercase(), v.into()))
        .collect()
}
