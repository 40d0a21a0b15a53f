//! Error types for the reconciliation engine.

use thiserror::Error;

use crate::driver::DriverError;
use crate::identifier::IdentifierError;
use crate::schema::Diagnostic;
use crate::sql::Statement;

/// Errors that can occur while validating, planning or applying a resource.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Configuration violates a descriptor constraint.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A malformed identifier.
    #[error("Invalid identifier: {0}")]
    Identifier(#[from] IdentifierError),

    /// Old state that cannot be lifted to the current schema version.
    #[error(
        "Cannot upgrade state from schema version {from_version}: \
         attribute '{attribute}' {reason}; \
         remove the resource from state and import it again"
    )]
    StateUpgrade {
        /// Version of the inbound state.
        from_version: u64,
        /// Attribute that could not be recovered.
        attribute: String,
        /// What went wrong.
        reason: String,
    },

    /// Transport or timeout failure, after the retry budget was spent.
    #[error(
        "Remote operation failed after {attempts} attempt(s): {message} \
         (statement: {statement})"
    )]
    RemoteTransient {
        /// Redacted statement summary.
        statement: String,
        /// Driver message.
        message: String,
        /// Attempts made.
        attempts: u32,
    },

    /// The remote rejected the operation.
    #[error(
        "Remote operation rejected on attempt {attempts}: {message} \
         (statement: {statement})"
    )]
    RemoteLogical {
        /// Redacted statement summary.
        statement: String,
        /// Driver message.
        message: String,
        /// Attempts made, counting transient failures before the rejection.
        attempts: u32,
    },

    /// The remote accepted a mutation but reads back something else.
    #[error("Inconsistent result after apply: attribute '{attribute}' {message}")]
    Consistency {
        /// Offending attribute.
        attribute: String,
        /// What differed.
        message: String,
    },

    /// An internal engine assertion was violated.
    #[error("Plan invariant violated at {path}: {message}")]
    PlanInvariant {
        /// Descriptor path, `kind.attribute`.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// The requested object was not found.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// The resource type is a preview feature that has not been enabled.
    #[error(
        "Resource type {0} is a preview feature; \
         add it to preview_features_enabled in the provider configuration"
    )]
    PreviewFeatureDisabled(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The call was cancelled by the host.
    #[error("Operation cancelled")]
    Cancelled,

    /// The call deadline passed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A gRPC transport error occurred.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

impl ProviderError {
    /// Classify a driver failure for the given statement.
    ///
    /// Only the redacted form of the statement is kept.
    pub fn remote(err: DriverError, statement: &Statement, attempts: u32) -> Self {
        let statement = statement.redacted().to_string();
        match err {
            DriverError::Transient(message) => Self::RemoteTransient {
                statement,
                message,
                attempts,
            },
            other => Self::RemoteLogical {
                statement,
                message: other.to_string(),
                attempts,
            },
        }
    }

    /// Build a plan-invariant error for `kind.attribute`.
    pub fn plan_invariant(
        kind: &str,
        attribute: &str,
        message: impl Into<String>,
    ) -> Self {
        Self::PlanInvariant {
            path: format!("{}.{}", kind, attribute),
            message: message.into(),
        }
    }

    /// Get the error message as a string.
    pub fn message(&self) -> String {
        match self {
            Self::Validation(msg)
            | Self::NotFound(msg)
            | Self::UnknownResource(msg)
            | Self::Configuration(msg) => msg.clone(),
            Self::RemoteTransient { message, .. }
            | Self::RemoteLogical { message, .. }
            | Self::Consistency { message, .. }
            | Self::PlanInvariant { message, .. } => message.clone(),
            Self::StateUpgrade { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }

    /// The attribute path the error refers to, if any.
    pub fn attribute(&self) -> Option<&str> {
        match self {
            Self::StateUpgrade { attribute, .. } | Self::Consistency { attribute, .. } => {
                Some(attribute)
            },
            Self::PlanInvariant { path, .. } => path.split_once('.').map(|(_, attr)| attr),
            _ => None,
        }
    }

    /// Whether the failure may succeed if attempted again.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::RemoteTransient { .. })
    }

    /// Whether the failure was an interruption of the call itself.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        let msg = err.to_string();
        match err {
            ProviderError::Validation(_) | ProviderError::Identifier(_) => {
                tonic::Status::invalid_argument(msg)
            },
            ProviderError::StateUpgrade { .. }
            | ProviderError::Configuration(_)
            | ProviderError::PreviewFeatureDisabled(_) => tonic::Status::failed_precondition(msg),
            ProviderError::RemoteTransient { .. } => tonic::Status::unavailable(msg),
            ProviderError::RemoteLogical { .. } => tonic::Status::aborted(msg),
            ProviderError::Consistency { .. } | ProviderError::PlanInvariant { .. } => {
                tonic::Status::internal(msg)
            },
            ProviderError::NotFound(_) | ProviderError::UnknownResource(_) => {
                tonic::Status::not_found(msg)
            },
            ProviderError::Cancelled => tonic::Status::cancelled(msg),
            ProviderError::DeadlineExceeded => tonic::Status::deadline_exceeded(msg),
            ProviderError::Serialization(_) => tonic::Status::invalid_argument(msg),
            ProviderError::Transport(_) => tonic::Status::unavailable(msg),
        }
    }
}

impl Diagnostic {
    /// An error diagnostic carrying the error's message and attribute path.
    pub fn from_error(err: &ProviderError) -> Self {
        let diagnostic = Diagnostic::error(err.to_string());
        match err.attribute() {
            Some(attribute) => diagnostic.with_attribute(attribute),
            None => diagnostic,
        }
    }
}
