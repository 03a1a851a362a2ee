use serde_json::Value;
use std::fmt;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Category of a redemption failure. Every error produced by this crate carries exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad caller input. Never retried.
    Validation,
    /// Transport or JSON-RPC failure.
    Network,
    /// Account derivation or deployment-check failure.
    SmartAccount,
    /// UserOperation submission or confirmation failure.
    UserOperation,
    /// Delegate / redeemer mismatch or malformed delegation. Always fatal.
    Delegation,
    Unknown,
}

impl ErrorKind {
    /// Only the submission engine retries, and only these categories.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::UserOperation)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Network => "network",
            ErrorKind::SmartAccount => "smart_account",
            ErrorKind::UserOperation => "user_operation",
            ErrorKind::Delegation => "delegation",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal error returned to callers of the redemption engine.
///
/// `details` holds structured context (addresses, hashes, receipts) so monitoring can alert
/// without re-deriving it; `source` keeps the lower-level cause.
#[derive(Debug, Error)]
#[error("{kind} error: {message}")]
pub struct RedemptionError {
    kind: ErrorKind,
    message: String,
    details: Option<Value>,
    #[source]
    source: Option<BoxError>,
}

impl RedemptionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn smart_account(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SmartAccount, message)
    }

    pub fn user_operation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UserOperation, message)
    }

    pub fn delegation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Delegation, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Message plus the full cause chain, for embedding in a wrapping error.
    pub fn describe(&self) -> String {
        let mut out = self.to_string();
        let mut cur = std::error::Error::source(self);
        while let Some(cause) = cur {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            cur = cause.source();
        }
        out
    }
}

pub type Result<T, E = RedemptionError> = std::result::Result<T, E>;
