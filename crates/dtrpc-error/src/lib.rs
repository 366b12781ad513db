//! Unified error taxonomy with stable error codes for the DTN RPC
//! coordination engine.
//!
//! Every error carries an [`ErrorCode`] (a machine-readable, stable string
//! tag), a human-readable message, an optional cause chain, and arbitrary
//! key-value context. Use the builder returned by [`DtrpcError::new`] to
//! construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to, matching the taxonomy in
/// the error handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transient transport errors: dropped connections, invalid tokens,
    /// JSON framing. Always safe to retry.
    Transport,
    /// Store authentication failures. Fatal at startup.
    Auth,
    /// Bundle/job-document protocol violations.
    Protocol,
    /// Offer/capability matching failures.
    Capability,
    /// Step subprocess execution failures.
    Execution,
    /// Store-side decryption or duplicate-insertion conditions.
    Store,
    /// Configuration errors.
    Config,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transport => "transport",
            Self::Auth => "auth",
            Self::Protocol => "protocol",
            Self::Capability => "capability",
            Self::Execution => "execution",
            Self::Store => "store",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Transport (retry with 1s backoff) --
    /// The store connection was refused or dropped mid-request.
    TransportUnavailable,
    /// The watermark token supplied to `newsince` was rejected by the store.
    TransportInvalidToken,
    /// The store's JSON response could not be framed/parsed.
    TransportFraming,

    // -- Auth (fatal) --
    /// The store rejected our credentials (HTTP 401).
    AuthUnauthorized,
    /// The store's keyring has no local identity to act as SID.
    AuthNoIdentity,

    // -- Protocol --
    /// The CALL payload is not a valid ZIP archive.
    ProtocolNotAZip,
    /// No `*.jb` job file was found inside the extracted package.
    ProtocolMissingJobFile,
    /// The job file failed to parse.
    ProtocolMalformedJobFile,
    /// No `OPEN` job addressed to the local SID exists in the document.
    ProtocolNoMatchingStep,

    // -- Capability --
    /// The local node does not offer the requested procedure/arity.
    CapabilityNotOffering,
    /// The local node fails the job's capability filter.
    CapabilityNotCapable,

    // -- Execution --
    /// The step's executable exited with a non-zero status.
    ExecutionFailed,

    // -- Store --
    /// The store could not decrypt a bundle for the local SID.
    StoreDecryptionFailed,
    /// The store already holds an equivalent bundle.
    StoreDuplicateInsertion,

    // -- Config --
    /// Configuration file or value is invalid.
    ConfigInvalid,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TransportUnavailable | Self::TransportInvalidToken | Self::TransportFraming => {
                ErrorCategory::Transport
            }

            Self::AuthUnauthorized | Self::AuthNoIdentity => ErrorCategory::Auth,

            Self::ProtocolNotAZip
            | Self::ProtocolMissingJobFile
            | Self::ProtocolMalformedJobFile
            | Self::ProtocolNoMatchingStep => ErrorCategory::Protocol,

            Self::CapabilityNotOffering | Self::CapabilityNotCapable => ErrorCategory::Capability,

            Self::ExecutionFailed => ErrorCategory::Execution,

            Self::StoreDecryptionFailed | Self::StoreDuplicateInsertion => ErrorCategory::Store,

            Self::ConfigInvalid => ErrorCategory::Config,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"TRANSPORT_UNAVAILABLE"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportUnavailable => "TRANSPORT_UNAVAILABLE",
            Self::TransportInvalidToken => "TRANSPORT_INVALID_TOKEN",
            Self::TransportFraming => "TRANSPORT_FRAMING",
            Self::AuthUnauthorized => "AUTH_UNAUTHORIZED",
            Self::AuthNoIdentity => "AUTH_NO_IDENTITY",
            Self::ProtocolNotAZip => "PROTOCOL_NOT_A_ZIP",
            Self::ProtocolMissingJobFile => "PROTOCOL_MISSING_JOB_FILE",
            Self::ProtocolMalformedJobFile => "PROTOCOL_MALFORMED_JOB_FILE",
            Self::ProtocolNoMatchingStep => "PROTOCOL_NO_MATCHING_STEP",
            Self::CapabilityNotOffering => "CAPABILITY_NOT_OFFERING",
            Self::CapabilityNotCapable => "CAPABILITY_NOT_CAPABLE",
            Self::ExecutionFailed => "EXECUTION_FAILED",
            Self::StoreDecryptionFailed => "STORE_DECRYPTION_FAILED",
            Self::StoreDuplicateInsertion => "STORE_DUPLICATE_INSERTION",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether a caller should retry the operation that produced this code.
    ///
    /// Only [`ErrorCategory::Transport`] errors are retryable; everything
    /// else (auth, protocol, capability, execution) requires a decision by
    /// the caller rather than a blind retry.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transport
    }

    /// The `reason` string this code produces on an outbound ERROR bundle,
    /// when one is a natural fit (protocol/capability/execution failures
    /// that an intermediate hop surfaces to the originator).
    pub fn bundle_reason(&self) -> Option<&'static str> {
        match self {
            Self::ProtocolNotAZip => Some("Call payload is not a valid ZIP archive."),
            Self::ProtocolMissingJobFile => Some("No job file found in call package."),
            Self::ProtocolMalformedJobFile => Some("Job file could not be parsed."),
            Self::ProtocolNoMatchingStep => Some("No open step addressed to this server."),
            Self::CapabilityNotOffering => Some("Server is not offering this procedure."),
            Self::CapabilityNotCapable => Some("Server does not meet the required capabilities."),
            Self::ExecutionFailed => Some("Step executable exited with a non-zero status."),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// DtrpcError
// ---------------------------------------------------------------------------

/// Unified engine error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Examples
///
/// ```
/// use dtrpc_error::{DtrpcError, ErrorCode};
///
/// let err = DtrpcError::new(ErrorCode::ExecutionFailed, "exit status 2")
///     .with_context("procedure", "echo")
///     .with_context("exit_code", 2);
/// assert_eq!(err.code, ErrorCode::ExecutionFailed);
/// ```
pub struct DtrpcError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl DtrpcError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Shorthand for `self.code.is_retryable()`.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl fmt::Debug for DtrpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("DtrpcError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for DtrpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for DtrpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for DtrpcError {
    fn from(err: std::io::Error) -> Self {
        DtrpcError::new(ErrorCode::Internal, err.to_string()).with_source(err)
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`DtrpcError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DtrpcErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&DtrpcError> for DtrpcErrorDto {
    fn from(err: &DtrpcError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<DtrpcErrorDto> for DtrpcError {
    fn from(dto: DtrpcErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;

    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::TransportUnavailable,
        ErrorCode::TransportInvalidToken,
        ErrorCode::TransportFraming,
        ErrorCode::AuthUnauthorized,
        ErrorCode::AuthNoIdentity,
        ErrorCode::ProtocolNotAZip,
        ErrorCode::ProtocolMissingJobFile,
        ErrorCode::ProtocolMalformedJobFile,
        ErrorCode::ProtocolNoMatchingStep,
        ErrorCode::CapabilityNotOffering,
        ErrorCode::CapabilityNotCapable,
        ErrorCode::ExecutionFailed,
        ErrorCode::StoreDecryptionFailed,
        ErrorCode::StoreDuplicateInsertion,
        ErrorCode::ConfigInvalid,
        ErrorCode::Internal,
    ];

    #[test]
    fn basic_construction() {
        let err = DtrpcError::new(ErrorCode::Internal, "boom");
        assert_eq!(err.code, ErrorCode::Internal);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_context() {
        let err = DtrpcError::new(ErrorCode::CapabilityNotOffering, "no such procedure");
        assert_eq!(
            err.to_string(),
            "[CAPABILITY_NOT_OFFERING] no such procedure"
        );
    }

    #[test]
    fn display_with_context() {
        let err = DtrpcError::new(ErrorCode::ExecutionFailed, "exit 2")
            .with_context("exit_code", 2);
        let s = err.to_string();
        assert!(s.starts_with("[EXECUTION_FAILED] exit 2"));
        assert!(s.contains("exit_code"));
    }

    #[test]
    fn transport_codes_are_retryable() {
        for code in [
            ErrorCode::TransportUnavailable,
            ErrorCode::TransportInvalidToken,
            ErrorCode::TransportFraming,
        ] {
            assert!(code.is_retryable(), "{code:?} should be retryable");
        }
    }

    #[test]
    fn non_transport_codes_are_not_retryable() {
        assert!(!ErrorCode::AuthUnauthorized.is_retryable());
        assert!(!ErrorCode::CapabilityNotOffering.is_retryable());
        assert!(!ErrorCode::ExecutionFailed.is_retryable());
    }

    #[test]
    fn bundle_reason_matches_spec_wording() {
        assert_eq!(
            ErrorCode::CapabilityNotOffering.bundle_reason(),
            Some("Server is not offering this procedure.")
        );
        assert_eq!(ErrorCode::TransportUnavailable.bundle_reason(), None);
    }

    #[test]
    fn all_codes_have_unique_as_str() {
        let mut seen = HashSet::new();
        for code in ALL_CODES {
            assert!(seen.insert(code.as_str()));
        }
        assert_eq!(seen.len(), ALL_CODES.len());
    }

    #[test]
    fn all_codes_display_matches_as_str() {
        for code in ALL_CODES {
            assert_eq!(code.to_string(), code.as_str());
        }
    }

    #[test]
    fn error_code_serde_roundtrip() {
        let code = ErrorCode::TransportInvalidToken;
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, r#""TRANSPORT_INVALID_TOKEN""#);
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, code);
    }

    #[test]
    fn builder_chaining_all() {
        let src = io::Error::other("underlying");
        let err = DtrpcError::new(ErrorCode::ConfigInvalid, "bad config")
            .with_context("file", "rpc.conf")
            .with_source(src);
        assert_eq!(err.code, ErrorCode::ConfigInvalid);
        assert_eq!(err.context["file"], serde_json::json!("rpc.conf"));
        assert!(err.source.is_some());
    }

    #[test]
    fn std_error_source_chain() {
        let inner = io::Error::new(io::ErrorKind::NotFound, "not found");
        let err = DtrpcError::new(ErrorCode::ProtocolMissingJobFile, "missing").with_source(inner);
        let src = std::error::Error::source(&err).unwrap();
        assert_eq!(src.to_string(), "not found");
    }

    #[test]
    fn dto_roundtrip_without_source() {
        let err = DtrpcError::new(ErrorCode::ProtocolMalformedJobFile, "bad job file")
            .with_context("line", 3);
        let dto: DtrpcErrorDto = (&err).into();
        let json = serde_json::to_string(&dto).unwrap();
        let back: DtrpcErrorDto = serde_json::from_str(&json).unwrap();
        assert_eq!(dto, back);
        assert!(back.source_message.is_none());
    }

    #[test]
    fn io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: DtrpcError = io_err.into();
        assert_eq!(err.code, ErrorCode::Internal);
    }

    #[test]
    fn category_counts_cover_all_codes() {
        // every code is reachable through category() without panicking
        for code in ALL_CODES {
            let _ = code.category();
        }
    }
}
