//! Error types for the SFTP server core
//!
//! NIST 800-53: SI-11 (Error Handling), AU-3 (Content of Audit Records)
//! STIG: V-222566 - The application must generate error messages that provide information
//! necessary for corrective actions without revealing information that could be exploited
//! Implementation: Secure error messages with appropriate detail for troubleshooting

use russh_sftp::protocol::StatusCode;
use thiserror::Error;

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, Error>;

/// Server error types
///
/// NIST 800-53: SI-11 (Error Handling)
/// STIG: V-222566
/// Implementation: Error types that provide context without exposing sensitive information
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH transport error
    #[error("SSH error: {0}")]
    Ssh(String),

    /// Authentication failed
    ///
    /// NIST 800-53: IA-2 (Identification and Authentication), SI-11
    /// Implementation: Authentication errors without revealing why (security)
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// File or directory does not exist
    #[error("no such file: {0}")]
    NotFound(String),

    /// Access denied by the per-user policy
    ///
    /// NIST 800-53: AC-3 (Access Enforcement), SI-11
    /// STIG: V-222596, V-222566
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Quota cap would be exceeded
    ///
    /// NIST 800-53: SC-6 (Resource Availability)
    /// Implementation: Reported to the client as permission denied
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Resolved path lies outside the user's virtual root
    ///
    /// NIST 800-53: SI-10 (Input Validation), AC-3 (Access Enforcement)
    /// STIG: V-222396
    /// Implementation: Reported to the client as no-such-file so the
    /// existence of out-of-root paths is never confirmed
    #[error("path escapes user root: {0}")]
    PathEscape(String),

    /// Path failed syntactic validation (null bytes, bad leaf name)
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Network connection failure
    #[error("connection error: {0}")]
    Connection(String),

    /// User store failure
    #[error("user store error: {0}")]
    Store(String),

    /// Unsupported operation or subsystem
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Catch-all for uncategorized errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if error is security-related
    ///
    /// # NIST 800-53: AU-2 (Audit Events), SI-11
    /// # STIG: V-222566
    /// # Implementation: Identifies errors that should be audited
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            Error::Authentication(_)
                | Error::PermissionDenied(_)
                | Error::QuotaExceeded(_)
                | Error::PathEscape(_)
        )
    }

    /// Map the error to the SFTP status code sent to the client
    ///
    /// Quota denials surface as permission-denied; escape attempts surface
    /// as no-such-file rather than permission-denied.
    ///
    /// # NIST 800-53: SI-11
    pub fn to_status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) | Error::PathEscape(_) => StatusCode::NoSuchFile,
            Error::PermissionDenied(_) | Error::QuotaExceeded(_) => StatusCode::PermissionDenied,
            Error::InvalidPath(_) => StatusCode::BadMessage,
            Error::NotSupported(_) => StatusCode::OpUnsupported,
            Error::Connection(_) => StatusCode::ConnectionLost,
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NoSuchFile,
            Error::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                StatusCode::PermissionDenied
            }
            _ => StatusCode::Failure,
        }
    }

    /// Get sanitized error message for the client
    ///
    /// # NIST 800-53: SI-11 (Error Handling)
    /// # STIG: V-222566
    /// # Implementation: Removes sensitive information from error messages
    pub fn sanitized_message(&self) -> String {
        match self {
            Error::Authentication(_) => "Authentication failed".to_string(),
            Error::PermissionDenied(_) | Error::QuotaExceeded(_) => {
                "Permission denied".to_string()
            }
            Error::PathEscape(_) | Error::NotFound(_) => "No such file".to_string(),
            Error::InvalidPath(_) => "Invalid path".to_string(),
            Error::Config(_) => "Server configuration error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Create a store error with context
    pub fn store(context: impl Into<String>) -> Self {
        Error::Store(context.into())
    }

    /// Create a not-found error for a virtual path
    pub fn not_found(path: impl std::fmt::Display) -> Self {
        Error::NotFound(path.to_string())
    }
}

impl From<russh::Error> for Error {
    fn from(err: russh::Error) -> Self {
        Error::Ssh(err.to_string())
    }
}

impl From<russh_keys::Error> for Error {
    fn from(err: russh_keys::Error) -> Self {
        Error::Ssh(err.to_string())
    }
}
