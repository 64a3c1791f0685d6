//! Error taxonomy shared by every filesystem operation.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::remote::{NtStatus, RemoteError};

/// Generic failure taxonomy every error collapses onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The server refused access to the object
    AccessDenied,
    /// The object, its parent or its filesystem does not exist
    NotFound,
    /// The object or filesystem already exists
    AlreadyExists,
    /// A directory operation hit a file
    NotADirectory,
    /// The channel, listing or filesystem has been closed
    ClosedResource,
    /// Malformed path, address or argument
    InvalidArgument,
    /// The operation is not offered by this filesystem
    Unsupported,
    /// The object is not in a state that allows the call
    IllegalState,
    /// Any other remote or transport failure
    Generic,
}

/// Renders the optional second path of a two-path failure.
struct Other<'a>(&'a Option<String>);

impl fmt::Display for Other<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(other) => write!(f, " -> {}", other),
            None => Ok(()),
        }
    }
}

/// Errors surfaced by paths, filesystems, channels and the registry.
#[derive(Debug, Error)]
pub enum SmbFsError {
    /// Access to a path was denied
    #[error("Access denied: {path}{}: {reason}", Other(.other))]
    AccessDenied {
        /// Path the operation was called on
        path: String,
        /// Second path of a copy or move
        other: Option<String>,
        /// Message reported by the server
        reason: String,
    },

    /// A path does not exist
    #[error("No such file: {path}{}: {reason}", Other(.other))]
    NotFound {
        /// Path the operation was called on
        path: String,
        /// Second path of a copy or move
        other: Option<String>,
        /// Message reported by the server
        reason: String,
    },

    /// A path that must not exist does
    #[error("File already exists: {path}{}: {reason}", Other(.other))]
    AlreadyExists {
        /// Path the operation was called on
        path: String,
        /// Second path of a copy or move
        other: Option<String>,
        /// Message reported by the server
        reason: String,
    },

    /// A path expected to be a directory is a file
    #[error("Not a directory: {path}")]
    NotADirectory {
        /// Offending path
        path: String,
    },

    /// The resource was closed before or during the call
    #[error("{resource} is closed")]
    Closed {
        /// What was closed, e.g. `filesystem smb://host/share`
        resource: String,
    },

    /// Malformed input
    #[error("Invalid argument: {msg}")]
    InvalidArgument {
        /// What was wrong with it
        msg: String,
    },

    /// The operation is not offered
    #[error("Operation not supported: {op}")]
    Unsupported {
        /// Name of the refused operation
        op: String,
    },

    /// The call is not allowed in the current state
    #[error("Illegal state: {msg}")]
    IllegalState {
        /// Why the state forbids it
        msg: String,
    },

    /// No filesystem is registered for an address
    #[error("No filesystem for '{identity}' could be found")]
    FileSystemNotFound {
        /// The address looked up
        identity: String,
    },

    /// A filesystem is already registered for an address
    #[error("Filesystem for '{identity}' does already exist")]
    FileSystemAlreadyExists {
        /// The address that was to be created
        identity: String,
    },

    /// Connecting, authenticating or mounting failed
    #[error("Connection to {target} failed: {source}")]
    Connection {
        /// The share address
        target: String,
        /// Failure reported by the transport
        #[source]
        source: RemoteError,
    },

    /// A remote failure without a more specific kind
    #[error("Remote failure on {path}{}: {status}: {reason}", Other(.other))]
    Remote {
        /// Path the operation was called on
        path: String,
        /// Second path of a copy or move
        other: Option<String>,
        /// Status code returned by the server
        status: NtStatus,
        /// Message reported by the server
        reason: String,
    },
}

/// Result type for filesystem operations.
pub type Result<T> = std::result::Result<T, SmbFsError>;

impl SmbFsError {
    /// Translates a remote failure, attaching the offending path(s).
    pub fn from_remote(err: RemoteError, path: impl Into<String>, other: Option<String>) -> Self {
        let path = path.into();
        let reason = err.message;
        match err.status {
            NtStatus::FileIsADirectory | NtStatus::AccessDenied => {
                SmbFsError::AccessDenied { path, other, reason }
            }
            NtStatus::NoSuchFile
            | NtStatus::ObjectNameNotFound
            | NtStatus::ObjectPathNotFound
            | NtStatus::DeletePending => SmbFsError::NotFound { path, other, reason },
            NtStatus::ObjectNameCollision => SmbFsError::AlreadyExists { path, other, reason },
            NtStatus::NotADirectory => SmbFsError::NotADirectory { path },
            status => SmbFsError::Remote {
                path,
                other,
                status,
                reason,
            },
        }
    }

    pub(crate) fn closed(resource: impl Into<String>) -> Self {
        SmbFsError::Closed {
            resource: resource.into(),
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SmbFsError::InvalidArgument { msg: msg.into() }
    }

    pub(crate) fn unsupported(op: impl Into<String>) -> Self {
        SmbFsError::Unsupported { op: op.into() }
    }

    /// The generic kind this error collapses onto.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SmbFsError::AccessDenied { .. } => ErrorKind::AccessDenied,
            SmbFsError::NotFound { .. } | SmbFsError::FileSystemNotFound { .. } => {
                ErrorKind::NotFound
            }
            SmbFsError::AlreadyExists { .. } | SmbFsError::FileSystemAlreadyExists { .. } => {
                ErrorKind::AlreadyExists
            }
            SmbFsError::NotADirectory { .. } => ErrorKind::NotADirectory,
            SmbFsError::Closed { .. } => ErrorKind::ClosedResource,
            SmbFsError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            SmbFsError::Unsupported { .. } => ErrorKind::Unsupported,
            SmbFsError::IllegalState { .. } => ErrorKind::IllegalState,
            SmbFsError::Connection { .. } | SmbFsError::Remote { .. } => ErrorKind::Generic,
        }
    }

    /// Original remote status, for errors that came from the server.
    pub fn status(&self) -> Option<NtStatus> {
        match self {
            SmbFsError::Remote { status, .. } => Some(*status),
            SmbFsError::Connection { source, .. } => Some(source.status),
            _ => None,
        }
    }
}

impl From<SmbFsError> for io::Error {
    fn from(err: SmbFsError) -> Self {
        let kind = match err.kind() {
            ErrorKind::AccessDenied => io::ErrorKind::PermissionDenied,
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::AlreadyExists => io::ErrorKind::AlreadyExists,
            ErrorKind::InvalidArgument => io::ErrorKind::InvalidInput,
            ErrorKind::Unsupported => io::ErrorKind::Unsupported,
            ErrorKind::ClosedResource => io::ErrorKind::BrokenPipe,
            ErrorKind::NotADirectory | ErrorKind::IllegalState | ErrorKind::Generic => {
                io::ErrorKind::Other
            }
        };
        io::Error::new(kind, err)
    }
}
