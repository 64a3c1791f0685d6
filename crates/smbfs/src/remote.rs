//! Contract of the underlying share-protocol client.
//!
//! Wire framing, signing, encryption and dialect negotiation live behind
//! these traits. The filesystem layer only needs to connect, authenticate,
//! mount a share and issue single-shot calls against it.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Credentials;

/// Status codes reported by the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NtStatus {
    /// STATUS_SUCCESS
    Success,
    /// STATUS_ACCESS_DENIED
    AccessDenied,
    /// STATUS_FILE_IS_A_DIRECTORY
    FileIsADirectory,
    /// STATUS_NO_SUCH_FILE
    NoSuchFile,
    /// STATUS_OBJECT_NAME_NOT_FOUND
    ObjectNameNotFound,
    /// STATUS_OBJECT_PATH_NOT_FOUND
    ObjectPathNotFound,
    /// STATUS_DELETE_PENDING
    DeletePending,
    /// STATUS_OBJECT_NAME_COLLISION
    ObjectNameCollision,
    /// STATUS_NOT_A_DIRECTORY
    NotADirectory,
    /// STATUS_NOT_SUPPORTED
    NotSupported,
    /// STATUS_DIRECTORY_NOT_EMPTY
    DirectoryNotEmpty,
    /// STATUS_LOGON_FAILURE
    LogonFailure,
    /// STATUS_BAD_NETWORK_NAME
    BadNetworkName,
    /// STATUS_FILE_CLOSED
    FileClosed,
    /// STATUS_CONNECTION_DISCONNECTED
    ConnectionDisconnected,
    /// STATUS_INVALID_PARAMETER
    InvalidParameter,
    /// Any status this layer does not name.
    Other(u32),
}

impl NtStatus {
    /// Raw 32-bit NTSTATUS value.
    pub fn code(&self) -> u32 {
        match self {
            NtStatus::Success => 0x0000_0000,
            NtStatus::AccessDenied => 0xC000_0022,
            NtStatus::FileIsADirectory => 0xC000_00BA,
            NtStatus::NoSuchFile => 0xC000_000F,
            NtStatus::ObjectNameNotFound => 0xC000_0034,
            NtStatus::ObjectPathNotFound => 0xC000_003A,
            NtStatus::DeletePending => 0xC000_0056,
            NtStatus::ObjectNameCollision => 0xC000_0035,
            NtStatus::NotADirectory => 0xC000_0103,
            NtStatus::NotSupported => 0xC000_00BB,
            NtStatus::DirectoryNotEmpty => 0xC000_0101,
            NtStatus::LogonFailure => 0xC000_006D,
            NtStatus::BadNetworkName => 0xC000_00CC,
            NtStatus::FileClosed => 0xC000_0128,
            NtStatus::ConnectionDisconnected => 0xC000_020C,
            NtStatus::InvalidParameter => 0xC000_000D,
            NtStatus::Other(code) => *code,
        }
    }

    /// Maps a raw value back onto a named status where one exists.
    pub fn from_code(code: u32) -> Self {
        const NAMED: [NtStatus; 16] = [
            NtStatus::Success,
            NtStatus::AccessDenied,
            NtStatus::FileIsADirectory,
            NtStatus::NoSuchFile,
            NtStatus::ObjectNameNotFound,
            NtStatus::ObjectPathNotFound,
            NtStatus::DeletePending,
            NtStatus::ObjectNameCollision,
            NtStatus::NotADirectory,
            NtStatus::NotSupported,
            NtStatus::DirectoryNotEmpty,
            NtStatus::LogonFailure,
            NtStatus::BadNetworkName,
            NtStatus::FileClosed,
            NtStatus::ConnectionDisconnected,
            NtStatus::InvalidParameter,
        ];
        NAMED
            .into_iter()
            .find(|status| status.code() == code)
            .unwrap_or(NtStatus::Other(code))
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NtStatus::Other(code) => write!(f, "STATUS_0x{:08X}", code),
            named => write!(f, "{:?} (0x{:08X})", named, named.code()),
        }
    }
}

/// Failure reported by the remote collaborator, before translation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}: {message}")]
pub struct RemoteError {
    /// Status returned by the server.
    pub status: NtStatus,
    /// Human readable detail.
    pub message: String,
}

impl RemoteError {
    /// Creates a remote error with the given status.
    pub fn new(status: NtStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Result type of every remote primitive.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$cmeta:meta])* $konst:ident = $val:expr;)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            $($(#[$cmeta])* pub const $konst: $name = $name($val);)*

            /// The empty set.
            pub const fn empty() -> Self {
                $name(0)
            }

            /// Raw bits.
            pub const fn bits(self) -> u32 {
                self.0
            }

            /// True if every bit of `other` is set.
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// True if any bit of `other` is set.
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                $name(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }
    };
}

flag_set! {
    /// Requested access rights on an open.
    AccessMask {
        /// DELETE
        DELETE = 0x0001_0000;
        /// GENERIC_EXECUTE
        GENERIC_EXECUTE = 0x2000_0000;
        /// GENERIC_WRITE
        GENERIC_WRITE = 0x4000_0000;
        /// GENERIC_READ
        GENERIC_READ = 0x8000_0000;
    }
}

flag_set! {
    /// Access other openers are allowed while the handle is held.
    ShareAccess {
        /// FILE_SHARE_READ
        READ = 0x1;
        /// FILE_SHARE_WRITE
        WRITE = 0x2;
        /// FILE_SHARE_DELETE
        DELETE = 0x4;
        /// All of the above.
        ALL = 0x7;
    }
}

flag_set! {
    /// File attribute bits.
    FileAttributes {
        /// FILE_ATTRIBUTE_READONLY
        READONLY = 0x01;
        /// FILE_ATTRIBUTE_HIDDEN
        HIDDEN = 0x02;
        /// FILE_ATTRIBUTE_SYSTEM
        SYSTEM = 0x04;
        /// FILE_ATTRIBUTE_DIRECTORY
        DIRECTORY = 0x10;
        /// FILE_ATTRIBUTE_ARCHIVE
        ARCHIVE = 0x20;
        /// FILE_ATTRIBUTE_NORMAL
        NORMAL = 0x80;
    }
}

flag_set! {
    /// Create options on an open.
    CreateOptions {
        /// The target must be (or is created as) a directory.
        DIRECTORY_FILE = 0x01;
        /// The target must not be a directory.
        NON_DIRECTORY_FILE = 0x40;
    }
}

/// Create/open semantics of an open request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreateDisposition {
    /// Replace if present, create otherwise.
    Supersede,
    /// Open existing, fail if absent.
    Open,
    /// Create new, fail if present.
    Create,
    /// Open existing or create.
    OpenIf,
    /// Overwrite existing, fail if absent.
    Overwrite,
    /// Overwrite existing or create.
    OverwriteIf,
}

/// Timestamps and attribute bits of a remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBasicInformation {
    /// Creation time
    pub creation_time: SystemTime,
    /// Last access time
    pub last_access_time: SystemTime,
    /// Last write time
    pub last_write_time: SystemTime,
    /// Last metadata change time
    pub change_time: SystemTime,
    /// Attribute bits
    pub attributes: FileAttributes,
}

/// Partial update of basic information; `None` slots are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicInformationUpdate {
    /// New creation time
    pub creation_time: Option<SystemTime>,
    /// New last access time
    pub last_access_time: Option<SystemTime>,
    /// New last write time
    pub last_write_time: Option<SystemTime>,
    /// New change time
    pub change_time: Option<SystemTime>,
    /// New attribute bits
    pub attributes: Option<FileAttributes>,
}

impl BasicInformationUpdate {
    /// True if applying this update would change nothing.
    pub fn is_empty(&self) -> bool {
        self.creation_time.is_none()
            && self.last_access_time.is_none()
            && self.last_write_time.is_none()
            && self.change_time.is_none()
            && self.attributes.is_none()
    }
}

impl From<&FileBasicInformation> for BasicInformationUpdate {
    fn from(info: &FileBasicInformation) -> Self {
        Self {
            creation_time: Some(info.creation_time),
            last_access_time: Some(info.last_access_time),
            last_write_time: Some(info.last_write_time),
            change_time: Some(info.change_time),
            attributes: Some(info.attributes),
        }
    }
}

/// Size and state of a remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStandardInformation {
    /// Logical size in bytes
    pub end_of_file: u64,
    /// Bytes allocated on the server
    pub allocation_size: u64,
    /// True for directories
    pub directory: bool,
    /// True once the object is marked for deletion
    pub delete_pending: bool,
}

/// Everything a metadata query returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAllInformation {
    /// Timestamps and attribute bits
    pub basic: FileBasicInformation,
    /// Size and state
    pub standard: FileStandardInformation,
    /// Share-relative name of the object.
    pub name: String,
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Name within the listed directory, `.` and `..` included
    pub file_name: String,
    /// Attribute bits
    pub attributes: FileAttributes,
    /// Logical size in bytes
    pub end_of_file: u64,
}

/// Capacity figures of a mounted share, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareInformation {
    /// Size of the share
    pub total_space: u64,
    /// Free space available to the caller
    pub caller_free_space: u64,
    /// Free space on the share
    pub free_space: u64,
}

/// Entry point of the protocol client: opens transports.
pub trait SmbClient: Send + Sync {
    /// Opens a transport to `host`, on `port` or the protocol default.
    fn connect(&self, host: &str, port: Option<u16>) -> RemoteResult<Box<dyn SmbConnection>>;
}

/// An open transport.
pub trait SmbConnection: Send + Sync {
    /// Establishes an authenticated session over this transport.
    fn authenticate(&self, credentials: &Credentials) -> RemoteResult<Box<dyn SmbSession>>;

    /// Liveness of the transport.
    fn is_connected(&self) -> bool;

    /// Tears the transport down.
    fn close(&self) -> RemoteResult<()>;
}

/// An authenticated context over a connection.
pub trait SmbSession: Send + Sync {
    /// Mounts (tree-connects) a share.
    fn mount(&self, share_name: &str) -> RemoteResult<Arc<dyn DiskShare>>;

    /// Logs the session off.
    fn close(&self) -> RemoteResult<()>;
}

/// A mounted disk share. Paths are share-relative and `/`-separated.
pub trait DiskShare: Send + Sync {
    /// `\\host\share` form of this share, for diagnostics.
    fn unc_path(&self) -> String;

    /// Lists `path`, `.` and `..` included.
    fn list(&self, path: &str) -> RemoteResult<Vec<DirectoryEntry>>;

    /// Opens or creates `path` according to `disposition`.
    fn open(
        &self,
        path: &str,
        access: AccessMask,
        attributes: FileAttributes,
        share_access: ShareAccess,
        disposition: CreateDisposition,
        options: CreateOptions,
    ) -> RemoteResult<Box<dyn RemoteFile>>;

    /// Deletes a file or an empty directory.
    fn delete(&self, path: &str) -> RemoteResult<()>;

    /// Metadata of `path`.
    fn file_information(&self, path: &str) -> RemoteResult<FileAllInformation>;

    /// Applies `update` to `path`.
    fn set_basic_information(&self, path: &str, update: &BasicInformationUpdate) -> RemoteResult<()>;

    /// Capacity figures of the share.
    fn share_information(&self) -> RemoteResult<ShareInformation>;

    /// Liveness of the tree connection.
    fn is_connected(&self) -> bool;

    /// Disconnects the tree.
    fn close(&self) -> RemoteResult<()>;
}

/// An open remote handle. Reads and writes are offset-addressed and stateless.
pub trait RemoteFile: Send + Sync {
    /// Reads into `buf` at `offset`; returns 0 at end of file.
    fn read(&self, buf: &mut [u8], offset: u64) -> RemoteResult<usize>;

    /// Writes `buf` at `offset`, extending the file as needed.
    fn write(&self, buf: &[u8], offset: u64) -> RemoteResult<usize>;

    /// Sets the end-of-file marker.
    fn set_length(&self, length: u64) -> RemoteResult<()>;

    /// Metadata of the open object.
    fn file_information(&self) -> RemoteResult<FileAllInformation>;

    /// Applies `update` to the open object.
    fn set_basic_information(&self, update: &BasicInformationUpdate) -> RemoteResult<()>;

    /// Renames the open object to a share-relative path on the same share.
    fn rename(&self, new_path: &str, replace: bool) -> RemoteResult<()>;

    /// Server-side copy of this handle's content into `dst`.
    fn remote_copy_to(&self, dst: &dyn RemoteFile) -> RemoteResult<()>;

    /// Marks the object for deletion when the handle closes.
    fn delete_on_close(&self) -> RemoteResult<()>;

    /// Releases the handle; a second close fails.
    fn close(&self) -> RemoteResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_roundtrip_for_named_statuses() {
        for status in [
            NtStatus::AccessDenied,
            NtStatus::ObjectNameCollision,
            NtStatus::DeletePending,
            NtStatus::NotSupported,
        ] {
            assert_eq!(NtStatus::from_code(status.code()), status);
        }
    }

    #[test]
    fn test_unknown_status_code_is_preserved() {
        let status = NtStatus::from_code(0xC000_9999);
        assert_eq!(status, NtStatus::Other(0xC000_9999));
        assert_eq!(status.to_string(), "STATUS_0xC0009999");
    }

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::new(NtStatus::AccessDenied, "no");
        assert_eq!(err.to_string(), "AccessDenied (0xC0000022): no");
    }

    #[test]
    fn test_flag_composition() {
        let mask = AccessMask::GENERIC_READ | AccessMask::DELETE;
        assert!(mask.contains(AccessMask::GENERIC_READ));
        assert!(mask.contains(AccessMask::DELETE));
        assert!(!mask.contains(AccessMask::GENERIC_WRITE));
        assert!(ShareAccess::ALL.contains(ShareAccess::READ | ShareAccess::DELETE));
        assert!(FileAttributes(0x12).intersects(FileAttributes::HIDDEN));
    }

    #[test]
    fn test_update_from_basic_information_sets_every_slot() {
        let now = SystemTime::now();
        let info = FileBasicInformation {
            creation_time: now,
            last_access_time: now,
            last_write_time: now,
            change_time: now,
            attributes: FileAttributes::NORMAL,
        };
        let update = BasicInformationUpdate::from(&info);
        assert!(!update.is_empty());
        assert_eq!(update.attributes, Some(FileAttributes::NORMAL));
        assert!(BasicInformationUpdate::default().is_empty());
    }
}
