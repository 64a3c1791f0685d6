#![warn(missing_docs)]

//! smbfs: remote SMB shares as path-addressed filesystems
//!
//! One filesystem per `smb://[user@]host[:port]/share` identity. Paths are pure values; every
//! remote call goes through the owning filesystem's connection manager, which connects lazily
//! and reconnects transparently once the session drops.
//!
//! Call path: SmbPath → dispatch (open check, lease) → DiskShare → RemoteError → SmbFsError

pub mod attributes;
pub mod channel;
pub mod codec;
pub mod config;
pub mod connection;
pub mod directory;
mod dispatch;
pub mod error;
pub mod filesystem;
pub mod identity;
pub mod matcher;
pub mod ops;
pub mod path;
pub mod registry;
pub mod remote;
pub mod store;
pub mod testing;

pub use attributes::{AttributeViewKind, BasicFileAttributeView, BasicFileAttributes};
pub use channel::{OpenOptions, SmbByteChannel};
pub use config::{ConfigCredentialResolver, CredentialResolver, Credentials, SmbFsConfig};
pub use connection::{ConnectionManager, ConnectionState, ShareLease};
pub use directory::DirectoryStream;
pub use error::{ErrorKind, Result, SmbFsError};
pub use filesystem::SmbFileSystem;
pub use identity::{FsIdentity, UserInfo};
pub use matcher::PathMatcher;
pub use ops::{AccessMode, CopyOptions};
pub use path::SmbPath;
pub use registry::{FileSystemRegistry, LookupMode};
pub use remote::{DiskShare, NtStatus, RemoteError, RemoteFile, SmbClient, SmbConnection, SmbSession};
pub use store::SmbFileStore;
