//! One open remote filesystem: identity, connection and path factory.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::{info, warn};

use crate::attributes::AttributeViewKind;
use crate::connection::ConnectionManager;
use crate::error::{Result, SmbFsError};
use crate::identity::FsIdentity;
use crate::matcher::PathMatcher;
use crate::path::SmbPath;
use crate::registry::RegistryInner;
use crate::store::SmbFileStore;

/// Name separator of every path on a share.
pub const SEPARATOR: &str = "/";

pub(crate) struct FileSystemInner {
    identity: Arc<FsIdentity>,
    connection: ConnectionManager,
    registry: Weak<RegistryInner>,
    open: AtomicBool,
}

/// Handle on a registered filesystem. Clones share the same state.
#[derive(Clone)]
pub struct SmbFileSystem {
    inner: Arc<FileSystemInner>,
}

impl SmbFileSystem {
    pub(crate) fn new(
        identity: Arc<FsIdentity>,
        connection: ConnectionManager,
        registry: Weak<RegistryInner>,
    ) -> Self {
        Self {
            inner: Arc::new(FileSystemInner {
                identity,
                connection,
                registry,
                open: AtomicBool::new(true),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<FileSystemInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<FileSystemInner> {
        &self.inner
    }

    /// Address this filesystem is registered under.
    pub fn identity(&self) -> &FsIdentity {
        &self.inner.identity
    }

    /// The connection manager behind every remote call.
    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    /// False once [`SmbFileSystem::close`] was called.
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(SmbFsError::closed(format!("filesystem {}", self.inner.identity)))
        }
    }

    /// Shares are always mounted writable.
    pub fn is_read_only(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(false)
    }

    /// Always `/`.
    pub fn separator(&self) -> &'static str {
        SEPARATOR
    }

    /// The absolute root `/` of this filesystem.
    pub fn root(&self) -> SmbPath {
        SmbPath::new(
            self.inner.identity.clone(),
            Arc::downgrade(&self.inner),
            Vec::new(),
            true,
            true,
        )
    }

    /// The single root directory.
    pub fn root_directories(&self) -> Result<Vec<SmbPath>> {
        self.ensure_open()?;
        Ok(vec![self.root()])
    }

    /// The share as the single file store.
    pub fn file_stores(&self) -> Result<Vec<SmbFileStore>> {
        self.ensure_open()?;
        Ok(vec![SmbFileStore::new(self.root())])
    }

    /// Names of the attribute views paths on this filesystem offer.
    pub fn supported_attribute_views(&self) -> Result<&'static [AttributeViewKind]> {
        self.ensure_open()?;
        Ok(AttributeViewKind::SUPPORTED)
    }

    /// Joins `first` and `more` with the separator and parses the result.
    ///
    /// The path is absolute if `first` starts with `/` and a directory if
    /// the last non-empty part ends with `/`.
    pub fn get_path(&self, first: &str, more: &[&str]) -> Result<SmbPath> {
        self.ensure_open()?;
        let joined = std::iter::once(first)
            .chain(more.iter().copied())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(SEPARATOR);
        Ok(SmbPath::parse_in(
            self.inner.identity.clone(),
            Arc::downgrade(&self.inner),
            &joined,
        ))
    }

    /// Parses a percent-encoded path, as found in an address.
    pub(crate) fn get_encoded_path(&self, encoded: &str) -> Result<SmbPath> {
        self.ensure_open()?;
        SmbPath::parse_encoded_in(
            self.inner.identity.clone(),
            Arc::downgrade(&self.inner),
            encoded,
        )
    }

    /// `glob:<pattern>` or `regex:<pattern>`.
    pub fn path_matcher(&self, syntax_and_pattern: &str) -> Result<PathMatcher> {
        PathMatcher::new(syntax_and_pattern)
    }

    /// Not supported.
    pub fn new_watch_service(&self) -> Result<()> {
        Err(SmbFsError::unsupported("watch service"))
    }

    /// Not supported.
    pub fn user_principal_lookup_service(&self) -> Result<()> {
        Err(SmbFsError::unsupported("user principal lookup"))
    }

    /// Deregisters the filesystem and closes its connection.
    ///
    /// Closing twice is a no-op. Paths created from this filesystem keep
    /// working as values but every remote operation fails with `Closed`.
    pub fn close(&self) -> Result<()> {
        if !self.inner.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.remove(&self.inner.identity, &self.inner);
        }
        info!(target = %self.inner.identity, "closing filesystem");
        self.inner.connection.close().map_err(|e| {
            warn!(target = %self.inner.identity, error = %e, "closing connection failed");
            e
        })
    }
}

impl PartialEq for SmbFileSystem {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SmbFileSystem {}

impl fmt::Debug for SmbFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmbFileSystem")
            .field("identity", &self.inner.identity.to_string())
            .field("open", &self.is_open())
            .finish()
    }
}

impl fmt::Display for SmbFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner.identity, f)
    }
}
